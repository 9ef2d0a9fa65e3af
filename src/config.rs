use std::env;
use std::str::FromStr;

use anyhow::{Context, Result};
use zeroize::Zeroizing;

/// Placeholder signing secret shipped in `.env.example`.
pub const DEV_JWT_SECRET: &str = "change-me-jwt-secret";
/// Placeholder field-encryption secret shipped in `.env.example`.
pub const DEV_ENCRYPTION_SECRET: &str = "change-me-encryption-secret";

/// Minimum signing secret length accepted in production.
const MIN_PRODUCTION_SECRET_LEN: usize = 32;

/// The deployment profile, read from `APP_ENV`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppEnv {
    Development,
    Test,
    Production,
}

impl FromStr for AppEnv {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "development" | "dev" => Ok(AppEnv::Development),
            "test" => Ok(AppEnv::Test),
            "production" | "prod" => Ok(AppEnv::Production),
            other => anyhow::bail!("Unknown APP_ENV: {}", other),
        }
    }
}

/// The application's configuration.
#[derive(Clone)]
pub struct Config {
    /// The deployment profile.
    pub app_env: AppEnv,
    /// The URL of the PostgreSQL database.
    pub database_url: String,
    /// The address the HTTP server binds to.
    pub bind_addr: String,
    /// The HMAC secret used to sign tokens.
    pub jwt_secret: Zeroizing<String>,
    /// The `iss` claim written into and required from every token.
    pub jwt_issuer: String,
    /// Lifetime of an access token in minutes.
    pub access_token_ttl_minutes: i64,
    /// Lifetime of a refresh session in days.
    pub refresh_token_ttl_days: i64,
    /// The secret the field-encryption key is derived from.
    pub encryption_secret: Zeroizing<String>,
    /// Argon2 memory cost in KiB.
    pub password_hash_memory_kib: u32,
}

impl Config {
    /// Creates a new `Config` from environment variables.
    ///
    /// Development placeholder secrets are refused in production and
    /// flagged with a warning everywhere else.
    pub fn from_env() -> Result<Self> {
        let app_env = env::var("APP_ENV")
            .unwrap_or_else(|_| "development".to_string())
            .parse::<AppEnv>()?;

        let config = Self {
            app_env,
            database_url: env::var("DATABASE_URL").context("DATABASE_URL must be set")?,
            bind_addr: env::var("BIND_ADDR").unwrap_or_else(|_| "127.0.0.1:3000".to_string()),
            jwt_secret: Zeroizing::new(
                env::var("JWT_SECRET")
                    .context("JWT_SECRET must be set (generate with: openssl rand -hex 32)")?,
            ),
            jwt_issuer: env::var("JWT_ISSUER").unwrap_or_else(|_| "campus-auth".to_string()),
            access_token_ttl_minutes: env::var("ACCESS_TOKEN_TTL_MINUTES")
                .unwrap_or_else(|_| "15".to_string())
                .parse()
                .context("Invalid ACCESS_TOKEN_TTL_MINUTES")?,
            refresh_token_ttl_days: env::var("REFRESH_TOKEN_TTL_DAYS")
                .unwrap_or_else(|_| "7".to_string())
                .parse()
                .context("Invalid REFRESH_TOKEN_TTL_DAYS")?,
            encryption_secret: Zeroizing::new(
                env::var("ENCRYPTION_SECRET")
                    .context("ENCRYPTION_SECRET must be set (generate with: openssl rand -hex 32)")?,
            ),
            password_hash_memory_kib: env::var("PASSWORD_HASH_MEMORY_KIB")
                .unwrap_or_else(|_| "19456".to_string())
                .parse()
                .context("Invalid PASSWORD_HASH_MEMORY_KIB")?,
        };

        config.check_secrets()?;
        Ok(config)
    }

    /// Rejects unsafe secrets for production and warns about them otherwise.
    pub fn check_secrets(&self) -> Result<()> {
        if self.access_token_ttl_minutes <= 0 || self.refresh_token_ttl_days <= 0 {
            anyhow::bail!("Token lifetimes must be positive");
        }

        let placeholder = self.jwt_secret.as_str() == DEV_JWT_SECRET
            || self.encryption_secret.as_str() == DEV_ENCRYPTION_SECRET;

        match self.app_env {
            AppEnv::Production => {
                if placeholder {
                    anyhow::bail!("Development secrets are not allowed when APP_ENV=production");
                }
                if self.jwt_secret.len() < MIN_PRODUCTION_SECRET_LEN {
                    anyhow::bail!(
                        "JWT_SECRET must be at least {} bytes in production",
                        MIN_PRODUCTION_SECRET_LEN
                    );
                }
                if self.encryption_secret.is_empty() {
                    anyhow::bail!("ENCRYPTION_SECRET must not be empty");
                }
            }
            AppEnv::Development => {
                if placeholder {
                    tracing::warn!("⚠️  Running with development placeholder secrets");
                }
            }
            AppEnv::Test => {}
        }

        Ok(())
    }

    /// A configuration for tests and local runs against in-memory stores.
    pub fn for_tests() -> Self {
        Self {
            app_env: AppEnv::Test,
            database_url: String::new(),
            bind_addr: "127.0.0.1:0".to_string(),
            jwt_secret: Zeroizing::new(DEV_JWT_SECRET.to_string()),
            jwt_issuer: "campus-auth-test".to_string(),
            access_token_ttl_minutes: 15,
            refresh_token_ttl_days: 7,
            encryption_secret: Zeroizing::new(DEV_ENCRYPTION_SECRET.to_string()),
            password_hash_memory_kib: 1024,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_app_env_case_insensitively() {
        assert_eq!("PRODUCTION".parse::<AppEnv>().unwrap(), AppEnv::Production);
        assert_eq!("dev".parse::<AppEnv>().unwrap(), AppEnv::Development);
        assert!("staging".parse::<AppEnv>().is_err());
    }

    #[test]
    fn production_rejects_placeholder_secrets() {
        let mut config = Config::for_tests();
        config.app_env = AppEnv::Production;
        assert!(config.check_secrets().is_err());

        config.jwt_secret = Zeroizing::new("a".repeat(48));
        config.encryption_secret = Zeroizing::new("b".repeat(32));
        assert!(config.check_secrets().is_ok());
    }

    #[test]
    fn production_rejects_short_signing_secret() {
        let mut config = Config::for_tests();
        config.app_env = AppEnv::Production;
        config.jwt_secret = Zeroizing::new("short".to_string());
        config.encryption_secret = Zeroizing::new("b".repeat(32));
        assert!(config.check_secrets().is_err());
    }

    #[test]
    fn test_profile_accepts_placeholder_secrets() {
        assert!(Config::for_tests().check_secrets().is_ok());
    }
}
