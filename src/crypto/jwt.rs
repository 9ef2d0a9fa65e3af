//! Access and refresh token minting and verification.
//!
//! Both kinds are HS256 JWTs carrying a `kind` claim. They decode into
//! distinct types so an access-token consumer cannot be handed a refresh
//! token without going through [`VerifiedToken`] explicitly.

use chrono::{DateTime, Duration, TimeZone, Utc};
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode};
use rand::RngCore;
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;

use crate::config::Config;
use crate::error::Result;
use crate::models::user::Role;

/// Random bytes in a refresh token's `jti`.
const REFRESH_ID_LEN: usize = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenKind {
    Access,
    Refresh,
}

/// Why a presented token was refused.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TokenError {
    #[error("token malformed or signature invalid")]
    Malformed,
    #[error("token expired")]
    Expired,
    #[error("token is not of the expected kind")]
    WrongKind,
}

/// The claims as they travel on the wire.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct WireClaims {
    sub: String,
    iss: String,
    iat: i64,
    exp: i64,
    jti: String,
    kind: TokenKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    role: Option<Role>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessClaims {
    pub user_id: i64,
    pub role: Role,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefreshClaims {
    pub user_id: i64,
    pub token_id: String,
    pub expires_at: DateTime<Utc>,
}

/// A token whose signature, issuer and expiry have been checked.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VerifiedToken {
    Access(AccessClaims),
    Refresh(RefreshClaims),
}

impl VerifiedToken {
    pub fn kind(&self) -> TokenKind {
        match self {
            VerifiedToken::Access(_) => TokenKind::Access,
            VerifiedToken::Refresh(_) => TokenKind::Refresh,
        }
    }

    pub fn into_access(self) -> std::result::Result<AccessClaims, TokenError> {
        match self {
            VerifiedToken::Access(claims) => Ok(claims),
            VerifiedToken::Refresh(_) => Err(TokenError::WrongKind),
        }
    }

    pub fn into_refresh(self) -> std::result::Result<RefreshClaims, TokenError> {
        match self {
            VerifiedToken::Refresh(claims) => Ok(claims),
            VerifiedToken::Access(_) => Err(TokenError::WrongKind),
        }
    }
}

/// A freshly signed token and its expiry.
#[derive(Debug, Clone)]
pub struct IssuedToken {
    pub token: String,
    pub expires_at: DateTime<Utc>,
}

/// The only holder of the signing secret.
pub struct TokenService {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    validation: Validation,
    issuer: String,
    access_token_ttl: Duration,
    refresh_token_ttl: Duration,
}

impl TokenService {
    pub fn from_config(config: &Config) -> Self {
        Self::new(
            config.jwt_secret.as_bytes(),
            &config.jwt_issuer,
            Duration::minutes(config.access_token_ttl_minutes),
            Duration::days(config.refresh_token_ttl_days),
        )
    }

    /// Creates a new `TokenService`.
    ///
    /// # Arguments
    ///
    /// * `secret` - The HMAC signing secret.
    /// * `issuer` - The `iss` claim written into and required from every token.
    /// * `access_token_ttl` - The lifetime of access tokens.
    /// * `refresh_token_ttl` - The lifetime of refresh tokens.
    pub fn new(
        secret: &[u8],
        issuer: &str,
        access_token_ttl: Duration,
        refresh_token_ttl: Duration,
    ) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_issuer(&[issuer]);
        validation.set_required_spec_claims(&["exp", "sub", "iss"]);
        validation.leeway = 0;

        Self {
            encoding_key: EncodingKey::from_secret(secret),
            decoding_key: DecodingKey::from_secret(secret),
            validation,
            issuer: issuer.to_string(),
            access_token_ttl,
            refresh_token_ttl,
        }
    }

    pub fn access_token_ttl(&self) -> Duration {
        self.access_token_ttl
    }

    pub fn refresh_token_ttl(&self) -> Duration {
        self.refresh_token_ttl
    }

    /// Signs a short-lived access token.
    ///
    /// # Arguments
    ///
    /// * `user_id` - The `sub` claim.
    /// * `role` - The role the gate will see for this token.
    ///
    /// # Returns
    ///
    /// The signed token and its expiry.
    pub fn issue_access_token(&self, user_id: i64, role: Role) -> Result<IssuedToken> {
        let now = Utc::now();
        let expires_at = now + self.access_token_ttl;
        let claims = WireClaims {
            sub: user_id.to_string(),
            iss: self.issuer.clone(),
            iat: now.timestamp(),
            exp: expires_at.timestamp(),
            jti: uuid::Uuid::new_v4().to_string(),
            kind: TokenKind::Access,
            role: Some(role),
        };
        self.sign(&claims, expires_at)
    }

    /// Mints a refresh token whose `jti` carries 256 bits of OS randomness.
    pub fn issue_refresh_token(&self, user_id: i64) -> Result<IssuedToken> {
        let now = Utc::now();
        let expires_at = now + self.refresh_token_ttl;

        let mut id = [0u8; REFRESH_ID_LEN];
        OsRng.fill_bytes(&mut id);

        let claims = WireClaims {
            sub: user_id.to_string(),
            iss: self.issuer.clone(),
            iat: now.timestamp(),
            exp: expires_at.timestamp(),
            jti: hex::encode(id),
            kind: TokenKind::Refresh,
            role: None,
        };
        self.sign(&claims, expires_at)
    }

    fn sign(&self, claims: &WireClaims, expires_at: DateTime<Utc>) -> Result<IssuedToken> {
        let token = encode(&Header::new(Algorithm::HS256), claims, &self.encoding_key)?;
        Ok(IssuedToken { token, expires_at })
    }

    /// Verifies signature, issuer and expiry. Every failure is a refusal.
    pub fn validate(&self, token: &str) -> std::result::Result<VerifiedToken, TokenError> {
        let data = decode::<WireClaims>(token, &self.decoding_key, &self.validation).map_err(
            |err| match err.kind() {
                ErrorKind::ExpiredSignature => TokenError::Expired,
                _ => TokenError::Malformed,
            },
        )?;
        let claims = data.claims;

        let user_id: i64 = claims.sub.parse().map_err(|_| TokenError::Malformed)?;
        let expires_at = timestamp(claims.exp)?;

        match claims.kind {
            TokenKind::Access => Ok(VerifiedToken::Access(AccessClaims {
                user_id,
                role: claims.role.ok_or(TokenError::Malformed)?,
                issued_at: timestamp(claims.iat)?,
                expires_at,
            })),
            TokenKind::Refresh => Ok(VerifiedToken::Refresh(RefreshClaims {
                user_id,
                token_id: claims.jti,
                expires_at,
            })),
        }
    }

    /// Accepts access tokens only.
    pub fn validate_access(&self, token: &str) -> std::result::Result<AccessClaims, TokenError> {
        self.validate(token)?.into_access()
    }

    /// Accepts refresh tokens only.
    pub fn validate_refresh(&self, token: &str) -> std::result::Result<RefreshClaims, TokenError> {
        self.validate(token)?.into_refresh()
    }

    pub fn is_refresh_token(&self, token: &str) -> bool {
        matches!(self.validate(token), Ok(VerifiedToken::Refresh(_)))
    }
}

/// The value persisted for a refresh token: hex SHA-256 of the full token.
pub fn hash_refresh_token(token: &str) -> String {
    hex::encode(Sha256::digest(token.as_bytes()))
}

fn timestamp(secs: i64) -> std::result::Result<DateTime<Utc>, TokenError> {
    Utc.timestamp_opt(secs, 0)
        .single()
        .ok_or(TokenError::Malformed)
}

#[cfg(test)]
mod tests {
    use super::*;

    const TEST_SECRET: &[u8] = b"super-secret-test-key";

    fn service() -> TokenService {
        TokenService::new(
            TEST_SECRET,
            "https://campus.test",
            Duration::minutes(15),
            Duration::days(7),
        )
    }

    #[test]
    fn issues_and_validates_access_tokens() {
        let service = service();
        let issued = service.issue_access_token(42, Role::Teacher).unwrap();

        let claims = service.validate_access(&issued.token).unwrap();
        assert_eq!(claims.user_id, 42);
        assert_eq!(claims.role, Role::Teacher);
        assert_eq!(claims.expires_at.timestamp(), issued.expires_at.timestamp());
        assert_eq!(
            claims.expires_at.timestamp() - claims.issued_at.timestamp(),
            service.access_token_ttl().num_seconds()
        );
        assert!(!service.is_refresh_token(&issued.token));
        assert_eq!(service.validate(&issued.token).unwrap().kind(), TokenKind::Access);
    }

    #[test]
    fn refresh_tokens_are_rejected_as_access_tokens() {
        let service = service();
        let refresh = service.issue_refresh_token(42).unwrap();

        assert!(service.is_refresh_token(&refresh.token));
        assert_eq!(
            service.validate_access(&refresh.token),
            Err(TokenError::WrongKind)
        );
        let claims = service.validate_refresh(&refresh.token).unwrap();
        assert_eq!(claims.user_id, 42);
        assert_eq!(claims.token_id.len(), REFRESH_ID_LEN * 2);
        assert!(claims.expires_at - Utc::now() <= service.refresh_token_ttl());
    }

    #[test]
    fn access_tokens_are_rejected_as_refresh_tokens() {
        let service = service();
        let access = service.issue_access_token(1, Role::Student).unwrap();
        assert_eq!(
            service.validate_refresh(&access.token),
            Err(TokenError::WrongKind)
        );
    }

    #[test]
    fn refresh_tokens_are_unique() {
        let service = service();
        let a = service.issue_refresh_token(1).unwrap();
        let b = service.issue_refresh_token(1).unwrap();
        assert_ne!(a.token, b.token);
        assert_ne!(hash_refresh_token(&a.token), hash_refresh_token(&b.token));
    }

    #[test]
    fn expired_tokens_are_refused() {
        let service = TokenService::new(
            TEST_SECRET,
            "https://campus.test",
            Duration::seconds(-120),
            Duration::days(7),
        );
        let issued = service.issue_access_token(5, Role::Admin).unwrap();
        assert_eq!(service.validate(&issued.token), Err(TokenError::Expired));
    }

    #[test]
    fn foreign_signatures_and_issuers_are_refused() {
        let issued = service().issue_access_token(5, Role::Admin).unwrap();

        let other_key = TokenService::new(
            b"a-different-secret",
            "https://campus.test",
            Duration::minutes(15),
            Duration::days(7),
        );
        assert_eq!(other_key.validate(&issued.token), Err(TokenError::Malformed));

        let other_issuer = TokenService::new(
            TEST_SECRET,
            "https://elsewhere.test",
            Duration::minutes(15),
            Duration::days(7),
        );
        assert_eq!(
            other_issuer.validate(&issued.token),
            Err(TokenError::Malformed)
        );
    }

    #[test]
    fn garbage_is_malformed() {
        let service = service();
        assert_eq!(service.validate(""), Err(TokenError::Malformed));
        assert_eq!(service.validate("a.b.c"), Err(TokenError::Malformed));
        assert!(!service.is_refresh_token("not-a-token"));
    }

    #[test]
    fn refresh_hash_is_stable_hex() {
        let hash = hash_refresh_token("token");
        assert_eq!(hash.len(), 64);
        assert_eq!(hash, hash_refresh_token("token"));
    }
}
