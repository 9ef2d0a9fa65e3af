use std::sync::Arc;

use crate::config::Config;
use crate::crypto::field::FieldCipher;
use crate::crypto::jwt::TokenService;
use crate::crypto::password::PasswordHasher;
use crate::error::Result;
use crate::repositories::memory::{MemoryCredentialStore, MemoryRefreshTokenStore};
use crate::repositories::refresh_token::{PgRefreshTokenStore, RefreshTokenStore};
use crate::repositories::user::{CredentialStore, PgCredentialStore};
use crate::services::auth::SessionManager;

/// The application's state.
///
/// Everything here is read-only after construction.
#[derive(Clone)]
pub struct AppState {
    /// The application's configuration.
    pub config: Arc<Config>,
    /// Token issuer/validator, the only holder of the signing secret.
    pub tokens: Arc<TokenService>,
    /// The credential store the gate loads Principals from.
    pub users: Arc<dyn CredentialStore>,
    /// Refresh sessions, for maintenance jobs. Writes go through `sessions`.
    pub refresh_store: Arc<dyn RefreshTokenStore>,
    /// The session lifecycle manager.
    pub sessions: SessionManager,
}

impl AppState {
    /// Creates a new `AppState` backed by Postgres.
    pub async fn new(config: &Config) -> Result<Self> {
        let pool = crate::db::create_pool(&config.database_url)?;
        tracing::info!("✅ PostgreSQL Pool initialized with deadpool-postgres");

        crate::db::run_migrations(&pool).await?;

        let cipher = FieldCipher::from_secret(&config.encryption_secret)?;
        tracing::info!("✅ Field encryption key derived");

        let users = Arc::new(PgCredentialStore::new(pool.clone(), cipher));
        let refresh_store = Arc::new(PgRefreshTokenStore::new(pool));

        Self::with_stores(config, users, refresh_store)
    }

    /// Creates an `AppState` over in-memory stores.
    ///
    /// Returns the concrete stores so callers can inspect them.
    pub fn in_memory(
        config: &Config,
    ) -> Result<(Self, MemoryCredentialStore, MemoryRefreshTokenStore)> {
        let cipher = FieldCipher::from_secret(&config.encryption_secret)?;
        let refresh_store = MemoryRefreshTokenStore::new();
        let users = MemoryCredentialStore::new(cipher).with_sessions(refresh_store.clone());

        let state = Self::with_stores(
            config,
            Arc::new(users.clone()),
            Arc::new(refresh_store.clone()),
        )?;
        Ok((state, users, refresh_store))
    }

    /// Creates an `AppState` over already-built stores.
    pub fn with_stores(
        config: &Config,
        users: Arc<dyn CredentialStore>,
        refresh_store: Arc<dyn RefreshTokenStore>,
    ) -> Result<Self> {
        let tokens = Arc::new(TokenService::from_config(config));
        let passwords = Arc::new(PasswordHasher::new(config.password_hash_memory_kib)?);

        let sessions = SessionManager::new(
            users.clone(),
            refresh_store.clone(),
            tokens.clone(),
            passwords,
        );

        Ok(Self {
            config: Arc::new(config.clone()),
            tokens,
            users,
            refresh_store,
            sessions,
        })
    }
}
