//! In-process stores for tests and local runs without Postgres.
//!
//! They honor the same contracts as the Postgres stores: unique emails,
//! cascade of refresh sessions on user deletion, and an atomic `consume`.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use subtle::ConstantTimeEq;
use tokio::sync::{Mutex, RwLock};

use crate::{
    crypto::field::FieldCipher,
    error::{AppError, Result},
    models::refresh_token::RefreshSession,
    models::user::{NewUser, User},
    repositories::refresh_token::RefreshTokenStore,
    repositories::user::CredentialStore,
};

#[derive(Default)]
struct UserTable {
    next_id: i64,
    rows: HashMap<i64, User>,
    /// Encrypted bank accounts, keyed by user ID, as the column would hold them.
    bank_accounts: HashMap<i64, String>,
}

/// Users held in memory. Bank accounts are kept encrypted, as in Postgres.
#[derive(Clone)]
pub struct MemoryCredentialStore {
    table: Arc<RwLock<UserTable>>,
    cipher: FieldCipher,
    sessions: Option<MemoryRefreshTokenStore>,
}

impl MemoryCredentialStore {
    pub fn new(cipher: FieldCipher) -> Self {
        Self {
            table: Arc::new(RwLock::new(UserTable::default())),
            cipher,
            sessions: None,
        }
    }

    /// Cascades user deletion into `sessions`.
    pub fn with_sessions(mut self, sessions: MemoryRefreshTokenStore) -> Self {
        self.sessions = Some(sessions);
        self
    }

    pub async fn count_by_email(&self, email: &str) -> usize {
        let table = self.table.read().await;
        table.rows.values().filter(|u| u.email == email).count()
    }

    /// The raw stored bank account value, as it would sit in the column.
    pub async fn stored_bank_account(&self, id: i64) -> Option<String> {
        let table = self.table.read().await;
        table.bank_accounts.get(&id).cloned()
    }

    /// The same rows seen through another key, as after `ENCRYPTION_SECRET` changes.
    pub fn rekeyed(&self, cipher: FieldCipher) -> Self {
        Self {
            table: self.table.clone(),
            cipher,
            sessions: self.sessions.clone(),
        }
    }
}

#[async_trait]
impl CredentialStore for MemoryCredentialStore {
    async fn find_by_id(&self, id: i64) -> Result<Option<User>> {
        let table = self.table.read().await;
        Ok(table.rows.get(&id).cloned())
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<User>> {
        let table = self.table.read().await;
        Ok(table
            .rows
            .values()
            .find(|u| u.email == email)
            .cloned())
    }

    async fn exists_by_email(&self, email: &str) -> Result<bool> {
        let table = self.table.read().await;
        Ok(table.rows.values().any(|u| u.email == email))
    }

    async fn save(&self, user: NewUser) -> Result<User> {
        let mut table = self.table.write().await;
        if table.rows.values().any(|u| u.email == user.email) {
            return Err(AppError::DuplicateCredential);
        }

        table.next_id += 1;
        let row = User {
            id: table.next_id,
            name: user.name,
            email: user.email,
            password_hash: user.password_hash,
            role: user.role,
            enabled: true,
            created_at: Utc::now(),
        };
        table.rows.insert(row.id, row.clone());
        Ok(row)
    }

    async fn set_enabled(&self, id: i64, enabled: bool) -> Result<bool> {
        let mut table = self.table.write().await;
        match table.rows.get_mut(&id) {
            Some(user) => {
                user.enabled = enabled;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn set_bank_account(&self, id: i64, bank_account: Option<&str>) -> Result<bool> {
        let encrypted = self.cipher.encrypt_optional(bank_account)?;
        let mut table = self.table.write().await;
        if !table.rows.contains_key(&id) {
            return Ok(false);
        }
        match encrypted {
            Some(value) => table.bank_accounts.insert(id, value),
            None => table.bank_accounts.remove(&id),
        };
        Ok(true)
    }

    async fn find_bank_account(&self, id: i64) -> Result<Option<String>> {
        let stored = self.table.read().await.bank_accounts.get(&id).cloned();
        self.cipher.decrypt_optional(stored.as_deref())
    }

    async fn delete(&self, id: i64) -> Result<bool> {
        let removed = {
            let mut table = self.table.write().await;
            table.bank_accounts.remove(&id);
            table.rows.remove(&id).is_some()
        };
        if removed {
            if let Some(sessions) = &self.sessions {
                sessions.remove_for_user(id).await;
            }
        }
        Ok(removed)
    }
}

#[derive(Default)]
struct SessionTable {
    next_id: i64,
    rows: Vec<RefreshSession>,
}

/// Refresh sessions held in memory behind one mutex.
#[derive(Clone, Default)]
pub struct MemoryRefreshTokenStore {
    table: Arc<Mutex<SessionTable>>,
}

impl MemoryRefreshTokenStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn count_for_user(&self, user_id: i64) -> usize {
        let table = self.table.lock().await;
        table.rows.iter().filter(|s| s.user_id == user_id).count()
    }

    pub async fn count_valid_for_user(&self, user_id: i64, now: DateTime<Utc>) -> usize {
        let table = self.table.lock().await;
        table
            .rows
            .iter()
            .filter(|s| s.user_id == user_id && s.is_valid(now))
            .count()
    }

    async fn remove_for_user(&self, user_id: i64) {
        let mut table = self.table.lock().await;
        table.rows.retain(|s| s.user_id != user_id);
    }
}

fn hash_matches(session: &RefreshSession, token_hash: &str) -> bool {
    session
        .token_hash
        .as_bytes()
        .ct_eq(token_hash.as_bytes())
        .into()
}

#[async_trait]
impl RefreshTokenStore for MemoryRefreshTokenStore {
    async fn create(
        &self,
        user_id: i64,
        token_hash: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<RefreshSession> {
        let mut table = self.table.lock().await;
        table.next_id += 1;
        let session = RefreshSession {
            id: table.next_id,
            user_id,
            token_hash: token_hash.to_string(),
            expires_at,
            revoked: false,
            revoked_at: None,
            created_at: Utc::now(),
        };
        table.rows.push(session.clone());
        Ok(session)
    }

    async fn find_valid(
        &self,
        token_hash: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<RefreshSession>> {
        let table = self.table.lock().await;
        Ok(table
            .rows
            .iter()
            .find(|s| hash_matches(s, token_hash) && s.is_valid(now))
            .cloned())
    }

    async fn consume(
        &self,
        token_hash: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<RefreshSession>> {
        let mut table = self.table.lock().await;
        let Some(session) = table
            .rows
            .iter_mut()
            .find(|s| hash_matches(s, token_hash) && s.is_valid(now))
        else {
            return Ok(None);
        };

        session.revoked = true;
        session.revoked_at = Some(now);
        Ok(Some(session.clone()))
    }

    async fn revoke(&self, token_hash: &str, now: DateTime<Utc>) -> Result<bool> {
        let mut table = self.table.lock().await;
        match table
            .rows
            .iter_mut()
            .find(|s| hash_matches(s, token_hash) && !s.revoked)
        {
            Some(session) => {
                session.revoked = true;
                session.revoked_at = Some(now);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn revoke_all_for_user(&self, user_id: i64, now: DateTime<Utc>) -> Result<u64> {
        let mut table = self.table.lock().await;
        let mut revoked = 0;
        for session in table
            .rows
            .iter_mut()
            .filter(|s| s.user_id == user_id && !s.revoked)
        {
            session.revoked = true;
            session.revoked_at = Some(now);
            revoked += 1;
        }
        Ok(revoked)
    }

    async fn purge_expired(&self, now: DateTime<Utc>, retention: Duration) -> Result<u64> {
        let mut table = self.table.lock().await;
        let cutoff = now - retention;
        let before = table.rows.len();
        table.rows.retain(|s| {
            let revoked_long_ago = s.revoked_at.map(|at| at <= cutoff).unwrap_or(false);
            s.expires_at > cutoff && !revoked_long_ago
        });
        Ok((before - table.rows.len()) as u64)
    }
}
