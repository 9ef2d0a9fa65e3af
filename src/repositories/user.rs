use async_trait::async_trait;
use deadpool_postgres::Pool;
use tokio_postgres::Row;
use tokio_postgres::error::SqlState;

use crate::{
    crypto::field::FieldCipher,
    error::{AppError, Result},
    models::user::{NewUser, Role, User},
};

/// Read/write access to user identity records.
///
/// Lookups return identity fields only. The encrypted bank account is read
/// through [`CredentialStore::find_bank_account`] and nowhere else, so
/// authentication never depends on the field-encryption key.
#[async_trait]
pub trait CredentialStore: Send + Sync {
    /// Finds a user by their ID.
    ///
    /// # Arguments
    ///
    /// * `id` - The ID of the user.
    ///
    /// # Returns
    ///
    /// The user, or `None` if no such user exists.
    async fn find_by_id(&self, id: i64) -> Result<Option<User>>;

    /// Finds a user by their email address.
    ///
    /// # Arguments
    ///
    /// * `email` - The normalized (trimmed, lower-cased) email address.
    ///
    /// # Returns
    ///
    /// The user, or `None` if the email is not on file.
    async fn find_by_email(&self, email: &str) -> Result<Option<User>>;

    async fn exists_by_email(&self, email: &str) -> Result<bool>;

    /// Inserts a new user.
    ///
    /// # Arguments
    ///
    /// * `user` - The fields of the new user. The password must already be hashed.
    ///
    /// # Returns
    ///
    /// The stored user with its assigned ID, or `AppError::DuplicateCredential`
    /// if the email is taken.
    async fn save(&self, user: NewUser) -> Result<User>;

    /// Returns `false` when no such user exists.
    async fn set_enabled(&self, id: i64, enabled: bool) -> Result<bool>;

    /// Stores the bank account number, encrypted at rest. `None` clears it.
    ///
    /// # Returns
    ///
    /// `false` when no such user exists.
    async fn set_bank_account(&self, id: i64, bank_account: Option<&str>) -> Result<bool>;

    /// Loads and decrypts the bank account number of a user.
    ///
    /// # Arguments
    ///
    /// * `id` - The ID of the user.
    ///
    /// # Returns
    ///
    /// The plaintext, `None` if the user has none or does not exist, or
    /// `AppError::Encryption` if the stored value does not decrypt.
    async fn find_bank_account(&self, id: i64) -> Result<Option<String>>;

    /// Deletes the user; their refresh sessions go with them.
    async fn delete(&self, id: i64) -> Result<bool>;
}

macro_rules! user_columns {
    () => {
        "id, name, email, password_hash, role, enabled, created_at"
    };
}

/// Postgres-backed credential store.
///
/// The `bank_account` column goes through the injected [`FieldCipher`] and is
/// left out of every identity lookup.
#[derive(Clone)]
pub struct PgCredentialStore {
    pool: Pool,
    cipher: FieldCipher,
}

impl PgCredentialStore {
    pub fn new(pool: Pool, cipher: FieldCipher) -> Self {
        Self { pool, cipher }
    }

    fn row_to_user(row: &Row) -> Result<User> {
        let role: String = row.try_get("role")?;

        Ok(User {
            id: row.try_get("id")?,
            name: row.try_get("name")?,
            email: row.try_get("email")?,
            password_hash: row.try_get("password_hash")?,
            role: role.parse::<Role>()?,
            enabled: row.try_get("enabled")?,
            created_at: row.try_get("created_at")?,
        })
    }
}

#[async_trait]
impl CredentialStore for PgCredentialStore {
    async fn find_by_id(&self, id: i64) -> Result<Option<User>> {
        let client = self.pool.get().await?;
        let row = client
            .query_opt(
                concat!("SELECT ", user_columns!(), " FROM users WHERE id = $1"),
                &[&id],
            )
            .await?;
        row.map(|r| Self::row_to_user(&r)).transpose()
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<User>> {
        let client = self.pool.get().await?;
        let row = client
            .query_opt(
                concat!("SELECT ", user_columns!(), " FROM users WHERE email = $1"),
                &[&email],
            )
            .await?;
        row.map(|r| Self::row_to_user(&r)).transpose()
    }

    async fn exists_by_email(&self, email: &str) -> Result<bool> {
        let client = self.pool.get().await?;
        let row = client
            .query_one(
                "SELECT EXISTS(SELECT 1 FROM users WHERE email = $1) AS present",
                &[&email],
            )
            .await?;
        Ok(row.try_get("present")?)
    }

    async fn save(&self, user: NewUser) -> Result<User> {
        let client = self.pool.get().await?;
        let role = user.role.as_str();
        let row = client
            .query_one(
                concat!(
                    "INSERT INTO users (name, email, password_hash, role) ",
                    "VALUES ($1, $2, $3, $4) ",
                    "RETURNING ",
                    user_columns!()
                ),
                &[&user.name, &user.email, &user.password_hash, &role],
            )
            .await
            .map_err(|e| {
                if e.code() == Some(&SqlState::UNIQUE_VIOLATION) {
                    AppError::DuplicateCredential
                } else {
                    AppError::Database(e)
                }
            })?;
        Self::row_to_user(&row)
    }

    async fn set_enabled(&self, id: i64, enabled: bool) -> Result<bool> {
        let client = self.pool.get().await?;
        let updated = client
            .execute("UPDATE users SET enabled = $1 WHERE id = $2", &[&enabled, &id])
            .await?;
        Ok(updated > 0)
    }

    async fn set_bank_account(&self, id: i64, bank_account: Option<&str>) -> Result<bool> {
        let encrypted = self.cipher.encrypt_optional(bank_account)?;
        let client = self.pool.get().await?;
        let updated = client
            .execute(
                "UPDATE users SET bank_account = $1 WHERE id = $2",
                &[&encrypted, &id],
            )
            .await?;
        Ok(updated > 0)
    }

    async fn find_bank_account(&self, id: i64) -> Result<Option<String>> {
        let client = self.pool.get().await?;
        let row = client
            .query_opt("SELECT bank_account FROM users WHERE id = $1", &[&id])
            .await?;

        let stored: Option<String> = match row {
            Some(row) => row.try_get("bank_account")?,
            None => None,
        };
        self.cipher.decrypt_optional(stored.as_deref())
    }

    async fn delete(&self, id: i64) -> Result<bool> {
        let client = self.pool.get().await?;
        let deleted = client
            .execute("DELETE FROM users WHERE id = $1", &[&id])
            .await?;
        Ok(deleted > 0)
    }
}
