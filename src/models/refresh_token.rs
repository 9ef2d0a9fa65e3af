use chrono::{DateTime, Utc};

/// A server-side refresh session row.
///
/// Only the SHA-256 hash of the refresh token is stored.
#[derive(Clone, Debug)]
pub struct RefreshSession {
    pub id: i64,
    pub user_id: i64,
    pub token_hash: String,
    pub expires_at: DateTime<Utc>,
    pub revoked: bool,
    pub revoked_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl RefreshSession {
    /// Not revoked and not yet expired.
    pub fn is_valid(&self, now: DateTime<Utc>) -> bool {
        !self.revoked && self.expires_at > now
    }
}
