//! Session lifecycle: sign-up, sign-in, refresh-with-rotation and logout.
//!
//! Each refresh session moves `ISSUED -> ROTATED | REVOKED | EXPIRED`.
//! Rotation is terminal for the consumed value and issues a new session.

use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::{
    crypto::jwt::{TokenService, hash_refresh_token},
    crypto::password::PasswordHasher,
    error::{AppError, Result},
    models::context::CorrelationId,
    models::principal::Principal,
    models::user::{NewUser, Role, User},
    repositories::refresh_token::RefreshTokenStore,
    repositories::user::CredentialStore,
};

/// What a successful sign-up, sign-in or refresh hands back.
#[derive(Debug, Clone)]
pub struct AuthOutcome {
    pub access_token: String,
    pub access_token_expires_at: DateTime<Utc>,
    pub refresh_token: String,
    pub refresh_token_expires_at: DateTime<Utc>,
    pub principal: Principal,
}

/// Input to [`SessionManager::signup`].
#[derive(Debug, Clone)]
pub struct SignupCommand {
    pub name: String,
    pub email: String,
    pub password: String,
}

/// Lower-cases and trims an email for storage and lookup.
pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

/// The only writer of refresh sessions.
#[derive(Clone)]
pub struct SessionManager {
    users: Arc<dyn CredentialStore>,
    sessions: Arc<dyn RefreshTokenStore>,
    tokens: Arc<TokenService>,
    passwords: Arc<PasswordHasher>,
}

impl SessionManager {
    /// Creates a new `SessionManager`.
    ///
    /// # Arguments
    ///
    /// * `users` - The credential store.
    /// * `sessions` - The refresh session store. Nothing else should write to it.
    /// * `tokens` - The token issuer/validator.
    /// * `passwords` - The Argon2 password hasher.
    pub fn new(
        users: Arc<dyn CredentialStore>,
        sessions: Arc<dyn RefreshTokenStore>,
        tokens: Arc<TokenService>,
        passwords: Arc<PasswordHasher>,
    ) -> Self {
        Self {
            users,
            sessions,
            tokens,
            passwords,
        }
    }

    /// Registers a new user and opens their first session.
    ///
    /// Any role is accepted here. The HTTP layer restricts which roles may
    /// self-register.
    ///
    /// # Arguments
    ///
    /// * `command` - The name, email and plaintext password of the new user.
    /// * `role` - The role of the new user.
    /// * `ctx` - The correlation ID of the request.
    ///
    /// # Returns
    ///
    /// A token pair and the new Principal, or `AppError::DuplicateCredential`
    /// if the email is already on file.
    pub async fn signup(
        &self,
        command: SignupCommand,
        role: Role,
        ctx: &CorrelationId,
    ) -> Result<AuthOutcome> {
        let email = normalize_email(&command.email);
        tracing::debug!(correlation_id = %ctx, %role, "📝 Sign-up attempt");

        if self.users.exists_by_email(&email).await? {
            tracing::info!(correlation_id = %ctx, "Sign-up refused: email already registered");
            return Err(AppError::DuplicateCredential);
        }

        let password_hash = self.passwords.hash(&command.password)?;

        // The unique constraint still guards the race between the check and the insert.
        let user = self
            .users
            .save(NewUser {
                name: command.name.trim().to_string(),
                email,
                password_hash,
                role,
            })
            .await?;

        tracing::info!(correlation_id = %ctx, user_id = user.id, %role, "✅ User registered");
        self.open_session(&user, ctx).await
    }

    /// Verifies credentials and opens a new session.
    ///
    /// # Arguments
    ///
    /// * `email` - The email address, normalized before lookup.
    /// * `password` - The plaintext password.
    /// * `ctx` - The correlation ID of the request.
    ///
    /// # Returns
    ///
    /// A token pair and the Principal. Unknown email and wrong password both
    /// yield `AppError::InvalidCredential`; a disabled account with the right
    /// password yields `AppError::AccountDisabled`.
    pub async fn signin(
        &self,
        email: &str,
        password: &str,
        ctx: &CorrelationId,
    ) -> Result<AuthOutcome> {
        let email = normalize_email(email);

        let Some(user) = self.users.find_by_email(&email).await? else {
            self.passwords.verify_dummy(password);
            tracing::info!(correlation_id = %ctx, "Sign-in refused: invalid credential");
            return Err(AppError::InvalidCredential);
        };

        if !self.passwords.verify(password, &user.password_hash)? {
            tracing::info!(correlation_id = %ctx, "Sign-in refused: invalid credential");
            return Err(AppError::InvalidCredential);
        }

        if !user.enabled {
            tracing::info!(correlation_id = %ctx, user_id = user.id, "Sign-in refused: account disabled");
            return Err(AppError::AccountDisabled);
        }

        tracing::info!(correlation_id = %ctx, user_id = user.id, "✅ User signed in");
        self.open_session(&user, ctx).await
    }

    /// Consumes `presented` and issues a new access token and refresh session.
    ///
    /// The consumed value is dead afterwards even though it has not expired.
    ///
    /// # Arguments
    ///
    /// * `presented` - The refresh token sent by the client.
    /// * `ctx` - The correlation ID of the request.
    ///
    /// # Returns
    ///
    /// A fresh token pair, or `AppError::InvalidOrExpiredRefreshToken` when the
    /// value is not a live refresh token of an existing user.
    pub async fn refresh(&self, presented: &str, ctx: &CorrelationId) -> Result<AuthOutcome> {
        let claims = self.tokens.validate_refresh(presented).map_err(|e| {
            tracing::info!(correlation_id = %ctx, reason = %e, "Refresh refused");
            AppError::InvalidOrExpiredRefreshToken
        })?;

        let now = Utc::now();
        let Some(session) = self
            .sessions
            .consume(&hash_refresh_token(presented), now)
            .await?
        else {
            tracing::info!(correlation_id = %ctx, user_id = claims.user_id, "Refresh refused: no live session");
            return Err(AppError::InvalidOrExpiredRefreshToken);
        };

        if session.user_id != claims.user_id {
            tracing::warn!(correlation_id = %ctx, "Refresh refused: session owner mismatch");
            return Err(AppError::InvalidOrExpiredRefreshToken);
        }

        let user = self
            .users
            .find_by_id(session.user_id)
            .await?
            .ok_or(AppError::InvalidOrExpiredRefreshToken)?;

        if !user.enabled {
            tracing::info!(correlation_id = %ctx, user_id = user.id, "Refresh refused: account disabled");
            return Err(AppError::AccountDisabled);
        }

        tracing::info!(correlation_id = %ctx, user_id = user.id, session_id = session.id, "🔄 Refresh session rotated");
        self.open_session(&user, ctx).await
    }

    /// Revokes the session behind `presented`. Never fails on a dead value.
    pub async fn logout(&self, presented: &str, ctx: &CorrelationId) -> Result<()> {
        let revoked = self
            .sessions
            .revoke(&hash_refresh_token(presented), Utc::now())
            .await?;

        if revoked {
            tracing::info!(correlation_id = %ctx, "👋 Refresh session revoked");
        } else {
            tracing::debug!(correlation_id = %ctx, "Logout with an already dead refresh token");
        }
        Ok(())
    }

    /// Revokes every refresh session of `user_id`. Returns how many were live.
    pub async fn logout_all(&self, user_id: i64, ctx: &CorrelationId) -> Result<u64> {
        let revoked = self
            .sessions
            .revoke_all_for_user(user_id, Utc::now())
            .await?;
        tracing::info!(correlation_id = %ctx, user_id, revoked, "👋 All refresh sessions revoked");
        Ok(revoked)
    }

    /// Enables or disables an account. Disabling also revokes its refresh sessions.
    pub async fn set_enabled(&self, user_id: i64, enabled: bool, ctx: &CorrelationId) -> Result<()> {
        if !self.users.set_enabled(user_id, enabled).await? {
            return Err(AppError::NotFound);
        }
        if !enabled {
            self.logout_all(user_id, ctx).await?;
        }
        tracing::info!(correlation_id = %ctx, user_id, enabled, "Account status changed");
        Ok(())
    }

    async fn open_session(&self, user: &User, ctx: &CorrelationId) -> Result<AuthOutcome> {
        let access = self.tokens.issue_access_token(user.id, user.role)?;
        let refresh = self.tokens.issue_refresh_token(user.id)?;

        let session = self
            .sessions
            .create(user.id, &hash_refresh_token(&refresh.token), refresh.expires_at)
            .await?;
        tracing::debug!(correlation_id = %ctx, user_id = user.id, session_id = session.id, "Refresh session issued");

        Ok(AuthOutcome {
            access_token: access.token,
            access_token_expires_at: access.expires_at,
            refresh_token: refresh.token,
            refresh_token_expires_at: refresh.expires_at,
            principal: Principal::from(user),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::field::FieldCipher;
    use crate::repositories::memory::{MemoryCredentialStore, MemoryRefreshTokenStore};
    use chrono::Duration;

    struct Fixture {
        manager: SessionManager,
        users: MemoryCredentialStore,
        sessions: MemoryRefreshTokenStore,
        tokens: Arc<TokenService>,
        ctx: CorrelationId,
    }

    fn fixture() -> Fixture {
        let sessions = MemoryRefreshTokenStore::new();
        let users = MemoryCredentialStore::new(FieldCipher::from_secret("svc-test").unwrap())
            .with_sessions(sessions.clone());
        let tokens = Arc::new(TokenService::new(
            b"service-test-secret",
            "campus-test",
            Duration::minutes(15),
            Duration::days(7),
        ));
        let manager = SessionManager::new(
            Arc::new(users.clone()),
            Arc::new(sessions.clone()),
            tokens.clone(),
            Arc::new(PasswordHasher::new(1024).unwrap()),
        );
        Fixture {
            manager,
            users,
            sessions,
            tokens,
            ctx: CorrelationId::new("test"),
        }
    }

    fn signup_command(email: &str) -> SignupCommand {
        SignupCommand {
            name: "Grace Hopper".to_string(),
            email: email.to_string(),
            password: "correct horse battery".to_string(),
        }
    }

    #[tokio::test]
    async fn signup_issues_a_token_pair() {
        let f = fixture();
        let outcome = f
            .manager
            .signup(signup_command("Grace@Example.com "), Role::Teacher, &f.ctx)
            .await
            .unwrap();

        assert_eq!(outcome.principal.email, "grace@example.com");
        assert_eq!(outcome.principal.role, Role::Teacher);
        let claims = f.tokens.validate_access(&outcome.access_token).unwrap();
        assert_eq!(claims.user_id, outcome.principal.id);
        assert!(f.tokens.is_refresh_token(&outcome.refresh_token));
        assert_eq!(
            f.sessions
                .count_valid_for_user(outcome.principal.id, Utc::now())
                .await,
            1
        );
    }

    #[tokio::test]
    async fn duplicate_signup_is_rejected() {
        let f = fixture();
        f.manager
            .signup(signup_command("dup@example.com"), Role::Student, &f.ctx)
            .await
            .unwrap();
        let second = f
            .manager
            .signup(signup_command("DUP@example.com"), Role::Admin, &f.ctx)
            .await;

        assert!(matches!(second, Err(AppError::DuplicateCredential)));
        assert_eq!(f.users.count_by_email("dup@example.com").await, 1);
    }

    #[tokio::test]
    async fn signin_failures_are_indistinguishable() {
        let f = fixture();
        f.manager
            .signup(signup_command("known@example.com"), Role::Student, &f.ctx)
            .await
            .unwrap();

        let wrong_password = f
            .manager
            .signin("known@example.com", "nope", &f.ctx)
            .await
            .unwrap_err();
        let unknown_email = f
            .manager
            .signin("nobody@example.com", "nope", &f.ctx)
            .await
            .unwrap_err();

        assert!(matches!(wrong_password, AppError::InvalidCredential));
        assert!(matches!(unknown_email, AppError::InvalidCredential));
        assert_eq!(wrong_password.to_string(), unknown_email.to_string());
    }

    #[tokio::test]
    async fn disabled_account_cannot_sign_in() {
        let f = fixture();
        let outcome = f
            .manager
            .signup(signup_command("off@example.com"), Role::Student, &f.ctx)
            .await
            .unwrap();
        f.users.set_enabled(outcome.principal.id, false).await.unwrap();

        let result = f
            .manager
            .signin("off@example.com", "correct horse battery", &f.ctx)
            .await;
        assert!(matches!(result, Err(AppError::AccountDisabled)));
    }

    #[tokio::test]
    async fn multiple_sessions_per_user_are_allowed() {
        let f = fixture();
        let first = f
            .manager
            .signup(signup_command("multi@example.com"), Role::Student, &f.ctx)
            .await
            .unwrap();
        f.manager
            .signin("multi@example.com", "correct horse battery", &f.ctx)
            .await
            .unwrap();

        assert_eq!(
            f.sessions
                .count_valid_for_user(first.principal.id, Utc::now())
                .await,
            2
        );
    }

    #[tokio::test]
    async fn rotation_invalidates_the_consumed_value() {
        let f = fixture();
        let first = f
            .manager
            .signup(signup_command("rotate@example.com"), Role::Student, &f.ctx)
            .await
            .unwrap();

        let second = f.manager.refresh(&first.refresh_token, &f.ctx).await.unwrap();
        assert_ne!(second.refresh_token, first.refresh_token);

        let replay = f.manager.refresh(&first.refresh_token, &f.ctx).await;
        assert!(matches!(replay, Err(AppError::InvalidOrExpiredRefreshToken)));

        f.manager.refresh(&second.refresh_token, &f.ctx).await.unwrap();
    }

    #[tokio::test]
    async fn logout_is_idempotent_and_blocks_refresh() {
        let f = fixture();
        let outcome = f
            .manager
            .signup(signup_command("bye@example.com"), Role::Student, &f.ctx)
            .await
            .unwrap();

        f.manager.logout(&outcome.refresh_token, &f.ctx).await.unwrap();
        f.manager.logout(&outcome.refresh_token, &f.ctx).await.unwrap();
        f.manager.logout("garbage", &f.ctx).await.unwrap();

        let result = f.manager.refresh(&outcome.refresh_token, &f.ctx).await;
        assert!(matches!(result, Err(AppError::InvalidOrExpiredRefreshToken)));
    }

    #[tokio::test]
    async fn access_token_cannot_be_used_to_refresh() {
        let f = fixture();
        let outcome = f
            .manager
            .signup(signup_command("kind@example.com"), Role::Student, &f.ctx)
            .await
            .unwrap();

        let result = f.manager.refresh(&outcome.access_token, &f.ctx).await;
        assert!(matches!(result, Err(AppError::InvalidOrExpiredRefreshToken)));
    }

    #[tokio::test]
    async fn forged_refresh_token_without_session_is_refused() {
        let f = fixture();
        let outcome = f
            .manager
            .signup(signup_command("forge@example.com"), Role::Student, &f.ctx)
            .await
            .unwrap();

        // Correctly signed, but never recorded server-side.
        let unrecorded = f.tokens.issue_refresh_token(outcome.principal.id).unwrap();
        let result = f.manager.refresh(&unrecorded.token, &f.ctx).await;
        assert!(matches!(result, Err(AppError::InvalidOrExpiredRefreshToken)));
    }

    #[tokio::test]
    async fn deleted_user_cannot_refresh() {
        let f = fixture();
        let outcome = f
            .manager
            .signup(signup_command("deleted@example.com"), Role::Student, &f.ctx)
            .await
            .unwrap();
        f.users.delete(outcome.principal.id).await.unwrap();

        let result = f.manager.refresh(&outcome.refresh_token, &f.ctx).await;
        assert!(matches!(result, Err(AppError::InvalidOrExpiredRefreshToken)));
    }

    #[tokio::test]
    async fn disabling_revokes_sessions() {
        let f = fixture();
        let outcome = f
            .manager
            .signup(signup_command("ban@example.com"), Role::Student, &f.ctx)
            .await
            .unwrap();

        f.manager
            .set_enabled(outcome.principal.id, false, &f.ctx)
            .await
            .unwrap();

        let result = f.manager.refresh(&outcome.refresh_token, &f.ctx).await;
        assert!(matches!(result, Err(AppError::InvalidOrExpiredRefreshToken)));
        assert!(matches!(
            f.manager.set_enabled(9999, false, &f.ctx).await,
            Err(AppError::NotFound)
        ));
    }

    #[tokio::test]
    async fn logout_all_revokes_every_session() {
        let f = fixture();
        let first = f
            .manager
            .signup(signup_command("all@example.com"), Role::Student, &f.ctx)
            .await
            .unwrap();
        let second = f
            .manager
            .signin("all@example.com", "correct horse battery", &f.ctx)
            .await
            .unwrap();

        let revoked = f
            .manager
            .logout_all(first.principal.id, &f.ctx)
            .await
            .unwrap();
        assert_eq!(revoked, 2);
        assert!(f.manager.refresh(&first.refresh_token, &f.ctx).await.is_err());
        assert!(f.manager.refresh(&second.refresh_token, &f.ctx).await.is_err());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_refresh_has_exactly_one_winner() {
        let f = fixture();
        let outcome = f
            .manager
            .signup(signup_command("race@example.com"), Role::Student, &f.ctx)
            .await
            .unwrap();

        for _ in 0..8 {
            let fresh = f
                .manager
                .signin("race@example.com", "correct horse battery", &f.ctx)
                .await
                .unwrap();

            let handles: Vec<_> = (0..2)
                .map(|_| {
                    let manager = f.manager.clone();
                    let token = fresh.refresh_token.clone();
                    tokio::spawn(async move {
                        manager.refresh(&token, &CorrelationId::generate()).await
                    })
                })
                .collect();

            let mut wins = 0;
            let mut losses = 0;
            for handle in handles {
                match handle.await.unwrap() {
                    Ok(_) => wins += 1,
                    Err(AppError::InvalidOrExpiredRefreshToken) => losses += 1,
                    Err(other) => panic!("unexpected error: {other}"),
                }
            }
            assert_eq!((wins, losses), (1, 1));
        }

        // One original session + eight sign-ins, each rotated exactly once.
        assert_eq!(
            f.sessions
                .count_valid_for_user(outcome.principal.id, Utc::now())
                .await,
            9
        );
    }
}
