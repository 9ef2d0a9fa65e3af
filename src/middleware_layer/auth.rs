//! The request authentication gate and its paired entry points.
//!
//! The gate never rejects a request. It only decides whether a
//! [`Principal`] is attached; `require_principal` and `require_role`
//! turn a missing or insufficient Principal into 401/403 on protected routes.

use axum::{
    body::Body,
    extract::{FromRequestParts, State},
    http::{Request, header, request::Parts},
    middleware::Next,
    response::{IntoResponse, Response},
};

use crate::{
    error::{AppError, Result},
    models::context::CorrelationId,
    models::principal::Principal,
    models::user::Role,
    state::AppState,
};

/// Paths that need no token. The gate skips them and the entry point never answers 401 on them.
const PUBLIC_PATHS: &[&str] = &["/auth/signin", "/auth/refresh", "/auth/logout", "/health"];
const PUBLIC_PREFIXES: &[&str] = &["/auth/signup/", "/health/"];

pub fn is_public_path(path: &str) -> bool {
    PUBLIC_PATHS.contains(&path) || PUBLIC_PREFIXES.iter().any(|p| path.starts_with(p))
}

/// Extracts the token from `Authorization: Bearer <token>`.
pub fn bearer_token(request: &Request<Body>) -> Option<&str> {
    let header = request.headers().get(header::AUTHORIZATION)?.to_str().ok()?;
    let (scheme, token) = header.split_once(' ')?;
    let token = token.trim();
    (scheme.eq_ignore_ascii_case("Bearer") && !token.is_empty()).then_some(token)
}

/// Turns a bearer token into a Principal, or `None` if it must not authenticate.
async fn resolve_principal(state: &AppState, token: &str) -> Result<Option<Principal>> {
    let claims = match state.tokens.validate_access(token) {
        Ok(claims) => claims,
        Err(reason) => {
            tracing::debug!(%reason, "Bearer token refused");
            return Ok(None);
        }
    };

    let Some(user) = state.users.find_by_id(claims.user_id).await? else {
        tracing::debug!(user_id = claims.user_id, "Bearer token for unknown user");
        return Ok(None);
    };

    if !user.enabled {
        tracing::debug!(user_id = user.id, "Bearer token for disabled user");
        return Ok(None);
    }

    Ok(Some(Principal::from(&user)))
}

/// Runs once per request ahead of every handler.
pub async fn authenticate(
    State(state): State<AppState>,
    mut request: Request<Body>,
    next: Next,
) -> Response {
    if is_public_path(request.uri().path()) {
        return next.run(request).await;
    }

    let Some(token) = bearer_token(&request).map(str::to_owned) else {
        return next.run(request).await;
    };

    match resolve_principal(&state, &token).await {
        Ok(Some(principal)) => {
            tracing::debug!(user_id = principal.id, authority = %principal.authority(), "🔐 Request authenticated");
            request.extensions_mut().insert(principal);
        }
        Ok(None) => {}
        Err(e) => {
            let correlation_id = request
                .extensions()
                .get::<CorrelationId>()
                .map(|id| id.to_string())
                .unwrap_or_default();
            tracing::warn!(%correlation_id, error = %e, "Authentication gate failed; continuing unauthenticated");
        }
    }

    next.run(request).await
}

/// Answers 401 when a protected route is reached without a Principal.
pub async fn require_principal(request: Request<Body>, next: Next) -> Response {
    if is_public_path(request.uri().path()) || request.extensions().get::<Principal>().is_some() {
        return next.run(request).await;
    }
    AppError::Unauthenticated.into_response()
}

/// Answers 403 unless the Principal holds one of `allowed`.
pub async fn require_role(
    State(allowed): State<&'static [Role]>,
    request: Request<Body>,
    next: Next,
) -> Response {
    match request.extensions().get::<Principal>() {
        Some(principal) if allowed.iter().any(|role| principal.has_role(*role)) => {
            next.run(request).await
        }
        Some(principal) => {
            tracing::warn!(user_id = principal.id, role = %principal.role, "Role not permitted");
            AppError::Forbidden.into_response()
        }
        None => AppError::Unauthenticated.into_response(),
    }
}

impl<S: Send + Sync> FromRequestParts<S> for Principal {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self> {
        parts
            .extensions
            .get::<Principal>()
            .cloned()
            .ok_or(AppError::Unauthenticated)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::config::Config;
    use crate::crypto::field::FieldCipher;
    use crate::repositories::memory::{MemoryCredentialStore, MemoryRefreshTokenStore};
    use crate::repositories::user::CredentialStore;
    use crate::services::auth::SignupCommand;

    fn request(authorization: Option<&str>) -> Request<Body> {
        let mut builder = Request::builder().uri("/api/me");
        if let Some(value) = authorization {
            builder = builder.header(header::AUTHORIZATION, value);
        }
        builder.body(Body::empty()).unwrap()
    }

    #[test]
    fn public_allowlist() {
        assert!(is_public_path("/auth/signin"));
        assert!(is_public_path("/auth/signup/student"));
        assert!(is_public_path("/auth/refresh"));
        assert!(is_public_path("/auth/logout"));
        assert!(is_public_path("/health"));
        assert!(!is_public_path("/auth/logout-all"));
        assert!(!is_public_path("/auth/signup"));
        assert!(!is_public_path("/api/me"));
    }

    #[test]
    fn extracts_bearer_tokens() {
        assert_eq!(bearer_token(&request(Some("Bearer abc.def"))), Some("abc.def"));
        assert_eq!(bearer_token(&request(Some("bearer xyz"))), Some("xyz"));
        assert_eq!(bearer_token(&request(Some("Basic Zm9vOmJhcg=="))), None);
        assert_eq!(bearer_token(&request(Some("Bearer "))), None);
        assert_eq!(bearer_token(&request(Some("Bearer"))), None);
        assert_eq!(bearer_token(&request(None)), None);
    }

    #[tokio::test]
    async fn undecryptable_bank_account_does_not_lock_the_user_out() {
        let original = MemoryCredentialStore::new(FieldCipher::from_secret("before-rotation").unwrap());
        let rotated = original.rekeyed(FieldCipher::from_secret("after-rotation").unwrap());
        let state = AppState::with_stores(
            &Config::for_tests(),
            Arc::new(rotated),
            Arc::new(MemoryRefreshTokenStore::new()),
        )
        .unwrap();

        let ctx = CorrelationId::new("gate-test");
        let outcome = state
            .sessions
            .signup(
                SignupCommand {
                    name: "Rotated".to_string(),
                    email: "rotated@example.com".to_string(),
                    password: "correct horse battery".to_string(),
                },
                Role::Student,
                &ctx,
            )
            .await
            .unwrap();
        original
            .set_bank_account(outcome.principal.id, Some("NL91ABNA0417164300"))
            .await
            .unwrap();

        let principal = resolve_principal(&state, &outcome.access_token)
            .await
            .unwrap()
            .expect("gate should attach a Principal");
        assert_eq!(principal.id, outcome.principal.id);

        state
            .sessions
            .signin("rotated@example.com", "correct horse battery", &ctx)
            .await
            .unwrap();
    }
}
