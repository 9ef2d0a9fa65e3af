use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use chrono::{DateTime, Utc};
use garde::Validate;
use serde::{Deserialize, Serialize};

use crate::{
    error::{AppError, Result},
    models::context::CorrelationId,
    models::principal::Principal,
    models::user::Role,
    services::auth::{AuthOutcome, SignupCommand},
    state::AppState,
    validation::auth::validate_payload,
};

/// The request payload for sign-up.
#[derive(Deserialize, Validate)]
pub struct SignupRequest {
    #[garde(length(min = 1, max = 100))]
    pub name: String,
    #[garde(email, length(max = 255))]
    pub email: String,
    #[garde(length(min = 8, max = 128))]
    pub password: String,
}

/// The request payload for sign-in.
#[derive(Deserialize, Validate)]
pub struct SigninRequest {
    #[garde(length(min = 1, max = 255))]
    pub email: String,
    #[garde(length(min = 1, max = 128))]
    pub password: String,
}

/// The request payload for refresh and logout.
#[derive(Deserialize, Validate)]
pub struct RefreshRequest {
    #[garde(length(min = 1, max = 4096))]
    pub refresh_token: String,
}

#[derive(Serialize)]
pub struct UserSummary {
    pub id: i64,
    pub name: String,
    pub email: String,
    pub role: Role,
}

/// The response payload for sign-up, sign-in and refresh.
#[derive(Serialize)]
pub struct AuthResponse {
    pub access_token: String,
    pub token_type: &'static str,
    pub access_token_expires_at: DateTime<Utc>,
    pub refresh_token: String,
    pub refresh_token_expires_at: DateTime<Utc>,
    pub user: UserSummary,
}

impl From<AuthOutcome> for AuthResponse {
    fn from(outcome: AuthOutcome) -> Self {
        Self {
            access_token: outcome.access_token,
            token_type: "Bearer",
            access_token_expires_at: outcome.access_token_expires_at,
            refresh_token: outcome.refresh_token,
            refresh_token_expires_at: outcome.refresh_token_expires_at,
            user: UserSummary {
                id: outcome.principal.id,
                name: outcome.principal.name,
                email: outcome.principal.email,
                role: outcome.principal.role,
            },
        }
    }
}

#[derive(Serialize)]
pub struct LogoutAllResponse {
    pub revoked: u64,
}

/// Handles `POST /auth/signup/{role}`.
///
/// Only `student` and `teacher` may self-register. Admin accounts are
/// provisioned out of band.
pub async fn signup(
    State(state): State<AppState>,
    Path(role): Path<String>,
    ctx: CorrelationId,
    Json(payload): Json<SignupRequest>,
) -> Result<impl IntoResponse> {
    let role: Role = role.parse()?;
    if role == Role::Admin {
        tracing::warn!(correlation_id = %ctx, "Public sign-up refused for ADMIN role");
        return Err(AppError::Forbidden);
    }
    validate_payload(&payload)?;

    let outcome = state
        .sessions
        .signup(
            SignupCommand {
                name: payload.name,
                email: payload.email,
                password: payload.password,
            },
            role,
            &ctx,
        )
        .await?;

    Ok((StatusCode::CREATED, Json(AuthResponse::from(outcome))))
}

/// Handles `POST /auth/signin`.
pub async fn signin(
    State(state): State<AppState>,
    ctx: CorrelationId,
    Json(payload): Json<SigninRequest>,
) -> Result<Json<AuthResponse>> {
    validate_payload(&payload)?;

    let outcome = state
        .sessions
        .signin(&payload.email, &payload.password, &ctx)
        .await?;

    Ok(Json(AuthResponse::from(outcome)))
}

/// Handles `POST /auth/refresh`.
pub async fn refresh(
    State(state): State<AppState>,
    ctx: CorrelationId,
    Json(payload): Json<RefreshRequest>,
) -> Result<Json<AuthResponse>> {
    validate_payload(&payload)?;

    let outcome = state.sessions.refresh(&payload.refresh_token, &ctx).await?;
    Ok(Json(AuthResponse::from(outcome)))
}

/// Handles `POST /auth/logout`. Dead or unknown tokens still get 204.
pub async fn logout(
    State(state): State<AppState>,
    ctx: CorrelationId,
    Json(payload): Json<RefreshRequest>,
) -> Result<StatusCode> {
    validate_payload(&payload)?;

    state.sessions.logout(&payload.refresh_token, &ctx).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Handles `POST /auth/logout-all` for the authenticated caller.
pub async fn logout_all(
    State(state): State<AppState>,
    principal: Principal,
    ctx: CorrelationId,
) -> Result<Json<LogoutAllResponse>> {
    let revoked = state.sessions.logout_all(principal.id, &ctx).await?;
    Ok(Json(LogoutAllResponse { revoked }))
}
