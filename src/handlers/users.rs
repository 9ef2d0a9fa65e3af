use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};

use crate::{
    error::{AppError, Result},
    models::context::CorrelationId,
    models::principal::Principal,
    models::user::Role,
    state::AppState,
    validation::auth::validate_bank_account,
};

#[derive(Serialize)]
pub struct ProfileResponse {
    pub id: i64,
    pub name: String,
    pub email: String,
    pub role: Role,
    pub authority: String,
    pub bank_account: Option<String>,
}

#[derive(Deserialize)]
pub struct BankAccountRequest {
    pub bank_account: Option<String>,
}

#[derive(Deserialize)]
pub struct EnabledRequest {
    pub enabled: bool,
}

/// Handles `GET /api/me`.
///
/// The only place the bank account is decrypted.
pub async fn me(
    State(state): State<AppState>,
    principal: Principal,
) -> Result<Json<ProfileResponse>> {
    let user = state
        .users
        .find_by_id(principal.id)
        .await?
        .ok_or(AppError::NotFound)?;
    let bank_account = state.users.find_bank_account(user.id).await?;

    Ok(Json(ProfileResponse {
        id: user.id,
        name: user.name,
        email: user.email,
        role: user.role,
        authority: user.role.authority(),
        bank_account,
    }))
}

/// Handles `PUT /api/me/bank-account`. `null` clears the stored value.
pub async fn set_bank_account(
    State(state): State<AppState>,
    principal: Principal,
    Json(payload): Json<BankAccountRequest>,
) -> Result<StatusCode> {
    if let Some(value) = payload.bank_account.as_deref() {
        validate_bank_account(value)?;
    }

    let normalized: Option<String> = payload
        .bank_account
        .map(|v| v.chars().filter(|c| !c.is_whitespace()).collect());

    if !state
        .users
        .set_bank_account(principal.id, normalized.as_deref())
        .await?
    {
        return Err(AppError::NotFound);
    }

    tracing::info!(user_id = principal.id, "✅ Bank account updated");
    Ok(StatusCode::NO_CONTENT)
}

/// Handles `PATCH /api/admin/users/{id}/enabled`.
pub async fn set_user_enabled(
    State(state): State<AppState>,
    Path(user_id): Path<i64>,
    admin: Principal,
    ctx: CorrelationId,
    Json(payload): Json<EnabledRequest>,
) -> Result<StatusCode> {
    tracing::info!(admin_id = admin.id, user_id, enabled = payload.enabled, "Admin changing account status");
    state
        .sessions
        .set_enabled(user_id, payload.enabled, &ctx)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}
