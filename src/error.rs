use axum::{
    http::{StatusCode, header},
    response::{IntoResponse, Response},
};
use serde::Serialize;
use thiserror::Error;

/// The application's error type.
#[derive(Error, Debug)]
pub enum AppError {
    /// Sign-up with an email that is already on file.
    #[error("An account with this email already exists")]
    DuplicateCredential,

    /// Unknown email or wrong password. Both cases share one message.
    #[error("Invalid email or password")]
    InvalidCredential,

    /// Valid credentials for a disabled account.
    #[error("Account is disabled")]
    AccountDisabled,

    /// The presented refresh token is unknown, revoked, expired or not a refresh token.
    #[error("Refresh token is invalid or expired")]
    InvalidOrExpiredRefreshToken,

    /// A protected route was reached without a Principal.
    #[error("Authentication required")]
    Unauthenticated,

    /// The Principal's role does not grant access.
    #[error("Forbidden")]
    Forbidden,

    /// A resource not found error.
    #[error("Resource not found")]
    NotFound,

    /// A validation error.
    #[error("Validation error: {0}")]
    Validation(String),

    /// Field encryption or decryption failed.
    #[error("Encryption error: {0}")]
    Encryption(String),

    /// Token signing failed.
    #[error("Token error: {0}")]
    Token(#[from] jsonwebtoken::errors::Error),

    /// A database error.
    #[error("Database error: {0}")]
    Database(#[from] tokio_postgres::Error),

    /// A connection pool error.
    #[error("Pool error: {0}")]
    Pool(#[from] deadpool_postgres::PoolError),

    /// Pool construction failed.
    #[error("Pool configuration error: {0}")]
    CreatePool(#[from] deadpool_postgres::CreatePoolError),

    /// A configuration error.
    #[error("Configuration error: {0}")]
    Config(String),

    /// An internal server error.
    #[error("Internal server error: {0}")]
    Internal(String),
}

/// A `Result` type that uses `AppError` as the error type.
pub type Result<T> = std::result::Result<T, AppError>;

/// The JSON body every error response carries.
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub status: u16,
    pub code: &'static str,
    pub message: String,
}

impl AppError {
    /// The HTTP status this error maps to.
    pub fn status(&self) -> StatusCode {
        match self {
            AppError::DuplicateCredential => StatusCode::CONFLICT,
            AppError::InvalidCredential
            | AppError::InvalidOrExpiredRefreshToken
            | AppError::Unauthenticated => StatusCode::UNAUTHORIZED,
            AppError::AccountDisabled | AppError::Forbidden => StatusCode::FORBIDDEN,
            AppError::NotFound => StatusCode::NOT_FOUND,
            AppError::Validation(_) => StatusCode::BAD_REQUEST,
            AppError::Encryption(_)
            | AppError::Token(_)
            | AppError::Database(_)
            | AppError::Pool(_)
            | AppError::CreatePool(_)
            | AppError::Config(_)
            | AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// A stable, machine-readable error code.
    pub fn code(&self) -> &'static str {
        match self {
            AppError::DuplicateCredential => "DUPLICATE_CREDENTIAL",
            AppError::InvalidCredential => "INVALID_CREDENTIAL",
            AppError::AccountDisabled => "ACCOUNT_DISABLED",
            AppError::InvalidOrExpiredRefreshToken => "INVALID_REFRESH_TOKEN",
            AppError::Unauthenticated => "UNAUTHENTICATED",
            AppError::Forbidden => "FORBIDDEN",
            AppError::NotFound => "NOT_FOUND",
            AppError::Validation(_) => "VALIDATION_FAILED",
            AppError::Encryption(_) => "ENCRYPTION_FAILURE",
            AppError::Token(_)
            | AppError::Database(_)
            | AppError::Pool(_)
            | AppError::CreatePool(_)
            | AppError::Config(_)
            | AppError::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// Whether this is a system failure rather than a domain outcome.
    pub fn is_system(&self) -> bool {
        self.status().is_server_error()
    }

    /// The message sent to the client. System details stay in the logs.
    fn public_message(&self) -> String {
        match self {
            AppError::Database(_) | AppError::Pool(_) | AppError::CreatePool(_) => {
                "Database error".to_string()
            }
            AppError::Encryption(_) => "Encryption error".to_string(),
            AppError::Token(_) | AppError::Config(_) | AppError::Internal(_) => {
                "Internal server error".to_string()
            }
            other => other.to_string(),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();

        match &self {
            e if e.is_system() => tracing::error!(code = e.code(), "{}", e),
            AppError::Validation(msg) => tracing::debug!("Validation error: {}", msg),
            AppError::NotFound => tracing::debug!("Resource not found"),
            e => tracing::warn!(code = e.code(), "{}", e),
        }

        let body = ErrorBody {
            status: status.as_u16(),
            code: self.code(),
            message: self.public_message(),
        };

        let body = sonic_rs::to_string(&body).unwrap_or_else(|_| {
            r#"{"status":500,"code":"INTERNAL_ERROR","message":"Internal server error"}"#
                .to_string()
        });

        (status, [(header::CONTENT_TYPE, "application/json")], body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn domain_errors_map_to_client_statuses() {
        assert_eq!(AppError::DuplicateCredential.status(), StatusCode::CONFLICT);
        assert_eq!(AppError::InvalidCredential.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(AppError::AccountDisabled.status(), StatusCode::FORBIDDEN);
        assert_eq!(
            AppError::InvalidOrExpiredRefreshToken.status(),
            StatusCode::UNAUTHORIZED
        );
        assert!(!AppError::InvalidCredential.is_system());
    }

    #[test]
    fn system_errors_hide_details() {
        let err = AppError::Encryption("aead::Error at offset 3".to_string());
        assert!(err.is_system());
        assert_eq!(err.code(), "ENCRYPTION_FAILURE");
        assert_eq!(err.public_message(), "Encryption error");

        let err = AppError::Internal("pool exhausted".to_string());
        assert_eq!(err.public_message(), "Internal server error");
    }
}
