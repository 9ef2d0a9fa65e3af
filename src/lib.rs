//! Identity and session-lifecycle boundary for a multi-role campus platform.
//!
//! Issues and rotates bearer tokens, authenticates every request through a
//! gate middleware, and encrypts the one sensitive stored attribute.

use axum::{
    Router,
    middleware::{from_fn, from_fn_with_state},
    routing::{get, patch, post, put},
};
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::{DefaultMakeSpan, DefaultOnFailure, DefaultOnRequest, DefaultOnResponse, TraceLayer};
use tracing::Level;

pub mod config;
pub mod db;
pub mod error;
pub mod state;

pub mod crypto {
    pub mod aes;
    pub mod field;
    pub mod jwt;
    pub mod password;
}

pub mod models {
    pub mod context;
    pub mod principal;
    pub mod refresh_token;
    pub mod user;
}

pub mod repositories {
    pub mod memory;
    pub mod refresh_token;
    pub mod user;
}

pub mod services {
    pub mod auth;
}

pub mod handlers {
    pub mod auth;
    pub mod health;
    pub mod users;
}

pub mod middleware_layer {
    pub mod auth;
    pub mod rate_limit;
    pub mod request_id;
}

pub mod validation {
    pub mod auth;
}

use models::user::Role;
use state::AppState;

const ADMIN_ONLY: &[Role] = &[Role::Admin];

/// Auth payloads are small; anything larger is refused before parsing.
const MAX_BODY_BYTES: usize = 64 * 1024;

/// Options for [`router`].
#[derive(Debug, Clone, Copy, Default)]
pub struct RouterOptions {
    /// Throttle the public auth endpoints per peer IP.
    pub rate_limit_auth: bool,
}

/// Builds the full application router.
pub fn router(state: AppState, options: RouterOptions) -> Router {
    let auth_routes = Router::new()
        .route("/auth/signup/{role}", post(handlers::auth::signup))
        .route("/auth/signin", post(handlers::auth::signin))
        .route("/auth/refresh", post(handlers::auth::refresh))
        .route("/auth/logout", post(handlers::auth::logout));

    let auth_routes = if options.rate_limit_auth {
        middleware_layer::rate_limit::limit_auth_routes(auth_routes)
    } else {
        auth_routes
    };

    let protected_routes = Router::new()
        .route("/auth/logout-all", post(handlers::auth::logout_all))
        .route("/api/me", get(handlers::users::me))
        .route("/api/me/bank-account", put(handlers::users::set_bank_account))
        .route_layer(from_fn(middleware_layer::auth::require_principal));

    let admin_routes = Router::new()
        .route(
            "/api/admin/users/{user_id}/enabled",
            patch(handlers::users::set_user_enabled),
        )
        .route_layer(from_fn_with_state(
            ADMIN_ONLY,
            middleware_layer::auth::require_role,
        ))
        .route_layer(from_fn(middleware_layer::auth::require_principal));

    Router::new()
        .route("/health", get(handlers::health::health))
        .merge(auth_routes)
        .merge(protected_routes)
        .merge(admin_routes)
        .layer(from_fn_with_state(
            state.clone(),
            middleware_layer::auth::authenticate,
        ))
        .layer(RequestBodyLimitLayer::new(MAX_BODY_BYTES))
        .layer(from_fn(middleware_layer::request_id::assign_correlation_id))
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::default().include_headers(false))
                .on_request(DefaultOnRequest::default().level(Level::DEBUG))
                .on_response(DefaultOnResponse::default().level(Level::DEBUG))
                .on_failure(DefaultOnFailure::default().level(Level::ERROR)),
        )
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use axum::body::{Body, to_bytes};
    use http::{Request, StatusCode, header};
    use tower::ServiceExt;

    use super::*;
    use crate::config::Config;

    fn app() -> Router {
        let (state, _, _) = AppState::in_memory(&Config::for_tests()).unwrap();
        router(state, RouterOptions::default())
    }

    fn signup_request(email: &str) -> Request<Body> {
        signup_request_as("student", email)
    }

    fn signup_request_as(role: &str, email: &str) -> Request<Body> {
        let body = serde_json::json!({
            "name": "Router Test",
            "email": email,
            "password": "correct horse battery",
        });
        Request::post(format!("/auth/signup/{}", role))
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    async fn json_body(response: axum::response::Response) -> serde_json::Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn health_needs_no_token() {
        let response = app()
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert!(response.headers().contains_key("x-request-id"));
    }

    #[tokio::test]
    async fn protected_route_answers_401_with_error_body() {
        let response = app()
            .oneshot(Request::get("/api/me").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

        let body = json_body(response).await;
        assert_eq!(body["status"], 401);
        assert_eq!(body["code"], "UNAUTHENTICATED");
    }

    #[tokio::test]
    async fn unknown_route_is_404_not_401() {
        let response = app()
            .oneshot(Request::get("/nope").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn signup_token_opens_protected_route() {
        let app = app();
        let response = app
            .clone()
            .oneshot(signup_request("router@example.com"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);
        let body = json_body(response).await;
        let access = body["access_token"].as_str().unwrap().to_string();

        let response = app
            .oneshot(
                Request::get("/api/me")
                    .header(header::AUTHORIZATION, format!("Bearer {}", access))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(json_body(response).await["role"], "STUDENT");
    }

    #[tokio::test]
    async fn anonymous_admin_signup_is_forbidden() {
        let response = app()
            .oneshot(signup_request_as("ADMIN", "root@example.com"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
        assert_eq!(json_body(response).await["code"], "FORBIDDEN");
    }

    #[tokio::test]
    async fn oversized_body_is_refused() {
        let response = app()
            .oneshot(
                Request::post("/auth/signin")
                    .header(header::CONTENT_TYPE, "application/json")
                    .header(header::CONTENT_LENGTH, MAX_BODY_BYTES + 1)
                    .body(Body::from(vec![b' '; MAX_BODY_BYTES + 1]))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
    }
}
