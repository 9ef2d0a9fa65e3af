use axum::http::{HeaderName, HeaderValue, Method, header};
use chrono::Utc;
use std::net::SocketAddr;
use std::time::Duration;
use tower_http::cors::{AllowOrigin, CorsLayer};

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use campus_auth::middleware_layer::request_id::REQUEST_ID_HEADER;
use campus_auth::{RouterOptions, config::Config, router, state::AppState};

/// How often expired refresh sessions are purged.
const PURGE_INTERVAL: Duration = Duration::from_secs(3600);
/// How long expired or revoked refresh sessions are kept before purging.
const DEAD_SESSION_RETENTION_DAYS: i64 = 30;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env()?;
    tracing::info!(env = ?config.app_env, "✅ Configuration loaded successfully");

    let state = AppState::new(&config).await?;
    tracing::info!("✅ AppState initialized");

    let cors = CorsLayer::new()
        .allow_origin(AllowOrigin::list([
            HeaderValue::from_static("http://localhost:3000"),
            HeaderValue::from_static("http://127.0.0.1:3000"),
        ]))
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::PATCH,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers([
            header::CONTENT_TYPE,
            header::AUTHORIZATION,
            header::ACCEPT,
            HeaderName::from_static(REQUEST_ID_HEADER),
        ])
        .expose_headers([HeaderName::from_static(REQUEST_ID_HEADER)])
        .max_age(Duration::from_secs(86400));

    let app = router(
        state.clone(),
        RouterOptions {
            rate_limit_auth: true,
        },
    )
    .layer(cors);

    let purge_store = state.refresh_store.clone();
    tokio::spawn(async move {
        loop {
            tokio::time::sleep(PURGE_INTERVAL).await;
            match purge_store
                .purge_expired(Utc::now(), chrono::Duration::days(DEAD_SESSION_RETENTION_DAYS))
                .await
            {
                Ok(purged) => tracing::info!(purged, "🧹 Refresh session purge completed"),
                Err(e) => tracing::error!("❌ Refresh session purge failed: {}", e),
            }
        }
    });

    let addr: SocketAddr = config.bind_addr.parse()?;
    tracing::info!("🚀 Server listening on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;

    Ok(())
}
