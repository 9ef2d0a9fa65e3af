use std::sync::Arc;

use axum::Router;
use tower_governor::{GovernorLayer, governor::GovernorConfigBuilder};

use crate::state::AppState;

/// Seconds between replenished sign-in/sign-up attempts per client IP.
const AUTH_REPLENISH_SECS: u64 = 2;
/// Attempts a client IP may burst before being throttled.
const AUTH_BURST: u32 = 10;

/// Throttles the public auth endpoints per peer IP.
///
/// Needs `into_make_service_with_connect_info::<SocketAddr>()` on the served app.
pub fn limit_auth_routes(router: Router<AppState>) -> Router<AppState> {
    let config = GovernorConfigBuilder::default()
        .per_second(AUTH_REPLENISH_SECS)
        .burst_size(AUTH_BURST)
        .use_headers()
        .finish();

    match config {
        Some(config) => {
            tracing::info!(
                replenish_secs = AUTH_REPLENISH_SECS,
                burst = AUTH_BURST,
                "✅ Auth rate limiter enabled"
            );
            router.layer(GovernorLayer::new(Arc::new(config)))
        }
        None => {
            tracing::error!("❌ Invalid rate limiter configuration; auth routes are unthrottled");
            router
        }
    }
}
