//! HTTP server setup with Axum

use std::sync::Arc;
use std::time::Duration;

use axum::{
    http::{
        header::{ACCEPT, AUTHORIZATION, CONTENT_LENGTH, CONTENT_TYPE, ORIGIN},
        HeaderValue, Method,
    },
    middleware,
    routing::get,
    Router,
};
use tower_http::cors::CorsLayer;
use tracing::warn;

use super::auth::require_token;
use super::state::AppState;
use super::stream::{stream_orders, stream_products};

/// Create the Axum router with all endpoints
pub fn create_router(state: Arc<AppState>) -> Router {
    let streams = Router::new()
        .route("/api/products/stream", get(stream_products))
        .route("/api/orders/stream", get(stream_orders))
        .route_layer(middleware::from_fn_with_state(
            Arc::clone(&state),
            require_token,
        ));

    Router::new()
        // Health check
        .route("/health", get(health_check))
        .merge(streams)
        .layer(cors_layer(&state.app_url))
        .with_state(state)
}

/// CORS for the single configured front-end origin
fn cors_layer(app_url: &str) -> CorsLayer {
    let cors = CorsLayer::new()
        .allow_methods([Method::GET])
        .allow_headers([ORIGIN, CONTENT_TYPE, ACCEPT, AUTHORIZATION])
        .expose_headers([CONTENT_LENGTH, AUTHORIZATION])
        .allow_credentials(true)
        .max_age(Duration::from_secs(12 * 60 * 60));

    match HeaderValue::from_str(app_url.trim_end_matches('/')) {
        Ok(origin) if !app_url.is_empty() => cors.allow_origin(origin),
        _ => {
            warn!(app_url, "no valid APP_URL, cross-origin requests will be refused");
            cors
        }
    }
}

/// Health check endpoint
async fn health_check() -> &'static str {
    "OK"
}
