//! Bearer token authentication for the stream endpoints
//!
//! ```bash
//! curl -N http://localhost:8080/api/products/stream \
//!   -H "Authorization: Bearer <access token>"
//! ```
//!
//! Tokens are issued elsewhere and stored in the `access_tokens` table; a
//! token is accepted while it is younger than the configured TTL.

use std::sync::Arc;

use axum::{
    extract::{Request, State},
    http::{header::AUTHORIZATION, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use tracing::{debug, error};

use super::state::AppState;

/// Extract the token from an `Authorization` header value.
///
/// The `Bearer ` prefix is optional.
pub fn extract_token(value: &str) -> &str {
    value.strip_prefix("Bearer ").unwrap_or(value).trim()
}

/// Middleware rejecting requests without a valid access token
pub async fn require_token(
    State(state): State<Arc<AppState>>,
    request: Request,
    next: Next,
) -> Response {
    let Some(header) = request.headers().get(AUTHORIZATION) else {
        return reject(StatusCode::UNAUTHORIZED, "Authorization header missing".to_string());
    };
    let token = extract_token(header.to_str().unwrap_or_default());
    if token.is_empty() {
        return reject(StatusCode::UNAUTHORIZED, "Invalid or expired token".to_string());
    }

    let verified = state.tokens.verify(token).await;
    match verified {
        Ok(true) => next.run(request).await,
        Ok(false) => {
            debug!(path = %request.uri().path(), "rejected invalid token");
            reject(StatusCode::UNAUTHORIZED, "Invalid or expired token".to_string())
        }
        Err(e) => {
            error!(error = %e, "token verification failed");
            reject(
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("Database error: {e}"),
            )
        }
    }
}

fn reject(status: StatusCode, detail: String) -> Response {
    (status, Json(json!({ "detail": detail }))).into_response()
}
