//! API module for HTTP endpoints
//!
//! This module provides the authenticated entity streams and the health check.

pub mod auth;
pub mod http;
pub mod state;
pub mod stream;

pub use http::create_router;
pub use state::AppState;
