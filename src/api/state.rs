//! Shared application state for HTTP handlers

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use super::stream::SessionConfig;
use crate::broadcast::Broadcaster;
use crate::store::{SnapshotSource, TokenVerifier};

pub struct AppState {
    /// Registry the stream sessions subscribe to
    pub broadcaster: Arc<Broadcaster>,

    /// Used for each session's initial snapshot
    pub source: Arc<dyn SnapshotSource>,

    pub tokens: Arc<dyn TokenVerifier>,

    pub session: SessionConfig,

    /// Parent of every session's cancellation token
    pub shutdown: CancellationToken,

    /// Allowed CORS origin
    pub app_url: String,
}

impl AppState {
    pub fn new(
        broadcaster: Arc<Broadcaster>,
        source: Arc<dyn SnapshotSource>,
        tokens: Arc<dyn TokenVerifier>,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            broadcaster,
            source,
            tokens,
            session: SessionConfig::default(),
            shutdown,
            app_url: String::new(),
        }
    }

    pub fn with_session_config(mut self, session: SessionConfig) -> Self {
        self.session = session;
        self
    }

    pub fn with_app_url(mut self, app_url: impl Into<String>) -> Self {
        self.app_url = app_url.into();
        self
    }
}
