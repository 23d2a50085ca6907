//! Periodic removal of expired access tokens

use std::sync::Arc;
use std::time::Duration;

use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::store::{SqliteStore, StoreError};

pub struct TokenCleanup {
    store: Arc<SqliteStore>,
    period: Duration,
}

impl TokenCleanup {
    pub const DEFAULT_PERIOD: Duration = Duration::from_secs(60);

    pub fn new(store: Arc<SqliteStore>) -> Self {
        Self {
            store,
            period: Self::DEFAULT_PERIOD,
        }
    }

    pub fn with_period(mut self, period: Duration) -> Self {
        if !period.is_zero() {
            self.period = period;
        }
        self
    }

    /// Delete expired tokens once
    pub async fn sweep(&self) -> Result<usize, StoreError> {
        let deleted = self.store.delete_expired_tokens().await?;
        debug!(deleted, "expired access tokens removed");
        Ok(deleted)
    }

    /// Sweep every period until `cancel` fires. Failures are logged only.
    pub async fn run(self, cancel: CancellationToken) {
        info!(period_secs = self.period.as_secs(), "token cleanup started");
        let mut ticker = interval_at(Instant::now() + self.period, self.period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    if let Err(e) = self.sweep().await {
                        error!(error = %e, "failed to delete expired tokens");
                    }
                }
            }
        }
        info!("token cleanup stopped");
    }
}
