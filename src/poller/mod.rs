//! Change detection.
//!
//! One [`ChangePoller`] runs per entity kind. Deltas decide *when* to
//! republish; the payload is always the full record set, so subscribers only
//! ever replace what they hold.

mod cleanup;

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::alert::{spawn_alert, AlertLevel, Notifier};
use crate::broadcast::{Broadcaster, PublishReport};
use crate::store::SnapshotSource;
use crate::types::EntityKind;

pub use cleanup::TokenCleanup;

/// Cursor used when the latest change time is unknown: one hour ago
fn fallback_cursor() -> DateTime<Utc> {
    Utc::now() - chrono::Duration::hours(1)
}

/// Result of one poll cycle
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TickOutcome {
    /// No records changed since the cursor
    Unchanged,
    /// A full snapshot was published
    Published(PublishReport),
    /// A fetch failed; the cursor was left where it was
    FetchFailed,
}

/// Periodically republishes one entity kind when it changes
pub struct ChangePoller {
    kind: EntityKind,
    source: Arc<dyn SnapshotSource>,
    broadcaster: Arc<Broadcaster>,
    notifier: Arc<dyn Notifier>,
    period: Duration,
    cursor: DateTime<Utc>,
}

impl ChangePoller {
    /// A zero `period` falls back to the kind's default interval.
    pub fn new(
        kind: EntityKind,
        source: Arc<dyn SnapshotSource>,
        broadcaster: Arc<Broadcaster>,
        notifier: Arc<dyn Notifier>,
        period: Duration,
    ) -> Self {
        let period = if period.is_zero() {
            kind.default_poll_interval()
        } else {
            period
        };
        Self {
            kind,
            source,
            broadcaster,
            notifier,
            period,
            cursor: fallback_cursor(),
        }
    }

    pub fn kind(&self) -> EntityKind {
        self.kind
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    /// Lower bound for the next incremental fetch
    pub fn cursor(&self) -> DateTime<Utc> {
        self.cursor
    }

    /// Publish the initial full snapshot and position the cursor.
    ///
    /// Returns `None` if the initial fetch failed; polling continues anyway.
    pub async fn start(&mut self) -> Option<PublishReport> {
        let report = match self.source.fetch_all(self.kind).await {
            Ok(snapshot) => Some(self.publish(snapshot)),
            Err(e) => {
                error!(kind = %self.kind, error = %e, "initial fetch failed");
                None
            }
        };

        self.cursor = match self.source.latest_change_timestamp(self.kind).await {
            Ok(Some(latest)) => latest,
            Ok(None) => fallback_cursor(),
            Err(e) => {
                warn!(kind = %self.kind, error = %e, "failed to read latest change time, starting one hour back");
                fallback_cursor()
            }
        };
        debug!(kind = %self.kind, cursor = %self.cursor, "poller cursor initialised");
        report
    }

    /// Run one poll cycle
    pub async fn tick(&mut self) -> TickOutcome {
        // Taken before the delta query so writes racing this cycle stay ahead
        // of the next cursor.
        let checked_at = Utc::now();
        let changed = match self.source.fetch_changed_since(self.kind, self.cursor).await {
            Ok(changed) => changed,
            Err(e) => {
                error!(kind = %self.kind, error = %e, "failed to fetch changes");
                return TickOutcome::FetchFailed;
            }
        };
        if changed.is_empty() {
            return TickOutcome::Unchanged;
        }

        debug!(kind = %self.kind, changed = changed.len(), "changes detected");
        let snapshot = match self.source.fetch_all(self.kind).await {
            Ok(snapshot) => snapshot,
            Err(e) => {
                error!(kind = %self.kind, error = %e, "failed to fetch full snapshot");
                return TickOutcome::FetchFailed;
            }
        };

        let report = self.publish(snapshot);
        self.cursor = checked_at;
        TickOutcome::Published(report)
    }

    /// Poll until `cancel` fires. The first tick comes one period after start.
    pub async fn run(mut self, cancel: CancellationToken) {
        info!(kind = %self.kind, period_ms = self.period.as_millis() as u64, "change poller started");
        self.start().await;

        let mut ticker = interval_at(Instant::now() + self.period, self.period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    self.tick().await;
                }
            }
        }
        info!(kind = %self.kind, "change poller stopped");
    }

    fn publish(&self, snapshot: crate::types::Snapshot) -> PublishReport {
        let records = snapshot.len();
        let report = self.broadcaster.publish(snapshot);
        debug!(
            kind = %self.kind,
            records,
            delivered = report.delivered,
            resized = report.resized,
            "published snapshot"
        );

        for subscriber in &report.dropped {
            warn!(kind = %self.kind, subscriber = %subscriber, "failed to deliver update");
            spawn_alert(
                Arc::clone(&self.notifier),
                format!(
                    "Failed to deliver {} updates\n- Subscriber ID: {}",
                    self.kind, subscriber
                ),
                AlertLevel::Error,
            );
        }
        report
    }
}
