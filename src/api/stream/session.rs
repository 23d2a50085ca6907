//! Per-connection streaming session.
//!
//! A session moves through `Connecting -> Streaming -> Draining -> Closed`.
//! While streaming it waits on the subscription, a lifetime tick, the client
//! going away, and its cancellation token. Every exit path goes through
//! draining, which releases the subscription.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use parking_lot::Mutex;
use serde_json::json;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{interval, interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::frame::{Encoding, FrameError, FrameWriter, EVENT_CONNECTED, EVENT_DISCONNECT_WARNING};
use crate::broadcast::{Broadcaster, Subscription};
use crate::store::SnapshotSource;
use crate::types::{EntityKind, Snapshot};

/// Spacing of countdown warnings
const COUNTDOWN_STEP: Duration = Duration::from_secs(1);

/// Timing of a streaming session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionConfig {
    /// Hard cap on connection lifetime
    pub lifetime: Duration,
    /// Length of the countdown before the cap
    pub warning_window: Duration,
    /// Lifetime bookkeeping tick
    pub tick: Duration,
    /// Bound on every write to the client
    pub write_timeout: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            lifetime: Duration::from_secs(300),
            warning_window: Duration::from_secs(60),
            tick: Duration::from_secs(1),
            write_timeout: Duration::from_secs(10),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Connecting,
    Streaming,
    Draining,
    Closed,
}

/// Why a session ended. All of these are normal terminations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEnd {
    /// Lifetime cap or countdown reached its end
    Expired,
    /// Cancelled from outside, e.g. server shutdown
    Cancelled,
    /// The client went away or stopped reading
    Disconnected,
}

pub struct StreamSession {
    id: String,
    kind: EntityKind,
    config: SessionConfig,
    broadcaster: Arc<Broadcaster>,
    source: Arc<dyn SnapshotSource>,
    writer: Arc<tokio::sync::Mutex<FrameWriter>>,
    client: mpsc::Sender<Bytes>,
    cancel: CancellationToken,
    warning_started: Mutex<bool>,
    countdown: Mutex<Option<JoinHandle<()>>>,
    state: SessionState,
}

impl StreamSession {
    /// `client` is the response body channel; the session is cancelled along
    /// with `shutdown`.
    pub fn new(
        kind: EntityKind,
        config: SessionConfig,
        broadcaster: Arc<Broadcaster>,
        source: Arc<dyn SnapshotSource>,
        encoding: Encoding,
        client: mpsc::Sender<Bytes>,
        shutdown: &CancellationToken,
    ) -> Self {
        let writer = FrameWriter::new(client.clone(), encoding, config.write_timeout);
        Self {
            id: Uuid::new_v4().to_string(),
            kind,
            config,
            broadcaster,
            source,
            writer: Arc::new(tokio::sync::Mutex::new(writer)),
            client,
            cancel: shutdown.child_token(),
            warning_started: Mutex::new(false),
            countdown: Mutex::new(None),
            state: SessionState::Connecting,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Drive the session to completion
    pub async fn run(mut self) -> SessionEnd {
        let mut subscription = self.broadcaster.subscribe(self.kind, self.id.clone());
        info!(kind = %self.kind, session_id = %self.id, "stream session started");

        let end = match self.connect().await {
            Ok(()) => {
                self.state = SessionState::Streaming;
                self.stream(&mut subscription).await
            }
            Err(e) => {
                debug!(session_id = %self.id, error = %e, "failed to send preamble");
                SessionEnd::Disconnected
            }
        };

        self.drain(subscription).await;
        info!(kind = %self.kind, session_id = %self.id, ?end, "stream session closed");
        end
    }

    async fn connect(&self) -> Result<(), FrameError> {
        let mut writer = self.writer.lock().await;
        writer
            .write_event(
                EVENT_CONNECTED,
                &json!({ "message": format!("Connected to {} stream", self.kind) }),
            )
            .await?;

        match self.source.fetch_all(self.kind).await {
            Ok(snapshot) => match writer.write_event(self.kind.as_str(), &snapshot).await {
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => warn!(session_id = %self.id, error = %e, "skipped initial snapshot frame"),
                Ok(()) => {}
            },
            Err(e) => warn!(session_id = %self.id, error = %e, "initial snapshot unavailable"),
        }
        Ok(())
    }

    async fn stream(&self, subscription: &mut Subscription) -> SessionEnd {
        let started = Instant::now();
        let warn_at = self.config.lifetime.saturating_sub(self.config.warning_window);
        let mut ticker = interval_at(started + self.config.tick, self.config.tick);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut subscribed = true;
        // No tick happens at zero elapsed, so a window spanning the whole
        // lifetime starts here.
        self.check_countdown(Duration::ZERO, warn_at);

        loop {
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => {
                    // The countdown closes the stream before cancelling.
                    if self.writer.lock().await.is_closed() {
                        return SessionEnd::Expired;
                    }
                    return SessionEnd::Cancelled;
                }
                _ = self.client.closed() => return SessionEnd::Disconnected,
                delivery = subscription.recv(), if subscribed => match delivery {
                    Some(snapshot) => {
                        if let Err(e) = self.write_snapshot(&snapshot).await {
                            debug!(session_id = %self.id, error = %e, "client write failed");
                            return SessionEnd::Disconnected;
                        }
                    }
                    None => {
                        debug!(session_id = %self.id, "subscription ended");
                        subscribed = false;
                    }
                },
                _ = ticker.tick() => {
                    let elapsed = started.elapsed();
                    if elapsed >= self.config.lifetime {
                        let message = format!(
                            "Connection closed after {} seconds",
                            self.config.lifetime.as_secs()
                        );
                        if let Err(e) = self.writer.lock().await.write_close(&message).await {
                            debug!(session_id = %self.id, error = %e, "failed to write close frame");
                        }
                        return SessionEnd::Expired;
                    }
                    self.check_countdown(elapsed, warn_at);
                }
            }
        }
    }

    /// Serialization failures skip the frame; only connection errors are returned.
    async fn write_snapshot(&self, snapshot: &Snapshot) -> Result<(), FrameError> {
        match self.writer.lock().await.write_event(self.kind.as_str(), snapshot).await {
            Err(e) if !e.is_fatal() => {
                warn!(session_id = %self.id, error = %e, "skipped snapshot frame");
                Ok(())
            }
            other => other,
        }
    }

    fn check_countdown(&self, elapsed: Duration, warn_at: Duration) {
        if elapsed >= warn_at && !self.config.warning_window.is_zero() {
            self.start_countdown();
        }
    }

    /// Spawn the countdown unless it already ran for this session
    fn start_countdown(&self) {
        let mut started = self.warning_started.lock();
        if *started {
            return;
        }
        *started = true;

        debug!(session_id = %self.id, "disconnect countdown started");
        let handle = tokio::spawn(countdown(
            Arc::clone(&self.writer),
            self.cancel.clone(),
            self.config.warning_window.as_secs(),
        ));
        *self.countdown.lock() = Some(handle);
    }

    async fn drain(&mut self, subscription: Subscription) {
        self.state = SessionState::Draining;
        self.broadcaster.unsubscribe(self.kind, &self.id);
        drop(subscription);
        self.cancel.cancel();

        let countdown = self.countdown.lock().take();
        if let Some(handle) = countdown {
            if let Err(e) = handle.await {
                warn!(session_id = %self.id, error = %e, "countdown task failed");
            }
        }

        if let Err(e) = self.writer.lock().await.finish().await {
            debug!(session_id = %self.id, error = %e, "failed to finish response body");
        }
        self.state = SessionState::Closed;
    }
}

/// Warn once per second for `window_secs` seconds, then close and cancel.
async fn countdown(
    writer: Arc<tokio::sync::Mutex<FrameWriter>>,
    cancel: CancellationToken,
    window_secs: u64,
) {
    let mut ticker = interval(COUNTDOWN_STEP);
    for remaining in (1..=window_secs).rev() {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => return,
            _ = ticker.tick() => {}
        }
        let payload = json!({
            "message": format!("Connection will close in {remaining} seconds"),
            "remaining_seconds": remaining,
        });
        if let Err(e) = writer.lock().await.write_event(EVENT_DISCONNECT_WARNING, &payload).await {
            debug!(error = %e, "failed to write disconnect warning");
            cancel.cancel();
            return;
        }
    }

    tokio::select! {
        biased;
        _ = cancel.cancelled() => return,
        _ = ticker.tick() => {}
    }
    if let Err(e) = writer.lock().await.write_close("Connection closed").await {
        debug!(error = %e, "failed to write close frame");
    }
    cancel.cancel();
}
