//! Storage collaborators
//!
//! The core only sees two narrow seams: a [`SnapshotSource`] that returns
//! typed record sets per entity kind, and a [`TokenVerifier`] used by the
//! authentication middleware. [`SqliteStore`] implements both against the
//! application database.

pub mod sqlite;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::types::{EntityKind, Snapshot};

pub use sqlite::{SqliteStore, StoreOptions};

/// Errors returned by storage operations. All of them are transient from the
/// point of view of the pollers and sessions.
#[derive(Debug, Error)]
pub enum StoreError {
    /// SQLite error
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// Connection pool error (including exhaustion)
    #[error("connection pool error: {0}")]
    Pool(#[from] r2d2::Error),

    /// The blocking query task panicked or was cancelled
    #[error("query task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

/// Source of full and incremental record sets
#[async_trait]
pub trait SnapshotSource: Send + Sync {
    /// Full current record set of `kind`
    async fn fetch_all(&self, kind: EntityKind) -> Result<Snapshot, StoreError>;

    /// Records of `kind` changed at or after `since`, compared at the
    /// whole-second precision of the stored timestamps. A record written in
    /// the same second as `since` may be reported again on the next call.
    async fn fetch_changed_since(
        &self,
        kind: EntityKind,
        since: DateTime<Utc>,
    ) -> Result<Snapshot, StoreError>;

    /// Latest change timestamp of `kind`; `None` when the table is empty
    async fn latest_change_timestamp(
        &self,
        kind: EntityKind,
    ) -> Result<Option<DateTime<Utc>>, StoreError>;
}

/// Access token lookups for the authentication middleware
#[async_trait]
pub trait TokenVerifier: Send + Sync {
    /// Whether `token` exists and has not expired
    async fn verify(&self, token: &str) -> Result<bool, StoreError>;
}
