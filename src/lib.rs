//! Livefeed
//!
//! Streams the current product catalogue and order list to many concurrent
//! HTTP clients, without those clients polling the database.
//!
//! # Modules
//!
//! - `types`: Entity kinds, records and snapshots
//! - `store`: Snapshot source and token verification over SQLite
//! - `broadcast`: Publish/subscribe registry with adaptive buffering
//! - `poller`: Per-kind change detection and token cleanup
//! - `api`: Axum router, bearer authentication and streaming sessions
//! - `alert`: Operator alerts through a Discord webhook
//! - `config`: YAML configuration
//! - `logging`: Tracing subscriber setup
//! - `utils`: Utility functions (timestamps, etc.)
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use livefeed::{Broadcaster, BufferPolicy, EntityKind, Snapshot};
//!
//! #[tokio::main]
//! async fn main() {
//!     let broadcaster = Arc::new(Broadcaster::new(BufferPolicy::default()));
//!     let mut subscription = broadcaster.subscribe(EntityKind::Products, "session-1");
//!     broadcaster.publish(Snapshot::empty(EntityKind::Products));
//!     let snapshot = subscription.recv().await;
//!     assert!(snapshot.is_some());
//! }
//! ```

pub mod alert;
pub mod api;
pub mod broadcast;
pub mod config;
pub mod logging;
pub mod poller;
pub mod store;
pub mod types;
pub mod utils;

// Re-export commonly used items at crate root
pub use broadcast::{Broadcaster, BufferPolicy, PublishReport, Subscription};
pub use config::Config;
pub use poller::{ChangePoller, TickOutcome, TokenCleanup};
pub use store::{SnapshotSource, SqliteStore, StoreError, TokenVerifier};
pub use types::{EntityKind, Order, Product, Snapshot};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name
pub const NAME: &str = env!("CARGO_PKG_NAME");
