//! Data types for the live feed
//!
//! This module contains the entity kinds, the record types read from the
//! catalog and order tables, and the snapshot that carries them to clients.

mod kind;
mod record;
mod snapshot;

pub use kind::EntityKind;
pub use record::{Order, Product};
pub use snapshot::Snapshot;

