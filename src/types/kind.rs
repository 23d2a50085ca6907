//! Entity kinds served by the feed

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Which domain collection a poller or subscription concerns
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    /// Catalog items
    Products,
    /// Customer orders
    Orders,
}

impl EntityKind {
    /// Every kind, in a fixed order
    pub const ALL: [EntityKind; 2] = [EntityKind::Products, EntityKind::Orders];

    /// Stable wire name, also used as the data frame event name
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::Products => "products",
            EntityKind::Orders => "orders",
        }
    }

    /// Backing table in the relational store
    pub fn table_name(&self) -> &'static str {
        match self {
            EntityKind::Products => "products",
            EntityKind::Orders => "orders",
        }
    }

    /// Default poll interval. The two kinds differ to spread database load.
    pub fn default_poll_interval(&self) -> Duration {
        match self {
            EntityKind::Products => Duration::from_secs(5),
            EntityKind::Orders => Duration::from_secs(3),
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
