//! Full-state snapshots of one entity kind

use serde::Serialize;

use super::{EntityKind, Order, Product};

/// Complete current record set of one entity kind at fetch time.
///
/// A snapshot carries no delta information: it fully replaces whatever the
/// client received before for the same kind. It serializes as a bare JSON
/// array of records.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Snapshot {
    Products(Vec<Product>),
    Orders(Vec<Order>),
}

impl Snapshot {
    /// An empty snapshot of the given kind
    pub fn empty(kind: EntityKind) -> Self {
        match kind {
            EntityKind::Products => Snapshot::Products(Vec::new()),
            EntityKind::Orders => Snapshot::Orders(Vec::new()),
        }
    }

    /// The entity kind this snapshot describes
    pub fn kind(&self) -> EntityKind {
        match self {
            Snapshot::Products(_) => EntityKind::Products,
            Snapshot::Orders(_) => EntityKind::Orders,
        }
    }

    /// Number of records
    pub fn len(&self) -> usize {
        match self {
            Snapshot::Products(records) => records.len(),
            Snapshot::Orders(records) => records.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl From<Vec<Product>> for Snapshot {
    fn from(records: Vec<Product>) -> Self {
        Snapshot::Products(records)
    }
}

impl From<Vec<Order>> for Snapshot {
    fn from(records: Vec<Order>) -> Self {
        Snapshot::Orders(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_serializes_as_bare_array() {
        let snapshot = Snapshot::from(vec![Product {
            id: 1,
            name: "A".to_string(),
            ..Default::default()
        }]);

        let value = serde_json::to_value(&snapshot).unwrap();
        assert!(value.is_array());
        assert_eq!(value[0]["id"], 1);
        assert_eq!(value[0]["name"], "A");
    }

    #[test]
    fn test_empty_snapshot_keeps_kind() {
        let snapshot = Snapshot::empty(EntityKind::Orders);
        assert!(snapshot.is_empty());
        assert_eq!(snapshot.kind(), EntityKind::Orders);
        assert_eq!(serde_json::to_string(&snapshot).unwrap(), "[]");
    }
}
