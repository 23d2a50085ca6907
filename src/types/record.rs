//! Records read from the catalog and order tables

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Catalog item
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Product {
    pub id: i64,
    /// Empty when the column is NULL
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub price: f64,
    #[serde(default)]
    pub stock: i64,
    /// Serialized as `null` when the product has no purchase limit
    #[serde(default)]
    pub limit_quantity: Option<i64>,
    #[serde(default)]
    pub image: String,
    /// Raw JSON from the `allergens` column
    #[serde(default)]
    pub allergens: Value,
    #[serde(default)]
    pub created_at: DateTime<Utc>,
}

/// Customer order
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Order {
    pub id: i64,
    pub uuid: String,
    pub product_id: i64,
    pub quantity: i64,
    #[serde(default)]
    pub image: String,
    /// Raw JSON from the `options` column
    #[serde(default)]
    pub options: Value,
    #[serde(default)]
    pub created_at: DateTime<Utc>,
}
