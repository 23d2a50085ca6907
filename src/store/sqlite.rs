//! SQLite-backed snapshot source and token store.
//!
//! Uses an `r2d2` pool so pollers, on-demand snapshot fetches and token
//! checks share a bounded set of connections. Every query runs on the
//! blocking thread pool.

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{params, Connection, Params, Row};
use serde_json::Value;
use tracing::{debug, warn};

use super::{SnapshotSource, StoreError, TokenVerifier};
use crate::types::{EntityKind, Order, Product, Snapshot};
use crate::utils::{format_db_timestamp, parse_db_timestamp};

type ConnectionPool = Pool<SqliteConnectionManager>;

const PRODUCT_COLUMNS: &str =
    "id, name, description, price, stock, limit_quantity, image, allergens, created_at";
const ORDER_COLUMNS: &str = "id, uuid, product_id, quantity, image, options, created_at";

/// Pool, token and timestamp settings
#[derive(Clone, Debug)]
pub struct StoreOptions {
    /// Maximum pooled connections (default: 10)
    pub pool_size: u32,
    /// How long to wait for a free connection (default: 5s)
    pub checkout_timeout: Duration,
    /// SQLite busy timeout in milliseconds (default: 5000)
    pub busy_timeout_ms: u32,
    /// Access token lifetime (default: 5 minutes)
    pub token_ttl: Duration,
    /// Zone the application writes `TEXT` timestamps in (default: UTC)
    pub timezone: Tz,
}

impl Default for StoreOptions {
    fn default() -> Self {
        Self {
            pool_size: 10,
            checkout_timeout: Duration::from_secs(5),
            busy_timeout_ms: 5_000,
            token_ttl: Duration::from_secs(300),
            timezone: Tz::UTC,
        }
    }
}

#[derive(Debug)]
struct BusyTimeout(u32);

impl r2d2::CustomizeConnection<Connection, rusqlite::Error> for BusyTimeout {
    fn on_acquire(&self, conn: &mut Connection) -> Result<(), rusqlite::Error> {
        conn.execute_batch(&format!("PRAGMA busy_timeout = {};", self.0))
    }
}

/// Application database accessed through a connection pool
pub struct SqliteStore {
    pool: ConnectionPool,
    token_ttl: chrono::Duration,
    timezone: Tz,
}

impl SqliteStore {
    /// Open a pool over the database file at `path`
    pub fn open(path: impl AsRef<Path>, options: &StoreOptions) -> Result<Self, StoreError> {
        let manager = SqliteConnectionManager::file(path.as_ref());
        let pool = Pool::builder()
            .max_size(options.pool_size)
            .connection_timeout(options.checkout_timeout)
            .connection_customizer(Box::new(BusyTimeout(options.busy_timeout_ms)))
            .build(manager)?;
        let token_ttl = chrono::Duration::from_std(options.token_ttl)
            .unwrap_or_else(|_| chrono::Duration::minutes(5));
        Ok(Self {
            pool,
            token_ttl,
            timezone: options.timezone,
        })
    }

    /// Run a trivial query to prove the database is reachable
    pub async fn ping(&self) -> Result<(), StoreError> {
        self.with_conn(|conn| {
            conn.query_row("SELECT 1", [], |_| Ok(()))?;
            Ok(())
        })
        .await
    }

    /// Delete access tokens older than the token lifetime
    pub async fn delete_expired_tokens(&self) -> Result<usize, StoreError> {
        let cutoff = format_db_timestamp(Utc::now() - self.token_ttl, self.timezone);
        self.with_conn(move |conn| {
            let deleted = conn.execute(
                "DELETE FROM access_tokens WHERE created_at < ?1",
                params![cutoff],
            )?;
            Ok(deleted)
        })
        .await
    }

    async fn with_conn<T, F>(&self, f: F) -> Result<T, StoreError>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> Result<T, StoreError> + Send + 'static,
    {
        let pool = self.pool.clone();
        tokio::task::spawn_blocking(move || {
            let conn = pool.get()?;
            f(&conn)
        })
        .await?
    }
}

#[async_trait]
impl SnapshotSource for SqliteStore {
    async fn fetch_all(&self, kind: EntityKind) -> Result<Snapshot, StoreError> {
        debug!(%kind, "fetching full snapshot");
        let tz = self.timezone;
        self.with_conn(move |conn| match kind {
            EntityKind::Products => {
                let sql = format!("SELECT {PRODUCT_COLUMNS} FROM products");
                query_records(conn, kind, &sql, [], |row| product_from_row(row, tz))
                    .map(Snapshot::from)
            }
            EntityKind::Orders => {
                let sql = format!("SELECT {ORDER_COLUMNS} FROM orders");
                query_records(conn, kind, &sql, [], |row| order_from_row(row, tz))
                    .map(Snapshot::from)
            }
        })
        .await
    }

    async fn fetch_changed_since(
        &self,
        kind: EntityKind,
        since: DateTime<Utc>,
    ) -> Result<Snapshot, StoreError> {
        // Stored values have whole-second precision; `>=` on the floored cursor
        // keeps writes later in the cursor's own second visible.
        let tz = self.timezone;
        let since = format_db_timestamp(since, tz);
        debug!(%kind, since = %since, "fetching changed records");
        self.with_conn(move |conn| match kind {
            EntityKind::Products => {
                let sql = format!("SELECT {PRODUCT_COLUMNS} FROM products WHERE updated_at >= ?1");
                query_records(conn, kind, &sql, params![since], |row| product_from_row(row, tz))
                    .map(Snapshot::from)
            }
            EntityKind::Orders => {
                let sql = format!("SELECT {ORDER_COLUMNS} FROM orders WHERE updated_at >= ?1");
                query_records(conn, kind, &sql, params![since], |row| order_from_row(row, tz))
                    .map(Snapshot::from)
            }
        })
        .await
    }

    async fn latest_change_timestamp(
        &self,
        kind: EntityKind,
    ) -> Result<Option<DateTime<Utc>>, StoreError> {
        let tz = self.timezone;
        self.with_conn(move |conn| {
            let sql = format!("SELECT MAX(updated_at) FROM {}", kind.table_name());
            let raw: Option<String> = conn.query_row(&sql, [], |row| row.get(0))?;
            Ok(raw.as_deref().and_then(|raw| {
                let parsed = parse_db_timestamp(raw, tz);
                if parsed.is_none() {
                    warn!(%kind, raw, "unparseable updated_at value");
                }
                parsed
            }))
        })
        .await
    }
}

#[async_trait]
impl TokenVerifier for SqliteStore {
    async fn verify(&self, token: &str) -> Result<bool, StoreError> {
        let token = token.to_string();
        let valid_after = format_db_timestamp(Utc::now() - self.token_ttl, self.timezone);
        self.with_conn(move |conn| {
            let found: bool = conn.query_row(
                "SELECT EXISTS(SELECT 1 FROM access_tokens WHERE access_token = ?1 AND created_at >= ?2)",
                params![token, valid_after],
                |row| row.get(0),
            )?;
            Ok(found)
        })
        .await
    }
}

/// Run a query and map each row, skipping rows that fail to decode
fn query_records<T, P, F>(
    conn: &Connection,
    kind: EntityKind,
    sql: &str,
    params: P,
    map: F,
) -> Result<Vec<T>, StoreError>
where
    P: Params,
    F: FnMut(&Row<'_>) -> rusqlite::Result<T>,
{
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt.query_map(params, map)?;
    let mut records = Vec::new();
    for row in rows {
        match row {
            Ok(record) => records.push(record),
            Err(e) => warn!(%kind, error = %e, "skipping row that failed to decode"),
        }
    }
    debug!(%kind, count = records.len(), "records read");
    Ok(records)
}

fn product_from_row(row: &Row<'_>, tz: Tz) -> rusqlite::Result<Product> {
    Ok(Product {
        id: row.get(0)?,
        name: row.get::<_, Option<String>>(1)?.unwrap_or_default(),
        description: row.get::<_, Option<String>>(2)?.unwrap_or_default(),
        price: row.get(3)?,
        stock: row.get(4)?,
        limit_quantity: row.get(5)?,
        image: row.get::<_, Option<String>>(6)?.unwrap_or_default(),
        allergens: json_column(row.get(7)?),
        created_at: timestamp_column(row.get(8)?, tz),
    })
}

fn order_from_row(row: &Row<'_>, tz: Tz) -> rusqlite::Result<Order> {
    Ok(Order {
        id: row.get(0)?,
        uuid: row.get(1)?,
        product_id: row.get(2)?,
        quantity: row.get(3)?,
        image: row.get::<_, Option<String>>(4)?.unwrap_or_default(),
        options: json_column(row.get(5)?),
        created_at: timestamp_column(row.get(6)?, tz),
    })
}

/// JSON text column. Invalid JSON is kept as a string so the row still ships.
fn json_column(raw: Option<String>) -> Value {
    match raw {
        None => Value::Null,
        Some(text) => serde_json::from_str(&text).unwrap_or_else(|e| {
            warn!(error = %e, "column holds invalid JSON, sending it as a string");
            Value::String(text)
        }),
    }
}

fn timestamp_column(raw: Option<String>, tz: Tz) -> DateTime<Utc> {
    raw.as_deref()
        .and_then(|raw| parse_db_timestamp(raw, tz))
        .unwrap_or_default()
}
