//! Integration tests for the HTTP surface backed by a real SQLite database

use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use chrono::Utc;
use chrono_tz::Tz;
use futures::StreamExt;
use rusqlite::Connection;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;
use tower::util::ServiceExt;

use livefeed::api::{create_router, AppState};
use livefeed::store::StoreOptions;
use livefeed::utils::format_db_timestamp;
use livefeed::{Broadcaster, EntityKind, Snapshot, SqliteStore};

const SCHEMA: &str = "
    CREATE TABLE products (
        id INTEGER PRIMARY KEY, name TEXT, description TEXT,
        price REAL NOT NULL DEFAULT 0, stock INTEGER NOT NULL DEFAULT 0,
        limit_quantity INTEGER, image TEXT, allergens TEXT,
        created_at TEXT, updated_at TEXT
    );
    CREATE TABLE orders (
        id INTEGER PRIMARY KEY, uuid TEXT NOT NULL, product_id INTEGER NOT NULL,
        quantity INTEGER NOT NULL, image TEXT, options TEXT,
        created_at TEXT, updated_at TEXT
    );
    CREATE TABLE access_tokens (
        id INTEGER PRIMARY KEY, access_token TEXT NOT NULL, created_at TEXT
    );
";

struct TestApp {
    router: axum::Router,
    broadcaster: Arc<Broadcaster>,
    shutdown: CancellationToken,
    _dir: TempDir,
}

fn setup() -> TestApp {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("database.sqlite");
    let conn = Connection::open(&path).unwrap();
    conn.execute_batch(SCHEMA).unwrap();

    let now = format_db_timestamp(Utc::now(), Tz::UTC);
    let expired = format_db_timestamp(Utc::now() - chrono::Duration::minutes(10), Tz::UTC);
    conn.execute_batch(&format!(
        "INSERT INTO access_tokens (access_token, created_at) VALUES ('live-token', '{now}');
         INSERT INTO access_tokens (access_token, created_at) VALUES ('old-token', '{expired}');
         INSERT INTO products (id, name, price, stock, allergens, created_at, updated_at)
             VALUES (1, 'Coffee', 3.5, 10, '[\"milk\"]', '{now}', '{now}');"
    ))
    .unwrap();

    let store = Arc::new(SqliteStore::open(&path, &StoreOptions::default()).unwrap());
    let broadcaster = Arc::new(Broadcaster::default());
    let shutdown = CancellationToken::new();
    let state = AppState::new(
        Arc::clone(&broadcaster),
        store.clone(),
        store,
        shutdown.clone(),
    )
    .with_app_url("http://localhost:3000");

    TestApp {
        router: create_router(Arc::new(state)),
        broadcaster,
        shutdown,
        _dir: dir,
    }
}

fn stream_request(uri: &str, token: &str) -> Request<Body> {
    Request::builder()
        .uri(uri)
        .header("Authorization", format!("Bearer {token}"))
        .body(Body::empty())
        .unwrap()
}

#[tokio::test]
async fn test_expired_token_is_rejected() {
    let app = setup();
    let response = app
        .router
        .oneshot(stream_request("/api/products/stream", "old-token"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(json["detail"], "Invalid or expired token");
}

#[tokio::test]
async fn test_products_stream_sends_preamble_and_updates() {
    let app = setup();
    let response = app
        .router
        .clone()
        .oneshot(stream_request("/api/products/stream", "live-token"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()["content-type"], "text/event-stream");
    assert!(response.headers().get("content-encoding").is_none());

    let mut body = response.into_body().into_data_stream();
    let connected = body.next().await.unwrap().unwrap();
    assert_eq!(
        connected.as_ref(),
        b"event: connected\ndata: {\"message\":\"Connected to products stream\"}\n\n"
    );

    let initial = body.next().await.unwrap().unwrap();
    let initial = String::from_utf8(initial.to_vec()).unwrap();
    assert!(initial.starts_with("event: products\ndata: [{\"id\":1,\"name\":\"Coffee\""));
    assert!(initial.contains("\"allergens\":[\"milk\"]"));

    assert_eq!(app.broadcaster.subscriber_count(EntityKind::Products), 1);
    app.broadcaster.publish(Snapshot::empty(EntityKind::Products));
    let update = body.next().await.unwrap().unwrap();
    assert_eq!(update.as_ref(), b"event: products\ndata: []\n\n");

    app.shutdown.cancel();
    assert!(body.next().await.is_none());
    assert_eq!(app.broadcaster.subscriber_count(EntityKind::Products), 0);
}

#[tokio::test]
async fn test_orders_stream_is_separate_from_products() {
    let app = setup();
    let response = app
        .router
        .clone()
        .oneshot(stream_request("/api/orders/stream", "live-token"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let mut body = response.into_body().into_data_stream();
    body.next().await.unwrap().unwrap();
    let initial = body.next().await.unwrap().unwrap();
    assert_eq!(initial.as_ref(), b"event: orders\ndata: []\n\n");

    assert_eq!(app.broadcaster.subscriber_count(EntityKind::Orders), 1);
    assert_eq!(app.broadcaster.subscriber_count(EntityKind::Products), 0);
    app.shutdown.cancel();
}
