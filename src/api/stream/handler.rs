//! Stream endpoint handlers

use std::convert::Infallible;
use std::sync::Arc;

use axum::{
    body::Body,
    extract::State,
    http::{
        header::{ACCEPT_ENCODING, CACHE_CONTROL, CONNECTION, CONTENT_ENCODING, CONTENT_TYPE, TRANSFER_ENCODING},
        HeaderMap, HeaderName, HeaderValue,
    },
    response::Response,
};
use bytes::Bytes;
use tokio::sync::mpsc;
use tokio_stream::{wrappers::ReceiverStream, StreamExt};

use super::frame::Encoding;
use super::session::StreamSession;
use crate::api::state::AppState;
use crate::types::EntityKind;

/// Frames buffered between a session and the response body
const CLIENT_BUFFER: usize = 32;

/// GET /api/products/stream
pub async fn stream_products(State(state): State<Arc<AppState>>, headers: HeaderMap) -> Response {
    open_stream(&state, EntityKind::Products, &headers)
}

/// GET /api/orders/stream
pub async fn stream_orders(State(state): State<Arc<AppState>>, headers: HeaderMap) -> Response {
    open_stream(&state, EntityKind::Orders, &headers)
}

fn open_stream(state: &AppState, kind: EntityKind, headers: &HeaderMap) -> Response {
    let encoding = Encoding::negotiate(
        headers
            .get(ACCEPT_ENCODING)
            .and_then(|value| value.to_str().ok()),
    );

    let (tx, rx) = mpsc::channel::<Bytes>(CLIENT_BUFFER);
    let session = StreamSession::new(
        kind,
        state.session,
        Arc::clone(&state.broadcaster),
        Arc::clone(&state.source),
        encoding,
        tx,
        &state.shutdown,
    );
    tokio::spawn(session.run());

    let body = Body::from_stream(ReceiverStream::new(rx).map(Ok::<_, Infallible>));
    let mut response = Response::new(body);
    let response_headers = response.headers_mut();
    response_headers.insert(CONTENT_TYPE, HeaderValue::from_static("text/event-stream"));
    response_headers.insert(CACHE_CONTROL, HeaderValue::from_static("no-cache, no-transform"));
    response_headers.insert(CONNECTION, HeaderValue::from_static("keep-alive"));
    response_headers.insert(
        HeaderName::from_static("x-accel-buffering"),
        HeaderValue::from_static("no"),
    );
    response_headers.insert(TRANSFER_ENCODING, HeaderValue::from_static("chunked"));
    if let Some(value) = encoding.content_encoding() {
        response_headers.insert(CONTENT_ENCODING, HeaderValue::from_static(value));
    }
    response
}
