//! Event framing and response encoding

use std::io::{self, Write};
use std::time::Duration;

use bytes::Bytes;
use flate2::write::GzEncoder;
use flate2::Compression;
use serde::Serialize;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::trace;

pub const EVENT_CONNECTED: &str = "connected";
pub const EVENT_DISCONNECT_WARNING: &str = "disconnect_warning";
pub const EVENT_CLOSE: &str = "close";

#[derive(Debug, Error)]
pub enum FrameError {
    #[error("client disconnected")]
    Disconnected,

    #[error("write timed out after {0:?}")]
    Timeout(Duration),

    #[error("failed to encode frame: {0}")]
    Encode(#[from] io::Error),

    #[error("failed to serialize payload: {0}")]
    Serialize(#[from] serde_json::Error),
}

impl FrameError {
    /// Whether the connection is unusable after this error
    pub fn is_fatal(&self) -> bool {
        !matches!(self, FrameError::Serialize(_))
    }
}

/// Response body encoding
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Encoding {
    Identity,
    Gzip,
}

impl Encoding {
    /// Pick an encoding from an `Accept-Encoding` header value.
    ///
    /// Gzip is chosen when listed with a non-zero quality.
    pub fn negotiate(accept_encoding: Option<&str>) -> Self {
        let Some(header) = accept_encoding else {
            return Encoding::Identity;
        };
        let gzip = header.split(',').any(|entry| {
            let mut parts = entry.split(';');
            let coding = parts.next().unwrap_or_default().trim();
            if !coding.eq_ignore_ascii_case("gzip") {
                return false;
            }
            parts
                .filter_map(|param| param.trim().strip_prefix("q="))
                .all(|q| q.trim().parse::<f32>().map_or(false, |q| q > 0.0))
        });
        if gzip {
            Encoding::Gzip
        } else {
            Encoding::Identity
        }
    }

    /// `Content-Encoding` value, if any
    pub fn content_encoding(self) -> Option<&'static str> {
        match self {
            Encoding::Identity => None,
            Encoding::Gzip => Some("gzip"),
        }
    }
}

/// Render one event in wire format
pub fn render(event: &str, data: &str) -> String {
    format!("event: {event}\ndata: {data}\n\n")
}

enum Encoder {
    Identity,
    Gzip(GzEncoder<Vec<u8>>),
}

/// Writes framed events to a client's response body.
///
/// After the `close` frame nothing more is written.
pub struct FrameWriter {
    sink: mpsc::Sender<Bytes>,
    encoder: Encoder,
    write_timeout: Duration,
    closed: bool,
    finished: bool,
}

impl FrameWriter {
    pub fn new(sink: mpsc::Sender<Bytes>, encoding: Encoding, write_timeout: Duration) -> Self {
        let encoder = match encoding {
            Encoding::Identity => Encoder::Identity,
            Encoding::Gzip => Encoder::Gzip(GzEncoder::new(Vec::new(), Compression::default())),
        };
        Self {
            sink,
            encoder,
            write_timeout,
            closed: false,
            finished: false,
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Serialize `payload` and write it as event `event`
    pub async fn write_event<T: Serialize + ?Sized>(
        &mut self,
        event: &str,
        payload: &T,
    ) -> Result<(), FrameError> {
        if self.closed {
            trace!(event, "frame suppressed after close");
            return Ok(());
        }
        let data = serde_json::to_string(payload)?;
        self.write_raw(&render(event, &data)).await
    }

    /// Write the `close` frame. Returns `false` if it was already written.
    pub async fn write_close(&mut self, message: &str) -> Result<bool, FrameError> {
        if self.closed {
            return Ok(false);
        }
        let data = serde_json::json!({ "message": message }).to_string();
        self.closed = true;
        self.write_raw(&render(EVENT_CLOSE, &data)).await?;
        Ok(true)
    }

    /// Flush any encoder trailer. Idempotent.
    pub async fn finish(&mut self) -> Result<(), FrameError> {
        if self.finished {
            return Ok(());
        }
        self.finished = true;
        self.closed = true;
        let trailer = match &mut self.encoder {
            Encoder::Identity => return Ok(()),
            Encoder::Gzip(gz) => {
                gz.try_finish()?;
                std::mem::take(gz.get_mut())
            }
        };
        self.send(Bytes::from(trailer)).await
    }

    async fn write_raw(&mut self, text: &str) -> Result<(), FrameError> {
        if self.finished {
            return Ok(());
        }
        let chunk = match &mut self.encoder {
            Encoder::Identity => Bytes::copy_from_slice(text.as_bytes()),
            Encoder::Gzip(gz) => {
                gz.write_all(text.as_bytes())?;
                // Sync flush so the client can decode this event immediately.
                gz.flush()?;
                Bytes::from(std::mem::take(gz.get_mut()))
            }
        };
        self.send(chunk).await
    }

    async fn send(&self, chunk: Bytes) -> Result<(), FrameError> {
        if chunk.is_empty() {
            return Ok(());
        }
        match tokio::time::timeout(self.write_timeout, self.sink.send(chunk)).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(_)) => Err(FrameError::Disconnected),
            Err(_) => Err(FrameError::Timeout(self.write_timeout)),
        }
    }
}
