//! Live entity streams over a long-lived HTTP response
//!
//! ## Endpoints
//! - `GET /api/products/stream` - product snapshots
//! - `GET /api/orders/stream` - order snapshots
//!
//! Frames use `event: <name>\ndata: <json>\n\n`. A stream opens with
//! `connected` and the current snapshot, carries one `<kind>` frame per
//! publish, counts down with `disconnect_warning` frames and ends with a
//! single `close` frame.

pub mod frame;
pub mod handler;
pub mod session;

pub use frame::{Encoding, FrameError, FrameWriter};
pub use handler::{stream_orders, stream_products};
pub use session::{SessionConfig, SessionEnd, SessionState, StreamSession};
