//! Utility functions and helpers
//!
//! This module contains timestamp helpers shared by the store and the poller.

pub mod time;

pub use time::{format_db_timestamp, parse_db_timestamp};
