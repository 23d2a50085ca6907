//! Time and timestamp utilities
//!
//! The catalog and order tables are managed by a Laravel application, which
//! stores timestamps as `TEXT` in `YYYY-MM-DD HH:MM:SS` form, in the
//! application timezone (`APP_TIMEZONE`).

use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use chrono_tz::Tz;

/// Column format used by the application tables
pub const DB_TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Format a timestamp as the local wall-clock text stored in `tz`.
///
/// Sub-second precision is dropped, so the result is the second `ts` falls in.
pub fn format_db_timestamp(ts: DateTime<Utc>, tz: Tz) -> String {
    ts.with_timezone(&tz).format(DB_TIMESTAMP_FORMAT).to_string()
}

/// Parse a timestamp read from the database.
///
/// Column-format values (with or without fractional seconds) are local times
/// in `tz`; an ambiguous local time resolves to its earlier instant. RFC 3339
/// values carry their own offset.
pub fn parse_db_timestamp(raw: &str, tz: Tz) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(naive) = NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S%.f") {
        return tz
            .from_local_datetime(&naive)
            .earliest()
            .map(|local| local.with_timezone(&Utc));
    }
    DateTime::parse_from_rfc3339(raw)
        .ok()
        .map(|ts| ts.with_timezone(&Utc))
}
