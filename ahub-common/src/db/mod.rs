//! Database schema and repositories
//!
//! UUIDs are stored as TEXT, timestamps as fixed-width RFC 3339 TEXT in UTC so
//! that lexical order matches chronological order, JSON as TEXT.

pub mod broadcasts;
pub mod contacts;
pub mod email_events;
pub mod imports;
pub mod init;
pub mod lists;
pub mod retry;
pub mod teams;
pub mod uploads;

pub use init::init_database;
pub use retry::retry_on_lock;

use chrono::{DateTime, SecondsFormat, Utc};
use uuid::Uuid;

use crate::{Error, Result};

/// Format a timestamp for storage
pub fn ts(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Current time, truncated to the stored precision
pub fn now() -> DateTime<Utc> {
    let now = Utc::now();
    parse_ts(&ts(&now)).unwrap_or(now)
}

pub fn parse_ts(s: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| Error::Internal(format!("Bad stored timestamp '{}': {}", s, e)))
}

pub fn parse_opt_ts(s: Option<String>) -> Result<Option<DateTime<Utc>>> {
    s.as_deref().map(parse_ts).transpose()
}

pub fn parse_uuid(s: &str) -> Result<Uuid> {
    Uuid::parse_str(s).map_err(|e| Error::Internal(format!("Bad stored UUID '{}': {}", s, e)))
}

pub fn parse_opt_uuid(s: Option<String>) -> Result<Option<Uuid>> {
    s.as_deref().map(parse_uuid).transpose()
}

/// Escape `%`, `_` and `\` for a LIKE pattern using `ESCAPE '\'`
pub fn like_pattern(term: &str) -> String {
    let mut escaped = String::with_capacity(term.len() + 2);
    escaped.push('%');
    for c in term.chars() {
        if matches!(c, '%' | '_' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped.push('%');
    escaped
}
