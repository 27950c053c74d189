//! Database layer for lifeledger
//!
//! This module provides the storage layer using SQLite with:
//! - Schema migrations
//! - Row mapping for the entity tables written by commands
//! - Read-side queries on [`Database`]
//!
//! Timestamps are stored as fixed-width RFC 3339 UTC text with microsecond
//! precision, so lexical order in SQL equals chronological order.

pub mod repo;
pub mod schema;

pub use repo::{Database, TransactionFilter};

use chrono::{DateTime, NaiveDate, SecondsFormat, Utc};
use rusqlite::types::Type;

/// Formats a timestamp for storage.
pub fn fmt_ts(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Parses a stored timestamp.
pub fn parse_ts(text: &str) -> Result<DateTime<Utc>, chrono::ParseError> {
    DateTime::parse_from_rfc3339(text).map(|dt| dt.with_timezone(&Utc))
}

/// Formats a local calendar date for storage (`YYYY-MM-DD`).
pub fn fmt_day(day: NaiveDate) -> String {
    day.format("%Y-%m-%d").to_string()
}

// ============================================
// Column decoding helpers
// ============================================

fn conversion_error(
    idx: usize,
    err: impl std::error::Error + Send + Sync + 'static,
) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(err))
}

pub(crate) fn ts_col(row: &rusqlite::Row, name: &str) -> rusqlite::Result<DateTime<Utc>> {
    let idx = row.as_ref().column_index(name)?;
    let text: String = row.get(idx)?;
    parse_ts(&text).map_err(|e| conversion_error(idx, e))
}

pub(crate) fn opt_ts_col(
    row: &rusqlite::Row,
    name: &str,
) -> rusqlite::Result<Option<DateTime<Utc>>> {
    let idx = row.as_ref().column_index(name)?;
    let text: Option<String> = row.get(idx)?;
    text.map(|t| parse_ts(&t).map_err(|e| conversion_error(idx, e)))
        .transpose()
}

pub(crate) fn day_col(row: &rusqlite::Row, name: &str) -> rusqlite::Result<NaiveDate> {
    let idx = row.as_ref().column_index(name)?;
    let text: String = row.get(idx)?;
    NaiveDate::parse_from_str(&text, "%Y-%m-%d").map_err(|e| conversion_error(idx, e))
}

/// Decodes a text column into any string-backed enum.
pub(crate) fn enum_col<T>(row: &rusqlite::Row, name: &str) -> rusqlite::Result<T>
where
    T: std::str::FromStr<Err = String>,
{
    let idx = row.as_ref().column_index(name)?;
    let text: String = row.get(idx)?;
    text.parse()
        .map_err(|e: String| conversion_error(idx, std::io::Error::other(e)))
}

/// Decodes a JSON text column.
pub(crate) fn json_col<T>(row: &rusqlite::Row, name: &str) -> rusqlite::Result<T>
where
    T: serde::de::DeserializeOwned,
{
    let idx = row.as_ref().column_index(name)?;
    let text: String = row.get(idx)?;
    serde_json::from_str(&text).map_err(|e| conversion_error(idx, e))
}

pub(crate) fn opt_json_col<T>(row: &rusqlite::Row, name: &str) -> rusqlite::Result<Option<T>>
where
    T: serde::de::DeserializeOwned,
{
    let idx = row.as_ref().column_index(name)?;
    let text: Option<String> = row.get(idx)?;
    text.map(|t| serde_json::from_str(&t).map_err(|e| conversion_error(idx, e)))
        .transpose()
}
