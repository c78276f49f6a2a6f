use chrono::{DateTime, NaiveDateTime, Utc};
use rusqlite::Statement;
use rusqlite::types::{Value, ValueRef};

use crate::error::SqlSerialError;
use crate::types::{RowValues, TIMESTAMP_FORMAT, parse_timestamp};

/// Convert a single `RowValue` to a rusqlite `Value`.
#[must_use]
pub fn row_value_to_sqlite_value(value: &RowValues) -> Value {
    match value {
        RowValues::Null => Value::Null,
        RowValues::Bool(b) => Value::Integer(i64::from(*b)),
        RowValues::Int32(i) => Value::Integer(i64::from(*i)),
        RowValues::Int(i) => Value::Integer(*i),
        RowValues::Float(f) => Value::Real(*f),
        RowValues::Text(s) => Value::Text(s.clone()),
        RowValues::Timestamp(dt) => Value::Text(dt.format(TIMESTAMP_FORMAT).to_string()),
        RowValues::Blob(bytes) => Value::Blob(bytes.clone()),
        // Only serialize once to avoid multiple allocations
        RowValues::JSON(jval) => Value::Text(jval.to_string()),
    }
}

/// Convert middleware row values into owned `SQLite` values that can cross the queue boundary.
#[must_use]
pub fn convert_params(params: &[RowValues]) -> Vec<Value> {
    params.iter().map(row_value_to_sqlite_value).collect()
}

/// Bind `values` positionally onto `stmt`.
///
/// The number of values must equal the number of placeholders; a mismatch is reported as
/// [`SqlSerialError::BindError`] rather than binding a prefix.
///
/// # Errors
/// Returns [`SqlSerialError::BindError`] on a count mismatch or when the engine rejects a value.
pub fn bind_values(stmt: &mut Statement<'_>, values: &[Value]) -> Result<(), SqlSerialError> {
    let expected = stmt.parameter_count();
    if expected != values.len() {
        return Err(SqlSerialError::bind(
            &rusqlite::Error::InvalidParameterCount(values.len(), expected),
        ));
    }
    for (idx, value) in values.iter().enumerate() {
        stmt.raw_bind_parameter(idx + 1, value)
            .map_err(|err| SqlSerialError::bind(&err))?;
    }
    Ok(())
}

/// Extract a `RowValues` from a column of the current `SQLite` row.
#[must_use]
pub fn sqlite_value_to_row_value(value: ValueRef<'_>) -> RowValues {
    match value {
        ValueRef::Null => RowValues::Null,
        ValueRef::Integer(i) => RowValues::Int(i),
        ValueRef::Real(f) => RowValues::Float(f),
        ValueRef::Text(bytes) => RowValues::Text(String::from_utf8_lossy(bytes).into_owned()),
        ValueRef::Blob(bytes) => RowValues::Blob(bytes.to_vec()),
    }
}

// Loose column typing, in the spirit of sqlite3_column_*: every storage class converts to every
// accessor type, and anything unconvertible reads as the accessor's zero value.

pub(crate) fn int64_of(value: &RowValues) -> i64 {
    match value {
        RowValues::Null | RowValues::Blob(_) | RowValues::JSON(_) => 0,
        RowValues::Bool(b) => i64::from(*b),
        RowValues::Int32(i) => i64::from(*i),
        RowValues::Int(i) => *i,
        #[allow(clippy::cast_possible_truncation)]
        RowValues::Float(f) => *f as i64,
        RowValues::Text(s) => parse_leading_int(s),
        RowValues::Timestamp(dt) => dt.and_utc().timestamp(),
    }
}

#[allow(clippy::cast_possible_truncation)]
pub(crate) fn int32_of(value: &RowValues) -> i32 {
    int64_of(value) as i32
}

#[allow(clippy::cast_precision_loss)]
pub(crate) fn double_of(value: &RowValues) -> f64 {
    match value {
        RowValues::Float(f) => *f,
        RowValues::Text(s) => s.trim().parse::<f64>().unwrap_or(0.0),
        other => int64_of(other) as f64,
    }
}

pub(crate) fn string_of(value: &RowValues) -> Option<String> {
    match value {
        RowValues::Null => None,
        RowValues::Bool(b) => Some(i64::from(*b).to_string()),
        RowValues::Int32(i) => Some(i.to_string()),
        RowValues::Int(i) => Some(i.to_string()),
        RowValues::Float(f) => Some(format!("{f:?}")),
        RowValues::Text(s) => Some(s.clone()),
        RowValues::Timestamp(dt) => Some(dt.format(TIMESTAMP_FORMAT).to_string()),
        RowValues::Blob(bytes) => Some(String::from_utf8_lossy(bytes).into_owned()),
        RowValues::JSON(jval) => Some(jval.to_string()),
    }
}

pub(crate) fn blob_of(value: &RowValues) -> Option<Vec<u8>> {
    match value {
        RowValues::Null => None,
        RowValues::Blob(bytes) => Some(bytes.clone()),
        other => string_of(other).map(String::into_bytes),
    }
}

/// Text columns are parsed; numeric columns are seconds since the Unix epoch.
pub(crate) fn date_of(value: &RowValues) -> Option<NaiveDateTime> {
    match value {
        RowValues::Null | RowValues::Blob(_) | RowValues::JSON(_) => None,
        RowValues::Timestamp(dt) => Some(*dt),
        RowValues::Text(s) => parse_timestamp(s),
        other => epoch_seconds(double_of(other)),
    }
}

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn epoch_seconds(seconds: f64) -> Option<NaiveDateTime> {
    let whole = seconds.floor();
    let nanos = ((seconds - whole) * 1_000_000_000.0).round() as u32;
    DateTime::<Utc>::from_timestamp(whole as i64, nanos.min(999_999_999)).map(|dt| dt.naive_utc())
}

#[allow(clippy::cast_possible_truncation)]
fn parse_leading_int(s: &str) -> i64 {
    let trimmed = s.trim();
    if let Ok(i) = trimmed.parse::<i64>() {
        return i;
    }
    trimmed.parse::<f64>().map_or(0, |f| f as i64)
}
