use rusqlite::ffi;
use thiserror::Error;

/// Every failure surfaced by a [`Database`](crate::Database) or its result sets.
///
/// Engine failures keep the native status code and message untouched; errors the crate raises
/// on its own carry the closest `SQLite` code so [`SqlSerialError::code`] is always meaningful.
#[derive(Debug, Error)]
pub enum SqlSerialError {
    #[error("unable to open database at {path}: {message} (code {code})")]
    OpenError {
        path: String,
        code: i32,
        message: String,
    },

    #[error("failed to prepare `{query}`: {message} (code {code})")]
    PrepareError {
        code: i32,
        message: String,
        query: String,
    },

    #[error("Parameter binding error: {message} (code {code})")]
    BindError { code: i32, message: String },

    #[error("SQL execution error: {message} (code {code})")]
    SqlError { code: i32, message: String },

    #[error("database is closed")]
    UseAfterClose,

    #[error("nested call from inside the execution queue; use the Session handed to the queued closure")]
    ReentrantCall,

    #[error("Connection error: {0}")]
    ConnectionError(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error(transparent)]
    SqliteError(#[from] rusqlite::Error),
}

impl SqlSerialError {
    /// Native status code for this error.
    #[must_use]
    pub fn code(&self) -> i32 {
        match self {
            Self::OpenError { code, .. }
            | Self::PrepareError { code, .. }
            | Self::BindError { code, .. }
            | Self::SqlError { code, .. } => *code,
            Self::UseAfterClose | Self::ReentrantCall => ffi::SQLITE_MISUSE,
            Self::ConnectionError(_) | Self::ConfigError(_) => ffi::SQLITE_ERROR,
            Self::SqliteError(err) => native_parts(err).0,
        }
    }

    /// Human readable message, without the code decoration of `Display`.
    #[must_use]
    pub fn message(&self) -> String {
        match self {
            Self::OpenError { message, .. }
            | Self::PrepareError { message, .. }
            | Self::BindError { message, .. }
            | Self::SqlError { message, .. } => message.clone(),
            Self::SqliteError(err) => native_parts(err).1,
            other => other.to_string(),
        }
    }

    /// True for the transient `SQLITE_BUSY` / `SQLITE_LOCKED` family.
    #[must_use]
    pub fn is_busy(&self) -> bool {
        let primary = self.code() & 0xff;
        matches!(
            self,
            Self::SqlError { .. } | Self::PrepareError { .. } | Self::SqliteError(_)
        ) && (primary == ffi::SQLITE_BUSY || primary == ffi::SQLITE_LOCKED)
    }

    pub(crate) fn open(path: &str, err: &rusqlite::Error) -> Self {
        let (code, message) = native_parts(err);
        Self::OpenError {
            path: path.to_owned(),
            code,
            message,
        }
    }

    pub(crate) fn prepare(query: &str, err: &rusqlite::Error) -> Self {
        let (code, message) = native_parts(err);
        Self::PrepareError {
            code,
            message,
            query: query.to_owned(),
        }
    }

    pub(crate) fn empty_statement(query: &str) -> Self {
        Self::PrepareError {
            code: ffi::SQLITE_ERROR,
            message: "query contains no SQL statement (only whitespace or comments)".into(),
            query: query.to_owned(),
        }
    }

    pub(crate) fn bind(err: &rusqlite::Error) -> Self {
        let (code, message) = match err {
            rusqlite::Error::InvalidParameterCount(given, expected) => (
                ffi::SQLITE_RANGE,
                format!("query expects {expected} bound values, {given} were supplied"),
            ),
            other => native_parts(other),
        };
        Self::BindError { code, message }
    }

    pub(crate) fn step(err: &rusqlite::Error) -> Self {
        let (code, message) = native_parts(err);
        Self::SqlError { code, message }
    }

    /// Synthetic `SQLITE_BUSY`, shaped exactly like the one the engine reports.
    pub(crate) fn busy() -> Self {
        Self::SqlError {
            code: ffi::SQLITE_BUSY,
            message: "database is locked".into(),
        }
    }
}

fn native_parts(err: &rusqlite::Error) -> (i32, String) {
    match err {
        rusqlite::Error::SqliteFailure(native, message) => (
            native.extended_code,
            message.clone().unwrap_or_else(|| native.to_string()),
        ),
        other => (ffi::SQLITE_ERROR, other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn failure(code: rusqlite::ErrorCode, extended: i32) -> rusqlite::Error {
        rusqlite::Error::SqliteFailure(
            ffi::Error {
                code,
                extended_code: extended,
            },
            Some("boom".into()),
        )
    }

    #[test]
    fn busy_and_locked_are_transient() {
        let busy = SqlSerialError::step(&failure(rusqlite::ErrorCode::DatabaseBusy, 5));
        let locked = SqlSerialError::step(&failure(rusqlite::ErrorCode::DatabaseLocked, 6));
        let constraint =
            SqlSerialError::step(&failure(rusqlite::ErrorCode::ConstraintViolation, 2067));
        assert!(busy.is_busy());
        assert!(locked.is_busy());
        assert!(!constraint.is_busy());
        assert_eq!(constraint.code(), 2067);
        assert_eq!(constraint.message(), "boom");
    }

    #[test]
    fn parameter_count_mismatch_is_a_range_error() {
        let err = SqlSerialError::bind(&rusqlite::Error::InvalidParameterCount(1, 2));
        assert_eq!(err.code(), ffi::SQLITE_RANGE);
        assert!(matches!(err, SqlSerialError::BindError { .. }));
    }

    #[test]
    fn closed_database_reports_misuse() {
        assert_eq!(SqlSerialError::UseAfterClose.code(), ffi::SQLITE_MISUSE);
        assert!(!SqlSerialError::UseAfterClose.is_busy());
    }
}
