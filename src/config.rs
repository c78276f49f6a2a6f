use serde::{Deserialize, Serialize};

use crate::database::Database;
use crate::error::SqlSerialError;

fn default_attempts() -> usize {
    1
}

fn default_retry_delay_ms() -> u64 {
    10
}

/// Options for opening a [`Database`].
///
/// Deserializable, so it can live in a JSON config file:
/// ```rust
/// use sql_serial::prelude::*;
///
/// let opts = DatabaseOptions::from_json(r#"{ "db_path": "app.db", "number_of_attempts_to_try": 3 }"#)
///     .expect("valid options");
/// assert_eq!(opts.number_of_attempts_to_try, 3);
/// assert_eq!(opts.retry_delay_ms, 10);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatabaseOptions {
    /// File path, or `:memory:`.
    pub db_path: String,
    /// How many times a busy/locked statement is attempted before the error is surfaced.
    #[serde(default = "default_attempts")]
    pub number_of_attempts_to_try: usize,
    /// Pause on the calling thread between attempts.
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
    /// Engine-level busy handler. Zero leaves busy handling to the retry policy.
    #[serde(default)]
    pub busy_timeout_ms: u64,
    #[serde(default)]
    pub should_log: bool,
    /// Switch the database to `journal_mode = WAL` after opening.
    #[serde(default)]
    pub wal: bool,
}

impl DatabaseOptions {
    #[must_use]
    pub fn new(db_path: String) -> Self {
        Self {
            db_path,
            number_of_attempts_to_try: default_attempts(),
            retry_delay_ms: default_retry_delay_ms(),
            busy_timeout_ms: 0,
            should_log: false,
            wal: false,
        }
    }

    /// Parse options from JSON.
    ///
    /// # Errors
    /// Returns [`SqlSerialError::ConfigError`] if the JSON is malformed or the options are
    /// invalid.
    pub fn from_json(json: &str) -> Result<Self, SqlSerialError> {
        let opts: Self = serde_json::from_str(json)
            .map_err(|e| SqlSerialError::ConfigError(format!("invalid database options: {e}")))?;
        opts.validate()?;
        Ok(opts)
    }

    /// # Errors
    /// Returns [`SqlSerialError::ConfigError`] for an empty path or zero attempts.
    pub fn validate(&self) -> Result<(), SqlSerialError> {
        if self.db_path.is_empty() {
            return Err(SqlSerialError::ConfigError("db_path must not be empty".into()));
        }
        if self.number_of_attempts_to_try == 0 {
            return Err(SqlSerialError::ConfigError(
                "number_of_attempts_to_try must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

/// Fluent builder for [`DatabaseOptions`].
#[derive(Debug, Clone)]
pub struct DatabaseOptionsBuilder {
    opts: DatabaseOptions,
}

impl DatabaseOptionsBuilder {
    #[must_use]
    pub fn new(db_path: String) -> Self {
        Self {
            opts: DatabaseOptions::new(db_path),
        }
    }

    #[must_use]
    pub fn attempts(mut self, number_of_attempts_to_try: usize) -> Self {
        self.opts.number_of_attempts_to_try = number_of_attempts_to_try;
        self
    }

    #[must_use]
    pub fn retry_delay_ms(mut self, retry_delay_ms: u64) -> Self {
        self.opts.retry_delay_ms = retry_delay_ms;
        self
    }

    #[must_use]
    pub fn busy_timeout_ms(mut self, busy_timeout_ms: u64) -> Self {
        self.opts.busy_timeout_ms = busy_timeout_ms;
        self
    }

    #[must_use]
    pub fn should_log(mut self, should_log: bool) -> Self {
        self.opts.should_log = should_log;
        self
    }

    #[must_use]
    pub fn wal(mut self, wal: bool) -> Self {
        self.opts.wal = wal;
        self
    }

    #[must_use]
    pub fn finish(self) -> DatabaseOptions {
        self.opts
    }

    /// Open a [`Database`] with the built options.
    ///
    /// # Errors
    /// Returns `SqlSerialError` if the options are invalid or the database cannot be opened.
    pub fn open(self) -> Result<Database, SqlSerialError> {
        Database::open_with_options(self.finish())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn json_defaults_fill_missing_fields() -> Result<(), SqlSerialError> {
        let opts = DatabaseOptions::from_json(r#"{ "db_path": "x.db" }"#)?;
        assert_eq!(opts, DatabaseOptions::new("x.db".into()));
        Ok(())
    }

    #[test]
    fn zero_attempts_is_rejected() {
        let err = DatabaseOptionsBuilder::new("x.db".into())
            .attempts(0)
            .finish()
            .validate()
            .unwrap_err();
        assert!(matches!(err, SqlSerialError::ConfigError(_)));
        assert!(DatabaseOptions::from_json("{}").is_err());
    }

    #[test]
    fn builder_sets_every_field() {
        let opts = DatabaseOptionsBuilder::new("y.db".into())
            .attempts(4)
            .retry_delay_ms(0)
            .busy_timeout_ms(250)
            .should_log(true)
            .wal(true)
            .finish();
        assert_eq!(opts.number_of_attempts_to_try, 4);
        assert_eq!(opts.retry_delay_ms, 0);
        assert_eq!(opts.busy_timeout_ms, 250);
        assert!(opts.should_log && opts.wal);
    }
}
