pub(crate) mod status;

use std::fmt;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

use crate::binder::convert_params;
use crate::config::{DatabaseOptions, DatabaseOptionsBuilder};
use crate::error::SqlSerialError;
use crate::queue::ExecutionQueue;
use crate::result_set::ResultSet;
use crate::session::Session;
use crate::types::RowValues;

use status::Shared;

/// Handle to one open `SQLite` database.
///
/// All access funnels through a single serial execution queue, so a `Database` can be cloned
/// and shared across threads freely; clones refer to the same connection. Every call blocks
/// the calling thread until its queued work has run.
///
/// ```rust,no_run
/// use sql_serial::prelude::*;
///
/// # fn main() -> Result<(), SqlSerialError> {
/// let db = Database::open("app.db")?;
/// db.execute_update("CREATE TABLE IF NOT EXISTS kv (k TEXT PRIMARY KEY, v TEXT)", &[])?;
/// db.execute_update("INSERT INTO kv (k, v) VALUES (?, ?)", &["a".into(), "1".into()])?;
///
/// let mut rs = db.execute_query("SELECT v FROM kv WHERE k = ?", &["a".into()])?;
/// while rs.next_row() {
///     println!("{:?}", rs.string_for_column("v"));
/// }
/// rs.close();
/// db.close()?;
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct Database {
    inner: Arc<DatabaseInner>,
}

pub(crate) struct DatabaseInner {
    options: DatabaseOptions,
    queue: ExecutionQueue,
    shared: Arc<Shared>,
    closed: AtomicBool,
}

impl DatabaseInner {
    pub(crate) fn queue(&self) -> &ExecutionQueue {
        &self.queue
    }

    pub(crate) fn submit<F, R>(&self, work: F) -> Result<R, SqlSerialError>
    where
        F: for<'conn> FnOnce(&mut Session<'conn>) -> Result<R, SqlSerialError> + Send + 'static,
        R: Send + 'static,
    {
        if self.closed.load(Ordering::Acquire) {
            return Err(SqlSerialError::UseAfterClose);
        }
        self.queue.submit_and_wait(work)
    }

    /// Run `attempt` until it succeeds, fails with a non-transient error, or the configured
    /// number of attempts is used up. Every attempt is a fresh queue submission; the wait
    /// between attempts happens on the calling thread, so other queued work keeps flowing.
    pub(crate) fn with_busy_retries<T>(
        &self,
        query: &str,
        mut attempt: impl FnMut() -> Result<T, SqlSerialError>,
    ) -> Result<T, SqlSerialError> {
        let attempts = self.shared.attempts();
        let delay = Duration::from_millis(self.options.retry_delay_ms);
        let mut tried = 1;
        loop {
            match attempt() {
                Err(err) if err.is_busy() && tried < attempts => {
                    if self.shared.should_log() {
                        tracing::debug!(query, attempt = tried, attempts, code = err.code(), "database busy; retrying");
                    }
                    tried += 1;
                    if !delay.is_zero() {
                        thread::sleep(delay);
                    }
                }
                other => return other,
            }
        }
    }

    fn track<T>(&self, context: &str, result: Result<T, SqlSerialError>) -> Result<T, SqlSerialError> {
        self.shared.record_outcome(&result);
        if let Err(err) = &result {
            if self.shared.should_log() {
                tracing::warn!(query = context, code = err.code(), error = %err, "database call failed");
            }
        }
        result
    }
}

impl Drop for DatabaseInner {
    fn drop(&mut self) {
        if !self.closed.swap(true, Ordering::AcqRel) {
            self.queue.request_shutdown();
        }
    }
}

impl Database {
    /// Open (creating if absent) the database file at `path`.
    ///
    /// # Errors
    /// Returns [`SqlSerialError::OpenError`] if the file cannot be opened or is not a database.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, SqlSerialError> {
        Self::open_with_options(DatabaseOptions::new(
            path.as_ref().to_string_lossy().into_owned(),
        ))
    }

    /// Open a private in-memory database.
    ///
    /// # Errors
    /// Returns [`SqlSerialError::OpenError`] if the engine cannot allocate the database.
    pub fn open_in_memory() -> Result<Self, SqlSerialError> {
        Self::open_with_options(DatabaseOptions::new(":memory:".into()))
    }

    #[must_use]
    pub fn builder(db_path: impl Into<String>) -> DatabaseOptionsBuilder {
        DatabaseOptionsBuilder::new(db_path.into())
    }

    /// Open a database with explicit options.
    ///
    /// # Errors
    /// Returns [`SqlSerialError::ConfigError`] for invalid options and
    /// [`SqlSerialError::OpenError`] if the database cannot be opened.
    pub fn open_with_options(options: DatabaseOptions) -> Result<Self, SqlSerialError> {
        options.validate()?;
        let shared = Arc::new(Shared::new(
            options.should_log,
            options.number_of_attempts_to_try,
        ));
        let queue = ExecutionQueue::spawn(options.clone(), Arc::clone(&shared))?;
        let inner = Arc::new(DatabaseInner {
            options,
            queue,
            shared,
            closed: AtomicBool::new(false),
        });
        let owner = Arc::downgrade(&inner);
        inner.submit(move |session: &mut Session<'_>| {
            session.attach(owner);
            Ok(())
        })?;
        if inner.shared.should_log() {
            tracing::debug!(path = %inner.options.db_path, "opened database");
        }
        Ok(Self { inner })
    }

    /// The path (or `:memory:`) this database was opened with.
    #[must_use]
    pub fn path(&self) -> &str {
        &self.inner.options.db_path
    }

    /// Execute a statement and return the number of rows it changed.
    ///
    /// Transient busy/locked failures are retried up to
    /// [`number_of_attempts_to_try`](Self::number_of_attempts_to_try) times with the same
    /// bound values. [`identifier_of_last_insert`](Self::identifier_of_last_insert) and
    /// [`number_of_changes`](Self::number_of_changes) are refreshed on success.
    ///
    /// # Errors
    /// Returns [`SqlSerialError::PrepareError`], [`SqlSerialError::BindError`] or
    /// [`SqlSerialError::SqlError`] from the engine, or [`SqlSerialError::UseAfterClose`].
    pub fn execute_update(
        &self,
        query: &str,
        params: &[RowValues],
    ) -> Result<usize, SqlSerialError> {
        let values = convert_params(params);
        let result = self.inner.with_busy_retries(query, || {
            let query = query.to_owned();
            let values = values.clone();
            self.inner
                .submit(move |session: &mut Session<'_>| session.update_values(&query, &values))
        });
        self.inner.track(query, result)
    }

    /// Execute a query and return a cursor over its rows.
    ///
    /// The result set is registered with this database before it is returned and holds its
    /// statement until closed.
    ///
    /// # Errors
    /// Returns [`SqlSerialError::PrepareError`], [`SqlSerialError::BindError`] or
    /// [`SqlSerialError::SqlError`] from the engine, or [`SqlSerialError::UseAfterClose`].
    pub fn execute_query(
        &self,
        query: &str,
        params: &[RowValues],
    ) -> Result<ResultSet, SqlSerialError> {
        let values = convert_params(params);
        let result = self.inner.with_busy_retries(query, || {
            let query = query.to_owned();
            let values = values.clone();
            self.inner
                .submit(move |session: &mut Session<'_>| session.query_values(&query, values))
        });
        self.inner.track(query, result)
    }

    /// [`execute_update`](Self::execute_update) reporting only success; the error stays
    /// available through [`last_error_code`](Self::last_error_code).
    pub fn try_execute_update(&self, query: &str, params: &[RowValues]) -> bool {
        self.execute_update(query, params).is_ok()
    }

    /// [`execute_query`](Self::execute_query) returning `None` on failure.
    pub fn try_execute_query(&self, query: &str, params: &[RowValues]) -> Option<ResultSet> {
        self.execute_query(query, params).ok()
    }

    /// `BEGIN`
    ///
    /// # Errors
    /// Returns the engine error, e.g. when a transaction is already open.
    pub fn begin_transaction(&self) -> Result<(), SqlSerialError> {
        self.execute_update("BEGIN", &[]).map(|_| ())
    }

    /// `BEGIN DEFERRED`
    ///
    /// # Errors
    /// Returns the engine error, e.g. when a transaction is already open.
    pub fn begin_deferred_transaction(&self) -> Result<(), SqlSerialError> {
        self.execute_update("BEGIN DEFERRED", &[]).map(|_| ())
    }

    /// `COMMIT`
    ///
    /// # Errors
    /// Returns the engine error, e.g. when no transaction is open.
    pub fn commit(&self) -> Result<(), SqlSerialError> {
        self.execute_update("COMMIT", &[]).map(|_| ())
    }

    /// `ROLLBACK`
    ///
    /// # Errors
    /// Returns the engine error, e.g. when no transaction is open.
    pub fn rollback(&self) -> Result<(), SqlSerialError> {
        self.execute_update("ROLLBACK", &[]).map(|_| ())
    }

    pub fn try_begin_transaction(&self) -> bool {
        self.begin_transaction().is_ok()
    }

    pub fn try_begin_deferred_transaction(&self) -> bool {
        self.begin_deferred_transaction().is_ok()
    }

    pub fn try_commit(&self) -> bool {
        self.commit().is_ok()
    }

    pub fn try_rollback(&self) -> bool {
        self.rollback().is_ok()
    }

    /// Whether the connection is inside an explicit transaction.
    ///
    /// # Errors
    /// Returns [`SqlSerialError::UseAfterClose`] once closed.
    pub fn in_transaction(&self) -> Result<bool, SqlSerialError> {
        let result = self
            .inner
            .submit(|session: &mut Session<'_>| Ok(session.in_transaction()));
        self.inner.track("in_transaction", result)
    }

    /// Run `work` as a single queued operation. Calls made on the [`Session`] run inline, in
    /// order, with nothing from other threads interleaved.
    ///
    /// # Errors
    /// Propagates the error returned by `work`, [`SqlSerialError::UseAfterClose`], or
    /// [`SqlSerialError::ReentrantCall`] if called from inside queued work.
    pub fn with_session<F, R>(&self, work: F) -> Result<R, SqlSerialError>
    where
        F: for<'conn> FnOnce(&mut Session<'conn>) -> Result<R, SqlSerialError> + Send + 'static,
        R: Send + 'static,
    {
        let result = self.inner.submit(work);
        self.inner.track("with_session", result)
    }

    /// Rowid of the most recent successful insert, as of the last update run through the queue.
    ///
    /// # Errors
    /// Returns [`SqlSerialError::UseAfterClose`] once closed.
    pub fn identifier_of_last_insert(&self) -> Result<i64, SqlSerialError> {
        self.ensure_open()?;
        Ok(self.inner.shared.snapshot().last_insert_rowid)
    }

    /// Rows changed by the most recent update run through the queue.
    ///
    /// # Errors
    /// Returns [`SqlSerialError::UseAfterClose`] once closed.
    pub fn number_of_changes(&self) -> Result<usize, SqlSerialError> {
        self.ensure_open()?;
        Ok(self.inner.shared.snapshot().changes)
    }

    fn ensure_open(&self) -> Result<(), SqlSerialError> {
        if self.is_closed() {
            Err(SqlSerialError::UseAfterClose)
        } else {
            Ok(())
        }
    }

    #[must_use]
    pub fn has_encountered_error(&self) -> bool {
        self.inner.shared.snapshot().last_error.is_some()
    }

    /// Native code of the last failed call, or `SQLITE_OK` (0) if the last call succeeded.
    #[must_use]
    pub fn last_error_code(&self) -> i32 {
        self.inner
            .shared
            .snapshot()
            .last_error
            .map_or(rusqlite::ffi::SQLITE_OK, |(code, _)| code)
    }

    #[must_use]
    pub fn last_error_message(&self) -> Option<String> {
        self.inner
            .shared
            .snapshot()
            .last_error
            .map(|(_, message)| message)
    }

    #[must_use]
    pub fn number_of_attempts_to_try(&self) -> usize {
        self.inner.shared.attempts()
    }

    /// Values below 1 are treated as 1.
    ///
    /// # Errors
    /// Returns [`SqlSerialError::UseAfterClose`] once closed.
    pub fn set_number_of_attempts_to_try(&self, attempts: usize) -> Result<(), SqlSerialError> {
        self.ensure_open()?;
        self.inner.shared.set_attempts(attempts);
        Ok(())
    }

    #[must_use]
    pub fn should_log(&self) -> bool {
        self.inner.shared.should_log()
    }

    /// # Errors
    /// Returns [`SqlSerialError::UseAfterClose`] once closed.
    pub fn set_should_log(&self, should_log: bool) -> Result<(), SqlSerialError> {
        self.ensure_open()?;
        self.inner.shared.set_should_log(should_log);
        Ok(())
    }

    /// Finalize every cached statement whose use count is zero; statements held by open result
    /// sets are left alone. Returns how many were finalized.
    ///
    /// # Errors
    /// Returns [`SqlSerialError::UseAfterClose`] once closed.
    pub fn remove_unused_cached_statements(&self) -> Result<usize, SqlSerialError> {
        let result = self
            .inner
            .submit(|session: &mut Session<'_>| Ok(session.remove_unused_cached_statements()));
        self.inner.track("remove_unused_cached_statements", result)
    }

    /// # Errors
    /// Returns [`SqlSerialError::UseAfterClose`] once closed.
    pub fn cached_statement_count(&self) -> Result<usize, SqlSerialError> {
        self.inner
            .submit(|session: &mut Session<'_>| Ok(session.cached_statement_count()))
    }

    /// Use count of the cached statement for `query`, or `None` if it is not cached.
    ///
    /// # Errors
    /// Returns [`SqlSerialError::UseAfterClose`] once closed.
    pub fn statement_use_count(&self, query: &str) -> Result<Option<usize>, SqlSerialError> {
        let query = query.to_owned();
        self.inner
            .submit(move |session: &mut Session<'_>| Ok(session.statement_use_count(&query)))
    }

    /// Identity of the cached native statement for `query`; equal ids mean the same prepared
    /// statement was reused.
    ///
    /// # Errors
    /// Returns [`SqlSerialError::UseAfterClose`] once closed.
    pub fn cached_statement_id(&self, query: &str) -> Result<Option<u64>, SqlSerialError> {
        let query = query.to_owned();
        self.inner
            .submit(move |session: &mut Session<'_>| Ok(session.cached_statement_id(&query)))
    }

    /// # Errors
    /// Returns [`SqlSerialError::UseAfterClose`] once closed.
    pub fn open_result_set_count(&self) -> Result<usize, SqlSerialError> {
        self.inner
            .submit(|session: &mut Session<'_>| Ok(session.open_result_set_count()))
    }

    #[doc(hidden)]
    /// Make the next `count` statement steps fail with `SQLITE_BUSY`.
    ///
    /// # Errors
    /// Returns [`SqlSerialError::UseAfterClose`] once closed.
    pub fn force_busy_steps_for_tests(&self, count: usize) -> Result<(), SqlSerialError> {
        self.ensure_open()?;
        self.inner.shared.force_busy_steps(count);
        Ok(())
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }

    /// Hard shutdown: force-close every open result set, finalize every cached statement
    /// regardless of use count, and close the connection. Work queued before the call still
    /// runs first. A second call is a no-op.
    ///
    /// # Errors
    /// Returns the engine error if the connection refuses to close, or
    /// [`SqlSerialError::ReentrantCall`] if called from inside queued work.
    pub fn close(&self) -> Result<(), SqlSerialError> {
        if self.inner.queue.is_worker_thread() {
            return Err(SqlSerialError::ReentrantCall);
        }
        if self.inner.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        let result = self.inner.queue.shutdown();
        if self.inner.shared.should_log() {
            tracing::debug!(path = %self.inner.options.db_path, ok = result.is_ok(), "closed database");
        }
        self.inner.track("close", result)
    }
}

impl fmt::Debug for Database {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Database")
            .field("path", &self.inner.options.db_path)
            .field("closed", &self.is_closed())
            .finish()
    }
}
