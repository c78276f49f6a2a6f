use std::collections::HashMap;
use std::sync::{Arc, Weak};

use rusqlite::types::Value;
use rusqlite::{Connection, Statement};

use crate::binder::{bind_values, convert_params, sqlite_value_to_row_value};
use crate::cache::StatementCache;
use crate::database::DatabaseInner;
use crate::database::status::Shared;
use crate::error::SqlSerialError;
use crate::result_set::{CursorClaim, ResultSet};
use crate::types::RowValues;

/// Rows and column metadata captured from one execution of a cached statement.
pub(crate) struct Captured {
    pub(crate) columns: Arc<Vec<String>>,
    pub(crate) rows: Vec<Vec<RowValues>>,
}

struct LiveResultSet {
    query: String,
    claim: Weak<CursorClaim>,
}

/// Exclusive view of the connection, handed to work running on the execution queue.
///
/// A `Session` only exists on the queue thread. Operations called on it run inline, which is
/// how nested work composes without re-entering the queue:
///
/// ```rust,no_run
/// # use sql_serial::prelude::*;
/// # fn demo(db: &Database) -> Result<(), SqlSerialError> {
/// let moved = db.with_session(|session| {
///     session.execute_update("UPDATE account SET balance = balance - 10 WHERE id = ?", &[1i64.into()])?;
///     session.execute_update("UPDATE account SET balance = balance + 10 WHERE id = ?", &[2i64.into()])
/// })?;
/// # let _ = moved;
/// # Ok(())
/// # }
/// ```
pub struct Session<'conn> {
    conn: &'conn Connection,
    cache: StatementCache<'conn>,
    live: HashMap<u64, LiveResultSet>,
    next_result_set_id: u64,
    shared: Arc<Shared>,
    owner: Weak<DatabaseInner>,
}

impl<'conn> Session<'conn> {
    pub(crate) fn new(conn: &'conn Connection, shared: Arc<Shared>) -> Self {
        Self {
            conn,
            cache: StatementCache::new(),
            live: HashMap::new(),
            next_result_set_id: 1,
            shared,
            owner: Weak::new(),
        }
    }

    pub(crate) fn attach(&mut self, owner: Weak<DatabaseInner>) {
        self.owner = owner;
    }

    /// Execute a statement that is not expected to produce rows and return the change count.
    ///
    /// # Errors
    /// Returns [`SqlSerialError`] if preparing, binding or stepping fails.
    pub fn execute_update(
        &mut self,
        query: &str,
        params: &[RowValues],
    ) -> Result<usize, SqlSerialError> {
        self.update_values(query, &convert_params(params))
    }

    /// Execute a query and capture it as a [`ResultSet`].
    ///
    /// # Errors
    /// Returns [`SqlSerialError`] if preparing, binding or stepping fails.
    pub fn execute_query(
        &mut self,
        query: &str,
        params: &[RowValues],
    ) -> Result<ResultSet, SqlSerialError> {
        self.query_values(query, convert_params(params))
    }

    /// Run one or more `;`-separated statements, bypassing the statement cache.
    ///
    /// # Errors
    /// Returns [`SqlSerialError::SqlError`] if any statement fails.
    pub fn execute_batch(&mut self, sql: &str) -> Result<(), SqlSerialError> {
        if self.shared.should_log() {
            tracing::debug!(sql, "executing batch");
        }
        self.conn
            .execute_batch(sql)
            .map_err(|err| SqlSerialError::step(&err))
    }

    /// True while a transaction opened with `BEGIN` is pending.
    #[must_use]
    pub fn in_transaction(&self) -> bool {
        !self.conn.is_autocommit()
    }

    /// Rowid of the most recent successful insert on this connection.
    #[must_use]
    pub fn identifier_of_last_insert(&self) -> i64 {
        self.conn.last_insert_rowid()
    }

    #[must_use]
    pub fn cached_statement_count(&self) -> usize {
        self.cache.len()
    }

    #[must_use]
    pub fn statement_use_count(&self, query: &str) -> Option<usize> {
        self.cache.use_count(query)
    }

    /// Identity of the cached native statement for `query`, if one is cached.
    #[must_use]
    pub fn cached_statement_id(&mut self, query: &str) -> Option<u64> {
        self.cache.get_mut(query).map(|entry| entry.id())
    }

    #[must_use]
    pub fn open_result_set_count(&self) -> usize {
        self.live.len()
    }

    /// Finalize every cached statement that no result set is using.
    pub fn remove_unused_cached_statements(&mut self) -> usize {
        let removed = self.cache.remove_unused();
        if self.shared.should_log() {
            tracing::debug!(removed, remaining = self.cache.len(), "pruned statement cache");
        }
        removed
    }

    pub(crate) fn update_values(
        &mut self,
        query: &str,
        values: &[Value],
    ) -> Result<usize, SqlSerialError> {
        if self.shared.should_log() {
            tracing::debug!(query, params = values.len(), "executing update");
        }
        let entry = self.cache.statement_for_query(self.conn, query)?;
        let stepped = step_to_completion(&self.shared, entry.statement_mut(), values);
        self.cache.release(query);
        stepped?;

        // Read back inside the same queued operation so no other statement can interleave.
        let changes = usize::try_from(self.conn.changes()).unwrap_or(usize::MAX);
        self.shared
            .record_step(changes, self.conn.last_insert_rowid());
        Ok(changes)
    }

    pub(crate) fn query_values(
        &mut self,
        query: &str,
        values: Vec<Value>,
    ) -> Result<ResultSet, SqlSerialError> {
        if self.shared.should_log() {
            tracing::debug!(query, params = values.len(), "executing query");
        }
        let entry = self.cache.statement_for_query(self.conn, query)?;
        let captured = match capture_rows(&self.shared, entry.statement_mut(), &values) {
            Ok(captured) => captured,
            Err(err) => {
                self.cache.release(query);
                return Err(err);
            }
        };

        let id = self.next_result_set_id;
        self.next_result_set_id = self.next_result_set_id.saturating_add(1);
        let claim = Arc::new(CursorClaim::default());
        self.live.insert(
            id,
            LiveResultSet {
                query: query.to_owned(),
                claim: Arc::downgrade(&claim),
            },
        );
        Ok(ResultSet::new(
            id,
            query.to_owned(),
            values,
            captured,
            claim,
            self.owner.clone(),
        ))
    }

    /// Re-bind and re-step the statement a live result set is holding, without re-preparing.
    pub(crate) fn rerun_result_set(
        &mut self,
        id: u64,
        values: &[Value],
    ) -> Result<Captured, SqlSerialError> {
        let query = self
            .live
            .get(&id)
            .map(|live| live.query.clone())
            .ok_or(SqlSerialError::UseAfterClose)?;
        let entry = self
            .cache
            .get_mut(&query)
            .ok_or(SqlSerialError::UseAfterClose)?;
        capture_rows(&self.shared, entry.statement_mut(), values)
    }

    /// Drop a result set from the live registry and give back its claim on the statement.
    pub(crate) fn finished_using_result_set(&mut self, id: u64) {
        if let Some(live) = self.live.remove(&id) {
            self.decrement_usage_of_statement(&live.query);
        }
    }

    fn decrement_usage_of_statement(&mut self, query: &str) {
        if !self.cache.release(query) && self.shared.should_log() {
            tracing::warn!(query, "released a statement that was not checked out");
        }
    }

    /// Hard stop: force-close every live result set and finalize every cached statement.
    pub(crate) fn shutdown(&mut self) {
        for (_, live) in self.live.drain() {
            if let Some(claim) = live.claim.upgrade() {
                claim.force_close();
            }
        }
        let finalized = self.cache.finalize_all();
        if self.shared.should_log() {
            tracing::debug!(finalized, "finalized cached statements on close");
        }
    }
}

fn check_forced_busy(shared: &Shared) -> Result<(), SqlSerialError> {
    if shared.take_forced_busy() {
        Err(SqlSerialError::busy())
    } else {
        Ok(())
    }
}

fn step_to_completion(
    shared: &Shared,
    stmt: &mut Statement<'_>,
    values: &[Value],
) -> Result<(), SqlSerialError> {
    bind_values(stmt, values)?;
    check_forced_busy(shared)?;
    let mut rows = stmt.raw_query();
    while rows
        .next()
        .map_err(|err| SqlSerialError::step(&err))?
        .is_some()
    {}
    Ok(())
}

fn capture_rows(
    shared: &Shared,
    stmt: &mut Statement<'_>,
    values: &[Value],
) -> Result<Captured, SqlSerialError> {
    bind_values(stmt, values)?;
    check_forced_busy(shared)?;
    let columns: Vec<String> = stmt
        .column_names()
        .into_iter()
        .map(str::to_owned)
        .collect();
    let col_count = columns.len();

    let mut rows_iter = stmt.raw_query();
    let mut rows = Vec::new();
    while let Some(row) = rows_iter.next().map_err(|err| SqlSerialError::step(&err))? {
        let mut row_values = Vec::with_capacity(col_count);
        for idx in 0..col_count {
            let value = row.get_ref(idx).map_err(|err| SqlSerialError::step(&err))?;
            row_values.push(sqlite_value_to_row_value(value));
        }
        rows.push(row_values);
    }

    Ok(Captured {
        columns: Arc::new(columns),
        rows,
    })
}
