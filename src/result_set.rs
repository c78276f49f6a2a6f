use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock, Weak};

use chrono::NaiveDateTime;
use rusqlite::types::Value;

use crate::binder::{blob_of, date_of, double_of, int32_of, int64_of, string_of};
use crate::database::DatabaseInner;
use crate::error::SqlSerialError;
use crate::session::{Captured, Session};
use crate::types::RowValues;

/// Where a [`ResultSet`] cursor currently sits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CursorState {
    /// Executed, not yet advanced.
    Created,
    /// Positioned on a row; column accessors return data.
    HasRow,
    /// Stepped past the last row.
    Exhausted,
    /// Closed by the caller or force-closed by [`Database::close`](crate::Database::close).
    Closed,
}

/// The result set's hold on its cached statement. The database keeps only a weak reference to
/// it, so it can force-close stragglers without owning them.
#[derive(Debug, Default)]
pub(crate) struct CursorClaim {
    closed: AtomicBool,
}

impl CursorClaim {
    /// Mark closed; returns true if it was already closed.
    fn close(&self) -> bool {
        self.closed.swap(true, Ordering::AcqRel)
    }

    pub(crate) fn force_close(&self) {
        self.closed.store(true, Ordering::Release);
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

/// A cursor over one execution of a cached statement.
///
/// The statement's use count is held from the moment the query runs until [`close`] (or drop),
/// so the cache never finalizes it underneath the cursor. Column accessors are permissive:
/// outside of [`CursorState::HasRow`] they return the type's zero value or `None`.
///
/// [`close`]: ResultSet::close
pub struct ResultSet {
    id: u64,
    query: String,
    params: Vec<Value>,
    columns: Arc<Vec<String>>,
    lowered_columns: OnceLock<Vec<String>>,
    rows: Vec<Vec<RowValues>>,
    position: usize,
    state: CursorState,
    claim: Arc<CursorClaim>,
    database: Weak<DatabaseInner>,
}

impl ResultSet {
    pub(crate) fn new(
        id: u64,
        query: String,
        params: Vec<Value>,
        captured: Captured,
        claim: Arc<CursorClaim>,
        database: Weak<DatabaseInner>,
    ) -> Self {
        Self {
            id,
            query,
            params,
            columns: captured.columns,
            lowered_columns: OnceLock::new(),
            rows: captured.rows,
            position: 0,
            state: CursorState::Created,
            claim,
            database,
        }
    }

    /// Registry id of this result set within its database.
    #[must_use]
    pub fn id(&self) -> u64 {
        self.id
    }

    /// The SQL text this result set was executed from.
    #[must_use]
    pub fn query(&self) -> &str {
        &self.query
    }

    #[must_use]
    pub fn state(&self) -> CursorState {
        if self.claim.is_closed() {
            CursorState::Closed
        } else {
            self.state
        }
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.state() == CursorState::Closed
    }

    /// Advance to the next row. Returns false once the rows are exhausted or the set is closed.
    pub fn next_row(&mut self) -> bool {
        let next = match self.state() {
            CursorState::Created => 0,
            CursorState::HasRow => self.position + 1,
            CursorState::Exhausted | CursorState::Closed => return false,
        };
        if next < self.rows.len() {
            self.position = next;
            self.state = CursorState::HasRow;
            true
        } else {
            self.state = CursorState::Exhausted;
            false
        }
    }

    /// Re-run the same bound statement from the top, without re-preparing it.
    ///
    /// # Errors
    /// Returns [`SqlSerialError::UseAfterClose`] if this result set or its database is closed,
    /// or the engine error if stepping the statement fails.
    pub fn reset(&mut self) -> Result<(), SqlSerialError> {
        if self.is_closed() {
            return Err(SqlSerialError::UseAfterClose);
        }
        let inner = self
            .database
            .upgrade()
            .ok_or(SqlSerialError::UseAfterClose)?;
        let id = self.id;
        let params = self.params.clone();
        let captured = inner.with_busy_retries(&self.query, || {
            let params = params.clone();
            inner.submit(move |session: &mut Session<'_>| session.rerun_result_set(id, &params))
        })?;
        self.columns = captured.columns;
        self.lowered_columns = OnceLock::new();
        self.rows = captured.rows;
        self.position = 0;
        self.state = CursorState::Created;
        Ok(())
    }

    /// Release the statement and leave the database's registry. Idempotent; also run on drop.
    pub fn close(&mut self) {
        self.state = CursorState::Closed;
        self.rows = Vec::new();
        if self.claim.close() {
            return;
        }
        if let Some(inner) = self.database.upgrade() {
            let id = self.id;
            // Detached: FIFO order still puts the release ahead of anything this thread
            // submits next, and close never blocks (it also runs from Drop).
            let _ = inner.queue().submit_detached(move |session: &mut Session<'_>| {
                session.finished_using_result_set(id);
            });
        }
    }

    /// Drain the remaining rows into name/value maps.
    pub fn results(&mut self) -> Vec<BTreeMap<String, RowValues>> {
        let mut out = Vec::new();
        while self.next_row() {
            out.push(self.all_values_for_current_row());
        }
        out
    }

    /// The current row keyed by column name; the first column wins on duplicate names.
    #[must_use]
    pub fn all_values_for_current_row(&self) -> BTreeMap<String, RowValues> {
        let mut map = BTreeMap::new();
        if let Some(row) = self.current_row() {
            for (name, value) in self.columns.iter().zip(row) {
                map.entry(name.clone()).or_insert_with(|| value.clone());
            }
        }
        map
    }

    fn current_row(&self) -> Option<&Vec<RowValues>> {
        if self.state() == CursorState::HasRow {
            self.rows.get(self.position)
        } else {
            None
        }
    }

    fn value_at(&self, column_index: usize) -> Option<&RowValues> {
        self.current_row().and_then(|row| row.get(column_index))
    }

    fn value_named(&self, column_name: &str) -> Option<&RowValues> {
        self.index_of_column(column_name)
            .and_then(|idx| self.value_at(idx))
    }

    // Column metadata

    #[must_use]
    pub fn column_count(&self) -> usize {
        if self.is_closed() { 0 } else { self.columns.len() }
    }

    /// Column names in index order. Names need not be unique.
    #[must_use]
    pub fn column_names(&self) -> &[String] {
        if self.is_closed() { &[] } else { &self.columns }
    }

    /// Case-insensitive lookup; the lowest index wins on duplicates.
    #[must_use]
    pub fn index_of_column(&self, column_name: &str) -> Option<usize> {
        if self.is_closed() {
            return None;
        }
        let lowered = self
            .lowered_columns
            .get_or_init(|| self.columns.iter().map(|c| c.to_lowercase()).collect());
        let wanted = column_name.to_lowercase();
        lowered.iter().position(|col| *col == wanted)
    }

    #[must_use]
    pub fn index_of_column_case_sensitive(&self, column_name: &str) -> Option<usize> {
        if self.is_closed() {
            return None;
        }
        self.columns.iter().position(|col| col == column_name)
    }

    #[must_use]
    pub fn column_name_at_index(&self, column_index: usize) -> Option<&str> {
        self.column_names().get(column_index).map(String::as_str)
    }

    // Accessors by name

    #[must_use]
    pub fn column_is_null(&self, column_name: &str) -> bool {
        self.value_named(column_name).is_none_or(RowValues::is_null)
    }

    #[must_use]
    pub fn bool_for_column(&self, column_name: &str) -> bool {
        self.int64_for_column(column_name) != 0
    }

    #[must_use]
    pub fn integer_for_column(&self, column_name: &str) -> i64 {
        self.int64_for_column(column_name)
    }

    #[must_use]
    pub fn int32_for_column(&self, column_name: &str) -> i32 {
        self.value_named(column_name).map_or(0, int32_of)
    }

    #[must_use]
    pub fn int64_for_column(&self, column_name: &str) -> i64 {
        self.value_named(column_name).map_or(0, int64_of)
    }

    #[must_use]
    pub fn double_for_column(&self, column_name: &str) -> f64 {
        self.value_named(column_name).map_or(0.0, double_of)
    }

    #[must_use]
    pub fn string_for_column(&self, column_name: &str) -> Option<String> {
        self.value_named(column_name).and_then(string_of)
    }

    #[must_use]
    pub fn date_for_column(&self, column_name: &str) -> Option<NaiveDateTime> {
        self.value_named(column_name).and_then(date_of)
    }

    #[must_use]
    pub fn data_for_column(&self, column_name: &str) -> Option<Vec<u8>> {
        self.value_named(column_name).and_then(blob_of)
    }

    #[must_use]
    pub fn object_for_column(&self, column_name: &str) -> RowValues {
        self.value_named(column_name)
            .cloned()
            .unwrap_or(RowValues::Null)
    }

    // Accessors by index

    #[must_use]
    pub fn column_at_index_is_null(&self, column_index: usize) -> bool {
        self.value_at(column_index).is_none_or(RowValues::is_null)
    }

    #[must_use]
    pub fn bool_for_column_at_index(&self, column_index: usize) -> bool {
        self.int64_for_column_at_index(column_index) != 0
    }

    #[must_use]
    pub fn int32_for_column_at_index(&self, column_index: usize) -> i32 {
        self.value_at(column_index).map_or(0, int32_of)
    }

    #[must_use]
    pub fn int64_for_column_at_index(&self, column_index: usize) -> i64 {
        self.value_at(column_index).map_or(0, int64_of)
    }

    #[must_use]
    pub fn double_for_column_at_index(&self, column_index: usize) -> f64 {
        self.value_at(column_index).map_or(0.0, double_of)
    }

    #[must_use]
    pub fn string_for_column_at_index(&self, column_index: usize) -> Option<String> {
        self.value_at(column_index).and_then(string_of)
    }

    #[must_use]
    pub fn date_for_column_at_index(&self, column_index: usize) -> Option<NaiveDateTime> {
        self.value_at(column_index).and_then(date_of)
    }

    #[must_use]
    pub fn data_for_column_at_index(&self, column_index: usize) -> Option<Vec<u8>> {
        self.value_at(column_index).and_then(blob_of)
    }

    #[must_use]
    pub fn object_for_column_at_index(&self, column_index: usize) -> RowValues {
        self.value_at(column_index)
            .cloned()
            .unwrap_or(RowValues::Null)
    }
}

impl Drop for ResultSet {
    fn drop(&mut self) {
        self.close();
    }
}

impl fmt::Debug for ResultSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResultSet")
            .field("id", &self.id)
            .field("query", &self.query)
            .field("state", &self.state())
            .field("columns", &self.columns)
            .finish_non_exhaustive()
    }
}
