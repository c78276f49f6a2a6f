use std::collections::HashMap;

use rusqlite::{Connection, Statement};

use crate::error::SqlSerialError;

/// One prepared form of a query string, checked out by use count rather than ownership.
pub(crate) struct CachedStatement<'conn> {
    id: u64,
    statement: Statement<'conn>,
    use_count: usize,
}

impl<'conn> CachedStatement<'conn> {
    /// Identity of the native prepared statement; stable for as long as the entry stays cached.
    pub(crate) fn id(&self) -> u64 {
        self.id
    }

    pub(crate) fn use_count(&self) -> usize {
        self.use_count
    }

    pub(crate) fn statement_mut(&mut self) -> &mut Statement<'conn> {
        &mut self.statement
    }
}

/// Prepared statements keyed by exact query text.
///
/// No size bound and no automatic eviction: entries live until [`remove_unused`] prunes the
/// ones nobody is using, or [`finalize_all`] tears everything down on close.
///
/// [`remove_unused`]: StatementCache::remove_unused
/// [`finalize_all`]: StatementCache::finalize_all
pub(crate) struct StatementCache<'conn> {
    entries: HashMap<String, CachedStatement<'conn>>,
    next_id: u64,
}

impl<'conn> StatementCache<'conn> {
    pub(crate) fn new() -> Self {
        Self {
            entries: HashMap::new(),
            next_id: 1,
        }
    }

    /// Check out the statement for `query`, preparing it on a miss, and bump its use count.
    ///
    /// Keys compare verbatim: `"SELECT 1"` and `"select 1"` are two entries.
    ///
    /// # Errors
    /// Returns [`SqlSerialError::PrepareError`] when the engine refuses the text.
    pub(crate) fn statement_for_query(
        &mut self,
        conn: &'conn Connection,
        query: &str,
    ) -> Result<&mut CachedStatement<'conn>, SqlSerialError> {
        if !self.entries.contains_key(query) {
            if is_blank_sql(query) {
                return Err(SqlSerialError::empty_statement(query));
            }
            let statement = conn
                .prepare(query)
                .map_err(|err| SqlSerialError::prepare(query, &err))?;
            let id = self.next_id;
            self.next_id = self.next_id.saturating_add(1);
            self.entries.insert(
                query.to_owned(),
                CachedStatement {
                    id,
                    statement,
                    use_count: 0,
                },
            );
        }
        let entry = self
            .entries
            .get_mut(query)
            .ok_or_else(|| SqlSerialError::ConnectionError("statement cache lost entry".into()))?;
        entry.use_count += 1;
        Ok(entry)
    }

    /// Look up a cached statement without touching its use count.
    pub(crate) fn get_mut(&mut self, query: &str) -> Option<&mut CachedStatement<'conn>> {
        self.entries.get_mut(query)
    }

    /// Give back one claim on `query`. Returns false if nothing was checked out.
    pub(crate) fn release(&mut self, query: &str) -> bool {
        match self.entries.get_mut(query) {
            Some(entry) if entry.use_count > 0 => {
                entry.use_count -= 1;
                true
            }
            _ => false,
        }
    }

    pub(crate) fn use_count(&self, query: &str) -> Option<usize> {
        self.entries.get(query).map(CachedStatement::use_count)
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    /// Finalize and drop every entry whose use count is exactly zero.
    pub(crate) fn remove_unused(&mut self) -> usize {
        let unused: Vec<String> = self
            .entries
            .iter()
            .filter(|(_, entry)| entry.use_count == 0)
            .map(|(query, _)| query.clone())
            .collect();
        for query in &unused {
            if let Some(entry) = self.entries.remove(query) {
                // finalize reports the last step error, which has already been surfaced
                let _ = entry.statement.finalize();
            }
        }
        unused.len()
    }

    /// Finalize every entry regardless of use count.
    pub(crate) fn finalize_all(&mut self) -> usize {
        let count = self.entries.len();
        for (_, entry) in self.entries.drain() {
            let _ = entry.statement.finalize();
        }
        count
    }
}

/// True when `sql` holds nothing the engine would compile: whitespace, `;` and comments only.
fn is_blank_sql(sql: &str) -> bool {
    let mut rest = sql;
    loop {
        rest = rest.trim_start_matches(|c: char| c.is_whitespace() || c == ';');
        if let Some(after) = rest.strip_prefix("--") {
            rest = after.find('\n').map_or("", |idx| &after[idx + 1..]);
        } else if let Some(after) = rest.strip_prefix("/*") {
            // an unterminated block comment runs to the end of the text
            rest = after.find("*/").map_or("", |idx| &after[idx + 2..]);
        } else {
            return rest.is_empty();
        }
    }
}
