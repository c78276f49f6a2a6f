//! Sugar layered on top of the core `execute_update` / `execute_query` calls.

use crate::database::Database;
use crate::error::SqlSerialError;

/// Quote an identifier for direct inclusion in SQL text.
#[must_use]
pub fn quote_identifier(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

impl Database {
    /// `CREATE TABLE <table_name> (<columns>)` with the column list passed through verbatim.
    ///
    /// # Errors
    /// Returns the engine error if the statement fails.
    pub fn create_table(&self, table_name: &str, columns: &str) -> Result<(), SqlSerialError> {
        let sql = format!("CREATE TABLE {} ({columns})", quote_identifier(table_name));
        self.execute_update(&sql, &[]).map(|_| ())
    }

    /// `CREATE TABLE` from `(column name, declared type / constraints)` pairs, in order.
    ///
    /// # Errors
    /// Returns [`SqlSerialError::ConfigError`] for an empty column list, or the engine error.
    pub fn create_table_with_columns(
        &self,
        table_name: &str,
        columns: &[(&str, &str)],
    ) -> Result<(), SqlSerialError> {
        if columns.is_empty() {
            return Err(SqlSerialError::ConfigError(format!(
                "table {table_name} needs at least one column"
            )));
        }
        let definitions = columns
            .iter()
            .map(|(name, decl)| format!("{} {decl}", quote_identifier(name)).trim_end().to_owned())
            .collect::<Vec<_>>()
            .join(", ");
        self.create_table(table_name, &definitions)
    }

    /// `MAX(column)` as an integer; 0 for an empty table.
    ///
    /// # Errors
    /// Returns the engine error if the query fails.
    pub fn largest_integer_for_column(
        &self,
        column_name: &str,
        table_name: &str,
    ) -> Result<i64, SqlSerialError> {
        let mut rs = self.execute_query(&max_query(column_name, table_name), &[])?;
        let value = if rs.next_row() {
            rs.int64_for_column_at_index(0)
        } else {
            0
        };
        rs.close();
        Ok(value)
    }

    /// `MAX(column)` as a double; 0.0 for an empty table.
    ///
    /// # Errors
    /// Returns the engine error if the query fails.
    pub fn largest_double_for_column(
        &self,
        column_name: &str,
        table_name: &str,
    ) -> Result<f64, SqlSerialError> {
        let mut rs = self.execute_query(&max_query(column_name, table_name), &[])?;
        let value = if rs.next_row() {
            rs.double_for_column_at_index(0)
        } else {
            0.0
        };
        rs.close();
        Ok(value)
    }
}

fn max_query(column_name: &str, table_name: &str) -> String {
    format!(
        "SELECT MAX({}) FROM {}",
        quote_identifier(column_name),
        quote_identifier(table_name)
    )
}
