//! Convenient imports for common functionality.

pub use crate::config::{DatabaseOptions, DatabaseOptionsBuilder};
pub use crate::database::Database;
pub use crate::error::SqlSerialError;
pub use crate::result_set::{CursorState, ResultSet};
pub use crate::session::Session;
pub use crate::types::RowValues;
