//! Serialized, statement-caching access to a single `SQLite` database.
//!
//! A [`Database`] owns one native connection on a dedicated queue thread. Prepared statements
//! are cached by exact query text and reference counted by the [`ResultSet`]s using them; every
//! operation, from `prepare` to `COMMIT`, runs on the queue in submission order.

pub mod binder;
pub mod config;
pub mod convenience_items;
pub mod prelude;
pub mod types;

mod cache;
mod database;
mod error;
mod queue;
mod result_set;
mod session;

pub use config::{DatabaseOptions, DatabaseOptionsBuilder};
pub use database::Database;
pub use error::SqlSerialError;
pub use result_set::{CursorState, ResultSet};
pub use session::Session;
pub use types::RowValues;
