use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::sync::mpsc::Receiver;
use std::time::Duration;

use rusqlite::Connection;
use tokio::sync::oneshot;

use crate::config::DatabaseOptions;
use crate::database::status::Shared;
use crate::error::SqlSerialError;
use crate::session::Session;

use super::channel::Command;
use super::panic_message;

/// Body of the queue thread: open the connection, then run commands in arrival order until
/// shutdown or until every sender is gone.
pub(super) fn run_worker(
    options: &DatabaseOptions,
    shared: Arc<Shared>,
    receiver: &Receiver<Command>,
    ready: oneshot::Sender<Result<(), SqlSerialError>>,
) {
    let conn = match open_connection(options) {
        Ok(conn) => conn,
        Err(err) => {
            let _ = ready.send(Err(err));
            return;
        }
    };
    if ready.send(Ok(())).is_err() {
        return;
    }
    tracing::trace!(path = %options.db_path, "execution queue started");

    let mut session = Session::new(&conn, shared);
    let mut shutdown_reply = None;
    while let Ok(command) = receiver.recv() {
        match command {
            Command::Run(job) => {
                if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(|| job(&mut session))) {
                    tracing::warn!(
                        path = %options.db_path,
                        panic = %panic_message(payload.as_ref()),
                        "queued work panicked"
                    );
                }
            }
            Command::Shutdown { respond_to } => {
                shutdown_reply = Some(respond_to);
                break;
            }
        }
    }

    session.shutdown();
    drop(session);
    let closed = conn
        .close()
        .map_err(|(_, err)| SqlSerialError::step(&err));
    tracing::trace!(path = %options.db_path, ok = closed.is_ok(), "execution queue stopped");
    if let Some(respond_to) = shutdown_reply {
        let _ = respond_to.send(closed);
    }
}

fn open_connection(options: &DatabaseOptions) -> Result<Connection, SqlSerialError> {
    let path = options.db_path.as_str();
    let open_error = |err: rusqlite::Error| SqlSerialError::open(path, &err);

    let conn = Connection::open(path).map_err(open_error)?;
    conn.busy_timeout(Duration::from_millis(options.busy_timeout_ms))
        .map_err(open_error)?;
    // SQLite opens lazily; touch the schema so a non-database file fails here, not later.
    conn.query_row("SELECT count(*) FROM sqlite_master", [], |row| {
        row.get::<_, i64>(0)
    })
    .map_err(open_error)?;
    if options.wal {
        conn.execute_batch("PRAGMA journal_mode = WAL;")
            .map_err(open_error)?;
    }
    Ok(conn)
}
