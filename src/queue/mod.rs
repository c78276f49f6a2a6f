//! The serial execution queue.
//!
//! Every database has exactly one queue, backed by one dedicated thread that owns the native
//! connection. Callers hand work to the thread over a channel and block until it answers, so
//! the connection and the statement cache are only ever touched from that thread, in FIFO order.

mod channel;
mod worker;

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::mpsc::{self, Sender};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle, ThreadId};

use tokio::runtime::{Handle, RuntimeFlavor};
use tokio::sync::oneshot;
use tokio::task;

use crate::config::DatabaseOptions;
use crate::database::status::Shared;
use crate::error::SqlSerialError;
use crate::session::Session;

use channel::{Command, Job};
use worker::run_worker;

pub(crate) struct ExecutionQueue {
    sender: Sender<Command>,
    worker: ThreadId,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl ExecutionQueue {
    /// Spawn the worker thread and wait until it has opened the connection.
    ///
    /// # Errors
    /// Returns [`SqlSerialError::OpenError`] if the database cannot be opened, or
    /// [`SqlSerialError::ConnectionError`] if the thread cannot be spawned.
    pub(crate) fn spawn(
        options: DatabaseOptions,
        shared: Arc<Shared>,
    ) -> Result<Self, SqlSerialError> {
        blocking_context()?;
        let (sender, receiver) = mpsc::channel::<Command>();
        let (ready_tx, ready_rx) = oneshot::channel();
        let handle = thread::Builder::new()
            .name(format!("sql-serial-{}", thread_label(&options.db_path)))
            .spawn(move || run_worker(&options, shared, &receiver, ready_tx))
            .map_err(|err| {
                SqlSerialError::ConnectionError(format!(
                    "failed to spawn execution queue thread: {err}"
                ))
            })?;
        let worker = handle.thread().id();

        let opened = wait_blocking(|| ready_rx.blocking_recv()).and_then(|reply| {
            reply
                .map_err(|_| connection_error("execution queue exited before opening the database"))
                .and_then(|res| res)
        });
        if let Err(err) = opened {
            let _ = wait_blocking(|| handle.join());
            return Err(err);
        }

        Ok(Self {
            sender,
            worker,
            handle: Mutex::new(Some(handle)),
        })
    }

    /// True when called from the queue's own thread, i.e. from inside queued work.
    pub(crate) fn is_worker_thread(&self) -> bool {
        thread::current().id() == self.worker
    }

    /// Run `work` on the queue and block until it finishes, returning its result.
    ///
    /// # Errors
    /// Propagates the error returned by `work`. Returns [`SqlSerialError::ReentrantCall`] when
    /// called from inside queued work (waiting would deadlock; nested work uses the
    /// [`Session`] it was handed) and [`SqlSerialError::UseAfterClose`] once the queue has
    /// shut down.
    pub(crate) fn submit_and_wait<F, R>(&self, work: F) -> Result<R, SqlSerialError>
    where
        F: for<'conn> FnOnce(&mut Session<'conn>) -> Result<R, SqlSerialError> + Send + 'static,
        R: Send + 'static,
    {
        if self.is_worker_thread() {
            return Err(SqlSerialError::ReentrantCall);
        }
        blocking_context()?;
        let (tx, rx) = oneshot::channel();
        let job: Job = Box::new(move |session: &mut Session<'_>| {
            // A panicking closure must not take the worker (and the connection) down with it.
            let outcome = panic::catch_unwind(AssertUnwindSafe(|| work(session)))
                .unwrap_or_else(|payload| {
                    Err(SqlSerialError::ConnectionError(format!(
                        "queued work panicked: {}",
                        panic_message(payload.as_ref())
                    )))
                });
            let _ = tx.send(outcome);
        });
        self.send_command(Command::Run(job))?;
        wait_blocking(|| rx.blocking_recv())?.map_err(|_| SqlSerialError::UseAfterClose)?
    }

    /// Enqueue `work` without waiting for it. Safe to call from inside queued work; the job
    /// runs after the current one.
    pub(crate) fn submit_detached<F>(&self, work: F) -> Result<(), SqlSerialError>
    where
        F: for<'conn> FnOnce(&mut Session<'conn>) + Send + 'static,
    {
        let job: Job = Box::new(move |session: &mut Session<'_>| work(session));
        self.send_command(Command::Run(job))
    }

    /// Drain everything queued so far, tear the session down, close the connection and join
    /// the thread.
    ///
    /// # Errors
    /// Returns the engine error from closing the connection, or
    /// [`SqlSerialError::ReentrantCall`] when called from inside queued work.
    pub(crate) fn shutdown(&self) -> Result<(), SqlSerialError> {
        if self.is_worker_thread() {
            return Err(SqlSerialError::ReentrantCall);
        }
        blocking_context()?;
        let (tx, rx) = oneshot::channel();
        self.send_command(Command::Shutdown { respond_to: tx })?;
        let closed = wait_blocking(|| rx.blocking_recv())?
            .map_err(|_| connection_error("execution queue dropped while shutting down"))?;
        let handle = match self.handle.lock() {
            Ok(mut guard) => guard.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        if let Some(handle) = handle {
            wait_blocking(|| handle.join())?
                .map_err(|_| connection_error("execution queue thread panicked"))?;
        }
        closed
    }

    /// Ask the worker to stop without waiting; used when the last handle is dropped.
    pub(crate) fn request_shutdown(&self) {
        let (tx, _rx) = oneshot::channel();
        let _ = self.sender.send(Command::Shutdown { respond_to: tx });
    }

    fn send_command(&self, command: Command) -> Result<(), SqlSerialError> {
        self.sender
            .send(command)
            .map_err(|_| SqlSerialError::UseAfterClose)
    }
}

/// Whether the calling thread may block, and whether it is a tokio multi-thread worker.
///
/// Blocking inside a current-thread runtime would stall the very executor the caller runs on,
/// so that case is refused; wrap the call in `spawn_blocking` or a plain thread instead.
fn blocking_context() -> Result<bool, SqlSerialError> {
    match Handle::try_current() {
        Err(_) => Ok(false),
        Ok(handle) if handle.runtime_flavor() == RuntimeFlavor::MultiThread => Ok(true),
        Ok(_) => Err(connection_error(
            "cannot block inside a current-thread tokio runtime; call from a plain thread or a multi-thread runtime",
        )),
    }
}

/// Run a blocking wait, stepping out of the async executor first when called from a
/// multi-thread tokio runtime.
fn wait_blocking<T>(wait: impl FnOnce() -> T) -> Result<T, SqlSerialError> {
    if blocking_context()? {
        Ok(task::block_in_place(wait))
    } else {
        Ok(wait())
    }
}

pub(super) fn panic_message(payload: &(dyn Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|msg| (*msg).to_owned())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "non-string panic payload".to_owned())
}

fn connection_error(message: &str) -> SqlSerialError {
    SqlSerialError::ConnectionError(message.into())
}

fn thread_label(path: &str) -> String {
    std::path::Path::new(path)
        .file_name()
        .map_or_else(|| path.to_owned(), |name| name.to_string_lossy().into_owned())
}
