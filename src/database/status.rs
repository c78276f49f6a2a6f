use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard};

use crate::error::SqlSerialError;

/// Engine bookkeeping read back by [`Database`](crate::Database) status accessors.
#[derive(Debug, Clone, Default)]
pub(crate) struct DatabaseStatus {
    pub(crate) last_insert_rowid: i64,
    pub(crate) changes: usize,
    pub(crate) last_error: Option<(i32, String)>,
}

/// State shared between the public handle and the queue worker.
///
/// `changes` and `last_insert_rowid` are written only from inside queued work, so their values
/// follow queue order.
#[derive(Debug)]
pub(crate) struct Shared {
    status: Mutex<DatabaseStatus>,
    should_log: AtomicBool,
    attempts: AtomicUsize,
    forced_busy_steps: AtomicUsize,
}

impl Shared {
    pub(crate) fn new(should_log: bool, attempts: usize) -> Self {
        Self {
            status: Mutex::new(DatabaseStatus::default()),
            should_log: AtomicBool::new(should_log),
            attempts: AtomicUsize::new(attempts.max(1)),
            forced_busy_steps: AtomicUsize::new(0),
        }
    }

    fn status(&self) -> MutexGuard<'_, DatabaseStatus> {
        match self.status.lock() {
            Ok(guard) => guard,
            // Clear the poison and continue with the recovered data
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    pub(crate) fn snapshot(&self) -> DatabaseStatus {
        self.status().clone()
    }

    pub(crate) fn record_step(&self, changes: usize, last_insert_rowid: i64) {
        let mut status = self.status();
        status.changes = changes;
        status.last_insert_rowid = last_insert_rowid;
    }

    pub(crate) fn record_outcome<T>(&self, result: &Result<T, SqlSerialError>) {
        let mut status = self.status();
        status.last_error = result
            .as_ref()
            .err()
            .map(|err| (err.code(), err.message()));
    }

    pub(crate) fn should_log(&self) -> bool {
        self.should_log.load(Ordering::Relaxed)
    }

    pub(crate) fn set_should_log(&self, value: bool) {
        self.should_log.store(value, Ordering::Relaxed);
    }

    pub(crate) fn attempts(&self) -> usize {
        self.attempts.load(Ordering::Relaxed)
    }

    pub(crate) fn set_attempts(&self, attempts: usize) {
        self.attempts.store(attempts.max(1), Ordering::Relaxed);
    }

    pub(crate) fn force_busy_steps(&self, count: usize) {
        self.forced_busy_steps.store(count, Ordering::SeqCst);
    }

    /// Consume one injected busy step, if any are pending.
    pub(crate) fn take_forced_busy(&self) -> bool {
        self.forced_busy_steps
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}
