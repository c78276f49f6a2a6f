use tokio::sync::oneshot;

use crate::error::SqlSerialError;
use crate::session::Session;

/// Work that runs on the queue worker with exclusive access to the session.
pub(crate) type Job = Box<dyn for<'conn> FnOnce(&mut Session<'conn>) + Send>;

pub(crate) enum Command {
    Run(Job),
    Shutdown {
        respond_to: oneshot::Sender<Result<(), SqlSerialError>>,
    },
}
