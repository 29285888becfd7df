//! Dedicated thread that owns the serial link.
//!
//! Exchanges block, so they never run on the intake task. Jobs arrive in
//! order over a channel and completions go back tagged with their
//! correlation id. A job the dispatcher already gave up on still runs to
//! the end; its completion simply no longer matches anything.

use std::panic::{self, AssertUnwindSafe};
use std::thread;
use std::time::Instant;

use tokio::sync::mpsc;
use tracing::{debug, error, info};
use uuid::Uuid;

use crate::error::{RemoteError, SerialErrorKind};
use crate::serial::SerialLink;

/// A command handed to the serial worker.
#[derive(Debug, Clone)]
pub struct SerialJob {
    pub id: Uuid,
    pub command: String,
}

/// Result of one serial exchange.
#[derive(Debug)]
pub struct SerialCompletion {
    pub id: Uuid,
    pub result: Result<Vec<String>, RemoteError>,
}

/// Channel ends connecting the dispatcher to a running worker.
pub struct SerialWorker {
    pub jobs: mpsc::UnboundedSender<SerialJob>,
    pub completions: mpsc::UnboundedReceiver<SerialCompletion>,
    pub handle: thread::JoinHandle<()>,
}

/// Start the worker thread. It exits when the job sender is dropped or
/// the link panics.
pub fn spawn_serial_worker<L>(mut link: L) -> Result<SerialWorker, RemoteError>
where
    L: SerialLink + 'static,
{
    let (jobs_tx, mut jobs_rx) = mpsc::unbounded_channel::<SerialJob>();
    let (completions_tx, completions_rx) = mpsc::unbounded_channel();

    let handle = thread::Builder::new()
        .name("serial-worker".to_string())
        .spawn(move || {
            while let Some(job) = jobs_rx.blocking_recv() {
                let start = Instant::now();
                let outcome = panic::catch_unwind(AssertUnwindSafe(|| link.exchange(&job.command)));

                let (result, poisoned) = match outcome {
                    Ok(result) => (result, false),
                    Err(_) => (
                        Err(RemoteError::serial(SerialErrorKind::Disconnected {
                            message: "serial link panicked".to_string(),
                        })),
                        true,
                    ),
                };

                debug!(
                    id = %job.id,
                    ok = result.is_ok(),
                    duration_ms = start.elapsed().as_millis() as u64,
                    "Serial exchange finished"
                );

                if completions_tx.send(SerialCompletion { id: job.id, result }).is_err() {
                    break;
                }
                if poisoned {
                    error!("Serial link panicked, stopping serial worker");
                    return;
                }
            }
            info!("Serial worker stopped");
        })?;

    Ok(SerialWorker {
        jobs: jobs_tx,
        completions: completions_rx,
        handle,
    })
}
