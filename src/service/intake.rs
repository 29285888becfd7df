//! Serialized intake loop.
//!
//! One task owns the verifier, the dispatcher and the signer. Inbound
//! messages, serial completions, deadlines and allowlist reloads are all
//! handled here in turn, so nonce recording and the busy check can never
//! race. Serial I/O happens on the worker thread.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{mpsc, watch, Notify};
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::audit::{AuditEntry, AuditLogger};
use crate::auth::{Allowlist, CommandVerifier, VerifiedCommand};
use crate::dispatch::{spawn_serial_worker, CommandDispatcher, Resolution, SerialCompletion, SerialWorker};
use crate::error::RemoteError;
use crate::protocol::ResponseOutcome;
use crate::serial::SerialLink;
use crate::signer::ResponseSigner;

use super::{CommandStage, Lifecycle, RejectReason, ServiceMetrics};

/// The remote-command channel.
pub struct RemoteService {
    verifier: CommandVerifier,
    dispatcher: CommandDispatcher,
    completions: mpsc::UnboundedReceiver<SerialCompletion>,
    signer: ResponseSigner,
    metrics: Arc<ServiceMetrics>,
    audit: Option<Arc<AuditLogger>>,
    in_flight: Option<Lifecycle>,
}

impl RemoteService {
    /// Build the service around an already running serial worker.
    pub fn new(
        verifier: CommandVerifier,
        signer: ResponseSigner,
        worker: SerialWorker,
        timeout: Duration,
    ) -> Self {
        let SerialWorker {
            jobs, completions, ..
        } = worker;

        Self {
            verifier,
            dispatcher: CommandDispatcher::new(jobs, timeout),
            completions,
            signer,
            metrics: Arc::new(ServiceMetrics::new()),
            audit: None,
            in_flight: None,
        }
    }

    /// Start a serial worker for `link` and build the service around it.
    pub fn with_link<L>(
        verifier: CommandVerifier,
        signer: ResponseSigner,
        link: L,
        timeout: Duration,
    ) -> Result<Self, RemoteError>
    where
        L: SerialLink + 'static,
    {
        let worker = spawn_serial_worker(link)?;
        Ok(Self::new(verifier, signer, worker, timeout))
    }

    pub fn with_audit(mut self, audit: Arc<AuditLogger>) -> Self {
        self.audit = Some(audit);
        self
    }

    pub fn metrics(&self) -> Arc<ServiceMetrics> {
        Arc::clone(&self.metrics)
    }

    /// Process messages until shutdown.
    ///
    /// Also returns once `inbound` is closed and no command is pending, so
    /// a dispatched command always gets its response before the loop ends.
    pub async fn run(
        mut self,
        mut inbound: mpsc::Receiver<Vec<u8>>,
        allowlist_updates: watch::Receiver<Arc<Allowlist>>,
        shutdown: Arc<Notify>,
    ) {
        let mut allowlist_updates = Some(allowlist_updates);
        let mut inbound_open = true;

        let shutdown_signal = shutdown.notified();
        tokio::pin!(shutdown_signal);
        shutdown_signal.as_mut().enable();

        info!(
            node = %self.signer.public_hex(),
            companions = self.verifier.allowlist().len(),
            timeout_ms = self.dispatcher.timeout().as_millis() as u64,
            "Remote command channel running"
        );

        loop {
            let deadline = self.dispatcher.deadline();

            tokio::select! {
                biased;

                _ = &mut shutdown_signal => {
                    info!("Shutdown signal received, stopping command intake");
                    self.abandon_pending();
                    break;
                }
                Some(completion) = self.completions.recv() => {
                    self.on_completion(completion);
                }
                _ = sleep_until_deadline(deadline) => {
                    self.on_deadline();
                }
                Some(allowlist) = next_allowlist(&mut allowlist_updates) => {
                    info!(companions = allowlist.len(), "Companion allowlist reloaded");
                    self.verifier.replace_allowlist(allowlist);
                }
                message = inbound.recv(), if inbound_open => {
                    match message {
                        Some(raw) => self.on_inbound(&raw),
                        None => {
                            info!("Inbound queue closed");
                            inbound_open = false;
                        }
                    }
                }
            }

            if !inbound_open && !self.dispatcher.is_busy() {
                break;
            }
        }

        let snapshot = self.metrics.snapshot();
        info!(
            received = snapshot.received,
            accepted = snapshot.accepted,
            rejected = snapshot.rejected(),
            busy = snapshot.busy,
            completed = snapshot.completed,
            timed_out = snapshot.timed_out,
            late_discarded = snapshot.late_discarded,
            abandoned = snapshot.abandoned,
            published = snapshot.published,
            publish_failed = snapshot.publish_failed,
            "Remote command channel stopped"
        );
    }

    fn on_inbound(&mut self, raw: &[u8]) {
        self.metrics.record_received();

        let mut lifecycle = Lifecycle::new();
        lifecycle.advance(CommandStage::Verifying);

        let command = match self.verifier.verify(raw) {
            Ok(command) => command,
            Err(e) => {
                let reason = RejectReason::from_error(&e);
                lifecycle.advance(CommandStage::Rejected(reason));
                self.metrics.record_rejection(reason);
                warn!(reason = reason.as_str(), error = %e, "Dropping inbound command");
                return;
            }
        };

        lifecycle.advance(CommandStage::Verified);
        self.metrics.record_accepted();
        lifecycle.advance(CommandStage::Dispatching);

        match self.dispatcher.submit(command.clone()) {
            Ok(_) => {
                self.in_flight = Some(lifecycle);
            }
            Err(RemoteError::Busy) => {
                lifecycle.advance(CommandStage::Busy);
                self.metrics.record_busy();
                info!(sender = %command.sender, nonce = %command.nonce, "Command rejected, slot busy");
                self.respond(lifecycle, Uuid::nil(), &command, ResponseOutcome::Busy, Duration::ZERO);
            }
            Err(e) => {
                lifecycle.advance(CommandStage::TimedOut);
                self.metrics.record_timed_out();
                let outcome = ResponseOutcome::TimedOut {
                    timeout_ms: self.dispatcher.timeout().as_millis() as u64,
                    fault: Some(e.to_string()),
                };
                self.respond(lifecycle, Uuid::nil(), &command, outcome, Duration::ZERO);
            }
        }
    }

    fn on_completion(&mut self, completion: SerialCompletion) {
        match self.dispatcher.complete(completion) {
            Some(resolution) => self.resolve(resolution),
            None => self.metrics.record_late(),
        }
    }

    fn on_deadline(&mut self) {
        if let Some(resolution) = self.dispatcher.expire(Instant::now()) {
            self.resolve(resolution);
        }
    }

    fn resolve(&mut self, resolution: Resolution) {
        let duration = resolution.duration(Instant::now());
        let mut lifecycle = self.in_flight.take().unwrap_or_else(|| {
            let mut lifecycle = Lifecycle::new();
            for stage in [
                CommandStage::Verifying,
                CommandStage::Verified,
                CommandStage::Dispatching,
            ] {
                lifecycle.advance(stage);
            }
            lifecycle
        });

        match &resolution.outcome {
            ResponseOutcome::Completed { .. } => {
                lifecycle.advance(CommandStage::Completed);
                self.metrics.record_completed();
            }
            ResponseOutcome::TimedOut { .. } => {
                lifecycle.advance(CommandStage::TimedOut);
                self.metrics.record_timed_out();
            }
            ResponseOutcome::Busy => {
                lifecycle.advance(CommandStage::Busy);
                self.metrics.record_busy();
            }
        }

        let Resolution { pending, outcome } = resolution;
        self.respond(lifecycle, pending.id, &pending.command, outcome, duration);
    }

    /// Drop the pending command at shutdown. It gets no response, only a
    /// log line and an audit entry.
    fn abandon_pending(&mut self) {
        let Some(pending) = self.dispatcher.abandon() else {
            return;
        };
        self.in_flight = None;
        self.metrics.record_abandoned();

        let duration = Instant::now().saturating_duration_since(pending.accepted_at);
        warn!(
            id = %pending.id,
            sender = %pending.command.sender,
            nonce = %pending.command.nonce,
            duration_ms = duration.as_millis() as u64,
            "Command abandoned at shutdown"
        );

        if let Some(audit) = &self.audit {
            let entry = AuditEntry::abandoned(pending.id, &pending.command, duration);
            if let Err(e) = audit.log(&entry) {
                error!(error = %e, "Failed to write audit log entry");
            }
        }
    }

    /// Sign and publish the response owed for `command`, then audit it.
    fn respond(
        &self,
        mut lifecycle: Lifecycle,
        request_id: Uuid,
        command: &VerifiedCommand,
        outcome: ResponseOutcome,
        duration: Duration,
    ) {
        if !lifecycle.stage().owes_response() {
            error!(stage = %lifecycle.stage(), "No response owed, not publishing");
            return;
        }

        match self.signer.publish(&command.nonce, &outcome) {
            Ok(_) => {
                lifecycle.advance(CommandStage::ResponsePublished);
                self.metrics.record_publish(true);
            }
            Err(e) => {
                self.metrics.record_publish(false);
                error!(nonce = %command.nonce, error = %e, "Failed to publish response");
            }
        }

        info!(
            id = %request_id,
            sender = %command.sender,
            command = %command.command,
            outcome = outcome.label(),
            duration_ms = duration.as_millis() as u64,
            "Command resolved"
        );

        if let Some(audit) = &self.audit {
            let entry = AuditEntry::resolved(request_id, command, &outcome, duration);
            if let Err(e) = audit.log(&entry) {
                error!(error = %e, "Failed to write audit log entry");
            }
        }
    }
}

async fn sleep_until_deadline(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(tokio::time::Instant::from_std(deadline)).await,
        None => std::future::pending().await,
    }
}

/// Next allowlist from the reload channel. Stays pending forever once the
/// sending side is gone.
async fn next_allowlist(
    updates: &mut Option<watch::Receiver<Arc<Allowlist>>>,
) -> Option<Arc<Allowlist>> {
    let Some(rx) = updates.as_mut() else {
        return std::future::pending().await;
    };
    if rx.changed().await.is_ok() {
        return Some(Arc::clone(&rx.borrow_and_update()));
    }
    *updates = None;
    None
}
