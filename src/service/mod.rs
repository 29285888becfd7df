//! Command channel service.
//!
//! Wires the verifier, dispatcher and response signer into a single
//! intake loop and tracks each command through its lifecycle.

mod intake;
mod lifecycle;
mod metrics;

pub use intake::RemoteService;
pub use lifecycle::{CommandStage, Lifecycle, RejectReason};
pub use metrics::{MetricsSnapshot, ServiceMetrics};
