//! Mesh Remote Library
//!
//! Secure remote-command channel for a mesh radio node. Companions publish
//! Ed25519-signed command envelopes on a broker topic; the daemon verifies
//! them, runs the command over the node's serial console one at a time and
//! publishes a response signed with the node's own key.

pub mod audit;
pub mod auth;
pub mod broker;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod protocol;
pub mod serial;
pub mod service;
pub mod signer;
