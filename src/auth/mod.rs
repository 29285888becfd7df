//! Authentication module.
//!
//! Handles the companion allowlist, Ed25519 envelope verification and
//! nonce tracking for replay protection.

mod allowlist;
mod nonce;
mod verifier;

pub use allowlist::{Allowlist, CompanionIdentity};
pub use nonce::NonceStore;
pub use verifier::{unix_now, CommandVerifier, VerifiedCommand};
