//! Response signing module.
//!
//! Holds the node signing key, the providers that fetch it once at startup,
//! and the signer that turns dispatcher outcomes into published envelopes.

mod key;
mod response;

pub use key::{DeviceKeyProvider, FileKeyProvider, KeyProvider, NodeKey, DEVICE_KEY_COMMAND};
pub use response::ResponseSigner;
