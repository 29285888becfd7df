//! Envelope and bridge protocol module.
//!
//! Command and response envelopes travel as JWT-style tokens signed with
//! Ed25519. The broker bridge carries them inside length-prefixed JSON
//! frames:
//! ```text
//! [4 bytes: length (big-endian u32)][JSON payload]
//! ```

mod envelope;
mod response;
mod token;
mod wire;

pub use envelope::{CommandClaims, CommandEnvelope, MAX_COMMAND_LEN, MAX_NONCE_LEN};
pub use response::{
    ErrorDescriptor, ResponseClaims, ResponseEnvelope, ResponseOutcome, CODE_BUSY, CODE_TIMEOUT,
};
pub use token::{
    decode_token, encode_token, DecodedToken, TokenSigner, MAX_TOKEN_LEN, TOKEN_ALGORITHM,
};
pub use wire::{
    read_frame, read_message, write_frame_with_timeout, write_message, DEFAULT_MAX_FRAME_SIZE,
};

#[cfg(test)]
pub(crate) use token::test_keys;
