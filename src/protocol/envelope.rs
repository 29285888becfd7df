//! Inbound command envelopes.

use ring::signature::{Ed25519KeyPair, KeyPair};
use serde::{Deserialize, Serialize};

use crate::auth::CompanionIdentity;
use crate::config::ENVELOPE_WINDOW_SECONDS;
use crate::error::RemoteError;

use super::token::{decode_token, encode_token, DecodedToken};

/// Longest command text accepted for the serial line.
pub const MAX_COMMAND_LEN: usize = 256;

/// Longest accepted nonce.
pub const MAX_NONCE_LEN: usize = 64;

/// Claims of a command envelope. The signature covers all of them.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CommandClaims {
    /// Sender Ed25519 public key, hex.
    #[serde(rename = "publicKey")]
    pub public_key: String,

    /// Serial command text, e.g. `ver` or `get radio`.
    pub command: String,

    /// Unix timestamp when the envelope was issued.
    pub iat: u64,

    /// Unix timestamp after which the envelope is no longer valid.
    pub exp: u64,

    /// Single-use value, unique per sender.
    pub nonce: String,
}

/// A parsed command envelope whose signature has not been checked yet.
#[derive(Debug, Clone)]
pub struct CommandEnvelope {
    pub sender: CompanionIdentity,
    pub claims: CommandClaims,
    token: DecodedToken,
}

impl CommandEnvelope {
    /// Parse raw message bytes. Any structural problem is `Malformed`.
    pub fn parse(raw: &[u8]) -> Result<Self, RemoteError> {
        let token = decode_token(raw)?;
        let claims: CommandClaims = token.claims()?;

        let sender: CompanionIdentity = claims.public_key.parse()?;
        validate_command(&claims.command)?;
        validate_nonce(&claims.nonce)?;

        Ok(Self {
            sender,
            claims,
            token,
        })
    }

    /// Whether the embedded sender key signed this envelope.
    pub fn signature_valid(&self) -> bool {
        self.token.verify(self.sender.as_bytes())
    }

    /// `exp - iat`, or `None` for an inverted envelope.
    pub fn window_secs(&self) -> Option<u64> {
        self.claims.exp.checked_sub(self.claims.iat)
    }

    /// Issue a signed command token, as a companion device does.
    pub fn issue(
        key_pair: &Ed25519KeyPair,
        command: &str,
        issued_at: u64,
        nonce: &str,
    ) -> Result<String, RemoteError> {
        let claims = CommandClaims {
            public_key: hex::encode(key_pair.public_key().as_ref()),
            command: command.to_string(),
            iat: issued_at,
            exp: issued_at.saturating_add(ENVELOPE_WINDOW_SECONDS),
            nonce: nonce.to_string(),
        };
        encode_token(&claims, key_pair)
    }
}

fn validate_command(command: &str) -> Result<(), RemoteError> {
    if command.trim().is_empty() {
        return Err(RemoteError::malformed("command is empty"));
    }
    if command.len() > MAX_COMMAND_LEN {
        return Err(RemoteError::malformed(format!(
            "command is {} bytes, maximum is {}",
            command.len(),
            MAX_COMMAND_LEN
        )));
    }
    // CR/LF would smuggle extra commands onto the serial line.
    if command.chars().any(char::is_control) {
        return Err(RemoteError::malformed("command contains control characters"));
    }
    Ok(())
}

fn validate_nonce(nonce: &str) -> Result<(), RemoteError> {
    if nonce.is_empty() || nonce.len() > MAX_NONCE_LEN {
        return Err(RemoteError::malformed(format!(
            "nonce must be 1..={} bytes",
            MAX_NONCE_LEN
        )));
    }
    if nonce.chars().any(char::is_control) {
        return Err(RemoteError::malformed("nonce contains control characters"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::token::test_keys;

    #[test]
    fn test_issue_and_parse() {
        let key_pair = test_keys::generate();
        let token = CommandEnvelope::issue(&key_pair, "get radio", 1_700_000_000, "n-1").unwrap();

        let envelope = CommandEnvelope::parse(token.as_bytes()).unwrap();
        assert_eq!(envelope.sender.as_bytes(), key_pair.public_key().as_ref());
        assert_eq!(envelope.claims.command, "get radio");
        assert_eq!(envelope.claims.exp - envelope.claims.iat, 30);
        assert_eq!(envelope.window_secs(), Some(30));
        assert!(envelope.signature_valid());
    }

    #[test]
    fn test_claims_use_wire_names() {
        let claims = CommandClaims {
            public_key: "ab".to_string(),
            command: "ver".to_string(),
            iat: 1,
            exp: 31,
            nonce: "x".to_string(),
        };
        let json = serde_json::to_string(&claims).unwrap();
        assert!(json.contains("\"publicKey\":\"ab\""));
        assert!(!json.contains("public_key"));
    }

    #[test]
    fn test_line_break_in_command_is_malformed() {
        let key_pair = test_keys::generate();
        let token = CommandEnvelope::issue(&key_pair, "ver\r\nreboot", 1, "n").unwrap();
        assert!(matches!(
            CommandEnvelope::parse(token.as_bytes()),
            Err(RemoteError::Malformed { .. })
        ));
    }

    #[test]
    fn test_empty_and_oversized_commands_are_malformed() {
        let key_pair = test_keys::generate();
        let long = "x".repeat(MAX_COMMAND_LEN + 1);
        for command in ["", "   ", long.as_str()] {
            let token = CommandEnvelope::issue(&key_pair, command, 1, "n").unwrap();
            assert!(CommandEnvelope::parse(token.as_bytes()).is_err());
        }
    }

    #[test]
    fn test_bad_nonce_is_malformed() {
        let key_pair = test_keys::generate();
        let long = "n".repeat(MAX_NONCE_LEN + 1);
        for nonce in ["", long.as_str()] {
            let token = CommandEnvelope::issue(&key_pair, "ver", 1, nonce).unwrap();
            assert!(matches!(
                CommandEnvelope::parse(token.as_bytes()),
                Err(RemoteError::Malformed { .. })
            ));
        }
    }

    #[test]
    fn test_missing_claim_is_malformed() {
        let key_pair = test_keys::generate();
        let token = encode_token(&serde_json::json!({"command": "ver"}), &key_pair).unwrap();
        assert!(matches!(
            CommandEnvelope::parse(token.as_bytes()),
            Err(RemoteError::Malformed { .. })
        ));
    }
}
