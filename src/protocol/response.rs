//! Outbound response envelopes.

use serde::{Deserialize, Serialize};

use crate::error::{AuthErrorKind, RemoteError};

use super::token::decode_token;

pub const CODE_BUSY: &str = "BUSY";
pub const CODE_TIMEOUT: &str = "TIMEOUT";

/// How a dispatched command ended. Only authenticated commands get here.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResponseOutcome {
    /// Terminal serial response received before the deadline.
    Completed { lines: Vec<String> },
    /// The command slot was occupied.
    Busy,
    /// Deadline elapsed, or the serial link failed.
    TimedOut { timeout_ms: u64, fault: Option<String> },
}

impl ResponseOutcome {
    /// Short label used in logs and the audit trail.
    pub fn label(&self) -> &'static str {
        match self {
            ResponseOutcome::Completed { .. } => "completed",
            ResponseOutcome::Busy => "busy",
            ResponseOutcome::TimedOut { .. } => "timed_out",
        }
    }

    fn error_descriptor(&self) -> Option<ErrorDescriptor> {
        match self {
            ResponseOutcome::Completed { .. } => None,
            ResponseOutcome::Busy => Some(ErrorDescriptor::new(
                CODE_BUSY,
                RemoteError::Busy.to_string(),
            )),
            ResponseOutcome::TimedOut { fault: Some(_), .. } => {
                Some(ErrorDescriptor::new(CODE_TIMEOUT, "Serial link fault"))
            }
            ResponseOutcome::TimedOut { timeout_ms, fault: None } => Some(ErrorDescriptor::new(
                CODE_TIMEOUT,
                RemoteError::Timeout {
                    timeout_ms: *timeout_ms,
                }
                .to_string(),
            )),
        }
    }
}

/// Error details in a response.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ErrorDescriptor {
    /// Stable error code (`BUSY`, `TIMEOUT`).
    pub code: String,

    /// Human-readable error message.
    pub message: String,
}

impl ErrorDescriptor {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
        }
    }
}

/// Signed claims of a response.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ResponseClaims {
    /// Node Ed25519 public key, hex.
    #[serde(rename = "publicKey")]
    pub public_key: String,

    /// Nonce of the command this answers.
    pub nonce: String,

    /// `"ok"` or `"error"`.
    pub status: String,

    /// Serial response lines on success.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Vec<String>>,

    /// Error details on failure.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorDescriptor>,

    /// Unix timestamp when the response was signed.
    pub ts: u64,
}

impl ResponseClaims {
    pub fn new(public_key: String, nonce: String, outcome: &ResponseOutcome, ts: u64) -> Self {
        let (status, result) = match outcome {
            ResponseOutcome::Completed { lines } => ("ok", Some(lines.clone())),
            _ => ("error", None),
        };
        Self {
            public_key,
            nonce,
            status: status.to_string(),
            result,
            error: outcome.error_descriptor(),
            ts,
        }
    }

    pub fn is_ok(&self) -> bool {
        self.status == "ok"
    }
}

/// A signed response, ready to publish.
#[derive(Debug, Clone)]
pub struct ResponseEnvelope {
    pub claims: ResponseClaims,
    pub token: String,
}

impl ResponseEnvelope {
    /// Verify a published response against the node's known public key.
    pub fn verify(raw: &[u8], node_public_key: &[u8]) -> Result<ResponseClaims, RemoteError> {
        let token = decode_token(raw)?;
        if !token.verify(node_public_key) {
            return Err(RemoteError::auth(AuthErrorKind::InvalidSignature));
        }
        token.claims()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_completed_claims() {
        let outcome = ResponseOutcome::Completed {
            lines: vec!["v1.9.0".to_string()],
        };
        let claims = ResponseClaims::new("ab".into(), "n1".into(), &outcome, 42);
        assert!(claims.is_ok());
        assert_eq!(claims.result.as_deref(), Some(&["v1.9.0".to_string()][..]));
        assert!(claims.error.is_none());

        let json = serde_json::to_string(&claims).unwrap();
        assert!(json.contains("\"status\":\"ok\""));
        assert!(!json.contains("\"error\"")); // Should be skipped when None
    }

    #[test]
    fn test_busy_claims() {
        let claims = ResponseClaims::new("ab".into(), "n1".into(), &ResponseOutcome::Busy, 42);
        assert!(!claims.is_ok());
        assert_eq!(claims.error.unwrap().code, CODE_BUSY);
        assert!(claims.result.is_none());
    }

    #[test]
    fn test_fault_message_is_generic() {
        let outcome = ResponseOutcome::TimedOut {
            timeout_ms: 10_000,
            fault: Some("/dev/ttyUSB0: Input/output error".to_string()),
        };
        let claims = ResponseClaims::new("ab".into(), "n1".into(), &outcome, 42);
        let error = claims.error.unwrap();
        assert_eq!(error.code, CODE_TIMEOUT);
        assert!(!error.message.contains("ttyUSB0"));
    }

    #[test]
    fn test_outcome_labels() {
        assert_eq!(ResponseOutcome::Busy.label(), "busy");
        assert_eq!(
            ResponseOutcome::TimedOut {
                timeout_ms: 1,
                fault: None
            }
            .label(),
            "timed_out"
        );
    }
}
