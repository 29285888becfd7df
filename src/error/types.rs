//! Error types for the remote-command daemon.

use thiserror::Error;

/// Main error type for the daemon.
#[derive(Error, Debug)]
pub enum RemoteError {
    /// Configuration-related errors.
    #[error("Configuration error: {message}")]
    Config { message: String },

    /// Bridge socket errors.
    #[error("Socket error: {message}")]
    Socket { message: String },

    /// Authentication errors. Never answered on the outbound topic.
    #[error("Authentication error: {kind}")]
    Auth { kind: AuthErrorKind },

    /// Nonce reuse within the TTL window. Never answered.
    #[error("Nonce already used by {sender} (replay detected)")]
    Replay { sender: String },

    /// Envelope could not be parsed. Never answered.
    #[error("Malformed envelope: {message}")]
    Malformed { message: String },

    /// The command slot is occupied.
    #[error("Command slot busy")]
    Busy,

    /// No terminal serial response within the deadline.
    #[error("Command timed out after {timeout_ms} ms")]
    Timeout { timeout_ms: u64 },

    /// Serial link errors.
    #[error("Serial error: {kind}")]
    Serial { kind: SerialErrorKind },

    /// Signing key retrieval or use failed.
    #[error("Signing key error: {message}")]
    Key { message: String },

    /// Protocol errors.
    #[error("Protocol error: {kind}")]
    Protocol { kind: ProtocolErrorKind },

    /// I/O errors.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization/deserialization errors.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Authentication error kinds.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AuthErrorKind {
    #[error("Invalid signature")]
    InvalidSignature,

    #[error("Sender {public_key} not in allowlist")]
    UnknownSender { public_key: String },

    #[error("Envelope expired {expired_for_secs}s ago")]
    Expired { expired_for_secs: u64 },

    #[error("Envelope issued {ahead_secs}s in the future")]
    FutureDated { ahead_secs: u64 },

    #[error("Envelope window iat={issued_at} exp={expires_at} does not match the required window")]
    InvalidWindow { issued_at: u64, expires_at: u64 },

    #[error("System clock error: {message}")]
    Clock { message: String },
}

/// Serial link error kinds.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SerialErrorKind {
    #[error("Failed to open serial port {port}: {message}")]
    Open { port: String, message: String },

    #[error("Serial link disconnected: {message}")]
    Disconnected { message: String },

    #[error("Serial link closed before a complete response")]
    Closed,

    #[error("No complete serial response within {timeout_ms} ms")]
    ReadTimeout { timeout_ms: u64 },

    #[error("Serial worker is not running")]
    WorkerUnavailable,
}

/// Protocol error kinds.
#[derive(Error, Debug)]
pub enum ProtocolErrorKind {
    #[error("Message too large: {size} bytes exceeds maximum of {max} bytes")]
    MessageTooLarge { size: usize, max: usize },

    #[error("Invalid message format: {message}")]
    InvalidMessageFormat { message: String },

    #[error("Connection closed")]
    ConnectionClosed,

    #[error("Connection timed out")]
    ConnectionTimeout,
}

impl RemoteError {
    /// Whether this error must be dropped without publishing a response.
    ///
    /// Anything raised before a sender is authenticated stays silent so an
    /// unauthenticated party learns nothing about which keys are valid.
    pub fn is_silent(&self) -> bool {
        matches!(
            self,
            RemoteError::Auth { .. } | RemoteError::Replay { .. } | RemoteError::Malformed { .. }
        )
    }

    /// Shorthand for a malformed-envelope error.
    pub fn malformed(message: impl Into<String>) -> Self {
        RemoteError::Malformed {
            message: message.into(),
        }
    }

    /// Shorthand for an authentication error.
    pub fn auth(kind: AuthErrorKind) -> Self {
        RemoteError::Auth { kind }
    }

    /// Shorthand for a serial error.
    pub fn serial(kind: SerialErrorKind) -> Self {
        RemoteError::Serial { kind }
    }
}

/// Result type alias for daemon operations.
pub type RemoteResult<T> = Result<T, RemoteError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_silent_errors() {
        assert!(RemoteError::auth(AuthErrorKind::InvalidSignature).is_silent());
        assert!(RemoteError::Replay {
            sender: "ab".to_string()
        }
        .is_silent());
        assert!(RemoteError::malformed("bad").is_silent());
        assert!(!RemoteError::Busy.is_silent());
        assert!(!RemoteError::Timeout { timeout_ms: 10 }.is_silent());
        assert!(!RemoteError::serial(SerialErrorKind::Closed).is_silent());
    }

    #[test]
    fn test_display_includes_kind() {
        let err = RemoteError::auth(AuthErrorKind::Expired {
            expired_for_secs: 12,
        });
        assert_eq!(
            err.to_string(),
            "Authentication error: Envelope expired 12s ago"
        );
    }
}
