//! Ed25519 command envelope verification.

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use tracing::warn;

use crate::config::ENVELOPE_WINDOW_SECONDS;
use crate::error::{AuthErrorKind, RemoteError};
use crate::protocol::CommandEnvelope;

use super::{Allowlist, CompanionIdentity, NonceStore};

/// Current Unix time in seconds.
pub fn unix_now() -> Result<u64, RemoteError> {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .map_err(|e| {
            RemoteError::auth(AuthErrorKind::Clock {
                message: format!("System time error: {}", e),
            })
        })
}

/// An authenticated, non-replayed command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifiedCommand {
    pub sender: CompanionIdentity,
    pub command: String,
    pub nonce: String,
    pub issued_at: u64,
    pub expires_at: u64,
}

/// Authenticates inbound command envelopes.
pub struct CommandVerifier {
    allowlist: Arc<Allowlist>,
    nonce_store: Arc<NonceStore>,
    clock_skew_secs: u64,
}

impl CommandVerifier {
    /// Create a new verifier.
    pub fn new(allowlist: Arc<Allowlist>, nonce_store: Arc<NonceStore>, clock_skew_secs: u64) -> Self {
        if allowlist.is_empty() {
            warn!("Companion allowlist is empty, every command will be rejected");
        }
        Self {
            allowlist,
            nonce_store,
            clock_skew_secs,
        }
    }

    /// Swap in a freshly loaded allowlist. Takes effect for the next message.
    pub fn replace_allowlist(&mut self, allowlist: Arc<Allowlist>) {
        if allowlist.is_empty() {
            warn!("Reloaded companion allowlist is empty, every command will be rejected");
        }
        self.allowlist = allowlist;
    }

    pub fn allowlist(&self) -> &Arc<Allowlist> {
        &self.allowlist
    }

    /// Verify raw message bytes against the system clock.
    pub fn verify(&self, raw: &[u8]) -> Result<VerifiedCommand, RemoteError> {
        self.verify_at(raw, unix_now()?)
    }

    /// Verify raw message bytes at Unix time `now`.
    ///
    /// Checks, in order:
    /// 1. Envelope parses
    /// 2. Signature is valid for the embedded sender key
    /// 3. Sender is in the allowlist
    /// 4. `exp - iat` equals the fixed window
    /// 5. `now <= exp` (inclusive) and `iat <= now + skew`
    /// 6. Nonce has not been used by this sender within the TTL
    pub fn verify_at(&self, raw: &[u8], now: u64) -> Result<VerifiedCommand, RemoteError> {
        let envelope = CommandEnvelope::parse(raw)?;

        if !envelope.signature_valid() {
            return Err(RemoteError::auth(AuthErrorKind::InvalidSignature));
        }

        if !self.allowlist.contains(&envelope.sender) {
            return Err(RemoteError::auth(AuthErrorKind::UnknownSender {
                public_key: envelope.sender.to_hex(),
            }));
        }

        let claims = &envelope.claims;
        if envelope.window_secs() != Some(ENVELOPE_WINDOW_SECONDS) {
            return Err(RemoteError::auth(AuthErrorKind::InvalidWindow {
                issued_at: claims.iat,
                expires_at: claims.exp,
            }));
        }

        if now > claims.exp {
            let expired_for_secs = now - claims.exp;
            warn!(
                sender = %envelope.sender,
                expired_for_secs,
                "Expired command envelope, check companion and node clocks"
            );
            return Err(RemoteError::auth(AuthErrorKind::Expired { expired_for_secs }));
        }

        if claims.iat > now.saturating_add(self.clock_skew_secs) {
            let ahead_secs = claims.iat - now;
            warn!(
                sender = %envelope.sender,
                ahead_secs,
                "Future-dated command envelope, check companion and node clocks"
            );
            return Err(RemoteError::auth(AuthErrorKind::FutureDated { ahead_secs }));
        }

        self.nonce_store
            .check_and_record(&envelope.sender, &claims.nonce)?;

        Ok(VerifiedCommand {
            sender: envelope.sender,
            command: envelope.claims.command,
            nonce: envelope.claims.nonce,
            issued_at: envelope.claims.iat,
            expires_at: envelope.claims.exp,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use ring::signature::{Ed25519KeyPair, KeyPair};

    use super::*;
    use crate::protocol::{encode_token, test_keys, CommandClaims};

    const NOW: u64 = 1_700_000_000;

    fn identity(key_pair: &Ed25519KeyPair) -> CompanionIdentity {
        CompanionIdentity::from_slice(key_pair.public_key().as_ref()).unwrap()
    }

    fn create_test_verifier(members: &[&Ed25519KeyPair]) -> CommandVerifier {
        let allowlist = Allowlist::new(members.iter().map(|k| identity(k)));
        let nonce_store = Arc::new(NonceStore::new(Duration::from_secs(120)));
        CommandVerifier::new(Arc::new(allowlist), nonce_store, 5)
    }

    #[test]
    fn test_valid_envelope_accepted_once() {
        let companion = test_keys::generate();
        let verifier = create_test_verifier(&[&companion]);
        let token = CommandEnvelope::issue(&companion, "ver", NOW, "nonce-1").unwrap();

        let verified = verifier.verify_at(token.as_bytes(), NOW).unwrap();
        assert_eq!(verified.command, "ver");
        assert_eq!(verified.sender, identity(&companion));

        let replay = verifier.verify_at(token.as_bytes(), NOW + 1);
        assert!(matches!(replay, Err(RemoteError::Replay { .. })));
    }

    #[test]
    fn test_unknown_sender_rejected_regardless_of_time() {
        let member = test_keys::generate();
        let stranger = test_keys::generate();
        let verifier = create_test_verifier(&[&member]);

        for (i, at) in [NOW - 100, NOW, NOW + 100].into_iter().enumerate() {
            let token =
                CommandEnvelope::issue(&stranger, "ver", NOW, &format!("n{}", i)).unwrap();
            assert!(matches!(
                verifier.verify_at(token.as_bytes(), at),
                Err(RemoteError::Auth {
                    kind: AuthErrorKind::UnknownSender { .. }
                })
            ));
        }
    }

    #[test]
    fn test_signature_by_other_key_rejected() {
        let member = test_keys::generate();
        let forger = test_keys::generate();
        let verifier = create_test_verifier(&[&member]);

        // Claims name the member but are signed by the forger.
        let claims = CommandClaims {
            public_key: identity(&member).to_hex(),
            command: "reboot".to_string(),
            iat: NOW,
            exp: NOW + 30,
            nonce: "n".to_string(),
        };
        let token = encode_token(&claims, &forger).unwrap();

        assert!(matches!(
            verifier.verify_at(token.as_bytes(), NOW),
            Err(RemoteError::Auth {
                kind: AuthErrorKind::InvalidSignature
            })
        ));
    }

    #[test]
    fn test_expiry_boundary_is_inclusive() {
        let companion = test_keys::generate();
        let verifier = create_test_verifier(&[&companion]);

        let at_expiry = CommandEnvelope::issue(&companion, "ver", NOW, "edge-a").unwrap();
        assert!(verifier.verify_at(at_expiry.as_bytes(), NOW + 30).is_ok());

        let past_expiry = CommandEnvelope::issue(&companion, "ver", NOW, "edge-b").unwrap();
        assert!(matches!(
            verifier.verify_at(past_expiry.as_bytes(), NOW + 31),
            Err(RemoteError::Auth {
                kind: AuthErrorKind::Expired {
                    expired_for_secs: 1
                }
            })
        ));
    }

    #[test]
    fn test_rejected_envelope_does_not_consume_nonce() {
        let companion = test_keys::generate();
        let verifier = create_test_verifier(&[&companion]);

        let token = CommandEnvelope::issue(&companion, "ver", NOW, "late").unwrap();
        assert!(verifier.verify_at(token.as_bytes(), NOW + 31).is_err());

        let fresh = CommandEnvelope::issue(&companion, "ver", NOW + 31, "late").unwrap();
        assert!(verifier.verify_at(fresh.as_bytes(), NOW + 31).is_ok());
    }

    #[test]
    fn test_future_dated_rejected_beyond_skew() {
        let companion = test_keys::generate();
        let verifier = create_test_verifier(&[&companion]);

        let within = CommandEnvelope::issue(&companion, "ver", NOW + 5, "f1").unwrap();
        assert!(verifier.verify_at(within.as_bytes(), NOW).is_ok());

        let beyond = CommandEnvelope::issue(&companion, "ver", NOW + 6, "f2").unwrap();
        assert!(matches!(
            verifier.verify_at(beyond.as_bytes(), NOW),
            Err(RemoteError::Auth {
                kind: AuthErrorKind::FutureDated { ahead_secs: 6 }
            })
        ));
    }

    #[test]
    fn test_wrong_window_rejected() {
        let companion = test_keys::generate();
        let verifier = create_test_verifier(&[&companion]);

        let claims = CommandClaims {
            public_key: identity(&companion).to_hex(),
            command: "ver".to_string(),
            iat: NOW,
            exp: NOW + 3600,
            nonce: "long-lived".to_string(),
        };
        let token = encode_token(&claims, &companion).unwrap();

        assert!(matches!(
            verifier.verify_at(token.as_bytes(), NOW),
            Err(RemoteError::Auth {
                kind: AuthErrorKind::InvalidWindow { expires_at, .. }
            }) if expires_at == NOW + 3600
        ));
    }

    fn signed_with_times(companion: &Ed25519KeyPair, iat: u64, exp: u64) -> String {
        let claims = CommandClaims {
            public_key: identity(companion).to_hex(),
            command: "ver".to_string(),
            iat,
            exp,
            nonce: format!("t-{}", iat),
        };
        encode_token(&claims, companion).unwrap()
    }

    #[test]
    fn test_out_of_range_timestamps_rejected() {
        let companion = test_keys::generate();
        let verifier = create_test_verifier(&[&companion]);

        let iat = i64::MAX as u64;
        let token = signed_with_times(&companion, iat, iat + 31);
        assert!(matches!(
            verifier.verify_at(token.as_bytes(), NOW),
            Err(RemoteError::Auth {
                kind: AuthErrorKind::InvalidWindow { .. }
            })
        ));

        let token = signed_with_times(&companion, u64::MAX, u64::MAX);
        assert!(matches!(
            verifier.verify_at(token.as_bytes(), NOW),
            Err(RemoteError::Auth {
                kind: AuthErrorKind::InvalidWindow { .. }
            })
        ));
    }

    #[test]
    fn test_inverted_window_rejected() {
        let companion = test_keys::generate();
        let verifier = create_test_verifier(&[&companion]);

        let token = signed_with_times(&companion, NOW + 30, NOW);
        assert!(matches!(
            verifier.verify_at(token.as_bytes(), NOW),
            Err(RemoteError::Auth {
                kind: AuthErrorKind::InvalidWindow { .. }
            })
        ));
    }

    #[test]
    fn test_far_future_envelope_with_large_skew() {
        let companion = test_keys::generate();
        let allowlist = Arc::new(Allowlist::new([identity(&companion)]));
        let nonces = Arc::new(NonceStore::new(Duration::from_secs(120)));
        let verifier = CommandVerifier::new(allowlist, nonces, u64::MAX);

        let iat = u64::MAX - 30;
        let token = signed_with_times(&companion, iat, u64::MAX);
        assert!(matches!(
            verifier.verify_at(token.as_bytes(), u64::MAX - 10),
            Ok(_)
        ));
    }

    #[test]
    fn test_malformed_input() {
        let companion = test_keys::generate();
        let verifier = create_test_verifier(&[&companion]);
        assert!(matches!(
            verifier.verify_at(b"{\"command\":\"ver\"}", NOW),
            Err(RemoteError::Malformed { .. })
        ));
    }

    #[test]
    fn test_replaced_allowlist_applies_to_next_message() {
        let first = test_keys::generate();
        let second = test_keys::generate();
        let mut verifier = create_test_verifier(&[&first]);

        verifier.replace_allowlist(Arc::new(Allowlist::new([identity(&second)])));

        let old = CommandEnvelope::issue(&first, "ver", NOW, "a").unwrap();
        assert!(verifier.verify_at(old.as_bytes(), NOW).is_err());

        let new = CommandEnvelope::issue(&second, "ver", NOW, "a").unwrap();
        assert!(verifier.verify_at(new.as_bytes(), NOW).is_ok());
    }
}
