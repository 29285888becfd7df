//! Response signing and publication.

use std::sync::Arc;

use tracing::debug;

use crate::auth::unix_now;
use crate::broker::Publisher;
use crate::error::RemoteError;
use crate::protocol::{ResponseClaims, ResponseEnvelope, ResponseOutcome};

use super::NodeKey;

/// Signs dispatcher outcomes with the node key and publishes them.
pub struct ResponseSigner {
    key: NodeKey,
    publisher: Arc<dyn Publisher>,
    topic: String,
}

impl ResponseSigner {
    pub fn new(key: NodeKey, publisher: Arc<dyn Publisher>, topic: impl Into<String>) -> Self {
        Self {
            key,
            publisher,
            topic: topic.into(),
        }
    }

    /// Lowercase hex public key of the node.
    pub fn public_hex(&self) -> &str {
        self.key.public_hex()
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Build and sign a response stamped with time `ts`.
    pub fn sign_at(
        &self,
        nonce: &str,
        outcome: &ResponseOutcome,
        ts: u64,
    ) -> Result<ResponseEnvelope, RemoteError> {
        let claims = ResponseClaims::new(
            self.key.public_hex().to_string(),
            nonce.to_string(),
            outcome,
            ts,
        );
        let token = self.key.sign_claims(&claims)?;
        Ok(ResponseEnvelope { claims, token })
    }

    /// Sign a response for the command identified by `nonce` and publish it
    /// on the outbound topic.
    pub fn publish(
        &self,
        nonce: &str,
        outcome: &ResponseOutcome,
    ) -> Result<ResponseEnvelope, RemoteError> {
        let envelope = self.sign_at(nonce, outcome, unix_now()?)?;
        self.publisher.publish(&self.topic, &envelope.token)?;
        debug!(
            topic = %self.topic,
            nonce = %nonce,
            outcome = outcome.label(),
            "Published signed response"
        );
        Ok(envelope)
    }
}
