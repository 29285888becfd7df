//! Broker-facing publish/subscribe module.
//!
//! The daemon does not speak MQTT itself. A broker forwarder connects to
//! the bridge socket, pushes inbound topic messages and receives every
//! outbound publication.

mod bridge;
mod connection;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::error::RemoteError;

pub use bridge::{BridgeListener, BridgePublisher};
pub use connection::handle_connection;

/// One message on a broker topic.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BrokerMessage {
    pub topic: String,
    pub payload: String,
}

impl BrokerMessage {
    pub fn new(topic: impl Into<String>, payload: impl Into<String>) -> Self {
        Self {
            topic: topic.into(),
            payload: payload.into(),
        }
    }
}

/// Outbound half of the pub/sub collaborator.
pub trait Publisher: Send + Sync {
    fn publish(&self, topic: &str, payload: &str) -> Result<(), RemoteError>;
}

/// Publisher that forwards into an in-process channel.
#[derive(Clone)]
pub struct ChannelPublisher {
    tx: mpsc::UnboundedSender<BrokerMessage>,
}

impl ChannelPublisher {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<BrokerMessage>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl Publisher for ChannelPublisher {
    fn publish(&self, topic: &str, payload: &str) -> Result<(), RemoteError> {
        self.tx
            .send(BrokerMessage::new(topic, payload))
            .map_err(|_| RemoteError::Socket {
                message: "publish channel closed".to_string(),
            })
    }
}
