//! Per-forwarder bridge connection.

use std::sync::Arc;
use std::time::Duration;

use tokio::net::unix::OwnedWriteHalf;
use tokio::net::UnixStream;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{broadcast, mpsc, Notify};
use tracing::{debug, warn};

use crate::config::BridgeConfig;
use crate::error::{ProtocolErrorKind, RemoteError};
use crate::protocol::{read_frame, write_frame_with_timeout};

use super::BrokerMessage;

/// Handle a single broker forwarder connection.
///
/// Inbound frames on the command topic go to the intake queue; every
/// outbound publication is written back. Reading and writing run as
/// separate tasks so a partially read frame is never abandoned.
pub async fn handle_connection(
    stream: UnixStream,
    config: Arc<BridgeConfig>,
    inbound_topic: Arc<str>,
    inbound: mpsc::Sender<Vec<u8>>,
    outbound: broadcast::Receiver<BrokerMessage>,
    shutdown: Arc<Notify>,
) -> Result<(), RemoteError> {
    let (mut reader, writer) = stream.into_split();
    let write_timeout = Duration::from_secs(config.socket_timeout_seconds);
    let writer_task = tokio::spawn(forward_outbound(writer, outbound, write_timeout));

    let result = loop {
        let frame = tokio::select! {
            frame = read_frame::<_, BrokerMessage>(&mut reader, config.max_message_size) => frame,
            _ = shutdown.notified() => break Ok(()),
        };

        match frame {
            Ok(message) => {
                if let Err(e) = forward_inbound(message, &inbound_topic, &inbound) {
                    break Err(e);
                }
            }
            Err(RemoteError::Protocol {
                kind: ProtocolErrorKind::InvalidMessageFormat { message },
            }) => {
                // The frame boundary is intact, keep the connection.
                warn!(error = %message, "Ignoring undecodable bridge frame");
            }
            Err(RemoteError::Protocol {
                kind: ProtocolErrorKind::ConnectionClosed,
            }) => {
                debug!("Forwarder closed the bridge connection");
                break Ok(());
            }
            Err(e) => break Err(e),
        }
    };

    writer_task.abort();
    result
}

fn forward_inbound(
    message: BrokerMessage,
    inbound_topic: &str,
    inbound: &mpsc::Sender<Vec<u8>>,
) -> Result<(), RemoteError> {
    if message.topic != inbound_topic {
        debug!(topic = %message.topic, "Ignoring message on unrelated topic");
        return Ok(());
    }

    match inbound.try_send(message.payload.into_bytes()) {
        Ok(()) => Ok(()),
        Err(TrySendError::Full(_)) => {
            warn!("Inbound command queue full, dropping message");
            Ok(())
        }
        Err(TrySendError::Closed(_)) => Err(RemoteError::Socket {
            message: "command intake stopped".to_string(),
        }),
    }
}

async fn forward_outbound(
    mut writer: OwnedWriteHalf,
    mut outbound: broadcast::Receiver<BrokerMessage>,
    write_timeout: Duration,
) {
    loop {
        match outbound.recv().await {
            Ok(message) => {
                if let Err(e) = write_frame_with_timeout(&mut writer, &message, write_timeout).await {
                    warn!(error = %e, "Failed to write outbound frame, closing writer");
                    return;
                }
            }
            Err(RecvError::Lagged(skipped)) => {
                warn!(skipped, "Bridge client too slow, outbound messages skipped");
            }
            Err(RecvError::Closed) => return,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_inbound_topic_is_forwarded() {
        let (tx, mut rx) = mpsc::channel(4);

        forward_inbound(BrokerMessage::new("other", "x"), "cmd", &tx).unwrap();
        assert!(rx.try_recv().is_err());

        forward_inbound(BrokerMessage::new("cmd", "token"), "cmd", &tx).unwrap();
        assert_eq!(rx.try_recv().unwrap(), b"token".to_vec());
    }

    #[test]
    fn test_full_queue_drops_message() {
        let (tx, mut rx) = mpsc::channel(1);
        forward_inbound(BrokerMessage::new("cmd", "a"), "cmd", &tx).unwrap();
        forward_inbound(BrokerMessage::new("cmd", "b"), "cmd", &tx).unwrap();

        assert_eq!(rx.try_recv().unwrap(), b"a".to_vec());
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_closed_intake_is_an_error() {
        let (tx, rx) = mpsc::channel(1);
        drop(rx);
        assert!(forward_inbound(BrokerMessage::new("cmd", "a"), "cmd", &tx).is_err());
    }
}
