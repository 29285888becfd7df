//! Unix socket bridge to the broker forwarder.

use std::os::unix::fs::PermissionsExt;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::net::UnixListener;
use tokio::sync::{broadcast, mpsc, Notify};
use tracing::{debug, error, info, warn};

use crate::config::BridgeConfig;
use crate::error::{ProtocolErrorKind, RemoteError};

use super::{handle_connection, BrokerMessage, Publisher};

/// Publisher that fans out to every connected bridge client.
#[derive(Clone)]
pub struct BridgePublisher {
    tx: broadcast::Sender<BrokerMessage>,
}

impl BridgePublisher {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<BrokerMessage> {
        self.tx.subscribe()
    }
}

impl Publisher for BridgePublisher {
    fn publish(&self, topic: &str, payload: &str) -> Result<(), RemoteError> {
        self.tx
            .send(BrokerMessage::new(topic, payload))
            .map(|_| ())
            .map_err(|_| RemoteError::Socket {
                message: "no broker bridge client connected".to_string(),
            })
    }
}

/// Unix socket server for broker forwarders.
pub struct BridgeListener {
    listener: UnixListener,
    config: Arc<BridgeConfig>,
    inbound_topic: Arc<str>,
    inbound: mpsc::Sender<Vec<u8>>,
    publisher: BridgePublisher,
    active: Arc<AtomicUsize>,
}

impl BridgeListener {
    /// Create and bind a new bridge listener.
    pub async fn bind(
        config: Arc<BridgeConfig>,
        inbound_topic: impl Into<Arc<str>>,
        inbound: mpsc::Sender<Vec<u8>>,
        publisher: BridgePublisher,
    ) -> Result<Self, RemoteError> {
        let socket_path = &config.socket_path;

        // Remove a stale socket, refusing to follow symlinks.
        if let Ok(metadata) = std::fs::symlink_metadata(socket_path) {
            if metadata.file_type().is_symlink() {
                return Err(RemoteError::Socket {
                    message: format!(
                        "Socket path {} is a symlink, refusing to remove",
                        socket_path.display()
                    ),
                });
            }

            std::fs::remove_file(socket_path).map_err(|e| RemoteError::Socket {
                message: format!(
                    "Failed to remove existing socket file {}: {}",
                    socket_path.display(),
                    e
                ),
            })?;
        }

        if let Some(parent) = socket_path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| RemoteError::Socket {
                message: format!(
                    "Failed to create socket directory {}: {}",
                    parent.display(),
                    e
                ),
            })?;
        }

        let listener = UnixListener::bind(socket_path).map_err(|e| RemoteError::Socket {
            message: format!("Failed to bind to socket {}: {}", socket_path.display(), e),
        })?;

        Self::set_socket_permissions(socket_path, &config.permissions)?;

        info!(path = %socket_path.display(), "Broker bridge bound");

        Ok(Self {
            listener,
            config,
            inbound_topic: inbound_topic.into(),
            inbound,
            publisher,
            active: Arc::new(AtomicUsize::new(0)),
        })
    }

    /// Set socket file permissions.
    fn set_socket_permissions(path: &Path, permissions_str: &str) -> Result<(), RemoteError> {
        let mode = u32::from_str_radix(permissions_str, 8).map_err(|e| RemoteError::Socket {
            message: format!("Invalid socket permissions '{}': {}", permissions_str, e),
        })?;

        std::fs::set_permissions(path, std::fs::Permissions::from_mode(mode)).map_err(|e| {
            RemoteError::Socket {
                message: format!(
                    "Failed to set socket permissions on {}: {}",
                    path.display(),
                    e
                ),
            }
        })
    }

    /// Currently connected forwarders.
    pub fn active(&self) -> usize {
        self.active.load(Ordering::Relaxed)
    }

    /// Accept forwarder connections until `shutdown` is notified.
    pub async fn run(&self, shutdown: Arc<Notify>) -> Result<(), RemoteError> {
        info!(topic = %self.inbound_topic, "Broker bridge running");

        loop {
            tokio::select! {
                result = self.listener.accept() => {
                    match result {
                        Ok((stream, _addr)) => {
                            let config = Arc::clone(&self.config);
                            let inbound_topic = Arc::clone(&self.inbound_topic);
                            let inbound = self.inbound.clone();
                            let outbound = self.publisher.subscribe();
                            let active = Arc::clone(&self.active);
                            let shutdown = Arc::clone(&shutdown);

                            active.fetch_add(1, Ordering::Relaxed);
                            debug!(active = active.load(Ordering::Relaxed), "Forwarder connected");

                            tokio::spawn(async move {
                                let result = handle_connection(
                                    stream,
                                    config,
                                    inbound_topic,
                                    inbound,
                                    outbound,
                                    shutdown,
                                )
                                .await;

                                if let Err(e) = result {
                                    if !matches!(
                                        &e,
                                        RemoteError::Protocol {
                                            kind: ProtocolErrorKind::ConnectionClosed
                                        }
                                    ) {
                                        error!(error = %e, "Bridge connection error");
                                    }
                                }

                                active.fetch_sub(1, Ordering::Relaxed);
                                debug!(active = active.load(Ordering::Relaxed), "Forwarder disconnected");
                            });
                        }
                        Err(e) => {
                            warn!(error = %e, "Failed to accept bridge connection");
                        }
                    }
                }
                _ = shutdown.notified() => {
                    info!("Shutdown signal received, stopping broker bridge");
                    break;
                }
            }
        }

        Ok(())
    }

    /// Wait for all forwarder connections to close.
    pub async fn wait_for_drain(&self) {
        let poll_interval = std::time::Duration::from_millis(100);

        while self.active() > 0 {
            debug!(active = self.active(), "Waiting for bridge connections to drain");
            tokio::time::sleep(poll_interval).await;
        }

        info!("All bridge connections drained");
    }
}
