//! Mesh Remote Daemon - signed remote commands for a mesh radio node.

use std::env;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use tokio::signal;
use tokio::sync::{mpsc, watch, Notify};
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use mesh_remote::audit::AuditLogger;
use mesh_remote::auth::{Allowlist, CommandVerifier, NonceStore};
use mesh_remote::broker::{BridgeListener, BridgePublisher};
use mesh_remote::config::{KeySource, Settings};
use mesh_remote::error::RemoteError;
use mesh_remote::serial::SerialPortLink;
use mesh_remote::service::RemoteService;
use mesh_remote::signer::{DeviceKeyProvider, FileKeyProvider, KeyProvider, NodeKey, ResponseSigner};

const VERSION: &str = env!("CARGO_PKG_VERSION");
const NAME: &str = env!("CARGO_PKG_NAME");

/// Outbound publications buffered per bridge client.
const OUTBOUND_CAPACITY: usize = 64;

fn main() -> ExitCode {
    let args: Vec<String> = env::args().collect();

    if args.iter().any(|a| a == "--help" || a == "-h") {
        print_help();
        return ExitCode::SUCCESS;
    }

    if args.iter().any(|a| a == "--version" || a == "-V") {
        println!("{} {}", NAME, VERSION);
        return ExitCode::SUCCESS;
    }

    let config_path = get_config_path(&args);

    let settings = match Settings::load(&config_path) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("Error loading configuration: {}", e);
            return ExitCode::FAILURE;
        }
    };

    if let Err(e) = init_logging(&settings) {
        eprintln!("Error initializing logging: {}", e);
        return ExitCode::FAILURE;
    }

    info!("Starting {} v{}", NAME, VERSION);
    info!("Configuration loaded from: {}", config_path);
    info!("Serial port: {}", settings.serial.port);
    info!("Bridge socket: {}", settings.bridge.socket_path.display());

    // The serial link and the key are set up before the runtime: both block.
    let mut link = match SerialPortLink::open(&settings.serial, settings.security.command_timeout()) {
        Ok(link) => link,
        Err(e) => {
            error!(error = %e, "Failed to open serial port");
            return ExitCode::FAILURE;
        }
    };

    let key = match load_signing_key(&settings, &mut link) {
        Ok(key) => key,
        Err(e) => {
            error!(error = %e, "Failed to obtain node signing key");
            return ExitCode::FAILURE;
        }
    };

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(runtime) => runtime,
        Err(e) => {
            error!(error = %e, "Failed to create Tokio runtime");
            return ExitCode::FAILURE;
        }
    };

    match runtime.block_on(async_main(settings, config_path, link, key)) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "Daemon failed");
            ExitCode::FAILURE
        }
    }
}

/// Fetch the node key once, from the device or a key file.
fn load_signing_key(settings: &Settings, link: &mut SerialPortLink) -> Result<NodeKey, RemoteError> {
    match settings.key.source {
        KeySource::Device => DeviceKeyProvider::new(link).signing_key(),
        KeySource::File => {
            let path = settings.key.path.clone().ok_or_else(|| RemoteError::Config {
                message: "key.path is required when key.source = \"file\"".to_string(),
            })?;
            FileKeyProvider::new(path).signing_key()
        }
    }
}

async fn async_main(
    settings: Settings,
    config_path: String,
    link: SerialPortLink,
    key: NodeKey,
) -> Result<(), Box<dyn std::error::Error>> {
    let topics = settings.topics.resolve(key.public_hex());
    info!(inbound = %topics.inbound, outbound = %topics.outbound, "Command topics");

    // Replay protection
    let nonce_store = Arc::new(NonceStore::new(settings.security.nonce_ttl()));
    let sweeper = nonce_store.start_cleanup_task(settings.security.nonce_sweep_interval());

    let allowlist = Arc::new(settings.security.allowlist()?);
    let (allowlist_tx, allowlist_rx) = watch::channel(Arc::clone(&allowlist));
    let verifier = CommandVerifier::new(
        allowlist,
        Arc::clone(&nonce_store),
        settings.security.clock_skew_seconds,
    );

    let publisher = BridgePublisher::new(OUTBOUND_CAPACITY);
    let signer = ResponseSigner::new(key, Arc::new(publisher.clone()), topics.outbound.clone());

    let mut service = RemoteService::with_link(
        verifier,
        signer,
        link,
        settings.security.command_timeout(),
    )?;
    if settings.audit.enabled {
        let audit = AuditLogger::new(&settings.audit.log_path)?;
        info!(path = %audit.path().display(), "Audit logging enabled");
        service = service.with_audit(Arc::new(audit));
    }

    let shutdown = Arc::new(Notify::new());
    let (inbound_tx, inbound_rx) = mpsc::channel(settings.bridge.inbound_queue);
    let service_task = tokio::spawn(service.run(inbound_rx, allowlist_rx, Arc::clone(&shutdown)));

    let listener = BridgeListener::bind(
        Arc::new(settings.bridge.clone()),
        topics.inbound.clone(),
        inbound_tx,
        publisher,
    )
    .await?;

    loop {
        tokio::select! {
            result = listener.run(Arc::clone(&shutdown)) => {
                if let Err(e) = result {
                    error!(error = %e, "Broker bridge failed");
                    shutdown.notify_waiters();
                    sweeper.abort();
                    return Err(e.into());
                }
                break;
            }
            _ = shutdown_signal() => {
                info!("Shutdown signal received, initiating graceful shutdown...");
                shutdown.notify_waiters();

                let drain_timeout = Duration::from_secs(settings.bridge.socket_timeout_seconds);
                match tokio::time::timeout(drain_timeout, listener.wait_for_drain()).await {
                    Ok(()) => info!("Graceful shutdown complete"),
                    Err(_) => warn!(
                        "Shutdown timeout after {}s, some bridge connections may be terminated",
                        drain_timeout.as_secs()
                    ),
                }
                break;
            }
            _ = reload_signal() => {
                info!("Reload signal received, reloading companion allowlist...");
                match reload_allowlist(&config_path) {
                    Ok(allowlist) => {
                        let companions = allowlist.len();
                        if allowlist_tx.send(Arc::new(allowlist)).is_err() {
                            warn!("Command intake stopped, allowlist not applied");
                        } else {
                            info!(companions, "Allowlist reload queued; other settings need a restart");
                        }
                    }
                    Err(e) => {
                        error!(error = %e, "Failed to reload configuration, keeping existing allowlist");
                    }
                }
            }
        }
    }

    sweeper.abort();
    if let Err(e) = service_task.await {
        error!(error = %e, "Command intake task failed");
    }

    info!("Daemon stopped");
    Ok(())
}

fn reload_allowlist(config_path: &str) -> Result<Allowlist, RemoteError> {
    Settings::load(config_path)?.security.allowlist()
}

/// Wait for a shutdown signal (SIGTERM or SIGINT).
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

/// Wait for a reload signal (SIGHUP).
#[cfg(unix)]
async fn reload_signal() {
    match signal::unix::signal(signal::unix::SignalKind::hangup()) {
        Ok(mut stream) => {
            stream.recv().await;
        }
        Err(e) => {
            error!(error = %e, "Failed to install SIGHUP handler");
            std::future::pending::<()>().await;
        }
    }
}

/// No-op reload signal for non-Unix platforms.
#[cfg(not(unix))]
async fn reload_signal() {
    std::future::pending::<()>().await;
}

fn print_help() {
    println!(
        r#"{} {}
Secure remote-command channel for a mesh radio node.

USAGE:
    {} [OPTIONS]

OPTIONS:
    -c, --config <PATH>    Path to configuration file
                           [default: /etc/mesh-remote/daemon.toml]
    -h, --help             Print help information
    -V, --version          Print version information

SIGNALS:
    SIGHUP                 Reload the companion allowlist
    SIGTERM, SIGINT        Graceful shutdown
"#,
        NAME, VERSION, NAME
    );
}

/// Get configuration file path from command line arguments.
fn get_config_path(args: &[String]) -> String {
    for (i, arg) in args.iter().enumerate() {
        if (arg == "--config" || arg == "-c") && i + 1 < args.len() {
            return args[i + 1].clone();
        }
        if let Some(path) = arg.strip_prefix("--config=") {
            return path.to_string();
        }
    }
    "/etc/mesh-remote/daemon.toml".to_string()
}

/// Initialize logging based on settings.
fn init_logging(settings: &Settings) -> Result<(), Box<dyn std::error::Error>> {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&settings.logging.level));

    match settings.logging.format.to_lowercase().as_str() {
        "json" => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(fmt::layer().json())
                .try_init()?;
        }
        _ => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(fmt::layer().pretty())
                .try_init()?;
        }
    }

    Ok(())
}
