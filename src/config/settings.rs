//! Configuration settings for the remote-command daemon.

use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::auth::Allowlist;
use crate::error::RemoteError;

/// Fixed lifetime of a command envelope, `exp - iat`.
pub const ENVELOPE_WINDOW_SECONDS: u64 = 30;

/// Main configuration structure for the daemon.
#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub security: SecurityConfig,
    pub serial: SerialConfig,
    #[serde(default)]
    pub key: KeyConfig,
    pub bridge: BridgeConfig,
    #[serde(default)]
    pub topics: TopicsConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub audit: AuditConfig,
}

/// Security configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct SecurityConfig {
    /// Hex-encoded Ed25519 public keys of authorized companions.
    #[serde(default)]
    pub allowed_companions: Vec<String>,
    /// Nonce time-to-live in seconds.
    #[serde(default = "default_nonce_ttl")]
    pub nonce_ttl_seconds: u64,
    /// Deadline for a dispatched command in seconds.
    #[serde(default = "default_command_timeout")]
    pub command_timeout_seconds: u64,
    /// Required `exp - iat` of command envelopes.
    #[serde(default = "default_envelope_window")]
    pub envelope_window_seconds: u64,
    /// Tolerated clock skew for future-dated envelopes.
    #[serde(default = "default_clock_skew")]
    pub clock_skew_seconds: u64,
    /// Interval between nonce sweeps.
    #[serde(default = "default_nonce_sweep_interval")]
    pub nonce_sweep_interval_seconds: u64,
}

/// Serial link configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct SerialConfig {
    /// Serial device path, e.g. `/dev/ttyUSB0`.
    pub port: String,
    #[serde(default = "default_baud_rate")]
    pub baud_rate: u32,
    /// Appended to every command written to the node.
    #[serde(default = "default_line_ending")]
    pub line_ending: String,
    /// Prefix of the line that terminates a command response.
    #[serde(default = "default_completion_marker")]
    pub completion_marker: String,
    /// Per-read timeout of the serial port in milliseconds.
    #[serde(default = "default_read_timeout_ms")]
    pub read_timeout_ms: u64,
}

/// Where the node signing key comes from.
#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum KeySource {
    /// Ask the node over the serial line.
    #[default]
    Device,
    /// Read a hex key file.
    File,
}

/// Signing key configuration.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct KeyConfig {
    #[serde(default)]
    pub source: KeySource,
    /// Key file path, required when `source = "file"`.
    pub path: Option<PathBuf>,
}

/// Broker bridge socket configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct BridgeConfig {
    /// Path to the Unix socket the broker forwarder connects to.
    pub socket_path: PathBuf,
    /// Socket file permissions (e.g., "0660").
    #[serde(default = "default_socket_permissions")]
    pub permissions: String,
    /// Maximum frame size in bytes.
    #[serde(default = "default_max_message_size")]
    pub max_message_size: usize,
    /// Socket write timeout in seconds.
    #[serde(default = "default_socket_timeout")]
    pub socket_timeout_seconds: u64,
    /// Capacity of the inbound queue feeding the intake loop.
    #[serde(default = "default_inbound_queue")]
    pub inbound_queue: usize,
}

/// Topic names. `{public_key}` is replaced by the node key.
#[derive(Debug, Clone, Deserialize)]
pub struct TopicsConfig {
    #[serde(default = "default_inbound_topic")]
    pub inbound: String,
    #[serde(default = "default_outbound_topic")]
    pub outbound: String,
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error).
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Log format ("pretty" or "json").
    #[serde(default = "default_log_format")]
    pub format: String,
}

/// Audit logging configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct AuditConfig {
    /// Whether audit logging is enabled.
    #[serde(default = "default_audit_enabled")]
    pub enabled: bool,
    /// Path to the audit log file.
    #[serde(default = "default_audit_log_path")]
    pub log_path: PathBuf,
}

// Default value functions
fn default_nonce_ttl() -> u64 {
    120
}

fn default_command_timeout() -> u64 {
    10
}

fn default_envelope_window() -> u64 {
    ENVELOPE_WINDOW_SECONDS
}

fn default_clock_skew() -> u64 {
    5
}

fn default_nonce_sweep_interval() -> u64 {
    30
}

fn default_baud_rate() -> u32 {
    115_200
}

fn default_line_ending() -> String {
    "\r\n".to_string()
}

fn default_completion_marker() -> String {
    "->".to_string()
}

fn default_read_timeout_ms() -> u64 {
    500
}

fn default_socket_permissions() -> String {
    "0660".to_string()
}

fn default_max_message_size() -> usize {
    65_536
}

fn default_socket_timeout() -> u64 {
    30
}

fn default_inbound_queue() -> usize {
    64
}

fn default_inbound_topic() -> String {
    "meshcore/{public_key}/command".to_string()
}

fn default_outbound_topic() -> String {
    "meshcore/{public_key}/response".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

fn default_audit_enabled() -> bool {
    true
}

fn default_audit_log_path() -> PathBuf {
    PathBuf::from("/var/log/mesh-remote/audit.log")
}

impl Default for TopicsConfig {
    fn default() -> Self {
        Self {
            inbound: default_inbound_topic(),
            outbound: default_outbound_topic(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            enabled: default_audit_enabled(),
            log_path: default_audit_log_path(),
        }
    }
}

impl SecurityConfig {
    /// Build the immutable allowlist from the configured keys.
    pub fn allowlist(&self) -> Result<Allowlist, RemoteError> {
        Allowlist::from_hex_keys(&self.allowed_companions)
    }

    pub fn nonce_ttl(&self) -> Duration {
        Duration::from_secs(self.nonce_ttl_seconds)
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.command_timeout_seconds)
    }

    pub fn nonce_sweep_interval(&self) -> Duration {
        Duration::from_secs(self.nonce_sweep_interval_seconds)
    }
}

impl TopicsConfig {
    /// Substitute `{public_key}` with the node key (uppercase hex).
    pub fn resolve(&self, node_public_key: &str) -> TopicsConfig {
        let key = node_public_key.to_uppercase();
        TopicsConfig {
            inbound: self.inbound.replace("{public_key}", &key),
            outbound: self.outbound.replace("{public_key}", &key),
        }
    }
}

impl Settings {
    /// Load settings from a TOML configuration file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, RemoteError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| RemoteError::Config {
            message: format!("Failed to read config file '{}': {}", path.display(), e),
        })?;

        Self::from_toml(&content).map_err(|e| match e {
            RemoteError::Config { message } => RemoteError::Config {
                message: format!("{} ({})", message, path.display()),
            },
            other => other,
        })
    }

    /// Parse and validate settings from TOML text.
    pub fn from_toml(content: &str) -> Result<Self, RemoteError> {
        let settings: Settings = toml::from_str(content).map_err(|e| RemoteError::Config {
            message: format!("Failed to parse config: {}", e),
        })?;

        settings.validate()?;

        Ok(settings)
    }

    /// Validate the settings.
    fn validate(&self) -> Result<(), RemoteError> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.logging.level.to_lowercase().as_str()) {
            return Err(RemoteError::Config {
                message: format!(
                    "Invalid log level '{}'. Valid levels: {:?}",
                    self.logging.level, valid_levels
                ),
            });
        }

        let valid_formats = ["pretty", "json"];
        if !valid_formats.contains(&self.logging.format.to_lowercase().as_str()) {
            return Err(RemoteError::Config {
                message: format!(
                    "Invalid log format '{}'. Valid formats: {:?}",
                    self.logging.format, valid_formats
                ),
            });
        }

        if self.security.envelope_window_seconds != ENVELOPE_WINDOW_SECONDS {
            return Err(RemoteError::Config {
                message: format!(
                    "envelope_window_seconds is fixed at {}s, got {}",
                    ENVELOPE_WINDOW_SECONDS, self.security.envelope_window_seconds
                ),
            });
        }

        for (name, value) in [
            ("nonce_ttl_seconds", self.security.nonce_ttl_seconds),
            ("command_timeout_seconds", self.security.command_timeout_seconds),
            (
                "nonce_sweep_interval_seconds",
                self.security.nonce_sweep_interval_seconds,
            ),
        ] {
            if value == 0 {
                return Err(RemoteError::Config {
                    message: format!("{} must be greater than zero", name),
                });
            }
        }

        if self.security.clock_skew_seconds > self.security.envelope_window_seconds {
            return Err(RemoteError::Config {
                message: format!(
                    "clock_skew_seconds ({}) must not exceed the envelope window ({}s)",
                    self.security.clock_skew_seconds, self.security.envelope_window_seconds
                ),
            });
        }

        // The replay cache has to outlive every envelope it protects.
        let replay_horizon = self
            .security
            .envelope_window_seconds
            .saturating_add(self.security.clock_skew_seconds);
        if self.security.nonce_ttl_seconds < replay_horizon {
            return Err(RemoteError::Config {
                message: format!(
                    "nonce_ttl_seconds ({}) must cover the envelope window plus clock skew ({})",
                    self.security.nonce_ttl_seconds, replay_horizon
                ),
            });
        }

        self.security.allowlist()?;

        if self.key.source == KeySource::File && self.key.path.is_none() {
            return Err(RemoteError::Config {
                message: "key.path is required when key.source = \"file\"".to_string(),
            });
        }

        if !self.bridge.permissions.chars().all(|c| c.is_digit(8)) {
            return Err(RemoteError::Config {
                message: format!(
                    "Invalid socket permissions '{}'. Must be octal (e.g., '0660')",
                    self.bridge.permissions
                ),
            });
        }

        if self.bridge.inbound_queue == 0 {
            return Err(RemoteError::Config {
                message: "bridge.inbound_queue must be greater than zero".to_string(),
            });
        }

        Ok(())
    }
}
