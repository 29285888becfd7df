//! Audit logger writing JSON lines.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use tracing::{debug, warn};

use crate::error::RemoteError;

use super::entry::AuditEntry;

/// Appends audit entries to a file, one JSON object per line.
pub struct AuditLogger {
    file: Mutex<File>,
    path: PathBuf,
}

impl AuditLogger {
    /// Open `path` for appending, creating the parent directory if needed.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be created or the file
    /// cannot be opened.
    pub fn new(path: &Path) -> Result<Self, RemoteError> {
        if let Some(parent) = path.parent() {
            if !parent.exists() {
                debug!(path = %parent.display(), "Creating audit log directory");
                std::fs::create_dir_all(parent)?;
            }
        }

        let file = OpenOptions::new().create(true).append(true).open(path)?;

        debug!(path = %path.display(), "Audit logger initialized");

        Ok(Self {
            file: Mutex::new(file),
            path: path.to_path_buf(),
        })
    }

    /// Write one entry and sync it to disk.
    pub fn log(&self, entry: &AuditEntry) -> Result<(), RemoteError> {
        let json = serde_json::to_string(entry)?;

        let mut file = self.file.lock().map_err(|e| RemoteError::Config {
            message: format!("Failed to acquire audit log lock: {}", e),
        })?;

        writeln!(file, "{}", json)?;

        if let Err(e) = file.sync_data() {
            warn!(error = %e, "Failed to sync audit log");
        }

        debug!(request_id = %entry.request_id, "Audit entry logged");

        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}
