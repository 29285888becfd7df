//! Serial request/response contract.

use crate::error::RemoteError;

/// A blocking request/response exchange over the node's serial line.
///
/// Implementations know nothing about envelopes or deadlines. The
/// dispatcher runs them on a dedicated thread.
pub trait SerialLink: Send {
    /// Write `command` and return the response lines, ending with the
    /// terminal line.
    fn exchange(&mut self, command: &str) -> Result<Vec<String>, RemoteError>;
}

impl<L: SerialLink + ?Sized> SerialLink for Box<L> {
    fn exchange(&mut self, command: &str) -> Result<Vec<String>, RemoteError> {
        (**self).exchange(command)
    }
}

/// Incremental line splitter for command responses.
///
/// Skips blank lines and the node's echo of the command; a line starting
/// with the completion marker ends the response.
#[derive(Debug)]
pub struct ResponseAssembler {
    marker: String,
    echo: String,
    pending: Vec<u8>,
    lines: Vec<String>,
}

impl ResponseAssembler {
    pub fn new(marker: &str, command: &str) -> Self {
        Self {
            marker: marker.to_string(),
            echo: command.trim().to_string(),
            pending: Vec::new(),
            lines: Vec::new(),
        }
    }

    /// Feed raw bytes. Returns the full response once the terminal line arrives.
    pub fn feed(&mut self, bytes: &[u8]) -> Option<Vec<String>> {
        self.pending.extend_from_slice(bytes);

        while let Some(pos) = self.pending.iter().position(|b| *b == b'\n') {
            let raw: Vec<u8> = self.pending.drain(..=pos).collect();
            let line = String::from_utf8_lossy(&raw).trim().to_string();
            if line.is_empty() || line == self.echo {
                continue;
            }

            let terminal = line.starts_with(&self.marker);
            self.lines.push(line);
            if terminal {
                return Some(std::mem::take(&mut self.lines));
            }
        }
        None
    }
}
