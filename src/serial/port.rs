//! Serial port backed link to the radio node.

use std::io::{ErrorKind, Read, Write};
use std::time::{Duration, Instant};

use serialport::{ClearBuffer, SerialPort};
use tracing::debug;

use crate::config::SerialConfig;
use crate::error::{RemoteError, SerialErrorKind};

use super::{ResponseAssembler, SerialLink};

/// Line-oriented command link over a physical serial port.
pub struct SerialPortLink {
    port: Box<dyn SerialPort>,
    port_name: String,
    line_ending: String,
    completion_marker: String,
    /// Total read budget per exchange.
    read_budget: Duration,
}

impl SerialPortLink {
    /// Open the configured port.
    ///
    /// `read_budget` bounds one exchange; it should not exceed the command
    /// timeout, or the worker keeps reading after the command was abandoned.
    pub fn open(config: &SerialConfig, read_budget: Duration) -> Result<Self, RemoteError> {
        debug!(
            port = %config.port,
            baud_rate = config.baud_rate,
            "Opening serial port"
        );

        let mut builder = serialport::new(&config.port, config.baud_rate)
            .timeout(Duration::from_millis(config.read_timeout_ms));
        #[cfg(unix)]
        {
            builder = builder
                .data_bits(serialport::DataBits::Eight)
                .stop_bits(serialport::StopBits::One)
                .parity(serialport::Parity::None);
        }
        let port = builder.open().map_err(|e| {
            RemoteError::serial(SerialErrorKind::Open {
                port: config.port.clone(),
                message: e.to_string(),
            })
        })?;

        Ok(Self {
            port,
            port_name: config.port.clone(),
            line_ending: config.line_ending.clone(),
            completion_marker: config.completion_marker.clone(),
            read_budget,
        })
    }

    fn disconnected(&self, e: impl std::fmt::Display) -> RemoteError {
        RemoteError::serial(SerialErrorKind::Disconnected {
            message: format!("{}: {}", self.port_name, e),
        })
    }
}

impl SerialLink for SerialPortLink {
    fn exchange(&mut self, command: &str) -> Result<Vec<String>, RemoteError> {
        // Drop unsolicited output (log lines, stale replies) before writing.
        if let Err(e) = self.port.clear(ClearBuffer::Input) {
            debug!(error = %e, "Failed to clear serial input buffer");
        }

        let line = format!("{}{}", command, self.line_ending);
        self.port
            .write_all(line.as_bytes())
            .and_then(|_| self.port.flush())
            .map_err(|e| self.disconnected(e))?;

        let mut assembler = ResponseAssembler::new(&self.completion_marker, command);
        let mut chunk = [0u8; 256];
        let start = Instant::now();

        loop {
            if start.elapsed() > self.read_budget {
                return Err(RemoteError::serial(SerialErrorKind::ReadTimeout {
                    timeout_ms: self.read_budget.as_millis() as u64,
                }));
            }

            match self.port.read(&mut chunk) {
                Ok(0) => return Err(RemoteError::serial(SerialErrorKind::Closed)),
                Ok(n) => {
                    if let Some(lines) = assembler.feed(&chunk[..n]) {
                        debug!(
                            lines = lines.len(),
                            duration_ms = start.elapsed().as_millis() as u64,
                            "Serial exchange completed"
                        );
                        return Ok(lines);
                    }
                }
                Err(e) if e.kind() == ErrorKind::TimedOut || e.kind() == ErrorKind::Interrupted => {
                    continue
                }
                Err(e) => return Err(self.disconnected(e)),
            }
        }
    }
}
