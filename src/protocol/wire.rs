//! Wire format for bridge framing.
//!
//! Frames are length-prefixed JSON: [4 bytes big-endian u32][payload]

use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::time::timeout;

use crate::error::{ProtocolErrorKind, RemoteError};

/// Default maximum frame size (64 KiB).
pub const DEFAULT_MAX_FRAME_SIZE: usize = 65_536;

/// Read one length-prefixed frame and return its payload.
pub async fn read_message<R>(reader: &mut R, max_size: usize) -> Result<Vec<u8>, RemoteError>
where
    R: AsyncReadExt + Unpin,
{
    let mut len_buf = [0u8; 4];
    match reader.read_exact(&mut len_buf).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
            return Err(RemoteError::Protocol {
                kind: ProtocolErrorKind::ConnectionClosed,
            });
        }
        Err(e) => return Err(RemoteError::Io(e)),
    }

    let len = u32::from_be_bytes(len_buf) as usize;
    if len > max_size {
        return Err(RemoteError::Protocol {
            kind: ProtocolErrorKind::MessageTooLarge {
                size: len,
                max: max_size,
            },
        });
    }

    let mut buf = vec![0u8; len];
    reader.read_exact(&mut buf).await?;

    Ok(buf)
}

/// Write one length-prefixed frame.
pub async fn write_message<W>(writer: &mut W, data: &[u8]) -> Result<(), RemoteError>
where
    W: AsyncWriteExt + Unpin,
{
    let len = u32::try_from(data.len()).map_err(|_| RemoteError::Protocol {
        kind: ProtocolErrorKind::MessageTooLarge {
            size: data.len(),
            max: u32::MAX as usize,
        },
    })?;
    writer.write_all(&len.to_be_bytes()).await?;
    writer.write_all(data).await?;
    writer.flush().await?;
    Ok(())
}

/// Read a frame and decode its JSON payload.
pub async fn read_frame<R, T>(reader: &mut R, max_size: usize) -> Result<T, RemoteError>
where
    R: AsyncReadExt + Unpin,
    T: DeserializeOwned,
{
    let bytes = read_message(reader, max_size).await?;
    serde_json::from_slice(&bytes).map_err(|e| RemoteError::Protocol {
        kind: ProtocolErrorKind::InvalidMessageFormat {
            message: format!("Invalid JSON: {}", e),
        },
    })
}

/// Encode a value as JSON and write it as a frame, bounded by a timeout.
///
/// Returns a ConnectionTimeout error if the write takes longer than `timeout_duration`.
pub async fn write_frame_with_timeout<W, T>(
    writer: &mut W,
    value: &T,
    timeout_duration: Duration,
) -> Result<(), RemoteError>
where
    W: AsyncWriteExt + Unpin,
    T: Serialize,
{
    let bytes = serde_json::to_vec(value)?;
    timeout(timeout_duration, write_message(writer, &bytes))
        .await
        .map_err(|_| RemoteError::Protocol {
            kind: ProtocolErrorKind::ConnectionTimeout,
        })?
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Value};
    use std::io::Cursor;

    #[tokio::test]
    async fn test_frame_layout() {
        let mut buffer = Vec::new();
        write_message(&mut buffer, b"hello world").await.unwrap();

        assert_eq!(&buffer[0..4], &[0, 0, 0, 11]); // length = 11
        assert_eq!(&buffer[4..], b"hello world");
    }

    #[tokio::test]
    async fn test_json_frame_read_back() {
        let mut buffer = Vec::new();
        write_frame_with_timeout(&mut buffer, &json!({"topic": "t"}), Duration::from_secs(1))
            .await
            .unwrap();

        let mut cursor = Cursor::new(buffer);
        let value: Value = read_frame(&mut cursor, DEFAULT_MAX_FRAME_SIZE).await.unwrap();
        assert_eq!(value["topic"], "t");
    }

    #[tokio::test]
    async fn test_message_too_large() {
        let mut data = vec![0u8; 100];
        data[0..4].copy_from_slice(&2_000_000u32.to_be_bytes());
        let mut cursor = Cursor::new(data);

        let result = read_message(&mut cursor, DEFAULT_MAX_FRAME_SIZE).await;
        assert!(matches!(
            result,
            Err(RemoteError::Protocol {
                kind: ProtocolErrorKind::MessageTooLarge { .. }
            })
        ));
    }

    #[tokio::test]
    async fn test_eof_is_connection_closed() {
        let mut cursor = Cursor::new(Vec::<u8>::new());
        let result = read_message(&mut cursor, DEFAULT_MAX_FRAME_SIZE).await;
        assert!(matches!(
            result,
            Err(RemoteError::Protocol {
                kind: ProtocolErrorKind::ConnectionClosed
            })
        ));
    }

    #[tokio::test]
    async fn test_invalid_json_frame() {
        let mut buffer = Vec::new();
        write_message(&mut buffer, b"not json").await.unwrap();
        let mut cursor = Cursor::new(buffer);

        let result: Result<Value, _> = read_frame(&mut cursor, DEFAULT_MAX_FRAME_SIZE).await;
        assert!(matches!(
            result,
            Err(RemoteError::Protocol {
                kind: ProtocolErrorKind::InvalidMessageFormat { .. }
            })
        ));
    }
}
