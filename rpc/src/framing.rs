//! Length-prefixed framing for service connections
//!
//! Format: [4 bytes little-endian length][bincode payload]

use serde::de::DeserializeOwned;
use serde::Serialize;
use std::io;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Upper bound for a single frame; standings and stats replies stay far below.
pub const MAX_FRAME_SIZE: usize = 1024 * 1024;

#[derive(Debug, thiserror::Error)]
pub enum FramingError {
    #[error("connection closed")]
    ConnectionClosed,
    #[error("frame too large: {0} bytes (max {1})")]
    FrameTooLarge(usize, usize),
    #[error("io error: {0}")]
    Io(#[from] io::Error),
    #[error("codec error: {0}")]
    Codec(#[from] bincode::Error),
}

pub async fn read_frame<R, T>(stream: &mut R) -> Result<T, FramingError>
where
    R: AsyncRead + Unpin,
    T: DeserializeOwned,
{
    let mut len_buf = [0u8; 4];
    match stream.read_exact(&mut len_buf).await {
        Ok(_) => {}
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => {
            return Err(FramingError::ConnectionClosed);
        }
        Err(e) => return Err(FramingError::Io(e)),
    }

    let len = u32::from_le_bytes(len_buf) as usize;
    if len > MAX_FRAME_SIZE {
        return Err(FramingError::FrameTooLarge(len, MAX_FRAME_SIZE));
    }

    let mut buf = vec![0u8; len];
    match stream.read_exact(&mut buf).await {
        Ok(_) => {}
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => {
            return Err(FramingError::ConnectionClosed);
        }
        Err(e) => return Err(FramingError::Io(e)),
    }

    Ok(bincode::deserialize(&buf)?)
}

pub async fn write_frame<W, T>(stream: &mut W, frame: &T) -> Result<(), FramingError>
where
    W: AsyncWrite + Unpin,
    T: Serialize,
{
    let data = bincode::serialize(frame)?;
    if data.len() > MAX_FRAME_SIZE {
        return Err(FramingError::FrameTooLarge(data.len(), MAX_FRAME_SIZE));
    }

    stream.write_all(&(data.len() as u32).to_le_bytes()).await?;
    stream.write_all(&data).await?;
    stream.flush().await?;

    Ok(())
}
