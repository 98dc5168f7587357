//! Typed frame codec for the presence service's local IPC channel.
//!
//! Wire layout: opcode (`u32` LE), payload length (`u32` LE), JSON payload.

use std::io;

use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{trace, warn};

/// Maximum frame payload accepted from the presence service (64 KiB).
pub const MAX_FRAME_BYTES: usize = 64 * 1024;

const HEADER_LEN: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum Opcode {
    Handshake = 0,
    Frame = 1,
    Close = 2,
    Ping = 3,
    Pong = 4,
}

impl TryFrom<u32> for Opcode {
    type Error = FrameError;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Opcode::Handshake),
            1 => Ok(Opcode::Frame),
            2 => Ok(Opcode::Close),
            3 => Ok(Opcode::Ping),
            4 => Ok(Opcode::Pong),
            other => Err(FrameError::UnknownOpcode(other)),
        }
    }
}

#[derive(Debug, Error)]
pub enum FrameError {
    #[error("frame i/o failed: {0}")]
    Io(#[from] io::Error),

    #[error("frame exceeds max: {len} > {max}")]
    TooLarge { len: usize, max: usize },

    #[error("unknown opcode {0}")]
    UnknownOpcode(u32),
}

impl FrameError {
    /// True for failures caused by the peer sending something invalid,
    /// as opposed to the channel going away.
    pub fn is_protocol_violation(&self) -> bool {
        !matches!(self, FrameError::Io(_))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub opcode: Opcode,
    pub payload: Vec<u8>,
}

/// Write one typed frame and flush.
pub async fn write_frame<W>(writer: &mut W, opcode: Opcode, payload: &[u8]) -> Result<(), FrameError>
where
    W: AsyncWrite + Unpin,
{
    let len: u32 = payload.len().try_into().map_err(|_| FrameError::TooLarge {
        len: payload.len(),
        max: u32::MAX as usize,
    })?;

    let mut header = [0u8; HEADER_LEN];
    header[..4].copy_from_slice(&(opcode as u32).to_le_bytes());
    header[4..].copy_from_slice(&len.to_le_bytes());

    trace!(stage = "write_header", opcode = ?opcode, len, "writing frame header");
    writer.write_all(&header).await?;
    trace!(stage = "write_payload", len, "writing frame payload");
    writer.write_all(payload).await?;
    writer.flush().await?;
    Ok(())
}

/// Read one typed frame enforcing an upper bound on the payload.
///
/// Returns `Ok(None)` if the stream ends cleanly before a header starts.
pub async fn read_frame<R>(reader: &mut R, max_frame_bytes: usize) -> Result<Option<Frame>, FrameError>
where
    R: AsyncRead + Unpin,
{
    let mut header = [0u8; HEADER_LEN];
    trace!(stage = "read_header", "reading frame header");

    let n = reader.read(&mut header).await?;
    if n == 0 {
        return Ok(None);
    }
    if n < HEADER_LEN {
        if let Err(e) = reader.read_exact(&mut header[n..]).await {
            if e.kind() == io::ErrorKind::UnexpectedEof {
                warn!(
                    stage = "read_header",
                    error = %e,
                    expected = HEADER_LEN,
                    read = n,
                    "unexpected eof reading frame header"
                );
            }
            return Err(e.into());
        }
    }

    let raw_opcode = u32::from_le_bytes([header[0], header[1], header[2], header[3]]);
    let len = u32::from_le_bytes([header[4], header[5], header[6], header[7]]) as usize;
    let opcode = Opcode::try_from(raw_opcode)?;
    if len > max_frame_bytes {
        return Err(FrameError::TooLarge {
            len,
            max: max_frame_bytes,
        });
    }

    let mut payload = vec![0u8; len];
    trace!(stage = "read_payload", opcode = ?opcode, len, "reading frame payload");
    if let Err(e) = reader.read_exact(&mut payload).await {
        if e.kind() == io::ErrorKind::UnexpectedEof {
            warn!(
                stage = "read_payload",
                error = %e,
                expected = len,
                "unexpected eof reading frame payload"
            );
        }
        return Err(e.into());
    }
    Ok(Some(Frame { opcode, payload }))
}
