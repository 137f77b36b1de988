//! Length-prefixed document framing.
//!
//! ```text
//! +----------------+---------------------------+
//! | length (u32 BE)| UTF-8 XML document        |
//! +----------------+---------------------------+
//!  \_____________ length bytes ______________/
//! ```
//!
//! The length counts the 4-byte header itself, so the smallest meaningful
//! frame is 5 bytes.

use std::io;

use bytes::{BufMut, Bytes, BytesMut};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Size of the length header.
pub const HEADER_LEN: usize = 4;

/// Smallest valid total frame length.
pub const MIN_FRAME_LEN: usize = HEADER_LEN + 1;

/// Default upper bound on total frame length.
pub const DEFAULT_MAX_FRAME_LEN: usize = 1024 * 1024;

/// Framing failure.
#[derive(Error, Debug)]
pub enum FrameError {
    /// Declared length is below the minimum.
    #[error("Frame length {0} below minimum {MIN_FRAME_LEN}")]
    TooShort(u32),

    /// Declared length exceeds the configured maximum.
    #[error("Frame length {len} exceeds maximum {max}")]
    TooLarge {
        /// Declared length
        len: u32,
        /// Configured maximum
        max: usize,
    },

    /// Peer closed the stream between frames.
    #[error("Connection closed by peer")]
    Closed,

    /// Stream failed, including EOF inside a frame.
    #[error("Frame I/O error: {0}")]
    Io(#[from] io::Error),
}

impl FrameError {
    /// Whether the peer sent an invalid length header.
    pub fn is_malformed(&self) -> bool {
        matches!(self, Self::TooShort(_) | Self::TooLarge { .. })
    }

    /// Whether the read was interrupted at a frame boundary. No bytes of the
    /// next frame were consumed, so the stream is still in sync.
    pub fn is_interrupted(&self) -> bool {
        matches!(self, Self::Io(e) if e.kind() == io::ErrorKind::Interrupted)
    }
}

/// Read one frame and return its document bytes.
///
/// An interrupted read before the first header byte is returned to the
/// caller. Once a frame has started, interrupted reads are retried.
pub async fn read_frame<R>(reader: &mut R, max_len: usize) -> Result<Bytes, FrameError>
where
    R: AsyncRead + Unpin,
{
    let mut header = [0u8; HEADER_LEN];
    let mut filled = 0;
    while filled < HEADER_LEN {
        let n = match reader.read(&mut header[filled..]).await {
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted && filled > 0 => continue,
            Err(e) => return Err(e.into()),
        };
        if n == 0 {
            return Err(if filled == 0 {
                FrameError::Closed
            } else {
                FrameError::Io(io::ErrorKind::UnexpectedEof.into())
            });
        }
        filled += n;
    }

    let len = u32::from_be_bytes(header);
    if (len as usize) < MIN_FRAME_LEN {
        return Err(FrameError::TooShort(len));
    }
    if len as usize > max_len {
        return Err(FrameError::TooLarge { len, max: max_len });
    }

    let mut body = BytesMut::zeroed(len as usize - HEADER_LEN);
    let mut filled = 0;
    while filled < body.len() {
        match reader.read(&mut body[filled..]).await {
            Ok(0) => return Err(FrameError::Io(io::ErrorKind::UnexpectedEof.into())),
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e.into()),
        }
    }
    Ok(body.freeze())
}

/// Prefix a document with its length header.
pub fn encode_frame(document: &[u8]) -> Result<Bytes, FrameError> {
    let total = document.len() + HEADER_LEN;
    let len = u32::try_from(total).map_err(|_| FrameError::TooLarge {
        len: u32::MAX,
        max: u32::MAX as usize,
    })?;

    let mut frame = BytesMut::with_capacity(total);
    frame.put_u32(len);
    frame.put_slice(document);
    Ok(frame.freeze())
}

/// Write one document as a frame and flush.
pub async fn write_frame<W>(writer: &mut W, document: &[u8]) -> Result<(), FrameError>
where
    W: AsyncWrite + Unpin,
{
    let frame = encode_frame(document)?;
    writer.write_all(&frame).await?;
    writer.flush().await?;
    Ok(())
}
