//! EPP error types.
//!
//! # Error Classes
//!
//! Errors are split by where they surface:
//!
//! - **Transport faults** (`Connect`, `Tls`, `Io`, `PoolTimeout`): the
//!   connection attempt or stream failed. These are returned to the caller as-is
//!   and are never turned into a protocol response.
//! - **Assembler faults** (`Frame`, `Decode`, `Encode`): a message could not be
//!   framed or mapped to typed objects. On the server these become a response
//!   carrying a specific result code, see [`crate::session::Fault`].
//! - **Command failures** (`CommandFailed`): the peer answered with a failure
//!   result. The full response is kept so nothing is swallowed.
//!
//! The `Connect` variant preserves the original cause via `#[source]`.

use thiserror::Error;

use crate::codec::{DecodeError, EncodeError};
use crate::protocol::Response;
use crate::transport::FrameError;

/// Boxed error cause for connection establishment failures.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// EPP engine errors.
#[derive(Error, Debug)]
pub enum EppError {
    /// Configuration error.
    #[error("Config error: {0}")]
    Config(String),

    /// Connection establishment failed (DNS, refused, proxy, handshake).
    ///
    /// All establishment failures normalize to this variant. The core never
    /// retries; retry policy belongs to the caller.
    #[error("Failed to connect to {target}: {source}")]
    Connect {
        /// Target the connection was aimed at (`host:port`).
        target: String,
        /// The original cause.
        #[source]
        source: BoxError,
    },

    /// TLS setup error (certificates, keys, server name).
    #[error("TLS error: {0}")]
    Tls(String),

    /// Framing error on the wire.
    #[error("Frame error: {0}")]
    Frame(#[from] FrameError),

    /// Message could not be decoded.
    #[error("Decode error: {0}")]
    Decode(#[from] DecodeError),

    /// Message could not be encoded.
    #[error("Encode error: {0}")]
    Encode(#[from] EncodeError),

    /// No pooled codec became available in time.
    #[error("Codec pool checkout timed out after {0:?}")]
    PoolTimeout(std::time::Duration),

    /// The peer answered a command with a failure result.
    #[error("Command failed: {}", .0.result())]
    CommandFailed(Box<Response>),

    /// The peer sent a message that does not fit the exchange.
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// The session was closed by the peer or after a session-ending result.
    #[error("Session closed")]
    SessionClosed,

    /// Server-side error.
    #[error("Server error: {0}")]
    Server(String),

    /// I/O error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for EPP operations
pub type Result<T> = std::result::Result<T, EppError>;

impl EppError {
    /// Build a connection error from any cause.
    pub fn connect(target: impl Into<String>, source: impl Into<BoxError>) -> Self {
        EppError::Connect {
            target: target.into(),
            source: source.into(),
        }
    }

    /// Get the server response carried by a command failure, if any.
    pub fn response(&self) -> Option<&Response> {
        match self {
            EppError::CommandFailed(response) => Some(response),
            _ => None,
        }
    }
}

impl From<toml::de::Error> for EppError {
    fn from(err: toml::de::Error) -> Self {
        EppError::Config(format!("Failed to parse config: {err}"))
    }
}

impl From<rustls::Error> for EppError {
    fn from(err: rustls::Error) -> Self {
        EppError::Tls(err.to_string())
    }
}
