//! Transport layer for EPP sessions.
//!
//! Provides framing plus pluggable stream backends:
//! - **TCP**: plain stream, for development and trusted networks
//! - **TLS**: rustls over TCP, as required by RFC 5734
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │        Connection worker / EppClient    │
//! │         (Transport-Agnostic)            │
//! └──────────────────┬──────────────────────┘
//!                    │  frames (u32 length + XML)
//!          ┌────────┴────────┐
//!          ▼                 ▼
//! ┌─────────────────┐ ┌─────────────────┐
//! │  TcpTransport   │ │  TlsTransport   │
//! └─────────────────┘ └─────────────────┘
//! ```
//!
//! Clients go through [`ConnectionFactory`], which resolves the
//! [`TransportKind`] from a [`ConnectionDescriptor`] via a fixed strategy
//! table and optionally tunnels through a [`ProxyChain`] first.
//!
//! # Usage
//!
//! ```rust,ignore
//! use epp::transport::{ConnectionDescriptor, ConnectionFactory, TransportKind};
//!
//! let descriptor = ConnectionDescriptor::new("epp.example.net", 700)
//!     .with_transport(TransportKind::Tls);
//! let connection = ConnectionFactory::new(descriptor).connect().await?;
//! ```

mod config;
mod connector;
mod frame;
mod proxy;
mod tcp;
mod tls;

pub use config::{CertConfig, ClientTlsConfig, RootSource, TlsConfig};
pub use connector::{Connection, ConnectionDescriptor, ConnectionFactory};
pub use frame::{
    encode_frame, read_frame, write_frame, FrameError, DEFAULT_MAX_FRAME_LEN, HEADER_LEN,
    MIN_FRAME_LEN,
};
pub use proxy::{ProxyChain, ProxyHop};
pub use tcp::TcpTransport;
pub use tls::TlsTransport;

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpListener;

use crate::error::{EppError, Result};
use crate::server::ServerContext;

/// A bidirectional byte stream a session can run over.
pub trait AsyncStream: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T> AsyncStream for T where T: AsyncRead + AsyncWrite + Unpin + Send {}

/// Type-erased stream produced by a connect strategy.
pub type BoxedStream = Box<dyn AsyncStream>;

/// Transport kind selection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    /// Plain TCP (default)
    #[default]
    Tcp,
    /// TLS over TCP
    Tls,
}

impl TransportKind {
    /// Get descriptive name.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Tcp => "TCP",
            Self::Tls => "TLS",
        }
    }
}

impl std::fmt::Display for TransportKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl std::str::FromStr for TransportKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "tcp" | "plain" => Ok(Self::Tcp),
            "tls" | "ssl" => Ok(Self::Tls),
            _ => Err(format!("Unknown transport kind: {}", s)),
        }
    }
}

/// Server-side transport backend.
///
/// Implementations own the accept loop and hand every accepted stream to
/// the connection worker; the server itself never sees sockets.
pub trait Transport: Send + Sync {
    /// Accept connections on `listener` until the task is dropped.
    fn serve(
        &self,
        listener: TcpListener,
        ctx: Arc<ServerContext>,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>>;

    /// Get the transport name for logging.
    fn name(&self) -> &'static str;
}

/// Server strategy table.
pub fn server_transport(
    kind: TransportKind,
    tls: Option<&TlsConfig>,
) -> Result<Box<dyn Transport>> {
    match kind {
        TransportKind::Tcp => Ok(Box::new(TcpTransport)),
        TransportKind::Tls => {
            let tls = tls.ok_or_else(|| {
                EppError::Config("TLS transport selected without certificate config".to_string())
            })?;
            Ok(Box::new(TlsTransport::new(tls)?))
        },
    }
}
