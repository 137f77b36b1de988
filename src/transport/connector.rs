//! Client connection establishment.
//!
//! [`ConnectionFactory`] turns a typed [`ConnectionDescriptor`] into a framed
//! [`Connection`]: resolve, connect with a timeout (optionally from a bound
//! local address), tunnel through the proxy chain, then upgrade the stream
//! with the strategy registered for the descriptor's [`TransportKind`].
//!
//! Every failure on that path is reported as [`EppError::Connect`] with the
//! original cause attached. Nothing is retried here.

use std::io;
use std::net::SocketAddr;
use std::time::Duration;

use bytes::Bytes;
use futures::future::BoxFuture;
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpSocket, TcpStream};
use tokio_rustls::TlsConnector;

use super::frame::{self, DEFAULT_MAX_FRAME_LEN};
use super::{BoxedStream, ClientTlsConfig, ProxyChain, TransportKind};
use crate::error::{BoxError, EppError, Result};

/// Where and how to connect.
#[derive(Debug, Clone)]
pub struct ConnectionDescriptor {
    /// Server host name or IP literal
    pub host: String,
    /// Server port
    pub port: u16,
    /// Stream kind
    pub transport: TransportKind,
    /// Required when `transport` is TLS
    pub tls: Option<ClientTlsConfig>,
    /// CONNECT proxies to traverse, first hop first
    pub proxies: ProxyChain,
    /// Bound on resolve + connect + tunnel + handshake
    pub connect_timeout: Duration,
    /// Bound on each frame read, `None` to wait forever
    pub read_timeout: Option<Duration>,
    /// Local address to bind before connecting
    pub bind_addr: Option<SocketAddr>,
    /// Largest frame accepted from the server
    pub max_frame_size: usize,
}

impl ConnectionDescriptor {
    /// Plain TCP descriptor with default timeouts.
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            transport: TransportKind::Tcp,
            tls: None,
            proxies: ProxyChain::default(),
            connect_timeout: Duration::from_secs(10),
            read_timeout: Some(Duration::from_secs(60)),
            bind_addr: None,
            max_frame_size: DEFAULT_MAX_FRAME_LEN,
        }
    }

    /// Set transport kind
    pub fn with_transport(mut self, transport: TransportKind) -> Self {
        self.transport = transport;
        self
    }

    /// Use TLS with the given client settings
    pub fn with_tls(mut self, tls: ClientTlsConfig) -> Self {
        self.transport = TransportKind::Tls;
        self.tls = Some(tls);
        self
    }

    /// Route through a proxy chain
    pub fn with_proxies(mut self, proxies: ProxyChain) -> Self {
        self.proxies = proxies;
        self
    }

    /// Set connect timeout
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Set read timeout
    pub fn with_read_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.read_timeout = timeout;
        self
    }

    /// Bind to a local address first
    pub fn with_bind_addr(mut self, addr: SocketAddr) -> Self {
        self.bind_addr = Some(addr);
        self
    }

    /// Set max frame size
    pub fn with_max_frame_size(mut self, size: usize) -> Self {
        self.max_frame_size = size;
        self
    }

    /// `host:port` of the server.
    pub fn target(&self) -> String {
        if self.host.contains(':') {
            format!("[{}]:{}", self.host, self.port)
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }
}

/// Upgrades a connected TCP stream into the session stream.
trait ConnectStrategy: Send + Sync {
    fn upgrade<'a>(
        &'a self,
        stream: TcpStream,
        descriptor: &'a ConnectionDescriptor,
    ) -> BoxFuture<'a, std::result::Result<BoxedStream, BoxError>>;
}

struct PlainStrategy;

impl ConnectStrategy for PlainStrategy {
    fn upgrade<'a>(
        &'a self,
        stream: TcpStream,
        _descriptor: &'a ConnectionDescriptor,
    ) -> BoxFuture<'a, std::result::Result<BoxedStream, BoxError>> {
        Box::pin(async move { Ok(Box::new(stream) as BoxedStream) })
    }
}

struct TlsStrategy;

impl ConnectStrategy for TlsStrategy {
    fn upgrade<'a>(
        &'a self,
        stream: TcpStream,
        descriptor: &'a ConnectionDescriptor,
    ) -> BoxFuture<'a, std::result::Result<BoxedStream, BoxError>> {
        Box::pin(async move {
            let tls = descriptor
                .tls
                .as_ref()
                .ok_or("TLS transport selected without client TLS config")?;
            let name = tls.server_name.as_deref().unwrap_or(&descriptor.host);
            let server_name = rustls::ServerName::try_from(name)?;

            let connector = TlsConnector::from(tls.build_client_config()?);
            let stream = connector.connect(server_name, stream).await?;

            let (_, conn) = stream.get_ref();
            tracing::debug!(
                protocol = ?conn.protocol_version(),
                cipher_suite = ?conn.negotiated_cipher_suite().map(|s| s.suite()),
                "TLS handshake complete"
            );
            Ok(Box::new(stream) as BoxedStream)
        })
    }
}

/// Client strategy table, keyed by transport kind.
static STRATEGIES: &[(TransportKind, &dyn ConnectStrategy)] = &[
    (TransportKind::Tcp, &PlainStrategy),
    (TransportKind::Tls, &TlsStrategy),
];

fn strategy(kind: TransportKind) -> Option<&'static dyn ConnectStrategy> {
    STRATEGIES
        .iter()
        .find(|(k, _)| *k == kind)
        .map(|(_, strategy)| *strategy)
}

/// Opens framed connections for a descriptor.
#[derive(Debug, Clone)]
pub struct ConnectionFactory {
    descriptor: ConnectionDescriptor,
}

impl ConnectionFactory {
    /// Factory for `descriptor`.
    pub fn new(descriptor: ConnectionDescriptor) -> Self {
        Self { descriptor }
    }

    /// The descriptor connections are built from.
    pub fn descriptor(&self) -> &ConnectionDescriptor {
        &self.descriptor
    }

    /// Establish one connection.
    pub async fn connect(&self) -> Result<Connection> {
        let desc = &self.descriptor;
        let target = desc.target();

        let established = tokio::time::timeout(desc.connect_timeout, self.establish())
            .await
            .unwrap_or_else(|_| {
                Err(Box::new(io::Error::new(
                    io::ErrorKind::TimedOut,
                    format!("connect timed out after {:?}", desc.connect_timeout),
                )) as BoxError)
            });

        match established {
            Ok((stream, peer)) => {
                tracing::debug!(%target, %peer, transport = %desc.transport, "Connected");
                Ok(Connection {
                    stream,
                    peer,
                    max_frame_size: desc.max_frame_size,
                    read_timeout: desc.read_timeout,
                })
            },
            Err(source) => {
                tracing::warn!(%target, "Connect failed: {}", source);
                Err(EppError::connect(target, source))
            },
        }
    }

    async fn establish(&self) -> std::result::Result<(BoxedStream, SocketAddr), BoxError> {
        let desc = &self.descriptor;
        let strategy = strategy(desc.transport)
            .ok_or_else(|| format!("no connect strategy for {}", desc.transport))?;

        let (host, port) = match desc.proxies.first() {
            Some(hop) => (hop.host.as_str(), hop.port),
            None => (desc.host.as_str(), desc.port),
        };

        let mut stream = connect_tcp(host, port, desc.bind_addr).await?;
        let peer = stream.peer_addr()?;

        if !desc.proxies.is_empty() {
            desc.proxies.tunnel(&mut stream, &desc.host, desc.port).await?;
        }

        let stream = strategy.upgrade(stream, desc).await?;
        Ok((stream, peer))
    }
}

async fn connect_tcp(host: &str, port: u16, bind: Option<SocketAddr>) -> io::Result<TcpStream> {
    let mut last_err = None;
    for addr in tokio::net::lookup_host((host, port)).await? {
        if bind.is_some_and(|b| b.is_ipv4() != addr.is_ipv4()) {
            continue;
        }
        let socket = if addr.is_ipv4() {
            TcpSocket::new_v4()?
        } else {
            TcpSocket::new_v6()?
        };
        if let Some(bind) = bind {
            socket.bind(bind)?;
        }
        match socket.connect(addr).await {
            Ok(stream) => {
                stream.set_nodelay(true)?;
                return Ok(stream);
            },
            Err(e) => last_err = Some(e),
        }
    }
    Err(last_err.unwrap_or_else(|| {
        io::Error::new(
            io::ErrorKind::AddrNotAvailable,
            format!("no usable address for {}:{}", host, port),
        )
    }))
}

/// An established, framed connection.
pub struct Connection {
    stream: BoxedStream,
    peer: SocketAddr,
    max_frame_size: usize,
    read_timeout: Option<Duration>,
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("peer", &self.peer)
            .field("max_frame_size", &self.max_frame_size)
            .field("read_timeout", &self.read_timeout)
            .finish_non_exhaustive()
    }
}

impl Connection {
    /// Remote address of the TCP connection (the first proxy when tunnelled).
    pub fn peer_addr(&self) -> SocketAddr {
        self.peer
    }

    /// Read one document.
    pub async fn read_frame(&mut self) -> Result<Bytes> {
        let read = frame::read_frame(&mut self.stream, self.max_frame_size);
        let document = match self.read_timeout {
            Some(timeout) => tokio::time::timeout(timeout, read).await.map_err(|_| {
                EppError::Io(io::Error::new(
                    io::ErrorKind::TimedOut,
                    format!("no frame within {:?}", timeout),
                ))
            })??,
            None => read.await?,
        };
        Ok(document)
    }

    /// Write one document.
    pub async fn write_frame(&mut self, document: &[u8]) -> Result<()> {
        frame::write_frame(&mut self.stream, document).await?;
        Ok(())
    }

    /// Close the write side.
    pub async fn shutdown(&mut self) -> Result<()> {
        self.stream.shutdown().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_descriptor_builder() {
        let desc = ConnectionDescriptor::new("::1", 700)
            .with_transport(TransportKind::Tls)
            .with_connect_timeout(Duration::from_secs(3))
            .with_max_frame_size(4096);
        assert_eq!(desc.target(), "[::1]:700");
        assert_eq!(desc.transport, TransportKind::Tls);
        assert_eq!(desc.max_frame_size, 4096);
    }

    #[test]
    fn test_every_kind_has_a_strategy() {
        assert!(strategy(TransportKind::Tcp).is_some());
        assert!(strategy(TransportKind::Tls).is_some());
    }

    #[tokio::test]
    async fn test_refused_is_connect_error() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let factory = ConnectionFactory::new(ConnectionDescriptor::new("127.0.0.1", port));
        match factory.connect().await {
            Err(EppError::Connect { target, source }) => {
                assert_eq!(target, format!("127.0.0.1:{}", port));
                assert!(source.downcast_ref::<io::Error>().is_some());
            },
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_tls_without_config_is_connect_error() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let desc =
            ConnectionDescriptor::new("127.0.0.1", port).with_transport(TransportKind::Tls);

        let result = ConnectionFactory::new(desc).connect().await;
        assert!(matches!(result, Err(EppError::Connect { .. })));
    }
}
