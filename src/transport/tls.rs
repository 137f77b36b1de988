//! TLS transport over TCP using rustls.

use std::future::Future;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::Arc;

use tokio::net::{TcpListener, TcpStream};
use tokio_rustls::TlsAcceptor;

use super::tcp::ACCEPT_BACKOFF;
use super::{TlsConfig, Transport};
use crate::error::Result;
use crate::server::{run_connection, ServerContext};

/// TLS transport.
///
/// The handshake runs on the connection task, bounded by the session idle
/// timeout. A failed handshake closes the socket without a response.
#[derive(Clone)]
pub struct TlsTransport {
    acceptor: TlsAcceptor,
}

impl std::fmt::Debug for TlsTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TlsTransport").finish_non_exhaustive()
    }
}

impl TlsTransport {
    /// Load certificates and build the acceptor.
    pub fn new(config: &TlsConfig) -> Result<Self> {
        Ok(Self {
            acceptor: TlsAcceptor::from(config.build_server_config()?),
        })
    }
}

impl Transport for TlsTransport {
    fn serve(
        &self,
        listener: TcpListener,
        ctx: Arc<ServerContext>,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        Box::pin(accept_loop(self.acceptor.clone(), listener, ctx))
    }

    fn name(&self) -> &'static str {
        "TLS"
    }
}

async fn accept_loop(
    acceptor: TlsAcceptor,
    listener: TcpListener,
    ctx: Arc<ServerContext>,
) -> Result<()> {
    tracing::info!("TLS transport listening on {}", listener.local_addr()?);

    loop {
        let (stream, peer) = match listener.accept().await {
            Ok(accepted) => accepted,
            Err(e) => {
                tracing::warn!("Accept failed: {}", e);
                tokio::time::sleep(ACCEPT_BACKOFF).await;
                continue;
            },
        };
        if let Err(e) = stream.set_nodelay(true) {
            tracing::debug!(%peer, "Failed to set TCP_NODELAY: {}", e);
        }

        let acceptor = acceptor.clone();
        let ctx = Arc::clone(&ctx);
        tokio::spawn(async move {
            handshake_and_run(acceptor, ctx, stream, peer).await;
        });
    }
}

async fn handshake_and_run(
    acceptor: TlsAcceptor,
    ctx: Arc<ServerContext>,
    stream: TcpStream,
    peer: SocketAddr,
) {
    let handshake = tokio::time::timeout(ctx.config().idle_timeout, acceptor.accept(stream)).await;
    let stream = match handshake {
        Ok(Ok(stream)) => stream,
        Ok(Err(e)) => {
            tracing::warn!(%peer, "TLS handshake failed: {}", e);
            return;
        },
        Err(_) => {
            tracing::warn!(%peer, "TLS handshake timed out");
            return;
        },
    };

    {
        let (_, conn) = stream.get_ref();
        tracing::debug!(
            %peer,
            protocol = ?conn.protocol_version(),
            cipher_suite = ?conn.negotiated_cipher_suite().map(|s| s.suite()),
            server_name = conn.server_name().unwrap_or("-"),
            peer_certificates = conn.peer_certificates().map_or(0, <[_]>::len),
            "TLS handshake complete"
        );
    }

    run_connection(ctx, stream, peer).await;
}
