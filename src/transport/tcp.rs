//! Plain TCP transport.
//!
//! One tokio task per accepted connection. Used for development and behind
//! TLS-terminating front ends.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;

use super::Transport;
use crate::error::Result;
use crate::server::{run_connection, ServerContext};

/// Back-off after a failed `accept`, e.g. when out of file descriptors.
pub(crate) const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

/// Plain TCP transport.
#[derive(Debug, Clone, Copy, Default)]
pub struct TcpTransport;

impl Transport for TcpTransport {
    fn serve(
        &self,
        listener: TcpListener,
        ctx: Arc<ServerContext>,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        Box::pin(accept_loop(listener, ctx))
    }

    fn name(&self) -> &'static str {
        "TCP"
    }
}

async fn accept_loop(listener: TcpListener, ctx: Arc<ServerContext>) -> Result<()> {
    tracing::info!("TCP transport listening on {}", listener.local_addr()?);

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

        let ctx = Arc::clone(&ctx);
        tokio::spawn(async move {
            run_connection(ctx, stream, peer).await;
        });
    }
}
