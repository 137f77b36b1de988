//! EPP server.
//!
//! Binds a listener, picks the [`Transport`](crate::transport::Transport)
//! for the configured kind and runs one connection worker per accepted
//! stream, all sharing a single [`ServerContext`].
//!
//! # Example
//!
//! ```rust,ignore
//! use epp::server::{Server, ServerConfig, ServerContext};
//!
//! let config = ServerConfig::default().with_port(7000);
//! let ctx = ServerContext::new(config, registry, dispatcher);
//! Server::new(ctx).run().await?;
//! ```

mod config;
mod connection;
mod state;

pub use config::{ServerConfig, DEFAULT_PORT};
pub use connection::run_connection;
pub use state::ServerContext;

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::TcpListener;
use tokio::task::JoinHandle;

use crate::error::{EppError, Result};
use crate::transport::{server_transport, Transport};

/// EPP server.
#[derive(Debug, Clone)]
pub struct Server {
    ctx: Arc<ServerContext>,
}

impl Server {
    /// Server over a prepared context.
    pub fn new(ctx: ServerContext) -> Self {
        Self { ctx: Arc::new(ctx) }
    }

    /// Shared context
    pub fn context(&self) -> &Arc<ServerContext> {
        &self.ctx
    }

    /// Bind the configured address and serve until the task is dropped.
    pub async fn run(&self) -> Result<()> {
        let addr = self.ctx.config().addr;
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| EppError::Server(format!("Failed to bind {}: {}", addr, e)))?;
        self.serve(listener).await
    }

    /// Serve on an already bound listener.
    pub async fn serve(&self, listener: TcpListener) -> Result<()> {
        let config = self.ctx.config();
        let transport = server_transport(config.transport, config.tls.as_ref())?;
        self.serve_on(transport.as_ref(), listener).await
    }

    /// Bind and serve in the background.
    ///
    /// The transport is built before returning, so certificate errors
    /// surface here rather than in the background task.
    pub async fn spawn(self) -> Result<ServerHandle> {
        let config = self.ctx.config();
        let transport = server_transport(config.transport, config.tls.as_ref())?;
        let listener = TcpListener::bind(config.addr)
            .await
            .map_err(|e| EppError::Server(format!("Failed to bind {}: {}", config.addr, e)))?;
        let addr = listener.local_addr()?;

        let task = tokio::spawn(async move {
            if let Err(e) = self.serve_on(transport.as_ref(), listener).await {
                tracing::error!("Server stopped: {}", e);
            }
        });
        Ok(ServerHandle { addr, task })
    }

    async fn serve_on(&self, transport: &dyn Transport, listener: TcpListener) -> Result<()> {
        let config = self.ctx.config();
        tracing::info!(
            server_id = %config.server_id,
            transport = transport.name(),
            services = self.ctx.registry().service_uris().len(),
            extensions = self.ctx.registry().extension_uris().len(),
            "Starting EPP server"
        );
        transport.serve(listener, Arc::clone(&self.ctx)).await
    }
}

/// Handle to a server running in the background.
#[derive(Debug)]
pub struct ServerHandle {
    addr: SocketAddr,
    task: JoinHandle<()>,
}

impl ServerHandle {
    /// Address actually bound (useful with port 0).
    pub fn local_addr(&self) -> SocketAddr {
        self.addr
    }

    /// Stop accepting connections. Running sessions are not interrupted.
    pub fn shutdown(self) {
        self.task.abort();
    }
}
