//! Server configuration.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;

use crate::session::DEFAULT_MAX_LOGIN_ATTEMPTS;
use crate::transport::{TlsConfig, TransportKind, DEFAULT_MAX_FRAME_LEN};

/// IANA port for EPP over TLS.
pub const DEFAULT_PORT: u16 = 700;

/// Server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Bind address
    pub addr: SocketAddr,
    /// Listener kind
    pub transport: TransportKind,
    /// Certificates, required for TLS
    pub tls: Option<TlsConfig>,
    /// `svID` in the greeting
    pub server_id: String,
    /// Close a session after this long without a command
    pub idle_timeout: Duration,
    /// Largest accepted frame, header included
    pub max_frame_size: usize,
    /// Failed logins before the connection is closed
    pub max_login_attempts: u32,
    /// Languages offered in the greeting
    pub languages: Vec<String>,
    /// Codec instances shared by all connections
    pub pool_size: usize,
    /// How long a connection waits for a codec
    pub pool_timeout: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            addr: SocketAddr::from(([127, 0, 0, 1], DEFAULT_PORT)),
            transport: TransportKind::Tcp,
            tls: None,
            server_id: "epp-core".to_string(),
            idle_timeout: Duration::from_secs(600),
            max_frame_size: DEFAULT_MAX_FRAME_LEN,
            max_login_attempts: DEFAULT_MAX_LOGIN_ATTEMPTS,
            languages: vec!["en".to_string()],
            pool_size: 16,
            pool_timeout: Duration::from_secs(5),
        }
    }
}

impl ServerConfig {
    /// Create with custom port
    pub fn with_port(mut self, port: u16) -> Self {
        self.addr.set_port(port);
        self
    }

    /// Bind to all interfaces
    pub fn bind_all(mut self) -> Self {
        self.addr.set_ip(IpAddr::V4(Ipv4Addr::UNSPECIFIED));
        self
    }

    /// Set address directly
    pub fn with_addr(mut self, addr: SocketAddr) -> Self {
        self.addr = addr;
        self
    }

    /// Serve TLS with the given certificates
    pub fn with_tls(mut self, tls: TlsConfig) -> Self {
        self.transport = TransportKind::Tls;
        self.tls = Some(tls);
        self
    }

    /// Set the greeting server id
    pub fn with_server_id(mut self, id: impl Into<String>) -> Self {
        self.server_id = id.into();
        self
    }

    /// Set idle timeout
    pub fn with_idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout = timeout;
        self
    }

    /// Set max frame size
    pub fn with_max_frame_size(mut self, size: usize) -> Self {
        self.max_frame_size = size;
        self
    }

    /// Set failed login limit
    pub fn with_max_login_attempts(mut self, attempts: u32) -> Self {
        self.max_login_attempts = attempts;
        self
    }

    /// Set offered languages
    pub fn with_languages<I, S>(mut self, languages: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.languages = languages.into_iter().map(Into::into).collect();
        self
    }

    /// Set codec pool size and checkout timeout
    pub fn with_pool(mut self, size: usize, timeout: Duration) -> Self {
        self.pool_size = size;
        self.pool_timeout = timeout;
        self
    }
}
