//! Configuration management.
//!
//! Supports configuration from:
//! - TOML config files
//! - Environment variables
//! - CLI arguments (for `epp serve` / `epp check`)
//!
//! ```toml
//! [server]
//! port = 700
//! transport = "tls"
//! cert_path = "/etc/epp/server.pem"
//! key_path = "/etc/epp/server.key"
//!
//! [[services]]
//! namespace = "urn:ietf:params:xml:ns:domain-1.0"
//!
//! [[extensions]]
//! namespace = "urn:X-ar:params:xml:ns:subProduct-1.0"
//! required_for = ["urn:ietf:params:xml:ns:domain-1.0"]
//! required_commands = ["create", "renew"]
//!
//! [[accounts]]
//! client_id = "ClientX"
//! password = "foo-BAR2"
//! ```

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::codec::CodecRegistry;
use crate::error::{EppError, Result};
use crate::objects::{self, CodecKind};
use crate::protocol::{CommandType, Login};
use crate::server::{ServerConfig, DEFAULT_PORT};
use crate::session::{StaticAuthenticator, DEFAULT_MAX_LOGIN_ATTEMPTS};
use crate::transport::{
    ClientTlsConfig, CertConfig, ConnectionDescriptor, ProxyChain, TlsConfig, TransportKind,
    DEFAULT_MAX_FRAME_LEN,
};

/// Main configuration struct
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Server configuration
    #[serde(default)]
    pub server: ServerSection,

    /// Client configuration
    #[serde(default)]
    pub client: ClientSection,

    /// Server codec pool
    #[serde(default)]
    pub pool: PoolSection,

    /// Object services to offer; empty means every built-in service
    #[serde(default)]
    pub services: Vec<ServiceEntry>,

    /// Extension policies; empty means every built-in extension, none required
    #[serde(default)]
    pub extensions: Vec<ExtensionEntry>,

    /// Client accounts accepted by the server
    #[serde(default)]
    pub accounts: Vec<AccountEntry>,
}

impl Config {
    /// Load configuration from a TOML file
    pub fn from_file(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let content = std::fs::read_to_string(&path)
            .map_err(|e| EppError::Config(format!("Failed to read config file: {e}")))?;

        Ok(toml::from_str(&content)?)
    }

    /// Default config file location (`<config dir>/epp/config.toml`)
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("epp").join("config.toml"))
    }

    /// Load configuration from environment variables
    pub fn from_env() -> Self {
        let mut config = Self::default();

        // Server settings
        if let Ok(host) = std::env::var("EPP_SERVER_HOST") {
            config.server.host = host;
        }
        if let Ok(port) = std::env::var("EPP_SERVER_PORT") {
            if let Ok(port) = port.parse() {
                config.server.port = port;
            }
        }
        if let Ok(secs) = std::env::var("EPP_IDLE_TIMEOUT_SECS") {
            if let Ok(secs) = secs.parse() {
                config.server.idle_timeout_secs = secs;
            }
        }

        // Client settings
        if let Ok(host) = std::env::var("EPP_CLIENT_HOST") {
            config.client.host = host;
        }
        if let Ok(port) = std::env::var("EPP_CLIENT_PORT") {
            if let Ok(port) = port.parse() {
                config.client.port = port;
            }
        }
        if let Ok(proxy) = std::env::var("EPP_PROXY") {
            config.client.proxy = Some(proxy);
        }

        config
    }

    /// Merge with another config (other takes precedence)
    pub fn merge(self, other: Self) -> Self {
        let server_defaults = ServerSection::default();
        let client_defaults = ClientSection::default();

        Self {
            server: ServerSection {
                host: pick(self.server.host, other.server.host.clone(), &server_defaults.host),
                port: pick(self.server.port, other.server.port, &server_defaults.port),
                idle_timeout_secs: pick(
                    self.server.idle_timeout_secs,
                    other.server.idle_timeout_secs,
                    &server_defaults.idle_timeout_secs,
                ),
                ..self.server
            },
            client: ClientSection {
                host: pick(self.client.host, other.client.host.clone(), &client_defaults.host),
                port: pick(self.client.port, other.client.port, &client_defaults.port),
                proxy: other.client.proxy.or(self.client.proxy),
                ..self.client
            },
            pool: self.pool,
            services: if other.services.is_empty() {
                self.services
            } else {
                other.services
            },
            extensions: if other.extensions.is_empty() {
                self.extensions
            } else {
                other.extensions
            },
            accounts: if other.accounts.is_empty() {
                self.accounts
            } else {
                other.accounts
            },
        }
    }

    /// Server settings for [`ServerContext`](crate::server::ServerContext).
    pub fn server_config(&self) -> Result<ServerConfig> {
        let s = &self.server;
        let mut config = ServerConfig::default()
            .with_addr(SocketAddr::new(parse_host(&s.host)?, s.port))
            .with_server_id(s.server_id.as_str())
            .with_idle_timeout(Duration::from_secs(s.idle_timeout_secs))
            .with_max_frame_size(s.max_frame_size)
            .with_max_login_attempts(s.max_login_attempts)
            .with_languages(s.languages.iter().cloned())
            .with_pool(self.pool.size, Duration::from_millis(self.pool.checkout_timeout_ms));

        match s.transport {
            TransportKind::Tcp => {},
            TransportKind::Tls => {
                let tls = match (&s.cert_path, &s.key_path) {
                    (Some(cert), Some(key)) => TlsConfig::production(cert, key),
                    (None, None) => TlsConfig::development(),
                    _ => {
                        return Err(EppError::Config(
                            "server.cert_path and server.key_path must be set together".to_string(),
                        ))
                    },
                };
                config = config.with_tls(tls);
            },
        }
        Ok(config)
    }

    /// Codec registry from the `[[services]]` and `[[extensions]]` tables.
    pub fn registry(&self) -> Result<CodecRegistry> {
        let mut registry = CodecRegistry::new();
        // Each table falls back to the built-ins on its own.
        if self.services.is_empty() {
            register_builtins(&mut registry, CodecKind::Service);
        }
        if self.extensions.is_empty() {
            register_builtins(&mut registry, CodecKind::Extension);
        }

        for service in &self.services {
            let codec = objects::builtin(&service.namespace)
                .filter(|c| c.kind == CodecKind::Service)
                .ok_or_else(|| {
                    EppError::Config(format!("Unknown object service: {}", service.namespace))
                })?;
            codec.register(&mut registry, service.schema_locations.clone());
        }

        for extension in &self.extensions {
            match extension.policy {
                ExtensionPolicy::Skip => registry.skip_extension(&extension.namespace),
                ExtensionPolicy::Decode => {
                    let codec = objects::builtin(&extension.namespace)
                        .filter(|c| c.kind == CodecKind::Extension)
                        .ok_or_else(|| {
                            EppError::Config(format!("Unknown extension: {}", extension.namespace))
                        })?;
                    codec.register(&mut registry, Vec::new());
                },
            }

            let commands = extension
                .required_commands
                .iter()
                .map(|name| {
                    CommandType::from_element_name(name)
                        .filter(CommandType::is_object_command)
                        .ok_or_else(|| EppError::Config(format!("Unknown object command: {}", name)))
                })
                .collect::<Result<Vec<_>>>()?;
            for service in &extension.required_for {
                if !registry.has_service(service) {
                    return Err(EppError::Config(format!(
                        "Extension {} required for unregistered service {}",
                        extension.namespace, service
                    )));
                }
                registry.require_extension(service, &extension.namespace, &commands);
            }
        }
        Ok(registry)
    }

    /// Authenticator over the `[[accounts]]` table.
    pub fn authenticator(&self) -> StaticAuthenticator {
        StaticAuthenticator::new(
            self.accounts
                .iter()
                .map(|a| (a.client_id.clone(), a.password.clone())),
        )
    }

    /// Connection settings for [`EppClient`](crate::client::EppClient).
    pub fn connection_descriptor(&self) -> Result<ConnectionDescriptor> {
        let c = &self.client;
        let mut descriptor = ConnectionDescriptor::new(c.host.as_str(), c.port)
            .with_transport(c.transport)
            .with_connect_timeout(Duration::from_secs(c.connect_timeout_secs))
            .with_read_timeout((c.read_timeout_secs > 0).then(|| Duration::from_secs(c.read_timeout_secs)))
            .with_max_frame_size(c.max_frame_size);

        if let Some(proxy) = &c.proxy {
            descriptor = descriptor.with_proxies(proxy.parse::<ProxyChain>()?);
        }
        if let Some(bind) = c.bind_addr {
            descriptor = descriptor.with_bind_addr(bind);
        }

        if c.transport == TransportKind::Tls {
            let ca_path = c.ca_path.as_ref().ok_or_else(|| {
                EppError::Config("client.ca_path is required for TLS".to_string())
            })?;
            let mut tls = ClientTlsConfig::from_ca_file(ca_path);
            match (&c.cert_path, &c.key_path) {
                (Some(cert), Some(key)) => tls = tls.with_identity(CertConfig::from_files(cert, key)),
                (None, None) => {},
                _ => {
                    return Err(EppError::Config(
                        "client.cert_path and client.key_path must be set together".to_string(),
                    ))
                },
            }
            if let Some(name) = &c.server_name {
                tls = tls.with_server_name(name.as_str());
            }
            descriptor = descriptor.with_tls(tls);
        }
        Ok(descriptor)
    }

    /// Login for the configured client account.
    pub fn client_login(&self) -> Login {
        Login::new(self.client.client_id.as_str(), self.client.password.as_str())
    }
}

fn register_builtins(registry: &mut CodecRegistry, kind: CodecKind) {
    for codec in objects::BUILTINS.iter().filter(|c| c.kind == kind) {
        codec.register(registry, Vec::new());
    }
}

fn pick<T: PartialEq>(base: T, other: T, default: &T) -> T {
    if other != *default {
        other
    } else {
        base
    }
}

fn parse_host(host: &str) -> Result<IpAddr> {
    if host.eq_ignore_ascii_case("localhost") {
        return Ok(IpAddr::V4(Ipv4Addr::LOCALHOST));
    }
    host.parse()
        .map_err(|_| EppError::Config(format!("Invalid bind address: {}", host)))
}

/// `[server]` section
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSection {
    /// Host to bind to
    pub host: String,

    /// Port to listen on
    pub port: u16,

    /// `tcp` or `tls`
    pub transport: TransportKind,

    /// PEM certificate chain (TLS)
    pub cert_path: Option<PathBuf>,

    /// PEM private key (TLS)
    pub key_path: Option<PathBuf>,

    /// Greeting server id
    pub server_id: String,

    /// Idle timeout in seconds
    pub idle_timeout_secs: u64,

    /// Maximum frame size in bytes
    pub max_frame_size: usize,

    /// Failed logins before disconnect
    pub max_login_attempts: u32,

    /// Languages offered in the greeting
    pub languages: Vec<String>,

    /// Domain names the built-in check handler reports as taken
    pub provisioned_domains: Vec<String>,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: DEFAULT_PORT,
            transport: TransportKind::Tcp,
            cert_path: None,
            key_path: None,
            server_id: "epp-core".to_string(),
            idle_timeout_secs: 600,
            max_frame_size: DEFAULT_MAX_FRAME_LEN,
            max_login_attempts: DEFAULT_MAX_LOGIN_ATTEMPTS,
            languages: vec!["en".to_string()],
            provisioned_domains: Vec::new(),
        }
    }
}

/// `[client]` section
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientSection {
    /// Server host
    pub host: String,

    /// Server port
    pub port: u16,

    /// `tcp` or `tls`
    pub transport: TransportKind,

    /// CA bundle the server certificate must chain to (TLS)
    pub ca_path: Option<PathBuf>,

    /// Client certificate (mutual TLS)
    pub cert_path: Option<PathBuf>,

    /// Client private key (mutual TLS)
    pub key_path: Option<PathBuf>,

    /// Name to verify instead of `host`
    pub server_name: Option<String>,

    /// Proxy chain, `host:port[,host:port...]`
    pub proxy: Option<String>,

    /// Connect timeout in seconds
    pub connect_timeout_secs: u64,

    /// Read timeout in seconds, 0 to disable
    pub read_timeout_secs: u64,

    /// Local address to bind
    pub bind_addr: Option<SocketAddr>,

    /// Maximum frame size in bytes
    pub max_frame_size: usize,

    /// Login client id
    pub client_id: String,

    /// Login password
    pub password: String,

    /// Sessions kept by a client pool
    pub pool_size: usize,
}

impl Default for ClientSection {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: DEFAULT_PORT,
            transport: TransportKind::Tcp,
            ca_path: None,
            cert_path: None,
            key_path: None,
            server_name: None,
            proxy: None,
            connect_timeout_secs: 10,
            read_timeout_secs: 60,
            bind_addr: None,
            max_frame_size: DEFAULT_MAX_FRAME_LEN,
            client_id: String::new(),
            password: String::new(),
            pool_size: 4,
        }
    }
}

/// `[pool]` section
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolSection {
    /// Number of codecs
    pub size: usize,

    /// Checkout timeout in milliseconds
    pub checkout_timeout_ms: u64,
}

impl Default for PoolSection {
    fn default() -> Self {
        Self {
            size: 16,
            checkout_timeout_ms: 5000,
        }
    }
}

/// `[[services]]` entry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceEntry {
    /// Service namespace
    pub namespace: String,

    /// Schema locations to advertise
    #[serde(default)]
    pub schema_locations: Vec<String>,
}

/// What to do with an extension namespace.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExtensionPolicy {
    /// Decode with the built-in codec
    #[default]
    Decode,
    /// Accept and drop
    Skip,
}

/// `[[extensions]]` entry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtensionEntry {
    /// Extension namespace
    pub namespace: String,

    /// `decode` or `skip`
    #[serde(default)]
    pub policy: ExtensionPolicy,

    /// Services whose commands must carry this extension
    #[serde(default)]
    pub required_for: Vec<String>,

    /// Commands the requirement applies to; empty means all object commands
    #[serde(default)]
    pub required_commands: Vec<String>,
}

/// `[[accounts]]` entry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountEntry {
    /// Client id
    pub client_id: String,

    /// Password
    pub password: String,
}
