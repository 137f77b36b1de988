//! Shared fixtures for end-to-end tests.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::Arc;

use epp::codec::{CodecRegistry, XmlCodec};
use epp::objects::{default_registry, DomainCheckHandler, DOMAIN_NS};
use epp::protocol::{CommandType, Message, TransIdGenerator};
use epp::server::{Server, ServerConfig, ServerContext, ServerHandle};
use epp::session::{Authenticator, Dispatcher, StaticAuthenticator};
use epp::transport::{read_frame, ConnectionDescriptor};
use tokio::net::TcpStream;

pub const CLIENT_ID: &str = "ClientX";
pub const PASSWORD: &str = "foo-BAR2";
pub const OTHER_CLIENT_ID: &str = "ClientY";
pub const OTHER_PASSWORD: &str = "bar-FOO2";

/// Accounts for both test clients.
pub fn authenticator() -> StaticAuthenticator {
    StaticAuthenticator::new([(CLIENT_ID, PASSWORD), (OTHER_CLIENT_ID, OTHER_PASSWORD)])
}

/// Dispatcher with the domain check handler; `taken.example` is provisioned.
pub fn dispatcher_with(authenticator: Arc<dyn Authenticator>) -> Dispatcher {
    let mut dispatcher = Dispatcher::new(authenticator, TransIdGenerator::new("SRV"));
    dispatcher.register(
        CommandType::Check,
        Some(DOMAIN_NS),
        DomainCheckHandler::new(["taken.example"]),
    );
    dispatcher
}

/// Default test dispatcher.
pub fn dispatcher() -> Dispatcher {
    dispatcher_with(Arc::new(authenticator()))
}

/// Server config on an ephemeral localhost port.
pub fn server_config() -> ServerConfig {
    ServerConfig::default()
        .with_port(0)
        .with_server_id("Example EPP server")
}

/// Start a server in the background.
pub async fn start(ctx: ServerContext) -> ServerHandle {
    Server::new(ctx).spawn().await.expect("server should start")
}

/// Start a default server.
pub async fn start_default() -> ServerHandle {
    start(ServerContext::new(server_config(), default_registry(), dispatcher())).await
}

/// Plain TCP descriptor for a running server.
pub fn descriptor(addr: SocketAddr) -> ConnectionDescriptor {
    ConnectionDescriptor::new(addr.ip().to_string(), addr.port())
}

/// Client-side registry.
pub fn registry() -> Arc<CodecRegistry> {
    Arc::new(default_registry())
}

/// Raw socket with the greeting already consumed.
pub async fn raw_connect(addr: SocketAddr) -> (TcpStream, XmlCodec) {
    let mut stream = TcpStream::connect(addr).await.unwrap();
    let mut codec = XmlCodec::new(registry());
    let greeting = read_frame(&mut stream, 1 << 20).await.unwrap();
    assert!(matches!(codec.decode(&greeting).unwrap(), Message::Greeting(_)));
    (stream, codec)
}
