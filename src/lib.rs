//! # EPP Core - Registry Provisioning Protocol Engine
//!
//! Client and server building blocks for the Extensible Provisioning Protocol
//! (RFC 5730) over TCP and TLS (RFC 5734).
//!
//! ## Features
//!
//! - **Codec registry**: object services and extensions resolved by XML
//!   namespace, with per-namespace skip policy and required-extension rules
//! - **Session state machine**: greeting, login negotiation, precondition
//!   chain, pluggable command handlers, logout
//! - **Poll queue**: per-recipient FIFO message queues with request/ack
//! - **Transport**: length-prefixed framing, TCP and TLS listeners, client
//!   connections through HTTP CONNECT proxy chains
//! - **Pooling**: bounded codec pool on the server, logged-in session pool on
//!   the client
//!
//! ## Protocol Overview
//!
//! ```text
//! Client                           Server
//!    |                                |
//!    |<-------- greeting -------------|  on connect
//!    |--------- login --------------->|
//!    |<-------- 1000 -----------------|
//!    |--------- check/info/poll ----->|  one response per command
//!    |<-------- result (+ resData) ---|
//!    |--------- logout -------------->|
//!    |<-------- 1500 -----------------|  connection closes
//! ```
//!
//! ### State Machine
//!
//! ```text
//!                     login 1000
//!   [Unauthenticated] ──────────────> [Authenticated]
//!         │                                 │
//!         │ 2500 / 2501                     │ logout 1500 / 25xx
//!         v                                 v
//!     [Terminated] <────────────────────────┘
//! ```
//!
//! ### Wire Format
//!
//! | Bytes | Content                                        |
//! |-------|------------------------------------------------|
//! | 0..4  | total length, big-endian u32, header included  |
//! | 4..   | UTF-8 XML document in `urn:ietf:params:xml:ns:epp-1.0` |
//!
//! ## Quick Start
//!
//! ### Server
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use epp::objects::{default_registry, DomainCheckHandler, DOMAIN_NS};
//! use epp::protocol::{CommandType, TransIdGenerator};
//! use epp::server::{Server, ServerConfig, ServerContext};
//! use epp::session::{Dispatcher, StaticAuthenticator};
//!
//! let mut dispatcher = Dispatcher::new(
//!     Arc::new(StaticAuthenticator::new([("ClientX", "foo-BAR2")])),
//!     TransIdGenerator::new("SRV"),
//! );
//! dispatcher.register(CommandType::Check, Some(DOMAIN_NS), DomainCheckHandler::default());
//!
//! let ctx = ServerContext::new(ServerConfig::default(), default_registry(), dispatcher);
//! Server::new(ctx).run().await?;
//! ```
//!
//! ### Client
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use epp::client::EppClient;
//! use epp::objects::{default_registry, DomainCheck, DomainCheckData};
//! use epp::protocol::{Command, Login, Verb};
//! use epp::transport::ConnectionDescriptor;
//!
//! let registry = Arc::new(default_registry());
//! let mut client = EppClient::connect(ConnectionDescriptor::new("localhost", 700), registry).await?;
//!
//! let login = Login::new("ClientX", "foo-BAR2").with_services_from(client.greeting());
//! client.login(login).await?;
//!
//! let response = client.send(Command::object(Verb::Check, DomainCheck::new(["example.com"]))).await?;
//! let data = response.res_data::<DomainCheckData>().unwrap();
//! client.logout().await?;
//! ```
//!
//! ## Modules
//!
//! - [`protocol`]: Typed messages, result codes, transaction ids
//! - [`codec`]: XML model, codec registry, codec pool
//! - [`objects`]: Built-in domain service and subProduct extension
//! - [`session`]: Session state, dispatcher, handler contract
//! - [`poll`]: Poll queue and its command handler
//! - [`transport`]: Framing, TCP/TLS, proxies, connection factory
//! - [`server`]: Listener and connection workers
//! - [`client`]: Client session and session pool
//! - [`config`]: Configuration management
//! - [`error`]: Error types and result aliases

pub mod client;
pub mod codec;
pub mod config;
pub mod error;
pub mod objects;
pub mod poll;
pub mod protocol;
pub mod server;
pub mod session;
pub mod transport;

// Re-exports for convenience
pub use client::{ClientPool, EppClient};
pub use codec::{CodecPool, CodecRegistry, XmlCodec};
pub use config::Config;
pub use error::{EppError, Result};
pub use poll::{Notification, PollQueue};
pub use protocol::{Command, Greeting, Message, Response, ResultCode, PROTOCOL_VERSION};
pub use server::{Server, ServerConfig, ServerContext};
pub use session::{CommandHandler, Dispatcher, Session, SessionState};
pub use transport::{ConnectionDescriptor, ConnectionFactory, Transport, TransportKind};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
