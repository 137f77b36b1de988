//! EPP client session.
//!
//! [`EppClient`] owns one framed connection and its codec. It reads the
//! greeting on connect, stamps every command with a fresh client
//! transaction id and turns failure results into
//! [`EppError::CommandFailed`] carrying the full response.
//!
//! After a session-ending result (logout, or any 25xx) the client is closed
//! and further sends fail with [`EppError::SessionClosed`].
//!
//! # Example
//!
//! ```rust,ignore
//! use epp::client::EppClient;
//! use epp::protocol::Login;
//! use epp::transport::ConnectionDescriptor;
//!
//! let mut client = EppClient::connect(ConnectionDescriptor::new("localhost", 700), registry).await?;
//! let login = Login::new("ClientX", "foo-BAR2").with_services_from(client.greeting());
//! client.login(login).await?;
//! client.logout().await?;
//! ```

mod pool;

pub use pool::{ClientPool, PooledClient};

use std::sync::Arc;

use crate::codec::{CodecRegistry, XmlCodec};
use crate::error::{EppError, Result};
use crate::protocol::{Command, Greeting, Login, Message, Response, TransIdGenerator};
use crate::transport::{Connection, ConnectionDescriptor, ConnectionFactory};

/// Prefix of generated client transaction ids.
const CLIENT_TRID_PREFIX: &str = "CLI";

/// One client session over one connection.
#[derive(Debug)]
pub struct EppClient {
    connection: Connection,
    codec: XmlCodec,
    greeting: Greeting,
    trans_ids: TransIdGenerator,
    logged_in: bool,
    closed: bool,
}

impl EppClient {
    /// Connect and read the greeting.
    pub async fn connect(
        descriptor: ConnectionDescriptor,
        registry: Arc<CodecRegistry>,
    ) -> Result<Self> {
        let connection = ConnectionFactory::new(descriptor).connect().await?;
        Self::from_connection(connection, registry).await
    }

    /// Start a session over an established connection.
    pub async fn from_connection(
        mut connection: Connection,
        registry: Arc<CodecRegistry>,
    ) -> Result<Self> {
        let mut codec = XmlCodec::new(registry);
        let document = connection.read_frame().await?;
        let greeting = match codec.decode(&document)? {
            Message::Greeting(greeting) => greeting,
            other => {
                return Err(EppError::Protocol(format!(
                    "expected greeting, got {}",
                    other.kind()
                )))
            },
        };
        tracing::debug!(server_id = %greeting.server_id, peer = %connection.peer_addr(), "Greeting received");

        Ok(Self {
            connection,
            codec,
            greeting,
            trans_ids: TransIdGenerator::new(CLIENT_TRID_PREFIX),
            logged_in: false,
            closed: false,
        })
    }

    /// Latest greeting from the server.
    pub fn greeting(&self) -> &Greeting {
        &self.greeting
    }

    /// Whether a login succeeded on this session.
    pub fn is_logged_in(&self) -> bool {
        self.logged_in
    }

    /// Whether the session has ended.
    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Ask for a fresh greeting.
    pub async fn hello(&mut self) -> Result<&Greeting> {
        match self.exchange(&Message::Hello).await? {
            Message::Greeting(greeting) => {
                self.greeting = greeting;
                Ok(&self.greeting)
            },
            other => Err(unexpected(&other)),
        }
    }

    /// Open the session.
    pub async fn login(&mut self, login: Login) -> Result<Response> {
        let response = self.send(Command::login(login)).await?;
        self.logged_in = true;
        Ok(response)
    }

    /// End the session. The connection is closed afterwards.
    pub async fn logout(&mut self) -> Result<Response> {
        let response = self.send(Command::logout()).await;
        self.logged_in = false;
        response
    }

    /// Fetch the oldest queued message (1301) or learn the queue is empty (1300).
    pub async fn poll_request(&mut self) -> Result<Response> {
        self.send(Command::poll_request()).await
    }

    /// Remove a queued message.
    pub async fn poll_ack(&mut self, message_id: &str) -> Result<Response> {
        self.send(Command::poll_ack(message_id)).await
    }

    /// Send a command and wait for its response.
    ///
    /// A client transaction id is generated when the command has none.
    pub async fn send(&mut self, mut command: Command) -> Result<Response> {
        let cl_trid = command
            .client_trans_id
            .get_or_insert_with(|| self.trans_ids.next_id())
            .clone();

        let response = match self.exchange(&Message::Command(command)).await? {
            Message::Response(response) => response,
            other => return Err(unexpected(&other)),
        };

        if response.trans_id.client.as_deref() != Some(cl_trid.as_str()) {
            tracing::warn!(
                expected = %cl_trid,
                got = ?response.trans_id.client,
                "Response transaction id mismatch"
            );
        }
        tracing::debug!(
            code = response.code().code(),
            sv_trid = %response.trans_id.server,
            "Response received"
        );

        if response.code().ends_session() {
            self.close().await;
        }
        response.into_result()
    }

    async fn exchange(&mut self, message: &Message) -> Result<Message> {
        if self.closed {
            return Err(EppError::SessionClosed);
        }

        let document = self.codec.encode(message)?;
        let reply = match self.roundtrip(&document).await {
            Ok(reply) => reply,
            Err(e) => {
                self.closed = true;
                return Err(e);
            },
        };
        Ok(self.codec.decode(&reply)?)
    }

    async fn roundtrip(&mut self, document: &[u8]) -> Result<bytes::Bytes> {
        self.connection.write_frame(document).await?;
        self.connection.read_frame().await
    }

    async fn close(&mut self) {
        self.closed = true;
        self.logged_in = false;
        if let Err(e) = self.connection.shutdown().await {
            tracing::debug!("Shutdown failed: {}", e);
        }
    }
}

fn unexpected(message: &Message) -> EppError {
    EppError::Protocol(format!("unexpected {} from server", message.kind()))
}
