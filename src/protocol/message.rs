//! Protocol messages.
//!
//! Defines the typed form of the four top-level message kinds: `hello`,
//! `greeting`, `command` and `response`. Object-specific content is carried as
//! [`Payload`] trait objects resolved through the codec registry.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};

use super::payload::{Extensions, Payload};
use super::result::{EppResult, ResultCode};
use super::trans_id::TransactionId;
use super::PROTOCOL_VERSION;
use crate::codec::DecodeError;
use crate::error::{EppError, Result};

/// Top-level protocol message.
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    /// Client request for the greeting
    Hello,
    /// Server description, sent on connect and in answer to hello
    Greeting(Greeting),
    /// Client command
    Command(Command),
    /// Server response to a command
    Response(Response),
}

impl Message {
    /// Short name for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Hello => "hello",
            Self::Greeting(_) => "greeting",
            Self::Command(_) => "command",
            Self::Response(_) => "response",
        }
    }
}

impl From<Command> for Message {
    fn from(command: Command) -> Self {
        Self::Command(command)
    }
}

impl From<Response> for Message {
    fn from(response: Response) -> Self {
        Self::Response(response)
    }
}

impl From<Greeting> for Message {
    fn from(greeting: Greeting) -> Self {
        Self::Greeting(greeting)
    }
}

/// Command type used as the first half of the dispatch key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CommandType {
    /// Open a session
    Login,
    /// Close the session
    Logout,
    /// Poll queue request or acknowledgment
    Poll,
    /// Availability check
    Check,
    /// Object information
    Info,
    /// Object creation
    Create,
    /// Object deletion
    Delete,
    /// Validity extension
    Renew,
    /// Sponsorship transfer
    Transfer,
    /// Object modification
    Update,
}

impl CommandType {
    /// Element name inside `<command>`.
    pub fn element_name(&self) -> &'static str {
        match self {
            Self::Login => "login",
            Self::Logout => "logout",
            Self::Poll => "poll",
            Self::Check => "check",
            Self::Info => "info",
            Self::Create => "create",
            Self::Delete => "delete",
            Self::Renew => "renew",
            Self::Transfer => "transfer",
            Self::Update => "update",
        }
    }

    /// Parse an element name inside `<command>`.
    pub fn from_element_name(name: &str) -> Option<Self> {
        Some(match name {
            "login" => Self::Login,
            "logout" => Self::Logout,
            "poll" => Self::Poll,
            "check" => Self::Check,
            "info" => Self::Info,
            "create" => Self::Create,
            "delete" => Self::Delete,
            "renew" => Self::Renew,
            "transfer" => Self::Transfer,
            "update" => Self::Update,
            _ => return None,
        })
    }

    /// Whether the command operates on an object payload.
    pub fn is_object_command(&self) -> bool {
        !matches!(self, Self::Login | Self::Logout | Self::Poll)
    }
}

impl fmt::Display for CommandType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.element_name())
    }
}

/// Transfer operation (`op` attribute).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransferOp {
    /// Request a transfer
    Request,
    /// Query transfer status
    Query,
    /// Approve a pending transfer
    Approve,
    /// Reject a pending transfer
    Reject,
    /// Cancel a pending transfer
    Cancel,
}

impl TransferOp {
    /// Wire value.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Request => "request",
            Self::Query => "query",
            Self::Approve => "approve",
            Self::Reject => "reject",
            Self::Cancel => "cancel",
        }
    }
}

impl FromStr for TransferOp {
    type Err = DecodeError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "request" => Ok(Self::Request),
            "query" => Ok(Self::Query),
            "approve" => Ok(Self::Approve),
            "reject" => Ok(Self::Reject),
            "cancel" => Ok(Self::Cancel),
            _ => Err(DecodeError::invalid("transfer@op", s)),
        }
    }
}

/// Object command verb.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Verb {
    /// check
    Check,
    /// info
    Info,
    /// create
    Create,
    /// delete
    Delete,
    /// renew
    Renew,
    /// transfer with its operation
    Transfer(TransferOp),
    /// update
    Update,
}

impl Verb {
    /// Command type of this verb.
    pub fn command_type(&self) -> CommandType {
        match self {
            Self::Check => CommandType::Check,
            Self::Info => CommandType::Info,
            Self::Create => CommandType::Create,
            Self::Delete => CommandType::Delete,
            Self::Renew => CommandType::Renew,
            Self::Transfer(_) => CommandType::Transfer,
            Self::Update => CommandType::Update,
        }
    }
}

/// Login command content.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Login {
    /// Client identifier
    pub client_id: String,
    /// Current password
    pub password: String,
    /// Replacement password, applied on successful login
    pub new_password: Option<String>,
    /// Protocol version requested
    pub version: String,
    /// Response language requested
    pub lang: String,
    /// Object services the client will use
    pub object_uris: Vec<String>,
    /// Extensions the client will use
    pub extension_uris: Vec<String>,
}

impl Login {
    /// Login for protocol version 1.0 in English with no services selected.
    pub fn new(client_id: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            client_id: client_id.into(),
            password: password.into(),
            new_password: None,
            version: PROTOCOL_VERSION.to_string(),
            lang: "en".to_string(),
            object_uris: Vec::new(),
            extension_uris: Vec::new(),
        }
    }

    /// Select the services offered in a greeting.
    pub fn with_services_from(mut self, greeting: &Greeting) -> Self {
        self.object_uris = greeting.object_uris.clone();
        self.extension_uris = greeting.extension_uris.clone();
        self
    }

    /// Add an object service.
    pub fn with_object(mut self, uri: impl Into<String>) -> Self {
        self.object_uris.push(uri.into());
        self
    }

    /// Add an extension.
    pub fn with_extension(mut self, uri: impl Into<String>) -> Self {
        self.extension_uris.push(uri.into());
        self
    }

    /// Request a password change.
    pub fn with_new_password(mut self, password: impl Into<String>) -> Self {
        self.new_password = Some(password.into());
        self
    }
}

/// Poll operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollOp {
    /// Fetch the oldest undelivered message
    Request,
    /// Acknowledge (remove) the message with this id
    Acknowledge(String),
}

/// What a command does.
#[derive(Debug, Clone, PartialEq)]
pub enum CommandKind {
    /// Open a session
    Login(Login),
    /// Close the session
    Logout,
    /// Poll queue operation
    Poll(PollOp),
    /// Operation on an object service
    Object {
        /// Operation
        verb: Verb,
        /// Object-specific content
        payload: Box<dyn Payload>,
    },
}

/// Client command.
#[derive(Debug, Clone, PartialEq)]
pub struct Command {
    /// Operation and content
    pub kind: CommandKind,
    /// Attached extensions
    pub extensions: Extensions,
    /// Client transaction identifier
    pub client_trans_id: Option<String>,
}

impl Command {
    /// Command without extensions or transaction id.
    pub fn new(kind: CommandKind) -> Self {
        Self {
            kind,
            extensions: Extensions::new(),
            client_trans_id: None,
        }
    }

    /// Login command.
    pub fn login(login: Login) -> Self {
        Self::new(CommandKind::Login(login))
    }

    /// Logout command.
    pub fn logout() -> Self {
        Self::new(CommandKind::Logout)
    }

    /// Poll request.
    pub fn poll_request() -> Self {
        Self::new(CommandKind::Poll(PollOp::Request))
    }

    /// Poll acknowledgment.
    pub fn poll_ack(message_id: impl Into<String>) -> Self {
        Self::new(CommandKind::Poll(PollOp::Acknowledge(message_id.into())))
    }

    /// Object command.
    pub fn object(verb: Verb, payload: impl Payload) -> Self {
        Self::new(CommandKind::Object {
            verb,
            payload: Box::new(payload),
        })
    }

    /// Attach an extension.
    pub fn with_extension(mut self, extension: impl Payload) -> std::result::Result<Self, DecodeError> {
        self.extensions.insert(Box::new(extension))?;
        Ok(self)
    }

    /// Set the client transaction id.
    pub fn with_client_trans_id(mut self, id: impl Into<String>) -> Self {
        self.client_trans_id = Some(id.into());
        self
    }

    /// Dispatch type.
    pub fn command_type(&self) -> CommandType {
        match &self.kind {
            CommandKind::Login(_) => CommandType::Login,
            CommandKind::Logout => CommandType::Logout,
            CommandKind::Poll(_) => CommandType::Poll,
            CommandKind::Object { verb, .. } => verb.command_type(),
        }
    }

    /// Namespace of the object payload, if this is an object command.
    pub fn object_namespace(&self) -> Option<&str> {
        match &self.kind {
            CommandKind::Object { payload, .. } => Some(payload.namespace()),
            _ => None,
        }
    }

    /// Object payload as its concrete type.
    pub fn payload<T: Payload>(&self) -> Option<&T> {
        match &self.kind {
            CommandKind::Object { payload, .. } => payload.downcast_ref::<T>(),
            _ => None,
        }
    }
}

/// Message queue information carried by poll responses.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageQueue {
    /// Messages remaining in the queue
    pub count: u64,
    /// Identifier of the message in this response
    pub id: Option<String>,
    /// When the message was enqueued
    pub queue_date: Option<DateTime<Utc>>,
    /// Human-readable message text
    pub message: Option<String>,
    /// Language of `message`
    pub lang: String,
}

impl MessageQueue {
    /// Queue state without a message (used by acknowledgments).
    pub fn count_only(count: u64, id: Option<String>) -> Self {
        Self {
            count,
            id,
            queue_date: None,
            message: None,
            lang: "en".to_string(),
        }
    }
}

/// Server response.
#[derive(Debug, Clone, PartialEq)]
pub struct Response {
    /// One or more results; the first is the primary outcome
    pub results: Vec<EppResult>,
    /// Queue information (poll responses)
    pub msg_queue: Option<MessageQueue>,
    /// Object-specific result data
    pub res_data: Option<Box<dyn Payload>>,
    /// Attached extensions
    pub extensions: Extensions,
    /// Transaction identifiers
    pub trans_id: TransactionId,
}

impl Response {
    /// Response with a single result.
    pub fn new(result: EppResult, trans_id: TransactionId) -> Self {
        Self {
            results: vec![result],
            msg_queue: None,
            res_data: None,
            extensions: Extensions::new(),
            trans_id,
        }
    }

    /// Response with a single default-message result.
    pub fn from_code(code: ResultCode, trans_id: TransactionId) -> Self {
        Self::new(EppResult::new(code), trans_id)
    }

    /// Attach result data.
    pub fn with_res_data(mut self, data: impl Payload) -> Self {
        self.res_data = Some(Box::new(data));
        self
    }

    /// Attach queue information.
    pub fn with_msg_queue(mut self, queue: MessageQueue) -> Self {
        self.msg_queue = Some(queue);
        self
    }

    /// Primary result.
    pub fn result(&self) -> &EppResult {
        &self.results[0]
    }

    /// Primary result code.
    pub fn code(&self) -> ResultCode {
        self.result().code
    }

    /// Whether the primary result reports success.
    pub fn is_success(&self) -> bool {
        self.code().is_success()
    }

    /// Result data as its concrete type.
    pub fn res_data<T: Payload>(&self) -> Option<&T> {
        self.res_data.as_ref().and_then(|d| d.downcast_ref::<T>())
    }

    /// Turn a failure result into [`EppError::CommandFailed`].
    pub fn into_result(self) -> Result<Self> {
        if self.is_success() {
            Ok(self)
        } else {
            Err(EppError::CommandFailed(Box::new(self)))
        }
    }
}

/// Data collection policy access level.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DcpAccess {
    /// Access to all collected data
    All,
    /// No access
    None,
    /// No personal data collected
    Null,
    /// Other access
    Other,
    /// Access to personal data
    Personal,
    /// Access to personal and other data
    PersonalAndOther,
}

impl DcpAccess {
    /// Wire element name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::All => "all",
            Self::None => "none",
            Self::Null => "null",
            Self::Other => "other",
            Self::Personal => "personal",
            Self::PersonalAndOther => "personalAndOther",
        }
    }
}

impl FromStr for DcpAccess {
    type Err = DecodeError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "all" => Ok(Self::All),
            "none" => Ok(Self::None),
            "null" => Ok(Self::Null),
            "other" => Ok(Self::Other),
            "personal" => Ok(Self::Personal),
            "personalAndOther" => Ok(Self::PersonalAndOther),
            _ => Err(DecodeError::invalid("dcp/access", s)),
        }
    }
}

/// One data collection statement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DcpStatement {
    /// Purposes (`admin`, `contact`, `other`, `prov`)
    pub purposes: Vec<String>,
    /// Recipients (`other`, `ours`, `public`, `same`, `unrelated`)
    pub recipients: Vec<String>,
    /// Retention (`business`, `indefinite`, `legal`, `none`, `stated`)
    pub retention: String,
}

impl Default for DcpStatement {
    fn default() -> Self {
        Self {
            purposes: vec!["admin".to_string(), "prov".to_string()],
            recipients: vec!["ours".to_string()],
            retention: "stated".to_string(),
        }
    }
}

/// Data collection policy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dcp {
    /// Access level
    pub access: DcpAccess,
    /// Statements (at least one on the wire)
    pub statements: Vec<DcpStatement>,
}

impl Default for Dcp {
    fn default() -> Self {
        Self {
            access: DcpAccess::All,
            statements: vec![DcpStatement::default()],
        }
    }
}

/// Server greeting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Greeting {
    /// Server name
    pub server_id: String,
    /// Server time when the greeting was built
    pub server_date: DateTime<Utc>,
    /// Supported protocol versions
    pub versions: Vec<String>,
    /// Supported response languages
    pub languages: Vec<String>,
    /// Supported object services
    pub object_uris: Vec<String>,
    /// Supported extensions
    pub extension_uris: Vec<String>,
    /// Data collection policy
    pub dcp: Dcp,
}

impl Greeting {
    /// Greeting for the current time, protocol 1.0, English.
    pub fn new(server_id: impl Into<String>) -> Self {
        Self {
            server_id: server_id.into(),
            server_date: Utc::now(),
            versions: vec![PROTOCOL_VERSION.to_string()],
            languages: vec!["en".to_string()],
            object_uris: Vec::new(),
            extension_uris: Vec::new(),
            dcp: Dcp::default(),
        }
    }

    /// Whether the server offers the object service.
    pub fn supports_object(&self, uri: &str) -> bool {
        self.object_uris.iter().any(|u| u == uri)
    }

    /// Whether the server offers the extension.
    pub fn supports_extension(&self, uri: &str) -> bool {
        self.extension_uris.iter().any(|u| u == uri)
    }
}
