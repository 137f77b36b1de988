//! Command handler contract and precondition chain.

use std::fmt;
use std::sync::Arc;

use super::fault::Fault;
use super::state::Session;
use crate::poll::PollQueue;
use crate::protocol::{Command, CommandType, Response, ResultCode, TransactionId};

/// Everything a handler sees about one command.
#[derive(Debug)]
pub struct CommandEvent<'a> {
    command: &'a Command,
    trans_id: TransactionId,
    poll_queue: &'a PollQueue,
}

impl<'a> CommandEvent<'a> {
    /// Event for a decoded command.
    pub fn new(command: &'a Command, trans_id: TransactionId, poll_queue: &'a PollQueue) -> Self {
        Self {
            command,
            trans_id,
            poll_queue,
        }
    }

    /// The command
    pub fn command(&self) -> &Command {
        self.command
    }

    /// Transaction ids to echo in the response
    pub fn trans_id(&self) -> &TransactionId {
        &self.trans_id
    }

    /// Server-wide poll queue
    pub fn poll_queue(&self) -> &PollQueue {
        self.poll_queue
    }
}

/// Business logic for one (command type, object service) pair.
///
/// Handlers run synchronously on the connection task and must not block on
/// I/O.
pub trait CommandHandler: Send + Sync {
    /// Validation before `execute`. A fault here skips `execute` and
    /// `post_handle`.
    fn pre_handle(&self, _event: &CommandEvent<'_>, _session: &Session) -> Result<(), Fault> {
        Ok(())
    }

    /// Produce the response.
    fn execute(&self, event: &CommandEvent<'_>, session: &Session) -> Result<Response, Fault>;

    /// Side effects after the response is final.
    fn post_handle(&self, _event: &CommandEvent<'_>, _session: &Session, _response: &Response) {}
}

/// A check that must pass before a handler runs.
pub trait Precondition: Send + Sync {
    /// Pass, or fail with the fault to answer with.
    fn check(&self, event: &CommandEvent<'_>, session: &Session) -> Result<(), Fault>;
}

impl<F> Precondition for F
where
    F: Fn(&CommandEvent<'_>, &Session) -> Result<(), Fault> + Send + Sync,
{
    fn check(&self, event: &CommandEvent<'_>, session: &Session) -> Result<(), Fault> {
        self(event, session)
    }
}

/// Rejects every command before login with 2500, closing the connection.
#[derive(Debug, Clone, Copy, Default)]
pub struct RequireAuthenticated;

impl Precondition for RequireAuthenticated {
    fn check(&self, event: &CommandEvent<'_>, session: &Session) -> Result<(), Fault> {
        if session.is_authenticated() {
            Ok(())
        } else {
            Err(Fault::new(ResultCode::CommandFailedClosing).with_reason(format!(
                "{} not allowed before login",
                event.command().command_type()
            )))
        }
    }
}

/// Rejects object services (2307) and extensions (2103) not selected at login.
#[derive(Debug, Clone, Copy, Default)]
pub struct RequireNegotiated;

impl Precondition for RequireNegotiated {
    fn check(&self, event: &CommandEvent<'_>, session: &Session) -> Result<(), Fault> {
        let command = event.command();
        if let Some(ns) = command.object_namespace() {
            if !session.uses_object(ns) {
                return Err(Fault::new(ResultCode::UnimplementedObjectService)
                    .with_reason(format!("{ns} not selected at login")));
            }
        }
        for ns in command.extensions.namespaces() {
            if !session.uses_extension(ns) {
                return Err(Fault::new(ResultCode::UnimplementedExtension)
                    .with_reason(format!("{ns} not selected at login")));
            }
        }
        Ok(())
    }
}

/// A registered handler with its selection rules.
#[derive(Clone)]
pub struct HandlerEntry {
    pub(crate) command_type: CommandType,
    pub(crate) object_ns: Option<String>,
    pub(crate) required_extensions: Vec<String>,
    pub(crate) preconditions: Vec<Arc<dyn Precondition>>,
    pub(crate) handler: Arc<dyn CommandHandler>,
}

impl fmt::Debug for HandlerEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlerEntry")
            .field("command_type", &self.command_type)
            .field("object_ns", &self.object_ns)
            .field("required_extensions", &self.required_extensions)
            .field("preconditions", &self.preconditions.len())
            .finish()
    }
}

impl HandlerEntry {
    /// Entry for a command type, optionally bound to an object service.
    pub fn new(
        command_type: CommandType,
        object_ns: Option<&str>,
        handler: impl CommandHandler + 'static,
    ) -> Self {
        Self {
            command_type,
            object_ns: object_ns.map(str::to_string),
            required_extensions: Vec::new(),
            preconditions: Vec::new(),
            handler: Arc::new(handler),
        }
    }

    /// Only select this entry when the extension is present on the command.
    pub fn requires_extension(mut self, namespace: impl Into<String>) -> Self {
        self.required_extensions.push(namespace.into());
        self
    }

    /// Run an extra check after the global chain.
    pub fn with_precondition(mut self, precondition: impl Precondition + 'static) -> Self {
        self.preconditions.push(Arc::new(precondition));
        self
    }

    pub(crate) fn matches(&self, command: &Command) -> bool {
        self.required_extensions
            .iter()
            .all(|ns| command.extensions.contains_namespace(ns))
    }
}
