//! Command dispatch and the login state machine.

use std::collections::HashMap;
use std::sync::Arc;

use super::auth::Authenticator;
use super::fault::Fault;
use super::handler::{
    CommandEvent, CommandHandler, HandlerEntry, Precondition, RequireAuthenticated,
    RequireNegotiated,
};
use super::state::Session;
use crate::codec::{DecodeError, Element, FailedDocument};
use crate::poll::{PollHandler, PollQueue};
use crate::protocol::{
    Command, CommandKind, CommandType, Login, Message, Response, ResultCode, ResultValue,
    TransIdGenerator, TransactionId, EPP_NS, PROTOCOL_VERSION,
};

/// Default number of consecutive failed logins before the connection closes.
pub const DEFAULT_MAX_LOGIN_ATTEMPTS: u32 = 3;

type HandlerKey = (CommandType, Option<String>);

/// Routes decoded messages through the session state machine and handlers.
///
/// ```text
/// command ─> login/logout? ─> global preconditions ─> select handler
///         ─> entry preconditions ─> pre_handle ─> execute ─> post_handle
/// ```
///
/// Every command yields exactly one response.
pub struct Dispatcher {
    handlers: HashMap<HandlerKey, Vec<HandlerEntry>>,
    global: Vec<Arc<dyn Precondition>>,
    authenticator: Arc<dyn Authenticator>,
    trans_ids: TransIdGenerator,
    max_login_attempts: u32,
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("handlers", &self.handlers.keys().collect::<Vec<_>>())
            .field("global", &self.global.len())
            .field("max_login_attempts", &self.max_login_attempts)
            .finish()
    }
}

impl Dispatcher {
    /// Dispatcher with the built-in precondition chain and poll handler.
    pub fn new(authenticator: Arc<dyn Authenticator>, trans_ids: TransIdGenerator) -> Self {
        let mut dispatcher = Self {
            handlers: HashMap::new(),
            global: vec![Arc::new(RequireAuthenticated), Arc::new(RequireNegotiated)],
            authenticator,
            trans_ids,
            max_login_attempts: DEFAULT_MAX_LOGIN_ATTEMPTS,
        };
        dispatcher.register(CommandType::Poll, None, PollHandler);
        dispatcher
    }

    /// Close the connection after this many consecutive failed logins.
    pub fn with_max_login_attempts(mut self, attempts: u32) -> Self {
        self.max_login_attempts = attempts.max(1);
        self
    }

    /// Append a precondition to the global chain.
    pub fn add_precondition(&mut self, precondition: impl Precondition + 'static) {
        self.global.push(Arc::new(precondition));
    }

    /// Register a handler for a command type and object service.
    pub fn register(
        &mut self,
        command_type: CommandType,
        object_ns: Option<&str>,
        handler: impl CommandHandler + 'static,
    ) {
        self.register_entry(HandlerEntry::new(command_type, object_ns, handler));
    }

    /// Register a fully configured entry.
    ///
    /// Entries for the same key are tried most-specific first: the entry
    /// requiring the most extensions that are all present wins.
    pub fn register_entry(&mut self, entry: HandlerEntry) {
        let key = (entry.command_type, entry.object_ns.clone());
        let entries = self.handlers.entry(key).or_default();
        entries.push(entry);
        entries.sort_by(|a, b| b.required_extensions.len().cmp(&a.required_extensions.len()));
    }

    fn select(&self, command: &Command) -> Option<&HandlerEntry> {
        let key = (
            command.command_type(),
            command.object_namespace().map(str::to_string),
        );
        self.handlers.get(&key)?.iter().find(|e| e.matches(command))
    }

    fn trans_id(&self, client: Option<String>) -> TransactionId {
        TransactionId::new(client, self.trans_ids.next_id())
    }

    /// Answer one decoded message.
    pub fn handle(&self, session: &mut Session, message: &Message, poll_queue: &PollQueue) -> Message {
        match message {
            Message::Hello => {
                session.touch();
                Message::Greeting(session.greeting().clone())
            },
            Message::Command(command) => Message::Response(self.handle_command(session, command, poll_queue)),
            Message::Greeting(_) | Message::Response(_) => {
                session.touch();
                let fault = Fault::new(ResultCode::UnknownCommand)
                    .with_reason(format!("{} is not a client message", message.kind()));
                Message::Response(fault.to_response(self.trans_id(None)))
            },
        }
    }

    /// Answer a document that failed to decode.
    ///
    /// Before login, a failed command other than `login` is answered with
    /// 2500 and ends the session, whatever the decode error was.
    pub fn handle_decode_error(
        &self,
        session: &mut Session,
        error: &DecodeError,
        document: FailedDocument,
    ) -> Response {
        session.touch();
        tracing::debug!(session = %session.id(), "Decode failed: {}", error);
        let fault = if document.is_session_command() && !session.is_authenticated() {
            Fault::new(ResultCode::CommandFailedClosing).with_reason(format!(
                "{} not allowed before login",
                document.command.as_deref().filter(|v| !v.is_empty()).unwrap_or("command")
            ))
        } else {
            Fault::from(error.clone())
        };
        let response = fault.to_response(self.trans_id(document.client_trans_id));
        self.finish(session, response)
    }

    /// Answer with a fault raised outside the handler chain, such as a
    /// framing or encoding failure.
    pub fn fault_response(
        &self,
        session: &mut Session,
        fault: &Fault,
        client_trans_id: Option<String>,
    ) -> Response {
        let response = fault.to_response(self.trans_id(client_trans_id));
        self.finish(session, response)
    }

    /// Answer one command.
    pub fn handle_command(&self, session: &mut Session, command: &Command, poll_queue: &PollQueue) -> Response {
        session.record_command();
        let trans_id = self.trans_id(command.client_trans_id.clone());
        tracing::debug!(
            session = %session.id(),
            command = %command.command_type(),
            object = ?command.object_namespace(),
            "Dispatching command"
        );

        let outcome = match &command.kind {
            CommandKind::Login(login) => self.login(session, login, trans_id.clone()),
            _ => self.run(session, command, poll_queue, trans_id.clone()),
        };
        let response = outcome.unwrap_or_else(|fault| {
            tracing::debug!(session = %session.id(), "Command failed: {}", fault);
            fault.to_response(trans_id)
        });
        self.finish(session, response)
    }

    fn finish(&self, session: &mut Session, response: Response) -> Response {
        if response.code().ends_session() {
            session.terminate();
        }
        response
    }

    fn login(&self, session: &mut Session, login: &Login, trans_id: TransactionId) -> Result<Response, Fault> {
        if session.is_authenticated() {
            return Err(Fault::new(ResultCode::CommandUseError).with_reason("already logged in"));
        }
        if login.version != PROTOCOL_VERSION {
            return Err(Fault::new(ResultCode::UnimplementedProtocolVersion)
                .with_value(ResultValue::new(Element::new(EPP_NS, "version").with_text(login.version.as_str()))));
        }
        if !session.greeting().languages.contains(&login.lang) {
            return Err(Fault::new(ResultCode::UnimplementedOption)
                .with_value(ResultValue::new(Element::new(EPP_NS, "lang").with_text(login.lang.as_str()))));
        }
        if let Some(uri) = login.object_uris.iter().find(|u| !session.greeting().supports_object(u)) {
            return Err(Fault::new(ResultCode::UnimplementedObjectService)
                .with_value(ResultValue::new(Element::new(EPP_NS, "objURI").with_text(uri.as_str()))));
        }
        if let Some(uri) = login.extension_uris.iter().find(|u| !session.greeting().supports_extension(u)) {
            return Err(Fault::new(ResultCode::UnimplementedExtension)
                .with_value(ResultValue::new(Element::new(EPP_NS, "extURI").with_text(uri.as_str()))));
        }

        if !self.authenticator.authenticate(&login.client_id, &login.password) {
            let failures = session.record_failed_login();
            tracing::warn!(
                session = %session.id(),
                client = %login.client_id,
                failures,
                "Login rejected"
            );
            let code = if failures >= self.max_login_attempts {
                ResultCode::AuthenticationErrorClosing
            } else {
                ResultCode::AuthenticationError
            };
            return Err(Fault::new(code));
        }

        if let Some(new_password) = &login.new_password {
            if !self.authenticator.change_password(&login.client_id, new_password) {
                return Err(Fault::new(ResultCode::ParameterValuePolicyError)
                    .with_reason("new password refused"));
            }
        }

        session.authenticate(login);
        tracing::info!(session = %session.id(), client = %login.client_id, "Login succeeded");
        Ok(Response::from_code(ResultCode::Success, trans_id))
    }

    fn run(
        &self,
        session: &Session,
        command: &Command,
        poll_queue: &PollQueue,
        trans_id: TransactionId,
    ) -> Result<Response, Fault> {
        let event = CommandEvent::new(command, trans_id, poll_queue);
        for precondition in &self.global {
            precondition.check(&event, session)?;
        }

        if matches!(command.kind, CommandKind::Logout) {
            tracing::info!(session = %session.id(), client = ?session.client_id(), "Logout");
            return Ok(Response::from_code(
                ResultCode::SuccessEndingSession,
                event.trans_id().clone(),
            ));
        }

        let entry = self.select(command).ok_or_else(|| {
            Fault::new(ResultCode::UnimplementedCommand).with_reason(format!(
                "no handler for {} {}",
                command.command_type(),
                command.object_namespace().unwrap_or_default()
            ))
        })?;
        for precondition in &entry.preconditions {
            precondition.check(&event, session)?;
        }

        entry.handler.pre_handle(&event, session)?;
        let response = entry
            .handler
            .execute(&event, session)
            .unwrap_or_else(|fault| fault.to_response(event.trans_id().clone()));
        entry.handler.post_handle(&event, session, &response);
        Ok(response)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use super::*;
    use crate::protocol::{Greeting, RawPayload, Verb};
    use crate::session::StaticAuthenticator;

    const OBJ: &str = "urn:test:obj";
    const EXT: &str = "urn:test:ext";

    struct Fixed(ResultCode);

    impl CommandHandler for Fixed {
        fn execute(&self, event: &CommandEvent<'_>, _session: &Session) -> Result<Response, Fault> {
            Ok(Response::from_code(self.0, event.trans_id().clone()))
        }
    }

    struct Counting {
        post: Arc<AtomicUsize>,
    }

    impl CommandHandler for Counting {
        fn pre_handle(&self, event: &CommandEvent<'_>, _session: &Session) -> Result<(), Fault> {
            match event.command().client_trans_id.as_deref() {
                Some("REJECT") => Err(Fault::new(ResultCode::ParameterValuePolicyError)),
                _ => Ok(()),
            }
        }

        fn execute(&self, event: &CommandEvent<'_>, _session: &Session) -> Result<Response, Fault> {
            Ok(Response::from_code(ResultCode::Success, event.trans_id().clone()))
        }

        fn post_handle(&self, _event: &CommandEvent<'_>, _session: &Session, _response: &Response) {
            self.post.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn greeting() -> Greeting {
        let mut greeting = Greeting::new("test");
        greeting.object_uris = vec![OBJ.to_string()];
        greeting.extension_uris = vec![EXT.to_string()];
        greeting
    }

    fn dispatcher() -> Dispatcher {
        let auth = Arc::new(StaticAuthenticator::new([("ClientX", "foo-BAR2")]));
        Dispatcher::new(auth, TransIdGenerator::new("TEST"))
    }

    fn session() -> Session {
        Session::new(greeting(), Duration::from_secs(60))
    }

    fn login() -> Command {
        Command::login(Login::new("ClientX", "foo-BAR2").with_object(OBJ).with_extension(EXT))
    }

    fn object() -> Command {
        Command::object(Verb::Check, RawPayload(Element::new(OBJ, "check")))
    }

    #[test]
    fn test_login_then_second_login() {
        let dispatcher = dispatcher();
        let queue = PollQueue::new();
        let mut session = session();

        let first = dispatcher.handle_command(&mut session, &login(), &queue);
        assert_eq!(first.code(), ResultCode::Success);
        assert!(session.is_authenticated());

        let second = dispatcher.handle_command(&mut session, &login(), &queue);
        assert_eq!(second.code(), ResultCode::CommandUseError);
        assert!(session.is_authenticated());
    }

    #[test]
    fn test_command_before_login_ends_session() {
        let dispatcher = dispatcher();
        let mut session = session();

        let response = dispatcher.handle_command(&mut session, &object(), &PollQueue::new());
        assert_eq!(response.code(), ResultCode::CommandFailedClosing);
        assert!(session.is_terminated());
    }

    #[test]
    fn test_login_checks() {
        let dispatcher = dispatcher();
        let queue = PollQueue::new();
        let cases = [
            (Login { version: "2.0".into(), ..Login::new("ClientX", "foo-BAR2") }, ResultCode::UnimplementedProtocolVersion),
            (Login { lang: "fr".into(), ..Login::new("ClientX", "foo-BAR2") }, ResultCode::UnimplementedOption),
            (Login::new("ClientX", "foo-BAR2").with_object("urn:nope"), ResultCode::UnimplementedObjectService),
            (Login::new("ClientX", "foo-BAR2").with_extension("urn:nope"), ResultCode::UnimplementedExtension),
            (Login::new("ClientX", "wrong"), ResultCode::AuthenticationError),
        ];
        for (login, expected) in cases {
            let mut session = session();
            let response = dispatcher.handle_command(&mut session, &Command::login(login), &queue);
            assert_eq!(response.code(), expected);
            assert!(!session.is_authenticated());
        }
    }

    #[test]
    fn test_repeated_bad_logins_close() {
        let dispatcher = dispatcher().with_max_login_attempts(2);
        let queue = PollQueue::new();
        let mut session = session();
        let bad = Command::login(Login::new("ClientX", "wrong"));

        let first = dispatcher.handle_command(&mut session, &bad, &queue);
        assert_eq!(first.code(), ResultCode::AuthenticationError);
        let second = dispatcher.handle_command(&mut session, &bad, &queue);
        assert_eq!(second.code(), ResultCode::AuthenticationErrorClosing);
        assert!(session.is_terminated());
    }

    #[test]
    fn test_handler_selection_and_missing_handler() {
        let mut dispatcher = dispatcher();
        let queue = PollQueue::new();
        let mut session = session();
        dispatcher.handle_command(&mut session, &login(), &queue);

        let missing = dispatcher.handle_command(&mut session, &object(), &queue);
        assert_eq!(missing.code(), ResultCode::UnimplementedCommand);

        dispatcher.register(CommandType::Check, Some(OBJ), Fixed(ResultCode::Success));
        dispatcher.register_entry(
            HandlerEntry::new(CommandType::Check, Some(OBJ), Fixed(ResultCode::SuccessPending))
                .requires_extension(EXT),
        );

        let plain = dispatcher.handle_command(&mut session, &object(), &queue);
        assert_eq!(plain.code(), ResultCode::Success);

        let with_ext = object()
            .with_extension(RawPayload(Element::new(EXT, "flag")))
            .unwrap();
        let specific = dispatcher.handle_command(&mut session, &with_ext, &queue);
        assert_eq!(specific.code(), ResultCode::SuccessPending);
    }

    #[test]
    fn test_unnegotiated_service_and_extension() {
        let dispatcher = dispatcher();
        let queue = PollQueue::new();
        let mut session = session();
        let login = Command::login(Login::new("ClientX", "foo-BAR2"));
        dispatcher.handle_command(&mut session, &login, &queue);

        let object_fault = dispatcher.handle_command(&mut session, &object(), &queue);
        assert_eq!(object_fault.code(), ResultCode::UnimplementedObjectService);

        let ext = Command::poll_request()
            .with_extension(RawPayload(Element::new(EXT, "flag")))
            .unwrap();
        let ext_fault = dispatcher.handle_command(&mut session, &ext, &queue);
        assert_eq!(ext_fault.code(), ResultCode::UnimplementedExtension);
        assert!(session.is_authenticated());
    }

    #[test]
    fn test_pipeline_hooks_and_entry_preconditions() {
        let mut dispatcher = dispatcher();
        let post = Arc::new(AtomicUsize::new(0));
        dispatcher.register_entry(
            HandlerEntry::new(CommandType::Check, Some(OBJ), Counting { post: post.clone() })
                .with_precondition(|event: &CommandEvent<'_>, _: &Session| {
                    match event.command().client_trans_id.as_deref() {
                        Some("BLOCKED") => Err(Fault::new(ResultCode::AuthorizationError)),
                        _ => Ok(()),
                    }
                }),
        );
        let queue = PollQueue::new();
        let mut session = session();
        dispatcher.handle_command(&mut session, &login(), &queue);

        let ok = dispatcher.handle_command(&mut session, &object().with_client_trans_id("OK-1"), &queue);
        assert_eq!(ok.code(), ResultCode::Success);
        assert_eq!(ok.trans_id.client.as_deref(), Some("OK-1"));

        let blocked = dispatcher.handle_command(&mut session, &object().with_client_trans_id("BLOCKED"), &queue);
        assert_eq!(blocked.code(), ResultCode::AuthorizationError);

        let rejected = dispatcher.handle_command(&mut session, &object().with_client_trans_id("REJECT"), &queue);
        assert_eq!(rejected.code(), ResultCode::ParameterValuePolicyError);

        assert_eq!(post.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_hello_and_logout() {
        let dispatcher = dispatcher();
        let queue = PollQueue::new();
        let mut session = session();

        let reply = dispatcher.handle(&mut session, &Message::Hello, &queue);
        assert_eq!(reply, Message::Greeting(session.greeting().clone()));

        dispatcher.handle_command(&mut session, &login(), &queue);
        let bye = dispatcher.handle_command(&mut session, &Command::logout(), &queue);
        assert_eq!(bye.code(), ResultCode::SuccessEndingSession);
        assert!(session.is_terminated());
    }

    #[test]
    fn test_undecodable_command_before_login_closes() {
        let dispatcher = dispatcher();
        let mut session = session();
        let error = DecodeError::UnsupportedObjectType("urn:nope".to_string());
        let document = FailedDocument {
            client_trans_id: Some("ABC-1".to_string()),
            command: Some("info".to_string()),
        };

        let response = dispatcher.handle_decode_error(&mut session, &error, document);
        assert_eq!(response.code(), ResultCode::CommandFailedClosing);
        assert_eq!(response.trans_id.client.as_deref(), Some("ABC-1"));
        assert!(session.is_terminated());
    }

    #[test]
    fn test_undecodable_login_keeps_session() {
        let dispatcher = dispatcher();
        let mut session = session();
        let error = DecodeError::missing("clID");
        let document = FailedDocument {
            client_trans_id: None,
            command: Some("login".to_string()),
        };

        let response = dispatcher.handle_decode_error(&mut session, &error, document);
        assert_eq!(response.code(), ResultCode::RequiredParameterMissing);
        assert!(!session.is_terminated());
    }

    #[test]
    fn test_undecodable_command_after_login_keeps_session() {
        let dispatcher = dispatcher();
        let queue = PollQueue::new();
        let mut session = session();
        dispatcher.handle_command(&mut session, &login(), &queue);

        let error = DecodeError::UnsupportedObjectType("urn:nope".to_string());
        let document = FailedDocument {
            client_trans_id: None,
            command: Some("info".to_string()),
        };
        let response = dispatcher.handle_decode_error(&mut session, &error, document);
        assert_eq!(response.code(), ResultCode::UnimplementedObjectService);
        assert!(session.is_authenticated());
    }
}
