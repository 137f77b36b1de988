//! Per-connection session state.

use std::time::{Duration, Instant};

use crate::protocol::{Greeting, Login};

/// Session lifecycle.
///
/// ```text
///                      login (1000)
///   [Unauthenticated] ─────────────> [Authenticated]
///          │                               │
///          │ 2500 / 2501                   │ logout (1500), 25xx
///          v                               v
///     [Terminated] <───────────────────────┘
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Greeting sent, no successful login yet
    Unauthenticated,
    /// Logged in; object commands allowed
    Authenticated,
    /// Ended; the connection closes
    Terminated,
}

/// What the client selected at login.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Negotiated {
    /// Protocol version
    pub version: String,
    /// Response language
    pub lang: String,
    /// Object services in use
    pub object_uris: Vec<String>,
    /// Extensions in use
    pub extension_uris: Vec<String>,
}

/// State of one client connection.
#[derive(Debug, Clone)]
pub struct Session {
    id: String,
    state: SessionState,
    greeting: Greeting,
    client_id: Option<String>,
    negotiated: Option<Negotiated>,
    failed_logins: u32,
    last_activity: Instant,
    idle_timeout: Duration,
    commands: u64,
}

impl Session {
    /// New unauthenticated session answering `hello` with `greeting`.
    pub fn new(greeting: Greeting, idle_timeout: Duration) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            state: SessionState::Unauthenticated,
            greeting,
            client_id: None,
            negotiated: None,
            failed_logins: 0,
            last_activity: Instant::now(),
            idle_timeout,
            commands: 0,
        }
    }

    /// Session id (for logging)
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Current state
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Greeting sent on connect
    pub fn greeting(&self) -> &Greeting {
        &self.greeting
    }

    /// Whether a login succeeded and the session has not ended
    pub fn is_authenticated(&self) -> bool {
        self.state == SessionState::Authenticated
    }

    /// Whether the session has ended
    pub fn is_terminated(&self) -> bool {
        self.state == SessionState::Terminated
    }

    /// Logged-in client id
    pub fn client_id(&self) -> Option<&str> {
        self.client_id.as_deref()
    }

    /// Login selections, once authenticated
    pub fn negotiated(&self) -> Option<&Negotiated> {
        self.negotiated.as_ref()
    }

    /// Whether the object service was selected at login.
    pub fn uses_object(&self, uri: &str) -> bool {
        self.negotiated
            .as_ref()
            .is_some_and(|n| n.object_uris.iter().any(|u| u == uri))
    }

    /// Whether the extension was selected at login.
    pub fn uses_extension(&self, uri: &str) -> bool {
        self.negotiated
            .as_ref()
            .is_some_and(|n| n.extension_uris.iter().any(|u| u == uri))
    }

    /// Consecutive failed logins
    pub fn failed_logins(&self) -> u32 {
        self.failed_logins
    }

    /// Commands processed
    pub fn commands(&self) -> u64 {
        self.commands
    }

    /// Whether nothing was processed within the idle window.
    pub fn is_idle(&self) -> bool {
        self.last_activity.elapsed() >= self.idle_timeout
    }

    /// Configured idle window
    pub fn idle_timeout(&self) -> Duration {
        self.idle_timeout
    }

    /// Record activity, resetting the idle timer.
    pub fn touch(&mut self) {
        self.last_activity = Instant::now();
    }

    pub(crate) fn record_command(&mut self) {
        self.commands += 1;
        self.touch();
    }

    pub(crate) fn record_failed_login(&mut self) -> u32 {
        self.failed_logins += 1;
        self.failed_logins
    }

    pub(crate) fn authenticate(&mut self, login: &Login) {
        self.client_id = Some(login.client_id.clone());
        self.negotiated = Some(Negotiated {
            version: login.version.clone(),
            lang: login.lang.clone(),
            object_uris: login.object_uris.clone(),
            extension_uris: login.extension_uris.clone(),
        });
        self.failed_logins = 0;
        self.state = SessionState::Authenticated;
    }

    pub(crate) fn terminate(&mut self) {
        self.state = SessionState::Terminated;
    }
}
