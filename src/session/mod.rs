//! Session state machine and command dispatch.
//!
//! A [`Session`] tracks one connection from greeting to close. The
//! [`Dispatcher`] owns the login rules and routes every other command through
//! a precondition chain to a registered [`CommandHandler`].
//!
//! # Outcomes
//!
//! | Situation                                   | Code | Connection |
//! |---------------------------------------------|------|------------|
//! | login ok                                    | 1000 | open       |
//! | second login                                | 2002 | open       |
//! | command before login                        | 2500 | closes     |
//! | too many failed logins                      | 2501 | closes     |
//! | service / extension not selected at login   | 2307 / 2103 | open |
//! | no handler registered                       | 2101 | open       |
//! | logout                                      | 1500 | closes     |

mod auth;
mod dispatch;
mod fault;
mod handler;
mod state;

pub use auth::{Authenticator, StaticAuthenticator};
pub use dispatch::{Dispatcher, DEFAULT_MAX_LOGIN_ATTEMPTS};
pub use fault::Fault;
pub use handler::{
    CommandEvent, CommandHandler, HandlerEntry, Precondition, RequireAuthenticated,
    RequireNegotiated,
};
pub use state::{Negotiated, Session, SessionState};
