//! Protocol primitives and message envelope.
//!
//! Typed form of everything that crosses the wire, independent of how it is
//! encoded (see [`crate::codec`]) or transported (see [`crate::transport`]).
//!
//! # Message Flow
//!
//! ```text
//! Client                              Server
//!    |                                  |
//!    |<--------- GREETING --------------|  Sent on connect
//!    |                                  |
//!    |---------- LOGIN (services) ----->|
//!    |<--------- RESPONSE 1000 ---------|  Session authenticated
//!    |                                  |
//!    |---------- CHECK / INFO / ... --->|  Object commands + extensions
//!    |<--------- RESPONSE (resData) ----|
//!    |                                  |
//!    |---------- POLL req ------------->|  Fetch queued notification
//!    |<--------- RESPONSE 1301 (msgQ) --|
//!    |---------- POLL ack <id> -------->|  Remove it
//!    |<--------- RESPONSE 1000 ---------|
//!    |                                  |
//!    |---------- LOGOUT --------------->|
//!    |<--------- RESPONSE 1500 ---------|  Connection closes
//! ```
//!
//! ## Result Severity
//!
//! | Severity               | Codes        | Connection |
//! |------------------------|--------------|------------|
//! | `Success`              | 1000         | open       |
//! | `SuccessWithInfo`      | 1001-1301    | open       |
//! | `SuccessWithInfo`      | 1500         | closes     |
//! | `Failure`              | 2000-2400    | open       |
//! | `FailureEndingSession` | 2500-2502    | closes     |

mod message;
mod payload;
mod result;
mod trans_id;

pub use message::{
    Command, CommandKind, CommandType, Dcp, DcpAccess, DcpStatement, Greeting, Login, Message,
    MessageQueue, PollOp, Response, TransferOp, Verb,
};
pub use payload::{AnyPayload, Extensions, Payload, RawPayload};
pub use result::{EppResult, ResultCode, ResultValue, Severity};
pub use trans_id::{TransIdGenerator, TransactionId};

/// Protocol version
pub const PROTOCOL_VERSION: &str = "1.0";

/// Envelope namespace
pub const EPP_NS: &str = "urn:ietf:params:xml:ns:epp-1.0";
