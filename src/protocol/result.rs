//! Result codes and structured command outcomes.

use std::fmt;

use crate::codec::Element;

/// Outcome class of a result code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    /// Command completed.
    Success,
    /// Command completed with something worth noting (pending, queue state, ending).
    SuccessWithInfo,
    /// Command failed; the session continues.
    Failure,
    /// Command failed and the server closes the connection.
    FailureEndingSession,
}

impl Severity {
    /// Whether the command succeeded.
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success | Self::SuccessWithInfo)
    }
}

/// Fixed enumeration of protocol result codes.
///
/// | Range     | Meaning                              |
/// |-----------|--------------------------------------|
/// | 1000-1001 | Completed / action pending           |
/// | 1300-1301 | Poll queue state                     |
/// | 1500      | Completed, ending session            |
/// | 2000-2400 | Command failed                       |
/// | 2500-2502 | Command failed, server closing       |
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(u16)]
#[allow(missing_docs)]
pub enum ResultCode {
    Success = 1000,
    SuccessPending = 1001,
    SuccessNoMessages = 1300,
    SuccessAckToDequeue = 1301,
    SuccessEndingSession = 1500,
    UnknownCommand = 2000,
    CommandSyntaxError = 2001,
    CommandUseError = 2002,
    RequiredParameterMissing = 2003,
    ParameterValueRangeError = 2004,
    ParameterValueSyntaxError = 2005,
    UnimplementedProtocolVersion = 2100,
    UnimplementedCommand = 2101,
    UnimplementedOption = 2102,
    UnimplementedExtension = 2103,
    BillingFailure = 2104,
    NotEligibleForRenewal = 2105,
    NotEligibleForTransfer = 2106,
    AuthenticationError = 2200,
    AuthorizationError = 2201,
    InvalidAuthorizationInfo = 2202,
    ObjectPendingTransfer = 2300,
    ObjectNotPendingTransfer = 2301,
    ObjectExists = 2302,
    ObjectDoesNotExist = 2303,
    ObjectStatusProhibitsOperation = 2304,
    ObjectAssociationProhibitsOperation = 2305,
    ParameterValuePolicyError = 2306,
    UnimplementedObjectService = 2307,
    DataManagementPolicyViolation = 2308,
    CommandFailed = 2400,
    CommandFailedClosing = 2500,
    AuthenticationErrorClosing = 2501,
    SessionLimitExceeded = 2502,
}

const ALL_CODES: [ResultCode; 34] = [
    ResultCode::Success,
    ResultCode::SuccessPending,
    ResultCode::SuccessNoMessages,
    ResultCode::SuccessAckToDequeue,
    ResultCode::SuccessEndingSession,
    ResultCode::UnknownCommand,
    ResultCode::CommandSyntaxError,
    ResultCode::CommandUseError,
    ResultCode::RequiredParameterMissing,
    ResultCode::ParameterValueRangeError,
    ResultCode::ParameterValueSyntaxError,
    ResultCode::UnimplementedProtocolVersion,
    ResultCode::UnimplementedCommand,
    ResultCode::UnimplementedOption,
    ResultCode::UnimplementedExtension,
    ResultCode::BillingFailure,
    ResultCode::NotEligibleForRenewal,
    ResultCode::NotEligibleForTransfer,
    ResultCode::AuthenticationError,
    ResultCode::AuthorizationError,
    ResultCode::InvalidAuthorizationInfo,
    ResultCode::ObjectPendingTransfer,
    ResultCode::ObjectNotPendingTransfer,
    ResultCode::ObjectExists,
    ResultCode::ObjectDoesNotExist,
    ResultCode::ObjectStatusProhibitsOperation,
    ResultCode::ObjectAssociationProhibitsOperation,
    ResultCode::ParameterValuePolicyError,
    ResultCode::UnimplementedObjectService,
    ResultCode::DataManagementPolicyViolation,
    ResultCode::CommandFailed,
    ResultCode::CommandFailedClosing,
    ResultCode::AuthenticationErrorClosing,
    ResultCode::SessionLimitExceeded,
];

impl ResultCode {
    /// Numeric wire value.
    pub fn code(self) -> u16 {
        self as u16
    }

    /// Look up a code from its numeric wire value.
    pub fn from_code(code: u16) -> Option<Self> {
        ALL_CODES.iter().copied().find(|c| c.code() == code)
    }

    /// Default human-readable message.
    pub fn default_message(self) -> &'static str {
        match self {
            Self::Success => "Command completed successfully",
            Self::SuccessPending => "Command completed successfully; action pending",
            Self::SuccessNoMessages => "Command completed successfully; no messages",
            Self::SuccessAckToDequeue => "Command completed successfully; ack to dequeue",
            Self::SuccessEndingSession => "Command completed successfully; ending session",
            Self::UnknownCommand => "Unknown command",
            Self::CommandSyntaxError => "Command syntax error",
            Self::CommandUseError => "Command use error",
            Self::RequiredParameterMissing => "Required parameter missing",
            Self::ParameterValueRangeError => "Parameter value range error",
            Self::ParameterValueSyntaxError => "Parameter value syntax error",
            Self::UnimplementedProtocolVersion => "Unimplemented protocol version",
            Self::UnimplementedCommand => "Unimplemented command",
            Self::UnimplementedOption => "Unimplemented option",
            Self::UnimplementedExtension => "Unimplemented extension",
            Self::BillingFailure => "Billing failure",
            Self::NotEligibleForRenewal => "Object is not eligible for renewal",
            Self::NotEligibleForTransfer => "Object is not eligible for transfer",
            Self::AuthenticationError => "Authentication error",
            Self::AuthorizationError => "Authorization error",
            Self::InvalidAuthorizationInfo => "Invalid authorization information",
            Self::ObjectPendingTransfer => "Object pending transfer",
            Self::ObjectNotPendingTransfer => "Object not pending transfer",
            Self::ObjectExists => "Object exists",
            Self::ObjectDoesNotExist => "Object does not exist",
            Self::ObjectStatusProhibitsOperation => "Object status prohibits operation",
            Self::ObjectAssociationProhibitsOperation => "Object association prohibits operation",
            Self::ParameterValuePolicyError => "Parameter value policy error",
            Self::UnimplementedObjectService => "Unimplemented object service",
            Self::DataManagementPolicyViolation => "Data management policy violation",
            Self::CommandFailed => "Command failed",
            Self::CommandFailedClosing => "Command failed; server closing connection",
            Self::AuthenticationErrorClosing => "Authentication error; server closing connection",
            Self::SessionLimitExceeded => "Session limit exceeded; server closing connection",
        }
    }

    /// Severity class.
    pub fn severity(self) -> Severity {
        match self.code() {
            1000 => Severity::Success,
            1001..=1999 => Severity::SuccessWithInfo,
            2500..=2599 => Severity::FailureEndingSession,
            _ => Severity::Failure,
        }
    }

    /// Whether the server closes the connection after sending this code.
    pub fn ends_session(self) -> bool {
        self == Self::SuccessEndingSession || self.severity() == Severity::FailureEndingSession
    }

    /// Whether the code reports success.
    pub fn is_success(self) -> bool {
        self.severity().is_success()
    }
}

impl fmt::Display for ResultCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

/// A value attached to a result: the offending element, optionally with a reason.
///
/// With a reason it is written as `<extValue>`, otherwise as `<value>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResultValue {
    /// Element echoing the offending input.
    pub value: Element,
    /// Human-readable reason.
    pub reason: Option<String>,
}

impl ResultValue {
    /// Plain value.
    pub fn new(value: Element) -> Self {
        Self {
            value,
            reason: None,
        }
    }

    /// Value with an explanation.
    pub fn with_reason(value: Element, reason: impl Into<String>) -> Self {
        Self {
            value,
            reason: Some(reason.into()),
        }
    }
}

/// Structured outcome of processing one command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EppResult {
    /// Result code
    pub code: ResultCode,
    /// Human-readable message
    pub message: String,
    /// Language of `message`
    pub lang: String,
    /// Structured values
    pub values: Vec<ResultValue>,
}

impl EppResult {
    /// Result with the code's default message in English.
    pub fn new(code: ResultCode) -> Self {
        Self {
            code,
            message: code.default_message().to_string(),
            lang: "en".to_string(),
            values: Vec::new(),
        }
    }

    /// Replace the message.
    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = message.into();
        self
    }

    /// Append a value.
    pub fn with_value(mut self, value: ResultValue) -> Self {
        self.values.push(value);
        self
    }

    /// Severity of the code.
    pub fn severity(&self) -> Severity {
        self.code.severity()
    }

    /// Whether the result reports success.
    pub fn is_success(&self) -> bool {
        self.code.is_success()
    }
}

impl fmt::Display for EppResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.code, self.message)?;
        for value in &self.values {
            if let Some(reason) = &value.reason {
                write!(f, " ({reason})")?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_code_roundtrip() {
        for code in ALL_CODES {
            assert_eq!(ResultCode::from_code(code.code()), Some(code));
        }
        assert_eq!(ResultCode::from_code(1234), None);
    }

    #[test]
    fn test_severity_classes() {
        assert_eq!(ResultCode::Success.severity(), Severity::Success);
        assert_eq!(ResultCode::SuccessNoMessages.severity(), Severity::SuccessWithInfo);
        assert_eq!(ResultCode::ObjectDoesNotExist.severity(), Severity::Failure);
        assert_eq!(
            ResultCode::CommandFailedClosing.severity(),
            Severity::FailureEndingSession
        );
    }

    #[test]
    fn test_ends_session() {
        assert!(ResultCode::SuccessEndingSession.ends_session());
        assert!(ResultCode::AuthenticationErrorClosing.ends_session());
        assert!(!ResultCode::CommandUseError.ends_session());
        assert!(!ResultCode::SuccessNoMessages.ends_session());
    }

    #[test]
    fn test_result_display() {
        let result = EppResult::new(ResultCode::CommandUseError).with_value(
            ResultValue::with_reason(Element::new("urn:x", "login"), "already logged in"),
        );
        assert_eq!(
            result.to_string(),
            "2002 Command use error (already logged in)"
        );
    }
}
