//! Processing faults.
//!
//! Anything that goes wrong while handling a decoded command is a [`Fault`]:
//! a result code plus optional detail, turned into a response only when the
//! dispatcher is done with it.

use std::fmt;

use crate::codec::DecodeError;
use crate::protocol::{EppResult, Response, ResultCode, ResultValue, TransactionId};

/// A failed command outcome.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fault {
    /// Result code to answer with
    pub code: ResultCode,
    /// Detail appended to the default message
    pub reason: Option<String>,
    /// Offending values
    pub values: Vec<ResultValue>,
}

impl Fault {
    /// Fault with the code's default message.
    pub fn new(code: ResultCode) -> Self {
        Self {
            code,
            reason: None,
            values: Vec::new(),
        }
    }

    /// Add detail.
    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    /// Add an offending value.
    pub fn with_value(mut self, value: ResultValue) -> Self {
        self.values.push(value);
        self
    }

    /// Whether the connection closes after reporting this fault.
    pub fn ends_session(&self) -> bool {
        self.code.ends_session()
    }

    /// Response reporting this fault.
    pub fn to_response(&self, trans_id: TransactionId) -> Response {
        let mut result = EppResult::new(self.code);
        if let Some(reason) = &self.reason {
            result.message = format!("{}; {}", result.message, reason);
        }
        result.values = self.values.clone();
        Response::new(result, trans_id)
    }
}

impl fmt::Display for Fault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.reason {
            Some(reason) => write!(f, "{} ({})", self.code, reason),
            None => write!(f, "{}", self.code),
        }
    }
}

impl std::error::Error for Fault {}

impl From<DecodeError> for Fault {
    fn from(err: DecodeError) -> Self {
        Self::new(err.result_code()).with_reason(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fault_response() {
        let fault = Fault::new(ResultCode::ObjectDoesNotExist).with_reason("message 7 not found");
        let response = fault.to_response(TransactionId::new(Some("C-1".into()), "S-1"));

        assert_eq!(response.code(), ResultCode::ObjectDoesNotExist);
        assert!(response.result().message.ends_with("message 7 not found"));
        assert_eq!(response.trans_id.client.as_deref(), Some("C-1"));
        assert!(!fault.ends_session());
    }

    #[test]
    fn test_decode_error_mapping() {
        let fault = Fault::from(DecodeError::UnknownExtension("urn:x".into()));
        assert_eq!(fault.code, ResultCode::UnimplementedExtension);
        assert!(fault.reason.unwrap().contains("urn:x"));
    }
}
