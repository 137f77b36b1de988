//! Codec error types.

use thiserror::Error;

use crate::protocol::ResultCode;

/// Failure to map a document onto typed objects.
///
/// Every variant maps to the result code the server answers with.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    /// Document is not well-formed XML, or the envelope is not a protocol message.
    #[error("Malformed message: {0}")]
    Malformed(String),

    /// Command element is not a known command.
    #[error("Unknown command: {0}")]
    UnknownCommand(String),

    /// No service is registered for the object namespace.
    #[error("Unsupported object type: {0}")]
    UnsupportedObjectType(String),

    /// No extension is registered for the namespace and it is not skipped.
    #[error("Unknown extension: {0}")]
    UnknownExtension(String),

    /// A required element, attribute or extension is absent.
    #[error("Missing required parameter: {0}")]
    MissingParameter(String),

    /// A value is present but not acceptable.
    #[error("Invalid value for {field}: {value}")]
    InvalidValue {
        /// Element or attribute name
        field: String,
        /// Offending value
        value: String,
    },

    /// Two extensions share the same namespace and local name.
    #[error("Duplicate extension: {0}")]
    DuplicateExtension(String),
}

impl DecodeError {
    /// Result code the server answers a command with when decoding fails this way.
    pub fn result_code(&self) -> ResultCode {
        match self {
            Self::Malformed(_) | Self::DuplicateExtension(_) => ResultCode::CommandSyntaxError,
            Self::UnknownCommand(_) => ResultCode::UnknownCommand,
            Self::UnsupportedObjectType(_) => ResultCode::UnimplementedObjectService,
            Self::UnknownExtension(_) => ResultCode::UnimplementedExtension,
            Self::MissingParameter(_) => ResultCode::RequiredParameterMissing,
            Self::InvalidValue { .. } => ResultCode::ParameterValueSyntaxError,
        }
    }

    /// Shorthand for [`DecodeError::MissingParameter`].
    pub fn missing(what: impl Into<String>) -> Self {
        Self::MissingParameter(what.into())
    }

    /// Shorthand for [`DecodeError::InvalidValue`].
    pub fn invalid(field: impl Into<String>, value: impl Into<String>) -> Self {
        Self::InvalidValue {
            field: field.into(),
            value: value.into(),
        }
    }
}

/// Failure to produce a document from typed objects.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EncodeError {
    /// Payload namespace has no registered service or extension.
    #[error("Unregistered namespace: {0}")]
    Unregistered(String),

    /// A response without any result.
    #[error("Response has no result")]
    EmptyResponse,

    /// XML writer failure.
    #[error("XML write error: {0}")]
    Xml(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_error_codes() {
        assert_eq!(
            DecodeError::Malformed("x".into()).result_code().code(),
            2001
        );
        assert_eq!(DecodeError::missing("name").result_code().code(), 2003);
        assert_eq!(
            DecodeError::UnknownExtension("urn:x".into()).result_code().code(),
            2103
        );
        assert_eq!(
            DecodeError::UnsupportedObjectType("urn:x".into())
                .result_code()
                .code(),
            2307
        );
        assert_eq!(DecodeError::invalid("op", "bogus").result_code().code(), 2005);
    }
}
