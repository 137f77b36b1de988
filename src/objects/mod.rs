//! Built-in object services and extensions.
//!
//! | Namespace                                 | Kind      | Types                                  |
//! |-------------------------------------------|-----------|----------------------------------------|
//! | `urn:ietf:params:xml:ns:domain-1.0`       | service   | check, chkData, trnData (others raw)   |
//! | `urn:X-ar:params:xml:ns:subProduct-1.0`   | extension | subProduct                             |
//!
//! [`BUILTINS`] is what configuration can refer to by namespace;
//! [`default_registry`] registers all of it.

mod domain;
mod subproduct;

pub use domain::{
    CheckResult, DomainCheck, DomainCheckData, DomainCheckHandler, DomainTransferData,
    TransferStatus, DOMAIN_NS, DOMAIN_PREFIX, DOMAIN_SCHEMA,
};
pub use subproduct::{SubProduct, SUBPRODUCT_NS, SUBPRODUCT_PREFIX};

use crate::codec::{CodecRegistry, DecodeError, Element};
use crate::protocol::Payload;

/// Which registry table a codec belongs in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CodecKind {
    /// Base object service
    Service,
    /// Command/response extension
    Extension,
}

/// A codec shipped with the crate.
#[derive(Debug, Clone, Copy)]
pub struct BuiltinCodec {
    /// XML namespace
    pub namespace: &'static str,
    /// Prefix used when encoding
    pub prefix: &'static str,
    /// Default schema location, services only
    pub schema: Option<&'static str>,
    /// Table it belongs in
    pub kind: CodecKind,
    /// Element factory
    pub decode: fn(&Element) -> Result<Box<dyn Payload>, DecodeError>,
}

impl BuiltinCodec {
    /// Add this codec to `registry`. Services use `schema_locations` when
    /// given, otherwise the built-in schema location.
    pub fn register(&self, registry: &mut CodecRegistry, schema_locations: Vec<String>) {
        match self.kind {
            CodecKind::Service => {
                let schema_locations = if schema_locations.is_empty() {
                    self.schema.map(str::to_string).into_iter().collect()
                } else {
                    schema_locations
                };
                registry.register_service(self.namespace, self.prefix, schema_locations, self.decode);
            },
            CodecKind::Extension => {
                registry.register_extension(self.namespace, self.prefix, self.decode);
            },
        }
    }
}

/// Every built-in codec.
pub static BUILTINS: &[BuiltinCodec] = &[
    BuiltinCodec {
        namespace: DOMAIN_NS,
        prefix: DOMAIN_PREFIX,
        schema: Some(DOMAIN_SCHEMA),
        kind: CodecKind::Service,
        decode: domain::decode,
    },
    BuiltinCodec {
        namespace: SUBPRODUCT_NS,
        prefix: SUBPRODUCT_PREFIX,
        schema: None,
        kind: CodecKind::Extension,
        decode: subproduct::decode,
    },
];

/// Look up a built-in codec by namespace.
pub fn builtin(namespace: &str) -> Option<&'static BuiltinCodec> {
    BUILTINS.iter().find(|c| c.namespace == namespace)
}

/// Registry with every built-in service and extension, none required.
pub fn default_registry() -> CodecRegistry {
    let mut registry = CodecRegistry::new();
    for codec in BUILTINS {
        codec.register(&mut registry, Vec::new());
    }
    registry
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_registry() {
        let registry = default_registry();
        assert!(registry.has_service(DOMAIN_NS));
        assert!(registry.has_extension(SUBPRODUCT_NS));
        assert_eq!(registry.schema_locations(DOMAIN_NS), &[DOMAIN_SCHEMA.to_string()]);
    }

    #[test]
    fn test_builtin_lookup() {
        assert_eq!(builtin(DOMAIN_NS).map(|c| c.kind), Some(CodecKind::Service));
        assert_eq!(builtin(SUBPRODUCT_NS).map(|c| c.kind), Some(CodecKind::Extension));
        assert!(builtin("urn:ietf:params:xml:ns:host-1.0").is_none());
    }
}
