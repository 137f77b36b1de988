//! Namespace-keyed codec registry.
//!
//! Two independent tables map XML namespaces to payload factories:
//!
//! | Table      | Keyed by          | Resolves                                    |
//! |------------|-------------------|---------------------------------------------|
//! | services   | object namespace  | command objects and `resData` content       |
//! | extensions | extension namespace | children of `<extension>`, on any message |
//!
//! Extensions are resolved by their own namespace, independently of the base
//! object they are attached to. Unknown namespaces fail the decode unless the
//! extension namespace is explicitly registered as skipped.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use super::envelope;
use super::error::{DecodeError, EncodeError};
use super::xml::Element;
use crate::protocol::{CommandType, Greeting, Message, Payload};

/// Factory turning an element into a typed payload.
pub type DecodeFn = Arc<dyn Fn(&Element) -> Result<Box<dyn Payload>, DecodeError> + Send + Sync>;

struct ServiceEntry {
    prefix: String,
    schema_locations: Vec<String>,
    decoder: DecodeFn,
}

enum ExtensionRule {
    Decode { prefix: String, decoder: DecodeFn },
    Skip,
}

/// An extension that must accompany certain commands of a service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequiredExtension {
    /// Service namespace the rule applies to
    pub service: String,
    /// Extension namespace that must be present
    pub extension: String,
    /// Command types the rule applies to; empty means all object commands
    pub commands: Vec<CommandType>,
}

impl RequiredExtension {
    fn applies_to(&self, service: &str, command: CommandType) -> bool {
        self.service == service && (self.commands.is_empty() || self.commands.contains(&command))
    }
}

/// Registry of object services and extensions.
///
/// Built once at startup, then shared read-only behind an `Arc`.
#[derive(Default)]
pub struct CodecRegistry {
    services: HashMap<String, ServiceEntry>,
    service_order: Vec<String>,
    extensions: HashMap<String, ExtensionRule>,
    extension_order: Vec<String>,
    required: Vec<RequiredExtension>,
}

impl fmt::Debug for CodecRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CodecRegistry")
            .field("services", &self.service_order)
            .field("extensions", &self.extension_order)
            .field("required", &self.required)
            .finish()
    }
}

impl CodecRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a base object service.
    ///
    /// Re-registering a namespace replaces the previous factory.
    pub fn register_service<F>(
        &mut self,
        namespace: &str,
        prefix: &str,
        schema_locations: Vec<String>,
        factory: F,
    ) where
        F: Fn(&Element) -> Result<Box<dyn Payload>, DecodeError> + Send + Sync + 'static,
    {
        if !self.services.contains_key(namespace) {
            self.service_order.push(namespace.to_string());
        }
        self.services.insert(
            namespace.to_string(),
            ServiceEntry {
                prefix: prefix.to_string(),
                schema_locations,
                decoder: Arc::new(factory),
            },
        );
    }

    /// Register an extension.
    pub fn register_extension<F>(&mut self, namespace: &str, prefix: &str, factory: F)
    where
        F: Fn(&Element) -> Result<Box<dyn Payload>, DecodeError> + Send + Sync + 'static,
    {
        self.set_extension_rule(
            namespace,
            ExtensionRule::Decode {
                prefix: prefix.to_string(),
                decoder: Arc::new(factory),
            },
        );
    }

    /// Accept and drop an extension namespace instead of failing the decode.
    ///
    /// Skipped namespaces are not advertised and cannot be negotiated.
    pub fn skip_extension(&mut self, namespace: &str) {
        self.set_extension_rule(namespace, ExtensionRule::Skip);
    }

    fn set_extension_rule(&mut self, namespace: &str, rule: ExtensionRule) {
        if !self.extensions.contains_key(namespace) {
            self.extension_order.push(namespace.to_string());
        }
        self.extensions.insert(namespace.to_string(), rule);
    }

    /// Require an extension on commands of a service.
    ///
    /// An empty `commands` slice applies the rule to every object command.
    pub fn require_extension(&mut self, service: &str, extension: &str, commands: &[CommandType]) {
        self.required.push(RequiredExtension {
            service: service.to_string(),
            extension: extension.to_string(),
            commands: commands.to_vec(),
        });
    }

    /// Whether the namespace is a registered service.
    pub fn has_service(&self, namespace: &str) -> bool {
        self.services.contains_key(namespace)
    }

    /// Whether the namespace is a decodable (not skipped) extension.
    pub fn has_extension(&self, namespace: &str) -> bool {
        matches!(
            self.extensions.get(namespace),
            Some(ExtensionRule::Decode { .. })
        )
    }

    /// Service namespaces in registration order.
    pub fn service_uris(&self) -> Vec<String> {
        self.service_order.clone()
    }

    /// Decodable extension namespaces in registration order.
    pub fn extension_uris(&self) -> Vec<String> {
        self.extension_order
            .iter()
            .filter(|ns| self.has_extension(ns))
            .cloned()
            .collect()
    }

    /// Schema locations registered for a service.
    pub fn schema_locations(&self, namespace: &str) -> &[String] {
        self.services
            .get(namespace)
            .map(|s| s.schema_locations.as_slice())
            .unwrap_or_default()
    }

    /// Extensions required on a command for a service.
    pub fn required_extensions(&self, service: &str, command: CommandType) -> Vec<&str> {
        self.required
            .iter()
            .filter(|r| r.applies_to(service, command))
            .map(|r| r.extension.as_str())
            .collect()
    }

    /// Greeting advertising every registered service and extension.
    pub fn greeting(&self, server_id: &str) -> Greeting {
        let mut greeting = Greeting::new(server_id);
        greeting.object_uris = self.service_uris();
        greeting.extension_uris = self.extension_uris();
        greeting
    }

    /// Resolve an object element through the service table.
    pub fn decode_service(&self, element: &Element) -> Result<Box<dyn Payload>, DecodeError> {
        let entry = self
            .services
            .get(&element.namespace)
            .ok_or_else(|| DecodeError::UnsupportedObjectType(element.namespace.clone()))?;
        (entry.decoder)(element)
    }

    /// Resolve an extension element through the extension table.
    ///
    /// Returns `None` when the namespace is registered as skipped.
    pub fn decode_extension(
        &self,
        element: &Element,
    ) -> Result<Option<Box<dyn Payload>>, DecodeError> {
        match self.extensions.get(&element.namespace) {
            Some(ExtensionRule::Decode { decoder, .. }) => decoder(element).map(Some),
            Some(ExtensionRule::Skip) => {
                tracing::debug!("Skipping extension {{{}}}{}", element.namespace, element.name);
                Ok(None)
            },
            None => Err(DecodeError::UnknownExtension(element.namespace.clone())),
        }
    }

    /// Render a service payload, applying the registered prefix.
    pub fn encode_service(&self, payload: &dyn Payload) -> Result<Element, EncodeError> {
        let entry = self
            .services
            .get(payload.namespace())
            .ok_or_else(|| EncodeError::Unregistered(payload.namespace().to_string()))?;
        let mut element = payload.to_element();
        apply_prefix(&mut element, payload.namespace(), &entry.prefix);
        Ok(element)
    }

    /// Render an extension payload, applying the registered prefix.
    pub fn encode_extension(&self, payload: &dyn Payload) -> Result<Element, EncodeError> {
        match self.extensions.get(payload.namespace()) {
            Some(ExtensionRule::Decode { prefix, .. }) => {
                let mut element = payload.to_element();
                apply_prefix(&mut element, payload.namespace(), prefix);
                Ok(element)
            },
            _ => Err(EncodeError::Unregistered(payload.namespace().to_string())),
        }
    }

    /// Decode a document root into a message.
    pub fn decode(&self, root: &Element) -> Result<Message, DecodeError> {
        envelope::decode_message(root, self)
    }

    /// Encode a message into a document root.
    pub fn encode(&self, message: &Message) -> Result<Element, EncodeError> {
        envelope::encode_message(message, self)
    }
}

fn apply_prefix(element: &mut Element, namespace: &str, prefix: &str) {
    if element.namespace == namespace && element.prefix.is_none() {
        element.prefix = Some(prefix.to_string());
    }
    for child in &mut element.children {
        apply_prefix(child, namespace, prefix);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::RawPayload;

    fn raw_factory(element: &Element) -> Result<Box<dyn Payload>, DecodeError> {
        Ok(Box::new(RawPayload(element.clone())))
    }

    #[test]
    fn test_service_and_extension_tables_are_independent() {
        let mut registry = CodecRegistry::new();
        registry.register_service("urn:svc", "svc", vec![], raw_factory);
        registry.register_extension("urn:ext", "ext", raw_factory);

        assert!(registry.has_service("urn:svc"));
        assert!(!registry.has_service("urn:ext"));
        assert!(registry.has_extension("urn:ext"));
        assert!(!registry.has_extension("urn:svc"));

        let ext = Element::new("urn:svc", "thing");
        assert_eq!(
            registry.decode_extension(&ext).unwrap_err(),
            DecodeError::UnknownExtension("urn:svc".to_string())
        );
        let obj = Element::new("urn:ext", "thing");
        assert_eq!(
            registry.decode_service(&obj).unwrap_err(),
            DecodeError::UnsupportedObjectType("urn:ext".to_string())
        );
    }

    #[test]
    fn test_skipped_extension_is_dropped_and_not_advertised() {
        let mut registry = CodecRegistry::new();
        registry.register_extension("urn:ext", "ext", raw_factory);
        registry.skip_extension("urn:legacy");

        let legacy = Element::new("urn:legacy", "data");
        assert!(registry.decode_extension(&legacy).unwrap().is_none());
        assert_eq!(registry.extension_uris(), vec!["urn:ext".to_string()]);
    }

    #[test]
    fn test_required_extension_scoping() {
        let mut registry = CodecRegistry::new();
        registry.require_extension("urn:svc", "urn:ext", &[CommandType::Create]);
        registry.require_extension("urn:svc", "urn:all", &[]);

        assert_eq!(
            registry.required_extensions("urn:svc", CommandType::Create),
            vec!["urn:ext", "urn:all"]
        );
        assert_eq!(
            registry.required_extensions("urn:svc", CommandType::Check),
            vec!["urn:all"]
        );
        assert!(registry
            .required_extensions("urn:other", CommandType::Create)
            .is_empty());
    }

    #[test]
    fn test_encode_applies_registered_prefix() {
        let mut registry = CodecRegistry::new();
        registry.register_service("urn:svc", "svc", vec!["urn:svc svc.xsd".into()], raw_factory);

        let payload = RawPayload(
            Element::new("urn:svc", "check").with_child(Element::new("urn:svc", "name")),
        );
        let element = registry.encode_service(&payload).unwrap();
        assert_eq!(element.prefix.as_deref(), Some("svc"));
        assert_eq!(element.children[0].prefix.as_deref(), Some("svc"));
        assert_eq!(registry.schema_locations("urn:svc"), ["urn:svc svc.xsd"]);

        let stray = RawPayload(Element::new("urn:nope", "x"));
        assert!(matches!(
            registry.encode_service(&stray),
            Err(EncodeError::Unregistered(_))
        ));
    }
}
