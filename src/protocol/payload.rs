//! Typed object payloads and extension sets.
//!
//! Object services and extensions plug into the engine as [`Payload`]
//! implementations. The engine stores them as `Box<dyn Payload>`; handlers
//! get their concrete type back with [`downcast_ref`](trait.Payload.html#method.downcast_ref).

use std::any::Any;
use std::fmt;

use crate::codec::{DecodeError, Element};

/// Object-safe plumbing implemented for every `Payload + Clone + PartialEq`.
pub trait AnyPayload: Any + Send + Sync {
    /// Upcast for downcasting.
    fn as_any(&self) -> &dyn Any;
    /// Clone behind the trait object.
    fn clone_payload(&self) -> Box<dyn Payload>;
    /// Structural equality behind the trait object.
    fn eq_payload(&self, other: &dyn Payload) -> bool;
}

impl<T> AnyPayload for T
where
    T: Payload + Clone + PartialEq,
{
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn clone_payload(&self) -> Box<dyn Payload> {
        Box::new(self.clone())
    }

    fn eq_payload(&self, other: &dyn Payload) -> bool {
        other
            .as_any()
            .downcast_ref::<T>()
            .is_some_and(|other| self == other)
    }
}

/// A namespace-scoped object carried by a command, response or poll message.
pub trait Payload: AnyPayload + fmt::Debug {
    /// Namespace URI of the root element.
    fn namespace(&self) -> &str;

    /// Local name of the root element.
    fn element_name(&self) -> &str;

    /// Render as an element tree.
    fn to_element(&self) -> Element;
}

impl dyn Payload {
    /// Borrow as a concrete payload type.
    pub fn downcast_ref<T: Payload>(&self) -> Option<&T> {
        self.as_any().downcast_ref::<T>()
    }

    /// Whether the payload is of the concrete type `T`.
    pub fn is<T: Payload>(&self) -> bool {
        self.as_any().is::<T>()
    }
}

impl Clone for Box<dyn Payload> {
    fn clone(&self) -> Self {
        self.clone_payload()
    }
}

impl PartialEq for dyn Payload {
    fn eq(&self, other: &Self) -> bool {
        self.eq_payload(other)
    }
}

/// Payload kept as its raw element.
///
/// Used for extensions whose namespace is registered as skipped and for
/// result data of services that only need to be passed through.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawPayload(pub Element);

impl Payload for RawPayload {
    fn namespace(&self) -> &str {
        &self.0.namespace
    }

    fn element_name(&self) -> &str {
        &self.0.name
    }

    fn to_element(&self) -> Element {
        self.0.clone()
    }
}

/// Ordered extensions attached to a message, unique per (namespace, local name).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Extensions(Vec<Box<dyn Payload>>);

impl Extensions {
    /// Empty set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an extension.
    ///
    /// Fails when an extension with the same namespace and local name is present.
    pub fn insert(&mut self, extension: Box<dyn Payload>) -> Result<(), DecodeError> {
        let duplicate = self.0.iter().any(|e| {
            e.namespace() == extension.namespace() && e.element_name() == extension.element_name()
        });
        if duplicate {
            return Err(DecodeError::DuplicateExtension(format!(
                "{{{}}}{}",
                extension.namespace(),
                extension.element_name()
            )));
        }
        self.0.push(extension);
        Ok(())
    }

    /// Builder form of [`insert`](Self::insert).
    pub fn with(mut self, extension: impl Payload) -> Result<Self, DecodeError> {
        self.insert(Box::new(extension))?;
        Ok(self)
    }

    /// Find the extension of concrete type `T`.
    pub fn get<T: Payload>(&self) -> Option<&T> {
        self.0.iter().find_map(|e| e.downcast_ref::<T>())
    }

    /// Whether any extension lives in the namespace.
    pub fn contains_namespace(&self, namespace: &str) -> bool {
        self.0.iter().any(|e| e.namespace() == namespace)
    }

    /// Distinct namespaces, in order of first appearance.
    pub fn namespaces(&self) -> Vec<&str> {
        let mut namespaces: Vec<&str> = Vec::new();
        for extension in &self.0 {
            if !namespaces.contains(&extension.namespace()) {
                namespaces.push(extension.namespace());
            }
        }
        namespaces
    }

    /// Iterate in order.
    pub fn iter(&self) -> impl Iterator<Item = &dyn Payload> {
        self.0.iter().map(|e| &**e)
    }

    /// Number of extensions.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether there are none.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw(ns: &str, name: &str, text: &str) -> RawPayload {
        RawPayload(Element::new(ns, name).with_text(text))
    }

    #[test]
    fn test_extensions_reject_duplicates() {
        let mut extensions = Extensions::new();
        extensions.insert(Box::new(raw("urn:a", "x", "1"))).unwrap();
        extensions.insert(Box::new(raw("urn:a", "y", "2"))).unwrap();
        extensions.insert(Box::new(raw("urn:b", "x", "3"))).unwrap();

        let err = extensions.insert(Box::new(raw("urn:a", "x", "4")));
        assert!(matches!(err, Err(DecodeError::DuplicateExtension(_))));
        assert_eq!(extensions.len(), 3);
        assert_eq!(extensions.namespaces(), vec!["urn:a", "urn:b"]);
    }

    #[test]
    fn test_payload_dyn_eq_and_downcast() {
        let a: Box<dyn Payload> = Box::new(raw("urn:a", "x", "1"));
        let b: Box<dyn Payload> = Box::new(raw("urn:a", "x", "1"));
        let c: Box<dyn Payload> = Box::new(raw("urn:a", "x", "2"));

        assert_eq!(&a, &b);
        assert_ne!(&a, &c);
        assert_eq!(&a.clone(), &a);
        assert!(a.is::<RawPayload>());
        assert_eq!(a.downcast_ref::<RawPayload>().unwrap().0.text, "1");
    }
}
