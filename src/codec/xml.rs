//! Namespace-resolved XML element tree.
//!
//! Documents are parsed into an [`Element`] tree where every element carries
//! its resolved namespace URI instead of a prefix. The writer re-creates
//! prefixes on the way out: an element in its parent's default namespace is
//! written bare, a namespace already bound in scope reuses its prefix, and a
//! new namespace is declared with the element's prefix hint (or as the
//! default namespace when there is no hint).

use std::borrow::Cow;

use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use quick_xml::name::{Namespace, ResolveResult};
use quick_xml::{NsReader, Writer};

use super::error::{DecodeError, EncodeError};

/// An XML element with resolved namespace.
#[derive(Debug, Clone, Default)]
pub struct Element {
    /// Namespace URI (empty when unqualified)
    pub namespace: String,
    /// Local name
    pub name: String,
    /// Preferred prefix when the namespace has to be declared
    pub prefix: Option<String>,
    /// Attributes by local name, in document order
    pub attributes: Vec<(String, String)>,
    /// Child elements, in document order
    pub children: Vec<Element>,
    /// Concatenated, trimmed text content
    pub text: String,
}

// Prefixes are a writing hint only; two elements are equal when their
// resolved content is.
impl PartialEq for Element {
    fn eq(&self, other: &Self) -> bool {
        self.namespace == other.namespace
            && self.name == other.name
            && self.attributes == other.attributes
            && self.children == other.children
            && self.text == other.text
    }
}

impl Eq for Element {}

impl Element {
    /// Create an empty element.
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
            ..Default::default()
        }
    }

    /// Set the preferred prefix.
    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = Some(prefix.into());
        self
    }

    /// Add an attribute.
    pub fn with_attr(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.push((name.into(), value.into()));
        self
    }

    /// Add a child element.
    pub fn with_child(mut self, child: Element) -> Self {
        self.children.push(child);
        self
    }

    /// Add several child elements.
    pub fn with_children(mut self, children: impl IntoIterator<Item = Element>) -> Self {
        self.children.extend(children);
        self
    }

    /// Set the text content.
    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.text = text.into();
        self
    }

    /// Add a child holding only text, in this element's namespace and prefix.
    pub fn with_text_child(self, name: &str, text: impl Into<String>) -> Self {
        let mut child = Element::new(self.namespace.clone(), name).with_text(text);
        child.prefix = self.prefix.clone();
        self.with_child(child)
    }

    /// Whether the element has the given namespace and local name.
    pub fn is(&self, namespace: &str, name: &str) -> bool {
        self.namespace == namespace && self.name == name
    }

    /// Attribute value by local name.
    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    /// First child with the given namespace and local name.
    pub fn child(&self, namespace: &str, name: &str) -> Option<&Element> {
        self.children.iter().find(|c| c.is(namespace, name))
    }

    /// All children with the given namespace and local name.
    pub fn children_named<'a>(
        &'a self,
        namespace: &'a str,
        name: &'a str,
    ) -> impl Iterator<Item = &'a Element> + 'a {
        self.children.iter().filter(move |c| c.is(namespace, name))
    }

    /// Text of the first matching child.
    pub fn child_text(&self, namespace: &str, name: &str) -> Option<&str> {
        self.child(namespace, name).map(|c| c.text.as_str())
    }

    /// First matching child, or a missing-parameter error.
    pub fn required_child(&self, namespace: &str, name: &str) -> Result<&Element, DecodeError> {
        self.child(namespace, name)
            .ok_or_else(|| DecodeError::missing(format!("{}/{}", self.name, name)))
    }

    /// Non-empty text of the first matching child, or a missing-parameter error.
    pub fn required_text(&self, namespace: &str, name: &str) -> Result<&str, DecodeError> {
        let text = self.required_child(namespace, name)?.text.as_str();
        if text.is_empty() {
            return Err(DecodeError::missing(format!("{}/{}", self.name, name)));
        }
        Ok(text)
    }

    /// Attribute value, or a missing-parameter error.
    pub fn required_attr(&self, name: &str) -> Result<&str, DecodeError> {
        self.attr(name)
            .ok_or_else(|| DecodeError::missing(format!("{}@{}", self.name, name)))
    }

    /// Find the first descendant (depth-first, including self) with the given name.
    pub fn find(&self, namespace: &str, name: &str) -> Option<&Element> {
        if self.is(namespace, name) {
            return Some(self);
        }
        self.children.iter().find_map(|c| c.find(namespace, name))
    }
}

/// Parse a UTF-8 document into its root element.
///
/// Whitespace-only text nodes (indentation) are dropped. Any other text is
/// kept exactly, including leading and trailing whitespace.
pub fn parse(input: &[u8]) -> Result<Element, DecodeError> {
    let text = std::str::from_utf8(input)
        .map_err(|e| DecodeError::Malformed(format!("invalid UTF-8: {e}")))?;

    let mut reader = NsReader::from_str(text);

    let mut stack: Vec<Element> = Vec::new();
    let mut root: Option<Element> = None;

    loop {
        match reader.read_resolved_event() {
            Ok((ns, Event::Start(start))) => {
                let namespace = resolve_namespace(ns)?;
                stack.push(start_element(namespace, &start)?);
            },
            Ok((ns, Event::Empty(start))) => {
                let namespace = resolve_namespace(ns)?;
                let element = start_element(namespace, &start)?;
                attach(&mut stack, &mut root, element)?;
            },
            Ok((_, Event::End(_))) => {
                let element = stack
                    .pop()
                    .ok_or_else(|| DecodeError::Malformed("unbalanced end tag".to_string()))?;
                attach(&mut stack, &mut root, element)?;
            },
            Ok((_, Event::Text(text))) => {
                let text = text
                    .unescape()
                    .map_err(|e| DecodeError::Malformed(format!("bad text content: {e}")))?;
                if !text.trim().is_empty() {
                    push_text(&mut stack, &text)?;
                }
            },
            Ok((_, Event::CData(data))) => {
                let data = data.into_inner();
                let text = String::from_utf8_lossy(&data);
                push_text(&mut stack, &text)?;
            },
            Ok((_, Event::Eof)) => break,
            // Declarations, comments, processing instructions, doctype
            Ok(_) => {},
            Err(e) => return Err(DecodeError::Malformed(e.to_string())),
        }
    }

    if !stack.is_empty() {
        return Err(DecodeError::Malformed("unclosed element".to_string()));
    }
    root.ok_or_else(|| DecodeError::Malformed("empty document".to_string()))
}

fn resolve_namespace(result: ResolveResult<'_>) -> Result<String, DecodeError> {
    match result {
        ResolveResult::Bound(Namespace(ns)) => Ok(String::from_utf8_lossy(ns).into_owned()),
        ResolveResult::Unbound => Ok(String::new()),
        ResolveResult::Unknown(prefix) => Err(DecodeError::Malformed(format!(
            "undeclared namespace prefix '{}'",
            String::from_utf8_lossy(&prefix)
        ))),
    }
}

fn start_element(namespace: String, start: &BytesStart<'_>) -> Result<Element, DecodeError> {
    let name = String::from_utf8_lossy(start.local_name().as_ref()).into_owned();
    let prefix = start
        .name()
        .prefix()
        .map(|p| String::from_utf8_lossy(p.as_ref()).into_owned());

    let mut attributes = Vec::new();
    for attr in start.attributes() {
        let attr = attr.map_err(|e| DecodeError::Malformed(format!("bad attribute: {e}")))?;
        let key = attr.key.as_ref();
        if key == b"xmlns" || key.starts_with(b"xmlns:") {
            continue;
        }
        let local = String::from_utf8_lossy(attr.key.local_name().as_ref()).into_owned();
        let value = attr
            .unescape_value()
            .map_err(|e| DecodeError::Malformed(format!("bad attribute value: {e}")))?;
        attributes.push((local, value.into_owned()));
    }

    Ok(Element {
        namespace,
        name,
        prefix,
        attributes,
        children: Vec::new(),
        text: String::new(),
    })
}

fn attach(
    stack: &mut [Element],
    root: &mut Option<Element>,
    element: Element,
) -> Result<(), DecodeError> {
    match stack.last_mut() {
        Some(parent) => parent.children.push(element),
        None if root.is_none() => *root = Some(element),
        None => return Err(DecodeError::Malformed("multiple root elements".to_string())),
    }
    Ok(())
}

fn push_text(stack: &mut [Element], text: &str) -> Result<(), DecodeError> {
    match stack.last_mut() {
        Some(current) => {
            current.text.push_str(text);
            Ok(())
        },
        None if text.trim().is_empty() => Ok(()),
        None => Err(DecodeError::Malformed(
            "text outside of root element".to_string(),
        )),
    }
}

/// Namespace bindings visible while writing an element.
#[derive(Debug, Clone, Default)]
struct Scope {
    default_ns: String,
    /// (namespace, prefix), innermost last
    bindings: Vec<(String, String)>,
}

impl Scope {
    fn prefix_for(&self, namespace: &str) -> Option<&str> {
        self.bindings
            .iter()
            .rev()
            .find(|(ns, _)| ns == namespace)
            .map(|(_, p)| p.as_str())
    }

    fn bind(&mut self, namespace: &str, prefix: &str) {
        self.bindings.retain(|(_, p)| p != prefix);
        self.bindings.push((namespace.to_string(), prefix.to_string()));
    }
}

/// Write a complete document (declaration plus root element).
pub fn write_document(root: &Element, out: &mut Vec<u8>) -> Result<(), EncodeError> {
    let mut writer = Writer::new(out);
    writer
        .write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), Some("no"))))
        .map_err(|e| EncodeError::Xml(e.to_string()))?;
    write_element(&mut writer, root, &Scope::default())
}

fn write_element<W: std::io::Write>(
    writer: &mut Writer<W>,
    element: &Element,
    scope: &Scope,
) -> Result<(), EncodeError> {
    let mut inner = Cow::Borrowed(scope);
    let mut declaration: Option<(String, &str)> = None;

    let qname = if element.namespace == scope.default_ns {
        element.name.clone()
    } else if let Some(prefix) = scope.prefix_for(&element.namespace) {
        format!("{prefix}:{}", element.name)
    } else {
        match element.prefix.as_deref().filter(|p| !p.is_empty()) {
            Some(prefix) => {
                inner.to_mut().bind(&element.namespace, prefix);
                declaration = Some((format!("xmlns:{prefix}"), element.namespace.as_str()));
                format!("{prefix}:{}", element.name)
            },
            None => {
                inner.to_mut().default_ns = element.namespace.clone();
                declaration = Some(("xmlns".to_string(), element.namespace.as_str()));
                element.name.clone()
            },
        }
    };

    let mut start = BytesStart::new(qname.as_str());
    if let Some((key, value)) = &declaration {
        start.push_attribute((key.as_str(), *value));
    }
    for (key, value) in &element.attributes {
        start.push_attribute((key.as_str(), value.as_str()));
    }

    if element.children.is_empty() && element.text.is_empty() {
        return writer
            .write_event(Event::Empty(start))
            .map_err(|e| EncodeError::Xml(e.to_string()));
    }

    writer
        .write_event(Event::Start(start))
        .map_err(|e| EncodeError::Xml(e.to_string()))?;
    if !element.text.is_empty() {
        writer
            .write_event(Event::Text(BytesText::new(&element.text)))
            .map_err(|e| EncodeError::Xml(e.to_string()))?;
    }
    for child in &element.children {
        write_element(writer, child, &inner)?;
    }
    writer
        .write_event(Event::End(BytesEnd::new(qname.as_str())))
        .map_err(|e| EncodeError::Xml(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    const EPP: &str = "urn:ietf:params:xml:ns:epp-1.0";
    const DOMAIN: &str = "urn:ietf:params:xml:ns:domain-1.0";

    #[test]
    fn test_parse_resolves_prefixes() {
        let doc = br#"<?xml version="1.0" encoding="UTF-8"?>
            <epp xmlns="urn:ietf:params:xml:ns:epp-1.0">
              <command>
                <check>
                  <domain:check xmlns:domain="urn:ietf:params:xml:ns:domain-1.0">
                    <domain:name>example.com</domain:name>
                  </domain:check>
                </check>
                <clTRID>ABC-123</clTRID>
              </command>
            </epp>"#;

        let root = parse(doc).unwrap();
        assert!(root.is(EPP, "epp"));

        let command = root.required_child(EPP, "command").unwrap();
        let check = command.required_child(EPP, "check").unwrap();
        let payload = check.required_child(DOMAIN, "check").unwrap();
        assert_eq!(payload.prefix.as_deref(), Some("domain"));
        assert_eq!(payload.child_text(DOMAIN, "name"), Some("example.com"));
        assert_eq!(command.child_text(EPP, "clTRID"), Some("ABC-123"));
    }

    #[test]
    fn test_parse_attributes_and_escapes() {
        let doc = br#"<a xmlns="urn:a" op="req" note="x &amp; y">1 &lt; 2</a>"#;
        let root = parse(doc).unwrap();
        assert_eq!(root.attr("op"), Some("req"));
        assert_eq!(root.attr("note"), Some("x & y"));
        assert_eq!(root.text, "1 < 2");
        // namespace declarations are not attributes
        assert_eq!(root.attributes.len(), 2);
    }

    #[test]
    fn test_parse_keeps_edge_whitespace() {
        let doc = b"<a xmlns=\"urn:a\">\n  <pw> secret </pw>\n  <b>x</b>\n</a>";
        let root = parse(doc).unwrap();
        assert_eq!(root.child_text("urn:a", "pw"), Some(" secret "));
        assert_eq!(root.child_text("urn:a", "b"), Some("x"));
        // indentation between children is not text
        assert_eq!(root.text, "");
    }

    #[test]
    fn test_parse_rejects_malformed() {
        assert!(matches!(
            parse(b"<a><b></a>"),
            Err(DecodeError::Malformed(_))
        ));
        assert!(matches!(parse(b""), Err(DecodeError::Malformed(_))));
        assert!(matches!(
            parse(b"<x:a>1</x:a>"),
            Err(DecodeError::Malformed(_))
        ));
        assert!(matches!(
            parse(&[0x3c, 0xff, 0xfe]),
            Err(DecodeError::Malformed(_))
        ));
    }

    #[test]
    fn test_write_declares_namespaces_once() {
        let root = Element::new(EPP, "epp").with_child(
            Element::new(EPP, "command").with_child(
                Element::new(DOMAIN, "check")
                    .with_prefix("domain")
                    .with_text_child("name", "a.com")
                    .with_text_child("name", "b.com"),
            ),
        );

        let mut out = Vec::new();
        write_document(&root, &mut out).unwrap();
        let xml = String::from_utf8(out.clone()).unwrap();

        assert!(xml.contains(r#"<epp xmlns="urn:ietf:params:xml:ns:epp-1.0">"#));
        assert_eq!(xml.matches("xmlns:domain=").count(), 1);
        assert!(xml.contains("<domain:name>a.com</domain:name>"));

        assert_eq!(parse(&out).unwrap(), root);
    }

    #[test]
    fn test_write_without_prefix_uses_default_namespace() {
        let root = Element::new(EPP, "epp")
            .with_child(Element::new("urn:other", "thing").with_text("v & w"));

        let mut out = Vec::new();
        write_document(&root, &mut out).unwrap();
        let xml = String::from_utf8(out.clone()).unwrap();

        assert!(xml.contains(r#"<thing xmlns="urn:other">v &amp; w</thing>"#));
        assert_eq!(parse(&out).unwrap(), root);
    }
}
