//! Registry sub-product extension (`urn:X-ar:params:xml:ns:subProduct-1.0`).
//!
//! Names the registry product (zone) a command is aimed at. Registries that
//! serve several zones from one service require it on provisioning commands.

use crate::codec::{DecodeError, Element};
use crate::protocol::Payload;

/// Extension namespace.
pub const SUBPRODUCT_NS: &str = "urn:X-ar:params:xml:ns:subProduct-1.0";

/// Preferred prefix.
pub const SUBPRODUCT_PREFIX: &str = "subProduct";

/// `<subProduct:subProduct>`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubProduct {
    /// Product identifier, e.g. `com.au`
    pub product: String,
}

impl SubProduct {
    /// Extension for a product.
    pub fn new(product: impl Into<String>) -> Self {
        Self {
            product: product.into(),
        }
    }
}

impl Payload for SubProduct {
    fn namespace(&self) -> &str {
        SUBPRODUCT_NS
    }

    fn element_name(&self) -> &str {
        "subProduct"
    }

    fn to_element(&self) -> Element {
        Element::new(SUBPRODUCT_NS, "subProduct")
            .with_prefix(SUBPRODUCT_PREFIX)
            .with_text(self.product.as_str())
    }
}

/// Extension factory.
pub fn decode(element: &Element) -> Result<Box<dyn Payload>, DecodeError> {
    if element.name != "subProduct" {
        return Err(DecodeError::Malformed(format!(
            "unexpected subProduct element {}",
            element.name
        )));
    }
    if element.text.is_empty() {
        return Err(DecodeError::missing("subProduct:subProduct"));
    }
    Ok(Box::new(SubProduct::new(element.text.as_str())))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_sub_product() {
        let element = SubProduct::new("com.au").to_element();
        let decoded = decode(&element).unwrap();
        assert_eq!(decoded.downcast_ref::<SubProduct>(), Some(&SubProduct::new("com.au")));

        let empty = Element::new(SUBPRODUCT_NS, "subProduct");
        assert!(matches!(decode(&empty), Err(DecodeError::MissingParameter(_))));
    }
}
