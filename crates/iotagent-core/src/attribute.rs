//! Attribute definitions and values.
//!
//! Every value exchanged with the context broker is carried as text. The
//! `attr_type` tag is a declared type only and never changes the encoding.

use serde::{Deserialize, Serialize};

/// A declared attribute: name plus type tag.
///
/// Used for active attributes, lazy attributes and commands.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AttributeDefinition {
    pub name: String,
    #[serde(rename = "type")]
    pub attr_type: String,
}

impl AttributeDefinition {
    pub fn new(name: impl Into<String>, attr_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            attr_type: attr_type.into(),
        }
    }
}

/// An attribute with a constant value attached at registration time.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StaticAttribute {
    pub name: String,
    #[serde(rename = "type")]
    pub attr_type: String,
    #[serde(default)]
    pub value: String,
}

impl StaticAttribute {
    pub fn new(
        name: impl Into<String>,
        attr_type: impl Into<String>,
        value: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            attr_type: attr_type.into(),
            value: value.into(),
        }
    }
}

impl From<&StaticAttribute> for Attribute {
    fn from(attr: &StaticAttribute) -> Self {
        Attribute::new(&attr.name, &attr.attr_type, &attr.value)
    }
}

/// A (name, type, value) triple as carried by update and query messages.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Attribute {
    pub name: String,
    #[serde(rename = "type")]
    pub attr_type: String,
    #[serde(default)]
    pub value: String,
}

impl Attribute {
    pub fn new(
        name: impl Into<String>,
        attr_type: impl Into<String>,
        value: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            attr_type: attr_type.into(),
            value: value.into(),
        }
    }

    /// Attribute with an empty value, used when creating an entity for
    /// attributes the device has not reported yet.
    pub fn empty(definition: &AttributeDefinition) -> Self {
        Self::new(&definition.name, &definition.attr_type, "")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_attribute_type_renamed_on_wire() {
        let attr = Attribute::new("pressure", "Hgmm", "200");
        let json = serde_json::to_value(&attr).unwrap();
        assert_eq!(json["type"], "Hgmm");
        assert_eq!(json["value"], "200");
    }

    #[test]
    fn test_static_attribute_value_defaults_to_empty() {
        let attr: StaticAttribute =
            serde_json::from_str(r#"{"name":"location","type":"Vector"}"#).unwrap();
        assert_eq!(attr.value, "");
    }
}
