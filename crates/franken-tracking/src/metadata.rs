//! Type and property descriptors consumed by the installer and the tracking
//! initializer.
//!
//! Descriptors are immutable once built.  A [`TypeDescriptor`] rejects
//! duplicate property names at construction; property kinds decoded from
//! foreign metadata that this crate does not understand become
//! [`PropertyKind::Unknown`] and are rejected when an instance starts being
//! tracked.

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{TrackingError, TrackingResult};
use crate::object_model::Value;

// ---------------------------------------------------------------------------
// PropertyKind
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PropertyKind {
    Data,
    Complex,
    Navigation,
    #[serde(other)]
    Unknown,
}

impl PropertyKind {
    pub fn parse(kind: &str) -> TrackingResult<Self> {
        match kind {
            "data" => Ok(Self::Data),
            "complex" => Ok(Self::Complex),
            "navigation" => Ok(Self::Navigation),
            other => Err(TrackingError::configuration(
                other,
                format!("unknown property kind `{other}`"),
            )),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Data => "data",
            Self::Complex => "complex",
            Self::Navigation => "navigation",
            Self::Unknown => "unknown",
        }
    }
}

impl fmt::Display for PropertyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// PropertyDescriptor
// ---------------------------------------------------------------------------

/// Metadata for a single property.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PropertyDescriptor {
    pub name: String,
    pub kind: PropertyKind,
    pub scalar: bool,
    /// Default for data properties.
    #[serde(default)]
    pub default_value: Option<Value>,
    /// Complex type instantiated for complex properties.
    #[serde(default)]
    pub complex_type_name: Option<String>,
    /// Target entity type of a navigation property.
    #[serde(default)]
    pub related_type_name: Option<String>,
}

impl PropertyDescriptor {
    fn new(name: impl Into<String>, kind: PropertyKind, scalar: bool) -> Self {
        Self {
            name: name.into(),
            kind,
            scalar,
            default_value: None,
            complex_type_name: None,
            related_type_name: None,
        }
    }

    /// Scalar data property.
    pub fn data(name: impl Into<String>) -> Self {
        Self::new(name, PropertyKind::Data, true)
    }

    /// Collection of primitives.
    pub fn data_collection(name: impl Into<String>) -> Self {
        Self::new(name, PropertyKind::Data, false)
    }

    pub fn complex(name: impl Into<String>, complex_type: impl Into<String>) -> Self {
        Self {
            complex_type_name: Some(complex_type.into()),
            ..Self::new(name, PropertyKind::Complex, true)
        }
    }

    pub fn complex_collection(name: impl Into<String>, complex_type: impl Into<String>) -> Self {
        Self {
            complex_type_name: Some(complex_type.into()),
            ..Self::new(name, PropertyKind::Complex, false)
        }
    }

    pub fn navigation(name: impl Into<String>, related_type: impl Into<String>) -> Self {
        Self {
            related_type_name: Some(related_type.into()),
            ..Self::new(name, PropertyKind::Navigation, true)
        }
    }

    pub fn navigation_collection(name: impl Into<String>, related_type: impl Into<String>) -> Self {
        Self {
            related_type_name: Some(related_type.into()),
            ..Self::new(name, PropertyKind::Navigation, false)
        }
    }

    pub fn with_default(mut self, value: impl Into<Value>) -> Self {
        self.default_value = Some(value.into());
        self
    }

    pub fn is_data(&self) -> bool {
        self.kind == PropertyKind::Data
    }

    pub fn is_navigation(&self) -> bool {
        self.kind == PropertyKind::Navigation
    }
}

// ---------------------------------------------------------------------------
// TypeDescriptor
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StructuralKind {
    Entity,
    Complex,
}

/// Metadata describing one entity or complex type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypeDescriptor {
    name: String,
    structural_kind: StructuralKind,
    properties: Vec<PropertyDescriptor>,
}

impl TypeDescriptor {
    pub fn entity(
        name: impl Into<String>,
        properties: Vec<PropertyDescriptor>,
    ) -> TrackingResult<Self> {
        Self::new(name, StructuralKind::Entity, properties)
    }

    pub fn complex(
        name: impl Into<String>,
        properties: Vec<PropertyDescriptor>,
    ) -> TrackingResult<Self> {
        Self::new(name, StructuralKind::Complex, properties)
    }

    pub fn new(
        name: impl Into<String>,
        structural_kind: StructuralKind,
        properties: Vec<PropertyDescriptor>,
    ) -> TrackingResult<Self> {
        let descriptor = Self {
            name: name.into(),
            structural_kind,
            properties,
        };
        descriptor.validate()?;
        Ok(descriptor)
    }

    /// Decode a descriptor delivered as JSON by a metadata subsystem.
    pub fn from_json_str(json: &str) -> TrackingResult<Self> {
        let descriptor: Self = serde_json::from_str(json)
            .map_err(|e| TrackingError::configuration("<metadata>", e.to_string()))?;
        descriptor.validate()?;
        Ok(descriptor)
    }

    fn validate(&self) -> TrackingResult<()> {
        if self.name.trim().is_empty() {
            return Err(TrackingError::configuration(
                "<unnamed>",
                "type name must not be empty",
            ));
        }
        let mut seen = BTreeSet::new();
        for prop in &self.properties {
            if prop.name.trim().is_empty() {
                return Err(TrackingError::configuration(
                    &self.name,
                    "property name must not be empty",
                ));
            }
            if !seen.insert(prop.name.as_str()) {
                return Err(TrackingError::configuration(
                    &self.name,
                    format!("duplicate property `{}`", prop.name),
                ));
            }
            if prop.default_value.is_some() && prop.kind != PropertyKind::Data {
                return Err(TrackingError::configuration(
                    &self.name,
                    format!("only data properties take a default (`{}`)", prop.name),
                ));
            }
            if prop.kind == PropertyKind::Complex && prop.complex_type_name.is_none() {
                return Err(TrackingError::configuration(
                    &self.name,
                    format!("complex property `{}` names no complex type", prop.name),
                ));
            }
        }
        Ok(())
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn structural_kind(&self) -> StructuralKind {
        self.structural_kind
    }

    pub fn is_complex_type(&self) -> bool {
        self.structural_kind == StructuralKind::Complex
    }

    pub fn properties(&self) -> &[PropertyDescriptor] {
        &self.properties
    }

    pub fn property(&self, name: &str) -> Option<&PropertyDescriptor> {
        self.properties.iter().find(|p| p.name == name)
    }

    pub fn property_names(&self) -> Vec<&str> {
        self.properties.iter().map(|p| p.name.as_str()).collect()
    }

    /// A copy of this descriptor with one property replaced.
    pub fn with_property(&self, property: PropertyDescriptor) -> TrackingResult<Self> {
        let mut properties = self.properties.clone();
        match properties.iter_mut().find(|p| p.name == property.name) {
            Some(slot) => *slot = property,
            None => properties.push(property),
        }
        Self::new(self.name.clone(), self.structural_kind, properties)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn widget() -> TypeDescriptor {
        TypeDescriptor::entity(
            "Widget",
            vec![
                PropertyDescriptor::data("id").with_default(0),
                PropertyDescriptor::data("name").with_default(""),
                PropertyDescriptor::data_collection("tags"),
            ],
        )
        .unwrap()
    }

    #[test]
    fn builders_set_kind_and_scalar() {
        let nav = PropertyDescriptor::navigation_collection("orders", "Order");
        assert_eq!(nav.kind, PropertyKind::Navigation);
        assert!(!nav.scalar);
        assert_eq!(nav.related_type_name.as_deref(), Some("Order"));

        let cx = PropertyDescriptor::complex("address", "Address");
        assert_eq!(cx.kind, PropertyKind::Complex);
        assert!(cx.scalar);
    }

    #[test]
    fn property_order_is_preserved() {
        assert_eq!(widget().property_names(), vec!["id", "name", "tags"]);
    }

    #[test]
    fn duplicate_names_rejected() {
        let err = TypeDescriptor::entity(
            "Dup",
            vec![PropertyDescriptor::data("a"), PropertyDescriptor::data("a")],
        )
        .unwrap_err();
        assert!(err.to_string().contains("duplicate property `a`"));
    }

    #[test]
    fn default_on_navigation_rejected() {
        let mut nav = PropertyDescriptor::navigation("owner", "Person");
        nav.default_value = Some(Value::Null);
        assert!(TypeDescriptor::entity("T", vec![nav]).is_err());
    }

    #[test]
    fn with_property_replaces_in_place() {
        let renamed = widget()
            .with_property(PropertyDescriptor::data("name").with_default("unnamed"))
            .unwrap();
        assert_eq!(renamed.property_names(), vec!["id", "name", "tags"]);
        assert_eq!(
            renamed.property("name").unwrap().default_value,
            Some(Value::str("unnamed"))
        );
        assert_ne!(renamed, widget());
    }

    #[test]
    fn unknown_kind_decodes_from_json() {
        let json = r#"{
            "name": "Legacy",
            "structural_kind": "entity",
            "properties": [
                {"name": "id", "kind": "data", "scalar": true},
                {"name": "blob", "kind": "stream", "scalar": true}
            ]
        }"#;
        let descriptor = TypeDescriptor::from_json_str(json).unwrap();
        assert_eq!(
            descriptor.property("blob").unwrap().kind,
            PropertyKind::Unknown
        );
    }

    #[test]
    fn parse_rejects_unknown_kind() {
        assert_eq!(PropertyKind::parse("navigation").unwrap(), PropertyKind::Navigation);
        assert!(PropertyKind::parse("stream").is_err());
    }
}
