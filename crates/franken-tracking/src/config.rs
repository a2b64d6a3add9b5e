//! Model library configuration.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::error::{TrackingError, TrackingResult};
use crate::object_model::DEFAULT_MAX_PROTOTYPE_DEPTH;

const CONFIG_SUBJECT: &str = "<model-library-config>";

// ---------------------------------------------------------------------------
// MemberNames
// ---------------------------------------------------------------------------

/// Names of the members the library installs on constructors, prototypes
/// and instances.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MemberNames {
    /// Interception hook on the prototype.
    pub interceptor: String,
    /// Type tag on the prototype.
    pub type_tag: String,
    /// Per-instance backing store reference.
    pub backing_store: String,
    /// Pending store list on the prototype.
    pub pending_stores: String,
    /// Reset entry point on the constructor.
    pub reset: String,
    pub get_property: String,
    pub set_property: String,
    /// Descriptor back-reference for entity types.
    pub entity_type: String,
    /// Descriptor back-reference for complex types.
    pub complex_type: String,
}

impl Default for MemberNames {
    fn default() -> Self {
        Self {
            interceptor: "_$interceptor".to_string(),
            type_tag: "_$typeName".to_string(),
            backing_store: "_backingStore".to_string(),
            pending_stores: "_pendingBackingStores".to_string(),
            reset: "__reset__".to_string(),
            get_property: "getProperty".to_string(),
            set_property: "setProperty".to_string(),
            entity_type: "entityType".to_string(),
            complex_type: "complexType".to_string(),
        }
    }
}

impl MemberNames {
    /// Members excluded from trackable property enumeration.
    pub fn enumeration_exclusions(&self) -> [&str; 3] {
        [
            self.type_tag.as_str(),
            self.backing_store.as_str(),
            self.pending_stores.as_str(),
        ]
    }

    fn all(&self) -> [(&'static str, &str); 9] {
        [
            ("interceptor", self.interceptor.as_str()),
            ("type_tag", self.type_tag.as_str()),
            ("backing_store", self.backing_store.as_str()),
            ("pending_stores", self.pending_stores.as_str()),
            ("reset", self.reset.as_str()),
            ("get_property", self.get_property.as_str()),
            ("set_property", self.set_property.as_str()),
            ("entity_type", self.entity_type.as_str()),
            ("complex_type", self.complex_type.as_str()),
        ]
    }
}

// ---------------------------------------------------------------------------
// ModelLibraryConfig
// ---------------------------------------------------------------------------

/// Configuration controlling the model library.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelLibraryConfig {
    /// Adapter name the library registers under.
    pub adapter_name: String,
    /// Maximum prototype chain depth walked by install and reset.
    pub max_prototype_depth: u32,
    pub members: MemberNames,
    /// Record structured events.
    pub record_events: bool,
    /// Event log bound; the oldest events are dropped first.
    pub max_events: usize,
}

impl Default for ModelLibraryConfig {
    fn default() -> Self {
        Self {
            adapter_name: "backingStore".to_string(),
            max_prototype_depth: DEFAULT_MAX_PROTOTYPE_DEPTH,
            members: MemberNames::default(),
            record_events: true,
            max_events: 4096,
        }
    }
}

impl ModelLibraryConfig {
    /// Parse a JSON configuration; absent fields take their defaults.
    pub fn from_json_str(json: &str) -> TrackingResult<Self> {
        let config: Self = serde_json::from_str(json)
            .map_err(|e| TrackingError::configuration(CONFIG_SUBJECT, e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> TrackingResult<()> {
        if self.adapter_name.trim().is_empty() {
            return Err(TrackingError::configuration(
                CONFIG_SUBJECT,
                "adapter_name must not be empty",
            ));
        }
        if self.max_prototype_depth == 0 {
            return Err(TrackingError::configuration(
                CONFIG_SUBJECT,
                "max_prototype_depth must be positive",
            ));
        }
        let mut seen = BTreeSet::new();
        for (field, name) in self.members.all() {
            if name.trim().is_empty() {
                return Err(TrackingError::configuration(
                    CONFIG_SUBJECT,
                    format!("member name `{field}` must not be empty"),
                ));
            }
            if !seen.insert(name) {
                return Err(TrackingError::configuration(
                    CONFIG_SUBJECT,
                    format!("member name `{name}` is used more than once"),
                ));
            }
        }
        Ok(())
    }
}
