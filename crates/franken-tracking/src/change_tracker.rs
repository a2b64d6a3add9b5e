//! Reference interceptor that records original values, the modified set and
//! property-change notifications.
//!
//! Writes of a value equal to the current one are ignored.  While suspended
//! every write is applied unchanged and nothing is recorded.

use std::cell::RefCell;
use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::error::TrackingResult;
use crate::interceptor::{Interceptor, OwnerId, RawAccess};
use crate::metadata::PropertyDescriptor;
use crate::object_model::Value;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PropertyChange {
    pub owner: OwnerId,
    pub property: String,
    pub old_value: Value,
    pub new_value: Value,
}

/// Serializable view of a tracker's state.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeSnapshot {
    pub intercepts: u64,
    pub modified: Vec<OwnerId>,
    pub changes: Vec<PropertyChange>,
}

#[derive(Debug, Default)]
struct ChangeLedger {
    intercepts: u64,
    suspended: bool,
    originals: BTreeMap<(OwnerId, String), Value>,
    modified: BTreeSet<OwnerId>,
    changes: Vec<PropertyChange>,
}

#[derive(Debug, Default)]
pub struct ChangeTracker {
    state: RefCell<ChangeLedger>,
}

impl ChangeTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn suspend(&self) {
        self.state.borrow_mut().suspended = true;
    }

    pub fn resume(&self) {
        self.state.borrow_mut().suspended = false;
    }

    pub fn is_suspended(&self) -> bool {
        self.state.borrow().suspended
    }

    /// Number of writes seen, suspended ones included.
    pub fn intercept_count(&self) -> u64 {
        self.state.borrow().intercepts
    }

    pub fn is_modified(&self, owner: OwnerId) -> bool {
        self.state.borrow().modified.contains(&owner)
    }

    /// Value `property` held before its first recorded change.
    pub fn original_value(&self, owner: OwnerId, property: &str) -> Option<Value> {
        self.state
            .borrow()
            .originals
            .get(&(owner, property.to_string()))
            .cloned()
    }

    pub fn changes(&self) -> Vec<PropertyChange> {
        self.state.borrow().changes.clone()
    }

    pub fn changes_for(&self, owner: OwnerId) -> Vec<PropertyChange> {
        self.state
            .borrow()
            .changes
            .iter()
            .filter(|c| c.owner == owner)
            .cloned()
            .collect()
    }

    /// Forget everything recorded for `owner`; its current values become
    /// the new originals.
    pub fn accept_changes(&self, owner: OwnerId) {
        let mut state = self.state.borrow_mut();
        state.originals.retain(|(o, _), _| *o != owner);
        state.modified.remove(&owner);
        state.changes.retain(|c| c.owner != owner);
    }

    pub fn snapshot(&self) -> ChangeSnapshot {
        let state = self.state.borrow();
        ChangeSnapshot {
            intercepts: state.intercepts,
            modified: state.modified.iter().copied().collect(),
            changes: state.changes.clone(),
        }
    }
}

impl Interceptor for ChangeTracker {
    fn intercept(
        &self,
        property: &PropertyDescriptor,
        value: Value,
        raw: &mut dyn RawAccess,
    ) -> TrackingResult<()> {
        // No borrow may be held across `raw`: a prototype-level setter can
        // re-enter this interceptor.
        let suspended = {
            let mut state = self.state.borrow_mut();
            state.intercepts += 1;
            state.suspended
        };
        if suspended {
            return raw.set(value);
        }

        let old_value = raw.get()?;
        if old_value == value {
            return Ok(());
        }
        raw.set(value.clone())?;

        let owner = raw.owner();
        let mut state = self.state.borrow_mut();
        state
            .originals
            .entry((owner, property.name.clone()))
            .or_insert_with(|| old_value.clone());
        state.modified.insert(owner);
        state.changes.push(PropertyChange {
            owner,
            property: property.name.clone(),
            old_value,
            new_value: value,
        });
        Ok(())
    }
}
