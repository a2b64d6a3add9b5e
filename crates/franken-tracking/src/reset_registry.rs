//! Undo bookkeeping for installed accessors and the per-constructor reset.
//!
//! Every wrap recorded by the installer leaves one [`UndoAction`] in the
//! [`LevelResetRegistry`] of the level it changed, owned by the constructor
//! being installed.  [`reset_constructor`] removes the library members from
//! the constructor's prototype, then walks up the chain running and clearing
//! that constructor's actions, and finally removes its reset entry point.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::config::MemberNames;
use crate::error::{TrackingError, TrackingResult};
use crate::object_model::{FunctionId, MemberDescriptor, ObjectError, ObjectHandle, Value};
use crate::realm::Realm;

// ---------------------------------------------------------------------------
// UndoAction
// ---------------------------------------------------------------------------

/// Restores one member of one level to its pre-installation state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum UndoAction {
    /// The member did not exist before installation.
    DeleteMember {
        level: ObjectHandle,
        name: String,
        installed: Vec<FunctionId>,
    },
    /// The member existed; put its original descriptor back.
    RestoreMember {
        level: ObjectHandle,
        name: String,
        original: MemberDescriptor,
        installed: Vec<FunctionId>,
    },
}

impl UndoAction {
    pub fn level(&self) -> ObjectHandle {
        match self {
            Self::DeleteMember { level, .. } | Self::RestoreMember { level, .. } => *level,
        }
    }

    pub fn name(&self) -> &str {
        match self {
            Self::DeleteMember { name, .. } | Self::RestoreMember { name, .. } => name,
        }
    }

    /// Functions installed by the wrap; released when the action runs.
    pub fn installed(&self) -> &[FunctionId] {
        match self {
            Self::DeleteMember { installed, .. } | Self::RestoreMember { installed, .. } => {
                installed
            }
        }
    }

    pub fn apply(self, realm: &mut Realm) -> TrackingResult<()> {
        let installed = match self {
            Self::DeleteMember {
                level,
                name,
                installed,
            } => {
                if !realm.heap_mut().delete_property(level, &name)? {
                    return Err(ObjectError::TypeError(format!(
                        "cannot delete wrapped member '{name}'"
                    ))
                    .into());
                }
                installed
            }
            Self::RestoreMember {
                level,
                name,
                original,
                installed,
            } => {
                if !realm.heap_mut().define_property(level, &name, original)? {
                    return Err(ObjectError::TypeError(format!(
                        "cannot restore wrapped member '{name}'"
                    ))
                    .into());
                }
                installed
            }
        };
        for id in installed {
            realm.release_function(id);
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Registries
// ---------------------------------------------------------------------------

/// An undo action and the constructor whose install recorded it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct RecordedUndo {
    owner: ObjectHandle,
    action: UndoAction,
}

/// Undo actions recorded for one prototype level, keyed by member name.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LevelResetRegistry {
    actions: BTreeMap<String, RecordedUndo>,
}

impl LevelResetRegistry {
    pub fn contains(&self, name: &str) -> bool {
        self.actions.contains_key(name)
    }

    pub fn names(&self) -> Vec<&str> {
        self.actions.keys().map(String::as_str).collect()
    }

    /// Constructor whose install wrapped `name` at this level.
    pub fn owner(&self, name: &str) -> Option<ObjectHandle> {
        self.actions.get(name).map(|recorded| recorded.owner)
    }

    pub fn len(&self) -> usize {
        self.actions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }
}

/// All level registries of a realm.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResetRegistry {
    levels: BTreeMap<ObjectHandle, LevelResetRegistry>,
}

impl ResetRegistry {
    pub fn is_wrapped(&self, level: ObjectHandle, name: &str) -> bool {
        self.levels.get(&level).is_some_and(|l| l.contains(name))
    }

    /// Record `action` on behalf of the constructor `owner`.
    pub fn record(&mut self, owner: ObjectHandle, action: UndoAction) {
        self.levels
            .entry(action.level())
            .or_default()
            .actions
            .insert(action.name().to_string(), RecordedUndo { owner, action });
    }

    /// Drop a recorded action without running it.
    pub fn forget(&mut self, level: ObjectHandle, name: &str) -> Option<UndoAction> {
        let registry = self.levels.get_mut(&level)?;
        let recorded = registry.actions.remove(name);
        if registry.is_empty() {
            self.levels.remove(&level);
        }
        recorded.map(|recorded| recorded.action)
    }

    pub fn level(&self, level: ObjectHandle) -> Option<&LevelResetRegistry> {
        self.levels.get(&level)
    }

    /// Remove and return the actions `owner` recorded at `level`.
    pub fn take_owned(&mut self, level: ObjectHandle, owner: ObjectHandle) -> Vec<UndoAction> {
        let Some(registry) = self.levels.get_mut(&level) else {
            return Vec::new();
        };
        let names: Vec<String> = registry
            .actions
            .iter()
            .filter(|(_, recorded)| recorded.owner == owner)
            .map(|(name, _)| name.clone())
            .collect();
        let taken = names
            .iter()
            .filter_map(|name| registry.actions.remove(name))
            .map(|recorded| recorded.action)
            .collect();
        if registry.is_empty() {
            self.levels.remove(&level);
        }
        taken
    }

    /// Levels holding at least one action recorded by `owner`.
    pub fn owned_levels(&self, owner: ObjectHandle) -> Vec<ObjectHandle> {
        self.levels
            .iter()
            .filter(|(_, registry)| registry.actions.values().any(|r| r.owner == owner))
            .map(|(level, _)| *level)
            .collect()
    }

    pub fn owns_any(&self, owner: ObjectHandle) -> bool {
        self.levels
            .values()
            .any(|registry| registry.actions.values().any(|r| r.owner == owner))
    }

    pub fn wrapped_levels(&self) -> Vec<ObjectHandle> {
        self.levels.keys().copied().collect()
    }

    pub fn is_empty(&self) -> bool {
        self.levels.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Reset
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResetReport {
    pub levels_visited: usize,
    pub undo_actions_run: usize,
}

/// Restore `ctor` and its prototype chain to their pre-installation state.
pub fn reset_constructor(
    realm: &mut Realm,
    ctor: ObjectHandle,
    names: &MemberNames,
) -> TrackingResult<ResetReport> {
    let reset_fn = match realm.heap().own_data_value(ctor, &names.reset)? {
        Some(Value::Function(id)) => id,
        _ => {
            return Err(TrackingError::invalid_operation(format!(
                "{ctor} is not registered (no `{}` entry point)",
                names.reset
            )));
        }
    };
    let proto = realm.prototype_of_constructor(ctor)?;

    for name in [&names.interceptor, &names.get_property, &names.set_property] {
        if let Some(Value::Function(id)) = realm.heap().own_data_value(proto, name)? {
            realm.release_function(id);
        }
    }
    for name in [
        &names.interceptor,
        &names.type_tag,
        &names.pending_stores,
        &names.get_property,
        &names.set_property,
        &names.entity_type,
        &names.complex_type,
    ] {
        realm.heap_mut().delete_property(proto, name)?;
    }

    // Visit the chain upward until every action this constructor recorded
    // has run; levels without members of their own are walked through.
    let mut report = ResetReport::default();
    let chain = realm.heap().chain(proto, realm.max_prototype_depth())?;
    for level in chain {
        if !realm.resets().owns_any(ctor) {
            break;
        }
        report.levels_visited += 1;
        report.undo_actions_run += run_owned(realm, level, ctor)?;
    }
    // Levels that left the chain after installation.
    for level in realm.resets().owned_levels(ctor) {
        report.undo_actions_run += run_owned(realm, level, ctor)?;
    }

    realm.heap_mut().delete_property(ctor, &names.reset)?;
    realm.release_function(reset_fn);
    Ok(report)
}

fn run_owned(realm: &mut Realm, level: ObjectHandle, ctor: ObjectHandle) -> TrackingResult<usize> {
    let actions = realm.resets_mut().take_owned(level, ctor);
    let count = actions.len();
    for action in actions {
        action.apply(realm)?;
    }
    Ok(count)
}
