//! Accessor installer: rewrites a constructor's prototype chain so that every
//! declared property is read from a backing store and written through the
//! interceptor.
//!
//! Two wrap flavours:
//!
//! - **instance level**: the name is not reachable from the prototype.  An
//!   enumerable accessor pair is added to the prototype; its storage is the
//!   instance's backing store (or pending store while the instance is
//!   locked).
//! - **prototype level**: the name is already an accessor somewhere on the
//!   chain.  The owning level's accessor keeps its getter; its setter is
//!   replaced by one that hands the original getter/setter to the
//!   interceptor as the raw accessor.
//!
//! Every mutation goes through a journal.  If any step fails the journal is
//! replayed in reverse, so a failed install leaves no level half-wrapped.

use std::rc::Rc;

use serde::{Deserialize, Serialize};

use crate::backing_store::{read_property, store_for_write};
use crate::config::MemberNames;
use crate::error::{TrackingError, TrackingResult};
use crate::interceptor::{InheritedAccessor, Interceptor, StoreAccessor};
use crate::metadata::{PropertyDescriptor, StructuralKind, TypeDescriptor};
use crate::object_model::{FunctionId, MemberDescriptor, ObjectError, ObjectHandle, Value};
use crate::realm::Realm;
use crate::reset_registry::{UndoAction, reset_constructor};

/// What one install changed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstallReport {
    pub instance_wrapped: Vec<String>,
    /// Property name and the level that owns the wrapped accessor.
    pub prototype_wrapped: Vec<(String, ObjectHandle)>,
    /// Already wrapped, or left alone by the prototype-level skip rules.
    pub skipped: Vec<String>,
    pub reset_added: bool,
}

// ---------------------------------------------------------------------------
// Journal
// ---------------------------------------------------------------------------

#[derive(Debug)]
struct JournalEntry {
    target: ObjectHandle,
    name: String,
    previous: Option<MemberDescriptor>,
    installed: Vec<FunctionId>,
    recorded_undo: bool,
}

/// Members defined by one install, so a failed install can be undone.
#[derive(Debug)]
struct Journal {
    /// Constructor being installed; recorded undo actions belong to it.
    owner: ObjectHandle,
    entries: Vec<JournalEntry>,
}

impl Journal {
    fn new(owner: ObjectHandle) -> Self {
        Self {
            owner,
            entries: Vec::new(),
        }
    }

    fn define(
        &mut self,
        realm: &mut Realm,
        target: ObjectHandle,
        name: &str,
        desc: MemberDescriptor,
        installed: Vec<FunctionId>,
    ) -> TrackingResult<()> {
        let previous = realm.heap().get_own_property_descriptor(target, name)?;
        let defined = realm.heap_mut().define_property(target, name, desc);
        if !matches!(defined, Ok(true)) {
            for id in installed {
                realm.release_function(id);
            }
            defined?;
            return Err(ObjectError::TypeError(format!(
                "cannot define member '{name}' on {target}"
            ))
            .into());
        }
        self.entries.push(JournalEntry {
            target,
            name: name.to_string(),
            previous,
            installed,
            recorded_undo: false,
        });
        Ok(())
    }

    fn record_undo(&mut self, realm: &mut Realm, action: UndoAction) {
        realm.resets_mut().record(self.owner, action);
        if let Some(entry) = self.entries.last_mut() {
            entry.recorded_undo = true;
        }
    }

    /// Undo every journaled define, newest first.  Returns a description of
    /// each member that could not be put back.
    fn rollback(self, realm: &mut Realm) -> Vec<String> {
        let mut failures = Vec::new();
        for entry in self.entries.into_iter().rev() {
            if entry.recorded_undo {
                realm.resets_mut().forget(entry.target, &entry.name);
            }
            let (verb, outcome) = match entry.previous {
                Some(desc) => (
                    "restore",
                    realm.heap_mut().define_property(entry.target, &entry.name, desc),
                ),
                None => (
                    "delete",
                    realm.heap_mut().delete_property(entry.target, &entry.name),
                ),
            };
            match outcome {
                Ok(true) => {}
                Ok(false) => failures.push(format!(
                    "{verb} '{}' on {}: member is not configurable",
                    entry.name, entry.target
                )),
                Err(err) => failures.push(format!("{verb} '{}' on {}: {err}", entry.name, entry.target)),
            }
            for id in entry.installed {
                realm.release_function(id);
            }
        }
        failures
    }
}

// ---------------------------------------------------------------------------
// Install
// ---------------------------------------------------------------------------

/// Instrument `ctor` for `descriptor`, using the interceptor registered as
/// `interceptor`.  The caller owns `interceptor` and releases it on failure.
pub fn install(
    realm: &mut Realm,
    descriptor: &TypeDescriptor,
    ctor: ObjectHandle,
    interceptor: FunctionId,
    names: &MemberNames,
) -> TrackingResult<InstallReport> {
    let proto = realm.prototype_of_constructor(ctor)?;
    let mut journal = Journal::new(ctor);
    match install_steps(realm, &mut journal, descriptor, ctor, proto, interceptor, names) {
        Ok(report) => Ok(report),
        Err(err) => {
            let failures = journal.rollback(realm);
            Err(TrackingError::with_rollback_failures(err, failures))
        }
    }
}

fn install_steps(
    realm: &mut Realm,
    journal: &mut Journal,
    descriptor: &TypeDescriptor,
    ctor: ObjectHandle,
    proto: ObjectHandle,
    interceptor: FunctionId,
    names: &MemberNames,
) -> TrackingResult<InstallReport> {
    let mut report = InstallReport {
        reset_added: add_reset_entry_point(realm, journal, ctor, names)?,
        ..InstallReport::default()
    };
    add_property_functions(realm, journal, proto, names)?;

    journal.define(
        realm,
        proto,
        &names.interceptor,
        MemberDescriptor::data(Value::Function(interceptor)),
        Vec::new(),
    )?;
    journal.define(
        realm,
        proto,
        &names.type_tag,
        MemberDescriptor::data(Value::str(descriptor.name())),
        Vec::new(),
    )?;
    if !realm.heap().has_own(proto, &names.pending_stores)? {
        let list = realm.heap_mut().alloc_pending_stores()?;
        journal.define(
            realm,
            proto,
            &names.pending_stores,
            MemberDescriptor::data(Value::Object(list)),
            Vec::new(),
        )?;
    }
    let back_reference = match descriptor.structural_kind() {
        StructuralKind::Entity => &names.entity_type,
        StructuralKind::Complex => &names.complex_type,
    };
    journal.define(
        realm,
        proto,
        back_reference,
        MemberDescriptor::hidden(Value::str(descriptor.name())),
        Vec::new(),
    )?;

    for prop in descriptor.properties() {
        if realm.resets().is_wrapped(proto, &prop.name) {
            report.skipped.push(prop.name.clone());
        } else if realm.has_property(proto, &prop.name)? {
            match wrap_prototype_property(realm, journal, proto, prop, names)? {
                Some(level) => report.prototype_wrapped.push((prop.name.clone(), level)),
                None => report.skipped.push(prop.name.clone()),
            }
        } else {
            wrap_instance_property(realm, journal, proto, prop, names)?;
            report.instance_wrapped.push(prop.name.clone());
        }
    }
    Ok(report)
}

/// Adds the constructor's reset entry point unless it already has one.
fn add_reset_entry_point(
    realm: &mut Realm,
    journal: &mut Journal,
    ctor: ObjectHandle,
    names: &MemberNames,
) -> TrackingResult<bool> {
    if realm.heap().has_own(ctor, &names.reset)? {
        return Ok(false);
    }
    let member_names = names.clone();
    let reset = realm.register_native(names.reset.clone(), move |realm, _this, _args| {
        let report = reset_constructor(realm, ctor, &member_names)?;
        Ok(Value::Int(report.undo_actions_run as i64))
    });
    journal.define(
        realm,
        ctor,
        &names.reset,
        MemberDescriptor::data(Value::Function(reset)),
        vec![reset],
    )?;
    Ok(true)
}

fn add_property_functions(
    realm: &mut Realm,
    journal: &mut Journal,
    proto: ObjectHandle,
    names: &MemberNames,
) -> TrackingResult<()> {
    if !realm.heap().has_own(proto, &names.get_property)? {
        let get = realm.register_native(names.get_property.clone(), |realm, this, args| {
            let name = property_name_arg(args)?;
            realm.get(this, name)
        });
        journal.define(
            realm,
            proto,
            &names.get_property,
            MemberDescriptor::data(Value::Function(get)),
            vec![get],
        )?;
    }
    if !realm.heap().has_own(proto, &names.set_property)? {
        let set = realm.register_native(names.set_property.clone(), |realm, this, args| {
            let name = property_name_arg(args)?;
            let value = args.get(1).cloned().unwrap_or_default();
            realm.set(this, name, value)?;
            Ok(Value::Object(this))
        });
        journal.define(
            realm,
            proto,
            &names.set_property,
            MemberDescriptor::data(Value::Function(set)),
            vec![set],
        )?;
    }
    Ok(())
}

fn property_name_arg(args: &[Value]) -> TrackingResult<&str> {
    args.first()
        .and_then(Value::as_str)
        .ok_or_else(|| TrackingError::invalid_operation("a property name is required"))
}

/// The interceptor reachable from `this` through the interception hook.
fn resolve_interceptor(
    realm: &mut Realm,
    this: ObjectHandle,
    member: &str,
) -> TrackingResult<Rc<dyn Interceptor>> {
    match realm.get(this, member)? {
        Value::Function(id) => realm.interceptor(id),
        other => Err(TrackingError::invalid_operation(format!(
            "{this} has no interception hook (`{member}` is {})",
            other.type_name()
        ))),
    }
}

fn wrap_instance_property(
    realm: &mut Realm,
    journal: &mut Journal,
    proto: ObjectHandle,
    prop: &PropertyDescriptor,
    names: &MemberNames,
) -> TrackingResult<()> {
    let name = prop.name.clone();
    let member_names = names.clone();
    let get = realm.register_native(format!("{}.get", prop.name), move |realm, this, _args| {
        read_property(realm, this, &name, &member_names)
    });

    let property = prop.clone();
    let member_names = names.clone();
    let set = realm.register_native(format!("{}.set", prop.name), move |realm, this, args| {
        let value = args.first().cloned().unwrap_or_default();
        let store = store_for_write(realm, this, &member_names)?;
        let interceptor = resolve_interceptor(realm, this, &member_names.interceptor)?;
        let mut raw = StoreAccessor::new(realm, this, store, &property.name);
        interceptor.intercept(&property, value, &mut raw)?;
        Ok(Value::Undefined)
    });

    journal.define(
        realm,
        proto,
        &prop.name,
        MemberDescriptor::accessor(Some(get), Some(set), true),
        vec![get, set],
    )?;
    journal.record_undo(
        realm,
        UndoAction::DeleteMember {
            level: proto,
            name: prop.name.clone(),
            installed: vec![get, set],
        },
    );
    Ok(())
}

/// Wraps the accessor that owns `prop.name` on the chain.  Returns the
/// owning level, or `None` when the member is left alone.
fn wrap_prototype_property(
    realm: &mut Realm,
    journal: &mut Journal,
    proto: ObjectHandle,
    prop: &PropertyDescriptor,
    names: &MemberNames,
) -> TrackingResult<Option<ObjectHandle>> {
    let Some((level, original)) = realm.lookup(proto, &prop.name)? else {
        return Ok(None);
    };
    if !original.is_configurable() || original.is_data() {
        return Ok(None);
    }
    let Some(original_set) = original.setter() else {
        return Ok(None);
    };
    if realm.resets().is_wrapped(level, &prop.name) {
        return Ok(None);
    }
    let original_get = original.getter();

    let property = prop.clone();
    let interceptor_member = names.interceptor.clone();
    let set = realm.register_native(format!("{}.set", prop.name), move |realm, this, args| {
        let value = args.first().cloned().unwrap_or_default();
        let interceptor = resolve_interceptor(realm, this, &interceptor_member)?;
        let mut raw = InheritedAccessor::new(realm, this, original_get, original_set);
        interceptor.intercept(&property, value, &mut raw)?;
        Ok(Value::Undefined)
    });

    journal.define(
        realm,
        level,
        &prop.name,
        MemberDescriptor::accessor(original_get, Some(set), original.is_enumerable()),
        vec![set],
    )?;
    journal.record_undo(
        realm,
        UndoAction::RestoreMember {
            level,
            name: prop.name.clone(),
            original,
            installed: vec![set],
        },
    );
    Ok(Some(level))
}
