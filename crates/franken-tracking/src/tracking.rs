//! Tracking initializer: prepares a freshly constructed instance for
//! intercepted access.
//!
//! [`TrackingInitializer::start_tracking`] obtains the instance's backing
//! store, moves own members assigned before instrumentation existed back
//! through the intercepted accessors, and seeds every declared property in
//! the store by kind.  Seeding writes the store directly; the interceptor
//! only sees the migrated members.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::backing_store::{backing_store_of, get_backing_store, process_pending_stores};
use crate::config::MemberNames;
use crate::error::{TrackingError, TrackingResult};
use crate::library::Registration;
use crate::metadata::{PropertyDescriptor, PropertyKind, TypeDescriptor};
use crate::object_model::{
    CollectionKind, MemberDescriptor, ObjectHandle, ObservedCollection, Value, ValueScope,
};
use crate::realm::Realm;

/// Nesting bound for complex values that themselves hold complex values.
pub const MAX_COMPLEX_NESTING: usize = 64;

// ---------------------------------------------------------------------------
// ValueFactory
// ---------------------------------------------------------------------------

/// Builds the observed values seeded into a store.
pub trait ValueFactory {
    /// A complex-value instance scoped to `(owner, property)`, built through
    /// `constructor` when the complex type has one.
    fn create_complex(
        &self,
        realm: &mut Realm,
        owner: ObjectHandle,
        property: &PropertyDescriptor,
        constructor: Option<ObjectHandle>,
    ) -> TrackingResult<ObjectHandle>;

    /// An empty observed collection scoped to `(owner, property)`.
    fn create_collection(
        &self,
        realm: &mut Realm,
        kind: CollectionKind,
        owner: ObjectHandle,
        property: &PropertyDescriptor,
    ) -> TrackingResult<ObjectHandle>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultValueFactory;

impl ValueFactory for DefaultValueFactory {
    fn create_complex(
        &self,
        realm: &mut Realm,
        owner: ObjectHandle,
        property: &PropertyDescriptor,
        constructor: Option<ObjectHandle>,
    ) -> TrackingResult<ObjectHandle> {
        let value = match constructor {
            Some(ctor) => realm.construct(ctor)?,
            None => realm.alloc_plain()?,
        };
        realm.heap_mut().ordinary_mut(value)?.scope = Some(ValueScope {
            owner,
            property: property.name.clone(),
        });
        Ok(value)
    }

    fn create_collection(
        &self,
        realm: &mut Realm,
        kind: CollectionKind,
        owner: ObjectHandle,
        property: &PropertyDescriptor,
    ) -> TrackingResult<ObjectHandle> {
        Ok(realm
            .heap_mut()
            .alloc_collection(ObservedCollection::new(kind, owner, property.name.as_str()))?)
    }
}

// ---------------------------------------------------------------------------
// TrackingInitializer
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackingReport {
    /// Pending stores promoted before the instance's store was obtained.
    pub promoted_pending: usize,
    /// Own members moved behind the intercepted accessors.
    pub migrated: Vec<String>,
    pub seeded: usize,
    /// Complex values that were themselves started.
    pub nested: usize,
}

pub struct TrackingInitializer<'a> {
    names: &'a MemberNames,
    factory: &'a dyn ValueFactory,
    complex_types: &'a BTreeMap<String, Registration>,
}

impl<'a> TrackingInitializer<'a> {
    pub fn new(
        names: &'a MemberNames,
        factory: &'a dyn ValueFactory,
        complex_types: &'a BTreeMap<String, Registration>,
    ) -> Self {
        Self {
            names,
            factory,
            complex_types,
        }
    }

    /// Start tracking `instance`.  On failure the instance keeps the own
    /// members and store it had before the call; pending stores promoted on
    /// the way stay promoted.
    pub fn start_tracking(
        &self,
        realm: &mut Realm,
        instance: ObjectHandle,
        descriptor: &TypeDescriptor,
    ) -> TrackingResult<TrackingReport> {
        self.validate(descriptor, 0)?;
        self.track(realm, instance, descriptor)
    }

    /// Reject unknown kinds and runaway nesting anywhere in the tree of
    /// complex values `descriptor` will build.
    fn validate(&self, descriptor: &TypeDescriptor, depth: usize) -> TrackingResult<()> {
        if depth > MAX_COMPLEX_NESTING {
            return Err(TrackingError::configuration(
                descriptor.name(),
                format!("complex values nest deeper than {MAX_COMPLEX_NESTING}"),
            ));
        }
        for prop in descriptor.properties() {
            match prop.kind {
                PropertyKind::Unknown => return Err(unknown_kind(descriptor, prop)),
                PropertyKind::Complex if prop.scalar => {
                    if let Some(registration) = self.constructed_complex_type(prop) {
                        self.validate(registration.descriptor(), depth + 1)?;
                    }
                }
                _ => {}
            }
        }
        Ok(())
    }

    /// Registration of a complex scalar's type when it can be constructed
    /// and tracked in turn.
    fn constructed_complex_type(&self, prop: &PropertyDescriptor) -> Option<&Registration> {
        prop.complex_type_name
            .as_deref()
            .and_then(|name| self.complex_types.get(name))
            .filter(|registration| registration.constructor().is_some())
    }

    fn track(
        &self,
        realm: &mut Realm,
        instance: ObjectHandle,
        descriptor: &TypeDescriptor,
    ) -> TrackingResult<TrackingReport> {
        let mut report = TrackingReport::default();
        if let Some(proto) = realm.heap().prototype_of(instance)? {
            report.promoted_pending = process_pending_stores(realm, proto, self.names)?;
        }
        let created_store = backing_store_of(realm, instance, self.names)?.is_none();
        let store = get_backing_store(realm, instance, self.names)?;
        let mut undo = TrackingUndo {
            instance,
            store,
            created_store,
            store_members: realm.heap().ordinary(store)?.properties.clone(),
            migrated: Vec::new(),
        };
        match self.populate(realm, instance, store, descriptor, &mut report, &mut undo) {
            Ok(()) => Ok(report),
            Err(err) => {
                let failures = undo.unwind(realm, self.names);
                Err(TrackingError::with_rollback_failures(err, failures))
            }
        }
    }

    fn populate(
        &self,
        realm: &mut Realm,
        instance: ObjectHandle,
        store: ObjectHandle,
        descriptor: &TypeDescriptor,
        report: &mut TrackingReport,
        undo: &mut TrackingUndo,
    ) -> TrackingResult<()> {
        self.check_navigation_unassigned(realm, instance, store, descriptor)?;

        // Values built by constructors and factories come first, so they
        // fail before any member has moved.
        let mut built = BTreeMap::new();
        for prop in descriptor.properties() {
            if let Some(value) = self.build_value(realm, instance, descriptor, prop, report)? {
                built.insert(prop.name.as_str(), value);
            }
        }

        for prop in descriptor.properties() {
            if let Some(own) = realm.heap().get_own_property_descriptor(instance, &prop.name)? {
                let value = realm.get(instance, &prop.name)?;
                realm.delete_own(instance, &prop.name)?;
                undo.migrated.push((prop.name.clone(), own));
                realm.set(instance, &prop.name, value)?;
                report.migrated.push(prop.name.clone());
            }
        }

        for prop in descriptor.properties() {
            let value = match built.remove(prop.name.as_str()) {
                Some(value) => value,
                None => self.scalar_data_value(realm, instance, prop)?,
            };
            realm.heap_mut().put_own_data(store, &prop.name, value)?;
            report.seeded += 1;
        }
        Ok(())
    }

    fn check_navigation_unassigned(
        &self,
        realm: &Realm,
        instance: ObjectHandle,
        store: ObjectHandle,
        descriptor: &TypeDescriptor,
    ) -> TrackingResult<()> {
        for prop in descriptor.properties().iter().filter(|p| p.is_navigation()) {
            let own = realm.heap().own_data_value(instance, &prop.name)?;
            let stored = realm.heap().own_data_value(store, &prop.name)?;
            let assigned = [own, stored]
                .into_iter()
                .flatten()
                .any(|v| !v.is_undefined());
            if assigned {
                return Err(TrackingError::invalid_operation(format!(
                    "cannot assign navigation property `{}` of `{}` during construction",
                    prop.name,
                    descriptor.name()
                )));
            }
        }
        Ok(())
    }

    /// Seed for a scalar data property: its current value, else its default.
    fn scalar_data_value(
        &self,
        realm: &mut Realm,
        instance: ObjectHandle,
        prop: &PropertyDescriptor,
    ) -> TrackingResult<Value> {
        let current = realm.get(instance, &prop.name)?;
        Ok(if current.is_undefined() {
            prop.default_value.clone().unwrap_or(Value::Null)
        } else {
            current
        })
    }

    /// Seed for every kind except scalar data, which is read after members
    /// have migrated.
    fn build_value(
        &self,
        realm: &mut Realm,
        instance: ObjectHandle,
        descriptor: &TypeDescriptor,
        prop: &PropertyDescriptor,
        report: &mut TrackingReport,
    ) -> TrackingResult<Option<Value>> {
        let value = match (prop.kind, prop.scalar) {
            (PropertyKind::Data, true) => return Ok(None),
            (PropertyKind::Data, false) => self.collection(realm, CollectionKind::Primitive, instance, prop)?,
            (PropertyKind::Complex, true) => {
                let registration = self.constructed_complex_type(prop);
                let ctor = registration.and_then(Registration::constructor);
                let value = self.factory.create_complex(realm, instance, prop, ctor)?;
                if let Some(registration) = registration {
                    self.track(realm, value, registration.descriptor())?;
                    report.nested += 1;
                }
                Value::Object(value)
            }
            (PropertyKind::Complex, false) => self.collection(realm, CollectionKind::Complex, instance, prop)?,
            (PropertyKind::Navigation, true) => Value::Null,
            (PropertyKind::Navigation, false) => self.collection(realm, CollectionKind::Relation, instance, prop)?,
            (PropertyKind::Unknown, _) => return Err(unknown_kind(descriptor, prop)),
        };
        Ok(Some(value))
    }

    fn collection(
        &self,
        realm: &mut Realm,
        kind: CollectionKind,
        owner: ObjectHandle,
        prop: &PropertyDescriptor,
    ) -> TrackingResult<Value> {
        Ok(Value::Object(self.factory.create_collection(realm, kind, owner, prop)?))
    }
}

fn unknown_kind(descriptor: &TypeDescriptor, prop: &PropertyDescriptor) -> TrackingError {
    TrackingError::configuration(
        descriptor.name(),
        format!("unknown property kind for `{}`", prop.name),
    )
}

/// State needed to put an instance back after a failed start.
struct TrackingUndo {
    instance: ObjectHandle,
    store: ObjectHandle,
    created_store: bool,
    store_members: BTreeMap<String, MemberDescriptor>,
    /// Own members removed from the instance, in removal order.
    migrated: Vec<(String, MemberDescriptor)>,
}

impl TrackingUndo {
    fn unwind(self, realm: &mut Realm, names: &MemberNames) -> Vec<String> {
        let mut failures = Vec::new();
        match realm.heap_mut().ordinary_mut(self.store) {
            Ok(store) => store.properties = self.store_members,
            Err(err) => failures.push(format!("restore store {}: {err}", self.store)),
        }
        if self.created_store
            && let Err(err) = realm.delete_own(self.instance, &names.backing_store)
        {
            failures.push(format!("remove store from {}: {err}", self.instance));
        }
        for (name, own) in self.migrated.into_iter().rev() {
            if let Err(err) = realm.define_own(self.instance, &name, own) {
                failures.push(format!("restore '{name}' on {}: {err}", self.instance));
            }
        }
        failures
    }
}

// ---------------------------------------------------------------------------
// Enumeration
// ---------------------------------------------------------------------------

/// Enumerable member names reachable from `instance` (own first, then
/// inherited; shadowed names once), minus the type tag, the store members
/// and function-valued members.
pub fn trackable_property_names(
    realm: &mut Realm,
    instance: ObjectHandle,
    names: &MemberNames,
) -> TrackingResult<Vec<String>> {
    let exclusions = names.enumeration_exclusions();
    let mut seen = BTreeSet::new();
    let mut candidates = Vec::new();
    for level in realm.heap().chain(instance, realm.max_prototype_depth())? {
        for (key, desc) in &realm.heap().ordinary(level)?.properties {
            if !seen.insert(key.clone()) || !desc.is_enumerable() {
                continue;
            }
            if exclusions.contains(&key.as_str()) {
                continue;
            }
            candidates.push((key.clone(), desc.value().cloned()));
        }
    }

    let mut trackable = Vec::with_capacity(candidates.len());
    for (key, value) in candidates {
        let value = match value {
            Some(value) => value,
            None => realm.get(instance, &key)?,
        };
        if !value.is_function() {
            trackable.push(key);
        }
    }
    Ok(trackable)
}
