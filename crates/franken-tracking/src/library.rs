//! Model library facade: registrations, tracking and reset.
//!
//! [`ModelLibrary`] owns the interceptor, the value factory, the
//! configuration and the structured event log, and keeps one
//! [`Registration`] per instrumented constructor.  All heap state lives in
//! the [`Realm`] the caller passes in; a library serves one realm.

use std::collections::BTreeMap;
use std::fmt;
use std::rc::Rc;
use std::sync::Arc;

use crate::config::ModelLibraryConfig;
use crate::entity_record::EntityRecord;
use crate::error::{TrackingError, TrackingResult};
use crate::events::{EventLog, TrackingContext};
use crate::installer::{self, InstallReport};
use crate::interceptor::Interceptor;
use crate::metadata::TypeDescriptor;
use crate::object_model::{ObjectHandle, Value};
use crate::realm::Realm;
use crate::reset_registry::{ResetReport, reset_constructor};
use crate::tracking::{
    DefaultValueFactory, TrackingInitializer, TrackingReport, ValueFactory,
    trackable_property_names,
};

// ---------------------------------------------------------------------------
// Registration
// ---------------------------------------------------------------------------

/// Binds one type descriptor to one constructor.  Immutable; a new handle is
/// issued by every successful install.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Registration {
    id: u64,
    descriptor: Arc<TypeDescriptor>,
    constructor: Option<ObjectHandle>,
    prototype: Option<ObjectHandle>,
}

impl Registration {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn descriptor(&self) -> &TypeDescriptor {
        &self.descriptor
    }

    pub fn shared_descriptor(&self) -> Arc<TypeDescriptor> {
        Arc::clone(&self.descriptor)
    }

    pub fn type_name(&self) -> &str {
        self.descriptor.name()
    }

    pub fn constructor(&self) -> Option<ObjectHandle> {
        self.constructor
    }

    pub fn prototype(&self) -> Option<ObjectHandle> {
        self.prototype
    }

    /// A registration without a constructor (type with no properties).
    pub fn is_detached(&self) -> bool {
        self.constructor.is_none()
    }
}

// ---------------------------------------------------------------------------
// ModelLibrary
// ---------------------------------------------------------------------------

pub struct ModelLibrary {
    config: ModelLibraryConfig,
    interceptor: Rc<dyn Interceptor>,
    factory: Box<dyn ValueFactory>,
    registrations: BTreeMap<ObjectHandle, Registration>,
    complex_types: BTreeMap<String, Registration>,
    events: EventLog,
    next_registration_id: u64,
    next_record_id: u64,
}

impl fmt::Debug for ModelLibrary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModelLibrary")
            .field("config", &self.config)
            .field("registrations", &self.registrations)
            .field("events", &self.events.len())
            .finish_non_exhaustive()
    }
}

impl ModelLibrary {
    pub fn new(config: ModelLibraryConfig, interceptor: Rc<dyn Interceptor>) -> TrackingResult<Self> {
        config.validate()?;
        let events = EventLog::new(config.max_events, config.record_events);
        Ok(Self {
            config,
            interceptor,
            factory: Box::new(DefaultValueFactory),
            registrations: BTreeMap::new(),
            complex_types: BTreeMap::new(),
            events,
            next_registration_id: 1,
            next_record_id: 1,
        })
    }

    pub fn with_value_factory(mut self, factory: impl ValueFactory + 'static) -> Self {
        self.factory = Box::new(factory);
        self
    }

    /// A realm sized by this library's configuration.
    pub fn new_realm(&self) -> Realm {
        Realm::with_max_prototype_depth(self.config.max_prototype_depth)
    }

    pub fn config(&self) -> &ModelLibraryConfig {
        &self.config
    }

    pub fn events(&self) -> &EventLog {
        &self.events
    }

    pub fn registration_for(&self, ctor: ObjectHandle) -> Option<&Registration> {
        self.registrations.get(&ctor)
    }

    pub fn complex_registration(&self, type_name: &str) -> Option<&Registration> {
        self.complex_types.get(type_name)
    }

    /// Registered here and still instrumented in `realm`.
    pub fn is_registered(&self, realm: &Realm, ctor: ObjectHandle) -> bool {
        self.registrations.contains_key(&ctor)
            && realm
                .heap()
                .has_own(ctor, &self.config.members.reset)
                .unwrap_or(false)
    }

    // -- Install ---------------------------------------------------------------

    /// Instrument `ctor` for `descriptor`.
    ///
    /// Re-installing an equal descriptor on a registered constructor returns
    /// the existing registration; a different descriptor is rejected until
    /// the constructor is reset.
    pub fn install(
        &mut self,
        realm: &mut Realm,
        descriptor: Arc<TypeDescriptor>,
        ctor: Option<ObjectHandle>,
        context: &TrackingContext,
    ) -> TrackingResult<Registration> {
        let type_name = descriptor.name().to_string();
        let result = self.install_inner(realm, descriptor, ctor, context);
        match &result {
            Ok((registration, Some(report))) => self.events.push(
                context,
                "install",
                "allow",
                "none",
                &type_name,
                format!(
                    "registration={} instance_wrapped={} prototype_wrapped={} skipped={}",
                    registration.id,
                    report.instance_wrapped.len(),
                    report.prototype_wrapped.len(),
                    report.skipped.len()
                ),
            ),
            Ok((registration, None)) => self.events.push(
                context,
                "install",
                "noop",
                "none",
                &type_name,
                format!("registration={}", registration.id),
            ),
            Err(err) => self.events.push(
                context,
                "install",
                "deny",
                err.stable_code(),
                &type_name,
                err.to_string(),
            ),
        }
        result.map(|(registration, _)| registration)
    }

    fn install_inner(
        &mut self,
        realm: &mut Realm,
        descriptor: Arc<TypeDescriptor>,
        ctor: Option<ObjectHandle>,
        context: &TrackingContext,
    ) -> TrackingResult<(Registration, Option<InstallReport>)> {
        let Some(ctor) = ctor else {
            if !descriptor.properties().is_empty() {
                return Err(TrackingError::configuration(
                    descriptor.name(),
                    "no type constructor",
                ));
            }
            let registration = self.issue(descriptor, None, None);
            return Ok((registration, None));
        };

        let instrumented = realm.heap().has_own(ctor, &self.config.members.reset)?;
        if let Some(existing) = self.registrations.get(&ctor) {
            if instrumented {
                if *existing.descriptor == *descriptor {
                    return Ok((existing.clone(), None));
                }
                return Err(TrackingError::invalid_operation(format!(
                    "{ctor} is registered for a different `{}` descriptor; reset it first",
                    existing.type_name()
                )));
            }
            // Reset through its entry point rather than through this library.
            let stale = existing.clone();
            self.retire(&stale);
        } else if instrumented {
            return Err(TrackingError::invalid_operation(format!(
                "{ctor} is already instrumented by another registration"
            )));
        }

        let prototype = realm.prototype_of_constructor(ctor)?;
        let hook = realm.register_interceptor(Rc::clone(&self.interceptor));
        let report =
            match installer::install(realm, &descriptor, ctor, hook, &self.config.members) {
                Ok(report) => report,
                Err(err) => {
                    realm.release_function(hook);
                    self.events.push(
                        context,
                        "install_rollback",
                        "allow",
                        err.stable_code(),
                        descriptor.name(),
                        err.to_string(),
                    );
                    return Err(err);
                }
            };
        let registration = self.issue(descriptor, Some(ctor), Some(prototype));
        self.registrations.insert(ctor, registration.clone());
        Ok((registration, Some(report)))
    }

    fn issue(
        &mut self,
        descriptor: Arc<TypeDescriptor>,
        constructor: Option<ObjectHandle>,
        prototype: Option<ObjectHandle>,
    ) -> Registration {
        let registration = Registration {
            id: self.next_registration_id,
            descriptor,
            constructor,
            prototype,
        };
        self.next_registration_id += 1;
        if registration.descriptor.is_complex_type() {
            self.complex_types
                .insert(registration.type_name().to_string(), registration.clone());
        }
        registration
    }

    fn retire(&mut self, registration: &Registration) {
        if let Some(ctor) = registration.constructor {
            self.registrations.remove(&ctor);
        }
        let type_name = registration.type_name();
        if self
            .complex_types
            .get(type_name)
            .is_some_and(|r| r.id == registration.id)
        {
            self.complex_types.remove(type_name);
        }
    }

    // -- Reset -----------------------------------------------------------------

    /// Undo the instrumentation of `ctor` and retire its registration.
    pub fn reset(
        &mut self,
        realm: &mut Realm,
        ctor: ObjectHandle,
        context: &TrackingContext,
    ) -> TrackingResult<ResetReport> {
        let type_name = self
            .registrations
            .get(&ctor)
            .map(|r| r.type_name().to_string())
            .unwrap_or_default();
        match reset_constructor(realm, ctor, &self.config.members) {
            Ok(report) => {
                if let Some(registration) = self.registrations.get(&ctor).cloned() {
                    self.retire(&registration);
                }
                self.events.push(
                    context,
                    "reset",
                    "allow",
                    "none",
                    &type_name,
                    format!(
                        "levels_visited={} undo_actions_run={}",
                        report.levels_visited, report.undo_actions_run
                    ),
                );
                Ok(report)
            }
            Err(err) => {
                self.events.push(
                    context,
                    "reset",
                    "deny",
                    err.stable_code(),
                    &type_name,
                    err.to_string(),
                );
                Err(err)
            }
        }
    }

    // -- Tracking --------------------------------------------------------------

    pub fn start_tracking(
        &mut self,
        realm: &mut Realm,
        instance: ObjectHandle,
        descriptor: &TypeDescriptor,
        context: &TrackingContext,
    ) -> TrackingResult<TrackingReport> {
        let result = TrackingInitializer::new(
            &self.config.members,
            self.factory.as_ref(),
            &self.complex_types,
        )
        .start_tracking(realm, instance, descriptor);
        match &result {
            Ok(report) => {
                if report.promoted_pending > 0 {
                    self.events.push(
                        context,
                        "pending_promoted",
                        "allow",
                        "none",
                        descriptor.name(),
                        format!("{instance} promoted={}", report.promoted_pending),
                    );
                }
                self.events.push(
                    context,
                    "start_tracking",
                    "allow",
                    "none",
                    descriptor.name(),
                    format!(
                        "{instance} seeded={} migrated={}",
                        report.seeded,
                        report.migrated.len()
                    ),
                );
            }
            Err(err) => self.events.push(
                context,
                "start_tracking",
                "deny",
                err.stable_code(),
                descriptor.name(),
                err.to_string(),
            ),
        }
        result
    }

    /// Construct an instance through `registration` and start tracking it.
    pub fn create_instance(
        &mut self,
        realm: &mut Realm,
        registration: &Registration,
        context: &TrackingContext,
    ) -> TrackingResult<ObjectHandle> {
        let ctor = registration.constructor.ok_or_else(|| {
            TrackingError::invalid_operation(format!(
                "registration {} for `{}` has no constructor",
                registration.id,
                registration.type_name()
            ))
        })?;
        let current = self.registrations.get(&ctor).map(|r| r.id);
        if current != Some(registration.id) {
            return Err(TrackingError::invalid_operation(format!(
                "registration {} for `{}` is no longer current",
                registration.id,
                registration.type_name()
            )));
        }
        let instance = realm.construct(ctor)?;
        let descriptor = registration.shared_descriptor();
        self.start_tracking(realm, instance, &descriptor, context)?;
        Ok(instance)
    }

    /// Allocate an [`EntityRecord`] for `registration` with its fields seeded
    /// eagerly.
    pub fn create_record(
        &mut self,
        registration: &Registration,
        initial: Vec<(String, Value)>,
    ) -> TrackingResult<EntityRecord> {
        let id = self.next_record_id;
        self.next_record_id += 1;
        EntityRecord::new(
            id,
            registration.clone(),
            Rc::clone(&self.interceptor),
            &self.complex_types,
            initial,
        )
    }

    // -- Access ----------------------------------------------------------------

    pub fn get_property(
        &self,
        realm: &mut Realm,
        instance: ObjectHandle,
        name: &str,
    ) -> TrackingResult<Value> {
        realm.get(instance, name)
    }

    /// Returns `instance` so calls can be chained.
    pub fn set_property(
        &self,
        realm: &mut Realm,
        instance: ObjectHandle,
        name: &str,
        value: Value,
    ) -> TrackingResult<ObjectHandle> {
        realm.set(instance, name, value)?;
        Ok(instance)
    }

    pub fn trackable_property_names(
        &self,
        realm: &mut Realm,
        instance: ObjectHandle,
    ) -> TrackingResult<Vec<String>> {
        trackable_property_names(realm, instance, &self.config.members)
    }
}
