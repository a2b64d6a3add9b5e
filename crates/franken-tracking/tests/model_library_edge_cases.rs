//! Edge cases for registration, rollback, locking and complex values.

use std::rc::Rc;
use std::sync::Arc;

use frankenengine_tracking::backing_store::{backing_store_of, peek_pending_store};
use frankenengine_tracking::events::TrackingEvent;
use frankenengine_tracking::interceptor::{FnInterceptor, PassThroughInterceptor, RawAccess};
use frankenengine_tracking::object_model::{CollectionKind, MemberDescriptor, ObjectHandle, Value};
use frankenengine_tracking::{
    ModelLibrary, ModelLibraryConfig, PropertyDescriptor, PropertyKind, Realm, TrackingContext,
    TrackingError, TypeDescriptor,
};

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn context() -> TrackingContext {
    TrackingContext::new("trace-edge")
}

fn library() -> ModelLibrary {
    ModelLibrary::new(ModelLibraryConfig::default(), Rc::new(PassThroughInterceptor)).unwrap()
}

fn person_descriptor() -> Arc<TypeDescriptor> {
    Arc::new(
        TypeDescriptor::entity(
            "Person",
            vec![
                PropertyDescriptor::data("firstName"),
                PropertyDescriptor::data("lastName"),
                PropertyDescriptor::data("fullName"),
            ],
        )
        .unwrap(),
    )
}

fn define_full_name(realm: &mut Realm, level: ObjectHandle) {
    let get = realm.register_native("fullName.get", |realm, this, _| {
        let first = realm.get(this, "firstName")?;
        let last = realm.get(this, "lastName")?;
        Ok(Value::Str(format!("{first} {last}")))
    });
    let set = realm.register_native("fullName.set", |realm, this, args| {
        let full = args.first().and_then(Value::as_str).unwrap_or_default().to_string();
        let (first, last) = full.split_once(' ').unwrap_or((full.as_str(), ""));
        realm.set(this, "firstName", Value::str(first))?;
        realm.set(this, "lastName", Value::str(last))?;
        Ok(Value::Undefined)
    });
    realm
        .define_own(level, "fullName", MemberDescriptor::accessor(Some(get), Some(set), false))
        .unwrap();
}

fn event_names(events: &[TrackingEvent]) -> Vec<&str> {
    events.iter().map(|e| e.event.as_str()).collect()
}

// ===========================================================================
// 1. Rollback
// ===========================================================================

#[test]
fn failed_install_leaves_chain_untouched() {
    let mut lib = library();
    let mut realm = lib.new_realm();
    let ctor = realm.define_class("Person", None, None).unwrap();
    let proto = realm.prototype_of_constructor(ctor).unwrap();
    realm
        .define_own(proto, "nickname", MemberDescriptor::data(Value::str("x")))
        .unwrap();
    realm.heap_mut().ordinary_mut(proto).unwrap().prevent_extensions();
    let before = realm.heap().snapshot_level(proto).unwrap();
    let functions = realm.function_count();

    let err = lib
        .install(&mut realm, person_descriptor(), Some(ctor), &context())
        .unwrap_err();
    assert!(matches!(err, TrackingError::Object(_)));
    assert_eq!(realm.heap().snapshot_level(proto).unwrap(), before);
    assert_eq!(realm.function_count(), functions);
    assert!(!realm.heap().has_own(ctor, "__reset__").unwrap());
    assert!(lib.registration_for(ctor).is_none());

    let events = lib.events().events();
    assert_eq!(event_names(&events), vec!["install_rollback", "install"]);
    assert_eq!(events[1].outcome, "deny");
    assert_eq!(events[1].error_code, "FE-TRACK-0003");
}

#[test]
fn chain_deeper_than_configured_limit_rolls_back() {
    let config = ModelLibraryConfig {
        max_prototype_depth: 2,
        ..ModelLibraryConfig::default()
    };
    let mut lib = ModelLibrary::new(config, Rc::new(PassThroughInterceptor)).unwrap();
    let mut realm = lib.new_realm();
    let mut ctor = realm.define_class("Base", None, None).unwrap();
    for name in ["A", "B", "C"] {
        ctor = realm.define_class(name, Some(ctor), None).unwrap();
    }
    let err = lib
        .install(&mut realm, person_descriptor(), Some(ctor), &context())
        .unwrap_err();
    assert_eq!(err.stable_code(), "FE-TRACK-0003");
    assert!(!realm.heap().has_own(ctor, "__reset__").unwrap());
    assert!(realm.resets().is_empty());
}

#[test]
fn instrumented_by_another_library_is_rejected() {
    let mut first = library();
    let mut second = library();
    let mut realm = first.new_realm();
    let ctor = realm.define_class("Person", None, None).unwrap();
    first
        .install(&mut realm, person_descriptor(), Some(ctor), &context())
        .unwrap();
    let err = second
        .install(&mut realm, person_descriptor(), Some(ctor), &context())
        .unwrap_err();
    assert!(matches!(err, TrackingError::InvalidOperation { .. }));
}

// ===========================================================================
// 2. Prototype-level skip rules
// ===========================================================================

#[test]
fn read_only_and_static_members_are_not_wrapped() {
    let mut lib = library();
    let mut realm = lib.new_realm();
    let ctor = realm.define_class("Gauge", None, None).unwrap();
    let proto = realm.prototype_of_constructor(ctor).unwrap();
    let getter = realm.register_native("reading.get", |_, _, _| Ok(Value::Int(3)));
    realm
        .define_own(proto, "reading", MemberDescriptor::accessor(Some(getter), None, true))
        .unwrap();
    realm
        .define_own(proto, "unit", MemberDescriptor::data(Value::str("kPa")))
        .unwrap();
    realm
        .define_own(proto, "serial", MemberDescriptor::data_frozen(Value::Int(7)))
        .unwrap();
    let names = ["reading", "unit", "serial"];
    let before: Vec<_> = names
        .iter()
        .map(|name| realm.heap().get_own_property_descriptor(proto, name).unwrap())
        .collect();

    let descriptor = Arc::new(
        TypeDescriptor::entity(
            "Gauge",
            names.iter().map(|name| PropertyDescriptor::data(*name)).collect(),
        )
        .unwrap(),
    );
    lib.install(&mut realm, descriptor, Some(ctor), &context())
        .unwrap();
    for (name, original) in names.iter().zip(before) {
        assert!(!realm.resets().is_wrapped(proto, name), "{name} was wrapped");
        assert_eq!(
            realm.heap().get_own_property_descriptor(proto, name).unwrap(),
            original
        );
    }
}

#[test]
fn ancestor_accessor_is_wrapped_where_it_lives_and_restored() {
    let mut lib = library();
    let mut realm = lib.new_realm();
    let base = realm.define_class("Named", None, None).unwrap();
    let base_proto = realm.prototype_of_constructor(base).unwrap();
    define_full_name(&mut realm, base_proto);
    let original = realm
        .heap()
        .get_own_property_descriptor(base_proto, "fullName")
        .unwrap();
    let ctor = realm.define_class("Person", Some(base), None).unwrap();
    let proto = realm.prototype_of_constructor(ctor).unwrap();

    let registration = lib
        .install(&mut realm, person_descriptor(), Some(ctor), &context())
        .unwrap();
    assert!(realm.resets().is_wrapped(base_proto, "fullName"));
    assert!(!realm.heap().has_own(proto, "fullName").unwrap());
    let wrapped = realm
        .heap()
        .get_own_property_descriptor(base_proto, "fullName")
        .unwrap()
        .unwrap();
    assert!(!wrapped.is_enumerable());

    let p = lib.create_instance(&mut realm, &registration, &context()).unwrap();
    lib.set_property(&mut realm, p, "fullName", Value::str("Ada Lovelace"))
        .unwrap();
    assert_eq!(
        lib.get_property(&mut realm, p, "lastName").unwrap(),
        Value::str("Lovelace")
    );

    let report = lib.reset(&mut realm, ctor, &context()).unwrap();
    assert_eq!(report.levels_visited, 2);
    assert_eq!(
        realm
            .heap()
            .get_own_property_descriptor(base_proto, "fullName")
            .unwrap(),
        original
    );
}

#[test]
fn reset_reaches_ancestor_behind_class_without_members() {
    let mut lib = library();
    let mut realm = lib.new_realm();
    let base = realm.define_class("Named", None, None).unwrap();
    let base_proto = realm.prototype_of_constructor(base).unwrap();
    define_full_name(&mut realm, base_proto);
    let original = realm
        .heap()
        .get_own_property_descriptor(base_proto, "fullName")
        .unwrap();
    let middle = realm.define_class("Middle", Some(base), None).unwrap();
    let ctor = realm.define_class("Person", Some(middle), None).unwrap();

    lib.install(&mut realm, person_descriptor(), Some(ctor), &context())
        .unwrap();
    assert!(realm.resets().is_wrapped(base_proto, "fullName"));

    let report = lib.reset(&mut realm, ctor, &context()).unwrap();
    assert_eq!(report.levels_visited, 3);
    assert_eq!(
        realm
            .heap()
            .get_own_property_descriptor(base_proto, "fullName")
            .unwrap(),
        original
    );
    assert!(realm.resets().is_empty());

    let named = realm.construct(base).unwrap();
    realm.set(named, "fullName", Value::str("Alan Turing")).unwrap();
    assert_eq!(realm.get(named, "lastName").unwrap(), Value::str("Turing"));
}

#[test]
fn reset_restores_inherited_accessor_when_it_is_the_only_property() {
    let mut lib = library();
    let mut realm = lib.new_realm();
    let base = realm.define_class("Named", None, None).unwrap();
    let base_proto = realm.prototype_of_constructor(base).unwrap();
    define_full_name(&mut realm, base_proto);
    let original = realm
        .heap()
        .get_own_property_descriptor(base_proto, "fullName")
        .unwrap();
    let ctor = realm.define_class("Person", Some(base), None).unwrap();
    let descriptor = Arc::new(
        TypeDescriptor::entity("Person", vec![PropertyDescriptor::data("fullName")]).unwrap(),
    );

    lib.install(&mut realm, descriptor, Some(ctor), &context())
        .unwrap();
    assert!(realm.resets().is_wrapped(base_proto, "fullName"));

    let report = lib.reset(&mut realm, ctor, &context()).unwrap();
    assert_eq!(report.levels_visited, 2);
    assert_eq!(report.undo_actions_run, 1);
    assert_eq!(
        realm
            .heap()
            .get_own_property_descriptor(base_proto, "fullName")
            .unwrap(),
        original
    );
    assert!(realm.resets().is_empty());

    let named = realm.construct(base).unwrap();
    realm.set(named, "fullName", Value::str("Ada Lovelace")).unwrap();
    assert_eq!(realm.get(named, "firstName").unwrap(), Value::str("Ada"));
}

// ===========================================================================
// 3. Locked instances and pending stores
// ===========================================================================

#[test]
fn writes_inside_a_running_setter_share_one_pending_store() {
    let mut lib = library();
    let mut realm = lib.new_realm();
    let ctor = realm.define_class("Person", None, None).unwrap();
    let proto = realm.prototype_of_constructor(ctor).unwrap();
    define_full_name(&mut realm, proto);
    lib.install(&mut realm, person_descriptor(), Some(ctor), &context())
        .unwrap();
    let names = lib.config().members.clone();

    // No start_tracking: the instance has no store when the setter runs.
    let p = realm.construct(ctor).unwrap();
    realm.set(p, "fullName", Value::str("Grace Hopper")).unwrap();
    assert_eq!(backing_store_of(&realm, p, &names).unwrap(), None);
    let pending = peek_pending_store(&realm, p, &names).unwrap().unwrap();

    assert_eq!(realm.get(p, "firstName").unwrap(), Value::str("Grace"));
    assert_eq!(backing_store_of(&realm, p, &names).unwrap(), Some(pending));
    assert_eq!(realm.get(p, "fullName").unwrap(), Value::str("Grace Hopper"));
}

#[test]
fn interceptor_may_decline_a_write() {
    let veto = FnInterceptor(
        |prop: &PropertyDescriptor, value: Value, raw: &mut dyn RawAccess| {
            if prop.name == "lastName" {
                return Ok(());
            }
            raw.set(value)
        },
    );
    let mut lib = ModelLibrary::new(ModelLibraryConfig::default(), Rc::new(veto)).unwrap();
    let mut realm = lib.new_realm();
    let ctor = realm.define_class("Person", None, None).unwrap();
    let registration = lib
        .install(&mut realm, person_descriptor(), Some(ctor), &context())
        .unwrap();
    let p = lib.create_instance(&mut realm, &registration, &context()).unwrap();
    lib.set_property(&mut realm, p, "firstName", Value::str("Kay"))
        .and_then(|p| lib.set_property(&mut realm, p, "lastName", Value::str("Ignored")))
        .unwrap();
    assert_eq!(lib.get_property(&mut realm, p, "firstName").unwrap(), Value::str("Kay"));
    assert_eq!(lib.get_property(&mut realm, p, "lastName").unwrap(), Value::Null);
}

#[test]
fn rejected_migration_puts_own_members_back() {
    let strict = FnInterceptor(
        |prop: &PropertyDescriptor, value: Value, raw: &mut dyn RawAccess| {
            if prop.name == "lastName" {
                return Err(TrackingError::invalid_operation("lastName is read-only"));
            }
            raw.set(value)
        },
    );
    let mut lib = ModelLibrary::new(ModelLibraryConfig::default(), Rc::new(strict)).unwrap();
    let mut realm = lib.new_realm();
    let ctor = realm.define_class("Person", None, None).unwrap();
    let descriptor = person_descriptor();
    lib.install(&mut realm, descriptor.clone(), Some(ctor), &context())
        .unwrap();
    let names = lib.config().members.clone();

    let p = realm.construct(ctor).unwrap();
    for (name, value) in [("firstName", "Ada"), ("lastName", "Byron")] {
        realm
            .define_own(p, name, MemberDescriptor::data(Value::str(value)))
            .unwrap();
    }
    let err = lib
        .start_tracking(&mut realm, p, &descriptor, &context())
        .unwrap_err();
    assert!(err.to_string().contains("lastName is read-only"));
    assert_eq!(backing_store_of(&realm, p, &names).unwrap(), None);
    assert_eq!(
        realm.heap().own_data_value(p, "firstName").unwrap(),
        Some(Value::str("Ada"))
    );
    assert_eq!(
        realm.heap().own_data_value(p, "lastName").unwrap(),
        Some(Value::str("Byron"))
    );
}

// ===========================================================================
// 4. Complex values
// ===========================================================================

#[test]
fn complex_scalar_is_built_through_registered_constructor() {
    let mut lib = library();
    let mut realm = lib.new_realm();
    let address_ctor = realm.define_class("Address", None, None).unwrap();
    let address = Arc::new(
        TypeDescriptor::complex(
            "Address",
            vec![PropertyDescriptor::data("city").with_default("unknown")],
        )
        .unwrap(),
    );
    lib.install(&mut realm, address, Some(address_ctor), &context())
        .unwrap();

    let customer_ctor = realm.define_class("Customer", None, None).unwrap();
    let customer = Arc::new(
        TypeDescriptor::entity(
            "Customer",
            vec![
                PropertyDescriptor::complex("home", "Address"),
                PropertyDescriptor::complex_collection("previous", "Address"),
            ],
        )
        .unwrap(),
    );
    let registration = lib
        .install(&mut realm, customer, Some(customer_ctor), &context())
        .unwrap();
    let c = lib.create_instance(&mut realm, &registration, &context()).unwrap();

    let home = lib
        .get_property(&mut realm, c, "home")
        .unwrap()
        .as_object()
        .unwrap();
    assert_eq!(
        realm.heap().prototype_of(home).unwrap(),
        Some(realm.prototype_of_constructor(address_ctor).unwrap())
    );
    assert_eq!(
        lib.get_property(&mut realm, home, "city").unwrap(),
        Value::str("unknown")
    );
    let scope = realm.heap().ordinary(home).unwrap().scope.clone().unwrap();
    assert_eq!((scope.owner, scope.property.as_str()), (c, "home"));

    let previous = lib
        .get_property(&mut realm, c, "previous")
        .unwrap()
        .as_object()
        .unwrap();
    assert_eq!(
        realm.heap().collection(previous).unwrap().kind,
        CollectionKind::Complex
    );

    let back_ref = realm
        .heap()
        .get_own_property_descriptor(realm.prototype_of_constructor(address_ctor).unwrap(), "complexType")
        .unwrap();
    assert!(back_ref.is_some());
}

// ===========================================================================
// 5. Metadata and configuration inputs
// ===========================================================================

#[test]
fn unknown_kind_from_metadata_fails_tracking() {
    let mut lib = library();
    let mut realm = lib.new_realm();
    let ctor = realm.define_class("Legacy", None, None).unwrap();
    let descriptor = TypeDescriptor::from_json_str(
        r#"{
            "name": "Legacy",
            "structural_kind": "entity",
            "properties": [
                {"name": "id", "kind": "data", "scalar": true},
                {"name": "payload", "kind": "stream", "scalar": true}
            ]
        }"#,
    )
    .unwrap();
    assert_eq!(
        descriptor.property("payload").unwrap().kind,
        PropertyKind::Unknown
    );
    let registration = lib
        .install(&mut realm, Arc::new(descriptor), Some(ctor), &context())
        .unwrap();
    let err = lib
        .create_instance(&mut realm, &registration, &context())
        .unwrap_err();
    assert_eq!(err.stable_code(), "FE-TRACK-0001");
    assert!(matches!(err, TrackingError::Configuration { ref type_name, .. } if type_name == "Legacy"));
}

fn customer_with_home(
    lib: &mut ModelLibrary,
    realm: &mut Realm,
    address: TypeDescriptor,
    address_ctor: ObjectHandle,
) -> (ObjectHandle, Arc<TypeDescriptor>) {
    lib.install(realm, Arc::new(address), Some(address_ctor), &context())
        .unwrap();
    let ctor = realm.define_class("Customer", None, None).unwrap();
    let customer = Arc::new(
        TypeDescriptor::entity(
            "Customer",
            vec![
                PropertyDescriptor::data("id").with_default(7),
                PropertyDescriptor::complex("home", "Address"),
            ],
        )
        .unwrap(),
    );
    lib.install(realm, customer.clone(), Some(ctor), &context())
        .unwrap();
    (ctor, customer)
}

#[test]
fn unknown_kind_in_nested_complex_type_leaves_owner_untracked() {
    let mut lib = library();
    let mut realm = lib.new_realm();
    let address_ctor = realm.define_class("Address", None, None).unwrap();
    let address = TypeDescriptor::from_json_str(
        r#"{
            "name": "Address",
            "structural_kind": "complex",
            "properties": [
                {"name": "city", "kind": "data", "scalar": true},
                {"name": "zip", "kind": "postcode", "scalar": true}
            ]
        }"#,
    )
    .unwrap();
    let (ctor, customer) = customer_with_home(&mut lib, &mut realm, address, address_ctor);
    let names = lib.config().members.clone();

    let c = realm.construct(ctor).unwrap();
    let err = lib
        .start_tracking(&mut realm, c, &customer, &context())
        .unwrap_err();
    assert!(matches!(err, TrackingError::Configuration { ref type_name, .. } if type_name == "Address"));
    assert_eq!(backing_store_of(&realm, c, &names).unwrap(), None);
    assert!(!realm.heap().has_own(c, "id").unwrap());
}

#[test]
fn failed_complex_constructor_restores_the_owner() {
    let mut lib = library();
    let mut realm = lib.new_realm();
    let body = realm.register_native("Address", |_, _, _| {
        Err(TrackingError::invalid_operation("address service unavailable"))
    });
    let address_ctor = realm.define_class("Address", None, Some(body)).unwrap();
    let address = TypeDescriptor::complex("Address", vec![PropertyDescriptor::data("city")]).unwrap();
    let (ctor, customer) = customer_with_home(&mut lib, &mut realm, address, address_ctor);
    let names = lib.config().members.clone();

    let c = realm.construct(ctor).unwrap();
    realm
        .define_own(c, "id", MemberDescriptor::data(Value::Int(5)))
        .unwrap();
    let err = lib
        .start_tracking(&mut realm, c, &customer, &context())
        .unwrap_err();
    assert!(err.to_string().contains("address service unavailable"));
    assert_eq!(backing_store_of(&realm, c, &names).unwrap(), None);
    assert_eq!(realm.heap().own_data_value(c, "id").unwrap(), Some(Value::Int(5)));

    let events = lib.events().events();
    let last = events.last().unwrap();
    assert_eq!((last.event.as_str(), last.outcome.as_str()), ("start_tracking", "deny"));
}

#[test]
fn configured_member_names_are_used() {
    let config = ModelLibraryConfig::from_json_str(
        r#"{"members": {"reset": "__undo__", "backing_store": "_store"}}"#,
    )
    .unwrap();
    let mut lib = ModelLibrary::new(config, Rc::new(PassThroughInterceptor)).unwrap();
    let mut realm = lib.new_realm();
    let ctor = realm.define_class("Person", None, None).unwrap();
    let registration = lib
        .install(&mut realm, person_descriptor(), Some(ctor), &context())
        .unwrap();
    let p = lib.create_instance(&mut realm, &registration, &context()).unwrap();
    assert!(realm.heap().has_own(ctor, "__undo__").unwrap());
    assert!(realm.heap().has_own(p, "_store").unwrap());
    assert!(!realm.heap().has_own(p, "_backingStore").unwrap());
    lib.reset(&mut realm, ctor, &context()).unwrap();
    assert!(!realm.heap().has_own(ctor, "__undo__").unwrap());
}

#[test]
fn event_log_carries_trace_ids_and_round_trips() {
    let mut lib = library();
    let mut realm = lib.new_realm();
    let ctor = realm.define_class("Person", None, None).unwrap();
    let registration = lib
        .install(&mut realm, person_descriptor(), Some(ctor), &context())
        .unwrap();
    lib.create_instance(&mut realm, &registration, &TrackingContext::new("trace-other"))
        .unwrap();
    lib.reset(&mut realm, ctor, &context()).unwrap();

    let events = lib.events().events();
    assert_eq!(event_names(&events), vec!["install", "start_tracking", "reset"]);
    assert_eq!(events[1].trace_id, "trace-other");
    assert!(events.iter().all(|e| e.component == "model_library"));
    let json = serde_json::to_string(&events).unwrap();
    let back: Vec<TrackingEvent> = serde_json::from_str(&json).unwrap();
    assert_eq!(back, events);
}
