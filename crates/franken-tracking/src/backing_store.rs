//! Per-instance backing stores and the pending stores that stand in for them
//! while an instance's shape is locked.
//!
//! A backing store is a prototype-less heap object referenced from the
//! instance's own backing-store member.  When a setter runs on an instance
//! that has no store yet, the instance cannot receive the member (its shape
//! is locked by the running setter), so the write lands in a pending store
//! recorded on the prototype's pending list.  The next
//! [`get_backing_store`] for any instance of that prototype promotes every
//! unlocked pending entry exactly once.

use crate::config::MemberNames;
use crate::error::{TrackingError, TrackingResult};
use crate::object_model::{MemberDescriptor, ObjectHandle, PendingEntry, Value};
use crate::realm::Realm;

/// The instance's own backing store, if it has one.
pub fn backing_store_of(
    realm: &Realm,
    instance: ObjectHandle,
    names: &MemberNames,
) -> TrackingResult<Option<ObjectHandle>> {
    Ok(realm
        .heap()
        .own_data_value(instance, &names.backing_store)?
        .and_then(|v| v.as_object()))
}

/// Pending list reachable from `level` (own or inherited).
pub fn pending_list_of(
    realm: &Realm,
    level: ObjectHandle,
    names: &MemberNames,
) -> TrackingResult<Option<ObjectHandle>> {
    Ok(realm
        .lookup(level, &names.pending_stores)?
        .and_then(|(_, desc)| desc.value().and_then(Value::as_object)))
}

/// Promote pending stores, then return the instance's store, creating an
/// empty one if absent.
pub fn get_backing_store(
    realm: &mut Realm,
    instance: ObjectHandle,
    names: &MemberNames,
) -> TrackingResult<ObjectHandle> {
    if let Some(proto) = realm.heap().prototype_of(instance)? {
        process_pending_stores(realm, proto, names)?;
    }
    if let Some(store) = backing_store_of(realm, instance, names)? {
        return Ok(store);
    }
    let store = realm.heap_mut().alloc(None)?;
    realm.define_own(
        instance,
        &names.backing_store,
        MemberDescriptor::data(Value::Object(store)),
    )?;
    Ok(store)
}

/// Pending store for `instance`, recording a new entry on first use.
pub fn get_pending_backing_store(
    realm: &mut Realm,
    instance: ObjectHandle,
    names: &MemberNames,
) -> TrackingResult<ObjectHandle> {
    let list = registered_pending_list(realm, instance, names)?;
    if let Some(entry) = realm.heap().pending_stores(list)?.find(instance) {
        return Ok(entry.backing_store);
    }
    let store = realm.heap_mut().alloc(None)?;
    realm
        .heap_mut()
        .pending_stores_mut(list)?
        .entries
        .push(PendingEntry {
            entity: instance,
            backing_store: store,
        });
    Ok(store)
}

/// Pending store for `instance` without creating one.
pub fn peek_pending_store(
    realm: &Realm,
    instance: ObjectHandle,
    names: &MemberNames,
) -> TrackingResult<Option<ObjectHandle>> {
    let Some(proto) = realm.heap().prototype_of(instance)? else {
        return Ok(None);
    };
    let Some(list) = pending_list_of(realm, proto, names)? else {
        return Ok(None);
    };
    Ok(realm
        .heap()
        .pending_stores(list)?
        .find(instance)
        .map(|entry| entry.backing_store))
}

fn registered_pending_list(
    realm: &Realm,
    instance: ObjectHandle,
    names: &MemberNames,
) -> TrackingResult<ObjectHandle> {
    let proto = realm.heap().prototype_of(instance)?;
    let list = match proto {
        Some(proto) => pending_list_of(realm, proto, names)?,
        None => None,
    };
    list.ok_or_else(|| {
        TrackingError::invalid_operation(format!(
            "{instance} does not belong to a registered type"
        ))
    })
}

/// Assign every pending store reachable from `level` to its instance and
/// clear the list.  Entries whose instance is locked stay pending.  Returns
/// the number of promoted entries.
pub fn process_pending_stores(
    realm: &mut Realm,
    level: ObjectHandle,
    names: &MemberNames,
) -> TrackingResult<usize> {
    let Some(list) = pending_list_of(realm, level, names)? else {
        return Ok(0);
    };
    if realm.heap().pending_stores(list)?.is_empty() {
        return Ok(0);
    }
    let entries = std::mem::take(&mut realm.heap_mut().pending_stores_mut(list)?.entries);

    let mut remaining = Vec::new();
    let mut promoted = 0;
    let mut failure = None;
    for entry in entries {
        if failure.is_some() || realm.is_locked(entry.entity) {
            remaining.push(entry);
            continue;
        }
        match realm.define_own(
            entry.entity,
            &names.backing_store,
            MemberDescriptor::data(Value::Object(entry.backing_store)),
        ) {
            Ok(()) => promoted += 1,
            Err(err) => {
                remaining.push(entry);
                failure = Some(err);
            }
        }
    }
    realm.heap_mut().pending_stores_mut(list)?.entries = remaining;
    match failure {
        Some(err) => Err(err),
        None => Ok(promoted),
    }
}

/// Store a setter writes to: the real store, else the pending one.
pub fn store_for_write(
    realm: &mut Realm,
    instance: ObjectHandle,
    names: &MemberNames,
) -> TrackingResult<ObjectHandle> {
    match backing_store_of(realm, instance, names)? {
        Some(store) => Ok(store),
        None => get_pending_backing_store(realm, instance, names),
    }
}

/// Value a getter returns.  A locked instance without a real store reads
/// its pending store.
pub fn read_property(
    realm: &mut Realm,
    instance: ObjectHandle,
    name: &str,
    names: &MemberNames,
) -> TrackingResult<Value> {
    let store = match backing_store_of(realm, instance, names)? {
        Some(store) => store,
        None if realm.is_locked(instance) => match peek_pending_store(realm, instance, names)? {
            Some(store) => store,
            None => return Ok(Value::Undefined),
        },
        None => get_backing_store(realm, instance, names)?,
    };
    Ok(realm.heap().own_data_value(store, name)?.unwrap_or_default())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::object_model::ObjectError;

    fn registered_instance(realm: &mut Realm, names: &MemberNames) -> (ObjectHandle, ObjectHandle) {
        let ctor = realm.define_class("Widget", None, None).unwrap();
        let proto = realm.prototype_of_constructor(ctor).unwrap();
        let list = realm.heap_mut().alloc_pending_stores().unwrap();
        realm
            .define_own(proto, &names.pending_stores, MemberDescriptor::data(Value::Object(list)))
            .unwrap();
        (proto, realm.construct(ctor).unwrap())
    }

    #[test]
    fn backing_store_created_once() {
        let mut realm = Realm::new();
        let names = MemberNames::default();
        let (_, w) = registered_instance(&mut realm, &names);
        assert_eq!(backing_store_of(&realm, w, &names).unwrap(), None);
        let a = get_backing_store(&mut realm, w, &names).unwrap();
        let b = get_backing_store(&mut realm, w, &names).unwrap();
        assert_eq!(a, b);
        assert_eq!(backing_store_of(&realm, w, &names).unwrap(), Some(a));
        assert_eq!(realm.heap().prototype_of(a).unwrap(), None);
    }

    #[test]
    fn pending_store_reused_per_instance() {
        let mut realm = Realm::new();
        let names = MemberNames::default();
        let (_, w) = registered_instance(&mut realm, &names);
        let a = get_pending_backing_store(&mut realm, w, &names).unwrap();
        let b = get_pending_backing_store(&mut realm, w, &names).unwrap();
        assert_eq!(a, b);
        assert_eq!(peek_pending_store(&realm, w, &names).unwrap(), Some(a));
    }

    #[test]
    fn pending_store_promoted_exactly_once() {
        let mut realm = Realm::new();
        let names = MemberNames::default();
        let (proto, w) = registered_instance(&mut realm, &names);
        let pending = get_pending_backing_store(&mut realm, w, &names).unwrap();
        realm
            .heap_mut()
            .put_own_data(pending, "name", Value::str("early"))
            .unwrap();

        assert_eq!(process_pending_stores(&mut realm, proto, &names).unwrap(), 1);
        assert_eq!(process_pending_stores(&mut realm, proto, &names).unwrap(), 0);
        assert_eq!(backing_store_of(&realm, w, &names).unwrap(), Some(pending));
        assert_eq!(
            read_property(&mut realm, w, "name", &names).unwrap(),
            Value::str("early")
        );
    }

    #[test]
    fn locked_instance_stays_pending() {
        let mut realm = Realm::new();
        let names = MemberNames::default();
        let (proto, w) = registered_instance(&mut realm, &names);
        let pending = get_pending_backing_store(&mut realm, w, &names).unwrap();
        let promoted = realm
            .with_lock(w, |realm| {
                let n = process_pending_stores(realm, proto, &names)?;
                realm.heap_mut().put_own_data(pending, "id", Value::Int(4))?;
                assert_eq!(read_property(realm, w, "id", &names)?, Value::Int(4));
                Ok(n)
            })
            .unwrap();
        assert_eq!(promoted, 0);
        assert_eq!(get_backing_store(&mut realm, w, &names).unwrap(), pending);
    }

    #[test]
    fn locked_instance_cannot_receive_store() {
        let mut realm = Realm::new();
        let names = MemberNames::default();
        let (_, w) = registered_instance(&mut realm, &names);
        let err = realm
            .with_lock(w, |realm| get_backing_store(realm, w, &names))
            .unwrap_err();
        assert_eq!(err, TrackingError::Object(ObjectError::ShapeLocked(w)));
    }

    #[test]
    fn pending_store_requires_registration() {
        let mut realm = Realm::new();
        let names = MemberNames::default();
        let plain = realm.alloc_plain().unwrap();
        let err = get_pending_backing_store(&mut realm, plain, &names).unwrap_err();
        assert_eq!(err.stable_code(), "FE-TRACK-0002");
    }

    #[test]
    fn store_for_write_prefers_real_store() {
        let mut realm = Realm::new();
        let names = MemberNames::default();
        let (_, w) = registered_instance(&mut realm, &names);
        let real = get_backing_store(&mut realm, w, &names).unwrap();
        assert_eq!(store_for_write(&mut realm, w, &names).unwrap(), real);
        assert_eq!(peek_pending_store(&realm, w, &names).unwrap(), None);
    }
}
