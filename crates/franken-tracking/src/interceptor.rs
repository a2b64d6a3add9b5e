//! Interception contract invoked on every tracked write.
//!
//! An [`Interceptor`] receives the property being written, the new value and
//! a [`RawAccess`] handle.  `RawAccess::get`/`RawAccess::set` reach the
//! underlying storage directly: the instance's backing store (or its pending
//! store) for instance-level wraps, the original inherited getter/setter for
//! prototype-level wraps, or the eagerly allocated field of an
//! [`EntityRecord`](crate::entity_record::EntityRecord).  The interceptor
//! decides whether, how and when the value is applied.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::TrackingResult;
use crate::metadata::PropertyDescriptor;
use crate::object_model::{FunctionId, ObjectHandle, Value};
use crate::realm::Realm;

/// Identity of the instance a write targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum OwnerId {
    Object(ObjectHandle),
    Record(u64),
}

impl fmt::Display for OwnerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Object(h) => write!(f, "object#{}", h.0),
            Self::Record(id) => write!(f, "record#{id}"),
        }
    }
}

pub trait RawAccess {
    fn owner(&self) -> OwnerId;
    fn get(&mut self) -> TrackingResult<Value>;
    fn set(&mut self, value: Value) -> TrackingResult<()>;
}

pub trait Interceptor {
    fn intercept(
        &self,
        property: &PropertyDescriptor,
        value: Value,
        raw: &mut dyn RawAccess,
    ) -> TrackingResult<()>;
}

// ---------------------------------------------------------------------------
// Raw accessors
// ---------------------------------------------------------------------------

/// Reads and writes one member of a backing (or pending) store.
pub struct StoreAccessor<'r> {
    realm: &'r mut Realm,
    owner: ObjectHandle,
    store: ObjectHandle,
    name: &'r str,
}

impl<'r> StoreAccessor<'r> {
    pub fn new(realm: &'r mut Realm, owner: ObjectHandle, store: ObjectHandle, name: &'r str) -> Self {
        Self {
            realm,
            owner,
            store,
            name,
        }
    }
}

impl RawAccess for StoreAccessor<'_> {
    fn owner(&self) -> OwnerId {
        OwnerId::Object(self.owner)
    }

    fn get(&mut self) -> TrackingResult<Value> {
        Ok(self
            .realm
            .heap()
            .own_data_value(self.store, self.name)?
            .unwrap_or_default())
    }

    fn set(&mut self, value: Value) -> TrackingResult<()> {
        self.realm
            .heap_mut()
            .put_own_data(self.store, self.name, value)?;
        Ok(())
    }
}

/// Delegates to the getter/setter pair captured from a wrapped ancestor.
pub struct InheritedAccessor<'r> {
    realm: &'r mut Realm,
    owner: ObjectHandle,
    getter: Option<FunctionId>,
    setter: FunctionId,
}

impl<'r> InheritedAccessor<'r> {
    pub fn new(
        realm: &'r mut Realm,
        owner: ObjectHandle,
        getter: Option<FunctionId>,
        setter: FunctionId,
    ) -> Self {
        Self {
            realm,
            owner,
            getter,
            setter,
        }
    }
}

impl RawAccess for InheritedAccessor<'_> {
    fn owner(&self) -> OwnerId {
        OwnerId::Object(self.owner)
    }

    fn get(&mut self) -> TrackingResult<Value> {
        match self.getter {
            Some(getter) => self.realm.call(getter, self.owner, &[]),
            None => Ok(Value::Undefined),
        }
    }

    fn set(&mut self, value: Value) -> TrackingResult<()> {
        self.realm.call(self.setter, self.owner, &[value])?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Stock interceptors
// ---------------------------------------------------------------------------

/// Applies every write unchanged.
#[derive(Debug, Clone, Copy, Default)]
pub struct PassThroughInterceptor;

impl Interceptor for PassThroughInterceptor {
    fn intercept(
        &self,
        _property: &PropertyDescriptor,
        value: Value,
        raw: &mut dyn RawAccess,
    ) -> TrackingResult<()> {
        raw.set(value)
    }
}

/// Adapts a closure into an [`Interceptor`].
pub struct FnInterceptor<F>(pub F);

impl<F> Interceptor for FnInterceptor<F>
where
    F: Fn(&PropertyDescriptor, Value, &mut dyn RawAccess) -> TrackingResult<()>,
{
    fn intercept(
        &self,
        property: &PropertyDescriptor,
        value: Value,
        raw: &mut dyn RawAccess,
    ) -> TrackingResult<()> {
        (self.0)(property, value, raw)
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;

    use super::*;
    use crate::error::TrackingError;

    #[test]
    fn store_accessor_reads_and_writes_store() {
        let mut realm = Realm::new();
        let owner = realm.heap_mut().alloc(None).unwrap();
        let store = realm.heap_mut().alloc(None).unwrap();
        let mut raw = StoreAccessor::new(&mut realm, owner, store, "name");
        assert_eq!(raw.get().unwrap(), Value::Undefined);
        raw.set(Value::str("a")).unwrap();
        assert_eq!(raw.get().unwrap(), Value::str("a"));
        assert_eq!(raw.owner(), OwnerId::Object(owner));
    }

    #[test]
    fn pass_through_applies_value() {
        let mut realm = Realm::new();
        let owner = realm.heap_mut().alloc(None).unwrap();
        let store = realm.heap_mut().alloc(None).unwrap();
        let prop = PropertyDescriptor::data("id");
        let mut raw = StoreAccessor::new(&mut realm, owner, store, "id");
        PassThroughInterceptor
            .intercept(&prop, Value::Int(5), &mut raw)
            .unwrap();
        assert_eq!(
            realm.heap().own_data_value(store, "id").unwrap(),
            Some(Value::Int(5))
        );
    }

    #[test]
    fn fn_interceptor_can_veto() {
        let seen = RefCell::new(Vec::new());
        let veto = FnInterceptor(|prop: &PropertyDescriptor, value: Value, _raw: &mut dyn RawAccess| {
            seen.borrow_mut().push((prop.name.clone(), value));
            Err(TrackingError::invalid_operation("read-only in this test"))
        });
        let mut realm = Realm::new();
        let owner = realm.heap_mut().alloc(None).unwrap();
        let store = realm.heap_mut().alloc(None).unwrap();
        let prop = PropertyDescriptor::data("id");
        let mut raw = StoreAccessor::new(&mut realm, owner, store, "id");
        assert!(veto.intercept(&prop, Value::Int(1), &mut raw).is_err());
        assert_eq!(seen.borrow().len(), 1);
        assert_eq!(realm.heap().own_data_value(store, "id").unwrap(), None);
    }

    #[test]
    fn owner_id_display() {
        assert_eq!(OwnerId::Object(ObjectHandle(3)).to_string(), "object#3");
        assert_eq!(OwnerId::Record(7).to_string(), "record#7");
    }
}
