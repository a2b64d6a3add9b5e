//! Execution realm: heap, function table, constructors and the
//! `[[Get]]`/`[[Set]]` paths that invoke accessors.
//!
//! Accessors are realm functions referenced by [`FunctionId`]; a member
//! descriptor never owns code.  While a setter runs on an object that
//! object's shape is locked: defining or deleting own members on it fails
//! with [`ObjectError::ShapeLocked`] until the setter returns.  Writes that
//! need storage during that window go to a pending store
//! (see [`crate::backing_store`]).

use std::collections::BTreeMap;
use std::fmt;
use std::rc::Rc;

use crate::error::{TrackingError, TrackingResult};
use crate::interceptor::Interceptor;
use crate::object_model::{
    DEFAULT_MAX_PROTOTYPE_DEPTH, FunctionId, MemberDescriptor, ObjectError, ObjectHandle,
    ObjectHeap, OrdinaryObject, Value,
};
use crate::reset_registry::ResetRegistry;

/// Native function body: `(realm, this, args)`.
pub type NativeFn = Rc<dyn Fn(&mut Realm, ObjectHandle, &[Value]) -> TrackingResult<Value>>;

#[derive(Clone)]
pub enum Callable {
    Native { name: String, func: NativeFn },
    Interceptor(Rc<dyn Interceptor>),
}

impl fmt::Debug for Callable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Native { name, .. } => write!(f, "Native({name})"),
            Self::Interceptor(_) => write!(f, "Interceptor"),
        }
    }
}

#[derive(Debug)]
pub struct Realm {
    heap: ObjectHeap,
    functions: BTreeMap<FunctionId, Callable>,
    next_function: u32,
    locks: BTreeMap<ObjectHandle, u32>,
    resets: ResetRegistry,
    object_prototype: ObjectHandle,
    max_prototype_depth: u32,
}

impl Default for Realm {
    fn default() -> Self {
        Self::new()
    }
}

impl Realm {
    pub fn new() -> Self {
        Self::with_max_prototype_depth(DEFAULT_MAX_PROTOTYPE_DEPTH)
    }

    pub fn with_max_prototype_depth(max_prototype_depth: u32) -> Self {
        let (heap, object_prototype) = ObjectHeap::with_root(OrdinaryObject {
            class_tag: Some("Object".to_string()),
            ..OrdinaryObject::default()
        });
        Self {
            heap,
            functions: BTreeMap::new(),
            next_function: 0,
            locks: BTreeMap::new(),
            resets: ResetRegistry::default(),
            object_prototype,
            max_prototype_depth,
        }
    }

    pub fn heap(&self) -> &ObjectHeap {
        &self.heap
    }

    pub fn heap_mut(&mut self) -> &mut ObjectHeap {
        &mut self.heap
    }

    pub fn resets(&self) -> &ResetRegistry {
        &self.resets
    }

    pub fn resets_mut(&mut self) -> &mut ResetRegistry {
        &mut self.resets
    }

    /// Root of every class chain; carries no enumerable members.
    pub fn object_prototype(&self) -> ObjectHandle {
        self.object_prototype
    }

    pub fn max_prototype_depth(&self) -> u32 {
        self.max_prototype_depth
    }

    // -- Function table ------------------------------------------------------

    pub fn register_native<F>(&mut self, name: impl Into<String>, func: F) -> FunctionId
    where
        F: Fn(&mut Realm, ObjectHandle, &[Value]) -> TrackingResult<Value> + 'static,
    {
        self.register(Callable::Native {
            name: name.into(),
            func: Rc::new(func),
        })
    }

    pub fn register_interceptor(&mut self, interceptor: Rc<dyn Interceptor>) -> FunctionId {
        self.register(Callable::Interceptor(interceptor))
    }

    fn register(&mut self, callable: Callable) -> FunctionId {
        let id = FunctionId(self.next_function);
        self.next_function += 1;
        self.functions.insert(id, callable);
        id
    }

    pub fn release_function(&mut self, id: FunctionId) -> bool {
        self.functions.remove(&id).is_some()
    }

    pub fn function_count(&self) -> usize {
        self.functions.len()
    }

    pub fn callable(&self, id: FunctionId) -> TrackingResult<&Callable> {
        self.functions
            .get(&id)
            .ok_or(TrackingError::Object(ObjectError::FunctionNotFound(id)))
    }

    pub fn interceptor(&self, id: FunctionId) -> TrackingResult<Rc<dyn Interceptor>> {
        match self.callable(id)? {
            Callable::Interceptor(interceptor) => Ok(Rc::clone(interceptor)),
            Callable::Native { name, .. } => Err(TrackingError::invalid_operation(format!(
                "function `{name}` is not an interceptor"
            ))),
        }
    }

    /// Invoke a native function with `this` bound to `this`.
    pub fn call(&mut self, id: FunctionId, this: ObjectHandle, args: &[Value]) -> TrackingResult<Value> {
        let func = match self.callable(id)? {
            Callable::Native { func, .. } => Rc::clone(func),
            Callable::Interceptor(_) => {
                return Err(TrackingError::invalid_operation(
                    "an interceptor cannot be called as a function",
                ));
            }
        };
        func(self, this, args)
    }

    // -- Re-entrancy locks ---------------------------------------------------

    pub fn is_locked(&self, object: ObjectHandle) -> bool {
        self.locks.contains_key(&object)
    }

    /// Run `f` with `object`'s shape locked.
    pub fn with_lock<T>(
        &mut self,
        object: ObjectHandle,
        f: impl FnOnce(&mut Self) -> TrackingResult<T>,
    ) -> TrackingResult<T> {
        *self.locks.entry(object).or_insert(0) += 1;
        let result = f(self);
        if let Some(count) = self.locks.get_mut(&object) {
            *count -= 1;
            if *count == 0 {
                self.locks.remove(&object);
            }
        }
        result
    }

    // -- Member access -------------------------------------------------------

    pub fn lookup(
        &self,
        object: ObjectHandle,
        key: &str,
    ) -> TrackingResult<Option<(ObjectHandle, MemberDescriptor)>> {
        Ok(self.heap.lookup(object, key, self.max_prototype_depth)?)
    }

    pub fn has_property(&self, object: ObjectHandle, key: &str) -> TrackingResult<bool> {
        Ok(self.lookup(object, key)?.is_some())
    }

    /// `[[Get]]`: walks the chain and runs a getter with `this = object`.
    pub fn get(&mut self, object: ObjectHandle, key: &str) -> TrackingResult<Value> {
        match self.lookup(object, key)? {
            None => Ok(Value::Undefined),
            Some((_, MemberDescriptor::Data { value, .. })) => Ok(value),
            Some((_, MemberDescriptor::Accessor { get: Some(getter), .. })) => {
                self.call(getter, object, &[])
            }
            Some((_, MemberDescriptor::Accessor { get: None, .. })) => Ok(Value::Undefined),
        }
    }

    /// `[[Set]]`: runs an inherited or own setter with the receiver locked,
    /// updates an own data member, or adds one.
    pub fn set(&mut self, object: ObjectHandle, key: &str, value: Value) -> TrackingResult<()> {
        match self.lookup(object, key)? {
            Some((_, MemberDescriptor::Accessor { set: Some(setter), .. })) => {
                self.with_lock(object, |realm| {
                    realm.call(setter, object, &[value])?;
                    Ok(())
                })
            }
            Some((_, MemberDescriptor::Accessor { set: None, .. })) => {
                Err(ObjectError::TypeError(format!(
                    "cannot set property '{key}' which has only a getter"
                ))
                .into())
            }
            Some((_, MemberDescriptor::Data { writable: false, .. })) => Err(ObjectError::TypeError(
                format!("cannot assign to read-only property '{key}'"),
            )
            .into()),
            Some((level, MemberDescriptor::Data { .. })) if level == object => {
                self.heap.put_own_data(object, key, value)?;
                Ok(())
            }
            _ => self.define_own(object, key, MemberDescriptor::data(value)),
        }
    }

    /// Define an own member, honouring shape locks.
    pub fn define_own(
        &mut self,
        object: ObjectHandle,
        key: &str,
        desc: MemberDescriptor,
    ) -> TrackingResult<()> {
        if self.is_locked(object) {
            return Err(ObjectError::ShapeLocked(object).into());
        }
        if !self.heap.define_property(object, key, desc)? {
            return Err(ObjectError::TypeError(format!("cannot define property '{key}'")).into());
        }
        Ok(())
    }

    /// Delete an own member, honouring shape locks.
    pub fn delete_own(&mut self, object: ObjectHandle, key: &str) -> TrackingResult<bool> {
        if self.is_locked(object) {
            return Err(ObjectError::ShapeLocked(object).into());
        }
        Ok(self.heap.delete_property(object, key)?)
    }

    // -- Constructors --------------------------------------------------------

    /// Allocate an ordinary object whose prototype is the object prototype.
    pub fn alloc_plain(&mut self) -> TrackingResult<ObjectHandle> {
        let proto = self.object_prototype;
        Ok(self.heap.alloc(Some(proto))?)
    }

    /// Create a constructor and its prototype.  The prototype inherits from
    /// `parent`'s prototype, or from the object prototype.
    pub fn define_class(
        &mut self,
        name: &str,
        parent: Option<ObjectHandle>,
        body: Option<FunctionId>,
    ) -> TrackingResult<ObjectHandle> {
        let parent_proto = match parent {
            Some(parent) => self.prototype_of_constructor(parent)?,
            None => self.object_prototype,
        };
        let proto = self.heap.alloc_object(OrdinaryObject {
            prototype: Some(parent_proto),
            class_tag: Some(name.to_string()),
            ..OrdinaryObject::default()
        })?;
        let ctor = self.heap.alloc_object(OrdinaryObject {
            class_tag: Some(name.to_string()),
            construct_body: body,
            constructable: true,
            ..OrdinaryObject::default()
        })?;
        self.heap.define_property(
            ctor,
            "prototype",
            MemberDescriptor::Data {
                value: Value::Object(proto),
                writable: false,
                enumerable: false,
                configurable: false,
            },
        )?;
        self.heap
            .define_property(proto, "constructor", MemberDescriptor::hidden(Value::Object(ctor)))?;
        Ok(ctor)
    }

    pub fn prototype_of_constructor(&self, ctor: ObjectHandle) -> TrackingResult<ObjectHandle> {
        let obj = self.heap.ordinary(ctor)?;
        if !obj.constructable {
            return Err(ObjectError::TypeError(format!("object#{} is not a constructor", ctor.0)).into());
        }
        obj.get_own_property("prototype")
            .and_then(MemberDescriptor::value)
            .and_then(Value::as_object)
            .ok_or_else(|| {
                ObjectError::TypeError(format!("constructor object#{} has no prototype", ctor.0))
                    .into()
            })
    }

    /// Allocate an instance and run the constructor bodies of its class
    /// chain, base class first.
    pub fn construct(&mut self, ctor: ObjectHandle) -> TrackingResult<ObjectHandle> {
        let proto = self.prototype_of_constructor(ctor)?;
        let instance = self.heap.alloc(Some(proto))?;

        let mut bodies = Vec::new();
        for level in self.heap.chain(proto, self.max_prototype_depth)? {
            let owner = self
                .heap
                .own_data_value(level, "constructor")?
                .and_then(|v| v.as_object());
            if let Some(owner) = owner
                && let Some(body) = self.heap.ordinary(owner)?.construct_body
            {
                bodies.push(body);
            }
        }
        for body in bodies.into_iter().rev() {
            self.call(body, instance, &[])?;
        }
        Ok(instance)
    }
}
