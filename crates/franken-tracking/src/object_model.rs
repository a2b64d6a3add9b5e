//! Deterministic object model with member descriptors and prototype chains.
//!
//! This is the host substrate the model library rewrites.  Key features:
//!
//! - **Member descriptors**: data vs accessor, configurable/enumerable/writable
//! - **Prototype chains**: every ordinary object carries a `[[Prototype]]`
//!   slot; chains are walked with cycle and depth guards
//! - **Observed collections**: ordered value lists scoped to an owner and a
//!   property, used for collection-valued properties
//! - **Pending store lists**: per-level lists of `(instance, store)` pairs
//! - **Level snapshots**: own enumerable members of one level, fingerprinted
//!   with SHA-256 so instrumentation round-trips can be compared
//!
//! `BTreeMap`/`BTreeSet` for deterministic ordering.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Default maximum prototype chain depth.
pub const DEFAULT_MAX_PROTOTYPE_DEPTH: u32 = 1024;

// ---------------------------------------------------------------------------
// Handles
// ---------------------------------------------------------------------------

/// Opaque handle referencing an object on the managed heap.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ObjectHandle(pub u32);

impl fmt::Display for ObjectHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "object#{}", self.0)
    }
}

/// Opaque handle referencing an entry in the realm's function table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct FunctionId(pub u32);

// ---------------------------------------------------------------------------
// Value
// ---------------------------------------------------------------------------

/// Runtime value stored in members, backing stores and collections.
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Value {
    #[default]
    Undefined,
    Null,
    Bool(bool),
    Int(i64),
    Str(String),
    Object(ObjectHandle),
    Function(FunctionId),
}

impl Value {
    pub fn str(s: impl Into<String>) -> Self {
        Self::Str(s.into())
    }

    pub fn is_undefined(&self) -> bool {
        matches!(self, Self::Undefined)
    }

    pub fn is_function(&self) -> bool {
        matches!(self, Self::Function(_))
    }

    pub fn as_object(&self) -> Option<ObjectHandle> {
        match self {
            Self::Object(h) => Some(*h),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Undefined => "undefined",
            Self::Null => "null",
            Self::Bool(_) => "boolean",
            Self::Int(_) => "number",
            Self::Str(_) => "string",
            Self::Object(_) => "object",
            Self::Function(_) => "function",
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Undefined => write!(f, "undefined"),
            Self::Null => write!(f, "null"),
            Self::Bool(b) => write!(f, "{b}"),
            Self::Int(n) => write!(f, "{n}"),
            Self::Str(s) => write!(f, "{s}"),
            Self::Object(h) => write!(f, "[object#{}]", h.0),
            Self::Function(id) => write!(f, "[function#{}]", id.0),
        }
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Self::Int(n)
    }
}

impl From<i32> for Value {
    fn from(n: i32) -> Self {
        Self::Int(i64::from(n))
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Self::Str(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Self::Str(s)
    }
}

// ---------------------------------------------------------------------------
// MemberDescriptor
// ---------------------------------------------------------------------------

/// Own-member descriptor: data or accessor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum MemberDescriptor {
    /// Data member: has `value` and `writable`.
    Data {
        value: Value,
        writable: bool,
        enumerable: bool,
        configurable: bool,
    },
    /// Accessor member: has `get` and/or `set`.
    Accessor {
        get: Option<FunctionId>,
        set: Option<FunctionId>,
        enumerable: bool,
        configurable: bool,
    },
}

impl MemberDescriptor {
    /// Writable, enumerable, configurable data member (plain assignment).
    pub fn data(value: Value) -> Self {
        Self::Data {
            value,
            writable: true,
            enumerable: true,
            configurable: true,
        }
    }

    /// Writable, configurable, non-enumerable data member.
    pub fn hidden(value: Value) -> Self {
        Self::Data {
            value,
            writable: true,
            enumerable: false,
            configurable: true,
        }
    }

    /// Non-writable, non-enumerable, non-configurable data member.
    pub fn data_frozen(value: Value) -> Self {
        Self::Data {
            value,
            writable: false,
            enumerable: false,
            configurable: false,
        }
    }

    /// Configurable accessor member.
    pub fn accessor(get: Option<FunctionId>, set: Option<FunctionId>, enumerable: bool) -> Self {
        Self::Accessor {
            get,
            set,
            enumerable,
            configurable: true,
        }
    }

    pub fn is_configurable(&self) -> bool {
        match self {
            Self::Data { configurable, .. } | Self::Accessor { configurable, .. } => *configurable,
        }
    }

    pub fn is_enumerable(&self) -> bool {
        match self {
            Self::Data { enumerable, .. } | Self::Accessor { enumerable, .. } => *enumerable,
        }
    }

    pub fn is_data(&self) -> bool {
        matches!(self, Self::Data { .. })
    }

    pub fn is_accessor(&self) -> bool {
        matches!(self, Self::Accessor { .. })
    }

    /// Get the value if this is a data member.
    pub fn value(&self) -> Option<&Value> {
        match self {
            Self::Data { value, .. } => Some(value),
            Self::Accessor { .. } => None,
        }
    }

    pub fn is_writable(&self) -> bool {
        match self {
            Self::Data { writable, .. } => *writable,
            Self::Accessor { .. } => false,
        }
    }

    pub fn getter(&self) -> Option<FunctionId> {
        match self {
            Self::Accessor { get, .. } => *get,
            Self::Data { .. } => None,
        }
    }

    pub fn setter(&self) -> Option<FunctionId> {
        match self {
            Self::Accessor { set, .. } => *set,
            Self::Data { .. } => None,
        }
    }

    pub fn set_non_configurable(&mut self) {
        match self {
            Self::Data { configurable, .. } | Self::Accessor { configurable, .. } => {
                *configurable = false;
            }
        }
    }

    pub fn set_non_writable(&mut self) {
        if let Self::Data { writable, .. } = self {
            *writable = false;
        }
    }
}

// ---------------------------------------------------------------------------
// ObjectError
// ---------------------------------------------------------------------------

/// Errors from object model operations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ObjectError {
    /// TypeError raised by a rejected operation.
    TypeError(String),
    /// Object not found in the heap.
    ObjectNotFound(ObjectHandle),
    /// Operation requires an ordinary object.
    NotOrdinary(ObjectHandle),
    /// Function not found in the realm's function table.
    FunctionNotFound(FunctionId),
    /// An accessor is executing on this object; its shape cannot change.
    ShapeLocked(ObjectHandle),
    /// Prototype chain cycle detected.
    PrototypeCycleDetected,
    /// Maximum prototype chain depth exceeded.
    PrototypeChainTooDeep { depth: u32, max: u32 },
    /// No handle is left for a new object.
    HeapExhausted { limit: u32 },
}

impl fmt::Display for ObjectError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TypeError(msg) => write!(f, "TypeError: {msg}"),
            Self::ObjectNotFound(h) => write!(f, "object#{} not found", h.0),
            Self::NotOrdinary(h) => write!(f, "object#{} is not an ordinary object", h.0),
            Self::FunctionNotFound(id) => write!(f, "function#{} not found", id.0),
            Self::ShapeLocked(h) => write!(
                f,
                "TypeError: object#{} cannot change shape while its accessor is executing",
                h.0
            ),
            Self::PrototypeCycleDetected => write!(f, "TypeError: prototype chain cycle detected"),
            Self::HeapExhausted { limit } => write!(f, "heap exhausted after {limit} objects"),
            Self::PrototypeChainTooDeep { depth, max } => {
                write!(
                    f,
                    "TypeError: prototype chain depth {depth} exceeds max {max}"
                )
            }
        }
    }
}

impl std::error::Error for ObjectError {}

// ---------------------------------------------------------------------------
// OrdinaryObject
// ---------------------------------------------------------------------------

/// Owner and property a seeded value is scoped to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValueScope {
    pub owner: ObjectHandle,
    pub property: String,
}

/// An ordinary object with internal slots.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrdinaryObject {
    /// `[[Prototype]]` internal slot (None means end of chain).
    pub prototype: Option<ObjectHandle>,
    /// `[[Extensible]]` internal slot.
    pub extensible: bool,
    /// Own members keyed by name.
    pub properties: BTreeMap<String, MemberDescriptor>,
    /// Class name for constructors and their prototypes.
    pub class_tag: Option<String>,
    /// Constructor body, run by `Realm::construct`.
    pub construct_body: Option<FunctionId>,
    /// Is this object a constructor?
    pub constructable: bool,
    /// Set on complex-value instances seeded for an owning entity.
    pub scope: Option<ValueScope>,
}

impl Default for OrdinaryObject {
    fn default() -> Self {
        Self {
            prototype: None,
            extensible: true,
            properties: BTreeMap::new(),
            class_tag: None,
            construct_body: None,
            constructable: false,
            scope: None,
        }
    }
}

impl OrdinaryObject {
    pub fn with_prototype(proto: Option<ObjectHandle>) -> Self {
        Self {
            prototype: proto,
            ..Self::default()
        }
    }

    pub fn get_own_property(&self, key: &str) -> Option<&MemberDescriptor> {
        self.properties.get(key)
    }

    pub fn has_own_property(&self, key: &str) -> bool {
        self.properties.contains_key(key)
    }

    /// Define or update an own member.
    ///
    /// Returns `false` if rejected (non-configurable conflict or a new member
    /// on a non-extensible object).
    pub fn define_own_property(&mut self, key: &str, desc: MemberDescriptor) -> bool {
        if let Some(current) = self.properties.get(key) {
            if !current.is_configurable() {
                if desc.is_configurable() || desc.is_enumerable() != current.is_enumerable() {
                    return false;
                }
                if current.is_data() != desc.is_data() {
                    return false;
                }
                if let (
                    MemberDescriptor::Data {
                        writable: current_w,
                        value: current_v,
                        ..
                    },
                    MemberDescriptor::Data {
                        writable: new_w,
                        value: new_v,
                        ..
                    },
                ) = (current, &desc)
                    && !current_w
                    && (*new_w || current_v != new_v)
                {
                    return false;
                }
                if current.is_accessor()
                    && (current.getter() != desc.getter() || current.setter() != desc.setter())
                {
                    return false;
                }
            }
            self.properties.insert(key.to_string(), desc);
            true
        } else {
            if !self.extensible {
                return false;
            }
            self.properties.insert(key.to_string(), desc);
            true
        }
    }

    /// Delete an own member. Returns `false` if non-configurable.
    pub fn delete(&mut self, key: &str) -> bool {
        match self.properties.get(key) {
            Some(desc) if !desc.is_configurable() => false,
            Some(_) => {
                self.properties.remove(key);
                true
            }
            None => true,
        }
    }

    pub fn own_keys(&self) -> Vec<String> {
        self.properties.keys().cloned().collect()
    }

    pub fn own_enumerable_keys(&self) -> Vec<String> {
        self.properties
            .iter()
            .filter(|(_, d)| d.is_enumerable())
            .map(|(k, _)| k.clone())
            .collect()
    }

    pub fn prevent_extensions(&mut self) {
        self.extensible = false;
    }

    /// Make all own members non-configurable and data members non-writable.
    pub fn freeze(&mut self) {
        self.extensible = false;
        for desc in self.properties.values_mut() {
            desc.set_non_configurable();
            desc.set_non_writable();
        }
    }
}

// ---------------------------------------------------------------------------
// ObservedCollection
// ---------------------------------------------------------------------------

/// What an observed collection holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CollectionKind {
    /// Primitive values of a non-scalar data property.
    Primitive,
    /// Complex-value instances of a non-scalar complex property.
    Complex,
    /// Related entities of a collection navigation property.
    Relation,
}

impl fmt::Display for CollectionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Primitive => "primitive",
            Self::Complex => "complex",
            Self::Relation => "relation",
        };
        f.write_str(name)
    }
}

/// Ordered collection scoped to an owning instance and property.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObservedCollection {
    pub kind: CollectionKind,
    pub scope: ValueScope,
    pub items: Vec<Value>,
}

impl ObservedCollection {
    pub fn new(kind: CollectionKind, owner: ObjectHandle, property: impl Into<String>) -> Self {
        Self {
            kind,
            scope: ValueScope {
                owner,
                property: property.into(),
            },
            items: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn push(&mut self, value: Value) {
        self.items.push(value);
    }
}

// ---------------------------------------------------------------------------
// PendingStoreList
// ---------------------------------------------------------------------------

/// A store created for an instance before it could receive its own.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingEntry {
    pub entity: ObjectHandle,
    pub backing_store: ObjectHandle,
}

/// Per-level list of pending entries; at most one entry per instance.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingStoreList {
    pub entries: Vec<PendingEntry>,
}

impl PendingStoreList {
    pub fn find(&self, entity: ObjectHandle) -> Option<&PendingEntry> {
        self.entries.iter().find(|e| e.entity == entity)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

// ---------------------------------------------------------------------------
// ManagedObject
// ---------------------------------------------------------------------------

/// A managed heap object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ManagedObject {
    Ordinary(OrdinaryObject),
    Collection(ObservedCollection),
    PendingStores(PendingStoreList),
}

impl ManagedObject {
    pub fn as_ordinary(&self) -> Option<&OrdinaryObject> {
        match self {
            Self::Ordinary(o) => Some(o),
            _ => None,
        }
    }

    pub fn as_ordinary_mut(&mut self) -> Option<&mut OrdinaryObject> {
        match self {
            Self::Ordinary(o) => Some(o),
            _ => None,
        }
    }

    pub fn as_collection(&self) -> Option<&ObservedCollection> {
        match self {
            Self::Collection(c) => Some(c),
            _ => None,
        }
    }

    pub fn as_collection_mut(&mut self) -> Option<&mut ObservedCollection> {
        match self {
            Self::Collection(c) => Some(c),
            _ => None,
        }
    }

    pub fn as_pending_stores(&self) -> Option<&PendingStoreList> {
        match self {
            Self::PendingStores(p) => Some(p),
            _ => None,
        }
    }

    pub fn as_pending_stores_mut(&mut self) -> Option<&mut PendingStoreList> {
        match self {
            Self::PendingStores(p) => Some(p),
            _ => None,
        }
    }
}

// ---------------------------------------------------------------------------
// LevelSnapshot
// ---------------------------------------------------------------------------

/// Own enumerable members of one level, in key order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LevelSnapshot {
    pub level: ObjectHandle,
    pub members: BTreeMap<String, MemberDescriptor>,
}

impl LevelSnapshot {
    /// SHA-256 over the canonical JSON of the snapshot, hex encoded.
    pub fn fingerprint(&self) -> String {
        let bytes = serde_json::to_vec(self).unwrap_or_default();
        let digest = Sha256::digest(&bytes);
        digest.iter().map(|b| format!("{b:02x}")).collect()
    }
}

// ---------------------------------------------------------------------------
// ObjectHeap
// ---------------------------------------------------------------------------

fn default_object_limit() -> u32 {
    u32::MAX
}

/// Arena of managed objects.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectHeap {
    objects: Vec<ManagedObject>,
    /// Handles are `u32`; allocation fails once this many objects exist.
    #[serde(default = "default_object_limit")]
    object_limit: u32,
}

impl Default for ObjectHeap {
    fn default() -> Self {
        Self::new()
    }
}

impl ObjectHeap {
    pub fn new() -> Self {
        Self::with_object_limit(default_object_limit())
    }

    pub fn with_object_limit(object_limit: u32) -> Self {
        Self {
            objects: Vec::new(),
            object_limit,
        }
    }

    /// A heap whose first object, handle 0, is `root`.
    pub fn with_root(root: OrdinaryObject) -> (Self, ObjectHandle) {
        let mut heap = Self::new();
        heap.objects.push(ManagedObject::Ordinary(root));
        (heap, ObjectHandle(0))
    }

    /// Allocate a new ordinary object with the given prototype.
    pub fn alloc(&mut self, proto: Option<ObjectHandle>) -> Result<ObjectHandle, ObjectError> {
        self.alloc_object(OrdinaryObject::with_prototype(proto))
    }

    pub fn alloc_object(&mut self, object: OrdinaryObject) -> Result<ObjectHandle, ObjectError> {
        self.push(ManagedObject::Ordinary(object))
    }

    pub fn alloc_collection(
        &mut self,
        collection: ObservedCollection,
    ) -> Result<ObjectHandle, ObjectError> {
        self.push(ManagedObject::Collection(collection))
    }

    pub fn alloc_pending_stores(&mut self) -> Result<ObjectHandle, ObjectError> {
        self.push(ManagedObject::PendingStores(PendingStoreList::default()))
    }

    fn push(&mut self, object: ManagedObject) -> Result<ObjectHandle, ObjectError> {
        let index = u32::try_from(self.objects.len())
            .ok()
            .filter(|index| *index < self.object_limit)
            .ok_or(ObjectError::HeapExhausted {
                limit: self.object_limit,
            })?;
        self.objects.push(object);
        Ok(ObjectHandle(index))
    }

    pub fn get(&self, handle: ObjectHandle) -> Result<&ManagedObject, ObjectError> {
        self.objects
            .get(handle.0 as usize)
            .ok_or(ObjectError::ObjectNotFound(handle))
    }

    pub fn get_mut(&mut self, handle: ObjectHandle) -> Result<&mut ManagedObject, ObjectError> {
        self.objects
            .get_mut(handle.0 as usize)
            .ok_or(ObjectError::ObjectNotFound(handle))
    }

    pub fn ordinary(&self, handle: ObjectHandle) -> Result<&OrdinaryObject, ObjectError> {
        self.get(handle)?
            .as_ordinary()
            .ok_or(ObjectError::NotOrdinary(handle))
    }

    pub fn ordinary_mut(&mut self, handle: ObjectHandle) -> Result<&mut OrdinaryObject, ObjectError> {
        self.get_mut(handle)?
            .as_ordinary_mut()
            .ok_or(ObjectError::NotOrdinary(handle))
    }

    pub fn collection(&self, handle: ObjectHandle) -> Result<&ObservedCollection, ObjectError> {
        self.get(handle)?.as_collection().ok_or_else(|| {
            ObjectError::TypeError(format!("object#{} is not a collection", handle.0))
        })
    }

    pub fn collection_mut(
        &mut self,
        handle: ObjectHandle,
    ) -> Result<&mut ObservedCollection, ObjectError> {
        self.get_mut(handle)?.as_collection_mut().ok_or_else(|| {
            ObjectError::TypeError(format!("object#{} is not a collection", handle.0))
        })
    }

    pub fn pending_stores(&self, handle: ObjectHandle) -> Result<&PendingStoreList, ObjectError> {
        self.get(handle)?.as_pending_stores().ok_or_else(|| {
            ObjectError::TypeError(format!("object#{} is not a pending store list", handle.0))
        })
    }

    pub fn pending_stores_mut(
        &mut self,
        handle: ObjectHandle,
    ) -> Result<&mut PendingStoreList, ObjectError> {
        self.get_mut(handle)?.as_pending_stores_mut().ok_or_else(|| {
            ObjectError::TypeError(format!("object#{} is not a pending store list", handle.0))
        })
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    pub fn prototype_of(&self, handle: ObjectHandle) -> Result<Option<ObjectHandle>, ObjectError> {
        Ok(self.ordinary(handle)?.prototype)
    }

    /// Change `[[Prototype]]`, rejecting cycles.
    pub fn set_prototype_of(
        &mut self,
        handle: ObjectHandle,
        proto: Option<ObjectHandle>,
    ) -> Result<bool, ObjectError> {
        if let Some(p) = proto {
            let mut current = Some(p);
            let mut visited = BTreeSet::new();
            visited.insert(handle);
            while let Some(h) = current {
                if !visited.insert(h) {
                    return Err(ObjectError::PrototypeCycleDetected);
                }
                current = self.ordinary(h)?.prototype;
            }
        }
        let obj = self.ordinary_mut(handle)?;
        if !obj.extensible {
            return Ok(obj.prototype == proto);
        }
        obj.prototype = proto;
        Ok(true)
    }

    /// Levels from `start` to the end of its chain, `start` included.
    pub fn chain(&self, start: ObjectHandle, max_depth: u32) -> Result<Vec<ObjectHandle>, ObjectError> {
        let mut levels = Vec::new();
        let mut current = Some(start);
        let mut visited = BTreeSet::new();
        let mut depth: u32 = 0;

        while let Some(h) = current {
            if depth > max_depth {
                return Err(ObjectError::PrototypeChainTooDeep {
                    depth,
                    max: max_depth,
                });
            }
            if !visited.insert(h) {
                return Err(ObjectError::PrototypeCycleDetected);
            }
            levels.push(h);
            current = self.ordinary(h)?.prototype;
            depth += 1;
        }
        Ok(levels)
    }

    /// First level on the chain from `start` that owns `key`, with its descriptor.
    pub fn lookup(
        &self,
        start: ObjectHandle,
        key: &str,
        max_depth: u32,
    ) -> Result<Option<(ObjectHandle, MemberDescriptor)>, ObjectError> {
        for level in self.chain(start, max_depth)? {
            if let Some(desc) = self.ordinary(level)?.get_own_property(key) {
                return Ok(Some((level, desc.clone())));
            }
        }
        Ok(None)
    }

    pub fn has_property(&self, start: ObjectHandle, key: &str, max_depth: u32) -> Result<bool, ObjectError> {
        Ok(self.lookup(start, key, max_depth)?.is_some())
    }

    pub fn has_own(&self, handle: ObjectHandle, key: &str) -> Result<bool, ObjectError> {
        Ok(self.ordinary(handle)?.has_own_property(key))
    }

    pub fn get_own_property_descriptor(
        &self,
        handle: ObjectHandle,
        key: &str,
    ) -> Result<Option<MemberDescriptor>, ObjectError> {
        Ok(self.ordinary(handle)?.get_own_property(key).cloned())
    }

    /// Own data value for `key`, `None` when absent or an accessor.
    pub fn own_data_value(&self, handle: ObjectHandle, key: &str) -> Result<Option<Value>, ObjectError> {
        Ok(self
            .ordinary(handle)?
            .get_own_property(key)
            .and_then(MemberDescriptor::value)
            .cloned())
    }

    pub fn define_property(
        &mut self,
        handle: ObjectHandle,
        key: &str,
        desc: MemberDescriptor,
    ) -> Result<bool, ObjectError> {
        Ok(self.ordinary_mut(handle)?.define_own_property(key, desc))
    }

    /// Assign an own writable data value, creating the member if absent.
    pub fn put_own_data(&mut self, handle: ObjectHandle, key: &str, value: Value) -> Result<(), ObjectError> {
        let obj = self.ordinary_mut(handle)?;
        match obj.properties.get_mut(key) {
            Some(MemberDescriptor::Data { value: v, writable: true, .. }) => {
                *v = value;
                Ok(())
            }
            Some(_) => Err(ObjectError::TypeError(format!(
                "cannot assign to read-only member '{key}'"
            ))),
            None => {
                if obj.define_own_property(key, MemberDescriptor::data(value)) {
                    Ok(())
                } else {
                    Err(ObjectError::TypeError(format!(
                        "cannot add member '{key}' to a non-extensible object"
                    )))
                }
            }
        }
    }

    pub fn delete_property(&mut self, handle: ObjectHandle, key: &str) -> Result<bool, ObjectError> {
        Ok(self.ordinary_mut(handle)?.delete(key))
    }

    pub fn own_keys(&self, handle: ObjectHandle) -> Result<Vec<String>, ObjectError> {
        Ok(self.ordinary(handle)?.own_keys())
    }

    /// `Object.keys` semantics: own enumerable member names.
    pub fn keys(&self, handle: ObjectHandle) -> Result<Vec<String>, ObjectError> {
        Ok(self.ordinary(handle)?.own_enumerable_keys())
    }

    pub fn snapshot_level(&self, level: ObjectHandle) -> Result<LevelSnapshot, ObjectError> {
        let members = self
            .ordinary(level)?
            .properties
            .iter()
            .filter(|(_, d)| d.is_enumerable())
            .map(|(k, d)| (k.clone(), d.clone()))
            .collect();
        Ok(LevelSnapshot { level, members })
    }

    pub fn snapshot_chain(&self, start: ObjectHandle, max_depth: u32) -> Result<Vec<LevelSnapshot>, ObjectError> {
        self.chain(start, max_depth)?
            .into_iter()
            .map(|level| self.snapshot_level(level))
            .collect()
    }
}
