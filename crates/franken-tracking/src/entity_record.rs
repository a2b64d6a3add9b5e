//! Entities with an explicit, eagerly allocated field map.
//!
//! An [`EntityRecord`] is built from a [`Registration`] and owns its fields
//! from the first moment, so every write has storage and no pending store
//! is ever involved.  Writes go through the same [`Interceptor`] contract as
//! instrumented heap objects.

use std::collections::BTreeMap;
use std::fmt;
use std::rc::Rc;

use crate::error::{TrackingError, TrackingResult};
use crate::interceptor::{Interceptor, OwnerId, RawAccess};
use crate::library::Registration;
use crate::metadata::{PropertyDescriptor, PropertyKind};
use crate::object_model::{CollectionKind, Value};
use crate::tracking::MAX_COMPLEX_NESTING;

#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Scalar(Value),
    Collection { kind: CollectionKind, items: Vec<Value> },
    /// Complex value; its writes are attributed to the owning record.
    Record(Box<EntityRecord>),
}

impl FieldValue {
    pub fn as_scalar(&self) -> Option<&Value> {
        match self {
            Self::Scalar(v) => Some(v),
            _ => None,
        }
    }
}

/// Get/Set surface of an explicitly typed entity.
pub trait Trackable {
    fn get(&self, name: &str) -> Option<&FieldValue>;
    fn set(&mut self, name: &str, value: Value) -> TrackingResult<()>;
}

#[derive(Clone)]
pub struct EntityRecord {
    id: u64,
    registration: Registration,
    fields: BTreeMap<String, FieldValue>,
    interceptor: Rc<dyn Interceptor>,
}

impl fmt::Debug for EntityRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EntityRecord")
            .field("id", &self.id)
            .field("type_name", &self.registration.type_name())
            .field("fields", &self.fields)
            .finish_non_exhaustive()
    }
}

impl PartialEq for EntityRecord {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
            && self.registration == other.registration
            && self.fields == other.fields
    }
}

struct FieldAccessor<'a> {
    owner: OwnerId,
    slot: &'a mut Value,
}

impl RawAccess for FieldAccessor<'_> {
    fn owner(&self) -> OwnerId {
        self.owner
    }

    fn get(&mut self) -> TrackingResult<Value> {
        Ok(self.slot.clone())
    }

    fn set(&mut self, value: Value) -> TrackingResult<()> {
        *self.slot = value;
        Ok(())
    }
}

impl EntityRecord {
    /// Seed every declared field.  `initial` supplies values for scalar data
    /// properties; a navigation value is rejected.
    pub fn new(
        id: u64,
        registration: Registration,
        interceptor: Rc<dyn Interceptor>,
        complex_types: &BTreeMap<String, Registration>,
        initial: Vec<(String, Value)>,
    ) -> TrackingResult<Self> {
        let mut initial: BTreeMap<String, Value> = initial.into_iter().collect();
        let record = Self::seeded(id, registration, interceptor, complex_types, &mut initial, 0)?;
        if let Some(name) = initial.keys().next() {
            return Err(TrackingError::invalid_operation(format!(
                "`{}` declares no property `{name}`",
                record.registration.type_name()
            )));
        }
        Ok(record)
    }

    fn seeded(
        id: u64,
        registration: Registration,
        interceptor: Rc<dyn Interceptor>,
        complex_types: &BTreeMap<String, Registration>,
        initial: &mut BTreeMap<String, Value>,
        depth: usize,
    ) -> TrackingResult<Self> {
        let descriptor = registration.shared_descriptor();
        if depth > MAX_COMPLEX_NESTING {
            return Err(TrackingError::configuration(
                descriptor.name(),
                format!("complex values nest deeper than {MAX_COMPLEX_NESTING}"),
            ));
        }
        let mut fields = BTreeMap::new();
        for prop in descriptor.properties() {
            let supplied = initial.remove(&prop.name);
            let field = match (prop.kind, prop.scalar) {
                (PropertyKind::Data, true) => FieldValue::Scalar(
                    supplied
                        .filter(|v| !v.is_undefined())
                        .or_else(|| prop.default_value.clone())
                        .unwrap_or(Value::Null),
                ),
                (PropertyKind::Navigation, scalar) => {
                    if supplied.is_some_and(|v| !v.is_undefined()) {
                        return Err(TrackingError::invalid_operation(format!(
                            "cannot assign navigation property `{}` of `{}` during construction",
                            prop.name,
                            descriptor.name()
                        )));
                    }
                    if scalar {
                        FieldValue::Scalar(Value::Null)
                    } else {
                        empty(CollectionKind::Relation)
                    }
                }
                (PropertyKind::Data, false) => reject_supplied(prop, supplied, CollectionKind::Primitive)?,
                (PropertyKind::Complex, false) => reject_supplied(prop, supplied, CollectionKind::Complex)?,
                (PropertyKind::Complex, true) => {
                    if supplied.is_some() {
                        return Err(complex_assignment(prop));
                    }
                    let type_name = prop.complex_type_name.as_deref().unwrap_or_default();
                    let nested = complex_types.get(type_name).ok_or_else(|| {
                        TrackingError::configuration(
                            type_name,
                            format!("complex type for `{}` is not registered", prop.name),
                        )
                    })?;
                    let mut none = BTreeMap::new();
                    FieldValue::Record(Box::new(Self::seeded(
                        id,
                        nested.clone(),
                        Rc::clone(&interceptor),
                        complex_types,
                        &mut none,
                        depth + 1,
                    )?))
                }
                (PropertyKind::Unknown, _) => {
                    return Err(TrackingError::configuration(
                        descriptor.name(),
                        format!("unknown property kind for `{}`", prop.name),
                    ));
                }
            };
            fields.insert(prop.name.clone(), field);
        }
        Ok(Self {
            id,
            registration,
            fields,
            interceptor,
        })
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn registration(&self) -> &Registration {
        &self.registration
    }

    pub fn field_names(&self) -> Vec<&str> {
        self.fields.keys().map(String::as_str).collect()
    }

    pub fn value(&self, name: &str) -> Option<&Value> {
        self.fields.get(name).and_then(FieldValue::as_scalar)
    }

    /// Nested complex record, for writing its fields.
    pub fn record_mut(&mut self, name: &str) -> Option<&mut EntityRecord> {
        match self.fields.get_mut(name) {
            Some(FieldValue::Record(record)) => Some(record),
            _ => None,
        }
    }

    pub fn push_item(&mut self, name: &str, item: Value) -> TrackingResult<()> {
        match self.fields.get_mut(name) {
            Some(FieldValue::Collection { items, .. }) => {
                items.push(item);
                Ok(())
            }
            _ => Err(TrackingError::invalid_operation(format!(
                "`{name}` is not a collection of `{}`",
                self.registration.type_name()
            ))),
        }
    }
}

impl Trackable for EntityRecord {
    fn get(&self, name: &str) -> Option<&FieldValue> {
        self.fields.get(name)
    }

    fn set(&mut self, name: &str, value: Value) -> TrackingResult<()> {
        let descriptor = self.registration.shared_descriptor();
        let property = descriptor.property(name).ok_or_else(|| {
            TrackingError::invalid_operation(format!(
                "`{}` declares no property `{name}`",
                descriptor.name()
            ))
        })?;
        if property.kind == PropertyKind::Complex {
            return Err(complex_assignment(property));
        }
        let interceptor = Rc::clone(&self.interceptor);
        let owner = OwnerId::Record(self.id);
        match self.fields.get_mut(name) {
            Some(FieldValue::Scalar(slot)) => {
                let mut raw = FieldAccessor { owner, slot };
                interceptor.intercept(property, value, &mut raw)
            }
            _ => Err(TrackingError::invalid_operation(format!(
                "`{name}` of `{}` is a collection; modify its items instead",
                descriptor.name()
            ))),
        }
    }
}

fn empty(kind: CollectionKind) -> FieldValue {
    FieldValue::Collection {
        kind,
        items: Vec::new(),
    }
}

fn reject_supplied(
    prop: &PropertyDescriptor,
    supplied: Option<Value>,
    kind: CollectionKind,
) -> TrackingResult<FieldValue> {
    match supplied {
        Some(_) => Err(TrackingError::invalid_operation(format!(
            "collection property `{}` cannot be assigned",
            prop.name
        ))),
        None => Ok(empty(kind)),
    }
}

fn complex_assignment(prop: &PropertyDescriptor) -> TrackingError {
    TrackingError::invalid_operation(format!(
        "complex property `{}` is changed through its fields",
        prop.name
    ))
}
