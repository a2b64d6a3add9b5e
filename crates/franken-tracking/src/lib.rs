#![forbid(unsafe_code)]

//! Property interception and change tracking for entity types.
//!
//! A [`ModelLibrary`] instruments constructors in a [`Realm`] so that every
//! declared property of their instances is read from a per-instance backing
//! store and written through an [`Interceptor`].  Instrumentation is
//! reversible: resetting a constructor restores its prototype chain to the
//! state it had before installation.

pub mod backing_store;
pub mod change_tracker;
pub mod config;
pub mod entity_record;
pub mod error;
pub mod events;
pub mod installer;
pub mod interceptor;
pub mod library;
pub mod metadata;
pub mod object_model;
pub mod realm;
pub mod reset_registry;
pub mod tracking;

pub use change_tracker::{ChangeTracker, PropertyChange};
pub use config::{MemberNames, ModelLibraryConfig};
pub use entity_record::{EntityRecord, FieldValue, Trackable};
pub use error::{TrackingError, TrackingResult};
pub use events::{TrackingContext, TrackingEvent};
pub use interceptor::{Interceptor, OwnerId, PassThroughInterceptor, RawAccess};
pub use library::{ModelLibrary, Registration};
pub use metadata::{PropertyDescriptor, PropertyKind, StructuralKind, TypeDescriptor};
pub use object_model::{CollectionKind, ObjectHandle, Value};
pub use realm::Realm;
pub use tracking::{DefaultValueFactory, ValueFactory};
