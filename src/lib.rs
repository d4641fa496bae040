//! # attrmeta
//!
//! Schema-less typed attribute store for procedural data: points, attribute
//! sets and splines carry named, typed columns organised in domains, with
//! copy-on-write inheritance from parent data.
//!
//! ## Modules
//!
//! - [`util`] - Value types, errors and math helpers
//! - [`config`] - Runtime settings
//! - [`selector`] - Attribute identifiers and the selector grammar
//! - [`metadata`] - Typed attributes, domains, containers and serialization
//! - [`data`] - Host data kinds owning metadata
//! - [`accessor`] - Type-erased accessors, keys and the accessor registry
//! - [`partition`] - Grouping of elements by attribute value
//!
//! ## Example
//!
//! ```ignore
//! use attrmeta::prelude::*;
//!
//! let registry = AccessorRegistry::with_defaults();
//! let mut points = PointData::from_points(vec![Point::default(); 3]);
//! points.assign_metadata_entries();
//!
//! let selector = Selector::parse("Score")?;
//! points.metadata().create_attribute(&AttributeIdentifier::new("Score"), 0i32, true, false)?;
//! let accessor = registry.create_accessor(&points, &selector, false)?;
//! let mut keys = registry.create_keys(&mut points, &selector)?;
//! accessor.set(AttributeValue::Int32(10), 0, keys.as_mut(), AccessorFlags::STRICT_TYPE)?;
//! ```

pub mod accessor;
pub mod config;
pub mod data;
pub mod metadata;
pub mod partition;
pub mod selector;
pub mod util;

// Re-export commonly used types
pub use util::{AttributeType, AttributeValue, Error, Result};
pub use metadata::{Metadata, MetadataDomain, TypedAttribute};
pub use selector::{AttributeIdentifier, DomainId, Selector};

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::accessor::{
        AccessorFlags, AccessorKeys, AccessorRegistry, AttributeAccessor, EntryKeys,
        TypeMatchPolicy,
    };
    pub use crate::data::{
        ControlPoint, DataKind, HostData, ParamData, Point, PointData, SplineData,
    };
    pub use crate::metadata::{
        AttributeFilter, EntryTicket, Metadata, MetadataAttribute, MetadataDomain, MetadataOp,
        MetadataType, TypedAttribute, DEFAULT_VALUE_KEY, INVALID_ENTRY_KEY,
    };
    pub use crate::partition::{
        partition_by_attribute, partition_by_multiple_attributes, split_points_by_attribute,
    };
    pub use crate::selector::{AttributeIdentifier, DomainId, Selector};
    pub use crate::util::{
        AttributeType, AttributeValue, DQuat, DVec2, DVec3, DVec4, Error, Name, Result, Rotator,
        Transform,
    };
}
