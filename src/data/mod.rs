//! Host data objects that own metadata.
//!
//! A host exposes its [`Metadata`] container, a class hierarchy used by the
//! accessor registry to pick creation functions, and domain resolution for
//! selectors. Three kinds are provided:
//!
//! - [`PointData`] - points with spatial properties, one entry per point
//! - [`ParamData`] - plain attribute tables
//! - [`SplineData`] - control points of a curve

mod param;
mod point;
mod spline;

pub use param::*;
pub use point::*;
pub use spline::*;

use std::any::Any;
use std::fmt;
use std::sync::Arc;

use crate::metadata::Metadata;
use crate::selector::{DomainId, Selector};
use crate::util::{Error, Result};

/// Name of a host data kind, used as registry key.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DataKind(pub &'static str);

impl DataKind {
    /// Any data carrying metadata.
    pub const BASE: Self = Self("Data");
    /// Data located in space.
    pub const SPATIAL: Self = Self("Spatial");
    /// Point sets.
    pub const POINT: Self = Self("Point");
    /// Attribute sets.
    pub const PARAM: Self = Self("Param");
    /// Splines.
    pub const SPLINE: Self = Self("Spline");
}

impl fmt::Display for DataKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.0)
    }
}

/// Elements that carry a metadata entry key.
pub trait MetadataElement: Any + Send + Sync {
    /// Entry key in the elements domain.
    fn metadata_entry(&self) -> i64;

    /// Rebind to another entry.
    fn set_metadata_entry(&mut self, entry: i64);
}

/// A data object owning a metadata container.
pub trait HostData: Any + Send + Sync {
    /// Most derived kind.
    fn kind(&self) -> DataKind;

    /// Kinds from most derived to [`DataKind::BASE`].
    fn class_hierarchy(&self) -> &'static [DataKind];

    /// Metadata container.
    fn metadata(&self) -> &Arc<Metadata>;

    /// Domain targeted by a selector.
    ///
    /// No domain name means the container's default domain; an unknown name
    /// is an invalid selector.
    fn domain_id_from_selector(&self, selector: &Selector) -> Result<DomainId> {
        let metadata = self.metadata();
        match selector.domain_name() {
            None => Ok(metadata.default_domain_id()),
            Some(name) => metadata
                .domain_id_from_name(name)
                .ok_or_else(|| {
                    Error::selector(format!("unknown domain '{name}' on {}", self.kind()))
                }),
        }
    }

    /// Number of addressable elements in a domain.
    fn element_count(&self, domain: DomainId) -> usize {
        self.metadata().item_count(domain).max(0) as usize
    }

    fn as_any(&self) -> &dyn Any;

    fn as_any_mut(&mut self) -> &mut dyn Any;
}

impl<'a> dyn HostData + 'a {
    /// Downcast to a concrete host type.
    pub fn downcast_ref<T: HostData>(&self) -> Option<&T> {
        self.as_any().downcast_ref::<T>()
    }

    /// Mutable downcast to a concrete host type.
    pub fn downcast_mut<T: HostData>(&mut self) -> Option<&mut T> {
        self.as_any_mut().downcast_mut::<T>()
    }

    /// Whether `kind` appears in the class hierarchy.
    pub fn is_kind(&self, kind: DataKind) -> bool {
        self.class_hierarchy().contains(&kind)
    }
}

/// Give every element without an entry a fresh one in `domain`.
pub(crate) fn assign_missing_entries<E: MetadataElement>(
    elements: &mut [E],
    metadata: &Metadata,
    domain: DomainId,
) {
    let Some(domain) = metadata.domain(domain) else {
        return;
    };
    for element in elements
        .iter_mut()
        .filter(|e| e.metadata_entry() == crate::metadata::INVALID_ENTRY_KEY)
    {
        element.set_metadata_entry(domain.add_entry(crate::metadata::INVALID_ENTRY_KEY));
    }
}
