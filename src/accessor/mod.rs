//! Type-erased, range-oriented access to attributes and properties.
//!
//! An [`AttributeAccessor`] reads and writes [`AttributeValue`]s for a range
//! of logical indices; the matching [`AccessorKeys`] say which entry or
//! element each index refers to. Both are produced from a [`Selector`] and
//! a host data object by the [`AccessorRegistry`].
//!
//! ```ignore
//! let registry = AccessorRegistry::with_defaults();
//! let accessor = registry.create_accessor(&points, &Selector::parse("$Position.Z")?, false)?;
//! let keys = registry.create_const_keys(&points, &Selector::parse("$Position")?)?;
//! let flags = AccessorFlags::STRICT_TYPE;
//! let heights: Vec<f64> = get_range_as(accessor.as_ref(), 0, keys.as_ref(), keys.len(), flags)?;
//! ```
//!
//! [`Selector`]: crate::selector::Selector

mod attribute;
mod extra;
mod extract;
mod factory;
mod flags;
mod helpers;
mod keys;
mod property;

pub use attribute::*;
pub use extra::*;
pub use extract::*;
pub use factory::*;
pub use flags::*;
pub use helpers::*;
pub use keys::*;
pub use property::*;

use std::sync::Arc;

use crate::metadata::MetadataAttribute;
use crate::util::{AttributeType, AttributeValue, Result};

/// Reads and writes values of one declared type.
pub trait AttributeAccessor: Send + Sync {
    /// Type of the values produced and accepted.
    fn value_type(&self) -> AttributeType;

    fn is_read_only(&self) -> bool;

    /// Fill `out` with the values at indices `start..start + out.len()`.
    fn get_range(
        &self,
        out: &mut [AttributeValue],
        start: usize,
        keys: &dyn AccessorKeys,
    ) -> Result<()>;

    /// Write `values` at indices `start..start + values.len()`, converting
    /// them to [`value_type`](Self::value_type) as `flags` allow.
    fn set_range(
        &self,
        values: &[AttributeValue],
        start: usize,
        keys: &mut dyn AccessorKeys,
        flags: AccessorFlags,
    ) -> Result<()>;

    /// Backing attribute, for accessors reading metadata.
    fn attribute(&self) -> Option<Arc<dyn MetadataAttribute>> {
        None
    }

    /// Value keys of a range. Returns false when values are not keyed.
    fn value_keys(&self, _start: usize, _keys: &dyn AccessorKeys, _out: &mut [i64]) -> bool {
        false
    }

    /// Single value at `index`.
    fn get(&self, index: usize, keys: &dyn AccessorKeys) -> Result<AttributeValue> {
        let mut out = [AttributeValue::zero(self.value_type())];
        self.get_range(&mut out, index, keys)?;
        let [value] = out;
        Ok(value)
    }

    /// Write a single value at `index`.
    fn set(
        &self,
        value: AttributeValue,
        index: usize,
        keys: &mut dyn AccessorKeys,
        flags: AccessorFlags,
    ) -> Result<()> {
        self.set_range(std::slice::from_ref(&value), index, keys, flags)
    }
}
