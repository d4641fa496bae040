//! Attribute storage: typed columns, domains and containers.
//!
//! - [`TypedAttribute`] - one named, typed column with parent inheritance
//! - [`MetadataDomain`] - a row space (entries) plus its attributes
//! - [`Metadata`] - the per-data container of domains
//! - [`AttributeFilter`] - include/exclude name filtering
//! - [`MetadataOp`] - binary merge operations
//!
//! Entry keys are row indices; value keys index into an attribute's value
//! table. Both use `-1` as the "none" sentinel.

mod attribute;
mod compression;
mod container;
mod domain;
mod filter;
mod op;
mod serialize;
mod traits;

pub use attribute::*;
pub use compression::*;
pub use container::*;
pub use domain::*;
pub use filter::*;
pub use op::*;
pub use serialize::*;
pub use traits::*;

/// Value key meaning "use the attribute's default value".
pub const DEFAULT_VALUE_KEY: i64 = -1;

/// Entry key of an element without metadata row.
pub const INVALID_ENTRY_KEY: i64 = -1;
