//! Utility types used throughout the crate.
//!
//! - [`AttributeType`] - Enum of supported attribute value types
//! - [`AttributeValue`] - Type-erased value and conversion rules
//! - [`Name`] - Case-insensitive identifier value
//! - [`Error`] / [`Result`] - Error handling
//! - Math types ([`Rotator`], [`Transform`]) and re-exports from glam

mod attribute_type;
mod error;
mod math;
mod value;

pub use attribute_type::*;
pub use error::*;
pub use math::*;
pub use value::*;
