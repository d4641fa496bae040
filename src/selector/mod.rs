//! Addressing values on data objects.
//!
//! - [`DomainId`] / [`AttributeIdentifier`] - domain-qualified attribute names
//! - [`Selector`] - textual selector grammar with reserved sentinels
//! - [`names`] - reserved names and name validation

mod identifier;
pub mod names;
#[allow(clippy::module_inception)]
mod selector;

pub use identifier::*;
pub use names::{is_valid_attribute_name, RESERVED_NAMES};
pub use selector::*;
