//! Reserved selector names and attribute name validation.

/// Latest attribute written on the target data.
pub const LAST_ATTRIBUTE: &str = "@Last";
/// Latest attribute created on the target data.
pub const LAST_CREATED_ATTRIBUTE: &str = "@LastCreated";
/// Whole paired input selector.
pub const SOURCE_ATTRIBUTE: &str = "@Source";
/// Name of the paired input selector.
pub const SOURCE_NAME_ATTRIBUTE: &str = "@SourceName";

/// Every sentinel name.
pub const RESERVED_NAMES: [&str; 4] = [
    LAST_ATTRIBUTE,
    LAST_CREATED_ATTRIBUTE,
    SOURCE_ATTRIBUTE,
    SOURCE_NAME_ATTRIBUTE,
];

/// Property name of the synthetic element index.
pub const INDEX_PROPERTY: &str = "Index";

/// Canonical spelling of a reserved name (case-insensitive lookup).
pub fn reserved_name(text: &str) -> Option<&'static str> {
    RESERVED_NAMES
        .iter()
        .copied()
        .find(|name| name.eq_ignore_ascii_case(text))
}

/// Whether `c` may appear in an attribute, property or extra name.
#[inline]
pub fn is_valid_name_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, ' ' | '_' | '-' | '/' | ':')
}

/// Whether `name` may be used as an attribute name.
///
/// Sentinels are not valid attribute names; they only appear in selectors.
pub fn is_valid_attribute_name(name: &str) -> bool {
    !name.is_empty() && name.trim() == name && name.chars().all(is_valid_name_char)
}

/// Whether `name` may be used as a selector domain.
///
/// `@Last.X` always reads as the sentinel, so sentinel spellings are refused.
pub fn is_valid_domain_name(name: &str) -> bool {
    is_valid_attribute_name(name) && reserved_name(&format!("@{name}")).is_none()
}
