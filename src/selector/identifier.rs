//! Domain ids and attribute identifiers.

use std::fmt;

/// Identifier of a metadata domain within a container.
///
/// Ids are meaningful per data kind: [`DomainId::ELEMENTS`] is the
/// per-element row space, [`DomainId::DATA`] the single row attached to the
/// whole data object. [`DomainId::DEFAULT`] resolves to the container's
/// default domain.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DomainId(pub i32);

impl DomainId {
    /// Resolve to the container's default domain.
    pub const DEFAULT: Self = Self(-1);
    /// Single-entry domain describing the data object as a whole.
    pub const DATA: Self = Self(-2);
    /// Per-element domain (points, control points, rows).
    pub const ELEMENTS: Self = Self(0);
    /// No domain.
    pub const INVALID: Self = Self(i32::MIN);

    /// Whether this is the default placeholder.
    #[inline]
    pub const fn is_default(self) -> bool {
        self.0 == Self::DEFAULT.0
    }

    /// Whether this id names a domain at all.
    #[inline]
    pub const fn is_valid(self) -> bool {
        self.0 != Self::INVALID.0
    }
}

impl Default for DomainId {
    fn default() -> Self {
        Self::DEFAULT
    }
}

impl fmt::Display for DomainId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Self::DEFAULT => f.write_str("Default"),
            Self::DATA => f.write_str("Data"),
            Self::ELEMENTS => f.write_str("Elements"),
            Self::INVALID => f.write_str("Invalid"),
            Self(id) => write!(f, "Domain{id}"),
        }
    }
}

/// Attribute name qualified by the domain it lives in.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct AttributeIdentifier {
    pub name: String,
    pub domain: DomainId,
}

impl AttributeIdentifier {
    /// Attribute in the default domain.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            domain: DomainId::DEFAULT,
        }
    }

    /// Attribute in a specific domain.
    pub fn with_domain(name: impl Into<String>, domain: DomainId) -> Self {
        Self {
            name: name.into(),
            domain,
        }
    }
}

impl From<&str> for AttributeIdentifier {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

impl From<String> for AttributeIdentifier {
    fn from(name: String) -> Self {
        Self::new(name)
    }
}

impl fmt::Display for AttributeIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.domain.is_default() {
            f.write_str(&self.name)
        } else {
            write!(f, "@{}.{}", self.domain, self.name)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identifier_display() {
        assert_eq!(AttributeIdentifier::new("Score").to_string(), "Score");
        assert_eq!(
            AttributeIdentifier::with_domain("Seed", DomainId::DATA).to_string(),
            "@Data.Seed"
        );
        assert_eq!(DomainId::default(), DomainId::DEFAULT);
        assert!(!DomainId::INVALID.is_valid());
    }
}
