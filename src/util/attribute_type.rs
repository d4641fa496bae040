//! Attribute value types - the set of types an attribute column can hold.

use std::fmt;

/// Type of the values stored in an attribute.
///
/// The discriminant is the stable type id written by serialization.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(u8)]
pub enum AttributeType {
    /// 32-bit float
    Float = 0,
    /// 64-bit float
    Double = 1,
    /// Signed 32-bit integer
    Int32 = 2,
    /// Signed 64-bit integer
    Int64 = 3,
    /// Double precision 2D vector
    Vector2 = 4,
    /// Double precision 3D vector
    Vector = 5,
    /// Double precision 4D vector
    Vector4 = 6,
    /// Double precision quaternion
    Quat = 7,
    /// Rotation + translation + scale
    Transform = 8,
    /// UTF-8 string
    String = 9,
    /// Boolean
    Boolean = 10,
    /// Pitch/yaw/roll in degrees
    Rotator = 11,
    /// Interned identifier (case-insensitive name)
    Name = 12,
}

impl AttributeType {
    /// Number of attribute types.
    pub const COUNT: usize = 13;

    /// All types, in id order.
    pub const ALL: [Self; Self::COUNT] = [
        Self::Float,
        Self::Double,
        Self::Int32,
        Self::Int64,
        Self::Vector2,
        Self::Vector,
        Self::Vector4,
        Self::Quat,
        Self::Transform,
        Self::String,
        Self::Boolean,
        Self::Rotator,
        Self::Name,
    ];

    /// Returns the name of this type.
    #[inline]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Float => "float",
            Self::Double => "double",
            Self::Int32 => "int32",
            Self::Int64 => "int64",
            Self::Vector2 => "vector2",
            Self::Vector => "vector",
            Self::Vector4 => "vector4",
            Self::Quat => "quat",
            Self::Transform => "transform",
            Self::String => "string",
            Self::Boolean => "bool",
            Self::Rotator => "rotator",
            Self::Name => "name",
        }
    }

    /// Parse type from its name (case-insensitive).
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL
            .iter()
            .copied()
            .find(|ty| ty.name().eq_ignore_ascii_case(name.trim()))
    }

    /// Stable serialization id.
    #[inline]
    pub const fn id(self) -> u8 {
        self as u8
    }

    /// Convert from a serialization id.
    pub const fn from_id(id: u8) -> Option<Self> {
        match id {
            0 => Some(Self::Float),
            1 => Some(Self::Double),
            2 => Some(Self::Int32),
            3 => Some(Self::Int64),
            4 => Some(Self::Vector2),
            5 => Some(Self::Vector),
            6 => Some(Self::Vector4),
            7 => Some(Self::Quat),
            8 => Some(Self::Transform),
            9 => Some(Self::String),
            10 => Some(Self::Boolean),
            11 => Some(Self::Rotator),
            12 => Some(Self::Name),
            _ => None,
        }
    }

    /// Returns true for scalar numeric types.
    #[inline]
    pub const fn is_numeric(self) -> bool {
        matches!(self, Self::Float | Self::Double | Self::Int32 | Self::Int64)
    }

    /// Returns true for vector types.
    #[inline]
    pub const fn is_vector(self) -> bool {
        matches!(self, Self::Vector2 | Self::Vector | Self::Vector4)
    }

    /// Returns true for string-like types.
    #[inline]
    pub const fn is_string(self) -> bool {
        matches!(self, Self::String | Self::Name)
    }

    /// Whether attributes of this type interpolate by default.
    ///
    /// Strings, names and booleans cannot be blended.
    #[inline]
    pub const fn interpolates_by_default(self) -> bool {
        !matches!(self, Self::String | Self::Name | Self::Boolean)
    }

    /// Whether equal values of this type are interned to a single value key.
    #[inline]
    pub const fn interns_values(self) -> bool {
        matches!(self, Self::String | Self::Name | Self::Boolean)
    }

    /// Whether partitioning on this type is meaningful.
    ///
    /// Full transforms are opaque composites and are rejected.
    #[inline]
    pub const fn is_partitionable(self) -> bool {
        !matches!(self, Self::Transform)
    }
}

impl fmt::Display for AttributeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_type_names() {
        assert_eq!(AttributeType::Int32.name(), "int32");
        assert_eq!(AttributeType::from_name("Vector"), Some(AttributeType::Vector));
        assert_eq!(AttributeType::from_name("nope"), None);
    }

    #[test]
    fn test_type_ids_roundtrip() {
        for ty in AttributeType::ALL {
            assert_eq!(AttributeType::from_id(ty.id()), Some(ty));
            assert_eq!(AttributeType::from_name(ty.name()), Some(ty));
        }
        assert_eq!(AttributeType::from_id(200), None);
    }

    #[test]
    fn test_type_traits() {
        assert!(AttributeType::Double.interpolates_by_default());
        assert!(!AttributeType::String.interpolates_by_default());
        assert!(AttributeType::Name.interns_values());
        assert!(!AttributeType::Transform.is_partitionable());
    }
}
