//! Conversion flags for accessor writes and typed reads.

use std::fmt;
use std::ops::{BitOr, BitOrAssign};

use crate::util::{AttributeType, AttributeValue, Error, Result};

/// How values of another type may be converted by an accessor.
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct AccessorFlags(u8);

impl AccessorFlags {
    /// Types must match exactly.
    pub const STRICT_TYPE: Self = Self(0);
    /// Lossless widening (scalar to vector, int to float, anything to string).
    pub const ALLOW_BROADCAST: Self = Self(1);
    /// Explicit conversions (string to name, rotator to quat...).
    pub const ALLOW_CONSTRUCTIBLE: Self = Self(1 << 1);
    /// A single value written through a single unset key becomes the default.
    pub const ALLOW_SET_DEFAULT_VALUE: Self = Self(1 << 2);

    #[inline]
    pub const fn bits(self) -> u8 {
        self.0
    }

    /// Whether every flag of `other` is set.
    #[inline]
    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }
}

impl BitOr for AccessorFlags {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl BitOrAssign for AccessorFlags {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

impl fmt::Debug for AccessorFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0 == 0 {
            return f.write_str("AccessorFlags(STRICT_TYPE)");
        }
        let names: Vec<&str> = [
            (Self::ALLOW_BROADCAST, "ALLOW_BROADCAST"),
            (Self::ALLOW_CONSTRUCTIBLE, "ALLOW_CONSTRUCTIBLE"),
            (Self::ALLOW_SET_DEFAULT_VALUE, "ALLOW_SET_DEFAULT_VALUE"),
        ]
        .into_iter()
        .filter(|(flag, _)| self.contains(*flag))
        .map(|(_, name)| name)
        .collect();
        write!(f, "AccessorFlags({})", names.join(" | "))
    }
}

/// Convert `value` to `to` as far as `flags` allow.
pub fn convert_value(
    value: &AttributeValue,
    to: AttributeType,
    flags: AccessorFlags,
) -> Result<AttributeValue> {
    let from = value.value_type();
    if from == to {
        return Ok(value.clone());
    }
    if flags.contains(AccessorFlags::ALLOW_BROADCAST) {
        if let Some(v) = value.broadcast(to) {
            return Ok(v);
        }
    }
    if flags.contains(AccessorFlags::ALLOW_CONSTRUCTIBLE) {
        if let Some(v) = value.construct(to) {
            return Ok(v);
        }
    }
    Err(Error::type_mismatch(to, from))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::util::{DVec3, Name};

    #[test]
    fn test_flags() {
        let flags = AccessorFlags::ALLOW_BROADCAST | AccessorFlags::ALLOW_SET_DEFAULT_VALUE;
        assert!(flags.contains(AccessorFlags::ALLOW_BROADCAST));
        assert!(!flags.contains(AccessorFlags::ALLOW_CONSTRUCTIBLE));
        assert!(flags.contains(AccessorFlags::STRICT_TYPE));
        assert_eq!(
            format!("{flags:?}"),
            "AccessorFlags(ALLOW_BROADCAST | ALLOW_SET_DEFAULT_VALUE)"
        );
    }

    #[test]
    fn test_convert() {
        let strict = AccessorFlags::STRICT_TYPE;
        assert!(convert_value(&AttributeValue::Int32(2), AttributeType::Double, strict).is_err());
        assert_eq!(
            convert_value(
                &AttributeValue::Float(2.0),
                AttributeType::Vector,
                AccessorFlags::ALLOW_BROADCAST
            )
            .unwrap(),
            AttributeValue::Vector(DVec3::splat(2.0))
        );
        let name = AttributeValue::String("Tree".into());
        assert!(convert_value(&name, AttributeType::Name, AccessorFlags::ALLOW_BROADCAST).is_err());
        assert_eq!(
            convert_value(&name, AttributeType::Name, AccessorFlags::ALLOW_CONSTRUCTIBLE).unwrap(),
            AttributeValue::Name(Name::new("Tree"))
        );
    }
}
