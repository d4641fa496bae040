//! Type-erased attribute values.
//!
//! [`AttributeValue`] is the tagged variant that crosses type-erased seams
//! (accessors, chain extraction, partitioning). Conversions between variants
//! follow two rule sets: *broadcast* (lossless widening, scalar to vector)
//! and *constructible* (explicit conversions that are always defined).

use super::{AttributeType, DQuat, DVec2, DVec3, DVec4, Rotator, Transform};
use std::fmt;
use std::hash::{Hash, Hasher};

/// Case-insensitive identifier.
#[derive(Clone, Default, Eq)]
pub struct Name(String);

impl Name {
    /// Create a name.
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    /// The empty ("none") name.
    pub fn none() -> Self {
        Self(String::new())
    }

    /// Name text as written.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether this is the empty name.
    pub fn is_none(&self) -> bool {
        self.0.is_empty()
    }
}

impl PartialEq for Name {
    fn eq(&self, other: &Self) -> bool {
        self.0.eq_ignore_ascii_case(&other.0)
    }
}

impl Hash for Name {
    fn hash<H: Hasher>(&self, state: &mut H) {
        for b in self.0.bytes() {
            state.write_u8(b.to_ascii_lowercase());
        }
    }
}

impl fmt::Debug for Name {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Name({:?})", self.0)
    }
}

impl fmt::Display for Name {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Name {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for Name {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// A single attribute value of any supported type.
#[derive(Clone, Debug, PartialEq)]
pub enum AttributeValue {
    Float(f32),
    Double(f64),
    Int32(i32),
    Int64(i64),
    Vector2(DVec2),
    Vector(DVec3),
    Vector4(DVec4),
    Quat(DQuat),
    Transform(Transform),
    String(String),
    Boolean(bool),
    Rotator(Rotator),
    Name(Name),
}

impl AttributeValue {
    /// Type of this value.
    pub fn value_type(&self) -> AttributeType {
        match self {
            Self::Float(_) => AttributeType::Float,
            Self::Double(_) => AttributeType::Double,
            Self::Int32(_) => AttributeType::Int32,
            Self::Int64(_) => AttributeType::Int64,
            Self::Vector2(_) => AttributeType::Vector2,
            Self::Vector(_) => AttributeType::Vector,
            Self::Vector4(_) => AttributeType::Vector4,
            Self::Quat(_) => AttributeType::Quat,
            Self::Transform(_) => AttributeType::Transform,
            Self::String(_) => AttributeType::String,
            Self::Boolean(_) => AttributeType::Boolean,
            Self::Rotator(_) => AttributeType::Rotator,
            Self::Name(_) => AttributeType::Name,
        }
    }

    /// Zero value of a type (identity transform, empty strings).
    pub fn zero(ty: AttributeType) -> Self {
        match ty {
            AttributeType::Float => Self::Float(0.0),
            AttributeType::Double => Self::Double(0.0),
            AttributeType::Int32 => Self::Int32(0),
            AttributeType::Int64 => Self::Int64(0),
            AttributeType::Vector2 => Self::Vector2(DVec2::ZERO),
            AttributeType::Vector => Self::Vector(DVec3::ZERO),
            AttributeType::Vector4 => Self::Vector4(DVec4::ZERO),
            AttributeType::Quat => Self::Quat(DQuat::IDENTITY),
            AttributeType::Transform => Self::Transform(Transform::IDENTITY),
            AttributeType::String => Self::String(String::new()),
            AttributeType::Boolean => Self::Boolean(false),
            AttributeType::Rotator => Self::Rotator(Rotator::ZERO),
            AttributeType::Name => Self::Name(Name::none()),
        }
    }

    /// Scalar numeric view (bool as 0/1), used by broadcast.
    fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Float(v) => Some(*v as f64),
            Self::Double(v) => Some(*v),
            Self::Int32(v) => Some(*v as f64),
            Self::Int64(v) => Some(*v as f64),
            Self::Boolean(v) => Some(if *v { 1.0 } else { 0.0 }),
            _ => None,
        }
    }

    /// Whether `from` can be widened into `to` without losing meaning.
    pub fn is_broadcastable(from: AttributeType, to: AttributeType) -> bool {
        use AttributeType as T;
        if from == to || to == T::String {
            return true;
        }
        match from {
            T::Boolean => matches!(to, T::Int32 | T::Int64 | T::Float | T::Double),
            T::Int32 => matches!(to, T::Int64 | T::Float | T::Double) || to.is_vector(),
            T::Int64 | T::Float => matches!(to, T::Double) || to.is_vector(),
            T::Double => to.is_vector(),
            T::Vector2 => matches!(to, T::Vector | T::Vector4),
            T::Vector => matches!(to, T::Vector4),
            _ => false,
        }
    }

    /// Whether `from` can be explicitly constructed into `to`.
    pub fn is_constructible(from: AttributeType, to: AttributeType) -> bool {
        use AttributeType as T;
        matches!(
            (from, to),
            (T::String, T::Name)
                | (T::Name, T::String)
                | (T::Rotator, T::Quat)
                | (T::Quat, T::Rotator)
                | (T::Vector4, T::Vector)
                | (T::Vector, T::Transform)
        )
    }

    /// Broadcast this value into `to`. Returns `None` if not broadcastable.
    pub fn broadcast(&self, to: AttributeType) -> Option<Self> {
        use AttributeType as T;
        let from = self.value_type();
        if from == to {
            return Some(self.clone());
        }
        if !Self::is_broadcastable(from, to) {
            return None;
        }
        if to == T::String {
            return Some(Self::String(self.to_display_string()));
        }

        if let Some(s) = self.as_f64() {
            return Some(match to {
                T::Int32 => Self::Int32(s as i32),
                T::Int64 => Self::Int64(s as i64),
                T::Float => Self::Float(s as f32),
                T::Double => Self::Double(s),
                T::Vector2 => Self::Vector2(DVec2::splat(s)),
                T::Vector => Self::Vector(DVec3::splat(s)),
                T::Vector4 => Self::Vector4(DVec4::splat(s)),
                _ => return None,
            });
        }

        match (self, to) {
            (Self::Vector2(v), T::Vector) => Some(Self::Vector(v.extend(0.0))),
            (Self::Vector2(v), T::Vector4) => Some(Self::Vector4(v.extend(0.0).extend(0.0))),
            (Self::Vector(v), T::Vector4) => Some(Self::Vector4(v.extend(0.0))),
            _ => None,
        }
    }

    /// Construct `to` from this value. Returns `None` if not constructible.
    pub fn construct(&self, to: AttributeType) -> Option<Self> {
        use AttributeType as T;
        match (self, to) {
            (Self::String(s), T::Name) => Some(Self::Name(Name::new(s.clone()))),
            (Self::Name(n), T::String) => Some(Self::String(n.as_str().to_string())),
            (Self::Rotator(r), T::Quat) => Some(Self::Quat(r.to_quat())),
            (Self::Quat(q), T::Rotator) => Some(Self::Rotator(Rotator::from_quat(*q))),
            (Self::Vector4(v), T::Vector) => Some(Self::Vector(v.truncate())),
            (Self::Vector(v), T::Transform) => {
                Some(Self::Transform(Transform::from_translation(*v)))
            }
            _ => None,
        }
    }

    /// Human readable form, also used for broadcast to string.
    pub fn to_display_string(&self) -> String {
        match self {
            Self::Float(v) => format!("{v}"),
            Self::Double(v) => format!("{v}"),
            Self::Int32(v) => format!("{v}"),
            Self::Int64(v) => format!("{v}"),
            Self::Vector2(v) => format!("X={} Y={}", v.x, v.y),
            Self::Vector(v) => format!("X={} Y={} Z={}", v.x, v.y, v.z),
            Self::Vector4(v) => format!("X={} Y={} Z={} W={}", v.x, v.y, v.z, v.w),
            Self::Quat(q) => format!("X={} Y={} Z={} W={}", q.x, q.y, q.z, q.w),
            Self::Transform(t) => format!(
                "{}|{}|{}",
                Self::Vector(t.translation).to_display_string(),
                Self::Quat(t.rotation).to_display_string(),
                Self::Vector(t.scale).to_display_string()
            ),
            Self::String(s) => s.clone(),
            Self::Boolean(b) => if *b { "true" } else { "false" }.to_string(),
            Self::Rotator(r) => format!("P={} Y={} R={}", r.pitch, r.yaw, r.roll),
            Self::Name(n) => n.to_string(),
        }
    }

    /// Canonical bytes for hashing: equal values produce equal bytes.
    ///
    /// `-0.0` is folded into `0.0`, names are lowercased and quaternions are
    /// flipped to a positive `w` so that `q` and `-q` hash alike.
    pub fn canonical_bytes(&self, out: &mut Vec<u8>) {
        fn push_f64(out: &mut Vec<u8>, v: f64) {
            let v = if v == 0.0 { 0.0 } else { v };
            out.extend_from_slice(&v.to_bits().to_le_bytes());
        }

        out.push(self.value_type().id());
        match self {
            Self::Float(v) => push_f64(out, *v as f64),
            Self::Double(v) => push_f64(out, *v),
            Self::Int32(v) => out.extend_from_slice(&v.to_le_bytes()),
            Self::Int64(v) => out.extend_from_slice(&v.to_le_bytes()),
            Self::Vector2(v) => v.to_array().iter().for_each(|c| push_f64(out, *c)),
            Self::Vector(v) => v.to_array().iter().for_each(|c| push_f64(out, *c)),
            Self::Vector4(v) => v.to_array().iter().for_each(|c| push_f64(out, *c)),
            Self::Quat(q) => {
                let q = if q.w < 0.0 { -*q } else { *q };
                q.to_array().iter().for_each(|c| push_f64(out, *c));
            }
            Self::Transform(t) => out.extend_from_slice(bytemuck::bytes_of(t)),
            Self::String(s) => out.extend_from_slice(s.as_bytes()),
            Self::Boolean(b) => out.push(*b as u8),
            Self::Rotator(r) => out.extend_from_slice(bytemuck::bytes_of(r)),
            Self::Name(n) => out.extend(n.as_str().bytes().map(|b| b.to_ascii_lowercase())),
        }
    }
}

impl fmt::Display for AttributeValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_display_string())
    }
}
