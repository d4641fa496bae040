//! The [`MetadataType`] trait - what a concrete type must provide to be
//! stored in a typed attribute column.

use std::fmt;
use std::hash::{Hash, Hasher};
use std::io::{self, Read, Write};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use murmur3::Murmur3Hasher;

use super::MetadataOp;
use crate::util::{
    align_quat, quat_rotation_eq, AttributeType, AttributeValue, DQuat, DVec2, DVec3, DVec4,
    Name, Rotator, Transform,
};

/// Types that can be stored in a [`TypedAttribute`](super::TypedAttribute).
pub trait MetadataType: Clone + Send + Sync + fmt::Debug + 'static {
    /// The corresponding attribute type.
    const TYPE: AttributeType;

    /// Default value used when an attribute is created without one.
    fn zero() -> Self;

    /// Starting point of a weighted accumulation.
    fn accumulation_zero() -> Self {
        Self::zero()
    }

    /// Wrap into the type-erased variant.
    fn to_value(&self) -> AttributeValue;

    /// Unwrap from the type-erased variant (exact type only).
    fn from_value(value: &AttributeValue) -> Option<Self>;

    /// Value equality as used by interning and partitioning.
    fn values_equal(&self, other: &Self) -> bool;

    /// Hash agreeing with [`values_equal`](Self::values_equal), used to
    /// index interned values.
    fn intern_hash(&self) -> u64 {
        let mut bytes = Vec::new();
        match self.write_to(&mut bytes) {
            Ok(()) => murmur3::hash128(&bytes).0,
            Err(_) => 0,
        }
    }

    /// Combine `self` (source) with `other` (target).
    /// Returns `None` when the operation has no meaning for this type.
    fn merge(&self, other: &Self, op: MetadataOp) -> Option<Self>;

    /// `self += other * weight`. Returns false if the type cannot be blended.
    fn weighted_add(&mut self, other: &Self, weight: f32) -> bool;

    /// Normalization after the last `weighted_add`.
    fn finish_accumulation(&mut self) {}

    /// Little-endian binary encoding.
    fn write_to<W: Write>(&self, w: &mut W) -> io::Result<()>;

    /// Inverse of [`write_to`](Self::write_to).
    fn read_from<R: Read>(r: &mut R) -> io::Result<Self>;
}

/// Applies the op for types with a total set of arithmetic operations.
fn arithmetic<T: Clone>(
    a: &T,
    b: &T,
    op: MetadataOp,
    min: impl Fn(&T, &T) -> T,
    max: impl Fn(&T, &T) -> T,
    sub: impl Fn(&T, &T) -> T,
    add: impl Fn(&T, &T) -> T,
    mul: impl Fn(&T, &T) -> T,
    div: impl Fn(&T, &T) -> Option<T>,
) -> Option<T> {
    match op {
        MetadataOp::Min => Some(min(a, b)),
        MetadataOp::Max => Some(max(a, b)),
        MetadataOp::Sub => Some(sub(a, b)),
        MetadataOp::Add => Some(add(a, b)),
        MetadataOp::Mul => Some(mul(a, b)),
        MetadataOp::Div => div(a, b),
        MetadataOp::SourceValue => Some(a.clone()),
        MetadataOp::TargetValue => Some(b.clone()),
    }
}

/// Source/target selection for types without arithmetic.
fn select<T: Clone>(a: &T, b: &T, op: MetadataOp) -> Option<T> {
    match op {
        MetadataOp::SourceValue => Some(a.clone()),
        MetadataOp::TargetValue => Some(b.clone()),
        _ => None,
    }
}

fn write_string<W: Write>(w: &mut W, s: &str) -> io::Result<()> {
    w.write_u32::<LittleEndian>(s.len() as u32)?;
    w.write_all(s.as_bytes())
}

/// Upper bound on capacity reserved from a length read off a stream.
pub(crate) const PREALLOC_LIMIT: usize = 4096;

/// Read exactly `len` bytes, growing the buffer only as data arrives.
pub(crate) fn read_bytes<R: Read + ?Sized>(r: &mut R, len: usize) -> io::Result<Vec<u8>> {
    let mut buf = Vec::with_capacity(len.min(PREALLOC_LIMIT));
    Read::take(&mut *r, len as u64).read_to_end(&mut buf)?;
    if buf.len() != len {
        return Err(io::Error::new(
            io::ErrorKind::UnexpectedEof,
            format!("expected {len} bytes, stream holds {}", buf.len()),
        ));
    }
    Ok(buf)
}

fn read_string<R: Read>(r: &mut R) -> io::Result<String> {
    let len = r.read_u32::<LittleEndian>()? as usize;
    let buf = read_bytes(r, len)?;
    String::from_utf8(buf).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
}

fn write_f64s<W: Write>(w: &mut W, values: &[f64]) -> io::Result<()> {
    for v in values {
        w.write_f64::<LittleEndian>(*v)?;
    }
    Ok(())
}

fn read_f64s<R: Read, const N: usize>(r: &mut R) -> io::Result<[f64; N]> {
    let mut out = [0.0; N];
    for v in &mut out {
        *v = r.read_f64::<LittleEndian>()?;
    }
    Ok(out)
}

macro_rules! impl_float {
    ($ty:ty, $variant:ident, $write:ident, $read:ident) => {
        impl MetadataType for $ty {
            const TYPE: AttributeType = AttributeType::$variant;

            fn zero() -> Self {
                0.0
            }

            fn to_value(&self) -> AttributeValue {
                AttributeValue::$variant(*self)
            }

            fn from_value(value: &AttributeValue) -> Option<Self> {
                match value {
                    AttributeValue::$variant(v) => Some(*v),
                    _ => None,
                }
            }

            fn values_equal(&self, other: &Self) -> bool {
                self == other
            }

            fn merge(&self, other: &Self, op: MetadataOp) -> Option<Self> {
                arithmetic(
                    self,
                    other,
                    op,
                    |a, b| a.min(*b),
                    |a, b| a.max(*b),
                    |a, b| a - b,
                    |a, b| a + b,
                    |a, b| a * b,
                    |a, b| Some(a / b),
                )
            }

            fn weighted_add(&mut self, other: &Self, weight: f32) -> bool {
                *self += *other * weight as $ty;
                true
            }

            fn write_to<W: Write>(&self, w: &mut W) -> io::Result<()> {
                w.$write::<LittleEndian>(*self)
            }

            fn read_from<R: Read>(r: &mut R) -> io::Result<Self> {
                r.$read::<LittleEndian>()
            }
        }
    };
}

macro_rules! impl_int {
    ($ty:ty, $variant:ident, $write:ident, $read:ident) => {
        impl MetadataType for $ty {
            const TYPE: AttributeType = AttributeType::$variant;

            fn zero() -> Self {
                0
            }

            fn to_value(&self) -> AttributeValue {
                AttributeValue::$variant(*self)
            }

            fn from_value(value: &AttributeValue) -> Option<Self> {
                match value {
                    AttributeValue::$variant(v) => Some(*v),
                    _ => None,
                }
            }

            fn values_equal(&self, other: &Self) -> bool {
                self == other
            }

            fn merge(&self, other: &Self, op: MetadataOp) -> Option<Self> {
                arithmetic(
                    self,
                    other,
                    op,
                    |a, b| *a.min(b),
                    |a, b| *a.max(b),
                    |a, b| a.wrapping_sub(*b),
                    |a, b| a.wrapping_add(*b),
                    |a, b| a.wrapping_mul(*b),
                    |a, b| a.checked_div(*b),
                )
            }

            fn weighted_add(&mut self, other: &Self, weight: f32) -> bool {
                *self = self.wrapping_add((*other as f64 * weight as f64).round() as $ty);
                true
            }

            fn write_to<W: Write>(&self, w: &mut W) -> io::Result<()> {
                w.$write::<LittleEndian>(*self)
            }

            fn read_from<R: Read>(r: &mut R) -> io::Result<Self> {
                r.$read::<LittleEndian>()
            }
        }
    };
}

macro_rules! impl_vector {
    ($ty:ty, $variant:ident, $n:literal) => {
        impl MetadataType for $ty {
            const TYPE: AttributeType = AttributeType::$variant;

            fn zero() -> Self {
                <$ty>::ZERO
            }

            fn to_value(&self) -> AttributeValue {
                AttributeValue::$variant(*self)
            }

            fn from_value(value: &AttributeValue) -> Option<Self> {
                match value {
                    AttributeValue::$variant(v) => Some(*v),
                    _ => None,
                }
            }

            fn values_equal(&self, other: &Self) -> bool {
                self == other
            }

            fn merge(&self, other: &Self, op: MetadataOp) -> Option<Self> {
                arithmetic(
                    self,
                    other,
                    op,
                    |a, b| a.min(*b),
                    |a, b| a.max(*b),
                    |a, b| *a - *b,
                    |a, b| *a + *b,
                    |a, b| *a * *b,
                    |a, b| Some(*a / *b),
                )
            }

            fn weighted_add(&mut self, other: &Self, weight: f32) -> bool {
                *self += *other * weight as f64;
                true
            }

            fn write_to<W: Write>(&self, w: &mut W) -> io::Result<()> {
                write_f64s(w, &self.to_array())
            }

            fn read_from<R: Read>(r: &mut R) -> io::Result<Self> {
                Ok(<$ty>::from_array(read_f64s::<R, $n>(r)?))
            }
        }
    };
}

impl_float!(f32, Float, write_f32, read_f32);
impl_float!(f64, Double, write_f64, read_f64);
impl_int!(i32, Int32, write_i32, read_i32);
impl_int!(i64, Int64, write_i64, read_i64);
impl_vector!(DVec2, Vector2, 2);
impl_vector!(DVec3, Vector, 3);
impl_vector!(DVec4, Vector4, 4);

/// Length below which an accumulated quaternion is considered degenerate.
const QUAT_NORMALIZE_EPSILON: f64 = 1e-8;

fn normalize_or_identity(q: DQuat) -> DQuat {
    if q.length_squared() > QUAT_NORMALIZE_EPSILON {
        q.normalize()
    } else {
        DQuat::IDENTITY
    }
}

impl MetadataType for DQuat {
    const TYPE: AttributeType = AttributeType::Quat;

    fn zero() -> Self {
        DQuat::IDENTITY
    }

    fn accumulation_zero() -> Self {
        DQuat::from_xyzw(0.0, 0.0, 0.0, 0.0)
    }

    fn to_value(&self) -> AttributeValue {
        AttributeValue::Quat(*self)
    }

    fn from_value(value: &AttributeValue) -> Option<Self> {
        match value {
            AttributeValue::Quat(q) => Some(*q),
            _ => None,
        }
    }

    fn values_equal(&self, other: &Self) -> bool {
        quat_rotation_eq(*self, *other, 1e-8)
    }

    fn merge(&self, other: &Self, op: MetadataOp) -> Option<Self> {
        match op {
            MetadataOp::Add | MetadataOp::Mul => Some(*self * *other),
            MetadataOp::Sub | MetadataOp::Div => Some(*self * other.inverse()),
            _ => select(self, other, op),
        }
    }

    fn weighted_add(&mut self, other: &Self, weight: f32) -> bool {
        *self = *self + align_quat(*other, *self) * weight as f64;
        true
    }

    fn finish_accumulation(&mut self) {
        *self = normalize_or_identity(*self);
    }

    fn write_to<W: Write>(&self, w: &mut W) -> io::Result<()> {
        write_f64s(w, &self.to_array())
    }

    fn read_from<R: Read>(r: &mut R) -> io::Result<Self> {
        Ok(DQuat::from_array(read_f64s::<R, 4>(r)?))
    }
}

impl MetadataType for Rotator {
    const TYPE: AttributeType = AttributeType::Rotator;

    fn zero() -> Self {
        Rotator::ZERO
    }

    fn to_value(&self) -> AttributeValue {
        AttributeValue::Rotator(*self)
    }

    fn from_value(value: &AttributeValue) -> Option<Self> {
        match value {
            AttributeValue::Rotator(r) => Some(*r),
            _ => None,
        }
    }

    fn values_equal(&self, other: &Self) -> bool {
        self == other
    }

    fn merge(&self, other: &Self, op: MetadataOp) -> Option<Self> {
        arithmetic(
            self,
            other,
            op,
            |a, b| a.map2(*b, f64::min),
            |a, b| a.map2(*b, f64::max),
            |a, b| a.map2(*b, |x, y| x - y),
            |a, b| a.map2(*b, |x, y| x + y),
            |a, b| a.map2(*b, |x, y| x * y),
            |a, b| Some(a.map2(*b, |x, y| x / y)),
        )
    }

    fn weighted_add(&mut self, other: &Self, weight: f32) -> bool {
        let w = weight as f64;
        *self = self.map2(*other, |x, y| x + y * w);
        true
    }

    fn write_to<W: Write>(&self, w: &mut W) -> io::Result<()> {
        write_f64s(w, &[self.pitch, self.yaw, self.roll])
    }

    fn read_from<R: Read>(r: &mut R) -> io::Result<Self> {
        let [pitch, yaw, roll] = read_f64s::<R, 3>(r)?;
        Ok(Rotator::new(pitch, yaw, roll))
    }
}

/// Composition: apply `a`, then `b`.
fn compose(a: &Transform, b: &Transform) -> Transform {
    Transform {
        rotation: b.rotation * a.rotation,
        translation: b.rotation * (b.scale * a.translation) + b.translation,
        scale: a.scale * b.scale,
    }
}

impl MetadataType for Transform {
    const TYPE: AttributeType = AttributeType::Transform;

    fn zero() -> Self {
        Transform::IDENTITY
    }

    fn accumulation_zero() -> Self {
        Transform::new(DQuat::from_xyzw(0.0, 0.0, 0.0, 0.0), DVec3::ZERO, DVec3::ZERO)
    }

    fn to_value(&self) -> AttributeValue {
        AttributeValue::Transform(*self)
    }

    fn from_value(value: &AttributeValue) -> Option<Self> {
        match value {
            AttributeValue::Transform(t) => Some(*t),
            _ => None,
        }
    }

    fn values_equal(&self, other: &Self) -> bool {
        self.translation == other.translation
            && self.scale == other.scale
            && quat_rotation_eq(self.rotation, other.rotation, 1e-8)
    }

    fn merge(&self, other: &Self, op: MetadataOp) -> Option<Self> {
        match op {
            MetadataOp::Add | MetadataOp::Mul => Some(compose(self, other)),
            _ => select(self, other, op),
        }
    }

    fn weighted_add(&mut self, other: &Self, weight: f32) -> bool {
        let w = weight as f64;
        self.rotation = self.rotation + align_quat(other.rotation, self.rotation) * w;
        self.translation += other.translation * w;
        self.scale += other.scale * w;
        true
    }

    fn finish_accumulation(&mut self) {
        self.rotation = normalize_or_identity(self.rotation);
    }

    fn write_to<W: Write>(&self, w: &mut W) -> io::Result<()> {
        write_f64s(w, &self.rotation.to_array())?;
        write_f64s(w, &self.translation.to_array())?;
        write_f64s(w, &self.scale.to_array())
    }

    fn read_from<R: Read>(r: &mut R) -> io::Result<Self> {
        let rotation = DQuat::from_array(read_f64s::<R, 4>(r)?);
        let translation = DVec3::from_array(read_f64s::<R, 3>(r)?);
        let scale = DVec3::from_array(read_f64s::<R, 3>(r)?);
        Ok(Transform::new(rotation, translation, scale))
    }
}

impl MetadataType for String {
    const TYPE: AttributeType = AttributeType::String;

    fn zero() -> Self {
        String::new()
    }

    fn to_value(&self) -> AttributeValue {
        AttributeValue::String(self.clone())
    }

    fn from_value(value: &AttributeValue) -> Option<Self> {
        match value {
            AttributeValue::String(s) => Some(s.clone()),
            _ => None,
        }
    }

    fn values_equal(&self, other: &Self) -> bool {
        self == other
    }

    fn merge(&self, other: &Self, op: MetadataOp) -> Option<Self> {
        match op {
            MetadataOp::Add => Some(format!("{self}{other}")),
            _ => select(self, other, op),
        }
    }

    fn weighted_add(&mut self, _other: &Self, _weight: f32) -> bool {
        false
    }

    fn write_to<W: Write>(&self, w: &mut W) -> io::Result<()> {
        write_string(w, self)
    }

    fn read_from<R: Read>(r: &mut R) -> io::Result<Self> {
        read_string(r)
    }
}

impl MetadataType for Name {
    const TYPE: AttributeType = AttributeType::Name;

    fn zero() -> Self {
        Name::none()
    }

    fn to_value(&self) -> AttributeValue {
        AttributeValue::Name(self.clone())
    }

    fn from_value(value: &AttributeValue) -> Option<Self> {
        match value {
            AttributeValue::Name(n) => Some(n.clone()),
            _ => None,
        }
    }

    fn values_equal(&self, other: &Self) -> bool {
        self == other
    }

    fn intern_hash(&self) -> u64 {
        let mut hasher = Murmur3Hasher::default();
        self.hash(&mut hasher);
        hasher.finish()
    }

    fn merge(&self, other: &Self, op: MetadataOp) -> Option<Self> {
        select(self, other, op)
    }

    fn weighted_add(&mut self, _other: &Self, _weight: f32) -> bool {
        false
    }

    fn write_to<W: Write>(&self, w: &mut W) -> io::Result<()> {
        write_string(w, self.as_str())
    }

    fn read_from<R: Read>(r: &mut R) -> io::Result<Self> {
        read_string(r).map(Name::from)
    }
}

impl MetadataType for bool {
    const TYPE: AttributeType = AttributeType::Boolean;

    fn zero() -> Self {
        false
    }

    fn to_value(&self) -> AttributeValue {
        AttributeValue::Boolean(*self)
    }

    fn from_value(value: &AttributeValue) -> Option<Self> {
        match value {
            AttributeValue::Boolean(b) => Some(*b),
            _ => None,
        }
    }

    fn values_equal(&self, other: &Self) -> bool {
        self == other
    }

    fn merge(&self, other: &Self, op: MetadataOp) -> Option<Self> {
        match op {
            MetadataOp::Min => Some(*self && *other),
            MetadataOp::Max => Some(*self || *other),
            _ => select(self, other, op),
        }
    }

    fn weighted_add(&mut self, _other: &Self, _weight: f32) -> bool {
        false
    }

    fn write_to<W: Write>(&self, w: &mut W) -> io::Result<()> {
        w.write_u8(*self as u8)
    }

    fn read_from<R: Read>(r: &mut R) -> io::Result<Self> {
        Ok(r.read_u8()? != 0)
    }
}

/// Calls `$body` with `$T` bound to the concrete storage type of `$ty`.
///
/// ```ignore
/// let name = dispatch_type!(ty, T => T::TYPE.name());
/// ```
#[macro_export]
macro_rules! dispatch_type {
    ($ty:expr, $T:ident => $body:expr) => {{
        use $crate::util::AttributeType as __Ty;
        match $ty {
            __Ty::Float => { type $T = f32; $body }
            __Ty::Double => { type $T = f64; $body }
            __Ty::Int32 => { type $T = i32; $body }
            __Ty::Int64 => { type $T = i64; $body }
            __Ty::Vector2 => { type $T = $crate::util::DVec2; $body }
            __Ty::Vector => { type $T = $crate::util::DVec3; $body }
            __Ty::Vector4 => { type $T = $crate::util::DVec4; $body }
            __Ty::Quat => { type $T = $crate::util::DQuat; $body }
            __Ty::Transform => { type $T = $crate::util::Transform; $body }
            __Ty::String => { type $T = ::std::string::String; $body }
            __Ty::Boolean => { type $T = bool; $body }
            __Ty::Rotator => { type $T = $crate::util::Rotator; $body }
            __Ty::Name => { type $T = $crate::util::Name; $body }
        }
    }};
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip<T: MetadataType>(value: T) -> T {
        let mut buf = Vec::new();
        value.write_to(&mut buf).unwrap();
        T::read_from(&mut buf.as_slice()).unwrap()
    }

    #[test]
    fn test_scalar_merge() {
        assert_eq!(3i32.merge(&4, MetadataOp::Add), Some(7));
        assert_eq!(3i32.merge(&4, MetadataOp::SourceValue), Some(3));
        assert_eq!(3i32.merge(&4, MetadataOp::TargetValue), Some(4));
        assert_eq!(3i32.merge(&0, MetadataOp::Div), None);
        assert_eq!(2.0f64.merge(&8.0, MetadataOp::Max), Some(8.0));
    }

    #[test]
    fn test_vector_merge() {
        let a = DVec3::new(1.0, 5.0, 2.0);
        let b = DVec3::new(3.0, 1.0, 2.0);
        assert_eq!(a.merge(&b, MetadataOp::Min), Some(DVec3::new(1.0, 1.0, 2.0)));
        assert_eq!(a.merge(&b, MetadataOp::Mul), Some(DVec3::new(3.0, 5.0, 4.0)));
    }

    #[test]
    fn test_string_merge() {
        let a = String::from("ab");
        let b = String::from("cd");
        assert_eq!(a.merge(&b, MetadataOp::Add), Some("abcd".to_string()));
        assert_eq!(a.merge(&b, MetadataOp::Min), None);
        assert_eq!(
            Name::new("x").merge(&Name::new("y"), MetadataOp::TargetValue),
            Some(Name::new("y"))
        );
    }

    #[test]
    fn test_weighted_quat_normalizes() {
        let q = Rotator::new(0.0, 90.0, 0.0).to_quat();
        let mut acc = DQuat::accumulation_zero();
        assert!(acc.weighted_add(&q, 0.5));
        assert!(acc.weighted_add(&-q, 0.5));
        acc.finish_accumulation();
        assert!(acc.values_equal(&q));
    }

    #[test]
    fn test_weighted_not_interpolable() {
        let mut s = String::from("a");
        assert!(!s.weighted_add(&"b".to_string(), 1.0));
        assert_eq!(s, "a");
    }

    #[test]
    fn test_binary_roundtrip() {
        assert_eq!(roundtrip(1.5f32), 1.5);
        assert_eq!(roundtrip(-7i64), -7);
        assert_eq!(roundtrip(DVec4::new(1.0, 2.0, 3.0, 4.0)), DVec4::new(1.0, 2.0, 3.0, 4.0));
        assert_eq!(roundtrip(String::from("héllo")), "héllo");
        assert_eq!(roundtrip(Name::new("Tree")), Name::new("tree"));
        assert!(roundtrip(true));
        let t = Transform::new(DQuat::IDENTITY, DVec3::X, DVec3::splat(2.0));
        assert_eq!(roundtrip(t), t);
    }

    #[test]
    fn test_dispatch_type() {
        for ty in AttributeType::ALL {
            let resolved = dispatch_type!(ty, T => <T as MetadataType>::TYPE);
            assert_eq!(resolved, ty);
        }
    }
}
