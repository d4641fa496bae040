//! Field extraction chains (`$Transform.Position.X`).
//!
//! Each extra name of a selector becomes one [`Extractor`] hop, looked up by
//! the declared type of the previous hop. The output type of the chain is
//! therefore known before any value is read.

use smallvec::SmallVec;

use super::{convert_value, AccessorFlags, AccessorKeys, AttributeAccessor};
use crate::util::{AttributeType, AttributeValue, DQuat, DVec2, DVec3, DVec4, Error, Result};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Axis {
    Forward,
    Right,
    Up,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Angle {
    Roll,
    Pitch,
    Yaw,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Part {
    Translation,
    Rotation,
    Scale,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Extraction {
    /// Scalar component of a vector or quaternion.
    Component(usize),
    /// Leading components as a smaller vector.
    Swizzle(usize),
    Length,
    Axis(Axis),
    Angle(Angle),
    Part(Part),
}

/// One hop of an extraction chain.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Extractor {
    name: &'static str,
    input_type: AttributeType,
    output_type: AttributeType,
    extraction: Extraction,
}

fn components(value: &AttributeValue) -> Option<([f64; 4], usize)> {
    match value {
        AttributeValue::Vector2(v) => Some(([v.x, v.y, 0.0, 0.0], 2)),
        AttributeValue::Vector(v) => Some(([v.x, v.y, v.z, 0.0], 3)),
        AttributeValue::Vector4(v) => Some((v.to_array(), 4)),
        AttributeValue::Quat(q) => Some(([q.x, q.y, q.z, q.w], 4)),
        _ => None,
    }
}

fn from_components(ty: AttributeType, c: [f64; 4]) -> Option<AttributeValue> {
    match ty {
        AttributeType::Vector2 => Some(AttributeValue::Vector2(DVec2::new(c[0], c[1]))),
        AttributeType::Vector => Some(AttributeValue::Vector(DVec3::new(c[0], c[1], c[2]))),
        AttributeType::Vector4 => Some(AttributeValue::Vector4(DVec4::from_array(c))),
        AttributeType::Quat => Some(AttributeValue::Quat(DQuat::from_array(c))),
        _ => None,
    }
}

fn vector_type(len: usize) -> AttributeType {
    match len {
        2 => AttributeType::Vector2,
        3 => AttributeType::Vector,
        _ => AttributeType::Vector4,
    }
}

impl Extractor {
    /// Extractor for `name` on values of type `ty` (case-insensitive).
    pub fn find(ty: AttributeType, name: &str) -> Option<Self> {
        use AttributeType as T;
        use Extraction as E;

        let table: &[(&'static str, AttributeType, Extraction)] = match ty {
            T::Vector2 => &[
                ("X", T::Double, E::Component(0)),
                ("Y", T::Double, E::Component(1)),
                ("R", T::Double, E::Component(0)),
                ("G", T::Double, E::Component(1)),
                ("Length", T::Double, E::Length),
            ],
            T::Vector => &[
                ("X", T::Double, E::Component(0)),
                ("Y", T::Double, E::Component(1)),
                ("Z", T::Double, E::Component(2)),
                ("R", T::Double, E::Component(0)),
                ("G", T::Double, E::Component(1)),
                ("B", T::Double, E::Component(2)),
                ("XY", T::Vector2, E::Swizzle(2)),
                ("Length", T::Double, E::Length),
            ],
            T::Vector4 => &[
                ("X", T::Double, E::Component(0)),
                ("Y", T::Double, E::Component(1)),
                ("Z", T::Double, E::Component(2)),
                ("W", T::Double, E::Component(3)),
                ("R", T::Double, E::Component(0)),
                ("G", T::Double, E::Component(1)),
                ("B", T::Double, E::Component(2)),
                ("A", T::Double, E::Component(3)),
                ("XY", T::Vector2, E::Swizzle(2)),
                ("XYZ", T::Vector, E::Swizzle(3)),
                ("RGB", T::Vector, E::Swizzle(3)),
            ],
            T::Quat => &[
                ("X", T::Double, E::Component(0)),
                ("Y", T::Double, E::Component(1)),
                ("Z", T::Double, E::Component(2)),
                ("W", T::Double, E::Component(3)),
                ("Forward", T::Vector, E::Axis(Axis::Forward)),
                ("Right", T::Vector, E::Axis(Axis::Right)),
                ("Up", T::Vector, E::Axis(Axis::Up)),
            ],
            T::Rotator => &[
                ("Roll", T::Double, E::Angle(Angle::Roll)),
                ("Pitch", T::Double, E::Angle(Angle::Pitch)),
                ("Yaw", T::Double, E::Angle(Angle::Yaw)),
                ("R", T::Double, E::Angle(Angle::Roll)),
                ("P", T::Double, E::Angle(Angle::Pitch)),
                ("Y", T::Double, E::Angle(Angle::Yaw)),
                ("Forward", T::Vector, E::Axis(Axis::Forward)),
                ("Right", T::Vector, E::Axis(Axis::Right)),
                ("Up", T::Vector, E::Axis(Axis::Up)),
            ],
            T::Transform => &[
                ("Position", T::Vector, E::Part(Part::Translation)),
                ("Location", T::Vector, E::Part(Part::Translation)),
                ("Translation", T::Vector, E::Part(Part::Translation)),
                ("Rotation", T::Quat, E::Part(Part::Rotation)),
                ("Scale", T::Vector, E::Part(Part::Scale)),
            ],
            _ => &[],
        };

        table
            .iter()
            .find(|(n, _, _)| n.eq_ignore_ascii_case(name))
            .map(|&(name, output_type, extraction)| Self {
                name,
                input_type: ty,
                output_type,
                extraction,
            })
    }

    #[inline]
    pub fn name(&self) -> &'static str {
        self.name
    }

    #[inline]
    pub fn input_type(&self) -> AttributeType {
        self.input_type
    }

    #[inline]
    pub fn output_type(&self) -> AttributeType {
        self.output_type
    }

    /// Whether the extracted field can be written back.
    pub fn is_writable(&self) -> bool {
        !matches!(self.extraction, Extraction::Length | Extraction::Axis(_))
    }

    /// Extract the field from a value of the input type.
    pub fn extract(&self, value: &AttributeValue) -> Option<AttributeValue> {
        match self.extraction {
            Extraction::Component(i) => {
                let (c, len) = components(value)?;
                (i < len).then(|| AttributeValue::Double(c[i]))
            }
            Extraction::Swizzle(n) => {
                let (c, len) = components(value)?;
                if n > len {
                    return None;
                }
                from_components(vector_type(n), c)
            }
            Extraction::Length => {
                let (c, len) = components(value)?;
                Some(AttributeValue::Double(c[..len].iter().map(|x| x * x).sum::<f64>().sqrt()))
            }
            Extraction::Axis(axis) => {
                let q = match value {
                    AttributeValue::Quat(q) => *q,
                    AttributeValue::Rotator(r) => r.to_quat(),
                    _ => return None,
                };
                let v = match axis {
                    Axis::Forward => DVec3::X,
                    Axis::Right => DVec3::Y,
                    Axis::Up => DVec3::Z,
                };
                Some(AttributeValue::Vector(q * v))
            }
            Extraction::Angle(angle) => match value {
                AttributeValue::Rotator(r) => Some(AttributeValue::Double(match angle {
                    Angle::Roll => r.roll,
                    Angle::Pitch => r.pitch,
                    Angle::Yaw => r.yaw,
                })),
                _ => None,
            },
            Extraction::Part(part) => match value {
                AttributeValue::Transform(t) => Some(match part {
                    Part::Translation => AttributeValue::Vector(t.translation),
                    Part::Rotation => AttributeValue::Quat(t.rotation),
                    Part::Scale => AttributeValue::Vector(t.scale),
                }),
                _ => None,
            },
        }
    }

    /// Write the field into `target`. `field` must be of the output type.
    pub fn inject(&self, target: &mut AttributeValue, field: &AttributeValue) -> bool {
        match (self.extraction, field) {
            (Extraction::Component(i), AttributeValue::Double(x)) => {
                let Some((mut c, len)) = components(target) else {
                    return false;
                };
                if i >= len {
                    return false;
                }
                c[i] = *x;
                match from_components(target.value_type(), c) {
                    Some(v) => {
                        *target = v;
                        true
                    }
                    None => false,
                }
            }
            (Extraction::Swizzle(n), _) => {
                let (Some((mut c, len)), Some((f, flen))) =
                    (components(target), components(field))
                else {
                    return false;
                };
                if n > len || flen != n {
                    return false;
                }
                c[..n].copy_from_slice(&f[..n]);
                match from_components(target.value_type(), c) {
                    Some(v) => {
                        *target = v;
                        true
                    }
                    None => false,
                }
            }
            (Extraction::Angle(angle), AttributeValue::Double(x)) => {
                let AttributeValue::Rotator(r) = target else {
                    return false;
                };
                match angle {
                    Angle::Roll => r.roll = *x,
                    Angle::Pitch => r.pitch = *x,
                    Angle::Yaw => r.yaw = *x,
                }
                true
            }
            (Extraction::Part(part), field) => {
                let AttributeValue::Transform(t) = target else {
                    return false;
                };
                match (part, field) {
                    (Part::Translation, AttributeValue::Vector(v)) => t.translation = *v,
                    (Part::Scale, AttributeValue::Vector(v)) => t.scale = *v,
                    (Part::Rotation, AttributeValue::Quat(q)) => t.rotation = q.normalize(),
                    _ => return false,
                }
                true
            }
            _ => false,
        }
    }
}

/// Accessor reading a base accessor through a chain of extractors.
pub struct ChainAccessor {
    base: Box<dyn AttributeAccessor>,
    hops: SmallVec<[Extractor; 2]>,
}

impl ChainAccessor {
    /// Chain `base` through `names`. Fails on the first name that has no
    /// extractor for the type reached so far.
    pub fn new<S: AsRef<str>>(base: Box<dyn AttributeAccessor>, names: &[S]) -> Result<Self> {
        let mut hops = SmallVec::new();
        let mut ty = base.value_type();
        for name in names {
            let name = name.as_ref();
            let hop = Extractor::find(ty, name).ok_or_else(|| Error::UnsupportedExtraName {
                name: name.to_string(),
                value_type: ty.to_string(),
            })?;
            ty = hop.output_type;
            hops.push(hop);
        }
        Ok(Self { base, hops })
    }

    pub fn hops(&self) -> &[Extractor] {
        &self.hops
    }

    fn extract_all(&self, value: &AttributeValue) -> Result<AttributeValue> {
        let mut current = value.clone();
        for hop in &self.hops {
            current = hop
                .extract(&current)
                .ok_or_else(|| Error::type_mismatch(hop.input_type, current.value_type()))?;
        }
        Ok(current)
    }

    /// Replace the innermost field of `base_value` by `field`.
    fn inject_all(&self, base_value: &mut AttributeValue, field: AttributeValue) -> Result<()> {
        let mut stack = Vec::with_capacity(self.hops.len());
        stack.push(base_value.clone());
        for hop in &self.hops[..self.hops.len() - 1] {
            let next = stack
                .last()
                .and_then(|v| hop.extract(v))
                .ok_or_else(|| Error::type_mismatch(hop.input_type, base_value.value_type()))?;
            stack.push(next);
        }

        let mut field = field;
        for hop in self.hops.iter().rev() {
            let mut target = stack.pop().ok_or_else(|| Error::other("extraction stack underflow"))?;
            if !hop.inject(&mut target, &field) {
                return Err(Error::UnsupportedOperation(format!(
                    "cannot write '{}' on {}",
                    hop.name, hop.input_type
                )));
            }
            field = target;
        }
        *base_value = field;
        Ok(())
    }
}

impl AttributeAccessor for ChainAccessor {
    fn value_type(&self) -> AttributeType {
        self.hops.last().map_or(self.base.value_type(), |h| h.output_type)
    }

    fn is_read_only(&self) -> bool {
        self.base.is_read_only() || self.hops.iter().any(|h| !h.is_writable())
    }

    fn get_range(

        &self,

        out: &mut [AttributeValue],

        start: usize,

        keys: &dyn AccessorKeys,

    ) -> Result<()> {
        let mut base = vec![AttributeValue::zero(self.base.value_type()); out.len()];
        self.base.get_range(&mut base, start, keys)?;
        for (slot, value) in out.iter_mut().zip(&base) {
            *slot = self.extract_all(value)?;
        }
        Ok(())
    }

    fn set_range(
        &self,
        values: &[AttributeValue],
        start: usize,
        keys: &mut dyn AccessorKeys,
        flags: AccessorFlags,
    ) -> Result<()> {
        if self.is_read_only() {
            return Err(Error::ReadOnly);
        }
        if self.hops.is_empty() {
            return self.base.set_range(values, start, keys, flags);
        }

        let ty = self.value_type();
        let mut base = vec![AttributeValue::zero(self.base.value_type()); values.len()];
        self.base.get_range(&mut base, start, keys)?;
        for (target, value) in base.iter_mut().zip(values) {
            self.inject_all(target, convert_value(value, ty, flags)?)?;
        }
        let flags = if flags.contains(AccessorFlags::ALLOW_SET_DEFAULT_VALUE) {
            AccessorFlags::ALLOW_SET_DEFAULT_VALUE
        } else {
            AccessorFlags::STRICT_TYPE
        };
        self.base.set_range(&base, start, keys, flags)
    }
}

/// Wrap `base` with one extractor per extra name. No names returns `base`.
pub fn create_chain_accessor<S: AsRef<str>>(
    base: Box<dyn AttributeAccessor>,
    extra_names: &[S],
) -> Result<Box<dyn AttributeAccessor>> {
    if extra_names.is_empty() {
        return Ok(base);
    }
    Ok(Box::new(ChainAccessor::new(base, extra_names)?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::accessor::{ElementKeys, PropertyAccessor};
    use crate::data::{point_property, Point};
    use crate::util::{Rotator, Transform};

    #[test]
    fn test_find_is_case_insensitive() {
        let hop = Extractor::find(AttributeType::Transform, "position").unwrap();
        assert_eq!(hop.output_type(), AttributeType::Vector);
        assert!(Extractor::find(AttributeType::Vector, "W").is_none());
        assert!(Extractor::find(AttributeType::Float, "X").is_none());
        assert!(!Extractor::find(AttributeType::Vector, "Length").unwrap().is_writable());
    }

    #[test]
    fn test_extract_and_inject() {
        let t = Transform::from_translation(DVec3::new(1.0, 2.0, 3.0));
        let mut value = AttributeValue::Transform(t);
        let pos = Extractor::find(AttributeType::Transform, "Location").unwrap();
        let z = Extractor::find(AttributeType::Vector, "Z").unwrap();
        let p = pos.extract(&value).unwrap();
        assert_eq!(z.extract(&p), Some(AttributeValue::Double(3.0)));

        let mut p = p;
        assert!(z.inject(&mut p, &AttributeValue::Double(9.0)));
        assert!(pos.inject(&mut value, &p));
        let AttributeValue::Transform(t) = value else {
            panic!("not a transform");
        };
        assert_eq!(t.translation, DVec3::new(1.0, 2.0, 9.0));

        let mut r = AttributeValue::Rotator(Rotator::new(10.0, 20.0, 30.0));
        let yaw = Extractor::find(AttributeType::Rotator, "Y").unwrap();
        assert_eq!(yaw.extract(&r), Some(AttributeValue::Double(20.0)));
        assert!(yaw.inject(&mut r, &AttributeValue::Double(45.0)));
        assert_eq!(r, AttributeValue::Rotator(Rotator::new(10.0, 45.0, 30.0)));
    }

    #[test]
    fn test_chain_over_point_property() {
        let mut points = vec![Point::new(DVec3::new(1.0, 2.0, 3.0)), Point::new(DVec3::ZERO)];
        let base = Box::new(PropertyAccessor::new(point_property("Transform").unwrap(), false));
        let chain = create_chain_accessor(base, &["Position", "Z"]).unwrap();
        assert_eq!(chain.value_type(), AttributeType::Double);

        let mut keys = ElementKeys::Mut(&mut points[..]);
        assert_eq!(chain.get(0, &keys).unwrap(), AttributeValue::Double(3.0));
        chain
            .set(AttributeValue::Int32(7), 1, &mut keys, AccessorFlags::ALLOW_BROADCAST)
            .unwrap();
        assert_eq!(points[1].transform.translation, DVec3::new(0.0, 0.0, 7.0));
    }

    #[test]
    fn test_unsupported_hop() {
        let base = Box::new(PropertyAccessor::new(point_property("Density").unwrap(), false));
        assert!(matches!(
            create_chain_accessor(base, &["X"]),
            Err(Error::UnsupportedExtraName { .. })
        ));
        let base = Box::new(PropertyAccessor::new(point_property("Position").unwrap(), false));
        let chain = create_chain_accessor(base, &["Length"]).unwrap();
        assert!(chain.is_read_only());
    }
}
