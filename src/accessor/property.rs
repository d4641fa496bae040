//! Accessor over a static property of host elements.

use std::fmt;
use std::marker::PhantomData;

use super::{convert_value, AccessorFlags, AccessorKeys, AttributeAccessor};
use crate::data::MetadataElement;
use crate::util::{AttributeType, AttributeValue, Error, Result};

/// A named field of an element type, with getter and optional setter.
///
/// The setter receives a value already converted to `value_type`.
pub struct PropertyDescriptor<E> {
    pub name: &'static str,
    pub value_type: AttributeType,
    pub get: fn(&E) -> AttributeValue,
    pub set: Option<fn(&mut E, &AttributeValue)>,
}

impl<E> Clone for PropertyDescriptor<E> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<E> Copy for PropertyDescriptor<E> {}

impl<E> fmt::Debug for PropertyDescriptor<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PropertyDescriptor")
            .field("name", &self.name)
            .field("value_type", &self.value_type)
            .field("writable", &self.set.is_some())
            .finish()
    }
}

/// Reads and writes a property of the elements addressed by the keys.
pub struct PropertyAccessor<E> {
    descriptor: PropertyDescriptor<E>,
    read_only: bool,
    _element: PhantomData<fn() -> E>,
}

impl<E: MetadataElement> PropertyAccessor<E> {
    pub fn new(descriptor: PropertyDescriptor<E>, read_only: bool) -> Self {
        Self {
            descriptor,
            read_only,
            _element: PhantomData,
        }
    }

    pub fn descriptor(&self) -> &PropertyDescriptor<E> {
        &self.descriptor
    }

    fn missing_element(&self, index: usize) -> Error {
        Error::UnsupportedOperation(format!(
            "keys hold no {} at index {index} for property '{}'",
            std::any::type_name::<E>(),
            self.descriptor.name
        ))
    }
}

impl<E: MetadataElement> AttributeAccessor for PropertyAccessor<E> {
    fn value_type(&self) -> AttributeType {
        self.descriptor.value_type
    }

    fn is_read_only(&self) -> bool {
        self.read_only || self.descriptor.set.is_none()
    }

    fn get_range(

        &self,

        out: &mut [AttributeValue],

        start: usize,

        keys: &dyn AccessorKeys,

    ) -> Result<()> {
        for (i, slot) in out.iter_mut().enumerate() {
            let element = keys
                .element(start + i)
                .and_then(|e| e.downcast_ref::<E>())
                .ok_or_else(|| self.missing_element(start + i))?;
            *slot = (self.descriptor.get)(element);
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
        let setter = match self.descriptor.set {
            Some(set) if !self.read_only && !keys.is_read_only() => set,
            _ => return Err(Error::ReadOnly),
        };
        for (i, value) in values.iter().enumerate() {
            let value = convert_value(value, self.descriptor.value_type, flags)?;
            let element = keys
                .element_mut(start + i)
                .and_then(|e| e.downcast_mut::<E>())
                .ok_or_else(|| self.missing_element(start + i))?;
            setter(element, &value);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::accessor::{ElementKeys, EntryKeys};
    use crate::data::{point_property, Point};
    use crate::util::DVec3;

    #[test]
    fn test_point_density_range() {
        let mut points = vec![Point::default().with_density(0.25), Point::default()];
        let accessor = PropertyAccessor::new(point_property("Density").unwrap(), false);

        let mut keys = ElementKeys::Mut(&mut points[..]);
        accessor
            .set(AttributeValue::Float(0.5), 1, &mut keys, AccessorFlags::STRICT_TYPE)
            .unwrap();
        let mut out = vec![AttributeValue::Float(0.0); 2];
        accessor.get_range(&mut out, 0, &keys).unwrap();
        assert_eq!(out, vec![AttributeValue::Float(0.25), AttributeValue::Float(0.5)]);
    }

    #[test]
    fn test_broadcast_into_vector_property() {
        let mut points = vec![Point::default()];
        let accessor = PropertyAccessor::new(point_property("Scale").unwrap(), false);
        let mut keys = ElementKeys::Mut(&mut points[..]);
        accessor
            .set(AttributeValue::Double(2.0), 0, &mut keys, AccessorFlags::ALLOW_BROADCAST)
            .unwrap();
        assert_eq!(points[0].transform.scale, DVec3::splat(2.0));
    }

    #[test]
    fn test_read_only_property() {
        let mut points = vec![Point::default()];
        let accessor = PropertyAccessor::new(point_property("LocalSize").unwrap(), false);
        assert!(accessor.is_read_only());
        let mut keys = ElementKeys::Mut(&mut points[..]);
        assert!(matches!(
            accessor.set(
                AttributeValue::Vector(DVec3::ONE),
                0,
                &mut keys,
                AccessorFlags::STRICT_TYPE
            ),
            Err(Error::ReadOnly)
        ));

        let density = PropertyAccessor::new(point_property("Density").unwrap(), false);
        assert!(density.get(0, &EntryKeys::single(0)).is_err());
    }
}
