//! Typed conveniences over type-erased accessors.

use super::{convert_value, AccessorFlags, AccessorKeys, AccessorRegistry, AttributeAccessor};
use crate::data::HostData;
use crate::metadata::MetadataType;
use crate::selector::Selector;
use crate::util::{AttributeValue, Error, Result};

/// Read `count` values starting at `start` as `T`.
///
/// Values of another type are converted as `flags` allow.
pub fn get_range_as<T: MetadataType>(
    accessor: &dyn AttributeAccessor,
    start: usize,
    keys: &dyn AccessorKeys,
    count: usize,
    flags: AccessorFlags,
) -> Result<Vec<T>> {
    let mut values = vec![AttributeValue::zero(accessor.value_type()); count];
    accessor.get_range(&mut values, start, keys)?;
    values
        .iter()
        .map(|v| {
            let converted = convert_value(v, T::TYPE, flags)?;
            T::from_value(&converted)
                .ok_or_else(|| Error::type_mismatch(T::TYPE, converted.value_type()))
        })
        .collect()
}

/// Write typed values starting at `start`.
pub fn set_range_as<T: MetadataType>(
    accessor: &dyn AttributeAccessor,
    values: &[T],
    start: usize,
    keys: &mut dyn AccessorKeys,
    flags: AccessorFlags,
) -> Result<()> {
    let values: Vec<AttributeValue> = values.iter().map(MetadataType::to_value).collect();
    accessor.set_range(&values, start, keys, flags)
}

/// Number of elements `selector` addresses on `data`.
pub fn element_count(data: &dyn HostData, selector: &Selector) -> Result<usize> {
    let domain = data.domain_id_from_selector(selector)?;
    Ok(data.element_count(domain))
}

/// Every value `selector` addresses on `data`, in key order.
pub fn get_all(
    registry: &AccessorRegistry,
    data: &dyn HostData,
    selector: &Selector,
) -> Result<Vec<AttributeValue>> {
    let accessor = registry.create_const_accessor(data, selector, false)?;
    let keys = registry.create_const_keys(data, selector)?;
    let mut values = vec![AttributeValue::zero(accessor.value_type()); keys.len()];
    accessor.get_range(&mut values, 0, keys.as_ref())?;
    Ok(values)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{Point, PointData};
    use crate::util::DVec3;

    #[test]
    fn test_typed_round_trip() {
        let registry = AccessorRegistry::with_defaults();
        let mut data = PointData::from_points(vec![Point::default(); 3]);
        let selector = Selector::parse("$Position.X").unwrap();
        let accessor = registry.create_accessor(&data, &selector, false).unwrap();

        {
            let mut keys = registry.create_keys(&mut data, &selector).unwrap();
            let xs = [1.0f64, 2.0, 3.0];
            set_range_as(accessor.as_ref(), &xs, 0, keys.as_mut(), AccessorFlags::STRICT_TYPE)
                .unwrap();
        }
        assert_eq!(data.points()[2].position(), DVec3::new(3.0, 0.0, 0.0));

        let keys = registry.create_const_keys(&data, &selector).unwrap();
        let strict = AccessorFlags::STRICT_TYPE;
        let broadcast = AccessorFlags::ALLOW_BROADCAST;
        let xs: Vec<f64> = get_range_as(accessor.as_ref(), 1, keys.as_ref(), 2, strict).unwrap();
        assert_eq!(xs, vec![2.0, 3.0]);
        assert!(get_range_as::<f32>(accessor.as_ref(), 0, keys.as_ref(), 1, broadcast).is_err());
        let as_text: Vec<String> =
            get_range_as(accessor.as_ref(), 0, keys.as_ref(), 1, broadcast).unwrap();
        assert_eq!(as_text, vec!["1".to_string()]);
    }

    #[test]
    fn test_get_all_and_count() {
        let registry = AccessorRegistry::with_defaults();
        let data = PointData::from_points(vec![
            Point::default().with_seed(5),
            Point::default().with_seed(6),
        ]);
        let seeds = get_all(&registry, &data, &Selector::property("Seed")).unwrap();
        assert_eq!(seeds, vec![AttributeValue::Int32(5), AttributeValue::Int32(6)]);
        assert_eq!(element_count(&data, &Selector::property("Seed")).unwrap(), 2);
        assert_eq!(
            element_count(&data, &Selector::attribute("A").with_domain("Data")).unwrap(),
            0
        );
    }
}
