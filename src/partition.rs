//! Grouping of element indices by attribute value.
//!
//! Partitions are lists of indices into the keys a selector resolves to.
//! Every index appears in exactly one bucket, buckets are ordered by their
//! smallest index and indices keep their relative order inside a bucket.
//!
//! Three strategies are picked automatically:
//! - value keys, when the attribute interns equal values,
//! - a linear scan over distinct values for small inputs and for rotations,
//!   which compare with a tolerance,
//! - murmur3-hashed buckets over canonical value bytes for large inputs.

use std::collections::HashMap;
use std::sync::Arc;

use murmur3::BuildMurmur3;
use tracing::{debug, debug_span, warn};

use crate::accessor::{AccessorKeys, AccessorRegistry, AttributeAccessor};
use crate::config;
use crate::data::{HostData, Point, PointData};
use crate::metadata::{Metadata, MetadataAttribute, INVALID_ENTRY_KEY};
use crate::selector::{DomainId, Selector};
use crate::util::{quat_rotation_eq, AttributeType, AttributeValue, Result};

/// Dot-product tolerance for rotations to count as equal.
const ROTATION_TOLERANCE: f64 = 1e-8;

/// Strategy used for one partition pass.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PartitionStrategy {
    ValueKeys,
    Linear,
    Hashed,
}

// ============================================================================
// Single selector
// ============================================================================

/// Group the indices addressed by `selector` on `data` by value equality.
///
/// Returns an empty list when the selector resolves to nothing or to a type
/// that cannot be partitioned.
pub fn partition_by_attribute(
    registry: &AccessorRegistry,
    data: &dyn HostData,
    selector: &Selector,
) -> Vec<Vec<usize>> {
    let _span = debug_span!("partition_by_attribute", selector = %selector).entered();
    let Some((accessor, keys)) = resolve(registry, data, selector) else {
        return Vec::new();
    };
    let count = keys.len();
    if count == 0 {
        return Vec::new();
    }

    let strategy = pick_strategy(accessor.as_ref(), count);
    debug!("Partitioning {count} values of '{selector}' with {strategy:?}");
    let result = match strategy {
        PartitionStrategy::ValueKeys => accessor
            .attribute()
            .and_then(|attribute| {
                partition_by_value_keys(accessor.as_ref(), attribute.as_ref(), keys.as_ref())
            }),
        PartitionStrategy::Linear => {
            read_canonical(accessor.as_ref(), keys.as_ref()).map(|v| partition_linear(&v))
        }
        PartitionStrategy::Hashed => {
            read_canonical(accessor.as_ref(), keys.as_ref()).map(|v| partition_hashed(&v))
        }
    };
    result.unwrap_or_default()
}

/// Strategy [`partition_by_attribute`] would use for `count` values.
pub fn pick_strategy(accessor: &dyn AttributeAccessor, count: usize) -> PartitionStrategy {
    if accessor.attribute().is_some_and(|a| a.uses_value_keys()) {
        PartitionStrategy::ValueKeys
    } else if matches!(accessor.value_type(), AttributeType::Quat | AttributeType::Rotator) {
        PartitionStrategy::Linear
    } else if count >= config::global().hashed_partition_threshold {
        PartitionStrategy::Hashed
    } else {
        PartitionStrategy::Linear
    }
}

fn resolve<'a>(
    registry: &AccessorRegistry,
    data: &'a dyn HostData,
    selector: &Selector,
) -> Option<(Box<dyn AttributeAccessor>, Box<dyn AccessorKeys + 'a>)> {
    let accessor = registry.create_const_accessor(data, selector, true).ok().or_else(|| {
        warn!("Cannot partition on '{selector}': nothing to read on {}", data.kind());
        None
    })?;
    let value_type = accessor.value_type();
    if !value_type.is_partitionable() {
        warn!("Cannot partition on '{selector}': {value_type} values are not partitionable");
        return None;
    }
    let keys = match registry.create_const_keys(data, selector) {
        Ok(keys) => keys,
        Err(err) => {
            warn!("Cannot partition on '{selector}': {err}");
            return None;
        }
    };
    Some((accessor, keys))
}

fn partition_by_value_keys(
    accessor: &dyn AttributeAccessor,
    attribute: &dyn MetadataAttribute,
    keys: &dyn AccessorKeys,
) -> Option<Vec<Vec<usize>>> {
    let mut value_keys = vec![0i64; keys.len()];
    if !accessor.value_keys(0, keys, &mut value_keys) {
        return None;
    }

    // Keys are only interned locally: along a parent chain or after a
    // default change, distinct keys may still hold equal values.
    let mut canonical: HashMap<i64, usize> = HashMap::new();
    let mut by_bytes: HashMap<Vec<u8>, usize, BuildMurmur3> = HashMap::default();
    let mut buckets: Vec<Vec<usize>> = Vec::new();
    for (index, &key) in value_keys.iter().enumerate() {
        let bucket = *canonical.entry(key).or_insert_with(|| {
            let value = attribute.value_for_key(key);
            let mut bytes = Vec::new();
            canonicalize(&value).canonical_bytes(&mut bytes);
            *by_bytes.entry(bytes).or_insert_with(|| {
                buckets.push(Vec::new());
                buckets.len() - 1
            })
        });
        buckets[bucket].push(index);
    }
    Some(buckets)
}

fn read_canonical(
    accessor: &dyn AttributeAccessor,
    keys: &dyn AccessorKeys,
) -> Option<Vec<AttributeValue>> {
    let mut values = vec![AttributeValue::zero(accessor.value_type()); keys.len()];
    if let Err(err) = accessor.get_range(&mut values, 0, keys) {
        warn!("Cannot partition: {err}");
        return None;
    }
    Some(values.iter().map(canonicalize).collect())
}

/// Rotators compare as rotations, not as raw angles.
fn canonicalize(value: &AttributeValue) -> AttributeValue {
    match value {
        AttributeValue::Rotator(r) => AttributeValue::Quat(r.to_quat()),
        other => other.clone(),
    }
}

fn same_value(a: &AttributeValue, b: &AttributeValue) -> bool {
    if let (AttributeValue::Quat(qa), AttributeValue::Quat(qb)) = (a, b) {
        return quat_rotation_eq(*qa, *qb, ROTATION_TOLERANCE);
    }
    let (mut bytes_a, mut bytes_b) = (Vec::new(), Vec::new());
    a.canonical_bytes(&mut bytes_a);
    b.canonical_bytes(&mut bytes_b);
    bytes_a == bytes_b
}

fn partition_linear(values: &[AttributeValue]) -> Vec<Vec<usize>> {
    let mut uniques: Vec<&AttributeValue> = Vec::new();
    let mut buckets: Vec<Vec<usize>> = Vec::new();
    for (index, value) in values.iter().enumerate() {
        match uniques.iter().position(|u| same_value(u, value)) {
            Some(bucket) => buckets[bucket].push(index),
            None => {
                uniques.push(value);
                buckets.push(vec![index]);
            }
        }
    }
    buckets
}

fn partition_hashed(values: &[AttributeValue]) -> Vec<Vec<usize>> {
    let mut lookup: HashMap<Vec<u8>, usize, BuildMurmur3> =
        HashMap::with_capacity_and_hasher(values.len().min(1024), BuildMurmur3::default());
    let mut buckets: Vec<Vec<usize>> = Vec::new();
    let mut bytes = Vec::new();
    for (index, value) in values.iter().enumerate() {
        bytes.clear();
        value.canonical_bytes(&mut bytes);
        match lookup.get(bytes.as_slice()) {
            Some(&bucket) => buckets[bucket].push(index),
            None => {
                lookup.insert(bytes.clone(), buckets.len());
                buckets.push(vec![index]);
            }
        }
    }
    buckets
}

// ============================================================================
// Multiple selectors
// ============================================================================

/// Partition on the combination of several selectors.
///
/// Each selector gives a mask per bucket; masks are intersected and empty
/// intersections dropped. An empty result from any selector, or selectors
/// addressing different element counts, give an empty result.
pub fn partition_by_multiple_attributes(
    registry: &AccessorRegistry,
    data: &dyn HostData,
    selectors: &[Selector],
) -> Vec<Vec<usize>> {
    let _span = debug_span!("partition_by_multiple_attributes", count = selectors.len()).entered();
    let mut combined: Option<(usize, Vec<BitMask>)> = None;
    for selector in selectors {
        let partition = partition_by_attribute(registry, data, selector);
        if partition.is_empty() {
            return Vec::new();
        }
        let len = partition.iter().map(Vec::len).sum();
        let masks: Vec<BitMask> =
            partition.iter().map(|bucket| BitMask::from_indices(len, bucket)).collect();

        combined = match combined {
            None => Some((len, masks)),
            Some((expected, _)) if expected != len => {
                warn!("Selector '{selector}' addresses {len} values, expected {expected}");
                return Vec::new();
            }
            Some((_, previous)) => {
                let mut next = Vec::new();
                for a in &previous {
                    for b in &masks {
                        let mask = a.and(b);
                        if !mask.is_empty() {
                            next.push(mask);
                        }
                    }
                }
                Some((len, next))
            }
        };
    }

    let mut buckets: Vec<Vec<usize>> = combined
        .map(|(_, masks)| masks.iter().map(BitMask::indices).collect())
        .unwrap_or_default();
    buckets.sort_by_key(|bucket| bucket.first().copied().unwrap_or(usize::MAX));
    buckets
}

/// Fixed-size set of indices.
#[derive(Clone, Debug, PartialEq, Eq)]
struct BitMask {
    words: Vec<u64>,
}

impl BitMask {
    fn from_indices(len: usize, indices: &[usize]) -> Self {
        let mut words = vec![0u64; len.div_ceil(64)];
        for &i in indices {
            words[i / 64] |= 1 << (i % 64);
        }
        Self { words }
    }

    fn and(&self, other: &Self) -> Self {
        Self {
            words: self.words.iter().zip(&other.words).map(|(a, b)| a & b).collect(),
        }
    }

    fn is_empty(&self) -> bool {
        self.words.iter().all(|w| *w == 0)
    }

    fn indices(&self) -> Vec<usize> {
        let mut out = Vec::new();
        for (w, &word) in self.words.iter().enumerate() {
            let mut bits = word;
            while bits != 0 {
                let bit = bits.trailing_zeros() as usize;
                out.push(w * 64 + bit);
                bits &= bits - 1;
            }
        }
        out
    }
}

// ============================================================================
// Split
// ============================================================================

/// Split `points` into one point set per partition of `selector`.
///
/// Each output owns a flattened copy of the metadata restricted to its
/// points, whose entries are renumbered from zero. Points without an entry
/// keep none.
pub fn split_points_by_attribute(
    registry: &AccessorRegistry,
    points: &PointData,
    selector: &Selector,
) -> Result<Vec<PointData>> {
    let _span = debug_span!("split_points_by_attribute", selector = %selector).entered();
    let partition = partition_by_attribute(registry, points, selector);
    let source = points.metadata();

    let mut outputs = Vec::with_capacity(partition.len());
    for bucket in &partition {
        let mut keep = Vec::new();
        let mut out_points: Vec<Point> = Vec::with_capacity(bucket.len());
        for &index in bucket {
            let mut point = points.points()[index];
            if point.metadata_entry != INVALID_ENTRY_KEY {
                keep.push(point.metadata_entry);
                point.metadata_entry = keep.len() as i64 - 1;
            }
            out_points.push(point);
        }

        let subsets = HashMap::from([(DomainId::ELEMENTS, keep)]);
        let metadata = Metadata::new_partial_copy(source, &subsets)?;
        outputs.push(PointData::with_metadata(out_points, Arc::new(metadata)));
    }
    debug!("Split {} points into {} sets", points.len(), outputs.len());
    Ok(outputs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::DEFAULT_VALUE_KEY;
    use crate::selector::AttributeIdentifier;
    use crate::util::{AttributeType, DVec3, Name, Rotator};

    fn values(list: &[f64]) -> Vec<AttributeValue> {
        list.iter().map(|v| AttributeValue::Double(*v)).collect()
    }

    #[test]
    fn test_linear_and_hashed_agree() {
        let input = values(&[3.0, 1.0, 3.0, -0.0, 0.0, 1.0, 7.0]);
        let linear = partition_linear(&input);
        assert_eq!(linear, vec![vec![0, 2], vec![1, 5], vec![3, 4], vec![6]]);
        assert_eq!(partition_hashed(&input), linear);
    }

    #[test]
    fn test_rotators_compare_as_rotations() {
        let a = canonicalize(&AttributeValue::Rotator(Rotator::new(0.0, 90.0, 0.0)));
        let b = canonicalize(&AttributeValue::Rotator(Rotator::new(0.0, 90.0, 0.0)));
        let c = canonicalize(&AttributeValue::Rotator(Rotator::new(0.0, 45.0, 0.0)));
        assert_eq!(a.value_type(), AttributeType::Quat);
        assert_eq!(partition_linear(&[a, c, b]), vec![vec![0, 2], vec![1]]);
    }

    #[test]
    fn test_equivalent_rotators_share_a_bucket() {
        let registry = AccessorRegistry::with_defaults();
        let mut data = PointData::from_points(vec![Point::default(); 5]);
        data.assign_metadata_entries();
        let rot = data
            .metadata()
            .create_attribute(&AttributeIdentifier::new("R"), Rotator::ZERO, true, false)
            .unwrap();
        rot.set_value(0, Rotator::new(0.0, 0.0, 0.0)).unwrap();
        rot.set_value(1, Rotator::new(0.0, 360.0, 0.0)).unwrap();
        rot.set_value(2, Rotator::new(0.0, 90.0, 0.0)).unwrap();
        rot.set_value(3, Rotator::new(0.0, -270.0, 0.0)).unwrap();
        rot.set_value(4, Rotator::new(0.0, -360.0, 0.0)).unwrap();

        let selector = Selector::attribute("R");
        let accessor = registry.create_const_accessor(&data, &selector, false).unwrap();
        assert_eq!(pick_strategy(accessor.as_ref(), 10_000), PartitionStrategy::Linear);
        let partition = partition_by_attribute(&registry, &data, &selector);
        assert_eq!(partition, vec![vec![0, 1, 4], vec![2, 3]]);
    }

    #[test]
    fn test_bitmask() {
        let a = BitMask::from_indices(130, &[0, 64, 129]);
        let b = BitMask::from_indices(130, &[64, 100, 129]);
        assert_eq!(a.and(&b).indices(), vec![64, 129]);
        assert!(a.and(&BitMask::from_indices(130, &[1])).is_empty());
    }

    #[test]
    fn test_value_key_partition_merges_default() {
        let registry = AccessorRegistry::with_defaults();
        let mut data = PointData::from_points(vec![Point::default(); 4]);
        data.assign_metadata_entries();
        let metadata = data.metadata().clone();
        let tag = metadata
            .create_attribute(&AttributeIdentifier::new("Tag"), Name::new("none"), false, false)
            .unwrap();
        tag.set_value(1, Name::new("Rock")).unwrap();
        tag.set_value(2, Name::new("none")).unwrap();
        tag.set_value(3, Name::new("ROCK")).unwrap();

        let selector = Selector::attribute("Tag");
        let accessor = registry.create_const_accessor(&data, &selector, false).unwrap();
        assert_eq!(pick_strategy(accessor.as_ref(), 4), PartitionStrategy::ValueKeys);
        assert_eq!(tag.get_value_key(0), DEFAULT_VALUE_KEY);

        let partition = partition_by_attribute(&registry, &data, &selector);
        assert_eq!(partition, vec![vec![0, 2], vec![1, 3]]);
    }

    #[test]
    fn test_transform_is_rejected() {
        let registry = AccessorRegistry::with_defaults();
        let data = PointData::from_points(vec![Point::default(); 2]);
        let transform = Selector::property("Transform");
        assert!(partition_by_attribute(&registry, &data, &transform).is_empty());
        let missing = Selector::attribute("Missing");
        assert!(partition_by_attribute(&registry, &data, &missing).is_empty());
    }

    #[test]
    fn test_property_partition() {
        let registry = AccessorRegistry::with_defaults();
        let data = PointData::from_points(vec![
            Point::new(DVec3::new(1.0, 0.0, 0.0)),
            Point::new(DVec3::new(2.0, 0.0, 0.0)),
            Point::new(DVec3::new(1.0, 5.0, 0.0)),
        ]);
        let selector = Selector::parse("$Position.X").unwrap();
        let partition = partition_by_attribute(&registry, &data, &selector);
        assert_eq!(partition, vec![vec![0, 2], vec![1]]);
    }
}
