//! Point sets.

use std::any::Any;
use std::sync::Arc;

use super::{assign_missing_entries, DataKind, HostData, MetadataElement};
use crate::accessor::PropertyDescriptor;
use crate::metadata::{DomainLayout, Metadata, INVALID_ENTRY_KEY};
use crate::selector::DomainId;
use crate::util::{AttributeType, AttributeValue, DVec3, DVec4, Result, Transform};

const HIERARCHY: &[DataKind] = &[DataKind::POINT, DataKind::SPATIAL, DataKind::BASE];

/// A point: a transformed box with density and color.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Point {
    pub transform: Transform,
    pub density: f32,
    pub bounds_min: DVec3,
    pub bounds_max: DVec3,
    pub color: DVec4,
    pub steepness: f32,
    pub seed: i32,
    pub metadata_entry: i64,
}

impl Default for Point {
    fn default() -> Self {
        Self {
            transform: Transform::IDENTITY,
            density: 1.0,
            bounds_min: DVec3::splat(-1.0),
            bounds_max: DVec3::ONE,
            color: DVec4::ONE,
            steepness: 0.5,
            seed: 0,
            metadata_entry: INVALID_ENTRY_KEY,
        }
    }
}

impl Point {
    /// Default point at `position`.
    pub fn new(position: DVec3) -> Self {
        Self {
            transform: Transform::from_translation(position),
            ..Default::default()
        }
    }

    /// Same point with another seed.
    pub fn with_seed(mut self, seed: i32) -> Self {
        self.seed = seed;
        self
    }

    /// Same point with another density.
    pub fn with_density(mut self, density: f32) -> Self {
        self.density = density;
        self
    }

    #[inline]
    pub fn position(&self) -> DVec3 {
        self.transform.translation
    }

    /// Half size of the local bounds.
    #[inline]
    pub fn extents(&self) -> DVec3 {
        (self.bounds_max - self.bounds_min) * 0.5
    }

    /// Resize the bounds around their center.
    pub fn set_extents(&mut self, extents: DVec3) {
        let center = self.local_center();
        self.bounds_min = center - extents;
        self.bounds_max = center + extents;
    }

    /// Center of the local bounds.
    #[inline]
    pub fn local_center(&self) -> DVec3 {
        (self.bounds_max + self.bounds_min) * 0.5
    }

    /// Move the bounds, keeping their size.
    pub fn set_local_center(&mut self, center: DVec3) {
        let extents = self.extents();
        self.bounds_min = center - extents;
        self.bounds_max = center + extents;
    }

    #[inline]
    pub fn local_size(&self) -> DVec3 {
        self.bounds_max - self.bounds_min
    }

    /// Local size multiplied by the transform scale.
    #[inline]
    pub fn scaled_local_size(&self) -> DVec3 {
        self.local_size() * self.transform.scale
    }
}

impl MetadataElement for Point {
    fn metadata_entry(&self) -> i64 {
        self.metadata_entry
    }

    fn set_metadata_entry(&mut self, entry: i64) {
        self.metadata_entry = entry;
    }
}

/// Properties addressable with `$Name` on points.
pub const POINT_PROPERTY_NAMES: &[&str] = &[
    "Density",
    "BoundsMin",
    "BoundsMax",
    "Extents",
    "Color",
    "Position",
    "Rotation",
    "Scale",
    "Transform",
    "Steepness",
    "LocalCenter",
    "Seed",
    "ScaledLocalSize",
    "LocalSize",
];

macro_rules! property {
    ($name:literal, $variant:ident, |$e:ident| $get:expr) => {
        PropertyDescriptor {
            name: $name,
            value_type: AttributeType::$variant,
            get: |$e| AttributeValue::$variant($get),
            set: None,
        }
    };
    ($name:literal, $variant:ident, |$e:ident| $get:expr, |$m:ident, $v:ident| $set:expr) => {
        PropertyDescriptor {
            name: $name,
            value_type: AttributeType::$variant,
            get: |$e| AttributeValue::$variant($get),
            set: Some(|$m, value| {
                if let AttributeValue::$variant($v) = value {
                    $set;
                }
            }),
        }
    };
}
pub(crate) use property;

/// Descriptor of a point property (case-insensitive).
pub fn point_property(name: &str) -> Option<PropertyDescriptor<Point>> {
    let canonical = POINT_PROPERTY_NAMES
        .iter()
        .find(|n| n.eq_ignore_ascii_case(name))?;
    let descriptor: PropertyDescriptor<Point> = match *canonical {
        "Density" => property!("Density", Float, |p| p.density, |p, v| p.density = *v),
        "BoundsMin" => property!("BoundsMin", Vector, |p| p.bounds_min, |p, v| p.bounds_min = *v),
        "BoundsMax" => property!("BoundsMax", Vector, |p| p.bounds_max, |p, v| p.bounds_max = *v),
        "Extents" => property!("Extents", Vector, |p| p.extents(), |p, v| p.set_extents(*v)),
        "Color" => property!("Color", Vector4, |p| p.color, |p, v| p.color = *v),
        "Position" => property!(
            "Position",
            Vector,
            |p| p.transform.translation,
            |p, v| p.transform.translation = *v
        ),
        "Rotation" => property!(
            "Rotation",
            Quat,
            |p| p.transform.rotation,
            |p, v| p.transform.rotation = v.normalize()
        ),
        "Scale" => property!("Scale", Vector, |p| p.transform.scale, |p, v| p.transform.scale = *v),
        "Transform" => property!("Transform", Transform, |p| p.transform, |p, v| p.transform = *v),
        "Steepness" => property!("Steepness", Float, |p| p.steepness, |p, v| p.steepness = *v),
        "LocalCenter" => property!(
            "LocalCenter",
            Vector,
            |p| p.local_center(),
            |p, v| p.set_local_center(*v)
        ),
        "Seed" => property!("Seed", Int32, |p| p.seed, |p, v| p.seed = *v),
        "ScaledLocalSize" => property!("ScaledLocalSize", Vector, |p| p.scaled_local_size()),
        "LocalSize" => property!("LocalSize", Vector, |p| p.local_size()),
        _ => return None,
    };
    Some(descriptor)
}

/// A set of points with per-point metadata entries.
#[derive(Debug)]
pub struct PointData {
    points: Vec<Point>,
    metadata: Arc<Metadata>,
}

impl Default for PointData {
    fn default() -> Self {
        Self::new()
    }
}

impl PointData {
    /// Empty point set.
    pub fn new() -> Self {
        Self {
            points: Vec::new(),
            metadata: Arc::new(Metadata::new(DomainLayout::points())),
        }
    }

    /// Point set owning `points`, entries are left as they are.
    pub fn from_points(points: Vec<Point>) -> Self {
        Self {
            points,
            metadata: Arc::new(Metadata::new(DomainLayout::points())),
        }
    }

    /// Point set over existing metadata.
    pub fn with_metadata(points: Vec<Point>, metadata: Arc<Metadata>) -> Self {
        Self { points, metadata }
    }

    /// Copy of the points whose metadata inherits from `parent`.
    pub fn new_child(parent: &PointData) -> Result<Self> {
        Ok(Self {
            points: parent.points.clone(),
            metadata: Arc::new(Metadata::new_child(&parent.metadata, true)?),
        })
    }

    #[inline]
    pub fn points(&self) -> &[Point] {
        &self.points
    }

    #[inline]
    pub fn points_mut(&mut self) -> &mut [Point] {
        &mut self.points
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.points.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Append a point, returns its index.
    pub fn push(&mut self, point: Point) -> usize {
        self.points.push(point);
        self.points.len() - 1
    }

    /// Give every point without an entry its own metadata row.
    pub fn assign_metadata_entries(&mut self) {
        assign_missing_entries(&mut self.points, &self.metadata, DomainId::ELEMENTS);
    }
}

impl HostData for PointData {
    fn kind(&self) -> DataKind {
        DataKind::POINT
    }

    fn class_hierarchy(&self) -> &'static [DataKind] {
        HIERARCHY
    }

    fn metadata(&self) -> &Arc<Metadata> {
        &self.metadata
    }

    fn element_count(&self, domain: DomainId) -> usize {
        if self.metadata.layout().resolve(domain) == DomainId::ELEMENTS {
            self.points.len()
        } else {
            self.metadata.item_count(domain).max(0) as usize
        }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bounds_helpers() {
        let mut p = Point::new(DVec3::new(1.0, 2.0, 3.0));
        assert_eq!(p.extents(), DVec3::ONE);
        assert_eq!(p.local_center(), DVec3::ZERO);

        p.set_local_center(DVec3::new(1.0, 0.0, 0.0));
        assert_eq!(p.bounds_min, DVec3::new(0.0, -1.0, -1.0));
        p.set_extents(DVec3::splat(2.0));
        assert_eq!(p.local_size(), DVec3::splat(4.0));
        p.transform.scale = DVec3::new(0.5, 1.0, 2.0);
        assert_eq!(p.scaled_local_size(), DVec3::new(2.0, 4.0, 8.0));
    }

    #[test]
    fn test_property_table() {
        for name in POINT_PROPERTY_NAMES {
            assert!(point_property(name).is_some(), "missing {name}");
        }
        assert!(point_property("density").is_some());
        assert!(point_property("Mass").is_none());
        assert!(point_property("LocalSize").unwrap().set.is_none());

        let seed = point_property("Seed").unwrap();
        let mut p = Point::default();
        (seed.set.unwrap())(&mut p, &AttributeValue::Int32(42));
        assert_eq!((seed.get)(&p), AttributeValue::Int32(42));
    }

    #[test]
    fn test_assign_entries() {
        let mut data = PointData::from_points(vec![Point::default(); 3]);
        data.points_mut()[1].metadata_entry = 7;
        data.assign_metadata_entries();
        let entries: Vec<i64> = data.points().iter().map(|p| p.metadata_entry).collect();
        assert_eq!(entries, vec![0, 7, 1]);
        assert_eq!(data.element_count(DomainId::DEFAULT), 3);
    }
}
