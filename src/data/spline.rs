//! Splines described by control points.

use std::any::Any;
use std::sync::Arc;

use super::point::property;
use super::{assign_missing_entries, DataKind, HostData, MetadataElement};
use crate::accessor::PropertyDescriptor;
use crate::metadata::{DomainLayout, Metadata, INVALID_ENTRY_KEY};
use crate::selector::DomainId;
use crate::util::{AttributeType, AttributeValue, DVec3, Result, Transform};

const HIERARCHY: &[DataKind] = &[DataKind::SPLINE, DataKind::SPATIAL, DataKind::BASE];

/// Control point with tangents.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ControlPoint {
    pub transform: Transform,
    pub arrive_tangent: DVec3,
    pub leave_tangent: DVec3,
    pub metadata_entry: i64,
}

impl Default for ControlPoint {
    fn default() -> Self {
        Self {
            transform: Transform::IDENTITY,
            arrive_tangent: DVec3::ZERO,
            leave_tangent: DVec3::ZERO,
            metadata_entry: INVALID_ENTRY_KEY,
        }
    }
}

impl ControlPoint {
    /// Control point at `position` with equal tangents.
    pub fn new(position: DVec3, tangent: DVec3) -> Self {
        Self {
            transform: Transform::from_translation(position),
            arrive_tangent: tangent,
            leave_tangent: tangent,
            metadata_entry: INVALID_ENTRY_KEY,
        }
    }
}

impl MetadataElement for ControlPoint {
    fn metadata_entry(&self) -> i64 {
        self.metadata_entry
    }

    fn set_metadata_entry(&mut self, entry: i64) {
        self.metadata_entry = entry;
    }
}

/// Properties addressable with `$Name` on control points.
pub const CONTROL_POINT_PROPERTY_NAMES: &[&str] =
    &["Position", "Rotation", "Scale", "Transform", "ArriveTangent", "LeaveTangent"];

/// Descriptor of a control point property (case-insensitive).
pub fn control_point_property(name: &str) -> Option<PropertyDescriptor<ControlPoint>> {
    let canonical = CONTROL_POINT_PROPERTY_NAMES
        .iter()
        .find(|n| n.eq_ignore_ascii_case(name))?;
    let descriptor: PropertyDescriptor<ControlPoint> = match *canonical {
        "Position" => property!(
            "Position",
            Vector,
            |c| c.transform.translation,
            |c, v| c.transform.translation = *v
        ),
        "Rotation" => property!(
            "Rotation",
            Quat,
            |c| c.transform.rotation,
            |c, v| c.transform.rotation = v.normalize()
        ),
        "Scale" => property!("Scale", Vector, |c| c.transform.scale, |c, v| c.transform.scale = *v),
        "Transform" => property!("Transform", Transform, |c| c.transform, |c, v| c.transform = *v),
        "ArriveTangent" => property!(
            "ArriveTangent",
            Vector,
            |c| c.arrive_tangent,
            |c, v| c.arrive_tangent = *v
        ),
        "LeaveTangent" => property!(
            "LeaveTangent",
            Vector,
            |c| c.leave_tangent,
            |c, v| c.leave_tangent = *v
        ),
        _ => return None,
    };
    Some(descriptor)
}

/// A spline. Control point rows are never inherited from a parent.
#[derive(Debug)]
pub struct SplineData {
    control_points: Vec<ControlPoint>,
    closed: bool,
    metadata: Arc<Metadata>,
}

impl SplineData {
    pub fn new(control_points: Vec<ControlPoint>, closed: bool) -> Self {
        Self {
            control_points,
            closed,
            metadata: Arc::new(Metadata::new(DomainLayout::splines())),
        }
    }

    /// Same curve, metadata initialized from `parent`.
    ///
    /// Control point rows are copied since that domain cannot keep a parent.
    pub fn new_child(parent: &SplineData) -> Result<Self> {
        Ok(Self {
            control_points: parent.control_points.clone(),
            closed: parent.closed,
            metadata: Arc::new(Metadata::new_child(&parent.metadata, true)?),
        })
    }

    #[inline]
    pub fn control_points(&self) -> &[ControlPoint] {
        &self.control_points
    }

    #[inline]
    pub fn control_points_mut(&mut self) -> &mut [ControlPoint] {
        &mut self.control_points
    }

    #[inline]
    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Number of segments (closed curves wrap around).
    pub fn segment_count(&self) -> usize {
        match self.control_points.len() {
            0 | 1 => 0,
            n if self.closed => n,
            n => n - 1,
        }
    }

    /// Give every control point without an entry its own metadata row.
    pub fn assign_metadata_entries(&mut self) {
        assign_missing_entries(&mut self.control_points, &self.metadata, DomainId::ELEMENTS);
    }
}

impl HostData for SplineData {
    fn kind(&self) -> DataKind {
        DataKind::SPLINE
    }

    fn class_hierarchy(&self) -> &'static [DataKind] {
        HIERARCHY
    }

    fn metadata(&self) -> &Arc<Metadata> {
        &self.metadata
    }

    fn element_count(&self, domain: DomainId) -> usize {
        if self.metadata.layout().resolve(domain) == DomainId::ELEMENTS {
            self.control_points.len()
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
    use crate::selector::AttributeIdentifier;

    fn line() -> SplineData {
        SplineData::new(
            vec![
                ControlPoint::new(DVec3::ZERO, DVec3::X),
                ControlPoint::new(DVec3::X, DVec3::X),
                ControlPoint::new(DVec3::new(2.0, 0.0, 0.0), DVec3::X),
            ],
            false,
        )
    }

    #[test]
    fn test_segments() {
        assert_eq!(line().segment_count(), 2);
        let closed = SplineData::new(line().control_points().to_vec(), true);
        assert_eq!(closed.segment_count(), 3);
        assert_eq!(SplineData::new(Vec::new(), true).segment_count(), 0);
    }

    #[test]
    fn test_child_copies_control_point_rows() {
        let mut parent = line();
        parent.assign_metadata_entries();
        let ident = AttributeIdentifier::new("Weight");
        let attr = parent
            .metadata()
            .create_attribute(&ident, 0.0f64, true, false)
            .unwrap();
        attr.set_value(1, 2.5).unwrap();

        let child = SplineData::new_child(&parent).unwrap();
        let domain = child.metadata().const_domain(DomainId::ELEMENTS).unwrap();
        assert!(domain.parent().is_none());
        let read = child.metadata().get_typed_attribute::<f64>(&ident).unwrap();
        assert_eq!(read.get_value_from_item_key(1), 2.5);
    }

    #[test]
    fn test_tangent_property() {
        let leave = control_point_property("leavetangent").unwrap();
        let mut c = ControlPoint::default();
        (leave.set.unwrap())(&mut c, &AttributeValue::Vector(DVec3::Y));
        assert_eq!(c.leave_tangent, DVec3::Y);
        assert_eq!(leave.value_type, AttributeType::Vector);
    }
}
