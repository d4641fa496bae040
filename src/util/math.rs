//! Math types used as attribute values.
//!
//! Vectors and quaternions come from `glam` (double precision). This module
//! adds [`Rotator`] (Euler angles in degrees) and [`Transform`]
//! (rotation, translation and non-uniform scale).

pub use glam::{DMat4, DQuat, DVec2, DVec3, DVec4};

use bytemuck::{Pod, Zeroable};
use std::fmt;

/// Threshold above which a quaternion is considered to be at a gimbal pole.
const SINGULARITY_THRESHOLD: f64 = 0.499_999_5;

/// Euler rotation in degrees.
///
/// Pitch rotates around Y, yaw around Z and roll around X.
#[derive(Clone, Copy, Default, PartialEq, Pod, Zeroable)]
#[repr(C)]
pub struct Rotator {
    pub pitch: f64,
    pub yaw: f64,
    pub roll: f64,
}

impl Rotator {
    /// Zero rotation.
    pub const ZERO: Self = Self::new(0.0, 0.0, 0.0);

    /// Create a rotator from pitch, yaw and roll (degrees).
    #[inline]
    pub const fn new(pitch: f64, yaw: f64, roll: f64) -> Self {
        Self { pitch, yaw, roll }
    }

    /// Convert to a unit quaternion.
    pub fn to_quat(self) -> DQuat {
        let (sp, cp) = (self.pitch.to_radians() * 0.5).sin_cos();
        let (sy, cy) = (self.yaw.to_radians() * 0.5).sin_cos();
        let (sr, cr) = (self.roll.to_radians() * 0.5).sin_cos();

        DQuat::from_xyzw(
            cr * sp * sy - sr * cp * cy,
            -cr * sp * cy - sr * cp * sy,
            cr * cp * sy - sr * sp * cy,
            cr * cp * cy + sr * sp * sy,
        )
    }

    /// Convert a quaternion back to Euler angles.
    pub fn from_quat(q: DQuat) -> Self {
        let singularity = q.z * q.x - q.w * q.y;
        let yaw_y = 2.0 * (q.w * q.z + q.x * q.y);
        let yaw_x = 1.0 - 2.0 * (q.y * q.y + q.z * q.z);
        let yaw = yaw_y.atan2(yaw_x).to_degrees();

        if singularity < -SINGULARITY_THRESHOLD {
            let roll = normalize_axis(-yaw - 2.0 * q.x.atan2(q.w).to_degrees());
            Self::new(-90.0, yaw, roll)
        } else if singularity > SINGULARITY_THRESHOLD {
            let roll = normalize_axis(yaw - 2.0 * q.x.atan2(q.w).to_degrees());
            Self::new(90.0, yaw, roll)
        } else {
            let pitch = (2.0 * singularity).asin().to_degrees();
            let roll = (-2.0 * (q.w * q.x + q.y * q.z))
                .atan2(1.0 - 2.0 * (q.x * q.x + q.y * q.y))
                .to_degrees();
            Self::new(pitch, yaw, roll)
        }
    }

    /// Rotated +X axis.
    #[inline]
    pub fn forward(self) -> DVec3 {
        self.to_quat() * DVec3::X
    }

    /// Rotated +Y axis.
    #[inline]
    pub fn right(self) -> DVec3 {
        self.to_quat() * DVec3::Y
    }

    /// Rotated +Z axis.
    #[inline]
    pub fn up(self) -> DVec3 {
        self.to_quat() * DVec3::Z
    }

    /// Component-wise operation helper.
    #[inline]
    pub fn map2(self, other: Self, f: impl Fn(f64, f64) -> f64) -> Self {
        Self::new(f(self.pitch, other.pitch), f(self.yaw, other.yaw), f(self.roll, other.roll))
    }

    /// Angles as a vector (pitch, yaw, roll).
    #[inline]
    pub fn to_vec3(self) -> DVec3 {
        DVec3::new(self.pitch, self.yaw, self.roll)
    }
}

impl fmt::Debug for Rotator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Rotator(P={} Y={} R={})", self.pitch, self.yaw, self.roll)
    }
}

/// Wraps an angle in degrees to (-180, 180].
pub fn normalize_axis(angle: f64) -> f64 {
    let mut angle = angle % 360.0;
    if angle > 180.0 {
        angle -= 360.0;
    } else if angle <= -180.0 {
        angle += 360.0;
    }
    angle
}

/// Rotation, translation and per-axis scale.
#[derive(Clone, Copy, PartialEq, Pod, Zeroable)]
#[repr(C)]
pub struct Transform {
    pub rotation: DQuat,
    pub translation: DVec3,
    pub scale: DVec3,
}

impl Transform {
    /// Identity transform.
    pub const IDENTITY: Self = Self {
        rotation: DQuat::IDENTITY,
        translation: DVec3::ZERO,
        scale: DVec3::ONE,
    };

    /// Create a transform from its parts.
    #[inline]
    pub const fn new(rotation: DQuat, translation: DVec3, scale: DVec3) -> Self {
        Self { rotation, translation, scale }
    }

    /// Pure translation.
    #[inline]
    pub const fn from_translation(translation: DVec3) -> Self {
        Self {
            rotation: DQuat::IDENTITY,
            translation,
            scale: DVec3::ONE,
        }
    }

    /// Transform a point (scale, rotate, then translate).
    #[inline]
    pub fn transform_point(&self, p: DVec3) -> DVec3 {
        self.rotation * (p * self.scale) + self.translation
    }

    /// Equivalent 4x4 matrix.
    #[inline]
    pub fn to_matrix(&self) -> DMat4 {
        DMat4::from_scale_rotation_translation(self.scale, self.rotation, self.translation)
    }
}

impl Default for Transform {
    fn default() -> Self {
        Self::IDENTITY
    }
}

impl fmt::Debug for Transform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Transform(R={:?} T={:?} S={:?})",
            self.rotation, self.translation, self.scale
        )
    }
}

/// Rotational equality: `q` and `-q` describe the same rotation.
pub fn quat_rotation_eq(a: DQuat, b: DQuat, tolerance: f64) -> bool {
    a.dot(b).abs() >= 1.0 - tolerance
}

/// Flip `q` into the hemisphere of `reference` so that weighted sums blend
/// along the short arc.
#[inline]
pub fn align_quat(q: DQuat, reference: DQuat) -> DQuat {
    if q.dot(reference) < 0.0 {
        -q
    } else {
        q
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn approx(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-6
    }

    #[test]
    fn test_rotator_quat_roundtrip() {
        let r = Rotator::new(30.0, 45.0, -20.0);
        let back = Rotator::from_quat(r.to_quat());
        assert!(approx(back.pitch, r.pitch));
        assert!(approx(back.yaw, r.yaw));
        assert!(approx(back.roll, r.roll));
    }

    #[test]
    fn test_rotator_yaw_forward() {
        let r = Rotator::new(0.0, 90.0, 0.0);
        let fwd = r.forward();
        assert!(approx(fwd.x, 0.0));
        assert!(approx(fwd.y, 1.0));
        assert!(approx(fwd.z, 0.0));
    }

    #[test]
    fn test_rotator_gimbal_pole() {
        let r = Rotator::new(90.0, 0.0, 0.0);
        let back = Rotator::from_quat(r.to_quat());
        assert!(approx(back.pitch, 90.0));
    }

    #[test]
    fn test_normalize_axis() {
        assert!(approx(normalize_axis(270.0), -90.0));
        assert!(approx(normalize_axis(-180.0), 180.0));
        assert!(approx(normalize_axis(45.0), 45.0));
    }

    #[test]
    fn test_transform_point() {
        let t = Transform::new(DQuat::IDENTITY, DVec3::new(1.0, 2.0, 3.0), DVec3::splat(2.0));
        assert_eq!(t.transform_point(DVec3::ONE), DVec3::new(3.0, 4.0, 5.0));
        assert_eq!(Transform::default(), Transform::IDENTITY);
    }

    #[test]
    fn test_quat_rotation_eq() {
        let q = Rotator::new(10.0, 20.0, 30.0).to_quat();
        assert!(quat_rotation_eq(q, -q, 1e-9));
        assert!(!quat_rotation_eq(q, DQuat::IDENTITY, 1e-9));
    }

    #[test]
    fn test_pod_sizes() {
        assert_eq!(std::mem::size_of::<Rotator>(), 24);
        assert_eq!(std::mem::size_of::<Transform>(), 80);
    }
}
