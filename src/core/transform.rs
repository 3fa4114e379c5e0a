//! Polar to world-frame coordinate transform.
//!
//! A sample measured at `(azimuth°, distance)` lies in the scanner's local XY
//! plane. The scanner's [`Pose`] maps it into the world frame by rotating
//! first and translating second: `world = R(q)·local + t`.

use serde::{Deserialize, Serialize};

/// Cartesian 3-vector
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Vector3 {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Vector3 {
    pub const ZERO: Vector3 = Vector3 {
        x: 0.0,
        y: 0.0,
        z: 0.0,
    };

    pub fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }

    pub fn cross(&self, other: &Vector3) -> Vector3 {
        Vector3 {
            x: self.y * other.z - self.z * other.y,
            y: self.z * other.x - self.x * other.z,
            z: self.x * other.y - self.y * other.x,
        }
    }

    pub fn is_finite(&self) -> bool {
        self.x.is_finite() && self.y.is_finite() && self.z.is_finite()
    }
}

impl std::ops::Add for Vector3 {
    type Output = Vector3;

    fn add(self, rhs: Vector3) -> Vector3 {
        Vector3::new(self.x + rhs.x, self.y + rhs.y, self.z + rhs.z)
    }
}

impl std::ops::Mul<f64> for Vector3 {
    type Output = Vector3;

    fn mul(self, k: f64) -> Vector3 {
        Vector3::new(self.x * k, self.y * k, self.z * k)
    }
}

/// Rotation as a unit quaternion [w, x, y, z]
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Quaternion {
    pub w: f64,
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Default for Quaternion {
    fn default() -> Self {
        Self::identity()
    }
}

impl Quaternion {
    /// Identity quaternion (no rotation).
    pub fn identity() -> Self {
        Self {
            w: 1.0,
            x: 0.0,
            y: 0.0,
            z: 0.0,
        }
    }

    pub fn new(w: f64, x: f64, y: f64, z: f64) -> Self {
        Self { w, x, y, z }
    }

    /// Rotation of `angle` radians around `axis` (need not be unit length).
    pub fn from_axis_angle(axis: Vector3, angle: f64) -> Self {
        let norm = (axis.x * axis.x + axis.y * axis.y + axis.z * axis.z).sqrt();
        if norm < 1e-12 {
            return Self::identity();
        }
        let (s, c) = (angle / 2.0).sin_cos();
        let k = s / norm;
        Self::new(c, axis.x * k, axis.y * k, axis.z * k)
    }

    /// Rotation around the vertical axis, radians.
    pub fn from_yaw(yaw: f64) -> Self {
        Self::from_axis_angle(Vector3::new(0.0, 0.0, 1.0), yaw)
    }

    pub fn norm(&self) -> f64 {
        (self.w * self.w + self.x * self.x + self.y * self.y + self.z * self.z).sqrt()
    }

    /// Normalize the quaternion to unit length.
    pub fn normalize(&mut self) {
        let norm = self.norm();
        if norm > 1e-10 {
            self.w /= norm;
            self.x /= norm;
            self.y /= norm;
            self.z /= norm;
        }
    }

    pub fn is_identity(&self) -> bool {
        self.w == 1.0 && self.x == 0.0 && self.y == 0.0 && self.z == 0.0
    }

    /// Rotate `v`. Assumes unit length.
    pub fn rotate(&self, v: Vector3) -> Vector3 {
        // v' = v + 2w(u × v) + 2u × (u × v)
        let u = Vector3::new(self.x, self.y, self.z);
        let t = u.cross(&v) * 2.0;
        v + t * self.w + u.cross(&t)
    }
}

/// Scanner mounting pose in the world frame
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Pose {
    pub position: Vector3,
    pub orientation: Quaternion,
}

impl Pose {
    /// Scanner at the world origin, unrotated
    pub fn identity() -> Self {
        Self::default()
    }

    pub fn new(position: Vector3, orientation: Quaternion) -> Self {
        let mut orientation = orientation;
        orientation.normalize();
        Self {
            position,
            orientation,
        }
    }

    /// Map a scanner-local point into the world frame.
    pub fn apply(&self, local: Vector3) -> Vector3 {
        let rotated = if self.orientation.is_identity() {
            local
        } else {
            self.orientation.rotate(local)
        };
        rotated + self.position
    }
}

/// Polar sample in the scanner plane, `z = 0`
pub fn polar_to_local(azimuth_deg: f64, distance: f64) -> Vector3 {
    let (s, c) = azimuth_deg.to_radians().sin_cos();
    Vector3::new(distance * c, distance * s, 0.0)
}

/// Polar sample to world frame
pub fn to_world(azimuth_deg: f64, distance: f64, pose: &Pose) -> Vector3 {
    pose.apply(polar_to_local(azimuth_deg, distance))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f64::consts::FRAC_PI_2;

    #[test]
    fn test_identity_pose_leaves_points() {
        let pose = Pose::identity();
        assert_eq!(pose, Pose::default());
        let p = pose.apply(Vector3::new(1.0, 2.0, 3.0));
        assert_eq!(p, Vector3::new(1.0, 2.0, 3.0));
    }

    fn assert_close(a: Vector3, b: Vector3) {
        let eps = 1e-9;
        assert!(
            (a.x - b.x).abs() < eps && (a.y - b.y).abs() < eps && (a.z - b.z).abs() < eps,
            "{a:?} != {b:?}"
        );
    }

    #[test]
    fn test_identity_pose_is_plain_polar() {
        let pose = Pose::default();
        assert_close(to_world(0.0, 1000.0, &pose), Vector3::new(1000.0, 0.0, 0.0));
        assert_close(to_world(90.0, 1000.0, &pose), Vector3::new(0.0, 1000.0, 0.0));
        assert_close(to_world(180.0, 500.0, &pose), Vector3::new(-500.0, 0.0, 0.0));
    }

    #[test]
    fn test_rotation_applies_before_translation() {
        let pose = Pose::new(Vector3::new(10.0, 0.0, 0.0), Quaternion::from_yaw(FRAC_PI_2));
        // local (100, 0, 0) -> rotated (0, 100, 0) -> translated (10, 100, 0)
        assert_close(to_world(0.0, 100.0, &pose), Vector3::new(10.0, 100.0, 0.0));
    }

    #[test]
    fn test_tilted_mount_lifts_points_out_of_plane() {
        // Scanner rolled 90° about X: local +Y maps to world +Z
        let q = Quaternion::from_axis_angle(Vector3::new(1.0, 0.0, 0.0), FRAC_PI_2);
        let pose = Pose::new(Vector3::new(0.0, 0.0, 50.0), q);
        assert_close(to_world(90.0, 200.0, &pose), Vector3::new(0.0, 0.0, 250.0));
    }

    #[test]
    fn test_pose_normalizes_orientation() {
        let pose = Pose::new(Vector3::ZERO, Quaternion::new(2.0, 0.0, 0.0, 0.0));
        assert!(pose.orientation.is_identity());
    }
}
