//! Portal geometry.
//!
//! A portal's local frame has +Z pointing into its target room. Points with
//! local z < 0 are "behind" the plane (the source side); z >= 0 is "in front".

use glam::{Mat4, Quat, Vec3};
use serde::{Deserialize, Serialize};
use std::f32::consts::PI;

/// Rigid placement of a portal plane in world space.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct PortalFrame {
    /// Centre of the portal surface.
    pub position: Vec3,
    /// Orientation; local +Z faces the target room.
    pub rotation: Quat,
}

impl Default for PortalFrame {
    fn default() -> Self {
        Self::IDENTITY
    }
}

impl PortalFrame {
    /// Frame at the origin facing +Z.
    pub const IDENTITY: Self = Self {
        position: Vec3::ZERO,
        rotation: Quat::IDENTITY,
    };

    /// Creates a frame.
    #[inline]
    #[must_use]
    pub const fn new(position: Vec3, rotation: Quat) -> Self {
        Self { position, rotation }
    }

    /// Frame of the paired reverse portal: same position, turned half a
    /// revolution about local up.
    #[must_use]
    pub fn reversed(&self) -> Self {
        Self {
            position: self.position,
            rotation: self.rotation * Quat::from_rotation_y(PI),
        }
    }

    /// Transforms a world-space point into the portal's local frame.
    #[inline]
    #[must_use]
    pub fn to_local(&self, point: Vec3) -> Vec3 {
        self.rotation.inverse() * (point - self.position)
    }

    /// World-to-local matrix, used as the clipping transform for geometry
    /// seen through this portal.
    #[must_use]
    pub fn world_to_local(&self) -> Mat4 {
        Mat4::from_rotation_translation(self.rotation, self.position).inverse()
    }

    /// Direction the portal faces in world space.
    #[inline]
    #[must_use]
    pub fn forward(&self) -> Vec3 {
        self.rotation * Vec3::Z
    }
}

/// Oriented bounding box.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Obb {
    /// World-space centre.
    pub center: Vec3,
    /// Half size along each local axis.
    pub half_extents: Vec3,
    /// Orientation of the local axes.
    pub rotation: Quat,
}

impl Obb {
    /// Creates a box.
    #[inline]
    #[must_use]
    pub const fn new(center: Vec3, half_extents: Vec3, rotation: Quat) -> Self {
        Self {
            center,
            half_extents,
            rotation,
        }
    }

    /// Precise crossing box: `width` x `height` on the portal plane, `depth`
    /// thick, centred on the plane.
    #[must_use]
    pub fn around_portal(frame: &PortalFrame, width: f32, height: f32, depth: f32) -> Self {
        Self::new(
            frame.position,
            Vec3::new(width, height, depth) * 0.5,
            frame.rotation,
        )
    }

    /// Trigger volume: same footprint as the portal, extending `depth` behind
    /// the plane into the source room.
    #[must_use]
    pub fn behind_portal(frame: &PortalFrame, width: f32, height: f32, depth: f32) -> Self {
        let offset = frame.rotation * Vec3::new(0.0, 0.0, -depth * 0.5);
        Self::new(
            frame.position + offset,
            Vec3::new(width, height, depth) * 0.5,
            frame.rotation,
        )
    }

    /// True when `point` lies inside or on the box.
    #[must_use]
    pub fn contains(&self, point: Vec3) -> bool {
        let local = (self.rotation.inverse() * (point - self.center)).abs();
        local.cmple(self.half_extents).all()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_close(a: Vec3, b: Vec3) {
        assert!((a - b).length() < 1e-4, "{a:?} != {b:?}");
    }

    #[test]
    fn test_identity_frame_is_passthrough() {
        let frame = PortalFrame::IDENTITY;
        assert_close(frame.to_local(Vec3::new(1.0, 2.0, -3.0)), Vec3::new(1.0, 2.0, -3.0));
    }

    #[test]
    fn test_reversed_frame_flips_depth() {
        let frame = PortalFrame::new(Vec3::new(5.0, 0.0, 0.0), Quat::from_rotation_y(0.3));
        let reverse = frame.reversed();
        let point = Vec3::new(6.0, 1.0, 2.0);

        let a = frame.to_local(point);
        let b = reverse.to_local(point);
        assert!((a.z + b.z).abs() < 1e-4);
        assert!((a.y - b.y).abs() < 1e-4);
    }

    #[test]
    fn test_world_to_local_matches_to_local() {
        let frame = PortalFrame::new(Vec3::new(1.0, 2.0, 3.0), Quat::from_rotation_x(0.7));
        let point = Vec3::new(-4.0, 0.5, 9.0);
        assert_close(frame.world_to_local().transform_point3(point), frame.to_local(point));
    }

    #[test]
    fn test_obb_contains() {
        let frame = PortalFrame::new(Vec3::new(0.0, 1.0, 0.0), Quat::from_rotation_y(PI * 0.5));
        let obb = Obb::around_portal(&frame, 2.0, 2.0, 0.4);

        assert!(obb.contains(Vec3::new(0.0, 1.0, 0.0)));
        // rotated a quarter turn: local X is world -Z
        assert!(obb.contains(Vec3::new(0.0, 1.5, 0.9)));
        assert!(!obb.contains(Vec3::new(0.9, 1.5, 0.0)));
        assert!(!obb.contains(Vec3::new(0.0, 3.0, 0.0)));
    }

    #[test]
    fn test_trigger_volume_sits_behind_plane() {
        let frame = PortalFrame::IDENTITY;
        let trigger = Obb::behind_portal(&frame, 1.0, 2.0, 1.0);

        assert!(trigger.contains(Vec3::new(0.0, 0.0, -0.5)));
        assert!(!trigger.contains(Vec3::new(0.0, 0.0, 0.5)));
    }
}
