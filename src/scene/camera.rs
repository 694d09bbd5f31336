//! Perspective camera

use glam::{Mat4, Vec2, Vec3};

/// Default vertical field of view in degrees
pub const DEFAULT_FIELD_OF_VIEW: f32 = 45.0;
pub const DEFAULT_NEAR_PLANE: f32 = 1.0;
pub const DEFAULT_FAR_PLANE: f32 = 100.0;

/// Camera projection parameters. Position and orientation come from the owning node.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Camera {
    /// Vertical field of view in degrees
    pub fov_y: f32,
    pub near: f32,
    pub far: f32,
}

impl Default for Camera {
    fn default() -> Self {
        Self {
            fov_y: DEFAULT_FIELD_OF_VIEW,
            near: DEFAULT_NEAR_PLANE,
            far: DEFAULT_FAR_PLANE,
        }
    }
}

impl Camera {
    pub fn new(fov_y: f32) -> Self {
        Self {
            fov_y,
            ..Default::default()
        }
    }

    /// Left-handed perspective projection for a target of the given aspect ratio
    pub fn projection_matrix(&self, aspect: f32) -> Mat4 {
        let aspect = if aspect.is_finite() && aspect > 0.0 {
            aspect
        } else {
            1.0
        };
        Mat4::perspective_lh(self.fov_y.to_radians(), aspect, self.near, self.far)
    }

    /// View matrix of a camera placed at `world`
    pub fn view_matrix(world: Mat4) -> Mat4 {
        world.inverse()
    }

    /// World-space ray through a point of the target.
    ///
    /// `position` is normalized to 0..1 with the origin at the top-left corner.
    pub fn camera_ray(&self, world: Mat4, position: Vec2, aspect: f32) -> Ray {
        let tan = (self.fov_y.to_radians() * 0.5).tan();
        let screen = Vec2::new(2.0 * position.x - 1.0, 1.0 - 2.0 * position.y);
        let local = Vec3::new(screen.x * tan * aspect, screen.y * tan, 1.0);
        Ray {
            origin: world.transform_point3(Vec3::ZERO),
            direction: world.transform_vector3(local).normalize_or_zero(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Ray {
    pub origin: Vec3,
    pub direction: Vec3,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scene::Transform;

    #[test]
    fn view_matches_look_at() {
        let eye = Vec3::new(0.0, 2.0, -10.0);
        let world = Transform::looking_at(eye, Vec3::ZERO, Vec3::Y).matrix();
        let expected = Mat4::look_at_lh(eye, Vec3::ZERO, Vec3::Y);
        assert!(Camera::view_matrix(world).abs_diff_eq(expected, 1e-5));
    }

    #[test]
    fn projection_maps_near_and_far_to_depth_range() {
        let camera = Camera::default();
        let projection = camera.projection_matrix(1.0);
        let near = projection.project_point3(Vec3::new(0.0, 0.0, 1.0));
        let far = projection.project_point3(Vec3::new(0.0, 0.0, 100.0));
        assert!((near.z - 0.0).abs() < 1e-5);
        assert!((far.z - 1.0).abs() < 1e-5);
    }

    #[test]
    fn center_ray_follows_forward() {
        let camera = Camera::default();
        let world = Transform::from_position(Vec3::new(1.0, 0.0, 0.0)).matrix();
        let ray = camera.camera_ray(world, Vec2::splat(0.5), 1.0);
        assert!(ray.origin.abs_diff_eq(Vec3::X, 1e-6));
        assert!(ray.direction.abs_diff_eq(Vec3::Z, 1e-6));
    }
}
