//! Local node transforms

use glam::{Mat3, Mat4, Quat, Vec3};

/// Position, orientation and scale of a node relative to its parent.
///
/// The scene is left-handed: +X right, +Y up, +Z forward.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Transform {
    pub position: Vec3,
    pub rotation: Quat,
    pub scale: Vec3,
}

impl Default for Transform {
    fn default() -> Self {
        Self {
            position: Vec3::ZERO,
            rotation: Quat::IDENTITY,
            scale: Vec3::ONE,
        }
    }
}

impl Transform {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_position(position: Vec3) -> Self {
        Self {
            position,
            ..Default::default()
        }
    }

    pub fn from_position_scale(position: Vec3, scale: Vec3) -> Self {
        Self {
            position,
            scale,
            ..Default::default()
        }
    }

    /// Rotation from yaw (around Y), pitch (around X) and roll (around Z), in radians
    pub fn from_yaw_pitch_roll(position: Vec3, yaw: f32, pitch: f32, roll: f32) -> Self {
        Self {
            position,
            rotation: Quat::from_euler(glam::EulerRot::YXZ, yaw, pitch, roll),
            ..Default::default()
        }
    }

    /// Transform at `position` oriented so +Z points at `target`.
    pub fn looking_at(position: Vec3, target: Vec3, up: Vec3) -> Self {
        let mut transform = Self::from_position(position);
        transform.look_at(target, up);
        transform
    }

    pub fn matrix(&self) -> Mat4 {
        Mat4::from_scale_rotation_translation(self.scale, self.rotation, self.position)
    }

    /// Local +Z in parent space
    pub fn forward(&self) -> Vec3 {
        self.rotation * Vec3::Z
    }

    pub fn right(&self) -> Vec3 {
        self.rotation * Vec3::X
    }

    pub fn up(&self) -> Vec3 {
        self.rotation * Vec3::Y
    }

    pub fn translate(&mut self, offset: Vec3) {
        self.position += offset;
    }

    pub fn rotate_axis(&mut self, axis: Vec3, angle: f32) {
        self.rotation = Quat::from_axis_angle(axis, angle) * self.rotation;
    }

    /// Orient +Z towards `target`. Leaves the rotation untouched when `target` is the position.
    pub fn look_at(&mut self, target: Vec3, up: Vec3) {
        let Some(forward) = (target - self.position).try_normalize() else {
            return;
        };
        let right = up.cross(forward).try_normalize().unwrap_or(Vec3::X);
        let up = forward.cross(right);
        self.rotation = Quat::from_mat3(&Mat3::from_cols(right, up, forward));
    }
}

/// Inverse transpose of `world` with the translation cleared.
pub fn normal_matrix(world: Mat4) -> Mat4 {
    let mut normal = world.inverse().transpose();
    normal.x_axis.w = 0.0;
    normal.y_axis.w = 0.0;
    normal.z_axis.w = 0.0;
    normal.w_axis = glam::Vec4::W;
    normal
}
