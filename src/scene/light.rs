//! Light sources

use glam::Vec4;

use crate::resources::{point_light_bit, AMBIENT_LIGHT_BIT, DIRECTIONAL_LIGHT_BIT};

pub const DEFAULT_CONSTANT_TERM: f32 = 1.0;
pub const DEFAULT_LINEAR_FACTOR: f32 = 0.1;
pub const DEFAULT_ATTENUATION_RADIUS: f32 = 100.0;
pub const DEFAULT_ATTENUATION_MINIMUM: f32 = 0.01;

/// Point light attenuation, `1 / (constant + linear * d + quadratic * d^2)`.
///
/// The quadratic factor is derived so intensity falls to `minimum` at `radius`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PointLight {
    pub color: Vec4,
    constant: f32,
    linear: f32,
    quadratic: f32,
    radius: f32,
    minimum: f32,
}

impl Default for PointLight {
    fn default() -> Self {
        Self::new(Vec4::ONE)
    }
}

impl PointLight {
    pub fn new(color: Vec4) -> Self {
        Self {
            color,
            constant: DEFAULT_CONSTANT_TERM,
            linear: DEFAULT_LINEAR_FACTOR,
            quadratic: quadratic_factor(DEFAULT_ATTENUATION_RADIUS, DEFAULT_ATTENUATION_MINIMUM),
            radius: DEFAULT_ATTENUATION_RADIUS,
            minimum: DEFAULT_ATTENUATION_MINIMUM,
        }
    }

    pub fn constant_term(&self) -> f32 {
        self.constant
    }

    pub fn linear_factor(&self) -> f32 {
        self.linear
    }

    pub fn quadratic_factor(&self) -> f32 {
        self.quadratic
    }

    pub fn attenuation_radius(&self) -> f32 {
        self.radius
    }

    pub fn attenuation_minimum(&self) -> f32 {
        self.minimum
    }

    pub fn set_constant_term(&mut self, constant: f32) {
        self.constant = constant;
    }

    pub fn set_linear_factor(&mut self, linear: f32) {
        self.linear = linear;
    }

    /// Returns false and keeps the quadratic factor when the radius is not positive.
    pub fn set_attenuation_radius(&mut self, radius: f32) -> bool {
        self.radius = radius;
        self.update_quadratic_factor()
    }

    /// Returns false and keeps the quadratic factor when the minimum is not positive.
    pub fn set_attenuation_minimum(&mut self, minimum: f32) -> bool {
        self.minimum = minimum;
        self.update_quadratic_factor()
    }

    fn update_quadratic_factor(&mut self) -> bool {
        if self.radius <= 0.0 || self.minimum <= 0.0 {
            return false;
        }
        self.quadratic = quadratic_factor(self.radius, self.minimum);
        true
    }
}

fn quadratic_factor(radius: f32, minimum: f32) -> f32 {
    1.0 / (radius * radius * minimum)
}

/// A light source attached to a scene node.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Light {
    Ambient { color: Vec4 },
    /// Shines along the node's +Z axis
    Directional { color: Vec4 },
    /// Positioned at the node's origin
    Point(PointLight),
}

impl Light {
    pub fn ambient(color: Vec4) -> Self {
        Light::Ambient { color }
    }

    pub fn directional(color: Vec4) -> Self {
        Light::Directional { color }
    }

    pub fn point(color: Vec4) -> Self {
        Light::Point(PointLight::new(color))
    }

    pub fn color(&self) -> Vec4 {
        match self {
            Light::Ambient { color } | Light::Directional { color } => *color,
            Light::Point(point) => point.color,
        }
    }

    pub fn set_color(&mut self, value: Vec4) {
        match self {
            Light::Ambient { color } | Light::Directional { color } => *color = value,
            Light::Point(point) => point.color = value,
        }
    }

    /// Bit a material light mask tests for this light.
    ///
    /// `point_index` is the light's position among the scene's point lights; point lights
    /// past the supported count get no bit.
    pub fn light_mask(&self, point_index: Option<usize>) -> i32 {
        match self {
            Light::Ambient { .. } => AMBIENT_LIGHT_BIT,
            Light::Directional { .. } => DIRECTIONAL_LIGHT_BIT,
            Light::Point(_) => point_index
                .filter(|index| *index < super::MAX_POINT_LIGHT_COUNT)
                .map(point_light_bit)
                .unwrap_or(0),
        }
    }
}
