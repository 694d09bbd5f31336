//! Material definitions for the stock and custom pixel shaders

use std::collections::BTreeMap;

use glam::Vec4;

use crate::backend::MAX_TEXTURE_COUNT;
use crate::shader::{ParameterValue, PIXEL_SOLID_COLOR, PIXEL_TEXTURE};

use super::texture::{Bitmap, TextureFlags};

/// Light mask bit of the ambient light
pub const AMBIENT_LIGHT_BIT: i32 = 1 << 0;
/// Light mask bit of the directional light
pub const DIRECTIONAL_LIGHT_BIT: i32 = 1 << 1;

/// Light mask bit of point light `index`
pub const fn point_light_bit(index: usize) -> i32 {
    1 << (2 + index)
}

/// Every light affects the material
pub const DEFAULT_LIGHT_MASK: i32 = -1;

/// A bitmap bound to one texture slot
#[derive(Debug, Clone)]
pub struct TextureSlot {
    pub bitmap: Bitmap,
    pub flags: TextureFlags,
}

#[derive(Debug, Clone)]
pub enum MaterialKind {
    SolidColor {
        color: Vec4,
        shininess: f32,
    },
    Texture {
        opacity: f32,
        slots: [Option<TextureSlot>; MAX_TEXTURE_COUNT],
    },
    /// User pixel shader fed from a named parameter map
    Custom {
        pixel_shader: String,
        parameters: BTreeMap<String, ParameterValue>,
        translucent: bool,
    },
}

/// Surface description of a model part.
///
/// `revision` changes with every constant-buffer relevant edit, `texture_revision` whenever
/// a texture slot changes.
#[derive(Debug, Clone)]
pub struct Material {
    kind: MaterialKind,
    light_mask: i32,
    depth_bias: f32,
    revision: u64,
    texture_revision: u64,
}

impl Material {
    fn with_kind(kind: MaterialKind) -> Self {
        Self {
            kind,
            light_mask: DEFAULT_LIGHT_MASK,
            depth_bias: 0.0,
            revision: 0,
            texture_revision: 0,
        }
    }

    pub fn solid_color(color: Vec4) -> Self {
        Self::with_kind(MaterialKind::SolidColor {
            color,
            shininess: 0.0,
        })
    }

    pub fn texture(opacity: f32) -> Self {
        Self::with_kind(MaterialKind::Texture {
            opacity,
            slots: Default::default(),
        })
    }

    pub fn custom(pixel_shader: &str) -> Self {
        Self::with_kind(MaterialKind::Custom {
            pixel_shader: pixel_shader.to_string(),
            parameters: BTreeMap::new(),
            translucent: false,
        })
    }

    pub fn with_shininess(mut self, shininess: f32) -> Self {
        self.set_shininess(shininess);
        self
    }

    pub fn with_texture(mut self, slot: usize, bitmap: Bitmap, flags: TextureFlags) -> Self {
        self.set_texture(slot, Some(bitmap), flags);
        self
    }

    pub fn with_parameter(mut self, name: &str, value: ParameterValue) -> Self {
        self.set_parameter(name, value);
        self
    }

    pub fn with_light_mask(mut self, light_mask: i32) -> Self {
        self.light_mask = light_mask;
        self
    }

    pub fn with_depth_bias(mut self, depth_bias: f32) -> Self {
        self.depth_bias = depth_bias;
        self
    }

    pub fn with_translucent(mut self, translucent: bool) -> Self {
        self.set_translucent(translucent);
        self
    }

    pub fn kind(&self) -> &MaterialKind {
        &self.kind
    }

    pub fn light_mask(&self) -> i32 {
        self.light_mask
    }

    pub fn depth_bias(&self) -> f32 {
        self.depth_bias
    }

    pub fn revision(&self) -> u64 {
        self.revision
    }

    pub fn texture_revision(&self) -> u64 {
        self.texture_revision
    }

    /// Name of the pixel shader this material is drawn with
    pub fn pixel_shader(&self) -> &str {
        match &self.kind {
            MaterialKind::SolidColor { .. } => PIXEL_SOLID_COLOR,
            MaterialKind::Texture { .. } => PIXEL_TEXTURE,
            MaterialKind::Custom { pixel_shader, .. } => pixel_shader,
        }
    }

    pub fn is_translucent(&self) -> bool {
        match &self.kind {
            MaterialKind::SolidColor { color, .. } => color.w < 1.0,
            MaterialKind::Texture { opacity, .. } => *opacity < 1.0,
            MaterialKind::Custom { translucent, .. } => *translucent,
        }
    }

    /// Whether any texture slot is filled, so geometry must carry texture coordinates
    pub fn requires_texcoords(&self) -> bool {
        self.texture_slots().iter().any(|slot| slot.is_some())
    }

    pub fn texture_slots(&self) -> &[Option<TextureSlot>] {
        match &self.kind {
            MaterialKind::Texture { slots, .. } => slots,
            _ => &[],
        }
    }

    pub fn set_light_mask(&mut self, light_mask: i32) {
        if self.light_mask != light_mask {
            self.light_mask = light_mask;
            self.revision += 1;
        }
    }

    pub fn set_depth_bias(&mut self, depth_bias: f32) {
        if self.depth_bias != depth_bias {
            self.depth_bias = depth_bias;
            self.revision += 1;
        }
    }

    /// Color of a solid-color material; ignored by other kinds
    pub fn set_color(&mut self, new_color: Vec4) {
        if let MaterialKind::SolidColor { color, .. } = &mut self.kind {
            if *color != new_color {
                *color = new_color;
                self.revision += 1;
            }
        }
    }

    pub fn set_shininess(&mut self, new_shininess: f32) {
        if let MaterialKind::SolidColor { shininess, .. } = &mut self.kind {
            if *shininess != new_shininess {
                *shininess = new_shininess;
                self.revision += 1;
            }
        }
    }

    pub fn set_opacity(&mut self, new_opacity: f32) {
        if let MaterialKind::Texture { opacity, .. } = &mut self.kind {
            if *opacity != new_opacity {
                *opacity = new_opacity;
                self.revision += 1;
            }
        }
    }

    /// Fill or clear a texture slot of a texture material. Out-of-range slots are ignored.
    pub fn set_texture(&mut self, slot: usize, bitmap: Option<Bitmap>, flags: TextureFlags) {
        if let MaterialKind::Texture { slots, .. } = &mut self.kind {
            if let Some(target) = slots.get_mut(slot) {
                *target = bitmap.map(|bitmap| TextureSlot { bitmap, flags });
                self.texture_revision += 1;
            }
        }
    }

    /// Mark the bitmaps of this material as modified in place
    pub fn touch_textures(&mut self) {
        self.texture_revision += 1;
    }

    pub fn set_parameter(&mut self, name: &str, value: ParameterValue) {
        if let MaterialKind::Custom { parameters, .. } = &mut self.kind {
            if parameters.get(name) != Some(&value) {
                parameters.insert(name.to_string(), value);
                self.revision += 1;
            }
        }
    }

    pub fn set_translucent(&mut self, value: bool) {
        if let MaterialKind::Custom { translucent, .. } = &mut self.kind {
            if *translucent != value {
                *translucent = value;
                self.revision += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resources::solid_bitmap;

    #[test]
    fn translucency_hint_per_kind() {
        assert!(!Material::solid_color(Vec4::ONE).is_translucent());
        assert!(Material::solid_color(Vec4::new(1.0, 0.0, 0.0, 0.5)).is_translucent());
        assert!(Material::texture(0.5).is_translucent());
        assert!(!Material::texture(1.0).is_translucent());
        assert!(Material::custom("pixel_glow")
            .with_translucent(true)
            .is_translucent());
    }

    #[test]
    fn setters_bump_revision_only_on_change() {
        let mut material = Material::solid_color(Vec4::ONE);
        material.set_color(Vec4::ONE);
        assert_eq!(material.revision(), 0);
        material.set_color(Vec4::ZERO);
        material.set_shininess(8.0);
        assert_eq!(material.revision(), 2);
        material.set_opacity(0.5);
        assert_eq!(material.revision(), 2);
    }

    #[test]
    fn texcoords_follow_texture_slots() {
        let mut material = Material::texture(1.0);
        assert!(!material.requires_texcoords());
        material.set_texture(1, Some(solid_bitmap(2, 2, [255; 4])), TextureFlags::IMMUTABLE);
        assert!(material.requires_texcoords());
        assert_eq!(material.texture_revision(), 1);
        material.set_texture(1, None, TextureFlags::empty());
        assert!(!material.requires_texcoords());
        assert_eq!(material.pixel_shader(), PIXEL_TEXTURE);
    }
}
