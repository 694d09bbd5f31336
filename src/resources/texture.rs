//! Texture loading and the GPU texture cache

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Weak};

use bitflags::bitflags;
use image::RgbaImage;

use crate::backend::*;

/// Shared CPU-side pixels a texture is created from. Identity is the `Arc` allocation.
pub type Bitmap = Arc<RgbaImage>;

/// Load a bitmap from an image file
pub fn load_bitmap<P: AsRef<Path>>(path: P) -> BackendResult<Bitmap> {
    let path = path.as_ref();
    let img = image::open(path).map_err(|e| {
        BackendError::TextureCreationFailed(format!("{}: {}", path.display(), e))
    })?;
    Ok(Arc::new(img.to_rgba8()))
}

/// Decode a bitmap from encoded image bytes
pub fn bitmap_from_bytes(bytes: &[u8]) -> BackendResult<Bitmap> {
    let img = image::load_from_memory(bytes)
        .map_err(|e| BackendError::TextureCreationFailed(e.to_string()))?;
    Ok(Arc::new(img.to_rgba8()))
}

/// Create a solid color bitmap
pub fn solid_bitmap(width: u32, height: u32, color: [u8; 4]) -> Bitmap {
    Arc::new(RgbaImage::from_pixel(width, height, image::Rgba(color)))
}

/// Create a checkerboard bitmap with 8x8 pixel cells
pub fn checkerboard_bitmap(size: u32, color1: [u8; 4], color2: [u8; 4]) -> Bitmap {
    Arc::new(RgbaImage::from_fn(size, size, |x, y| {
        let is_even = ((x / 8) + (y / 8)) % 2 == 0;
        image::Rgba(if is_even { color1 } else { color2 })
    }))
}

bitflags! {
    /// How a texture is created from its bitmap.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct TextureFlags: u32 {
        /// Content never changes; identical requests share one GPU texture
        const IMMUTABLE = 1 << 0;
        /// Generate a full mip chain
        const MIPMAPS = 1 << 1;
        const CLAMP_TO_BORDER = 1 << 2;
        const REPEAT = 1 << 3;
        const MIRROR = 1 << 4;
    }
}

impl TextureFlags {
    pub fn address_mode(&self) -> AddressMode {
        if self.contains(TextureFlags::CLAMP_TO_BORDER) {
            AddressMode::ClampToBorder
        } else if self.contains(TextureFlags::REPEAT) {
            AddressMode::Repeat
        } else if self.contains(TextureFlags::MIRROR) {
            AddressMode::Mirror
        } else {
            AddressMode::ClampToEdge
        }
    }
}

/// Mip levels for a `width` x `height` image: `floor(log2(max(w, h))) + 1` when enabled.
pub fn mip_level_count(width: u32, height: u32, flags: TextureFlags) -> u32 {
    if !flags.contains(TextureFlags::MIPMAPS) {
        return 1;
    }
    let largest = width.max(height).max(1);
    32 - largest.leading_zeros()
}

/// Identifier of a texture inside a [`TextureCache`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TextureId(u64);

/// GPU image plus the sampler it is bound with
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Texture {
    pub image: ImageHandle,
    pub sampler: SamplerHandle,
    pub address_mode: AddressMode,
    pub mip_levels: u32,
    pub width: u32,
    pub height: u32,
    pub immutable: bool,
}

struct CachedSource {
    bitmap: Weak<RgbaImage>,
    texture: TextureId,
}

/// Owns every GPU texture of a content and the samplers they use.
///
/// Immutable textures are cached by (bitmap identity, flags); mutable ones are always
/// created fresh.
pub struct TextureCache {
    textures: HashMap<TextureId, Texture>,
    sources: HashMap<(usize, TextureFlags), CachedSource>,
    samplers: HashMap<AddressMode, SamplerHandle>,
    null_texture: Option<TextureId>,
    next_id: u64,
}

impl TextureCache {
    pub fn new() -> Self {
        Self {
            textures: HashMap::new(),
            sources: HashMap::new(),
            samplers: HashMap::new(),
            null_texture: None,
            next_id: 1,
        }
    }

    pub fn get(&self, id: TextureId) -> Option<&Texture> {
        self.textures.get(&id)
    }

    pub fn len(&self) -> usize {
        self.textures.len()
    }

    pub fn is_empty(&self) -> bool {
        self.textures.is_empty()
    }

    /// Sampler for an address mode, created on first use
    pub fn sampler(
        &mut self,
        backend: &mut dyn GraphicsBackend,
        address_mode: AddressMode,
    ) -> BackendResult<SamplerHandle> {
        if let Some(sampler) = self.samplers.get(&address_mode) {
            return Ok(*sampler);
        }
        let sampler = backend.create_sampler(address_mode)?;
        self.samplers.insert(address_mode, sampler);
        Ok(sampler)
    }

    /// Resolve a bitmap to a GPU texture.
    pub fn get_or_create(
        &mut self,
        backend: &mut dyn GraphicsBackend,
        bitmap: &Bitmap,
        flags: TextureFlags,
    ) -> BackendResult<TextureId> {
        if flags.contains(TextureFlags::IMMUTABLE) {
            let key = (Arc::as_ptr(bitmap) as usize, flags);
            if let Some(cached) = self.sources.get(&key) {
                let same_bitmap = cached
                    .bitmap
                    .upgrade()
                    .is_some_and(|alive| Arc::ptr_eq(&alive, bitmap));
                if same_bitmap && self.textures.contains_key(&cached.texture) {
                    return Ok(cached.texture);
                }
            }
            let id = self.create(backend, bitmap, flags)?;
            self.sources.insert(
                key,
                CachedSource {
                    bitmap: Arc::downgrade(bitmap),
                    texture: id,
                },
            );
            Ok(id)
        } else {
            self.create(backend, bitmap, flags)
        }
    }

    fn create(
        &mut self,
        backend: &mut dyn GraphicsBackend,
        bitmap: &RgbaImage,
        flags: TextureFlags,
    ) -> BackendResult<TextureId> {
        let (width, height) = bitmap.dimensions();
        let mip_levels = mip_level_count(width, height, flags);
        let address_mode = flags.address_mode();
        let sampler = self.sampler(backend, address_mode)?;

        let image = backend.create_image(&ImageDescriptor {
            width,
            height,
            format: TextureFormat::Rgba8Unorm,
            mip_levels,
            samples: 1,
            usage: ImageUsage::SAMPLED | ImageUsage::TRANSFER_DST | ImageUsage::TRANSFER_SRC,
        })?;
        if let Err(e) = backend.upload_image(image, bitmap.as_raw()) {
            backend.destroy_image(image);
            return Err(e);
        }

        let id = TextureId(self.next_id);
        self.next_id += 1;
        self.textures.insert(
            id,
            Texture {
                image,
                sampler,
                address_mode,
                mip_levels,
                width,
                height,
                immutable: flags.contains(TextureFlags::IMMUTABLE),
            },
        );
        log::trace!(
            "Created texture {}x{} ({} mip levels, {:?})",
            width,
            height,
            mip_levels,
            address_mode
        );
        Ok(id)
    }

    /// Replace the pixels of a mutable texture of the same size
    pub fn update(
        &mut self,
        backend: &mut dyn GraphicsBackend,
        id: TextureId,
        bitmap: &RgbaImage,
    ) -> BackendResult<()> {
        let texture = self
            .textures
            .get(&id)
            .ok_or_else(|| BackendError::InvalidArgument("unknown texture".into()))?;
        if texture.immutable {
            return Err(BackendError::InvalidArgument(
                "immutable textures cannot be updated".into(),
            ));
        }
        if bitmap.dimensions() != (texture.width, texture.height) {
            return Err(BackendError::InvalidArgument(
                "bitmap size differs from texture".into(),
            ));
        }
        backend.upload_image(texture.image, bitmap.as_raw())
    }

    /// 1x1 transparent texture bound to empty texture slots
    pub fn null_texture(&mut self, backend: &mut dyn GraphicsBackend) -> BackendResult<TextureId> {
        if let Some(id) = self.null_texture {
            return Ok(id);
        }
        let pixels = RgbaImage::from_pixel(1, 1, image::Rgba([0, 0, 0, 0]));
        let id = self.create(backend, &pixels, TextureFlags::IMMUTABLE)?;
        self.null_texture = Some(id);
        Ok(id)
    }

    /// Destroy one texture; cached immutable textures stay until [`release_all`](Self::release_all).
    pub fn release(&mut self, backend: &mut dyn GraphicsBackend, id: TextureId) {
        if Some(id) == self.null_texture {
            return;
        }
        if let Some(texture) = self.textures.get(&id) {
            if texture.immutable {
                return;
            }
        }
        if let Some(texture) = self.textures.remove(&id) {
            backend.destroy_image(texture.image);
        }
    }

    pub fn release_all(&mut self, backend: &mut dyn GraphicsBackend) {
        for (_, texture) in self.textures.drain() {
            backend.destroy_image(texture.image);
        }
        for (_, sampler) in self.samplers.drain() {
            backend.destroy_sampler(sampler);
        }
        self.sources.clear();
        self.null_texture = None;
    }

    /// Drop all bookkeeping without touching the backend, after its device was recreated.
    pub fn forget(&mut self) {
        self.textures.clear();
        self.samplers.clear();
        self.sources.clear();
        self.null_texture = None;
    }
}

impl Default for TextureCache {
    fn default() -> Self {
        Self::new()
    }
}
