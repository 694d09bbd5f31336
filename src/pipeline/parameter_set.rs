//! Per-draw bindings of constant buffers and textures.

use crate::backend::*;
use crate::resources::{BufferSegment, TextureCache, TextureId};

/// Constant-buffer segments and textures one draw call reads, mirrored into a native
/// descriptor set.
///
/// Setters only mark the set changed when the new binding differs from the current one;
/// [`ParameterSet::flush`] then issues a single native update.
#[derive(Debug, Default)]
pub struct ParameterSet {
    vertex: Vec<(u32, BufferSegment)>,
    pixel: Vec<(u32, BufferSegment)>,
    textures: [Option<TextureId>; MAX_TEXTURE_COUNT],
    changed: bool,
    descriptor_set: Option<DescriptorSetHandle>,
    write_count: u32,
}

fn assign(bindings: &mut Vec<(u32, BufferSegment)>, binding: u32, segment: BufferSegment) -> bool {
    match bindings.binary_search_by_key(&binding, |(b, _)| *b) {
        Ok(index) if bindings[index].1 == segment => false,
        Ok(index) => {
            bindings[index].1 = segment;
            true
        }
        Err(index) => {
            bindings.insert(index, (binding, segment));
            true
        }
    }
}

fn lookup(bindings: &[(u32, BufferSegment)], binding: u32) -> Option<&BufferSegment> {
    bindings
        .binary_search_by_key(&binding, |(b, _)| *b)
        .ok()
        .map(|index| &bindings[index].1)
}

impl ParameterSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind a vertex-stage constant buffer. Returns whether the binding changed.
    pub fn set_vertex_shader_parameters(&mut self, binding: u32, segment: BufferSegment) -> bool {
        let changed = assign(&mut self.vertex, binding, segment);
        self.changed |= changed;
        changed
    }

    /// Bind a pixel-stage constant buffer. Returns whether the binding changed.
    pub fn set_pixel_shader_parameters(&mut self, binding: u32, segment: BufferSegment) -> bool {
        let changed = assign(&mut self.pixel, binding, segment);
        self.changed |= changed;
        changed
    }

    /// Bind a texture slot; `None` binds the null texture on flush.
    pub fn set_texture(&mut self, slot: usize, texture: Option<TextureId>) -> BackendResult<bool> {
        let current = self.textures.get_mut(slot).ok_or_else(|| {
            BackendError::InvalidArgument(format!("texture slot {} out of range", slot))
        })?;
        if *current == texture {
            return Ok(false);
        }
        *current = texture;
        self.changed = true;
        Ok(true)
    }

    pub fn vertex_shader_parameters(&self, binding: u32) -> Option<&BufferSegment> {
        lookup(&self.vertex, binding)
    }

    pub fn pixel_shader_parameters(&self, binding: u32) -> Option<&BufferSegment> {
        lookup(&self.pixel, binding)
    }

    pub fn texture(&self, slot: usize) -> Option<TextureId> {
        self.textures.get(slot).copied().flatten()
    }

    pub fn is_changed(&self) -> bool {
        self.changed
    }

    /// Native descriptor updates issued so far
    pub fn write_count(&self) -> u32 {
        self.write_count
    }

    pub fn descriptor_set(&self) -> Option<DescriptorSetHandle> {
        self.descriptor_set
    }

    /// Native descriptor set reflecting the current bindings.
    pub fn flush(
        &mut self,
        backend: &mut dyn GraphicsBackend,
        textures: &mut TextureCache,
    ) -> BackendResult<DescriptorSetHandle> {
        let set = match self.descriptor_set {
            Some(set) if !self.changed => return Ok(set),
            Some(set) => set,
            None => {
                let set = backend.create_descriptor_set()?;
                self.descriptor_set = Some(set);
                set
            }
        };

        let mut writes: Vec<DescriptorWrite> = self
            .vertex
            .iter()
            .chain(self.pixel.iter())
            .map(|(binding, segment)| DescriptorWrite::Buffer {
                binding: *binding,
                buffer: segment.buffer(),
                offset: segment.offset(),
                size: segment.size(),
            })
            .collect();

        let null = textures.null_texture(backend)?;
        let mut images = [ImageHandle::default(); MAX_TEXTURE_COUNT];
        let mut samplers = [SamplerHandle::default(); MAX_TEXTURE_COUNT];
        for (slot, texture) in self.textures.iter().enumerate() {
            let texture = texture
                .and_then(|id| textures.get(id))
                .or_else(|| textures.get(null))
                .copied()
                .ok_or_else(|| BackendError::DescriptorFailed("missing null texture".into()))?;
            images[slot] = texture.image;
            samplers[slot] = texture.sampler;
        }
        writes.push(DescriptorWrite::Textures { images, samplers });

        backend.write_descriptor_set(set, &writes)?;
        self.write_count += 1;
        self.changed = false;
        Ok(set)
    }

    pub fn release(&mut self, backend: &mut dyn GraphicsBackend) {
        if let Some(set) = self.descriptor_set.take() {
            backend.destroy_descriptor_set(set);
        }
        self.changed = true;
    }

    pub fn forget(&mut self) {
        self.descriptor_set = None;
        self.changed = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::dummy::{DummyBackend, ResourceKind};
    use crate::resources::{solid_bitmap, BufferAllocator, TextureFlags};

    fn segments(backend: &mut DummyBackend) -> (BufferSegment, BufferSegment) {
        let mut allocator = BufferAllocator::new(1024, 256);
        let a = allocator
            .allocate(backend, BufferKind::Constant, BufferUsage::Dynamic, 1, 272)
            .unwrap();
        let b = allocator
            .allocate(backend, BufferKind::Constant, BufferUsage::Dynamic, 1, 48)
            .unwrap();
        (a, b)
    }

    #[test]
    fn identical_assignment_is_not_a_change() {
        let mut backend = DummyBackend::new();
        let mut textures = TextureCache::new();
        let (transform, material) = segments(&mut backend);

        let mut set = ParameterSet::new();
        assert!(set.set_vertex_shader_parameters(TRANSFORM_BINDING, transform));
        assert!(set.set_pixel_shader_parameters(MATERIAL_BINDING, material));
        set.flush(&mut backend, &mut textures).unwrap();
        assert_eq!(set.write_count(), 1);

        assert!(!set.set_vertex_shader_parameters(TRANSFORM_BINDING, transform));
        assert!(!set.set_pixel_shader_parameters(MATERIAL_BINDING, material));
        assert!(!set.set_texture(0, None).unwrap());
        set.flush(&mut backend, &mut textures).unwrap();
        assert_eq!(set.write_count(), 1);
        assert_eq!(backend.descriptor_write_count(), 1);

        assert!(set.set_pixel_shader_parameters(MATERIAL_BINDING, transform));
        set.flush(&mut backend, &mut textures).unwrap();
        assert_eq!(set.write_count(), 2);
    }

    #[test]
    fn bindings_stay_sorted() {
        let mut backend = DummyBackend::new();
        let (a, b) = segments(&mut backend);
        let mut set = ParameterSet::new();
        set.set_pixel_shader_parameters(LIGHT_BINDING, b);
        set.set_pixel_shader_parameters(MATERIAL_BINDING, a);
        assert_eq!(set.pixel_shader_parameters(MATERIAL_BINDING), Some(&a));
        assert_eq!(set.pixel_shader_parameters(LIGHT_BINDING), Some(&b));
        assert!(set.pixel_shader_parameters(TRANSFORM_BINDING).is_none());
    }

    #[test]
    fn empty_slots_bind_null_texture() {
        let mut backend = DummyBackend::new();
        let mut textures = TextureCache::new();
        let bitmap = solid_bitmap(2, 2, [255, 0, 0, 255]);
        let id = textures
            .get_or_create(&mut backend, &bitmap, TextureFlags::IMMUTABLE)
            .unwrap();

        let mut set = ParameterSet::new();
        assert!(set.set_texture(1, Some(id)).unwrap());
        assert!(set.set_texture(MAX_TEXTURE_COUNT, None).is_err());
        let handle = set.flush(&mut backend, &mut textures).unwrap();

        // Cached by the flush above; resolving it creates nothing new.
        let null = textures.null_texture(&mut backend).unwrap();
        let writes = backend.descriptor_writes(handle).unwrap();
        let Some(DescriptorWrite::Textures { images, .. }) = writes.last() else {
            panic!("missing texture write");
        };
        assert_eq!(images[1], textures.get(id).unwrap().image);
        assert_eq!(images[0], textures.get(null).unwrap().image);

        set.release(&mut backend);
        assert_eq!(backend.live_count(ResourceKind::DescriptorSet), 0);
    }
}
