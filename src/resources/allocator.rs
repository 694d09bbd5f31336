//! Pooled bump allocation of GPU buffer memory.
//!
//! Pools are keyed by (buffer kind, usage class). A request probes the pool's buffers in
//! creation order and takes the first one whose remainder fits; otherwise a new backing
//! buffer is created. Segments are never freed one by one: the whole allocator is released
//! together with the content that owns it.

use std::collections::HashMap;

use crate::backend::{BackendError, BackendResult, BufferKind, BufferUsage, GraphicsBackend};

use super::buffer::{align_up, lcm, BufferSegment, GpuBuffer};

/// Default smallest backing buffer for non-constant pools (64 KiB).
pub const DEFAULT_MIN_BLOCK_SIZE: u64 = 64 * 1024;

/// Bump allocator over pools of backing buffers.
pub struct BufferAllocator {
    pools: HashMap<(BufferKind, BufferUsage), Vec<GpuBuffer>>,
    min_block_size: u64,
    uniform_alignment: u64,
    generation: u32,
}

impl BufferAllocator {
    /// `uniform_alignment` is the device's minimum uniform-buffer offset alignment.
    pub fn new(min_block_size: u64, uniform_alignment: u64) -> Self {
        Self {
            pools: HashMap::new(),
            min_block_size: min_block_size.max(1),
            uniform_alignment: uniform_alignment.max(1),
            generation: 0,
        }
    }

    pub fn min_block_size(&self) -> u64 {
        self.min_block_size
    }

    pub fn generation(&self) -> u32 {
        self.generation
    }

    /// Allocate `count` elements of `stride` bytes.
    ///
    /// Fails with [`BackendError::OutOfMemory`] when a new backing buffer cannot be created.
    pub fn allocate(
        &mut self,
        backend: &mut dyn GraphicsBackend,
        kind: BufferKind,
        usage: BufferUsage,
        count: u32,
        stride: u32,
    ) -> BackendResult<BufferSegment> {
        if count == 0 || stride == 0 {
            return Err(BackendError::InvalidArgument(format!(
                "empty allocation of {} x {} bytes",
                count, stride
            )));
        }
        let size = count as u64 * stride as u64;
        let uniform_alignment = if kind == BufferKind::Constant {
            self.uniform_alignment
        } else {
            1
        };
        let generation = self.generation;
        let pool = self.pools.entry((kind, usage)).or_default();

        for buffer in pool.iter_mut() {
            let alignment = lcm(lcm(buffer.alignment(), uniform_alignment), stride as u64);
            if let Some(offset) = buffer.bump(size, alignment) {
                return Ok(BufferSegment::new(
                    buffer.handle(),
                    offset,
                    size,
                    stride,
                    generation,
                ));
            }
        }

        // Constant buffers are rewritten every frame; size them exactly.
        let capacity = if kind == BufferKind::Constant {
            size
        } else {
            align_up(size.max(self.min_block_size), stride as u64)
        };

        let allocation = match backend.create_buffer(kind, usage, capacity) {
            Ok(allocation) => allocation,
            Err(BackendError::OutOfMemory) => {
                log::warn!(
                    "Out of memory creating {:?}/{:?} buffer of {} bytes",
                    kind,
                    usage,
                    capacity
                );
                return Err(BackendError::OutOfMemory);
            }
            Err(e) => return Err(e),
        };
        log::trace!(
            "Created {:?}/{:?} backing buffer of {} bytes ({} in pool)",
            kind,
            usage,
            capacity,
            pool.len() + 1
        );

        let mut buffer = GpuBuffer::new(allocation.handle, kind, usage, capacity, allocation.alignment);
        let alignment = lcm(lcm(buffer.alignment(), uniform_alignment), stride as u64);
        let offset = buffer.bump(size, alignment).ok_or_else(|| {
            BackendError::BufferCreationFailed(format!(
                "fresh buffer of {} bytes cannot hold {} bytes",
                capacity, size
            ))
        })?;
        pool.push(buffer);
        Ok(BufferSegment::new(
            allocation.handle,
            offset,
            size,
            stride,
            generation,
        ))
    }

    /// Whether the segment still refers to a live backing buffer.
    pub fn is_valid(&self, segment: &BufferSegment) -> bool {
        segment.generation() == self.generation && self.find(segment).is_some()
    }

    fn find(&self, segment: &BufferSegment) -> Option<&GpuBuffer> {
        self.pools
            .values()
            .flat_map(|pool| pool.iter())
            .find(|buffer| buffer.handle() == segment.buffer())
    }

    /// CPU view of exactly the bytes covered by `segment`.
    pub fn map_segment<'a>(
        &self,
        backend: &'a mut dyn GraphicsBackend,
        segment: &BufferSegment,
    ) -> BackendResult<&'a mut [u8]> {
        if !self.is_valid(segment) {
            return Err(BackendError::InvalidArgument(
                "buffer segment outlived its pool".into(),
            ));
        }
        let memory = backend.map_buffer(segment.buffer())?;
        let start = segment.offset() as usize;
        let end = start + segment.size() as usize;
        let len = memory.len();
        memory.get_mut(start..end).ok_or_else(|| {
            BackendError::InvalidArgument(format!(
                "segment {}..{} exceeds mapped buffer of {} bytes",
                start, end, len
            ))
        })
    }

    /// Copy `data` to the start of `segment`.
    pub fn write(
        &self,
        backend: &mut dyn GraphicsBackend,
        segment: &BufferSegment,
        data: &[u8],
    ) -> BackendResult<()> {
        let memory = self.map_segment(backend, segment)?;
        if data.len() > memory.len() {
            return Err(BackendError::InvalidArgument(format!(
                "{} bytes do not fit a segment of {} bytes",
                data.len(),
                memory.len()
            )));
        }
        memory[..data.len()].copy_from_slice(data);
        Ok(())
    }

    /// Backing buffers of one pool, in creation order
    pub fn buffers(&self, kind: BufferKind, usage: BufferUsage) -> &[GpuBuffer] {
        self.pools
            .get(&(kind, usage))
            .map(|pool| pool.as_slice())
            .unwrap_or(&[])
    }

    pub fn buffer_count(&self) -> usize {
        self.pools.values().map(|pool| pool.len()).sum()
    }

    /// Destroy every backing buffer. Outstanding segments stop resolving.
    pub fn release_all(&mut self, backend: &mut dyn GraphicsBackend) {
        for (_, pool) in self.pools.drain() {
            for buffer in pool {
                backend.destroy_buffer(buffer.handle());
            }
        }
        self.generation = self.generation.wrapping_add(1);
    }

    /// Drop all bookkeeping without touching the backend, after its device was recreated.
    pub fn forget(&mut self) {
        self.pools.clear();
        self.generation = self.generation.wrapping_add(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::dummy::{DummyBackend, ResourceKind};

    #[test]
    fn constant_segments_honor_uniform_alignment() {
        let mut backend = DummyBackend::new();
        let mut allocator = BufferAllocator::new(DEFAULT_MIN_BLOCK_SIZE, 256);
        let a = allocator
            .allocate(&mut backend, BufferKind::Constant, BufferUsage::Dynamic, 1, 64)
            .unwrap();
        assert_eq!(a.offset(), 0);
        assert_eq!(backend.buffer_size(a.buffer()), Some(64));
    }

    #[test]
    fn vertex_segments_are_stride_aligned() {
        let mut backend = DummyBackend::new();
        let mut allocator = BufferAllocator::new(1024, 256);
        let a = allocator
            .allocate(&mut backend, BufferKind::Vertex, BufferUsage::Default, 3, 12)
            .unwrap();
        let b = allocator
            .allocate(&mut backend, BufferKind::Vertex, BufferUsage::Default, 2, 32)
            .unwrap();
        assert_eq!(a.buffer(), b.buffer());
        assert_eq!(b.offset() % 32, 0);
        assert_eq!(b.first_element(), 2);
        assert_eq!(backend.buffer_size(a.buffer()), Some(1032));
    }

    #[test]
    fn write_copies_into_segment_range() {
        let mut backend = DummyBackend::new();
        let mut allocator = BufferAllocator::new(256, 16);
        let _ = allocator
            .allocate(&mut backend, BufferKind::Index, BufferUsage::Default, 4, 2)
            .unwrap();
        let segment = allocator
            .allocate(&mut backend, BufferKind::Index, BufferUsage::Default, 2, 2)
            .unwrap();
        allocator
            .write(&mut backend, &segment, &[1, 2, 3, 4])
            .unwrap();
        let contents = backend.buffer_contents(segment.buffer()).unwrap();
        assert_eq!(segment.offset(), 16);
        assert_eq!(&contents[16..20], &[1, 2, 3, 4]);
        assert!(allocator
            .write(&mut backend, &segment, &[0; 5])
            .is_err());
    }

    #[test]
    fn released_segments_no_longer_resolve() {
        let mut backend = DummyBackend::new();
        let mut allocator = BufferAllocator::new(256, 16);
        let segment = allocator
            .allocate(&mut backend, BufferKind::Vertex, BufferUsage::Default, 1, 12)
            .unwrap();
        assert!(allocator.is_valid(&segment));
        allocator.release_all(&mut backend);
        assert!(!allocator.is_valid(&segment));
        assert_eq!(backend.live_count(ResourceKind::Buffer), 0);
        assert!(matches!(
            allocator.map_segment(&mut backend, &segment),
            Err(BackendError::InvalidArgument(_))
        ));
    }

    #[test]
    fn zero_sized_requests_are_rejected() {
        let mut backend = DummyBackend::new();
        let mut allocator = BufferAllocator::new(256, 16);
        assert!(matches!(
            allocator.allocate(&mut backend, BufferKind::Vertex, BufferUsage::Default, 0, 12),
            Err(BackendError::InvalidArgument(_))
        ));
    }
}
