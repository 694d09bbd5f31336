//! Backing buffers and the segments carved out of them.

use crate::backend::{BufferHandle, BufferKind, BufferUsage};

/// A backing GPU buffer owned by an allocator pool.
///
/// Space is handed out by advancing `offset`; sub-ranges are never freed individually.
#[derive(Debug)]
pub struct GpuBuffer {
    handle: BufferHandle,
    kind: BufferKind,
    usage: BufferUsage,
    capacity: u64,
    alignment: u64,
    offset: u64,
}

impl GpuBuffer {
    pub(crate) fn new(
        handle: BufferHandle,
        kind: BufferKind,
        usage: BufferUsage,
        capacity: u64,
        alignment: u64,
    ) -> Self {
        Self {
            handle,
            kind,
            usage,
            capacity,
            alignment: alignment.max(1),
            offset: 0,
        }
    }

    pub fn handle(&self) -> BufferHandle {
        self.handle
    }

    pub fn kind(&self) -> BufferKind {
        self.kind
    }

    pub fn usage(&self) -> BufferUsage {
        self.usage
    }

    pub fn capacity(&self) -> u64 {
        self.capacity
    }

    /// Memory alignment reported by the backend
    pub fn alignment(&self) -> u64 {
        self.alignment
    }

    /// Bytes handed out so far, including alignment padding
    pub fn used(&self) -> u64 {
        self.offset
    }

    /// Reserve `size` bytes at the next multiple of `alignment`.
    ///
    /// Returns the start offset, or `None` if the remainder is too small.
    pub(crate) fn bump(&mut self, size: u64, alignment: u64) -> Option<u64> {
        let start = align_up(self.offset, alignment);
        if start + size > self.capacity {
            return None;
        }
        self.offset = start + size;
        Some(start)
    }
}

/// Non-owning view into a [`GpuBuffer`].
///
/// Equality is structural. `generation` ties the segment to the allocator pool state it was
/// carved from; once that pool is released the segment no longer resolves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BufferSegment {
    buffer: BufferHandle,
    offset: u64,
    size: u64,
    stride: u32,
    generation: u32,
}

impl BufferSegment {
    pub(crate) fn new(
        buffer: BufferHandle,
        offset: u64,
        size: u64,
        stride: u32,
        generation: u32,
    ) -> Self {
        Self {
            buffer,
            offset,
            size,
            stride,
            generation,
        }
    }

    pub fn buffer(&self) -> BufferHandle {
        self.buffer
    }

    pub fn offset(&self) -> u64 {
        self.offset
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn stride(&self) -> u32 {
        self.stride
    }

    pub fn generation(&self) -> u32 {
        self.generation
    }

    /// Number of elements of `stride` bytes
    pub fn count(&self) -> u32 {
        if self.stride == 0 {
            0
        } else {
            (self.size / self.stride as u64) as u32
        }
    }

    /// Index of the first element when the buffer is bound at offset 0
    pub fn first_element(&self) -> u32 {
        if self.stride == 0 {
            0
        } else {
            (self.offset / self.stride as u64) as u32
        }
    }
}

/// Round `value` up to a multiple of `alignment`.
pub fn align_up(value: u64, alignment: u64) -> u64 {
    if alignment <= 1 {
        value
    } else {
        value.div_ceil(alignment) * alignment
    }
}

fn gcd(mut a: u64, mut b: u64) -> u64 {
    while b != 0 {
        let t = a % b;
        a = b;
        b = t;
    }
    a
}

/// Least common multiple; zero operands count as 1.
pub fn lcm(a: u64, b: u64) -> u64 {
    let (a, b) = (a.max(1), b.max(1));
    a / gcd(a, b) * b
}
