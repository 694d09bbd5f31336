//! Resource management
//!
//! GPU buffer pooling, textures, geometry and materials.

pub mod allocator;
pub mod buffer;
mod material;
mod mesh;
mod texture;

pub use allocator::{BufferAllocator, DEFAULT_MIN_BLOCK_SIZE};
pub use buffer::{BufferSegment, GpuBuffer};
pub use material::*;
pub use mesh::*;
pub use texture::*;
