//! Common types shared between backends

use bitflags::bitflags;
use bytemuck::{Pod, Zeroable};
use serde::{Deserialize, Serialize};

/// Descriptor binding of the per-draw transform constants (vertex stage).
pub const TRANSFORM_BINDING: u32 = 0;
/// Descriptor binding of the material constants (pixel stage).
pub const MATERIAL_BINDING: u32 = 1;
/// Descriptor binding of the light constants (pixel stage).
pub const LIGHT_BINDING: u32 = 2;
/// Descriptor binding of the sampled texture array.
pub const TEXTURE_BINDING: u32 = 3;
/// Descriptor binding of the sampler array matching [`TEXTURE_BINDING`].
pub const SAMPLER_BINDING: u32 = 4;

/// Number of texture slots every descriptor set carries.
pub const MAX_TEXTURE_COUNT: usize = 4;

/// What a buffer is bound as.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BufferKind {
    Vertex,
    Index,
    Constant,
    Staging,
}

/// How often a buffer is expected to be rewritten from the CPU.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BufferUsage {
    Default,
    Dynamic,
    Immutable,
    Staging,
}

/// A freshly created backing buffer together with its memory alignment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferAllocation {
    pub handle: super::BufferHandle,
    pub alignment: u64,
}

/// Texture format enumeration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TextureFormat {
    Rgba8Unorm,
    Bgra8Unorm,
    Bgra8UnormSrgb,
    Depth32Float,
    Depth32FloatStencil8,
    Depth24UnormStencil8,
}

impl TextureFormat {
    pub fn is_depth(&self) -> bool {
        matches!(
            self,
            TextureFormat::Depth32Float
                | TextureFormat::Depth32FloatStencil8
                | TextureFormat::Depth24UnormStencil8
        )
    }

    pub fn has_stencil(&self) -> bool {
        matches!(
            self,
            TextureFormat::Depth32FloatStencil8 | TextureFormat::Depth24UnormStencil8
        )
    }

    pub fn bytes_per_pixel(&self) -> u32 {
        match self {
            TextureFormat::Rgba8Unorm
            | TextureFormat::Bgra8Unorm
            | TextureFormat::Bgra8UnormSrgb
            | TextureFormat::Depth32Float
            | TextureFormat::Depth24UnormStencil8 => 4,
            TextureFormat::Depth32FloatStencil8 => 8,
        }
    }
}

bitflags! {
    /// Image usage flags
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct ImageUsage: u32 {
        const SAMPLED = 1 << 0;
        const COLOR_ATTACHMENT = 1 << 1;
        const DEPTH_ATTACHMENT = 1 << 2;
        const TRANSFER_SRC = 1 << 3;
        const TRANSFER_DST = 1 << 4;
    }
}

bitflags! {
    /// Set of supported multisample counts, bit `n` meaning `2^n` samples.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct SampleCountMask: u32 {
        const X1 = 1 << 0;
        const X2 = 1 << 1;
        const X4 = 1 << 2;
        const X8 = 1 << 3;
        const X16 = 1 << 4;
        const X32 = 1 << 5;
        const X64 = 1 << 6;
    }
}

impl SampleCountMask {
    /// Largest supported sample count not exceeding `requested`.
    pub fn clamp(self, requested: u32) -> u32 {
        let mut samples = requested.max(1).next_power_of_two();
        if samples > requested.max(1) {
            samples /= 2;
        }
        while samples > 1 {
            if self.bits() & samples != 0 {
                return samples;
            }
            samples /= 2;
        }
        1
    }
}

/// Image creation descriptor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageDescriptor {
    pub width: u32,
    pub height: u32,
    pub format: TextureFormat,
    pub mip_levels: u32,
    pub samples: u32,
    pub usage: ImageUsage,
}

/// Image layouts the renderer transitions between explicitly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ImageLayout {
    Undefined,
    ColorAttachment,
    DepthAttachment,
    ShaderReadOnly,
    TransferSrc,
    TransferDst,
    PresentSrc,
}

/// Sampler addressing outside of [0, 1].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum AddressMode {
    #[default]
    ClampToEdge,
    ClampToBorder,
    Repeat,
    Mirror,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Extent {
    pub width: u32,
    pub height: u32,
}

impl Extent {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    pub fn aspect_ratio(&self) -> f32 {
        if self.height == 0 {
            1.0
        } else {
            self.width as f32 / self.height as f32
        }
    }
}

/// Pixel rectangle inside an image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Rect {
    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: u32,
}

impl Rect {
    pub fn new(x: i32, y: i32, width: u32, height: u32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    pub fn extent(&self) -> Extent {
        Extent::new(self.width, self.height)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ShaderStage {
    Vertex,
    Pixel,
}

/// Primitive topology
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum PrimitiveTopology {
    #[default]
    TriangleList,
    TriangleStrip,
    TriangleFan,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum FillMode {
    #[default]
    Solid,
    Wireframe,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IndexFormat {
    Uint16,
    Uint32,
}

/// Vertex formats understood by the stock vertex shaders.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VertexFormat {
    /// Position, normal
    PN,
    /// Position, normal, texture coordinate
    PNT,
    /// Position, texture coordinate
    PT,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VertexAttributeFormat {
    Float32x2,
    Float32x3,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct VertexAttribute {
    pub location: u32,
    pub format: VertexAttributeFormat,
    pub offset: u32,
}

impl VertexFormat {
    pub fn stride(&self) -> u32 {
        match self {
            VertexFormat::PN => std::mem::size_of::<VertexPN>() as u32,
            VertexFormat::PNT => std::mem::size_of::<VertexPNT>() as u32,
            VertexFormat::PT => std::mem::size_of::<VertexPT>() as u32,
        }
    }

    pub fn attributes(&self) -> Vec<VertexAttribute> {
        use VertexAttributeFormat::*;
        let attribute = |location, format, offset| VertexAttribute {
            location,
            format,
            offset,
        };
        match self {
            VertexFormat::PN => vec![attribute(0, Float32x3, 0), attribute(1, Float32x3, 12)],
            VertexFormat::PNT => vec![
                attribute(0, Float32x3, 0),
                attribute(1, Float32x3, 12),
                attribute(2, Float32x2, 24),
            ],
            VertexFormat::PT => vec![attribute(0, Float32x3, 0), attribute(1, Float32x2, 12)],
        }
    }
}

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct VertexPN {
    pub position: [f32; 3],
    pub normal: [f32; 3],
}

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct VertexPNT {
    pub position: [f32; 3],
    pub normal: [f32; 3],
    pub uv: [f32; 2],
}

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct VertexPT {
    pub position: [f32; 3],
    pub uv: [f32; 2],
}

/// Fixed-function depth state of a pipeline.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DepthState {
    pub test_enabled: bool,
    pub write_enabled: bool,
    pub bias: f32,
}

impl Default for DepthState {
    fn default() -> Self {
        Self {
            test_enabled: true,
            write_enabled: true,
            bias: 0.0,
        }
    }
}

/// Native pipeline creation descriptor
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineDescriptor {
    pub vertex_shader: super::ShaderModuleHandle,
    pub pixel_shader: super::ShaderModuleHandle,
    pub vertex_format: VertexFormat,
    pub topology: PrimitiveTopology,
    pub fill_mode: FillMode,
    pub depth: DepthState,
}

/// Attachment configuration of a single-subpass render pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RenderPassDescriptor {
    pub color_format: TextureFormat,
    pub depth_format: Option<TextureFormat>,
    pub samples: u32,
    pub resolve: bool,
}

/// Parameters for starting a render pass on a command buffer.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RenderPassBegin {
    pub render_pass: super::RenderPassHandle,
    pub framebuffer: super::FramebufferHandle,
    pub extent: Extent,
    pub clear_color: [f32; 4],
    pub clear_depth: f32,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Viewport {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub min_depth: f32,
    pub max_depth: f32,
}

impl Viewport {
    pub fn from_extent(extent: Extent) -> Self {
        Self {
            x: 0.0,
            y: 0.0,
            width: extent.width as f32,
            height: extent.height as f32,
            min_depth: 0.0,
            max_depth: 1.0,
        }
    }
}

/// One binding update of a descriptor set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DescriptorWrite {
    Buffer {
        binding: u32,
        buffer: super::BufferHandle,
        offset: u64,
        size: u64,
    },
    Textures {
        images: [super::ImageHandle; MAX_TEXTURE_COUNT],
        samplers: [super::SamplerHandle; MAX_TEXTURE_COUNT],
    },
}

/// Command buffer submission
#[derive(Debug, Clone, Copy)]
pub struct SubmitInfo<'a> {
    pub command_buffer: super::CommandBufferHandle,
    pub wait: &'a [super::SemaphoreHandle],
    pub signal: &'a [super::SemaphoreHandle],
    pub fence: Option<super::FenceHandle>,
}

/// Swapchain creation parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SwapchainDescriptor {
    pub extent: Extent,
    pub vsync: bool,
}

/// A created swapchain and the presentable images it owns.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SwapchainInfo {
    pub handle: super::SwapchainHandle,
    pub images: Vec<super::ImageHandle>,
    pub format: TextureFormat,
    pub extent: Extent,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcquireResult {
    Image(u32),
    OutOfDate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PresentResult {
    Presented,
    OutOfDate,
}

/// Device limits and features the renderer adapts to.
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceCapabilities {
    pub min_uniform_buffer_offset_alignment: u64,
    pub color_sample_counts: SampleCountMask,
    pub depth_sample_counts: SampleCountMask,
    pub depth_formats: Vec<TextureFormat>,
    pub max_sampler_anisotropy: f32,
}

impl Default for DeviceCapabilities {
    fn default() -> Self {
        Self {
            min_uniform_buffer_offset_alignment: 256,
            color_sample_counts: SampleCountMask::X1 | SampleCountMask::X2 | SampleCountMask::X4,
            depth_sample_counts: SampleCountMask::X1 | SampleCountMask::X2 | SampleCountMask::X4,
            depth_formats: vec![TextureFormat::Depth32Float],
            max_sampler_anisotropy: 1.0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vertex_strides_match_attribute_layout() {
        assert_eq!(VertexFormat::PN.stride(), 24);
        assert_eq!(VertexFormat::PNT.stride(), 32);
        assert_eq!(VertexFormat::PT.stride(), 20);
        assert_eq!(VertexFormat::PNT.attributes()[2].offset, 24);
    }

    #[test]
    fn sample_mask_clamps_to_supported_count() {
        let mask = SampleCountMask::X1 | SampleCountMask::X2 | SampleCountMask::X4;
        assert_eq!(mask.clamp(8), 4);
        assert_eq!(mask.clamp(4), 4);
        assert_eq!(mask.clamp(3), 2);
        assert_eq!(mask.clamp(0), 1);
        assert_eq!(SampleCountMask::X1.clamp(4), 1);
    }
}
