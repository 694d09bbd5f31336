//! Core backend abstraction traits
//!
//! Every GPU API the renderer runs on implements [`GraphicsBackend`]. Components receive the
//! backend as `&mut dyn GraphicsBackend` and only ever hold the opaque handles it returns.

use crate::backend::types::*;
use std::time::Duration;
use thiserror::Error;

/// Backend error type
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BackendError {
    #[error("Failed to initialize backend: {0}")]
    InitializationFailed(String),
    #[error("Unsupported: {0}")]
    Unsupported(String),
    #[error("Failed to create device: {0}")]
    DeviceCreationFailed(String),
    #[error("Failed to create surface: {0}")]
    SurfaceCreationFailed(String),
    #[error("Failed to create swapchain: {0}")]
    SwapchainCreationFailed(String),
    #[error("Failed to create buffer: {0}")]
    BufferCreationFailed(String),
    #[error("Failed to create texture: {0}")]
    TextureCreationFailed(String),
    #[error("Failed to create shader: {0}")]
    ShaderCreationFailed(String),
    #[error("Failed to create pipeline: {0}")]
    PipelineCreationFailed(String),
    #[error("Descriptor set operation failed: {0}")]
    DescriptorFailed(String),
    #[error("Command recording or submission failed: {0}")]
    CommandFailed(String),
    #[error("Out of memory")]
    OutOfMemory,
    #[error("Swapchain out of date")]
    OutOfDate,
    #[error("Timed out waiting for the device")]
    Timeout,
    #[error("Device lost")]
    DeviceLost,
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
}

pub type BackendResult<T> = Result<T, BackendError>;

/// Handle to a GPU buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct BufferHandle(pub(crate) u64);

/// Handle to a GPU image
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct ImageHandle(pub(crate) u64);

/// Handle to a sampler
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct SamplerHandle(pub(crate) u64);

/// Handle to a render pass
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct RenderPassHandle(pub(crate) u64);

/// Handle to a framebuffer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct FramebufferHandle(pub(crate) u64);

/// Handle to a shader module
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct ShaderModuleHandle(pub(crate) u64);

/// Handle to a native pipeline state object
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct PipelineHandle(pub(crate) u64);

/// Handle to a descriptor set
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct DescriptorSetHandle(pub(crate) u64);

/// Handle to a command buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct CommandBufferHandle(pub(crate) u64);

/// Handle to a semaphore
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct SemaphoreHandle(pub(crate) u64);

/// Handle to a fence
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct FenceHandle(pub(crate) u64);

/// Handle to a swapchain
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct SwapchainHandle(pub(crate) u64);

/// Main graphics backend trait
pub trait GraphicsBackend {
    /// Human readable backend name
    fn name(&self) -> &'static str;

    /// Device limits the renderer adapts to
    fn capabilities(&self) -> &DeviceCapabilities;

    /// Incremented every time the logical device is recreated; handles from an older
    /// generation are dead.
    fn device_generation(&self) -> u64;

    /// Wait until the device finished all submitted work, giving up after `timeout`.
    fn wait_idle(&mut self, timeout: Duration) -> BackendResult<()>;

    /// Destroy the logical device and every resource created on it, then create a new one.
    fn recreate_device(&mut self) -> BackendResult<()>;

    // Buffers

    /// Create a host-visible buffer of `size` bytes
    fn create_buffer(
        &mut self,
        kind: BufferKind,
        usage: BufferUsage,
        size: u64,
    ) -> BackendResult<BufferAllocation>;

    /// CPU view of the whole buffer
    fn map_buffer(&mut self, buffer: BufferHandle) -> BackendResult<&mut [u8]>;

    fn destroy_buffer(&mut self, buffer: BufferHandle);

    // Images

    fn create_image(&mut self, desc: &ImageDescriptor) -> BackendResult<ImageHandle>;

    /// Copy tightly packed pixels into mip level 0 and regenerate the remaining levels.
    /// The image ends up in shader-read layout.
    fn upload_image(&mut self, image: ImageHandle, pixels: &[u8]) -> BackendResult<()>;

    fn destroy_image(&mut self, image: ImageHandle);

    fn create_sampler(&mut self, address_mode: AddressMode) -> BackendResult<SamplerHandle>;

    fn destroy_sampler(&mut self, sampler: SamplerHandle);

    // Render passes

    fn create_render_pass(&mut self, desc: &RenderPassDescriptor)
        -> BackendResult<RenderPassHandle>;

    fn destroy_render_pass(&mut self, render_pass: RenderPassHandle);

    /// Attachments are ordered color, depth, resolve as declared by the render pass.
    fn create_framebuffer(
        &mut self,
        render_pass: RenderPassHandle,
        attachments: &[ImageHandle],
        extent: Extent,
    ) -> BackendResult<FramebufferHandle>;

    fn destroy_framebuffer(&mut self, framebuffer: FramebufferHandle);

    // Shaders and pipelines

    fn create_shader_module(
        &mut self,
        stage: ShaderStage,
        code: &[u32],
    ) -> BackendResult<ShaderModuleHandle>;

    fn destroy_shader_module(&mut self, module: ShaderModuleHandle);

    /// Build a native pipeline against the backend-global descriptor set layout.
    fn create_pipeline(
        &mut self,
        desc: &PipelineDescriptor,
        render_pass: RenderPassHandle,
        samples: u32,
    ) -> BackendResult<PipelineHandle>;

    fn destroy_pipeline(&mut self, pipeline: PipelineHandle);

    // Descriptor sets

    fn create_descriptor_set(&mut self) -> BackendResult<DescriptorSetHandle>;

    fn write_descriptor_set(
        &mut self,
        set: DescriptorSetHandle,
        writes: &[DescriptorWrite],
    ) -> BackendResult<()>;

    fn destroy_descriptor_set(&mut self, set: DescriptorSetHandle);

    // Synchronization

    fn create_semaphore(&mut self) -> BackendResult<SemaphoreHandle>;

    fn destroy_semaphore(&mut self, semaphore: SemaphoreHandle);

    fn create_fence(&mut self, signaled: bool) -> BackendResult<FenceHandle>;

    /// Wait for a fence, returning [`BackendError::Timeout`] once `timeout` elapses.
    fn wait_fence(&mut self, fence: FenceHandle, timeout: Duration) -> BackendResult<()>;

    fn reset_fence(&mut self, fence: FenceHandle) -> BackendResult<()>;

    fn destroy_fence(&mut self, fence: FenceHandle);

    // Command buffers

    fn allocate_command_buffer(&mut self) -> BackendResult<CommandBufferHandle>;

    fn free_command_buffer(&mut self, command_buffer: CommandBufferHandle);

    /// Reset and start recording
    fn begin_command_buffer(&mut self, command_buffer: CommandBufferHandle) -> BackendResult<()>;

    fn end_command_buffer(&mut self, command_buffer: CommandBufferHandle) -> BackendResult<()>;

    fn submit(&mut self, info: &SubmitInfo<'_>) -> BackendResult<()>;

    // Command recording

    fn cmd_begin_render_pass(&mut self, command_buffer: CommandBufferHandle, begin: &RenderPassBegin);

    fn cmd_end_render_pass(&mut self, command_buffer: CommandBufferHandle);

    /// Sets viewport and a matching scissor rectangle
    fn cmd_set_viewport(&mut self, command_buffer: CommandBufferHandle, viewport: &Viewport);

    fn cmd_bind_pipeline(&mut self, command_buffer: CommandBufferHandle, pipeline: PipelineHandle);

    fn cmd_bind_descriptor_set(
        &mut self,
        command_buffer: CommandBufferHandle,
        set: DescriptorSetHandle,
    );

    fn cmd_bind_vertex_buffer(
        &mut self,
        command_buffer: CommandBufferHandle,
        buffer: BufferHandle,
        offset: u64,
    );

    fn cmd_bind_index_buffer(
        &mut self,
        command_buffer: CommandBufferHandle,
        buffer: BufferHandle,
        offset: u64,
        format: IndexFormat,
    );

    fn cmd_draw(&mut self, command_buffer: CommandBufferHandle, vertex_count: u32, first_vertex: u32);

    fn cmd_draw_indexed(
        &mut self,
        command_buffer: CommandBufferHandle,
        index_count: u32,
        first_index: u32,
        vertex_offset: i32,
    );

    fn cmd_transition_image(
        &mut self,
        command_buffer: CommandBufferHandle,
        image: ImageHandle,
        old_layout: ImageLayout,
        new_layout: ImageLayout,
    );

    /// Clear a color image that is in transfer-destination layout
    fn cmd_clear_image(&mut self, command_buffer: CommandBufferHandle, image: ImageHandle, color: [f32; 4]);

    /// Scale `src` (transfer-source layout) into `dst_rect` of `dst` (transfer-destination layout)
    fn cmd_blit_image(
        &mut self,
        command_buffer: CommandBufferHandle,
        src: ImageHandle,
        src_extent: Extent,
        dst: ImageHandle,
        dst_rect: Rect,
    );

    // Swapchain

    /// Create a swapchain for the backend's window surface, retiring `previous` if given.
    fn create_swapchain(
        &mut self,
        desc: &SwapchainDescriptor,
        previous: Option<SwapchainHandle>,
    ) -> BackendResult<SwapchainInfo>;

    fn destroy_swapchain(&mut self, swapchain: SwapchainHandle);

    fn acquire_next_image(
        &mut self,
        swapchain: SwapchainHandle,
        signal: SemaphoreHandle,
        timeout: Duration,
    ) -> BackendResult<AcquireResult>;

    fn present(
        &mut self,
        swapchain: SwapchainHandle,
        image_index: u32,
        wait: &[SemaphoreHandle],
    ) -> BackendResult<PresentResult>;
}
