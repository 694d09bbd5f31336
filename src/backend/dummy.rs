//! Headless GPU backend for testing and development.
//!
//! This backend doesn't perform actual GPU operations. Buffers live in host memory,
//! every create/destroy is counted per resource kind so leaks are observable, and
//! recorded commands are kept in a log that tests can inspect.

use std::collections::{HashMap, HashSet};
use std::time::Duration;

use super::traits::*;
use super::types::*;

/// Resource kinds tracked by the live-object counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceKind {
    Buffer,
    Image,
    Sampler,
    RenderPass,
    Framebuffer,
    ShaderModule,
    Pipeline,
    DescriptorSet,
    CommandBuffer,
    Semaphore,
    Fence,
    Swapchain,
}

/// A command recorded into any command buffer, in recording order.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RecordedCommand {
    BeginRenderPass {
        render_pass: RenderPassHandle,
        framebuffer: FramebufferHandle,
    },
    EndRenderPass,
    SetViewport(Viewport),
    BindPipeline(PipelineHandle),
    BindDescriptorSet(DescriptorSetHandle),
    BindVertexBuffer {
        buffer: BufferHandle,
        offset: u64,
    },
    BindIndexBuffer {
        buffer: BufferHandle,
        offset: u64,
        format: IndexFormat,
    },
    Draw {
        vertex_count: u32,
        first_vertex: u32,
    },
    DrawIndexed {
        index_count: u32,
        first_index: u32,
        vertex_offset: i32,
    },
    TransitionImage {
        image: ImageHandle,
        old_layout: ImageLayout,
        new_layout: ImageLayout,
    },
    ClearImage(ImageHandle),
    BlitImage {
        src: ImageHandle,
        dst: ImageHandle,
        dst_rect: Rect,
    },
}

impl RecordedCommand {
    pub fn is_draw(&self) -> bool {
        matches!(
            self,
            RecordedCommand::Draw { .. } | RecordedCommand::DrawIndexed { .. }
        )
    }
}

struct DummySwapchain {
    images: Vec<ImageHandle>,
    next_image: u32,
}

/// Headless GPU backend.
pub struct DummyBackend {
    capabilities: DeviceCapabilities,
    generation: u64,
    next_id: u64,
    live: HashMap<ResourceKind, HashSet<u64>>,
    created: HashMap<ResourceKind, usize>,
    buffers: HashMap<u64, Vec<u8>>,
    buffer_alignment: u64,
    memory_limit: Option<u64>,
    memory_used: u64,
    images: HashMap<u64, ImageDescriptor>,
    pipelines: HashMap<u64, (PipelineDescriptor, RenderPassHandle, u32)>,
    descriptor_sets: HashMap<u64, Vec<DescriptorWrite>>,
    descriptor_write_count: usize,
    fences: HashMap<u64, bool>,
    swapchains: HashMap<u64, DummySwapchain>,
    swapchain_image_count: u32,
    forced_out_of_date: u32,
    forced_present_out_of_date: u32,
    commands: Vec<RecordedCommand>,
    submissions: usize,
    presents: usize,
}

impl DummyBackend {
    /// Create a new headless backend.
    pub fn new() -> Self {
        Self::with_capabilities(DeviceCapabilities::default())
    }

    pub fn with_capabilities(capabilities: DeviceCapabilities) -> Self {
        Self {
            capabilities,
            generation: 0,
            next_id: 1,
            live: HashMap::new(),
            created: HashMap::new(),
            buffers: HashMap::new(),
            buffer_alignment: 16,
            memory_limit: None,
            memory_used: 0,
            images: HashMap::new(),
            pipelines: HashMap::new(),
            descriptor_sets: HashMap::new(),
            descriptor_write_count: 0,
            fences: HashMap::new(),
            swapchains: HashMap::new(),
            swapchain_image_count: 3,
            forced_out_of_date: 0,
            forced_present_out_of_date: 0,
            commands: Vec::new(),
            submissions: 0,
            presents: 0,
        }
    }

    /// Limit the total bytes of buffer memory; exceeding it fails with `OutOfMemory`.
    pub fn set_memory_limit(&mut self, limit: Option<u64>) {
        self.memory_limit = limit;
    }

    pub fn memory_used(&self) -> u64 {
        self.memory_used
    }

    pub fn set_swapchain_image_count(&mut self, count: u32) {
        self.swapchain_image_count = count.max(1);
    }

    /// Make the next `count` acquires report an out-of-date swapchain.
    pub fn force_out_of_date(&mut self, count: u32) {
        self.forced_out_of_date = count;
    }

    /// Make the next `count` presents report an out-of-date swapchain.
    pub fn force_present_out_of_date(&mut self, count: u32) {
        self.forced_present_out_of_date = count;
    }

    /// Number of objects of `kind` currently alive.
    pub fn live_count(&self, kind: ResourceKind) -> usize {
        self.live.get(&kind).map_or(0, |set| set.len())
    }

    /// Number of objects of `kind` ever created.
    pub fn created_count(&self, kind: ResourceKind) -> usize {
        self.created.get(&kind).copied().unwrap_or(0)
    }

    pub fn commands(&self) -> &[RecordedCommand] {
        &self.commands
    }

    pub fn clear_commands(&mut self) {
        self.commands.clear();
    }

    pub fn draw_calls(&self) -> Vec<RecordedCommand> {
        self.commands.iter().copied().filter(|c| c.is_draw()).collect()
    }

    pub fn submissions(&self) -> usize {
        self.submissions
    }

    pub fn presents(&self) -> usize {
        self.presents
    }

    /// Host copy of a buffer's contents
    pub fn buffer_contents(&self, buffer: BufferHandle) -> Option<&[u8]> {
        self.buffers.get(&buffer.0).map(|data| data.as_slice())
    }

    pub fn buffer_size(&self, buffer: BufferHandle) -> Option<u64> {
        self.buffers.get(&buffer.0).map(|data| data.len() as u64)
    }

    pub fn pipeline_descriptor(&self, pipeline: PipelineHandle) -> Option<&PipelineDescriptor> {
        self.pipelines.get(&pipeline.0).map(|(desc, _, _)| desc)
    }

    /// Last writes applied to a descriptor set
    pub fn descriptor_writes(&self, set: DescriptorSetHandle) -> Option<&[DescriptorWrite]> {
        self.descriptor_sets.get(&set.0).map(|writes| writes.as_slice())
    }

    /// Number of `write_descriptor_set` calls made so far
    pub fn descriptor_write_count(&self) -> usize {
        self.descriptor_write_count
    }

    fn allocate_id(&mut self, kind: ResourceKind) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        self.live.entry(kind).or_default().insert(id);
        *self.created.entry(kind).or_default() += 1;
        id
    }

    fn release_id(&mut self, kind: ResourceKind, id: u64) -> bool {
        let removed = self.live.get_mut(&kind).is_some_and(|set| set.remove(&id));
        if !removed {
            log::warn!("DummyBackend: destroying unknown {:?} {}", kind, id);
        }
        removed
    }

    fn is_live(&self, kind: ResourceKind, id: u64) -> bool {
        self.live.get(&kind).is_some_and(|set| set.contains(&id))
    }
}

impl Default for DummyBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl GraphicsBackend for DummyBackend {
    fn name(&self) -> &'static str {
        "Dummy Backend"
    }

    fn capabilities(&self) -> &DeviceCapabilities {
        &self.capabilities
    }

    fn device_generation(&self) -> u64 {
        self.generation
    }

    fn wait_idle(&mut self, _timeout: Duration) -> BackendResult<()> {
        Ok(())
    }

    fn recreate_device(&mut self) -> BackendResult<()> {
        log::info!("DummyBackend: recreating device");
        self.live.clear();
        self.buffers.clear();
        self.memory_used = 0;
        self.images.clear();
        self.pipelines.clear();
        self.descriptor_sets.clear();
        self.fences.clear();
        self.swapchains.clear();
        self.generation += 1;
        Ok(())
    }

    fn create_buffer(
        &mut self,
        kind: BufferKind,
        usage: BufferUsage,
        size: u64,
    ) -> BackendResult<BufferAllocation> {
        if size == 0 {
            return Err(BackendError::InvalidArgument("zero sized buffer".into()));
        }
        if let Some(limit) = self.memory_limit {
            if self.memory_used + size > limit {
                log::trace!("DummyBackend: buffer of {} bytes exceeds memory limit", size);
                return Err(BackendError::OutOfMemory);
            }
        }
        log::trace!(
            "DummyBackend: creating {:?}/{:?} buffer (size: {})",
            kind,
            usage,
            size
        );
        let id = self.allocate_id(ResourceKind::Buffer);
        self.buffers.insert(id, vec![0u8; size as usize]);
        self.memory_used += size;
        Ok(BufferAllocation {
            handle: BufferHandle(id),
            alignment: self.buffer_alignment,
        })
    }

    fn map_buffer(&mut self, buffer: BufferHandle) -> BackendResult<&mut [u8]> {
        self.buffers
            .get_mut(&buffer.0)
            .map(|data| data.as_mut_slice())
            .ok_or_else(|| BackendError::InvalidArgument(format!("unknown buffer {}", buffer.0)))
    }

    fn destroy_buffer(&mut self, buffer: BufferHandle) {
        if self.release_id(ResourceKind::Buffer, buffer.0) {
            if let Some(data) = self.buffers.remove(&buffer.0) {
                self.memory_used -= data.len() as u64;
            }
        }
    }

    fn create_image(&mut self, desc: &ImageDescriptor) -> BackendResult<ImageHandle> {
        if desc.width == 0 || desc.height == 0 {
            return Err(BackendError::InvalidArgument("zero sized image".into()));
        }
        log::trace!(
            "DummyBackend: creating image {}x{} {:?}",
            desc.width,
            desc.height,
            desc.format
        );
        let id = self.allocate_id(ResourceKind::Image);
        self.images.insert(id, *desc);
        Ok(ImageHandle(id))
    }

    fn upload_image(&mut self, image: ImageHandle, pixels: &[u8]) -> BackendResult<()> {
        let desc = self
            .images
            .get(&image.0)
            .ok_or_else(|| BackendError::InvalidArgument(format!("unknown image {}", image.0)))?;
        let expected = desc.width as usize * desc.height as usize * desc.format.bytes_per_pixel() as usize;
        if pixels.len() != expected {
            return Err(BackendError::InvalidArgument(format!(
                "expected {} bytes of pixel data, got {}",
                expected,
                pixels.len()
            )));
        }
        Ok(())
    }

    fn destroy_image(&mut self, image: ImageHandle) {
        if self.release_id(ResourceKind::Image, image.0) {
            self.images.remove(&image.0);
        }
    }

    fn create_sampler(&mut self, address_mode: AddressMode) -> BackendResult<SamplerHandle> {
        log::trace!("DummyBackend: creating sampler {:?}", address_mode);
        Ok(SamplerHandle(self.allocate_id(ResourceKind::Sampler)))
    }

    fn destroy_sampler(&mut self, sampler: SamplerHandle) {
        self.release_id(ResourceKind::Sampler, sampler.0);
    }

    fn create_render_pass(
        &mut self,
        desc: &RenderPassDescriptor,
    ) -> BackendResult<RenderPassHandle> {
        if desc.resolve && desc.samples <= 1 {
            return Err(BackendError::InvalidArgument(
                "resolve attachment requires multisampling".into(),
            ));
        }
        Ok(RenderPassHandle(self.allocate_id(ResourceKind::RenderPass)))
    }

    fn destroy_render_pass(&mut self, render_pass: RenderPassHandle) {
        self.release_id(ResourceKind::RenderPass, render_pass.0);
    }

    fn create_framebuffer(
        &mut self,
        render_pass: RenderPassHandle,
        attachments: &[ImageHandle],
        extent: Extent,
    ) -> BackendResult<FramebufferHandle> {
        if !self.is_live(ResourceKind::RenderPass, render_pass.0) {
            return Err(BackendError::InvalidArgument("unknown render pass".into()));
        }
        if attachments.is_empty() || extent.is_empty() {
            return Err(BackendError::InvalidArgument("empty framebuffer".into()));
        }
        Ok(FramebufferHandle(self.allocate_id(ResourceKind::Framebuffer)))
    }

    fn destroy_framebuffer(&mut self, framebuffer: FramebufferHandle) {
        self.release_id(ResourceKind::Framebuffer, framebuffer.0);
    }

    fn create_shader_module(
        &mut self,
        stage: ShaderStage,
        code: &[u32],
    ) -> BackendResult<ShaderModuleHandle> {
        if code.is_empty() {
            return Err(BackendError::ShaderCreationFailed(format!(
                "empty {:?} shader",
                stage
            )));
        }
        Ok(ShaderModuleHandle(self.allocate_id(ResourceKind::ShaderModule)))
    }

    fn destroy_shader_module(&mut self, module: ShaderModuleHandle) {
        self.release_id(ResourceKind::ShaderModule, module.0);
    }

    fn create_pipeline(
        &mut self,
        desc: &PipelineDescriptor,
        render_pass: RenderPassHandle,
        samples: u32,
    ) -> BackendResult<PipelineHandle> {
        if !self.is_live(ResourceKind::ShaderModule, desc.vertex_shader.0)
            || !self.is_live(ResourceKind::ShaderModule, desc.pixel_shader.0)
        {
            return Err(BackendError::PipelineCreationFailed(
                "unknown shader module".into(),
            ));
        }
        let id = self.allocate_id(ResourceKind::Pipeline);
        self.pipelines.insert(id, (desc.clone(), render_pass, samples));
        Ok(PipelineHandle(id))
    }

    fn destroy_pipeline(&mut self, pipeline: PipelineHandle) {
        if self.release_id(ResourceKind::Pipeline, pipeline.0) {
            self.pipelines.remove(&pipeline.0);
        }
    }

    fn create_descriptor_set(&mut self) -> BackendResult<DescriptorSetHandle> {
        let id = self.allocate_id(ResourceKind::DescriptorSet);
        self.descriptor_sets.insert(id, Vec::new());
        Ok(DescriptorSetHandle(id))
    }

    fn write_descriptor_set(
        &mut self,
        set: DescriptorSetHandle,
        writes: &[DescriptorWrite],
    ) -> BackendResult<()> {
        let stored = self
            .descriptor_sets
            .get_mut(&set.0)
            .ok_or_else(|| BackendError::DescriptorFailed(format!("unknown set {}", set.0)))?;
        *stored = writes.to_vec();
        self.descriptor_write_count += 1;
        Ok(())
    }

    fn destroy_descriptor_set(&mut self, set: DescriptorSetHandle) {
        if self.release_id(ResourceKind::DescriptorSet, set.0) {
            self.descriptor_sets.remove(&set.0);
        }
    }

    fn create_semaphore(&mut self) -> BackendResult<SemaphoreHandle> {
        Ok(SemaphoreHandle(self.allocate_id(ResourceKind::Semaphore)))
    }

    fn destroy_semaphore(&mut self, semaphore: SemaphoreHandle) {
        self.release_id(ResourceKind::Semaphore, semaphore.0);
    }

    fn create_fence(&mut self, signaled: bool) -> BackendResult<FenceHandle> {
        let id = self.allocate_id(ResourceKind::Fence);
        self.fences.insert(id, signaled);
        Ok(FenceHandle(id))
    }

    fn wait_fence(&mut self, fence: FenceHandle, _timeout: Duration) -> BackendResult<()> {
        match self.fences.get(&fence.0).copied() {
            Some(true) => Ok(()),
            // Nothing will ever signal it, so a real wait would run into the timeout.
            Some(false) => Err(BackendError::Timeout),
            None => Err(BackendError::InvalidArgument(format!("unknown fence {}", fence.0))),
        }
    }

    fn reset_fence(&mut self, fence: FenceHandle) -> BackendResult<()> {
        let signaled = self
            .fences
            .get_mut(&fence.0)
            .ok_or_else(|| BackendError::InvalidArgument(format!("unknown fence {}", fence.0)))?;
        *signaled = false;
        Ok(())
    }

    fn destroy_fence(&mut self, fence: FenceHandle) {
        if self.release_id(ResourceKind::Fence, fence.0) {
            self.fences.remove(&fence.0);
        }
    }

    fn allocate_command_buffer(&mut self) -> BackendResult<CommandBufferHandle> {
        Ok(CommandBufferHandle(self.allocate_id(ResourceKind::CommandBuffer)))
    }

    fn free_command_buffer(&mut self, command_buffer: CommandBufferHandle) {
        self.release_id(ResourceKind::CommandBuffer, command_buffer.0);
    }

    fn begin_command_buffer(&mut self, command_buffer: CommandBufferHandle) -> BackendResult<()> {
        if !self.is_live(ResourceKind::CommandBuffer, command_buffer.0) {
            return Err(BackendError::CommandFailed("unknown command buffer".into()));
        }
        Ok(())
    }

    fn end_command_buffer(&mut self, command_buffer: CommandBufferHandle) -> BackendResult<()> {
        if !self.is_live(ResourceKind::CommandBuffer, command_buffer.0) {
            return Err(BackendError::CommandFailed("unknown command buffer".into()));
        }
        Ok(())
    }

    fn submit(&mut self, info: &SubmitInfo<'_>) -> BackendResult<()> {
        if !self.is_live(ResourceKind::CommandBuffer, info.command_buffer.0) {
            return Err(BackendError::CommandFailed("unknown command buffer".into()));
        }
        self.submissions += 1;
        if let Some(fence) = info.fence {
            if let Some(signaled) = self.fences.get_mut(&fence.0) {
                *signaled = true;
            }
        }
        Ok(())
    }

    fn cmd_begin_render_pass(&mut self, _command_buffer: CommandBufferHandle, begin: &RenderPassBegin) {
        self.commands.push(RecordedCommand::BeginRenderPass {
            render_pass: begin.render_pass,
            framebuffer: begin.framebuffer,
        });
    }

    fn cmd_end_render_pass(&mut self, _command_buffer: CommandBufferHandle) {
        self.commands.push(RecordedCommand::EndRenderPass);
    }

    fn cmd_set_viewport(&mut self, _command_buffer: CommandBufferHandle, viewport: &Viewport) {
        self.commands.push(RecordedCommand::SetViewport(*viewport));
    }

    fn cmd_bind_pipeline(&mut self, _command_buffer: CommandBufferHandle, pipeline: PipelineHandle) {
        self.commands.push(RecordedCommand::BindPipeline(pipeline));
    }

    fn cmd_bind_descriptor_set(
        &mut self,
        _command_buffer: CommandBufferHandle,
        set: DescriptorSetHandle,
    ) {
        self.commands.push(RecordedCommand::BindDescriptorSet(set));
    }

    fn cmd_bind_vertex_buffer(
        &mut self,
        _command_buffer: CommandBufferHandle,
        buffer: BufferHandle,
        offset: u64,
    ) {
        self.commands
            .push(RecordedCommand::BindVertexBuffer { buffer, offset });
    }

    fn cmd_bind_index_buffer(
        &mut self,
        _command_buffer: CommandBufferHandle,
        buffer: BufferHandle,
        offset: u64,
        format: IndexFormat,
    ) {
        self.commands.push(RecordedCommand::BindIndexBuffer {
            buffer,
            offset,
            format,
        });
    }

    fn cmd_draw(&mut self, _command_buffer: CommandBufferHandle, vertex_count: u32, first_vertex: u32) {
        self.commands.push(RecordedCommand::Draw {
            vertex_count,
            first_vertex,
        });
    }

    fn cmd_draw_indexed(
        &mut self,
        _command_buffer: CommandBufferHandle,
        index_count: u32,
        first_index: u32,
        vertex_offset: i32,
    ) {
        self.commands.push(RecordedCommand::DrawIndexed {
            index_count,
            first_index,
            vertex_offset,
        });
    }

    fn cmd_transition_image(
        &mut self,
        _command_buffer: CommandBufferHandle,
        image: ImageHandle,
        old_layout: ImageLayout,
        new_layout: ImageLayout,
    ) {
        self.commands.push(RecordedCommand::TransitionImage {
            image,
            old_layout,
            new_layout,
        });
    }

    fn cmd_clear_image(&mut self, _command_buffer: CommandBufferHandle, image: ImageHandle, _color: [f32; 4]) {
        self.commands.push(RecordedCommand::ClearImage(image));
    }

    fn cmd_blit_image(
        &mut self,
        _command_buffer: CommandBufferHandle,
        src: ImageHandle,
        _src_extent: Extent,
        dst: ImageHandle,
        dst_rect: Rect,
    ) {
        self.commands
            .push(RecordedCommand::BlitImage { src, dst, dst_rect });
    }

    fn create_swapchain(
        &mut self,
        desc: &SwapchainDescriptor,
        previous: Option<SwapchainHandle>,
    ) -> BackendResult<SwapchainInfo> {
        if desc.extent.is_empty() {
            return Err(BackendError::SwapchainCreationFailed(
                "zero sized swapchain".into(),
            ));
        }
        if let Some(previous) = previous {
            if !self.swapchains.contains_key(&previous.0) {
                return Err(BackendError::InvalidArgument("unknown previous swapchain".into()));
            }
        }
        let id = self.allocate_id(ResourceKind::Swapchain);
        let images: Vec<ImageHandle> = (0..self.swapchain_image_count)
            .map(|_| {
                let image = ImageHandle(self.next_id);
                self.next_id += 1;
                image
            })
            .collect();
        self.swapchains.insert(
            id,
            DummySwapchain {
                images: images.clone(),
                next_image: 0,
            },
        );
        log::info!(
            "DummyBackend: created swapchain {}x{} with {} images",
            desc.extent.width,
            desc.extent.height,
            images.len()
        );
        Ok(SwapchainInfo {
            handle: SwapchainHandle(id),
            images,
            format: TextureFormat::Bgra8Unorm,
            extent: desc.extent,
        })
    }

    fn destroy_swapchain(&mut self, swapchain: SwapchainHandle) {
        if self.release_id(ResourceKind::Swapchain, swapchain.0) {
            self.swapchains.remove(&swapchain.0);
        }
    }

    fn acquire_next_image(
        &mut self,
        swapchain: SwapchainHandle,
        _signal: SemaphoreHandle,
        _timeout: Duration,
    ) -> BackendResult<AcquireResult> {
        if self.forced_out_of_date > 0 {
            self.forced_out_of_date -= 1;
            return Ok(AcquireResult::OutOfDate);
        }
        let chain = self
            .swapchains
            .get_mut(&swapchain.0)
            .ok_or_else(|| BackendError::InvalidArgument("unknown swapchain".into()))?;
        let index = chain.next_image;
        chain.next_image = (chain.next_image + 1) % chain.images.len() as u32;
        Ok(AcquireResult::Image(index))
    }

    fn present(
        &mut self,
        swapchain: SwapchainHandle,
        image_index: u32,
        _wait: &[SemaphoreHandle],
    ) -> BackendResult<PresentResult> {
        let chain = self
            .swapchains
            .get(&swapchain.0)
            .ok_or_else(|| BackendError::InvalidArgument("unknown swapchain".into()))?;
        if image_index as usize >= chain.images.len() {
            return Err(BackendError::InvalidArgument("image index out of range".into()));
        }
        if self.forced_present_out_of_date > 0 {
            self.forced_present_out_of_date -= 1;
            return Ok(PresentResult::OutOfDate);
        }
        self.presents += 1;
        Ok(PresentResult::Presented)
    }
}
