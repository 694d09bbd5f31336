//! Vulkan backend built on ash
//!
//! Memory goes through `gpu-allocator`. Every handle handed out is a key into one of the
//! per-kind tables of the live [`DeviceContext`]; recreating the device empties them all.

mod allocator;
mod command;
mod conversion;
mod debug;
mod device;
mod instance;
mod pipeline;
mod swapchain;

pub use device::{score_device, DeviceCandidate};

use std::collections::HashMap;
use std::time::Duration;

use ash::vk;
use gpu_allocator::vulkan::Allocation;

use crate::backend::traits::*;
use crate::backend::types::*;
use crate::backend::WindowSource;
use crate::config::RendererConfig;

use allocator::SharedAllocator;
use conversion::{
    aspect_mask, convert_address_mode, convert_image_layout, convert_image_usage,
    convert_sample_count, convert_texture_format, texture_format_from_vk,
};
use device::SelectedDevice;
use instance::DebugMessenger;

/// Map a Vulkan error code, falling back to `other` for codes without a dedicated variant.
pub(crate) fn result_error(e: vk::Result, other: fn(String) -> BackendError) -> BackendError {
    match e {
        vk::Result::ERROR_OUT_OF_DEVICE_MEMORY
        | vk::Result::ERROR_OUT_OF_HOST_MEMORY
        | vk::Result::ERROR_OUT_OF_POOL_MEMORY => BackendError::OutOfMemory,
        vk::Result::ERROR_DEVICE_LOST => BackendError::DeviceLost,
        vk::Result::ERROR_OUT_OF_DATE_KHR => BackendError::OutOfDate,
        vk::Result::TIMEOUT => BackendError::Timeout,
        code => other(format!("{:?}", code)),
    }
}

fn timeout_nanos(timeout: Duration) -> u64 {
    u64::try_from(timeout.as_nanos()).unwrap_or(u64::MAX)
}

struct VulkanBuffer {
    buffer: vk::Buffer,
    allocation: Option<Allocation>,
    size: u64,
}

struct VulkanImage {
    image: vk::Image,
    view: vk::ImageView,
    /// `None` for swapchain-owned images
    allocation: Option<Allocation>,
    format: TextureFormat,
    width: u32,
    height: u32,
    mip_levels: u32,
}

struct VulkanSwapchain {
    swapchain: vk::SwapchainKHR,
    images: Vec<u64>,
}

/// Window surface and the loader that owns it.
struct SurfaceContext {
    loader: ash::khr::surface::Instance,
    surface: vk::SurfaceKHR,
}

/// Everything created on one logical device.
struct DeviceContext {
    selected: SelectedDevice,
    device: ash::Device,
    queue: vk::Queue,
    swapchain_fn: ash::khr::swapchain::Device,
    allocator: Option<SharedAllocator>,
    command_pool: vk::CommandPool,
    descriptor_pool: vk::DescriptorPool,
    set_layout: vk::DescriptorSetLayout,
    pipeline_layout: vk::PipelineLayout,
    pipeline_cache: vk::PipelineCache,

    next_handle: u64,
    buffers: HashMap<u64, VulkanBuffer>,
    images: HashMap<u64, VulkanImage>,
    samplers: HashMap<u64, vk::Sampler>,
    render_passes: HashMap<u64, vk::RenderPass>,
    framebuffers: HashMap<u64, vk::Framebuffer>,
    shader_modules: HashMap<u64, vk::ShaderModule>,
    pipelines: HashMap<u64, vk::Pipeline>,
    descriptor_sets: HashMap<u64, vk::DescriptorSet>,
    command_buffers: HashMap<u64, vk::CommandBuffer>,
    semaphores: HashMap<u64, vk::Semaphore>,
    fences: HashMap<u64, vk::Fence>,
    swapchains: HashMap<u64, VulkanSwapchain>,
}

impl DeviceContext {
    fn new(
        instance: &ash::Instance,
        surface: Option<&SurfaceContext>,
        next_handle: u64,
    ) -> BackendResult<(Self, DeviceCapabilities)> {
        let surface_pair = surface.map(|s| (&s.loader, s.surface));
        let selected = device::select_physical_device(instance, surface_pair)?;
        let capabilities = device::query_capabilities(instance, &selected);
        let device = device::create_logical_device(instance, &selected)?;

        // Owned objects are destroyed in reverse if a later step fails.
        let mut context = Self {
            queue: unsafe { device.get_device_queue(selected.queue_family, 0) },
            swapchain_fn: ash::khr::swapchain::Device::new(instance, &device),
            selected,
            device,
            allocator: None,
            command_pool: vk::CommandPool::null(),
            descriptor_pool: vk::DescriptorPool::null(),
            set_layout: vk::DescriptorSetLayout::null(),
            pipeline_layout: vk::PipelineLayout::null(),
            pipeline_cache: vk::PipelineCache::null(),
            next_handle,
            buffers: HashMap::new(),
            images: HashMap::new(),
            samplers: HashMap::new(),
            render_passes: HashMap::new(),
            framebuffers: HashMap::new(),
            shader_modules: HashMap::new(),
            pipelines: HashMap::new(),
            descriptor_sets: HashMap::new(),
            command_buffers: HashMap::new(),
            semaphores: HashMap::new(),
            fences: HashMap::new(),
            swapchains: HashMap::new(),
        };

        if let Err(e) = context.create_device_objects(instance) {
            context.destroy();
            return Err(e);
        }

        log::info!(
            "Created Vulkan device (queue family {}, uniform alignment {})",
            context.selected.queue_family,
            capabilities.min_uniform_buffer_offset_alignment
        );
        Ok((context, capabilities))
    }

    fn create_device_objects(&mut self, instance: &ash::Instance) -> BackendResult<()> {
        self.allocator = Some(allocator::create_allocator(
            instance,
            self.selected.physical_device,
            &self.device,
        )?);
        self.command_pool = command::create_command_pool(&self.device, self.selected.queue_family)?;
        self.descriptor_pool = pipeline::create_descriptor_pool(&self.device)?;
        self.set_layout = pipeline::create_descriptor_set_layout(&self.device)?;
        self.pipeline_layout = pipeline::create_pipeline_layout(&self.device, self.set_layout)?;
        self.pipeline_cache = pipeline::create_pipeline_cache(&self.device)?;
        Ok(())
    }

    fn next_handle(&mut self) -> u64 {
        let id = self.next_handle;
        self.next_handle += 1;
        id
    }

    fn allocator(&self) -> BackendResult<&SharedAllocator> {
        self.allocator.as_ref().ok_or(BackendError::DeviceLost)
    }

    fn free_allocation(&self, allocation: Option<Allocation>) {
        if let (Some(allocator), Some(allocation)) = (self.allocator.as_ref(), allocation) {
            allocator::free(allocator, allocation);
        }
    }

    fn destroy_image_entry(&self, image: VulkanImage) {
        unsafe {
            self.device.destroy_image_view(image.view, None);
            if image.allocation.is_some() {
                self.device.destroy_image(image.image, None);
            }
        }
        self.free_allocation(image.allocation);
    }

    fn destroy_swapchain_entry(&mut self, swapchain: VulkanSwapchain) {
        for id in &swapchain.images {
            if let Some(image) = self.images.remove(id) {
                unsafe { self.device.destroy_image_view(image.view, None) };
            }
        }
        unsafe {
            self.swapchain_fn
                .destroy_swapchain(swapchain.swapchain, None)
        };
    }

    fn image(&self, handle: ImageHandle) -> BackendResult<&VulkanImage> {
        self.images
            .get(&handle.0)
            .ok_or_else(|| BackendError::InvalidArgument(format!("unknown image {:?}", handle)))
    }

    fn command_buffer(&self, handle: CommandBufferHandle) -> Option<vk::CommandBuffer> {
        let cmd = self.command_buffers.get(&handle.0).copied();
        if cmd.is_none() {
            log::warn!("Recording into unknown command buffer {:?}", handle);
        }
        cmd
    }

    /// Wait for the device to go idle, then destroy every object in reverse creation order.
    fn destroy(&mut self) {
        unsafe {
            let _ = self.device.device_wait_idle();

            let swapchains: Vec<_> = self.swapchains.drain().map(|(_, s)| s).collect();
            for swapchain in swapchains {
                self.destroy_swapchain_entry(swapchain);
            }
            for (_, framebuffer) in self.framebuffers.drain() {
                self.device.destroy_framebuffer(framebuffer, None);
            }
            for (_, pipeline) in self.pipelines.drain() {
                self.device.destroy_pipeline(pipeline, None);
            }
            for (_, render_pass) in self.render_passes.drain() {
                self.device.destroy_render_pass(render_pass, None);
            }
            for (_, module) in self.shader_modules.drain() {
                self.device.destroy_shader_module(module, None);
            }
            self.descriptor_sets.clear();
            for (_, sampler) in self.samplers.drain() {
                self.device.destroy_sampler(sampler, None);
            }
            let images: Vec<_> = self.images.drain().map(|(_, image)| image).collect();
            for image in images {
                self.destroy_image_entry(image);
            }
            let buffers: Vec<_> = self.buffers.drain().map(|(_, buffer)| buffer).collect();
            for buffer in buffers {
                self.device.destroy_buffer(buffer.buffer, None);
                self.free_allocation(buffer.allocation);
            }
            for (_, semaphore) in self.semaphores.drain() {
                self.device.destroy_semaphore(semaphore, None);
            }
            for (_, fence) in self.fences.drain() {
                self.device.destroy_fence(fence, None);
            }
            self.command_buffers.clear();

            self.device.destroy_pipeline_cache(self.pipeline_cache, None);
            self.device
                .destroy_pipeline_layout(self.pipeline_layout, None);
            self.device
                .destroy_descriptor_set_layout(self.set_layout, None);
            self.device
                .destroy_descriptor_pool(self.descriptor_pool, None);
            self.device.destroy_command_pool(self.command_pool, None);

            // The allocator must release its memory blocks before the device goes away.
            self.allocator = None;
            self.device.destroy_device(None);
        }
    }
}

/// Vulkan implementation of [`GraphicsBackend`]
pub struct VulkanBackend {
    _entry: ash::Entry,
    instance: ash::Instance,
    debug: Option<DebugMessenger>,
    surface: Option<SurfaceContext>,
    context: Option<DeviceContext>,
    capabilities: DeviceCapabilities,
    generation: u64,
}

impl VulkanBackend {
    /// Create the instance, the window surface when `window` is given, and a device.
    pub fn new(config: &RendererConfig, window: Option<&dyn WindowSource>) -> BackendResult<Self> {
        let entry = unsafe { ash::Entry::load() }
            .map_err(|e| BackendError::InitializationFailed(e.to_string()))?;

        let handles = match window {
            Some(window) => {
                let display = window
                    .display_handle()
                    .map_err(|e| BackendError::SurfaceCreationFailed(e.to_string()))?
                    .as_raw();
                let window = window
                    .window_handle()
                    .map_err(|e| BackendError::SurfaceCreationFailed(e.to_string()))?
                    .as_raw();
                Some((display, window))
            }
            None => None,
        };

        let (instance, debug) =
            instance::create_instance(&entry, config.validation, handles.map(|(d, _)| d))?;

        let surface = match handles {
            Some((display, window)) => {
                match unsafe { ash_window::create_surface(&entry, &instance, display, window, None) }
                {
                    Ok(surface) => Some(SurfaceContext {
                        loader: ash::khr::surface::Instance::new(&entry, &instance),
                        surface,
                    }),
                    Err(e) => {
                        instance::destroy_instance(&instance, debug.as_ref());
                        return Err(BackendError::SurfaceCreationFailed(e.to_string()));
                    }
                }
            }
            None => None,
        };

        let (context, capabilities) = match DeviceContext::new(&instance, surface.as_ref(), 1) {
            Ok(created) => created,
            Err(e) => {
                if let Some(surface) = &surface {
                    unsafe { surface.loader.destroy_surface(surface.surface, None) };
                }
                instance::destroy_instance(&instance, debug.as_ref());
                return Err(e);
            }
        };

        Ok(Self {
            _entry: entry,
            instance,
            debug,
            surface,
            context: Some(context),
            capabilities,
            generation: 0,
        })
    }

    fn context(&self) -> BackendResult<&DeviceContext> {
        self.context.as_ref().ok_or(BackendError::DeviceLost)
    }

    fn context_mut(&mut self) -> BackendResult<&mut DeviceContext> {
        self.context.as_mut().ok_or(BackendError::DeviceLost)
    }
}

impl Drop for VulkanBackend {
    fn drop(&mut self) {
        if let Some(mut context) = self.context.take() {
            context.destroy();
        }
        if let Some(surface) = self.surface.take() {
            unsafe { surface.loader.destroy_surface(surface.surface, None) };
        }
        instance::destroy_instance(&self.instance, self.debug.as_ref());
    }
}

impl GraphicsBackend for VulkanBackend {
    fn name(&self) -> &'static str {
        "Vulkan"
    }

    fn capabilities(&self) -> &DeviceCapabilities {
        &self.capabilities
    }

    fn device_generation(&self) -> u64 {
        self.generation
    }

    fn wait_idle(&mut self, timeout: Duration) -> BackendResult<()> {
        // An empty submission signals its fence only after all earlier work on the queue.
        let ctx = self.context()?;
        let fence = unsafe { ctx.device.create_fence(&vk::FenceCreateInfo::default(), None) }
            .map_err(|e| result_error(e, BackendError::CommandFailed))?;
        let result = unsafe {
            ctx.device
                .queue_submit(ctx.queue, &[], fence)
                .and_then(|_| {
                    ctx.device
                        .wait_for_fences(&[fence], true, timeout_nanos(timeout))
                })
        }
        .map_err(|e| result_error(e, BackendError::CommandFailed));
        unsafe { ctx.device.destroy_fence(fence, None) };
        result
    }

    fn recreate_device(&mut self) -> BackendResult<()> {
        let next_handle = self.context.as_ref().map_or(1, |ctx| ctx.next_handle);
        if let Some(mut context) = self.context.take() {
            context.destroy();
        }
        self.generation += 1;

        let (context, capabilities) =
            DeviceContext::new(&self.instance, self.surface.as_ref(), next_handle)?;
        self.context = Some(context);
        self.capabilities = capabilities;
        log::info!("Recreated Vulkan device (generation {})", self.generation);
        Ok(())
    }

    fn create_buffer(
        &mut self,
        kind: BufferKind,
        _usage: BufferUsage,
        size: u64,
    ) -> BackendResult<BufferAllocation> {
        if size == 0 {
            return Err(BackendError::InvalidArgument(
                "buffer size must be non-zero".into(),
            ));
        }
        let usage = match kind {
            BufferKind::Vertex => vk::BufferUsageFlags::VERTEX_BUFFER,
            BufferKind::Index => vk::BufferUsageFlags::INDEX_BUFFER,
            BufferKind::Constant => vk::BufferUsageFlags::UNIFORM_BUFFER,
            BufferKind::Staging => vk::BufferUsageFlags::TRANSFER_SRC,
        };

        let ctx = self.context_mut()?;
        let (buffer, allocation, alignment) = allocator::create_host_buffer(
            &ctx.device,
            ctx.allocator()?,
            &format!("{:?} buffer", kind),
            size,
            usage,
        )?;

        let id = ctx.next_handle();
        ctx.buffers.insert(
            id,
            VulkanBuffer {
                buffer,
                allocation: Some(allocation),
                size,
            },
        );
        Ok(BufferAllocation {
            handle: BufferHandle(id),
            alignment,
        })
    }

    fn map_buffer(&mut self, buffer: BufferHandle) -> BackendResult<&mut [u8]> {
        let ctx = self.context_mut()?;
        let entry = ctx
            .buffers
            .get_mut(&buffer.0)
            .ok_or_else(|| BackendError::InvalidArgument(format!("unknown buffer {:?}", buffer)))?;
        let size = entry.size as usize;
        entry
            .allocation
            .as_mut()
            .and_then(|allocation| allocation.mapped_slice_mut())
            .map(|slice| &mut slice[..size])
            .ok_or_else(|| BackendError::BufferCreationFailed("buffer is not host visible".into()))
    }

    fn destroy_buffer(&mut self, buffer: BufferHandle) {
        let Some(ctx) = self.context.as_mut() else {
            return;
        };
        if let Some(entry) = ctx.buffers.remove(&buffer.0) {
            unsafe { ctx.device.destroy_buffer(entry.buffer, None) };
            ctx.free_allocation(entry.allocation);
        }
    }

    fn create_image(&mut self, desc: &ImageDescriptor) -> BackendResult<ImageHandle> {
        if desc.width == 0 || desc.height == 0 || desc.mip_levels == 0 {
            return Err(BackendError::InvalidArgument(format!(
                "invalid image size {}x{} with {} mips",
                desc.width, desc.height, desc.mip_levels
            )));
        }

        let ctx = self.context_mut()?;
        let format = convert_texture_format(desc.format);
        let image_info = vk::ImageCreateInfo::default()
            .image_type(vk::ImageType::TYPE_2D)
            .format(format)
            .extent(vk::Extent3D {
                width: desc.width,
                height: desc.height,
                depth: 1,
            })
            .mip_levels(desc.mip_levels)
            .array_layers(1)
            .samples(convert_sample_count(desc.samples))
            .tiling(vk::ImageTiling::OPTIMAL)
            .usage(convert_image_usage(desc.usage))
            .sharing_mode(vk::SharingMode::EXCLUSIVE)
            .initial_layout(vk::ImageLayout::UNDEFINED);

        let image = unsafe { ctx.device.create_image(&image_info, None) }
            .map_err(|e| result_error(e, BackendError::TextureCreationFailed))?;

        let allocation = match allocator::allocate_image_memory(&ctx.device, ctx.allocator()?, image)
        {
            Ok(allocation) => allocation,
            Err(e) => {
                unsafe { ctx.device.destroy_image(image, None) };
                return Err(e);
            }
        };

        let view_info = vk::ImageViewCreateInfo::default()
            .image(image)
            .view_type(vk::ImageViewType::TYPE_2D)
            .format(format)
            .subresource_range(vk::ImageSubresourceRange {
                aspect_mask: aspect_mask(desc.format),
                base_mip_level: 0,
                level_count: desc.mip_levels,
                base_array_layer: 0,
                layer_count: 1,
            });
        let view = match unsafe { ctx.device.create_image_view(&view_info, None) } {
            Ok(view) => view,
            Err(e) => {
                unsafe { ctx.device.destroy_image(image, None) };
                ctx.free_allocation(Some(allocation));
                return Err(result_error(e, BackendError::TextureCreationFailed));
            }
        };

        let id = ctx.next_handle();
        ctx.images.insert(
            id,
            VulkanImage {
                image,
                view,
                allocation: Some(allocation),
                format: desc.format,
                width: desc.width,
                height: desc.height,
                mip_levels: desc.mip_levels,
            },
        );
        Ok(ImageHandle(id))
    }

    fn upload_image(&mut self, image: ImageHandle, pixels: &[u8]) -> BackendResult<()> {
        let ctx = self.context()?;
        let target = ctx.image(image)?;
        let expected = target.width as usize
            * target.height as usize
            * target.format.bytes_per_pixel() as usize;
        if pixels.len() != expected {
            return Err(BackendError::InvalidArgument(format!(
                "expected {} bytes of pixels, got {}",
                expected,
                pixels.len()
            )));
        }

        let (staging, mut allocation, _) = allocator::create_host_buffer(
            &ctx.device,
            ctx.allocator()?,
            "texture staging",
            expected as u64,
            vk::BufferUsageFlags::TRANSFER_SRC,
        )?;
        let result = match allocation.mapped_slice_mut() {
            Some(mapped) => {
                mapped[..expected].copy_from_slice(pixels);
                let (vk_image, width, height, mip_levels) =
                    (target.image, target.width, target.height, target.mip_levels);
                command::submit_one_shot(&ctx.device, ctx.command_pool, ctx.queue, |cmd| {
                    command::record_texture_upload(
                        &ctx.device,
                        cmd,
                        staging,
                        vk_image,
                        width,
                        height,
                        mip_levels,
                    )
                })
            }
            None => Err(BackendError::TextureCreationFailed(
                "staging buffer is not host visible".into(),
            )),
        };

        unsafe { ctx.device.destroy_buffer(staging, None) };
        ctx.free_allocation(Some(allocation));
        result
    }

    fn destroy_image(&mut self, image: ImageHandle) {
        let Some(ctx) = self.context.as_mut() else {
            return;
        };
        if let Some(entry) = ctx.images.remove(&image.0) {
            ctx.destroy_image_entry(entry);
        }
    }

    fn create_sampler(&mut self, address_mode: AddressMode) -> BackendResult<SamplerHandle> {
        let max_anisotropy = self.capabilities.max_sampler_anisotropy;
        let ctx = self.context_mut()?;
        let mode = convert_address_mode(address_mode);
        let sampler_info = vk::SamplerCreateInfo::default()
            .mag_filter(vk::Filter::LINEAR)
            .min_filter(vk::Filter::LINEAR)
            .mipmap_mode(vk::SamplerMipmapMode::LINEAR)
            .address_mode_u(mode)
            .address_mode_v(mode)
            .address_mode_w(mode)
            .anisotropy_enable(max_anisotropy > 1.0)
            .max_anisotropy(max_anisotropy)
            .min_lod(0.0)
            .max_lod(vk::LOD_CLAMP_NONE)
            .border_color(vk::BorderColor::FLOAT_TRANSPARENT_BLACK);

        let sampler = unsafe { ctx.device.create_sampler(&sampler_info, None) }
            .map_err(|e| result_error(e, BackendError::TextureCreationFailed))?;
        let id = ctx.next_handle();
        ctx.samplers.insert(id, sampler);
        Ok(SamplerHandle(id))
    }

    fn destroy_sampler(&mut self, sampler: SamplerHandle) {
        let Some(ctx) = self.context.as_mut() else {
            return;
        };
        if let Some(sampler) = ctx.samplers.remove(&sampler.0) {
            unsafe { ctx.device.destroy_sampler(sampler, None) };
        }
    }

    fn create_render_pass(
        &mut self,
        desc: &RenderPassDescriptor,
    ) -> BackendResult<RenderPassHandle> {
        let ctx = self.context_mut()?;
        let render_pass = pipeline::create_render_pass(&ctx.device, desc)?;
        let id = ctx.next_handle();
        ctx.render_passes.insert(id, render_pass);
        Ok(RenderPassHandle(id))
    }

    fn destroy_render_pass(&mut self, render_pass: RenderPassHandle) {
        let Some(ctx) = self.context.as_mut() else {
            return;
        };
        if let Some(render_pass) = ctx.render_passes.remove(&render_pass.0) {
            unsafe { ctx.device.destroy_render_pass(render_pass, None) };
        }
    }

    fn create_framebuffer(
        &mut self,
        render_pass: RenderPassHandle,
        attachments: &[ImageHandle],
        extent: Extent,
    ) -> BackendResult<FramebufferHandle> {
        let ctx = self.context_mut()?;
        let pass = *ctx.render_passes.get(&render_pass.0).ok_or_else(|| {
            BackendError::InvalidArgument(format!("unknown render pass {:?}", render_pass))
        })?;
        let views = attachments
            .iter()
            .map(|handle| ctx.image(*handle).map(|image| image.view))
            .collect::<BackendResult<Vec<_>>>()?;

        let framebuffer_info = vk::FramebufferCreateInfo::default()
            .render_pass(pass)
            .attachments(&views)
            .width(extent.width)
            .height(extent.height)
            .layers(1);
        let framebuffer = unsafe { ctx.device.create_framebuffer(&framebuffer_info, None) }
            .map_err(|e| result_error(e, BackendError::TextureCreationFailed))?;

        let id = ctx.next_handle();
        ctx.framebuffers.insert(id, framebuffer);
        Ok(FramebufferHandle(id))
    }

    fn destroy_framebuffer(&mut self, framebuffer: FramebufferHandle) {
        let Some(ctx) = self.context.as_mut() else {
            return;
        };
        if let Some(framebuffer) = ctx.framebuffers.remove(&framebuffer.0) {
            unsafe { ctx.device.destroy_framebuffer(framebuffer, None) };
        }
    }

    fn create_shader_module(
        &mut self,
        _stage: ShaderStage,
        code: &[u32],
    ) -> BackendResult<ShaderModuleHandle> {
        if code.is_empty() {
            return Err(BackendError::ShaderCreationFailed("empty bytecode".into()));
        }
        let ctx = self.context_mut()?;
        let create_info = vk::ShaderModuleCreateInfo::default().code(code);
        let module = unsafe { ctx.device.create_shader_module(&create_info, None) }
            .map_err(|e| result_error(e, BackendError::ShaderCreationFailed))?;
        let id = ctx.next_handle();
        ctx.shader_modules.insert(id, module);
        Ok(ShaderModuleHandle(id))
    }

    fn destroy_shader_module(&mut self, module: ShaderModuleHandle) {
        let Some(ctx) = self.context.as_mut() else {
            return;
        };
        if let Some(module) = ctx.shader_modules.remove(&module.0) {
            unsafe { ctx.device.destroy_shader_module(module, None) };
        }
    }

    fn create_pipeline(
        &mut self,
        desc: &PipelineDescriptor,
        render_pass: RenderPassHandle,
        samples: u32,
    ) -> BackendResult<PipelineHandle> {
        let ctx = self.context_mut()?;
        let module = |handle: ShaderModuleHandle| {
            ctx.shader_modules.get(&handle.0).copied().ok_or_else(|| {
                BackendError::InvalidArgument(format!("unknown shader module {:?}", handle))
            })
        };
        let vertex_module = module(desc.vertex_shader)?;
        let pixel_module = module(desc.pixel_shader)?;
        let pass = *ctx.render_passes.get(&render_pass.0).ok_or_else(|| {
            BackendError::InvalidArgument(format!("unknown render pass {:?}", render_pass))
        })?;

        let pipeline = pipeline::create_graphics_pipeline(
            &ctx.device,
            ctx.pipeline_cache,
            ctx.pipeline_layout,
            desc,
            vertex_module,
            pixel_module,
            pass,
            samples,
            ctx.selected.candidate.sample_rate_shading,
        )?;
        let id = ctx.next_handle();
        ctx.pipelines.insert(id, pipeline);
        Ok(PipelineHandle(id))
    }

    fn destroy_pipeline(&mut self, pipeline: PipelineHandle) {
        let Some(ctx) = self.context.as_mut() else {
            return;
        };
        if let Some(pipeline) = ctx.pipelines.remove(&pipeline.0) {
            unsafe { ctx.device.destroy_pipeline(pipeline, None) };
        }
    }

    fn create_descriptor_set(&mut self) -> BackendResult<DescriptorSetHandle> {
        let ctx = self.context_mut()?;
        let set_layouts = [ctx.set_layout];
        let alloc_info = vk::DescriptorSetAllocateInfo::default()
            .descriptor_pool(ctx.descriptor_pool)
            .set_layouts(&set_layouts);
        let sets = unsafe { ctx.device.allocate_descriptor_sets(&alloc_info) }
            .map_err(|e| result_error(e, BackendError::DescriptorFailed))?;
        let set = sets
            .into_iter()
            .next()
            .ok_or_else(|| BackendError::DescriptorFailed("no descriptor set returned".into()))?;

        let id = ctx.next_handle();
        ctx.descriptor_sets.insert(id, set);
        Ok(DescriptorSetHandle(id))
    }

    fn write_descriptor_set(
        &mut self,
        set: DescriptorSetHandle,
        writes: &[DescriptorWrite],
    ) -> BackendResult<()> {
        let ctx = self.context()?;
        let dst_set = *ctx.descriptor_sets.get(&set.0).ok_or_else(|| {
            BackendError::InvalidArgument(format!("unknown descriptor set {:?}", set))
        })?;

        let mut buffer_infos = Vec::new();
        let mut texture_infos = None;
        for write in writes {
            match write {
                DescriptorWrite::Buffer {
                    binding,
                    buffer,
                    offset,
                    size,
                } => {
                    let entry = ctx.buffers.get(&buffer.0).ok_or_else(|| {
                        BackendError::InvalidArgument(format!("unknown buffer {:?}", buffer))
                    })?;
                    buffer_infos.push((
                        *binding,
                        [vk::DescriptorBufferInfo {
                            buffer: entry.buffer,
                            offset: *offset,
                            range: *size,
                        }],
                    ));
                }
                DescriptorWrite::Textures { images, samplers } => {
                    let mut image_infos = [vk::DescriptorImageInfo::default(); MAX_TEXTURE_COUNT];
                    let mut sampler_infos = [vk::DescriptorImageInfo::default(); MAX_TEXTURE_COUNT];
                    for slot in 0..MAX_TEXTURE_COUNT {
                        image_infos[slot] = vk::DescriptorImageInfo {
                            sampler: vk::Sampler::null(),
                            image_view: ctx.image(images[slot])?.view,
                            image_layout: vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
                        };
                        let sampler = ctx.samplers.get(&samplers[slot].0).ok_or_else(|| {
                            BackendError::InvalidArgument(format!(
                                "unknown sampler {:?}",
                                samplers[slot]
                            ))
                        })?;
                        sampler_infos[slot] = vk::DescriptorImageInfo {
                            sampler: *sampler,
                            ..Default::default()
                        };
                    }
                    texture_infos = Some((image_infos, sampler_infos));
                }
            }
        }

        let mut vk_writes: Vec<vk::WriteDescriptorSet> = buffer_infos
            .iter()
            .map(|(binding, info)| {
                vk::WriteDescriptorSet::default()
                    .dst_set(dst_set)
                    .dst_binding(*binding)
                    .descriptor_type(vk::DescriptorType::UNIFORM_BUFFER)
                    .buffer_info(info)
            })
            .collect();
        if let Some((image_infos, sampler_infos)) = texture_infos.as_ref() {
            vk_writes.push(
                vk::WriteDescriptorSet::default()
                    .dst_set(dst_set)
                    .dst_binding(TEXTURE_BINDING)
                    .descriptor_type(vk::DescriptorType::SAMPLED_IMAGE)
                    .image_info(image_infos),
            );
            vk_writes.push(
                vk::WriteDescriptorSet::default()
                    .dst_set(dst_set)
                    .dst_binding(SAMPLER_BINDING)
                    .descriptor_type(vk::DescriptorType::SAMPLER)
                    .image_info(sampler_infos),
            );
        }

        unsafe { ctx.device.update_descriptor_sets(&vk_writes, &[]) };
        Ok(())
    }

    fn destroy_descriptor_set(&mut self, set: DescriptorSetHandle) {
        let Some(ctx) = self.context.as_mut() else {
            return;
        };
        if let Some(set) = ctx.descriptor_sets.remove(&set.0) {
            if let Err(e) = unsafe { ctx.device.free_descriptor_sets(ctx.descriptor_pool, &[set]) } {
                log::warn!("Failed to free descriptor set: {:?}", e);
            }
        }
    }

    fn create_semaphore(&mut self) -> BackendResult<SemaphoreHandle> {
        let ctx = self.context_mut()?;
        let semaphore =
            unsafe { ctx.device.create_semaphore(&vk::SemaphoreCreateInfo::default(), None) }
                .map_err(|e| result_error(e, BackendError::CommandFailed))?;
        let id = ctx.next_handle();
        ctx.semaphores.insert(id, semaphore);
        Ok(SemaphoreHandle(id))
    }

    fn destroy_semaphore(&mut self, semaphore: SemaphoreHandle) {
        let Some(ctx) = self.context.as_mut() else {
            return;
        };
        if let Some(semaphore) = ctx.semaphores.remove(&semaphore.0) {
            unsafe { ctx.device.destroy_semaphore(semaphore, None) };
        }
    }

    fn create_fence(&mut self, signaled: bool) -> BackendResult<FenceHandle> {
        let ctx = self.context_mut()?;
        let flags = if signaled {
            vk::FenceCreateFlags::SIGNALED
        } else {
            vk::FenceCreateFlags::empty()
        };
        let fence = unsafe {
            ctx.device
                .create_fence(&vk::FenceCreateInfo::default().flags(flags), None)
        }
        .map_err(|e| result_error(e, BackendError::CommandFailed))?;
        let id = ctx.next_handle();
        ctx.fences.insert(id, fence);
        Ok(FenceHandle(id))
    }

    fn wait_fence(&mut self, fence: FenceHandle, timeout: Duration) -> BackendResult<()> {
        let ctx = self.context()?;
        let fence = *ctx
            .fences
            .get(&fence.0)
            .ok_or_else(|| BackendError::InvalidArgument(format!("unknown fence {:?}", fence)))?;
        unsafe {
            ctx.device
                .wait_for_fences(&[fence], true, timeout_nanos(timeout))
        }
        .map_err(|e| result_error(e, BackendError::CommandFailed))
    }

    fn reset_fence(&mut self, fence: FenceHandle) -> BackendResult<()> {
        let ctx = self.context()?;
        let fence = *ctx
            .fences
            .get(&fence.0)
            .ok_or_else(|| BackendError::InvalidArgument(format!("unknown fence {:?}", fence)))?;
        unsafe { ctx.device.reset_fences(&[fence]) }
            .map_err(|e| result_error(e, BackendError::CommandFailed))
    }

    fn destroy_fence(&mut self, fence: FenceHandle) {
        let Some(ctx) = self.context.as_mut() else {
            return;
        };
        if let Some(fence) = ctx.fences.remove(&fence.0) {
            unsafe { ctx.device.destroy_fence(fence, None) };
        }
    }

    fn allocate_command_buffer(&mut self) -> BackendResult<CommandBufferHandle> {
        let ctx = self.context_mut()?;
        let alloc_info = vk::CommandBufferAllocateInfo::default()
            .command_pool(ctx.command_pool)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(1);
        let buffers = unsafe { ctx.device.allocate_command_buffers(&alloc_info) }
            .map_err(|e| result_error(e, BackendError::CommandFailed))?;
        let cmd = buffers
            .into_iter()
            .next()
            .ok_or_else(|| BackendError::CommandFailed("no command buffer returned".into()))?;
        let id = ctx.next_handle();
        ctx.command_buffers.insert(id, cmd);
        Ok(CommandBufferHandle(id))
    }

    fn free_command_buffer(&mut self, command_buffer: CommandBufferHandle) {
        let Some(ctx) = self.context.as_mut() else {
            return;
        };
        if let Some(cmd) = ctx.command_buffers.remove(&command_buffer.0) {
            unsafe { ctx.device.free_command_buffers(ctx.command_pool, &[cmd]) };
        }
    }

    fn begin_command_buffer(&mut self, command_buffer: CommandBufferHandle) -> BackendResult<()> {
        let ctx = self.context()?;
        let cmd = ctx.command_buffer(command_buffer).ok_or_else(|| {
            BackendError::InvalidArgument(format!("unknown command buffer {:?}", command_buffer))
        })?;
        unsafe {
            ctx.device
                .reset_command_buffer(cmd, vk::CommandBufferResetFlags::empty())
                .and_then(|_| {
                    ctx.device
                        .begin_command_buffer(cmd, &vk::CommandBufferBeginInfo::default())
                })
        }
        .map_err(|e| result_error(e, BackendError::CommandFailed))
    }

    fn end_command_buffer(&mut self, command_buffer: CommandBufferHandle) -> BackendResult<()> {
        let ctx = self.context()?;
        let cmd = ctx.command_buffer(command_buffer).ok_or_else(|| {
            BackendError::InvalidArgument(format!("unknown command buffer {:?}", command_buffer))
        })?;
        unsafe { ctx.device.end_command_buffer(cmd) }
            .map_err(|e| result_error(e, BackendError::CommandFailed))
    }

    fn submit(&mut self, info: &SubmitInfo<'_>) -> BackendResult<()> {
        let ctx = self.context()?;
        let cmd = ctx.command_buffer(info.command_buffer).ok_or_else(|| {
            BackendError::InvalidArgument(format!(
                "unknown command buffer {:?}",
                info.command_buffer
            ))
        })?;
        let semaphores = |handles: &[SemaphoreHandle]| {
            handles
                .iter()
                .map(|handle| {
                    ctx.semaphores.get(&handle.0).copied().ok_or_else(|| {
                        BackendError::InvalidArgument(format!("unknown semaphore {:?}", handle))
                    })
                })
                .collect::<BackendResult<Vec<_>>>()
        };
        let wait = semaphores(info.wait)?;
        let signal = semaphores(info.signal)?;
        let wait_stages = vec![
            vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT | vk::PipelineStageFlags::TRANSFER;
            wait.len()
        ];
        let fence = match info.fence {
            Some(handle) => *ctx.fences.get(&handle.0).ok_or_else(|| {
                BackendError::InvalidArgument(format!("unknown fence {:?}", handle))
            })?,
            None => vk::Fence::null(),
        };

        let command_buffers = [cmd];
        let submit_info = vk::SubmitInfo::default()
            .wait_semaphores(&wait)
            .wait_dst_stage_mask(&wait_stages)
            .command_buffers(&command_buffers)
            .signal_semaphores(&signal);

        unsafe { ctx.device.queue_submit(ctx.queue, &[submit_info], fence) }
            .map_err(|e| result_error(e, BackendError::CommandFailed))
    }

    fn cmd_begin_render_pass(&mut self, command_buffer: CommandBufferHandle, begin: &RenderPassBegin) {
        let Some(ctx) = self.context.as_ref() else {
            return;
        };
        let Some(cmd) = ctx.command_buffer(command_buffer) else {
            return;
        };
        let (Some(render_pass), Some(framebuffer)) = (
            ctx.render_passes.get(&begin.render_pass.0),
            ctx.framebuffers.get(&begin.framebuffer.0),
        ) else {
            log::warn!("Render pass begin with unknown pass or framebuffer");
            return;
        };

        let color = vk::ClearValue {
            color: vk::ClearColorValue {
                float32: begin.clear_color,
            },
        };
        let clear_values = [
            color,
            vk::ClearValue {
                depth_stencil: vk::ClearDepthStencilValue {
                    depth: begin.clear_depth,
                    stencil: 0,
                },
            },
            color,
        ];
        let begin_info = vk::RenderPassBeginInfo::default()
            .render_pass(*render_pass)
            .framebuffer(*framebuffer)
            .render_area(vk::Rect2D {
                offset: vk::Offset2D { x: 0, y: 0 },
                extent: vk::Extent2D {
                    width: begin.extent.width,
                    height: begin.extent.height,
                },
            })
            .clear_values(&clear_values);

        unsafe {
            ctx.device
                .cmd_begin_render_pass(cmd, &begin_info, vk::SubpassContents::INLINE)
        };
    }

    fn cmd_end_render_pass(&mut self, command_buffer: CommandBufferHandle) {
        let Some(ctx) = self.context.as_ref() else {
            return;
        };
        if let Some(cmd) = ctx.command_buffer(command_buffer) {
            unsafe { ctx.device.cmd_end_render_pass(cmd) };
        }
    }

    fn cmd_set_viewport(&mut self, command_buffer: CommandBufferHandle, viewport: &Viewport) {
        let Some(ctx) = self.context.as_ref() else {
            return;
        };
        let Some(cmd) = ctx.command_buffer(command_buffer) else {
            return;
        };
        // Negative height flips Y so clip space points up like the projection expects.
        let vk_viewport = vk::Viewport {
            x: viewport.x,
            y: viewport.y + viewport.height,
            width: viewport.width,
            height: -viewport.height,
            min_depth: viewport.min_depth,
            max_depth: viewport.max_depth,
        };
        let scissor = vk::Rect2D {
            offset: vk::Offset2D {
                x: viewport.x as i32,
                y: viewport.y as i32,
            },
            extent: vk::Extent2D {
                width: viewport.width as u32,
                height: viewport.height as u32,
            },
        };
        unsafe {
            ctx.device.cmd_set_viewport(cmd, 0, &[vk_viewport]);
            ctx.device.cmd_set_scissor(cmd, 0, &[scissor]);
        }
    }

    fn cmd_bind_pipeline(&mut self, command_buffer: CommandBufferHandle, pipeline: PipelineHandle) {
        let Some(ctx) = self.context.as_ref() else {
            return;
        };
        let Some(cmd) = ctx.command_buffer(command_buffer) else {
            return;
        };
        match ctx.pipelines.get(&pipeline.0) {
            Some(pipeline) => unsafe {
                ctx.device
                    .cmd_bind_pipeline(cmd, vk::PipelineBindPoint::GRAPHICS, *pipeline)
            },
            None => log::warn!("Binding unknown pipeline {:?}", pipeline),
        }
    }

    fn cmd_bind_descriptor_set(
        &mut self,
        command_buffer: CommandBufferHandle,
        set: DescriptorSetHandle,
    ) {
        let Some(ctx) = self.context.as_ref() else {
            return;
        };
        let Some(cmd) = ctx.command_buffer(command_buffer) else {
            return;
        };
        match ctx.descriptor_sets.get(&set.0) {
            Some(set) => unsafe {
                ctx.device.cmd_bind_descriptor_sets(
                    cmd,
                    vk::PipelineBindPoint::GRAPHICS,
                    ctx.pipeline_layout,
                    0,
                    &[*set],
                    &[],
                )
            },
            None => log::warn!("Binding unknown descriptor set {:?}", set),
        }
    }

    fn cmd_bind_vertex_buffer(
        &mut self,
        command_buffer: CommandBufferHandle,
        buffer: BufferHandle,
        offset: u64,
    ) {
        let Some(ctx) = self.context.as_ref() else {
            return;
        };
        let Some(cmd) = ctx.command_buffer(command_buffer) else {
            return;
        };
        match ctx.buffers.get(&buffer.0) {
            Some(entry) => unsafe {
                ctx.device
                    .cmd_bind_vertex_buffers(cmd, 0, &[entry.buffer], &[offset])
            },
            None => log::warn!("Binding unknown vertex buffer {:?}", buffer),
        }
    }

    fn cmd_bind_index_buffer(
        &mut self,
        command_buffer: CommandBufferHandle,
        buffer: BufferHandle,
        offset: u64,
        format: IndexFormat,
    ) {
        let Some(ctx) = self.context.as_ref() else {
            return;
        };
        let Some(cmd) = ctx.command_buffer(command_buffer) else {
            return;
        };
        let index_type = match format {
            IndexFormat::Uint16 => vk::IndexType::UINT16,
            IndexFormat::Uint32 => vk::IndexType::UINT32,
        };
        match ctx.buffers.get(&buffer.0) {
            Some(entry) => unsafe {
                ctx.device
                    .cmd_bind_index_buffer(cmd, entry.buffer, offset, index_type)
            },
            None => log::warn!("Binding unknown index buffer {:?}", buffer),
        }
    }

    fn cmd_draw(&mut self, command_buffer: CommandBufferHandle, vertex_count: u32, first_vertex: u32) {
        let Some(ctx) = self.context.as_ref() else {
            return;
        };
        if let Some(cmd) = ctx.command_buffer(command_buffer) {
            unsafe { ctx.device.cmd_draw(cmd, vertex_count, 1, first_vertex, 0) };
        }
    }

    fn cmd_draw_indexed(
        &mut self,
        command_buffer: CommandBufferHandle,
        index_count: u32,
        first_index: u32,
        vertex_offset: i32,
    ) {
        let Some(ctx) = self.context.as_ref() else {
            return;
        };
        if let Some(cmd) = ctx.command_buffer(command_buffer) {
            unsafe {
                ctx.device
                    .cmd_draw_indexed(cmd, index_count, 1, first_index, vertex_offset, 0)
            };
        }
    }

    fn cmd_transition_image(
        &mut self,
        command_buffer: CommandBufferHandle,
        image: ImageHandle,
        old_layout: ImageLayout,
        new_layout: ImageLayout,
    ) {
        let Some(ctx) = self.context.as_ref() else {
            return;
        };
        let Some(cmd) = ctx.command_buffer(command_buffer) else {
            return;
        };
        let Ok(entry) = ctx.image(image) else {
            log::warn!("Transitioning unknown image {:?}", image);
            return;
        };
        command::transition_image_layout(
            &ctx.device,
            cmd,
            entry.image,
            aspect_mask(entry.format),
            0,
            entry.mip_levels,
            convert_image_layout(old_layout),
            convert_image_layout(new_layout),
        );
    }

    fn cmd_clear_image(&mut self, command_buffer: CommandBufferHandle, image: ImageHandle, color: [f32; 4]) {
        let Some(ctx) = self.context.as_ref() else {
            return;
        };
        let Some(cmd) = ctx.command_buffer(command_buffer) else {
            return;
        };
        let Ok(entry) = ctx.image(image) else {
            log::warn!("Clearing unknown image {:?}", image);
            return;
        };
        unsafe {
            ctx.device.cmd_clear_color_image(
                cmd,
                entry.image,
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                &vk::ClearColorValue { float32: color },
                &[swapchain::color_subresource_range(entry.mip_levels)],
            )
        };
    }

    fn cmd_blit_image(
        &mut self,
        command_buffer: CommandBufferHandle,
        src: ImageHandle,
        src_extent: Extent,
        dst: ImageHandle,
        dst_rect: Rect,
    ) {
        let Some(ctx) = self.context.as_ref() else {
            return;
        };
        let Some(cmd) = ctx.command_buffer(command_buffer) else {
            return;
        };
        let (Ok(src_image), Ok(dst_image)) = (ctx.image(src), ctx.image(dst)) else {
            log::warn!("Blitting between unknown images {:?} -> {:?}", src, dst);
            return;
        };

        let blit = vk::ImageBlit::default()
            .src_subresource(command::subresource_layers(0))
            .src_offsets([
                vk::Offset3D::default(),
                vk::Offset3D {
                    x: src_extent.width as i32,
                    y: src_extent.height as i32,
                    z: 1,
                },
            ])
            .dst_subresource(command::subresource_layers(0))
            .dst_offsets([
                vk::Offset3D {
                    x: dst_rect.x,
                    y: dst_rect.y,
                    z: 0,
                },
                vk::Offset3D {
                    x: dst_rect.x + dst_rect.width as i32,
                    y: dst_rect.y + dst_rect.height as i32,
                    z: 1,
                },
            ]);
        unsafe {
            ctx.device.cmd_blit_image(
                cmd,
                src_image.image,
                vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
                dst_image.image,
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                &[blit],
                vk::Filter::LINEAR,
            )
        };
    }

    fn create_swapchain(
        &mut self,
        desc: &SwapchainDescriptor,
        previous: Option<SwapchainHandle>,
    ) -> BackendResult<SwapchainInfo> {
        let Some(surface) = self.surface.as_ref() else {
            return Err(BackendError::Unsupported(
                "backend was created without a window".into(),
            ));
        };
        let ctx = self.context.as_mut().ok_or(BackendError::DeviceLost)?;
        let old_swapchain = previous
            .and_then(|handle| ctx.swapchains.get(&handle.0))
            .map_or(vk::SwapchainKHR::null(), |s| s.swapchain);

        let native = swapchain::create_swapchain(
            &ctx.device,
            &surface.loader,
            &ctx.swapchain_fn,
            ctx.selected.physical_device,
            surface.surface,
            desc.extent,
            desc.vsync,
            old_swapchain,
        )?;

        let format = texture_format_from_vk(native.format).unwrap_or(TextureFormat::Bgra8Unorm);
        let extent = Extent::new(native.extent.width, native.extent.height);
        let mut images = Vec::with_capacity(native.images.len());
        for (image, view) in native.images.into_iter().zip(native.views) {
            let id = ctx.next_handle();
            ctx.images.insert(
                id,
                VulkanImage {
                    image,
                    view,
                    allocation: None,
                    format,
                    width: extent.width,
                    height: extent.height,
                    mip_levels: 1,
                },
            );
            images.push(id);
        }

        let id = ctx.next_handle();
        ctx.swapchains.insert(
            id,
            VulkanSwapchain {
                swapchain: native.swapchain,
                images: images.clone(),
            },
        );

        Ok(SwapchainInfo {
            handle: SwapchainHandle(id),
            images: images.into_iter().map(ImageHandle).collect(),
            format,
            extent,
        })
    }

    fn destroy_swapchain(&mut self, swapchain: SwapchainHandle) {
        let Some(ctx) = self.context.as_mut() else {
            return;
        };
        if let Some(entry) = ctx.swapchains.remove(&swapchain.0) {
            ctx.destroy_swapchain_entry(entry);
        }
    }

    fn acquire_next_image(
        &mut self,
        swapchain: SwapchainHandle,
        signal: SemaphoreHandle,
        timeout: Duration,
    ) -> BackendResult<AcquireResult> {
        let ctx = self.context()?;
        let entry = ctx.swapchains.get(&swapchain.0).ok_or_else(|| {
            BackendError::InvalidArgument(format!("unknown swapchain {:?}", swapchain))
        })?;
        let semaphore = *ctx.semaphores.get(&signal.0).ok_or_else(|| {
            BackendError::InvalidArgument(format!("unknown semaphore {:?}", signal))
        })?;

        let acquired = unsafe {
            ctx.swapchain_fn.acquire_next_image(
                entry.swapchain,
                timeout_nanos(timeout),
                semaphore,
                vk::Fence::null(),
            )
        };
        match acquired {
            // A suboptimal image is still usable; present reports it as out of date.
            Ok((index, _suboptimal)) => Ok(AcquireResult::Image(index)),
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(AcquireResult::OutOfDate),
            Err(vk::Result::NOT_READY) => Err(BackendError::Timeout),
            Err(e) => Err(result_error(e, BackendError::SwapchainCreationFailed)),
        }
    }

    fn present(
        &mut self,
        swapchain: SwapchainHandle,
        image_index: u32,
        wait: &[SemaphoreHandle],
    ) -> BackendResult<PresentResult> {
        let ctx = self.context()?;
        let entry = ctx.swapchains.get(&swapchain.0).ok_or_else(|| {
            BackendError::InvalidArgument(format!("unknown swapchain {:?}", swapchain))
        })?;
        let wait = wait
            .iter()
            .map(|handle| {
                ctx.semaphores.get(&handle.0).copied().ok_or_else(|| {
                    BackendError::InvalidArgument(format!("unknown semaphore {:?}", handle))
                })
            })
            .collect::<BackendResult<Vec<_>>>()?;

        let swapchains = [entry.swapchain];
        let image_indices = [image_index];
        let present_info = vk::PresentInfoKHR::default()
            .wait_semaphores(&wait)
            .swapchains(&swapchains)
            .image_indices(&image_indices);

        match unsafe { ctx.swapchain_fn.queue_present(ctx.queue, &present_info) } {
            Ok(false) => Ok(PresentResult::Presented),
            Ok(true) | Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(PresentResult::OutOfDate),
            Err(e) => Err(result_error(e, BackendError::CommandFailed)),
        }
    }
}
