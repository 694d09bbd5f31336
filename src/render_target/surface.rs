//! Offscreen 3D surface
//!
//! A [`Surface3D`] renders one [`GraphicsContent3D`] into its own multisample color and depth
//! images and resolves into a single-sample image per frame slot. The render target then
//! blits the latest resolve image into the swapchain image.

use crate::backend::*;
use crate::renderer::{GraphicsContent3D, GraphicsContext3D};

/// Color format of surface render targets
pub const SURFACE_COLOR_FORMAT: TextureFormat = TextureFormat::Rgba8Unorm;

/// Depth formats in order of preference
pub const DEPTH_FORMAT_PREFERENCE: [TextureFormat; 3] = [
    TextureFormat::Depth32Float,
    TextureFormat::Depth32FloatStencil8,
    TextureFormat::Depth24UnormStencil8,
];

/// First preferred depth format the device supports
pub fn choose_depth_format(capabilities: &DeviceCapabilities) -> Option<TextureFormat> {
    DEPTH_FORMAT_PREFERENCE
        .into_iter()
        .find(|format| capabilities.depth_formats.contains(format))
}

/// Largest sample count not above `requested` that color and depth attachments both support
pub fn choose_sample_count(capabilities: &DeviceCapabilities, requested: u32) -> u32 {
    capabilities
        .color_sample_counts
        .intersection(capabilities.depth_sample_counts)
        .clamp(requested)
}

/// Images and commands of one frame slot
#[derive(Debug, Clone, Copy)]
struct SurfaceFrame {
    resolve_image: ImageHandle,
    framebuffer: FramebufferHandle,
    command_buffer: CommandBufferHandle,
    finished: SemaphoreHandle,
}

/// Render pass plus the images sized to the surface
#[derive(Debug, Default)]
struct SurfaceImages {
    extent: Extent,
    color_image: Option<ImageHandle>,
    depth_image: Option<ImageHandle>,
    frames: Vec<SurfaceFrame>,
}

impl SurfaceImages {
    fn destroy(&mut self, backend: &mut dyn GraphicsBackend) {
        for frame in self.frames.drain(..) {
            backend.destroy_framebuffer(frame.framebuffer);
            backend.destroy_image(frame.resolve_image);
            backend.free_command_buffer(frame.command_buffer);
            backend.destroy_semaphore(frame.finished);
        }
        if let Some(image) = self.color_image.take() {
            backend.destroy_image(image);
        }
        if let Some(image) = self.depth_image.take() {
            backend.destroy_image(image);
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct SurfacePass {
    handle: RenderPassHandle,
    desc: RenderPassDescriptor,
}

/// 3D content placed in a rectangle of the render target.
pub struct Surface3D {
    content: Box<dyn GraphicsContent3D>,
    bounds: Rect,
    scale_factor: f32,
    pass: Option<SurfacePass>,
    images: Option<SurfaceImages>,
    current: usize,
    last_rendered: Option<usize>,
    dirty: bool,
}

impl Surface3D {
    /// Surface covering `bounds`, given in logical pixels.
    pub fn new(content: Box<dyn GraphicsContent3D>, bounds: Rect) -> Self {
        Self {
            content,
            bounds,
            scale_factor: 1.0,
            pass: None,
            images: None,
            current: 0,
            last_rendered: None,
            dirty: true,
        }
    }

    pub fn content(&self) -> &dyn GraphicsContent3D {
        self.content.as_ref()
    }

    pub fn content_mut(&mut self) -> &mut dyn GraphicsContent3D {
        self.content.as_mut()
    }

    pub fn bounds(&self) -> Rect {
        self.bounds
    }

    pub fn set_bounds(&mut self, bounds: Rect) {
        if self.bounds != bounds {
            self.bounds = bounds;
            self.dirty = true;
        }
    }

    pub fn set_scale_factor(&mut self, scale_factor: f32) {
        if self.scale_factor != scale_factor && scale_factor > 0.0 {
            self.scale_factor = scale_factor;
            self.dirty = true;
        }
    }

    /// Bounds in physical pixels of the render target
    pub fn pixel_rect(&self) -> Rect {
        let scale = |value: f32| (value * self.scale_factor).round();
        Rect::new(
            scale(self.bounds.x as f32) as i32,
            scale(self.bounds.y as f32) as i32,
            scale(self.bounds.width as f32) as u32,
            scale(self.bounds.height as f32) as u32,
        )
    }

    pub fn mark_dirty(&mut self) {
        self.dirty = true;
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty || self.content.is_dirty()
    }

    /// Sample count of the current render pass
    pub fn samples(&self) -> Option<u32> {
        self.pass.map(|pass| pass.desc.samples)
    }

    pub fn render_pass(&self) -> Option<RenderPassHandle> {
        self.pass.map(|pass| pass.handle)
    }

    /// Resolve image of the last rendered frame, in shader-read layout
    pub fn resolve_image(&self) -> Option<(ImageHandle, Extent)> {
        let images = self.images.as_ref()?;
        let frame = images.frames.get(self.last_rendered?)?;
        Some((frame.resolve_image, images.extent))
    }

    fn ensure_pass(&mut self, backend: &mut dyn GraphicsBackend) -> BackendResult<SurfacePass> {
        let capabilities = backend.capabilities();
        let depth_format = choose_depth_format(capabilities);
        let samples = choose_sample_count(capabilities, self.content.multisampling());
        let desc = RenderPassDescriptor {
            color_format: SURFACE_COLOR_FORMAT,
            depth_format,
            samples,
            resolve: samples > 1,
        };
        if let Some(pass) = self.pass {
            if pass.desc == desc {
                return Ok(pass);
            }
            log::debug!("Surface sample count changed to {}", samples);
            self.release_images(backend);
            backend.destroy_render_pass(pass.handle);
            self.pass = None;
        }
        let handle = backend.create_render_pass(&desc)?;
        let pass = SurfacePass { handle, desc };
        self.pass = Some(pass);
        Ok(pass)
    }

    fn ensure_images(
        &mut self,
        backend: &mut dyn GraphicsBackend,
        pass: SurfacePass,
        extent: Extent,
        frame_count: usize,
    ) -> BackendResult<()> {
        if let Some(images) = &self.images {
            if images.extent == extent && images.frames.len() == frame_count {
                return Ok(());
            }
        }
        self.release_images(backend);

        let mut images = SurfaceImages {
            extent,
            ..Default::default()
        };
        if let Err(e) = create_images(backend, pass, &mut images, frame_count) {
            images.destroy(backend);
            return Err(e);
        }
        log::debug!(
            "Created surface images {}x{} ({} samples, {} frames)",
            extent.width,
            extent.height,
            pass.desc.samples,
            frame_count
        );
        self.images = Some(images);
        self.current = 0;
        self.dirty = true;
        Ok(())
    }

    /// Render the content if it changed since the last frame.
    ///
    /// Returns the semaphore the submission signals, or `None` when the previous resolve
    /// image is still current.
    pub fn render(
        &mut self,
        backend: &mut dyn GraphicsBackend,
        frame_count: usize,
    ) -> BackendResult<Option<SemaphoreHandle>> {
        let extent = self.pixel_rect().extent();
        if extent.is_empty() || frame_count == 0 {
            return Ok(None);
        }
        let pass = self.ensure_pass(backend)?;
        self.ensure_images(backend, pass, extent, frame_count)?;
        if !self.is_dirty() && self.last_rendered.is_some() {
            return Ok(None);
        }

        self.content.prepare_content(backend, extent)?;

        let Some(images) = self.images.as_ref() else {
            return Ok(None);
        };
        let index = (self.current + 1) % images.frames.len();
        let frame = images.frames[index];
        let command_buffer = frame.command_buffer;

        backend.begin_command_buffer(command_buffer)?;
        backend.cmd_begin_render_pass(
            command_buffer,
            &RenderPassBegin {
                render_pass: pass.handle,
                framebuffer: frame.framebuffer,
                extent,
                clear_color: self.content.clear_color(),
                clear_depth: 1.0,
            },
        );
        backend.cmd_set_viewport(command_buffer, &Viewport::from_extent(extent));
        let recorded = {
            let mut context =
                GraphicsContext3D::new(backend, command_buffer, pass.handle, pass.desc.samples, extent);
            let recorded = self.content.render_content(&mut context);
            log::trace!("Surface recorded {} draws", context.draw_count());
            recorded
        };
        backend.cmd_end_render_pass(command_buffer);
        recorded?;
        backend.cmd_transition_image(
            command_buffer,
            frame.resolve_image,
            ImageLayout::ColorAttachment,
            ImageLayout::ShaderReadOnly,
        );
        backend.end_command_buffer(command_buffer)?;
        backend.submit(&SubmitInfo {
            command_buffer,
            wait: &[],
            signal: &[frame.finished],
            fence: None,
        })?;

        self.current = index;
        self.last_rendered = Some(index);
        self.dirty = false;
        Ok(Some(frame.finished))
    }

    /// Destroy the size dependent images; the render pass survives.
    pub fn release_images(&mut self, backend: &mut dyn GraphicsBackend) {
        if let Some(mut images) = self.images.take() {
            images.destroy(backend);
        }
        self.last_rendered = None;
        self.dirty = true;
    }

    /// Destroy every native object of the surface and its content.
    pub fn release(&mut self, backend: &mut dyn GraphicsBackend) {
        self.release_images(backend);
        if let Some(pass) = self.pass.take() {
            backend.destroy_render_pass(pass.handle);
        }
        self.content.release_resources(backend);
    }
}

fn create_images(
    backend: &mut dyn GraphicsBackend,
    pass: SurfacePass,
    images: &mut SurfaceImages,
    frame_count: usize,
) -> BackendResult<()> {
    let extent = images.extent;
    let samples = pass.desc.samples;
    let multisampled = pass.desc.resolve;
    let image = |format, samples, usage| ImageDescriptor {
        width: extent.width,
        height: extent.height,
        format,
        mip_levels: 1,
        samples,
        usage,
    };

    if multisampled {
        images.color_image = Some(backend.create_image(&image(
            SURFACE_COLOR_FORMAT,
            samples,
            ImageUsage::COLOR_ATTACHMENT,
        ))?);
    }
    if let Some(depth_format) = pass.desc.depth_format {
        images.depth_image = Some(backend.create_image(&image(
            depth_format,
            samples,
            ImageUsage::DEPTH_ATTACHMENT,
        ))?);
    }

    for _ in 0..frame_count {
        let resolve_image = backend.create_image(&image(
            SURFACE_COLOR_FORMAT,
            1,
            ImageUsage::COLOR_ATTACHMENT | ImageUsage::SAMPLED | ImageUsage::TRANSFER_SRC,
        ))?;
        let mut attachments = Vec::with_capacity(3);
        attachments.push(images.color_image.unwrap_or(resolve_image));
        attachments.extend(images.depth_image);
        if multisampled {
            attachments.push(resolve_image);
        }
        let framebuffer = match backend.create_framebuffer(pass.handle, &attachments, extent) {
            Ok(framebuffer) => framebuffer,
            Err(e) => {
                backend.destroy_image(resolve_image);
                return Err(e);
            }
        };
        let command_buffer = match backend.allocate_command_buffer() {
            Ok(command_buffer) => command_buffer,
            Err(e) => {
                backend.destroy_framebuffer(framebuffer);
                backend.destroy_image(resolve_image);
                return Err(e);
            }
        };
        let finished = match backend.create_semaphore() {
            Ok(semaphore) => semaphore,
            Err(e) => {
                backend.free_command_buffer(command_buffer);
                backend.destroy_framebuffer(framebuffer);
                backend.destroy_image(resolve_image);
                return Err(e);
            }
        };
        images.frames.push(SurfaceFrame {
            resolve_image,
            framebuffer,
            command_buffer,
            finished,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::dummy::{DummyBackend, ResourceKind};

    /// Content counting how often it was prepared
    struct Counter {
        prepared: u32,
        dirty: bool,
        samples: u32,
    }

    impl GraphicsContent3D for Counter {
        fn prepare_content(&mut self, _backend: &mut dyn GraphicsBackend, _extent: Extent) -> BackendResult<()> {
            self.prepared += 1;
            self.dirty = false;
            Ok(())
        }

        fn render_content(&mut self, _context: &mut GraphicsContext3D<'_>) -> BackendResult<()> {
            Ok(())
        }

        fn release_resources(&mut self, _backend: &mut dyn GraphicsBackend) {}

        fn is_dirty(&self) -> bool {
            self.dirty
        }

        fn multisampling(&self) -> u32 {
            self.samples
        }
    }

    fn surface(samples: u32) -> Surface3D {
        Surface3D::new(
            Box::new(Counter {
                prepared: 0,
                dirty: true,
                samples,
            }),
            Rect::new(0, 0, 320, 240),
        )
    }

    #[test]
    fn depth_format_preference() {
        let mut capabilities = DeviceCapabilities::default();
        capabilities.depth_formats = vec![TextureFormat::Depth24UnormStencil8, TextureFormat::Depth32FloatStencil8];
        assert_eq!(
            choose_depth_format(&capabilities),
            Some(TextureFormat::Depth32FloatStencil8)
        );
        capabilities.depth_formats.clear();
        assert_eq!(choose_depth_format(&capabilities), None);
    }

    #[test]
    fn sample_count_respects_both_masks() {
        let mut capabilities = DeviceCapabilities::default();
        capabilities.color_sample_counts = SampleCountMask::X1 | SampleCountMask::X4 | SampleCountMask::X8;
        capabilities.depth_sample_counts = SampleCountMask::X1 | SampleCountMask::X2 | SampleCountMask::X4;
        assert_eq!(choose_sample_count(&capabilities, 8), 4);
        assert_eq!(choose_sample_count(&capabilities, 2), 1);
    }

    #[test]
    fn clean_surface_is_not_rerendered() {
        let mut backend = DummyBackend::new();
        let mut surface = surface(4);
        let first = surface.render(&mut backend, 2).unwrap();
        assert!(first.is_some());
        assert_eq!(surface.samples(), Some(4));
        let (image, extent) = surface.resolve_image().unwrap();
        assert_eq!(extent, Extent::new(320, 240));

        assert_eq!(surface.render(&mut backend, 2).unwrap(), None);
        assert_eq!(surface.resolve_image().unwrap().0, image);
        assert_eq!(backend.submissions(), 1);

        surface.mark_dirty();
        let second = surface.render(&mut backend, 2).unwrap();
        assert!(second.is_some());
        assert_ne!(second, first);
        assert_ne!(surface.resolve_image().unwrap().0, image);
    }

    #[test]
    fn resize_recreates_images_but_keeps_pass() {
        let mut backend = DummyBackend::new();
        let mut surface = surface(1);
        surface.render(&mut backend, 2).unwrap();
        let pass = surface.render_pass();
        // single sample: depth plus one resolve target per frame
        assert_eq!(backend.live_count(ResourceKind::Image), 3);

        surface.set_bounds(Rect::new(0, 0, 64, 64));
        surface.render(&mut backend, 2).unwrap();
        assert_eq!(surface.render_pass(), pass);
        assert_eq!(backend.live_count(ResourceKind::Image), 3);
        assert_eq!(backend.live_count(ResourceKind::Framebuffer), 2);

        surface.release(&mut backend);
        for kind in [
            ResourceKind::Image,
            ResourceKind::Framebuffer,
            ResourceKind::RenderPass,
            ResourceKind::CommandBuffer,
            ResourceKind::Semaphore,
        ] {
            assert_eq!(backend.live_count(kind), 0, "{:?}", kind);
        }
    }

    #[test]
    fn pixel_rect_scales_bounds() {
        let mut surface = surface(1);
        surface.set_scale_factor(2.0);
        assert_eq!(surface.pixel_rect(), Rect::new(0, 0, 640, 480));
    }
}
