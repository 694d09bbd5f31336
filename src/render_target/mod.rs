//! Presentation to a window swapchain
//!
//! The [`RenderTarget`] owns the swapchain and its synchronization objects, renders every
//! registered [`Surface3D`] and composites their resolve images into the acquired swap image.
//! Swapchain loss is handled by tearing down to the requested [`ReinitLevel`] and recreating
//! lazily on the next frame.

pub mod surface;

pub use surface::*;

use std::time::Duration;

use crate::backend::*;
use crate::config::RendererConfig;

/// How much has to be torn down before the next frame
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ReinitLevel {
    /// Size dependent surface images
    Surfaces,
    /// Surfaces plus swapchain, semaphores and fences
    Swapchain,
    /// Everything, including the logical device
    Device,
}

/// Outcome of [`RenderTarget::render_frame`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameStatus {
    Presented,
    /// Nothing was presented; the target reinitializes on the next frame
    Skipped,
}

/// Index of a surface inside a [`RenderTarget`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SurfaceId(usize);

/// Synchronization objects of one in-flight frame
#[derive(Debug, Clone, Copy)]
struct FrameSlot {
    image_available: SemaphoreHandle,
    in_flight: FenceHandle,
    composite_commands: CommandBufferHandle,
    present_commands: CommandBufferHandle,
}

/// Semaphores signaled once a swap image is finished
#[derive(Debug, Clone, Copy)]
struct ImageSemaphores {
    /// Signaled after 3D surfaces are blitted
    scene_finished: SemaphoreHandle,
    /// Signaled after the image is ready to present
    composite_finished: SemaphoreHandle,
}

struct SwapchainState {
    info: SwapchainInfo,
    slots: Vec<FrameSlot>,
    images: Vec<ImageSemaphores>,
}

impl SwapchainState {
    fn new(info: SwapchainInfo) -> Self {
        Self {
            info,
            slots: Vec::new(),
            images: Vec::new(),
        }
    }

    fn create_sync_objects(&mut self, backend: &mut dyn GraphicsBackend) -> BackendResult<()> {
        let image_count = self.info.images.len();
        for _ in 0..image_count {
            let scene_finished = backend.create_semaphore()?;
            let composite_finished = match backend.create_semaphore() {
                Ok(semaphore) => semaphore,
                Err(e) => {
                    backend.destroy_semaphore(scene_finished);
                    return Err(e);
                }
            };
            self.images.push(ImageSemaphores {
                scene_finished,
                composite_finished,
            });
        }
        for _ in 0..image_count * 2 {
            let slot = create_slot(backend)?;
            self.slots.push(slot);
        }
        Ok(())
    }

    /// Destroy the sync objects and return the swapchain handle for retirement.
    fn destroy(mut self, backend: &mut dyn GraphicsBackend) -> SwapchainHandle {
        for slot in self.slots.drain(..) {
            backend.destroy_semaphore(slot.image_available);
            backend.destroy_fence(slot.in_flight);
            backend.free_command_buffer(slot.composite_commands);
            backend.free_command_buffer(slot.present_commands);
        }
        for image in self.images.drain(..) {
            backend.destroy_semaphore(image.scene_finished);
            backend.destroy_semaphore(image.composite_finished);
        }
        self.info.handle
    }
}

fn create_slot(backend: &mut dyn GraphicsBackend) -> BackendResult<FrameSlot> {
    let image_available = backend.create_semaphore()?;
    let in_flight = match backend.create_fence(true) {
        Ok(fence) => fence,
        Err(e) => {
            backend.destroy_semaphore(image_available);
            return Err(e);
        }
    };
    let composite_commands = match backend.allocate_command_buffer() {
        Ok(command_buffer) => command_buffer,
        Err(e) => {
            backend.destroy_fence(in_flight);
            backend.destroy_semaphore(image_available);
            return Err(e);
        }
    };
    let present_commands = match backend.allocate_command_buffer() {
        Ok(command_buffer) => command_buffer,
        Err(e) => {
            backend.free_command_buffer(composite_commands);
            backend.destroy_fence(in_flight);
            backend.destroy_semaphore(image_available);
            return Err(e);
        }
    };
    Ok(FrameSlot {
        image_available,
        in_flight,
        composite_commands,
        present_commands,
    })
}

/// Window swapchain plus the 3D surfaces composited into it.
pub struct RenderTarget {
    extent: Extent,
    vsync: bool,
    clear_color: [f32; 4],
    fence_timeout: Duration,
    idle_timeout: Duration,
    scale_factor: f32,
    swapchain: Option<SwapchainState>,
    retired: Option<SwapchainHandle>,
    surfaces: Vec<Option<Surface3D>>,
    pending: Option<ReinitLevel>,
    current_frame: usize,
    presented_frames: u64,
}

impl RenderTarget {
    /// Target for a window of `extent` physical pixels; nothing is created until the first frame.
    pub fn new(config: &RendererConfig, extent: Extent) -> Self {
        Self {
            extent,
            vsync: config.vsync,
            clear_color: config.clear_color,
            fence_timeout: config.fence_timeout(),
            idle_timeout: config.idle_timeout(),
            scale_factor: 1.0,
            swapchain: None,
            retired: None,
            surfaces: Vec::new(),
            pending: None,
            current_frame: 0,
            presented_frames: 0,
        }
    }

    pub fn extent(&self) -> Extent {
        self.extent
    }

    /// Extent of the live swapchain, which may be clamped to the surface limits
    pub fn swapchain_extent(&self) -> Option<Extent> {
        self.swapchain.as_ref().map(|state| state.info.extent)
    }

    pub fn swapchain_image_count(&self) -> usize {
        self.swapchain
            .as_ref()
            .map(|state| state.info.images.len())
            .unwrap_or(0)
    }

    /// Frames the CPU may prepare ahead of the GPU
    pub fn max_frames_in_flight(&self) -> usize {
        self.swapchain
            .as_ref()
            .map(|state| state.slots.len())
            .unwrap_or(0)
    }

    pub fn current_frame(&self) -> usize {
        self.current_frame
    }

    pub fn presented_frames(&self) -> u64 {
        self.presented_frames
    }

    pub fn pending_reinit(&self) -> Option<ReinitLevel> {
        self.pending
    }

    pub fn resize(&mut self, extent: Extent) {
        if self.extent != extent {
            log::debug!("Render target resized to {}x{}", extent.width, extent.height);
            self.extent = extent;
            self.request_reinit(ReinitLevel::Swapchain);
        }
    }

    pub fn set_scale_factor(&mut self, scale_factor: f32) {
        self.scale_factor = scale_factor;
        for surface in self.surfaces.iter_mut().flatten() {
            surface.set_scale_factor(scale_factor);
        }
    }

    /// Schedule teardown down to `level`; the strongest request wins.
    pub fn request_reinit(&mut self, level: ReinitLevel) {
        self.pending = Some(self.pending.map_or(level, |pending| pending.max(level)));
    }

    pub fn add_surface(&mut self, mut surface: Surface3D) -> SurfaceId {
        surface.set_scale_factor(self.scale_factor);
        self.surfaces.push(Some(surface));
        SurfaceId(self.surfaces.len() - 1)
    }

    pub fn surface(&self, id: SurfaceId) -> Option<&Surface3D> {
        self.surfaces.get(id.0).and_then(Option::as_ref)
    }

    pub fn surface_mut(&mut self, id: SurfaceId) -> Option<&mut Surface3D> {
        self.surfaces.get_mut(id.0).and_then(Option::as_mut)
    }

    /// Remove a surface, releasing its images and content after the device goes idle.
    pub fn remove_surface(&mut self, backend: &mut dyn GraphicsBackend, id: SurfaceId) -> Option<Surface3D> {
        let mut surface = self.surfaces.get_mut(id.0)?.take()?;
        self.wait_idle(backend);
        surface.release(backend);
        Some(surface)
    }

    fn wait_idle(&self, backend: &mut dyn GraphicsBackend) {
        if let Err(e) = backend.wait_idle(self.idle_timeout) {
            log::warn!("Device did not go idle: {}", e);
        }
    }

    fn destroy_swapchain(&mut self, backend: &mut dyn GraphicsBackend) {
        if let Some(state) = self.swapchain.take() {
            let handle = state.destroy(backend);
            if let Some(stale) = self.retired.replace(handle) {
                backend.destroy_swapchain(stale);
            }
        }
        self.current_frame = 0;
    }

    /// Carry out a pending reinitialization.
    fn apply_pending(&mut self, backend: &mut dyn GraphicsBackend) -> BackendResult<()> {
        let Some(level) = self.pending.take() else {
            return Ok(());
        };
        log::info!("Reinitializing render target ({:?})", level);
        self.wait_idle(backend);
        match level {
            ReinitLevel::Surfaces => {
                for surface in self.surfaces.iter_mut().flatten() {
                    surface.release_images(backend);
                }
            }
            ReinitLevel::Swapchain => {
                for surface in self.surfaces.iter_mut().flatten() {
                    surface.release_images(backend);
                }
                self.destroy_swapchain(backend);
            }
            ReinitLevel::Device => {
                self.release(backend);
                backend.recreate_device()?;
            }
        }
        Ok(())
    }

    fn create_swapchain(&mut self, backend: &mut dyn GraphicsBackend) -> BackendResult<()> {
        let previous = self.retired.take();
        let created = backend.create_swapchain(
            &SwapchainDescriptor {
                extent: self.extent,
                vsync: self.vsync,
            },
            previous,
        );
        if let Some(previous) = previous {
            backend.destroy_swapchain(previous);
        }
        let info = created?;
        log::info!(
            "Created swapchain {}x{} with {} images ({:?})",
            info.extent.width,
            info.extent.height,
            info.images.len(),
            info.format
        );

        let mut state = SwapchainState::new(info);
        if let Err(e) = state.create_sync_objects(backend) {
            let handle = state.destroy(backend);
            backend.destroy_swapchain(handle);
            return Err(e);
        }
        self.swapchain = Some(state);
        self.current_frame = 0;
        Ok(())
    }

    /// Render the surfaces and present one frame.
    ///
    /// Out-of-date swapchains are recreated on the next call and reported as
    /// [`FrameStatus::Skipped`].
    pub fn render_frame(&mut self, backend: &mut dyn GraphicsBackend) -> BackendResult<FrameStatus> {
        self.apply_pending(backend)?;
        if self.extent.is_empty() {
            return Ok(FrameStatus::Skipped);
        }
        if self.swapchain.is_none() {
            self.create_swapchain(backend)?;
        }
        let Some(state) = self.swapchain.as_ref() else {
            return Ok(FrameStatus::Skipped);
        };
        let slot = state.slots[self.current_frame % state.slots.len()];
        let swapchain = state.info.handle;
        let frame_count = state.slots.len();

        backend.wait_fence(slot.in_flight, self.fence_timeout)?;
        let image_index =
            match backend.acquire_next_image(swapchain, slot.image_available, self.fence_timeout)? {
                AcquireResult::Image(index) => index,
                AcquireResult::OutOfDate => {
                    log::warn!("Swapchain out of date on acquire, skipping frame");
                    self.request_reinit(ReinitLevel::Swapchain);
                    return Ok(FrameStatus::Skipped);
                }
            };

        match self.submit_frame(backend, slot, image_index, frame_count) {
            Ok(status) => Ok(status),
            Err(e) => {
                // The acquired image is never presented; start over with a fresh swapchain.
                self.request_reinit(ReinitLevel::Swapchain);
                Err(e)
            }
        }
    }

    fn submit_frame(
        &mut self,
        backend: &mut dyn GraphicsBackend,
        slot: FrameSlot,
        image_index: u32,
        frame_count: usize,
    ) -> BackendResult<FrameStatus> {
        let mut wait = vec![slot.image_available];
        for surface in self.surfaces.iter_mut().flatten() {
            match surface.render(backend, frame_count) {
                Ok(Some(finished)) => wait.push(finished),
                Ok(None) => {}
                Err(BackendError::OutOfMemory) => {
                    log::warn!("Surface ran out of memory, keeping its previous image");
                }
                Err(e) => return Err(e),
            }
        }

        let Some(state) = self.swapchain.as_ref() else {
            return Ok(FrameStatus::Skipped);
        };
        let swapchain = state.info.handle;
        let swap_image = state
            .info
            .images
            .get(image_index as usize)
            .copied()
            .ok_or_else(|| BackendError::InvalidArgument(format!("image index {}", image_index)))?;
        let semaphores = state.images[image_index as usize];

        let commands = slot.composite_commands;
        backend.begin_command_buffer(commands)?;
        backend.cmd_transition_image(commands, swap_image, ImageLayout::Undefined, ImageLayout::TransferDst);
        backend.cmd_clear_image(commands, swap_image, self.clear_color);
        for surface in self.surfaces.iter().flatten() {
            let Some((resolve_image, extent)) = surface.resolve_image() else {
                continue;
            };
            backend.cmd_transition_image(
                commands,
                resolve_image,
                ImageLayout::ShaderReadOnly,
                ImageLayout::TransferSrc,
            );
            backend.cmd_blit_image(commands, resolve_image, extent, swap_image, surface.pixel_rect());
            backend.cmd_transition_image(
                commands,
                resolve_image,
                ImageLayout::TransferSrc,
                ImageLayout::ShaderReadOnly,
            );
        }
        backend.end_command_buffer(commands)?;
        backend.submit(&SubmitInfo {
            command_buffer: commands,
            wait: &wait,
            signal: &[semaphores.scene_finished],
            fence: None,
        })?;

        let commands = slot.present_commands;
        backend.begin_command_buffer(commands)?;
        backend.cmd_transition_image(commands, swap_image, ImageLayout::TransferDst, ImageLayout::PresentSrc);
        backend.end_command_buffer(commands)?;
        backend.reset_fence(slot.in_flight)?;
        backend.submit(&SubmitInfo {
            command_buffer: commands,
            wait: &[semaphores.scene_finished],
            signal: &[semaphores.composite_finished],
            fence: Some(slot.in_flight),
        })?;

        let presented = backend.present(swapchain, image_index, &[semaphores.composite_finished])?;
        self.current_frame = (self.current_frame + 1) % frame_count;
        match presented {
            PresentResult::Presented => {
                self.presented_frames += 1;
                Ok(FrameStatus::Presented)
            }
            PresentResult::OutOfDate => {
                log::warn!("Swapchain out of date on present");
                self.request_reinit(ReinitLevel::Swapchain);
                Ok(FrameStatus::Skipped)
            }
        }
    }

    /// Destroy the swapchain, every surface and every content resource.
    pub fn release(&mut self, backend: &mut dyn GraphicsBackend) {
        self.wait_idle(backend);
        for surface in self.surfaces.iter_mut().flatten() {
            surface.release(backend);
        }
        self.destroy_swapchain(backend);
        if let Some(retired) = self.retired.take() {
            backend.destroy_swapchain(retired);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::dummy::{DummyBackend, ResourceKind};

    fn target() -> RenderTarget {
        RenderTarget::new(&RendererConfig::default(), Extent::new(800, 600))
    }

    #[test]
    fn frame_slots_double_the_swap_images() {
        let mut backend = DummyBackend::new();
        backend.set_swapchain_image_count(3);
        let mut target = target();
        assert_eq!(target.render_frame(&mut backend).unwrap(), FrameStatus::Presented);
        assert_eq!(target.swapchain_image_count(), 3);
        assert_eq!(target.max_frames_in_flight(), 6);
        // per slot one semaphore, per image two
        assert_eq!(backend.live_count(ResourceKind::Semaphore), 6 + 3 * 2);
        assert_eq!(backend.live_count(ResourceKind::Fence), 6);
        assert_eq!(target.current_frame(), 1);
    }

    #[test]
    fn frames_cycle_through_slots() {
        let mut backend = DummyBackend::new();
        backend.set_swapchain_image_count(2);
        let mut target = target();
        for _ in 0..9 {
            assert_eq!(target.render_frame(&mut backend).unwrap(), FrameStatus::Presented);
        }
        assert_eq!(target.current_frame(), 9 % 4);
        assert_eq!(target.presented_frames(), 9);
    }

    #[test]
    fn present_out_of_date_recreates_swapchain() {
        let mut backend = DummyBackend::new();
        let mut target = target();
        target.render_frame(&mut backend).unwrap();
        backend.force_present_out_of_date(1);
        assert_eq!(target.render_frame(&mut backend).unwrap(), FrameStatus::Skipped);
        assert_eq!(target.pending_reinit(), Some(ReinitLevel::Swapchain));
        assert_eq!(target.render_frame(&mut backend).unwrap(), FrameStatus::Presented);
        assert_eq!(backend.live_count(ResourceKind::Swapchain), 1);
    }

    #[test]
    fn reinit_requests_keep_the_strongest() {
        let mut target = target();
        target.request_reinit(ReinitLevel::Swapchain);
        target.request_reinit(ReinitLevel::Surfaces);
        assert_eq!(target.pending_reinit(), Some(ReinitLevel::Swapchain));
        target.request_reinit(ReinitLevel::Device);
        assert_eq!(target.pending_reinit(), Some(ReinitLevel::Device));
    }

    #[test]
    fn empty_extent_skips() {
        let mut backend = DummyBackend::new();
        let mut target = RenderTarget::new(&RendererConfig::default(), Extent::new(0, 0));
        assert_eq!(target.render_frame(&mut backend).unwrap(), FrameStatus::Skipped);
        assert_eq!(backend.live_count(ResourceKind::Swapchain), 0);
    }
}
