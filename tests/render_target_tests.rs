//! Frame pacing, swapchain recovery and teardown through [`RenderTarget`].

mod common;

use common::{assert_nothing_alive, lit_cube_scene, CubeScene};
use glam::Vec3;
use graphics3d::backend::dummy::{DummyBackend, RecordedCommand, ResourceKind};
use graphics3d::backend::{Extent, GraphicsBackend, Rect};
use graphics3d::scene::Transform;
use graphics3d::{
    FrameStatus, ReinitLevel, RenderTarget, RendererConfig, SceneRenderer, Surface3D,
};

fn target_with_scene(config: &RendererConfig) -> (RenderTarget, CubeScene) {
    let fixture = lit_cube_scene();
    let renderer = SceneRenderer::new(fixture.scene.clone(), config);
    let mut target = RenderTarget::new(config, Extent::new(640, 480));
    target.add_surface(Surface3D::new(Box::new(renderer), Rect::new(0, 0, 640, 480)));
    (target, fixture)
}

fn draw_count(backend: &DummyBackend) -> usize {
    backend
        .commands()
        .iter()
        .filter(|command| command.is_draw())
        .count()
}

#[test]
fn test_first_frame_presents_scene() {
    common::init_logging();
    let config = RendererConfig::default();
    let mut backend = DummyBackend::new();
    let (mut target, _fixture) = target_with_scene(&config);

    assert_eq!(target.render_frame(&mut backend).unwrap(), FrameStatus::Presented);
    assert_eq!(draw_count(&backend), 2);
    assert_eq!(backend.presents(), 1);
    assert_eq!(target.presented_frames(), 1);
    assert_eq!(target.swapchain_extent(), Some(Extent::new(640, 480)));
    assert_eq!(
        target.max_frames_in_flight(),
        2 * target.swapchain_image_count()
    );

    // The surface image is composited onto the swap image
    assert!(backend
        .commands()
        .iter()
        .any(|command| matches!(command, RecordedCommand::BlitImage { .. })));

    target.release(&mut backend);
    assert_nothing_alive(&backend);
}

#[test]
fn test_static_scene_is_not_rerendered() {
    let config = RendererConfig::default();
    let mut backend = DummyBackend::new();
    let (mut target, fixture) = target_with_scene(&config);

    target.render_frame(&mut backend).unwrap();
    backend.clear_commands();
    assert_eq!(target.render_frame(&mut backend).unwrap(), FrameStatus::Presented);
    assert_eq!(draw_count(&backend), 0);

    // Moving a model dirties the content again
    fixture
        .scene
        .write()
        .set_transform(
            fixture.opaque_node,
            Transform::from_position(Vec3::new(1.0, 0.0, 0.0)),
        )
        .unwrap();
    backend.clear_commands();
    assert_eq!(target.render_frame(&mut backend).unwrap(), FrameStatus::Presented);
    assert_eq!(draw_count(&backend), 2);

    target.release(&mut backend);
    assert_nothing_alive(&backend);
}

#[test]
fn test_frames_cycle_through_slots() {
    let config = RendererConfig::default();
    let mut backend = DummyBackend::new();
    backend.set_swapchain_image_count(3);
    let (mut target, _fixture) = target_with_scene(&config);

    target.render_frame(&mut backend).unwrap();
    assert_eq!(target.swapchain_image_count(), 3);
    let slots = target.max_frames_in_flight();
    assert_eq!(slots, 6);
    for _ in 1..slots {
        assert_eq!(target.render_frame(&mut backend).unwrap(), FrameStatus::Presented);
    }
    assert_eq!(target.current_frame(), 0);
    assert_eq!(target.presented_frames(), slots as u64);

    target.release(&mut backend);
    assert_nothing_alive(&backend);
}

#[test]
fn test_out_of_date_acquire_skips_one_frame() {
    let config = RendererConfig::default();
    let mut backend = DummyBackend::new();
    let (mut target, _fixture) = target_with_scene(&config);
    target.render_frame(&mut backend).unwrap();
    let swapchains = backend.created_count(ResourceKind::Swapchain);

    backend.force_out_of_date(1);
    assert_eq!(target.render_frame(&mut backend).unwrap(), FrameStatus::Skipped);
    assert_eq!(target.pending_reinit(), Some(ReinitLevel::Swapchain));

    assert_eq!(target.render_frame(&mut backend).unwrap(), FrameStatus::Presented);
    assert_eq!(target.pending_reinit(), None);
    assert_eq!(backend.created_count(ResourceKind::Swapchain), swapchains + 1);
    assert_eq!(backend.live_count(ResourceKind::Swapchain), 1);

    target.release(&mut backend);
    assert_nothing_alive(&backend);
}

#[test]
fn test_out_of_date_present_recovers() {
    let config = RendererConfig::default();
    let mut backend = DummyBackend::new();
    let (mut target, _fixture) = target_with_scene(&config);
    target.render_frame(&mut backend).unwrap();

    backend.force_present_out_of_date(1);
    assert_eq!(target.render_frame(&mut backend).unwrap(), FrameStatus::Skipped);
    backend.clear_commands();
    assert_eq!(target.render_frame(&mut backend).unwrap(), FrameStatus::Presented);
    // Surface images were recreated with the swapchain, so the scene is drawn again
    assert_eq!(draw_count(&backend), 2);

    target.release(&mut backend);
    assert_nothing_alive(&backend);
}

#[test]
fn test_resize_recreates_swapchain() {
    let config = RendererConfig::default();
    let mut backend = DummyBackend::new();
    let (mut target, _fixture) = target_with_scene(&config);
    target.render_frame(&mut backend).unwrap();

    target.resize(Extent::new(800, 600));
    assert_eq!(target.render_frame(&mut backend).unwrap(), FrameStatus::Presented);
    assert_eq!(target.swapchain_extent(), Some(Extent::new(800, 600)));

    // Minimized windows skip frames without touching the swapchain
    target.resize(Extent::new(0, 0));
    assert_eq!(target.render_frame(&mut backend).unwrap(), FrameStatus::Skipped);

    target.release(&mut backend);
    assert_nothing_alive(&backend);
}

#[test]
fn test_device_reinit_rebuilds_everything() {
    let config = RendererConfig::default();
    let mut backend = DummyBackend::new();
    let (mut target, _fixture) = target_with_scene(&config);
    target.render_frame(&mut backend).unwrap();
    let generation = backend.device_generation();

    target.request_reinit(ReinitLevel::Device);
    backend.clear_commands();
    assert_eq!(target.render_frame(&mut backend).unwrap(), FrameStatus::Presented);
    assert_eq!(backend.device_generation(), generation + 1);
    assert_eq!(draw_count(&backend), 2);

    target.release(&mut backend);
    assert_nothing_alive(&backend);
}

#[test]
fn test_out_of_memory_still_presents() {
    common::init_logging();
    let config = RendererConfig::default();
    let mut backend = DummyBackend::new();
    backend.set_memory_limit(Some(0));
    let (mut target, _fixture) = target_with_scene(&config);

    assert_eq!(target.render_frame(&mut backend).unwrap(), FrameStatus::Presented);
    assert_eq!(draw_count(&backend), 0);
    assert_eq!(backend.live_count(ResourceKind::Buffer), 0);

    backend.set_memory_limit(None);
    backend.clear_commands();
    assert_eq!(target.render_frame(&mut backend).unwrap(), FrameStatus::Presented);
    assert_eq!(draw_count(&backend), 2);

    target.release(&mut backend);
    assert_nothing_alive(&backend);
}

#[test]
fn test_removed_surface_releases_its_content() {
    let config = RendererConfig::default();
    let mut backend = DummyBackend::new();
    let fixture = lit_cube_scene();
    let mut target = RenderTarget::new(&config, Extent::new(640, 480));
    let left = target.add_surface(Surface3D::new(
        Box::new(SceneRenderer::new(fixture.scene.clone(), &config)),
        Rect::new(0, 0, 320, 480),
    ));
    target.add_surface(Surface3D::new(
        Box::new(SceneRenderer::new(fixture.scene.clone(), &config)),
        Rect::new(320, 0, 320, 480),
    ));

    target.render_frame(&mut backend).unwrap();
    assert_eq!(draw_count(&backend), 4);
    let buffers = backend.live_count(ResourceKind::Buffer);

    let removed = target.remove_surface(&mut backend, left);
    assert!(removed.is_some());
    assert!(target.surface(left).is_none());
    assert!(backend.live_count(ResourceKind::Buffer) < buffers);

    assert_eq!(target.render_frame(&mut backend).unwrap(), FrameStatus::Presented);
    target.release(&mut backend);
    assert_nothing_alive(&backend);
}
