//! Shared fixtures for the integration tests.
//!
//! Tests parameterized over [`Backend`] run against the headless backend everywhere and
//! against Vulkan when the loader and a device are present.

#![allow(dead_code)]

use std::sync::Arc;

use glam::{Vec3, Vec4};
use parking_lot::RwLock;

use graphics3d::backend::dummy::{DummyBackend, ResourceKind};
use graphics3d::backend::{
    create_backend, BackendResult, BackendType, CommandBufferHandle, Extent, GraphicsBackend,
    RenderPassHandle,
};
use graphics3d::renderer::{GraphicsContent3D, GraphicsContext3D, SceneRenderer};
use graphics3d::resources::{checkerboard_bitmap, Geometry, Material, TextureFlags};
use graphics3d::scene::{Camera, GeometryId, Light, MaterialId, Model, NodeId, SceneGraph, Transform};
use graphics3d::RendererConfig;

/// Route `log` output through the test harness; repeated calls are harmless.
pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Backends the integration tests know how to create.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backend {
    Headless,
    Vulkan,
}

impl Backend {
    pub fn name(&self) -> &'static str {
        match self {
            Backend::Headless => "headless",
            Backend::Vulkan => "vulkan",
        }
    }

    /// Create the backend without a window, or `None` if this machine cannot run it.
    pub fn create(self) -> Option<Box<dyn GraphicsBackend>> {
        let backend_type = match self {
            Backend::Headless => BackendType::Headless,
            Backend::Vulkan => BackendType::Vulkan,
        };
        match create_backend(backend_type, &RendererConfig::default(), None) {
            Ok(backend) => Some(backend),
            Err(e) => {
                eprintln!("Backend {} not available, skipping: {}", self.name(), e);
                None
            }
        }
    }
}

/// Kinds that must all reach zero once everything is released.
pub const TRACKED_KINDS: [ResourceKind; 12] = [
    ResourceKind::Buffer,
    ResourceKind::Image,
    ResourceKind::Sampler,
    ResourceKind::RenderPass,
    ResourceKind::Framebuffer,
    ResourceKind::ShaderModule,
    ResourceKind::Pipeline,
    ResourceKind::DescriptorSet,
    ResourceKind::CommandBuffer,
    ResourceKind::Semaphore,
    ResourceKind::Fence,
    ResourceKind::Swapchain,
];

pub fn assert_nothing_alive(backend: &DummyBackend) {
    for kind in TRACKED_KINDS {
        assert_eq!(backend.live_count(kind), 0, "{:?} objects leaked", kind);
    }
}

/// Ids of the interesting parts of [`lit_cube_scene`]
pub struct CubeScene {
    pub scene: Arc<RwLock<SceneGraph>>,
    pub camera: NodeId,
    pub opaque_node: NodeId,
    pub translucent_node: NodeId,
    pub cube: GeometryId,
    pub textured: MaterialId,
    pub glass: MaterialId,
}

/// Camera at z = -10 looking down +Z, a directional light, an opaque textured cube at the
/// origin and a half transparent cube between the two.
pub fn lit_cube_scene() -> CubeScene {
    let mut scene = SceneGraph::new();
    let root = scene.root();
    let camera = scene
        .add_camera(
            root,
            Camera::default(),
            Transform::from_position(Vec3::new(0.0, 0.0, -10.0)),
        )
        .expect("camera");
    scene
        .add_light(
            root,
            Light::directional(Vec4::new(1.0, 1.0, 0.9, 1.0)),
            Transform::looking_at(Vec3::ZERO, Vec3::new(0.0, -1.0, 1.0), Vec3::Y),
        )
        .expect("light");

    let cube = scene.add_geometry(Geometry::cube());
    let textured = scene.add_material(Material::texture(1.0).with_texture(
        0,
        checkerboard_bitmap(32, [255, 255, 255, 255], [40, 40, 40, 255]),
        TextureFlags::MIPMAPS,
    ));
    let glass = scene.add_material(Material::solid_color(Vec4::new(0.2, 0.4, 1.0, 0.5)));

    let opaque_node = scene
        .add_model(root, Model::new().with_part(cube, textured), Transform::default())
        .expect("opaque cube");
    let translucent_node = scene
        .add_model(
            root,
            Model::new().with_part(cube, glass),
            Transform::from_position(Vec3::new(0.0, 0.0, -5.0)),
        )
        .expect("translucent cube");

    CubeScene {
        scene: Arc::new(RwLock::new(scene)),
        camera,
        opaque_node,
        translucent_node,
        cube,
        textured,
        glass,
    }
}

pub const FRAME_EXTENT: Extent = Extent {
    width: 640,
    height: 480,
};

/// Prepare and record one frame of `renderer` outside any render target; returns the
/// number of draws recorded.
pub fn render_content(
    renderer: &mut SceneRenderer,
    backend: &mut dyn GraphicsBackend,
    command_buffer: CommandBufferHandle,
) -> BackendResult<u32> {
    renderer.prepare_content(backend, FRAME_EXTENT)?;
    let mut context = GraphicsContext3D::new(
        backend,
        command_buffer,
        RenderPassHandle::default(),
        1,
        FRAME_EXTENT,
    );
    renderer.render_content(&mut context)?;
    Ok(context.draw_count())
}
