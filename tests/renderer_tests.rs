//! Integration tests for buffer pooling, constant writes and scene rendering.

mod common;

use glam::{Mat4, Vec4};
use rstest::rstest;

use common::{lit_cube_scene, render_content, Backend, FRAME_EXTENT};
use graphics3d::backend::dummy::{DummyBackend, RecordedCommand, ResourceKind};
use graphics3d::backend::{
    BufferKind, BufferUsage, DescriptorWrite, GraphicsBackend, ShaderStage, VertexFormat,
    LIGHT_BINDING, TRANSFORM_BINDING,
};
use graphics3d::renderer::{GraphicsContent3D, RendererState, SceneRenderer};
use graphics3d::resources::BufferAllocator;
use graphics3d::scene::Camera;
use graphics3d::shader::{ShaderBufferWriter, ShaderLibrary, PIXEL_SOLID_COLOR, VERTEX_PN};
use graphics3d::RendererConfig;

/// Copy the bytes a segment covers out of the headless backend.
fn segment_bytes(backend: &DummyBackend, buffer: graphics3d::backend::BufferHandle, offset: u64, size: u64) -> Vec<u8> {
    let contents = backend.buffer_contents(buffer).expect("buffer alive");
    contents[offset as usize..(offset + size) as usize].to_vec()
}

// ============================================================================
// Buffer allocator
// ============================================================================

#[rstest]
#[case::headless(Backend::Headless)]
#[case::vulkan(Backend::Vulkan)]
fn test_allocator_pools_per_kind(#[case] backend: Backend) {
    common::init_logging();
    let Some(mut gpu) = backend.create() else {
        return;
    };
    let mut allocator = BufferAllocator::new(64 * 1024, 256);

    let first = allocator
        .allocate(gpu.as_mut(), BufferKind::Constant, BufferUsage::Dynamic, 1, 256)
        .unwrap();
    let constants = allocator.buffers(BufferKind::Constant, BufferUsage::Dynamic);
    assert_eq!(constants.len(), 1);
    assert_eq!(constants[0].capacity(), 256);
    assert_eq!(first.offset(), 0);

    // A full constant buffer never grows; the next request gets its own buffer.
    let second = allocator
        .allocate(gpu.as_mut(), BufferKind::Constant, BufferUsage::Dynamic, 1, 256)
        .unwrap();
    assert_ne!(first.buffer(), second.buffer());

    let a = allocator
        .allocate(gpu.as_mut(), BufferKind::Vertex, BufferUsage::Immutable, 25, 4)
        .unwrap();
    let b = allocator
        .allocate(gpu.as_mut(), BufferKind::Vertex, BufferUsage::Immutable, 25, 4)
        .unwrap();
    assert_eq!(a.buffer(), b.buffer());
    assert!(b.offset() >= a.offset() + a.size());
    assert_eq!(b.offset() % 4, 0);
    let vertices = allocator.buffers(BufferKind::Vertex, BufferUsage::Immutable);
    assert_eq!(vertices.len(), 1);
    assert_eq!(vertices[0].capacity(), 64 * 1024);

    assert_eq!(allocator.buffer_count(), 3);
    allocator.release_all(gpu.as_mut());
    assert_eq!(allocator.buffer_count(), 0);
    assert!(!allocator.is_valid(&a));
}

#[rstest]
#[case::headless(Backend::Headless)]
#[case::vulkan(Backend::Vulkan)]
fn test_segment_write_lands_at_offset(#[case] backend: Backend) {
    common::init_logging();
    let Some(mut gpu) = backend.create() else {
        return;
    };
    let mut allocator = BufferAllocator::new(1024, 16);
    let _padding = allocator
        .allocate(gpu.as_mut(), BufferKind::Index, BufferUsage::Default, 3, 2)
        .unwrap();
    let segment = allocator
        .allocate(gpu.as_mut(), BufferKind::Index, BufferUsage::Default, 4, 4)
        .unwrap();
    assert_eq!(segment.offset() % 4, 0);

    let data: Vec<u8> = (0u32..4).flat_map(|i| i.to_le_bytes()).collect();
    allocator.write(gpu.as_mut(), &segment, &data).unwrap();
    let memory = allocator.map_segment(gpu.as_mut(), &segment).unwrap();
    assert_eq!(memory.len(), 16);
    assert_eq!(&memory[..], &data[..]);

    // Too much data for the segment
    assert!(allocator.write(gpu.as_mut(), &segment, &[0u8; 17]).is_err());
    allocator.release_all(gpu.as_mut());
}

// ============================================================================
// Shader constant writes through mapped memory
// ============================================================================

#[rstest]
#[case::headless(Backend::Headless)]
#[case::vulkan(Backend::Vulkan)]
fn test_transform_constants_round_trip(#[case] backend: Backend) {
    common::init_logging();
    let Some(mut gpu) = backend.create() else {
        return;
    };
    let mut library = ShaderLibrary::new();
    let shader = library.get(VERTEX_PN, ShaderStage::Vertex).unwrap();
    let writer = ShaderBufferWriter::new(shader.reflection().unwrap(), TRANSFORM_BINDING).unwrap();

    let alignment = gpu.capabilities().min_uniform_buffer_offset_alignment;
    let mut allocator = BufferAllocator::new(64 * 1024, alignment);
    let segment = allocator
        .allocate(gpu.as_mut(), BufferKind::Constant, BufferUsage::Dynamic, 1, writer.size())
        .unwrap();

    let model = Mat4::from_translation(glam::Vec3::new(1.0, 2.0, 3.0));
    {
        let memory = allocator.map_segment(gpu.as_mut(), &segment).unwrap();
        let mut constants = writer.begin(memory).unwrap();
        constants.set("ModelMatrix", model).unwrap();
        constants.set("CameraPosition", Vec4::new(0.0, 0.0, -10.0, 1.0)).unwrap();

        // Wrong type for a matrix: rejected, nothing written
        assert!(constants.set("ModelMatrix", 1.0f32).is_err());
        assert!(constants.set("NoSuchValue", 1.0f32).is_err());
    }

    let memory = allocator.map_segment(gpu.as_mut(), &segment).unwrap();
    let mut constants = writer.begin(memory).unwrap();
    assert_eq!(constants.read::<Mat4>("ModelMatrix").unwrap(), model);
    assert_eq!(
        constants.read::<Vec4>("CameraPosition").unwrap(),
        Vec4::new(0.0, 0.0, -10.0, 1.0)
    );
    allocator.release_all(gpu.as_mut());
}

// ============================================================================
// Scene rendering on the headless backend
// ============================================================================

#[test]
fn test_scene_draws_opaque_then_translucent() {
    common::init_logging();
    let fixture = lit_cube_scene();
    let mut backend = DummyBackend::new();
    let mut renderer = SceneRenderer::new(fixture.scene.clone(), &RendererConfig::default());
    let cmd = backend.allocate_command_buffer().unwrap();

    let draws = render_content(&mut renderer, &mut backend, cmd).unwrap();
    assert_eq!(draws, 2);
    assert_eq!(renderer.state(), RendererState::Clean);

    let order: Vec<_> = renderer.draw_items().iter().map(|item| item.material).collect();
    assert_eq!(order, vec![fixture.textured, fixture.glass]);

    let draw_calls = backend.draw_calls();
    assert_eq!(draw_calls.len(), 2);
    for draw in &draw_calls {
        assert!(matches!(
            draw,
            RecordedCommand::DrawIndexed { index_count: 36, .. }
        ));
    }

    // Textured material samples uvs; the solid one drops them from the same mesh.
    let bound: Vec<_> = backend
        .commands()
        .iter()
        .filter_map(|command| match command {
            RecordedCommand::BindPipeline(pipeline) => Some(*pipeline),
            _ => None,
        })
        .collect();
    assert_eq!(bound.len(), 2);
    let opaque = backend.pipeline_descriptor(bound[0]).unwrap();
    let translucent = backend.pipeline_descriptor(bound[1]).unwrap();
    assert_eq!(opaque.vertex_format, VertexFormat::PNT);
    assert_eq!(translucent.vertex_format, VertexFormat::PNT);
    assert!(opaque.depth.write_enabled);
    assert!(!translucent.depth.write_enabled);
    assert_ne!(opaque.vertex_shader, translucent.vertex_shader);
    assert_eq!(renderer.pipeline_count(), 2);

    backend.free_command_buffer(cmd);
    renderer.release_resources(&mut backend);
}

#[test]
fn test_frame_constants_match_camera() {
    let fixture = lit_cube_scene();
    let mut backend = DummyBackend::new();
    let mut renderer = SceneRenderer::new(fixture.scene.clone(), &RendererConfig::default());
    let cmd = backend.allocate_command_buffer().unwrap();
    render_content(&mut renderer, &mut backend, cmd).unwrap();

    let mut library = ShaderLibrary::new();
    let vertex = library.get(VERTEX_PN, ShaderStage::Vertex).unwrap();
    let transform_writer =
        ShaderBufferWriter::new(vertex.reflection().unwrap(), TRANSFORM_BINDING).unwrap();

    let item = renderer
        .draw_items()
        .iter()
        .find(|item| item.node == fixture.translucent_node)
        .unwrap();
    let segment = item.transform_buffer;
    let mut bytes = segment_bytes(&backend, segment.buffer(), segment.offset(), segment.size());
    let mut constants = transform_writer.begin(&mut bytes).unwrap();

    let expected_projection = Camera::default().projection_matrix(FRAME_EXTENT.aspect_ratio());
    let projection = constants.read::<Mat4>("ProjectionMatrix").unwrap();
    assert!(projection.abs_diff_eq(expected_projection, 1e-6));

    let model = constants.read::<Mat4>("ModelMatrix").unwrap();
    assert_eq!(model.w_axis, Vec4::new(0.0, 0.0, -5.0, 1.0));
    let camera_world = Mat4::from_translation(glam::Vec3::new(0.0, 0.0, -10.0));
    let model_view = constants.read::<Mat4>("ModelViewMatrix").unwrap();
    assert!(model_view.abs_diff_eq(Camera::view_matrix(camera_world) * model, 1e-5));
    assert_eq!(
        constants.read::<Vec4>("CameraPosition").unwrap(),
        Vec4::new(0.0, 0.0, -10.0, 1.0)
    );

    // Directional light color lands in the shared light buffer
    let pixel = library.get(PIXEL_SOLID_COLOR, ShaderStage::Pixel).unwrap();
    let light_writer = ShaderBufferWriter::new(pixel.reflection().unwrap(), LIGHT_BINDING).unwrap();
    let lights = renderer.light_buffer().unwrap();
    let mut bytes = segment_bytes(&backend, lights.buffer(), lights.offset(), lights.size());
    let mut constants = light_writer.begin(&mut bytes).unwrap();
    let color: Vec4 = constants
        .value("directionalLight")
        .unwrap()
        .get("lightColor")
        .unwrap()
        .read()
        .unwrap();
    assert_eq!(color, Vec4::new(1.0, 1.0, 0.9, 1.0));

    renderer.release_resources(&mut backend);
}

#[test]
fn test_textured_item_binds_its_texture() {
    let fixture = lit_cube_scene();
    let mut backend = DummyBackend::new();
    let mut renderer = SceneRenderer::new(fixture.scene.clone(), &RendererConfig::default());
    let cmd = backend.allocate_command_buffer().unwrap();
    render_content(&mut renderer, &mut backend, cmd).unwrap();

    let item = renderer
        .draw_items()
        .iter()
        .find(|item| item.material == fixture.textured)
        .unwrap();
    assert!(item.parameters.texture(0).is_some());
    assert!(item.parameters.texture(1).is_none());

    let set = item.parameters.descriptor_set().unwrap();
    let images = backend
        .descriptor_writes(set)
        .unwrap()
        .iter()
        .find_map(|write| match write {
            DescriptorWrite::Textures { images, .. } => Some(*images),
            _ => None,
        })
        .unwrap();
    // Empty slots share the null texture
    assert_ne!(images[0], images[1]);
    assert_eq!(images[1], images[2]);

    renderer.release_resources(&mut backend);
    backend.free_command_buffer(cmd);
    common::assert_nothing_alive(&backend);
}

#[test]
fn test_unchanged_frames_skip_descriptor_writes() {
    let fixture = lit_cube_scene();
    let mut backend = DummyBackend::new();
    let mut renderer = SceneRenderer::new(fixture.scene.clone(), &RendererConfig::default());
    let cmd = backend.allocate_command_buffer().unwrap();

    render_content(&mut renderer, &mut backend, cmd).unwrap();
    let writes = backend.descriptor_write_count();
    let pipelines = backend.created_count(ResourceKind::Pipeline);
    let buffers = backend.created_count(ResourceKind::Buffer);
    assert!(!renderer.is_dirty());

    for _ in 0..3 {
        backend.clear_commands();
        assert_eq!(render_content(&mut renderer, &mut backend, cmd).unwrap(), 2);
    }
    assert_eq!(backend.descriptor_write_count(), writes);
    assert_eq!(backend.created_count(ResourceKind::Pipeline), pipelines);
    assert_eq!(backend.created_count(ResourceKind::Buffer), buffers);

    renderer.release_resources(&mut backend);
}

#[test]
fn test_color_edit_rewrites_constants_only() {
    let fixture = lit_cube_scene();
    let mut backend = DummyBackend::new();
    let mut renderer = SceneRenderer::new(fixture.scene.clone(), &RendererConfig::default());
    let cmd = backend.allocate_command_buffer().unwrap();
    render_content(&mut renderer, &mut backend, cmd).unwrap();

    let segment = renderer.material_buffer(fixture.glass).unwrap();
    let before = segment_bytes(&backend, segment.buffer(), segment.offset(), segment.size());
    let pipelines = backend.created_count(ResourceKind::Pipeline);

    fixture
        .scene
        .write()
        .material_mut(fixture.glass)
        .unwrap()
        .set_color(Vec4::new(1.0, 0.0, 0.0, 0.25));
    assert!(renderer.is_dirty());

    assert_eq!(render_content(&mut renderer, &mut backend, cmd).unwrap(), 2);
    assert_eq!(renderer.material_buffer(fixture.glass), Some(segment));
    let after = segment_bytes(&backend, segment.buffer(), segment.offset(), segment.size());
    assert_ne!(before, after);
    assert_eq!(backend.created_count(ResourceKind::Pipeline), pipelines);

    renderer.release_resources(&mut backend);
}

#[test]
fn test_opacity_change_switches_pipeline() {
    let fixture = lit_cube_scene();
    let mut backend = DummyBackend::new();
    let mut renderer = SceneRenderer::new(fixture.scene.clone(), &RendererConfig::default());
    let cmd = backend.allocate_command_buffer().unwrap();
    render_content(&mut renderer, &mut backend, cmd).unwrap();

    fixture
        .scene
        .write()
        .material_mut(fixture.glass)
        .unwrap()
        .set_color(Vec4::new(0.2, 0.4, 1.0, 1.0));

    backend.clear_commands();
    assert_eq!(render_content(&mut renderer, &mut backend, cmd).unwrap(), 2);
    let bound: Vec<_> = backend
        .commands()
        .iter()
        .filter_map(|command| match command {
            RecordedCommand::BindPipeline(pipeline) => Some(*pipeline),
            _ => None,
        })
        .collect();
    assert!(bound
        .iter()
        .all(|pipeline| backend.pipeline_descriptor(*pipeline).unwrap().depth.write_enabled));

    renderer.release_resources(&mut backend);
    backend.free_command_buffer(cmd);
    common::assert_nothing_alive(&backend);
}

#[test]
fn test_removed_node_stops_drawing() {
    let fixture = lit_cube_scene();
    let mut backend = DummyBackend::new();
    let mut renderer = SceneRenderer::new(fixture.scene.clone(), &RendererConfig::default());
    let cmd = backend.allocate_command_buffer().unwrap();
    render_content(&mut renderer, &mut backend, cmd).unwrap();

    fixture
        .scene
        .write()
        .remove_node(fixture.translucent_node)
        .unwrap();
    backend.clear_commands();
    assert_eq!(render_content(&mut renderer, &mut backend, cmd).unwrap(), 1);
    assert_eq!(renderer.draw_items().len(), 1);
    assert!(renderer.material_buffer(fixture.glass).is_none());

    renderer.release_resources(&mut backend);
}
