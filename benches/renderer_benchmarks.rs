use std::cmp::Ordering;
use std::sync::Arc;

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use glam::{Vec3, Vec4};
use parking_lot::RwLock;

use graphics3d::backend::dummy::DummyBackend;
use graphics3d::backend::{BufferKind, BufferUsage, Extent, GraphicsBackend, ShaderStage, TRANSFORM_BINDING};
use graphics3d::renderer::{compare_draw_order, DrawSortKey, GraphicsContent3D};
use graphics3d::resources::{BufferAllocator, Geometry, Material};
use graphics3d::scene::{Camera, Light, Model, SceneGraph, Transform};
use graphics3d::shader::{ShaderBufferWriter, ShaderLibrary, VERTEX_PN};
use graphics3d::{RendererConfig, SceneRenderer};

// ---------------------------------------------------------------------------
// Buffer allocation
// ---------------------------------------------------------------------------

fn bench_allocate_constants(c: &mut Criterion) {
    c.bench_function("allocator_256_constant_segments", |b| {
        b.iter_with_setup(
            || (DummyBackend::new(), BufferAllocator::new(64 * 1024, 256)),
            |(mut backend, mut allocator)| {
                for _ in 0..256 {
                    let segment = allocator
                        .allocate(&mut backend, BufferKind::Constant, BufferUsage::Dynamic, 1, 336)
                        .unwrap();
                    black_box(segment);
                }
                allocator.release_all(&mut backend);
            },
        );
    });
}

fn bench_allocate_vertices(c: &mut Criterion) {
    c.bench_function("allocator_1024_vertex_segments", |b| {
        b.iter_with_setup(
            || (DummyBackend::new(), BufferAllocator::new(64 * 1024, 256)),
            |(mut backend, mut allocator)| {
                for i in 0..1024u32 {
                    let segment = allocator
                        .allocate(
                            &mut backend,
                            BufferKind::Vertex,
                            BufferUsage::Immutable,
                            24 + i % 8,
                            32,
                        )
                        .unwrap();
                    black_box(segment);
                }
                allocator.release_all(&mut backend);
            },
        );
    });
}

// ---------------------------------------------------------------------------
// Constant buffer writes
// ---------------------------------------------------------------------------

fn bench_transform_writes(c: &mut Criterion) {
    let mut library = ShaderLibrary::new();
    let shader = library.get(VERTEX_PN, ShaderStage::Vertex).unwrap();
    let writer = ShaderBufferWriter::new(shader.reflection().unwrap(), TRANSFORM_BINDING).unwrap();
    let mut memory = vec![0u8; writer.size() as usize];
    let world = glam::Mat4::from_translation(Vec3::new(1.0, 2.0, 3.0));

    c.bench_function("writer_transform_constants", |b| {
        b.iter(|| {
            let mut constants = writer.begin(&mut memory).unwrap();
            constants.set("ModelMatrix", black_box(world)).unwrap();
            constants.set("ModelViewMatrix", world).unwrap();
            constants.set("ProjectionMatrix", world).unwrap();
            constants.set("NormalMatrix", world).unwrap();
            constants
                .set("CameraPosition", Vec4::new(0.0, 0.0, -10.0, 1.0))
                .unwrap();
        });
    });
}

// ---------------------------------------------------------------------------
// Draw ordering
// ---------------------------------------------------------------------------

fn sort_keys(count: usize) -> Vec<DrawSortKey> {
    (0..count)
        .map(|i| DrawSortKey {
            translucent: i % 3 == 0,
            distance: ((i * 7919) % 1000) as f32,
            depth_bias: (i % 4) as f32,
        })
        .collect()
}

fn bench_draw_order(c: &mut Criterion) {
    c.bench_function("draw_order_sort_4096", |b| {
        b.iter_with_setup(
            || sort_keys(4096),
            |mut keys| {
                keys.sort_by(compare_draw_order);
                black_box(keys.first().map(|key| compare_draw_order(key, key)) == Some(Ordering::Equal));
            },
        );
    });
}

// ---------------------------------------------------------------------------
// Scene preparation
// ---------------------------------------------------------------------------

fn grid_scene(side: i32) -> Arc<RwLock<SceneGraph>> {
    let mut scene = SceneGraph::new();
    let root = scene.root();
    scene
        .add_camera(
            root,
            Camera::default(),
            Transform::from_position(Vec3::new(0.0, 0.0, -30.0)),
        )
        .unwrap();
    scene
        .add_light(
            root,
            Light::directional(Vec4::ONE),
            Transform::looking_at(Vec3::ZERO, Vec3::new(0.0, -1.0, 1.0), Vec3::Y),
        )
        .unwrap();
    let cube = scene.add_geometry(Geometry::cube());
    let opaque = scene.add_material(Material::solid_color(Vec4::new(0.8, 0.2, 0.2, 1.0)));
    let glass = scene.add_material(Material::solid_color(Vec4::new(0.2, 0.2, 0.8, 0.5)));
    for x in -side..side {
        for y in -side..side {
            let material = if (x + y) % 2 == 0 { opaque } else { glass };
            scene
                .add_model(
                    root,
                    Model::new().with_part(cube, material),
                    Transform::from_position(Vec3::new(x as f32 * 2.0, y as f32 * 2.0, 0.0)),
                )
                .unwrap();
        }
    }
    Arc::new(RwLock::new(scene))
}

fn bench_scene_rebuild(c: &mut Criterion) {
    let extent = Extent::new(1280, 720);
    c.bench_function("scene_rebuild_256_models", |b| {
        b.iter_with_setup(
            || {
                let scene = grid_scene(8);
                (DummyBackend::new(), SceneRenderer::new(scene, &RendererConfig::default()))
            },
            |(mut backend, mut renderer)| {
                renderer.prepare_content(&mut backend, extent).unwrap();
                renderer.release_resources(&mut backend);
            },
        );
    });
}

fn bench_scene_frame_update(c: &mut Criterion) {
    let extent = Extent::new(1280, 720);
    let scene = grid_scene(8);
    let mut backend = DummyBackend::new();
    let mut renderer = SceneRenderer::new(scene.clone(), &RendererConfig::default());
    renderer.prepare_content(&mut backend, extent).unwrap();
    let mut frame = 0u32;

    c.bench_function("scene_frame_update_256_models", |b| {
        b.iter(|| {
            frame = frame.wrapping_add(1);
            let mut transform = Transform::from_position(Vec3::new(0.0, 0.0, -30.0));
            transform.translate(Vec3::new((frame % 10) as f32 * 0.1, 0.0, 0.0));
            {
                let mut scene = scene.write();
                let camera = scene.active_camera().map(|(id, _)| id).unwrap();
                scene.set_transform(camera, transform).unwrap();
            }
            renderer.prepare_content(&mut backend, extent).unwrap();
        });
    });
    renderer.release_resources(&mut backend);
    black_box(backend.device_generation());
}

criterion_group!(
    benches,
    bench_allocate_constants,
    bench_allocate_vertices,
    bench_transform_writes,
    bench_draw_order,
    bench_scene_rebuild,
    bench_scene_frame_update,
);
criterion_main!(benches);
