//! Scene renderer
//!
//! [`SceneRenderer`] turns a [`SceneGraph`] into draw items. The scene's structure revision
//! decides when items, pipelines and constant buffers are rebuilt; every frame then only
//! rewrites transforms, lights and edited materials and re-sorts the items.

mod context;
mod draw_item;

pub use context::*;
pub use draw_item::*;

use std::collections::HashMap;
use std::sync::Arc;

use glam::{Mat4, Vec3};
use parking_lot::RwLock;

use crate::backend::*;
use crate::config::RendererConfig;
use crate::pipeline::{ParameterSet, PipelineCache, PipelineKey};
use crate::resources::{
    BufferAllocator, BufferSegment, Geometry, GeometryBuffers, Material, MaterialKind,
    TextureCache, TextureFlags, TextureId,
};
use crate::scene::{normal_matrix, Camera, GeometryId, MaterialId, NodeId, SceneGraph};
use crate::shader::{
    ParameterValue, ShaderBufferWriter, ShaderLibrary, PIXEL_SOLID_COLOR, VERTEX_BILLBOARD,
    VERTEX_PN, VERTEX_PNT, VERTEX_PN_FROM_PNT,
};

/// What the next [`GraphicsContent3D::prepare_content`] has to redo
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RendererState {
    /// Items match the scene and frame constants are current
    Clean,
    /// Draw items have to be rebuilt
    SceneDirty,
    /// Only per-frame constants are stale
    FramesDirty,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct SlotTexture {
    id: TextureId,
    source: usize,
    immutable: bool,
}

/// Material inputs that select the pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct MaterialPipelineState {
    translucent: bool,
    depth_bias_bits: u32,
    requires_texcoords: bool,
}

impl MaterialPipelineState {
    fn of(material: &Material) -> Self {
        Self {
            translucent: material.is_translucent(),
            depth_bias_bits: material.depth_bias().to_bits(),
            requires_texcoords: material.requires_texcoords(),
        }
    }
}

/// Constant buffer and textures shared by every item drawn with one material
struct MaterialEntry {
    buffer: BufferSegment,
    writer: ShaderBufferWriter,
    pipeline_state: MaterialPipelineState,
    written_revision: Option<u64>,
    texture_revision: Option<u64>,
    textures: [Option<SlotTexture>; MAX_TEXTURE_COUNT],
}

/// Renders a shared [`SceneGraph`] as 3D content.
pub struct SceneRenderer {
    scene: Arc<RwLock<SceneGraph>>,
    shaders: ShaderLibrary,
    max_point_lights: usize,
    multisampling: u32,
    clear_color: [f32; 4],
    min_block_size: u64,
    allocator: Option<BufferAllocator>,
    pipelines: PipelineCache,
    textures: TextureCache,
    geometries: HashMap<GeometryId, GeometryBuffers>,
    materials: HashMap<MaterialId, MaterialEntry>,
    items: Vec<DrawItem>,
    transform_writer: Option<ShaderBufferWriter>,
    light_writer: Option<ShaderBufferWriter>,
    light_buffer: Option<BufferSegment>,
    state: RendererState,
    structure_revision: Option<u64>,
    revision: Option<u64>,
    device_generation: Option<u64>,
    has_camera: bool,
}

impl SceneRenderer {
    pub fn new(scene: Arc<RwLock<SceneGraph>>, config: &RendererConfig) -> Self {
        Self {
            scene,
            shaders: ShaderLibrary::from_config(config),
            max_point_lights: config.max_point_lights,
            multisampling: config.multisampling.max(1),
            clear_color: config.clear_color,
            min_block_size: config.min_block_size,
            allocator: None,
            pipelines: PipelineCache::new(),
            textures: TextureCache::new(),
            geometries: HashMap::new(),
            materials: HashMap::new(),
            items: Vec::new(),
            transform_writer: None,
            light_writer: None,
            light_buffer: None,
            state: RendererState::SceneDirty,
            structure_revision: None,
            revision: None,
            device_generation: None,
            has_camera: false,
        }
    }

    /// Replace the shader library, e.g. to register custom pixel shaders.
    pub fn with_shader_library(mut self, shaders: ShaderLibrary) -> Self {
        self.shaders = shaders;
        self
    }

    pub fn scene(&self) -> Arc<RwLock<SceneGraph>> {
        self.scene.clone()
    }

    pub fn shaders_mut(&mut self) -> &mut ShaderLibrary {
        &mut self.shaders
    }

    pub fn state(&self) -> RendererState {
        self.state
    }

    /// Draw items in the order the last frame drew them
    pub fn draw_items(&self) -> &[DrawItem] {
        &self.items
    }

    pub fn pipeline_count(&self) -> usize {
        self.pipelines.len()
    }

    pub fn allocator(&self) -> Option<&BufferAllocator> {
        self.allocator.as_ref()
    }

    pub fn light_buffer(&self) -> Option<BufferSegment> {
        self.light_buffer
    }

    /// Constant buffer of a material, once an item uses it
    pub fn material_buffer(&self, material: MaterialId) -> Option<BufferSegment> {
        self.materials.get(&material).map(|entry| entry.buffer)
    }

    pub fn geometry_buffers(&self, geometry: GeometryId) -> Option<&GeometryBuffers> {
        self.geometries.get(&geometry)
    }

    /// Force a full rebuild on the next prepare.
    pub fn invalidate(&mut self) {
        self.state = RendererState::SceneDirty;
    }

    fn pipeline_state_changed(&self, scene: &SceneGraph) -> bool {
        self.materials.iter().any(|(id, entry)| {
            scene.material(*id).map(MaterialPipelineState::of) != Some(entry.pipeline_state)
        })
    }

    /// Drop every GPU-side record without touching the backend.
    fn forget_resources(&mut self) {
        for item in &mut self.items {
            item.parameters.forget();
        }
        self.items.clear();
        self.pipelines.forget();
        self.textures.forget();
        if let Some(allocator) = self.allocator.as_mut() {
            allocator.forget();
        }
        self.allocator = None;
        self.geometries.clear();
        self.materials.clear();
        self.light_buffer = None;
        self.state = RendererState::SceneDirty;
        self.structure_revision = None;
        self.revision = None;
    }

    fn ensure_writers(&mut self) -> BackendResult<()> {
        if self.transform_writer.is_none() {
            let shader = self.shaders.get(VERTEX_PN, ShaderStage::Vertex)?;
            self.transform_writer = Some(ShaderBufferWriter::new(
                shader.reflection()?,
                TRANSFORM_BINDING,
            )?);
        }
        if self.light_writer.is_none() {
            let shader = self.shaders.get(PIXEL_SOLID_COLOR, ShaderStage::Pixel)?;
            self.light_writer = Some(ShaderBufferWriter::new(shader.reflection()?, LIGHT_BINDING)?);
        }
        Ok(())
    }

    /// Recreate draw items for every model part of the scene.
    ///
    /// Running out of memory aborts the rebuild and keeps the previous items around so the
    /// next prepare retries with their buffers. Any other failure skips just that part.
    fn rebuild(&mut self, backend: &mut dyn GraphicsBackend, scene: &SceneGraph) -> BackendResult<()> {
        self.ensure_writers()?;
        let min_block_size = self.min_block_size;
        let uniform_alignment = backend.capabilities().min_uniform_buffer_offset_alignment;
        let allocator = self
            .allocator
            .get_or_insert_with(|| BufferAllocator::new(min_block_size, uniform_alignment));

        if self.light_buffer.is_none() {
            let size = self
                .light_writer
                .as_ref()
                .map(|writer| writer.size())
                .unwrap_or_default();
            self.light_buffer = Some(allocator.allocate(
                backend,
                BufferKind::Constant,
                BufferUsage::Dynamic,
                1,
                size,
            )?);
        }

        let point_lights = scene.point_light_count();
        if point_lights > self.max_point_lights {
            log::warn!(
                "Scene has {} point lights, only {} are rendered",
                point_lights,
                self.max_point_lights
            );
        }

        let mut previous: HashMap<(NodeId, usize), DrawItem> = self
            .items
            .drain(..)
            .map(|item| ((item.node, item.part), item))
            .collect();
        let mut next = Vec::with_capacity(previous.len());
        let mut result = Ok(());

        'models: for (node, model) in scene.models() {
            for (part, (geometry, material)) in model.parts.iter().copied().enumerate() {
                let mut reused = previous.remove(&(node, part));
                match self.build_item(backend, scene, node, part, geometry, material, &mut reused) {
                    Ok(item) => next.push(item),
                    Err(BackendError::OutOfMemory) => {
                        if let Some(item) = reused {
                            previous.insert((node, part), item);
                        }
                        result = Err(BackendError::OutOfMemory);
                        break 'models;
                    }
                    Err(e) => {
                        log::warn!("Skipping part {} of node {:?}: {}", part, node, e);
                        if let Some(mut item) = reused {
                            item.parameters.release(backend);
                        }
                    }
                }
            }
        }

        self.items = next;
        match result {
            Ok(()) => {
                for (_, mut stale) in previous.drain() {
                    stale.parameters.release(backend);
                }
                self.prune_materials(backend);
                log::debug!(
                    "Rebuilt {} draw items with {} pipelines",
                    self.items.len(),
                    self.pipelines.len()
                );
                Ok(())
            }
            Err(e) => {
                self.items.extend(previous.into_values());
                Err(e)
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn build_item(
        &mut self,
        backend: &mut dyn GraphicsBackend,
        scene: &SceneGraph,
        node: NodeId,
        part: usize,
        geometry_id: GeometryId,
        material_id: MaterialId,
        reused: &mut Option<DrawItem>,
    ) -> BackendResult<DrawItem> {
        let geometry = scene.geometry(geometry_id).ok_or_else(|| {
            BackendError::InvalidArgument(format!("unknown geometry {:?}", geometry_id))
        })?;
        let material = scene.material(material_id).ok_or_else(|| {
            BackendError::InvalidArgument(format!("unknown material {:?}", material_id))
        })?;
        let allocator = self
            .allocator
            .as_mut()
            .ok_or_else(|| BackendError::InvalidArgument("allocator not created".into()))?;

        if !self.geometries.contains_key(&geometry_id) {
            let buffers = geometry.upload(backend, allocator, geometry.vertex_format())?;
            self.geometries.insert(geometry_id, buffers);
        }

        let transform_buffer = match reused.as_ref() {
            Some(item) => item.transform_buffer,
            None => {
                let size = self
                    .transform_writer
                    .as_ref()
                    .map(|writer| writer.size())
                    .unwrap_or_default();
                allocator.allocate(backend, BufferKind::Constant, BufferUsage::Dynamic, 1, size)?
            }
        };

        let material_buffer = match self.materials.get_mut(&material_id) {
            Some(entry) => {
                entry.pipeline_state = MaterialPipelineState::of(material);
                entry.buffer
            }
            None => {
                let shader = self.shaders.get(material.pixel_shader(), ShaderStage::Pixel)?;
                let writer = ShaderBufferWriter::new(shader.reflection()?, MATERIAL_BINDING)?;
                let buffer = allocator.allocate(
                    backend,
                    BufferKind::Constant,
                    BufferUsage::Dynamic,
                    1,
                    writer.size(),
                )?;
                self.materials.insert(
                    material_id,
                    MaterialEntry {
                        buffer,
                        writer,
                        pipeline_state: MaterialPipelineState::of(material),
                        written_revision: None,
                        texture_revision: None,
                        textures: [None; MAX_TEXTURE_COUNT],
                    },
                );
                buffer
            }
        };

        let key = pipeline_key(geometry, material);
        let pipeline = self.pipelines.get_or_create(&mut self.shaders, &key)?;
        let light_buffer = self
            .light_buffer
            .ok_or_else(|| BackendError::InvalidArgument("light buffer not created".into()))?;

        let mut parameters = reused
            .take()
            .map(|item| item.parameters)
            .unwrap_or_default();
        parameters.set_vertex_shader_parameters(TRANSFORM_BINDING, transform_buffer);
        parameters.set_pixel_shader_parameters(MATERIAL_BINDING, material_buffer);
        parameters.set_pixel_shader_parameters(LIGHT_BINDING, light_buffer);

        Ok(DrawItem {
            node,
            part,
            geometry: geometry_id,
            material: material_id,
            pipeline,
            parameters,
            transform_buffer,
            sort_key: DrawSortKey::default(),
        })
    }

    /// Forget material entries no item uses anymore.
    fn prune_materials(&mut self, backend: &mut dyn GraphicsBackend) {
        let used: std::collections::HashSet<MaterialId> =
            self.items.iter().map(|item| item.material).collect();
        let textures = &mut self.textures;
        self.materials.retain(|id, entry| {
            if used.contains(id) {
                return true;
            }
            for slot in entry.textures.iter().flatten() {
                textures.release(backend, slot.id);
            }
            false
        });
    }

    /// Rewrite lights, transforms and edited materials, then re-sort.
    fn update_frame(
        &mut self,
        backend: &mut dyn GraphicsBackend,
        scene: &SceneGraph,
        extent: Extent,
    ) -> BackendResult<()> {
        let Some(allocator) = self.allocator.as_ref() else {
            return Ok(());
        };
        let Some((camera_node, camera)) = scene.active_camera() else {
            if self.has_camera {
                log::debug!("Scene has no camera, nothing to draw");
            }
            self.has_camera = false;
            return Ok(());
        };
        self.has_camera = true;
        let camera_world = scene
            .node(camera_node)
            .map(|node| node.world_transform())
            .unwrap_or(Mat4::IDENTITY);
        let view = Camera::view_matrix(camera_world);
        let projection = camera.projection_matrix(extent.aspect_ratio());
        let camera_position = camera_world.w_axis.truncate();

        if let (Some(writer), Some(segment)) = (self.light_writer.as_ref(), self.light_buffer) {
            let memory = allocator.map_segment(backend, &segment)?;
            write_lights(writer, memory, scene, self.max_point_lights)?;
        }

        if let Some(writer) = self.transform_writer.as_ref() {
            for item in &mut self.items {
                let Some(node) = scene.node(item.node) else {
                    continue;
                };
                let world = node.world_transform();
                let memory = allocator.map_segment(backend, &item.transform_buffer)?;
                let mut constants = writer.begin(memory)?;
                constants.set("ModelMatrix", world)?;
                constants.set("ModelViewMatrix", view * world)?;
                constants.set("ProjectionMatrix", projection)?;
                constants.set("NormalMatrix", normal_matrix(world))?;
                constants.set("CameraPosition", camera_position.extend(1.0))?;

                let (translucent, depth_bias) = scene
                    .material(item.material)
                    .map(|material| (material.is_translucent(), material.depth_bias()))
                    .unwrap_or_default();
                item.sort_key = DrawSortKey {
                    translucent,
                    distance: camera_position.distance_squared(node.world_position()),
                    depth_bias,
                };
            }
        }

        for (id, entry) in self.materials.iter_mut() {
            let Some(material) = scene.material(*id) else {
                continue;
            };
            if entry.written_revision != Some(material.revision()) {
                let memory = allocator.map_segment(backend, &entry.buffer)?;
                write_material(&entry.writer, memory, material)?;
                entry.written_revision = Some(material.revision());
            }
            if entry.texture_revision != Some(material.texture_revision()) {
                update_material_textures(backend, &mut self.textures, entry, material)?;
                entry.texture_revision = Some(material.texture_revision());
            }
        }

        for item in &mut self.items {
            if let Some(entry) = self.materials.get(&item.material) {
                for (slot, texture) in entry.textures.iter().enumerate() {
                    item.parameters.set_texture(slot, texture.map(|t| t.id))?;
                }
            }
        }

        sort_draw_items(&mut self.items);
        Ok(())
    }
}

/// Pipeline identity for a geometry drawn with a material.
fn pipeline_key(geometry: &Geometry, material: &Material) -> PipelineKey {
    let format = geometry.vertex_format();
    let vertex_shader = match format {
        VertexFormat::PT => VERTEX_BILLBOARD,
        VertexFormat::PNT if material.requires_texcoords() => VERTEX_PNT,
        VertexFormat::PNT => VERTEX_PN_FROM_PNT,
        VertexFormat::PN => VERTEX_PN,
    };
    let depth = DepthState {
        test_enabled: true,
        write_enabled: !material.is_translucent(),
        bias: material.depth_bias(),
    };
    PipelineKey::new(
        vertex_shader,
        material.pixel_shader(),
        format,
        geometry.topology(),
        depth,
    )
}

fn write_lights(
    writer: &ShaderBufferWriter,
    memory: &mut [u8],
    scene: &SceneGraph,
    max_point_lights: usize,
) -> BackendResult<()> {
    let mut lights = writer.begin(memory)?;
    lights.clear();
    lights
        .value("ambientLight")?
        .get("lightColor")?
        .set(scene.ambient_light())?;
    if let Some((direction, color)) = scene.directional_light() {
        lights
            .value("directionalLight")?
            .get("lightDirection")?
            .set(direction.extend(0.0))?;
        lights.value("directionalLight")?.get("lightColor")?.set(color)?;
    }
    for (index, point) in scene.point_lights(max_point_lights).iter().enumerate() {
        let index = index as u32;
        let light = &point.light;
        let position: Vec3 = point.position;
        lights
            .value("pointLight")?
            .at(index)?
            .get("lightPosition")?
            .set(position.extend(1.0))?;
        lights.value("pointLight")?.at(index)?.get("lightColor")?.set(light.color)?;
        lights
            .value("pointLight")?
            .at(index)?
            .get("constantAttenuation")?
            .set(light.constant_term())?;
        lights
            .value("pointLight")?
            .at(index)?
            .get("linearAttenuation")?
            .set(light.linear_factor())?;
        lights
            .value("pointLight")?
            .at(index)?
            .get("quadraticAttenuation")?
            .set(light.quadratic_factor())?;
    }
    Ok(())
}

fn write_material(
    writer: &ShaderBufferWriter,
    memory: &mut [u8],
    material: &Material,
) -> BackendResult<()> {
    let mut constants = writer.begin(memory)?;
    constants.clear();
    constants.set_parameter("lightMask", &ParameterValue::Int(material.light_mask()))?;
    match material.kind() {
        MaterialKind::SolidColor { color, shininess } => {
            constants.set_parameter("materialColor", &ParameterValue::from(*color))?;
            constants.set_parameter("shininess", &ParameterValue::from(*shininess))?;
        }
        MaterialKind::Texture { opacity, .. } => {
            constants.set_parameter("opacity", &ParameterValue::from(*opacity))?;
        }
        MaterialKind::Custom { parameters, .. } => {
            for (name, value) in parameters {
                if let Err(e) = constants.set_parameter(name, value) {
                    log::warn!("Ignoring material parameter {}: {}", name, e);
                }
            }
        }
    }
    Ok(())
}

/// Bring a material's slot textures in line with its bitmaps.
fn update_material_textures(
    backend: &mut dyn GraphicsBackend,
    textures: &mut TextureCache,
    entry: &mut MaterialEntry,
    material: &Material,
) -> BackendResult<()> {
    for (slot, target) in entry.textures.iter_mut().enumerate() {
        let Some(source) = material.texture_slots().get(slot).and_then(Option::as_ref) else {
            if let Some(old) = target.take() {
                textures.release(backend, old.id);
            }
            continue;
        };
        let key = Arc::as_ptr(&source.bitmap) as usize;
        let immutable = source.flags.contains(TextureFlags::IMMUTABLE);
        if let Some(old) = *target {
            if !old.immutable && !immutable && old.source == key {
                match textures.update(backend, old.id, &source.bitmap) {
                    Ok(()) => continue,
                    Err(e) => log::debug!("Recreating texture of slot {}: {}", slot, e),
                }
            }
            textures.release(backend, old.id);
            *target = None;
        }
        let id = textures.get_or_create(backend, &source.bitmap, source.flags)?;
        *target = Some(SlotTexture {
            id,
            source: key,
            immutable,
        });
    }
    Ok(())
}

fn record_draw(
    context: &mut GraphicsContext3D<'_>,
    pipeline: &mut crate::pipeline::Pipeline,
    parameters: &mut ParameterSet,
    textures: &mut TextureCache,
    geometry: &GeometryBuffers,
) -> BackendResult<()> {
    context.set_pipeline(pipeline)?;
    context.set_shader_parameters(parameters, textures)?;
    context.draw_geometry(geometry)
}

impl GraphicsContent3D for SceneRenderer {
    fn prepare_content(&mut self, backend: &mut dyn GraphicsBackend, extent: Extent) -> BackendResult<()> {
        let generation = backend.device_generation();
        if self.device_generation != Some(generation) {
            if self.device_generation.is_some() {
                log::info!("Device changed, recreating scene resources");
                self.forget_resources();
            }
            self.device_generation = Some(generation);
        }

        let shared = self.scene.clone();
        let mut scene = shared.write();
        scene.update_world_transforms();
        let scene = parking_lot::RwLockWriteGuard::downgrade(scene);

        if self.structure_revision != Some(scene.structure_revision())
            || self.pipeline_state_changed(&scene)
        {
            self.state = RendererState::SceneDirty;
        } else if self.state == RendererState::Clean && self.revision != Some(scene.revision()) {
            self.state = RendererState::FramesDirty;
        }

        if self.state == RendererState::SceneDirty {
            if let Err(e) = self.rebuild(backend, &scene) {
                log::warn!("Scene rebuild aborted, retrying next frame: {}", e);
                return Err(e);
            }
            self.structure_revision = Some(scene.structure_revision());
            self.state = RendererState::FramesDirty;
        }

        self.update_frame(backend, &scene, extent)?;
        self.revision = Some(scene.revision());
        self.state = RendererState::Clean;
        Ok(())
    }

    fn render_content(&mut self, context: &mut GraphicsContext3D<'_>) -> BackendResult<()> {
        if self.state != RendererState::Clean || !self.has_camera {
            return Ok(());
        }
        let Self {
            items,
            pipelines,
            textures,
            geometries,
            ..
        } = self;
        for item in items.iter_mut() {
            let (Some(geometry), Some(pipeline)) =
                (geometries.get(&item.geometry), pipelines.get_mut(item.pipeline))
            else {
                continue;
            };
            let drawn = record_draw(context, pipeline, &mut item.parameters, textures, geometry);
            match drawn {
                Ok(()) => {}
                Err(BackendError::InvalidArgument(reason)) => {
                    log::warn!("Skipping draw of node {:?}: {}", item.node, reason);
                }
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    fn release_resources(&mut self, backend: &mut dyn GraphicsBackend) {
        for item in &mut self.items {
            item.parameters.release(backend);
        }
        self.items.clear();
        self.pipelines.release_all(backend);
        self.textures.release_all(backend);
        if let Some(allocator) = self.allocator.as_mut() {
            allocator.release_all(backend);
        }
        self.allocator = None;
        self.geometries.clear();
        self.materials.clear();
        self.light_buffer = None;
        self.state = RendererState::SceneDirty;
        self.structure_revision = None;
        self.revision = None;
    }

    fn is_dirty(&self) -> bool {
        if self.state != RendererState::Clean {
            return true;
        }
        let scene = self.scene.read();
        self.revision != Some(scene.revision())
            || self.structure_revision != Some(scene.structure_revision())
    }

    fn multisampling(&self) -> u32 {
        self.multisampling
    }

    fn clear_color(&self) -> [f32; 4] {
        self.clear_color
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::dummy::{DummyBackend, RecordedCommand, ResourceKind};
    use crate::resources::Geometry;
    use crate::scene::{Light, Model, Transform};
    use glam::Vec4;

    fn scene_with_camera() -> (Arc<RwLock<SceneGraph>>, MaterialId, GeometryId) {
        let mut scene = SceneGraph::new();
        let root = scene.root();
        scene
            .add_camera(root, Camera::default(), Transform::from_position(Vec3::new(0.0, 0.0, -10.0)))
            .unwrap();
        let geometry = scene.add_geometry(Geometry::cube());
        let material = scene.add_material(Material::solid_color(Vec4::new(1.0, 0.0, 0.0, 1.0)));
        (Arc::new(RwLock::new(scene)), material, geometry)
    }

    fn render(renderer: &mut SceneRenderer, backend: &mut DummyBackend) -> BackendResult<u32> {
        let extent = Extent::new(640, 480);
        renderer.prepare_content(backend, extent)?;
        let cmd = backend.allocate_command_buffer()?;
        let mut context =
            GraphicsContext3D::new(backend, cmd, RenderPassHandle::default(), 1, extent);
        renderer.render_content(&mut context)?;
        Ok(context.draw_count())
    }

    #[test]
    fn opaque_drawn_before_translucent() {
        let (scene, opaque, cube) = scene_with_camera();
        let glass = {
            let mut scene = scene.write();
            let glass = scene.add_material(Material::solid_color(Vec4::new(0.0, 0.0, 1.0, 0.5)));
            let root = scene.root();
            scene
                .add_model(root, Model::new().with_part(cube, glass), Transform::default())
                .unwrap();
            scene
                .add_model(
                    root,
                    Model::new().with_part(cube, opaque),
                    Transform::from_position(Vec3::new(0.0, 0.0, 5.0)),
                )
                .unwrap();
            glass
        };
        let mut backend = DummyBackend::new();
        let mut renderer = SceneRenderer::new(scene, &RendererConfig::default());
        assert_eq!(render(&mut renderer, &mut backend).unwrap(), 2);

        let order: Vec<MaterialId> = renderer.draw_items().iter().map(|item| item.material).collect();
        assert_eq!(order, vec![opaque, glass]);
        assert!(!renderer.is_dirty());
    }

    #[test]
    fn shared_material_uses_one_constant_buffer() {
        let (scene, material, cube) = scene_with_camera();
        {
            let mut scene = scene.write();
            let root = scene.root();
            for x in 0..3 {
                scene
                    .add_model(
                        root,
                        Model::new().with_part(cube, material),
                        Transform::from_position(Vec3::new(x as f32, 0.0, 0.0)),
                    )
                    .unwrap();
            }
        }
        let mut backend = DummyBackend::new();
        let mut renderer = SceneRenderer::new(scene, &RendererConfig::default());
        render(&mut renderer, &mut backend).unwrap();

        let material_buffer = renderer.material_buffer(material).unwrap();
        for item in renderer.draw_items() {
            assert_eq!(
                item.parameters.pixel_shader_parameters(MATERIAL_BINDING),
                Some(&material_buffer)
            );
        }
        assert_eq!(renderer.pipeline_count(), 1);
        assert_eq!(renderer.geometry_buffers(cube).unwrap().index_count, 36);
    }

    #[test]
    fn out_of_memory_retries_next_frame() {
        let (scene, material, cube) = scene_with_camera();
        {
            let mut scene = scene.write();
            let root = scene.root();
            scene
                .add_model(root, Model::new().with_part(cube, material), Transform::default())
                .unwrap();
        }
        let mut backend = DummyBackend::new();
        backend.set_memory_limit(Some(0));
        let mut renderer = SceneRenderer::new(scene, &RendererConfig::default());
        assert_eq!(render(&mut renderer, &mut backend), Err(BackendError::OutOfMemory));
        assert_eq!(renderer.state(), RendererState::SceneDirty);
        assert!(renderer.is_dirty());

        backend.set_memory_limit(None);
        assert_eq!(render(&mut renderer, &mut backend).unwrap(), 1);
        assert_eq!(renderer.state(), RendererState::Clean);
    }

    #[test]
    fn transforms_written_per_frame() {
        let (scene, material, cube) = scene_with_camera();
        let model = {
            let mut scene = scene.write();
            let root = scene.root();
            scene
                .add_model(
                    root,
                    Model::new().with_part(cube, material),
                    Transform::from_position(Vec3::new(1.0, 2.0, 3.0)),
                )
                .unwrap()
        };
        let mut backend = DummyBackend::new();
        let mut renderer = SceneRenderer::new(scene.clone(), &RendererConfig::default());
        render(&mut renderer, &mut backend).unwrap();

        scene
            .write()
            .set_transform(model, Transform::from_position(Vec3::new(4.0, 5.0, 6.0)))
            .unwrap();
        assert!(renderer.is_dirty());
        render(&mut renderer, &mut backend).unwrap();
        assert_eq!(renderer.state(), RendererState::Clean);

        let segment = renderer.draw_items()[0].transform_buffer;
        let contents = backend.buffer_contents(segment.buffer()).unwrap();
        let start = segment.offset() as usize;
        let mut bytes = contents[start..start + segment.size() as usize].to_vec();

        let mut shaders = ShaderLibrary::new();
        let shader = shaders.get(VERTEX_PN, ShaderStage::Vertex).unwrap();
        let writer = ShaderBufferWriter::new(shader.reflection().unwrap(), TRANSFORM_BINDING).unwrap();
        let mut constants = writer.begin(&mut bytes).unwrap();
        let world: Mat4 = constants.read("ModelMatrix").unwrap();
        assert_eq!(world.w_axis.truncate(), Vec3::new(4.0, 5.0, 6.0));
        let camera: Vec4 = constants.read("CameraPosition").unwrap();
        assert_eq!(camera, Vec4::new(0.0, 0.0, -10.0, 1.0));
    }

    #[test]
    fn nothing_drawn_without_camera() {
        let mut scene = SceneGraph::new();
        let root = scene.root();
        let cube = scene.add_geometry(Geometry::cube());
        let material = scene.add_material(Material::solid_color(Vec4::ONE));
        scene
            .add_model(root, Model::new().with_part(cube, material), Transform::default())
            .unwrap();
        scene
            .add_light(root, Light::ambient(Vec4::splat(0.2)), Transform::default())
            .unwrap();
        let mut backend = DummyBackend::new();
        let mut renderer = SceneRenderer::new(Arc::new(RwLock::new(scene)), &RendererConfig::default());
        assert_eq!(render(&mut renderer, &mut backend).unwrap(), 0);
        assert!(!backend.commands().iter().any(RecordedCommand::is_draw));
    }

    #[test]
    fn pipeline_key_per_vertex_format() {
        use crate::resources::{solid_bitmap, TextureFlags};

        let solid = Material::solid_color(Vec4::ONE);
        let textured =
            Material::texture(1.0).with_texture(0, solid_bitmap(2, 2, [255; 4]), TextureFlags::empty());
        let triangle = Geometry::new(
            vec![Vec3::ZERO, Vec3::X, Vec3::Y],
            vec![Vec3::NEG_Z; 3],
            Vec::new(),
            vec![0, 1, 2],
            PrimitiveTopology::TriangleList,
        )
        .unwrap();
        let cube = Geometry::cube();
        let billboard = Geometry::billboard();

        let cases = [
            (&triangle, &solid, VertexFormat::PN, VERTEX_PN),
            (&cube, &solid, VertexFormat::PNT, VERTEX_PN_FROM_PNT),
            (&cube, &textured, VertexFormat::PNT, VERTEX_PNT),
            (&billboard, &textured, VertexFormat::PT, VERTEX_BILLBOARD),
        ];
        for (geometry, material, format, vertex_shader) in cases {
            let key = pipeline_key(geometry, material);
            assert_eq!(key.vertex_format, format);
            assert_eq!(key.vertex_shader, vertex_shader);
            assert_eq!(key.pixel_shader, material.pixel_shader());
            assert_eq!(key.topology, geometry.topology());
        }
    }

    #[test]
    fn release_leaves_nothing_alive() {
        let (scene, material, cube) = scene_with_camera();
        {
            let mut scene = scene.write();
            let root = scene.root();
            scene
                .add_model(root, Model::new().with_part(cube, material), Transform::default())
                .unwrap();
        }
        let mut backend = DummyBackend::new();
        let mut renderer = SceneRenderer::new(scene, &RendererConfig::default());
        render(&mut renderer, &mut backend).unwrap();
        renderer.release_resources(&mut backend);
        for kind in [
            ResourceKind::Buffer,
            ResourceKind::Pipeline,
            ResourceKind::DescriptorSet,
            ResourceKind::Image,
        ] {
            assert_eq!(backend.live_count(kind), 0, "{:?}", kind);
        }
        assert!(renderer.is_dirty());
    }
}
