//! Pipeline state caching
//!
//! A logical [`Pipeline`] describes shaders plus fixed-function state. It owns one native
//! pipeline per (render pass, sample count) it has been requested for, so a single logical
//! pipeline serves several render targets and survives multisample changes without
//! redundant rebuilds. [`PipelineCache`] deduplicates logical pipelines by [`PipelineKey`].

pub mod parameter_set;

pub use parameter_set::ParameterSet;

use std::collections::HashMap;
use std::sync::Arc;

use crate::backend::*;
use crate::shader::{Shader, ShaderLibrary};

/// Native pipeline built for one render pass configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct PipelineInstance {
    render_pass: RenderPassHandle,
    samples: u32,
    handle: PipelineHandle,
}

/// Logical pipeline state object.
#[derive(Debug)]
pub struct Pipeline {
    vertex_shader: Option<Arc<Shader>>,
    pixel_shader: Option<Arc<Shader>>,
    vertex_format: VertexFormat,
    topology: PrimitiveTopology,
    fill_mode: FillMode,
    depth: DepthState,
    changed: bool,
    modules: Option<(ShaderModuleHandle, ShaderModuleHandle)>,
    instances: Vec<PipelineInstance>,
}

impl Pipeline {
    pub fn new() -> Self {
        Self {
            vertex_shader: None,
            pixel_shader: None,
            vertex_format: VertexFormat::PN,
            topology: PrimitiveTopology::TriangleList,
            fill_mode: FillMode::Solid,
            depth: DepthState::default(),
            changed: false,
            modules: None,
            instances: Vec::new(),
        }
    }

    pub fn set_vertex_shader(&mut self, shader: Arc<Shader>) {
        if !self.vertex_shader.as_ref().is_some_and(|s| Arc::ptr_eq(s, &shader)) {
            self.vertex_shader = Some(shader);
            self.changed = true;
        }
    }

    pub fn set_pixel_shader(&mut self, shader: Arc<Shader>) {
        if !self.pixel_shader.as_ref().is_some_and(|s| Arc::ptr_eq(s, &shader)) {
            self.pixel_shader = Some(shader);
            self.changed = true;
        }
    }

    pub fn set_vertex_format(&mut self, format: VertexFormat) {
        if self.vertex_format != format {
            self.vertex_format = format;
            self.changed = true;
        }
    }

    pub fn set_topology(&mut self, topology: PrimitiveTopology) {
        if self.topology != topology {
            self.topology = topology;
            self.changed = true;
        }
    }

    pub fn set_fill_mode(&mut self, fill_mode: FillMode) {
        if self.fill_mode != fill_mode {
            self.fill_mode = fill_mode;
            self.changed = true;
        }
    }

    pub fn set_depth_state(&mut self, depth: DepthState) {
        if self.depth != depth {
            self.depth = depth;
            self.changed = true;
        }
    }

    pub fn vertex_format(&self) -> VertexFormat {
        self.vertex_format
    }

    pub fn topology(&self) -> PrimitiveTopology {
        self.topology
    }

    pub fn depth_state(&self) -> DepthState {
        self.depth
    }

    pub fn is_changed(&self) -> bool {
        self.changed
    }

    /// Native pipelines currently alive
    pub fn instance_count(&self) -> usize {
        self.instances.len()
    }

    /// Native pipeline for `render_pass` at `samples`, built on first request.
    ///
    /// Pending property changes drop every existing instance first.
    pub fn get_pipeline(
        &mut self,
        backend: &mut dyn GraphicsBackend,
        render_pass: RenderPassHandle,
        samples: u32,
    ) -> BackendResult<PipelineHandle> {
        if self.changed {
            self.release(backend);
            self.changed = false;
        }
        if let Some(instance) = self
            .instances
            .iter()
            .find(|i| i.render_pass == render_pass && i.samples == samples)
        {
            return Ok(instance.handle);
        }

        let (vertex_module, pixel_module) = self.modules(backend)?;
        let desc = PipelineDescriptor {
            vertex_shader: vertex_module,
            pixel_shader: pixel_module,
            vertex_format: self.vertex_format,
            topology: self.topology,
            fill_mode: self.fill_mode,
            depth: self.depth,
        };
        let handle = backend.create_pipeline(&desc, render_pass, samples)?;
        log::debug!(
            "Created pipeline {:?}/{:?} for {} samples",
            self.vertex_format,
            self.topology,
            samples
        );
        self.instances.push(PipelineInstance {
            render_pass,
            samples,
            handle,
        });
        Ok(handle)
    }

    fn modules(
        &mut self,
        backend: &mut dyn GraphicsBackend,
    ) -> BackendResult<(ShaderModuleHandle, ShaderModuleHandle)> {
        if let Some(modules) = self.modules {
            return Ok(modules);
        }
        let (Some(vertex_shader), Some(pixel_shader)) = (&self.vertex_shader, &self.pixel_shader)
        else {
            return Err(BackendError::InvalidArgument(
                "pipeline is missing a shader".into(),
            ));
        };
        let vertex = backend.create_shader_module(ShaderStage::Vertex, vertex_shader.code())?;
        let pixel = match backend.create_shader_module(ShaderStage::Pixel, pixel_shader.code()) {
            Ok(pixel) => pixel,
            Err(e) => {
                backend.destroy_shader_module(vertex);
                return Err(e);
            }
        };
        self.modules = Some((vertex, pixel));
        Ok((vertex, pixel))
    }

    /// Destroy all native instances and shader modules
    pub fn release(&mut self, backend: &mut dyn GraphicsBackend) {
        for instance in self.instances.drain(..) {
            backend.destroy_pipeline(instance.handle);
        }
        if let Some((vertex, pixel)) = self.modules.take() {
            backend.destroy_shader_module(vertex);
            backend.destroy_shader_module(pixel);
        }
    }

    /// Drop native handles without destroying them, after the device was recreated.
    pub fn forget(&mut self) {
        self.instances.clear();
        self.modules = None;
    }
}

impl Default for Pipeline {
    fn default() -> Self {
        Self::new()
    }
}

/// Identity of a logical pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PipelineKey {
    pub vertex_shader: String,
    pub pixel_shader: String,
    pub vertex_format: VertexFormat,
    pub topology: PrimitiveTopology,
    pub fill_mode: FillMode,
    pub depth_test: bool,
    pub depth_write: bool,
    depth_bias_bits: u32,
}

impl PipelineKey {
    pub fn new(
        vertex_shader: &str,
        pixel_shader: &str,
        vertex_format: VertexFormat,
        topology: PrimitiveTopology,
        depth: DepthState,
    ) -> Self {
        Self {
            vertex_shader: vertex_shader.to_string(),
            pixel_shader: pixel_shader.to_string(),
            vertex_format,
            topology,
            fill_mode: FillMode::Solid,
            depth_test: depth.test_enabled,
            depth_write: depth.write_enabled,
            depth_bias_bits: depth.bias.to_bits(),
        }
    }

    pub fn depth_state(&self) -> DepthState {
        DepthState {
            test_enabled: self.depth_test,
            write_enabled: self.depth_write,
            bias: f32::from_bits(self.depth_bias_bits),
        }
    }
}

/// Index of a logical pipeline inside a [`PipelineCache`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PipelineId(usize);

/// Deduplicated logical pipelines.
#[derive(Default)]
pub struct PipelineCache {
    pipelines: Vec<Pipeline>,
    index: HashMap<PipelineKey, PipelineId>,
}

impl PipelineCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Logical pipeline for `key`, resolving its shaders through `library` on first use.
    pub fn get_or_create(
        &mut self,
        library: &mut ShaderLibrary,
        key: &PipelineKey,
    ) -> BackendResult<PipelineId> {
        if let Some(id) = self.index.get(key) {
            return Ok(*id);
        }
        let mut pipeline = Pipeline::new();
        pipeline.set_vertex_shader(library.get(&key.vertex_shader, ShaderStage::Vertex)?);
        pipeline.set_pixel_shader(library.get(&key.pixel_shader, ShaderStage::Pixel)?);
        pipeline.set_vertex_format(key.vertex_format);
        pipeline.set_topology(key.topology);
        pipeline.set_fill_mode(key.fill_mode);
        pipeline.set_depth_state(key.depth_state());

        let id = PipelineId(self.pipelines.len());
        self.pipelines.push(pipeline);
        self.index.insert(key.clone(), id);
        Ok(id)
    }

    pub fn get(&self, id: PipelineId) -> Option<&Pipeline> {
        self.pipelines.get(id.0)
    }

    pub fn get_mut(&mut self, id: PipelineId) -> Option<&mut Pipeline> {
        self.pipelines.get_mut(id.0)
    }

    pub fn len(&self) -> usize {
        self.pipelines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pipelines.is_empty()
    }

    /// Destroy every native pipeline and forget all logical ones
    pub fn release_all(&mut self, backend: &mut dyn GraphicsBackend) {
        for pipeline in &mut self.pipelines {
            pipeline.release(backend);
        }
        self.pipelines.clear();
        self.index.clear();
    }

    pub fn forget(&mut self) {
        self.pipelines.clear();
        self.index.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::dummy::{DummyBackend, ResourceKind};
    use crate::shader::{PIXEL_SOLID_COLOR, VERTEX_PN};

    fn shader(name: &str, stage: ShaderStage) -> Arc<Shader> {
        Arc::new(Shader::from_spirv(name, stage, vec![0x0723_0203, 1, 2]))
    }

    fn pipeline() -> Pipeline {
        let mut pipeline = Pipeline::new();
        pipeline.set_vertex_shader(shader("v", ShaderStage::Vertex));
        pipeline.set_pixel_shader(shader("p", ShaderStage::Pixel));
        pipeline
    }

    #[test]
    fn same_configuration_returns_same_handle() {
        let mut backend = DummyBackend::new();
        let mut pipeline = pipeline();
        let pass = RenderPassHandle(7);
        let a = pipeline.get_pipeline(&mut backend, pass, 4).unwrap();
        let b = pipeline.get_pipeline(&mut backend, pass, 4).unwrap();
        assert_eq!(a, b);
        let c = pipeline.get_pipeline(&mut backend, pass, 1).unwrap();
        assert_ne!(a, c);
        assert_eq!(pipeline.instance_count(), 2);
        assert_eq!(backend.live_count(ResourceKind::Pipeline), 2);
    }

    #[test]
    fn property_change_rebuilds_instances() {
        let mut backend = DummyBackend::new();
        let mut pipeline = pipeline();
        let pass = RenderPassHandle(7);
        let a = pipeline.get_pipeline(&mut backend, pass, 4).unwrap();
        pipeline.get_pipeline(&mut backend, pass, 1).unwrap();

        pipeline.set_topology(PrimitiveTopology::TriangleList);
        assert!(!pipeline.is_changed());
        pipeline.set_topology(PrimitiveTopology::TriangleStrip);
        let b = pipeline.get_pipeline(&mut backend, pass, 4).unwrap();
        assert_ne!(a, b);
        assert_eq!(pipeline.instance_count(), 1);
        assert_eq!(backend.live_count(ResourceKind::Pipeline), 1);
        assert_eq!(
            backend.pipeline_descriptor(b).unwrap().topology,
            PrimitiveTopology::TriangleStrip
        );

        pipeline.release(&mut backend);
        assert_eq!(backend.live_count(ResourceKind::Pipeline), 0);
        assert_eq!(backend.live_count(ResourceKind::ShaderModule), 0);
    }

    #[test]
    fn missing_shader_is_invalid() {
        let mut backend = DummyBackend::new();
        let mut pipeline = Pipeline::new();
        pipeline.set_vertex_shader(shader("v", ShaderStage::Vertex));
        assert!(matches!(
            pipeline.get_pipeline(&mut backend, RenderPassHandle(1), 1),
            Err(BackendError::InvalidArgument(_))
        ));
    }

    #[test]
    fn cache_deduplicates_keys() {
        let mut library = ShaderLibrary::new();
        let mut cache = PipelineCache::new();
        let key = PipelineKey::new(
            VERTEX_PN,
            PIXEL_SOLID_COLOR,
            VertexFormat::PN,
            PrimitiveTopology::TriangleList,
            DepthState::default(),
        );
        let a = cache.get_or_create(&mut library, &key).unwrap();
        let b = cache.get_or_create(&mut library, &key).unwrap();
        assert_eq!(a, b);

        let biased = PipelineKey::new(
            VERTEX_PN,
            PIXEL_SOLID_COLOR,
            VertexFormat::PN,
            PrimitiveTopology::TriangleList,
            DepthState {
                bias: 2.0,
                ..Default::default()
            },
        );
        let c = cache.get_or_create(&mut library, &biased).unwrap();
        assert_ne!(a, c);
        assert_eq!(cache.get(c).unwrap().depth_state().bias, 2.0);
        assert_eq!(cache.len(), 2);
    }
}
