//! Backend-agnostic drawing handle passed to 3D content

use crate::backend::*;
use crate::pipeline::{ParameterSet, Pipeline};
use crate::resources::{GeometryBuffers, TextureCache};

/// Records draw commands into an open render pass.
///
/// Draws are validated against the bound state and rejected with
/// [`BackendError::InvalidArgument`] instead of recording malformed commands.
pub struct GraphicsContext3D<'a> {
    backend: &'a mut dyn GraphicsBackend,
    command_buffer: CommandBufferHandle,
    render_pass: RenderPassHandle,
    samples: u32,
    extent: Extent,
    pipeline: Option<(PipelineHandle, VertexFormat)>,
    parameters_bound: bool,
    draw_count: u32,
}

impl<'a> GraphicsContext3D<'a> {
    /// Context for `command_buffer`, inside a pass begun on `render_pass`.
    pub fn new(
        backend: &'a mut dyn GraphicsBackend,
        command_buffer: CommandBufferHandle,
        render_pass: RenderPassHandle,
        samples: u32,
        extent: Extent,
    ) -> Self {
        Self {
            backend,
            command_buffer,
            render_pass,
            samples,
            extent,
            pipeline: None,
            parameters_bound: false,
            draw_count: 0,
        }
    }

    pub fn backend(&mut self) -> &mut dyn GraphicsBackend {
        &mut *self.backend
    }

    pub fn extent(&self) -> Extent {
        self.extent
    }

    pub fn samples(&self) -> u32 {
        self.samples
    }

    pub fn render_pass(&self) -> RenderPassHandle {
        self.render_pass
    }

    /// Draw calls recorded so far
    pub fn draw_count(&self) -> u32 {
        self.draw_count
    }

    /// Bind the native instance of `pipeline` matching this pass.
    pub fn set_pipeline(&mut self, pipeline: &mut Pipeline) -> BackendResult<()> {
        self.pipeline = None;
        let handle = pipeline.get_pipeline(self.backend, self.render_pass, self.samples)?;
        self.backend.cmd_bind_pipeline(self.command_buffer, handle);
        self.pipeline = Some((handle, pipeline.vertex_format()));
        Ok(())
    }

    /// Flush pending binding changes of `parameters` and bind its descriptor set.
    pub fn set_shader_parameters(
        &mut self,
        parameters: &mut ParameterSet,
        textures: &mut TextureCache,
    ) -> BackendResult<()> {
        self.parameters_bound = false;
        let set = parameters.flush(self.backend, textures)?;
        self.backend.cmd_bind_descriptor_set(self.command_buffer, set);
        self.parameters_bound = true;
        Ok(())
    }

    /// Draw a GPU-resident geometry with the bound pipeline and parameters.
    pub fn draw_geometry(&mut self, geometry: &GeometryBuffers) -> BackendResult<()> {
        let Some((_, format)) = self.pipeline else {
            return Err(BackendError::InvalidArgument("draw without a pipeline".into()));
        };
        if !self.parameters_bound {
            return Err(BackendError::InvalidArgument(
                "draw without shader parameters".into(),
            ));
        }
        if geometry.vertex_count == 0 {
            return Err(BackendError::InvalidArgument("draw without vertices".into()));
        }
        if geometry.format != format {
            return Err(BackendError::InvalidArgument(format!(
                "vertex format {:?} does not match pipeline format {:?}",
                geometry.format, format
            )));
        }

        let vertices = &geometry.vertices;
        self.backend
            .cmd_bind_vertex_buffer(self.command_buffer, vertices.buffer(), 0);
        let first_vertex = vertices.first_element();

        match &geometry.indices {
            Some(indices) if geometry.index_count > 0 => {
                self.backend.cmd_bind_index_buffer(
                    self.command_buffer,
                    indices.buffer(),
                    0,
                    IndexFormat::Uint16,
                );
                self.backend.cmd_draw_indexed(
                    self.command_buffer,
                    geometry.index_count,
                    indices.first_element(),
                    first_vertex as i32,
                );
            }
            _ => {
                self.backend
                    .cmd_draw(self.command_buffer, geometry.vertex_count, first_vertex);
            }
        }
        self.draw_count += 1;
        Ok(())
    }
}

/// Content rendered into a 3D surface once per frame.
pub trait GraphicsContent3D {
    /// Create or refresh GPU resources before the render pass starts.
    fn prepare_content(&mut self, backend: &mut dyn GraphicsBackend, extent: Extent) -> BackendResult<()>;

    /// Record the content's draw calls.
    fn render_content(&mut self, context: &mut GraphicsContext3D<'_>) -> BackendResult<()>;

    /// Destroy every GPU resource the content owns.
    fn release_resources(&mut self, backend: &mut dyn GraphicsBackend);

    /// Whether the next frame would differ from the last rendered one
    fn is_dirty(&self) -> bool;

    /// Requested multisample count
    fn multisampling(&self) -> u32 {
        1
    }

    fn clear_color(&self) -> [f32; 4] {
        [0.0, 0.0, 0.0, 0.0]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::dummy::{DummyBackend, RecordedCommand};
    use crate::resources::{BufferAllocator, Geometry};
    use crate::shader::Shader;
    use std::sync::Arc;

    fn pipeline(format: VertexFormat) -> Pipeline {
        let mut pipeline = Pipeline::new();
        pipeline.set_vertex_shader(Arc::new(Shader::from_spirv("v", ShaderStage::Vertex, vec![1])));
        pipeline.set_pixel_shader(Arc::new(Shader::from_spirv("p", ShaderStage::Pixel, vec![1])));
        pipeline.set_vertex_format(format);
        pipeline
    }

    #[test]
    fn draw_computes_first_vertex_and_index() {
        let mut backend = DummyBackend::new();
        let mut allocator = BufferAllocator::new(64 * 1024, 256);
        let mut textures = TextureCache::new();
        let cube = Geometry::cube();
        let first = cube
            .upload(&mut backend, &mut allocator, VertexFormat::PNT)
            .unwrap();
        let second = cube
            .upload(&mut backend, &mut allocator, VertexFormat::PNT)
            .unwrap();
        let mut pipeline = pipeline(VertexFormat::PNT);
        let mut parameters = ParameterSet::new();

        let cmd = backend.allocate_command_buffer().unwrap();
        let mut context = GraphicsContext3D::new(
            &mut backend,
            cmd,
            RenderPassHandle::default(),
            1,
            Extent::new(64, 64),
        );
        context.set_pipeline(&mut pipeline).unwrap();
        context
            .set_shader_parameters(&mut parameters, &mut textures)
            .unwrap();
        context.draw_geometry(&first).unwrap();
        context.draw_geometry(&second).unwrap();
        assert_eq!(context.draw_count(), 2);

        let draws = backend.draw_calls();
        assert_eq!(
            draws[1],
            RecordedCommand::DrawIndexed {
                index_count: 36,
                first_index: 40,
                vertex_offset: 24,
            }
        );
    }

    #[test]
    fn draw_without_pipeline_is_rejected() {
        let mut backend = DummyBackend::new();
        let mut allocator = BufferAllocator::new(1024, 256);
        let geometry = Geometry::billboard()
            .upload(&mut backend, &mut allocator, VertexFormat::PT)
            .unwrap();
        let cmd = backend.allocate_command_buffer().unwrap();
        let mut context =
            GraphicsContext3D::new(&mut backend, cmd, RenderPassHandle::default(), 1, Extent::new(1, 1));
        assert!(matches!(
            context.draw_geometry(&geometry),
            Err(BackendError::InvalidArgument(_))
        ));

        let mut pipeline = pipeline(VertexFormat::PN);
        let mut textures = TextureCache::new();
        context.set_pipeline(&mut pipeline).unwrap();
        context
            .set_shader_parameters(&mut ParameterSet::new(), &mut textures)
            .unwrap();
        assert!(matches!(
            context.draw_geometry(&geometry),
            Err(BackendError::InvalidArgument(_))
        ));
        assert!(backend.draw_calls().is_empty());
    }
}
