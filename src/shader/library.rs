//! Shader lookup by resource name.
//!
//! Names resolve through the registered [`ShaderProvider`]s in order, then through the
//! built-in stock shaders, which are compiled from WGSL on first use:
//!
//! | Name | Stage | Input |
//! |------|-------|-------|
//! | `vertex_pn` | vertex | PN |
//! | `vertex_pnt` | vertex | PNT |
//! | `vertex_pn_from_pnt` | vertex | PNT, texture coordinates dropped |
//! | `vertex_billboard` | vertex | PT, camera facing |
//! | `pixel_solid_color` | pixel | |
//! | `pixel_texture` | pixel | |

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::RwLock;

use crate::backend::ShaderStage;
use crate::config::RendererConfig;

use super::{Shader, ShaderError};

pub const VERTEX_PN: &str = "vertex_pn";
pub const VERTEX_PNT: &str = "vertex_pnt";
pub const VERTEX_PN_FROM_PNT: &str = "vertex_pn_from_pnt";
pub const VERTEX_BILLBOARD: &str = "vertex_billboard";
pub const PIXEL_SOLID_COLOR: &str = "pixel_solid_color";
pub const PIXEL_TEXTURE: &str = "pixel_texture";

/// Entry point of every stock shader
pub const ENTRY_POINT: &str = "main";

const TRANSFORM_MODULE: &str = include_str!("../../shaders/stock/transform.wgsl");
const LIGHTING_MODULE: &str = include_str!("../../shaders/stock/lighting.wgsl");

const STOCK_SHADERS: &[(&str, ShaderStage, &str)] = &[
    (
        VERTEX_PN,
        ShaderStage::Vertex,
        include_str!("../../shaders/stock/vertex_pn.wgsl"),
    ),
    (
        VERTEX_PNT,
        ShaderStage::Vertex,
        include_str!("../../shaders/stock/vertex_pnt.wgsl"),
    ),
    (
        VERTEX_PN_FROM_PNT,
        ShaderStage::Vertex,
        include_str!("../../shaders/stock/vertex_pn_from_pnt.wgsl"),
    ),
    (
        VERTEX_BILLBOARD,
        ShaderStage::Vertex,
        include_str!("../../shaders/stock/vertex_billboard.wgsl"),
    ),
    (
        PIXEL_SOLID_COLOR,
        ShaderStage::Pixel,
        include_str!("../../shaders/stock/pixel_solid_color.wgsl"),
    ),
    (
        PIXEL_TEXTURE,
        ShaderStage::Pixel,
        include_str!("../../shaders/stock/pixel_texture.wgsl"),
    ),
];

/// Source of compiled shaders and their reflection side-cars.
pub trait ShaderProvider: Send + Sync {
    /// SPIR-V words of `name`, or `None` if this provider does not know it
    fn load_code(&self, name: &str) -> Result<Option<Vec<u32>>, ShaderError>;

    /// JSON reflection side-car of `name`, if any
    fn load_reflection(&self, name: &str) -> Result<Option<String>, ShaderError>;
}

/// Directory of `<name>.spv` files with optional `<name>.json` side-cars.
#[derive(Debug, Clone)]
pub struct FileShaderProvider {
    directory: PathBuf,
}

impl FileShaderProvider {
    pub fn new(directory: impl Into<PathBuf>) -> Self {
        Self {
            directory: directory.into(),
        }
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }
}

impl ShaderProvider for FileShaderProvider {
    fn load_code(&self, name: &str) -> Result<Option<Vec<u32>>, ShaderError> {
        let path = self.directory.join(format!("{}.spv", name));
        if !path.exists() {
            return Ok(None);
        }
        let bytes = std::fs::read(&path)
            .map_err(|e| ShaderError::Io(format!("{}: {}", path.display(), e)))?;
        spirv_words(&bytes)
            .map(Some)
            .map_err(|e| ShaderError::Io(format!("{}: {}", path.display(), e)))
    }

    fn load_reflection(&self, name: &str) -> Result<Option<String>, ShaderError> {
        let path = self.directory.join(format!("{}.json", name));
        if !path.exists() {
            return Ok(None);
        }
        std::fs::read_to_string(&path)
            .map(Some)
            .map_err(|e| ShaderError::Io(format!("{}: {}", path.display(), e)))
    }
}

/// Reinterpret little-endian bytes as SPIR-V words
pub fn spirv_words(bytes: &[u8]) -> Result<Vec<u32>, String> {
    if bytes.len() % 4 != 0 {
        return Err(format!("{} bytes is not a whole number of words", bytes.len()));
    }
    Ok(bytes
        .chunks_exact(4)
        .map(|chunk| u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect())
}

/// Shaders registered at runtime.
#[derive(Default)]
pub struct MemoryShaderProvider {
    shaders: RwLock<HashMap<String, (Vec<u32>, Option<String>)>>,
}

impl MemoryShaderProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, name: &str, code: Vec<u32>, reflection: Option<String>) {
        self.shaders
            .write()
            .insert(name.to_string(), (code, reflection));
    }
}

impl ShaderProvider for MemoryShaderProvider {
    fn load_code(&self, name: &str) -> Result<Option<Vec<u32>>, ShaderError> {
        Ok(self.shaders.read().get(name).map(|(code, _)| code.clone()))
    }

    fn load_reflection(&self, name: &str) -> Result<Option<String>, ShaderError> {
        Ok(self
            .shaders
            .read()
            .get(name)
            .and_then(|(_, reflection)| reflection.clone()))
    }
}

/// Compile WGSL to SPIR-V, returning the validated module alongside the words.
pub fn compile_wgsl(
    name: &str,
    source: &str,
    stage: ShaderStage,
) -> Result<(Vec<u32>, naga::Module), ShaderError> {
    use naga::back::spv;
    use naga::valid::{Capabilities, ValidationFlags, Validator};

    let module = naga::front::wgsl::parse_str(source)
        .map_err(|e| ShaderError::Compile(format!("{}: {}", name, e.emit_to_string(source))))?;

    let mut validator = Validator::new(ValidationFlags::all(), Capabilities::all());
    let info = validator
        .validate(&module)
        .map_err(|e| ShaderError::Compile(format!("{}: {:?}", name, e)))?;

    let options = spv::Options {
        lang_version: (1, 3),
        flags: spv::WriterFlags::empty(),
        capabilities: None,
        bounds_check_policies: Default::default(),
        binding_map: Default::default(),
        debug_info: None,
        zero_initialize_workgroup_memory: spv::ZeroInitializeWorkgroupMemoryMode::None,
    };
    let pipeline_options = spv::PipelineOptions {
        shader_stage: match stage {
            ShaderStage::Vertex => naga::ShaderStage::Vertex,
            ShaderStage::Pixel => naga::ShaderStage::Fragment,
        },
        entry_point: ENTRY_POINT.to_string(),
    };
    let code = spv::write_vec(&module, &info, &options, Some(&pipeline_options))
        .map_err(|e| ShaderError::Compile(format!("{}: {:?}", name, e)))?;
    Ok((code, module))
}

/// Full WGSL source of a stock shader, with the shared modules prepended.
pub fn stock_shader_source(name: &str) -> Option<(ShaderStage, String)> {
    let (_, stage, body) = STOCK_SHADERS.iter().find(|(stock, _, _)| *stock == name)?;
    let source = match stage {
        ShaderStage::Vertex => format!("{}\n{}", TRANSFORM_MODULE, body),
        ShaderStage::Pixel => format!("{}\n{}\n{}", TRANSFORM_MODULE, LIGHTING_MODULE, body),
    };
    Some((*stage, source))
}

/// Names of all stock shaders
pub fn stock_shader_names() -> impl Iterator<Item = &'static str> {
    STOCK_SHADERS.iter().map(|(name, _, _)| *name)
}

/// Resolves shader names to compiled [`Shader`]s and caches them.
pub struct ShaderLibrary {
    providers: Vec<Arc<dyn ShaderProvider>>,
    shaders: HashMap<String, Arc<Shader>>,
}

impl ShaderLibrary {
    /// Library with only the stock shaders
    pub fn new() -> Self {
        Self {
            providers: Vec::new(),
            shaders: HashMap::new(),
        }
    }

    /// Library looking into the configured shader directory first
    pub fn from_config(config: &RendererConfig) -> Self {
        let mut library = Self::new();
        if let Some(directory) = &config.shader_directory {
            library.add_provider(Arc::new(FileShaderProvider::new(directory)));
        }
        library
    }

    pub fn add_provider(&mut self, provider: Arc<dyn ShaderProvider>) {
        self.providers.push(provider);
    }

    pub fn with_provider(mut self, provider: Arc<dyn ShaderProvider>) -> Self {
        self.add_provider(provider);
        self
    }

    /// Add an already built shader, replacing one of the same name.
    pub fn insert(&mut self, shader: Shader) -> Arc<Shader> {
        let shader = Arc::new(shader);
        self.shaders.insert(shader.name().to_string(), shader.clone());
        shader
    }

    /// Resolve `name` for `stage`.
    pub fn get(&mut self, name: &str, stage: ShaderStage) -> Result<Arc<Shader>, ShaderError> {
        if let Some(shader) = self.shaders.get(name) {
            if shader.stage() != stage {
                return Err(ShaderError::NotFound(format!(
                    "{} is a {:?} shader",
                    name,
                    shader.stage()
                )));
            }
            return Ok(shader.clone());
        }

        let shader = self.load(name, stage)?;
        Ok(self.insert(shader))
    }

    fn load(&self, name: &str, stage: ShaderStage) -> Result<Shader, ShaderError> {
        for provider in &self.providers {
            if let Some(code) = provider.load_code(name)? {
                log::debug!("Loaded shader '{}' ({} words)", name, code.len());
                return Ok(Shader::from_provider(name, stage, code, provider.clone()));
            }
        }

        let (stock_stage, source) =
            stock_shader_source(name).ok_or_else(|| ShaderError::NotFound(name.to_string()))?;
        if stock_stage != stage {
            return Err(ShaderError::NotFound(format!(
                "{} is a {:?} shader",
                name, stock_stage
            )));
        }
        let (code, module) = compile_wgsl(name, &source, stage)?;
        log::debug!("Compiled stock shader '{}' ({} words)", name, code.len());
        Ok(Shader::from_module(name, stage, code, module))
    }

    pub fn len(&self) -> usize {
        self.shaders.len()
    }

    pub fn is_empty(&self) -> bool {
        self.shaders.is_empty()
    }
}

impl Default for ShaderLibrary {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{LIGHT_BINDING, MATERIAL_BINDING, TRANSFORM_BINDING};
    use crate::shader::ShaderVariableType;

    #[test]
    fn stock_shaders_compile() {
        let mut library = ShaderLibrary::new();
        for name in stock_shader_names() {
            let (stage, _) = stock_shader_source(name).unwrap();
            let shader = library.get(name, stage).unwrap();
            assert_eq!(shader.code()[0], 0x0723_0203, "{} is not SPIR-V", name);
        }
        assert_eq!(library.len(), 6);
    }

    #[test]
    fn transform_layout_is_reflected() {
        let mut library = ShaderLibrary::new();
        let shader = library.get(VERTEX_PNT, ShaderStage::Vertex).unwrap();
        let reflection = shader.reflection().unwrap();
        let transform = reflection.buffer(TRANSFORM_BINDING).unwrap();
        assert_eq!(transform.size, 272);
        assert_eq!(transform.member("ModelViewMatrix").unwrap().offset, 64);
        assert_eq!(transform.member("NormalMatrix").unwrap().offset, 192);
        assert_eq!(
            transform.member("CameraPosition").unwrap().ty,
            ShaderVariableType::Float4
        );
    }

    #[test]
    fn material_and_light_layouts_are_reflected() {
        let mut library = ShaderLibrary::new();
        let shader = library.get(PIXEL_SOLID_COLOR, ShaderStage::Pixel).unwrap();
        let reflection = shader.reflection().unwrap();

        let material = reflection.buffer(MATERIAL_BINDING).unwrap();
        assert_eq!(material.member("lightMask").unwrap().ty, ShaderVariableType::Int);
        assert_eq!(material.member("materialColor").unwrap().offset, 16);
        assert_eq!(material.member("shininess").unwrap().offset, 32);

        let lights = reflection.buffer(LIGHT_BINDING).unwrap();
        let points = lights.member("pointLight").unwrap();
        assert_eq!(points.array_elements, 8);
        assert_eq!(points.array_stride, 48);
        assert_eq!(lights.size, 48 + 8 * 48);
    }

    #[test]
    fn stage_mismatch_and_unknown_names_fail() {
        let mut library = ShaderLibrary::new();
        assert!(library.get(PIXEL_TEXTURE, ShaderStage::Vertex).is_err());
        assert!(matches!(
            library.get("pixel_unknown", ShaderStage::Pixel),
            Err(ShaderError::NotFound(_))
        ));
    }

    #[test]
    fn memory_provider_takes_precedence() {
        let provider = Arc::new(MemoryShaderProvider::new());
        let side_car = r#"{ "buffers": [ { "name": "glow", "binding": 1, "size": 16,
            "members": [ { "name": "intensity", "type": "float", "offset": 0 } ] } ] }"#;
        provider.register(PIXEL_SOLID_COLOR, vec![0x0723_0203, 0], Some(side_car.into()));
        let mut library = ShaderLibrary::new().with_provider(provider);
        let shader = library.get(PIXEL_SOLID_COLOR, ShaderStage::Pixel).unwrap();
        assert_eq!(shader.code().len(), 2);
        let reflection = shader.reflection().unwrap();
        assert!(reflection.buffer(1).unwrap().member("intensity").is_some());
    }

    #[test]
    fn spirv_words_require_whole_words() {
        assert_eq!(spirv_words(&[3, 2, 35, 7]).unwrap(), vec![0x0723_0203]);
        assert!(spirv_words(&[1, 2, 3]).is_err());
    }
}
