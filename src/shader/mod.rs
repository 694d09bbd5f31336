//! Shaders, their constant-buffer reflection and the shader library.
//!
//! # Overview
//!
//! - [`Shader`] - SPIR-V bytecode plus lazily loaded [`ShaderReflection`]
//! - [`ShaderBufferWriter`] - typed, name-addressed writes into constant buffers
//! - [`ShaderLibrary`] - resolves shader names through providers and the stock shaders

pub mod library;
pub mod reflection;
pub mod writer;

use std::fmt;
use std::sync::{Arc, OnceLock};

use thiserror::Error;

use crate::backend::{BackendError, ShaderStage};

pub use library::*;
pub use reflection::{ShaderReflection, ShaderTypeInfo, ShaderVariable, ShaderVariableType};
pub use writer::{MappedBuffer, ParameterValue, ShaderBufferWriter, ShaderValue, ValueProxy};

/// Shader loading, reflection and constant-write errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ShaderError {
    #[error("Shader not found: {0}")]
    NotFound(String),
    #[error("Failed to read shader: {0}")]
    Io(String),
    #[error("Failed to parse reflection: {0}")]
    Parse(String),
    #[error("Shader compilation failed: {0}")]
    Compile(String),
    #[error("Unsupported shader type: {0}")]
    UnsupportedType(String),
    #[error("No constant buffer at binding {0}")]
    UnknownBuffer(u32),
    #[error("Unknown shader variable: {0}")]
    UnknownVariable(String),
    #[error("Unknown struct: {0}")]
    UnknownStruct(String),
    #[error("Variable {name} is {expected:?}, not {found:?}")]
    TypeMismatch {
        name: String,
        expected: ShaderVariableType,
        found: ShaderVariableType,
    },
    #[error("Index {index} out of range for {name}[{count}]")]
    IndexOutOfRange { name: String, index: u32, count: u32 },
    #[error("Variable {0} is not an array")]
    NotAnArray(String),
    #[error("Variable {0} is not a struct")]
    NotAStruct(String),
    #[error("{size} bytes at offset {offset} exceed a buffer of {len} bytes")]
    OutOfBounds {
        offset: usize,
        size: usize,
        len: usize,
    },
}

impl From<ShaderError> for BackendError {
    fn from(error: ShaderError) -> Self {
        match error {
            ShaderError::NotFound(_)
            | ShaderError::Io(_)
            | ShaderError::Parse(_)
            | ShaderError::Compile(_)
            | ShaderError::UnsupportedType(_) => {
                BackendError::ShaderCreationFailed(error.to_string())
            }
            _ => BackendError::InvalidArgument(error.to_string()),
        }
    }
}

/// Where a shader's reflection comes from when first requested.
enum ReflectionSource {
    /// IR the bytecode was generated from
    Module(Box<naga::Module>),
    /// Side-car looked up by name, falling back to parsing the bytecode
    Provider(Arc<dyn ShaderProvider>),
    /// Parse the bytecode
    Bytecode,
}

/// Compiled shader bytecode with lazily loaded constant-buffer reflection.
pub struct Shader {
    name: String,
    stage: ShaderStage,
    code: Vec<u32>,
    source: ReflectionSource,
    reflection: OnceLock<Arc<ShaderReflection>>,
}

impl fmt::Debug for Shader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Shader")
            .field("name", &self.name)
            .field("stage", &self.stage)
            .field("words", &self.code.len())
            .finish()
    }
}

impl Shader {
    /// Shader from SPIR-V words; reflection is parsed from the bytecode.
    pub fn from_spirv(name: &str, stage: ShaderStage, code: Vec<u32>) -> Self {
        Self::with_source(name, stage, code, ReflectionSource::Bytecode)
    }

    /// Shader with an already known reflection
    pub fn with_reflection(
        name: &str,
        stage: ShaderStage,
        code: Vec<u32>,
        reflection: ShaderReflection,
    ) -> Self {
        let shader = Self::from_spirv(name, stage, code);
        let _ = shader.reflection.set(Arc::new(reflection));
        shader
    }

    pub(crate) fn from_module(
        name: &str,
        stage: ShaderStage,
        code: Vec<u32>,
        module: naga::Module,
    ) -> Self {
        Self::with_source(name, stage, code, ReflectionSource::Module(Box::new(module)))
    }

    pub(crate) fn from_provider(
        name: &str,
        stage: ShaderStage,
        code: Vec<u32>,
        provider: Arc<dyn ShaderProvider>,
    ) -> Self {
        Self::with_source(name, stage, code, ReflectionSource::Provider(provider))
    }

    fn with_source(name: &str, stage: ShaderStage, code: Vec<u32>, source: ReflectionSource) -> Self {
        Self {
            name: name.to_string(),
            stage,
            code,
            source,
            reflection: OnceLock::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn stage(&self) -> ShaderStage {
        self.stage
    }

    /// SPIR-V words
    pub fn code(&self) -> &[u32] {
        &self.code
    }

    /// Constant-buffer layouts, loaded on first call.
    pub fn reflection(&self) -> Result<Arc<ShaderReflection>, ShaderError> {
        if let Some(reflection) = self.reflection.get() {
            return Ok(reflection.clone());
        }
        let loaded = Arc::new(self.load_reflection()?);
        log::debug!(
            "Loaded reflection of shader '{}' ({} buffers)",
            self.name,
            loaded.buffers.len()
        );
        Ok(self.reflection.get_or_init(|| loaded).clone())
    }

    fn load_reflection(&self) -> Result<ShaderReflection, ShaderError> {
        match &self.source {
            ReflectionSource::Module(module) => ShaderReflection::from_naga(module),
            ReflectionSource::Provider(provider) => match provider.load_reflection(&self.name)? {
                Some(text) => ShaderReflection::from_json(&text),
                None => self.reflect_bytecode(),
            },
            ReflectionSource::Bytecode => self.reflect_bytecode(),
        }
    }

    fn reflect_bytecode(&self) -> Result<ShaderReflection, ShaderError> {
        let options = naga::front::spv::Options::default();
        let module = naga::front::spv::parse_u8_slice(bytemuck::cast_slice(&self.code), &options)
            .map_err(|e| ShaderError::Parse(format!("{}: {}", self.name, e)))?;
        ShaderReflection::from_naga(&module)
    }
}
