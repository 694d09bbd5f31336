//! Renderer configuration
//!
//! Loaded from TOML; every field has a default so partial files are accepted.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::backend::{BackendError, BackendResult};
use crate::scene::MAX_POINT_LIGHT_COUNT;

/// Configuration shared by the backend, render target and scene renderer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RendererConfig {
    /// Smallest backing buffer the allocator creates for vertex, index and staging pools
    pub min_block_size: u64,
    /// Requested multisample count for 3D surfaces; clamped to what the device supports
    pub multisampling: u32,
    /// Point lights written to the light buffer, at most [`MAX_POINT_LIGHT_COUNT`]
    pub max_point_lights: usize,
    /// Enable the Vulkan validation layer and debug messenger
    pub validation: bool,
    pub vsync: bool,
    /// Upper bound for a single fence or acquire wait
    pub fence_timeout_ms: u64,
    /// Upper bound for waiting on device idle before tearing down resources
    pub idle_timeout_ms: u64,
    pub clear_color: [f32; 4],
    /// Directory holding `<name>.spv` shaders and `<name>.json` reflection side-cars
    pub shader_directory: Option<PathBuf>,
}

impl Default for RendererConfig {
    fn default() -> Self {
        Self {
            min_block_size: 64 * 1024,
            multisampling: 4,
            max_point_lights: MAX_POINT_LIGHT_COUNT,
            validation: cfg!(debug_assertions),
            vsync: true,
            fence_timeout_ms: 1000,
            idle_timeout_ms: 2000,
            clear_color: [0.0, 0.0, 0.0, 0.0],
            shader_directory: None,
        }
    }
}

impl RendererConfig {
    /// Parse a configuration from TOML text
    pub fn from_toml_str(text: &str) -> BackendResult<Self> {
        let mut config: RendererConfig = toml::from_str(text)
            .map_err(|e| BackendError::InitializationFailed(format!("invalid config: {}", e)))?;
        if config.max_point_lights > MAX_POINT_LIGHT_COUNT {
            log::warn!(
                "max_point_lights {} exceeds {}, clamping",
                config.max_point_lights,
                MAX_POINT_LIGHT_COUNT
            );
            config.max_point_lights = MAX_POINT_LIGHT_COUNT;
        }
        config.multisampling = config.multisampling.max(1);
        Ok(config)
    }

    /// Load a configuration file
    pub fn load(path: impl AsRef<Path>) -> BackendResult<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| {
            BackendError::InitializationFailed(format!("failed to read {}: {}", path.display(), e))
        })?;
        Self::from_toml_str(&text)
    }

    pub fn fence_timeout(&self) -> Duration {
        Duration::from_millis(self.fence_timeout_ms)
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_millis(self.idle_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_file_keeps_defaults() {
        let config = RendererConfig::from_toml_str("multisampling = 8\nvsync = false\n").unwrap();
        assert_eq!(config.multisampling, 8);
        assert!(!config.vsync);
        assert_eq!(config.min_block_size, 64 * 1024);
        assert_eq!(config.max_point_lights, MAX_POINT_LIGHT_COUNT);
    }

    #[test]
    fn point_lights_are_capped() {
        let config = RendererConfig::from_toml_str("max_point_lights = 32").unwrap();
        assert_eq!(config.max_point_lights, MAX_POINT_LIGHT_COUNT);
    }

    #[test]
    fn malformed_file_is_an_initialization_error() {
        let result = RendererConfig::from_toml_str("multisampling = \"many\"");
        assert!(matches!(result, Err(BackendError::InitializationFailed(_))));
    }
}
