//! Backend abstraction layer
//!
//! # Available Backends
//!
//! - `dummy`: headless backend with counted resources, used by tests and CI
//! - `vulkan` (feature `vulkan-backend`): native Vulkan via ash
//!
//! [`create_backend`] is the capability factory selecting one at startup.

pub mod dummy;
pub mod traits;
pub mod types;

#[cfg(feature = "vulkan-backend")]
pub mod vulkan;

pub use traits::*;
pub use types::*;

use raw_window_handle::{HasDisplayHandle, HasWindowHandle};

use crate::config::RendererConfig;

/// Backend selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BackendType {
    /// Native Vulkan via ash
    #[default]
    Vulkan,
    /// No GPU; resources live in host memory
    Headless,
}

/// A platform window the backend can present to.
pub trait WindowSource: HasDisplayHandle + HasWindowHandle {}

impl<T: HasDisplayHandle + HasWindowHandle> WindowSource for T {}

/// Create the requested backend.
///
/// Vulkan initialization failures surface as errors so the caller can fall back to
/// [`BackendType::Headless`] or another path.
pub fn create_backend(
    backend_type: BackendType,
    config: &RendererConfig,
    window: Option<&dyn WindowSource>,
) -> BackendResult<Box<dyn GraphicsBackend>> {
    match backend_type {
        #[cfg(feature = "vulkan-backend")]
        BackendType::Vulkan => {
            let backend = vulkan::VulkanBackend::new(config, window)?;
            log::info!("Using Vulkan backend");
            Ok(Box::new(backend))
        }
        #[cfg(not(feature = "vulkan-backend"))]
        BackendType::Vulkan => {
            let _ = (config, window);
            Err(BackendError::Unsupported(
                "Vulkan backend not compiled in".into(),
            ))
        }
        BackendType::Headless => {
            log::info!("Using headless backend");
            Ok(Box::new(dummy::DummyBackend::new()))
        }
    }
}
