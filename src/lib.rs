//! graphics3d - a real-time 3D scene renderer for explicit GPU APIs
//!
//! The crate turns a scene graph (camera, lights, meshes with materials) into sorted draw
//! calls and presents them to a window swapchain.
//!
//! # Layout
//! - [`backend`]: the [`GraphicsBackend`] trait with Vulkan and headless implementations
//! - [`resources`]: pooled constant/vertex/index buffers, textures, meshes and materials
//! - [`shader`]: shader library, constant-buffer reflection and typed parameter writes
//! - [`pipeline`]: logical pipelines cached per render pass and sample count
//! - [`scene`]: camera, lights and model nodes
//! - [`renderer`]: builds, updates and records draw items for one scene
//! - [`render_target`]: swapchain ownership, frame pacing and surface composition

pub mod backend;
pub mod config;
pub mod pipeline;
pub mod render_target;
pub mod renderer;
pub mod resources;
pub mod scene;
pub mod shader;

pub use backend::{create_backend, BackendError, BackendType, GraphicsBackend};
pub use config::RendererConfig;
pub use render_target::{FrameStatus, ReinitLevel, RenderTarget, Surface3D, SurfaceId};
pub use renderer::SceneRenderer;
pub use scene::SceneGraph;

// Re-export glam for users building transforms and cameras
pub use glam;
