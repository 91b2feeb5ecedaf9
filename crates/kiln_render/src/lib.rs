//! Kiln Render System
//!
//! The graphics backend seam used by the asset systems, plus the pieces a
//! backend needs that are independent of any GPU API:
//! - [`RenderBackend`] trait (texture, geometry and shader object lifetime)
//! - [`RenderBuffer`] free-list sub-allocation of large buffers
//! - [`HeadlessBackend`] for tools, tests and servers with no GPU

pub mod backend;
pub mod buffer;
pub mod headless;
pub mod vertex;

pub use backend::{
    BackendError, GpuHandle, RenderBackend, ShaderDesc, ShaderStage, TextureDesc,
};
pub use buffer::{RenderBuffer, RenderBufferError, RenderBufferKind};
pub use headless::{HeadlessBackend, HeadlessConfig};
pub use vertex::Vertex3d;

/// Rendering backend type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendType {
    /// No GPU; objects are tracked in host memory only
    Headless,
}

/// Capabilities reported by a backend
#[derive(Debug, Clone)]
pub struct DeviceCapabilities {
    pub backend: BackendType,
    pub max_texture_size: u32,
    pub supports_instancing: bool,
}
