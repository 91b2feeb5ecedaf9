//! Rendering backend abstraction
//!
//! Asset systems never talk to a GPU API directly. They create and destroy
//! backend objects through [`RenderBackend`] and keep the returned
//! [`GpuHandle`] in their slots.

use thiserror::Error;

use crate::buffer::RenderBufferError;
use crate::vertex::Vertex3d;
use crate::{BackendType, DeviceCapabilities};

/// Opaque backend object handle.
///
/// Backends never hand out `0`, so a zeroed slot reads as [`GpuHandle::NULL`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, bytemuck::Pod, bytemuck::Zeroable)]
#[repr(transparent)]
pub struct GpuHandle(pub u64);

impl GpuHandle {
    pub const NULL: GpuHandle = GpuHandle(0);

    #[inline]
    pub fn is_null(self) -> bool {
        self.0 == 0
    }
}

/// Texture upload description. Pixel data is tightly packed rows of
/// `channel_count` bytes per pixel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TextureDesc {
    pub width: u32,
    pub height: u32,
    pub channel_count: u8,
    pub has_transparency: bool,
}

impl TextureDesc {
    pub fn byte_len(&self) -> usize {
        self.width as usize * self.height as usize * self.channel_count as usize
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ShaderStage {
    Vertex,
    Geometry,
    Fragment,
    Compute,
}

/// Shader program description.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShaderDesc<'a> {
    pub name: &'a str,
    pub stages: &'a [ShaderStage],
    /// Per-instance resource sets the backend must be able to hand out.
    pub max_instances: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BackendError {
    #[error("texture data is {actual} bytes but {expected} were expected")]
    InvalidTextureData { expected: usize, actual: usize },

    #[error("texture {width}x{height} exceeds the device limit of {max}")]
    TextureTooLarge { width: u32, height: u32, max: u32 },

    #[error("geometry has no vertices")]
    EmptyGeometry,

    #[error("shader '{0}' has no stages")]
    EmptyShader(String),

    #[error("unknown backend handle {0:?}")]
    UnknownHandle(GpuHandle),

    #[error("shader {shader:?} has no live instance {instance_id}")]
    UnknownInstance { shader: GpuHandle, instance_id: u32 },

    #[error("shader {shader:?} has no free instance slots (max {max})")]
    InstancesExhausted { shader: GpuHandle, max: u32 },

    #[error(transparent)]
    Buffer(#[from] RenderBufferError),
}

/// Backend operations consumed by the asset systems.
pub trait RenderBackend {
    fn backend_type(&self) -> BackendType;

    fn capabilities(&self) -> DeviceCapabilities;

    fn create_texture(&mut self, desc: &TextureDesc, pixels: &[u8])
        -> Result<GpuHandle, BackendError>;

    fn destroy_texture(&mut self, texture: GpuHandle);

    fn create_geometry(
        &mut self,
        vertices: &[Vertex3d],
        indices: &[u32],
    ) -> Result<GpuHandle, BackendError>;

    fn destroy_geometry(&mut self, geometry: GpuHandle);

    fn create_shader(&mut self, desc: &ShaderDesc<'_>) -> Result<GpuHandle, BackendError>;

    fn destroy_shader(&mut self, shader: GpuHandle);

    /// Reserve one set of per-instance resources (descriptor sets, uniform
    /// ranges) on `shader`, returning the instance id.
    fn acquire_shader_instance_resources(&mut self, shader: GpuHandle)
        -> Result<u32, BackendError>;

    fn release_shader_instance_resources(
        &mut self,
        shader: GpuHandle,
        instance_id: u32,
    ) -> Result<(), BackendError>;
}
