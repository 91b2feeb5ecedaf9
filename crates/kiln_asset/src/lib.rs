//! Kiln Asset Systems
//!
//! Reference-counted texture, material, shader and geometry caches. Every
//! system sizes its bookkeeping up front (`state_size`), carves it out of a
//! caller-provided block in `init`, and talks to the GPU only through
//! [`kiln_render::RenderBackend`] and to storage only through
//! [`resource::ResourceLoader`].

pub mod cache;
pub mod error;
pub mod geometry;
pub mod material;
pub mod resource;
pub mod shader;
pub mod texture;

pub use cache::{ReleaseOutcome, ResourceCache, ResourceName, SlotArray, MAX_NAME_LENGTH};
pub use error::AssetError;
pub use geometry::{
    generate_plane_config, Geometry, GeometryConfig, GeometryRef, GeometrySystem,
    GeometrySystemConfig,
};
pub use material::{Material, MaterialConfig, MaterialRef, MaterialSystem, MaterialSystemConfig};
pub use resource::{FileResourceLoader, Resource, ResourceData, ResourceLoader, ResourceType};
pub use shader::{Shader, ShaderConfig, ShaderSystem, ShaderSystemConfig, BUILTIN_MATERIAL_SHADER};
pub use texture::{Texture, TextureRef, TextureSystem, TextureSystemConfig};
