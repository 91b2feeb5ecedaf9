//! Resource loading
//!
//! Asset systems never touch the filesystem. They ask a [`ResourceLoader`]
//! for a named resource of a given [`ResourceType`], consume the decoded
//! data, and hand the [`Resource`] back through `unload`.

mod file;
mod image;

use std::path::PathBuf;

use thiserror::Error;

use crate::material::MaterialConfig;
use crate::shader::ShaderConfig;

pub use file::FileResourceLoader;
pub use image::{decode_netpbm, ImageData};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceType {
    Text,
    Binary,
    Image,
    Material,
    Shader,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ResourceData {
    Text(String),
    Binary(Vec<u8>),
    Image(ImageData),
    Material(MaterialConfig),
    Shader(ShaderConfig),
}

/// A loaded resource. Returned to its loader through
/// [`ResourceLoader::unload`] once the consumer is done with it.
#[derive(Debug, Clone, PartialEq)]
pub struct Resource {
    pub name: String,
    pub full_path: PathBuf,
    pub data: ResourceData,
}

impl Resource {
    pub fn kind(&self) -> ResourceType {
        match self.data {
            ResourceData::Text(_) => ResourceType::Text,
            ResourceData::Binary(_) => ResourceType::Binary,
            ResourceData::Image(_) => ResourceType::Image,
            ResourceData::Material(_) => ResourceType::Material,
            ResourceData::Shader(_) => ResourceType::Shader,
        }
    }

    /// Payload size in bytes, as reported in load logs.
    pub fn data_size(&self) -> usize {
        match &self.data {
            ResourceData::Text(text) => text.len(),
            ResourceData::Binary(bytes) => bytes.len(),
            ResourceData::Image(image) => image.pixels.len(),
            ResourceData::Material(_) => std::mem::size_of::<MaterialConfig>(),
            ResourceData::Shader(_) => std::mem::size_of::<ShaderConfig>(),
        }
    }
}

#[derive(Debug, Error)]
pub enum ResourceError {
    #[error("failed to read {path}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid JSON in {path}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("malformed image {path}: {reason}")]
    Image { path: PathBuf, reason: String },

    #[error("{path} is not valid UTF-8")]
    Utf8 { path: PathBuf },

    #[error("'{name}' loaded as {found:?}, expected {expected:?}")]
    UnexpectedType {
        name: String,
        expected: ResourceType,
        found: ResourceType,
    },

    #[error("no {kind:?} resource named '{name}'")]
    NotFound { kind: ResourceType, name: String },
}

pub trait ResourceLoader {
    fn load(&mut self, name: &str, kind: ResourceType) -> Result<Resource, ResourceError>;

    fn unload(&mut self, resource: Resource);
}
