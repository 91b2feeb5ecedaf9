use std::path::{Path, PathBuf};

use super::{
    decode_netpbm, Resource, ResourceData, ResourceError, ResourceLoader, ResourceType,
};

/// Loads resources from a directory tree:
///
/// ```text
/// <base>/textures/<name>.ppm | <name>.pam
/// <base>/materials/<name>.json
/// <base>/shaders/<name>.json
/// <base>/<name>                 (text and binary)
/// ```
#[derive(Debug)]
pub struct FileResourceLoader {
    base_path: PathBuf,
    loaded: usize,
}

impl FileResourceLoader {
    pub fn new(base_path: impl Into<PathBuf>) -> Self {
        let base_path = base_path.into();
        tracing::info!(base = %base_path.display(), "file resource loader initialized");
        Self {
            base_path,
            loaded: 0,
        }
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    /// Resources handed out and not yet unloaded.
    pub fn outstanding(&self) -> usize {
        self.loaded
    }

    fn candidates(&self, name: &str, kind: ResourceType) -> Vec<PathBuf> {
        let base = &self.base_path;
        match kind {
            ResourceType::Image => vec![
                base.join("textures").join(format!("{name}.ppm")),
                base.join("textures").join(format!("{name}.pam")),
            ],
            ResourceType::Material => vec![base.join("materials").join(format!("{name}.json"))],
            ResourceType::Shader => vec![base.join("shaders").join(format!("{name}.json"))],
            ResourceType::Text | ResourceType::Binary => vec![base.join(name)],
        }
    }

    fn read(path: &Path) -> Result<Vec<u8>, ResourceError> {
        std::fs::read(path).map_err(|source| ResourceError::Io {
            path: path.to_path_buf(),
            source,
        })
    }

    fn decode(path: &Path, kind: ResourceType, bytes: Vec<u8>) -> Result<ResourceData, ResourceError> {
        let json_error = |source| ResourceError::Json {
            path: path.to_path_buf(),
            source,
        };
        Ok(match kind {
            ResourceType::Binary => ResourceData::Binary(bytes),
            ResourceType::Text => ResourceData::Text(
                String::from_utf8(bytes).map_err(|_| ResourceError::Utf8 {
                    path: path.to_path_buf(),
                })?,
            ),
            ResourceType::Image => {
                ResourceData::Image(decode_netpbm(&bytes).map_err(|reason| {
                    ResourceError::Image {
                        path: path.to_path_buf(),
                        reason,
                    }
                })?)
            }
            ResourceType::Material => {
                ResourceData::Material(serde_json::from_slice(&bytes).map_err(json_error)?)
            }
            ResourceType::Shader => {
                ResourceData::Shader(serde_json::from_slice(&bytes).map_err(json_error)?)
            }
        })
    }
}

impl ResourceLoader for FileResourceLoader {
    fn load(&mut self, name: &str, kind: ResourceType) -> Result<Resource, ResourceError> {
        let path = self
            .candidates(name, kind)
            .into_iter()
            .find(|p| p.is_file())
            .ok_or_else(|| ResourceError::NotFound {
                kind,
                name: name.to_string(),
            })?;

        let bytes = Self::read(&path)?;
        let data = Self::decode(&path, kind, bytes)?;
        let resource = Resource {
            name: name.to_string(),
            full_path: path,
            data,
        };
        self.loaded += 1;
        tracing::debug!(
            name,
            ?kind,
            path = %resource.full_path.display(),
            bytes = resource.data_size(),
            "resource loaded"
        );
        Ok(resource)
    }

    fn unload(&mut self, resource: Resource) {
        self.loaded = self.loaded.saturating_sub(1);
        tracing::trace!(name = %resource.name, "resource unloaded");
    }
}
