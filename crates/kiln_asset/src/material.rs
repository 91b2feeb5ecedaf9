//! Material system
//!
//! A material ties a diffuse colour and texture to a shader instance. Each
//! resident material holds one reference on its diffuse texture and one set
//! of instance resources on its shader; both are given back when the
//! material is destroyed.

use bytemuck::{Pod, Zeroable};
use glam::Vec4;
use kiln_core::id::{id_to_option, option_to_id};
use kiln_core::state::{StateCarver, StateLayout};
use kiln_core::INVALID_ID;
use kiln_render::RenderBackend;
use serde::{Deserialize, Serialize};

use crate::cache::{ReleaseOutcome, ResourceCache, ResourceName};
use crate::error::AssetError;
use crate::resource::{ResourceData, ResourceError, ResourceLoader, ResourceType};
use crate::shader::{ShaderSystem, BUILTIN_MATERIAL_SHADER};
use crate::texture::{TextureRef, TextureSystem};

pub const DEFAULT_MATERIAL_NAME: &str = "default";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MaterialSystemConfig {
    pub max_material_count: u32,
}

impl Default for MaterialSystemConfig {
    fn default() -> Self {
        Self {
            max_material_count: 4096,
        }
    }
}

fn white() -> [f32; 4] {
    [1.0; 4]
}

fn yes() -> bool {
    true
}

/// Material description as stored in `materials/<name>.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MaterialConfig {
    pub name: String,
    #[serde(default = "white")]
    pub diffuse_colour: [f32; 4],
    /// Empty means the default texture.
    #[serde(default)]
    pub diffuse_map_name: String,
    /// Empty means the builtin material shader.
    #[serde(default)]
    pub shader_name: String,
    #[serde(default = "yes")]
    pub auto_release: bool,
}

impl MaterialConfig {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            diffuse_colour: white(),
            diffuse_map_name: String::new(),
            shader_name: String::new(),
            auto_release: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MaterialRef {
    Default,
    Slot { id: u32, generation: u32 },
}

#[derive(Debug, Clone, PartialEq)]
pub struct Material {
    /// `None` for the default material.
    pub id: Option<u32>,
    pub generation: Option<u32>,
    pub name: String,
    pub diffuse_colour: Vec4,
    pub diffuse_map: TextureRef,
    pub shader_id: Option<u32>,
    pub instance_id: Option<u32>,
}

#[derive(Debug, Clone, Copy, Pod, Zeroable)]
#[repr(C)]
struct MaterialRecord {
    name: ResourceName,
    diffuse_map_name: ResourceName,
    diffuse_colour: [f32; 4],
    texture_id: u32,
    texture_generation: u32,
    shader_id: u32,
    instance_id: u32,
}

impl MaterialRecord {
    fn diffuse_map(&self) -> TextureRef {
        match id_to_option(self.texture_id) {
            None => TextureRef::Default,
            Some(id) => TextureRef::Slot {
                id,
                generation: self.texture_generation,
            },
        }
    }

    fn snapshot(&self, id: Option<u32>, generation: Option<u32>) -> Material {
        Material {
            id,
            generation,
            name: self.name.as_str().to_string(),
            diffuse_colour: Vec4::from_array(self.diffuse_colour),
            diffuse_map: self.diffuse_map(),
            shader_id: id_to_option(self.shader_id),
            instance_id: id_to_option(self.instance_id),
        }
    }
}

fn is_default(name: &str) -> bool {
    name.eq_ignore_ascii_case(DEFAULT_MATERIAL_NAME)
}

pub struct MaterialSystem<'a> {
    config: MaterialSystemConfig,
    cache: ResourceCache<'a, MaterialRecord>,
    default: MaterialRecord,
}

impl<'a> MaterialSystem<'a> {
    fn layout(config: &MaterialSystemConfig) -> StateLayout {
        ResourceCache::<MaterialRecord>::layout(
            StateLayout::new(),
            config.max_material_count as usize,
        )
    }

    pub fn state_size(config: &MaterialSystemConfig) -> u64 {
        Self::layout(config).size()
    }

    /// Carve the state block and build the default material on the
    /// default texture and the builtin material shader.
    pub fn init(
        block: &'a mut [u8],
        config: MaterialSystemConfig,
        shaders: &mut ShaderSystem<'_>,
        backend: &mut dyn RenderBackend,
    ) -> Result<Self, AssetError> {
        let layout = Self::layout(&config);
        let mut carver = StateCarver::new(block, &layout)?;
        let cache =
            ResourceCache::carve("material", &mut carver, config.max_material_count as usize)?;

        let shader_id = builtin_shader(shaders)?;
        let instance_id = shaders.acquire_instance_resources(shader_id, backend)?;
        let default = MaterialRecord {
            name: ResourceName::new(DEFAULT_MATERIAL_NAME)?,
            diffuse_map_name: ResourceName::zeroed(),
            diffuse_colour: white(),
            texture_id: INVALID_ID,
            texture_generation: INVALID_ID,
            shader_id,
            instance_id,
        };

        tracing::info!(
            max_materials = config.max_material_count,
            state_bytes = layout.size(),
            "material system initialized"
        );
        Ok(Self {
            config,
            cache,
            default,
        })
    }

    pub fn config(&self) -> &MaterialSystemConfig {
        &self.config
    }

    /// Take a reference on `name`, loading `materials/<name>.json` on
    /// first use.
    pub fn acquire(
        &mut self,
        name: &str,
        textures: &mut TextureSystem<'_>,
        shaders: &mut ShaderSystem<'_>,
        backend: &mut dyn RenderBackend,
        loader: &mut dyn ResourceLoader,
    ) -> Result<MaterialRef, AssetError> {
        if is_default(name) {
            return Ok(MaterialRef::Default);
        }
        if self.cache.reference(name)?.handle().is_some() {
            // Resident: no load happens, so the stored policy is kept.
            let id = self.cache.acquire(name, false, |_, _| Ok(()))?;
            return Ok(self.slot_ref(id));
        }

        let load_error = |source| AssetError::Load {
            kind: "material",
            name: name.to_string(),
            source,
        };
        let resource = loader
            .load(name, ResourceType::Material)
            .map_err(load_error)?;
        let config = match &resource.data {
            ResourceData::Material(config) => Ok(config.clone()),
            _ => Err(load_error(ResourceError::UnexpectedType {
                name: name.to_string(),
                expected: ResourceType::Material,
                found: resource.kind(),
            })),
        };
        loader.unload(resource);

        // The file name is the key, whatever the file says.
        let mut config = config?;
        config.name = name.to_string();
        self.acquire_from_config(&config, textures, shaders, backend, loader)
    }

    /// Take a reference on `config.name`, building it from `config` on
    /// first use.
    pub fn acquire_from_config(
        &mut self,
        config: &MaterialConfig,
        textures: &mut TextureSystem<'_>,
        shaders: &mut ShaderSystem<'_>,
        backend: &mut dyn RenderBackend,
        loader: &mut dyn ResourceLoader,
    ) -> Result<MaterialRef, AssetError> {
        if is_default(&config.name) {
            return Ok(MaterialRef::Default);
        }
        let stored_name = ResourceName::new(&config.name)?;
        let id = self
            .cache
            .acquire(&config.name, config.auto_release, |_, record| {
                load_material(config, stored_name, record, textures, shaders, backend, loader)
            })?;
        Ok(self.slot_ref(id))
    }

    /// [`acquire`](Self::acquire), falling back to the default material.
    pub fn acquire_or_default(
        &mut self,
        name: &str,
        textures: &mut TextureSystem<'_>,
        shaders: &mut ShaderSystem<'_>,
        backend: &mut dyn RenderBackend,
        loader: &mut dyn ResourceLoader,
    ) -> MaterialRef {
        self.acquire(name, textures, shaders, backend, loader)
            .unwrap_or_else(|e| {
                tracing::warn!(name, error = %e, "using default material");
                MaterialRef::Default
            })
    }

    pub fn release(
        &mut self,
        name: &str,
        textures: &mut TextureSystem<'_>,
        shaders: &mut ShaderSystem<'_>,
        backend: &mut dyn RenderBackend,
    ) -> Result<ReleaseOutcome, AssetError> {
        if is_default(name) {
            return Ok(ReleaseOutcome::Retained);
        }
        self.cache.release(name, |record| {
            destroy_material(record, textures, shaders, backend);
        })
    }

    pub fn release_ref(
        &mut self,
        material: MaterialRef,
        textures: &mut TextureSystem<'_>,
        shaders: &mut ShaderSystem<'_>,
        backend: &mut dyn RenderBackend,
    ) -> Result<ReleaseOutcome, AssetError> {
        match self.get(material) {
            None => {
                tracing::warn!(?material, "release of a stale material handle");
                Ok(ReleaseOutcome::NotAcquired)
            }
            Some(m) if m.id.is_none() => Ok(ReleaseOutcome::Retained),
            Some(m) => self.release(&m.name, textures, shaders, backend),
        }
    }

    pub fn get(&self, material: MaterialRef) -> Option<Material> {
        match material {
            MaterialRef::Default => Some(self.get_default()),
            MaterialRef::Slot { id, generation } => {
                let header = self.cache.header(id)?;
                if header.generation != generation {
                    return None;
                }
                Some(self.cache.get(id)?.snapshot(Some(id), Some(generation)))
            }
        }
    }

    pub fn get_default(&self) -> Material {
        self.default.snapshot(None, None)
    }

    pub fn reference_count(&self, name: &str) -> u64 {
        self.cache.reference(name).map_or(0, |r| r.reference_count)
    }

    pub fn loaded_count(&self) -> usize {
        self.cache.live_count()
    }

    /// Destroy every resident material and release the default's shader
    /// instance.
    pub fn shutdown(
        &mut self,
        textures: &mut TextureSystem<'_>,
        shaders: &mut ShaderSystem<'_>,
        backend: &mut dyn RenderBackend,
    ) {
        for id in self.cache.live_ids() {
            if let Some(record) = self.cache.get_mut(id) {
                destroy_material(record, textures, shaders, backend);
            }
            self.cache.free_slot(id);
        }
        destroy_material(&mut self.default, textures, shaders, backend);
        tracing::info!("material system shut down");
    }

    fn slot_ref(&self, id: u32) -> MaterialRef {
        let generation = self.cache.header(id).map_or(0, |h| h.generation);
        MaterialRef::Slot { id, generation }
    }
}

impl std::fmt::Debug for MaterialSystem<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MaterialSystem")
            .field("config", &self.config)
            .field("cache", &self.cache)
            .finish_non_exhaustive()
    }
}

fn builtin_shader(shaders: &ShaderSystem<'_>) -> Result<u32, AssetError> {
    shaders
        .get_id(BUILTIN_MATERIAL_SHADER)
        .ok_or_else(|| AssetError::NotFound {
            kind: "shader",
            name: BUILTIN_MATERIAL_SHADER.to_string(),
        })
}

fn load_material(
    config: &MaterialConfig,
    stored_name: ResourceName,
    record: &mut MaterialRecord,
    textures: &mut TextureSystem<'_>,
    shaders: &mut ShaderSystem<'_>,
    backend: &mut dyn RenderBackend,
    loader: &mut dyn ResourceLoader,
) -> Result<(), AssetError> {
    let shader_id = if config.shader_name.is_empty() {
        builtin_shader(shaders)?
    } else {
        shaders
            .get_id(&config.shader_name)
            .ok_or_else(|| AssetError::NotFound {
                kind: "shader",
                name: config.shader_name.clone(),
            })?
    };
    let instance_id = shaders.acquire_instance_resources(shader_id, backend)?;

    let diffuse_map = if config.diffuse_map_name.is_empty() {
        TextureRef::Default
    } else {
        textures.acquire_or_default(&config.diffuse_map_name, true, backend, loader)
    };
    let (texture_id, texture_generation) = match diffuse_map {
        TextureRef::Default => (None, None),
        TextureRef::Slot { id, generation } => (Some(id), Some(generation)),
    };
    let diffuse_map_name = match texture_id {
        Some(_) => ResourceName::new(&config.diffuse_map_name)?,
        None => ResourceName::zeroed(),
    };

    *record = MaterialRecord {
        name: stored_name,
        diffuse_map_name,
        diffuse_colour: config.diffuse_colour,
        texture_id: option_to_id(texture_id),
        texture_generation: option_to_id(texture_generation),
        shader_id,
        instance_id,
    };
    Ok(())
}

fn destroy_material(
    record: &mut MaterialRecord,
    textures: &mut TextureSystem<'_>,
    shaders: &mut ShaderSystem<'_>,
    backend: &mut dyn RenderBackend,
) {
    if !record.diffuse_map_name.is_empty() {
        if let Err(e) = textures.release(record.diffuse_map_name.as_str(), backend) {
            tracing::error!(error = %e, "failed to release diffuse texture");
        }
    }
    if let (Some(shader_id), Some(instance_id)) =
        (id_to_option(record.shader_id), id_to_option(record.instance_id))
    {
        if let Err(e) = shaders.release_instance_resources(shader_id, instance_id, backend) {
            tracing::error!(error = %e, "failed to release shader instance");
        }
    }
    record.diffuse_map_name = ResourceName::zeroed();
    record.texture_id = INVALID_ID;
    record.shader_id = INVALID_ID;
    record.instance_id = INVALID_ID;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_json_fills_defaults() {
        let config: MaterialConfig = serde_json::from_str(r#"{"name":"stone"}"#).unwrap();
        assert_eq!(config, MaterialConfig::new("stone"));

        let config: MaterialConfig = serde_json::from_str(
            r#"{"name":"glass","diffuse_colour":[0.5,0.5,1.0,0.25],"auto_release":false}"#,
        )
        .unwrap();
        assert_eq!(config.diffuse_colour, [0.5, 0.5, 1.0, 0.25]);
        assert!(!config.auto_release);
    }

    #[test]
    fn record_without_texture_reports_default_map() {
        let mut record = MaterialRecord::zeroed();
        record.texture_id = INVALID_ID;
        record.shader_id = INVALID_ID;
        record.instance_id = INVALID_ID;
        let material = record.snapshot(Some(0), Some(0));
        assert_eq!(material.diffuse_map, TextureRef::Default);
        assert_eq!(material.shader_id, None);
    }
}
