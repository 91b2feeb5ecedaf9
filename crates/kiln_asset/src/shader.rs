//! Shader system
//!
//! Shaders have explicit lifetime: they are created and destroyed by name
//! rather than reference counted. Materials bind to a shader by id and hold
//! one set of per-instance backend resources each, which pins the shader
//! until they are released.

use bytemuck::{Pod, Zeroable};
use kiln_core::state::{StateCarver, StateLayout};
use kiln_render::{GpuHandle, RenderBackend, ShaderDesc, ShaderStage};
use serde::{Deserialize, Serialize};

use crate::cache::{Reference, ResourceCache, ResourceName};
use crate::error::AssetError;
use crate::resource::{ResourceData, ResourceError, ResourceLoader, ResourceType};

/// Shader every material binds to unless its config names another.
pub const BUILTIN_MATERIAL_SHADER: &str = "Builtin.MaterialShader";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShaderSystemConfig {
    pub max_shader_count: u32,
}

impl Default for ShaderSystemConfig {
    fn default() -> Self {
        Self {
            max_shader_count: 1024,
        }
    }
}

fn default_stages() -> Vec<ShaderStage> {
    vec![ShaderStage::Vertex, ShaderStage::Fragment]
}

fn default_max_instances() -> u32 {
    1024
}

/// Shader description as stored in `shaders/<name>.json`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShaderConfig {
    pub name: String,
    #[serde(default = "default_stages")]
    pub stages: Vec<ShaderStage>,
    #[serde(default = "default_max_instances")]
    pub max_instances: u32,
}

impl ShaderConfig {
    pub fn builtin_material() -> Self {
        Self {
            name: BUILTIN_MATERIAL_SHADER.to_string(),
            stages: default_stages(),
            max_instances: default_max_instances(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Shader {
    pub id: u32,
    pub generation: u32,
    pub name: String,
    pub handle: GpuHandle,
    pub max_instances: u32,
    pub instance_count: u32,
}

#[derive(Debug, Clone, Copy, Pod, Zeroable)]
#[repr(C)]
struct ShaderRecord {
    name: ResourceName,
    handle: GpuHandle,
    max_instances: u32,
    instance_count: u32,
}

pub struct ShaderSystem<'a> {
    config: ShaderSystemConfig,
    cache: ResourceCache<'a, ShaderRecord>,
}

impl<'a> ShaderSystem<'a> {
    fn layout(config: &ShaderSystemConfig) -> StateLayout {
        ResourceCache::<ShaderRecord>::layout(StateLayout::new(), config.max_shader_count as usize)
    }

    pub fn state_size(config: &ShaderSystemConfig) -> u64 {
        Self::layout(config).size()
    }

    /// Carve the state block and create the builtin material shader.
    pub fn init(
        block: &'a mut [u8],
        config: ShaderSystemConfig,
        backend: &mut dyn RenderBackend,
    ) -> Result<Self, AssetError> {
        let layout = Self::layout(&config);
        let mut carver = StateCarver::new(block, &layout)?;
        let cache = ResourceCache::carve("shader", &mut carver, config.max_shader_count as usize)?;

        let mut system = Self { config, cache };
        system.create(&ShaderConfig::builtin_material(), backend)?;
        tracing::info!(
            max_shaders = config.max_shader_count,
            state_bytes = layout.size(),
            "shader system initialized"
        );
        Ok(system)
    }

    pub fn config(&self) -> &ShaderSystemConfig {
        &self.config
    }

    /// Create a shader from `config`, returning its id.
    pub fn create(
        &mut self,
        config: &ShaderConfig,
        backend: &mut dyn RenderBackend,
    ) -> Result<u32, AssetError> {
        let name = config.name.as_str();
        let stored_name = ResourceName::new(name)?;
        if self.get_id(name).is_some() {
            return Err(AssetError::AlreadyExists {
                kind: "shader",
                name: name.to_string(),
            });
        }

        let id = self.cache.claim_slot(|_, record| {
            let handle = backend
                .create_shader(&ShaderDesc {
                    name,
                    stages: &config.stages,
                    max_instances: config.max_instances,
                })
                .map_err(|source| AssetError::Backend {
                    kind: "shader",
                    name: name.to_string(),
                    source,
                })?;
            *record = ShaderRecord {
                name: stored_name,
                handle,
                max_instances: config.max_instances,
                instance_count: 0,
            };
            Ok(())
        })?;

        self.cache.set_reference(
            name,
            &Reference {
                handle: id,
                ..Reference::EMPTY
            },
        )?;
        tracing::debug!(name, id, "shader created");
        Ok(id)
    }

    /// Load `shaders/<name>.json` through `loader` and create it.
    pub fn create_from_resource(
        &mut self,
        name: &str,
        backend: &mut dyn RenderBackend,
        loader: &mut dyn ResourceLoader,
    ) -> Result<u32, AssetError> {
        let load_error = |source| AssetError::Load {
            kind: "shader",
            name: name.to_string(),
            source,
        };
        let resource = loader
            .load(name, ResourceType::Shader)
            .map_err(load_error)?;
        let result = match &resource.data {
            ResourceData::Shader(config) => self.create(config, backend),
            _ => Err(load_error(ResourceError::UnexpectedType {
                name: name.to_string(),
                expected: ResourceType::Shader,
                found: resource.kind(),
            })),
        };
        loader.unload(resource);
        result
    }

    pub fn get_id(&self, name: &str) -> Option<u32> {
        self.cache.reference(name).ok()?.handle()
    }

    pub fn get(&self, id: u32) -> Option<Shader> {
        let header = self.cache.header(id)?;
        let record = self.cache.get(id)?;
        Some(Shader {
            id,
            generation: header.generation,
            name: record.name.as_str().to_string(),
            handle: record.handle,
            max_instances: record.max_instances,
            instance_count: record.instance_count,
        })
    }

    pub fn get_by_name(&self, name: &str) -> Option<Shader> {
        self.get(self.get_id(name)?)
    }

    /// Destroy the shader called `name`. Refused while instances are held.
    pub fn destroy(&mut self, name: &str, backend: &mut dyn RenderBackend) -> Result<(), AssetError> {
        let id = self.get_id(name).ok_or_else(|| AssetError::NotFound {
            kind: "shader",
            name: name.to_string(),
        })?;
        if let Some(record) = self.cache.get(id) {
            if record.instance_count > 0 {
                return Err(AssetError::InUse {
                    kind: "shader",
                    name: name.to_string(),
                    count: record.instance_count,
                });
            }
            backend.destroy_shader(record.handle);
        }
        self.cache.free_slot(id);
        self.cache.set_reference(name, &Reference::EMPTY)?;
        tracing::debug!(name, id, "shader destroyed");
        Ok(())
    }

    /// Reserve per-instance resources on shader `id`, returning the instance id.
    pub fn acquire_instance_resources(
        &mut self,
        id: u32,
        backend: &mut dyn RenderBackend,
    ) -> Result<u32, AssetError> {
        let record = self.record_mut(id)?;
        let instance = backend
            .acquire_shader_instance_resources(record.handle)
            .map_err(|source| AssetError::Backend {
                kind: "shader",
                name: record.name.as_str().to_string(),
                source,
            })?;
        record.instance_count += 1;
        Ok(instance)
    }

    pub fn release_instance_resources(
        &mut self,
        id: u32,
        instance_id: u32,
        backend: &mut dyn RenderBackend,
    ) -> Result<(), AssetError> {
        let record = self.record_mut(id)?;
        backend
            .release_shader_instance_resources(record.handle, instance_id)
            .map_err(|source| AssetError::Backend {
                kind: "shader",
                name: record.name.as_str().to_string(),
                source,
            })?;
        record.instance_count = record.instance_count.saturating_sub(1);
        Ok(())
    }

    pub fn shader_count(&self) -> usize {
        self.cache.live_count()
    }

    /// Destroy every shader, outstanding instances or not.
    pub fn shutdown(&mut self, backend: &mut dyn RenderBackend) {
        for id in self.cache.live_ids() {
            let Some(record) = self.cache.get(id).copied() else {
                continue;
            };
            if record.instance_count > 0 {
                tracing::warn!(
                    name = record.name.as_str(),
                    instances = record.instance_count,
                    "destroying shader with live instances"
                );
            }
            backend.destroy_shader(record.handle);
            self.cache.free_slot(id);
            if let Err(e) = self.cache.set_reference(record.name.as_str(), &Reference::EMPTY) {
                tracing::error!(error = %e, "failed to clear shader name");
            }
        }
        tracing::info!("shader system shut down");
    }

    fn record_mut(&mut self, id: u32) -> Result<&mut ShaderRecord, AssetError> {
        self.cache.get_mut(id).ok_or_else(|| AssetError::NotFound {
            kind: "shader",
            name: format!("#{id}"),
        })
    }
}

impl std::fmt::Debug for ShaderSystem<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShaderSystem")
            .field("config", &self.config)
            .field("cache", &self.cache)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resource::FileResourceLoader;
    use kiln_core::containers::hash_name;
    use kiln_core::memory::Arena;
    use kiln_render::HeadlessBackend;

    fn with_system(test: impl FnOnce(&mut ShaderSystem<'_>, &mut HeadlessBackend)) {
        let config = ShaderSystemConfig {
            max_shader_count: 4,
        };
        let arena = Arena::new();
        let block = arena.alloc(ShaderSystem::state_size(&config) as usize);
        let mut backend = HeadlessBackend::default();
        let mut shaders = ShaderSystem::init(block, config, &mut backend).unwrap();
        test(&mut shaders, &mut backend);
    }

    #[test]
    fn builtin_shader_exists_after_init() {
        with_system(|shaders, backend| {
            let id = shaders.get_id(BUILTIN_MATERIAL_SHADER).unwrap();
            let shader = shaders.get(id).unwrap();
            assert_eq!(shader.generation, 0);
            assert_eq!(backend.live_shader_count(), 1);
        });
    }

    fn shader_config(name: &str) -> ShaderConfig {
        ShaderConfig {
            name: name.into(),
            stages: default_stages(),
            max_instances: 8,
        }
    }

    #[test]
    fn duplicate_names_are_rejected() {
        with_system(|shaders, backend| {
            assert_ne!(
                hash_name("lava", 4),
                hash_name(BUILTIN_MATERIAL_SHADER, 4)
            );
            shaders.create(&shader_config("lava"), backend).unwrap();
            assert!(matches!(
                shaders.create(&shader_config("lava"), backend),
                Err(AssetError::AlreadyExists { .. })
            ));
        });
    }

    #[test]
    fn name_sharing_a_table_index_is_refused() {
        with_system(|shaders, backend| {
            assert_eq!(
                hash_name("water", 4),
                hash_name(BUILTIN_MATERIAL_SHADER, 4)
            );
            assert!(matches!(
                shaders.create(&shader_config("water"), backend),
                Err(AssetError::AlreadyExists { .. })
            ));
            assert_eq!(shaders.shader_count(), 1);
            assert_eq!(backend.live_shader_count(), 1);
        });
    }

    #[test]
    fn destroy_waits_for_instances() {
        with_system(|shaders, backend| {
            let id = shaders.get_id(BUILTIN_MATERIAL_SHADER).unwrap();
            let instance = shaders.acquire_instance_resources(id, backend).unwrap();
            assert!(matches!(
                shaders.destroy(BUILTIN_MATERIAL_SHADER, backend),
                Err(AssetError::InUse { count: 1, .. })
            ));

            shaders
                .release_instance_resources(id, instance, backend)
                .unwrap();
            shaders.destroy(BUILTIN_MATERIAL_SHADER, backend).unwrap();
            assert_eq!(shaders.get_id(BUILTIN_MATERIAL_SHADER), None);
            assert_eq!(backend.live_shader_count(), 0);
        });
    }

    #[test]
    fn recreated_shader_gets_a_new_generation() {
        with_system(|shaders, backend| {
            let first = shaders.create(&shader_config("lava"), backend).unwrap();
            shaders.destroy("lava", backend).unwrap();
            let second = shaders.create(&shader_config("lava"), backend).unwrap();
            assert_eq!(first, second);
            assert_eq!(shaders.get(second).unwrap().generation, 1);
        });
    }

    #[test]
    fn create_from_resource_unloads_the_json() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("shaders")).unwrap();
        std::fs::write(
            dir.path().join("shaders/lava.json"),
            r#"{"name":"lava","stages":["vertex","fragment"],"max_instances":16}"#,
        )
        .unwrap();
        let mut loader = FileResourceLoader::new(dir.path());

        with_system(|shaders, backend| {
            let id = shaders
                .create_from_resource("lava", backend, &mut loader)
                .unwrap();
            let shader = shaders.get(id).unwrap();
            assert_eq!(shader.name, "lava");
            assert_eq!(shader.max_instances, 16);
            assert_eq!(shaders.get_id("lava"), Some(id));
            assert_eq!(backend.live_shader_count(), 2);
            assert_eq!(loader.outstanding(), 0);

            assert!(matches!(
                shaders.create_from_resource("missing", backend, &mut loader),
                Err(AssetError::Load { .. })
            ));
            assert_eq!(loader.outstanding(), 0);
        });
    }

    #[test]
    fn config_json_fills_defaults() {
        let config: ShaderConfig = serde_json::from_str(r#"{"name":"ui"}"#).unwrap();
        assert_eq!(config.stages, vec![ShaderStage::Vertex, ShaderStage::Fragment]);
        assert_eq!(config.max_instances, 1024);

        let config: ShaderConfig =
            serde_json::from_str(r#"{"name":"sky","stages":["vertex","geometry","fragment"]}"#)
                .unwrap();
        assert_eq!(config.stages.len(), 3);
    }
}
