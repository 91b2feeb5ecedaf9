//! Engine bootstrap
//!
//! Sizes every asset system from the settings, allocates each state block
//! from its tagged arena, and initializes the systems in dependency order.

use anyhow::{Context, Result};
use kiln_asset::{
    generate_plane_config, FileResourceLoader, GeometryRef, GeometrySystem, MaterialSystem,
    ShaderSystem, TextureSystem,
};
use kiln_core::memory::{MemorySystem, MemoryTag};
use kiln_render::{HeadlessBackend, HeadlessConfig, RenderBackend};
use kiln_services::EngineSettings;

pub struct Engine<'m> {
    backend: HeadlessBackend,
    loader: FileResourceLoader,
    textures: TextureSystem<'m>,
    shaders: ShaderSystem<'m>,
    materials: MaterialSystem<'m>,
    geometries: GeometrySystem<'m>,
}

impl<'m> Engine<'m> {
    pub fn init(memory: &'m MemorySystem, settings: &EngineSettings) -> Result<Self> {
        let mut backend = HeadlessBackend::new(HeadlessConfig::default());
        tracing::info!(backend = ?backend.backend_type(), "render backend ready");

        let texture_config = settings.texture_config();
        let block = memory.allocate(
            MemoryTag::Texture,
            TextureSystem::state_size(&texture_config) as usize,
        );
        let textures = TextureSystem::init(block, texture_config, &mut backend)
            .context("texture system init failed")?;

        let shader_config = settings.shader_config();
        let block = memory.allocate(
            MemoryTag::Shader,
            ShaderSystem::state_size(&shader_config) as usize,
        );
        let mut shaders = ShaderSystem::init(block, shader_config, &mut backend)
            .context("shader system init failed")?;

        let material_config = settings.material_config();
        let block = memory.allocate(
            MemoryTag::Material,
            MaterialSystem::state_size(&material_config) as usize,
        );
        let materials = MaterialSystem::init(block, material_config, &mut shaders, &mut backend)
            .context("material system init failed")?;

        let geometry_config = settings.geometry_config();
        let block = memory.allocate(
            MemoryTag::Geometry,
            GeometrySystem::state_size(&geometry_config) as usize,
        );
        let geometries = GeometrySystem::init(block, geometry_config, &mut backend)
            .context("geometry system init failed")?;

        Ok(Self {
            backend,
            loader: FileResourceLoader::new(&settings.assets.base_path),
            textures,
            shaders,
            materials,
            geometries,
        })
    }

    /// Exercise one acquire/release cycle of each asset kind.
    pub fn run_demo(&mut self) -> Result<()> {
        let texture = self.textures.acquire_or_default(
            "cobblestone",
            true,
            &mut self.backend,
            &mut self.loader,
        );
        if let Some(info) = self.textures.get(texture) {
            tracing::info!(name = %info.name, width = info.width, height = info.height, "texture ready");
        }

        let plane = generate_plane_config(10.0, 5.0, 5, 5, 5.0, 2.0, "test floor", "stone");
        let floor = self
            .geometries
            .acquire_from_config(
                &plane,
                true,
                &mut self.materials,
                &mut self.textures,
                &mut self.shaders,
                &mut self.backend,
                &mut self.loader,
            )
            .context("failed to create demo geometry")?;
        if let Some(geometry) = self.geometries.get(floor) {
            tracing::info!(
                vertices = geometry.vertex_count,
                indices = geometry.index_count,
                material = ?geometry.material,
                "geometry ready"
            );
        }

        if let GeometryRef::Slot { id, .. } = floor {
            self.geometries.acquire_by_id(id)?;
            for _ in 0..2 {
                let outcome = self.geometries.release(
                    id,
                    &mut self.materials,
                    &mut self.textures,
                    &mut self.shaders,
                    &mut self.backend,
                )?;
                tracing::debug!(id, ?outcome, "geometry released");
            }
        }

        let outcome = self.textures.release_ref(texture, &mut self.backend)?;
        tracing::debug!(?outcome, "texture released");

        tracing::info!(
            textures = self.backend.live_texture_count(),
            geometries = self.backend.live_geometry_count(),
            shaders = self.backend.live_shader_count(),
            "backend objects after demo"
        );
        Ok(())
    }

    /// Tear down in reverse dependency order.
    pub fn shutdown(mut self) {
        self.geometries.shutdown(
            &mut self.materials,
            &mut self.textures,
            &mut self.shaders,
            &mut self.backend,
        );
        self.materials
            .shutdown(&mut self.textures, &mut self.shaders, &mut self.backend);
        self.textures.shutdown(&mut self.backend);
        self.shaders.shutdown(&mut self.backend);
        if self.loader.outstanding() > 0 {
            tracing::warn!(count = self.loader.outstanding(), "resources never unloaded");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kiln_core::memory::MemorySystemConfig;

    #[test]
    fn boots_runs_and_shuts_down_without_assets() {
        let dir = missing_asset_dir();
        let mut settings = EngineSettings::default();
        settings.assets.base_path = dir;
        settings.textures.max_texture_count = 16;
        settings.materials.max_material_count = 16;
        settings.geometries.max_geometry_count = 16;
        settings.shaders.max_shader_count = 4;

        let memory = MemorySystem::new(MemorySystemConfig {
            default_region_size: 64 * 1024,
        });
        let mut engine = Engine::init(&memory, &settings).unwrap();
        engine.run_demo().unwrap();
        assert_eq!(engine.backend.live_geometry_count(), 1);
        engine.shutdown();

        assert!(memory.usage(MemoryTag::Texture).used > 0);
        assert_eq!(memory.usage(MemoryTag::Unknown).used, 0);
    }

    /// A path that does not exist, so every load misses.
    fn missing_asset_dir() -> String {
        std::env::temp_dir()
            .join("kiln-runtime-test-no-assets")
            .display()
            .to_string()
    }
}
