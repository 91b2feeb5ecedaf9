//! Geometry system
//!
//! Geometries are addressed by id rather than name: every
//! [`GeometrySystem::acquire_from_config`] call uploads a new geometry, and
//! further references are taken with [`GeometrySystem::acquire_by_id`]. The
//! reference count lives in the slot's payload record.

use bytemuck::{Pod, Zeroable};
use glam::{Vec2, Vec3};
use kiln_core::id::{id_to_option, option_to_id};
use kiln_core::state::{StateCarver, StateLayout};
use kiln_render::{GpuHandle, RenderBackend, Vertex3d};

use crate::cache::{ReleaseOutcome, ResourceName, SlotArray};
use crate::error::AssetError;
use crate::material::{MaterialRef, MaterialSystem};
use crate::resource::ResourceLoader;
use crate::shader::ShaderSystem;
use crate::texture::TextureSystem;

pub const DEFAULT_GEOMETRY_NAME: &str = "default";

const DEFAULT_GEOMETRY_EXTENT: f32 = 10.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GeometrySystemConfig {
    pub max_geometry_count: u32,
}

impl Default for GeometrySystemConfig {
    fn default() -> Self {
        Self {
            max_geometry_count: 4096,
        }
    }
}

/// Vertex and index data plus the material to draw it with.
#[derive(Debug, Clone, PartialEq)]
pub struct GeometryConfig {
    pub name: String,
    pub vertices: Vec<Vertex3d>,
    pub indices: Vec<u32>,
    /// Empty means the default material.
    pub material_name: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GeometryRef {
    Default,
    Slot { id: u32, generation: u32 },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Geometry {
    pub id: Option<u32>,
    pub generation: Option<u32>,
    pub name: String,
    pub handle: GpuHandle,
    pub material: MaterialRef,
    pub reference_count: u32,
    pub vertex_count: u32,
    pub index_count: u32,
}

#[derive(Debug, Clone, Copy, Pod, Zeroable)]
#[repr(C)]
struct GeometryRecord {
    name: ResourceName,
    material_name: ResourceName,
    handle: GpuHandle,
    reference_count: u32,
    auto_release: u32,
    material_id: u32,
    material_generation: u32,
    vertex_count: u32,
    index_count: u32,
}

impl GeometryRecord {
    fn material(&self) -> MaterialRef {
        match id_to_option(self.material_id) {
            None => MaterialRef::Default,
            Some(id) => MaterialRef::Slot {
                id,
                generation: self.material_generation,
            },
        }
    }

    fn snapshot(&self, id: Option<u32>, generation: Option<u32>) -> Geometry {
        Geometry {
            id,
            generation,
            name: self.name.as_str().to_string(),
            handle: self.handle,
            material: self.material(),
            reference_count: self.reference_count,
            vertex_count: self.vertex_count,
            index_count: self.index_count,
        }
    }
}

pub struct GeometrySystem<'a> {
    config: GeometrySystemConfig,
    slots: SlotArray<'a, GeometryRecord>,
    default: GeometryRecord,
}

impl<'a> GeometrySystem<'a> {
    fn layout(config: &GeometrySystemConfig) -> StateLayout {
        SlotArray::<GeometryRecord>::layout(StateLayout::new(), config.max_geometry_count as usize)
    }

    pub fn state_size(config: &GeometrySystemConfig) -> u64 {
        Self::layout(config).size()
    }

    /// Carve the state block and upload the default 10x10 quad.
    pub fn init(
        block: &'a mut [u8],
        config: GeometrySystemConfig,
        backend: &mut dyn RenderBackend,
    ) -> Result<Self, AssetError> {
        let layout = Self::layout(&config);
        let mut carver = StateCarver::new(block, &layout)?;
        let slots = SlotArray::carve("geometry", &mut carver, config.max_geometry_count as usize)?;

        let quad = generate_plane_config(
            DEFAULT_GEOMETRY_EXTENT,
            DEFAULT_GEOMETRY_EXTENT,
            1,
            1,
            1.0,
            1.0,
            DEFAULT_GEOMETRY_NAME,
            "",
        );
        let mut default = GeometryRecord::zeroed();
        upload(&quad, &mut default, backend)?;
        default.material_id = option_to_id(None);

        tracing::info!(
            max_geometries = config.max_geometry_count,
            state_bytes = layout.size(),
            "geometry system initialized"
        );
        Ok(Self {
            config,
            slots,
            default,
        })
    }

    pub fn config(&self) -> &GeometrySystemConfig {
        &self.config
    }

    /// Upload `config` into a new slot with a reference count of one.
    #[allow(clippy::too_many_arguments)]
    pub fn acquire_from_config(
        &mut self,
        config: &GeometryConfig,
        auto_release: bool,
        materials: &mut MaterialSystem<'_>,
        textures: &mut TextureSystem<'_>,
        shaders: &mut ShaderSystem<'_>,
        backend: &mut dyn RenderBackend,
        loader: &mut dyn ResourceLoader,
    ) -> Result<GeometryRef, AssetError> {
        let stored_name = ResourceName::new(&config.name)?;
        let id = self.slots.claim_slot(|_, record| {
            upload(config, record, backend)?;
            record.name = stored_name;
            record.reference_count = 1;
            record.auto_release = u32::from(auto_release);

            let material = if config.material_name.is_empty() {
                MaterialRef::Default
            } else {
                materials.acquire_or_default(&config.material_name, textures, shaders, backend, loader)
            };
            if let MaterialRef::Slot { id, generation } = material {
                // Names that did not fit fell back to the default above.
                record.material_name = ResourceName::new(&config.material_name)?;
                record.material_id = id;
                record.material_generation = generation;
            } else {
                record.material_id = option_to_id(None);
            }
            Ok(())
        })?;
        tracing::debug!(name = %config.name, id, "geometry loaded");
        Ok(self.slot_ref(id))
    }

    /// Take another reference on a live geometry.
    pub fn acquire_by_id(&mut self, id: u32) -> Result<GeometryRef, AssetError> {
        let record = self.record_mut(id)?;
        record.reference_count += 1;
        Ok(self.slot_ref(id))
    }

    /// Drop a reference on geometry `id`. At zero an auto-release geometry
    /// is destroyed along with its material reference.
    pub fn release(
        &mut self,
        id: u32,
        materials: &mut MaterialSystem<'_>,
        textures: &mut TextureSystem<'_>,
        shaders: &mut ShaderSystem<'_>,
        backend: &mut dyn RenderBackend,
    ) -> Result<ReleaseOutcome, AssetError> {
        let record = self.record_mut(id)?;
        if record.reference_count == 0 {
            tracing::warn!(id, "release of a geometry that is not acquired");
            return Ok(ReleaseOutcome::NotAcquired);
        }

        record.reference_count -= 1;
        if record.reference_count > 0 {
            return Ok(ReleaseOutcome::Released {
                remaining: u64::from(record.reference_count),
            });
        }
        if record.auto_release == 0 {
            return Ok(ReleaseOutcome::Retained);
        }

        destroy_geometry(record, materials, textures, shaders, backend);
        self.slots.free_slot(id);
        tracing::debug!(id, "geometry destroyed");
        Ok(ReleaseOutcome::Destroyed)
    }

    pub fn get(&self, geometry: GeometryRef) -> Option<Geometry> {
        match geometry {
            GeometryRef::Default => Some(self.get_default()),
            GeometryRef::Slot { id, generation } => {
                let header = self.slots.header(id)?;
                if header.generation != generation {
                    return None;
                }
                Some(self.slots.get(id)?.snapshot(Some(id), Some(generation)))
            }
        }
    }

    pub fn get_default(&self) -> Geometry {
        self.default.snapshot(None, None)
    }

    pub fn loaded_count(&self) -> usize {
        self.slots.live_count()
    }

    /// Destroy every resident geometry and the default quad.
    pub fn shutdown(
        &mut self,
        materials: &mut MaterialSystem<'_>,
        textures: &mut TextureSystem<'_>,
        shaders: &mut ShaderSystem<'_>,
        backend: &mut dyn RenderBackend,
    ) {
        for id in self.slots.live_ids() {
            if let Some(record) = self.slots.get_mut(id) {
                destroy_geometry(record, materials, textures, shaders, backend);
            }
            self.slots.free_slot(id);
        }
        backend.destroy_geometry(self.default.handle);
        self.default.handle = GpuHandle::NULL;
        tracing::info!("geometry system shut down");
    }

    fn record_mut(&mut self, id: u32) -> Result<&mut GeometryRecord, AssetError> {
        self.slots.get_mut(id).ok_or_else(|| AssetError::NotFound {
            kind: "geometry",
            name: format!("#{id}"),
        })
    }

    fn slot_ref(&self, id: u32) -> GeometryRef {
        let generation = self.slots.header(id).map_or(0, |h| h.generation);
        GeometryRef::Slot { id, generation }
    }
}

impl std::fmt::Debug for GeometrySystem<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GeometrySystem")
            .field("config", &self.config)
            .field("slots", &self.slots)
            .finish_non_exhaustive()
    }
}

fn upload(
    config: &GeometryConfig,
    record: &mut GeometryRecord,
    backend: &mut dyn RenderBackend,
) -> Result<(), AssetError> {
    record.handle = backend
        .create_geometry(&config.vertices, &config.indices)
        .map_err(|source| AssetError::Backend {
            kind: "geometry",
            name: config.name.clone(),
            source,
        })?;
    record.name = ResourceName::new(&config.name)?;
    record.vertex_count = config.vertices.len() as u32;
    record.index_count = config.indices.len() as u32;
    Ok(())
}

fn destroy_geometry(
    record: &mut GeometryRecord,
    materials: &mut MaterialSystem<'_>,
    textures: &mut TextureSystem<'_>,
    shaders: &mut ShaderSystem<'_>,
    backend: &mut dyn RenderBackend,
) {
    backend.destroy_geometry(record.handle);
    record.handle = GpuHandle::NULL;
    if !record.material_name.is_empty() {
        if let Err(e) = materials.release(record.material_name.as_str(), textures, shaders, backend)
        {
            tracing::error!(error = %e, "failed to release geometry material");
        }
    }
}

/// Build a `width` x `height` plane in the XY plane, centred on the origin,
/// split into `x_segments` x `y_segments` quads with texture coordinates
/// repeated `tile_x` x `tile_y` times. Zero inputs are treated as one.
#[allow(clippy::too_many_arguments)]
pub fn generate_plane_config(
    width: f32,
    height: f32,
    x_segments: u32,
    y_segments: u32,
    tile_x: f32,
    tile_y: f32,
    name: &str,
    material_name: &str,
) -> GeometryConfig {
    let or_one = |v: f32| if v == 0.0 { 1.0 } else { v };
    let (width, height) = (or_one(width), or_one(height));
    let (tile_x, tile_y) = (or_one(tile_x), or_one(tile_y));
    let x_segments = x_segments.max(1);
    let y_segments = y_segments.max(1);

    let quad_count = (x_segments * y_segments) as usize;
    let mut vertices = Vec::with_capacity(quad_count * 4);
    let mut indices = Vec::with_capacity(quad_count * 6);

    let segment_width = width / x_segments as f32;
    let segment_height = height / y_segments as f32;
    let half_width = width * 0.5;
    let half_height = height * 0.5;

    for y in 0..y_segments {
        for x in 0..x_segments {
            let min_x = x as f32 * segment_width - half_width;
            let min_y = y as f32 * segment_height - half_height;
            let max_x = min_x + segment_width;
            let max_y = min_y + segment_height;

            let min_u = x as f32 / x_segments as f32 * tile_x;
            let min_v = y as f32 / y_segments as f32 * tile_y;
            let max_u = (x + 1) as f32 / x_segments as f32 * tile_x;
            let max_v = (y + 1) as f32 / y_segments as f32 * tile_y;

            let base = vertices.len() as u32;
            vertices.extend_from_slice(&[
                Vertex3d::new(Vec3::new(min_x, min_y, 0.0), Vec2::new(min_u, min_v)),
                Vertex3d::new(Vec3::new(max_x, max_y, 0.0), Vec2::new(max_u, max_v)),
                Vertex3d::new(Vec3::new(min_x, max_y, 0.0), Vec2::new(min_u, max_v)),
                Vertex3d::new(Vec3::new(max_x, min_y, 0.0), Vec2::new(max_u, min_v)),
            ]);
            indices.extend_from_slice(&[base, base + 1, base + 2, base, base + 3, base + 1]);
        }
    }

    GeometryConfig {
        name: name.to_string(),
        vertices,
        indices,
        material_name: material_name.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_holds_only_slot_arrays() {
        let config = GeometrySystemConfig {
            max_geometry_count: 8,
        };
        let slots = 8 * (std::mem::size_of::<crate::cache::SlotHeader>()
            + std::mem::size_of::<GeometryRecord>());
        assert_eq!(GeometrySystem::state_size(&config), slots as u64);
    }

    #[test]
    fn plane_has_four_vertices_and_six_indices_per_segment() {
        let plane = generate_plane_config(4.0, 2.0, 4, 2, 1.0, 1.0, "floor", "stone");
        assert_eq!(plane.vertices.len(), 32);
        assert_eq!(plane.indices.len(), 48);
        assert_eq!(plane.material_name, "stone");
        assert!(plane.indices.iter().all(|&i| (i as usize) < plane.vertices.len()));
    }

    #[test]
    fn plane_is_centred_and_tiled() {
        let plane = generate_plane_config(10.0, 10.0, 1, 1, 2.0, 3.0, "quad", "");
        let first = plane.vertices[0];
        let second = plane.vertices[1];
        assert_eq!(first.position, Vec3::new(-5.0, -5.0, 0.0));
        assert_eq!(second.position, Vec3::new(5.0, 5.0, 0.0));
        assert_eq!(second.texcoord, Vec2::new(2.0, 3.0));
    }

    #[test]
    fn zero_inputs_default_to_one() {
        let plane = generate_plane_config(0.0, 0.0, 0, 0, 0.0, 0.0, "unit", "");
        assert_eq!(plane.vertices.len(), 4);
        assert_eq!(plane.vertices[1].position, Vec3::new(0.5, 0.5, 0.0));
        assert_eq!(plane.vertices[1].texcoord, Vec2::new(1.0, 1.0));
    }
}
