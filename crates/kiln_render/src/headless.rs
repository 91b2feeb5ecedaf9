//! GPU-less backend
//!
//! Keeps every object in host memory. Geometry data is packed into one
//! vertex and one index [`RenderBuffer`], exercising the same free-list
//! sub-allocation a GPU backend performs on device buffers.

use std::collections::HashMap;

use crate::backend::{BackendError, GpuHandle, RenderBackend, ShaderDesc, TextureDesc};
use crate::buffer::{RenderBuffer, RenderBufferKind};
use crate::vertex::Vertex3d;
use crate::{BackendType, DeviceCapabilities};

#[derive(Debug, Clone)]
pub struct HeadlessConfig {
    pub vertex_buffer_size: u64,
    pub index_buffer_size: u64,
    pub max_texture_size: u32,
}

impl Default for HeadlessConfig {
    fn default() -> Self {
        Self {
            vertex_buffer_size: 64 * 1024,
            index_buffer_size: 16 * 1024,
            max_texture_size: 8192,
        }
    }
}

#[derive(Debug)]
struct TextureRecord {
    desc: TextureDesc,
    pixels: Vec<u8>,
}

#[derive(Debug, Clone, Copy)]
struct GeometryRecord {
    vertex_offset: u64,
    vertex_size: u64,
    index_offset: u64,
    index_size: u64,
}

#[derive(Debug)]
struct ShaderRecord {
    name: String,
    instances: Vec<bool>,
}

/// Host-memory implementation of [`RenderBackend`].
#[derive(Debug)]
pub struct HeadlessBackend {
    config: HeadlessConfig,
    next_handle: u64,
    textures: HashMap<GpuHandle, TextureRecord>,
    geometries: HashMap<GpuHandle, GeometryRecord>,
    shaders: HashMap<GpuHandle, ShaderRecord>,
    vertex_buffer: RenderBuffer,
    index_buffer: RenderBuffer,
}

impl HeadlessBackend {
    pub fn new(config: HeadlessConfig) -> Self {
        tracing::info!(
            vertex_bytes = config.vertex_buffer_size,
            index_bytes = config.index_buffer_size,
            "headless backend initialized"
        );
        Self {
            vertex_buffer: RenderBuffer::new(RenderBufferKind::Vertex, config.vertex_buffer_size),
            index_buffer: RenderBuffer::new(RenderBufferKind::Index, config.index_buffer_size),
            config,
            next_handle: 1,
            textures: HashMap::new(),
            geometries: HashMap::new(),
            shaders: HashMap::new(),
        }
    }

    fn issue_handle(&mut self) -> GpuHandle {
        let handle = GpuHandle(self.next_handle);
        self.next_handle += 1;
        handle
    }

    pub fn live_texture_count(&self) -> usize {
        self.textures.len()
    }

    pub fn live_geometry_count(&self) -> usize {
        self.geometries.len()
    }

    pub fn live_shader_count(&self) -> usize {
        self.shaders.len()
    }

    pub fn has_texture(&self, texture: GpuHandle) -> bool {
        self.textures.contains_key(&texture)
    }

    pub fn has_geometry(&self, geometry: GpuHandle) -> bool {
        self.geometries.contains_key(&geometry)
    }

    /// Pixels uploaded for `texture`.
    pub fn texture_pixels(&self, texture: GpuHandle) -> Option<&[u8]> {
        self.textures.get(&texture).map(|t| t.pixels.as_slice())
    }

    pub fn texture_desc(&self, texture: GpuHandle) -> Option<TextureDesc> {
        self.textures.get(&texture).map(|t| t.desc)
    }

    /// Instance slots currently held on `shader`.
    pub fn shader_instance_count(&self, shader: GpuHandle) -> usize {
        self.shaders
            .get(&shader)
            .map_or(0, |s| s.instances.iter().filter(|&&used| used).count())
    }

    pub fn vertex_buffer(&self) -> &RenderBuffer {
        &self.vertex_buffer
    }

    pub fn index_buffer(&self) -> &RenderBuffer {
        &self.index_buffer
    }
}

impl Default for HeadlessBackend {
    fn default() -> Self {
        Self::new(HeadlessConfig::default())
    }
}

impl RenderBackend for HeadlessBackend {
    fn backend_type(&self) -> BackendType {
        BackendType::Headless
    }

    fn capabilities(&self) -> DeviceCapabilities {
        DeviceCapabilities {
            backend: BackendType::Headless,
            max_texture_size: self.config.max_texture_size,
            supports_instancing: false,
        }
    }

    fn create_texture(
        &mut self,
        desc: &TextureDesc,
        pixels: &[u8],
    ) -> Result<GpuHandle, BackendError> {
        let max = self.config.max_texture_size;
        if desc.width > max || desc.height > max {
            return Err(BackendError::TextureTooLarge {
                width: desc.width,
                height: desc.height,
                max,
            });
        }
        if pixels.len() != desc.byte_len() {
            return Err(BackendError::InvalidTextureData {
                expected: desc.byte_len(),
                actual: pixels.len(),
            });
        }
        let handle = self.issue_handle();
        self.textures.insert(
            handle,
            TextureRecord {
                desc: *desc,
                pixels: pixels.to_vec(),
            },
        );
        tracing::trace!(?handle, width = desc.width, height = desc.height, "texture created");
        Ok(handle)
    }

    fn destroy_texture(&mut self, texture: GpuHandle) {
        if self.textures.remove(&texture).is_none() {
            tracing::warn!(?texture, "destroy of unknown texture");
        }
    }

    fn create_geometry(
        &mut self,
        vertices: &[Vertex3d],
        indices: &[u32],
    ) -> Result<GpuHandle, BackendError> {
        if vertices.is_empty() {
            return Err(BackendError::EmptyGeometry);
        }

        let vertex_bytes: &[u8] = bytemuck::cast_slice(vertices);
        let vertex_size = vertex_bytes.len() as u64;
        let vertex_offset = self.vertex_buffer.allocate_or_grow(vertex_size)?;
        self.vertex_buffer.load_range(vertex_offset, vertex_bytes)?;

        let index_bytes: &[u8] = bytemuck::cast_slice(indices);
        let index_size = index_bytes.len() as u64;
        let index_offset = if index_size > 0 {
            match self.index_buffer.allocate_or_grow(index_size) {
                Ok(offset) => {
                    self.index_buffer.load_range(offset, index_bytes)?;
                    offset
                }
                Err(e) => {
                    // Don't leak the vertex range on a failed upload.
                    self.vertex_buffer.free(vertex_size, vertex_offset)?;
                    return Err(e.into());
                }
            }
        } else {
            0
        };

        let handle = self.issue_handle();
        self.geometries.insert(
            handle,
            GeometryRecord {
                vertex_offset,
                vertex_size,
                index_offset,
                index_size,
            },
        );
        Ok(handle)
    }

    fn destroy_geometry(&mut self, geometry: GpuHandle) {
        let Some(record) = self.geometries.remove(&geometry) else {
            tracing::warn!(?geometry, "destroy of unknown geometry");
            return;
        };
        if let Err(e) = self
            .vertex_buffer
            .free(record.vertex_size, record.vertex_offset)
        {
            tracing::error!(error = %e, "failed to free vertex range");
        }
        if record.index_size > 0 {
            if let Err(e) = self.index_buffer.free(record.index_size, record.index_offset) {
                tracing::error!(error = %e, "failed to free index range");
            }
        }
    }

    fn create_shader(&mut self, desc: &ShaderDesc<'_>) -> Result<GpuHandle, BackendError> {
        if desc.stages.is_empty() {
            return Err(BackendError::EmptyShader(desc.name.to_string()));
        }
        let handle = self.issue_handle();
        self.shaders.insert(
            handle,
            ShaderRecord {
                name: desc.name.to_string(),
                instances: vec![false; desc.max_instances as usize],
            },
        );
        Ok(handle)
    }

    fn destroy_shader(&mut self, shader: GpuHandle) {
        match self.shaders.remove(&shader) {
            Some(record) => tracing::trace!(name = %record.name, "shader destroyed"),
            None => tracing::warn!(?shader, "destroy of unknown shader"),
        }
    }

    fn acquire_shader_instance_resources(
        &mut self,
        shader: GpuHandle,
    ) -> Result<u32, BackendError> {
        let record = self
            .shaders
            .get_mut(&shader)
            .ok_or(BackendError::UnknownHandle(shader))?;
        let Some(slot) = record.instances.iter().position(|&used| !used) else {
            return Err(BackendError::InstancesExhausted {
                shader,
                max: record.instances.len() as u32,
            });
        };
        record.instances[slot] = true;
        Ok(slot as u32)
    }

    fn release_shader_instance_resources(
        &mut self,
        shader: GpuHandle,
        instance_id: u32,
    ) -> Result<(), BackendError> {
        let record = self
            .shaders
            .get_mut(&shader)
            .ok_or(BackendError::UnknownHandle(shader))?;
        match record.instances.get_mut(instance_id as usize) {
            Some(used) if *used => {
                *used = false;
                Ok(())
            }
            _ => Err(BackendError::UnknownInstance {
                shader,
                instance_id,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::ShaderStage;
    use glam::{Vec2, Vec3};

    fn quad() -> (Vec<Vertex3d>, Vec<u32>) {
        let vertices = vec![
            Vertex3d::new(Vec3::new(0.0, 0.0, 0.0), Vec2::new(0.0, 0.0)),
            Vertex3d::new(Vec3::new(1.0, 0.0, 0.0), Vec2::new(1.0, 0.0)),
            Vertex3d::new(Vec3::new(1.0, 1.0, 0.0), Vec2::new(1.0, 1.0)),
            Vertex3d::new(Vec3::new(0.0, 1.0, 0.0), Vec2::new(0.0, 1.0)),
        ];
        (vertices, vec![0, 1, 2, 0, 2, 3])
    }

    #[test]
    fn reports_headless_capabilities() {
        let backend = HeadlessBackend::new(HeadlessConfig {
            max_texture_size: 512,
            ..HeadlessConfig::default()
        });
        assert_eq!(backend.backend_type(), BackendType::Headless);
        let caps = backend.capabilities();
        assert_eq!(caps.backend, BackendType::Headless);
        assert_eq!(caps.max_texture_size, 512);
        assert!(!caps.supports_instancing);
    }

    #[test]
    fn texture_upload_validates_size() {
        let mut backend = HeadlessBackend::default();
        let desc = TextureDesc {
            width: 2,
            height: 2,
            channel_count: 4,
            has_transparency: false,
        };
        assert!(matches!(
            backend.create_texture(&desc, &[0; 3]),
            Err(BackendError::InvalidTextureData {
                expected: 16,
                actual: 3
            })
        ));
        let handle = backend.create_texture(&desc, &[255; 16]).unwrap();
        assert!(!handle.is_null());
        assert_eq!(backend.live_texture_count(), 1);
        backend.destroy_texture(handle);
        assert_eq!(backend.live_texture_count(), 0);
    }

    #[test]
    fn geometry_ranges_are_returned_on_destroy() {
        let mut backend = HeadlessBackend::default();
        let (vertices, indices) = quad();
        let before = backend.vertex_buffer().free_space();

        let handle = backend.create_geometry(&vertices, &indices).unwrap();
        assert_eq!(
            backend.vertex_buffer().free_space(),
            before - 4 * std::mem::size_of::<Vertex3d>() as u64
        );
        backend.destroy_geometry(handle);
        assert_eq!(backend.vertex_buffer().free_space(), before);
        assert_eq!(backend.live_geometry_count(), 0);
    }

    #[test]
    fn geometry_buffers_grow_on_demand() {
        let mut backend = HeadlessBackend::new(HeadlessConfig {
            vertex_buffer_size: 64,
            index_buffer_size: 8,
            max_texture_size: 16,
        });
        let (vertices, indices) = quad();
        backend.create_geometry(&vertices, &indices).unwrap();
        backend.create_geometry(&vertices, &indices).unwrap();
        assert!(backend.vertex_buffer().total_size() >= 160);
        assert!(backend.index_buffer().total_size() >= 48);
    }

    #[test]
    fn shader_instances_are_bounded() {
        let mut backend = HeadlessBackend::default();
        let shader = backend
            .create_shader(&ShaderDesc {
                name: "builtin.material",
                stages: &[ShaderStage::Vertex, ShaderStage::Fragment],
                max_instances: 2,
            })
            .unwrap();

        assert_eq!(backend.acquire_shader_instance_resources(shader), Ok(0));
        assert_eq!(backend.acquire_shader_instance_resources(shader), Ok(1));
        assert!(matches!(
            backend.acquire_shader_instance_resources(shader),
            Err(BackendError::InstancesExhausted { max: 2, .. })
        ));
        backend.release_shader_instance_resources(shader, 0).unwrap();
        assert_eq!(backend.acquire_shader_instance_resources(shader), Ok(0));
        assert_eq!(backend.shader_instance_count(shader), 2);
    }
}
