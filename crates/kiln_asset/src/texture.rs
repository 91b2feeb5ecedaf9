//! Texture system
//!
//! Name-keyed, reference-counted textures. Image data comes from the
//! resource loader, is uploaded through the backend and handed straight
//! back to the loader; only the backend handle and a few properties stay
//! resident in the slot.

use bytemuck::{Pod, Zeroable};
use kiln_core::state::{StateCarver, StateLayout};
use kiln_render::{GpuHandle, RenderBackend, TextureDesc};

use crate::cache::{ReleaseOutcome, ResourceCache, ResourceName};
use crate::error::AssetError;
use crate::resource::{ResourceData, ResourceError, ResourceLoader, ResourceType};

pub const DEFAULT_TEXTURE_NAME: &str = "default";

const DEFAULT_TEXTURE_DIMENSION: u32 = 256;
const DEFAULT_TEXTURE_SQUARE: u32 = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TextureSystemConfig {
    pub max_texture_count: u32,
}

impl Default for TextureSystemConfig {
    fn default() -> Self {
        Self {
            max_texture_count: 65536,
        }
    }
}

/// Handle returned by [`TextureSystem::acquire`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TextureRef {
    Default,
    Slot { id: u32, generation: u32 },
}

/// Snapshot of a resident texture.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Texture {
    /// `None` for the default texture.
    pub id: Option<u32>,
    pub generation: Option<u32>,
    pub name: String,
    pub width: u32,
    pub height: u32,
    pub channel_count: u8,
    pub has_transparency: bool,
    pub handle: GpuHandle,
}

#[derive(Debug, Clone, Copy, Pod, Zeroable)]
#[repr(C)]
struct TextureRecord {
    name: ResourceName,
    handle: GpuHandle,
    width: u32,
    height: u32,
    channel_count: u32,
    has_transparency: u32,
}

impl TextureRecord {
    fn snapshot(&self, id: Option<u32>, generation: Option<u32>) -> Texture {
        Texture {
            id,
            generation,
            name: self.name.as_str().to_string(),
            width: self.width,
            height: self.height,
            channel_count: self.channel_count as u8,
            has_transparency: self.has_transparency != 0,
            handle: self.handle,
        }
    }
}

fn is_default(name: &str) -> bool {
    name.eq_ignore_ascii_case(DEFAULT_TEXTURE_NAME)
}

pub struct TextureSystem<'a> {
    config: TextureSystemConfig,
    cache: ResourceCache<'a, TextureRecord>,
    default: TextureRecord,
}

impl<'a> TextureSystem<'a> {
    fn layout(config: &TextureSystemConfig) -> StateLayout {
        ResourceCache::<TextureRecord>::layout(
            StateLayout::new(),
            config.max_texture_count as usize,
        )
    }

    /// Bytes of state block [`init`](Self::init) needs for `config`.
    pub fn state_size(config: &TextureSystemConfig) -> u64 {
        Self::layout(config).size()
    }

    pub fn init(
        block: &'a mut [u8],
        config: TextureSystemConfig,
        backend: &mut dyn RenderBackend,
    ) -> Result<Self, AssetError> {
        let layout = Self::layout(&config);
        let mut carver = StateCarver::new(block, &layout)?;
        let cache = ResourceCache::carve("texture", &mut carver, config.max_texture_count as usize)?;
        let default = create_default_texture(backend)?;

        tracing::info!(
            max_textures = config.max_texture_count,
            state_bytes = layout.size(),
            "texture system initialized"
        );
        Ok(Self {
            config,
            cache,
            default,
        })
    }

    pub fn config(&self) -> &TextureSystemConfig {
        &self.config
    }

    /// Take a reference on `name`, loading it on first use.
    pub fn acquire(
        &mut self,
        name: &str,
        auto_release: bool,
        backend: &mut dyn RenderBackend,
        loader: &mut dyn ResourceLoader,
    ) -> Result<TextureRef, AssetError> {
        if is_default(name) {
            tracing::warn!("acquire called for the default texture; use get_default");
            return Ok(TextureRef::Default);
        }
        let stored_name = ResourceName::new(name)?;

        let id = self.cache.acquire(name, auto_release, |_, record| {
            load_texture(name, stored_name, record, backend, loader)
        })?;
        Ok(self.slot_ref(id))
    }

    /// [`acquire`](Self::acquire), falling back to the default texture.
    pub fn acquire_or_default(
        &mut self,
        name: &str,
        auto_release: bool,
        backend: &mut dyn RenderBackend,
        loader: &mut dyn ResourceLoader,
    ) -> TextureRef {
        self.acquire(name, auto_release, backend, loader)
            .unwrap_or_else(|e| {
                tracing::warn!(name, error = %e, "using default texture");
                TextureRef::Default
            })
    }

    /// Drop a reference on `name`. The default texture is never released.
    pub fn release(
        &mut self,
        name: &str,
        backend: &mut dyn RenderBackend,
    ) -> Result<ReleaseOutcome, AssetError> {
        if is_default(name) {
            return Ok(ReleaseOutcome::Retained);
        }
        self.cache
            .release(name, |record| backend.destroy_texture(record.handle))
    }

    /// Release through a handle instead of a name.
    pub fn release_ref(
        &mut self,
        texture: TextureRef,
        backend: &mut dyn RenderBackend,
    ) -> Result<ReleaseOutcome, AssetError> {
        match self.get(texture) {
            None => {
                tracing::warn!(?texture, "release of a stale texture handle");
                Ok(ReleaseOutcome::NotAcquired)
            }
            Some(t) if t.id.is_none() => Ok(ReleaseOutcome::Retained),
            Some(t) => self.release(&t.name, backend),
        }
    }

    /// Resolve `texture`, or `None` if the slot was unloaded or reused.
    pub fn get(&self, texture: TextureRef) -> Option<Texture> {
        match texture {
            TextureRef::Default => Some(self.get_default()),
            TextureRef::Slot { id, generation } => {
                let header = self.cache.header(id)?;
                if header.generation != generation {
                    return None;
                }
                let record = self.cache.get(id)?;
                Some(record.snapshot(Some(id), Some(generation)))
            }
        }
    }

    pub fn get_default(&self) -> Texture {
        self.default.snapshot(None, None)
    }

    pub fn reference_count(&self, name: &str) -> u64 {
        self.cache.reference(name).map_or(0, |r| r.reference_count)
    }

    /// Textures currently resident (default excluded).
    pub fn loaded_count(&self) -> usize {
        self.cache.live_count()
    }

    /// Destroy every resident texture and the default.
    pub fn shutdown(&mut self, backend: &mut dyn RenderBackend) {
        for id in self.cache.live_ids() {
            if let Some(record) = self.cache.get(id) {
                backend.destroy_texture(record.handle);
            }
            self.cache.free_slot(id);
        }
        backend.destroy_texture(self.default.handle);
        self.default.handle = GpuHandle::NULL;
        tracing::info!("texture system shut down");
    }

    fn slot_ref(&self, id: u32) -> TextureRef {
        let generation = self.cache.header(id).map_or(0, |h| h.generation);
        TextureRef::Slot { id, generation }
    }
}

impl std::fmt::Debug for TextureSystem<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TextureSystem")
            .field("config", &self.config)
            .field("cache", &self.cache)
            .finish_non_exhaustive()
    }
}

fn load_texture(
    name: &str,
    stored_name: ResourceName,
    record: &mut TextureRecord,
    backend: &mut dyn RenderBackend,
    loader: &mut dyn ResourceLoader,
) -> Result<(), AssetError> {
    let load_error = |source| AssetError::Load {
        kind: "texture",
        name: name.to_string(),
        source,
    };

    let resource = loader
        .load(name, ResourceType::Image)
        .map_err(load_error)?;
    let ResourceData::Image(image) = &resource.data else {
        let found = resource.kind();
        loader.unload(resource);
        return Err(load_error(ResourceError::UnexpectedType {
            name: name.to_string(),
            expected: ResourceType::Image,
            found,
        }));
    };

    let desc = TextureDesc {
        width: image.width,
        height: image.height,
        channel_count: image.channel_count,
        has_transparency: image.has_transparency(),
    };
    let uploaded = backend.create_texture(&desc, &image.pixels);
    loader.unload(resource);
    let handle = uploaded.map_err(|source| AssetError::Backend {
        kind: "texture",
        name: name.to_string(),
        source,
    })?;

    *record = TextureRecord {
        name: stored_name,
        handle,
        width: desc.width,
        height: desc.height,
        channel_count: u32::from(desc.channel_count),
        has_transparency: u32::from(desc.has_transparency),
    };
    Ok(())
}

/// 256x256 blue and white checkerboard.
fn default_texture_pixels() -> Vec<u8> {
    let dim = DEFAULT_TEXTURE_DIMENSION;
    let mut pixels = vec![255u8; (dim * dim * 4) as usize];
    for row in 0..dim {
        for col in 0..dim {
            if (row / DEFAULT_TEXTURE_SQUARE + col / DEFAULT_TEXTURE_SQUARE) % 2 == 0 {
                let index = ((row * dim + col) * 4) as usize;
                pixels[index] = 0;
                pixels[index + 1] = 0;
            }
        }
    }
    pixels
}

fn create_default_texture(backend: &mut dyn RenderBackend) -> Result<TextureRecord, AssetError> {
    tracing::debug!("creating default texture");
    let desc = TextureDesc {
        width: DEFAULT_TEXTURE_DIMENSION,
        height: DEFAULT_TEXTURE_DIMENSION,
        channel_count: 4,
        has_transparency: false,
    };
    let handle = backend
        .create_texture(&desc, &default_texture_pixels())
        .map_err(|source| AssetError::Backend {
            kind: "texture",
            name: DEFAULT_TEXTURE_NAME.to_string(),
            source,
        })?;
    Ok(TextureRecord {
        name: ResourceName::new(DEFAULT_TEXTURE_NAME)?,
        handle,
        width: desc.width,
        height: desc.height,
        channel_count: 4,
        has_transparency: 0,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn checkerboard_alternates_every_square() {
        let pixels = default_texture_pixels();
        let at = |row: u32, col: u32| {
            let i = ((row * DEFAULT_TEXTURE_DIMENSION + col) * 4) as usize;
            [pixels[i], pixels[i + 1], pixels[i + 2], pixels[i + 3]]
        };
        assert_eq!(at(0, 0), [0, 0, 255, 255]);
        assert_eq!(at(0, 64), [255, 255, 255, 255]);
        assert_eq!(at(64, 64), [0, 0, 255, 255]);
        assert_eq!(at(255, 0), [255, 255, 255, 255]);
    }

    #[test]
    fn state_size_scales_with_capacity() {
        let small = TextureSystem::state_size(&TextureSystemConfig {
            max_texture_count: 4,
        });
        let large = TextureSystem::state_size(&TextureSystemConfig {
            max_texture_count: 8,
        });
        assert!(small > 0);
        assert_eq!(large, small * 2);
    }

    #[test]
    fn default_name_is_case_insensitive() {
        assert!(is_default("default"));
        assert!(is_default("DEFAULT"));
        assert!(!is_default("defaults"));
    }
}
