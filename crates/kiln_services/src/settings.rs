//! Settings management
//!
//! Engine settings live in one JSON file. Every section and field is
//! optional; anything missing takes its default.

use std::path::Path;

use kiln_asset::{
    GeometrySystemConfig, MaterialSystemConfig, ShaderSystemConfig, TextureSystemConfig,
};
use kiln_core::memory::{MemorySystemConfig, DEFAULT_REGION_SIZE};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("failed to read settings from {path}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid settings JSON")]
    Parse(#[from] serde_json::Error),

    #[error("invalid setting {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

/// Engine settings
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineSettings {
    pub memory: MemorySettings,
    pub assets: AssetSettings,
    pub textures: TextureSettings,
    pub materials: MaterialSettings,
    pub geometries: GeometrySettings,
    pub shaders: ShaderSettings,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MemorySettings {
    /// Minimum size of each arena region, in bytes.
    pub default_region_size: usize,
    /// `tracing` filter directive, overridden by `RUST_LOG`.
    pub log_level: String,
}

impl Default for MemorySettings {
    fn default() -> Self {
        Self {
            default_region_size: DEFAULT_REGION_SIZE,
            log_level: "info".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AssetSettings {
    pub base_path: String,
}

impl Default for AssetSettings {
    fn default() -> Self {
        Self {
            base_path: "assets".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TextureSettings {
    pub max_texture_count: u32,
}

impl Default for TextureSettings {
    fn default() -> Self {
        Self {
            max_texture_count: TextureSystemConfig::default().max_texture_count,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MaterialSettings {
    pub max_material_count: u32,
}

impl Default for MaterialSettings {
    fn default() -> Self {
        Self {
            max_material_count: MaterialSystemConfig::default().max_material_count,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GeometrySettings {
    pub max_geometry_count: u32,
}

impl Default for GeometrySettings {
    fn default() -> Self {
        Self {
            max_geometry_count: GeometrySystemConfig::default().max_geometry_count,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ShaderSettings {
    pub max_shader_count: u32,
}

impl Default for ShaderSettings {
    fn default() -> Self {
        Self {
            max_shader_count: ShaderSystemConfig::default().max_shader_count,
        }
    }
}

impl EngineSettings {
    /// Read and validate a settings file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, SettingsError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| SettingsError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let settings = Self::from_json_str(&text)?;
        tracing::info!(path = %path.display(), "settings loaded");
        Ok(settings)
    }

    /// Parse and validate settings JSON.
    pub fn from_json_str(json: &str) -> Result<Self, SettingsError> {
        let settings: Self = serde_json::from_str(json)?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn to_json_string(&self) -> Result<String, SettingsError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn validate(&self) -> Result<(), SettingsError> {
        fn non_zero(field: &'static str, value: u64) -> Result<(), SettingsError> {
            if value == 0 {
                return Err(SettingsError::Invalid {
                    field,
                    reason: "must be greater than zero".to_string(),
                });
            }
            Ok(())
        }

        non_zero(
            "memory.default_region_size",
            self.memory.default_region_size as u64,
        )?;
        non_zero(
            "textures.max_texture_count",
            u64::from(self.textures.max_texture_count),
        )?;
        non_zero(
            "materials.max_material_count",
            u64::from(self.materials.max_material_count),
        )?;
        non_zero(
            "geometries.max_geometry_count",
            u64::from(self.geometries.max_geometry_count),
        )?;
        non_zero(
            "shaders.max_shader_count",
            u64::from(self.shaders.max_shader_count),
        )?;
        if self.memory.log_level.trim().is_empty() {
            return Err(SettingsError::Invalid {
                field: "memory.log_level",
                reason: "must not be empty".to_string(),
            });
        }
        Ok(())
    }

    pub fn memory_config(&self) -> MemorySystemConfig {
        MemorySystemConfig {
            default_region_size: self.memory.default_region_size,
        }
    }

    pub fn texture_config(&self) -> TextureSystemConfig {
        TextureSystemConfig {
            max_texture_count: self.textures.max_texture_count,
        }
    }

    pub fn material_config(&self) -> MaterialSystemConfig {
        MaterialSystemConfig {
            max_material_count: self.materials.max_material_count,
        }
    }

    pub fn geometry_config(&self) -> GeometrySystemConfig {
        GeometrySystemConfig {
            max_geometry_count: self.geometries.max_geometry_count,
        }
    }

    pub fn shader_config(&self) -> ShaderSystemConfig {
        ShaderSystemConfig {
            max_shader_count: self.shaders.max_shader_count,
        }
    }
}
