//! Kiln Services Layer
//!
//! Platform-facing services. Currently the engine settings file.

pub mod settings;

pub use settings::{EngineSettings, SettingsError};
