//! Kiln Engine Runtime
//!
//! Boots the memory and asset systems on the headless backend, runs a short
//! asset lifecycle, and reports memory use.
//!
//! Usage: `kiln [settings.json]`

mod engine;

use anyhow::{Context, Result};
use kiln_core::memory::MemorySystem;
use kiln_services::EngineSettings;
use tracing_subscriber::EnvFilter;

use crate::engine::Engine;

fn main() -> Result<()> {
    let settings = match std::env::args().nth(1) {
        Some(path) => EngineSettings::load(&path)
            .with_context(|| format!("could not load settings from {path}"))?,
        None => EngineSettings::default(),
    };

    // RUST_LOG wins over the configured level.
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&settings.memory.log_level))
        .context("invalid log level")?;
    tracing_subscriber::fmt().with_env_filter(filter).init();

    tracing::info!("Kiln Engine v{}", kiln_core::VERSION);

    let mut memory = MemorySystem::new(settings.memory_config());
    {
        let mut engine = Engine::init(&memory, &settings)?;
        engine.run_demo()?;
        engine.shutdown();
    }

    tracing::info!("\n{}", memory.usage_report());
    memory.shutdown();
    Ok(())
}
