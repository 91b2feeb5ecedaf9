//! Kiln Engine Core
//!
//! Contains the memory and lifetime infrastructure every other system
//! builds on:
//! - Region-chained arenas and the tagged memory system
//! - Free-list range allocation
//! - Direct-indexed name tables
//! - The state-sizing protocol used by subsystem `init`

pub mod containers;
pub mod id;
pub mod memory;
pub mod state;

pub use id::INVALID_ID;

/// Engine version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
