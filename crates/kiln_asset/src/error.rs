use kiln_core::containers::HashTableError;
use kiln_core::state::StateError;
use kiln_render::BackendError;
use thiserror::Error;

use crate::resource::ResourceError;

#[derive(Debug, Error)]
pub enum AssetError {
    #[error("{kind} cache is full ({capacity} slots)")]
    CacheFull { kind: &'static str, capacity: usize },

    #[error("{kind} '{name}' not found")]
    NotFound { kind: &'static str, name: String },

    #[error("name '{name}' exceeds {max} bytes")]
    NameTooLong { name: String, max: usize },

    #[error("failed to load {kind} '{name}'")]
    Load {
        kind: &'static str,
        name: String,
        #[source]
        source: ResourceError,
    },

    #[error("backend rejected {kind} '{name}'")]
    Backend {
        kind: &'static str,
        name: String,
        #[source]
        source: BackendError,
    },

    #[error("{kind} '{name}' already exists")]
    AlreadyExists { kind: &'static str, name: String },

    #[error("{kind} '{name}' still has {count} outstanding instances")]
    InUse {
        kind: &'static str,
        name: String,
        count: u32,
    },

    #[error(transparent)]
    State(#[from] StateError),

    #[error(transparent)]
    Table(#[from] HashTableError),
}
