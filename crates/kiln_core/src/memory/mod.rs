//! Memory management
//!
//! Region-chained arenas, a free-list range allocator for sub-allocating
//! external buffers, and the tagged memory system built on the arenas.

mod arena;
mod freelist;
mod system;

pub use arena::{Arena, DEFAULT_ALIGN, DEFAULT_REGION_SIZE};
pub use freelist::{FreeList, FreeListError};
pub use system::{format_bytes, MemorySystem, MemorySystemConfig, MemoryTag, TagUsage};
