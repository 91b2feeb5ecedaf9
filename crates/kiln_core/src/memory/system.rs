//! Tagged memory system
//!
//! Every [`MemoryTag`] owns its own [`Arena`], so each engine subsystem's
//! footprint can be reported and released independently.

use std::fmt::Write as _;

use super::arena::{Arena, DEFAULT_REGION_SIZE};

/// Category an allocation is charged to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MemoryTag {
    Unknown,
    Array,
    HashTable,
    State,
    Texture,
    Material,
    Geometry,
    Shader,
    Renderer,
    Game,
    Application,
    Frame,
}

impl MemoryTag {
    pub const COUNT: usize = 12;

    pub const ALL: [MemoryTag; Self::COUNT] = [
        MemoryTag::Unknown,
        MemoryTag::Array,
        MemoryTag::HashTable,
        MemoryTag::State,
        MemoryTag::Texture,
        MemoryTag::Material,
        MemoryTag::Geometry,
        MemoryTag::Shader,
        MemoryTag::Renderer,
        MemoryTag::Game,
        MemoryTag::Application,
        MemoryTag::Frame,
    ];

    pub fn name(self) -> &'static str {
        match self {
            MemoryTag::Unknown => "UNKNOWN",
            MemoryTag::Array => "ARRAY",
            MemoryTag::HashTable => "HASHTABLE",
            MemoryTag::State => "STATE",
            MemoryTag::Texture => "TEXTURE",
            MemoryTag::Material => "MATERIAL",
            MemoryTag::Geometry => "GEOMETRY",
            MemoryTag::Shader => "SHADER",
            MemoryTag::Renderer => "RENDERER",
            MemoryTag::Game => "GAME",
            MemoryTag::Application => "APPLICATION",
            MemoryTag::Frame => "FRAME",
        }
    }

    #[inline]
    fn index(self) -> usize {
        self as usize
    }
}

/// Snapshot of one tag's arena.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TagUsage {
    pub used: u64,
    pub reserved: u64,
    pub allocations: u64,
    pub regions: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemorySystemConfig {
    /// Minimum capacity of every region linked by a tag arena.
    pub default_region_size: usize,
}

impl Default for MemorySystemConfig {
    fn default() -> Self {
        Self {
            default_region_size: DEFAULT_REGION_SIZE,
        }
    }
}

/// One arena per memory tag.
#[derive(Debug)]
pub struct MemorySystem {
    arenas: [Arena; MemoryTag::COUNT],
}

impl MemorySystem {
    pub fn new(config: MemorySystemConfig) -> Self {
        tracing::info!(
            region_size = config.default_region_size,
            tags = MemoryTag::COUNT,
            "memory system initialized"
        );
        Self {
            arenas: std::array::from_fn(|_| Arena::with_region_size(config.default_region_size)),
        }
    }

    #[inline]
    pub fn arena(&self, tag: MemoryTag) -> &Arena {
        &self.arenas[tag.index()]
    }

    /// Allocate zeroed bytes charged to `tag`.
    #[allow(clippy::mut_from_ref)]
    pub fn allocate(&self, tag: MemoryTag, size: usize) -> &mut [u8] {
        if tag == MemoryTag::Unknown {
            tracing::warn!(size, "allocation charged to the UNKNOWN tag");
        }
        self.arena(tag).alloc(size)
    }

    /// Allocate zeroed bytes aligned to `align`, charged to `tag`.
    #[allow(clippy::mut_from_ref)]
    pub fn allocate_aligned(&self, tag: MemoryTag, size: usize, align: usize) -> &mut [u8] {
        self.arena(tag).alloc_aligned(size, align)
    }

    pub fn usage(&self, tag: MemoryTag) -> TagUsage {
        let arena = self.arena(tag);
        TagUsage {
            used: arena.size() as u64,
            reserved: arena.max_size() as u64,
            allocations: arena.num_allocations(),
            regions: arena.region_count() as u64,
        }
    }

    pub fn total_used(&self) -> u64 {
        MemoryTag::ALL.iter().map(|&t| self.usage(t).used).sum()
    }

    pub fn total_reserved(&self) -> u64 {
        MemoryTag::ALL.iter().map(|&t| self.usage(t).reserved).sum()
    }

    /// Release everything charged to `tag`.
    pub fn clear_tag(&mut self, tag: MemoryTag) {
        self.arenas[tag.index()].clear();
    }

    /// Rewind the per-frame arena. Intended to run once per frame.
    pub fn reset_frame(&mut self) {
        self.arenas[MemoryTag::Frame.index()].reset();
    }

    /// Human-readable per-tag usage table.
    pub fn usage_report(&self) -> String {
        let mut out = String::from("System memory use (tagged):\n");
        for tag in MemoryTag::ALL {
            let usage = self.usage(tag);
            let _ = writeln!(
                out,
                "  {:<12}: {:>10} used / {:>10} reserved ({} allocations)",
                tag.name(),
                format_bytes(usage.used),
                format_bytes(usage.reserved),
                usage.allocations
            );
        }
        let _ = writeln!(
            out,
            "  {:<12}: {:>10} used / {:>10} reserved",
            "TOTAL",
            format_bytes(self.total_used()),
            format_bytes(self.total_reserved())
        );
        out
    }

    /// Release every tag arena.
    pub fn shutdown(&mut self) {
        tracing::info!(used = self.total_used(), "memory system shutting down");
        for arena in &mut self.arenas {
            arena.clear();
        }
    }
}

impl Default for MemorySystem {
    fn default() -> Self {
        Self::new(MemorySystemConfig::default())
    }
}

/// Format a byte count with a binary unit (B, KiB, MiB, GiB).
pub fn format_bytes(bytes: u64) -> String {
    const KIB: u64 = 1024;
    const MIB: u64 = KIB * 1024;
    const GIB: u64 = MIB * 1024;
    match bytes {
        b if b >= GIB => format!("{:.2}GiB", b as f64 / GIB as f64),
        b if b >= MIB => format!("{:.2}MiB", b as f64 / MIB as f64),
        b if b >= KIB => format!("{:.2}KiB", b as f64 / KIB as f64),
        b => format!("{b}B"),
    }
}
