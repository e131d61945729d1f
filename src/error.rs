//! Typed errors for the allocator's internal collaborators.
//!
//! The public `allocate`/`release` pair keeps the null-on-failure contract
//! the spec mandates; these types are for the boundary underneath it —
//! page sources and construction-time configuration — which fail loudly
//! and specifically instead of being folded into a single opaque error.

use thiserror::Error;

/// A page source failed to produce memory.
#[derive(Debug, Error)]
pub enum PageSourceError {
    #[error("failed to map {requested} anonymous bytes (errno {errno})")]
    MapFailed { requested: usize, errno: i32 },

    #[error("failed to extend the heap by {requested} bytes via sbrk (errno {errno})")]
    SbrkFailed { requested: usize, errno: i32 },

    #[error("test page source exhausted its {capacity}-byte arena")]
    ArenaExhausted { capacity: usize },
}

/// A `Config` failed validation.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("min_block ({0}) must be a power of two")]
    MinBlockNotPowerOfTwo(usize),

    #[error("min_block ({min_block}) must be at least the chunk header size ({header_size})")]
    MinBlockTooSmall { min_block: usize, header_size: usize },

    #[error("levels must be at least 1, got {0}")]
    LevelsZero(usize),

    #[error("min_block << (levels - 1) overflows usize (min_block={min_block}, levels={levels})")]
    LevelsOverflow { min_block: usize, levels: usize },

    #[error("default_heap_bytes ({default_heap_bytes}) must be at least one order-0 footprint ({min_footprint})")]
    DefaultHeapTooSmall {
        default_heap_bytes: usize,
        min_footprint: usize,
    },
}
