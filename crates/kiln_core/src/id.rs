//! Reserved identifier values
//!
//! Plain-old-data records (slot headers, table entries) cannot hold an
//! `Option`, so they store [`INVALID_ID`] instead. Every public accessor
//! converts back to `Option` through [`id_to_option`] so the sentinel never
//! leaks into caller code as a usable index.

/// Marks an id, handle or generation field as "no value".
pub const INVALID_ID: u32 = u32::MAX;

/// Convert a raw stored id to an `Option`.
#[inline]
pub const fn id_to_option(raw: u32) -> Option<u32> {
    if raw == INVALID_ID {
        None
    } else {
        Some(raw)
    }
}

/// Convert an optional id to its stored representation.
#[inline]
pub const fn option_to_id(id: Option<u32>) -> u32 {
    match id {
        Some(id) => id,
        None => INVALID_ID,
    }
}
