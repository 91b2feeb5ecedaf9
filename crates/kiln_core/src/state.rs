//! State-sizing protocol
//!
//! Subsystems report the exact number of bytes their bookkeeping needs
//! (`state_size(config)`), the bootstrap allocates one block of that size
//! from an arena, and the subsystem's `init` carves its header and trailing
//! arrays out of that block. Nothing else is allocated for bookkeeping after
//! `init`, so the engine's footprint is known at startup.
//!
//! [`StateLayout`] computes the running offsets; [`StateCarver`] replays the
//! same sequence over a real block and hands back typed, bounds-checked
//! slices. Both must be driven in the same order.

use bytemuck::Pod;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StateError {
    #[error("state block of {provided} bytes is smaller than the {required} bytes required")]
    BlockTooSmall { required: u64, provided: u64 },

    #[error("state block is not aligned to {align} bytes")]
    Misaligned { align: usize },
}

#[inline]
const fn align_up(offset: usize, align: usize) -> usize {
    (offset + align - 1) & !(align - 1)
}

/// Byte layout of a subsystem's state block: header first, arrays after.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StateLayout {
    size: usize,
    align: usize,
}

impl StateLayout {
    pub const fn new() -> Self {
        Self { size: 0, align: 1 }
    }

    /// Reserve one `H` record.
    pub fn header<H: Pod>(self) -> Self {
        self.array::<H>(1)
    }

    /// Reserve `len` contiguous `T` values, aligned for `T`.
    pub fn array<T: Pod>(self, len: usize) -> Self {
        self.bytes(len * std::mem::size_of::<T>(), std::mem::align_of::<T>())
    }

    /// Reserve `len` raw bytes aligned to `align`.
    pub fn bytes(mut self, len: usize, align: usize) -> Self {
        debug_assert!(align.is_power_of_two());
        self.size = align_up(self.size, align) + len;
        self.align = self.align.max(align);
        self
    }

    /// Total bytes, including interior padding.
    #[inline]
    pub fn size(&self) -> u64 {
        self.size as u64
    }

    /// Alignment the block's start address must satisfy.
    #[inline]
    pub fn align(&self) -> usize {
        self.align
    }
}

impl Default for StateLayout {
    fn default() -> Self {
        Self::new()
    }
}

/// Splits a state block into typed views following a [`StateLayout`].
pub struct StateCarver<'a> {
    rest: &'a mut [u8],
    offset: usize,
}

impl<'a> StateCarver<'a> {
    /// Validate `block` against `layout` and start carving from offset 0.
    pub fn new(block: &'a mut [u8], layout: &StateLayout) -> Result<Self, StateError> {
        if (block.len() as u64) < layout.size() {
            return Err(StateError::BlockTooSmall {
                required: layout.size(),
                provided: block.len() as u64,
            });
        }
        if block.as_ptr() as usize % layout.align() != 0 {
            return Err(StateError::Misaligned {
                align: layout.align(),
            });
        }
        Ok(Self {
            rest: block,
            offset: 0,
        })
    }

    /// Carve the next `H` record.
    pub fn header<H: Pod>(&mut self) -> &'a mut H {
        &mut self.array::<H>(1)[0]
    }

    /// Carve the next `len` values of `T`.
    pub fn array<T: Pod>(&mut self, len: usize) -> &'a mut [T] {
        let bytes = self.bytes(len * std::mem::size_of::<T>(), std::mem::align_of::<T>());
        bytemuck::cast_slice_mut(bytes)
    }

    /// Carve the next `len` raw bytes aligned to `align`.
    ///
    /// # Panics
    ///
    /// If the carve sequence asks for more than the layout reserved.
    pub fn bytes(&mut self, len: usize, align: usize) -> &'a mut [u8] {
        let padding = align_up(self.offset, align) - self.offset;
        let rest = std::mem::take(&mut self.rest);
        let (_, rest) = rest.split_at_mut(padding);
        let (head, tail) = rest.split_at_mut(len);
        self.rest = tail;
        self.offset += padding + len;
        head
    }

    /// Bytes carved so far, padding included.
    #[inline]
    pub fn offset(&self) -> usize {
        self.offset
    }
}
