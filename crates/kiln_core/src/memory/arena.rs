//! Region-chained bump allocator
//!
//! An [`Arena`] owns a chain of fixed-capacity regions. Allocation bumps a
//! cursor inside the current region; when the request does not fit, later
//! regions in the chain are tried and, failing that, a new region is linked
//! on. Individual allocations are never freed. The whole arena is released
//! by [`Arena::clear`] or on drop.
//!
//! Allocation only needs `&Arena`, so several subsystems can hold slices from
//! the same arena at once. `clear` and `reset` take `&mut self`, which means
//! the borrow checker rejects any rewind while a slice is still alive.

use std::alloc::{self, Layout};
use std::cell::{Cell, RefCell};
use std::fmt;
use std::ptr::NonNull;

/// Default capacity of a freshly linked region (1 MiB).
pub const DEFAULT_REGION_SIZE: usize = 1024 * 1024;

/// Alignment used by [`Arena::alloc`].
pub const DEFAULT_ALIGN: usize = 8;

/// Every region's base address is aligned to this boundary.
const REGION_ALIGN: usize = 16;

/// One contiguous chunk of zeroed memory owned by an arena.
struct Region {
    data: NonNull<u8>,
    layout: Layout,
    current_size: usize,
}

impl Region {
    fn new(max_size: usize) -> Self {
        let layout = match Layout::from_size_align(max_size.max(1), REGION_ALIGN) {
            Ok(layout) => layout,
            Err(_) => panic!("arena region of {max_size} bytes exceeds the addressable limit"),
        };
        // SAFETY: layout has a non-zero size.
        let raw = unsafe { alloc::alloc_zeroed(layout) };
        let Some(data) = NonNull::new(raw) else {
            // Running out of raw memory is unrecoverable.
            alloc::handle_alloc_error(layout);
        };
        Self {
            data,
            layout,
            current_size: 0,
        }
    }

    #[inline]
    fn max_size(&self) -> usize {
        self.layout.size()
    }

    /// Reserve `size` bytes aligned to `align`, returning the start offset.
    fn try_bump(&mut self, size: usize, align: usize) -> Option<usize> {
        let base = self.data.as_ptr() as usize;
        let start = align_up(base.checked_add(self.current_size)?, align)? - base;
        let end = start.checked_add(size)?;
        if end > self.max_size() {
            return None;
        }
        self.current_size = end;
        Some(start)
    }
}

impl Drop for Region {
    fn drop(&mut self) {
        // SAFETY: `data` was returned by `alloc_zeroed` with exactly this layout.
        unsafe { alloc::dealloc(self.data.as_ptr(), self.layout) };
    }
}

#[inline]
fn align_up(addr: usize, align: usize) -> Option<usize> {
    debug_assert!(align.is_power_of_two());
    Some(addr.checked_add(align - 1)? & !(align - 1))
}

/// Region-based bump allocator with whole-arena deallocation.
///
/// Not thread-safe; the interior cells make it `!Sync`.
pub struct Arena {
    regions: RefCell<Vec<Region>>,
    current: Cell<usize>,
    default_region_size: usize,
    num_allocations: Cell<u64>,
    num_dynamic_allocations: Cell<u64>,
}

impl Arena {
    /// Create an empty arena. No memory is reserved until the first allocation.
    pub fn new() -> Self {
        Self::with_region_size(DEFAULT_REGION_SIZE)
    }

    /// Create an empty arena whose regions hold at least `default_region_size` bytes.
    pub fn with_region_size(default_region_size: usize) -> Self {
        Self {
            regions: RefCell::new(Vec::new()),
            current: Cell::new(0),
            default_region_size: default_region_size.max(1),
            num_allocations: Cell::new(0),
            num_dynamic_allocations: Cell::new(0),
        }
    }

    #[inline]
    pub fn default_region_size(&self) -> usize {
        self.default_region_size
    }

    /// Allocate `size` zeroed bytes aligned to [`DEFAULT_ALIGN`].
    pub fn alloc(&self, size: usize) -> &mut [u8] {
        self.alloc_aligned(size, DEFAULT_ALIGN)
    }

    /// Allocate `size` zeroed bytes aligned to `align` (a power of two).
    ///
    /// Never fails: exhausting the underlying memory aborts the process.
    #[allow(clippy::mut_from_ref)]
    pub fn alloc_aligned(&self, size: usize, align: usize) -> &mut [u8] {
        assert!(align.is_power_of_two(), "alignment {align} is not a power of two");
        self.num_allocations.set(self.num_allocations.get() + 1);
        if size == 0 {
            return &mut [];
        }

        let mut regions = self.regions.borrow_mut();
        let mut idx = self.current.get();
        while idx < regions.len() {
            if let Some(offset) = regions[idx].try_bump(size, align) {
                self.current.set(idx);
                let base = regions[idx].data;
                // SAFETY: `offset..offset + size` lies inside the region and was
                // reserved by the bump above, so no other slice aliases it. Region
                // memory stays put until `clear`/`reset`/drop, all of which need
                // exclusive access to the arena.
                return unsafe { std::slice::from_raw_parts_mut(base.as_ptr().add(offset), size) };
            }
            idx += 1;
        }

        let padding = align.saturating_sub(REGION_ALIGN);
        let max_size = size.saturating_add(padding).max(self.default_region_size);
        let mut region = Region::new(max_size);
        let Some(offset) = region.try_bump(size, align) else {
            unreachable!("fresh region of {max_size} bytes cannot hold {size} bytes");
        };
        let base = region.data;
        regions.push(region);
        self.current.set(regions.len() - 1);
        self.num_dynamic_allocations
            .set(self.num_dynamic_allocations.get() + 1);
        tracing::debug!(
            region = regions.len() - 1,
            region_bytes = max_size,
            request = size,
            "arena linked a new region"
        );

        // SAFETY: same as above; the region was created for this request.
        unsafe { std::slice::from_raw_parts_mut(base.as_ptr().add(offset), size) }
    }

    /// Allocate a zeroed slice of `len` plain-old-data values.
    #[allow(clippy::mut_from_ref)]
    pub fn alloc_slice<T: bytemuck::Pod>(&self, len: usize) -> &mut [T] {
        let bytes = len.saturating_mul(std::mem::size_of::<T>());
        if bytes == 0 {
            self.num_allocations.set(self.num_allocations.get() + 1);
            return &mut [];
        }
        let raw = self.alloc_aligned(bytes, std::mem::align_of::<T>());
        bytemuck::cast_slice_mut(raw)
    }

    /// Release every region and zero all counters.
    pub fn clear(&mut self) {
        let regions = self.regions.get_mut();
        let released = regions.len();
        regions.clear();
        self.current.set(0);
        self.num_allocations.set(0);
        self.num_dynamic_allocations.set(0);
        if released > 0 {
            tracing::debug!(regions = released, "arena cleared");
        }
    }

    /// Rewind every region to empty while keeping the memory linked.
    ///
    /// `num_dynamic_allocations` is kept since no region is created or freed.
    pub fn reset(&mut self) {
        for region in self.regions.get_mut().iter_mut() {
            // SAFETY: exclusive access guarantees no slice into the region is alive.
            unsafe { std::ptr::write_bytes(region.data.as_ptr(), 0, region.current_size) };
            region.current_size = 0;
        }
        self.current.set(0);
        self.num_allocations.set(0);
    }

    /// Bytes handed out (including alignment padding) across all regions.
    pub fn size(&self) -> usize {
        self.regions.borrow().iter().map(|r| r.current_size).sum()
    }

    /// Total capacity across all regions.
    pub fn max_size(&self) -> usize {
        self.regions.borrow().iter().map(Region::max_size).sum()
    }

    pub fn region_count(&self) -> usize {
        self.regions.borrow().len()
    }

    pub fn num_allocations(&self) -> u64 {
        self.num_allocations.get()
    }

    pub fn num_dynamic_allocations(&self) -> u64 {
        self.num_dynamic_allocations.get()
    }
}

impl Default for Arena {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Arena {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Arena")
            .field("regions", &self.region_count())
            .field("size", &self.size())
            .field("max_size", &self.max_size())
            .field("num_allocations", &self.num_allocations())
            .field("num_dynamic_allocations", &self.num_dynamic_allocations())
            .finish()
    }
}
