//! Sub-allocated render buffers
//!
//! One large buffer per kind (vertex, index, ...) is carved into ranges by a
//! [`FreeList`]. When the free list cannot satisfy a request the buffer can
//! grow, which is the fallback path geometry uploads rely on.

use kiln_core::memory::{FreeList, FreeListError};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenderBufferKind {
    Vertex,
    Index,
    Uniform,
    Staging,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RenderBufferError {
    #[error(transparent)]
    FreeList(#[from] FreeListError),

    #[error("range at offset {offset} of {size} bytes is outside a {total} byte buffer")]
    OutOfRange { offset: u64, size: u64, total: u64 },
}

/// Host-side stand-in for a GPU buffer plus its range allocator.
#[derive(Debug)]
pub struct RenderBuffer {
    kind: RenderBufferKind,
    data: Vec<u8>,
    freelist: FreeList,
}

impl RenderBuffer {
    pub fn new(kind: RenderBufferKind, total_size: u64) -> Self {
        Self {
            kind,
            data: vec![0; total_size as usize],
            freelist: FreeList::new(total_size),
        }
    }

    #[inline]
    pub fn kind(&self) -> RenderBufferKind {
        self.kind
    }

    #[inline]
    pub fn total_size(&self) -> u64 {
        self.freelist.total_size()
    }

    #[inline]
    pub fn free_space(&self) -> u64 {
        self.freelist.free_space()
    }

    /// Reserve `size` bytes, returning the offset of the range.
    pub fn allocate(&mut self, size: u64) -> Result<u64, RenderBufferError> {
        Ok(self.freelist.alloc(size)?)
    }

    /// Reserve `size` bytes, growing the buffer if no free range is large enough.
    pub fn allocate_or_grow(&mut self, size: u64) -> Result<u64, RenderBufferError> {
        match self.freelist.alloc(size) {
            Err(FreeListError::OutOfSpace { .. }) => {
                let total = self.total_size();
                let new_size = (total * 2).max(total + size);
                tracing::debug!(
                    kind = ?self.kind,
                    from = total,
                    to = new_size,
                    request = size,
                    "render buffer full, growing"
                );
                self.resize(new_size)?;
                Ok(self.freelist.alloc(size)?)
            }
            other => Ok(other?),
        }
    }

    /// Return a range previously handed out by [`allocate`](Self::allocate).
    pub fn free(&mut self, size: u64, offset: u64) -> Result<(), RenderBufferError> {
        Ok(self.freelist.free(size, offset)?)
    }

    /// Grow to `new_size` bytes, keeping existing contents and ranges.
    pub fn resize(&mut self, new_size: u64) -> Result<(), RenderBufferError> {
        self.freelist.resize(new_size)?;
        self.data.resize(new_size as usize, 0);
        Ok(())
    }

    /// Copy `bytes` into the buffer at `offset`.
    pub fn load_range(&mut self, offset: u64, bytes: &[u8]) -> Result<(), RenderBufferError> {
        let range = self.checked_range(offset, bytes.len() as u64)?;
        self.data[range].copy_from_slice(bytes);
        Ok(())
    }

    pub fn read_range(&self, offset: u64, size: u64) -> Result<&[u8], RenderBufferError> {
        let range = self.checked_range(offset, size)?;
        Ok(&self.data[range])
    }

    fn checked_range(
        &self,
        offset: u64,
        size: u64,
    ) -> Result<std::ops::Range<usize>, RenderBufferError> {
        let total = self.total_size();
        match offset.checked_add(size) {
            Some(end) if end <= total => Ok(offset as usize..end as usize),
            _ => Err(RenderBufferError::OutOfRange {
                offset,
                size,
                total,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ranges_are_sub_allocated() {
        let mut buffer = RenderBuffer::new(RenderBufferKind::Vertex, 256);
        let a = buffer.allocate(100).unwrap();
        let b = buffer.allocate(100).unwrap();
        assert_eq!((a, b), (0, 100));
        assert_eq!(buffer.free_space(), 56);

        buffer.free(100, a).unwrap();
        assert_eq!(buffer.allocate(60).unwrap(), 0);
    }

    #[test]
    fn plain_allocate_fails_when_full() {
        let mut buffer = RenderBuffer::new(RenderBufferKind::Index, 64);
        buffer.allocate(64).unwrap();
        assert!(matches!(
            buffer.allocate(1),
            Err(RenderBufferError::FreeList(FreeListError::OutOfSpace { .. }))
        ));
    }

    #[test]
    fn grows_when_free_list_is_exhausted() {
        let mut buffer = RenderBuffer::new(RenderBufferKind::Vertex, 128);
        buffer.allocate(100).unwrap();
        buffer.load_range(0, &[7; 100]).unwrap();

        let offset = buffer.allocate_or_grow(100).unwrap();
        assert_eq!(offset, 100);
        assert_eq!(buffer.total_size(), 256);
        // Existing contents survive the resize.
        assert_eq!(buffer.read_range(0, 100).unwrap(), &[7; 100][..]);
    }

    #[test]
    fn growth_covers_requests_larger_than_double() {
        let mut buffer = RenderBuffer::new(RenderBufferKind::Staging, 16);
        let offset = buffer.allocate_or_grow(1000).unwrap();
        assert_eq!(offset, 0);
        assert_eq!(buffer.total_size(), 1016);
    }

    #[test]
    fn out_of_range_writes_are_rejected() {
        let mut buffer = RenderBuffer::new(RenderBufferKind::Uniform, 32);
        assert_eq!(
            buffer.load_range(30, &[0; 4]),
            Err(RenderBufferError::OutOfRange {
                offset: 30,
                size: 4,
                total: 32
            })
        );
    }
}
