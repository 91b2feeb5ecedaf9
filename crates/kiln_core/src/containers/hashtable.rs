//! Fixed-capacity, direct-indexed name table
//!
//! A key is hashed straight to a slot index. There is no chaining, probing or
//! resizing: two keys that land on the same index share one slot and the last
//! `set` wins. Capacities are expected to be provisioned well above the
//! number of names in use.
//!
//! Two flavours exist:
//! - [`HashTable`] stores byte copies of plain-old-data values in one
//!   contiguous block of `capacity * element_size` bytes, either owned or
//!   carved out of a caller-provided block.
//! - [`PointerTable`] stores non-owning references. The pointee is owned
//!   elsewhere and the table never extends its lifetime.

use std::marker::PhantomData;
use std::ops::{Deref, DerefMut};
use std::rc::{Rc, Weak};

use bytemuck::Pod;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HashTableError {
    #[error("hash table capacity must be non-zero")]
    ZeroCapacity,

    #[error("hash table elements must have a non-zero size")]
    ZeroElementSize,

    #[error("hash table keys must be non-empty")]
    EmptyKey,

    #[error("hash table block of {provided} bytes is smaller than the {required} bytes required")]
    BlockTooSmall { required: usize, provided: usize },
}

/// Slot index of `key` in a table of `capacity` slots.
///
/// Multiplicative string hash (`h = h * 97 + byte`, wrapping) reduced modulo
/// the capacity.
pub fn hash_name(key: &str, capacity: usize) -> usize {
    const MULTIPLIER: u64 = 97;
    debug_assert!(capacity > 0);
    let hash = key
        .bytes()
        .fold(0u64, |h, b| h.wrapping_mul(MULTIPLIER).wrapping_add(u64::from(b)));
    (hash % capacity as u64) as usize
}

enum Storage<'a> {
    Owned(Vec<u8>),
    Borrowed(&'a mut [u8]),
}

impl Deref for Storage<'_> {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        match self {
            Storage::Owned(bytes) => bytes,
            Storage::Borrowed(bytes) => bytes,
        }
    }
}

impl DerefMut for Storage<'_> {
    fn deref_mut(&mut self) -> &mut [u8] {
        match self {
            Storage::Owned(bytes) => bytes,
            Storage::Borrowed(bytes) => bytes,
        }
    }
}

/// Value-mode table: every slot holds a byte copy of a `V`.
pub struct HashTable<'a, V: Pod> {
    capacity: usize,
    data: Storage<'a>,
    _marker: PhantomData<V>,
}

impl<V: Pod> HashTable<'static, V> {
    /// Allocate an owned, zeroed table.
    pub fn new(capacity: usize) -> Result<Self, HashTableError> {
        let required = Self::block_size(capacity)?;
        Ok(Self {
            capacity,
            data: Storage::Owned(vec![0; required]),
            _marker: PhantomData,
        })
    }
}

impl<'a, V: Pod> HashTable<'a, V> {
    /// Bytes needed to back a table of `capacity` slots.
    pub fn block_size(capacity: usize) -> Result<usize, HashTableError> {
        if capacity == 0 {
            return Err(HashTableError::ZeroCapacity);
        }
        let element_size = std::mem::size_of::<V>();
        if element_size == 0 {
            return Err(HashTableError::ZeroElementSize);
        }
        Ok(capacity * element_size)
    }

    /// Build a table over the front of `block`. The block is zeroed.
    pub fn from_block(block: &'a mut [u8], capacity: usize) -> Result<Self, HashTableError> {
        let required = Self::block_size(capacity)?;
        if block.len() < required {
            return Err(HashTableError::BlockTooSmall {
                required,
                provided: block.len(),
            });
        }
        let data = &mut block[..required];
        data.fill(0);
        Ok(Self {
            capacity,
            data: Storage::Borrowed(data),
            _marker: PhantomData,
        })
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    #[inline]
    pub fn element_size(&self) -> usize {
        std::mem::size_of::<V>()
    }

    #[inline]
    pub fn is_pointer(&self) -> bool {
        false
    }

    /// Slot index `key` maps to.
    #[inline]
    pub fn index_of(&self, key: &str) -> usize {
        hash_name(key, self.capacity)
    }

    fn slot_range(&self, key: &str) -> Result<std::ops::Range<usize>, HashTableError> {
        if key.is_empty() {
            return Err(HashTableError::EmptyKey);
        }
        let start = self.index_of(key) * self.element_size();
        Ok(start..start + self.element_size())
    }

    /// Copy `value` into the slot for `key`, overwriting whatever is there.
    pub fn set(&mut self, key: &str, value: &V) -> Result<(), HashTableError> {
        let range = self.slot_range(key)?;
        self.data[range].copy_from_slice(bytemuck::bytes_of(value));
        Ok(())
    }

    /// Copy out the slot for `key`.
    pub fn get(&self, key: &str) -> Result<V, HashTableError> {
        let range = self.slot_range(key)?;
        Ok(bytemuck::pod_read_unaligned(&self.data[range]))
    }

    /// Stamp every slot with `value` (typically a "no entry" sentinel).
    pub fn fill_with_value(&mut self, value: &V) {
        let bytes = bytemuck::bytes_of(value);
        for chunk in self.data.chunks_exact_mut(bytes.len()) {
            chunk.copy_from_slice(bytes);
        }
    }
}

/// Pointer-mode table: every slot holds a non-owning reference.
pub struct PointerTable<T> {
    slots: Vec<Option<Weak<T>>>,
}

impl<T> PointerTable<T> {
    pub fn new(capacity: usize) -> Result<Self, HashTableError> {
        if capacity == 0 {
            return Err(HashTableError::ZeroCapacity);
        }
        Ok(Self {
            slots: vec![None; capacity],
        })
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    #[inline]
    pub fn element_size(&self) -> usize {
        std::mem::size_of::<Option<Weak<T>>>()
    }

    #[inline]
    pub fn is_pointer(&self) -> bool {
        true
    }

    #[inline]
    pub fn index_of(&self, key: &str) -> usize {
        hash_name(key, self.slots.len())
    }

    /// Point the slot for `key` at `value`, or clear it with `None`.
    pub fn set(&mut self, key: &str, value: Option<&Rc<T>>) -> Result<(), HashTableError> {
        if key.is_empty() {
            return Err(HashTableError::EmptyKey);
        }
        let index = self.index_of(key);
        self.slots[index] = value.map(Rc::downgrade);
        Ok(())
    }

    /// The pointee for `key`, if one was set and it is still alive.
    pub fn get(&self, key: &str) -> Result<Option<Rc<T>>, HashTableError> {
        if key.is_empty() {
            return Err(HashTableError::EmptyKey);
        }
        Ok(self.slots[self.index_of(key)]
            .as_ref()
            .and_then(Weak::upgrade))
    }
}
