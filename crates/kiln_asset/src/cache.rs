//! Reference-counted resource cache
//!
//! Every asset system keeps the same three pieces of bookkeeping, all carved
//! from its state block:
//! - a slot header array (`id`, `generation`; `id == INVALID_ID` means free)
//! - a parallel payload array of plain-old-data records
//! - a name table mapping names to a [`Reference`] (count, slot, auto-release)
//!
//! [`ResourceCache`] implements acquire/release over those arrays once. The
//! systems supply the `load` and `unload` steps that talk to the backend.

use bytemuck::{Pod, Zeroable};
use kiln_core::containers::HashTable;
use kiln_core::id::id_to_option;
use kiln_core::state::{StateCarver, StateLayout};
use kiln_core::INVALID_ID;

use crate::error::AssetError;

/// Longest resource name, in bytes.
pub const MAX_NAME_LENGTH: usize = 255;

/// Highest generation a slot reaches. Reloads past it keep this value, so
/// a handle that old may resolve again.
pub const MAX_GENERATION: u32 = INVALID_ID - 1;

/// Fixed-size, zero-padded UTF-8 name stored inside payload records.
#[derive(Clone, Copy, PartialEq, Eq, Pod, Zeroable)]
#[repr(transparent)]
pub struct ResourceName([u8; MAX_NAME_LENGTH + 1]);

impl ResourceName {
    pub fn new(name: &str) -> Result<Self, AssetError> {
        if name.len() > MAX_NAME_LENGTH {
            return Err(AssetError::NameTooLong {
                name: name.to_string(),
                max: MAX_NAME_LENGTH,
            });
        }
        let mut bytes = [0; MAX_NAME_LENGTH + 1];
        bytes[..name.len()].copy_from_slice(name.as_bytes());
        Ok(Self(bytes))
    }

    pub fn as_str(&self) -> &str {
        let len = self.0.iter().position(|&b| b == 0).unwrap_or(MAX_NAME_LENGTH);
        std::str::from_utf8(&self.0[..len]).unwrap_or_default()
    }

    pub fn is_empty(&self) -> bool {
        self.0[0] == 0
    }
}

impl std::fmt::Debug for ResourceName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self.as_str())
    }
}

/// Slot header. Both fields are `INVALID_ID` until the slot is first used.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Pod, Zeroable)]
#[repr(C)]
pub struct SlotHeader {
    pub id: u32,
    pub generation: u32,
}

impl SlotHeader {
    pub const FREE: SlotHeader = SlotHeader {
        id: INVALID_ID,
        generation: INVALID_ID,
    };

    #[inline]
    pub fn is_free(&self) -> bool {
        self.id == INVALID_ID
    }
}

/// Name table entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Pod, Zeroable)]
#[repr(C)]
pub struct Reference {
    pub reference_count: u64,
    pub handle: u32,
    pub auto_release: u32,
}

impl Reference {
    /// Entry for a name nobody holds.
    pub const EMPTY: Reference = Reference {
        reference_count: 0,
        handle: INVALID_ID,
        auto_release: 0,
    };

    #[inline]
    pub fn handle(&self) -> Option<u32> {
        id_to_option(self.handle)
    }

    #[inline]
    pub fn auto_release(&self) -> bool {
        self.auto_release != 0
    }
}

/// What a `release` call did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReleaseOutcome {
    /// The name had no outstanding references.
    NotAcquired,
    /// Still referenced.
    Released { remaining: u64 },
    /// Count reached zero; the resource stays loaded.
    Retained,
    /// Count reached zero and the resource was unloaded.
    Destroyed,
}

/// Slot headers plus a parallel payload array, addressed by slot id.
///
/// Id-keyed systems use this directly; name-keyed ones go through
/// [`ResourceCache`], which adds the name table.
pub struct SlotArray<'a, P: Pod> {
    kind: &'static str,
    headers: &'a mut [SlotHeader],
    payloads: &'a mut [P],
}

impl<'a, P: Pod> SlotArray<'a, P> {
    pub fn layout(layout: StateLayout, capacity: usize) -> StateLayout {
        layout.array::<SlotHeader>(capacity).array::<P>(capacity)
    }

    /// A zero `capacity` is reported as [`AssetError::CacheFull`].
    pub fn carve(
        kind: &'static str,
        carver: &mut StateCarver<'a>,
        capacity: usize,
    ) -> Result<Self, AssetError> {
        if capacity == 0 {
            return Err(AssetError::CacheFull { kind, capacity });
        }
        let headers = carver.array::<SlotHeader>(capacity);
        let payloads = carver.array::<P>(capacity);
        headers.fill(SlotHeader::FREE);
        payloads.fill(P::zeroed());
        Ok(Self {
            kind,
            headers,
            payloads,
        })
    }

    #[inline]
    pub fn kind(&self) -> &'static str {
        self.kind
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.headers.len()
    }

    /// Load into the first free slot.
    pub fn claim_slot<F>(&mut self, load: F) -> Result<u32, AssetError>
    where
        F: FnOnce(u32, &mut P) -> Result<(), AssetError>,
    {
        let index = self
            .headers
            .iter()
            .position(SlotHeader::is_free)
            .ok_or(AssetError::CacheFull {
                kind: self.kind,
                capacity: self.capacity(),
            })?;
        let id = index as u32;

        let mut payload = P::zeroed();
        load(id, &mut payload)?;
        self.payloads[index] = payload;

        let header = &mut self.headers[index];
        header.generation = match header.generation {
            INVALID_ID => 0,
            g => g.saturating_add(1).min(MAX_GENERATION),
        };
        header.id = id;
        Ok(id)
    }

    /// Mark `id` free. The generation is kept so the next load bumps it.
    pub fn free_slot(&mut self, id: u32) {
        if let Some(header) = self.headers.get_mut(id as usize) {
            header.id = INVALID_ID;
            self.payloads[id as usize] = P::zeroed();
        }
    }

    /// Header of a live slot.
    pub fn header(&self, id: u32) -> Option<SlotHeader> {
        self.headers
            .get(id as usize)
            .filter(|h| !h.is_free())
            .copied()
    }

    pub fn get(&self, id: u32) -> Option<&P> {
        self.header(id)?;
        self.payloads.get(id as usize)
    }

    pub fn get_mut(&mut self, id: u32) -> Option<&mut P> {
        self.header(id)?;
        self.payloads.get_mut(id as usize)
    }

    /// Ids of every live slot, ascending.
    pub fn live_ids(&self) -> Vec<u32> {
        self.headers
            .iter()
            .filter(|h| !h.is_free())
            .map(|h| h.id)
            .collect()
    }

    pub fn live_count(&self) -> usize {
        self.headers.iter().filter(|h| !h.is_free()).count()
    }
}

impl<P: Pod> std::fmt::Debug for SlotArray<'_, P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SlotArray")
            .field("kind", &self.kind)
            .field("capacity", &self.capacity())
            .field("live", &self.live_count())
            .finish()
    }
}

/// [`SlotArray`] plus a name table of [`Reference`]s.
pub struct ResourceCache<'a, P: Pod> {
    slots: SlotArray<'a, P>,
    lookup: HashTable<'a, Reference>,
}

impl<'a, P: Pod> ResourceCache<'a, P> {
    /// Extend `layout` with the arrays a cache of `capacity` slots needs.
    pub fn layout(layout: StateLayout, capacity: usize) -> StateLayout {
        SlotArray::<P>::layout(layout, capacity).array::<Reference>(capacity)
    }

    /// Carve the cache's arrays, in [`layout`](Self::layout) order.
    ///
    /// A zero `capacity` is rejected by the name table.
    pub fn carve(
        kind: &'static str,
        carver: &mut StateCarver<'a>,
        capacity: usize,
    ) -> Result<Self, AssetError> {
        let table = HashTable::<Reference>::block_size(capacity)?;
        let slots = SlotArray::carve(kind, carver, capacity)?;
        let mut lookup = HashTable::from_block(
            carver.bytes(table, std::mem::align_of::<Reference>()),
            capacity,
        )?;
        lookup.fill_with_value(&Reference::EMPTY);
        Ok(Self { slots, lookup })
    }

    #[inline]
    pub fn kind(&self) -> &'static str {
        self.slots.kind()
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.slots.capacity()
    }

    /// Name table entry for `name` ([`Reference::EMPTY`] if absent).
    pub fn reference(&self, name: &str) -> Result<Reference, AssetError> {
        Ok(self.lookup.get(name)?)
    }

    pub fn set_reference(&mut self, name: &str, reference: &Reference) -> Result<(), AssetError> {
        Ok(self.lookup.set(name, reference)?)
    }

    /// Take a reference on `name`, loading it into a free slot on first use.
    ///
    /// `auto_release` is only honoured when the count is zero. If `load`
    /// fails the slot stays free and the count is left unchanged.
    pub fn acquire<F>(&mut self, name: &str, auto_release: bool, load: F) -> Result<u32, AssetError>
    where
        F: FnOnce(u32, &mut P) -> Result<(), AssetError>,
    {
        let kind = self.kind();
        let mut reference = self.lookup.get(name)?;
        if reference.reference_count == 0 {
            reference.auto_release = u32::from(auto_release);
        }
        reference.reference_count += 1;

        let id = match reference.handle() {
            Some(id) => id,
            None => {
                let id = self.slots.claim_slot(load).inspect_err(|e| {
                    tracing::error!(kind, name, error = %e, "load failed");
                })?;
                tracing::debug!(kind, name, id, "loaded");
                reference.handle = id;
                id
            }
        };

        self.lookup.set(name, &reference)?;
        Ok(id)
    }

    /// Drop a reference on `name`, calling `unload` when the last reference
    /// of an auto-release resource goes away.
    pub fn release<F>(&mut self, name: &str, unload: F) -> Result<ReleaseOutcome, AssetError>
    where
        F: FnOnce(&mut P),
    {
        let kind = self.kind();
        let mut reference = self.lookup.get(name)?;
        if reference.reference_count == 0 {
            tracing::warn!(kind, name, "release of a resource that is not acquired");
            return Ok(ReleaseOutcome::NotAcquired);
        }

        reference.reference_count -= 1;
        if reference.reference_count > 0 {
            self.lookup.set(name, &reference)?;
            return Ok(ReleaseOutcome::Released {
                remaining: reference.reference_count,
            });
        }

        if !reference.auto_release() {
            self.lookup.set(name, &reference)?;
            return Ok(ReleaseOutcome::Retained);
        }

        if let Some(id) = reference.handle() {
            if let Some(payload) = self.slots.get_mut(id) {
                unload(payload);
            }
            self.slots.free_slot(id);
        }
        self.lookup.set(name, &Reference::EMPTY)?;
        tracing::debug!(kind, name, "unloaded");
        Ok(ReleaseOutcome::Destroyed)
    }

    /// Load into the first free slot without touching the name table.
    pub fn claim_slot<F>(&mut self, load: F) -> Result<u32, AssetError>
    where
        F: FnOnce(u32, &mut P) -> Result<(), AssetError>,
    {
        self.slots.claim_slot(load)
    }

    pub fn free_slot(&mut self, id: u32) {
        self.slots.free_slot(id);
    }

    pub fn header(&self, id: u32) -> Option<SlotHeader> {
        self.slots.header(id)
    }

    pub fn get(&self, id: u32) -> Option<&P> {
        self.slots.get(id)
    }

    pub fn get_mut(&mut self, id: u32) -> Option<&mut P> {
        self.slots.get_mut(id)
    }

    pub fn live_ids(&self) -> Vec<u32> {
        self.slots.live_ids()
    }

    pub fn live_count(&self) -> usize {
        self.slots.live_count()
    }
}

impl<P: Pod> std::fmt::Debug for ResourceCache<'_, P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResourceCache")
            .field("kind", &self.kind())
            .field("capacity", &self.capacity())
            .field("live", &self.live_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kiln_core::memory::Arena;

    #[derive(Debug, Clone, Copy, PartialEq, Eq, Pod, Zeroable)]
    #[repr(C)]
    struct Payload {
        value: u32,
        unloaded: u32,
    }

    fn with_cache(capacity: usize, test: impl FnOnce(&mut ResourceCache<'_, Payload>)) {
        let layout = ResourceCache::<Payload>::layout(StateLayout::new(), capacity);
        let arena = Arena::new();
        let block = arena.alloc_aligned(layout.size() as usize, layout.align());
        let mut carver = StateCarver::new(block, &layout).unwrap();
        let mut cache = ResourceCache::carve("payload", &mut carver, capacity).unwrap();
        test(&mut cache);
    }

    fn load_value(value: u32) -> impl FnOnce(u32, &mut Payload) -> Result<(), AssetError> {
        move |_, payload| {
            payload.value = value;
            Ok(())
        }
    }

    #[test]
    fn names_are_bounded_and_round_trip() {
        let name = ResourceName::new("rock").unwrap();
        assert_eq!(name.as_str(), "rock");
        assert!(ResourceName::new("").unwrap().is_empty());
        assert_eq!(ResourceName::new(&"x".repeat(255)).unwrap().as_str().len(), 255);
        assert!(matches!(
            ResourceName::new(&"x".repeat(256)),
            Err(AssetError::NameTooLong { max: 255, .. })
        ));
    }

    #[test]
    fn acquire_counts_and_loads_once() {
        with_cache(8, |cache| {
            let mut loads = 0;
            let a = cache
                .acquire("rock", true, |_, p| {
                    loads += 1;
                    p.value = 7;
                    Ok(())
                })
                .unwrap();
            let b = cache.acquire("rock", false, load_value(99)).unwrap();
            assert_eq!(a, b);
            assert_eq!(loads, 1);
            assert_eq!(cache.get(a).unwrap().value, 7);

            let reference = cache.reference("rock").unwrap();
            assert_eq!(reference.reference_count, 2);
            // The first acquirer picked the release policy.
            assert!(reference.auto_release());
        });
    }

    #[test]
    fn release_to_zero_unloads_auto_release() {
        with_cache(8, |cache| {
            let id = cache.acquire("rock", true, load_value(1)).unwrap();
            cache.acquire("rock", true, load_value(1)).unwrap();

            assert_eq!(
                cache.release("rock", |_| {}).unwrap(),
                ReleaseOutcome::Released { remaining: 1 }
            );
            let mut unloaded = None;
            assert_eq!(
                cache.release("rock", |p| unloaded = Some(p.value)).unwrap(),
                ReleaseOutcome::Destroyed
            );
            assert_eq!(unloaded, Some(1));
            assert!(cache.header(id).is_none());
            assert_eq!(cache.reference("rock").unwrap(), Reference::EMPTY);
            assert_eq!(
                cache.release("rock", |_| {}).unwrap(),
                ReleaseOutcome::NotAcquired
            );
        });
    }

    #[test]
    fn persistent_resources_stay_resident() {
        with_cache(8, |cache| {
            let id = cache.acquire("skybox", false, load_value(3)).unwrap();
            assert_eq!(cache.release("skybox", |_| {}).unwrap(), ReleaseOutcome::Retained);
            assert_eq!(cache.get(id).unwrap().value, 3);
            assert_eq!(cache.acquire("skybox", true, load_value(4)).unwrap(), id);
        });
    }

    #[test]
    fn generation_increments_on_reload() {
        with_cache(4, |cache| {
            let id = cache.acquire("rock", true, load_value(1)).unwrap();
            let g1 = cache.header(id).unwrap().generation;
            cache.release("rock", |_| {}).unwrap();
            let id2 = cache.acquire("rock", true, load_value(1)).unwrap();
            assert_eq!(id, id2);
            assert_eq!(g1, 0);
            assert_eq!(cache.header(id2).unwrap().generation, g1 + 1);
        });
    }

    #[test]
    fn generation_saturates_below_the_invalid_id() {
        with_cache(2, |cache| {
            let id = cache.claim_slot(load_value(1)).unwrap();
            cache.slots.headers[id as usize].generation = MAX_GENERATION - 1;

            cache.free_slot(id);
            cache.claim_slot(load_value(2)).unwrap();
            assert_eq!(cache.header(id).unwrap().generation, MAX_GENERATION);

            cache.free_slot(id);
            cache.claim_slot(load_value(3)).unwrap();
            let header = cache.header(id).unwrap();
            assert_eq!(header.generation, MAX_GENERATION);
            assert_ne!(header.generation, INVALID_ID);
        });
    }

    #[test]
    fn failed_load_leaves_no_trace() {
        with_cache(4, |cache| {
            let result = cache.acquire("missing", true, |_, _| {
                Err(AssetError::NotFound {
                    kind: "payload",
                    name: "missing".into(),
                })
            });
            assert!(matches!(result, Err(AssetError::NotFound { .. })));
            assert_eq!(cache.reference("missing").unwrap(), Reference::EMPTY);
            assert_eq!(cache.live_count(), 0);
        });
    }

    #[test]
    fn full_cache_is_reported() {
        with_cache(2, |cache| {
            cache.claim_slot(load_value(1)).unwrap();
            cache.claim_slot(load_value(2)).unwrap();
            assert!(matches!(
                cache.claim_slot(load_value(3)),
                Err(AssetError::CacheFull { capacity: 2, .. })
            ));
            cache.free_slot(0);
            assert_eq!(cache.claim_slot(load_value(4)).unwrap(), 0);
            assert_eq!(cache.live_ids(), vec![0, 1]);
        });
    }
}
