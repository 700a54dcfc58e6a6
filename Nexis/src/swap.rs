// swap.rs
//
// Swap area: page images evicted from the backing store.
//
// Slots are keyed by page number and owning block, so a frame reused by a
// second block never clobbers the first owner's image.

use std::collections::BTreeMap;

use crate::memory::BlockId;

struct SwapSlot {
    data: Vec<u8>,
    /// swap-out order
    seq: u64,
}

pub struct SwapSpace {
    capacity: u64,
    used: u64,
    slots: BTreeMap<(usize, BlockId), SwapSlot>,
    seq: u64,
}

impl SwapSpace {
    pub fn new(capacity: u64) -> Self {
        Self {
            capacity,
            used: 0,
            slots: BTreeMap::new(),
            seq: 0,
        }
    }

    pub fn capacity(&self) -> u64 {
        self.capacity
    }

    pub fn used(&self) -> u64 {
        self.used
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn contains(&self, page: usize, owner: BlockId) -> bool {
        self.slots.contains_key(&(page, owner))
    }

    /// Store a page image. Returns false when the area has no room left.
    pub fn swap_out(&mut self, page: usize, owner: BlockId, data: Vec<u8>) -> bool {
        let len = data.len() as u64;
        let replaced = self.slots.get(&(page, owner)).map_or(0, |s| s.data.len() as u64);
        if self.used - replaced + len > self.capacity {
            return false;
        }
        self.seq += 1;
        self.used = self.used - replaced + len;
        self.slots.insert((page, owner), SwapSlot { data, seq: self.seq });
        true
    }

    /// Take a page image back out, releasing its slot.
    pub fn swap_in(&mut self, page: usize, owner: BlockId) -> Option<Vec<u8>> {
        let slot = self.slots.remove(&(page, owner))?;
        self.used -= slot.data.len() as u64;
        Some(slot.data)
    }

    /// Owner of the longest-held image for `page`, if any.
    pub fn oldest_owner(&self, page: usize) -> Option<BlockId> {
        self.slots
            .range((page, BlockId(0))..=(page, BlockId(u64::MAX)))
            .min_by_key(|(_, slot)| slot.seq)
            .map(|(&(_, owner), _)| owner)
    }

    /// Drop every image held for `owner`, returning how many were released.
    pub fn drop_owner(&mut self, owner: BlockId) -> usize {
        let before = self.slots.len();
        let mut released = 0;
        self.slots.retain(|&(_, id), slot| {
            if id == owner {
                released += slot.data.len() as u64;
                false
            } else {
                true
            }
        });
        self.used -= released;
        before - self.slots.len()
    }
}
