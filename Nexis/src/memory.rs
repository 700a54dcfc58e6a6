// memory.rs
//
// Paged memory manager. A flat backing store is carved into pages tracked by
// a bitmap, handed out as contiguous blocks, read and written through three
// inclusive cache levels, and spilled to a swap area under pressure.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::ops::Range;
use std::sync::atomic::{AtomicU64, Ordering};

use log::{debug, info, trace, warn};
use serde::Serialize;
use spin::{Mutex, RwLock};

use crate::cache::CacheLevel;
use crate::config::MemoryConfig;
use crate::error::{NexisError, NexisResult};
use crate::stats::MemoryStatistics;
use crate::swap::SwapSpace;

/// Allocation handle id, never reused
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct BlockId(pub u64);

impl fmt::Display for BlockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A contiguous run of pages handed out by [`MemoryManager::allocate`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct MemoryBlock {
    id: BlockId,
    start_page: usize,
    page_count: usize,
    size: usize,
    start_address: u64,
}

impl MemoryBlock {
    #[inline]
    pub fn id(&self) -> BlockId {
        self.id
    }

    #[inline]
    pub fn start_page(&self) -> usize {
        self.start_page
    }

    #[inline]
    pub fn page_count(&self) -> usize {
        self.page_count
    }

    /// Bytes requested by the caller
    #[inline]
    pub fn size(&self) -> usize {
        self.size
    }

    /// `start_page * page_size`
    #[inline]
    pub fn start_address(&self) -> u64 {
        self.start_address
    }

    pub fn pages(&self) -> Range<usize> {
        self.start_page..self.start_page + self.page_count
    }
}

impl fmt::Display for MemoryBlock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "block {} @ {:#x} ({} bytes, {} pages)",
            self.id, self.start_address, self.size, self.page_count
        )
    }
}

/// Snapshot of one page-table record
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Page {
    pub number: usize,
    pub owner: BlockId,
    pub allocated: bool,
    pub dirty: bool,
    pub swapped: bool,
    pub pinned: bool,
    pub last_access: u64,
    pub access_count: u64,
}

struct PageEntry {
    owner: BlockId,
    dirty: bool,
    swapped: bool,
    pinned: bool,
    // touched under the shared lock
    last_access: AtomicU64,
    access_count: AtomicU64,
}

impl PageEntry {
    fn new(owner: BlockId, stamp: u64) -> Self {
        Self {
            owner,
            dirty: false,
            swapped: false,
            pinned: false,
            last_access: AtomicU64::new(stamp),
            access_count: AtomicU64::new(0),
        }
    }

    fn snapshot(&self, number: usize) -> Page {
        Page {
            number,
            owner: self.owner,
            allocated: true,
            dirty: self.dirty,
            swapped: self.swapped,
            pinned: self.pinned,
            last_access: self.last_access.load(Ordering::SeqCst),
            access_count: self.access_count.load(Ordering::SeqCst),
        }
    }
}

/// One bit per page, set while the frame holds live data.
struct PageBitmap {
    words: Vec<u64>,
    len: usize,
    used: usize,
}

impl PageBitmap {
    fn new(len: usize) -> Self {
        Self {
            words: vec![0; (len + 63) / 64],
            len,
            used: 0,
        }
    }

    fn is_used(&self, idx: usize) -> bool {
        idx < self.len && self.words[idx / 64] & (1u64 << (idx % 64)) != 0
    }

    /// Returns `true` if the page was free.
    fn mark_used(&mut self, idx: usize) -> bool {
        if idx >= self.len || self.is_used(idx) {
            return false;
        }
        self.words[idx / 64] |= 1u64 << (idx % 64);
        self.used += 1;
        true
    }

    /// Returns `true` if the page was used.
    fn mark_free(&mut self, idx: usize) -> bool {
        if !self.is_used(idx) {
            return false;
        }
        self.words[idx / 64] &= !(1u64 << (idx % 64));
        self.used -= 1;
        true
    }

    fn used(&self) -> usize {
        self.used
    }

    /// First-fit search for `count` contiguous free pages.
    fn find_free_run(&self, count: usize) -> Option<usize> {
        if count == 0 || count > self.len {
            return None;
        }
        let mut run = 0;
        let mut idx = 0;
        while idx < self.len {
            // skip whole words when aligned
            if idx % 64 == 0 && idx + 64 <= self.len {
                match self.words[idx / 64] {
                    u64::MAX => {
                        run = 0;
                        idx += 64;
                        continue;
                    }
                    0 => {
                        run += 64;
                        idx += 64;
                        if run >= count {
                            return Some(idx - run);
                        }
                        continue;
                    }
                    _ => {}
                }
            }
            if self.is_used(idx) {
                run = 0;
            } else {
                run += 1;
                if run == count {
                    return Some(idx + 1 - count);
                }
            }
            idx += 1;
        }
        None
    }
}

struct MemoryState {
    store: Vec<u8>,
    bitmap: PageBitmap,
    pages: HashMap<usize, PageEntry>,
    blocks: BTreeMap<BlockId, MemoryBlock>,
    swap: SwapSpace,
    /// bytes held by resident pages, reserved pages included
    used: u64,
    next_block: u64,
}

pub struct MemoryManager {
    config: MemoryConfig,
    page_count: usize,
    state: RwLock<MemoryState>,
    /// L1, L2, L3
    caches: [Mutex<CacheLevel>; 3],
    access_clock: AtomicU64,
    allocations: AtomicU64,
    deallocations: AtomicU64,
    page_faults: AtomicU64,
    swap_outs: AtomicU64,
    swap_ins: AtomicU64,
}

impl MemoryManager {
    pub fn new(config: MemoryConfig) -> NexisResult<Self> {
        config.validate()?;
        let total = usize::try_from(config.total_size)
            .map_err(|_| NexisError::InvalidConfig("total_size exceeds address space".into()))?;
        let page_count = config.page_count();

        let mut bitmap = PageBitmap::new(page_count);
        for page in 0..config.reserved_pages {
            bitmap.mark_used(page);
        }
        let state = MemoryState {
            store: vec![0; total],
            bitmap,
            pages: HashMap::new(),
            blocks: BTreeMap::new(),
            swap: SwapSpace::new(config.total_size.saturating_mul(config.swap_multiplier)),
            used: (config.reserved_pages * config.page_size) as u64,
            next_block: 0,
        };
        let caches = [
            Mutex::new(CacheLevel::new("L1", config.l1_size, config.line_size)),
            Mutex::new(CacheLevel::new("L2", config.l2_size, config.line_size)),
            Mutex::new(CacheLevel::new("L3", config.l3_size, config.line_size)),
        ];

        info!(
            "Memory manager ready: {} bytes, {} pages of {} bytes, {} reserved",
            config.total_size, page_count, config.page_size, config.reserved_pages
        );
        Ok(Self {
            config,
            page_count,
            state: RwLock::new(state),
            caches,
            access_clock: AtomicU64::new(0),
            allocations: AtomicU64::new(0),
            deallocations: AtomicU64::new(0),
            page_faults: AtomicU64::new(0),
            swap_outs: AtomicU64::new(0),
            swap_ins: AtomicU64::new(0),
        })
    }

    pub fn config(&self) -> &MemoryConfig {
        &self.config
    }

    pub fn total_size(&self) -> u64 {
        self.config.total_size
    }

    pub fn page_size(&self) -> usize {
        self.config.page_size
    }

    pub fn page_count(&self) -> usize {
        self.page_count
    }

    fn next_stamp(&self) -> u64 {
        self.access_clock.fetch_add(1, Ordering::SeqCst) + 1
    }

    fn touch(&self, entry: &PageEntry) {
        entry.last_access.store(self.next_stamp(), Ordering::SeqCst);
        entry.access_count.fetch_add(1, Ordering::SeqCst);
    }

    fn check_bounds(&self, address: u64, size: usize) -> NexisResult<()> {
        let limit = self.config.total_size;
        match address.checked_add(size as u64) {
            Some(end) if end <= limit => Ok(()),
            _ => Err(NexisError::Bounds { address, size, limit }),
        }
    }

    /// Pages overlapped by `[address, address + size)`, size non-zero.
    fn page_span(&self, address: u64, size: usize) -> Range<usize> {
        let page = self.config.page_size as u64;
        let first = (address / page) as usize;
        let last = ((address + size as u64 - 1) / page) as usize;
        first..last + 1
    }

    fn invalidate_caches(&self, start: u64, len: u64) {
        for cache in &self.caches {
            cache.lock().invalidate(start, len);
        }
    }

    /// Allocate `size` bytes as a run of contiguous pages.
    ///
    /// When no run is free, least recently used unpinned pages are swapped
    /// out and the search is retried once.
    pub fn allocate(&self, size: i64) -> NexisResult<MemoryBlock> {
        if size <= 0 {
            return Err(NexisError::InvalidArgument(format!(
                "allocation size must be positive, got {}",
                size
            )));
        }
        let size = usize::try_from(size)
            .map_err(|_| NexisError::InvalidArgument(format!("allocation size {} too large", size)))?;
        let page_size = self.config.page_size;
        let pages = size.div_ceil(page_size);
        let out_of_memory = NexisError::OutOfMemory { requested: size, pages };
        if pages > self.page_count {
            warn!("Out of memory: {} bytes exceeds the backing store", size);
            return Err(out_of_memory);
        }

        let mut state = self.state.write();
        let start = match state.bitmap.find_free_run(pages) {
            Some(start) => start,
            None => {
                let freed = self.swap_out_pages(&mut state, pages);
                debug!("Swap-out pass freed {} of {} pages", freed, pages);
                match state.bitmap.find_free_run(pages) {
                    Some(start) => start,
                    None => {
                        warn!("Out of memory: {} bytes ({} pages)", size, pages);
                        return Err(out_of_memory);
                    }
                }
            }
        };

        state.next_block += 1;
        let id = BlockId(state.next_block);
        for number in start..start + pages {
            if let Some(displaced) = state.pages.remove(&number) {
                trace!("Page {} displaces swapped page of block {}", number, displaced.owner);
            }
            state.bitmap.mark_used(number);
            state.pages.insert(number, PageEntry::new(id, self.next_stamp()));
        }
        state.used += (pages * page_size) as u64;

        let block = MemoryBlock {
            id,
            start_page: start,
            page_count: pages,
            size,
            start_address: (start * page_size) as u64,
        };
        state.blocks.insert(id, block.clone());
        self.allocations.fetch_add(1, Ordering::SeqCst);
        debug!("Allocated {}", block);
        Ok(block)
    }

    /// Swap out up to `needed` pages, oldest access first.
    fn swap_out_pages(&self, state: &mut MemoryState, needed: usize) -> usize {
        let mut candidates: Vec<(u64, usize)> = state
            .pages
            .iter()
            .filter(|(_, entry)| !entry.pinned && !entry.swapped)
            .map(|(&number, entry)| (entry.last_access.load(Ordering::SeqCst), number))
            .collect();
        candidates.sort_unstable();

        let page_size = self.config.page_size;
        let mut freed = 0;
        for (_, number) in candidates {
            if freed >= needed {
                break;
            }
            let Some(owner) = state.pages.get(&number).map(|entry| entry.owner) else {
                continue;
            };
            let frame = number * page_size..(number + 1) * page_size;
            let image = state.store[frame.clone()].to_vec();
            if !state.swap.swap_out(number, owner, image) {
                warn!("Swap area full ({} bytes), stopping swap-out", state.swap.capacity());
                break;
            }
            state.store[frame].fill(0);
            if let Some(entry) = state.pages.get_mut(&number) {
                entry.swapped = true;
                entry.dirty = false;
            }
            state.bitmap.mark_free(number);
            state.used -= page_size as u64;
            self.invalidate_caches((number * page_size) as u64, page_size as u64);
            self.swap_outs.fetch_add(1, Ordering::SeqCst);
            debug!("Swapped out page {} of block {}", number, owner);
            freed += 1;
        }
        freed
    }

    /// Bring a swapped page back into its frame. Returns `false` if the page
    /// was resident or has no record.
    fn fault_in(&self, state: &mut MemoryState, number: usize) -> bool {
        let Some(owner) = state
            .pages
            .get(&number)
            .filter(|entry| entry.swapped)
            .map(|entry| entry.owner)
        else {
            return false;
        };

        let page_size = self.config.page_size;
        let start = number * page_size;
        match state.swap.swap_in(number, owner) {
            Some(image) => {
                let len = image.len().min(page_size);
                state.store[start..start + len].copy_from_slice(&image[..len]);
            }
            None => {
                warn!("No swap image for page {} of block {}", number, owner);
                state.store[start..start + page_size].fill(0);
            }
        }
        state.bitmap.mark_used(number);
        if let Some(entry) = state.pages.get_mut(&number) {
            entry.swapped = false;
        }
        state.used += page_size as u64;
        self.swap_ins.fetch_add(1, Ordering::SeqCst);
        debug!("Swapped in page {} of block {}", number, owner);
        true
    }

    /// Release a block. Unknown or already freed blocks are ignored.
    pub fn free(&self, block: &MemoryBlock) {
        let mut state = self.state.write();
        let Some(block) = state.blocks.remove(&block.id) else {
            debug!("Ignoring free of unknown block {}", block.id);
            return;
        };

        let page_size = self.config.page_size;
        state.swap.drop_owner(block.id);
        for number in block.pages() {
            let owned = state
                .pages
                .get(&number)
                .map_or(false, |entry| entry.owner == block.id);
            if !owned {
                continue;
            }
            if let Some(entry) = state.pages.remove(&number) {
                if !entry.swapped {
                    state.bitmap.mark_free(number);
                    state.store[number * page_size..(number + 1) * page_size].fill(0);
                    state.used -= page_size as u64;
                }
            }
            // a block displaced from this frame gets its swapped record back
            if let Some(previous) = state.swap.oldest_owner(number) {
                let mut entry = PageEntry::new(previous, 0);
                entry.swapped = true;
                state.pages.insert(number, entry);
                trace!("Page {} returns to swapped block {}", number, previous);
            }
        }
        self.invalidate_caches(block.start_address, (block.page_count * page_size) as u64);
        self.deallocations.fetch_add(1, Ordering::SeqCst);
        debug!("Freed {}", block);
    }

    /// Read `size` bytes at `address`, faulting in swapped pages first.
    pub fn read(&self, address: u64, size: usize) -> NexisResult<Vec<u8>> {
        self.check_bounds(address, size)?;
        if size == 0 {
            return Ok(Vec::new());
        }
        let span = self.page_span(address, size);
        {
            let state = self.state.read();
            let faulting = span
                .clone()
                .any(|number| state.pages.get(&number).map_or(false, |entry| entry.swapped));
            if !faulting {
                return Ok(self.read_resident(&state, address, size));
            }
        }

        let mut state = self.state.write();
        for number in span {
            if self.fault_in(&mut state, number) {
                self.page_faults.fetch_add(1, Ordering::SeqCst);
            }
        }
        let state = state.downgrade();
        Ok(self.read_resident(&state, address, size))
    }

    fn read_resident(&self, state: &MemoryState, address: u64, size: usize) -> Vec<u8> {
        for number in self.page_span(address, size) {
            if let Some(entry) = state.pages.get(&number) {
                self.touch(entry);
            }
        }

        let line = self.config.line_size as u64;
        let end = address + size as u64;
        let mut out = Vec::with_capacity(size);
        let mut line_addr = address - address % line;
        while line_addr < end {
            let data = self.load_line(state, line_addr);
            let from = (address.max(line_addr) - line_addr) as usize;
            let to = (end.min(line_addr + line) - line_addr) as usize;
            out.extend_from_slice(&data[from..to]);
            line_addr += line;
        }
        out
    }

    /// L1 -> L2 -> L3 -> store. A hit is copied into every faster level; a
    /// store read fills all three.
    fn load_line(&self, state: &MemoryState, addr: u64) -> Vec<u8> {
        for (level, cache) in self.caches.iter().enumerate() {
            let hit = cache.lock().get(addr).map(<[u8]>::to_vec);
            if let Some(data) = hit {
                for faster in &self.caches[..level] {
                    faster.lock().put(addr, &data);
                }
                return data;
            }
        }

        let start = addr as usize;
        let data = state.store[start..start + self.config.line_size].to_vec();
        for cache in &self.caches {
            cache.lock().put(addr, &data);
        }
        data
    }

    /// Write-through: the store first, then every touched line at all
    /// three levels.
    pub fn write(&self, address: u64, data: &[u8]) -> NexisResult<()> {
        self.check_bounds(address, data.len())?;
        if data.is_empty() {
            return Ok(());
        }
        let span = self.page_span(address, data.len());

        let mut state = self.state.write();
        for number in span.clone() {
            if self.fault_in(&mut state, number) {
                self.page_faults.fetch_add(1, Ordering::SeqCst);
            }
        }

        let start = address as usize;
        state.store[start..start + data.len()].copy_from_slice(data);
        for number in span {
            if let Some(entry) = state.pages.get_mut(&number) {
                entry.dirty = true;
                self.touch(entry);
            }
        }

        let line = self.config.line_size as u64;
        let end = address + data.len() as u64;
        let mut line_addr = address - address % line;
        while line_addr < end {
            let from = line_addr as usize;
            let bytes = &state.store[from..from + self.config.line_size];
            for cache in &self.caches {
                cache.lock().put(line_addr, bytes);
            }
            line_addr += line;
        }
        Ok(())
    }

    fn set_pinned(&self, id: BlockId, pinned: bool) -> NexisResult<usize> {
        let mut state = self.state.write();
        let pages = state
            .blocks
            .get(&id)
            .map(MemoryBlock::pages)
            .ok_or_else(|| NexisError::InvalidArgument(format!("unknown block {}", id)))?;
        let mut count = 0;
        for number in pages {
            if let Some(entry) = state.pages.get_mut(&number).filter(|e| e.owner == id) {
                entry.pinned = pinned;
                count += 1;
            }
        }
        debug!("Block {} {} ({} pages)", id, if pinned { "pinned" } else { "unpinned" }, count);
        Ok(count)
    }

    /// Exclude a block's pages from swap-out.
    pub fn pin(&self, id: BlockId) -> NexisResult<usize> {
        self.set_pinned(id, true)
    }

    pub fn unpin(&self, id: BlockId) -> NexisResult<usize> {
        self.set_pinned(id, false)
    }

    /// Eagerly fault in every swapped page of a block that still holds its
    /// frame. Returns the number of pages restored.
    pub fn swap_in(&self, id: BlockId) -> NexisResult<usize> {
        let mut state = self.state.write();
        let pages = state
            .blocks
            .get(&id)
            .map(MemoryBlock::pages)
            .ok_or_else(|| NexisError::InvalidArgument(format!("unknown block {}", id)))?;
        let mut restored = 0;
        for number in pages {
            let owned = state.pages.get(&number).map_or(false, |e| e.owner == id);
            if owned && self.fault_in(&mut state, number) {
                restored += 1;
            }
        }
        Ok(restored)
    }

    pub fn block(&self, id: BlockId) -> Option<MemoryBlock> {
        self.state.read().blocks.get(&id).cloned()
    }

    /// Live blocks in id order
    pub fn blocks(&self) -> Vec<MemoryBlock> {
        self.state.read().blocks.values().cloned().collect()
    }

    pub fn page(&self, number: usize) -> Option<Page> {
        self.state
            .read()
            .pages
            .get(&number)
            .map(|entry| entry.snapshot(number))
    }

    pub fn statistics(&self) -> MemoryStatistics {
        let (used, live_blocks, swapped_pages) = {
            let state = self.state.read();
            (state.used, state.blocks.len(), state.swap.len())
        };
        let [l1, l2, l3] = &self.caches;
        let total = self.config.total_size;
        MemoryStatistics {
            total_size: total,
            used_size: used,
            free_size: total - used,
            page_size: self.config.page_size,
            live_blocks,
            swapped_pages,
            total_allocations: self.allocations.load(Ordering::SeqCst),
            total_deallocations: self.deallocations.load(Ordering::SeqCst),
            total_page_faults: self.page_faults.load(Ordering::SeqCst),
            total_swap_outs: self.swap_outs.load(Ordering::SeqCst),
            total_swap_ins: self.swap_ins.load(Ordering::SeqCst),
            l1: l1.lock().stats(),
            l2: l2.lock().stats(),
            l3: l3.lock().stats(),
        }
    }

    /// Cross-check the bitmap, page table, block table and swap area.
    pub fn check_consistency(&self) -> Result<(), String> {
        let state = self.state.read();
        let page_size = self.config.page_size as u64;

        let set_bits = state.bitmap.used();
        if state.used != set_bits as u64 * page_size {
            return Err(format!("used {} but {} pages set", state.used, set_bits));
        }
        if state.used > self.config.total_size {
            return Err(format!("used {} exceeds total", state.used));
        }

        let mut resident = 0;
        for (&number, entry) in &state.pages {
            let block = state
                .blocks
                .get(&entry.owner)
                .ok_or_else(|| format!("page {} owned by dead block {}", number, entry.owner))?;
            if !block.pages().contains(&number) {
                return Err(format!("page {} outside block {}", number, entry.owner));
            }
            if entry.swapped {
                if state.bitmap.is_used(number) {
                    return Err(format!("swapped page {} still holds its frame", number));
                }
                if !state.swap.contains(number, entry.owner) {
                    return Err(format!("swapped page {} has no image", number));
                }
            } else {
                if !state.bitmap.is_used(number) {
                    return Err(format!("resident page {} not marked used", number));
                }
                resident += 1;
            }
        }
        if resident + self.config.reserved_pages != set_bits {
            return Err(format!(
                "{} resident + {} reserved pages but {} set",
                resident, self.config.reserved_pages, set_bits
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn two_pages() -> MemoryManager {
        MemoryManager::new(MemoryConfig::with_size(8192, 4096)).unwrap()
    }

    #[test]
    fn test_bitmap_first_fit() {
        let mut bitmap = PageBitmap::new(200);
        assert_eq!(bitmap.find_free_run(200), Some(0));
        assert!(bitmap.mark_used(1));
        assert!(!bitmap.mark_used(1));
        assert_eq!(bitmap.find_free_run(1), Some(0));
        assert_eq!(bitmap.find_free_run(2), Some(2));

        for idx in 64..128 {
            bitmap.mark_used(idx);
        }
        assert_eq!(bitmap.find_free_run(70), Some(128));
        assert_eq!(bitmap.find_free_run(73), None);
        assert_eq!(bitmap.used(), 65);
        assert!(bitmap.mark_free(1));
        assert!(!bitmap.mark_free(1));
        assert_eq!(bitmap.find_free_run(64), Some(0));
    }

    #[test]
    fn test_allocate_rounds_up_to_pages() {
        let mm = MemoryManager::new(MemoryConfig::with_size(64 * 4096, 4096)).unwrap();
        let block = mm.allocate(4097).unwrap();
        assert_eq!(block.page_count(), 2);
        assert_eq!(block.size(), 4097);
        assert_eq!(block.start_address(), 0);

        let next = mm.allocate(1).unwrap();
        assert_eq!(next.start_page(), 2);
        assert_eq!(next.start_address(), 8192);
        assert!(next.id() > block.id());

        let stats = mm.statistics();
        assert_eq!(stats.used_size, 3 * 4096);
        assert_eq!(stats.used_size + stats.free_size, stats.total_size);
        assert_eq!(stats.total_allocations, 2);
        mm.check_consistency().unwrap();
    }

    #[test]
    fn test_reserved_pages_count_as_used() {
        let mut config = MemoryConfig::with_size(8 * 4096, 4096);
        config.reserved_pages = 2;
        let mm = MemoryManager::new(config).unwrap();
        assert_eq!(mm.statistics().used_size, 2 * 4096);

        let block = mm.allocate(100).unwrap();
        assert_eq!(block.start_page(), 2);
        mm.free(&block);
        assert_eq!(mm.statistics().used_size, 2 * 4096);
        mm.check_consistency().unwrap();
    }

    #[test]
    fn test_read_hits_promote_through_levels() {
        let mm = two_pages();
        mm.write(10, b"cached").unwrap();
        // write-through fills every level
        assert_eq!(mm.read(10, 6).unwrap(), b"cached");
        let stats = mm.statistics();
        assert_eq!(stats.l1.hits, 1);
        assert_eq!(stats.l1.misses, 0);

        mm.caches[0].lock().clear();
        assert_eq!(mm.read(10, 6).unwrap(), b"cached");
        let stats = mm.statistics();
        assert_eq!(stats.l1.misses, 1);
        assert_eq!(stats.l2.hits, 1);
        assert!(mm.caches[0].lock().contains(0));
    }

    #[test]
    fn test_cold_read_fills_all_levels() {
        let mm = two_pages();
        assert_eq!(mm.read(100, 40).unwrap(), vec![0; 40]);
        let stats = mm.statistics();
        // [100, 140) spans lines 64 and 128
        assert_eq!(stats.l1.misses, 2);
        assert_eq!(stats.l3.misses, 2);
        for cache in &mm.caches {
            assert!(cache.lock().contains(64));
            assert!(cache.lock().contains(128));
        }
    }

    #[test]
    fn test_free_zeroes_and_invalidates() {
        let mm = two_pages();
        let block = mm.allocate(4096).unwrap();
        mm.write(block.start_address(), b"secret").unwrap();
        mm.free(&block);

        for cache in &mm.caches {
            assert!(!cache.lock().contains(0));
        }
        let again = mm.allocate(4096).unwrap();
        assert_eq!(again.start_address(), block.start_address());
        assert_eq!(mm.read(again.start_address(), 6).unwrap(), vec![0; 6]);
    }

    #[test]
    fn test_swap_out_then_fault_in() {
        let mm = two_pages();
        let a = mm.allocate(4096).unwrap();
        let b = mm.allocate(4096).unwrap();
        mm.write(a.start_address(), b"alpha").unwrap();
        mm.write(b.start_address(), b"beta").unwrap();

        let c = mm.allocate(1).unwrap();
        assert_eq!(c.start_page(), a.start_page());
        assert_eq!(mm.page(0).map(|p| p.owner), Some(c.id()));
        assert_eq!(mm.statistics().total_swap_outs, 1);
        mm.check_consistency().unwrap();

        mm.free(&c);
        let page = mm.page(0).unwrap();
        assert_eq!(page.owner, a.id());
        assert!(page.swapped);

        assert_eq!(mm.read(a.start_address(), 5).unwrap(), b"alpha");
        let stats = mm.statistics();
        assert_eq!(stats.total_page_faults, 1);
        assert_eq!(stats.total_swap_ins, 1);
        assert_eq!(stats.swapped_pages, 0);
        assert!(!mm.page(0).unwrap().swapped);
        mm.check_consistency().unwrap();
    }

    #[test]
    fn test_write_faults_in_swapped_page() {
        let mm = MemoryManager::new(MemoryConfig::with_size(3 * 4096, 4096)).unwrap();
        let a = mm.allocate(4096).unwrap();
        mm.write(a.start_address() + 8, b"kept").unwrap();
        let _b = mm.allocate(8192).unwrap();

        // a's page carries the oldest access stamp
        let c = mm.allocate(4096).unwrap();
        assert_eq!(c.start_page(), 0);
        mm.free(&c);

        mm.write(a.start_address(), b"head").unwrap();
        assert_eq!(mm.read(a.start_address(), 12).unwrap(), b"head\0\0\0\0kept");
        assert_eq!(mm.statistics().total_page_faults, 1);
        assert!(mm.page(0).unwrap().dirty);
    }

    #[test]
    fn test_pinned_pages_are_not_swapped() {
        let mm = two_pages();
        let a = mm.allocate(4096).unwrap();
        let b = mm.allocate(4096).unwrap();
        assert_eq!(mm.pin(a.id()).unwrap(), 1);
        assert_eq!(mm.pin(b.id()).unwrap(), 1);
        assert!(mm.allocate(1).unwrap_err().is_out_of_memory());

        mm.unpin(b.id()).unwrap();
        let c = mm.allocate(1).unwrap();
        assert_eq!(c.start_page(), b.start_page());
        assert!(mm.page(0).unwrap().pinned);
    }

    #[test]
    fn test_full_swap_area_ends_pass() {
        let mut config = MemoryConfig::with_size(8192, 4096);
        config.swap_multiplier = 0;
        let mm = MemoryManager::new(config).unwrap();
        mm.allocate(8192).unwrap();
        assert!(matches!(
            mm.allocate(1),
            Err(NexisError::OutOfMemory { requested: 1, pages: 1 })
        ));
        assert_eq!(mm.statistics().total_swap_outs, 0);
    }

    #[test]
    fn test_explicit_swap_in() {
        let mm = two_pages();
        let a = mm.allocate(4096).unwrap();
        let b = mm.allocate(4096).unwrap();
        let c = mm.allocate(1).unwrap();
        mm.free(&b);
        mm.free(&c);

        assert!(mm.page(0).unwrap().swapped);
        assert_eq!(mm.swap_in(a.id()).unwrap(), 1);
        assert_eq!(mm.swap_in(a.id()).unwrap(), 0);
        assert!(mm.swap_in(b.id()).is_err());
        mm.check_consistency().unwrap();
    }

    #[test]
    fn test_freeing_swapped_block_drops_images() {
        let mm = two_pages();
        let a = mm.allocate(4096).unwrap();
        let _b = mm.allocate(4096).unwrap();
        let c = mm.allocate(1).unwrap();
        mm.free(&a);
        assert_eq!(mm.statistics().swapped_pages, 0);

        mm.free(&c);
        assert!(mm.page(0).is_none());
        mm.check_consistency().unwrap();
    }
}
