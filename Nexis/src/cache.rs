// cache.rs
//
// One level of the inclusive cache hierarchy.
//
// Lines are keyed by their aligned address and evicted least recently used
// first; every get and put counts as a use.

use std::collections::{BTreeMap, HashMap};

use crate::stats::CacheStats;

struct CacheLine {
    data: Vec<u8>,
    stamp: u64,
}

pub struct CacheLevel {
    name: &'static str,
    line_size: usize,
    capacity: usize,
    lines: HashMap<u64, CacheLine>,
    /// use stamp -> line address, oldest first
    lru: BTreeMap<u64, u64>,
    clock: u64,
    stats: CacheStats,
}

impl CacheLevel {
    /// Level of `size_bytes / line_size` lines.
    pub fn new(name: &'static str, size_bytes: usize, line_size: usize) -> Self {
        let line_size = line_size.max(1);
        let capacity = (size_bytes / line_size).max(1);
        Self {
            name,
            line_size,
            capacity,
            lines: HashMap::new(),
            lru: BTreeMap::new(),
            clock: 0,
            stats: CacheStats {
                capacity_lines: capacity,
                ..CacheStats::default()
            },
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn line_size(&self) -> usize {
        self.line_size
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    pub fn contains(&self, addr: u64) -> bool {
        self.lines.contains_key(&addr)
    }

    fn touch(&mut self, addr: u64) {
        self.clock += 1;
        let stamp = self.clock;
        if let Some(line) = self.lines.get_mut(&addr) {
            self.lru.remove(&line.stamp);
            line.stamp = stamp;
            self.lru.insert(stamp, addr);
        }
    }

    /// Look up the line at `addr`, counting a hit or a miss.
    pub fn get(&mut self, addr: u64) -> Option<&[u8]> {
        if !self.lines.contains_key(&addr) {
            self.stats.misses += 1;
            return None;
        }
        self.stats.hits += 1;
        self.touch(addr);
        self.lines.get(&addr).map(|line| line.data.as_slice())
    }

    /// Insert or refresh the line at `addr`, evicting the oldest on overflow.
    pub fn put(&mut self, addr: u64, data: &[u8]) {
        if let Some(line) = self.lines.get_mut(&addr) {
            line.data.clear();
            line.data.extend_from_slice(data);
            self.touch(addr);
            return;
        }

        while self.lines.len() >= self.capacity {
            let Some((_, victim)) = self.lru.pop_first() else {
                break;
            };
            self.lines.remove(&victim);
            self.stats.evictions += 1;
        }

        self.clock += 1;
        self.lines.insert(
            addr,
            CacheLine {
                data: data.to_vec(),
                stamp: self.clock,
            },
        );
        self.lru.insert(self.clock, addr);
    }

    /// Drop every line overlapping `[start, start + len)`.
    pub fn invalidate(&mut self, start: u64, len: u64) -> usize {
        if len == 0 {
            return 0;
        }
        let end = start.saturating_add(len);
        let line = self.line_size as u64;
        let first = start - start % line;
        let span = (end - first + line - 1) / line;

        let victims: Vec<u64> = if span as usize > self.lines.len() {
            self.lines
                .keys()
                .copied()
                .filter(|&addr| addr < end && addr + line > start)
                .collect()
        } else {
            (0..span)
                .map(|i| first + i * line)
                .filter(|addr| self.lines.contains_key(addr))
                .collect()
        };

        for addr in &victims {
            if let Some(line) = self.lines.remove(addr) {
                self.lru.remove(&line.stamp);
            }
        }
        self.stats.invalidations += victims.len() as u64;
        victims.len()
    }

    pub fn clear(&mut self) {
        self.lines.clear();
        self.lru.clear();
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            lines: self.lines.len(),
            ..self.stats.clone()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hit_and_miss_counting() {
        let mut l1 = CacheLevel::new("L1", 256, 64);
        assert!(l1.get(0).is_none());
        l1.put(0, &[1; 64]);
        assert_eq!(l1.get(0), Some(&[1u8; 64][..]));

        let stats = l1.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.lines, 1);
        assert_eq!(stats.capacity_lines, 4);
    }

    #[test]
    fn test_lru_eviction_respects_recent_use() {
        let mut cache = CacheLevel::new("L1", 128, 64);
        cache.put(0, &[0; 64]);
        cache.put(64, &[1; 64]);
        cache.get(0);
        cache.put(128, &[2; 64]);

        assert!(cache.contains(0));
        assert!(!cache.contains(64));
        assert!(cache.contains(128));
        assert_eq!(cache.stats().evictions, 1);
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn test_put_refreshes_existing_line() {
        let mut cache = CacheLevel::new("L2", 128, 64);
        cache.put(0, &[0; 64]);
        cache.put(0, &[9; 64]);
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.get(0).map(|d| d[0]), Some(9));
    }

    #[test]
    fn test_invalidate_overlapping_lines() {
        let mut cache = CacheLevel::new("L3", 64 * 64, 64);
        for i in 0..8u64 {
            cache.put(i * 64, &[i as u8; 64]);
        }
        // [100, 230) touches lines 64, 128 and 192.
        assert_eq!(cache.invalidate(100, 130), 3);
        assert!(cache.contains(0));
        assert!(!cache.contains(64));
        assert!(!cache.contains(192));
        assert!(cache.contains(256));

        // Range wider than the cache contents takes the scan path.
        assert_eq!(cache.invalidate(0, 1 << 20), 5);
        assert!(cache.is_empty());
    }
}
