// stats.rs
//
// Statistics snapshots for the scheduler and the memory manager.

use serde::Serialize;

use crate::config::Algorithm;
use crate::process::Pid;

/// Per-process scheduling statistics
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SchedulerStatistics {
    pub pid: Pid,
    /// CPU time accrued while Running
    pub total_cpu_time: u64,
    /// Time spent Ready, cumulative
    pub waiting_time: u64,
    /// Time spent Ready since the last aging promotion
    pub aging_time: u64,
    /// Times this process was switched out
    pub context_switches: u64,
    /// Clock value of the last dispatch
    pub last_scheduled: u64,
    /// Running average of CPU bursts
    pub average_burst: u64,
    pub burst_count: u64,
}

impl SchedulerStatistics {
    pub fn new(pid: Pid) -> Self {
        Self {
            pid,
            ..Default::default()
        }
    }

    /// Fold one burst into the running average.
    pub fn record_burst(&mut self, burst: u64) {
        self.average_burst = (self.average_burst * self.burst_count + burst) / (self.burst_count + 1);
        self.burst_count += 1;
    }
}

/// Scheduler-wide snapshot
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SchedulerSummary {
    pub algorithm: Algorithm,
    /// Simulated clock in milliseconds
    pub clock_ms: u64,
    pub ticks: u64,
    pub idle_ticks: u64,
    /// Selections that put a process on the CPU
    pub dispatches: u64,
    pub context_switches: u64,
    pub running: Option<Pid>,
    pub ready: usize,
    pub blocked: usize,
    pub suspended: usize,
    pub stopped: bool,
}

/// Per cache level counters
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub invalidations: u64,
    pub lines: usize,
    pub capacity_lines: usize,
}

impl CacheStats {
    /// hits / (hits + misses), zero before the first lookup
    #[inline]
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }

    #[inline]
    pub fn fill_ratio(&self) -> f64 {
        if self.capacity_lines == 0 {
            0.0
        } else {
            self.lines as f64 / self.capacity_lines as f64
        }
    }
}

/// Memory manager snapshot
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MemoryStatistics {
    pub total_size: u64,
    pub used_size: u64,
    pub free_size: u64,
    pub page_size: usize,
    pub live_blocks: usize,
    pub swapped_pages: usize,
    pub total_allocations: u64,
    pub total_deallocations: u64,
    pub total_page_faults: u64,
    pub total_swap_outs: u64,
    pub total_swap_ins: u64,
    pub l1: CacheStats,
    pub l2: CacheStats,
    pub l3: CacheStats,
}

impl MemoryStatistics {
    pub fn l1_hit_rate(&self) -> f64 {
        self.l1.hit_rate()
    }

    pub fn l2_hit_rate(&self) -> f64 {
        self.l2.hit_rate()
    }

    pub fn l3_hit_rate(&self) -> f64 {
        self.l3.hit_rate()
    }

    pub fn used_ratio(&self) -> f64 {
        if self.total_size == 0 {
            0.0
        } else {
            self.used_size as f64 / self.total_size as f64
        }
    }
}
