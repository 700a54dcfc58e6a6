// config.rs
//
// Machine configuration
//
// Scheduler cadence and memory geometry for one simulated machine. Loaded
// from and saved to pretty JSON.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{NexisError, NexisResult};

/// Scheduling policy selector
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Algorithm {
    /// FIFO rotation, quantum expiry is the only preemption trigger
    RoundRobin,
    /// Highest priority class first, FIFO within a class
    Priority,
    /// Lowest running-average burst first
    ShortestJobFirst,
    /// Priority with aging of long-waiting processes
    MultilevelFeedback,
    /// Minimum virtual runtime first
    CompletelyFair,
    /// Realtime-class queue takes strict precedence over the ready queue
    RealTime,
}

impl Algorithm {
    pub const ALL: [Algorithm; 6] = [
        Algorithm::RoundRobin,
        Algorithm::Priority,
        Algorithm::ShortestJobFirst,
        Algorithm::MultilevelFeedback,
        Algorithm::CompletelyFair,
        Algorithm::RealTime,
    ];
}

impl Default for Algorithm {
    fn default() -> Self {
        Self::CompletelyFair
    }
}

impl std::fmt::Display for Algorithm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Algorithm::RoundRobin => write!(f, "round-robin"),
            Algorithm::Priority => write!(f, "priority"),
            Algorithm::ShortestJobFirst => write!(f, "sjf"),
            Algorithm::MultilevelFeedback => write!(f, "mlfq"),
            Algorithm::CompletelyFair => write!(f, "cfs"),
            Algorithm::RealTime => write!(f, "realtime"),
        }
    }
}

impl std::str::FromStr for Algorithm {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "rr" | "round-robin" | "round_robin" => Ok(Algorithm::RoundRobin),
            "prio" | "priority" => Ok(Algorithm::Priority),
            "sjf" | "shortest-job-first" | "shortest_job_first" => Ok(Algorithm::ShortestJobFirst),
            "mlfq" | "multilevel" | "multilevel_feedback" => Ok(Algorithm::MultilevelFeedback),
            "cfs" | "fair" | "completely_fair" => Ok(Algorithm::CompletelyFair),
            "rt" | "realtime" | "real_time" => Ok(Algorithm::RealTime),
            _ => Err(format!("Unknown scheduling algorithm: {}", s)),
        }
    }
}

/// Scheduler configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Policy active at start-up
    pub algorithm: Algorithm,
    /// Tick cadence in milliseconds
    pub tick_ms: u64,
    /// Maximum time a process may hold the CPU
    pub quantum_ms: u64,
    /// Waiting time after which multilevel feedback promotes a process
    pub aging_threshold_ms: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            algorithm: Algorithm::default(),
            tick_ms: 10,
            quantum_ms: 100,
            aging_threshold_ms: 1000,
        }
    }
}

/// Memory configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MemoryConfig {
    /// Backing store size in bytes
    pub total_size: u64,
    /// Page size in bytes (power of two)
    pub page_size: usize,
    /// L1 capacity in bytes
    pub l1_size: usize,
    /// L2 capacity in bytes
    pub l2_size: usize,
    /// L3 capacity in bytes
    pub l3_size: usize,
    /// Cache line size in bytes
    pub line_size: usize,
    /// Swap area capacity as a multiple of `total_size`
    pub swap_multiplier: u64,
    /// Pages held back for the system at start-up
    pub reserved_pages: usize,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            total_size: 64 * 1024 * 1024,
            page_size: 4096,
            l1_size: 32 * 1024,
            l2_size: 256 * 1024,
            l3_size: 8 * 1024 * 1024,
            line_size: 64,
            swap_multiplier: 2,
            reserved_pages: 0,
        }
    }
}

impl MemoryConfig {
    /// Configuration with the default geometry and a custom store size
    pub fn with_size(total_size: u64, page_size: usize) -> Self {
        Self {
            total_size,
            page_size,
            ..Self::default()
        }
    }

    /// Number of pages in the backing store
    pub fn page_count(&self) -> usize {
        if self.page_size == 0 {
            return 0;
        }
        (self.total_size / self.page_size as u64) as usize
    }

    /// Validate memory geometry
    pub fn validate(&self) -> NexisResult<()> {
        if self.page_size == 0 || !self.page_size.is_power_of_two() {
            return Err(NexisError::InvalidConfig(format!(
                "page_size must be a power of two, got {}",
                self.page_size
            )));
        }
        if self.total_size == 0 || self.total_size % self.page_size as u64 != 0 {
            return Err(NexisError::InvalidConfig(format!(
                "total_size {} is not a non-zero multiple of page_size {}",
                self.total_size, self.page_size
            )));
        }
        if self.total_size > usize::MAX as u64 {
            return Err(NexisError::InvalidConfig("total_size exceeds address space".into()));
        }
        if self.line_size == 0 || self.page_size % self.line_size != 0 {
            return Err(NexisError::InvalidConfig(format!(
                "line_size {} must be non-zero and divide page_size {}",
                self.line_size, self.page_size
            )));
        }
        for (name, size) in [("l1_size", self.l1_size), ("l2_size", self.l2_size), ("l3_size", self.l3_size)] {
            if size < self.line_size {
                return Err(NexisError::InvalidConfig(format!(
                    "{} must hold at least one {}-byte line",
                    name, self.line_size
                )));
            }
        }
        if self.reserved_pages >= self.page_count() {
            return Err(NexisError::InvalidConfig(format!(
                "reserved_pages {} leaves no allocatable page",
                self.reserved_pages
            )));
        }
        Ok(())
    }
}

impl SchedulerConfig {
    /// Validate scheduler cadence
    pub fn validate(&self) -> NexisResult<()> {
        if self.tick_ms == 0 {
            return Err(NexisError::InvalidConfig("tick_ms must be positive".into()));
        }
        if self.quantum_ms < self.tick_ms {
            return Err(NexisError::InvalidConfig(format!(
                "quantum_ms {} is shorter than one tick ({} ms)",
                self.quantum_ms, self.tick_ms
            )));
        }
        Ok(())
    }
}

/// Whole-machine configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimConfig {
    pub scheduler: SchedulerConfig,
    pub memory: MemoryConfig,
}

impl SimConfig {
    /// Load configuration from file
    pub fn load(path: &Path) -> NexisResult<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| NexisError::InvalidConfig(format!("{}: {}", path.display(), e)))?;

        let config: SimConfig = serde_json::from_str(&content)
            .map_err(|e| NexisError::InvalidConfig(format!("{}: {}", path.display(), e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to file
    pub fn save(&self, path: &Path) -> NexisResult<()> {
        let content = serde_json::to_string_pretty(self)
            .map_err(|e| NexisError::InvalidConfig(e.to_string()))?;

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| NexisError::InvalidConfig(format!("Cannot create {}: {}", parent.display(), e)))?;
            }
        }

        std::fs::write(path, content)
            .map_err(|e| NexisError::InvalidConfig(format!("{}: {}", path.display(), e)))
    }

    /// Validate configuration
    pub fn validate(&self) -> NexisResult<()> {
        self.scheduler.validate()?;
        self.memory.validate()
    }
}
