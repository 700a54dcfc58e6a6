//! Nexis: a simulated kernel core. A time-sliced process scheduler and a
//! paged memory manager with a three-level cache and swap, tied together by
//! a small kernel façade.

pub mod cache;
pub mod config;
pub mod error;
pub mod kernel;
pub mod memory;
pub mod pit;
pub mod process;
pub mod profile;
pub mod run_queue;
pub mod scheduler;
pub mod stats;
pub mod swap;

pub use config::{Algorithm, MemoryConfig, SchedulerConfig, SimConfig};
pub use error::{NexisError, NexisResult};
pub use kernel::Kernel;
pub use memory::{BlockId, MemoryBlock, MemoryManager, Page};
pub use process::{Pid, PidAllocator, Priority, ProcState, Process};
pub use profile::{LinuxProfile, MacProfile, OsProfile, ProfileKind, WindowsProfile};
pub use scheduler::Scheduler;
pub use stats::{CacheStats, MemoryStatistics, SchedulerStatistics, SchedulerSummary};
