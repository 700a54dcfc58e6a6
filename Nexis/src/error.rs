// error.rs
//
// Error types shared by the scheduler and the memory manager.
//
// Every condition here is local and recoverable: the caller decides whether
// to retry, report or give up.

use thiserror::Error;

use crate::process::{Pid, ProcState};

/// Result type for Nexis operations
pub type NexisResult<T> = Result<T, NexisError>;

/// Nexis error types
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NexisError {
    /// Malformed request (non-positive size, bad flag combination, ...)
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Access outside the backing store
    #[error("Memory access out of bounds: {size} bytes at {address:#x} (limit {limit:#x})")]
    Bounds { address: u64, size: usize, limit: u64 },

    /// No contiguous run of pages, even after a swap-out pass
    #[error("Out of memory: cannot allocate {requested} bytes ({pages} pages)")]
    OutOfMemory { requested: usize, pages: usize },

    /// Process state change not allowed by the lifecycle FSM
    #[error("Invalid transition for pid {pid}: {from:?} -> {to:?}")]
    InvalidTransition { pid: Pid, from: ProcState, to: ProcState },

    /// Pid not tracked by the scheduler
    #[error("Unknown process: {0}")]
    UnknownProcess(Pid),

    /// Pid already tracked by the scheduler
    #[error("Process {0} is already scheduled")]
    DuplicateProcess(Pid),

    /// Scheduler was shut down and accepts no further scheduling operations
    #[error("Scheduler has been shut down")]
    SchedulerStopped,

    /// Tick thread could not be started
    #[error("Tick source failed: {0}")]
    TickSource(String),

    /// Configuration rejected by validation or unreadable
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl NexisError {
    /// Whether this error reports memory exhaustion
    pub fn is_out_of_memory(&self) -> bool {
        matches!(self, NexisError::OutOfMemory { .. })
    }
}
