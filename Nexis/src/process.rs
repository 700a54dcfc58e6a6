// process.rs

use core::sync::atomic::{AtomicU32, Ordering};

use serde::{Deserialize, Serialize};

use crate::error::{NexisError, NexisResult};
use crate::memory::MemoryBlock;

pub type Pid = u32;

pub const NICE_MIN: i32 = -20;
pub const NICE_MAX: i32 = 19;

/// Process lifecycle state.
///
/// ```text
/// Created -> Ready -> {Running, Suspended, Terminated}
/// Running -> {Ready, Blocked, Suspended, Terminated, Killed}
/// Blocked -> {Ready, Suspended, Terminated}
/// Suspended -> {Ready, Terminated}
/// Terminated | Killed -> Zombie
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ProcState {
    Created,
    Ready,
    Running,
    Blocked,
    Suspended,
    Terminated,
    Killed,
    Zombie,
}

impl ProcState {
    pub fn can_transition_to(self, next: ProcState) -> bool {
        use ProcState::*;
        match self {
            Created => next == Ready,
            Ready => matches!(next, Running | Suspended | Terminated),
            Running => matches!(next, Ready | Blocked | Suspended | Terminated | Killed),
            Blocked => matches!(next, Ready | Suspended | Terminated),
            Suspended => matches!(next, Ready | Terminated),
            Terminated | Killed => next == Zombie,
            Zombie => false,
        }
    }

    /// Ready, Running, Blocked or Suspended
    pub fn is_active(self) -> bool {
        matches!(
            self,
            ProcState::Ready | ProcState::Running | ProcState::Blocked | ProcState::Suspended
        )
    }

    pub fn is_finished(self) -> bool {
        matches!(self, ProcState::Terminated | ProcState::Killed | ProcState::Zombie)
    }
}

impl std::fmt::Display for ProcState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ProcState::Created => "created",
            ProcState::Ready => "ready",
            ProcState::Running => "running",
            ProcState::Blocked => "blocked",
            ProcState::Suspended => "suspended",
            ProcState::Terminated => "terminated",
            ProcState::Killed => "killed",
            ProcState::Zombie => "zombie",
        };
        f.write_str(s)
    }
}

/// Priority class, lowest first so `Ord` follows urgency.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Priority {
    Idle,
    Low,
    Normal,
    High,
    Realtime,
}

impl Priority {
    pub const COUNT: usize = 5;

    /// Highest class first
    pub const DESCENDING: [Priority; Priority::COUNT] = [
        Priority::Realtime,
        Priority::High,
        Priority::Normal,
        Priority::Low,
        Priority::Idle,
    ];

    pub fn index(self) -> usize {
        self as usize
    }

    /// One class up, never into Realtime.
    pub fn promoted(self) -> Option<Priority> {
        match self {
            Priority::Idle => Some(Priority::Low),
            Priority::Low => Some(Priority::Normal),
            Priority::Normal => Some(Priority::High),
            Priority::High | Priority::Realtime => None,
        }
    }
}

impl Default for Priority {
    fn default() -> Self {
        Priority::Normal
    }
}

impl std::fmt::Display for Priority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Priority::Idle => "idle",
            Priority::Low => "low",
            Priority::Normal => "normal",
            Priority::High => "high",
            Priority::Realtime => "realtime",
        };
        f.write_str(s)
    }
}

impl std::str::FromStr for Priority {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "idle" => Ok(Priority::Idle),
            "low" => Ok(Priority::Low),
            "normal" => Ok(Priority::Normal),
            "high" => Ok(Priority::High),
            "rt" | "realtime" | "real-time" => Ok(Priority::Realtime),
            _ => Err(format!("Unknown priority: {}", s)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Process {
    pid: Pid,
    pub name: String,
    pub owner: String,
    pub executable: String,
    pub parent: Option<Pid>,
    state: ProcState,
    pub priority: Priority,
    nice: i32,
    pub cpu_time_ms: u64,
    pub memory_usage: u64,
    pub memory: Option<MemoryBlock>,
}

impl Process {
    pub fn new(pid: Pid, name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            pid,
            executable: format!("/bin/{}", name),
            name,
            owner: "system".to_string(),
            parent: None,
            state: ProcState::Created,
            priority: Priority::Normal,
            nice: 0,
            cpu_time_ms: 0,
            memory_usage: 0,
            memory: None,
        }
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_nice(mut self, nice: i32) -> Self {
        self.set_nice(nice);
        self
    }

    pub fn with_owner(mut self, owner: impl Into<String>) -> Self {
        self.owner = owner.into();
        self
    }

    pub fn with_parent(mut self, parent: Pid) -> Self {
        self.parent = Some(parent);
        self
    }

    pub fn pid(&self) -> Pid {
        self.pid
    }

    pub fn state(&self) -> ProcState {
        self.state
    }

    pub fn nice(&self) -> i32 {
        self.nice
    }

    /// Clamped into [-20, 19].
    pub fn set_nice(&mut self, nice: i32) {
        self.nice = nice.clamp(NICE_MIN, NICE_MAX);
    }

    /// Attach the block backing this process.
    pub fn attach_memory(&mut self, block: MemoryBlock) {
        self.memory_usage = block.size() as u64;
        self.memory = Some(block);
    }

    pub fn detach_memory(&mut self) -> Option<MemoryBlock> {
        self.memory_usage = 0;
        self.memory.take()
    }

    /// Checked state change; an illegal edge leaves the process untouched.
    pub fn transition(&mut self, next: ProcState) -> NexisResult<()> {
        if !self.state.can_transition_to(next) {
            return Err(NexisError::InvalidTransition {
                pid: self.pid,
                from: self.state,
                to: next,
            });
        }
        self.state = next;
        Ok(())
    }

    pub fn is_terminated(&self) -> bool {
        self.state.is_finished()
    }
}

impl std::fmt::Display for Process {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Process{{pid={}, name='{}', state={}, priority={}}}",
            self.pid, self.name, self.state, self.priority
        )
    }
}

/// Hands out pids, starting at 1, never reused.
pub struct PidAllocator {
    next_pid: AtomicU32,
}

impl PidAllocator {
    pub const fn new() -> Self {
        Self {
            next_pid: AtomicU32::new(1),
        }
    }

    pub fn alloc_pid(&self) -> Pid {
        self.next_pid.fetch_add(1, Ordering::SeqCst)
    }

    /// Next pid that would be handed out
    pub fn peek(&self) -> Pid {
        self.next_pid.load(Ordering::SeqCst)
    }
}

impl Default for PidAllocator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lifecycle_edges() {
        use ProcState::*;
        assert!(Created.can_transition_to(Ready));
        assert!(!Created.can_transition_to(Running));
        assert!(Ready.can_transition_to(Running));
        assert!(!Ready.can_transition_to(Blocked));
        assert!(Running.can_transition_to(Killed));
        assert!(!Blocked.can_transition_to(Running));
        assert!(!Suspended.can_transition_to(Blocked));
        assert!(Killed.can_transition_to(Zombie));
        for next in [Created, Ready, Running, Blocked, Suspended, Terminated, Killed, Zombie] {
            assert!(!Zombie.can_transition_to(next));
        }
    }

    #[test]
    fn test_illegal_transition_leaves_state() {
        let mut p = Process::new(3, "worker");
        let err = p.transition(ProcState::Running).unwrap_err();
        assert_eq!(
            err,
            NexisError::InvalidTransition { pid: 3, from: ProcState::Created, to: ProcState::Running }
        );
        assert_eq!(p.state(), ProcState::Created);

        p.transition(ProcState::Ready).unwrap();
        p.transition(ProcState::Running).unwrap();
        assert_eq!(p.state(), ProcState::Running);
    }

    #[test]
    fn test_nice_is_clamped() {
        let mut p = Process::new(1, "init").with_nice(-40);
        assert_eq!(p.nice(), -20);
        p.set_nice(25);
        assert_eq!(p.nice(), 19);
    }

    #[test]
    fn test_priority_promotion_stops_below_realtime() {
        assert_eq!(Priority::Idle.promoted(), Some(Priority::Low));
        assert_eq!(Priority::Normal.promoted(), Some(Priority::High));
        assert_eq!(Priority::High.promoted(), None);
        assert_eq!(Priority::Realtime.promoted(), None);
        assert!(Priority::Realtime > Priority::High);
    }

    #[test]
    fn test_pid_allocator_is_monotonic() {
        let pids = PidAllocator::new();
        assert_eq!(pids.alloc_pid(), 1);
        assert_eq!(pids.alloc_pid(), 2);
        assert_eq!(pids.peek(), 3);
    }
}
