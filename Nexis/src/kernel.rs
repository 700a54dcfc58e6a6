// kernel.rs
//
// One simulated machine: a scheduler and a memory manager driven together so
// a process never holds memory without a scheduling record or the reverse.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use log::{debug, info, warn};

use crate::config::SimConfig;
use crate::error::{NexisError, NexisResult};
use crate::memory::MemoryManager;
use crate::process::{Pid, PidAllocator, Priority, Process};
use crate::profile::OsProfile;
use crate::scheduler::Scheduler;

pub struct Kernel {
    profile: Box<dyn OsProfile>,
    scheduler: Arc<Scheduler>,
    memory: Arc<MemoryManager>,
    pids: PidAllocator,
    booted: AtomicBool,
}

impl Kernel {
    pub fn new(config: SimConfig, profile: Box<dyn OsProfile>) -> NexisResult<Self> {
        config.validate()?;
        let memory = MemoryManager::new(config.memory)?;
        Ok(Self {
            profile,
            scheduler: Arc::new(Scheduler::new(config.scheduler)),
            memory: Arc::new(memory),
            pids: PidAllocator::new(),
            booted: AtomicBool::new(false),
        })
    }

    /// Default configuration sized by the profile.
    pub fn with_profile(profile: Box<dyn OsProfile>) -> NexisResult<Self> {
        let mut config = SimConfig::default();
        config.memory.total_size = profile.default_memory_size();
        Self::new(config, profile)
    }

    pub fn profile(&self) -> &dyn OsProfile {
        self.profile.as_ref()
    }

    pub fn scheduler(&self) -> &Arc<Scheduler> {
        &self.scheduler
    }

    pub fn memory(&self) -> &Arc<MemoryManager> {
        &self.memory
    }

    pub fn is_booted(&self) -> bool {
        self.booted.load(Ordering::SeqCst)
    }

    /// Create init and the profile's services, then start the clock.
    /// Returns init's pid.
    pub fn boot(&self) -> NexisResult<Pid> {
        if self.booted.swap(true, Ordering::SeqCst) {
            return Err(NexisError::InvalidArgument("kernel already booted".into()));
        }
        info!("Booting {}", self.profile.boot_banner());

        let init = match self.spawn("init", "root", Priority::High, 0, None) {
            Ok(pid) => pid,
            Err(e) => {
                self.booted.store(false, Ordering::SeqCst);
                return Err(e);
            }
        };
        for service in self.profile.services() {
            if let Err(e) = self.spawn(service, "root", Priority::Normal, 0, Some(init)) {
                warn!("Service {} failed to start: {}", service, e);
            }
        }

        self.scheduler.start()?;
        info!("{} {} booted", self.profile.name(), self.profile.version());
        Ok(init)
    }

    /// Allocate memory for a new process, then hand it to the scheduler.
    pub fn create_process(
        &self,
        name: &str,
        owner: &str,
        priority: Priority,
        nice: i32,
    ) -> NexisResult<Pid> {
        let parent = self.is_booted().then_some(1);
        self.spawn(name, owner, priority, nice, parent)
    }

    fn spawn(
        &self,
        name: &str,
        owner: &str,
        priority: Priority,
        nice: i32,
        parent: Option<Pid>,
    ) -> NexisResult<Pid> {
        let pid = self.pids.alloc_pid();
        let mut process = Process::new(pid, name)
            .with_owner(owner)
            .with_priority(priority)
            .with_nice(nice);
        if let Some(parent) = parent {
            process = process.with_parent(parent);
        }

        let bytes = self.profile.process_memory(&process);
        let size = i64::try_from(bytes)
            .map_err(|_| NexisError::InvalidArgument(format!("process memory {} too large", bytes)))?;
        let block = self.memory.allocate(size)?;
        process.attach_memory(block.clone());

        if let Err(e) = self.scheduler.add_process(process) {
            self.memory.free(&block);
            return Err(e);
        }
        debug!("Created process: {} (PID: {}) with {}", name, pid, block);
        Ok(pid)
    }

    /// Free the process's memory, then drop it from the scheduler.
    pub fn terminate_process(&self, pid: Pid) -> NexisResult<Process> {
        self.retire(pid, false)
    }

    pub fn kill_process(&self, pid: Pid) -> NexisResult<Process> {
        self.retire(pid, true)
    }

    fn retire(&self, pid: Pid, kill: bool) -> NexisResult<Process> {
        let snapshot = self
            .scheduler
            .process(pid)
            .ok_or(NexisError::UnknownProcess(pid))?;
        if let Some(block) = &snapshot.memory {
            self.memory.free(block);
        }

        let removed = if kill {
            self.scheduler.kill_process(pid)
        } else {
            self.scheduler.remove_process(pid)
        };
        let mut process = removed.ok_or(NexisError::UnknownProcess(pid))?;
        process.detach_memory();
        debug!("Terminated process PID: {}", pid);
        Ok(process)
    }

    /// Terminate every process, highest pid first, then stop the clock.
    pub fn shutdown(&self) {
        info!("Shutting down {} {}", self.profile.name(), self.profile.version());
        let mut pids: Vec<Pid> = self.scheduler.processes().iter().map(Process::pid).collect();
        pids.sort_unstable_by(|a, b| b.cmp(a));
        for pid in pids {
            let _ = self.terminate_process(pid);
        }
        self.scheduler.shutdown();
        self.booted.store(false, Ordering::SeqCst);
    }
}

impl Drop for Kernel {
    fn drop(&mut self) {
        self.scheduler.shutdown();
    }
}
