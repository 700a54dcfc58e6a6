// scheduler.rs
//
// Time-sliced scheduler. All state sits behind one lock so tick, add,
// remove, block and unblock never interleave.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use log::{debug, info, trace, warn};
use spin::Mutex;

use crate::config::{Algorithm, SchedulerConfig};
use crate::error::{NexisError, NexisResult};
use crate::pit::Pit;
use crate::process::{Pid, Priority, ProcState, Process};
use crate::run_queue::RunQueue;
use crate::stats::{SchedulerStatistics, SchedulerSummary};

struct SchedState {
    config: SchedulerConfig,
    /// Simulated clock in milliseconds
    clock: u64,
    ticks: u64,
    idle_ticks: u64,
    dispatches: u64,
    context_switches: u64,
    processes: BTreeMap<Pid, Process>,
    stats: BTreeMap<Pid, SchedulerStatistics>,
    queue: RunQueue,
    blocked: BTreeSet<Pid>,
    suspended: BTreeSet<Pid>,
    current: Option<Pid>,
    last_dispatched: Option<Pid>,
    quantum_start: u64,
    stopped: bool,
}

impl SchedState {
    fn new(config: SchedulerConfig) -> Self {
        Self {
            queue: RunQueue::new(config.algorithm),
            config,
            clock: 0,
            ticks: 0,
            idle_ticks: 0,
            dispatches: 0,
            context_switches: 0,
            processes: BTreeMap::new(),
            stats: BTreeMap::new(),
            blocked: BTreeSet::new(),
            suspended: BTreeSet::new(),
            current: None,
            last_dispatched: None,
            quantum_start: 0,
            stopped: false,
        }
    }

    fn ensure_running(&self) -> NexisResult<()> {
        if self.stopped {
            Err(NexisError::SchedulerStopped)
        } else {
            Ok(())
        }
    }

    fn process_mut(&mut self, pid: Pid) -> NexisResult<&mut Process> {
        self.processes.get_mut(&pid).ok_or(NexisError::UnknownProcess(pid))
    }

    /// Bookkeeping for the running process leaving the CPU.
    fn release_cpu(&mut self, pid: Pid) {
        if self.current != Some(pid) {
            return;
        }
        self.current = None;
        let burst = self.clock.saturating_sub(self.quantum_start);
        if let Some(stats) = self.stats.get_mut(&pid) {
            stats.record_burst(burst);
        }
    }

    fn quantum_expired(&self) -> bool {
        self.current.is_some() && self.clock - self.quantum_start >= self.config.quantum_ms
    }

    fn more_urgent_waiting(&self) -> bool {
        let Some(pid) = self.current else {
            return false;
        };
        match self.processes.get(&pid) {
            Some(p) => self.queue.has_more_urgent(p.priority),
            None => false,
        }
    }

    fn preempt_current(&mut self) {
        let Some(pid) = self.current else {
            return;
        };
        if let Some(p) = self.processes.get_mut(&pid) {
            if let Err(e) = p.transition(ProcState::Ready) {
                warn!("Cannot preempt pid {}: {}", pid, e);
                return;
            }
            debug!("Preempting process {} (PID {})", p.name, pid);
        }
        self.release_cpu(pid);
    }

    fn dispatch(&mut self, next: Pid) {
        let clock = self.clock;
        match self.processes.get_mut(&next) {
            Some(p) => {
                if let Err(e) = p.transition(ProcState::Running) {
                    warn!("Cannot dispatch pid {}: {}", next, e);
                    return;
                }
            }
            None => return,
        }

        let previous = self.last_dispatched;
        self.current = Some(next);
        self.last_dispatched = Some(next);
        self.quantum_start = clock;
        self.dispatches += 1;

        if previous != Some(next) {
            self.context_switches += 1;
            if let Some(old) = previous.and_then(|pid| self.stats.get_mut(&pid)) {
                old.context_switches += 1;
            }
            debug!("Context switch: {:?} -> {}", previous, next);
        }
        if let Some(stats) = self.stats.get_mut(&next) {
            stats.last_scheduled = clock;
        }
    }

    /// Multilevel feedback aging: one level per tick at most.
    fn age_ready(&mut self) {
        let threshold = self.config.aging_threshold_ms;
        let candidates: Vec<(Pid, Priority, Priority)> = self
            .processes
            .values()
            .filter(|p| p.state() == ProcState::Ready)
            .filter(|p| self.stats.get(&p.pid()).map_or(false, |s| s.aging_time > threshold))
            .filter_map(|p| p.priority.promoted().map(|up| (p.pid(), p.priority, up)))
            .collect();

        for (pid, from, to) in candidates {
            if !self.queue.promote(pid, from, to) {
                continue;
            }
            if let Some(p) = self.processes.get_mut(&pid) {
                p.priority = to;
            }
            if let Some(stats) = self.stats.get_mut(&pid) {
                stats.aging_time = 0;
            }
            debug!("Aged pid {} from {} to {}", pid, from, to);
        }
    }

    fn account_tick(&mut self) {
        let step = self.config.tick_ms;
        for (pid, p) in self.processes.iter_mut() {
            match p.state() {
                ProcState::Ready => {
                    if let Some(stats) = self.stats.get_mut(pid) {
                        stats.waiting_time += step;
                        stats.aging_time += step;
                    }
                }
                ProcState::Running => {
                    p.cpu_time_ms += step;
                    if let Some(stats) = self.stats.get_mut(pid) {
                        stats.total_cpu_time += step;
                    }
                }
                _ => {}
            }
        }
        if self.current.is_none() {
            self.idle_ticks += 1;
        }
    }

    fn tick(&mut self) {
        if self.stopped {
            return;
        }
        self.clock += self.config.tick_ms;
        self.ticks += 1;

        if self.queue.algorithm() == Algorithm::MultilevelFeedback {
            self.age_ready();
        }

        if self.quantum_expired() || self.more_urgent_waiting() {
            self.preempt_current();
        }

        if self.current.is_none() {
            let next = self.queue.select(&self.processes, &self.stats, self.config.quantum_ms);
            if let Some(next) = next {
                self.dispatch(next);
            }
        }

        self.account_tick();
        trace!("tick {} at {} ms, running {:?}", self.ticks, self.clock, self.current);
    }

    /// Re-file a tracked process after its priority or niceness changed.
    fn refile(&mut self, pid: Pid) {
        if self.queue.remove(pid) {
            if let Some(p) = self.processes.get(&pid) {
                self.queue.enqueue(p);
            }
        }
    }
}

pub struct Scheduler {
    state: Mutex<SchedState>,
    ticker: Mutex<Option<Pit>>,
}

impl Scheduler {
    pub fn new(config: SchedulerConfig) -> Self {
        Self {
            state: Mutex::new(SchedState::new(config)),
            ticker: Mutex::new(None),
        }
    }

    /// Start the periodic tick source. Calling it twice is a no-op.
    pub fn start(self: &Arc<Self>) -> NexisResult<()> {
        let tick_ms = {
            let state = self.state.lock();
            state.ensure_running()?;
            state.config.tick_ms
        };

        let mut ticker = self.ticker.lock();
        if ticker.is_some() {
            return Ok(());
        }
        let weak = Arc::downgrade(self);
        *ticker = Some(Pit::start(tick_ms, move || {
            if let Some(scheduler) = weak.upgrade() {
                scheduler.tick();
            }
        })?);
        info!("Scheduler ticking every {} ms", tick_ms);
        Ok(())
    }

    /// Make `process` Ready and track it under the active policy.
    pub fn add_process(&self, mut process: Process) -> NexisResult<()> {
        let mut state = self.state.lock();
        state.ensure_running()?;

        let pid = process.pid();
        if state.processes.contains_key(&pid) {
            return Err(NexisError::DuplicateProcess(pid));
        }
        if process.state() != ProcState::Ready {
            process.transition(ProcState::Ready)?;
        }

        state.queue.enqueue(&process);
        state.stats.insert(pid, SchedulerStatistics::new(pid));
        debug!("Added process {} (PID {}) to scheduler", process.name, pid);
        state.processes.insert(pid, process);
        Ok(())
    }

    /// Stop tracking `pid`. Unknown pids are ignored.
    pub fn remove_process(&self, pid: Pid) -> Option<Process> {
        self.retire(pid, ProcState::Terminated)
    }

    /// Like `remove_process`, ending in Killed when `pid` holds the CPU.
    pub fn kill_process(&self, pid: Pid) -> Option<Process> {
        self.retire(pid, ProcState::Killed)
    }

    fn retire(&self, pid: Pid, end: ProcState) -> Option<Process> {
        let mut state = self.state.lock();
        let mut process = state.processes.remove(&pid)?;

        state.release_cpu(pid);
        state.queue.forget(pid);
        state.blocked.remove(&pid);
        state.suspended.remove(&pid);

        let end = if end == ProcState::Killed && process.state() != ProcState::Running {
            ProcState::Terminated
        } else {
            end
        };
        if process.transition(end).is_ok() {
            let _ = process.transition(ProcState::Zombie);
        }

        if let Some(stats) = state.stats.remove(&pid) {
            info!(
                "Process {} (PID {}) removed - Total CPU time: {}ms, Waiting: {}ms, Context switches: {}",
                process.name, pid, stats.total_cpu_time, stats.waiting_time, stats.context_switches
            );
        }
        Some(process)
    }

    /// Move the running process `pid` to the blocked set.
    pub fn block_process(&self, pid: Pid) -> NexisResult<()> {
        let mut state = self.state.lock();
        state.ensure_running()?;

        let p = state.process_mut(pid)?;
        p.transition(ProcState::Blocked)?;
        debug!("Process {} (PID {}) blocked", p.name, pid);

        state.release_cpu(pid);
        state.queue.remove(pid);
        state.blocked.insert(pid);
        Ok(())
    }

    /// Return a blocked process to the ready queues; no-op otherwise.
    pub fn unblock_process(&self, pid: Pid) -> NexisResult<()> {
        let mut state = self.state.lock();
        state.ensure_running()?;
        if !state.blocked.contains(&pid) {
            return Ok(());
        }

        let p = state.process_mut(pid)?;
        p.transition(ProcState::Ready)?;
        debug!("Process {} (PID {}) unblocked", p.name, pid);

        let SchedState { queue, processes, blocked, .. } = &mut *state;
        blocked.remove(&pid);
        if let Some(p) = processes.get(&pid) {
            queue.enqueue(p);
        }
        Ok(())
    }

    pub fn suspend_process(&self, pid: Pid) -> NexisResult<()> {
        let mut state = self.state.lock();
        state.ensure_running()?;

        let p = state.process_mut(pid)?;
        p.transition(ProcState::Suspended)?;
        debug!("Process {} (PID {}) suspended", p.name, pid);

        state.release_cpu(pid);
        state.queue.remove(pid);
        state.blocked.remove(&pid);
        state.suspended.insert(pid);
        Ok(())
    }

    /// Return a suspended process to the ready queues; no-op otherwise.
    pub fn resume_process(&self, pid: Pid) -> NexisResult<()> {
        let mut state = self.state.lock();
        state.ensure_running()?;
        if !state.suspended.contains(&pid) {
            return Ok(());
        }

        let p = state.process_mut(pid)?;
        p.transition(ProcState::Ready)?;
        let p = p.clone();
        debug!("Process {} (PID {}) resumed", p.name, pid);

        state.suspended.remove(&pid);
        state.queue.enqueue(&p);
        Ok(())
    }

    pub fn set_priority(&self, pid: Pid, priority: Priority) -> NexisResult<()> {
        let mut state = self.state.lock();
        state.ensure_running()?;
        state.process_mut(pid)?.priority = priority;
        state.refile(pid);
        Ok(())
    }

    pub fn set_nice(&self, pid: Pid, nice: i32) -> NexisResult<()> {
        let mut state = self.state.lock();
        state.ensure_running()?;
        state.process_mut(pid)?.set_nice(nice);
        state.refile(pid);
        Ok(())
    }

    /// One scheduling step: preemption check, selection, context switch,
    /// statistics.
    pub fn tick(&self) {
        self.state.lock().tick();
    }

    /// Swap the selection policy. Tracked processes are re-filed in arrival
    /// order; fair-tree positions are re-derived.
    pub fn set_algorithm(&self, algorithm: Algorithm) -> NexisResult<()> {
        let mut state = self.state.lock();
        state.ensure_running()?;
        if state.queue.algorithm() == algorithm {
            return Ok(());
        }
        let SchedState { queue, processes, config, .. } = &mut *state;
        queue.migrate(algorithm, processes);
        config.algorithm = algorithm;
        info!("Scheduling algorithm changed to: {}", algorithm);
        Ok(())
    }

    pub fn algorithm(&self) -> Algorithm {
        self.state.lock().queue.algorithm()
    }

    pub fn current(&self) -> Option<Pid> {
        self.state.lock().current
    }

    pub fn process(&self, pid: Pid) -> Option<Process> {
        self.state.lock().processes.get(&pid).cloned()
    }

    pub fn processes(&self) -> Vec<Process> {
        self.state.lock().processes.values().cloned().collect()
    }

    pub fn vruntime(&self, pid: Pid) -> Option<u64> {
        self.state.lock().queue.vruntime(pid)
    }

    pub fn statistics(&self) -> BTreeMap<Pid, SchedulerStatistics> {
        self.state.lock().stats.clone()
    }

    pub fn summary(&self) -> SchedulerSummary {
        let state = self.state.lock();
        SchedulerSummary {
            algorithm: state.queue.algorithm(),
            clock_ms: state.clock,
            ticks: state.ticks,
            idle_ticks: state.idle_ticks,
            dispatches: state.dispatches,
            context_switches: state.context_switches,
            running: state.current,
            ready: state
                .processes
                .values()
                .filter(|p| p.state() == ProcState::Ready)
                .count(),
            blocked: state.blocked.len(),
            suspended: state.suspended.len(),
            stopped: state.stopped,
        }
    }

    pub fn is_ticking(&self) -> bool {
        self.ticker.lock().as_ref().map_or(false, Pit::is_running)
    }

    /// Stop the tick source. Statistics stay readable; scheduling
    /// operations are refused from here on.
    pub fn shutdown(&self) {
        if let Some(mut pit) = self.ticker.lock().take() {
            pit.stop();
        }
        let mut state = self.state.lock();
        if !state.stopped {
            state.stopped = true;
            info!(
                "Scheduler shut down after {} ticks, {} context switches",
                state.ticks, state.context_switches
            );
        }
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        if let Some(mut pit) = self.ticker.get_mut().take() {
            pit.stop();
        }
    }
}
