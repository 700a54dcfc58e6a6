// run_queue.rs
//
// Ready queues for every scheduling policy.
//
// A tracked process stays in its policy structure while it runs; it only
// leaves when it blocks, is suspended or is removed. Selection rotates or
// re-keys the chosen entry in place.

use std::collections::{BTreeMap, HashMap, VecDeque};

use crate::config::Algorithm;
use crate::process::{Pid, Priority, Process};
use crate::stats::SchedulerStatistics;

/// vruntime step for one selection under the fair policy.
///
/// Quantum scaled by class, then by niceness: higher nice gives a smaller
/// step. Never zero so the key always moves forward.
pub fn vruntime_increment(process: &Process, quantum_ms: u64) -> u64 {
    let base = match process.priority {
        Priority::Realtime => quantum_ms / 4,
        Priority::High => quantum_ms / 2,
        Priority::Normal => quantum_ms,
        Priority::Low => quantum_ms * 2,
        Priority::Idle => quantum_ms * 4,
    };
    let nice_factor = (20 - process.nice()) as u64;
    (base * nice_factor / 20).max(1)
}

pub struct RunQueue {
    algorithm: Algorithm,
    /// Round-robin, SJF and the non-realtime side of RealTime
    fifo: VecDeque<Pid>,
    /// Priority and multilevel feedback, indexed by `Priority::index`
    levels: [VecDeque<Pid>; Priority::COUNT],
    /// Fair tree keyed by (vruntime, sequence)
    fair: BTreeMap<(u64, u64), Pid>,
    fair_keys: HashMap<Pid, (u64, u64)>,
    /// Last known vruntime, kept while a process is off the tree
    vruntime: HashMap<Pid, u64>,
    /// Realtime class keyed by (nice, sequence)
    realtime: BTreeMap<(i32, u64), Pid>,
    realtime_keys: HashMap<Pid, (i32, u64)>,
    /// First-arrival order, used for migration between policies
    arrival: HashMap<Pid, u64>,
    seq: u64,
}

impl RunQueue {
    pub fn new(algorithm: Algorithm) -> Self {
        const EMPTY: VecDeque<Pid> = VecDeque::new();
        Self {
            algorithm,
            fifo: VecDeque::new(),
            levels: [EMPTY; Priority::COUNT],
            fair: BTreeMap::new(),
            fair_keys: HashMap::new(),
            vruntime: HashMap::new(),
            realtime: BTreeMap::new(),
            realtime_keys: HashMap::new(),
            arrival: HashMap::new(),
            seq: 0,
        }
    }

    pub fn algorithm(&self) -> Algorithm {
        self.algorithm
    }

    fn next_seq(&mut self) -> u64 {
        self.seq += 1;
        self.seq
    }

    /// Track `process` under the active policy.
    pub fn enqueue(&mut self, process: &Process) {
        let pid = process.pid();
        if self.contains(pid) {
            return;
        }
        if !self.arrival.contains_key(&pid) {
            let seq = self.next_seq();
            self.arrival.insert(pid, seq);
        }

        match self.algorithm {
            Algorithm::CompletelyFair => {
                let floor = self.min_vruntime().unwrap_or(0);
                let own = self.vruntime.get(&pid).copied().unwrap_or(floor);
                self.insert_fair(pid, own.max(floor));
            }
            Algorithm::Priority | Algorithm::MultilevelFeedback => {
                self.levels[process.priority.index()].push_back(pid);
            }
            Algorithm::RealTime if process.priority == Priority::Realtime => {
                let key = (process.nice(), self.next_seq());
                self.realtime.insert(key, pid);
                self.realtime_keys.insert(pid, key);
            }
            Algorithm::RoundRobin | Algorithm::ShortestJobFirst | Algorithm::RealTime => {
                self.fifo.push_back(pid);
            }
        }
    }

    fn insert_fair(&mut self, pid: Pid, vruntime: u64) {
        let key = (vruntime, self.next_seq());
        self.fair.insert(key, pid);
        self.fair_keys.insert(pid, key);
        self.vruntime.insert(pid, vruntime);
    }

    /// Stop tracking `pid`; its vruntime is remembered for re-entry.
    pub fn remove(&mut self, pid: Pid) -> bool {
        let mut found = false;
        if let Some(pos) = self.fifo.iter().position(|&p| p == pid) {
            self.fifo.remove(pos);
            found = true;
        }
        for level in self.levels.iter_mut() {
            if let Some(pos) = level.iter().position(|&p| p == pid) {
                level.remove(pos);
                found = true;
            }
        }
        if let Some(key) = self.fair_keys.remove(&pid) {
            self.fair.remove(&key);
            found = true;
        }
        if let Some(key) = self.realtime_keys.remove(&pid) {
            self.realtime.remove(&key);
            found = true;
        }
        found
    }

    /// Drop every trace of `pid`, including remembered vruntime.
    pub fn forget(&mut self, pid: Pid) {
        self.remove(pid);
        self.vruntime.remove(&pid);
        self.arrival.remove(&pid);
    }

    pub fn contains(&self, pid: Pid) -> bool {
        self.fair_keys.contains_key(&pid)
            || self.realtime_keys.contains_key(&pid)
            || self.fifo.contains(&pid)
            || self.levels.iter().any(|l| l.contains(&pid))
    }

    pub fn len(&self) -> usize {
        self.fifo.len()
            + self.levels.iter().map(VecDeque::len).sum::<usize>()
            + self.fair.len()
            + self.realtime.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn vruntime(&self, pid: Pid) -> Option<u64> {
        self.vruntime.get(&pid).copied()
    }

    /// Smallest vruntime currently on the fair tree
    pub fn min_vruntime(&self) -> Option<u64> {
        self.fair.keys().next().map(|&(v, _)| v)
    }

    /// Choose the next process to run.
    pub fn select(
        &mut self,
        processes: &BTreeMap<Pid, Process>,
        stats: &BTreeMap<Pid, SchedulerStatistics>,
        quantum_ms: u64,
    ) -> Option<Pid> {
        match self.algorithm {
            Algorithm::RoundRobin => self.rotate_fifo(),
            Algorithm::Priority | Algorithm::MultilevelFeedback => self.select_by_level(),
            Algorithm::ShortestJobFirst => self.select_shortest(stats),
            Algorithm::CompletelyFair => self.select_fair(processes, quantum_ms),
            Algorithm::RealTime => match self.realtime.values().next() {
                Some(&pid) => Some(pid),
                None => self.rotate_fifo(),
            },
        }
    }

    fn rotate_fifo(&mut self) -> Option<Pid> {
        let pid = self.fifo.pop_front()?;
        self.fifo.push_back(pid);
        Some(pid)
    }

    fn select_by_level(&mut self) -> Option<Pid> {
        for priority in Priority::DESCENDING {
            let queue = &mut self.levels[priority.index()];
            if let Some(pid) = queue.pop_front() {
                queue.push_back(pid);
                return Some(pid);
            }
        }
        None
    }

    /// Lowest average burst wins, ties go to the longest waiter. The chosen
    /// pid moves to the tail like a round-robin rotation.
    fn select_shortest(&mut self, stats: &BTreeMap<Pid, SchedulerStatistics>) -> Option<Pid> {
        let pos = self
            .fifo
            .iter()
            .enumerate()
            .filter_map(|(pos, pid)| stats.get(pid).map(|s| (pos, s.average_burst)))
            .min_by_key(|&(_, burst)| burst)
            .map_or(0, |(pos, _)| pos);
        let pid = self.fifo.remove(pos)?;
        self.fifo.push_back(pid);
        Some(pid)
    }

    fn select_fair(&mut self, processes: &BTreeMap<Pid, Process>, quantum_ms: u64) -> Option<Pid> {
        let (&key, &pid) = self.fair.iter().next()?;
        let step = processes
            .get(&pid)
            .map(|p| vruntime_increment(p, quantum_ms))
            .unwrap_or(quantum_ms.max(1));

        self.fair.remove(&key);
        self.insert_fair(pid, key.0 + step);
        Some(pid)
    }

    /// Whether a process of a strictly more urgent class than `running` waits.
    pub fn has_more_urgent(&self, running: Priority) -> bool {
        match self.algorithm {
            Algorithm::Priority | Algorithm::MultilevelFeedback => Priority::DESCENDING
                .iter()
                .take_while(|&&p| p > running)
                .any(|p| !self.levels[p.index()].is_empty()),
            Algorithm::RealTime => running != Priority::Realtime && !self.realtime.is_empty(),
            _ => false,
        }
    }

    /// Move `pid` to the tail of the `to` level.
    pub fn promote(&mut self, pid: Pid, from: Priority, to: Priority) -> bool {
        let queue = &mut self.levels[from.index()];
        match queue.iter().position(|&p| p == pid) {
            Some(pos) => {
                queue.remove(pos);
                self.levels[to.index()].push_back(pid);
                true
            }
            None => false,
        }
    }

    /// Re-file every tracked process under `algorithm`, oldest arrival first.
    pub fn migrate(&mut self, algorithm: Algorithm, processes: &BTreeMap<Pid, Process>) {
        let mut tracked: Vec<Pid> = processes.keys().copied().filter(|&pid| self.contains(pid)).collect();
        tracked.sort_by_key(|pid| self.arrival.get(pid).copied().unwrap_or(u64::MAX));

        for &pid in &tracked {
            self.remove(pid);
        }
        self.algorithm = algorithm;
        for pid in tracked {
            if let Some(process) = processes.get(&pid) {
                self.enqueue(process);
            }
        }
    }
}
