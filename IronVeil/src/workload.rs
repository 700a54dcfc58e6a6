// workload.rs
//
// Random process mixes for exercising a booted machine.

use log::warn;
use rand::Rng;

use nexis::process::{NICE_MAX, NICE_MIN};
use nexis::{Kernel, NexisError, Pid, Priority};

const NAMES: &[&str] = &[
    "nginx", "postgres", "redis", "rustc", "cc1", "ffmpeg", "python3", "node", "make", "backupd",
];

const OWNERS: &[&str] = &["root", "alice", "bob", "www-data"];

/// Outcome of one `spawn_random` call
#[derive(Debug, Default)]
pub struct Workload {
    pub spawned: Vec<Pid>,
    pub failed: Vec<NexisError>,
}

fn random_priority(rng: &mut impl Rng) -> Priority {
    match rng.gen_range(0..20) {
        0 => Priority::Realtime,
        1..=4 => Priority::High,
        5..=13 => Priority::Normal,
        14..=17 => Priority::Low,
        _ => Priority::Idle,
    }
}

/// Create `count` processes with random names, classes and niceness.
pub fn spawn_random(kernel: &Kernel, rng: &mut impl Rng, count: usize) -> Workload {
    let mut workload = Workload::default();
    for _ in 0..count {
        let name = NAMES[rng.gen_range(0..NAMES.len())];
        let owner = OWNERS[rng.gen_range(0..OWNERS.len())];
        let priority = random_priority(rng);
        let nice = rng.gen_range(NICE_MIN..=NICE_MAX);

        match kernel.create_process(name, owner, priority, nice) {
            Ok(pid) => workload.spawned.push(pid),
            Err(e) => {
                warn!("Workload process {} not created: {}", name, e);
                workload.failed.push(e);
            }
        }
    }
    workload
}

/// Block or wake a random tracked process, the way I/O would.
pub fn stir(kernel: &Kernel, rng: &mut impl Rng) {
    let scheduler = kernel.scheduler();
    if rng.gen_bool(0.5) {
        if let Some(pid) = scheduler.current().filter(|&pid| pid != 1) {
            let _ = scheduler.block_process(pid);
        }
    } else {
        let blocked: Vec<Pid> = scheduler
            .processes()
            .iter()
            .filter(|p| p.state() == nexis::ProcState::Blocked)
            .map(|p| p.pid())
            .collect();
        if !blocked.is_empty() {
            let _ = scheduler.unblock_process(blocked[rng.gen_range(0..blocked.len())]);
        }
    }
}
