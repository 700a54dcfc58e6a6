use std::collections::BTreeSet;
use std::sync::Arc;
use std::thread;

use nexis::{Algorithm, Pid, Priority, ProcState, Process, Scheduler, SchedulerConfig};

fn scheduler(algorithm: Algorithm) -> Scheduler {
    Scheduler::new(SchedulerConfig {
        algorithm,
        tick_ms: 10,
        quantum_ms: 100,
        aging_threshold_ms: 1000,
    })
}

fn running_count(sched: &Scheduler) -> usize {
    sched
        .processes()
        .iter()
        .filter(|p| p.state() == ProcState::Running)
        .count()
}

/// Distinct consecutive owners of the CPU over `ticks` ticks.
fn dispatch_order(sched: &Scheduler, ticks: usize) -> Vec<Pid> {
    let mut order: Vec<Pid> = Vec::new();
    for _ in 0..ticks {
        sched.tick();
        assert!(running_count(sched) <= 1);
        if let Some(pid) = sched.current() {
            if order.last() != Some(&pid) {
                order.push(pid);
            }
        }
    }
    order
}

#[test]
fn round_robin_rotates_in_arrival_order() {
    let sched = scheduler(Algorithm::RoundRobin);
    for pid in 1..=3 {
        sched.add_process(Process::new(pid, format!("P{}", pid))).unwrap();
    }

    let order = dispatch_order(&sched, 70);
    assert_eq!(order, vec![1, 2, 3, 1, 2, 3, 1]);
    assert_eq!(sched.summary().context_switches, 7);
}

#[test]
fn priority_always_runs_the_higher_class() {
    let sched = scheduler(Algorithm::Priority);
    sched
        .add_process(Process::new(1, "low").with_priority(Priority::Low))
        .unwrap();
    sched
        .add_process(Process::new(2, "high").with_priority(Priority::High))
        .unwrap();

    for _ in 0..50 {
        sched.tick();
        assert_eq!(sched.current(), Some(2));
    }
    let stats = sched.statistics();
    assert_eq!(stats[&1].total_cpu_time, 0);
    assert_eq!(stats[&1].waiting_time, 500);
    assert_eq!(stats[&2].total_cpu_time, 500);
}

#[test]
fn priority_falls_back_when_high_class_blocks() {
    let sched = scheduler(Algorithm::Priority);
    sched
        .add_process(Process::new(1, "low").with_priority(Priority::Low))
        .unwrap();
    sched
        .add_process(Process::new(2, "high").with_priority(Priority::High))
        .unwrap();

    sched.tick();
    sched.block_process(2).unwrap();
    sched.tick();
    assert_eq!(sched.current(), Some(1));

    sched.unblock_process(2).unwrap();
    sched.tick();
    assert_eq!(sched.current(), Some(2));
    assert_eq!(sched.process(1).map(|p| p.state()), Some(ProcState::Ready));
}

#[test]
fn fair_selection_never_skips_a_lower_vruntime() {
    let sched = scheduler(Algorithm::CompletelyFair);
    let setup = [
        (1, Priority::Normal, 0),
        (2, Priority::Normal, 10),
        (3, Priority::Low, -5),
        (4, Priority::High, 19),
    ];
    for (pid, priority, nice) in setup {
        sched
            .add_process(Process::new(pid, format!("p{}", pid)).with_priority(priority).with_nice(nice))
            .unwrap();
    }

    let mut chosen = Vec::new();
    for _ in 0..400 {
        let before: Vec<(Pid, u64)> = (1..=4)
            .filter_map(|pid| sched.vruntime(pid).map(|v| (pid, v)))
            .collect();
        let dispatches = sched.summary().dispatches;
        sched.tick();
        if sched.summary().dispatches == dispatches {
            continue;
        }

        let pid = sched.current().unwrap();
        let picked = before.iter().find(|(p, _)| *p == pid).map(|&(_, v)| v).unwrap();
        let lowest = before.iter().map(|&(_, v)| v).min().unwrap();
        assert_eq!(picked, lowest, "pid {} picked above the minimum", pid);
        chosen.push(picked);
    }

    assert!(chosen.len() > 30);
    assert!(chosen.windows(2).all(|w| w[0] <= w[1]));

    // higher niceness means smaller steps, so more CPU
    let stats = sched.statistics();
    assert!(stats[&2].total_cpu_time > stats[&1].total_cpu_time);
}

#[test]
fn fair_newcomer_does_not_starve_others() {
    let sched = scheduler(Algorithm::CompletelyFair);
    sched.add_process(Process::new(1, "old")).unwrap();
    for _ in 0..100 {
        sched.tick();
    }
    let floor = sched.vruntime(1).unwrap();
    sched.add_process(Process::new(2, "new")).unwrap();
    assert!(sched.vruntime(2).unwrap() >= floor);

    let order = dispatch_order(&sched, 60);
    assert!(order.contains(&1));
    assert!(order.contains(&2));
}

#[test]
fn shortest_job_prefers_short_bursts() {
    let sched = scheduler(Algorithm::ShortestJobFirst);
    sched.add_process(Process::new(1, "long")).unwrap();
    sched.add_process(Process::new(2, "short")).unwrap();

    // give pid 1 a full quantum burst, pid 2 a short one
    for _ in 0..10 {
        sched.tick();
    }
    assert_eq!(sched.current(), Some(1));
    sched.tick();
    assert_eq!(sched.current(), Some(2));
    sched.tick();
    sched.block_process(2).unwrap();
    sched.unblock_process(2).unwrap();

    sched.tick();
    assert_eq!(sched.current(), Some(2));
}

#[test]
fn shortest_job_alternates_equal_bursts() {
    let sched = scheduler(Algorithm::ShortestJobFirst);
    sched.add_process(Process::new(1, "cpu-a")).unwrap();
    sched.add_process(Process::new(2, "cpu-b")).unwrap();

    let order = dispatch_order(&sched, 200);
    assert_eq!(order.len(), 20);
    for pair in order.windows(2) {
        assert_ne!(pair[0], pair[1]);
    }

    let stats = sched.statistics();
    assert_eq!(stats[&1].total_cpu_time, 1000);
    assert_eq!(stats[&2].total_cpu_time, 1000);
    assert_eq!(stats[&1].average_burst, stats[&2].average_burst);
}

#[test]
fn multilevel_feedback_ages_starved_processes() {
    let sched = scheduler(Algorithm::MultilevelFeedback);
    sched
        .add_process(Process::new(1, "busy").with_priority(Priority::High))
        .unwrap();
    sched
        .add_process(Process::new(2, "starved").with_priority(Priority::Low))
        .unwrap();

    // aging runs before accounting, so the 1000 ms threshold is crossed on tick 102
    for _ in 0..101 {
        sched.tick();
    }
    assert_eq!(sched.process(2).unwrap().priority, Priority::Low);
    sched.tick();
    assert_eq!(sched.process(2).unwrap().priority, Priority::Normal);
    assert_eq!(sched.statistics()[&2].waiting_time, 1020);
    assert_eq!(sched.statistics()[&2].aging_time, 10);

    for _ in 0..300 {
        sched.tick();
    }
    // caps at High, never promoted into Realtime
    assert_eq!(sched.process(2).unwrap().priority, Priority::High);
    assert!(sched.statistics()[&2].total_cpu_time > 0);
}

#[test]
fn realtime_queue_takes_precedence() {
    let sched = scheduler(Algorithm::RealTime);
    sched.add_process(Process::new(1, "normal")).unwrap();
    sched.tick();
    assert_eq!(sched.current(), Some(1));

    sched
        .add_process(Process::new(2, "rt").with_priority(Priority::Realtime).with_nice(5))
        .unwrap();
    sched
        .add_process(Process::new(3, "rt-urgent").with_priority(Priority::Realtime).with_nice(-5))
        .unwrap();
    sched.tick();
    assert_eq!(sched.current(), Some(3));
    assert_eq!(sched.process(1).unwrap().state(), ProcState::Ready);
}

#[test]
fn switching_algorithm_keeps_every_process() {
    let sched = scheduler(Algorithm::RoundRobin);
    for pid in 1..=4 {
        sched.add_process(Process::new(pid, format!("p{}", pid))).unwrap();
    }
    sched.tick();
    sched.block_process(1).unwrap();

    sched.set_algorithm(Algorithm::CompletelyFair).unwrap();
    assert_eq!(sched.algorithm(), Algorithm::CompletelyFair);
    assert!(sched.vruntime(2).is_some());

    sched.unblock_process(1).unwrap();
    let order = dispatch_order(&sched, 80);
    for pid in 1..=4 {
        assert!(order.contains(&pid), "pid {} never ran", pid);
    }
}

#[test]
fn remove_twice_does_not_double_count() {
    let sched = scheduler(Algorithm::RoundRobin);
    sched.add_process(Process::new(1, "a")).unwrap();
    sched.add_process(Process::new(2, "b")).unwrap();
    sched.tick();

    let removed = sched.remove_process(1).unwrap();
    assert_eq!(removed.state(), ProcState::Zombie);
    assert!(sched.remove_process(1).is_none());
    assert_eq!(sched.processes().len(), 1);
    assert!(sched.statistics().get(&1).is_none());

    sched.tick();
    assert_eq!(sched.current(), Some(2));
}

#[test]
fn concurrent_mutators_and_ticker_keep_tables_consistent() {
    let sched = Arc::new(scheduler(Algorithm::CompletelyFair));

    let ticker = {
        let sched = Arc::clone(&sched);
        thread::spawn(move || {
            for _ in 0..2000 {
                sched.tick();
                assert!(running_count(&sched) <= 1);
            }
        })
    };

    let mutators: Vec<_> = (0..4u32)
        .map(|t| {
            let sched = Arc::clone(&sched);
            thread::spawn(move || {
                let base = 1 + t * 100;
                for i in 0..50 {
                    let pid = base + i;
                    sched.add_process(Process::new(pid, format!("w{}", pid))).unwrap();
                    if let Some(current) = sched.current() {
                        // may lose the race with the ticker
                        let _ = sched.block_process(current);
                    }
                    if i % 3 == 0 {
                        let _ = sched.unblock_process(base + i / 2);
                    }
                    if i % 2 == 1 {
                        assert!(sched.remove_process(pid - 1).is_some());
                    }
                    assert!(running_count(&sched) <= 1);
                }
            })
        })
        .collect();

    for handle in mutators {
        handle.join().unwrap();
    }
    ticker.join().unwrap();

    let processes = sched.processes();
    assert_eq!(processes.len(), 4 * 25);
    let tracked: BTreeSet<Pid> = processes.iter().map(|p| p.pid()).collect();
    let with_stats: BTreeSet<Pid> = sched.statistics().keys().copied().collect();
    assert_eq!(tracked, with_stats);

    let running: Vec<Pid> = processes
        .iter()
        .filter(|p| p.state() == ProcState::Running)
        .map(|p| p.pid())
        .collect();
    assert!(running.len() <= 1);
    let summary = sched.summary();
    assert_eq!(summary.running, running.first().copied());
    assert_eq!(
        summary.blocked,
        processes.iter().filter(|p| p.state() == ProcState::Blocked).count()
    );
    assert_eq!(
        summary.ready,
        processes.iter().filter(|p| p.state() == ProcState::Ready).count()
    );
}
