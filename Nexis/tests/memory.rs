use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use nexis::{MemoryBlock, MemoryConfig, MemoryManager, NexisError};

fn manager(total_size: u64, page_size: usize) -> MemoryManager {
    MemoryManager::new(MemoryConfig::with_size(total_size, page_size)).unwrap()
}

fn assert_balanced(mm: &MemoryManager) {
    let stats = mm.statistics();
    assert_eq!(stats.used_size + stats.free_size, stats.total_size);
    if let Err(e) = mm.check_consistency() {
        panic!("inconsistent memory state: {}", e);
    }
}

#[test]
fn two_page_store_fills_then_swaps() {
    let mm = manager(8192, 4096);
    let first = mm.allocate(4096).unwrap();
    let second = mm.allocate(4096).unwrap();
    assert_eq!(first.page_count(), 1);
    assert_eq!(second.page_count(), 1);
    assert_ne!(first.start_page(), second.start_page());

    // the least recently touched page goes
    mm.read(second.start_address(), 1).unwrap();
    let third = mm.allocate(1).unwrap();
    assert_eq!(third.start_page(), first.start_page());

    let stats = mm.statistics();
    assert_eq!(stats.total_swap_outs, 1);
    assert_eq!(stats.swapped_pages, 1);
    assert_eq!(stats.used_size, 8192);
    assert_balanced(&mm);
}

#[test]
fn two_page_store_with_pinned_pages_runs_out() {
    let mm = manager(8192, 4096);
    let first = mm.allocate(4096).unwrap();
    let second = mm.allocate(4096).unwrap();
    mm.pin(first.id()).unwrap();
    mm.pin(second.id()).unwrap();

    let err = mm.allocate(1).unwrap_err();
    assert_eq!(err, NexisError::OutOfMemory { requested: 1, pages: 1 });
    assert_eq!(mm.statistics().total_swap_outs, 0);
    assert_balanced(&mm);
}

#[test]
fn non_positive_sizes_are_rejected() {
    let mm = manager(8192, 4096);
    assert!(matches!(mm.allocate(0), Err(NexisError::InvalidArgument(_))));
    assert!(matches!(mm.allocate(-1), Err(NexisError::InvalidArgument(_))));
    assert_eq!(mm.statistics().total_allocations, 0);
}

#[test]
fn accesses_past_the_end_are_rejected() {
    let mm = manager(8192, 4096);
    assert!(matches!(
        mm.read(8191, 2),
        Err(NexisError::Bounds { address: 8191, size: 2, limit: 8192 })
    ));
    assert!(matches!(mm.write(8190, b"abc"), Err(NexisError::Bounds { .. })));
    assert!(matches!(mm.read(u64::MAX, 1), Err(NexisError::Bounds { .. })));
    assert_eq!(mm.read(8191, 1).unwrap(), vec![0]);
    assert!(mm.read(8192, 0).unwrap().is_empty());
}

#[test]
fn write_then_read_round_trips_across_lines() {
    let mm = manager(64 * 1024, 4096);
    let block = mm.allocate(10_000).unwrap();
    let payload: Vec<u8> = (0..5000u32).map(|i| (i % 251) as u8).collect();

    // warm the caches with the old contents first
    mm.read(block.start_address() + 30, 5000).unwrap();
    mm.write(block.start_address() + 30, &payload).unwrap();
    assert_eq!(mm.read(block.start_address() + 30, 5000).unwrap(), payload);

    mm.write(block.start_address() + 100, b"patched").unwrap();
    let back = mm.read(block.start_address() + 30, 5000).unwrap();
    assert_eq!(&back[70..77], b"patched");
    assert_eq!(&back[..70], &payload[..70]);
    assert_eq!(&back[77..], &payload[77..]);
}

#[test]
fn double_free_is_a_noop() {
    let mm = manager(16 * 4096, 4096);
    let block = mm.allocate(3 * 4096).unwrap();
    mm.free(&block);
    let after_first = mm.statistics();
    mm.free(&block);
    let after_second = mm.statistics();

    assert_eq!(after_first, after_second);
    assert_eq!(after_second.total_deallocations, 1);
    assert_eq!(after_second.used_size, 0);
    assert!(mm.block(block.id()).is_none());
}

#[test]
fn cache_hit_rates_reflect_reuse() {
    let mm = manager(64 * 1024, 4096);
    let block = mm.allocate(4096).unwrap();
    for _ in 0..10 {
        mm.read(block.start_address(), 64).unwrap();
    }
    let stats = mm.statistics();
    assert_eq!(stats.l1.misses, 1);
    assert_eq!(stats.l1.hits, 9);
    assert!((stats.l1_hit_rate() - 0.9).abs() < 1e-9);
    assert_eq!(stats.l3.hits, 0);
}

#[test]
fn small_l1_evicts_into_lower_levels() {
    let config = MemoryConfig {
        l1_size: 128,
        l2_size: 1024,
        ..MemoryConfig::with_size(64 * 1024, 4096)
    };
    let mm = MemoryManager::new(config).unwrap();
    for line in 0..4u64 {
        mm.read(line * 64, 1).unwrap();
    }
    mm.read(0, 1).unwrap();

    let stats = mm.statistics();
    assert_eq!(stats.l1.lines, 2);
    assert_eq!(stats.l1.evictions, 3);
    assert_eq!(stats.l2.hits, 1);
}

#[test]
fn random_workload_keeps_accounting_balanced() {
    let mm = manager(64 * 4096, 4096);
    let mut rng = StdRng::seed_from_u64(0x5eed);
    let mut live: Vec<MemoryBlock> = Vec::new();

    for _ in 0..2000 {
        match rng.gen_range(0..10) {
            0..=3 => {
                let size = rng.gen_range(1..6 * 4096);
                match mm.allocate(size) {
                    Ok(block) => live.push(block),
                    Err(e) => assert!(e.is_out_of_memory(), "unexpected {:?}", e),
                }
            }
            4..=5 if !live.is_empty() => {
                let block = live.swap_remove(rng.gen_range(0..live.len()));
                mm.free(&block);
            }
            6 if !live.is_empty() => {
                let block = &live[rng.gen_range(0..live.len())];
                let _ = mm.pin(block.id());
            }
            _ if !live.is_empty() => {
                let block = &live[rng.gen_range(0..live.len())];
                let len = rng.gen_range(1..=block.size().min(256));
                let offset = rng.gen_range(0..=block.size() - len) as u64;
                mm.read(block.start_address() + offset, len).unwrap();
            }
            _ => {}
        }
        assert_balanced(&mm);
    }

    for block in live.drain(..) {
        mm.free(&block);
    }
    let stats = mm.statistics();
    assert_eq!(stats.used_size, 0);
    assert_eq!(stats.live_blocks, 0);
    assert_eq!(stats.swapped_pages, 0);
    assert_balanced(&mm);
}

#[test]
fn concurrent_readers_see_written_data() {
    use std::sync::Arc;
    use std::thread;

    let mm = Arc::new(manager(64 * 1024, 4096));
    let block = mm.allocate(8192).unwrap();
    mm.write(block.start_address(), &[7u8; 8192]).unwrap();

    let handles: Vec<_> = (0..4)
        .map(|i| {
            let mm = Arc::clone(&mm);
            let base = block.start_address();
            thread::spawn(move || {
                for j in 0..200u64 {
                    let offset = (i * 997 + j * 31) % 8000;
                    assert_eq!(mm.read(base + offset, 64).unwrap(), vec![7u8; 64]);
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }
    assert_balanced(&mm);
}
