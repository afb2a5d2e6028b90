// Allocation tracking tests for push/pop
//
// Note: Tests using dhat are marked with #[serial_test::serial] because
// dhat only allows one profiler to run at a time. They will run sequentially.
//
// # Run all allocation tracking tests
// cargo test --test allocation_tracking -- --nocapture

use smipc::SPSC::{ChannelBuilder, Consumer, Producer};

#[global_allocator]
static ALLOC: dhat::Alloc = dhat::Alloc;

fn channel() -> (Producer, Consumer) {
    ChannelBuilder::new()
        .with_region_size(64 * 1024)
        .build_in_process()
        .unwrap()
}

#[test]
#[serial_test::serial]
fn test_push_does_not_allocate() {
    let (mut tx, mut rx) = channel();
    let packets: Vec<_> = (0..100u8).map(|i| tx.packet(vec![i; 64])).collect();

    // Warm up so one-time setup (log callsite registration) is not counted.
    tx.push(&packets[0]).unwrap();
    rx.pop().unwrap();

    let _dhat = dhat::Profiler::builder().testing().build();
    let before = dhat::HeapStats::get();

    for packet in &packets {
        tx.push(packet).unwrap();
    }
    let _ = tx.state();
    let _ = tx.is_full();

    let after = dhat::HeapStats::get();
    println!("push: {} blocks before, {} after", before.total_blocks, after.total_blocks);
    assert_eq!(after.total_blocks, before.total_blocks);

    drop(_dhat);
    while rx.pull().unwrap().is_some() {}
}

#[test]
#[serial_test::serial]
fn test_pop_allocates_one_buffer_per_message() {
    let (mut tx, mut rx) = channel();
    tx.send(b"warm up").unwrap();
    rx.pop().unwrap();
    for i in 0..100u8 {
        tx.send(vec![i; 1 + i as usize]).unwrap();
    }

    let _dhat = dhat::Profiler::builder().testing().build();
    let before = dhat::HeapStats::get();

    let mut received = 0u64;
    for i in 0..100u8 {
        let packet = rx.pop().unwrap();
        assert_eq!(packet.len(), 1 + i as usize);
        received += packet.len() as u64;
    }

    let after = dhat::HeapStats::get();
    println!(
        "pop: {} blocks / {} bytes allocated for {} payload bytes",
        after.total_blocks - before.total_blocks,
        after.total_bytes - before.total_bytes,
        received
    );
    assert_eq!(after.total_blocks - before.total_blocks, 100);
    assert_eq!(after.total_bytes - before.total_bytes, received);
}

#[test]
#[serial_test::serial]
fn test_steady_state_memory_with_memory_stats() {
    println!("\n--- Running steady state push/pop with memory_stats ---");
    use memory_stats::memory_stats;

    let (mut tx, mut rx) = channel();
    let before = memory_stats();

    for i in 0..100_000u32 {
        tx.send(i.to_ne_bytes()).unwrap();
        let packet = rx.pop().unwrap();
        assert_eq!(packet.payload, i.to_ne_bytes());
    }

    let after = memory_stats();
    if let (Some(before), Some(after)) = (before, after) {
        let growth = after.physical_mem.saturating_sub(before.physical_mem);
        println!("  Physical memory growth: {} bytes", growth);
        // Messages are freed as they are consumed; nothing accumulates.
        assert!(growth < 16 * 1024 * 1024);
    } else {
        println!("  memory_stats unavailable on this platform");
    }
}
