// Concurrent producer/consumer stress tests on in-process rings.
// Run with: cargo test --test spsc -- --nocapture

use std::sync::Arc;
use std::thread;

use smipc::Core::align::Alignment;
use smipc::SPSC::Buffer::{BufferLockKind, LockGranularity, RingConfig};
use smipc::SPSC::{ChannelBuilder, SharedProducer};
use smipc::Error;

const MESSAGES: u32 = 20_000;

/// Deterministic payload for message `seq`: length and bytes both derive
/// from a per-message rng seed, so the consumer can rebuild it.
fn payload(seq: u32) -> Vec<u8> {
    let mut rng = fastrand::Rng::with_seed(seq as u64);
    let len = rng.usize(1..=300);
    let mut bytes = vec![0u8; len];
    rng.fill(&mut bytes);
    bytes[..4.min(len)].copy_from_slice(&seq.to_ne_bytes()[..4.min(len)]);
    bytes
}

fn stress(config: RingConfig, region_size: usize) {
    let (mut tx, mut rx) = ChannelBuilder::new()
        .with_region_size(region_size)
        .with_config(config)
        .build_in_process()
        .unwrap();

    let producer = thread::spawn(move || {
        let mut overflows = 0u64;
        for seq in 0..MESSAGES {
            let packet = tx.packet(payload(seq));
            loop {
                match tx.push(&packet) {
                    Ok(()) => break,
                    Err(Error::Overflow { .. }) => {
                        overflows += 1;
                        thread::yield_now();
                    }
                    Err(e) => panic!("push failed: {}", e),
                }
            }
        }
        overflows
    });

    let consumer = thread::spawn(move || {
        let mut seq = 0u32;
        let mut last_id = 0u32;
        while seq < MESSAGES {
            match rx.pull().unwrap() {
                Some(packet) => {
                    assert_eq!(packet.payload, payload(seq), "message {} corrupted", seq);
                    assert!(packet.transfer_id() > last_id);
                    last_id = packet.transfer_id();
                    seq += 1;
                }
                None => thread::yield_now(),
            }
        }
        assert!(rx.is_empty());
        rx.state()
    });

    let overflows = producer.join().unwrap();
    let state = consumer.join().unwrap();
    println!("{:?}: {} messages, {} overflows", config, MESSAGES, overflows);

    assert_eq!(state.message_count, 0);
    assert_eq!((state.read_offset, state.write_offset), (0, 0));
}

#[test]
fn test_stress_two_party_coarse() {
    stress(RingConfig::default(), 4096);
}

#[test]
fn test_stress_spin_coarse() {
    stress(
        RingConfig {
            buffer_lock: BufferLockKind::Spin,
            ..RingConfig::default()
        },
        4096,
    );
}

#[test]
fn test_stress_two_party_fine() {
    stress(
        RingConfig {
            granularity: LockGranularity::Fine,
            ..RingConfig::default()
        },
        4096,
    );
}

#[test]
fn test_stress_spin_fine_wide_alignment() {
    stress(
        RingConfig::new(
            Alignment::new(64).unwrap(),
            LockGranularity::Fine,
            BufferLockKind::Spin,
        ),
        8192,
    );
}

#[test]
fn test_shared_producer_keeps_per_writer_order() {
    let (tx, mut rx) = ChannelBuilder::new()
        .with_region_size(16 * 1024)
        .build_in_process()
        .unwrap();
    let tx = Arc::new(SharedProducer::new(tx));
    let per_writer = 5_000u32;

    let writers: Vec<_> = (0..2u32)
        .map(|writer| {
            let tx = Arc::clone(&tx);
            thread::spawn(move || {
                for seq in 0..per_writer {
                    let mut message = writer.to_ne_bytes().to_vec();
                    message.extend_from_slice(&seq.to_ne_bytes());
                    while let Err(e) = tx.send(&message) {
                        assert!(e.is_retryable(), "{}", e);
                        thread::yield_now();
                    }
                }
            })
        })
        .collect();

    let mut next = [0u32; 2];
    while next.iter().sum::<u32>() < 2 * per_writer {
        let Some(packet) = rx.pull().unwrap() else {
            thread::yield_now();
            continue;
        };
        let writer = u32::from_ne_bytes(packet.payload[..4].try_into().unwrap()) as usize;
        let seq = u32::from_ne_bytes(packet.payload[4..8].try_into().unwrap());
        assert_eq!(seq, next[writer]);
        next[writer] += 1;
    }

    for writer in writers {
        writer.join().unwrap();
    }
    assert!(rx.is_empty());
}
