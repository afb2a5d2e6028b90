// Run with: cargo run --release --example throughput -- <num_messages> [fine|spin]
//
// Pushes SHA-256 digests through an in-process ring from one thread and
// verifies them in another.
use sha2::{Digest, Sha256};
use smipc::SPSC::Buffer::{BufferLockKind, LockGranularity};
use smipc::{ChannelBuilder, Error};
use std::env;
use std::thread;
use std::time::Instant;
use tracing_subscriber::EnvFilter;

fn digest(i: usize) -> String {
    let mut hasher = Sha256::new();
    hasher.update(format!("message_{}", i).as_bytes());
    format!("{:x}", hasher.finalize())
}

fn main() -> Result<(), Error> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let args: Vec<String> = env::args().collect();
    if args.len() < 2 {
        eprintln!("Usage: {} <num_messages> [fine|spin]", args[0]);
        std::process::exit(1);
    }
    let num_messages: usize = args[1].parse().expect("Invalid number of messages");

    let mut builder = ChannelBuilder::new().with_region_size(1024 * 1024);
    for flag in &args[2..] {
        builder = match flag.as_str() {
            "fine" => builder.with_granularity(LockGranularity::Fine),
            "spin" => builder.with_buffer_lock(BufferLockKind::Spin),
            other => {
                eprintln!("Unknown option {}", other);
                std::process::exit(1);
            }
        };
    }
    let (mut tx, mut rx) = builder.build_in_process()?;
    println!("Throughput: ring config {:?}", tx.ring().config());

    let start = Instant::now();

    let producer = thread::spawn(move || -> Result<(), Error> {
        for i in 0..num_messages {
            let message = format!("{}:{}", i, digest(i));
            loop {
                match tx.send(&message) {
                    Ok(_) => break,
                    Err(Error::Overflow { .. }) => std::hint::spin_loop(),
                    Err(e) => return Err(e),
                }
            }
        }
        Ok(())
    });

    let mut verified = 0usize;
    let mut mismatched = 0usize;
    while verified + mismatched < num_messages {
        let Some(packet) = rx.pull()? else {
            std::hint::spin_loop();
            continue;
        };
        let text = String::from_utf8_lossy(&packet.payload);
        let ok = text
            .split_once(':')
            .and_then(|(i, hash)| Some(digest(i.parse().ok()?) == hash))
            .unwrap_or(false);
        if ok {
            verified += 1;
        } else {
            mismatched += 1;
        }
    }

    producer.join().expect("producer thread panicked")?;
    let elapsed = start.elapsed();

    println!(
        "Throughput: {} verified, {} mismatched in {:.2?} ({:.0} msg/s)",
        verified,
        mismatched,
        elapsed,
        num_messages as f64 / elapsed.as_secs_f64()
    );
    Ok(())
}
