// Run with: cargo run --example host -- [pipe_name]
//
// Creates a pipe and answers every message with "ack: <message>".
// A client sending "exit", "quit" or "q" stops the host, as does Ctrl+C.
use smipc::SPSC::Buffer::RingConfig;
use smipc::{Error, Pipe};
use std::env;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

fn main() -> Result<(), Error> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let name = env::args().nth(1).unwrap_or_else(|| "demo".to_string());
    let mut pipe = Pipe::create(&name, 64 * 1024, RingConfig::default())?;
    println!("Host: created pipe '{}', waiting for a client...", name);

    let running = Arc::new(AtomicBool::new(true));
    let running_for_handler = Arc::clone(&running);
    ctrlc::set_handler(move || {
        running_for_handler.store(false, Ordering::SeqCst);
    })
    .expect("Error setting Ctrl+C handler");

    while running.load(Ordering::SeqCst) {
        let packet = match pipe.read() {
            Ok(packet) => packet,
            Err(Error::EmptyBuffer { .. }) => {
                std::thread::sleep(Duration::from_millis(1));
                continue;
            }
            Err(Error::Disconnected { .. }) => {
                println!("Host: client closed the pipe");
                break;
            }
            Err(e) => return Err(e),
        };

        let text = String::from_utf8_lossy(&packet.payload).into_owned();
        println!("Host: [{}] {}", packet.transfer_id(), text);

        if matches!(text.trim(), "exit" | "quit" | "q") {
            break;
        }

        loop {
            match pipe.write(format!("ack: {}", text)) {
                Ok(_) => break,
                Err(e) if e.is_retryable() => std::thread::sleep(Duration::from_micros(10)),
                Err(e) => return Err(e),
            }
        }
    }

    println!("Host: shutting down");
    Ok(())
}
