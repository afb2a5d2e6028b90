// Run with: cargo run --example client -- [pipe_name]
//
// Opens a pipe created by the host demo and sends each stdin line.
use smipc::{Error, Pipe};
use std::env;
use std::io::{self, BufRead};
use std::time::{Duration, Instant};
use tracing_subscriber::EnvFilter;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let name = env::args().nth(1).unwrap_or_else(|| "demo".to_string());
    let mut pipe = Pipe::open(&name)?;
    println!("Client: connected to '{}'. Type a message, or 'exit' to stop.", name);

    for line in io::stdin().lock().lines() {
        let line = line?;
        if line.is_empty() {
            continue;
        }

        let id = loop {
            match pipe.write(&line) {
                Ok(id) => break id,
                Err(e) if e.is_retryable() => std::thread::sleep(Duration::from_micros(10)),
                Err(e) => return Err(e.into()),
            }
        };

        if matches!(line.trim(), "exit" | "quit" | "q") {
            break;
        }

        // Wait up to a second for the host's answer.
        let deadline = Instant::now() + Duration::from_secs(1);
        loop {
            match pipe.read() {
                Ok(reply) => {
                    println!("Client: [{}] {}", id, String::from_utf8_lossy(&reply.payload));
                    break;
                }
                Err(Error::EmptyBuffer { .. }) if Instant::now() < deadline => {
                    std::thread::sleep(Duration::from_millis(1));
                }
                Err(Error::EmptyBuffer { .. }) => {
                    println!("Client: no reply for message {}", id);
                    break;
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    Ok(())
}
