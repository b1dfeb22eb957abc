//! Demo reader worker: attaches to an already-created buffer and drains
//! `filled`, reporting throughput once a second until a flush sentinel
//! ends the session.

use mimoring_buffer::{Buffer, BufferConfig};
use mimoring_config::BufferSpec;
use std::time::{Duration, Instant};
use tracing::info;
use tracing_subscriber::EnvFilter;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("INFO")))
        .init();

    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "/tmp/mimoring.toml".to_string());
    let spec = BufferSpec::load(config_path)?;
    let shm_path = spec.shm_path();
    let config = BufferConfig::from_spec(&spec)?;

    info!(name = %config.name, path = %shm_path, "mimoring-reader: attaching to buffer");
    let buffer = Buffer::open(&shm_path, config)?;

    let mut last_report = Instant::now();
    let mut count: u64 = 0;

    loop {
        let Some(session) = buffer.get_read_token() else {
            info!(total = count, "mimoring-reader: flush received, exiting");
            break;
        };
        let counter = session.metadata().counter;
        drop(session);
        count += 1;

        if last_report.elapsed() >= Duration::from_secs(1) {
            let stats = buffer.get_stats();
            info!(
                rate_ev_s = count,
                last_counter = counter,
                overwrite_count = stats.overwrite_count,
                "mimoring-reader: throughput"
            );
            count = 0;
            last_report = Instant::now();
        }
    }

    Ok(())
}
