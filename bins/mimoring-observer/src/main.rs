//! Demo observer worker: non-consuming sampling loop, reporting the most
//! recently observed `counter` once a second. Stands in for the
//! out-of-scope oscilloscope/histogram UI collaborators — just enough to
//! exercise `get_observe_token` against a live buffer.

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

    info!(name = %config.name, path = %shm_path, "mimoring-observer: attaching to buffer");
    let buffer = Buffer::open(&shm_path, config)?;

    let mut last_report = Instant::now();
    let mut last_counter = 0u64;
    let mut misses: u64 = 0;

    loop {
        match buffer.get_observe_token() {
            Some(session) => last_counter = session.metadata().counter,
            None => misses += 1,
        }

        if last_report.elapsed() >= Duration::from_secs(1) {
            info!(last_counter, misses, "mimoring-observer: sample");
            misses = 0;
            last_report = Instant::now();
        }

        std::thread::sleep(Duration::from_millis(5));
    }
}
