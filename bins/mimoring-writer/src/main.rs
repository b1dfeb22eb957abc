//! Demo writer worker: opens (creating if absent) the buffer named in its
//! config file and publishes an incrementing `value` field once per tick
//! until killed. Exists to exercise `mimoring-buffer` end-to-end; the YAML
//! setup loader and worker templates that would normally drive this are
//! out of scope.

use mimoring_buffer::{Buffer, BufferConfig};
use mimoring_config::BufferSpec;
use std::time::Duration;
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

    info!(name = %config.name, path = %shm_path, "mimoring-writer: creating buffer");
    let buffer = Buffer::create(&shm_path, config)?;

    let field = spec
        .fields
        .first()
        .map(|f| f.name.clone())
        .expect("buffer spec declares at least one field");

    let mut tick: f32 = 0.0;
    loop {
        let Some(mut session) = buffer.get_write_token() else {
            info!("mimoring-writer: shutdown observed, exiting");
            break;
        };
        session.data_mut().set::<f32>(0, &field, tick);
        tick += 1.0;
        drop(session);

        std::thread::sleep(Duration::from_millis(10));
    }

    Ok(())
}
