//! Shared error type and buffer-level statistics snapshot.

use std::io;

use mimoring_config::ConfigError;
use thiserror::Error;

/// Everything that can go wrong opening, constructing, or operating a
/// buffer. Every fallible entry point in `mimoring-buffer` returns this.
#[derive(Debug, Error)]
pub enum BufferError {
    #[error("buffer invariant violated: {0}")]
    InvariantViolation(String),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("shared memory error")]
    SharedMemory(#[from] io::Error),

    #[error("dtype error: {0}")]
    Dtype(#[from] mimoring_dtype::DtypeError),

    #[error("buffer capacity mismatch: region declares {found} slots, caller expected {expected}")]
    CapacityMismatch { expected: usize, found: usize },

    #[error(
        "overwrite policy mismatch: buffer was created with overwrite={created}, caller opened with overwrite={requested}"
    )]
    OverwriteMismatch { created: bool, requested: bool },

    #[error("shared memory region is not a valid mimoring buffer (bad magic or version)")]
    BadHeader,
}

/// A best-effort, point-in-time snapshot of a buffer's counters (spec
/// §4.7: `get_stats()`). Fields are read independently with relaxed
/// atomics, so they are not a consistent multi-field transaction — only
/// individually monotonic.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct StatsRecord {
    pub event_count: u64,
    pub overwrite_count: u64,
    pub flush_received: bool,
    pub empty_queue_len: u64,
    pub filled_queue_len: u64,
}

/// Abort a process after logging a fatal, unrecoverable error. Used for
/// conditions that indicate shared-memory corruption rather than ordinary
/// operational failure — continuing would only make the corruption worse
/// for every other process attached to the same region.
#[macro_export]
macro_rules! fatal {
    ($($arg:tt)*) => {{
        tracing::error!($($arg)*);
        std::process::abort();
    }};
}
