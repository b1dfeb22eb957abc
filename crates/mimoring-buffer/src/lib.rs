//! A MIMO shared-memory ring buffer: a bounded pool of fixed-size slots,
//! checked in and out through two cross-process token queues, attached by
//! independent OS processes under named writer/reader/observer roles.
//!
//! Layout and protocol are described in [`layout`]; the three scoped
//! session types live in [`session`]. `Buffer` itself binds a memory
//! mapping, the two queues, and the shared counters, and is the only type
//! most callers construct directly.

mod layout;
mod session;

pub use session::{ObserveSession, ReadSession, WriteSession};

use std::path::Path;
use std::sync::atomic::Ordering;
use std::sync::Mutex;
use std::time::{Instant, SystemTime, UNIX_EPOCH};

use mimoring_config::BufferSpec;
use mimoring_core::{fatal, BufferError, StatsRecord};
use mimoring_dtype::{DataView, DataViewMut, Metadata, StructuredDtype};
use mimoring_mmap::MmapFileMut;
use mimoring_perf_recorder::{PerfRecorder, PerfStage};
use mimoring_queue::{TokenQueue, FLUSH};

use layout::{BufferHeader, Layout, MAGIC, VERSION};

thread_local! {
    /// Per-OS-thread stage timings for the session acquire/release hot
    /// path. A no-op when built without the `record` feature.
    static PERF: std::cell::RefCell<PerfRecorder> = std::cell::RefCell::new(PerfRecorder::new());
}

/// Read this thread's recorded stage samples, e.g. to print or export a
/// profile from a binary that enables the `record` feature.
pub fn with_perf_recorder<R>(f: impl FnOnce(&PerfRecorder) -> R) -> R {
    PERF.with(|cell| f(&cell.borrow()))
}

/// Construction parameters for a buffer (spec §6).
#[derive(Clone, Debug)]
pub struct BufferConfig {
    pub name: String,
    pub slot_count: usize,
    pub data_length: usize,
    pub dtype: StructuredDtype,
    pub overwrite: bool,
}

impl BufferConfig {
    pub fn from_spec(spec: &BufferSpec) -> Result<Self, BufferError> {
        Ok(Self {
            name: spec.name.clone(),
            slot_count: spec.slot_count,
            data_length: spec.data_length,
            dtype: spec.dtype()?,
            overwrite: spec.overwrite,
        })
    }
}

struct RateState {
    last_instant: Instant,
    last_event_count: u64,
}

pub struct Buffer {
    config: BufferConfig,
    mmap: MmapFileMut,
    layout: Layout,
    empty: TokenQueue,
    filled: TokenQueue,
    rate: Mutex<RateState>,
}

// Safety: the header, queues, and slot bytes are all accessed through
// atomics or through the token protocol's mutual exclusion, by design —
// this is the point of the crate.
unsafe impl Send for Buffer {}
unsafe impl Sync for Buffer {}

impl Buffer {
    /// Create a brand-new buffer, sizing and zero-initializing its backing
    /// file at `path`. `empty` starts holding every index `0..slot_count`;
    /// `filled` starts empty (spec §3: "Lifecycle").
    pub fn create(path: impl AsRef<Path>, config: BufferConfig) -> Result<Self, BufferError> {
        if config.slot_count == 0 {
            return Err(BufferError::InvariantViolation("slot_count must be > 0".into()));
        }
        if config.data_length == 0 {
            return Err(BufferError::InvariantViolation("data_length must be > 0".into()));
        }

        let record_size = config.dtype.record_size();
        let layout = Layout::new(config.slot_count, config.data_length, record_size);

        let mut mmap = MmapFileMut::create_rw(path, layout.total_bytes as u64)?;
        let base = mmap.as_mut_ptr();

        unsafe {
            std::ptr::write(
                base as *mut BufferHeader,
                BufferHeader {
                    magic: MAGIC,
                    version: VERSION,
                    slot_count: config.slot_count as u64,
                    data_length: config.data_length as u64,
                    record_size: record_size as u64,
                    slot_bytes: layout.slot_bytes as u64,
                    queue_capacity: layout.queue_capacity as u64,
                    overwrite: std::sync::atomic::AtomicU64::new(config.overwrite as u64),
                    event_count: std::sync::atomic::AtomicU64::new(0),
                    overwrite_count: std::sync::atomic::AtomicU64::new(0),
                    flush_received: std::sync::atomic::AtomicU64::new(0),
                    shutdown: std::sync::atomic::AtomicU64::new(0),
                },
            );
        }

        let empty = unsafe {
            TokenQueue::init_at(base.add(layout.empty_queue_offset), layout.queue_capacity)
        };
        let filled = unsafe {
            TokenQueue::init_at(base.add(layout.filled_queue_offset), layout.queue_capacity)
        };
        for index in 0..config.slot_count as u64 {
            let ok = empty.put(index);
            debug_assert!(ok, "empty queue undersized at construction");
        }

        tracing::info!(
            name = %config.name,
            slot_count = config.slot_count,
            slot_bytes = layout.slot_bytes,
            overwrite = config.overwrite,
            "buffer created"
        );

        Ok(Self {
            config,
            mmap,
            layout,
            empty,
            filled,
            rate: Mutex::new(RateState {
                last_instant: Instant::now(),
                last_event_count: 0,
            }),
        })
    }

    /// Attach to a buffer previously created at `path` by some process
    /// (possibly this one). Validates the shared header against `config`
    /// before trusting the region.
    pub fn open(path: impl AsRef<Path>, config: BufferConfig) -> Result<Self, BufferError> {
        if config.slot_count == 0 || config.data_length == 0 {
            return Err(BufferError::InvariantViolation(
                "slot_count and data_length must be > 0".into(),
            ));
        }
        let record_size = config.dtype.record_size();
        let layout = Layout::new(config.slot_count, config.data_length, record_size);

        let mut mmap = MmapFileMut::open_rw(path)?;
        if mmap.len() < layout.total_bytes {
            return Err(BufferError::CapacityMismatch {
                expected: layout.total_bytes,
                found: mmap.len(),
            });
        }
        let base = mmap.as_mut_ptr();
        let header = unsafe { &*(base as *const BufferHeader) };
        if header.magic != MAGIC || header.version != VERSION {
            return Err(BufferError::BadHeader);
        }
        if header.slot_count != config.slot_count as u64 {
            return Err(BufferError::CapacityMismatch {
                expected: config.slot_count,
                found: header.slot_count as usize,
            });
        }
        if header.record_size != record_size as u64 || header.data_length != config.data_length as u64 {
            return Err(BufferError::CapacityMismatch {
                expected: record_size,
                found: header.record_size as usize,
            });
        }
        let created_overwrite = header.overwrite.load(Ordering::Relaxed) != 0;
        if created_overwrite != config.overwrite {
            return Err(BufferError::OverwriteMismatch {
                created: created_overwrite,
                requested: config.overwrite,
            });
        }

        let empty = unsafe {
            TokenQueue::attach_at(base.add(layout.empty_queue_offset), layout.queue_capacity)
        };
        let filled = unsafe {
            TokenQueue::attach_at(base.add(layout.filled_queue_offset), layout.queue_capacity)
        };

        tracing::info!(name = %config.name, "buffer opened");

        Ok(Self {
            config,
            mmap,
            layout,
            empty,
            filled,
            rate: Mutex::new(RateState {
                last_instant: Instant::now(),
                last_event_count: header.event_count.load(Ordering::Relaxed),
            }),
        })
    }

    #[inline]
    fn header(&self) -> &BufferHeader {
        unsafe { &*(self.mmap.as_ptr() as *const BufferHeader) }
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.config.name
    }

    #[inline]
    pub fn slot_count(&self) -> usize {
        self.config.slot_count
    }

    #[inline]
    pub fn overwrite(&self) -> bool {
        self.config.overwrite
    }

    #[inline]
    pub fn dtype(&self) -> &StructuredDtype {
        &self.config.dtype
    }

    fn slot_base(&self, index: usize) -> *mut u8 {
        if index >= self.config.slot_count {
            fatal!(index, slot_count = self.config.slot_count, "slot index out of range");
        }
        unsafe {
            (self.mmap.as_ptr() as *mut u8)
                .add(self.layout.slots_offset + index * self.layout.slot_bytes)
        }
    }

    fn slot_data(&self, index: usize) -> DataView<'_> {
        let data_bytes = self.config.data_length * self.config.dtype.record_size();
        let bytes = unsafe { std::slice::from_raw_parts(self.slot_base(index), data_bytes) };
        unsafe { DataView::new(bytes, &self.config.dtype, self.config.data_length) }
    }

    fn slot_data_mut(&self, index: usize) -> DataViewMut<'_> {
        let data_bytes = self.config.data_length * self.config.dtype.record_size();
        let bytes = unsafe { std::slice::from_raw_parts_mut(self.slot_base(index), data_bytes) };
        unsafe { DataViewMut::new(bytes, &self.config.dtype, self.config.data_length) }
    }

    fn metadata_ptr(&self, index: usize) -> *mut u8 {
        let data_bytes = self.config.data_length * self.config.dtype.record_size();
        unsafe { self.slot_base(index).add(data_bytes) }
    }

    fn slot_metadata(&self, index: usize) -> Metadata {
        let bytes = unsafe {
            std::slice::from_raw_parts(self.metadata_ptr(index), mimoring_dtype::METADATA_SIZE)
        };
        bytemuck::pod_read_unaligned(bytes)
    }

    fn set_slot_metadata(&self, index: usize, metadata: Metadata) {
        let bytes = unsafe {
            std::slice::from_raw_parts_mut(self.metadata_ptr(index), mimoring_dtype::METADATA_SIZE)
        };
        bytemuck::bytes_of(&metadata)
            .iter()
            .zip(bytes)
            .for_each(|(src, dst)| *dst = *src);
    }

    fn is_shutdown(&self) -> bool {
        self.header().shutdown.load(Ordering::Acquire) != 0
    }

    /// Acquire a slot for exclusive mutation (spec §4.3).
    pub fn get_write_token(&self) -> Option<WriteSession<'_>> {
        PERF.with(|cell| cell.borrow_mut().begin(PerfStage::AcquireWrite));
        let result = self.get_write_token_inner();
        PERF.with(|cell| cell.borrow_mut().end(PerfStage::AcquireWrite));
        result
    }

    fn get_write_token_inner(&self) -> Option<WriteSession<'_>> {
        if self.is_shutdown() {
            return None;
        }

        if let Some(index) = self.empty.try_get() {
            return Some(WriteSession {
                buffer: self,
                index: index as usize,
                reclaimed_overwrite: false,
            });
        }

        if self.config.overwrite {
            loop {
                match self.filled.try_get() {
                    None => break,
                    Some(FLUSH) => {
                        // Accidentally reclaimed the sentinel meant for
                        // readers; re-broadcast it and treat this as a
                        // shutdown signal rather than eating it.
                        self.filled.put(FLUSH);
                        return None;
                    }
                    Some(index) => {
                        self.header().overwrite_count.fetch_add(1, Ordering::Relaxed);
                        tracing::warn!(index, "reclaimed filled slot under overwrite pressure");
                        return Some(WriteSession {
                            buffer: self,
                            index: index as usize,
                            reclaimed_overwrite: true,
                        });
                    }
                }
            }
        }

        if self.is_shutdown() {
            return None;
        }

        self.empty
            .get_blocking(|| self.is_shutdown())
            .map(|index| WriteSession {
                buffer: self,
                index: index as usize,
                reclaimed_overwrite: false,
            })
    }

    fn release_write(&self, index: usize) {
        PERF.with(|cell| cell.borrow_mut().begin(PerfStage::ReleaseWrite));
        let event_count = self.header().event_count.fetch_add(1, Ordering::Relaxed) + 1;
        let timestamp_ns = now_ns();
        self.set_slot_metadata(
            index,
            Metadata {
                counter: event_count,
                timestamp_ns,
                deadtime: self.slot_metadata(index).deadtime,
            },
        );
        if !self.filled.put(index as u64) {
            fatal!(index, "filled queue full on write release: token conservation violated");
        }
        PERF.with(|cell| cell.borrow_mut().end(PerfStage::ReleaseWrite));
    }

    /// Acquire a slot for exclusive, consuming read (spec §4.4). Blocks
    /// until a real token or the flush sentinel arrives.
    pub fn get_read_token(&self) -> Option<ReadSession<'_>> {
        PERF.with(|cell| cell.borrow_mut().begin(PerfStage::AcquireRead));
        let result = self.get_read_token_inner();
        PERF.with(|cell| cell.borrow_mut().end(PerfStage::AcquireRead));
        result
    }

    fn get_read_token_inner(&self) -> Option<ReadSession<'_>> {
        loop {
            let token = self.filled.get_blocking(|| false)?;
            if token == FLUSH {
                self.header().flush_received.store(1, Ordering::Release);
                tracing::info!("flush sentinel received, re-broadcasting to peers");
                self.filled.put(FLUSH);
                return None;
            }
            return Some(ReadSession {
                buffer: self,
                index: token as usize,
            });
        }
    }

    fn release_read(&self, index: usize) {
        PERF.with(|cell| cell.borrow_mut().begin(PerfStage::ReleaseRead));
        if !self.empty.put(index as u64) {
            fatal!(index, "empty queue full on read release: token conservation violated");
        }
        PERF.with(|cell| cell.borrow_mut().end(PerfStage::ReleaseRead));
    }

    /// Acquire a slot for non-consuming read (spec §4.5). Never blocks.
    pub fn get_observe_token(&self) -> Option<ObserveSession<'_>> {
        PERF.with(|cell| cell.borrow_mut().begin(PerfStage::AcquireObserve));
        let result = match self.filled.try_get() {
            None => None,
            Some(FLUSH) => {
                self.filled.put(FLUSH);
                None
            }
            Some(index) => Some(ObserveSession {
                buffer: self,
                index: index as usize,
            }),
        };
        PERF.with(|cell| cell.borrow_mut().end(PerfStage::AcquireObserve));
        result
    }

    fn release_observe(&self, index: usize) {
        PERF.with(|cell| cell.borrow_mut().begin(PerfStage::ReleaseObserve));
        if !self.filled.put(index as u64) {
            fatal!(index, "filled queue full on observe release: token conservation violated");
        }
        PERF.with(|cell| cell.borrow_mut().end(PerfStage::ReleaseObserve));
    }

    /// Enqueue a flush sentinel and wake every session currently blocked
    /// on this buffer (spec §4.6). Idempotent: calling this repeatedly
    /// leaves the buffer in the same post-flush state.
    pub fn send_flush_event(&self) {
        tracing::info!(name = %self.config.name, "flush event sent");
        self.header().shutdown.store(1, Ordering::Release);
        self.filled.put(FLUSH);
    }

    pub fn flush_received(&self) -> bool {
        self.header().flush_received.load(Ordering::Acquire) != 0
    }

    /// Best-effort counters snapshot (spec §4.7).
    pub fn get_stats(&self) -> StatsRecord {
        let event_count = self.header().event_count.load(Ordering::Relaxed);
        let overwrite_count = self.header().overwrite_count.load(Ordering::Relaxed);
        let flush_received = self.flush_received();
        let empty_queue_len = self.empty.len();
        let filled_queue_len = self.filled.len();

        {
            let mut rate = self.rate.lock().unwrap();
            rate.last_instant = Instant::now();
            rate.last_event_count = event_count;
        }

        StatsRecord {
            event_count,
            overwrite_count,
            flush_received,
            empty_queue_len,
            filled_queue_len,
        }
    }

    /// Rate of successful writes per second since the previous
    /// [`Buffer::get_stats`] call, paired with the elapsed wall time.
    pub fn rate_since_last_call(&self) -> (f64, f64) {
        let event_count = self.header().event_count.load(Ordering::Relaxed);
        let mut rate = self.rate.lock().unwrap();
        let elapsed = rate.last_instant.elapsed().as_secs_f64();
        let delta = event_count.saturating_sub(rate.last_event_count);
        let hz = if elapsed > 0.0 { delta as f64 / elapsed } else { 0.0 };
        rate.last_instant = Instant::now();
        rate.last_event_count = event_count;
        (hz, elapsed)
    }

    /// Tear down the buffer: unlink its backing shared-memory file.
    /// Callers are responsible for ensuring no session is live (spec §5:
    /// "it is an error to tear down while any session is live").
    pub fn teardown(path: impl AsRef<Path>) -> std::io::Result<()> {
        mimoring_mmap::unlink(path)
    }
}

fn now_ns() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos() as u64
}

#[cfg(test)]
mod tests {
    use super::*;
    use mimoring_dtype::ScalarType;
    use std::time::{SystemTime as Time, UNIX_EPOCH as Epoch};

    fn temp_path(tag: &str) -> String {
        let ts = Time::now().duration_since(Epoch).unwrap().as_nanos();
        format!("/tmp/mimoring_buffer_test_{tag}_{ts}")
    }

    fn config(name: &str, slot_count: usize, data_length: usize, overwrite: bool) -> BufferConfig {
        BufferConfig {
            name: name.to_string(),
            slot_count,
            data_length,
            dtype: StructuredDtype::new([("value", ScalarType::F32)]).unwrap(),
            overwrite,
        }
    }

    #[test]
    fn single_producer_single_consumer_echo() {
        let path = temp_path("echo");
        let buf = Buffer::create(&path, config("echo", 4, 10, false)).unwrap();

        {
            let mut w = buf.get_write_token().unwrap();
            let mut data = w.data_mut();
            for i in 0..10 {
                assert!(data.set::<f32>(i, "value", i as f32));
            }
        }

        {
            let r = buf.get_read_token().unwrap();
            let data = r.data();
            for i in 0..10 {
                assert_eq!(data.get::<f32>(i, "value").unwrap(), i as f32);
            }
            assert_eq!(r.metadata().counter, 1);
        }

        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn overwrite_pressure_reclaims_oldest() {
        let path = temp_path("overwrite");
        let buf = Buffer::create(&path, config("ow", 2, 1, true)).unwrap();

        for i in 0..10u64 {
            let mut w = buf.get_write_token().unwrap();
            w.data_mut().set::<f32>(0, "value", i as f32);
        }

        let stats = buf.get_stats();
        assert_eq!(stats.event_count, 10);
        assert_eq!(stats.overwrite_count, 8);

        let mut counters = Vec::new();
        while let Some(r) = buf.get_read_token_nonblocking_for_test() {
            counters.push(r.metadata().counter);
        }
        counters.sort_unstable();
        assert_eq!(counters, vec![9, 10]);

        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn no_overwrite_backpressure_preserves_all_records() {
        let path = temp_path("backpressure");
        let buf = Buffer::create(&path, config("bp", 2, 1, false)).unwrap();

        let writer_buf = &buf;
        let handle = std::thread::scope(|scope| {
            scope.spawn(move || {
                for i in 0..10u64 {
                    let mut w = writer_buf.get_write_token().unwrap();
                    w.data_mut().set::<f32>(0, "value", i as f32);
                }
            })
        });

        let mut counters = Vec::new();
        while counters.len() < 10 {
            if let Some(r) = buf.get_read_token() {
                counters.push(r.metadata().counter);
            }
        }
        handle.join().unwrap();

        assert_eq!(buf.get_stats().overwrite_count, 0);
        assert_eq!(counters, (1..=10).collect::<Vec<_>>());

        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn flush_cascade_stops_readers() {
        let path = temp_path("flush");
        let buf = Buffer::create(&path, config("flush", 4, 1, false)).unwrap();

        for i in 0..3u64 {
            let mut w = buf.get_write_token().unwrap();
            w.data_mut().set::<f32>(0, "value", i as f32);
        }
        buf.send_flush_event();

        let mut consumed = 0;
        loop {
            match buf.get_read_token() {
                Some(_) => consumed += 1,
                None => break,
            }
        }
        assert_eq!(consumed, 3);
        assert!(buf.flush_received());

        // A second reader also observes shutdown immediately.
        assert!(buf.get_read_token().is_none());

        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn observer_does_not_consume() {
        let path = temp_path("observe");
        let buf = Buffer::create(&path, config("observe", 2, 1, false)).unwrap();
        {
            let mut w = buf.get_write_token().unwrap();
            w.data_mut().set::<f32>(0, "value", 42.0);
        }

        {
            let obs = buf.get_observe_token().unwrap();
            assert_eq!(obs.data().get::<f32>(0, "value").unwrap(), 42.0);
        }

        let r = buf.get_read_token().unwrap();
        assert_eq!(r.data().get::<f32>(0, "value").unwrap(), 42.0);

        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn concurrent_writers_assign_distinct_counters() {
        let path = temp_path("concurrent");
        let buf = Buffer::create(&path, config("concurrent", 16, 1, false)).unwrap();
        let buf_ref = &buf;

        let mut counters = Vec::new();
        std::thread::scope(|scope| {
            for _ in 0..4 {
                scope.spawn(move || {
                    for i in 0..1000u64 {
                        let mut w = buf_ref.get_write_token().unwrap();
                        w.data_mut().set::<f32>(0, "value", i as f32);
                    }
                });
            }

            counters = (0..4000)
                .map(|_| loop {
                    if let Some(r) = buf_ref.get_read_token() {
                        break r.metadata().counter;
                    }
                })
                .collect();
        });

        counters.sort_unstable();
        assert_eq!(counters, (1..=4000).collect::<Vec<_>>());

        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn open_validates_shape() {
        let path = temp_path("open");
        {
            let _buf = Buffer::create(&path, config("shape", 4, 1, true)).unwrap();
        }
        let mismatched = config("shape", 8, 1, true);
        let err = Buffer::open(&path, mismatched).unwrap_err();
        assert!(matches!(err, BufferError::CapacityMismatch { .. }));

        let _ = std::fs::remove_file(&path);
    }

    impl Buffer {
        // Test-only helper: a non-blocking read used by the overwrite test
        // to drain without depending on reader-blocking timing.
        fn get_read_token_nonblocking_for_test(&self) -> Option<ReadSession<'_>> {
            match self.filled.try_get() {
                None => None,
                Some(FLUSH) => None,
                Some(index) => Some(ReadSession {
                    buffer: self,
                    index: index as usize,
                }),
            }
        }
    }
}
