//! A bounded, cross-process MPMC queue of slot tokens.
//!
//! This is the Vyukov bounded ring algorithm (the same design used by
//! `crossbeam::ArrayQueue`, and documented inline by the MPMC ring buffer it
//! was modeled on): each cell carries a sequence number that encodes whether
//! it is ready to be written or read, so producers and consumers coordinate
//! through a single `compare_exchange` loop per cell rather than a lock.
//!
//! What's specific to this crate: the queue lives in a plain byte region
//! (usually a `MAP_SHARED` mmap) rather than a process-local allocation, so
//! [`TokenQueue`] never owns memory — callers compute the required byte
//! size with [`bytes_for_queue`] and place the queue at some offset inside
//! their own shared region, then attach from each process with
//! [`TokenQueue::init_at`] (once) or [`TokenQueue::attach_at`] (every other
//! opener).
//!
//! A queue carries `u64` tokens; [`FLUSH`] is the in-band sentinel value
//! (spec: "an integer slot index plus an in-band sentinel value ... meaning
//! 'flush'"). Valid slot indices never reach `u64::MAX` in any buffer this
//! crate can address, so the sentinel never collides with a real index.

use crossbeam_utils::CachePadded;
use std::cell::UnsafeCell;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// In-band flush sentinel token.
pub const FLUSH: u64 = u64::MAX;

#[repr(C)]
struct Cell {
    sequence: AtomicU64,
    value: UnsafeCell<u64>,
}

#[repr(C)]
struct QueueHeader {
    head: CachePadded<AtomicU64>,
    tail: CachePadded<AtomicU64>,
}

/// Bytes required to hold a queue of `capacity` cells (must be a power of
/// two — it becomes the wraparound mask).
pub fn bytes_for_queue(capacity: usize) -> usize {
    assert!(capacity.is_power_of_two(), "queue capacity must be a power of two");
    std::mem::size_of::<QueueHeader>() + capacity * std::mem::size_of::<Cell>()
}

/// A handle onto a bounded MPMC token queue backed by externally-owned
/// bytes (typically a shared-memory region). Cheap to construct; many
/// `TokenQueue` handles (one per process, one per thread, whatever) may
/// point at the same bytes simultaneously.
pub struct TokenQueue {
    header: *mut QueueHeader,
    cells: *mut Cell,
    mask: u64,
    capacity: u64,
}

// Safety: every access to `header`/`cells` goes through atomics with the
// orderings the Vyukov protocol requires; the queue is designed to be
// shared across threads and processes by construction.
unsafe impl Send for TokenQueue {}
unsafe impl Sync for TokenQueue {}

impl TokenQueue {
    /// Initialize a fresh queue at `base`, which must point to at least
    /// `bytes_for_queue(capacity)` writable bytes owned by the caller for
    /// the queue's whole lifetime. Call exactly once per queue, from
    /// whichever process creates the backing region.
    ///
    /// # Safety
    /// `base` must be validly aligned for `QueueHeader` and `Cell`, must
    /// not alias any other live Rust reference, and must outlive every
    /// `TokenQueue` attached to it.
    pub unsafe fn init_at(base: *mut u8, capacity: usize) -> Self {
        assert!(capacity.is_power_of_two(), "queue capacity must be a power of two");
        let header = base as *mut QueueHeader;
        unsafe {
            std::ptr::write(
                header,
                QueueHeader {
                    head: CachePadded::new(AtomicU64::new(0)),
                    tail: CachePadded::new(AtomicU64::new(0)),
                },
            );
        }
        let cells = unsafe { base.add(std::mem::size_of::<QueueHeader>()) as *mut Cell };
        for i in 0..capacity as u64 {
            unsafe {
                std::ptr::write(
                    cells.add(i as usize),
                    Cell {
                        sequence: AtomicU64::new(i),
                        value: UnsafeCell::new(0),
                    },
                );
            }
        }
        Self {
            header,
            cells,
            mask: capacity as u64 - 1,
            capacity: capacity as u64,
        }
    }

    /// Attach to a queue previously set up by [`TokenQueue::init_at`] at the
    /// same `base`/`capacity`, possibly from a different process.
    ///
    /// # Safety
    /// `base` must point at a region already initialized by `init_at` with
    /// the same `capacity`, and must outlive this handle.
    pub unsafe fn attach_at(base: *mut u8, capacity: usize) -> Self {
        assert!(capacity.is_power_of_two(), "queue capacity must be a power of two");
        let header = base as *mut QueueHeader;
        let cells = unsafe { base.add(std::mem::size_of::<QueueHeader>()) as *mut Cell };
        Self {
            header,
            cells,
            mask: capacity as u64 - 1,
            capacity: capacity as u64,
        }
    }

    #[inline(always)]
    fn header(&self) -> &QueueHeader {
        unsafe { &*self.header }
    }

    #[inline(always)]
    fn cell(&self, idx: u64) -> &Cell {
        unsafe { &*self.cells.add(idx as usize) }
    }

    /// Enqueue `value` without blocking. Returns `false` only if the queue
    /// is momentarily at capacity; callers in this crate's buffer never
    /// enqueue more live tokens than the queue was sized for (see spec
    /// §4.2: "capacity is always sufficient"), so a `false` return here
    /// indicates token-conservation corruption, not ordinary backpressure.
    pub fn put(&self, value: u64) -> bool {
        let mut tail = self.header().tail.load(Ordering::Relaxed);
        loop {
            let cell = self.cell(tail & self.mask);
            let seq = cell.sequence.load(Ordering::Acquire);
            let diff = seq.wrapping_sub(tail) as i64;
            if diff == 0 {
                match self.header().tail.compare_exchange_weak(
                    tail,
                    tail.wrapping_add(1),
                    Ordering::Relaxed,
                    Ordering::Relaxed,
                ) {
                    Ok(_) => {
                        unsafe { *cell.value.get() = value };
                        cell.sequence.store(tail.wrapping_add(1), Ordering::Release);
                        return true;
                    }
                    Err(cur) => tail = cur,
                }
            } else if diff < 0 {
                return false;
            } else {
                tail = self.header().tail.load(Ordering::Relaxed);
            }
        }
    }

    /// Dequeue immediately, or return `None` if the queue is empty.
    pub fn try_get(&self) -> Option<u64> {
        let mut head = self.header().head.load(Ordering::Relaxed);
        loop {
            let cell = self.cell(head & self.mask);
            let seq = cell.sequence.load(Ordering::Acquire);
            let diff = seq.wrapping_sub(head.wrapping_add(1)) as i64;
            if diff == 0 {
                match self.header().head.compare_exchange_weak(
                    head,
                    head.wrapping_add(1),
                    Ordering::Relaxed,
                    Ordering::Relaxed,
                ) {
                    Ok(_) => {
                        let v = unsafe { *cell.value.get() };
                        cell.sequence
                            .store(head.wrapping_add(self.capacity), Ordering::Release);
                        return Some(v);
                    }
                    Err(cur) => head = cur,
                }
            } else if diff < 0 {
                return None;
            } else {
                head = self.header().head.load(Ordering::Relaxed);
            }
        }
    }

    /// Dequeue, waiting if the queue is empty. `should_abort` is polled
    /// between backoff steps; the first time it returns `true`, this
    /// returns `None` instead of continuing to wait. Used to give a
    /// blocked writer a bounded-time way out when a flush is in progress
    /// (spec §4.6: "every blocked session on this buffer returns 'no
    /// token' within bounded time").
    pub fn get_blocking(&self, mut should_abort: impl FnMut() -> bool) -> Option<u64> {
        let mut spins: u32 = 0;
        loop {
            if let Some(v) = self.try_get() {
                return Some(v);
            }
            if should_abort() {
                return None;
            }
            backoff(&mut spins);
        }
    }

    /// Best-effort current occupancy. Read without a global lock, so it may
    /// be stale the instant it's read under concurrent use (spec §4.7:
    /// "Snapshot is best-effort consistent").
    pub fn len(&self) -> u64 {
        let tail = self.header().tail.load(Ordering::Acquire);
        let head = self.header().head.load(Ordering::Acquire);
        tail.wrapping_sub(head)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> u64 {
        self.capacity
    }
}

fn backoff(spins: &mut u32) {
    *spins = spins.saturating_add(1);
    if *spins < 40 {
        std::hint::spin_loop();
    } else if *spins < 400 {
        std::thread::yield_now();
    } else {
        std::thread::sleep(Duration::from_micros(50));
    }
}

/// Heap-backed queue storage for single-process use (tests, benches, and
/// any worker that doesn't need the queue to cross a process boundary).
pub struct OwnedTokenQueue {
    _storage: Box<[u8]>,
    queue: TokenQueue,
}

impl OwnedTokenQueue {
    pub fn new(capacity: usize) -> Self {
        let mut storage = vec![0u8; bytes_for_queue(capacity)].into_boxed_slice();
        let queue = unsafe { TokenQueue::init_at(storage.as_mut_ptr(), capacity) };
        Self {
            _storage: storage,
            queue,
        }
    }
}

impl std::ops::Deref for OwnedTokenQueue {
    type Target = TokenQueue;
    fn deref(&self) -> &TokenQueue {
        &self.queue
    }
}
