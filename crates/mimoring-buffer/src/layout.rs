//! Shared-memory layout of one buffer's backing region.
//!
//! Byte layout, header first so a just-mapped region can be validated
//! before anything else is touched:
//!
//! ```text
//! [ BufferHeader | empty queue bytes | filled queue bytes | slot_count * slot_bytes ]
//! ```

use std::sync::atomic::AtomicU64;

pub const MAGIC: u64 = 0x4D_49_4D_4F_52_49_4E_47; // "MIMORING"
pub const VERSION: u64 = 1;

/// Extra queue capacity reserved beyond `slot_count` so a burst of flush
/// sentinels never overflows `filled` (spec §4.2: "sentinels are unbounded
/// but rare").
const SENTINEL_MARGIN: usize = 8;

/// Fixed-layout region header. Lives at byte offset 0 of the mapping.
/// `#[repr(C)]`, no padding hazards since every field is 8 bytes.
#[repr(C)]
pub struct BufferHeader {
    pub magic: u64,
    pub version: u64,
    pub slot_count: u64,
    pub data_length: u64,
    pub record_size: u64,
    pub slot_bytes: u64,
    pub queue_capacity: u64,
    pub overwrite: AtomicU64,
    pub event_count: AtomicU64,
    pub overwrite_count: AtomicU64,
    pub flush_received: AtomicU64,
    pub shutdown: AtomicU64,
}

/// Resolved byte offsets and sizes for one buffer's region, computed once
/// from `slot_count`/`record_size`/`data_length` and then shared by every
/// process that opens the same region.
#[derive(Clone, Copy, Debug)]
pub struct Layout {
    pub queue_capacity: usize,
    pub slot_bytes: usize,
    pub header_offset: usize,
    pub empty_queue_offset: usize,
    pub filled_queue_offset: usize,
    pub slots_offset: usize,
    pub total_bytes: usize,
}

impl Layout {
    pub fn new(slot_count: usize, data_length: usize, record_size: usize) -> Self {
        let slot_bytes = data_length * record_size + mimoring_dtype::METADATA_SIZE;
        let queue_capacity = (slot_count + SENTINEL_MARGIN)
            .next_power_of_two()
            .max(8);
        let queue_bytes = mimoring_queue::bytes_for_queue(queue_capacity);

        let header_offset = 0;
        let empty_queue_offset = header_offset + std::mem::size_of::<BufferHeader>();
        let filled_queue_offset = empty_queue_offset + queue_bytes;
        let slots_offset = filled_queue_offset + queue_bytes;
        let total_bytes = slots_offset + slot_count * slot_bytes;

        Self {
            queue_capacity,
            slot_bytes,
            header_offset,
            empty_queue_offset,
            filled_queue_offset,
            slots_offset,
            total_bytes,
        }
    }
}
