//! Scoped Writer/Reader/Observer sessions.
//!
//! Each session is a guard: it holds exactly one slot token for its whole
//! lifetime and releases it on every exit path via `Drop`, including when
//! the caller's code panics mid-session (spec §9: "stack-allocated guards
//! whose destructor releases the token on every exit path").

use mimoring_dtype::{DataView, DataViewMut, Metadata};

use crate::Buffer;

/// Exclusive write access to one slot. Dropping releases the index into
/// `filled` and stamps `event_count`/`counter`/`timestamp_ns`.
pub struct WriteSession<'a> {
    pub(crate) buffer: &'a Buffer,
    pub(crate) index: usize,
    pub(crate) reclaimed_overwrite: bool,
}

impl<'a> WriteSession<'a> {
    #[inline]
    pub fn index(&self) -> usize {
        self.index
    }

    /// Whether this slot was reclaimed from `filled` under overwrite
    /// pressure rather than taken from `empty`.
    #[inline]
    pub fn reclaimed_overwrite(&self) -> bool {
        self.reclaimed_overwrite
    }

    pub fn data_mut(&mut self) -> DataViewMut<'_> {
        self.buffer.slot_data_mut(self.index)
    }

    pub fn data(&self) -> DataView<'_> {
        self.buffer.slot_data(self.index)
    }

    pub fn metadata(&self) -> Metadata {
        self.buffer.slot_metadata(self.index)
    }

    /// Overwrite this slot's metadata before release. `counter` and
    /// `timestamp_ns` are buffer-assigned unconditionally at release
    /// regardless of what is set here (spec §4.3: "buffer-assigned" is
    /// the implemented default); use this to set `deadtime` or any future
    /// caller-owned metadata field.
    pub fn set_metadata(&mut self, metadata: Metadata) {
        self.buffer.set_slot_metadata(self.index, metadata);
    }
}

impl Drop for WriteSession<'_> {
    fn drop(&mut self) {
        self.buffer.release_write(self.index);
    }
}

/// Exclusive, consuming read access to one slot. Dropping releases the
/// index into `empty`.
pub struct ReadSession<'a> {
    pub(crate) buffer: &'a Buffer,
    pub(crate) index: usize,
}

impl<'a> ReadSession<'a> {
    #[inline]
    pub fn index(&self) -> usize {
        self.index
    }

    pub fn data(&self) -> DataView<'_> {
        self.buffer.slot_data(self.index)
    }

    pub fn metadata(&self) -> Metadata {
        self.buffer.slot_metadata(self.index)
    }
}

impl Drop for ReadSession<'_> {
    fn drop(&mut self) {
        self.buffer.release_read(self.index);
    }
}

/// Non-consuming borrow of one slot from `filled`. Dropping re-enqueues
/// the same index at the tail of `filled` — the slot is never removed
/// from circulation. Callers must copy out anything they need before the
/// guard drops; the underlying bytes may be reclaimed by an overwriting
/// writer immediately after.
pub struct ObserveSession<'a> {
    pub(crate) buffer: &'a Buffer,
    pub(crate) index: usize,
}

impl<'a> ObserveSession<'a> {
    #[inline]
    pub fn index(&self) -> usize {
        self.index
    }

    pub fn data(&self) -> DataView<'_> {
        self.buffer.slot_data(self.index)
    }

    pub fn metadata(&self) -> Metadata {
        self.buffer.slot_metadata(self.index)
    }
}

impl Drop for ObserveSession<'_> {
    fn drop(&mut self) {
        self.buffer.release_observe(self.index);
    }
}
