//! Structured record dtypes and zero-copy named-field views over slot bytes.
//!
//! A buffer's data array is a fixed-length run of identically-shaped
//! records. [`StructuredDtype`] describes that shape — an ordered list of
//! named, fixed-width scalar fields, packed tightly with no inter-field
//! padding (spec: "tightly packed per the declared dtypes, with no padding
//! between data and metadata"). [`DataView`] / [`DataViewMut`] then expose a
//! slot's raw bytes as that shape without copying: named-field access
//! computes a byte offset and reinterprets in place.
//!
//! The metadata record ([`Metadata`]) is fixed by the protocol rather than
//! user-declared, so it gets its own `#[repr(C)]` struct instead of going
//! through the dtype machinery.

use bytemuck::{Pod, Zeroable};
use thiserror::Error;

/// One of the fixed-width scalar codes a dtype field may use.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ScalarType {
    I8,
    U8,
    I16,
    U16,
    I32,
    U32,
    I64,
    U64,
    F32,
    F64,
    /// Fixed-length byte string, `Sn` in the spec's notation.
    Bytes(u16),
}

impl ScalarType {
    /// Size in bytes of one value of this scalar type.
    pub const fn size(&self) -> usize {
        match self {
            ScalarType::I8 | ScalarType::U8 => 1,
            ScalarType::I16 | ScalarType::U16 => 2,
            ScalarType::I32 | ScalarType::U32 | ScalarType::F32 => 4,
            ScalarType::I64 | ScalarType::U64 | ScalarType::F64 => 8,
            ScalarType::Bytes(n) => *n as usize,
        }
    }
}

/// One named field of a [`StructuredDtype`], with its byte offset inside a
/// single record already resolved.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Field {
    pub name: String,
    pub scalar: ScalarType,
    pub offset: usize,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DtypeError {
    #[error("dtype must declare at least one field")]
    Empty,
    #[error("duplicate field name '{0}'")]
    DuplicateField(String),
    #[error("zero-size field '{0}'")]
    ZeroSizeField(String),
}

/// An ordered, named record layout: `sum(field sizes)` bytes per record,
/// fields packed back-to-back with no padding.
#[derive(Clone, Debug)]
pub struct StructuredDtype {
    fields: Vec<Field>,
    record_size: usize,
}

impl StructuredDtype {
    pub fn new<I, S>(fields: I) -> Result<Self, DtypeError>
    where
        I: IntoIterator<Item = (S, ScalarType)>,
        S: Into<String>,
    {
        let mut out: Vec<Field> = Vec::new();
        let mut offset = 0usize;
        for (name, scalar) in fields {
            let name = name.into();
            if scalar.size() == 0 {
                return Err(DtypeError::ZeroSizeField(name));
            }
            if out.iter().any(|f| f.name == name) {
                return Err(DtypeError::DuplicateField(name));
            }
            out.push(Field {
                name,
                scalar,
                offset,
            });
            offset += scalar.size();
        }
        if out.is_empty() {
            return Err(DtypeError::Empty);
        }
        Ok(Self {
            fields: out,
            record_size: offset,
        })
    }

    /// Total bytes per record (sum of all field sizes).
    #[inline]
    pub fn record_size(&self) -> usize {
        self.record_size
    }

    #[inline]
    pub fn fields(&self) -> &[Field] {
        &self.fields
    }

    pub fn field(&self, name: &str) -> Option<&Field> {
        self.fields.iter().find(|f| f.name == name)
    }
}

/// Fixed metadata record stamped into every slot: `{counter, timestamp_ns,
/// deadtime}`, one per slot, immediately following the data array with no
/// padding in between.
///
/// `deadtime`'s semantics are not specified upstream; it is carried as an
/// opaque value a writer may set.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct Metadata {
    pub counter: u64,
    pub timestamp_ns: u64,
    pub deadtime: f64,
}

pub const METADATA_SIZE: usize = std::mem::size_of::<Metadata>();

/// Read-only zero-copy view over one slot's data array.
pub struct DataView<'a> {
    bytes: &'a [u8],
    dtype: &'a StructuredDtype,
    len: usize,
}

/// Mutable zero-copy view over one slot's data array. Exists only while the
/// caller holds a write session on the slot.
pub struct DataViewMut<'a> {
    bytes: &'a mut [u8],
    dtype: &'a StructuredDtype,
    len: usize,
}

fn field_range(dtype: &StructuredDtype, len: usize, index: usize, name: &str) -> Option<(usize, usize, ScalarType)> {
    if index >= len {
        return None;
    }
    let field = dtype.field(name)?;
    let record_start = index * dtype.record_size();
    let start = record_start + field.offset;
    Some((start, start + field.scalar.size(), field.scalar))
}

impl<'a> DataView<'a> {
    /// # Safety
    /// `bytes` must be at least `len * dtype.record_size()` bytes, and must
    /// outlive `'a` without being mutated concurrently.
    pub unsafe fn new(bytes: &'a [u8], dtype: &'a StructuredDtype, len: usize) -> Self {
        debug_assert!(bytes.len() >= len * dtype.record_size());
        Self { bytes, dtype, len }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn dtype(&self) -> &StructuredDtype {
        self.dtype
    }

    /// Raw bytes backing `field` at `index`, or `None` if out of range or
    /// the field does not exist.
    pub fn raw(&self, index: usize, field: &str) -> Option<&[u8]> {
        let (start, end, _) = field_range(self.dtype, self.len, index, field)?;
        Some(&self.bytes[start..end])
    }

    /// Typed read of `field` at `index`. Returns `None` if out of range, the
    /// field does not exist, or `T`'s size does not match the field's
    /// declared scalar size. Reads are unaligned-safe: fields are packed
    /// with no padding, so a field's byte offset is not generally a
    /// multiple of `align_of::<T>()`.
    pub fn get<T: Pod>(&self, index: usize, field: &str) -> Option<T> {
        let (start, end, scalar) = field_range(self.dtype, self.len, index, field)?;
        if scalar.size() != std::mem::size_of::<T>() {
            return None;
        }
        Some(bytemuck::pod_read_unaligned(&self.bytes[start..end]))
    }
}

impl<'a> DataViewMut<'a> {
    /// # Safety
    /// `bytes` must be at least `len * dtype.record_size()` bytes, must be
    /// exclusively owned by the caller for `'a` (no other reader/writer
    /// holds this slot), and must outlive `'a`.
    pub unsafe fn new(bytes: &'a mut [u8], dtype: &'a StructuredDtype, len: usize) -> Self {
        debug_assert!(bytes.len() >= len * dtype.record_size());
        Self { bytes, dtype, len }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn dtype(&self) -> &StructuredDtype {
        self.dtype
    }

    pub fn raw(&self, index: usize, field: &str) -> Option<&[u8]> {
        let (start, end, _) = field_range(self.dtype, self.len, index, field)?;
        Some(&self.bytes[start..end])
    }

    pub fn raw_mut(&mut self, index: usize, field: &str) -> Option<&mut [u8]> {
        let (start, end, _) = field_range(self.dtype, self.len, index, field)?;
        Some(&mut self.bytes[start..end])
    }

    pub fn get<T: Pod>(&self, index: usize, field: &str) -> Option<T> {
        let (start, end, scalar) = field_range(self.dtype, self.len, index, field)?;
        if scalar.size() != std::mem::size_of::<T>() {
            return None;
        }
        Some(bytemuck::pod_read_unaligned(&self.bytes[start..end]))
    }

    /// Typed write of `field` at `index`. Returns `false` (and writes
    /// nothing) if out of range, the field does not exist, or size
    /// mismatches.
    pub fn set<T: Pod>(&mut self, index: usize, field: &str, value: T) -> bool {
        let Some((start, end, scalar)) = field_range(self.dtype, self.len, index, field) else {
            return false;
        };
        if scalar.size() != std::mem::size_of::<T>() {
            return false;
        }
        bytemuck::bytes_of(&value)
            .iter()
            .zip(&mut self.bytes[start..end])
            .for_each(|(src, dst)| *dst = *src);
        true
    }

    /// Zero every byte of this record array. Used to reset a slot's test
    /// pattern before a no-overwrite writer re-observes it.
    pub fn zero(&mut self) {
        self.bytes.fill(0);
    }
}
