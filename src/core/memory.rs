//! # Register Memory
//!
//! Thread-safe, fixed-capacity byte store with bit-level access: the
//! backing memory for virtual device servers. Every accessor runs under the
//! bank's single lock, so a typed read-modify-write spanning several bytes
//! is atomic with respect to every other accessor. Callers composing
//! multi-field transactions must not assume atomicity across calls.
//!
//! ## Bounds policy
//! Accesses are clipped to `[0, capacity)`: a write whose length would
//! overrun the buffer stores only the in-bounds prefix, and a read outside
//! the buffer yields zero bytes. A virtual register server must keep
//! answering out-of-range client requests, so bounds problems are not
//! errors here; strict callers check [`MemoryBank::capacity`] first.

use std::sync::Mutex;

use crate::core::byte_order::{self, ByteOrder};
use crate::error::{LinkError, Result};

/// Default capacity of one register bank (64 KiB).
pub const DEFAULT_BANK_CAPACITY: usize = 65536;

/// Per-bit set masks, indexed by `bit_index % 8`.
const SET_MASK: [u8; 8] = [0x01, 0x02, 0x04, 0x08, 0x10, 0x20, 0x40, 0x80];
/// Per-bit clear masks, indexed by `bit_index % 8`.
const CLEAR_MASK: [u8; 8] = [0xFE, 0xFD, 0xFB, 0xF7, 0xEF, 0xDF, 0xBF, 0x7F];

/// One thread-safe byte/bit-addressable register bank.
#[derive(Debug)]
pub struct MemoryBank {
    capacity: usize,
    order: ByteOrder,
    buf: Mutex<Vec<u8>>,
}

impl MemoryBank {
    /// Allocate a zero-filled bank of `capacity` bytes with the default
    /// (little-endian) value layout.
    pub fn new(capacity: usize) -> Self {
        Self::with_order(capacity, ByteOrder::default())
    }

    /// Allocate a zero-filled bank with an explicit byte-order transform for
    /// the typed accessors.
    pub fn with_order(capacity: usize, order: ByteOrder) -> Self {
        Self {
            capacity,
            order,
            buf: Mutex::new(vec![0u8; capacity]),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn order(&self) -> ByteOrder {
        self.order
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<u8>> {
        // A poisoned lock only means another accessor panicked mid-copy;
        // the byte buffer itself is always structurally valid.
        self.buf.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Copy `data` into the bank at `offset`, clipping at capacity.
    /// Returns the number of bytes actually stored.
    pub fn set_bytes(&self, offset: usize, data: &[u8]) -> usize {
        if offset >= self.capacity || data.is_empty() {
            return 0;
        }
        let n = data.len().min(self.capacity - offset);
        let mut buf = self.lock();
        buf[offset..offset + n].copy_from_slice(&data[..n]);
        n
    }

    /// Read `len` bytes at `offset`. Portions outside the bank read as zero,
    /// and an entirely out-of-range request yields a zero-filled buffer.
    pub fn get_bytes(&self, offset: usize, len: usize) -> Vec<u8> {
        let mut out = vec![0u8; len];
        if offset < self.capacity && len > 0 {
            let n = len.min(self.capacity - offset);
            let buf = self.lock();
            out[..n].copy_from_slice(&buf[offset..offset + n]);
        }
        out
    }

    /// Set one bit. Bit `i` lives in byte `i / 8` at position `i % 8`.
    /// Out-of-range indices are ignored.
    pub fn set_bit(&self, index: usize, value: bool) {
        let byte = index / 8;
        if byte >= self.capacity {
            return;
        }
        let mut buf = self.lock();
        if value {
            buf[byte] |= SET_MASK[index % 8];
        } else {
            buf[byte] &= CLEAR_MASK[index % 8];
        }
    }

    /// Read one bit; out-of-range indices read as false.
    pub fn get_bit(&self, index: usize) -> bool {
        let byte = index / 8;
        if byte >= self.capacity {
            return false;
        }
        let buf = self.lock();
        buf[byte] & SET_MASK[index % 8] != 0
    }

    /// Read `count` consecutive bits starting at `index`.
    pub fn get_bits(&self, index: usize, count: usize) -> Vec<bool> {
        let buf = self.lock();
        (index..index + count)
            .map(|i| {
                let byte = i / 8;
                byte < self.capacity && buf[byte] & SET_MASK[i % 8] != 0
            })
            .collect()
    }

    /// Write `values` as consecutive bits starting at `index`.
    pub fn set_bits(&self, index: usize, values: &[bool]) {
        let mut buf = self.lock();
        for (i, &v) in values.iter().enumerate() {
            let bit = index + i;
            let byte = bit / 8;
            if byte >= self.capacity {
                break;
            }
            if v {
                buf[byte] |= SET_MASK[bit % 8];
            } else {
                buf[byte] &= CLEAR_MASK[bit % 8];
            }
        }
    }

    /// Raw copy of the whole bank, for snapshot persistence.
    pub fn snapshot(&self) -> Vec<u8> {
        self.lock().clone()
    }

    /// Replace the bank contents from a snapshot. The input must carry at
    /// least `capacity` bytes; a short input is rejected outright rather
    /// than partially applied.
    pub fn restore(&self, data: &[u8]) -> Result<()> {
        if data.len() < self.capacity {
            return Err(LinkError::SnapshotTooShort {
                need: self.capacity,
                got: data.len(),
            });
        }
        let mut buf = self.lock();
        buf.copy_from_slice(&data[..self.capacity]);
        Ok(())
    }
}

macro_rules! typed_accessors {
    ($get:ident, $set:ident, $ty:ty, $width:expr, $dec:ident, $enc:ident) => {
        impl MemoryBank {
            /// Typed view over `get_bytes`, bounds-safe by construction.
            pub fn $get(&self, offset: usize) -> $ty {
                self.order.$dec(&self.get_bytes(offset, $width))
            }

            /// Typed view over `set_bytes`; overruns are clipped.
            pub fn $set(&self, offset: usize, value: $ty) {
                self.set_bytes(offset, &self.order.$enc(value));
            }
        }
    };
}

typed_accessors!(get_u16, set_u16, u16, 2, decode_u16, encode_u16);
typed_accessors!(get_i16, set_i16, i16, 2, decode_i16, encode_i16);
typed_accessors!(get_u32, set_u32, u32, 4, decode_u32, encode_u32);
typed_accessors!(get_i32, set_i32, i32, 4, decode_i32, encode_i32);
typed_accessors!(get_u64, set_u64, u64, 8, decode_u64, encode_u64);
typed_accessors!(get_i64, set_i64, i64, 8, decode_i64, encode_i64);
typed_accessors!(get_f32, set_f32, f32, 4, decode_f32, encode_f32);
typed_accessors!(get_f64, set_f64, f64, 8, decode_f64, encode_f64);

impl MemoryBank {
    /// Read a NUL-trimmed UTF-8 string of up to `len` raw bytes.
    pub fn get_string(&self, offset: usize, len: usize) -> String {
        byte_order::decode_string(&self.get_bytes(offset, len))
    }

    /// Store a string's UTF-8 bytes; overruns are clipped.
    pub fn set_string(&self, offset: usize, s: &str) {
        self.set_bytes(offset, s.as_bytes());
    }
}

/// An ordered collection of named register banks: one virtual device's
/// complete memory map (e.g. coils, inputs, holding registers).
#[derive(Debug, Default)]
pub struct BankSet {
    banks: Vec<(String, MemoryBank)>,
}

impl BankSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a bank; the insertion order fixes both the wire index and the
    /// snapshot layout.
    pub fn add_bank(&mut self, name: impl Into<String>, bank: MemoryBank) {
        self.banks.push((name.into(), bank));
    }

    pub fn len(&self) -> usize {
        self.banks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.banks.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&MemoryBank> {
        self.banks.get(index).map(|(_, b)| b)
    }

    pub fn by_name(&self, name: &str) -> Option<&MemoryBank> {
        self.banks.iter().find(|(n, _)| n == name).map(|(_, b)| b)
    }

    /// Flat concatenation of every bank's raw buffer, in insertion order.
    pub fn snapshot(&self) -> Vec<u8> {
        let total: usize = self.banks.iter().map(|(_, b)| b.capacity()).sum();
        let mut out = Vec::with_capacity(total);
        for (_, bank) in &self.banks {
            out.extend_from_slice(&bank.snapshot());
        }
        out
    }

    /// Restore every bank from a flat dump. The input length must cover the
    /// sum of all bank capacities or the whole load is rejected; no bank is
    /// touched on failure.
    pub fn restore(&self, data: &[u8]) -> Result<()> {
        let total: usize = self.banks.iter().map(|(_, b)| b.capacity()).sum();
        if data.len() < total {
            return Err(LinkError::SnapshotTooShort {
                need: total,
                got: data.len(),
            });
        }
        let mut offset = 0;
        for (_, bank) in &self.banks {
            bank.restore(&data[offset..offset + bank.capacity()])?;
            offset += bank.capacity();
        }
        Ok(())
    }
}
