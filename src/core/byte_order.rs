//! # Byte-Order Transform
//!
//! Bidirectional conversion between byte ranges and typed register values,
//! parameterized by an ordering mode. Controller families disagree on how
//! multi-register values are laid out; the four canonical orderings here
//! cover the conventions seen in the field.
//!
//! For a 32-bit value with big-endian bytes `A B C D`:
//! - [`ByteOrder::BigEndian`] → `A B C D`
//! - [`ByteOrder::LittleEndian`] → `D C B A`
//! - [`ByteOrder::BigEndianWordSwap`] → `B A D C` (bytes swapped within each 16-bit word)
//! - [`ByteOrder::LittleEndianWordSwap`] → `C D A B` (16-bit words reversed)
//!
//! 2-byte values only honor the byte order within the word: `BigEndian` and
//! `LittleEndianWordSwap` read big-endian, the other two little-endian.
//!
//! All four arrangements are involutions, so the same permutation both
//! encodes and decodes.

use byteorder::{BigEndian as BE, ByteOrder as _};
use serde::{Deserialize, Serialize};

/// Register byte-ordering mode for multi-byte integers and floats.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ByteOrder {
    /// `A B C D`: network order, common on Modbus devices.
    BigEndian,
    /// `D C B A`: full reversal, common on little-endian controllers.
    #[default]
    LittleEndian,
    /// `B A D C`: big-endian word order with bytes swapped inside each word.
    BigEndianWordSwap,
    /// `C D A B`: little-endian word order with big-endian bytes inside.
    LittleEndianWordSwap,
}

impl ByteOrder {
    /// Apply this ordering to a big-endian byte buffer in place.
    ///
    /// Every arrangement is its own inverse, so the same call converts both
    /// directions. `buf` must be 2, 4 or 8 bytes.
    fn arrange(self, buf: &mut [u8]) {
        match self {
            ByteOrder::BigEndian => {}
            ByteOrder::LittleEndian => buf.reverse(),
            ByteOrder::BigEndianWordSwap => {
                for pair in buf.chunks_exact_mut(2) {
                    pair.swap(0, 1);
                }
            }
            ByteOrder::LittleEndianWordSwap => {
                let words = buf.len() / 2;
                for i in 0..words / 2 {
                    let (a, b) = (i * 2, (words - 1 - i) * 2);
                    buf.swap(a, b);
                    buf.swap(a + 1, b + 1);
                }
            }
        }
    }

    pub fn encode_u16(self, v: u16) -> [u8; 2] {
        let mut b = v.to_be_bytes();
        self.arrange(&mut b);
        b
    }

    pub fn encode_i16(self, v: i16) -> [u8; 2] {
        self.encode_u16(v as u16)
    }

    pub fn encode_u32(self, v: u32) -> [u8; 4] {
        let mut b = v.to_be_bytes();
        self.arrange(&mut b);
        b
    }

    pub fn encode_i32(self, v: i32) -> [u8; 4] {
        self.encode_u32(v as u32)
    }

    pub fn encode_u64(self, v: u64) -> [u8; 8] {
        let mut b = v.to_be_bytes();
        self.arrange(&mut b);
        b
    }

    pub fn encode_i64(self, v: i64) -> [u8; 8] {
        self.encode_u64(v as u64)
    }

    pub fn encode_f32(self, v: f32) -> [u8; 4] {
        self.encode_u32(v.to_bits())
    }

    pub fn encode_f64(self, v: f64) -> [u8; 8] {
        self.encode_u64(v.to_bits())
    }

    /// Decode a u16 from the first 2 bytes of `b`. Missing bytes read as zero.
    pub fn decode_u16(self, b: &[u8]) -> u16 {
        let mut buf = [0u8; 2];
        copy_prefix(&mut buf, b);
        self.arrange(&mut buf);
        BE::read_u16(&buf)
    }

    pub fn decode_i16(self, b: &[u8]) -> i16 {
        self.decode_u16(b) as i16
    }

    pub fn decode_u32(self, b: &[u8]) -> u32 {
        let mut buf = [0u8; 4];
        copy_prefix(&mut buf, b);
        self.arrange(&mut buf);
        BE::read_u32(&buf)
    }

    pub fn decode_i32(self, b: &[u8]) -> i32 {
        self.decode_u32(b) as i32
    }

    pub fn decode_u64(self, b: &[u8]) -> u64 {
        let mut buf = [0u8; 8];
        copy_prefix(&mut buf, b);
        self.arrange(&mut buf);
        BE::read_u64(&buf)
    }

    pub fn decode_i64(self, b: &[u8]) -> i64 {
        self.decode_u64(b) as i64
    }

    pub fn decode_f32(self, b: &[u8]) -> f32 {
        f32::from_bits(self.decode_u32(b))
    }

    pub fn decode_f64(self, b: &[u8]) -> f64 {
        f64::from_bits(self.decode_u64(b))
    }

    /// Get human-readable name
    pub fn name(self) -> &'static str {
        match self {
            ByteOrder::BigEndian => "big_endian",
            ByteOrder::LittleEndian => "little_endian",
            ByteOrder::BigEndianWordSwap => "big_endian_word_swap",
            ByteOrder::LittleEndianWordSwap => "little_endian_word_swap",
        }
    }
}

fn copy_prefix(dst: &mut [u8], src: &[u8]) {
    let n = dst.len().min(src.len());
    dst[..n].copy_from_slice(&src[..n]);
}

/// Encode a string as UTF-8 bytes.
pub fn encode_string(s: &str) -> Vec<u8> {
    s.as_bytes().to_vec()
}

/// Encode a string as UTF-8, NUL-padded to an even byte length.
pub fn encode_string_padded(s: &str) -> Vec<u8> {
    let mut bytes = s.as_bytes().to_vec();
    if bytes.len() % 2 != 0 {
        bytes.push(0);
    }
    bytes
}

/// Decode a string from raw register bytes, dropping trailing NUL padding.
/// Invalid UTF-8 sequences are replaced rather than failing, since register
/// memory may legitimately hold partial garbage around a string field.
pub fn decode_string(bytes: &[u8]) -> String {
    let trimmed = match bytes.iter().rposition(|&b| b != 0) {
        Some(last) => &bytes[..=last],
        None => &[],
    };
    String::from_utf8_lossy(trimmed).into_owned()
}
