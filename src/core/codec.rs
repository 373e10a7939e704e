//! # Register Codec
//!
//! Maps logical register addresses to byte ranges and typed values to wire
//! bytes. Each protocol family addresses device memory in its own unit (a
//! byte for Siemens-style protocols, a 16-bit word for Modbus-style ones),
//! so the codec is parameterized by a *word length* (bytes per address unit)
//! and a [`ByteOrder`] transform matching the device's endianness.
//!
//! Address and width problems are caught here, before any network I/O is
//! issued: an unsupported element width or a `count` whose byte span would
//! overflow the device address space is a typed failure, never a request.

use crate::core::byte_order::{self, ByteOrder};
use crate::error::{LinkError, Result};

/// Largest element width the codec will serialize (f64 / u64).
const MAX_ELEM_WIDTH: usize = 8;

/// Typed value <-> byte-range mapper for one protocol family.
#[derive(Debug, Clone, Copy)]
pub struct RegisterCodec {
    word_len: u16,
    order: ByteOrder,
}

impl Default for RegisterCodec {
    fn default() -> Self {
        Self {
            word_len: 1,
            order: ByteOrder::default(),
        }
    }
}

impl RegisterCodec {
    /// Create a codec for a protocol with the given bytes-per-address-unit
    /// and byte ordering. `word_len` of 0 or above 8 is rejected.
    pub fn new(word_len: u16, order: ByteOrder) -> Result<Self> {
        if word_len == 0 || word_len as usize > MAX_ELEM_WIDTH {
            return Err(LinkError::UnsupportedWidth(word_len as usize));
        }
        Ok(Self { word_len, order })
    }

    pub fn word_len(&self) -> u16 {
        self.word_len
    }

    pub fn order(&self) -> ByteOrder {
        self.order
    }

    /// Whether this codec addresses memory byte-by-byte.
    pub fn is_byte_oriented(&self) -> bool {
        self.word_len == 1
    }

    /// Total bytes occupied by `count` elements of `width` bytes each.
    /// Fails on unsupported widths and on arithmetic overflow.
    pub fn byte_span(&self, count: u32, width: usize) -> Result<usize> {
        if !matches!(width, 1 | 2 | 4 | 8) {
            return Err(LinkError::UnsupportedWidth(width));
        }
        (count as usize)
            .checked_mul(width)
            .ok_or(LinkError::AddressOverflow {
                address: 0,
                count,
                width,
            })
    }

    /// Resolve a typed access at logical `address` into `(byte_offset, byte_len)`.
    ///
    /// The byte offset is `address * word_len`; both it and the end of the
    /// range must fit the 32-bit address space the wire protocol carries.
    pub fn byte_range(&self, address: u32, count: u32, width: usize) -> Result<(u32, usize)> {
        let len = self.byte_span(count, width)?;
        let offset = address
            .checked_mul(self.word_len as u32)
            .ok_or(LinkError::AddressOverflow {
                address,
                count,
                width,
            })?;
        if (offset as u64) + (len as u64) > u32::MAX as u64 {
            return Err(LinkError::AddressOverflow {
                address,
                count,
                width,
            });
        }
        Ok((offset, len))
    }

    /// Encode a string for the wire: selectable encoding (UTF-8 here), and
    /// NUL padding to an even length on byte-oriented protocols.
    pub fn encode_string(&self, s: &str) -> Vec<u8> {
        if self.is_byte_oriented() {
            byte_order::encode_string_padded(s)
        } else {
            byte_order::encode_string(s)
        }
    }

    /// Decode a string from payload bytes, dropping NUL padding.
    pub fn decode_string(&self, payload: &[u8]) -> String {
        byte_order::decode_string(payload)
    }
}

macro_rules! typed_codec {
    ($enc:ident, $dec:ident, $ty:ty, $width:expr, $enc_one:ident, $dec_one:ident) => {
        impl RegisterCodec {
            /// Serialize a slice of typed values into wire bytes.
            pub fn $enc(&self, values: &[$ty]) -> Vec<u8> {
                let mut out = Vec::with_capacity(values.len() * $width);
                for v in values {
                    out.extend_from_slice(&self.order.$enc_one(*v));
                }
                out
            }

            /// Decode `count` typed values from a payload; the payload must
            /// carry at least the full byte span.
            pub fn $dec(&self, payload: &[u8], count: usize) -> Result<Vec<$ty>> {
                let need = count * $width;
                if payload.len() < need {
                    return Err(LinkError::MalformedFrame(format!(
                        "payload of {} bytes cannot hold {} elements of {} bytes",
                        payload.len(),
                        count,
                        $width
                    )));
                }
                Ok(payload[..need]
                    .chunks_exact($width)
                    .map(|c| self.order.$dec_one(c))
                    .collect())
            }
        }
    };
}

typed_codec!(encode_u16_values, decode_u16_values, u16, 2, encode_u16, decode_u16);
typed_codec!(encode_i16_values, decode_i16_values, i16, 2, encode_i16, decode_i16);
typed_codec!(encode_u32_values, decode_u32_values, u32, 4, encode_u32, decode_u32);
typed_codec!(encode_i32_values, decode_i32_values, i32, 4, encode_i32, decode_i32);
typed_codec!(encode_u64_values, decode_u64_values, u64, 8, encode_u64, decode_u64);
typed_codec!(encode_i64_values, decode_i64_values, i64, 8, encode_i64, decode_i64);
typed_codec!(encode_f32_values, decode_f32_values, f32, 4, encode_f32, decode_f32);
typed_codec!(encode_f64_values, decode_f64_values, f64, 8, encode_f64, decode_f64);
