//! # Register Memory Core
//!
//! Typed register values, byte-order transforms, and the thread-safe
//! addressable memory backing virtual device servers.
//!
//! ## Components
//! - **ByteOrder**: the four canonical multi-byte value arrangements
//! - **RegisterCodec**: logical address units <-> byte ranges, typed values <-> wire bytes
//! - **MemoryBank / BankSet**: byte- and bit-addressable device memory with snapshots
//!
//! ## Bounds Policy
//! - `RegisterCodec` rejects bad widths and overflowing spans *before* I/O
//! - `MemoryBank` clips to capacity and never fails a get/set

pub mod byte_order;
pub mod codec;
pub mod memory;

pub use byte_order::ByteOrder;
pub use codec::RegisterCodec;
pub use memory::{BankSet, MemoryBank, DEFAULT_BANK_CAPACITY};
