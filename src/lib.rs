//! # plc-link
//!
//! Connection, session and framing core for industrial-device middleware.
//!
//! This crate is the engine shared by protocol implementations that talk to
//! (or emulate) programmable controllers over TCP, UDP or serial links: it
//! multiplexes concurrent sessions, resolves variable-length messages with a
//! two-phase header/content read, enforces operation deadlines with
//! per-operation watchdogs, and exposes a uniform typed-register surface
//! over byte-addressable device memory.
//!
//! ## Layers
//! - [`core`]: byte-order transforms, the register codec, and the
//!   thread-safe [`MemoryBank`] backing virtual device servers
//! - [`transport`]: connect/send/receive primitives, the pluggable
//!   [`FrameRule`] framing contract, timeout watchdogs, sessions
//! - [`protocol`]: the token-verified control channel with length echoes
//!   and the credential gate, plus command dispatch
//! - [`service`]: [`DeviceServer`] and [`ControlClient`]
//! - [`config`], [`error`], [`utils`]: the ambient stack
//!
//! ## Quick Start
//! ```rust,no_run
//! use plc_link::config::{MemoryConfig, ServerConfig};
//! use plc_link::service::{ClientOptions, ControlClient, DeviceServer};
//!
//! #[tokio::main]
//! async fn main() -> plc_link::Result<()> {
//!     let memory = MemoryConfig::default();
//!     let server = DeviceServer::new(ServerConfig::default(), memory.build_banks())?;
//!     let addr = server.start(10000).await?;
//!
//!     let client = ControlClient::connect(addr, ClientOptions::default()).await?;
//!     client.write_u16(0, 100, &[0x1234]).await?;
//!     let values = client.read_u16(0, 100, 1).await?;
//!     assert_eq!(values, vec![0x1234]);
//!
//!     client.close().await;
//!     server.close().await;
//!     Ok(())
//! }
//! ```
//!
//! ## Concurrency Model
//! One accept loop per started server hands each connection to its own task.
//! Within a session, sends serialize through an exclusive send lock and
//! receives are strictly sequential. Register memory is the only state
//! mutated by multiple sessions concurrently, guarded by one lock per bank.
//! Deadlines are cooperative: a watchdog closes the socket rather than
//! interrupting a system call, and both sides of that race are idempotent.

pub mod config;
pub mod core;
pub mod error;
pub mod protocol;
pub mod service;
pub mod transport;
pub mod utils;

// The flat API most callers want
pub use crate::config::LinkConfig;
pub use crate::core::{BankSet, ByteOrder, MemoryBank, RegisterCodec};
pub use crate::error::{LinkError, Result};
pub use crate::protocol::{Dispatcher, HandshakeToken};
pub use crate::service::{ClientOptions, ControlClient, DeviceServer};
pub use crate::transport::{Frame, FrameRule, Session, SessionRegistry};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
