//! # Transport Layer
//!
//! Connection primitives shared by every protocol implementation: exact-count
//! send/receive, two-phase frame resolution, per-operation timeout watchdogs,
//! and the server-side session directory.
//!
//! ## Components
//! - **channel**: connect with deadline, `send_all`/`recv_exact`, UDP exchange
//! - **frame**: pluggable [`FrameRule`] contract and `read_frame`
//! - **watchdog**: background deadline enforcement, one task per guarded call
//! - **session**: [`Session`] send-lock discipline and the [`SessionRegistry`]
//!
//! ## Deadline Semantics
//! Cancellation is cooperative: a watchdog cannot interrupt an in-flight
//! system call, so every guarded operation races its real I/O against the
//! watchdog's expiry signal and the loser is dropped. Closing an
//! already-closed socket is a no-op everywhere.

pub mod channel;
pub mod frame;
pub mod session;
pub mod watchdog;

pub use frame::{Frame, FrameRule, MAX_CONTENT_LEN};
pub use session::{Session, SessionRegistry};
pub use watchdog::WatchdogGuard;
