//! # Control Protocol
//!
//! The engine's own control channel: a token-verified, length-echoed wire
//! protocol layered above [`crate::transport::frame`], plus the command
//! dispatcher virtual device servers use to route requests.
//!
//! ## Components
//! - **Handshake**: fixed 28-byte header, token verification, length echo,
//!   optional credential gate
//! - **Dispatcher**: command-code routing for protocol-specific handlers

pub mod dispatcher;
pub mod handshake;

#[cfg(test)]
mod tests;

pub use dispatcher::Dispatcher;
pub use handshake::{
    command, ControlFrameRule, ControlHeader, HandshakeToken, ECHO_LEN, HEADER_LEN,
};
