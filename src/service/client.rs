//! # Register Client
//!
//! The client side of the control channel: connect with a deadline, pass the
//! credential gate when the server requires one, then exchange token-stamped
//! request/reply frames. Typed register access flows through the
//! [`RegisterCodec`]: a typed call resolves its byte range first (failing on
//! overflow before any I/O), moves raw bytes over the wire, and decodes on
//! the way back.
//!
//! The whole request/reply pair runs under one exclusive connection lock, so
//! two concurrent calls can never interleave bytes on the wire; the second
//! caller waits for the first exchange to complete.

use std::net::SocketAddr;
use std::time::Duration;

use byteorder::{ByteOrder as _, LittleEndian as LE};
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tracing::{debug, info, instrument};

use crate::config::ClientConfig;
use crate::core::codec::RegisterCodec;
use crate::error::{constants, LinkError, Result};
use crate::protocol::handshake::{self, command, HandshakeToken};
use crate::transport::channel;

/// Connection options for a [`ControlClient`].
#[derive(Debug, Clone)]
pub struct ClientOptions {
    pub token: HandshakeToken,
    pub user_code: u32,
    pub connect_timeout: Option<Duration>,
    pub receive_timeout: Option<Duration>,
    pub codec: RegisterCodec,
    /// Credentials for gated servers, exchanged right after connect.
    pub account: Option<(String, String)>,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            token: HandshakeToken::default(),
            user_code: 0,
            connect_timeout: Some(Duration::from_secs(10)),
            receive_timeout: Some(Duration::from_secs(30)),
            codec: RegisterCodec::default(),
            account: None,
        }
    }
}

impl ClientOptions {
    /// Build options from a [`ClientConfig`] section.
    pub fn from_config(config: &ClientConfig) -> Result<Self> {
        Ok(Self {
            token: config.parse_token()?,
            user_code: config.user_code,
            connect_timeout: config.connect_deadline(),
            receive_timeout: config.receive_deadline(),
            codec: RegisterCodec::default(),
            account: config.account(),
        })
    }

    /// Use a specific register codec (word length and byte order).
    pub fn with_codec(mut self, codec: RegisterCodec) -> Self {
        self.codec = codec;
        self
    }
}

/// Client for a virtual device server's control channel.
#[derive(Debug)]
pub struct ControlClient {
    stream: Mutex<Option<TcpStream>>,
    token: HandshakeToken,
    user_code: u32,
    receive_timeout: Option<Duration>,
    codec: RegisterCodec,
}

impl ControlClient {
    /// Connect to `addr`, performing the credential exchange when options
    /// carry an account.
    #[instrument(skip(options))]
    pub async fn connect(addr: SocketAddr, options: ClientOptions) -> Result<Self> {
        let mut stream = channel::connect(addr, options.connect_timeout).await?;
        stream.set_nodelay(true).ok();

        if let Some((name, password)) = &options.account {
            handshake::request_account(
                &mut stream,
                name,
                password,
                options.user_code,
                &options.token,
                options.receive_timeout,
            )
            .await?;
            debug!(account = %name, "credential gate passed");
        }

        info!(%addr, "control client connected");
        Ok(Self {
            stream: Mutex::new(Some(stream)),
            token: options.token,
            user_code: options.user_code,
            receive_timeout: options.receive_timeout,
            codec: options.codec,
        })
    }

    /// Connect using a [`ClientConfig`] section.
    pub async fn connect_config(config: &ClientConfig) -> Result<Self> {
        let addr: SocketAddr = config
            .address
            .parse()
            .map_err(|e| LinkError::ConfigError(format!("invalid client address: {e}")))?;
        Self::connect(addr, ClientOptions::from_config(config)?).await
    }

    pub fn codec(&self) -> &RegisterCodec {
        &self.codec
    }

    /// Whether the connection is still held. A failed exchange drops it.
    pub async fn is_connected(&self) -> bool {
        self.stream.lock().await.is_some()
    }

    /// Shut the connection down. Safe to call repeatedly.
    pub async fn close(&self) {
        if let Some(mut stream) = self.stream.lock().await.take() {
            let _ = stream.shutdown().await;
            debug!("control client closed");
        }
    }

    /// One request/reply exchange. Holds the connection lock across the full
    /// send-echo-reply-echo sequence so exchanges never interleave. On a
    /// transport, timeout or protocol failure the (already closed)
    /// connection is dropped and subsequent calls fail fast until a
    /// reconnect; a [`LinkError::Remote`] failure is an ordinary reply and
    /// leaves the session usable.
    pub async fn exchange(&self, cmd: u32, payload: &[u8]) -> Result<Vec<u8>> {
        let mut guard = self.stream.lock().await;
        let stream = guard
            .as_mut()
            .ok_or_else(|| LinkError::Custom(constants::ERR_NOT_CONNECTED.into()))?;

        let result = Self::exchange_on(
            stream,
            cmd,
            self.user_code,
            &self.token,
            payload,
            self.receive_timeout,
        )
        .await;

        if matches!(result, Err(ref e) if !matches!(e, LinkError::Remote(_))) {
            guard.take();
        }
        result
    }

    async fn exchange_on(
        stream: &mut TcpStream,
        cmd: u32,
        user_code: u32,
        token: &HandshakeToken,
        payload: &[u8],
        deadline: Option<Duration>,
    ) -> Result<Vec<u8>> {
        handshake::send_and_confirm(stream, cmd, user_code, token, payload).await?;
        let (reply_cmd, _user, reply) =
            handshake::receive_and_verify(stream, token, deadline).await?;
        if reply_cmd == command::ERROR {
            return Err(LinkError::Remote(
                String::from_utf8_lossy(&reply).into_owned(),
            ));
        }
        Ok(reply)
    }

    /// Read `len` raw bytes from `bank` at byte `offset`. Out-of-range
    /// portions come back zero-filled, mirroring the server's memory policy.
    pub async fn read_bytes(&self, bank: u16, offset: u32, len: u32) -> Result<Vec<u8>> {
        self.exchange(command::READ_BYTES, &range_request(bank, offset, len))
            .await
    }

    /// Write raw bytes into `bank` at byte `offset`. Overruns are clipped by
    /// the server, not failed.
    pub async fn write_bytes(&self, bank: u16, offset: u32, data: &[u8]) -> Result<()> {
        let mut req = vec![0u8; 6];
        LE::write_u16(&mut req[0..2], bank);
        LE::write_u32(&mut req[2..6], offset);
        req.extend_from_slice(data);
        self.exchange(command::WRITE_BYTES, &req).await.map(|_| ())
    }

    /// Read `count` bits starting at bit `index`.
    pub async fn read_bits(&self, bank: u16, index: u32, count: u32) -> Result<Vec<bool>> {
        let reply = self
            .exchange(command::READ_BITS, &range_request(bank, index, count))
            .await?;
        Ok(reply.into_iter().map(|b| b != 0).collect())
    }

    /// Set one bit.
    pub async fn write_bit(&self, bank: u16, index: u32, value: bool) -> Result<()> {
        let mut req = vec![0u8; 7];
        LE::write_u16(&mut req[0..2], bank);
        LE::write_u32(&mut req[2..6], index);
        req[6] = u8::from(value);
        self.exchange(command::WRITE_BIT, &req).await.map(|_| ())
    }

    /// Fetch the server's full memory dump.
    pub async fn snapshot(&self) -> Result<Vec<u8>> {
        self.exchange(command::SNAPSHOT, &[]).await
    }

    /// Replace the server's full memory from a dump.
    pub async fn restore(&self, dump: &[u8]) -> Result<()> {
        self.exchange(command::RESTORE, dump).await.map(|_| ())
    }

    /// Liveness probe; the server returns the payload unchanged.
    pub async fn ping(&self, payload: &[u8]) -> Result<Vec<u8>> {
        self.exchange(command::PING, payload).await
    }

    /// Read a NUL-trimmed string of `byte_len` raw bytes at logical
    /// `address`.
    pub async fn read_string(&self, bank: u16, address: u32, byte_len: u32) -> Result<String> {
        let (offset, _) = self.codec.byte_range(address, byte_len, 1)?;
        let bytes = self.read_bytes(bank, offset, byte_len).await?;
        Ok(self.codec.decode_string(&bytes))
    }

    /// Write a string at logical `address`, padded per the codec's rules.
    pub async fn write_string(&self, bank: u16, address: u32, value: &str) -> Result<()> {
        let encoded = self.codec.encode_string(value);
        let (offset, _) = self.codec.byte_range(address, encoded.len() as u32, 1)?;
        self.write_bytes(bank, offset, &encoded).await
    }
}

fn range_request(bank: u16, start: u32, count: u32) -> Vec<u8> {
    let mut req = vec![0u8; 10];
    LE::write_u16(&mut req[0..2], bank);
    LE::write_u32(&mut req[2..6], start);
    LE::write_u32(&mut req[6..10], count);
    req
}

macro_rules! typed_client_access {
    ($read:ident, $write:ident, $ty:ty, $width:expr, $dec:ident, $enc:ident) => {
        impl ControlClient {
            /// Read `count` typed values at logical `address`; the byte range
            /// is resolved (and overflow rejected) before any I/O.
            pub async fn $read(&self, bank: u16, address: u32, count: u32) -> Result<Vec<$ty>> {
                let (offset, len) = self.codec.byte_range(address, count, $width)?;
                let bytes = self.read_bytes(bank, offset, len as u32).await?;
                self.codec.$dec(&bytes, count as usize)
            }

            /// Write typed values at logical `address`.
            pub async fn $write(&self, bank: u16, address: u32, values: &[$ty]) -> Result<()> {
                let (offset, _len) =
                    self.codec.byte_range(address, values.len() as u32, $width)?;
                self.write_bytes(bank, offset, &self.codec.$enc(values)).await
            }
        }
    };
}

typed_client_access!(read_u16, write_u16, u16, 2, decode_u16_values, encode_u16_values);
typed_client_access!(read_i16, write_i16, i16, 2, decode_i16_values, encode_i16_values);
typed_client_access!(read_u32, write_u32, u32, 4, decode_u32_values, encode_u32_values);
typed_client_access!(read_i32, write_i32, i32, 4, decode_i32_values, encode_i32_values);
typed_client_access!(read_u64, write_u64, u64, 8, decode_u64_values, encode_u64_values);
typed_client_access!(read_i64, write_i64, i64, 8, decode_i64_values, encode_i64_values);
typed_client_access!(read_f32, write_f32, f32, 4, decode_f32_values, encode_f32_values);
typed_client_access!(read_f64, write_f64, f64, 8, decode_f64_values, encode_f64_values);
