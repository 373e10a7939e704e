//! # Control-Channel Handshake
//!
//! The self-verifying control channel used between the engine's own clients
//! and virtual device servers. Every message carries a fixed 28-byte header:
//!
//! ```text
//! [0:4)   command        (u32, little-endian)
//! [4:8)   user code      (u32, little-endian)
//! [8:24)  token          (16 bytes)
//! [24:28) content length (i32, little-endian)
//! ```
//!
//! followed by `content length` bytes of payload. The 16-byte token is a
//! shared secret isolating unrelated clients and servers: a receiver whose
//! configured token does not match the header closes the socket before
//! interpreting any payload. This is a security control, not a parsing
//! detail.
//!
//! Delivery is confirmed in both directions with an 8-byte little-endian
//! echo of the total transferred length (`28 + content length`): every send
//! blocks for the receiver's echo and fails on disagreement, defending
//! against partial delivery the transport reported as success; every
//! receive answers with that echo before the payload is handed on.
//!
//! Servers may additionally gate sessions behind one name/password exchange
//! carried over the same primitives, prior to any normal traffic.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use byteorder::{ByteOrder as _, LittleEndian as LE};
use rand::RngCore;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tracing::{debug, warn};

use crate::error::{constants, LinkError, Result};
use crate::transport::channel;
use crate::transport::frame::{self, Frame, FrameRule};

/// Fixed control-channel header size.
pub const HEADER_LEN: usize = 28;
/// Size of the length-echo confirmation.
pub const ECHO_LEN: usize = 8;

/// Built-in command codes carried in the control header.
pub mod command {
    /// Read raw bytes from a bank: `[bank u16][offset u32][len u32]`.
    pub const READ_BYTES: u32 = 0x0001;
    /// Write raw bytes to a bank: `[bank u16][offset u32][data…]`.
    pub const WRITE_BYTES: u32 = 0x0002;
    /// Read bits: `[bank u16][bit u32][count u32]` → one byte per bit.
    pub const READ_BITS: u32 = 0x0003;
    /// Write one bit: `[bank u16][bit u32][value u8]`.
    pub const WRITE_BIT: u32 = 0x0004;
    /// Dump every bank as a flat snapshot.
    pub const SNAPSHOT: u32 = 0x0005;
    /// Restore every bank from a flat snapshot.
    pub const RESTORE: u32 = 0x0006;
    /// Liveness probe; the payload is returned unchanged.
    pub const PING: u32 = 0x0007;
    /// Credential exchange: `[name, password]` string array.
    pub const ACCOUNT: u32 = 0x0010;
    /// Server-side failure report; payload is a UTF-8 reason.
    pub const ERROR: u32 = 0xFFFF_FFFF;
}

/// Reply marker strings for the account exchange.
pub const ACCOUNT_ACCEPTED: &str = "accepted";
pub const ACCOUNT_REJECTED: &str = "rejected";

/// The 16-byte shared secret embedded in every control-channel header.
#[derive(Clone, Copy, PartialEq, Eq, Default)]
pub struct HandshakeToken([u8; 16]);

impl HandshakeToken {
    pub const LEN: usize = 16;

    pub fn from_bytes(bytes: [u8; 16]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 16] {
        &self.0
    }

    /// A fresh random token for a new deployment.
    pub fn random() -> Self {
        let mut bytes = [0u8; 16];
        rand::thread_rng().fill_bytes(&mut bytes);
        Self(bytes)
    }

    /// Fixed-structure comparison: all 16 bytes are always inspected so the
    /// comparison's shape does not depend on where a mismatch occurs.
    pub fn matches(&self, other: &HandshakeToken) -> bool {
        let mut diff = 0u8;
        for i in 0..Self::LEN {
            diff |= self.0[i] ^ other.0[i];
        }
        diff == 0
    }
}

impl fmt::Debug for HandshakeToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // tokens are secrets; log a fingerprint, not the value
        write!(f, "HandshakeToken({:02x}{:02x}..)", self.0[0], self.0[1])
    }
}

impl fmt::Display for HandshakeToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for b in &self.0 {
            write!(f, "{b:02x}")?;
        }
        Ok(())
    }
}

impl FromStr for HandshakeToken {
    type Err = LinkError;

    /// Parse 32 hex characters into a token.
    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        if s.len() != 32 || !s.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(LinkError::ConfigError(format!(
                "token must be 32 hex characters, got {s:?}"
            )));
        }
        let mut bytes = [0u8; 16];
        for (i, chunk) in s.as_bytes().chunks_exact(2).enumerate() {
            let hex = std::str::from_utf8(chunk)
                .map_err(|_| LinkError::ConfigError("token is not valid UTF-8".into()))?;
            bytes[i] = u8::from_str_radix(hex, 16)
                .map_err(|e| LinkError::ConfigError(format!("bad token byte: {e}")))?;
        }
        Ok(Self(bytes))
    }
}

/// Decoded control-channel header.
#[derive(Debug, Clone, Copy)]
pub struct ControlHeader {
    pub command: u32,
    pub user_code: u32,
    pub token: HandshakeToken,
    pub content_len: i32,
}

impl ControlHeader {
    pub fn encode(&self) -> [u8; HEADER_LEN] {
        let mut buf = [0u8; HEADER_LEN];
        LE::write_u32(&mut buf[0..4], self.command);
        LE::write_u32(&mut buf[4..8], self.user_code);
        buf[8..24].copy_from_slice(self.token.as_bytes());
        LE::write_i32(&mut buf[24..28], self.content_len);
        buf
    }

    pub fn parse(header: &[u8]) -> Result<Self> {
        if header.len() < HEADER_LEN {
            return Err(LinkError::MalformedFrame(
                constants::ERR_SHORT_HEADER.into(),
            ));
        }
        let mut token = [0u8; 16];
        token.copy_from_slice(&header[8..24]);
        Ok(Self {
            command: LE::read_u32(&header[0..4]),
            user_code: LE::read_u32(&header[4..8]),
            token: HandshakeToken::from_bytes(token),
            content_len: LE::read_i32(&header[24..28]),
        })
    }
}

/// Frame rule for the control channel: fixed 28-byte header, content length
/// in the trailing little-endian i32.
#[derive(Debug, Clone, Copy, Default)]
pub struct ControlFrameRule;

impl FrameRule for ControlFrameRule {
    fn header_len(&self) -> usize {
        HEADER_LEN
    }

    fn content_len(&self, header: &[u8]) -> i64 {
        i64::from(LE::read_i32(&header[24..28]))
    }
}

/// Assemble a complete control message: header + payload.
pub fn build_message(
    command: u32,
    user_code: u32,
    token: &HandshakeToken,
    payload: &[u8],
) -> Vec<u8> {
    let header = ControlHeader {
        command,
        user_code,
        token: *token,
        content_len: payload.len() as i32,
    };
    let mut out = Vec::with_capacity(HEADER_LEN + payload.len());
    out.extend_from_slice(&header.encode());
    out.extend_from_slice(payload);
    out
}

/// The 8-byte little-endian confirmation for a transfer of `total` bytes.
pub fn echo_bytes(total: u64) -> [u8; ECHO_LEN] {
    let mut buf = [0u8; ECHO_LEN];
    LE::write_u64(&mut buf, total);
    buf
}

/// Verify a received frame's token and decode its header.
///
/// Fails before the payload is interpreted; the caller closes the socket on
/// [`LinkError::TokenMismatch`].
pub fn verify_frame(frame: &Frame, token: &HandshakeToken) -> Result<ControlHeader> {
    let header = ControlHeader::parse(frame.header())?;
    if !header.token.matches(token) {
        warn!(command = header.command, "{}", constants::ERR_TOKEN_MISMATCH);
        return Err(LinkError::TokenMismatch);
    }
    Ok(header)
}

/// Send one control message and block for the receiver's length echo.
///
/// An echo disagreeing with the number of bytes actually sent means some of
/// them never arrived even though the transport reported success; the socket
/// is closed and [`LinkError::EchoMismatch`] returned.
pub async fn send_and_confirm<S>(
    stream: &mut S,
    command: u32,
    user_code: u32,
    token: &HandshakeToken,
    payload: &[u8],
) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let message = build_message(command, user_code, token, payload);
    channel::send_all(stream, &message).await?;

    let echo = match channel::recv_exact(stream, ECHO_LEN).await {
        Ok(echo) => echo,
        Err(e) => {
            let _ = stream.shutdown().await;
            return Err(e);
        }
    };
    let echoed = LE::read_u64(&echo);
    let sent = message.len() as u64;
    if echoed != sent {
        let _ = stream.shutdown().await;
        return Err(LinkError::EchoMismatch { sent, echoed });
    }
    debug!(command, bytes = sent, "send confirmed");
    Ok(())
}

/// Receive one control message, verify its token, and confirm receipt.
///
/// On token mismatch the socket is closed and the payload never surfaces.
/// On success the total received length is echoed back before the decoded
/// `(command, user_code, payload)` is returned.
pub async fn receive_and_verify<S>(
    stream: &mut S,
    token: &HandshakeToken,
    deadline: Option<Duration>,
) -> Result<(u32, u32, Vec<u8>)>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let frame = match frame::read_frame(stream, &ControlFrameRule, deadline).await {
        Ok(frame) => frame,
        Err(e) => {
            let _ = stream.shutdown().await;
            return Err(e);
        }
    };

    let header = match verify_frame(&frame, token) {
        Ok(header) => header,
        Err(e) => {
            let _ = stream.shutdown().await;
            return Err(e);
        }
    };

    channel::send_all(stream, &echo_bytes(frame.as_bytes().len() as u64)).await?;
    Ok((header.command, header.user_code, frame.content().to_vec()))
}

/// Encode a string array payload: a u32 count followed by `(u32 length,
/// UTF-8 bytes)` per entry, all little-endian.
pub fn encode_strings(strings: &[&str]) -> Vec<u8> {
    let mut out = Vec::with_capacity(4 + strings.iter().map(|s| 4 + s.len()).sum::<usize>());
    let mut len_buf = [0u8; 4];
    LE::write_u32(&mut len_buf, strings.len() as u32);
    out.extend_from_slice(&len_buf);
    for s in strings {
        LE::write_u32(&mut len_buf, s.len() as u32);
        out.extend_from_slice(&len_buf);
        out.extend_from_slice(s.as_bytes());
    }
    out
}

/// Decode a string array payload produced by [`encode_strings`].
pub fn decode_strings(payload: &[u8]) -> Result<Vec<String>> {
    let truncated = || LinkError::MalformedFrame(constants::ERR_TRUNCATED_STRINGS.into());
    if payload.len() < 4 {
        return Err(truncated());
    }
    let count = LE::read_u32(&payload[..4]) as usize;
    let mut out = Vec::with_capacity(count.min(64));
    let mut pos = 4;
    for _ in 0..count {
        if payload.len() < pos + 4 {
            return Err(truncated());
        }
        let len = LE::read_u32(&payload[pos..pos + 4]) as usize;
        pos += 4;
        if payload.len() < pos + len {
            return Err(truncated());
        }
        let s = String::from_utf8(payload[pos..pos + len].to_vec())
            .map_err(|e| LinkError::MalformedFrame(format!("string not UTF-8: {e}")))?;
        out.push(s);
        pos += len;
    }
    Ok(out)
}

/// Client side of the credential gate: one `[name, password]` exchange over
/// the normal primitives, performed before any other traffic.
pub async fn request_account<S>(
    stream: &mut S,
    name: &str,
    password: &str,
    user_code: u32,
    token: &HandshakeToken,
    deadline: Option<Duration>,
) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let payload = encode_strings(&[name, password]);
    send_and_confirm(stream, command::ACCOUNT, user_code, token, &payload).await?;

    let (cmd, _user, reply) = receive_and_verify(stream, token, deadline).await?;
    if cmd != command::ACCOUNT {
        let _ = stream.shutdown().await;
        return Err(LinkError::MalformedFrame(format!(
            "expected account reply, got command {cmd:#x}"
        )));
    }
    let strings = decode_strings(&reply)?;
    match strings.first().map(String::as_str) {
        Some(ACCOUNT_ACCEPTED) => Ok(()),
        _ => {
            let reason = strings
                .get(1)
                .cloned()
                .unwrap_or_else(|| constants::ERR_ACCOUNT_UNKNOWN.to_string());
            let _ = stream.shutdown().await;
            Err(LinkError::AuthFailed(reason))
        }
    }
}

/// Server side of the credential gate: check a decoded `[name, password]`
/// payload against the configured accounts. Returns the reply payload to
/// send back and the verdict carrying the authenticated name.
pub fn check_account(payload: &[u8], accounts: &[(String, String)]) -> (Vec<u8>, Result<String>) {
    let strings = match decode_strings(payload) {
        Ok(s) => s,
        Err(e) => {
            return (
                encode_strings(&[ACCOUNT_REJECTED, constants::ERR_TRUNCATED_STRINGS]),
                Err(e),
            )
        }
    };
    let (name, password) = match (strings.first(), strings.get(1)) {
        (Some(n), Some(p)) => (n.as_str(), p.as_str()),
        _ => {
            return (
                encode_strings(&[ACCOUNT_REJECTED, constants::ERR_TRUNCATED_STRINGS]),
                Err(LinkError::MalformedFrame(
                    constants::ERR_TRUNCATED_STRINGS.into(),
                )),
            )
        }
    };
    match accounts.iter().find(|(n, _)| n == name) {
        None => (
            encode_strings(&[ACCOUNT_REJECTED, constants::ERR_ACCOUNT_UNKNOWN]),
            Err(LinkError::AuthFailed(format!(
                "{}: {name}",
                constants::ERR_ACCOUNT_UNKNOWN
            ))),
        ),
        Some((_, expected)) if expected != password => (
            encode_strings(&[ACCOUNT_REJECTED, constants::ERR_ACCOUNT_PASSWORD]),
            Err(LinkError::AuthFailed(format!(
                "{}: {name}",
                constants::ERR_ACCOUNT_PASSWORD
            ))),
        ),
        Some(_) => (encode_strings(&[ACCOUNT_ACCEPTED]), Ok(name.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_roundtrip() {
        let token = HandshakeToken::random();
        let header = ControlHeader {
            command: command::READ_BYTES,
            user_code: 42,
            token,
            content_len: 10,
        };
        let bytes = header.encode();
        let parsed = ControlHeader::parse(&bytes).unwrap();
        assert_eq!(parsed.command, command::READ_BYTES);
        assert_eq!(parsed.user_code, 42);
        assert!(parsed.token.matches(&token));
        assert_eq!(parsed.content_len, 10);
        assert_eq!(ControlFrameRule.content_len(&bytes), 10);
    }

    #[test]
    fn test_token_parse_and_compare() {
        let token: HandshakeToken = "000102030405060708090a0b0c0d0e0f".parse().unwrap();
        assert_eq!(token.as_bytes()[0], 0x00);
        assert_eq!(token.as_bytes()[15], 0x0f);
        assert_eq!(token.to_string(), "000102030405060708090a0b0c0d0e0f");
        assert!("zz0102030405060708090a0b0c0d0e0f"
            .parse::<HandshakeToken>()
            .is_err());
        assert!("abcd".parse::<HandshakeToken>().is_err());

        let other = HandshakeToken::random();
        assert!(token.matches(&token));
        assert!(!token.matches(&other));
    }

    #[test]
    fn test_string_array_roundtrip() {
        let payload = encode_strings(&["operator", "secret", ""]);
        let strings = decode_strings(&payload).unwrap();
        assert_eq!(strings, vec!["operator", "secret", ""]);

        // truncated payloads are malformed, not panics
        assert!(decode_strings(&payload[..payload.len() - 1]).is_err());
        assert!(decode_strings(&[1, 0, 0]).is_err());
    }

    #[test]
    fn test_check_account() {
        let accounts = vec![("op".to_string(), "pw".to_string())];
        let (reply, verdict) = check_account(&encode_strings(&["op", "pw"]), &accounts);
        assert!(verdict.is_ok());
        assert_eq!(
            decode_strings(&reply).unwrap().first().map(String::as_str),
            Some(ACCOUNT_ACCEPTED)
        );

        let (_, verdict) = check_account(&encode_strings(&["op", "bad"]), &accounts);
        assert!(matches!(verdict, Err(LinkError::AuthFailed(_))));
        let (_, verdict) = check_account(&encode_strings(&["ghost", "pw"]), &accounts);
        assert!(matches!(verdict, Err(LinkError::AuthFailed(_))));
    }

    #[tokio::test]
    async fn test_send_confirm_and_receive_verify() {
        let (mut client, mut server) = tokio::io::duplex(256);
        let token = HandshakeToken::random();

        let server_task =
            tokio::spawn(async move { receive_and_verify(&mut server, &token, None).await });

        send_and_confirm(&mut client, command::PING, 7, &token, b"hello")
            .await
            .unwrap();

        let (cmd, user, payload) = server_task.await.unwrap().unwrap();
        assert_eq!(cmd, command::PING);
        assert_eq!(user, 7);
        assert_eq!(payload, b"hello");
    }

    #[tokio::test]
    async fn test_token_mismatch_rejected_before_payload() {
        let (mut client, mut server) = tokio::io::duplex(256);

        let server_task = tokio::spawn(async move {
            receive_and_verify(&mut server, &HandshakeToken::random(), None).await
        });

        // the client's send fails too: no echo ever arrives
        let client_res =
            send_and_confirm(&mut client, command::PING, 0, &HandshakeToken::random(), b"x").await;
        assert!(client_res.is_err());

        let server_res = server_task.await.unwrap();
        assert!(matches!(server_res, Err(LinkError::TokenMismatch)));
    }

    #[tokio::test]
    async fn test_echo_mismatch_detected() {
        let (mut client, mut server) = tokio::io::duplex(256);
        let token = HandshakeToken::random();

        let task = tokio::spawn(async move {
            // swallow the message, then confirm a wrong byte count
            let _ = channel::recv_exact(&mut server, HEADER_LEN + 3).await.unwrap();
            channel::send_all(&mut server, &echo_bytes(5)).await.unwrap();
        });

        let err = send_and_confirm(&mut client, command::PING, 0, &token, b"abc")
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            LinkError::EchoMismatch { sent: 31, echoed: 5 }
        ));
        task.await.unwrap();
    }
}
