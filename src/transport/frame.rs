//! # Frame Resolution
//!
//! Resolves one complete application message from a stream using a
//! two-phase read: a fixed-size header first, then exactly as many content
//! bytes as a pluggable [`FrameRule`] extracts from that header. Every
//! protocol family (Modbus, Melsec, Siemens, …) supplies its own rule; the
//! engine never inspects header semantics beyond this contract.
//!
//! No partial frame ever reaches the caller: any receive failure aborts the
//! whole frame read.

use std::time::Duration;

use bytes::{Bytes, BytesMut};
use tokio::io::AsyncRead;
use tracing::trace;

use crate::error::{constants, LinkError, Result};
use crate::transport::channel;

/// Upper bound on a resolved content length. A header resolving beyond this
/// is treated as malformed rather than allocated (16 MiB).
pub const MAX_CONTENT_LEN: usize = 16 * 1024 * 1024;

/// Per-protocol framing contract: a fixed header size and a function from
/// the completed header to the content length it encodes.
pub trait FrameRule: Send + Sync {
    /// Number of bytes in the fixed-size header.
    fn header_len(&self) -> usize;

    /// Content length encoded in a completed header. The header slice is
    /// always exactly `header_len` bytes. Zero or negative means the message
    /// has no content phase.
    fn content_len(&self, header: &[u8]) -> i64;
}

/// One complete message: header and content in a single contiguous buffer.
#[derive(Debug, Clone)]
pub struct Frame {
    bytes: Bytes,
    header_len: usize,
}

impl Frame {
    pub fn header(&self) -> &[u8] {
        &self.bytes[..self.header_len]
    }

    pub fn content(&self) -> &[u8] {
        &self.bytes[self.header_len..]
    }

    pub fn content_len(&self) -> usize {
        self.bytes.len() - self.header_len
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn into_bytes(self) -> Bytes {
        self.bytes
    }
}

/// Read one frame from `stream` according to `rule`.
///
/// The header phase and the content phase are guarded independently by the
/// same `deadline`: the header watchdog is released as soon as that phase
/// ends (success or failure), so a slow header is penalized while a slow
/// content phase is governed by its own timer. The content length is never
/// interpreted before the header is fully received, and a rule resolving
/// `<= 0` yields a header-only frame without a second receive.
pub async fn read_frame<S, R>(stream: &mut S, rule: &R, deadline: Option<Duration>) -> Result<Frame>
where
    S: AsyncRead + Unpin,
    R: FrameRule + ?Sized,
{
    let header_len = rule.header_len();
    let header = channel::recv_exact_deadline(stream, header_len, deadline).await?;

    let content_len = rule.content_len(&header);
    if content_len <= 0 {
        trace!(header_len, "header-only frame");
        return Ok(Frame {
            bytes: Bytes::from(header),
            header_len,
        });
    }
    if content_len as u64 > MAX_CONTENT_LEN as u64 {
        return Err(LinkError::MalformedFrame(format!(
            "{}: {content_len}",
            constants::ERR_CONTENT_TOO_LARGE
        )));
    }

    let content = channel::recv_exact_deadline(stream, content_len as usize, deadline).await?;

    let mut bytes = BytesMut::with_capacity(header_len + content.len());
    bytes.extend_from_slice(&header);
    bytes.extend_from_slice(&content);
    trace!(header_len, content_len, "frame resolved");
    Ok(Frame {
        bytes: bytes.freeze(),
        header_len,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::pin::Pin;
    use std::task::{Context, Poll};

    /// Rule with a 4-byte header whose last two bytes are a big-endian
    /// content length.
    struct TestRule;

    impl FrameRule for TestRule {
        fn header_len(&self) -> usize {
            4
        }

        fn content_len(&self, header: &[u8]) -> i64 {
            i64::from(u16::from_be_bytes([header[2], header[3]]))
        }
    }

    /// Stream that serves a fixed script and panics on reads past the end,
    /// proving `read_frame` performs no second receive for empty content.
    struct ScriptedStream {
        data: Vec<u8>,
        pos: usize,
    }

    impl AsyncRead for ScriptedStream {
        fn poll_read(
            mut self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
            buf: &mut tokio::io::ReadBuf<'_>,
        ) -> Poll<std::io::Result<()>> {
            if self.pos >= self.data.len() {
                panic!("read past scripted data");
            }
            let n = buf.remaining().min(self.data.len() - self.pos);
            let pos = self.pos;
            buf.put_slice(&self.data[pos..pos + n]);
            self.pos += n;
            Poll::Ready(Ok(()))
        }
    }

    #[tokio::test]
    async fn test_header_plus_content() {
        let mut stream = ScriptedStream {
            data: vec![0xAA, 0xBB, 0x00, 0x03, 1, 2, 3],
            pos: 0,
        };
        let frame = read_frame(&mut stream, &TestRule, None).await.unwrap();
        assert_eq!(frame.header(), &[0xAA, 0xBB, 0x00, 0x03]);
        assert_eq!(frame.content(), &[1, 2, 3]);
        assert_eq!(frame.as_bytes().len(), 7);
    }

    #[tokio::test]
    async fn test_zero_content_skips_second_receive() {
        // scripted data holds the header only: a second read would panic
        let mut stream = ScriptedStream {
            data: vec![0xAA, 0xBB, 0x00, 0x00],
            pos: 0,
        };
        let frame = read_frame(&mut stream, &TestRule, None).await.unwrap();
        assert_eq!(frame.content_len(), 0);
        assert_eq!(frame.header(), frame.as_bytes());
    }

    #[tokio::test]
    async fn test_negative_content_yields_header_only() {
        struct NegativeRule;
        impl FrameRule for NegativeRule {
            fn header_len(&self) -> usize {
                2
            }
            fn content_len(&self, _header: &[u8]) -> i64 {
                -5
            }
        }
        let mut stream = ScriptedStream {
            data: vec![1, 2],
            pos: 0,
        };
        let frame = read_frame(&mut stream, &NegativeRule, None).await.unwrap();
        assert_eq!(frame.as_bytes(), &[1, 2][..]);
    }

    #[tokio::test]
    async fn test_oversized_content_is_malformed() {
        struct HugeRule;
        impl FrameRule for HugeRule {
            fn header_len(&self) -> usize {
                2
            }
            fn content_len(&self, _header: &[u8]) -> i64 {
                MAX_CONTENT_LEN as i64 + 1
            }
        }
        let mut stream = ScriptedStream {
            data: vec![1, 2],
            pos: 0,
        };
        let err = read_frame(&mut stream, &HugeRule, None).await.unwrap_err();
        assert!(matches!(err, LinkError::MalformedFrame(_)));
    }

    #[tokio::test]
    async fn test_failure_mid_content_aborts_frame() {
        let (mut a, b) = tokio::io::duplex(16);
        // write a header promising 10 content bytes, deliver 2, then close
        {
            use tokio::io::AsyncWriteExt;
            let mut b = b;
            b.write_all(&[0, 0, 0, 10, 1, 2]).await.unwrap();
        }
        let err = read_frame(&mut a, &TestRule, None).await.unwrap_err();
        assert!(matches!(err, LinkError::ConnectionClosed));
    }
}
