//! # I/O Channel
//!
//! Connect-with-deadline plus exact-count send/receive primitives. Large
//! transfers are chunked automatically by the partial-completion loops: each
//! completed partial read/write advances an offset, and the operation only
//! finishes when the full count is moved or an error surfaces.
//!
//! The primitives are generic over `AsyncRead`/`AsyncWrite`, so TCP streams,
//! serial ports and in-memory test pipes share one implementation. A
//! zero-byte read means the remote closed the connection and is reported as
//! the distinct [`LinkError::ConnectionClosed`] kind.

use std::net::SocketAddr;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::{TcpStream, UdpSocket};
use tracing::{debug, instrument, warn};

use crate::error::{LinkError, Result};
use crate::transport::watchdog;

/// Open a TCP connection, racing an armed watchdog against the connect.
///
/// If the deadline elapses first the corrective callback fires once, the
/// pending connect is dropped, and [`LinkError::Timeout`] is returned,
/// distinct from a transport-level connect failure. `None` blocks forever.
#[instrument]
pub async fn connect(addr: SocketAddr, deadline: Option<Duration>) -> Result<TcpStream> {
    let guard = watchdog::arm(deadline, move || {
        warn!(%addr, "connect deadline expired, abandoning attempt");
    });

    tokio::select! {
        res = TcpStream::connect(addr) => {
            guard.complete();
            match res {
                Ok(stream) => {
                    debug!(%addr, "connected");
                    Ok(stream)
                }
                Err(e) => Err(LinkError::ConnectFailed(format!("{addr}: {e}"))),
            }
        }
        _ = guard.expired() => Err(LinkError::Timeout),
    }
}

/// Write all of `bytes`, advancing an offset across partial completions.
///
/// A zero-length completion or an error closes the stream before the error
/// is returned, so the caller never needs to close twice. No retries.
pub async fn send_all<S>(stream: &mut S, bytes: &[u8]) -> Result<()>
where
    S: AsyncWrite + Unpin,
{
    let mut offset = 0;
    while offset < bytes.len() {
        match stream.write(&bytes[offset..]).await {
            Ok(0) => {
                let _ = stream.shutdown().await;
                return Err(LinkError::ConnectionClosed);
            }
            Ok(n) => offset += n,
            Err(e) => {
                let _ = stream.shutdown().await;
                return Err(LinkError::Io(e));
            }
        }
    }
    if let Err(e) = stream.flush().await {
        let _ = stream.shutdown().await;
        return Err(LinkError::Io(e));
    }
    Ok(())
}

/// Accumulate exactly `len` bytes across partial reads.
///
/// `len == 0` returns an empty buffer immediately without touching the
/// stream. A zero-byte read reports the remote close as its own error kind.
/// The read side of a stream has nothing to shut down; the caller owns the
/// socket lifecycle and closes it on error.
pub async fn recv_exact<S>(stream: &mut S, len: usize) -> Result<Vec<u8>>
where
    S: AsyncRead + Unpin,
{
    if len == 0 {
        return Ok(Vec::new());
    }
    let mut buf = vec![0u8; len];
    let mut filled = 0;
    while filled < len {
        match stream.read(&mut buf[filled..]).await {
            Ok(0) => return Err(LinkError::ConnectionClosed),
            Ok(n) => filled += n,
            Err(e) => return Err(LinkError::Io(e)),
        }
    }
    Ok(buf)
}

/// Receive exactly `len` bytes under a watchdog deadline.
///
/// On expiry the corrective callback fires once and [`LinkError::Timeout`]
/// is returned; the caller closes the socket, which is what unblocks any
/// transport-level state left behind.
pub async fn recv_exact_deadline<S>(
    stream: &mut S,
    len: usize,
    deadline: Option<Duration>,
) -> Result<Vec<u8>>
where
    S: AsyncRead + Unpin,
{
    let guard = watchdog::arm(deadline, move || {
        warn!(len, "receive deadline expired");
    });
    tokio::select! {
        res = recv_exact(stream, len) => {
            guard.complete();
            res
        }
        _ = guard.expired() => Err(LinkError::Timeout),
    }
}

/// One datagram request/reply exchange for UDP-style devices.
///
/// Sends `request` as a single datagram and waits for one reply of at most
/// `max_reply` bytes, under the usual deadline semantics.
pub async fn exchange_udp(
    socket: &UdpSocket,
    request: &[u8],
    max_reply: usize,
    deadline: Option<Duration>,
) -> Result<Vec<u8>> {
    socket.send(request).await?;
    let guard = watchdog::arm(deadline, || {
        warn!("udp reply deadline expired");
    });
    let mut buf = vec![0u8; max_reply];
    tokio::select! {
        res = socket.recv(&mut buf) => {
            guard.complete();
            let n = res?;
            buf.truncate(n);
            Ok(buf)
        }
        _ = guard.expired() => Err(LinkError::Timeout),
    }
}

/// Open a serial port usable with the same send/receive/frame primitives.
#[cfg(feature = "serial")]
pub fn open_serial(path: &str, baud_rate: u32) -> Result<tokio_serial::SerialStream> {
    use tokio_serial::SerialPortBuilderExt;
    tokio_serial::new(path, baud_rate)
        .open_native_async()
        .map_err(|e| LinkError::ConnectFailed(format!("{path}: {e}")))
}
