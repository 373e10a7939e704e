//! # Virtual Device Server
//!
//! Accepts controller-client connections, verifies every frame's handshake
//! token, and serves the built-in register data commands against the
//! server's [`BankSet`], the backing memory of the emulated device.
//! Protocol-specific command codes are routed through the [`Dispatcher`].
//!
//! One accept loop per started server dispatches each new connection to its
//! own task; within a session, receives are strictly sequential and sends go
//! through the session's exclusive send lock. Session teardown runs exactly
//! once regardless of which path (remote close, error, broadcast close)
//! triggered it, because registry removal and socket close are both
//! idempotent.
//!
//! `close()` stops accepting and force-closes every tracked session;
//! `start()` may be called again afterwards.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use byteorder::{ByteOrder as _, LittleEndian as LE};
use tokio::net::tcp::OwnedReadHalf;
use tokio::net::{TcpListener, TcpSocket, TcpStream};
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument, warn};

use crate::config::ServerConfig;
use crate::core::memory::BankSet;
use crate::error::{constants, LinkError, Result};
use crate::protocol::dispatcher::Dispatcher;
use crate::protocol::handshake::{self, command, ControlFrameRule, ControlHeader, HandshakeToken};
use crate::transport::channel;
use crate::transport::frame::{self, MAX_CONTENT_LEN};
use crate::transport::session::{Session, SessionRegistry};
use crate::utils::metrics::Metrics;

/// State shared between the server handle, its accept loop, and every
/// session task.
struct ServerShared {
    config: ServerConfig,
    token: HandshakeToken,
    banks: BankSet,
    dispatcher: Dispatcher,
    registry: SessionRegistry,
    metrics: Metrics,
    next_session_id: AtomicU64,
}

/// Bookkeeping for one started listener.
struct AcceptHandle {
    local_addr: SocketAddr,
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

/// A virtual device server: listener lifecycle, session registry, register
/// memory, and command dispatch.
pub struct DeviceServer {
    shared: Arc<ServerShared>,
    accept: Mutex<Option<AcceptHandle>>,
}

impl DeviceServer {
    /// Build a server over the given register banks. The handshake token and
    /// credential policy come from `config`.
    pub fn new(config: ServerConfig, banks: BankSet) -> Result<Self> {
        let token = config.parse_token()?;
        Ok(Self {
            shared: Arc::new(ServerShared {
                config,
                token,
                banks,
                dispatcher: Dispatcher::new(),
                registry: SessionRegistry::new(),
                metrics: Metrics::new(),
                next_session_id: AtomicU64::new(0),
            }),
            accept: Mutex::new(None),
        })
    }

    /// The device's register memory.
    pub fn banks(&self) -> &BankSet {
        &self.shared.banks
    }

    /// Dispatcher for protocol-specific command codes. Codes colliding with
    /// the built-in data commands are never consulted.
    pub fn dispatcher(&self) -> &Dispatcher {
        &self.shared.dispatcher
    }

    pub fn metrics(&self) -> &Metrics {
        &self.shared.metrics
    }

    /// Live session count: a snapshot, not a guarantee.
    pub async fn session_count(&self) -> usize {
        self.shared.registry.count().await
    }

    /// The bound address of the running listener, if started.
    pub async fn local_addr(&self) -> Option<SocketAddr> {
        self.accept.lock().await.as_ref().map(|h| h.local_addr)
    }

    /// Bind and start accepting on `port`. Returns the bound address (useful
    /// with port 0). Fails if the server is already started.
    #[instrument(skip(self))]
    pub async fn start(&self, port: u16) -> Result<SocketAddr> {
        let mut accept = self.accept.lock().await;
        if accept.is_some() {
            return Err(LinkError::Custom("server is already started".into()));
        }

        let addr: SocketAddr = format!("{}:{}", self.shared.config.bind_address, port)
            .parse()
            .map_err(|e| LinkError::ConfigError(format!("invalid bind address: {e}")))?;

        let socket = if addr.is_ipv4() {
            TcpSocket::new_v4()?
        } else {
            TcpSocket::new_v6()?
        };
        socket.set_reuseaddr(true)?;
        socket.bind(addr)?;
        let listener = socket.listen(self.shared.config.backlog)?;
        let local_addr = listener.local_addr()?;
        info!(address = %local_addr, backlog = self.shared.config.backlog, "device server listening");

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let shared = Arc::clone(&self.shared);
        let task = tokio::spawn(accept_loop(shared, listener, shutdown_rx));

        *accept = Some(AcceptHandle {
            local_addr,
            shutdown: shutdown_tx,
            task,
        });
        Ok(local_addr)
    }

    /// Stop accepting and force-close every tracked session. A server that
    /// was never started is left untouched; `start()` works again afterwards.
    #[instrument(skip(self))]
    pub async fn close(&self) {
        let handle = self.accept.lock().await.take();
        if let Some(handle) = handle {
            let _ = handle.shutdown.send(true);
            if handle.task.await.is_err() {
                warn!("accept loop ended abnormally");
            }
            self.shared.registry.close_all().await;
            info!(address = %handle.local_addr, "device server closed");
        }
    }
}

async fn accept_loop(
    shared: Arc<ServerShared>,
    listener: TcpListener,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            _ = shutdown.changed() => {
                debug!("accept loop stopping");
                return;
            }
            accepted = listener.accept() => {
                match accepted {
                    Ok((stream, peer)) => {
                        if shared.registry.count().await >= shared.config.max_sessions {
                            warn!(%peer, "session limit reached, refusing connection");
                            drop(stream);
                            continue;
                        }
                        let shared = Arc::clone(&shared);
                        tokio::spawn(async move {
                            serve_connection(shared, stream, peer).await;
                        });
                    }
                    Err(e) => {
                        // transient accept failures (EMFILE etc.) must not
                        // kill the loop
                        error!(error = %e, "error accepting connection");
                    }
                }
            }
        }
    }
}

async fn serve_connection(shared: Arc<ServerShared>, stream: TcpStream, peer: SocketAddr) {
    let _ = stream.set_nodelay(true);
    let id = shared.next_session_id.fetch_add(1, Ordering::Relaxed) + 1;
    let (mut reader, writer) = stream.into_split();
    let session = Arc::new(Session::new(id, peer, writer));

    shared.metrics.session_opened();
    info!(session = id, %peer, "session accepted");

    let result = drive_session(&shared, &mut reader, &session).await;

    shared.registry.remove(id).await;
    session.close().await;
    shared.metrics.session_closed();

    match result {
        Ok(()) => debug!(session = id, %peer, "session finished"),
        Err(e) if e.is_disconnect() => {
            shared.metrics.transport_error();
            debug!(session = id, %peer, "session disconnected");
        }
        Err(e) => {
            shared.metrics.protocol_error();
            warn!(session = id, %peer, error = %e, "session ended with failure");
        }
    }
}

async fn drive_session(
    shared: &ServerShared,
    reader: &mut OwnedReadHalf,
    session: &Arc<Session>,
) -> Result<()> {
    let deadline = shared.config.receive_deadline();

    // Credential gate: exactly one account exchange before any other traffic.
    if shared.config.check_credentials {
        let (header, payload) = recv_request(shared, reader, session, deadline).await?;
        if header.command != command::ACCOUNT {
            shared.metrics.auth_failure();
            return Err(LinkError::AuthFailed(
                constants::ERR_ACCOUNT_EXPECTED.into(),
            ));
        }
        let accounts = shared.config.account_pairs();
        let (reply, verdict) = handshake::check_account(&payload, &accounts);
        send_reply(
            shared,
            session,
            reader,
            command::ACCOUNT,
            header.user_code,
            &reply,
            deadline,
        )
        .await?;
        match verdict {
            Ok(name) => {
                shared.metrics.auth_success();
                info!(session = session.id(), account = %name, "account accepted");
            }
            Err(e) => {
                shared.metrics.auth_failure();
                return Err(e);
            }
        }
    }

    shared.registry.add(Arc::clone(session)).await;

    loop {
        let (header, payload) = tokio::select! {
            res = recv_request(shared, reader, session, deadline) => res?,
            _ = session.closed() => return Ok(()),
        };

        let (reply_command, reply_payload) =
            match handle_command(shared, header.command, &payload) {
                Ok(reply) => reply,
                Err(e) => {
                    debug!(
                        session = session.id(),
                        command = header.command,
                        error = %e,
                        "request failed"
                    );
                    (command::ERROR, e.to_string().into_bytes())
                }
            };

        send_reply(
            shared,
            session,
            reader,
            reply_command,
            header.user_code,
            &reply_payload,
            deadline,
        )
        .await?;
    }
}

/// Read one request frame, verify its token, and echo the received length.
async fn recv_request(
    shared: &ServerShared,
    reader: &mut OwnedReadHalf,
    session: &Session,
    deadline: Option<Duration>,
) -> Result<(ControlHeader, Vec<u8>)> {
    let frame = frame::read_frame(reader, &ControlFrameRule, deadline).await.map_err(|e| {
        if matches!(e, LinkError::Timeout) {
            shared.metrics.watchdog_expiry();
        }
        e
    })?;
    shared.metrics.frame_received(frame.as_bytes().len() as u64);

    let header = match handshake::verify_frame(&frame, &shared.token) {
        Ok(header) => header,
        Err(e) => {
            shared.metrics.token_reject();
            return Err(e);
        }
    };

    session
        .send(&handshake::echo_bytes(frame.as_bytes().len() as u64))
        .await?;
    Ok((header, frame.content().to_vec()))
}

/// Send one reply frame and wait for the client's length echo.
async fn send_reply(
    shared: &ServerShared,
    session: &Session,
    reader: &mut OwnedReadHalf,
    reply_command: u32,
    user_code: u32,
    payload: &[u8],
    deadline: Option<Duration>,
) -> Result<()> {
    let message = handshake::build_message(reply_command, user_code, &shared.token, payload);
    session.send(&message).await?;
    shared.metrics.frame_sent(message.len() as u64);

    let echo = channel::recv_exact_deadline(reader, handshake::ECHO_LEN, deadline).await?;
    let echoed = LE::read_u64(&echo);
    let sent = message.len() as u64;
    if echoed != sent {
        return Err(LinkError::EchoMismatch { sent, echoed });
    }
    Ok(())
}

/// Serve one decoded request: built-in data commands against the banks,
/// anything else through the dispatcher.
fn handle_command(
    shared: &ServerShared,
    cmd: u32,
    payload: &[u8],
) -> Result<(u32, Vec<u8>)> {
    match cmd {
        command::READ_BYTES => {
            let (bank, offset, len) = parse_range_request(payload)?;
            if len as usize > MAX_CONTENT_LEN {
                return Err(LinkError::MalformedFrame(format!(
                    "read of {len} bytes exceeds the frame limit"
                )));
            }
            let bank = lookup_bank(shared, bank)?;
            shared.metrics.register_read();
            Ok((cmd, bank.get_bytes(offset as usize, len as usize)))
        }
        command::WRITE_BYTES => {
            if payload.len() < 6 {
                return Err(LinkError::MalformedFrame(
                    "write request shorter than its fixed fields".into(),
                ));
            }
            let bank = lookup_bank(shared, LE::read_u16(&payload[0..2]))?;
            let offset = LE::read_u32(&payload[2..6]);
            // overruns clip silently: a virtual device never faults on a
            // client's out-of-range write
            bank.set_bytes(offset as usize, &payload[6..]);
            shared.metrics.register_write();
            Ok((cmd, Vec::new()))
        }
        command::READ_BITS => {
            let (bank, index, count) = parse_range_request(payload)?;
            if count as usize > MAX_CONTENT_LEN {
                return Err(LinkError::MalformedFrame(format!(
                    "read of {count} bits exceeds the frame limit"
                )));
            }
            let bank = lookup_bank(shared, bank)?;
            shared.metrics.register_read();
            let bits = bank.get_bits(index as usize, count as usize);
            Ok((cmd, bits.into_iter().map(u8::from).collect()))
        }
        command::WRITE_BIT => {
            if payload.len() < 7 {
                return Err(LinkError::MalformedFrame(
                    "bit write shorter than its fixed fields".into(),
                ));
            }
            let bank = lookup_bank(shared, LE::read_u16(&payload[0..2]))?;
            let index = LE::read_u32(&payload[2..6]);
            bank.set_bit(index as usize, payload[6] != 0);
            shared.metrics.register_write();
            Ok((cmd, Vec::new()))
        }
        command::SNAPSHOT => Ok((cmd, shared.banks.snapshot())),
        command::RESTORE => {
            shared.banks.restore(payload)?;
            Ok((cmd, Vec::new()))
        }
        command::PING => Ok((cmd, payload.to_vec())),
        other => shared
            .dispatcher
            .dispatch(other, payload)
            .map(|reply| (other, reply)),
    }
}

/// Decode the common `[bank u16][start u32][count u32]` request layout.
fn parse_range_request(payload: &[u8]) -> Result<(u16, u32, u32)> {
    if payload.len() < 10 {
        return Err(LinkError::MalformedFrame(
            "range request shorter than its fixed fields".into(),
        ));
    }
    Ok((
        LE::read_u16(&payload[0..2]),
        LE::read_u32(&payload[2..6]),
        LE::read_u32(&payload[6..10]),
    ))
}

fn lookup_bank(shared: &ServerShared, index: u16) -> Result<&crate::core::memory::MemoryBank> {
    shared
        .banks
        .get(index as usize)
        .ok_or_else(|| LinkError::Custom(format!("unknown register bank {index}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::memory::MemoryBank;

    fn test_shared() -> ServerShared {
        let mut banks = BankSet::new();
        banks.add_bank("data", MemoryBank::new(64));
        ServerShared {
            config: ServerConfig::default(),
            token: HandshakeToken::default(),
            banks,
            dispatcher: Dispatcher::new(),
            registry: SessionRegistry::new(),
            metrics: Metrics::new(),
            next_session_id: AtomicU64::new(0),
        }
    }

    fn range_request(bank: u16, start: u32, count: u32) -> Vec<u8> {
        let mut req = vec![0u8; 10];
        LE::write_u16(&mut req[0..2], bank);
        LE::write_u32(&mut req[2..6], start);
        LE::write_u32(&mut req[6..10], count);
        req
    }

    #[test]
    fn test_write_then_read_bytes() {
        let shared = test_shared();

        let mut write = vec![0u8; 6];
        LE::write_u16(&mut write[0..2], 0);
        LE::write_u32(&mut write[2..6], 4);
        write.extend_from_slice(&[9, 8, 7]);
        let (cmd, reply) = handle_command(&shared, command::WRITE_BYTES, &write).unwrap();
        assert_eq!(cmd, command::WRITE_BYTES);
        assert!(reply.is_empty());

        let (_, reply) =
            handle_command(&shared, command::READ_BYTES, &range_request(0, 4, 3)).unwrap();
        assert_eq!(reply, vec![9, 8, 7]);
    }

    #[test]
    fn test_bit_commands() {
        let shared = test_shared();

        let mut write = vec![0u8; 7];
        LE::write_u16(&mut write[0..2], 0);
        LE::write_u32(&mut write[2..6], 11);
        write[6] = 1;
        handle_command(&shared, command::WRITE_BIT, &write).unwrap();

        let (_, reply) =
            handle_command(&shared, command::READ_BITS, &range_request(0, 10, 3)).unwrap();
        assert_eq!(reply, vec![0, 1, 0]);
    }

    #[test]
    fn test_unknown_bank_and_short_request() {
        let shared = test_shared();
        assert!(handle_command(&shared, command::READ_BYTES, &range_request(5, 0, 1)).is_err());
        assert!(handle_command(&shared, command::READ_BYTES, &[1, 2]).is_err());
    }

    #[test]
    fn test_snapshot_restore_roundtrip() {
        let shared = test_shared();
        shared.banks.get(0).unwrap().set_bytes(0, &[1, 2, 3]);

        let (_, dump) = handle_command(&shared, command::SNAPSHOT, &[]).unwrap();
        shared.banks.get(0).unwrap().set_bytes(0, &[0, 0, 0]);

        handle_command(&shared, command::RESTORE, &dump).unwrap();
        assert_eq!(shared.banks.get(0).unwrap().get_bytes(0, 3), vec![1, 2, 3]);

        // short dumps are rejected outright
        assert!(handle_command(&shared, command::RESTORE, &dump[..10]).is_err());
    }

    #[test]
    fn test_custom_command_through_dispatcher() {
        let shared = test_shared();
        shared
            .dispatcher
            .register(0x0100, |payload| Ok(payload.to_vec()))
            .unwrap();
        let (cmd, reply) = handle_command(&shared, 0x0100, &[42]).unwrap();
        assert_eq!(cmd, 0x0100);
        assert_eq!(reply, vec![42]);
        assert!(handle_command(&shared, 0x0101, &[]).is_err());
    }
}
