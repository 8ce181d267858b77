//! The serving peer: handshake, producer and control path.
//!
//! # Architecture
//!
//! ```text
//!   source (AsyncRead)
//!        │ read block_size bytes
//!        ▼
//!   produce task ──append (waits while full)──▶ SendWindow ◀── on_ack / on_timeout ── control_loop
//!        │                                                                               │  ▲
//!        └──────────── DATA ────────────────▶ Socket ◀──── DATA (retransmit) ───────────┘  │
//!                                               │                                          │
//!                                               └────────────── ACK ───────────────────────┘
//! ```
//!
//! The producer runs as its own tokio task; the control path runs on the
//! caller's task.  They share only the [`SendWindow`] monitor and the socket.
//! Once the window is drained (end-of-file marked and every block
//! acknowledged) the control path ends and the sender announces the end of
//! the session with FIN.

use std::net::SocketAddr;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::time::{timeout, timeout_at, Instant};

use crate::config::{validate_block_size, SenderConfig};
use crate::connection::{self, ConnError, SessionRequest};
use crate::gbn_sender::{block_count, AckAction};
use crate::packet::{Block, Packet, ReplyStatus};
use crate::socket::Socket;
use crate::window::SendWindow;

// ---------------------------------------------------------------------------
// Reports
// ---------------------------------------------------------------------------

/// Summary of one served transfer.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransferReport {
    pub file_name: String,
    pub bytes: u64,
    pub blocks: u32,
    /// DATA datagrams sent again after their first transmission.
    pub retransmitted: u64,
    /// Retransmission timeouts that resent at least one block.
    pub timeouts: u64,
    /// ACKs classified as duplicates (`head - 1`).
    pub duplicate_acks: u64,
    /// Full-window retransmissions caused by a second duplicate ACK.
    pub fast_retransmits: u64,
    /// Largest number of blocks simultaneously in flight.
    pub max_in_flight: usize,
    /// Whether the receiver confirmed the FIN.
    pub fin_acknowledged: bool,
}

#[derive(Debug, Default)]
struct ControlStats {
    retransmitted: u64,
    timeouts: u64,
    duplicate_acks: u64,
    fast_retransmits: u64,
}

// ---------------------------------------------------------------------------
// Serving one session
// ---------------------------------------------------------------------------

/// Wait for one request on `socket`, then serve it.
///
/// A request for a missing file is answered with status -1 and ends in
/// [`ConnError::FileNotFound`]; unusable block sizes get status -2 and
/// [`ConnError::InvalidRequest`].
pub async fn serve(socket: Socket, config: &SenderConfig) -> Result<TransferReport, ConnError> {
    config.validate()?;
    let socket = Arc::new(socket);
    let request = connection::await_request(&socket).await?;
    serve_request(socket, request, config).await
}

/// Serve an already received request.
///
/// An invalid `config` is reported before anything is sent to the peer.
pub async fn serve_request(
    socket: Arc<Socket>,
    request: SessionRequest,
    config: &SenderConfig,
) -> Result<TransferReport, ConnError> {
    config.validate()?;
    let SessionRequest {
        peer,
        file_name,
        block_size,
    } = request;

    if let Err(reason) = validate_block_size(block_size) {
        log::warn!("[handshake] rejecting request for {file_name:?}: {reason}");
        let reply = connection::reply_packet(ReplyStatus::Rejected, 0);
        socket.send_to(&reply, peer).await?;
        return Err(ConnError::InvalidRequest(reason));
    }

    let Some((file, file_size)) = open_requested(&config.root, &file_name).await? else {
        log::warn!("[handshake] file {file_name:?} does not exist");
        let reply = connection::reply_packet(ReplyStatus::NotFound, 0);
        socket.send_to(&reply, peer).await?;
        return Err(ConnError::FileNotFound(file_name));
    };

    let reply = connection::reply_packet(ReplyStatus::Ok, file_size);
    socket.send_to(&reply, peer).await?;
    log::info!("[handshake] serving {file_name:?} ({file_size} bytes) to {peer}");

    let session = SenderSession::new(socket, peer, config)?.with_reply(reply);
    let mut report = session.transfer(file, file_size, block_size).await?;
    report.file_name = file_name;
    Ok(report)
}

/// Resolve `name` under `root` and open it.
///
/// Returns `Ok(None)` when there is no regular file by that name, including
/// names that try to leave `root`.
async fn open_requested(
    root: &Path,
    name: &str,
) -> Result<Option<(tokio::fs::File, u64)>, ConnError> {
    let Some(path) = resolve(root, name) else {
        return Ok(None);
    };
    let file = match tokio::fs::File::open(&path).await {
        Ok(f) => f,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    let meta = file.metadata().await?;
    if !meta.is_file() {
        return Ok(None);
    }
    Ok(Some((file, meta.len())))
}

fn resolve(root: &Path, name: &str) -> Option<PathBuf> {
    let relative = Path::new(name);
    let plain = relative
        .components()
        .all(|c| matches!(c, Component::Normal(_) | Component::CurDir));
    if name.is_empty() || !plain {
        return None;
    }
    Some(root.join(relative))
}

// ---------------------------------------------------------------------------
// SenderSession
// ---------------------------------------------------------------------------

/// One outbound transfer to a single peer.
pub struct SenderSession {
    socket: Arc<Socket>,
    peer: SocketAddr,
    window: Arc<SendWindow>,
    timeout: Duration,
    fin_retries: u32,
    /// Re-sent whenever the peer repeats its REQUEST.
    reply: Option<Packet>,
}

impl SenderSession {
    pub fn new(
        socket: Arc<Socket>,
        peer: SocketAddr,
        config: &SenderConfig,
    ) -> Result<Self, ConnError> {
        config.validate()?;
        Ok(Self {
            socket,
            peer,
            window: Arc::new(SendWindow::new(config.window_size)),
            timeout: config.timeout,
            fin_retries: config.fin_retries,
            reply: None,
        })
    }

    /// Answer duplicate REQUESTs from the peer with `reply`.
    pub fn with_reply(mut self, reply: Packet) -> Self {
        self.reply = Some(reply);
        self
    }

    /// Send `file_size` bytes from `source` in blocks of `block_size`.
    ///
    /// Returns once every block has been acknowledged and the FIN exchange
    /// has completed or given up.
    pub async fn transfer<R>(
        self,
        source: R,
        file_size: u64,
        block_size: u32,
    ) -> Result<TransferReport, ConnError>
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        let total = block_count(file_size, block_size).ok_or(ConnError::FileTooLarge {
            size: file_size,
            block_size,
        })?;
        if total == 0 {
            self.window.mark_eof();
        }

        let producer = tokio::spawn(produce(
            Arc::clone(&self.socket),
            self.peer,
            Arc::clone(&self.window),
            source,
            file_size,
            block_size,
            total,
        ));
        let abort = producer.abort_handle();

        let mut stats = ControlStats::default();
        let joined = tokio::try_join!(async { producer.await? }, self.control_loop(&mut stats));
        let bytes = match joined {
            Ok((bytes, ())) => bytes,
            Err(e) => {
                abort.abort();
                return Err(e);
            }
        };

        let fin_acknowledged = self.finish(total).await?;
        let report = TransferReport {
            file_name: String::new(),
            bytes,
            blocks: total,
            retransmitted: stats.retransmitted,
            timeouts: stats.timeouts,
            duplicate_acks: stats.duplicate_acks,
            fast_retransmits: stats.fast_retransmits,
            max_in_flight: self.window.high_water(),
            fin_acknowledged,
        };
        log::info!(
            "[gbn:ctl] transfer complete: {} bytes in {} blocks, {} retransmitted, {} timeouts",
            report.bytes,
            report.blocks,
            report.retransmitted,
            report.timeouts
        );
        Ok(report)
    }

    /// Consume ACKs and timeouts until the window is drained.
    async fn control_loop(&self, stats: &mut ControlStats) -> Result<(), ConnError> {
        while !self.window.is_drained() {
            match timeout(self.timeout, self.socket.recv_from()).await {
                Err(_elapsed) => {
                    let resend = self.window.on_timeout();
                    if !resend.is_empty() {
                        stats.timeouts += 1;
                        log::debug!("[gbn:ctl] timeout — retransmitting {} block(s)", resend.len());
                        self.send_blocks(&resend, stats).await?;
                    }
                }
                Ok(Err(e)) if e.is_transient() => {
                    log::debug!("[gbn:ctl] dropping datagram: {e}");
                }
                Ok(Err(e)) => return Err(e.into()),
                Ok(Ok((pkt, addr))) if addr != self.peer => {
                    log::debug!("[gbn:ctl] ignoring {} from stranger {addr}", pkt.kind());
                }
                Ok(Ok((Packet::Ack { ack }, _))) => self.on_ack(ack, stats).await?,
                Ok(Ok((Packet::Request { .. }, _))) => {
                    if let Some(reply) = &self.reply {
                        log::debug!("[gbn:ctl] duplicate REQUEST; re-sending REPLY");
                        self.socket.send_to(reply, self.peer).await?;
                    }
                }
                Ok(Ok((pkt, _))) => {
                    log::debug!("[gbn:ctl] ignoring {}", pkt.kind());
                }
            }
        }
        Ok(())
    }

    async fn on_ack(&self, ack: u32, stats: &mut ControlStats) -> Result<(), ConnError> {
        let outcome = self.window.on_ack(ack);
        match outcome.action {
            AckAction::Slide(n) => {
                log::debug!("[gbn:ctl] ← ACK {ack} slid={n} in_flight={}", outcome.in_flight);
            }
            AckAction::Suspect => {
                stats.duplicate_acks += 1;
                log::debug!("[gbn:ctl] ← ACK {ack} duplicate; suspecting loss");
            }
            AckAction::Retransmit => {
                stats.duplicate_acks += 1;
                stats.fast_retransmits += 1;
                log::debug!(
                    "[gbn:ctl] ← ACK {ack} duplicate again — retransmitting {} block(s)",
                    outcome.resend.len()
                );
                self.send_blocks(&outcome.resend, stats).await?;
            }
            AckAction::Ignore if outcome.in_flight == 0 => {
                log::debug!("[gbn:ctl] ← ACK {ack} with nothing in flight; ignored");
            }
            AckAction::Ignore => {
                log::debug!("[gbn:ctl] ← ACK {ack} stale; ignored");
            }
        }
        Ok(())
    }

    async fn send_blocks(&self, blocks: &[Block], stats: &mut ControlStats) -> Result<(), ConnError> {
        for block in blocks {
            self.socket
                .send_to(&Packet::Data(block.clone()), self.peer)
                .await?;
            stats.retransmitted += 1;
        }
        Ok(())
    }

    /// Announce the end of the session and wait for its confirmation.
    async fn finish(&self, last_seq: u32) -> Result<bool, ConnError> {
        let fin = Packet::Fin { last_seq };
        for attempt in 1..=self.fin_retries {
            self.socket.send_to(&fin, self.peer).await?;
            log::debug!("[gbn:ctl] → FIN last_seq={last_seq} attempt={attempt}");

            let deadline = Instant::now() + self.timeout;
            loop {
                match timeout_at(deadline, self.socket.recv_from()).await {
                    Err(_elapsed) => break,
                    Ok(Err(e)) if e.is_transient() => {}
                    Ok(Err(e)) => return Err(e.into()),
                    Ok(Ok((Packet::FinAck { last_seq: n }, addr)))
                        if addr == self.peer && n == last_seq =>
                    {
                        log::debug!("[gbn:ctl] ← FIN-ACK — session closed");
                        return Ok(true);
                    }
                    Ok(Ok(_)) => {}
                }
            }
        }
        if self.fin_retries > 0 {
            log::warn!("[gbn:ctl] FIN not acknowledged; closing anyway");
        }
        Ok(false)
    }
}

// ---------------------------------------------------------------------------
// Producer task
// ---------------------------------------------------------------------------

/// Read `total` blocks from `source`, append each to the window and send it.
///
/// Returns the number of bytes read.
async fn produce<R>(
    socket: Arc<Socket>,
    peer: SocketAddr,
    window: Arc<SendWindow>,
    mut source: R,
    file_size: u64,
    block_size: u32,
    total: u32,
) -> Result<u64, ConnError>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    let mut remaining = file_size;
    for seq in 1..=total {
        let len = remaining.min(u64::from(block_size)) as usize;
        let mut payload = vec![0u8; len];
        source.read_exact(&mut payload).await?;
        remaining -= len as u64;

        let packet = Packet::Data(Block::new(seq, payload.clone()));
        let block = Block::new(seq, payload);
        if seq == total {
            window.append_last(block).await;
        } else {
            window.append(block).await;
        }
        socket.send_to(&packet, peer).await?;
        log::debug!("[gbn:tx] → DATA seq={seq} len={len} in_flight={}", window.len());
    }
    Ok(file_size - remaining)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolve_accepts_plain_names() {
        let root = Path::new("/srv/files");
        assert_eq!(resolve(root, "a.txt"), Some(root.join("a.txt")));
        assert_eq!(resolve(root, "dir/b.bin"), Some(root.join("dir/b.bin")));
    }

    #[tokio::test]
    async fn session_rejects_unusable_config() {
        let socket = Arc::new(Socket::bind("127.0.0.1:0".parse().unwrap()).await.unwrap());
        let peer = socket.local_addr;

        let zero_window = SenderConfig {
            window_size: 0,
            ..SenderConfig::default()
        };
        assert!(matches!(
            SenderSession::new(Arc::clone(&socket), peer, &zero_window),
            Err(ConnError::InvalidConfig(_))
        ));

        let zero_timeout = SenderConfig {
            timeout: Duration::ZERO,
            ..SenderConfig::default()
        };
        assert!(matches!(
            SenderSession::new(socket, peer, &zero_timeout),
            Err(ConnError::InvalidConfig(_))
        ));
    }

    #[test]
    fn resolve_refuses_escaping_names() {
        let root = Path::new("/srv/files");
        assert_eq!(resolve(root, ""), None);
        assert_eq!(resolve(root, "../etc/passwd"), None);
        assert_eq!(resolve(root, "/etc/passwd"), None);
        assert_eq!(resolve(root, "a/../../b"), None);
    }
}
