//! The fetching peer: handshake, assembler and deliverer.
//!
//! ```text
//!   Socket ── DATA ──▶ assemble task ── payload ──▶ mpsc ──▶ deliver ──▶ sink
//!     ▲                     │
//!     └──── ACK / FIN-ACK ──┘
//! ```
//!
//! The assembler runs as its own tokio task and never blocks on the sink:
//! accepted payloads go into an unbounded channel and the deliverer writes
//! them in order.  When the assembler stops (FIN confirmed, or the sender
//! went silent) it drops its end of the channel, which ends delivery.

use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio::time::timeout;

use crate::config::ReceiverConfig;
use crate::connection::{self, ConnError};
use crate::gbn_receiver::{Assembler, Verdict};
use crate::packet::Packet;
use crate::socket::Socket;

/// Summary of one fetched file.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReceiveReport {
    /// Size announced in the sender's REPLY.
    pub file_size: u64,
    /// Bytes written to the sink.
    pub bytes: u64,
    pub blocks_accepted: u64,
    /// DATA datagrams discarded as out of order or duplicate.
    pub datagrams_rejected: u64,
    /// Whether the session ended with a confirmed FIN rather than silence.
    pub fin_received: bool,
}

/// Fetch `remote_name` from `sender` and write its bytes to `sink`.
pub async fn fetch<W>(
    socket: Socket,
    sender: SocketAddr,
    remote_name: &str,
    sink: W,
    config: &ReceiverConfig,
) -> Result<ReceiveReport, ConnError>
where
    W: AsyncWrite + Unpin,
{
    config.validate()?;
    let file_size = connection::request_file(&socket, sender, remote_name, config).await?;
    log::info!("[handshake] {remote_name:?} is {file_size} bytes; receiving");

    ReceiverSession::new(Arc::new(socket), sender, config.idle_timeout)
        .receive(sink, file_size)
        .await
}

/// Like [`fetch`], writing to `local`.
///
/// The file is created only once the sender has accepted the request, so a
/// missing remote file leaves nothing behind.
pub async fn fetch_to_file(
    socket: Socket,
    sender: SocketAddr,
    remote_name: &str,
    local: &Path,
    config: &ReceiverConfig,
) -> Result<ReceiveReport, ConnError> {
    config.validate()?;
    let file_size = connection::request_file(&socket, sender, remote_name, config).await?;
    log::info!(
        "[handshake] {remote_name:?} is {file_size} bytes; writing to {}",
        local.display()
    );

    let file = tokio::fs::File::create(local).await?;
    ReceiverSession::new(Arc::new(socket), sender, config.idle_timeout)
        .receive(file, file_size)
        .await
}

/// One inbound transfer from a single sender.
pub struct ReceiverSession {
    socket: Arc<Socket>,
    peer: SocketAddr,
    idle_timeout: Duration,
}

struct AssembleOutcome {
    accepted: u64,
    rejected: u64,
    fin_received: bool,
}

impl ReceiverSession {
    pub fn new(socket: Arc<Socket>, peer: SocketAddr, idle_timeout: Duration) -> Self {
        Self {
            socket,
            peer,
            idle_timeout,
        }
    }

    /// Run the assembler and deliver `file_size` bytes to `sink`.
    ///
    /// Fails with [`ConnError::Truncated`] if the assembler stops before
    /// every byte has been delivered.
    pub async fn receive<W>(self, mut sink: W, file_size: u64) -> Result<ReceiveReport, ConnError>
    where
        W: AsyncWrite + Unpin,
    {
        let (tx, rx) = mpsc::unbounded_channel();
        let assembler = tokio::spawn(assemble(
            Arc::clone(&self.socket),
            self.peer,
            self.idle_timeout,
            tx,
        ));

        let delivered = match deliver(rx, &mut sink, file_size).await {
            Ok(n) => n,
            Err(e) => {
                assembler.abort();
                return Err(e);
            }
        };
        let outcome = assembler.await??;

        let report = ReceiveReport {
            file_size,
            bytes: delivered,
            blocks_accepted: outcome.accepted,
            datagrams_rejected: outcome.rejected,
            fin_received: outcome.fin_received,
        };
        log::info!(
            "[gbn:deliver] received {} bytes in {} blocks ({} datagrams discarded)",
            report.bytes,
            report.blocks_accepted,
            report.datagrams_rejected
        );
        Ok(report)
    }
}

/// Receive DATA from `peer` until a FIN is confirmed or the link goes idle.
async fn assemble(
    socket: Arc<Socket>,
    peer: SocketAddr,
    idle_timeout: Duration,
    tx: mpsc::UnboundedSender<Vec<u8>>,
) -> Result<AssembleOutcome, ConnError> {
    let mut state = Assembler::new();
    let mut fin_received = false;

    loop {
        let (pkt, addr) = match timeout(idle_timeout, socket.recv_from()).await {
            Err(_elapsed) => {
                log::warn!(
                    "[gbn:rx] no traffic for {idle_timeout:?}; stopping after block {}",
                    state.last_delivered()
                );
                break;
            }
            Ok(Err(e)) if e.is_transient() => {
                log::debug!("[gbn:rx] dropping datagram: {e}");
                continue;
            }
            Ok(Err(e)) => return Err(e.into()),
            Ok(Ok(received)) => received,
        };
        if addr != peer {
            log::debug!("[gbn:rx] ignoring {} from stranger {addr}", pkt.kind());
            continue;
        }

        match pkt {
            Packet::Data(block) => {
                let seq = block.seq;
                let verdict = state.on_data(block);
                let ack = verdict.ack();
                match verdict {
                    Verdict::Accepted { payload, .. } => {
                        log::debug!("[gbn:rx] ← DATA seq={seq} accepted");
                        // A closed queue means the deliverer already gave up.
                        if tx.send(payload).is_err() {
                            break;
                        }
                    }
                    Verdict::Rejected { .. } => {
                        log::debug!(
                            "[gbn:rx] ← DATA seq={seq} discarded (expecting {})",
                            state.expected_next()
                        );
                    }
                }
                socket.send_to(&Packet::Ack { ack }, peer).await?;
                log::debug!("[gbn:rx] → ACK {ack}");
            }
            Packet::Fin { last_seq } if state.has_delivered(last_seq) => {
                socket.send_to(&Packet::FinAck { last_seq }, peer).await?;
                log::debug!("[gbn:rx] ← FIN last_seq={last_seq}; → FIN-ACK");
                fin_received = true;
                break;
            }
            Packet::Fin { last_seq } => {
                // Lost trailing ACK or DATA; tell the sender where we are.
                let ack = state.last_delivered();
                log::debug!("[gbn:rx] ← FIN last_seq={last_seq} early; → ACK {ack}");
                socket.send_to(&Packet::Ack { ack }, peer).await?;
            }
            other => {
                log::debug!("[gbn:rx] ignoring {}", other.kind());
            }
        }
    }

    Ok(AssembleOutcome {
        accepted: state.accepted(),
        rejected: state.rejected(),
        fin_received,
    })
}

/// Write queued payloads to `sink` in order until `file_size` bytes are out.
async fn deliver<W>(
    mut rx: mpsc::UnboundedReceiver<Vec<u8>>,
    sink: &mut W,
    file_size: u64,
) -> Result<u64, ConnError>
where
    W: AsyncWrite + Unpin,
{
    let mut written = 0u64;
    while written < file_size {
        let Some(payload) = rx.recv().await else {
            sink.flush().await?;
            return Err(ConnError::Truncated {
                expected: file_size,
                received: written,
            });
        };
        sink.write_all(&payload).await?;
        written += payload.len() as u64;
        log::trace!("[gbn:deliver] {written}/{file_size} bytes");
    }
    sink.flush().await?;
    Ok(written)
}
