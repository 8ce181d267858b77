//! Session setup and the crate-wide error type.
//!
//! A transfer starts with a two-message exchange over the same lossy
//! channel that later carries the data:
//!
//! ```text
//!  receiver                                   sender
//!     │ ── REQUEST { file_name, block_size } ──▶ │
//!     │ ◀── REPLY  { status, file_size } ─────── │
//! ```
//!
//! The receiver retransmits its REQUEST with exponential back-off until a
//! REPLY arrives; the sender blocks until the first well-formed REQUEST and
//! answers every duplicate of it later on (see [`crate::sender`]).

use std::net::SocketAddr;
use std::time::Duration;

use thiserror::Error;
use tokio::time::{timeout_at, Instant};

use crate::config::{ReceiverConfig, MAX_HANDSHAKE_TIMEOUT};
use crate::packet::{Packet, ReplyStatus};
use crate::socket::{Socket, SocketError};

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

/// Everything that can end a session early.
#[derive(Debug, Error)]
pub enum ConnError {
    #[error("{0}")]
    Socket(#[from] SocketError),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    /// Sender side: the requested file does not exist locally.
    #[error("requested file {0:?} not found")]
    FileNotFound(String),
    /// Receiver side: the sender answered with status -1.
    #[error("file {0:?} does not exist on the sender")]
    RemoteFileNotFound(String),
    /// Sender side: the request carried unusable parameters.
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    /// Receiver side: the sender answered with status -2.
    #[error("request for {0:?} rejected by the sender")]
    Rejected(String),
    #[error("no reply from sender after {0} attempts")]
    HandshakeFailed(u32),
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    #[error("file of {size} bytes does not fit in blocks of {block_size} bytes")]
    FileTooLarge { size: u64, block_size: u32 },
    /// Receiver side: the assembler stopped before every byte arrived.
    #[error("transfer ended after {received} of {expected} bytes")]
    Truncated { expected: u64, received: u64 },
    #[error("session task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

// ---------------------------------------------------------------------------
// Receiver side
// ---------------------------------------------------------------------------

/// Ask `sender` for `file_name` and return its size.
///
/// Retries up to `config.handshake_retries` times, doubling the wait after
/// every unanswered attempt.
pub async fn request_file(
    socket: &Socket,
    sender: SocketAddr,
    file_name: &str,
    config: &ReceiverConfig,
) -> Result<u64, ConnError> {
    let request = Packet::Request {
        file_name: file_name.to_owned(),
        block_size: config.block_size,
    };
    let mut rto = config.handshake_timeout;

    for attempt in 1..=config.handshake_retries {
        socket.send_to(&request, sender).await?;
        log::debug!(
            "[handshake] → REQUEST {file_name:?} block={} attempt={attempt}",
            config.block_size
        );

        if let Some((status, file_size)) = await_reply(socket, sender, rto).await? {
            log::debug!("[handshake] ← REPLY status={} size={file_size}", status.to_i32());
            return match status {
                ReplyStatus::Ok => Ok(file_size),
                ReplyStatus::NotFound => Err(ConnError::RemoteFileNotFound(file_name.to_owned())),
                ReplyStatus::Rejected => Err(ConnError::Rejected(file_name.to_owned())),
            };
        }
        rto = (rto * 2).min(MAX_HANDSHAKE_TIMEOUT);
    }

    Err(ConnError::HandshakeFailed(config.handshake_retries))
}

/// Wait up to `wait` for a REPLY from `sender`, skipping anything else.
async fn await_reply(
    socket: &Socket,
    sender: SocketAddr,
    wait: Duration,
) -> Result<Option<(ReplyStatus, u64)>, ConnError> {
    let deadline = Instant::now() + wait;
    loop {
        match timeout_at(deadline, socket.recv_from()).await {
            Err(_elapsed) => return Ok(None),
            Ok(Err(e)) if e.is_transient() => {
                log::debug!("[handshake] dropping datagram: {e}");
            }
            Ok(Err(e)) => return Err(e.into()),
            Ok(Ok((Packet::Reply { status, file_size }, addr))) if addr == sender => {
                return Ok(Some((status, file_size)));
            }
            Ok(Ok((pkt, addr))) => {
                log::debug!("[handshake] ignoring {} from {addr}", pkt.kind());
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Sender side
// ---------------------------------------------------------------------------

/// A REQUEST as seen by the sender.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionRequest {
    /// Where the request came from; the session peer from now on.
    pub peer: SocketAddr,
    pub file_name: String,
    pub block_size: u32,
}

/// Block until a well-formed REQUEST arrives.
pub async fn await_request(socket: &Socket) -> Result<SessionRequest, ConnError> {
    loop {
        match socket.recv_from().await {
            Ok((
                Packet::Request {
                    file_name,
                    block_size,
                },
                peer,
            )) => {
                log::debug!("[handshake] ← REQUEST {file_name:?} block={block_size} from {peer}");
                return Ok(SessionRequest {
                    peer,
                    file_name,
                    block_size,
                });
            }
            Ok((pkt, addr)) => {
                log::debug!("[handshake] ignoring {} from {addr}", pkt.kind());
            }
            Err(e) if e.is_transient() => {
                log::debug!("[handshake] dropping datagram: {e}");
            }
            Err(e) => return Err(e.into()),
        }
    }
}

/// Build the REPLY packet for a request outcome.
pub fn reply_packet(status: ReplyStatus, file_size: u64) -> Packet {
    let file_size = if status == ReplyStatus::Ok { file_size } else { 0 };
    Packet::Reply { status, file_size }
}
