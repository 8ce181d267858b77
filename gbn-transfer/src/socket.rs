//! Async UDP socket abstraction.
//!
//! [`Socket`] is a thin wrapper around `tokio::net::UdpSocket` that speaks
//! [`crate::packet::Packet`] instead of raw bytes.  It also hosts the
//! injected [`LossModel`] (consulted before every send) and a set of
//! per-kind datagram counters.  All protocol logic lives elsewhere; this
//! module owns only byte I/O.

use std::net::SocketAddr;
use std::sync::{Mutex, PoisonError};

use tokio::net::UdpSocket;

use crate::packet::{Packet, PacketError, PacketKind};
use crate::simulator::{LossModel, NoLoss};

/// Maximum UDP payload size (theoretical limit; in practice kept much smaller).
const MAX_DATAGRAM: usize = 65_535;

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

/// Errors that can arise from socket operations.
#[derive(Debug)]
pub enum SocketError {
    /// Underlying I/O error from the OS.
    Io(std::io::Error),
    /// The datagram could not be encoded, or a received one could not be
    /// decoded as a valid packet.
    Packet(PacketError),
}

impl SocketError {
    /// `true` when the error concerns a single datagram rather than the
    /// socket itself (undecodable input, or an ICMP error surfaced by the
    /// OS); callers drop it and keep going.
    pub fn is_transient(&self) -> bool {
        use std::io::ErrorKind;
        match self {
            Self::Packet(_) => true,
            Self::Io(e) => matches!(
                e.kind(),
                ErrorKind::ConnectionRefused
                    | ErrorKind::ConnectionReset
                    | ErrorKind::Interrupted
                    | ErrorKind::WouldBlock
            ),
        }
    }
}

impl std::fmt::Display for SocketError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io(e) => write!(f, "socket I/O error: {e}"),
            Self::Packet(e) => write!(f, "packet codec error: {e}"),
        }
    }
}

impl std::error::Error for SocketError {}

impl From<std::io::Error> for SocketError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e)
    }
}

impl From<PacketError> for SocketError {
    fn from(e: PacketError) -> Self {
        Self::Packet(e)
    }
}

// ---------------------------------------------------------------------------
// Statistics
// ---------------------------------------------------------------------------

/// One counter per [`PacketKind`].
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct KindCounts([u64; 6]);

impl KindCounts {
    fn slot(kind: PacketKind) -> usize {
        match kind {
            PacketKind::Request => 0,
            PacketKind::Reply => 1,
            PacketKind::Data => 2,
            PacketKind::Ack => 3,
            PacketKind::Fin => 4,
            PacketKind::FinAck => 5,
        }
    }

    fn bump(&mut self, kind: PacketKind) {
        self.0[Self::slot(kind)] += 1;
    }

    pub fn get(&self, kind: PacketKind) -> u64 {
        self.0[Self::slot(kind)]
    }

    pub fn total(&self) -> u64 {
        self.0.iter().sum()
    }
}

/// Snapshot of a socket's datagram counters.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SocketStats {
    /// Datagrams actually handed to the OS.
    pub sent: KindCounts,
    /// Datagrams discarded by the loss model instead of being sent.
    pub dropped: KindCounts,
    /// Well-formed datagrams received.
    pub received: KindCounts,
    /// Received datagrams that failed to decode.
    pub malformed: u64,
}

// ---------------------------------------------------------------------------
// Socket
// ---------------------------------------------------------------------------

/// An async, packet-oriented UDP socket with an injectable loss model.
///
/// All methods are `&self` so the socket can be shared across tasks behind
/// an `Arc`.
pub struct Socket {
    /// Address this socket is bound to (filled in after OS assigns ephemeral port).
    pub local_addr: SocketAddr,
    inner: UdpSocket,
    loss: Mutex<Box<dyn LossModel>>,
    stats: Mutex<SocketStats>,
}

impl std::fmt::Debug for Socket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Socket")
            .field("local_addr", &self.local_addr)
            .finish_non_exhaustive()
    }
}

impl Socket {
    /// Bind a new loss-free socket to `local_addr`.
    ///
    /// Passing `0.0.0.0:0` lets the OS choose an ephemeral port.
    pub async fn bind(local_addr: SocketAddr) -> Result<Self, SocketError> {
        Self::bind_with_loss(local_addr, Box::new(NoLoss)).await
    }

    /// Bind a new socket whose outgoing datagrams pass through `loss`.
    pub async fn bind_with_loss(
        local_addr: SocketAddr,
        loss: Box<dyn LossModel>,
    ) -> Result<Self, SocketError> {
        let inner = UdpSocket::bind(local_addr).await?;
        let local_addr = inner.local_addr()?;
        Ok(Self {
            local_addr,
            inner,
            loss: Mutex::new(loss),
            stats: Mutex::new(SocketStats::default()),
        })
    }

    /// Encode `packet` and send it as a single UDP datagram to `dest`,
    /// unless the loss model drops it.
    ///
    /// A dropped datagram is indistinguishable from a sent one for the
    /// caller: both return `Ok(())`.
    pub async fn send_to(&self, packet: &Packet, dest: SocketAddr) -> Result<(), SocketError> {
        let bytes = packet.encode()?;
        let kind = packet.kind();

        let drop_it = self
            .loss
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .should_drop(packet);
        if drop_it {
            log::debug!("[sim] dropped outgoing {kind} to {dest}");
            self.with_stats(|s| s.dropped.bump(kind));
            return Ok(());
        }

        self.inner.send_to(&bytes, dest).await?;
        self.with_stats(|s| s.sent.bump(kind));
        Ok(())
    }

    /// Receive the next datagram and decode it into a [`Packet`].
    ///
    /// Returns `(packet, sender_address)`.  Datagrams that fail to decode are
    /// returned as `Err(SocketError::Packet(_))` — the caller decides whether
    /// to retry.
    pub async fn recv_from(&self) -> Result<(Packet, SocketAddr), SocketError> {
        let mut buf = vec![0u8; MAX_DATAGRAM];
        let (n, addr) = self.inner.recv_from(&mut buf).await?;
        match Packet::decode(&buf[..n]) {
            Ok(packet) => {
                self.with_stats(|s| s.received.bump(packet.kind()));
                Ok((packet, addr))
            }
            Err(e) => {
                self.with_stats(|s| s.malformed += 1);
                Err(e.into())
            }
        }
    }

    /// Send raw bytes, bypassing the codec and the loss model.
    ///
    /// Only useful for exercising a peer's handling of garbage input.
    pub async fn send_raw(&self, bytes: &[u8], dest: SocketAddr) -> Result<(), SocketError> {
        self.inner.send_to(bytes, dest).await?;
        Ok(())
    }

    /// Current datagram counters.
    pub fn stats(&self) -> SocketStats {
        *self.stats.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn with_stats(&self, f: impl FnOnce(&mut SocketStats)) {
        f(&mut self.stats.lock().unwrap_or_else(PoisonError::into_inner));
    }
}
