//! Fault injection for the datagram channel.
//!
//! Real networks drop packets.  To exercise the retransmission machinery
//! without depending on actual network conditions, every outgoing datagram
//! is first shown to a [`LossModel`]; when the model says so the
//! [`crate::socket::Socket`] silently discards it instead of sending.
//!
//! | Model            | Behaviour                                            |
//! |------------------|------------------------------------------------------|
//! | [`NoLoss`]       | Transparent pass-through.                            |
//! | [`RandomLoss`]   | Drops transfer datagrams with a fixed probability,   |
//! |                  | from a seeded RNG so runs are reproducible.          |
//! | [`ScriptedLoss`] | Drops the first transmission of chosen DATA / ACK    |
//! |                  | numbers; fully deterministic.                        |
//!
//! Loss is applied on the sending side only, which is enough to model a lossy
//! link in both directions since each peer owns its own socket.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::packet::Packet;

/// Decides, per outgoing datagram, whether the link "loses" it.
pub trait LossModel: Send {
    /// Return `true` to drop `packet` instead of sending it.
    fn should_drop(&mut self, packet: &Packet) -> bool;
}

/// Never drops anything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoLoss;

impl LossModel for NoLoss {
    fn should_drop(&mut self, _packet: &Packet) -> bool {
        false
    }
}

/// Independent per-datagram loss with probability `rate`.
///
/// Only DATA and ACK datagrams are subject to loss; the handshake and the
/// end-of-session exchange always go through.
#[derive(Debug)]
pub struct RandomLoss {
    rate: f64,
    rng: StdRng,
}

impl RandomLoss {
    /// Seeded model; the same seed yields the same drop pattern.
    pub fn new(rate: f64, seed: u64) -> Self {
        Self {
            rate: sanitize_rate(rate),
            rng: StdRng::seed_from_u64(seed),
        }
    }

    /// Model seeded from OS randomness.
    pub fn from_os_rng(rate: f64) -> Self {
        Self {
            rate: sanitize_rate(rate),
            rng: StdRng::from_os_rng(),
        }
    }

    pub fn rate(&self) -> f64 {
        self.rate
    }
}

impl LossModel for RandomLoss {
    fn should_drop(&mut self, packet: &Packet) -> bool {
        packet.kind().is_transfer() && self.rng.random_bool(self.rate)
    }
}

fn sanitize_rate(rate: f64) -> f64 {
    if rate.is_finite() {
        rate.clamp(0.0, 1.0)
    } else {
        0.0
    }
}

/// Deterministic loss: drop the first transmission of each listed DATA
/// sequence number and each listed ACK number.
///
/// A number listed twice is dropped twice (its first two transmissions).
#[derive(Debug, Default, Clone)]
pub struct ScriptedLoss {
    data_once: Vec<u32>,
    ack_once: Vec<u32>,
}

impl ScriptedLoss {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop the next DATA datagram carrying `seq`.
    pub fn drop_data_once(mut self, seq: u32) -> Self {
        self.data_once.push(seq);
        self
    }

    /// Drop the next ACK datagram carrying `ack`.
    pub fn drop_ack_once(mut self, ack: u32) -> Self {
        self.ack_once.push(ack);
        self
    }

    /// Drops still armed.
    pub fn pending(&self) -> usize {
        self.data_once.len() + self.ack_once.len()
    }
}

impl LossModel for ScriptedLoss {
    fn should_drop(&mut self, packet: &Packet) -> bool {
        let (list, key) = match packet {
            Packet::Data(block) => (&mut self.data_once, block.seq),
            Packet::Ack { ack } => (&mut self.ack_once, *ack),
            _ => return false,
        };
        match list.iter().position(|&n| n == key) {
            Some(idx) => {
                list.remove(idx);
                true
            }
            None => false,
        }
    }
}
