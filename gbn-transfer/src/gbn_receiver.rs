//! Go-Back-N receive-side state machine.
//!
//! [`Assembler`] implements the receiver side of Go-Back-N:
//!
//! - Only the **next expected** block is accepted (seq == `expected_next`).
//! - Out-of-order and duplicate blocks are **discarded**, never buffered.
//! - Every DATA datagram, accepted or not, is answered with a **cumulative
//!   ACK** naming the highest block delivered in order.  An accepted block is
//!   acknowledged with its own number (the pre-increment `expected_next`); a
//!   rejected one repeats the previous acknowledgement, which the sender
//!   reads as a duplicate.
//!
//! This module only manages state; all socket I/O and the hand-off to the
//! delivery queue are the caller's responsibility.

use crate::packet::Block;

/// Outcome of offering one DATA block to the [`Assembler`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    /// In-order block; `payload` must be delivered, `ack` sent.
    Accepted { ack: u32, payload: Vec<u8> },
    /// Out-of-order or duplicate block; only `ack` is sent.
    Rejected { ack: u32 },
}

impl Verdict {
    /// ACK number to send back for this block.
    pub fn ack(&self) -> u32 {
        match self {
            Verdict::Accepted { ack, .. } | Verdict::Rejected { ack } => *ack,
        }
    }
}

/// In-order assembler state for one session.
#[derive(Debug)]
pub struct Assembler {
    /// Next sequence number the receiver will accept.  Starts at 1 and only
    /// ever grows.  Kept wider than a sequence number so accepting block
    /// `u32::MAX` cannot wrap it.
    expected_next: u64,
    accepted: u64,
    rejected: u64,
}

impl Default for Assembler {
    fn default() -> Self {
        Self::new()
    }
}

impl Assembler {
    pub fn new() -> Self {
        Self {
            expected_next: 1,
            accepted: 0,
            rejected: 0,
        }
    }

    /// Offer an inbound block.
    pub fn on_data(&mut self, block: Block) -> Verdict {
        if u64::from(block.seq) == self.expected_next {
            let ack = block.seq;
            self.expected_next += 1;
            self.accepted += 1;
            Verdict::Accepted {
                ack,
                payload: block.payload,
            }
        } else {
            self.rejected += 1;
            Verdict::Rejected {
                ack: self.last_delivered(),
            }
        }
    }

    /// `true` when every block up to and including `last_seq` has been
    /// accepted, i.e. a FIN for `last_seq` may be confirmed.
    pub fn has_delivered(&self, last_seq: u32) -> bool {
        self.last_delivered() >= last_seq
    }

    pub fn expected_next(&self) -> u64 {
        self.expected_next
    }

    /// Highest sequence number delivered in order (0 before the first block).
    pub fn last_delivered(&self) -> u32 {
        // Bounded by the largest accepted `u32` sequence number.
        (self.expected_next - 1) as u32
    }

    pub fn accepted(&self) -> u64 {
        self.accepted
    }

    pub fn rejected(&self) -> u64 {
        self.rejected
    }
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
