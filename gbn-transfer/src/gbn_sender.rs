//! Go-Back-N send-side acknowledgement state machine.
//!
//! [`AckMachine`] decides, for every incoming ACK, whether the sender should
//! slide its window, retransmit the whole window, or do nothing.
//!
//! # Protocol contract
//!
//! - ACKs are **cumulative**: `ack = K` means the receiver has delivered
//!   every block up to and including sequence number `K` in order.
//! - With `expected` being the oldest unacknowledged sequence number:
//!   - `ack >= expected` is progress: blocks `expected..=ack` leave the
//!     window.
//!   - `ack == expected - 1` is a duplicate: the receiver saw something but
//!     made no progress.  The first duplicate is tolerated (it may be a
//!     reordered ACK); the second consecutive one triggers a retransmission
//!     of the whole window.
//!   - anything further behind is stale and ignored.
//! - Timeouts bypass this machine: the window is retransmitted as is and
//!   the dampening state is left alone (see [`crate::window::SendWindow::on_timeout`]).
//!
//! This module only manages state; the window itself lives in
//! [`crate::window`] and all socket I/O is the caller's responsibility.

use crate::state::AckState;

/// What the control path must do in response to one input.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckAction {
    /// Nothing to do.
    Ignore,
    /// First duplicate ACK; remember it but do not retransmit yet.
    Suspect,
    /// Retransmit every block currently in the window.
    Retransmit,
    /// Remove this many blocks from the front of the window.
    Slide(usize),
}

/// Duplicate-ACK dampening filter plus the slide computation.
#[derive(Debug, Default)]
pub struct AckMachine {
    state: AckState,
}

impl AckMachine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> AckState {
        self.state
    }

    /// Process a received ACK.
    ///
    /// `head` is the sequence number of the oldest in-flight block (`None`
    /// when the window is empty) and `in_flight` the window length.
    pub fn on_ack(&mut self, head: Option<u32>, in_flight: usize, ack: u32) -> AckAction {
        let Some(expected) = head else {
            return AckAction::Ignore;
        };

        if ack >= expected {
            self.state = AckState::Normal;
            let confirmed = (ack - expected) as usize + 1;
            return AckAction::Slide(confirmed.min(in_flight));
        }

        if expected.checked_sub(1) == Some(ack) {
            return match self.state {
                AckState::Normal => {
                    self.state = AckState::SuspectLoss;
                    AckAction::Suspect
                }
                AckState::SuspectLoss => {
                    self.state = AckState::Normal;
                    AckAction::Retransmit
                }
            };
        }

        AckAction::Ignore
    }
}

/// Number of blocks a file of `file_size` bytes occupies at `block_size`
/// bytes per block (`ceil(file_size / block_size)`).
///
/// Returns `None` when `block_size` is zero or the count does not fit a
/// sequence number.
pub fn block_count(file_size: u64, block_size: u32) -> Option<u32> {
    if block_size == 0 {
        return None;
    }
    u32::try_from(file_size.div_ceil(u64::from(block_size))).ok()
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
