//! The sender's transmit window.
//!
//! [`SendWindow`] is the single monitor shared by the sender's two tasks:
//! the producer appends freshly read blocks, the control path slides the
//! window on ACKs and snapshots it for retransmission.  Everything the two
//! tasks share (the in-flight blocks, the duplicate-ACK state and the
//! end-of-file flag) sits behind one mutex, so every mutation is linearized.
//!
//! ```text
//!   producer                         control path
//!      │ append (waits while full)        │ on_ack / on_timeout
//!      ▼                                  ▼
//!  ┌──────────────────────────────────────────────┐
//!  │ Mutex<Inner>: blocks | AckMachine | eof      │
//!  └──────────────────────────────────────────────┘
//!      ▲                                  │
//!      └──────── Notify (space freed) ────┘
//! ```
//!
//! The mutex is a `std::sync::Mutex` and is never held across an `.await`;
//! callers receive cloned blocks and do their socket I/O outside the lock.

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};

use tokio::sync::Notify;

use crate::gbn_sender::{AckAction, AckMachine};
use crate::packet::Block;
use crate::state::AckState;

/// Result of feeding one ACK through the window.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AckOutcome {
    pub action: AckAction,
    /// Blocks to retransmit (non-empty only for [`AckAction::Retransmit`]).
    pub resend: Vec<Block>,
    /// Window length after the ACK was applied.
    pub in_flight: usize,
}

struct Inner {
    blocks: VecDeque<Block>,
    acks: AckMachine,
    eof: bool,
    high_water: usize,
}

/// Bounded, ordered store of in-flight blocks (oldest first).
pub struct SendWindow {
    capacity: usize,
    inner: Mutex<Inner>,
    space: Notify,
}

impl SendWindow {
    /// Create an empty window holding at most `capacity` blocks.
    pub fn new(capacity: usize) -> Self {
        assert!(capacity >= 1, "window capacity must be at least 1");
        Self {
            capacity,
            inner: Mutex::new(Inner {
                blocks: VecDeque::with_capacity(capacity),
                acks: AckMachine::new(),
                eof: false,
                high_water: 0,
            }),
            space: Notify::new(),
        }
    }

    /// Append `block`, waiting while the window is full.
    pub async fn append(&self, block: Block) {
        self.push(block, false).await;
    }

    /// Append the final block of the file and mark end-of-file in the same
    /// critical section, so the control path never sees an empty window with
    /// the flag set while this block is still pending.
    pub async fn append_last(&self, block: Block) {
        self.push(block, true).await;
    }

    async fn push(&self, block: Block, last: bool) {
        let mut block = Some(block);
        loop {
            // Register interest before checking so a pop between the check
            // and the await is not missed.
            let notified = self.space.notified();
            {
                let mut inner = self.lock();
                if inner.blocks.len() < self.capacity {
                    if let Some(b) = block.take() {
                        inner.blocks.push_back(b);
                    }
                    inner.high_water = inner.high_water.max(inner.blocks.len());
                    inner.eof |= last;
                    return;
                }
            }
            notified.await;
        }
    }

    /// Remove up to `count` blocks from the front; returns how many left.
    pub fn pop_front(&self, count: usize) -> usize {
        let removed = {
            let mut inner = self.lock();
            Self::pop_locked(&mut inner, count)
        };
        if removed > 0 {
            self.space.notify_waiters();
        }
        removed
    }

    fn pop_locked(inner: &mut Inner, count: usize) -> usize {
        let n = count.min(inner.blocks.len());
        inner.blocks.drain(..n);
        n
    }

    /// Oldest in-flight block, if any.
    pub fn peek_front(&self) -> Option<Block> {
        self.lock().blocks.front().cloned()
    }

    /// Copy of every in-flight block, oldest first.
    pub fn snapshot(&self) -> Vec<Block> {
        self.lock().blocks.iter().cloned().collect()
    }

    /// Run the duplicate-ACK state machine for `ack` and apply its verdict.
    pub fn on_ack(&self, ack: u32) -> AckOutcome {
        let outcome = {
            let mut inner = self.lock();
            let head = inner.blocks.front().map(|b| b.seq);
            let len = inner.blocks.len();
            let action = inner.acks.on_ack(head, len, ack);
            let resend = match action {
                AckAction::Slide(n) => {
                    Self::pop_locked(&mut inner, n);
                    Vec::new()
                }
                AckAction::Retransmit => inner.blocks.iter().cloned().collect(),
                AckAction::Ignore | AckAction::Suspect => Vec::new(),
            };
            AckOutcome {
                action,
                resend,
                in_flight: inner.blocks.len(),
            }
        };
        if matches!(outcome.action, AckAction::Slide(n) if n > 0) {
            self.space.notify_waiters();
        }
        outcome
    }

    /// Retransmission timeout: every in-flight block goes out again.
    ///
    /// The duplicate-ACK state is left untouched.
    pub fn on_timeout(&self) -> Vec<Block> {
        self.snapshot()
    }

    /// The producer will append nothing more.
    pub fn mark_eof(&self) {
        self.lock().eof = true;
    }

    pub fn is_eof(&self) -> bool {
        self.lock().eof
    }

    /// `true` once end-of-file is marked and every block was acknowledged.
    pub fn is_drained(&self) -> bool {
        let inner = self.lock();
        inner.eof && inner.blocks.is_empty()
    }

    pub fn len(&self) -> usize {
        self.lock().blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().blocks.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Largest window length observed so far.
    pub fn high_water(&self) -> usize {
        self.lock().high_water
    }

    pub fn ack_state(&self) -> AckState {
        self.lock().acks.state()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl std::fmt::Debug for SendWindow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.lock();
        f.debug_struct("SendWindow")
            .field("capacity", &self.capacity)
            .field("in_flight", &inner.blocks.len())
            .field("eof", &inner.eof)
            .field("state", &inner.acks.state())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    fn block(seq: u32) -> Block {
        Block::new(seq, vec![seq as u8; 4])
    }

    async fn filled(capacity: usize, seqs: std::ops::RangeInclusive<u32>) -> SendWindow {
        let w = SendWindow::new(capacity);
        for s in seqs {
            w.append(block(s)).await;
        }
        w
    }

    #[tokio::test]
    async fn append_within_capacity_does_not_wait() {
        let w = filled(3, 1..=3).await;
        assert_eq!(w.len(), 3);
        assert_eq!(w.peek_front().map(|b| b.seq), Some(1));
    }

    #[tokio::test]
    async fn append_waits_while_full_and_resumes_after_pop() {
        let w = Arc::new(filled(2, 1..=2).await);

        let producer = {
            let w = Arc::clone(&w);
            tokio::spawn(async move { w.append(block(3)).await })
        };

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!producer.is_finished(), "append must suspend on a full window");
        assert_eq!(w.len(), 2);

        assert_eq!(w.pop_front(1), 1);
        tokio::time::timeout(Duration::from_secs(2), producer)
            .await
            .expect("producer not woken")
            .unwrap();

        let seqs: Vec<u32> = w.snapshot().iter().map(|b| b.seq).collect();
        assert_eq!(seqs, vec![2, 3]);
        assert_eq!(w.high_water(), 2);
    }

    #[tokio::test]
    async fn progress_ack_wakes_producer() {
        let w = Arc::new(filled(1, 1..=1).await);
        let producer = {
            let w = Arc::clone(&w);
            tokio::spawn(async move { w.append_last(block(2)).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;

        let out = w.on_ack(1);
        assert_eq!(out.action, AckAction::Slide(1));
        tokio::time::timeout(Duration::from_secs(2), producer)
            .await
            .expect("producer not woken")
            .unwrap();
        assert!(w.is_eof());
        assert!(!w.is_drained());
    }

    #[tokio::test]
    async fn pop_front_clamps_to_length() {
        let w = filled(4, 1..=2).await;
        assert_eq!(w.pop_front(10), 2);
        assert!(w.is_empty());
        assert_eq!(w.peek_front(), None);
    }

    #[tokio::test]
    async fn drained_requires_eof_and_empty() {
        let w = filled(2, 1..=1).await;
        w.pop_front(1);
        assert!(!w.is_drained());
        w.mark_eof();
        assert!(w.is_drained());
    }

    #[tokio::test]
    async fn two_duplicates_yield_one_full_retransmission() {
        let w = filled(4, 3..=6).await;

        let first = w.on_ack(2);
        assert_eq!(first.action, AckAction::Suspect);
        assert!(first.resend.is_empty());
        assert_eq!(w.ack_state(), AckState::SuspectLoss);

        let second = w.on_ack(2);
        assert_eq!(second.action, AckAction::Retransmit);
        let seqs: Vec<u32> = second.resend.iter().map(|b| b.seq).collect();
        assert_eq!(seqs, vec![3, 4, 5, 6]);
        assert_eq!(w.ack_state(), AckState::Normal);
        assert_eq!(w.len(), 4, "retransmission keeps the window intact");
    }

    #[tokio::test]
    async fn timeout_snapshots_whole_window() {
        let w = filled(4, 1..=3).await;
        let resend: Vec<u32> = w.on_timeout().iter().map(|b| b.seq).collect();
        assert_eq!(resend, vec![1, 2, 3]);
        assert_eq!(w.len(), 3);
        assert_eq!(w.capacity(), 4);
    }

    #[tokio::test]
    async fn timeout_keeps_suspect_state() {
        let w = filled(4, 2..=3).await;
        assert_eq!(w.on_ack(1).action, AckAction::Suspect);
        assert_eq!(w.on_timeout().len(), 2);
        assert_eq!(w.ack_state(), AckState::SuspectLoss);
        // The next duplicate still completes the pair.
        assert_eq!(w.on_ack(1).action, AckAction::Retransmit);
    }

    #[tokio::test]
    async fn ack_on_empty_window_is_ignored() {
        let w = SendWindow::new(2);
        let out = w.on_ack(7);
        assert_eq!(out.action, AckAction::Ignore);
        assert_eq!(out.in_flight, 0);
    }
}
