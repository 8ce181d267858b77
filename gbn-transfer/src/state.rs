//! Sender-side acknowledgement state.
//!
//! The sender tolerates a single duplicate ACK before concluding that a block
//! was lost.  [`AckState`] remembers whether that one duplicate has already
//! been seen.  Transitions live in [`crate::gbn_sender`].

/// Duplicate-ACK dampening state.
///
/// ```text
//             duplicate ACK
//   NORMAL ─────────────────▶ SUSPECT_LOSS
//     ▲                            │
//     │  progress ACK, or second   │
//     └────── duplicate ACK ───────┘
//             (retransmit window)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AckState {
    /// No unexplained duplicate outstanding; initial state.
    #[default]
    Normal,
    /// One duplicate ACK seen; the next one triggers a full retransmission.
    SuspectLoss,
}

impl std::fmt::Display for AckState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AckState::Normal => f.write_str("NORMAL"),
            AckState::SuspectLoss => f.write_str("SUSPECT_LOSS"),
        }
    }
}
