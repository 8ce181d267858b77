//! Session configuration.
//!
//! Both peers are configured once at start-up; nothing here changes during a
//! transfer.  The CLI in `main.rs` maps its flags onto these structs, and
//! tests build them directly (usually with much shorter timeouts).

use std::path::PathBuf;
use std::time::Duration;

use crate::connection::ConnError;
use crate::packet::MAX_PAYLOAD;

/// Largest block size a receiver may ask for.  Keeps every DATA datagram
/// below the 65 507-byte UDP payload limit.
pub const MAX_BLOCK_SIZE: u32 = 65_000;

pub const DEFAULT_BLOCK_SIZE: u32 = 1024;
pub const DEFAULT_WINDOW_SIZE: usize = 8;

/// Retransmission timeout of the sender's control path.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(1);

/// Silence after which the receiver's assembler gives up.
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(10);

pub const DEFAULT_HANDSHAKE_TIMEOUT: Duration = Duration::from_millis(500);
pub const MAX_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(8);
pub const DEFAULT_HANDSHAKE_RETRIES: u32 = 6;
pub const DEFAULT_FIN_RETRIES: u32 = 5;

/// Loss probability the CLI injects unless told otherwise.
pub const DEFAULT_LOSS_RATE: f64 = 0.2;

// ---------------------------------------------------------------------------
// SenderConfig
// ---------------------------------------------------------------------------

/// Parameters of the serving peer.
#[derive(Debug, Clone)]
pub struct SenderConfig {
    /// Maximum number of unacknowledged blocks in flight.
    pub window_size: usize,
    /// How long the control path waits for an ACK before retransmitting the
    /// whole window.
    pub timeout: Duration,
    /// FIN transmissions before giving up on a FIN-ACK.  Zero skips the
    /// end-of-session exchange.
    pub fin_retries: u32,
    /// Directory requested file names are resolved against.
    pub root: PathBuf,
}

impl Default for SenderConfig {
    fn default() -> Self {
        Self {
            window_size: DEFAULT_WINDOW_SIZE,
            timeout: DEFAULT_TIMEOUT,
            fin_retries: DEFAULT_FIN_RETRIES,
            root: PathBuf::from("."),
        }
    }
}

impl SenderConfig {
    pub fn validate(&self) -> Result<(), ConnError> {
        if self.window_size == 0 {
            return Err(ConnError::InvalidConfig("window size must be at least 1".into()));
        }
        if self.timeout.is_zero() {
            return Err(ConnError::InvalidConfig("timeout must be positive".into()));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// ReceiverConfig
// ---------------------------------------------------------------------------

/// Parameters of the fetching peer.
#[derive(Debug, Clone)]
pub struct ReceiverConfig {
    /// Block size requested from the sender.
    pub block_size: u32,
    /// Silence after which the assembler stops.
    pub idle_timeout: Duration,
    /// Wait for the first REPLY; doubles per retry up to
    /// [`MAX_HANDSHAKE_TIMEOUT`].
    pub handshake_timeout: Duration,
    /// REQUEST transmissions before the handshake fails.
    pub handshake_retries: u32,
}

impl Default for ReceiverConfig {
    fn default() -> Self {
        Self {
            block_size: DEFAULT_BLOCK_SIZE,
            idle_timeout: DEFAULT_IDLE_TIMEOUT,
            handshake_timeout: DEFAULT_HANDSHAKE_TIMEOUT,
            handshake_retries: DEFAULT_HANDSHAKE_RETRIES,
        }
    }
}

impl ReceiverConfig {
    pub fn validate(&self) -> Result<(), ConnError> {
        validate_block_size(self.block_size).map_err(ConnError::InvalidConfig)?;
        if self.idle_timeout.is_zero() || self.handshake_timeout.is_zero() {
            return Err(ConnError::InvalidConfig("timeouts must be positive".into()));
        }
        if self.handshake_retries == 0 {
            return Err(ConnError::InvalidConfig(
                "handshake needs at least one attempt".into(),
            ));
        }
        Ok(())
    }
}

/// Shared by the receiver's config check and the sender's request check.
pub fn validate_block_size(block_size: u32) -> Result<(), String> {
    debug_assert!(MAX_BLOCK_SIZE as usize <= MAX_PAYLOAD);
    if block_size == 0 || block_size > MAX_BLOCK_SIZE {
        return Err(format!(
            "block size {block_size} outside 1..={MAX_BLOCK_SIZE}"
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        SenderConfig::default().validate().unwrap();
        ReceiverConfig::default().validate().unwrap();
    }

    #[test]
    fn zero_window_rejected() {
        let cfg = SenderConfig {
            window_size: 0,
            ..SenderConfig::default()
        };
        assert!(matches!(cfg.validate(), Err(ConnError::InvalidConfig(_))));
    }

    #[test]
    fn block_size_bounds() {
        assert!(validate_block_size(0).is_err());
        assert!(validate_block_size(1).is_ok());
        assert!(validate_block_size(MAX_BLOCK_SIZE).is_ok());
        assert!(validate_block_size(MAX_BLOCK_SIZE + 1).is_err());
    }
}
