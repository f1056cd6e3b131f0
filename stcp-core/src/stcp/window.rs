//! Congestion and send window accounting.
//!
//! The sender keeps three numbers. `cwnd` grows on every acknowledged data
//! segment, by a full MSS while below [`SLOW_START_CEILING`] and by a
//! diminishing `MSS²/cwnd` after that. `swnd` is `cwnd` capped at
//! [`WINDOW_CEILING`] and is the window actually used. The remainder is the
//! transmit budget: spent by each send, refunded by each acknowledgment
//! together with whatever the window grew by.

/// The largest payload carried by a single data segment
pub const MSS: u32 = 536;

/// The hard cap on the send window. Also the window advertised to the peer.
pub const WINDOW_CEILING: u32 = 3072;

/// Below this congestion window size, each acknowledgment grows the window by
/// a whole MSS.
pub const SLOW_START_CEILING: u32 = 4 * MSS;

/// What an acknowledgment acknowledged
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Acked {
    /// A data segment of the given length
    Data(u32),
    /// A control segment. Does not grow the window.
    Control,
}

/// The sender's window state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Window {
    cwnd: u32,
    swnd: u32,
    remainder: u32,
}

impl Window {
    pub fn new() -> Self {
        Self {
            cwnd: MSS,
            swnd: MSS,
            remainder: MSS,
        }
    }

    /// Starts from a specific window state. The send window is derived from
    /// `cwnd`.
    #[cfg(test)]
    fn with_state(cwnd: u32, remainder: u32) -> Self {
        Self {
            cwnd,
            swnd: cwnd.min(WINDOW_CEILING),
            remainder,
        }
    }

    pub fn cwnd(&self) -> u32 {
        self.cwnd
    }

    pub fn swnd(&self) -> u32 {
        self.swnd
    }

    pub fn remainder(&self) -> u32 {
        self.remainder
    }

    /// How many bytes the next data segment may carry
    pub fn budget(&self) -> usize {
        self.remainder.min(MSS) as usize
    }

    /// Accounts for `len` bytes leaving in a data segment
    pub fn on_send(&mut self, len: u32) {
        self.remainder = self.remainder.saturating_sub(len);
    }

    /// Accounts for an arriving acknowledgment
    pub fn on_ack(&mut self, acked: Acked) {
        let prev_swnd = self.swnd;
        if let Acked::Data(len) = acked {
            self.cwnd += self.growth();
            self.remainder += len;
        }
        self.swnd = self.cwnd.min(WINDOW_CEILING);
        self.remainder += self.swnd - prev_swnd;
    }

    fn growth(&self) -> u32 {
        if self.cwnd < SLOW_START_CEILING {
            MSS
        } else {
            MSS * MSS / self.cwnd
        }
    }
}

impl Default for Window {
    fn default() -> Self {
        Self::new()
    }
}
