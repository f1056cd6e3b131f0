//! Replays a transfer log against the window algorithm. Every line records
//! the remainder window before its event, so each line predicts the remainder
//! of the line after it. A line whose remainder differs from the prediction
//! points at a congestion control bug.

use super::{Direction, LogRecord};
use crate::stcp::window::{MSS, SLOW_START_CEILING, WINDOW_CEILING};
use std::fmt;

/// A line whose remainder window was not the one predicted by the line before
/// it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Mismatch {
    /// 1-based line number
    pub line: usize,
    pub expected: u32,
    pub actual: u32,
}

impl fmt::Display for Mismatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "line {}: expected remainder window {}, found {}",
            self.line, self.expected, self.actual
        )
    }
}

/// Checks every line of a log and returns the mismatching ones. Prediction
/// continues from the expected value rather than the logged one, so a single
/// corrupted line is reported alone.
pub fn validate<'a>(records: impl IntoIterator<Item = &'a LogRecord>) -> Vec<Mismatch> {
    let mut expected = MSS;
    let mut mismatches = vec![];
    for (i, record) in records.into_iter().enumerate() {
        if record.remainder != expected {
            mismatches.push(Mismatch {
                line: i + 1,
                expected,
                actual: record.remainder,
            });
        }
        expected = match record.direction {
            Direction::Send => expected.wrapping_sub(record.bytes),
            Direction::Recv => expected
                .wrapping_add(record.bytes)
                .wrapping_add(growth(record.swnd)),
        };
    }
    mismatches
}

/// How much the send window should grow on an acknowledgment received with
/// send window `swnd`
pub fn growth(swnd: u32) -> u32 {
    let headroom = WINDOW_CEILING.saturating_sub(swnd);
    if swnd < SLOW_START_CEILING {
        MSS.min(headroom)
    } else if swnd < WINDOW_CEILING {
        (MSS * MSS / swnd).min(headroom)
    } else {
        0
    }
}
