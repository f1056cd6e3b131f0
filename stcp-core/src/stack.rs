//! Contains the [`Stack`] trait and supporting types.
//!
//! A stack stands between a connection and the outside world. It carries
//! datagrams to and from the peer and bytes to and from the application, and
//! multiplexes readiness of both into a single wait.

use crate::networks::NetworkError;
use async_trait::async_trait;
use std::{fmt, io, ops::BitOr};
use thiserror::Error as ThisError;

pub mod simulated;
pub use simulated::{AppEvent, AppHandle, SimStack};

/// Something that became ready during [`Stack::wait_for_event`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Event {
    /// A datagram is waiting in [`Stack::network_recv`]
    NetworkData,
    /// Bytes are waiting in [`Stack::app_recv`]
    AppData,
    /// The application asked to close the connection and every byte it wrote
    /// before asking has been read
    AppCloseRequested,
    /// Nothing became ready in time
    Timeout,
}

/// The set of events a wait is interested in
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct EventMask(u8);

impl EventMask {
    pub const NETWORK_DATA: Self = Self(1 << 0);
    pub const APP_DATA: Self = Self(1 << 1);
    pub const APP_CLOSE_REQUESTED: Self = Self(1 << 2);
    pub const ANY: Self = Self(0b111);

    /// Whether every event in `other` is also in this mask
    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    /// Whether this mask includes any of the application events
    pub const fn wants_app(self) -> bool {
        self.0 & (Self::APP_DATA.0 | Self::APP_CLOSE_REQUESTED.0) != 0
    }
}

impl BitOr for EventMask {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl fmt::Debug for EventMask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names = [
            (Self::NETWORK_DATA, "NETWORK_DATA"),
            (Self::APP_DATA, "APP_DATA"),
            (Self::APP_CLOSE_REQUESTED, "APP_CLOSE_REQUESTED"),
        ];
        f.debug_set()
            .entries(
                names
                    .iter()
                    .filter(|(event, _)| self.contains(*event))
                    .map(|(_, name)| name),
            )
            .finish()
    }
}

/// The services a connection needs from its surroundings.
#[async_trait]
pub trait Stack: Send {
    /// Waits until one of the events in `mask` is ready
    async fn wait_for_event(&mut self, mask: EventMask) -> Result<Event, StackError>;

    /// Sends one datagram to the peer and returns the number of bytes written
    async fn network_send(&mut self, datagram: &[u8]) -> Result<usize, StackError>;

    /// Receives one datagram from the peer into `buf`, truncating it if it
    /// does not fit, and returns the number of bytes read
    async fn network_recv(&mut self, buf: &mut [u8]) -> Result<usize, StackError>;

    /// Reads up to `buf.len()` bytes written by the application
    async fn app_recv(&mut self, buf: &mut [u8]) -> Result<usize, StackError>;

    /// Delivers bytes received from the peer to the application
    async fn app_send(&mut self, bytes: &[u8]) -> Result<(), StackError>;

    /// Tells the application the peer will send no more data
    async fn fin_received(&mut self) -> Result<(), StackError>;

    /// Releases an application waiting for the connection to open
    async fn unblock_application(&mut self) -> Result<(), StackError>;
}

/// An error that occurred while using a [`Stack`]
#[derive(Debug, ThisError)]
pub enum StackError {
    #[error("The peer can no longer be reached")]
    Disconnected,
    #[error("The application is no longer listening")]
    ApplicationGone,
    #[error("{0}")]
    Network(#[from] NetworkError),
    #[error("{0}")]
    Io(#[from] io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mask_membership() {
        let mask = EventMask::NETWORK_DATA | EventMask::APP_DATA;
        assert!(mask.contains(EventMask::NETWORK_DATA));
        assert!(mask.contains(EventMask::APP_DATA));
        assert!(!mask.contains(EventMask::APP_CLOSE_REQUESTED));
        assert!(mask.wants_app());
        assert!(!EventMask::NETWORK_DATA.wants_app());
        assert!(EventMask::ANY.contains(mask));
        assert_eq!(format!("{mask:?}"), r#"{"NETWORK_DATA", "APP_DATA"}"#);
    }
}
