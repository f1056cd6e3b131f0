//! Simulated datagram networks for connecting two [`SimStack`]s.
//!
//! [`SimStack`]: crate::stack::SimStack

use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error as ThisError;
use tokio::sync::mpsc::{error::SendError, Sender};

mod latent;
pub use latent::Latent;

mod reliable;
pub use reliable::Reliable;

mod unreliable;
pub use unreliable::Unreliable;

/// A datagram on its way to a stack
pub type Datagram = Vec<u8>;

/// Models a network that carries datagrams from one stack to another.
#[async_trait]
pub trait Network: Send + Sync {
    /// Carries `datagram` to the stack listening on `to`. A network may drop
    /// the datagram and still return `Ok`.
    async fn send(self: Arc<Self>, datagram: Datagram, to: &Sender<Datagram>)
        -> Result<(), NetworkError>;
}

/// An error that occurred while carrying a datagram
#[derive(Debug, ThisError, PartialEq, Eq, Clone, Copy)]
pub enum NetworkError {
    #[error("The receiving stack was dropped")]
    Disconnected,
}

impl<T> From<SendError<T>> for NetworkError {
    fn from(_: SendError<T>) -> Self {
        Self::Disconnected
    }
}
