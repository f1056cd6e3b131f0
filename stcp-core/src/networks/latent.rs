use super::{Datagram, Network, NetworkError};
use async_trait::async_trait;
use std::{sync::Arc, time::Duration};
use tokio::sync::mpsc::Sender;

/// Delivers every datagram in order after a fixed delay. The sender is held
/// up for the delay, so datagrams from one stack never overtake each other.
#[derive(Debug)]
pub struct Latent {
    latency: Duration,
}

impl Latent {
    pub fn new(latency: Duration) -> Self {
        Self { latency }
    }
}

#[async_trait]
impl Network for Latent {
    async fn send(
        self: Arc<Self>,
        datagram: Datagram,
        to: &Sender<Datagram>,
    ) -> Result<(), NetworkError> {
        tokio::time::sleep(self.latency).await;
        to.send(datagram).await?;
        Ok(())
    }
}
