use super::{Datagram, Network, NetworkError};
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::mpsc::Sender;

/// Delivers every datagram immediately and in order.
#[derive(Debug, Default)]
pub struct Reliable {}

impl Reliable {
    pub fn new() -> Self {
        Self {}
    }
}

#[async_trait]
impl Network for Reliable {
    async fn send(
        self: Arc<Self>,
        datagram: Datagram,
        to: &Sender<Datagram>,
    ) -> Result<(), NetworkError> {
        to.send(datagram).await?;
        Ok(())
    }
}
