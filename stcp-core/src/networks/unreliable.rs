use super::{Datagram, Network, NetworkError};
use async_trait::async_trait;
use rand::{rngs::SmallRng, Rng, SeedableRng};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc::Sender;

/// Drops each datagram with a fixed probability. The generator is seeded, so
/// a given loss rate always drops the same datagrams.
#[derive(Debug)]
pub struct Unreliable {
    rng: Mutex<SmallRng>,
    loss_rate: f64,
}

impl Unreliable {
    /// `loss_rate` is clamped to `0.0..=1.0`
    pub fn new(loss_rate: f64) -> Self {
        Self {
            rng: Mutex::new(SmallRng::seed_from_u64(0xBAD5EED)),
            loss_rate: loss_rate.clamp(0.0, 1.0),
        }
    }

    fn drops(&self) -> bool {
        match self.rng.lock() {
            Ok(mut rng) => rng.gen_bool(self.loss_rate),
            Err(poisoned) => poisoned.into_inner().gen_bool(self.loss_rate),
        }
    }
}

#[async_trait]
impl Network for Unreliable {
    async fn send(
        self: Arc<Self>,
        datagram: Datagram,
        to: &Sender<Datagram>,
    ) -> Result<(), NetworkError> {
        if self.drops() {
            tracing::debug!(len = datagram.len(), "Dropping datagram");
            return Ok(());
        }
        to.send(datagram).await?;
        Ok(())
    }
}
