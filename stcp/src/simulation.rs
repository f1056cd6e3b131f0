//! Simulation specific functionality for STCP.
//!
//! A simulation runs a client and a server on one task, connected through an
//! in-memory network. The client sends a generated payload and closes, the
//! server checks what it received, and both transfer logs are checked against
//! the window algorithm.

use stcp_core::{
    config::default_log_name,
    networks::{Latent, Reliable},
    stack::SimStack,
    transfer_log::{self, Mismatch, TransferLogError},
    Config, Network, Role, SessionError, StcpSession,
};
use std::{
    io,
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};
use thiserror::Error as ThisError;

pub const CLIENT_PORT: u16 = 0xcafe;
pub const SERVER_PORT: u16 = 0xbeef;

/// How to run a simulation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Simulation {
    /// The number of bytes the client sends
    pub bytes: usize,
    /// Delay added to every datagram. No delay when unset.
    pub latency: Option<Duration>,
    /// Where the client and server logs are written
    pub log_dir: PathBuf,
}

impl Default for Simulation {
    fn default() -> Self {
        Self {
            bytes: 20_000,
            latency: None,
            log_dir: ".".into(),
        }
    }
}

/// The outcome of a completed simulation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Report {
    pub delivered: usize,
    pub client_log: PathBuf,
    pub server_log: PathBuf,
    pub client_mismatches: Vec<Mismatch>,
    pub server_mismatches: Vec<Mismatch>,
}

impl Report {
    /// Whether both logs matched the window algorithm
    pub fn passed(&self) -> bool {
        self.client_mismatches.is_empty() && self.server_mismatches.is_empty()
    }
}

impl Simulation {
    /// Runs the simulation to completion.
    pub async fn run(&self) -> Result<Report, SimulationError> {
        std::fs::create_dir_all(&self.log_dir)?;
        let network: Arc<dyn Network> = match self.latency {
            Some(latency) => Arc::new(Latent::new(latency)),
            None => Arc::new(Reliable::new()),
        };
        let ((client, client_app), (server, mut server_app)) = SimStack::pair(network);

        let client_log = self.log_path(Role::Active);
        let server_log = self.log_path(Role::Passive);
        let client_config = Config {
            local_port: CLIENT_PORT,
            remote_port: SERVER_PORT,
            transfer_log: Some(client_log.clone()),
            ..Default::default()
        };
        let server_config = Config {
            local_port: SERVER_PORT,
            remote_port: CLIENT_PORT,
            transfer_log: Some(server_log.clone()),
            ..Default::default()
        };
        let mut client = StcpSession::new(client, Role::Active, &client_config)?;
        let mut server = StcpSession::new(server, Role::Passive, &server_config)?;

        let payload = payload(self.bytes);
        let feed = async {
            client_app.write(payload.clone()).await?;
            client_app.close().await?;
            Ok::<_, SimulationError>(())
        };
        let (client_result, server_result, feed_result) =
            tokio::join!(client.run(), server.run(), feed);
        client_result?;
        server_result?;
        feed_result?;

        let received = server_app.read_to_end().await;
        if received != payload {
            Err(SimulationError::Corrupted {
                sent: payload.len(),
                received: received.len(),
            })?
        }
        tracing::info!(bytes = received.len(), "Simulation complete");

        Ok(Report {
            delivered: received.len(),
            client_mismatches: validate_file(&client_log)?,
            server_mismatches: validate_file(&server_log)?,
            client_log,
            server_log,
        })
    }

    fn log_path(&self, role: Role) -> PathBuf {
        self.log_dir.join(default_log_name(role))
    }
}

/// Checks the transfer log at `path`
pub fn validate_file(path: &Path) -> Result<Vec<Mismatch>, TransferLogError> {
    let records = transfer_log::open(path)?;
    Ok(transfer_log::validate(&records))
}

/// A recognizable byte pattern of length `len`
fn payload(len: usize) -> Vec<u8> {
    (0..len).map(|i| b'a' + (i % 26) as u8).collect()
}

/// An error that stopped a simulation
#[derive(Debug, ThisError)]
pub enum SimulationError {
    #[error("{0}")]
    Session(#[from] SessionError),
    #[error("{0}")]
    Stack(#[from] stcp_core::stack::StackError),
    #[error("{0}")]
    TransferLog(#[from] TransferLogError),
    #[error("{0}")]
    Io(#[from] io::Error),
    #[error("Sent {sent} bytes but {received} arrived intact")]
    Corrupted { sent: usize, received: usize },
}
