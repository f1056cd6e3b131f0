//! The transfer log: one line per data segment sent and per data segment
//! acknowledged, consumed by [`validator`].
//!
//! Each line is tab separated and newline terminated:
//!
//! ```text
//! Send:	536	536	536
//! Recv:	536	0	536
//! ```
//!
//! The columns are the direction, the send window, the remainder window
//! before the event, and the number of bytes sent or acknowledged.

use serde::{Deserialize, Serialize};
use std::{
    fmt,
    fs::File,
    io::{self, Read, Write},
    path::Path,
};
use thiserror::Error as ThisError;

pub mod validator;
pub use validator::{validate, Mismatch};

/// The file name used by the side that sends the SYN
pub const CLIENT_LOG: &str = "client_log.txt";
/// The file name used by the side that waits for a SYN
pub const SERVER_LOG: &str = "server_log.txt";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Direction {
    #[serde(rename = "Send:")]
    Send,
    #[serde(rename = "Recv:")]
    Recv,
}

/// A single line of the transfer log
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LogRecord {
    pub direction: Direction,
    pub swnd: u32,
    /// The remainder window before this send or acknowledgment was accounted
    pub remainder: u32,
    pub bytes: u32,
}

impl LogRecord {
    pub fn send(swnd: u32, remainder: u32, bytes: u32) -> Self {
        Self {
            direction: Direction::Send,
            swnd,
            remainder,
            bytes,
        }
    }

    pub fn recv(swnd: u32, remainder: u32, bytes: u32) -> Self {
        Self {
            direction: Direction::Recv,
            swnd,
            remainder,
            bytes,
        }
    }
}

/// Writes [`LogRecord`]s to a sink, flushing after every line so the log is
/// complete even when the connection aborts.
pub struct TransferLog {
    writer: csv::Writer<Box<dyn Write + Send>>,
}

impl TransferLog {
    pub fn new(sink: impl Write + Send + 'static) -> Self {
        let writer = csv::WriterBuilder::new()
            .delimiter(b'\t')
            .has_headers(false)
            .terminator(csv::Terminator::Any(b'\n'))
            .quote_style(csv::QuoteStyle::Never)
            .from_writer(Box::new(sink) as Box<dyn Write + Send>);
        Self { writer }
    }

    /// Creates or truncates the log file at `path`
    pub fn create(path: impl AsRef<Path>) -> Result<Self, TransferLogError> {
        Ok(Self::new(File::create(path)?))
    }

    pub fn record(&mut self, record: &LogRecord) -> Result<(), TransferLogError> {
        self.writer.serialize(record)?;
        self.writer.flush()?;
        Ok(())
    }
}

impl fmt::Debug for TransferLog {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransferLog").finish_non_exhaustive()
    }
}

/// Parses a transfer log
pub fn read(reader: impl Read) -> Result<Vec<LogRecord>, TransferLogError> {
    csv::ReaderBuilder::new()
        .delimiter(b'\t')
        .has_headers(false)
        .trim(csv::Trim::All)
        .from_reader(reader)
        .deserialize()
        .map(|record| record.map_err(TransferLogError::from))
        .collect()
}

/// Parses the transfer log at `path`
pub fn open(path: impl AsRef<Path>) -> Result<Vec<LogRecord>, TransferLogError> {
    read(File::open(path)?)
}

/// An error that occurred while writing or reading a transfer log
#[derive(Debug, ThisError)]
pub enum TransferLogError {
    #[error("{0}")]
    Io(#[from] io::Error),
    #[error("Malformed transfer log: {0}")]
    Csv(#[from] csv::Error),
}
