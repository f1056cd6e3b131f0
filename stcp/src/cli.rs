//! Parses the command line arguments.
//!
//! Basic usage for a transfer between two terminals, with logging on:
//!
//! ```text
//! stcp --log listen --bind 127.0.0.1:4000 > received.txt
//! stcp --log connect --peer 127.0.0.1:4000 < sent.txt
//! ```

use crate::{
    simulation::{self, Simulation, SimulationError},
    udp_stack::UdpStack,
};
use clap::{Parser, Subcommand};
use stcp_core::{
    stack::StackError, transfer_log::TransferLogError, Config, Role, SessionError, StcpSession,
};
use std::{
    fs::{create_dir_all, OpenOptions},
    io,
    net::SocketAddr,
    path::PathBuf,
    process::ExitCode,
    sync::Arc,
    time::Duration,
};
use thiserror::Error as ThisError;
use tracing::Level;
use tracing_subscriber::FmtSubscriber;

/// Stores the different command line arguments.
#[derive(Debug, Parser)]
#[command(version, about = "A simplified TCP over UDP")]
pub struct Args {
    /// Write structured logs to a timestamped file under ./logs
    #[arg(short, long, global = true)]
    log: bool,
    /// Print more diagnostics to standard error
    #[arg(short, long, global = true)]
    verbose: bool,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Wait for a connection and write what arrives to standard output
    Listen {
        /// The address to receive on
        #[arg(long)]
        bind: SocketAddr,
        /// Where to write the transfer log
        #[arg(long = "transfer-log")]
        transfer_log: Option<PathBuf>,
        /// Give up after this many seconds without a datagram
        #[arg(long)]
        timeout: Option<u64>,
    },
    /// Connect to a listener and send standard input
    Connect {
        /// The listener's address
        #[arg(long)]
        peer: SocketAddr,
        /// The address to send from
        #[arg(long, default_value = "0.0.0.0:0")]
        bind: SocketAddr,
        /// Where to write the transfer log
        #[arg(long = "transfer-log")]
        transfer_log: Option<PathBuf>,
        /// Give up after this many seconds without a datagram
        #[arg(long)]
        timeout: Option<u64>,
    },
    /// Run a client and a server against each other in memory
    Simulate {
        /// The number of bytes to transfer
        #[arg(long, default_value_t = 20_000)]
        bytes: usize,
        /// Delay added to every datagram
        #[arg(long = "latency-ms")]
        latency_ms: Option<u64>,
        /// Where to write the client and server logs
        #[arg(long = "log-dir", default_value = ".")]
        log_dir: PathBuf,
    },
    /// Check transfer logs against the window algorithm
    Validate {
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },
}

/// Parses command line arguments and runs the chosen command.
pub async fn initialize_from_arguments() -> ExitCode {
    let args = Args::parse();
    if let Err(e) = initialize_logging(args.log, args.verbose) {
        eprintln!("Could not set up logging: {e}");
        return ExitCode::FAILURE;
    }
    match run(args.command).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{e}");
            ExitCode::FAILURE
        }
    }
}

async fn run(command: Command) -> Result<(), CliError> {
    match command {
        Command::Listen {
            bind,
            transfer_log,
            timeout,
        } => {
            let stack = UdpStack::listen(bind)
                .await?
                .idle_timeout(timeout.map(Duration::from_secs));
            let config = Config {
                local_port: bind.port(),
                transfer_log,
                ..Default::default()
            };
            serve(stack, Role::Passive, config).await
        }
        Command::Connect {
            peer,
            bind,
            transfer_log,
            timeout,
        } => {
            let stack = UdpStack::connect(bind, peer)
                .await?
                .idle_timeout(timeout.map(Duration::from_secs));
            let config = Config {
                local_port: stack.local_addr()?.port(),
                remote_port: peer.port(),
                transfer_log,
                ..Default::default()
            };
            serve(stack, Role::Active, config).await
        }
        Command::Simulate {
            bytes,
            latency_ms,
            log_dir,
        } => {
            let report = Simulation {
                bytes,
                latency: latency_ms.map(Duration::from_millis),
                log_dir,
            }
            .run()
            .await?;
            println!(
                "Delivered {} bytes. Logs: {} {}",
                report.delivered,
                report.client_log.display(),
                report.server_log.display()
            );
            let mismatches = report.client_mismatches.len() + report.server_mismatches.len();
            for mismatch in report
                .client_mismatches
                .iter()
                .chain(&report.server_mismatches)
            {
                println!("{mismatch}");
            }
            if report.passed() {
                Ok(())
            } else {
                Err(CliError::Mismatches(mismatches))
            }
        }
        Command::Validate { files } => {
            let mut mismatches = 0;
            for file in &files {
                let found = simulation::validate_file(file)?;
                for mismatch in &found {
                    println!("{}: {mismatch}", file.display());
                }
                if found.is_empty() {
                    println!("{}: ok", file.display());
                }
                mismatches += found.len();
            }
            match mismatches {
                0 => Ok(()),
                n => Err(CliError::Mismatches(n)),
            }
        }
    }
}

/// Runs one end of a connection over UDP. The transfer log goes to the
/// conventional file for the role unless another path was given.
async fn serve(stack: UdpStack, role: Role, config: Config) -> Result<(), CliError> {
    let config = match config.transfer_log {
        Some(_) => config,
        None => config.with_default_log(role),
    };
    let mut session = StcpSession::new(stack, role, &config)?;
    session.run().await?;
    Ok(())
}

/// Installs the global tracing subscriber. With `log` set, events are written
/// as JSON to a file under ./logs named for the current time. Otherwise they
/// go to standard error.
fn initialize_logging(log: bool, verbose: bool) -> Result<(), CliError> {
    let level = if verbose { Level::DEBUG } else { Level::WARN };
    if log {
        let main_path = "./logs";
        create_dir_all(main_path)?;
        let file_path = format!(
            "{}/debug-{}.log",
            main_path,
            chrono::offset::Local::now().format("%y-%m-%d_%H-%M-%S")
        );
        let file = OpenOptions::new()
            .write(true)
            .append(true)
            .create(true)
            .open(file_path)?;
        let subscriber = FmtSubscriber::builder()
            .with_max_level(Level::DEBUG)
            .with_writer(Arc::new(file))
            .json()
            .finish();
        tracing::subscriber::set_global_default(subscriber)?;
    } else {
        let subscriber = FmtSubscriber::builder()
            .with_max_level(level)
            .with_writer(io::stderr)
            .compact()
            .finish();
        tracing::subscriber::set_global_default(subscriber)?;
    }
    Ok(())
}

/// An error that ended a command
#[derive(Debug, ThisError)]
pub enum CliError {
    #[error("{0}")]
    Session(#[from] SessionError),
    #[error("{0}")]
    Stack(#[from] StackError),
    #[error("{0}")]
    Simulation(#[from] SimulationError),
    #[error("{0}")]
    TransferLog(#[from] TransferLogError),
    #[error("{0}")]
    Io(#[from] io::Error),
    #[error("Could not install the tracing subscriber: {0}")]
    Logging(#[from] tracing::subscriber::SetGlobalDefaultError),
    #[error("{0} line(s) did not match the window algorithm")]
    Mismatches(usize),
}
