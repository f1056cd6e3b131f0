//! STCP, a simplified TCP for carrying a reliable byte stream over an
//! unreliable datagram network.
//!
//! # Organization
//! - [`stcp`] holds the protocol: the segment codec, the send window, the
//!   connection state machine and the event loop in [`StcpSession`]
//! - [`Stack`] is everything a session needs from the outside world, and
//!   [`SimStack`](stack::SimStack) provides it in memory over one of the
//!   [`networks`]
//! - [`transfer_log`] writes the per-connection window log and checks it
//!   against the window algorithm
//!
//! # Running a connection
//!
//! A session owns its connection for its whole life. [`StcpSession::run`]
//! opens the connection actively or passively, shuttles data until the close
//! handshake completes, and returns. Both ends of a simulated connection run
//! on one task:
//!
//! ```
//! use stcp_core::{networks::Reliable, stack::SimStack, Config, Role, StcpSession};
//! use std::sync::Arc;
//!
//! # tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap().block_on(async {
//! let ((client, client_app), (server, mut server_app)) = SimStack::pair(Arc::new(Reliable::new()));
//! let mut client = StcpSession::new(client, Role::Active, &Config::default()).unwrap();
//! let mut server = StcpSession::new(server, Role::Passive, &Config::default()).unwrap();
//!
//! client_app.write(b"Hello!".to_vec()).await.unwrap();
//! client_app.close().await.unwrap();
//! let (client_result, server_result) = tokio::join!(client.run(), server.run());
//! client_result.unwrap();
//! server_result.unwrap();
//! assert_eq!(server_app.read_to_end().await, b"Hello!");
//! # });
//! ```

mod logging;

pub mod config;
pub use config::Config;

pub mod networks;
pub use networks::Network;

pub mod stack;
pub use stack::Stack;

pub mod stcp;
pub use stcp::{Role, SessionError, StcpSession};

pub mod transfer_log;
pub use transfer_log::TransferLog;
