//! A simplified [Transmission Control
//! Protocol](https://www.rfc-editor.org/rfc/rfc9293.html) that moves a byte
//! stream over datagrams with one data segment in flight at a time.
//!
//! Connections open with the three-way handshake and close with the four-way
//! close. Every data segment is acknowledged before the next is sent, and the
//! size of each segment is bounded by a congestion window that grows with
//! every acknowledgment. Nothing is ever retransmitted: a lost segment stalls
//! the connection.

pub mod connection;
pub use connection::{Action, Connection, ConnectionError, Role, State, Trigger};

pub mod segment;
pub use segment::{Segment, SegmentKind};

pub mod stcp_parsing;

mod stcp_session;
pub use stcp_session::{SessionError, StcpSession};

pub mod window;
pub use window::Window;
