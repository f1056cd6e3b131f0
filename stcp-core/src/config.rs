use crate::{
    stcp::Role,
    transfer_log::{CLIENT_LOG, SERVER_LOG},
};
use std::path::PathBuf;

/// Settings for one end of a connection
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Config {
    /// The initial sequence number
    pub iss: u32,
    /// Written into the source port field of every segment
    pub local_port: u16,
    /// Written into the destination port field of every segment. A passive
    /// end left at zero takes the port from the arriving SYN.
    pub remote_port: u16,
    /// Where to write the transfer log. No log is written when unset.
    pub transfer_log: Option<PathBuf>,
}

impl Config {
    /// Writes the transfer log to the conventional file name for `role` in
    /// the working directory
    pub fn with_default_log(mut self, role: Role) -> Self {
        self.transfer_log = Some(default_log_name(role).into());
        self
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            iss: 1,
            local_port: 0,
            remote_port: 0,
            transfer_log: None,
        }
    }
}

/// The transfer log file name for a side of the connection
pub fn default_log_name(role: Role) -> &'static str {
    match role {
        Role::Active => CLIENT_LOG,
        Role::Passive => SERVER_LOG,
    }
}
