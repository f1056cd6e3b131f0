//! The `stcp` command line tool: STCP connections over UDP between processes,
//! in-memory simulations, and transfer log checks.

pub mod cli;
pub mod simulation;
pub mod udp_stack;
