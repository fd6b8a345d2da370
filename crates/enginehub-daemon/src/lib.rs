//! enginehub Daemon Library
//!
//! Core functionality for the enginehub daemon:
//! - Engine subprocess bridging with a background line pump
//! - Per-connection session loop relaying commands and output
//! - Live session counters by engine category
//! - axum server with WebSocket sessions and a status page

pub mod server;
pub mod session;
pub mod subprocess;
