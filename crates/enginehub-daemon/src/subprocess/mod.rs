//! Engine subprocess management.

pub mod bridge;
pub mod env;
pub mod pump;

pub use bridge::{BridgeError, ProcessBridge, SpawnConfig};
pub use env::SpawnEnvironment;
pub use pump::{LinePump, PumpRead};
