//! Client sessions: one engine subprocess per connection.
//!
//! The runner relays between a client and its engine; the registry counts
//! live sessions per engine category for the status page.

mod registry;
mod runner;
mod types;

pub use registry::{CategoryCount, RegistryError, RegistrySnapshot, SessionGuard, SessionRegistry};
pub use runner::run_session;
pub use types::{SessionOutcome, SessionSettings};
