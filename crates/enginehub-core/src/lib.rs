//! enginehub Core Library
//!
//! Shared functionality for enginehub components:
//! - Configuration resolution and hierarchy
//! - Engine family routing and command templating
//! - Common error types
//! - Tracing subscriber setup

pub mod config;
pub mod error;
pub mod route;
pub mod tracing_init;

pub use config::Config;
pub use error::{Error, Result};
pub use route::{EngineFamily, ResolvedRoute, RouteError, RouteTable};
