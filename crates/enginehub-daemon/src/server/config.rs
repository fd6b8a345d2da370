//! Server configuration.

use std::net::SocketAddr;

use enginehub_core::Config;

use crate::session::SessionSettings;

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// TCP bind address.
    pub addr: SocketAddr,

    /// Maximum concurrent sessions, 0 for unlimited.
    pub max_sessions: usize,

    /// Settings applied to every session.
    pub session: SessionSettings,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            addr: SocketAddr::from(([0, 0, 0, 0], 8000)),
            max_sessions: 0,
            session: SessionSettings::default(),
        }
    }
}

impl ServerConfig {
    /// Create a new server config bound to `addr`.
    pub fn tcp(addr: SocketAddr) -> Self {
        Self {
            addr,
            ..Default::default()
        }
    }

    /// Derive the server config from the loaded settings file.
    pub fn from_config(config: &Config, addr: SocketAddr) -> Self {
        Self {
            addr,
            max_sessions: config.server.max_sessions,
            session: SessionSettings::from_server(&config.server),
        }
    }

    /// Set max sessions.
    #[must_use]
    pub const fn with_max_sessions(mut self, max: usize) -> Self {
        self.max_sessions = max;
        self
    }

    /// Replace the per-session settings.
    #[must_use]
    pub fn with_session_settings(mut self, session: SessionSettings) -> Self {
        self.session = session;
        self
    }
}
