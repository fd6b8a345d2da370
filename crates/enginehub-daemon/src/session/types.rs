//! Session settings and outcomes.

use std::time::Duration;

use enginehub_core::ResolvedRoute;
use enginehub_core::config::ServerSettings;

use crate::subprocess::{BridgeError, SpawnConfig, SpawnEnvironment};

/// Per-session tuning shared by every session of a daemon.
#[derive(Debug, Clone)]
pub struct SessionSettings {
    /// Upper bound on the pause between drain cycles.
    pub poll_interval: Duration,
    pub quit_grace: Duration,
    pub pump_join_timeout: Duration,
    pub ready_timeout: Duration,
    pub merge_stderr: bool,
    pub environment: SpawnEnvironment,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(100),
            quit_grace: Duration::from_secs(2),
            pump_join_timeout: Duration::from_secs(1),
            ready_timeout: Duration::from_secs(10),
            merge_stderr: true,
            environment: SpawnEnvironment::default(),
        }
    }
}

impl SessionSettings {
    /// Derive session settings from the server section of the config.
    pub fn from_server(settings: &ServerSettings) -> Self {
        Self {
            poll_interval: settings.poll_interval(),
            quit_grace: settings.quit_grace(),
            pump_join_timeout: settings.pump_join_timeout(),
            ready_timeout: settings.ready_timeout(),
            merge_stderr: settings.merge_stderr,
            environment: SpawnEnvironment::with_library_path(&settings.library_path),
        }
    }

    /// Spawn configuration for a resolved route.
    pub fn spawn_config(&self, route: &ResolvedRoute) -> SpawnConfig {
        let mut config = SpawnConfig::new(&route.program)
            .with_args(route.args.iter().cloned())
            .with_quit_grace(self.quit_grace)
            .with_merge_stderr(self.merge_stderr);
        config.pump_join_timeout = self.pump_join_timeout;
        for (key, value) in self.environment.vars() {
            config = config.with_env(key.clone(), value.clone());
        }
        config
    }
}

/// Why a session ended.
#[derive(Debug)]
pub enum SessionOutcome {
    /// The client closed the connection.
    ClientDisconnected,
    /// Forwarding a line to the client failed.
    ClientSendFailed { reason: String },
    /// The engine could not be started.
    SpawnFailed(BridgeError),
    /// Readiness wait or handshake commands failed.
    HandshakeFailed(BridgeError),
    /// Writing a client command failed.
    WriteFailed(BridgeError),
    /// The engine exited; its output was fully relayed first.
    EngineExited(BridgeError),
    /// The daemon is shutting down.
    Shutdown,
}

impl SessionOutcome {
    /// Whether the session ended because something went wrong on our side.
    pub const fn is_failure(&self) -> bool {
        matches!(
            self,
            Self::SpawnFailed(_) | Self::HandshakeFailed(_) | Self::WriteFailed(_)
        )
    }

    /// Short reason suitable for a WebSocket close frame.
    pub const fn close_reason(&self) -> &'static str {
        match self {
            Self::ClientDisconnected | Self::ClientSendFailed { .. } => "client disconnected",
            Self::SpawnFailed(_) => "engine unavailable",
            Self::HandshakeFailed(_) => "engine handshake failed",
            Self::WriteFailed(_) => "engine input closed",
            Self::EngineExited(_) => "engine exited",
            Self::Shutdown => "server shutting down",
        }
    }
}
