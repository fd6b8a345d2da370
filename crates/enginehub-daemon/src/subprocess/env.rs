//! Environment handed to every engine subprocess.
//!
//! Computed once at startup and shared read-only by all sessions; the
//! daemon's own environment is never mutated.

use std::ffi::OsString;
use std::path::PathBuf;

use tracing::warn;

/// Dynamic loader search path variable.
#[cfg(target_os = "macos")]
pub const LIBRARY_PATH_VAR: &str = "DYLD_LIBRARY_PATH";
#[cfg(not(target_os = "macos"))]
pub const LIBRARY_PATH_VAR: &str = "LD_LIBRARY_PATH";

/// Extra environment variables for spawned engines.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SpawnEnvironment {
    vars: Vec<(String, OsString)>,
}

impl SpawnEnvironment {
    /// Prepend `dirs` to the library search path inherited from the daemon.
    pub fn with_library_path(dirs: &[PathBuf]) -> Self {
        Self::from_library_path(dirs, std::env::var_os(LIBRARY_PATH_VAR))
    }

    fn from_library_path(dirs: &[PathBuf], inherited: Option<OsString>) -> Self {
        if dirs.is_empty() {
            return Self::default();
        }
        let mut entries = dirs.to_vec();
        if let Some(inherited) = inherited.filter(|v| !v.is_empty()) {
            entries.extend(std::env::split_paths(&inherited));
        }
        match std::env::join_paths(&entries) {
            Ok(joined) => Self {
                vars: vec![(LIBRARY_PATH_VAR.to_string(), joined)],
            },
            Err(e) => {
                warn!(error = %e, "Ignoring unusable library path entries");
                Self::default()
            }
        }
    }

    pub fn vars(&self) -> &[(String, OsString)] {
        &self.vars
    }
}
