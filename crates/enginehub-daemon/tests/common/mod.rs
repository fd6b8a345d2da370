//! Shared helpers: fake engines written as small shell scripts.

#![allow(dead_code, clippy::unwrap_used)]

use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use enginehub_core::ResolvedRoute;

/// A line-oriented toy engine.
///
/// - `uci` answers `id name fake` and `uciok`
/// - `isready` answers `readyok`
/// - `ping` answers `pong`
/// - `blank` prints an empty line followed by `after-blank`
/// - `burst N` prints `n1` .. `nN`
/// - `crash` kills the engine without further output
/// - `quit` exits cleanly
/// - anything else is echoed back as `echo:<line>`
pub const FAKE_ENGINE: &str = r#"#!/bin/sh
while IFS= read -r line; do
  case "$line" in
    uci) echo "id name fake"; echo "uciok" ;;
    isready) echo "readyok" ;;
    ping) echo "pong" ;;
    blank) echo ""; echo "after-blank" ;;
    burst\ *)
      n=${line#burst }
      i=1
      while [ "$i" -le "$n" ]; do echo "n$i"; i=$((i + 1)); done ;;
    crash) kill -9 $$ ;;
    quit) exit 0 ;;
    *) echo "echo:$line" ;;
  esac
done
"#;

/// Write an executable script into `dir`.
pub fn write_script(dir: &Path, name: &str, body: &str) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, body).unwrap();
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    path
}

/// Write the toy engine into `dir`.
pub fn fake_engine(dir: &Path) -> PathBuf {
    write_script(dir, "fake-engine", FAKE_ENGINE)
}

/// A route running `program` with no handshake.
pub fn route(program: &Path) -> ResolvedRoute {
    ResolvedRoute {
        category: "fake".into(),
        variant: "1".into(),
        program: program.to_path_buf(),
        args: Vec::new(),
        startup_delay: Duration::ZERO,
        wait_ready: false,
        handshake: Vec::new(),
    }
}
