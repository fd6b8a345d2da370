//! Process bridge: one engine subprocess and its line pump.
//!
//! The bridge never touches the child's pipes itself. All output goes through
//! the [`LinePump`] and all input through a writer task, so neither a full
//! stdout pipe nor a child that stopped reading stdin can stall the caller.

use std::ffi::OsString;
use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use tokio::io::AsyncWriteExt;
use tokio::process::{Child, ChildStdin, Command};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::pump::{LinePump, PumpRead};

/// Command that asks an engine to shut down.
pub const QUIT_COMMAND: &str = "quit";
/// Readiness probe and its acknowledgment.
pub const READY_PROBE: &str = "isready";
pub const READY_ACK: &str = "readyok";

/// Fallback wake-up while waiting for the readiness acknowledgment.
const READY_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// How long an exited engine's output may stay open (held by a grandchild)
/// before the bridge reports the crash anyway.
const ORPHANED_OUTPUT_GRACE: Duration = Duration::from_millis(500);

/// How to launch an engine subprocess.
#[derive(Debug, Clone)]
pub struct SpawnConfig {
    /// Executable path.
    pub program: PathBuf,
    /// Arguments passed to the executable.
    pub args: Vec<String>,
    /// Extra environment for the child.
    pub env: Vec<(String, OsString)>,
    /// Working directory (inherits the daemon's when `None`).
    pub working_directory: Option<PathBuf>,
    /// Relay stderr lines through the same queue as stdout.
    pub merge_stderr: bool,
    /// How long `close` waits for the child to exit after `quit`.
    pub quit_grace: Duration,
    /// How long `close` waits for the pump readers.
    pub pump_join_timeout: Duration,
}

impl SpawnConfig {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            env: Vec::new(),
            working_directory: None,
            merge_stderr: true,
            quit_grace: Duration::from_secs(2),
            pump_join_timeout: Duration::from_secs(1),
        }
    }

    #[must_use]
    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    #[must_use]
    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<OsString>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    #[must_use]
    pub const fn with_quit_grace(mut self, grace: Duration) -> Self {
        self.quit_grace = grace;
        self
    }

    #[must_use]
    pub const fn with_merge_stderr(mut self, merge: bool) -> Self {
        self.merge_stderr = merge;
        self
    }
}

/// Errors from bridge operations.
#[derive(Debug, thiserror::Error)]
pub enum BridgeError {
    #[error("Failed to spawn {program}: {reason}")]
    Spawn { program: String, reason: String },

    #[error("Failed to write to engine stdin: {reason}")]
    Write { reason: String },

    #[error("Engine process exited ({status})")]
    ProcessCrashed { status: String },

    #[error("Engine did not answer isready within {timeout:?}")]
    ReadyTimeout { timeout: Duration },
}

/// Owns one engine subprocess for the lifetime of a session.
pub struct ProcessBridge {
    child: Child,
    stdin_tx: Option<mpsc::UnboundedSender<String>>,
    writer: JoinHandle<()>,
    write_error: Arc<OnceLock<String>>,
    pump: LinePump,
    pid: Option<u32>,
    program: String,
    quit_sent: bool,
    exit_status: Option<ExitStatus>,
    exit_seen_at: Option<tokio::time::Instant>,
    closed: bool,
    quit_grace: Duration,
    pump_join_timeout: Duration,
}

impl ProcessBridge {
    /// Launch the engine and start pumping its output.
    pub fn spawn(config: &SpawnConfig) -> Result<Self, BridgeError> {
        let program = config.program.display().to_string();
        let mut cmd = Command::new(&config.program);
        cmd.args(&config.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(if config.merge_stderr {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .kill_on_drop(true);
        for (key, value) in &config.env {
            cmd.env(key, value);
        }
        if let Some(dir) = &config.working_directory {
            cmd.current_dir(dir);
        }

        let mut child = cmd.spawn().map_err(|e| BridgeError::Spawn {
            program: program.clone(),
            reason: e.to_string(),
        })?;
        let pid = child.id();

        let missing = |stream: &str| BridgeError::Spawn {
            program: program.clone(),
            reason: format!("Failed to capture {stream}"),
        };
        let stdin = child.stdin.take().ok_or_else(|| missing("stdin"))?;
        let stdout = child.stdout.take().ok_or_else(|| missing("stdout"))?;

        let label = pid.map_or_else(|| "engine".to_string(), |pid| format!("engine-{pid}"));
        let (stdin_tx, stdin_rx) = mpsc::unbounded_channel();
        let write_error = Arc::new(OnceLock::new());
        let writer = tokio::spawn(write_lines(stdin, stdin_rx, Arc::clone(&write_error), pid));
        let mut pump = LinePump::builder(label).reader("stdout", stdout);
        if let Some(stderr) = child.stderr.take() {
            pump = pump.reader("stderr", stderr);
        }

        info!(program = %program, args = ?config.args, pid, "Spawned engine subprocess");

        Ok(Self {
            child,
            stdin_tx: Some(stdin_tx),
            writer,
            write_error,
            pump: pump.start(),
            pid,
            program,
            quit_sent: false,
            exit_status: None,
            exit_seen_at: None,
            closed: false,
            quit_grace: config.quit_grace,
            pump_join_timeout: config.pump_join_timeout,
        })
    }

    pub const fn pid(&self) -> Option<u32> {
        self.pid
    }

    pub const fn quit_sent(&self) -> bool {
        self.quit_sent
    }

    /// Queue `command` for the engine's stdin.
    ///
    /// Never waits on the pipe. Silently ignored once `quit` went out or the
    /// engine has exited. After a failed write every later call fails.
    pub fn send(&mut self, command: &str) -> Result<(), BridgeError> {
        if self.quit_sent {
            debug!(pid = self.pid, command, "Dropping command sent after quit");
            return Ok(());
        }
        if self.has_exited() {
            debug!(pid = self.pid, command, "Dropping command for exited engine");
            return Ok(());
        }
        if let Some(reason) = self.write_error.get() {
            return Err(BridgeError::Write {
                reason: reason.clone(),
            });
        }
        let stdin_tx = self.stdin_tx.as_ref().ok_or_else(|| BridgeError::Write {
            reason: "stdin already closed".to_string(),
        })?;

        if stdin_tx.send(command.to_string()).is_err() {
            // The writer only stops on a write error or after close.
            self.stdin_tx = None;
            return Err(BridgeError::Write {
                reason: self
                    .write_error
                    .get()
                    .cloned()
                    .unwrap_or_else(|| "stdin already closed".to_string()),
            });
        }

        debug!(pid = self.pid, command, "Queued command for engine");
        if command.trim() == QUIT_COMMAND {
            self.quit_sent = true;
        }
        Ok(())
    }

    /// Pop the oldest output line without waiting.
    ///
    /// `Ok(None)` means nothing is queued yet. Once the engine has exited and
    /// its backlog is drained, every call returns
    /// [`BridgeError::ProcessCrashed`].
    pub fn try_receive(&mut self) -> Result<Option<String>, BridgeError> {
        match self.pump.try_next() {
            PumpRead::Line(line) => Ok(Some(line)),
            PumpRead::Empty => match self.poll_exit() {
                Some(status) if self.orphaned_output_expired() => {
                    Err(BridgeError::ProcessCrashed {
                        status: status.to_string(),
                    })
                }
                _ => Ok(None),
            },
            // Output closed. Only a dead process counts as crashed; an engine
            // that merely closed stdout may still be running.
            PumpRead::Closed => match self.poll_exit() {
                Some(status) => Err(BridgeError::ProcessCrashed {
                    status: status.to_string(),
                }),
                None => Ok(None),
            },
        }
    }

    /// Resolves when new output (or end of output) may be available.
    pub async fn output_ready(&self) {
        self.pump.readable().await;
    }

    /// Send `isready` and wait for `readyok`, discarding everything else.
    ///
    /// For session setup only; it holds the caller until the engine answers
    /// or `timeout` elapses.
    pub async fn await_ready(&mut self, timeout: Duration) -> Result<(), BridgeError> {
        self.send(READY_PROBE)?;
        let wait = async {
            loop {
                match self.try_receive()? {
                    Some(line) if line.trim() == READY_ACK => return Ok(()),
                    Some(line) => debug!(pid = self.pid, %line, "Discarding pre-ready output"),
                    None => {
                        tokio::select! {
                            () = self.output_ready() => {}
                            () = tokio::time::sleep(READY_POLL_INTERVAL) => {}
                        }
                    }
                }
            }
        };
        tokio::time::timeout(timeout, wait)
            .await
            .map_err(|_| BridgeError::ReadyTimeout { timeout })?
    }

    /// Shut the engine down: `quit` if not yet sent, a bounded wait, then a
    /// kill, then join the pump. Safe to call more than once.
    pub async fn close(&mut self) -> Option<ExitStatus> {
        if self.closed {
            return self.exit_status;
        }
        self.closed = true;

        if !self.quit_sent && !self.has_exited() {
            if let Err(e) = self.send(QUIT_COMMAND) {
                debug!(pid = self.pid, error = %e, "Could not deliver quit");
            }
        }
        // The writer closes stdin once its queue is flushed: a second hint
        // for engines that ignore quit.
        self.stdin_tx = None;

        if self.exit_status.is_none() {
            match tokio::time::timeout(self.quit_grace, self.child.wait()).await {
                Ok(Ok(status)) => {
                    debug!(pid = self.pid, ?status, "Engine exited gracefully");
                    self.exit_status = Some(status);
                }
                Ok(Err(e)) => {
                    warn!(pid = self.pid, error = %e, "Error waiting for engine, killing");
                    self.kill().await;
                }
                Err(_) => {
                    warn!(pid = self.pid, program = %self.program, "Engine ignored quit, killing");
                    self.kill().await;
                }
            }
        }

        // A writer still blocked on a full pipe holds stdin open.
        self.writer.abort();
        self.pump.join(self.pump_join_timeout).await;
        info!(pid = self.pid, status = ?self.exit_status, "Engine bridge closed");
        self.exit_status
    }

    async fn kill(&mut self) {
        if let Err(e) = self.child.kill().await {
            warn!(pid = self.pid, error = %e, "Failed to kill engine");
        }
        self.exit_status = self.child.try_wait().ok().flatten();
    }

    fn orphaned_output_expired(&mut self) -> bool {
        let seen = *self
            .exit_seen_at
            .get_or_insert_with(tokio::time::Instant::now);
        seen.elapsed() >= ORPHANED_OUTPUT_GRACE
    }

    fn has_exited(&mut self) -> bool {
        self.poll_exit().is_some()
    }

    fn poll_exit(&mut self) -> Option<ExitStatus> {
        if self.exit_status.is_none() {
            match self.child.try_wait() {
                Ok(status) => self.exit_status = status,
                Err(e) => debug!(pid = self.pid, error = %e, "try_wait failed"),
            }
        }
        self.exit_status
    }
}

impl Drop for ProcessBridge {
    fn drop(&mut self) {
        self.writer.abort();
    }
}

/// Drain queued commands into the child's stdin, one line each.
///
/// Ends when the bridge drops its sender (stdin closes with it) or on the
/// first write error, which is recorded for later sends.
async fn write_lines(
    mut stdin: ChildStdin,
    mut commands: mpsc::UnboundedReceiver<String>,
    write_error: Arc<OnceLock<String>>,
    pid: Option<u32>,
) {
    while let Some(mut line) = commands.recv().await {
        line.push('\n');
        let written = async {
            stdin.write_all(line.as_bytes()).await?;
            stdin.flush().await
        }
        .await;
        if let Err(e) = written {
            debug!(pid, error = %e, "Engine stdin write failed");
            let _ = write_error.set(e.to_string());
            return;
        }
    }
}
