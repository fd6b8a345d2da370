//! Background line pump over a child's output streams.
//!
//! Each output stream gets its own reader task. Readers push every line into
//! one unbounded channel and ring a [`Notify`] so a consumer can sleep until
//! output arrives instead of spinning. The channel never applies
//! backpressure, so the child can never stall on a full pipe while the
//! session is busy talking to its client.

use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::sync::{Notify, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

/// Result of a non-blocking read from the pump.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PumpRead {
    /// The oldest queued line.
    Line(String),
    /// Nothing queued right now; readers are still running.
    Empty,
    /// Every reader hit end-of-stream and the queue is drained.
    Closed,
}

/// Reads lines from one or more child output streams into a FIFO queue.
pub struct LinePump {
    rx: mpsc::UnboundedReceiver<String>,
    notify: Arc<Notify>,
    readers: Vec<JoinHandle<()>>,
    label: String,
}

impl LinePump {
    /// Create a pump with no readers attached yet.
    pub fn builder(label: impl Into<String>) -> PumpBuilder {
        let (tx, rx) = mpsc::unbounded_channel();
        PumpBuilder {
            pump: Self {
                rx,
                notify: Arc::new(Notify::new()),
                readers: Vec::new(),
                label: label.into(),
            },
            tx,
        }
    }

    /// Pop the oldest line without waiting.
    pub fn try_next(&mut self) -> PumpRead {
        match self.rx.try_recv() {
            Ok(line) => PumpRead::Line(line),
            Err(mpsc::error::TryRecvError::Empty) => PumpRead::Empty,
            Err(mpsc::error::TryRecvError::Disconnected) => PumpRead::Closed,
        }
    }

    /// Resolves once a reader has queued a line or stopped since the last
    /// wake-up. A wake-up that arrived while nobody was waiting is kept, so
    /// calling this after an empty [`try_next`](Self::try_next) never misses
    /// output.
    pub async fn readable(&self) {
        self.notify.notified().await;
    }

    /// Whether every reader task has returned.
    pub fn is_finished(&self) -> bool {
        self.readers.iter().all(JoinHandle::is_finished)
    }

    /// Wait for the readers to finish, aborting any that outlive `timeout`.
    ///
    /// Queued lines stay readable afterwards.
    pub async fn join(&mut self, timeout: Duration) {
        let deadline = tokio::time::Instant::now() + timeout;
        for mut reader in self.readers.drain(..) {
            match tokio::time::timeout_at(deadline, &mut reader).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!(pump = %self.label, error = %e, "Pump reader task failed"),
                Err(_) => {
                    warn!(pump = %self.label, "Pump reader did not stop in time, aborting");
                    reader.abort();
                }
            }
        }
    }
}

impl Drop for LinePump {
    fn drop(&mut self) {
        for reader in &self.readers {
            reader.abort();
        }
    }
}

/// Attaches reader tasks to a [`LinePump`] before it is handed out.
pub struct PumpBuilder {
    pump: LinePump,
    tx: mpsc::UnboundedSender<String>,
}

impl PumpBuilder {
    /// Spawn a reader task that pumps `stream` until end-of-stream.
    #[must_use]
    pub fn reader<R>(mut self, stream_name: &'static str, stream: R) -> Self
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        let handle = tokio::spawn(pump_lines(
            stream,
            self.tx.clone(),
            Arc::clone(&self.pump.notify),
            format!("{}/{stream_name}", self.pump.label),
        ));
        self.pump.readers.push(handle);
        self
    }

    /// Finish building. The pump reports [`PumpRead::Closed`] once every
    /// attached reader has stopped and the queue is empty.
    pub fn start(self) -> LinePump {
        // Dropping our sender leaves the readers as the only producers.
        let Self { pump, tx } = self;
        drop(tx);
        pump
    }
}

async fn pump_lines<R>(
    stream: R,
    tx: mpsc::UnboundedSender<String>,
    notify: Arc<Notify>,
    label: String,
) where
    R: AsyncRead + Unpin,
{
    let mut reader = BufReader::new(stream);
    let mut buf = Vec::new();
    let mut count: u64 = 0;

    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf).await {
            Ok(0) => break,
            Ok(_) => {
                let line = decode_line(&buf);
                trace!(pump = %label, %line, "engine output");
                if tx.send(line).is_err() {
                    debug!(pump = %label, "Pump consumer dropped");
                    break;
                }
                count += 1;
                notify.notify_one();
            }
            Err(e) => {
                // Treated like end-of-stream; the bridge notices the dead
                // process on its next read.
                debug!(pump = %label, error = %e, "Pump read failed");
                break;
            }
        }
    }

    drop(tx);
    notify.notify_one();
    debug!(pump = %label, lines = count, "Pump reader finished");
}

/// Strip the line terminator and decode, replacing invalid UTF-8.
fn decode_line(raw: &[u8]) -> String {
    let raw = raw.strip_suffix(b"\n").unwrap_or(raw);
    let raw = raw.strip_suffix(b"\r").unwrap_or(raw);
    String::from_utf8_lossy(raw).into_owned()
}
