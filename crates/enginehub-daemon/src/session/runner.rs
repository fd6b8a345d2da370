//! The per-connection session loop.
//!
//! ```text
//! CONNECTING -> HANDSHAKE -> ACTIVE -> CLOSING -> CLOSED
//! ```
//!
//! Registration (CONNECTING/CLOSED) is owned by the caller through a
//! [`SessionGuard`](super::SessionGuard). This module spawns the engine, runs
//! the optional handshake, then relays in both directions until either side
//! goes away, and always closes the bridge before returning.

use std::pin::pin;

use futures::{Sink, SinkExt, Stream, StreamExt};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use enginehub_core::ResolvedRoute;

use super::types::{SessionOutcome, SessionSettings};
use crate::subprocess::{BridgeError, ProcessBridge};

/// Run one session to completion.
///
/// `inbound` yields client command lines and ends when the client
/// disconnects. Engine output lines are written to `outbound`. `shutdown`
/// flips to `true` when the daemon is stopping.
pub async fn run_session<I, O>(
    route: &ResolvedRoute,
    settings: &SessionSettings,
    inbound: I,
    outbound: O,
    shutdown: watch::Receiver<bool>,
) -> SessionOutcome
where
    I: Stream<Item = String>,
    O: Sink<String>,
    O::Error: std::fmt::Display,
{
    let mut bridge = match ProcessBridge::spawn(&settings.spawn_config(route)) {
        Ok(bridge) => bridge,
        Err(e) => {
            warn!(program = %route.program.display(), error = %e, "Engine spawn failed");
            return SessionOutcome::SpawnFailed(e);
        }
    };

    let outcome = drive(&mut bridge, route, settings, inbound, outbound, shutdown).await;

    debug!(?outcome, "Session closing");
    bridge.close().await;
    outcome
}

async fn drive<I, O>(
    bridge: &mut ProcessBridge,
    route: &ResolvedRoute,
    settings: &SessionSettings,
    inbound: I,
    outbound: O,
    mut shutdown: watch::Receiver<bool>,
) -> SessionOutcome
where
    I: Stream<Item = String>,
    O: Sink<String>,
    O::Error: std::fmt::Display,
{
    if let Err(e) = handshake(bridge, route, settings).await {
        warn!(error = %e, "Engine handshake failed");
        return SessionOutcome::HandshakeFailed(e);
    }
    info!(pid = bridge.pid(), "Session active");

    let mut inbound = pin!(inbound);
    let mut outbound = pin!(outbound);

    loop {
        // Drain cycle: forward everything queued right now.
        loop {
            match bridge.try_receive() {
                Ok(Some(line)) => {
                    if line.trim().is_empty() {
                        continue;
                    }
                    if let Err(e) = outbound.send(line).await {
                        return SessionOutcome::ClientSendFailed {
                            reason: e.to_string(),
                        };
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    info!(error = %e, "Engine exited, ending session");
                    return SessionOutcome::EngineExited(e);
                }
            }
        }

        if *shutdown.borrow() {
            return SessionOutcome::Shutdown;
        }

        tokio::select! {
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    return SessionOutcome::Shutdown;
                }
            }
            message = inbound.next() => match message {
                Some(command) => {
                    debug!(%command, "Client command");
                    if let Err(e) = bridge.send(&command) {
                        warn!(error = %e, "Engine write failed");
                        return SessionOutcome::WriteFailed(e);
                    }
                }
                None => return SessionOutcome::ClientDisconnected,
            },
            () = bridge.output_ready() => {}
            () = tokio::time::sleep(settings.poll_interval) => {}
        }
    }
}

/// Route-specific warm-up before the session goes live.
async fn handshake(
    bridge: &mut ProcessBridge,
    route: &ResolvedRoute,
    settings: &SessionSettings,
) -> Result<(), BridgeError> {
    if !route.startup_delay.is_zero() {
        tokio::time::sleep(route.startup_delay).await;
    }
    if route.wait_ready {
        bridge.await_ready(settings.ready_timeout).await?;
    }
    for command in &route.handshake {
        bridge.send(command)?;
    }
    Ok(())
}
