//! WebSocket endpoint: one engine session per connection.

use axum::extract::ws::{CloseFrame, Message, WebSocket, close_code};
use axum::extract::{Path, State, WebSocketUpgrade};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use futures::{SinkExt, Stream, StreamExt, future};
use tracing::{Instrument, info, info_span, warn};

use enginehub_core::ResolvedRoute;

use super::AppState;
use crate::session::{RegistryError, SessionGuard, SessionOutcome, run_session};

/// `GET /{route}`: resolve the engine family and upgrade.
///
/// Unknown routes and a full server are refused before any process is
/// spawned.
pub async fn engine_socket(
    ws: WebSocketUpgrade,
    Path(route): Path<String>,
    State(state): State<AppState>,
) -> Response {
    let resolved = match state.routes.resolve(&route) {
        Ok(resolved) => resolved,
        Err(e) => {
            warn!(%route, error = %e, "Rejecting engine route");
            return (StatusCode::NOT_FOUND, e.to_string()).into_response();
        }
    };

    let guard = match state.registry.register(&resolved.category) {
        Ok(guard) => guard,
        Err(e @ RegistryError::AtCapacity { .. }) => {
            warn!(%route, error = %e, "Rejecting session");
            return (StatusCode::SERVICE_UNAVAILABLE, e.to_string()).into_response();
        }
        Err(e) => {
            warn!(%route, error = %e, "Rejecting session");
            return (StatusCode::NOT_FOUND, e.to_string()).into_response();
        }
    };

    let session_id = uuid::Uuid::new_v4().to_string();
    let span = info_span!(
        "session",
        %session_id,
        category = %resolved.category,
        variant = %resolved.variant
    );
    ws.on_upgrade(move |socket| handle_socket(socket, resolved, state, guard).instrument(span))
        .into_response()
}

async fn handle_socket(
    socket: WebSocket,
    route: ResolvedRoute,
    state: AppState,
    _guard: SessionGuard,
) {
    info!(active = state.registry.total(), "Client connected");
    let (mut sender, receiver) = socket.split();

    let outbound = (&mut sender)
        .with(|line: String| future::ready(Ok::<_, axum::Error>(Message::Text(line.into()))));
    let outcome = run_session(
        &route,
        &state.settings,
        client_lines(receiver),
        outbound,
        state.shutdown.clone(),
    )
    .await;

    if outcome.is_failure() {
        warn!(?outcome, "Session ended with an error");
    } else {
        info!(?outcome, "Session ended");
    }

    if !matches!(
        outcome,
        SessionOutcome::ClientDisconnected | SessionOutcome::ClientSendFailed { .. }
    ) {
        let frame = CloseFrame {
            code: close_code_for(&outcome),
            reason: outcome.close_reason().into(),
        };
        // The client may already be gone.
        let _ = sender.send(Message::Close(Some(frame))).await;
    }
}

/// Client text frames as command lines; ends on close or transport error.
fn client_lines<S>(receiver: S) -> impl Stream<Item = String>
where
    S: Stream<Item = Result<Message, axum::Error>>,
{
    receiver
        .take_while(|message| {
            future::ready(matches!(message, Ok(m) if !matches!(m, Message::Close(_))))
        })
        .filter_map(|message| {
            future::ready(match message {
                Ok(Message::Text(text)) => Some(text.as_str().to_owned()),
                Ok(Message::Binary(bytes)) => String::from_utf8(bytes.to_vec()).ok(),
                _ => None,
            })
        })
}

const fn close_code_for(outcome: &SessionOutcome) -> u16 {
    match outcome {
        SessionOutcome::Shutdown => close_code::AWAY,
        SessionOutcome::EngineExited(_)
        | SessionOutcome::ClientDisconnected
        | SessionOutcome::ClientSendFailed { .. } => close_code::NORMAL,
        SessionOutcome::SpawnFailed(_)
        | SessionOutcome::HandshakeFailed(_)
        | SessionOutcome::WriteFailed(_) => close_code::ERROR,
    }
}
