//! WebSocket upgrade handler

use std::time::Duration;

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    response::Response,
};
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::app::AppState;
use crate::game::snake::PlayerId;
use crate::matchmaking::Session;
use crate::util::rate_limit::ConnectionRateLimiter;
use crate::ws::connection::{Connection, Outbound};

/// Frames a slow client may fall behind before it is evicted
const OUTBOUND_QUEUE: usize = 256;

/// How long the writer gets to flush a close frame
const WRITER_DRAIN: Duration = Duration::from_secs(1);

/// Query parameters for WebSocket connection
#[derive(Debug, Deserialize)]
pub struct WsQuery {
    /// Stable id supplied by the client, reused across reconnects
    #[serde(rename = "playerId")]
    pub player_id: Option<String>,
}

/// WebSocket upgrade handler
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    Query(query): Query<WsQuery>,
    State(state): State<AppState>,
) -> Response {
    let player_id = query
        .player_id
        .map(|id| id.trim().to_string())
        .filter(|id| !id.is_empty())
        .unwrap_or_else(|| Uuid::new_v4().to_string());

    info!(player_id = %player_id, "WebSocket upgrade");
    ws.on_upgrade(move |socket| handle_socket(socket, player_id, state))
}

/// Handle the upgraded WebSocket connection
async fn handle_socket(socket: WebSocket, player_id: PlayerId, state: AppState) {
    let (ws_sink, ws_stream) = socket.split();
    let (connection, outbound_rx) = Connection::channel(OUTBOUND_QUEUE);

    let session = state.sessions.connect(connection, player_id);
    let writer = tokio::spawn(write_loop(session.player_id.clone(), ws_sink, outbound_rx));

    let rate = state.game_config.current().input_rate_limit;
    read_loop(&state, &session, ws_stream, ConnectionRateLimiter::new(rate)).await;

    state.sessions.disconnect(&session);
    session.connection.close();
    if !drain_writer(writer, WRITER_DRAIN).await {
        debug!(player_id = %session.player_id, "Writer did not drain in time, aborted");
    }

    info!(player_id = %session.player_id, "WebSocket connection closed");
}

/// Wait up to `within` for the writer to flush, aborting it past that so a
/// stalled socket cannot keep its sink alive. Returns false if it was aborted.
async fn drain_writer(mut writer: JoinHandle<()>, within: Duration) -> bool {
    if tokio::time::timeout(within, &mut writer).await.is_ok() {
        return true;
    }
    writer.abort();
    false
}

/// Drain the outbound queue into the socket
async fn write_loop(
    player_id: PlayerId,
    mut ws_sink: SplitSink<WebSocket, Message>,
    mut outbound_rx: mpsc::Receiver<Outbound>,
) {
    while let Some(frame) = outbound_rx.recv().await {
        match frame {
            Outbound::Text(text) => {
                if let Err(e) = ws_sink.send(Message::Text(text)).await {
                    debug!(player_id = %player_id, error = %e, "WebSocket send failed");
                    break;
                }
            }
            Outbound::Close => {
                let _ = ws_sink.send(Message::Close(None)).await;
                break;
            }
        }
    }
}

/// Read frames until the client leaves, the socket errors or the server
/// closes the connection
async fn read_loop(
    state: &AppState,
    session: &Session,
    mut ws_stream: SplitStream<WebSocket>,
    rate_limiter: ConnectionRateLimiter,
) {
    let player_id = &session.player_id;

    loop {
        let result = tokio::select! {
            _ = session.connection.closed() => {
                debug!(player_id = %player_id, "Connection closed by server");
                break;
            }
            next = ws_stream.next() => match next {
                Some(result) => result,
                None => break,
            },
        };

        match result {
            Ok(Message::Text(text)) => {
                if !rate_limiter.check() {
                    warn!(player_id = %player_id, "Rate limited input message");
                    continue;
                }
                state.sessions.handle_text(session, &text);
            }
            Ok(Message::Binary(_)) => {
                warn!(player_id = %player_id, "Received binary message, ignoring");
            }
            Ok(Message::Ping(_)) => {
                debug!(player_id = %player_id, "Received ping");
            }
            Ok(Message::Pong(_)) => {
                debug!(player_id = %player_id, "Received pong");
            }
            Ok(Message::Close(_)) => {
                info!(player_id = %player_id, "Client initiated close");
                break;
            }
            Err(e) => {
                error!(player_id = %player_id, error = %e, "WebSocket error");
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::oneshot;

    #[tokio::test(start_paused = true)]
    async fn stalled_writer_is_aborted() {
        let (guard, released) = oneshot::channel::<()>();
        let writer = tokio::spawn(async move {
            let _guard = guard;
            std::future::pending::<()>().await;
        });

        assert!(!drain_writer(writer, WRITER_DRAIN).await);
        // the aborted task drops everything it owned
        assert!(released.await.is_err());
    }

    #[tokio::test]
    async fn finished_writer_drains() {
        let writer = tokio::spawn(async {});
        assert!(drain_writer(writer, WRITER_DRAIN).await);
    }
}
