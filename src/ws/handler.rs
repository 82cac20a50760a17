//! WebSocket upgrade handlers for the three client roles
//!
//! - `/gameInfoWs`: creates a match, receives lifecycle notifications
//! - `/screenWs?id=`: the match display, receives position frames
//! - `/controllerWs?id=&nick=`: a player's input stream

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
use tracing::{debug, error, info, warn};

use crate::app::AppState;
use crate::game::{MatchHandle, MatchId, SessionId, Sink, SINK_CAPACITY};
use crate::util::rate_limit::SessionRateLimiter;
use crate::util::time::unix_millis;

/// Reply sent to a controller once its player is registered
pub const JOIN_ACK: &str = "successful";

#[derive(Debug, Deserialize)]
pub struct ScreenQuery {
    pub id: MatchId,
}

#[derive(Debug, Deserialize)]
pub struct ControllerQuery {
    pub id: MatchId,
    pub nick: String,
}

type WsWriter = SplitSink<WebSocket, Message>;
type WsReader = SplitStream<WebSocket>;

/// Lifecycle connection: every one of these starts a new match
pub async fn game_info_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.on_upgrade(move |socket| handle_game_info(socket, state))
}

async fn handle_game_info(socket: WebSocket, state: AppState) {
    let handle = state.registry.create_match();
    let sink_id = state.registry.allocate_sink();
    let (sink, outbound) = Sink::channel(sink_id, SINK_CAPACITY);

    info!(match_id = handle.id, sink_id = sink_id.0, "Lifecycle socket connected");
    handle.join_lifecycle(sink).await;

    let (writer, reader) = socket.split();
    forward_sink(writer, reader, outbound).await;

    handle.leave_lifecycle(sink_id).await;
    info!(match_id = handle.id, sink_id = sink_id.0, "Lifecycle socket closed");
}

/// Display connection for an existing match
pub async fn screen_handler(
    ws: WebSocketUpgrade,
    Query(query): Query<ScreenQuery>,
    State(state): State<AppState>,
) -> Response {
    ws.on_upgrade(move |socket| handle_screen(socket, query.id, state))
}

async fn handle_screen(socket: WebSocket, match_id: MatchId, state: AppState) {
    let (mut writer, reader) = socket.split();

    let Some(handle) = state.registry.get(match_id) else {
        warn!(match_id, "Screen connected to unknown match");
        reject(&mut writer, "Error: game not found").await;
        return;
    };

    let sink_id = state.registry.allocate_sink();
    let (sink, outbound) = Sink::channel(sink_id, SINK_CAPACITY);

    info!(match_id, sink_id = sink_id.0, "Screen connected");
    handle.join_spectator(sink).await;

    forward_sink(writer, reader, outbound).await;

    handle.leave_spectator(sink_id).await;
    info!(match_id, sink_id = sink_id.0, "Screen disconnected");
}

/// Controller connection registering a named player
pub async fn controller_handler(
    ws: WebSocketUpgrade,
    Query(query): Query<ControllerQuery>,
    State(state): State<AppState>,
) -> Response {
    ws.on_upgrade(move |socket| handle_controller(socket, query, state))
}

async fn handle_controller(socket: WebSocket, query: ControllerQuery, state: AppState) {
    let (mut writer, reader) = socket.split();

    let Some(handle) = state.registry.get(query.id) else {
        warn!(match_id = query.id, nick = %query.nick, "Controller connected to unknown match");
        reject(&mut writer, "Error: game not found").await;
        return;
    };

    let session = state.registry.allocate_session();
    let player_id = match handle.join_input(session, query.nick.clone()).await {
        Ok(id) => id,
        Err(e) => {
            info!(match_id = query.id, nick = %query.nick, error = %e, "Controller rejected");
            reject(&mut writer, &format!("Error: {e}")).await;
            return;
        }
    };

    if let Err(e) = writer.send(Message::Text(JOIN_ACK.to_string())).await {
        debug!(match_id = query.id, session_id = %session, error = %e, "Failed to acknowledge join");
        handle.leave_input(session).await;
        return;
    }

    info!(
        match_id = query.id,
        player_id = %player_id,
        session_id = %session,
        connected_at = unix_millis(),
        "Controller connected"
    );

    run_input_session(&handle, session, reader).await;

    handle.leave_input(session).await;
    info!(match_id = query.id, session_id = %session, "Controller disconnected");
}

/// Reader loop: socket text -> match mailbox
async fn run_input_session(handle: &MatchHandle, session: SessionId, mut reader: WsReader) {
    let rate_limiter = SessionRateLimiter::new();

    while let Some(result) = reader.next().await {
        match result {
            Ok(Message::Text(text)) => {
                if !rate_limiter.check_input() {
                    warn!(match_id = handle.id, session_id = %session, "Rate limited input message");
                    continue;
                }
                handle.player_input(session, text.trim().to_string()).await;
            }
            Ok(Message::Binary(_)) => {
                debug!(session_id = %session, "Received binary message, ignoring");
            }
            Ok(Message::Ping(_)) | Ok(Message::Pong(_)) => {}
            Ok(Message::Close(_)) => break,
            Err(e) => {
                error!(session_id = %session, error = %e, "WebSocket error");
                break;
            }
        }
    }
}

/// Drain a sink into the socket until either side goes away. The sink side
/// closes when the match drops it (slow consumer, duplicate slot or match end).
async fn forward_sink(mut writer: WsWriter, mut reader: WsReader, mut outbound: mpsc::Receiver<String>) {
    let mut writer_task = tokio::spawn(async move {
        while let Some(text) = outbound.recv().await {
            if let Err(e) = writer.send(Message::Text(text)).await {
                debug!(error = %e, "WebSocket send failed");
                break;
            }
        }
        let _ = writer.close().await;
    });

    loop {
        tokio::select! {
            _ = &mut writer_task => break,
            frame = reader.next() => match frame {
                Some(Ok(Message::Close(_))) | None => break,
                Some(Err(e)) => {
                    debug!(error = %e, "WebSocket read failed");
                    break;
                }
                Some(Ok(_)) => {}
            },
        }
    }

    writer_task.abort();
}

async fn reject(writer: &mut WsWriter, reason: &str) {
    let _ = writer.send(Message::Text(reason.to_string())).await;
    let _ = writer.close().await;
}
