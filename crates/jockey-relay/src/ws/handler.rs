//! WebSocket delivery endpoint.

use axum::{
    extract::{
        Path, State, WebSocketUpgrade,
        ws::{Message, WebSocket},
    },
    response::Response,
};
use futures::{SinkExt, StreamExt};
use log::{debug, info, warn};
use tokio::sync::mpsc;

use crate::api::AppState;
use crate::relay::{DisplayMessage, RunRequest};

use super::types::{WsCommand, WsControl};

/// WebSocket upgrade handler.
///
/// GET /api/ws/{thread_id}
pub async fn ws_handler(
    State(state): State<AppState>,
    Path(thread_id): Path<String>,
    ws: WebSocketUpgrade,
) -> Response {
    info!("WebSocket upgrade request for thread {}", thread_id);
    ws.on_upgrade(move |socket| handle_ws_connection(socket, state, thread_id))
}

/// Handle a WebSocket connection.
async fn handle_ws_connection(socket: WebSocket, state: AppState, thread_id: String) {
    let (mut sender, mut receiver) = socket.split();

    let mut subscription = state.registry.subscribe(&thread_id);
    let subscriber_id = subscription.id();

    // Messages for this connection only (command errors).
    let (direct_tx, mut direct_rx) = mpsc::unbounded_channel::<DisplayMessage>();

    let idle_timeout = state.stream.ws_idle_timeout;
    let thread_send = thread_id.clone();
    let mut send_task = tokio::spawn(async move {
        loop {
            let json = tokio::select! {
                message = subscription.recv() => match message {
                    Some(message) => serde_json::to_string(&message),
                    None => {
                        debug!("Thread {} was torn down, closing socket", thread_send);
                        break;
                    }
                },
                Some(message) = direct_rx.recv() => serde_json::to_string(&message),
                _ = tokio::time::sleep(idle_timeout) => serde_json::to_string(&WsControl::Ping),
            };

            let json = match json {
                Ok(j) => j,
                Err(e) => {
                    warn!("Failed to serialize frame: {}", e);
                    continue;
                }
            };
            if sender.send(Message::Text(json.into())).await.is_err() {
                debug!("Client on thread {} went away", thread_send);
                break;
            }
        }
        // Dropping the subscription unregisters it.
    });

    // Process incoming messages until either side goes away
    loop {
        let msg_result = tokio::select! {
            _ = &mut send_task => break,
            next = receiver.next() => match next {
                Some(result) => result,
                None => break,
            },
        };

        match msg_result {
            Ok(Message::Text(text)) => match WsCommand::parse(text.as_str()) {
                Ok(WsCommand::Pong) => {}
                Ok(WsCommand::Run(cmd)) => {
                    let request = RunRequest {
                        text: cmd.text,
                        thread_id: thread_id.clone(),
                        index_id: cmd.index_id,
                        assistant_id: cmd.assistant_id,
                        stream_mode: cmd.stream_mode.unwrap_or(state.stream.default_stream_mode),
                    };
                    let session = state.orchestrator.spawn(request);
                    info!(
                        "Started session {} from WebSocket on thread {}",
                        session.operation_id, thread_id
                    );
                }
                Err(e) => {
                    warn!("Rejected command on thread {}: {}", thread_id, e);
                    let _ = direct_tx.send(DisplayMessage::error(e));
                }
            },
            Ok(Message::Binary(_)) => {
                debug!("Received binary message on thread {}, ignoring", thread_id);
            }
            Ok(Message::Ping(_)) | Ok(Message::Pong(_)) => {}
            Ok(Message::Close(_)) => {
                info!("Client closed WebSocket on thread {}", thread_id);
                break;
            }
            Err(e) => {
                warn!("WebSocket error on thread {}: {}", thread_id, e);
                break;
            }
        }
    }

    // Clean up
    if !send_task.is_finished() {
        send_task.abort();
        let _ = send_task.await;
    }
    info!(
        "WebSocket subscriber {} closed for thread {}",
        subscriber_id, thread_id
    );
}
