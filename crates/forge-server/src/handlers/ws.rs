//! `GET /ws` (`spec.md` §4.13, §6): one socket, many subscriptions. Each
//! `{op: subscribe}` message registers a handle with the hub and replies
//! with a `snapshot`; subsequent changes arrive as `diff`; every 30 seconds
//! a `ping` goes out regardless of subscription activity so the client can
//! detect a stale connection.

use crate::auth::Subject;
use crate::handlers::views::query_view_rows;
use crate::state::AppState;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Extension, State};
use axum::response::Response;
use forge_ws::{ClientMessage, ServerMessage, OUTBOUND_CAPACITY};
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::mpsc;
use uuid::Uuid;

const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);

pub async fn upgrade(State(state): State<AppState>, subject: Option<Extension<Subject>>, ws: WebSocketUpgrade) -> Response {
    let subject_id = subject.map(|Extension(Subject(id))| id);
    ws.on_upgrade(move |socket| handle_socket(socket, state, subject_id))
}

async fn handle_socket(socket: WebSocket, state: AppState, subject_id: Option<Uuid>) {
    use futures::{SinkExt, StreamExt};

    let (mut sink, mut stream) = socket.split();
    let (tx, mut rx) = mpsc::channel::<ServerMessage>(OUTBOUND_CAPACITY);

    let writer = tokio::spawn(async move {
        while let Some(message) = rx.recv().await {
            let Ok(text) = serde_json::to_string(&message) else { continue };
            if sink.send(Message::Text(text)).await.is_err() {
                break;
            }
        }
    });

    let mut handles: HashMap<(String, Option<String>), Uuid> = HashMap::new();
    let mut heartbeat = tokio::time::interval(HEARTBEAT_INTERVAL);
    heartbeat.tick().await; // first tick fires immediately; skip it.

    loop {
        tokio::select! {
            _ = heartbeat.tick() => {
                if tx.send(ServerMessage::Ping).await.is_err() {
                    break;
                }
            }
            incoming = stream.next() => {
                let Some(Ok(message)) = incoming else { break };
                let Message::Text(text) = message else { continue };
                let Ok(client_message) = serde_json::from_str::<ClientMessage>(&text) else { continue };
                handle_client_message(&state, &tx, subject_id, client_message, &mut handles).await;
            }
        }
    }

    for (_, handle) in handles.drain() {
        state.hub.disconnect(handle).await;
    }
    writer.abort();
}

async fn handle_client_message(
    state: &AppState,
    tx: &mpsc::Sender<ServerMessage>,
    subject_id: Option<Uuid>,
    message: ClientMessage,
    handles: &mut HashMap<(String, Option<String>), Uuid>,
) {
    match message {
        ClientMessage::Subscribe { view, key, params } => {
            let params: HashMap<String, String> = params
                .unwrap_or_default()
                .into_iter()
                .filter_map(|(k, v)| v.as_str().map(|s| (k, s.to_string())))
                .collect();

            match query_view_rows(state, &view, subject_id, &params).await {
                Ok(rows) => {
                    let handle = state.hub.subscribe(&view, subject_id, key.clone(), tx.clone()).await;
                    handles.insert((view.clone(), key.clone()), handle);
                    let _ = tx.send(ServerMessage::Snapshot { view, key, data: serde_json::Value::Array(rows) }).await;
                }
                Err(_) => {
                    let _ = tx
                        .send(ServerMessage::Error { view, key, data: serde_json::json!({ "message": "unknown view or query failed" }) })
                        .await;
                }
            }
        }
        ClientMessage::Unsubscribe { view, key } => {
            if let Some(handle) = handles.remove(&(view.clone(), key)) {
                state.hub.unsubscribe(&view, handle).await;
            }
        }
    }
}
