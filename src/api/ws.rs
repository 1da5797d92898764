use std::sync::Arc;

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    response::IntoResponse,
};
use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::auth::{self, Identity};
use crate::broadcast::{Hub, SessionId, Topic};

#[derive(Clone)]
pub struct WsState {
    pub pool: SqlitePool,
    pub hub: Arc<Hub>,
    pub allow_anonymous: bool,
}

#[derive(Debug, Deserialize)]
pub struct WsQuery {
    /// Bearer token; omit for anonymous read-only tracking where allowed
    pub token: Option<String>,
}

/// Client message
#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
#[serde(rename_all = "snake_case")]
enum ClientMessage {
    /// Join a channel (`vehicle:{id}` or `user:{id}`)
    Subscribe { topic: String },
    /// Leave a channel
    Unsubscribe { topic: String },
}

/// Server control message. Published domain events are forwarded to the
/// socket verbatim alongside these.
#[derive(Debug, Serialize)]
#[serde(tag = "type")]
#[serde(rename_all = "snake_case")]
enum ServerMessage {
    /// Initial connection acknowledgment
    Connected {
        session_id: Uuid,
        user_id: Option<i64>,
        message: String,
    },
    /// Channel join confirmed
    Subscribed { topic: String },
    /// Channel leave confirmed
    Unsubscribed { topic: String },
    /// Error message
    Error { message: String },
}

/// WebSocket endpoint for live tracking sessions
pub async fn ws_tracking(
    ws: WebSocketUpgrade,
    Query(query): Query<WsQuery>,
    State(state): State<WsState>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state, query.token))
}

async fn handle_socket(socket: WebSocket, state: WsState, token: Option<String>) {
    let (mut sender, mut receiver) = socket.split();

    // Resolve identity before any channel can be joined. A bad token or a
    // missing one (when anonymous tracking is off) refuses the session.
    let identity: Option<Identity> = match token {
        Some(token) => match auth::resolve_token(&state.pool, &token).await {
            Ok(identity) => Some(identity),
            Err(e) => {
                let msg = ServerMessage::Error {
                    message: e.to_string(),
                };
                if let Ok(json) = serde_json::to_string(&msg) {
                    let _ = sender.send(Message::Text(json.into())).await;
                }
                let _ = sender.close().await;
                return;
            }
        },
        None => {
            if !state.allow_anonymous {
                let msg = ServerMessage::Error {
                    message: "Authentication required".to_string(),
                };
                if let Ok(json) = serde_json::to_string(&msg) {
                    let _ = sender.send(Message::Text(json.into())).await;
                }
                let _ = sender.close().await;
                return;
            }
            None
        }
    };

    let (session_id, mut outbound) = state.hub.connect().await;

    let connected = ServerMessage::Connected {
        session_id,
        user_id: identity.map(|i| i.user_id),
        message: "Connected. Send subscribe messages with a topic such as vehicle:1.".to_string(),
    };
    if let Ok(json) = serde_json::to_string(&connected) {
        let _ = sender.send(Message::Text(json.into())).await;
    }

    // Channel for control replies from the receive loop to the sender task.
    let (ctl_tx, mut ctl_rx) = tokio::sync::mpsc::channel::<ServerMessage>(16);

    // Forward published payloads and control replies to the socket. The
    // outbound queue closes when the hub drops this session (disconnect or
    // overflow), which ends the task.
    let forward_task = tokio::spawn(async move {
        loop {
            tokio::select! {
                Some(reply) = ctl_rx.recv() => {
                    if let Ok(json) = serde_json::to_string(&reply) {
                        if sender.send(Message::Text(json.into())).await.is_err() {
                            break;
                        }
                    }
                }
                payload = outbound.recv() => {
                    match payload {
                        Some(payload) => {
                            if sender.send(Message::Text(payload.as_ref().into())).await.is_err() {
                                break;
                            }
                        }
                        None => break,
                    }
                }
            }
        }
    });

    // Handle incoming messages from the client
    while let Some(msg) = receiver.next().await {
        match msg {
            Ok(Message::Text(text)) => {
                let reply = match serde_json::from_str::<ClientMessage>(&text) {
                    Ok(ClientMessage::Subscribe { topic }) => {
                        subscribe(&state, session_id, identity.as_ref(), &topic).await
                    }
                    Ok(ClientMessage::Unsubscribe { topic }) => {
                        unsubscribe(&state, session_id, &topic).await
                    }
                    Err(_) => ServerMessage::Error {
                        message: "Unrecognized message".to_string(),
                    },
                };
                if ctl_tx.send(reply).await.is_err() {
                    break;
                }
            }
            Ok(Message::Ping(_)) => {
                // Axum handles pong automatically
            }
            Ok(Message::Close(_)) => break,
            Err(_) => break,
            _ => {}
        }
    }

    // Cleanup: release every channel membership and drop any pending
    // deliveries for this session.
    state.hub.disconnect(session_id).await;
    forward_task.abort();
}

async fn subscribe(
    state: &WsState,
    session: SessionId,
    identity: Option<&Identity>,
    topic: &str,
) -> ServerMessage {
    let Some(parsed) = Topic::parse(topic) else {
        return ServerMessage::Error {
            message: format!("Unknown topic: {}", topic),
        };
    };
    if !auth::can_join(identity, &parsed, state.allow_anonymous) {
        return ServerMessage::Error {
            message: format!("Not allowed to join {}", topic),
        };
    }
    if state.hub.subscribe(session, parsed).await {
        ServerMessage::Subscribed {
            topic: topic.to_string(),
        }
    } else {
        ServerMessage::Error {
            message: "Session is no longer registered".to_string(),
        }
    }
}

async fn unsubscribe(state: &WsState, session: SessionId, topic: &str) -> ServerMessage {
    let Some(parsed) = Topic::parse(topic) else {
        return ServerMessage::Error {
            message: format!("Unknown topic: {}", topic),
        };
    };
    state.hub.unsubscribe(session, parsed).await;
    ServerMessage::Unsubscribed {
        topic: topic.to_string(),
    }
}
