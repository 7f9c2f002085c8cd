//! WebSocket realtime endpoint.
//!
//! Every socket gets its own [`MemoryConnection`] on the shared store.
//! Client frames are decoded into [`ClientMessage`]s and applied through that
//! connection; each subscription gets a forwarding task that turns store
//! deliveries into `snapshot` frames. When the socket closes, for whatever
//! reason, the connection is disconnected and its on-disconnect directives
//! run.
//!
//! A socket opened with `?token=` from the account API acts for that user.
//! Presence records can only be written by their own user; items are open
//! to every socket.

use std::collections::HashMap;

use axum::{
    extract::{
        ws::{Message, WebSocket},
        Query, State, WebSocketUpgrade,
    },
    http::StatusCode,
    response::{IntoResponse, Response},
};
use futures::{SinkExt, StreamExt};
use grocr_core::{
    presence_root, ClientMessage, ErrorCode, MemoryConnection, MemoryStore, OrderBy, RemoteStore,
    ServerMessage, StoreError, StorePath, Subscription, User, PRESENCE_PATH,
};
use serde::Deserialize;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use super::AppState;

#[derive(Debug, Deserialize)]
pub struct RealtimeParams {
    token: Option<String>,
}

/// Upgrade `GET /realtime` to a WebSocket. An unknown or expired token is
/// refused before the upgrade.
pub async fn realtime(
    ws: WebSocketUpgrade,
    Query(params): Query<RealtimeParams>,
    State(state): State<AppState>,
) -> Response {
    let user = match params.token {
        Some(token) => match state.sessions.user(&token) {
            Some(user) => Some(user),
            None => return (StatusCode::UNAUTHORIZED, "invalid session token").into_response(),
        },
        None => None,
    };
    ws.on_upgrade(move |socket| handle_socket(socket, state.store, user))
}

async fn handle_socket(socket: WebSocket, store: MemoryStore, user: Option<User>) {
    let connection = store.connect();
    match &user {
        Some(user) => tracing::info!("Realtime connection {} opened by {}", connection.id(), user),
        None => tracing::info!("Realtime connection {} opened", connection.id()),
    }

    let (mut ws_tx, mut ws_rx) = socket.split();
    let (outbound, mut outbound_rx) = mpsc::unbounded_channel::<Message>();

    let send_task = tokio::spawn(async move {
        while let Some(message) = outbound_rx.recv().await {
            if let Err(e) = ws_tx.send(message).await {
                tracing::debug!("Failed to send message to WebSocket: {}", e);
                break;
            }
        }
    });

    let mut forwarders: HashMap<u64, JoinHandle<()>> = HashMap::new();

    while let Some(frame) = ws_rx.next().await {
        match frame {
            Ok(Message::Binary(data)) => match ClientMessage::decode(&data) {
                Ok(message) => {
                    handle_message(
                        &connection,
                        user.as_ref(),
                        message,
                        &outbound,
                        &mut forwarders,
                    )
                    .await;
                }
                Err(e) => {
                    tracing::warn!("Undecodable frame from {}: {}", connection.id(), e);
                    send(
                        &outbound,
                        &ServerMessage::Error {
                            request_id: None,
                            code: ErrorCode::Internal,
                            message: e.to_string(),
                        },
                    );
                }
            },
            Ok(Message::Ping(data)) => {
                let _ = outbound.send(Message::Pong(data));
            }
            Ok(Message::Close(_)) => {
                tracing::debug!("WebSocket closed by client");
                break;
            }
            Ok(_) => {
                // Ignore text and pong frames
            }
            Err(e) => {
                tracing::warn!("WebSocket error: {}", e);
                break;
            }
        }
    }

    for (_, task) in forwarders.drain() {
        task.abort();
    }
    connection.disconnect();
    drop(outbound);
    let _ = send_task.await;

    tracing::info!("Realtime connection {} closed", connection.id());
}

async fn handle_message(
    connection: &MemoryConnection,
    user: Option<&User>,
    message: ClientMessage,
    outbound: &mpsc::UnboundedSender<Message>,
    forwarders: &mut HashMap<u64, JoinHandle<()>>,
) {
    tracing::debug!("Connection {}: {:?}", connection.id(), message);

    let (request_id, result): (u64, Result<(), StoreError>) = match message {
        ClientMessage::Set {
            request_id,
            path,
            value,
        } => {
            let result = match authorize(user, &path) {
                Ok(()) => connection.set(&path, value).await,
                Err(e) => Err(e),
            };
            (request_id, result)
        }
        ClientMessage::Update {
            request_id,
            path,
            fields,
        } => {
            let allowed = fields.keys().try_for_each(|key| match path.child(key) {
                Ok(child) => authorize(user, &child),
                // Bad keys are rejected by the store itself.
                Err(_) => Ok(()),
            });
            let result = match allowed {
                Ok(()) => connection.update(&path, fields).await,
                Err(e) => Err(e),
            };
            (request_id, result)
        }
        ClientMessage::Remove { request_id, path } => {
            let result = match authorize(user, &path) {
                Ok(()) => connection.remove(&path).await,
                Err(e) => Err(e),
            };
            (request_id, result)
        }
        ClientMessage::OnDisconnectRemove { request_id, path } => {
            let result = match authorize(user, &path) {
                Ok(()) => connection.on_disconnect_remove(&path).await,
                Err(e) => Err(e),
            };
            (request_id, result)
        }
        ClientMessage::Subscribe { request_id, query } => {
            let order_by = query.order_by.clone();
            match connection.subscribe(query).await {
                Ok(subscription) => {
                    let subscription_id = subscription.id();
                    // The ack is queued ahead of the first snapshot.
                    send(
                        outbound,
                        &ServerMessage::Ack {
                            request_id,
                            subscription_id: Some(subscription_id),
                        },
                    );
                    forwarders.insert(
                        subscription_id,
                        forward(subscription, order_by, outbound.clone()),
                    );
                    return;
                }
                Err(e) => (request_id, Err(e)),
            }
        }
        ClientMessage::Unsubscribe { subscription_id } => {
            if let Some(task) = forwarders.remove(&subscription_id) {
                task.abort();
            }
            return;
        }
    };

    let reply = match result {
        Ok(()) => ServerMessage::Ack {
            request_id,
            subscription_id: None,
        },
        Err(e) => {
            tracing::debug!("Request {} failed: {}", request_id, e);
            ServerMessage::Error {
                request_id: Some(request_id),
                code: ErrorCode::from_store_error(&e),
                message: e.to_string(),
            }
        }
    };
    send(outbound, &reply);
}

/// Checks that `user` may write `path`.
///
/// Writes that touch the presence subtree must target the writer's own
/// `online/{uid}` record or something below it.
fn authorize(user: Option<&User>, path: &StorePath) -> Result<(), StoreError> {
    if !path.overlaps(&presence_root()) {
        return Ok(());
    }
    match (user, path.segments()) {
        (Some(user), [root, uid, ..]) if root == PRESENCE_PATH && *uid == user.uid => Ok(()),
        (Some(user), _) => Err(StoreError::PermissionDenied(format!(
            "{} may not write {}",
            user.email, path
        ))),
        (None, _) => Err(StoreError::PermissionDenied(format!(
            "sign in to write {}",
            path
        ))),
    }
}

/// Relays a subscription's deliveries to the socket until it ends or the
/// task is aborted. Aborting drops the subscription, which deregisters it.
fn forward(
    mut subscription: Subscription,
    order_by: OrderBy,
    outbound: mpsc::UnboundedSender<Message>,
) -> JoinHandle<()> {
    let subscription_id = subscription.id();
    tokio::spawn(async move {
        while let Some(snapshot) = subscription.next().await {
            let message = ServerMessage::Snapshot {
                subscription_id,
                path: snapshot.path().clone(),
                order_by: order_by.clone(),
                value: snapshot.value().clone(),
            };
            if !send(&outbound, &message) {
                break;
            }
        }
    })
}

/// Encodes and queues a frame. Returns false once the socket is gone.
fn send(outbound: &mpsc::UnboundedSender<Message>, message: &ServerMessage) -> bool {
    match message.encode() {
        Ok(bytes) => outbound.send(Message::Binary(bytes.into())).is_ok(),
        Err(e) => {
            tracing::warn!("Failed to encode server message: {}", e);
            true
        }
    }
}
