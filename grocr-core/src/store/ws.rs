//! WebSocket client for the realtime server.
//!
//! One socket carries every request and subscription for a client. A writer
//! task drains an outbound queue into the socket; a reader task resolves
//! pending requests and routes snapshots to their subscriptions. When the
//! socket closes, the server runs this client's on-disconnect directives.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use serde_json::{Map, Value};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_tungstenite::{connect_async, tungstenite::Message};

use super::{RemoteStore, Subscription};
use crate::endpoint::ws_url;
use crate::error::StoreError;
use crate::path::StorePath;
use crate::protocol::{ClientMessage, ServerMessage};
use crate::snapshot::{Query, Snapshot};

/// How long to wait for the server to acknowledge a request.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

enum Pending {
    Write(oneshot::Sender<Result<(), StoreError>>),
    Subscribe {
        sender: mpsc::UnboundedSender<Snapshot>,
        reply: oneshot::Sender<Result<u64, StoreError>>,
    },
}

#[derive(Default)]
struct Shared {
    pending: Mutex<HashMap<u64, Pending>>,
    subscriptions: Mutex<HashMap<u64, mpsc::UnboundedSender<Snapshot>>>,
    closed: AtomicBool,
}

impl Shared {
    fn pending(&self) -> MutexGuard<'_, HashMap<u64, Pending>> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn subscriptions(&self) -> MutexGuard<'_, HashMap<u64, mpsc::UnboundedSender<Snapshot>>> {
        self.subscriptions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Fails every in-flight request and ends every subscription.
    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        for (_, pending) in self.pending().drain() {
            match pending {
                Pending::Write(reply) => {
                    let _ = reply.send(Err(StoreError::Closed));
                }
                Pending::Subscribe { reply, .. } => {
                    let _ = reply.send(Err(StoreError::Closed));
                }
            }
        }
        self.subscriptions().clear();
    }

    /// Applies one server frame. Returns a message to send back, if any.
    fn handle(&self, message: ServerMessage) -> Option<ClientMessage> {
        match message {
            ServerMessage::Ack {
                request_id,
                subscription_id,
            } => match self.pending().remove(&request_id) {
                Some(Pending::Write(reply)) => {
                    let _ = reply.send(Ok(()));
                }
                Some(Pending::Subscribe { sender, reply }) => match subscription_id {
                    Some(id) => {
                        // Register before the next frame (the first snapshot) is read.
                        self.subscriptions().insert(id, sender);
                        let _ = reply.send(Ok(id));
                    }
                    None => {
                        let _ = reply.send(Err(StoreError::Protocol(
                            "subscribe acknowledged without a subscription id".to_string(),
                        )));
                    }
                },
                None => match subscription_id {
                    // The subscribe already timed out; release it server-side.
                    Some(id) => {
                        tracing::debug!("Late subscribe ack {}, unsubscribing", id);
                        return Some(ClientMessage::Unsubscribe {
                            subscription_id: id,
                        });
                    }
                    None => tracing::warn!("Ack for unknown request {}", request_id),
                },
            },
            ServerMessage::Error {
                request_id,
                code,
                message,
            } => {
                let err = code.into_store_error(message);
                let pending = request_id.and_then(|id| self.pending().remove(&id));
                match pending {
                    Some(Pending::Write(reply)) => {
                        let _ = reply.send(Err(err));
                    }
                    Some(Pending::Subscribe { reply, .. }) => {
                        let _ = reply.send(Err(err));
                    }
                    None => tracing::warn!("Server error: {}", err),
                }
            }
            ServerMessage::Snapshot {
                subscription_id,
                path,
                order_by,
                value,
            } => {
                let mut subscriptions = self.subscriptions();
                let delivered = match subscriptions.get(&subscription_id) {
                    Some(sender) => sender.send(Snapshot::new(path, value, order_by)).is_ok(),
                    None => {
                        tracing::debug!("Snapshot for unknown subscription {}", subscription_id);
                        true
                    }
                };
                if !delivered {
                    subscriptions.remove(&subscription_id);
                }
            }
        }
        None
    }
}

/// Tokens are base64url, so they go into the query string unescaped.
fn realtime_url(server_url: &str, token: Option<&str>) -> String {
    let url = ws_url(server_url, "/realtime");
    match token {
        Some(token) => format!("{}?token={}", url, token),
        None => url,
    }
}

/// [`RemoteStore`] backed by a WebSocket connection to `grocr-server`.
pub struct WsStore {
    outbound: mpsc::UnboundedSender<Message>,
    shared: Arc<Shared>,
    next_request: AtomicU64,
    reader: JoinHandle<()>,
}

impl WsStore {
    /// Connects to the realtime endpoint of `server_url` without a session.
    /// The server lets such sockets read and write items but not presence.
    pub async fn connect(server_url: &str) -> Result<Self, StoreError> {
        Self::connect_with_token(server_url, None).await
    }

    /// Connects with the session token the account API returned, which
    /// lets the socket write the signed-in user's presence record.
    pub async fn connect_with_token(
        server_url: &str,
        token: Option<&str>,
    ) -> Result<Self, StoreError> {
        let url = realtime_url(server_url, token);
        let (ws_stream, _) = connect_async(&url)
            .await
            .map_err(|e| StoreError::Connection(e.to_string()))?;
        tracing::info!("Connected to {}", url);

        let (mut sink, mut stream) = ws_stream.split();
        let (outbound, mut outbound_rx) = mpsc::unbounded_channel::<Message>();
        let shared = Arc::new(Shared::default());

        tokio::spawn(async move {
            while let Some(message) = outbound_rx.recv().await {
                let is_close = matches!(message, Message::Close(_));
                if let Err(e) = sink.send(message).await {
                    tracing::warn!("WebSocket send failed: {}", e);
                    break;
                }
                if is_close {
                    break;
                }
            }
            let _ = sink.close().await;
        });

        let reader_shared = Arc::clone(&shared);
        let replies = outbound.clone();
        let reader = tokio::spawn(async move {
            while let Some(frame) = stream.next().await {
                match frame {
                    Ok(Message::Binary(data)) => match ServerMessage::decode(&data) {
                        Ok(message) => {
                            if let Some(reply) = reader_shared.handle(message) {
                                match reply.encode() {
                                    Ok(encoded) => {
                                        let _ = replies.send(Message::Binary(encoded.into()));
                                    }
                                    Err(e) => tracing::warn!("Failed to encode reply: {}", e),
                                }
                            }
                        }
                        Err(e) => tracing::warn!("Dropping undecodable frame: {}", e),
                    },
                    Ok(Message::Ping(data)) => {
                        let _ = replies.send(Message::Pong(data));
                    }
                    Ok(Message::Close(_)) => break,
                    Ok(_) => {
                        // Ignore other message types
                    }
                    Err(e) => {
                        tracing::warn!("WebSocket error: {}", e);
                        break;
                    }
                }
            }
            tracing::info!("Realtime connection closed");
            reader_shared.close();
        });

        Ok(Self {
            outbound,
            shared,
            next_request: AtomicU64::new(1),
            reader,
        })
    }

    /// Closes the socket. The server then runs this client's on-disconnect
    /// directives.
    pub fn close(&self) {
        let _ = self.outbound.send(Message::Close(None));
        self.shared.close();
    }

    pub fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::SeqCst)
    }

    fn next_request_id(&self) -> u64 {
        self.next_request.fetch_add(1, Ordering::SeqCst)
    }

    fn send(&self, message: &ClientMessage) -> Result<(), StoreError> {
        if self.is_closed() {
            return Err(StoreError::Closed);
        }
        let encoded = message.encode()?;
        self.outbound
            .send(Message::Binary(encoded.into()))
            .map_err(|_| StoreError::Closed)
    }

    async fn write(&self, message: ClientMessage) -> Result<(), StoreError> {
        let request_id = message.request_id().unwrap_or_default();
        let (reply, response) = oneshot::channel();
        self.shared
            .pending()
            .insert(request_id, Pending::Write(reply));

        if let Err(e) = self.send(&message) {
            self.shared.pending().remove(&request_id);
            return Err(e);
        }

        match timeout(REQUEST_TIMEOUT, response).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(StoreError::Closed),
            Err(_) => {
                self.shared.pending().remove(&request_id);
                Err(StoreError::Connection(format!(
                    "request {} timed out",
                    request_id
                )))
            }
        }
    }
}

impl Drop for WsStore {
    fn drop(&mut self) {
        let _ = self.outbound.send(Message::Close(None));
        // The writer task exits on its own once the close frame is flushed.
        self.reader.abort();
    }
}

impl std::fmt::Debug for WsStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WsStore")
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl RemoteStore for WsStore {
    async fn set(&self, path: &StorePath, value: Value) -> Result<(), StoreError> {
        let request_id = self.next_request_id();
        self.write(ClientMessage::Set {
            request_id,
            path: path.clone(),
            value,
        })
        .await
    }

    async fn update(&self, path: &StorePath, fields: Map<String, Value>) -> Result<(), StoreError> {
        let request_id = self.next_request_id();
        self.write(ClientMessage::Update {
            request_id,
            path: path.clone(),
            fields,
        })
        .await
    }

    async fn remove(&self, path: &StorePath) -> Result<(), StoreError> {
        let request_id = self.next_request_id();
        self.write(ClientMessage::Remove {
            request_id,
            path: path.clone(),
        })
        .await
    }

    async fn on_disconnect_remove(&self, path: &StorePath) -> Result<(), StoreError> {
        let request_id = self.next_request_id();
        self.write(ClientMessage::OnDisconnectRemove {
            request_id,
            path: path.clone(),
        })
        .await
    }

    async fn subscribe(&self, query: Query) -> Result<Subscription, StoreError> {
        let request_id = self.next_request_id();
        let (sender, receiver) = mpsc::unbounded_channel();
        let (reply, response) = oneshot::channel();
        self.shared
            .pending()
            .insert(request_id, Pending::Subscribe { sender, reply });

        let message = ClientMessage::Subscribe { request_id, query };
        if let Err(e) = self.send(&message) {
            self.shared.pending().remove(&request_id);
            return Err(e);
        }

        let subscription_id = match timeout(REQUEST_TIMEOUT, response).await {
            Ok(Ok(result)) => result?,
            Ok(Err(_)) => return Err(StoreError::Closed),
            Err(_) => {
                self.shared.pending().remove(&request_id);
                return Err(StoreError::Connection(format!(
                    "subscribe {} timed out",
                    request_id
                )));
            }
        };

        let shared = Arc::downgrade(&self.shared);
        let outbound = self.outbound.clone();
        Ok(Subscription::new(subscription_id, receiver, move || {
            if let Some(shared) = shared.upgrade() {
                shared.subscriptions().remove(&subscription_id);
                if !shared.closed.load(Ordering::SeqCst) {
                    if let Ok(encoded) = (ClientMessage::Unsubscribe { subscription_id }).encode() {
                        let _ = outbound.send(Message::Binary(encoded.into()));
                    }
                }
            }
        }))
    }
}
