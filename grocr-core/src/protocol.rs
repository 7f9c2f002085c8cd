//! Wire protocol between [`WsStore`](crate::store::WsStore) and the realtime
//! server.
//!
//! Frames are CBOR-encoded binary WebSocket messages, internally tagged by
//! `type`. Every write and subscribe carries a client-chosen `requestId`
//! that the server echoes in its `ack` or `error` reply.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::StoreError;
use crate::path::StorePath;
use crate::snapshot::{OrderBy, Query};

/// Messages sent by a client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ClientMessage {
    Set {
        #[serde(rename = "requestId")]
        request_id: u64,
        path: StorePath,
        value: Value,
    },
    Update {
        #[serde(rename = "requestId")]
        request_id: u64,
        path: StorePath,
        fields: Map<String, Value>,
    },
    Remove {
        #[serde(rename = "requestId")]
        request_id: u64,
        path: StorePath,
    },
    OnDisconnectRemove {
        #[serde(rename = "requestId")]
        request_id: u64,
        path: StorePath,
    },
    /// The acknowledgement for a subscribe is followed by the first snapshot.
    Subscribe {
        #[serde(rename = "requestId")]
        request_id: u64,
        query: Query,
    },
    /// Fire-and-forget; no reply.
    Unsubscribe {
        #[serde(rename = "subscriptionId")]
        subscription_id: u64,
    },
}

impl ClientMessage {
    pub fn request_id(&self) -> Option<u64> {
        match self {
            ClientMessage::Set { request_id, .. }
            | ClientMessage::Update { request_id, .. }
            | ClientMessage::Remove { request_id, .. }
            | ClientMessage::OnDisconnectRemove { request_id, .. }
            | ClientMessage::Subscribe { request_id, .. } => Some(*request_id),
            ClientMessage::Unsubscribe { .. } => None,
        }
    }

    pub fn encode(&self) -> Result<Vec<u8>, StoreError> {
        encode(self)
    }

    pub fn decode(data: &[u8]) -> Result<Self, StoreError> {
        decode(data)
    }
}

/// Messages sent by the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ServerMessage {
    /// The request was applied. For a subscribe, `subscription_id` names the
    /// new subscription.
    Ack {
        #[serde(rename = "requestId")]
        request_id: u64,
        #[serde(
            rename = "subscriptionId",
            default,
            skip_serializing_if = "Option::is_none"
        )]
        subscription_id: Option<u64>,
    },
    Error {
        #[serde(rename = "requestId", default, skip_serializing_if = "Option::is_none")]
        request_id: Option<u64>,
        code: ErrorCode,
        message: String,
    },
    Snapshot {
        #[serde(rename = "subscriptionId")]
        subscription_id: u64,
        path: StorePath,
        #[serde(rename = "orderBy", default)]
        order_by: OrderBy,
        value: Value,
    },
}

impl ServerMessage {
    pub fn encode(&self) -> Result<Vec<u8>, StoreError> {
        encode(self)
    }

    pub fn decode(data: &[u8]) -> Result<Self, StoreError> {
        decode(data)
    }
}

/// Error categories reported by the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    InvalidPath,
    PermissionDenied,
    Internal,
}

impl ErrorCode {
    /// Maps a server-side store error onto the wire.
    pub fn from_store_error(err: &StoreError) -> Self {
        match err {
            StoreError::InvalidPath(_) => ErrorCode::InvalidPath,
            StoreError::PermissionDenied(_) => ErrorCode::PermissionDenied,
            _ => ErrorCode::Internal,
        }
    }

    /// Rebuilds the client-side error for a wire error.
    pub fn into_store_error(self, message: String) -> StoreError {
        match self {
            ErrorCode::InvalidPath => StoreError::InvalidPath(message),
            ErrorCode::PermissionDenied => StoreError::PermissionDenied(message),
            ErrorCode::Internal => StoreError::Internal(message),
        }
    }
}

fn encode<T: Serialize>(message: &T) -> Result<Vec<u8>, StoreError> {
    let mut buf = Vec::new();
    ciborium::into_writer(message, &mut buf).map_err(|e| StoreError::Protocol(e.to_string()))?;
    Ok(buf)
}

fn decode<T: for<'de> Deserialize<'de>>(data: &[u8]) -> Result<T, StoreError> {
    ciborium::from_reader(data).map_err(|e| StoreError::Protocol(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_set_message_encode_decode() {
        let msg = ClientMessage::Set {
            request_id: 7,
            path: StorePath::parse("grocery-items/milk").unwrap(),
            value: json!({"name": "Milk", "addedByUser": "a@x.com", "completed": false}),
        };

        let decoded = ClientMessage::decode(&msg.encode().unwrap()).unwrap();
        assert_eq!(decoded, msg);
        assert_eq!(decoded.request_id(), Some(7));
    }

    #[test]
    fn test_subscribe_carries_ordering() {
        let msg = ClientMessage::Subscribe {
            request_id: 1,
            query: Query::new(StorePath::parse("grocery-items").unwrap())
                .order_by_child("completed"),
        };

        match ClientMessage::decode(&msg.encode().unwrap()).unwrap() {
            ClientMessage::Subscribe { query, .. } => {
                assert_eq!(query.order_by, OrderBy::Child("completed".to_string()));
            }
            other => panic!("Expected Subscribe message, got {:?}", other),
        }
    }

    #[test]
    fn test_snapshot_with_null_value() {
        let msg = ServerMessage::Snapshot {
            subscription_id: 3,
            path: StorePath::parse("online").unwrap(),
            order_by: OrderBy::Key,
            value: Value::Null,
        };
        let decoded = ServerMessage::decode(&msg.encode().unwrap()).unwrap();
        assert_eq!(decoded, msg);
    }

    #[test]
    fn test_ack_without_subscription() {
        let msg = ServerMessage::Ack {
            request_id: 9,
            subscription_id: None,
        };
        assert_eq!(ServerMessage::decode(&msg.encode().unwrap()).unwrap(), msg);
    }

    #[test]
    fn test_decode_garbage_is_protocol_error() {
        let result = ServerMessage::decode(b"not cbor at all");
        assert!(matches!(result, Err(StoreError::Protocol(_))));
    }

    #[test]
    fn test_error_code_mapping() {
        let err = StoreError::InvalidPath("a.b".to_string());
        let code = ErrorCode::from_store_error(&err);
        assert_eq!(code, ErrorCode::InvalidPath);
        assert_eq!(code.into_store_error("a.b".to_string()), err);
        assert_eq!(
            ErrorCode::from_store_error(&StoreError::Closed),
            ErrorCode::Internal
        );
    }
}
