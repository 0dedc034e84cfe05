//! Binary protocol between RemoteStore clients and a SyncServer.
//!
//! Wire format (bincode-encoded, one message per WebSocket binary frame):
//! ```text
//! ┌──────────┬───────────┬────────────┬──────────┐
//! │ msg_type │ peer_id   │ request_id │ payload  │
//! │ 1 byte   │ 16 bytes  │ varint     │ variable │
//! └──────────┴───────────┴────────────┴──────────┘
//! ```
//!
//! Snapshot payloads are LZ4-compressed; the record set is resent whole on
//! every change and compresses well.

use serde::{Deserialize, Serialize};
use tally_core::{Answer, NewTopic, Snapshot, Topic, TopicId};
use uuid::Uuid;

use crate::store::StoreError;

/// Message types for the sync protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum MessageType {
    /// Client introduction, payload = display name
    Hello = 1,
    /// Full record set pushed after every change
    Snapshot = 2,
    /// Store call from a client
    Request = 3,
    /// Result of a Request, same request_id
    Response = 4,
}

/// A store call carried over the wire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Request {
    Create(NewTopic),
    Update {
        id: TopicId,
        answers: Vec<Answer>,
    },
    UpdateIf {
        id: TopicId,
        expected_version: u64,
        answers: Vec<Answer>,
    },
    Delete(TopicId),
    Get(TopicId),
    List,
}

/// The outcome of a [`Request`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Response {
    Created(TopicId),
    Updated { version: u64 },
    Deleted,
    Topic(Topic),
    Snapshot(Snapshot),
    Failed(StoreError),
}

/// Top-level protocol message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncMessage {
    pub msg_type: MessageType,
    pub peer_id: Uuid,
    /// Correlates a Response with its Request (0 = unsolicited)
    pub request_id: u64,
    /// Message payload (varies by msg_type)
    pub payload: Vec<u8>,
}

impl SyncMessage {
    pub fn hello(peer_id: Uuid, name: &str) -> Self {
        Self {
            msg_type: MessageType::Hello,
            peer_id,
            request_id: 0,
            payload: name.as_bytes().to_vec(),
        }
    }

    /// Push the full record set.
    pub fn snapshot(peer_id: Uuid, snapshot: &Snapshot) -> Result<Self, ProtocolError> {
        let raw = encode_payload(snapshot)?;
        Ok(Self {
            msg_type: MessageType::Snapshot,
            peer_id,
            request_id: 0,
            payload: lz4_flex::compress_prepend_size(&raw),
        })
    }

    pub fn request(peer_id: Uuid, request_id: u64, request: &Request) -> Result<Self, ProtocolError> {
        Ok(Self {
            msg_type: MessageType::Request,
            peer_id,
            request_id,
            payload: encode_payload(request)?,
        })
    }

    pub fn response(
        peer_id: Uuid,
        request_id: u64,
        response: &Response,
    ) -> Result<Self, ProtocolError> {
        Ok(Self {
            msg_type: MessageType::Response,
            peer_id,
            request_id,
            payload: encode_payload(response)?,
        })
    }

    /// Serialize to binary wire format.
    pub fn encode(&self) -> Result<Vec<u8>, ProtocolError> {
        bincode::serde::encode_to_vec(self, bincode::config::standard())
            .map_err(|e| ProtocolError::SerializationError(e.to_string()))
    }

    /// Deserialize from binary wire format.
    pub fn decode(bytes: &[u8]) -> Result<Self, ProtocolError> {
        let (msg, _) = bincode::serde::decode_from_slice(bytes, bincode::config::standard())
            .map_err(|e| ProtocolError::DeserializationError(e.to_string()))?;
        Ok(msg)
    }

    /// Client name from a Hello payload.
    pub fn hello_name(&self) -> Result<String, ProtocolError> {
        self.ensure_type(MessageType::Hello)?;
        String::from_utf8(self.payload.clone())
            .map_err(|e| ProtocolError::DeserializationError(e.to_string()))
    }

    pub fn snapshot_payload(&self) -> Result<Snapshot, ProtocolError> {
        self.ensure_type(MessageType::Snapshot)?;
        let raw = lz4_flex::decompress_size_prepended(&self.payload)
            .map_err(|e| ProtocolError::CompressionError(e.to_string()))?;
        decode_payload(&raw)
    }

    pub fn request_payload(&self) -> Result<Request, ProtocolError> {
        self.ensure_type(MessageType::Request)?;
        decode_payload(&self.payload)
    }

    pub fn response_payload(&self) -> Result<Response, ProtocolError> {
        self.ensure_type(MessageType::Response)?;
        decode_payload(&self.payload)
    }

    fn ensure_type(&self, msg_type: MessageType) -> Result<(), ProtocolError> {
        if self.msg_type != msg_type {
            return Err(ProtocolError::InvalidMessageType);
        }
        Ok(())
    }
}

fn encode_payload<T: Serialize>(value: &T) -> Result<Vec<u8>, ProtocolError> {
    bincode::serde::encode_to_vec(value, bincode::config::standard())
        .map_err(|e| ProtocolError::SerializationError(e.to_string()))
}

fn decode_payload<T: serde::de::DeserializeOwned>(bytes: &[u8]) -> Result<T, ProtocolError> {
    let (value, _) = bincode::serde::decode_from_slice(bytes, bincode::config::standard())
        .map_err(|e| ProtocolError::DeserializationError(e.to_string()))?;
    Ok(value)
}

/// Protocol errors.
#[derive(Debug, Clone)]
pub enum ProtocolError {
    SerializationError(String),
    DeserializationError(String),
    CompressionError(String),
    InvalidMessageType,
    ConnectionClosed,
    Timeout,
}

impl std::fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::SerializationError(e) => write!(f, "Serialization error: {e}"),
            Self::DeserializationError(e) => write!(f, "Deserialization error: {e}"),
            Self::CompressionError(e) => write!(f, "Compression error: {e}"),
            Self::InvalidMessageType => write!(f, "Invalid message type"),
            Self::ConnectionClosed => write!(f, "Connection closed"),
            Self::Timeout => write!(f, "Connection timeout"),
        }
    }
}

impl std::error::Error for ProtocolError {}

impl From<ProtocolError> for StoreError {
    fn from(e: ProtocolError) -> Self {
        match e {
            ProtocolError::SerializationError(e) => StoreError::SerializationError(e),
            ProtocolError::DeserializationError(e) => StoreError::DeserializationError(e),
            ProtocolError::CompressionError(e) => StoreError::CompressionError(e),
            ProtocolError::InvalidMessageType => {
                StoreError::ProtocolError("invalid message type".into())
            }
            ProtocolError::ConnectionClosed => StoreError::Disconnected,
            ProtocolError::Timeout => StoreError::Timeout,
        }
    }
}
