use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// -- JWT Claims --

/// JWT claims shared between the two WebSocket endpoints. Canonical
/// definition lives here so the gateway and server agree on the shape.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: i64,
    pub exp: usize,
}

// -- Delivery record --

/// The serialized message object pushed to live sockets and returned from
/// history queries — one JSON object per message.
///
/// `receiver_id` carries the *sender's* id: it is the author-attribution
/// field, and the name is kept for wire compatibility with existing clients.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliveryRecord {
    pub id: i64,
    pub created_at: DateTime<Utc>,
    pub receiver_id: i64,
    pub message: Option<String>,
    #[serde(rename = "fileUrl")]
    pub file_url: Option<String>,
    pub id_return: Option<i64>,
    pub user_name: String,
    pub verified: bool,
    pub avatar: String,
    pub is_read: bool,
    pub vote: i64,
    pub edited: bool,
}

// -- Status / error envelope --

/// Inline status and error responses to the requester. Distinguished from
/// delivery records by the absence of an `id` field.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusMessage {
    pub message: String,
}

impl StatusMessage {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}
