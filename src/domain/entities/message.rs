use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub const MESSAGE_TYPE: &str = "message";

/// A cached chat message. `pending` distinguishes an optimistic local write
/// from a remotely confirmed one; remote payloads omit it, so it defaults
/// to false on decode.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CachedMessage {
    pub id: String,
    pub conversation_id: String,
    pub sender_id: String,
    pub receiver_id: String,
    pub body: String,
    #[serde(default)]
    pub read: bool,
    #[serde(default)]
    pub pending: bool,
    pub sent_at: DateTime<Utc>,
}

/// What a caller supplies when sending a message; ids and timestamps are
/// synthesized by the cache.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MessageDraft {
    pub conversation_id: String,
    pub sender_id: String,
    pub receiver_id: String,
    pub body: String,
}
