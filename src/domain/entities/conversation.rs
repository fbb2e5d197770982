use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub const CONVERSATION_TYPE: &str = "conversation";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MessagePreview {
    pub id: String,
    pub sender_id: String,
    pub body: String,
    pub sent_at: DateTime<Utc>,
}

/// One row of the conversation list: latest message reference, unread
/// count, and the `opened_at` retention marker. `opened_at` never affects
/// display ordering.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ConversationSummary {
    pub id: String,
    pub peer_id: String,
    #[serde(default)]
    pub last_message: Option<MessagePreview>,
    pub last_activity_at: DateTime<Utc>,
    #[serde(default)]
    pub unread_count: u32,
    #[serde(default)]
    pub opened_at: Option<DateTime<Utc>>,
}

impl ConversationSummary {
    pub fn mark_opened(&mut self, at: DateTime<Utc>) {
        self.opened_at = Some(at);
    }
}
