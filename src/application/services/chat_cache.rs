use crate::application::ports::storage_engine::BatchOp;
use crate::application::services::network_monitor::SyncParticipant;
use crate::application::services::status::StatusBroadcaster;
use crate::application::services::sync_queue::SyncQueueService;
use crate::application::ports::{RemoteService, StorageEngine};
use crate::domain::collections;
use crate::domain::entities::{
    CachedMessage, ConversationSummary, LocalRef, MessageDraft, MessagePreview,
    MutationDescriptor, MutationKind, RecordDraft, StorageFootprint, StoredRecord,
    CONVERSATION_TYPE, MESSAGE_TYPE,
};
use crate::domain::value_objects::SyncState;
use crate::shared::config::ChatCacheConfig;
use crate::shared::error::Result;
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CleanupReport {
    pub removed_conversations: u32,
    pub removed_messages: u32,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatStorageStats {
    pub conversation_count: u64,
    pub message_count: u64,
    pub pending_mutation_count: u64,
    pub footprint: StorageFootprint,
}

/// Bridges the persistent store and the remote service for the
/// conversations/messages domain: instant-then-fresh reads, optimistic
/// writes, and retention enforcement. Clones share every underlying
/// handle, which is what the background spawns rely on.
pub struct ChatCacheService {
    engine: Arc<dyn StorageEngine>,
    remote: Arc<dyn RemoteService>,
    queue: Arc<SyncQueueService>,
    status: StatusBroadcaster,
    config: ChatCacheConfig,
}

impl Clone for ChatCacheService {
    fn clone(&self) -> Self {
        Self {
            engine: self.engine.clone(),
            remote: self.remote.clone(),
            queue: self.queue.clone(),
            status: self.status.clone(),
            config: self.config.clone(),
        }
    }
}

impl ChatCacheService {
    pub fn new(
        engine: Arc<dyn StorageEngine>,
        remote: Arc<dyn RemoteService>,
        queue: Arc<SyncQueueService>,
        status: StatusBroadcaster,
        config: ChatCacheConfig,
    ) -> Self {
        Self {
            engine,
            remote,
            queue,
            status,
            config,
        }
    }

    /// Cached conversation list, most recently active first. Store
    /// failures degrade to an empty list; reads never fail the caller.
    pub async fn conversations(&self) -> Vec<ConversationSummary> {
        let records = match self.engine.get_all(collections::CONVERSATIONS).await {
            Ok(records) => records,
            Err(err) => {
                warn!(target: "offline::chat", error = %err, "conversation read failed; serving empty");
                return Vec::new();
            }
        };

        let mut summaries: Vec<ConversationSummary> = records
            .iter()
            .filter_map(|record| match record.decode::<ConversationSummary>() {
                Ok(summary) => Some(summary),
                Err(err) => {
                    warn!(target: "offline::chat", id = %record.id, error = %err, "skipping undecodable conversation");
                    None
                }
            })
            .collect();
        summaries.sort_by(|a, b| b.last_activity_at.cmp(&a.last_activity_at));
        summaries
    }

    /// Instant-then-fresh read: returns whatever is cached and kicks off a
    /// background reconciliation against the remote service.
    pub async fn conversations_with_sync(&self) -> Vec<ConversationSummary> {
        let cached = self.conversations().await;
        let this = self.clone();
        tokio::spawn(async move {
            if let Err(err) = this.reconcile_conversations().await {
                warn!(target: "offline::chat", error = %err, "background conversation reconcile failed");
            }
        });
        cached
    }

    /// Cached messages for one conversation, oldest first.
    pub async fn messages(&self, conversation_id: &str) -> Vec<CachedMessage> {
        let records = match self.engine.get_all(collections::MESSAGES).await {
            Ok(records) => records,
            Err(err) => {
                warn!(target: "offline::chat", error = %err, "message read failed; serving empty");
                return Vec::new();
            }
        };

        let mut messages: Vec<CachedMessage> = records
            .iter()
            .filter_map(|record| record.decode::<CachedMessage>().ok())
            .filter(|message| message.conversation_id == conversation_id)
            .collect();
        messages.sort_by(|a, b| a.sent_at.cmp(&b.sent_at));
        messages
    }

    pub async fn messages_with_sync(&self, conversation_id: &str) -> Vec<CachedMessage> {
        let cached = self.messages(conversation_id).await;
        let this = self.clone();
        let key = conversation_id.to_string();
        tokio::spawn(async move {
            if let Err(err) = this.reconcile_messages(&key).await {
                warn!(
                    target: "offline::chat",
                    conversation_id = %key,
                    error = %err,
                    "background message reconcile failed"
                );
            }
        });
        cached
    }

    /// Fetches the fresh conversation list and atomically replaces the
    /// confirmed slice of the collection: the stale records are deleted and
    /// the fresh set written in one batch, so a concurrent reader sees
    /// either the old set or the new one, never a mix. Idempotent.
    pub async fn reconcile_conversations(&self) -> Result<u32> {
        self.status.set_syncing(true);
        let result = self.reconcile_conversations_inner().await;
        match &result {
            Ok(count) => {
                self.status.record_sync_completed(Utc::now());
                debug!(target: "offline::chat", count, "conversations reconciled");
            }
            Err(_) => self.status.set_syncing(false),
        }
        result
    }

    async fn reconcile_conversations_inner(&self) -> Result<u32> {
        let fetched = self
            .remote
            .fetch(collections::CONVERSATIONS, &json!({}))
            .await?;
        let mut fresh: Vec<ConversationSummary> = serde_json::from_value(fetched)?;
        fresh.sort_by(|a, b| b.last_activity_at.cmp(&a.last_activity_at));
        fresh.truncate(self.config.max_conversations);

        let existing = self.engine.get_all(collections::CONVERSATIONS).await?;

        // opened_at is a local marker the remote knows nothing about;
        // carry it across the swap.
        let opened: HashMap<String, DateTime<Utc>> = existing
            .iter()
            .filter_map(|record| {
                record
                    .decode::<ConversationSummary>()
                    .ok()
                    .and_then(|summary| summary.opened_at.map(|at| (record.id.clone(), at)))
            })
            .collect();

        let mut ops: Vec<BatchOp> = existing
            .iter()
            .filter(|record| record.sync_state.is_confirmed())
            .map(|record| BatchOp::delete(collections::CONVERSATIONS, &record.id))
            .collect();

        let count = fresh.len() as u32;
        for mut summary in fresh {
            if summary.opened_at.is_none() {
                summary.opened_at = opened.get(&summary.id).copied();
            }
            ops.push(BatchOp::put(
                collections::CONVERSATIONS,
                RecordDraft::encode(
                    CONVERSATION_TYPE,
                    summary.id.clone(),
                    &summary,
                    SyncState::Synced,
                )?,
            ));
        }

        self.engine.apply_batch(ops).await?;
        Ok(count)
    }

    /// Same swap discipline as the conversation pass, scoped to one
    /// conversation's confirmed messages. Unconfirmed optimistic records
    /// survive the swap untouched.
    pub async fn reconcile_messages(&self, conversation_id: &str) -> Result<u32> {
        let params = json!({ "conversationId": conversation_id });
        let fetched = self.remote.fetch(collections::MESSAGES, &params).await?;
        let mut fresh: Vec<CachedMessage> = serde_json::from_value(fetched)?;
        fresh.sort_by(|a, b| b.sent_at.cmp(&a.sent_at));
        fresh.truncate(self.config.max_messages_per_conversation);

        let existing = self.engine.get_all(collections::MESSAGES).await?;
        let mut ops: Vec<BatchOp> = existing
            .iter()
            .filter(|record| {
                record.sync_state.is_confirmed()
                    && record
                        .decode::<CachedMessage>()
                        .map(|m| m.conversation_id == conversation_id)
                        .unwrap_or(false)
            })
            .map(|record| BatchOp::delete(collections::MESSAGES, &record.id))
            .collect();

        let count = fresh.len() as u32;
        for mut message in fresh {
            message.pending = false;
            ops.push(BatchOp::put(
                collections::MESSAGES,
                RecordDraft::encode(MESSAGE_TYPE, message.id.clone(), &message, SyncState::Synced)?,
            ));
        }

        self.engine.apply_batch(ops).await?;
        debug!(
            target: "offline::chat",
            conversation_id,
            count,
            "messages reconciled"
        );
        Ok(count)
    }

    /// Optimistic write: the message is materialized locally with a
    /// synthesized id and `Pending` state, returned for immediate display,
    /// and confirmed against the remote service in the background. A failed
    /// confirmation lands in the retry queue.
    pub async fn send_message(&self, draft: MessageDraft) -> Result<CachedMessage> {
        let message = CachedMessage {
            id: format!("local-{}", Uuid::new_v4()),
            conversation_id: draft.conversation_id,
            sender_id: draft.sender_id,
            receiver_id: draft.receiver_id,
            body: draft.body,
            read: true,
            pending: true,
            sent_at: Utc::now(),
        };

        let record =
            RecordDraft::encode(MESSAGE_TYPE, message.id.clone(), &message, SyncState::Pending)?;
        self.engine.put(collections::MESSAGES, record).await?;

        if let Err(err) = self.touch_conversation(&message).await {
            warn!(target: "offline::chat", error = %err, "could not refresh conversation snapshot");
        }

        let this = self.clone();
        let pending = message.clone();
        tokio::spawn(async move {
            this.confirm_message(pending).await;
        });

        Ok(message)
    }

    /// Background half of `send_message`; public so callers and tests can
    /// drive it deterministically. Never propagates errors — the write
    /// path surfaces failure only through sync state, after retries are
    /// exhausted.
    pub async fn confirm_message(&self, message: CachedMessage) {
        let payload = json!({
            "conversationId": message.conversation_id,
            "senderId": message.sender_id,
            "receiverId": message.receiver_id,
            "body": message.body,
            "sentAt": message.sent_at,
        });
        let local_ref = LocalRef {
            collection: collections::MESSAGES.to_string(),
            id: message.id.clone(),
        };

        match self.remote.create(collections::MESSAGES, &payload).await {
            Ok(remote_value) => match self.queue.confirm_local(&local_ref, &remote_value).await {
                Ok(confirmed_id) => {
                    debug!(
                        target: "offline::chat",
                        local_id = %message.id,
                        confirmed_id = %confirmed_id,
                        "message confirmed"
                    );
                }
                Err(err) => {
                    warn!(
                        target: "offline::chat",
                        local_id = %message.id,
                        error = %err,
                        "message confirmed remotely but local promotion failed"
                    );
                }
            },
            Err(err) => {
                warn!(
                    target: "offline::chat",
                    local_id = %message.id,
                    error = %err,
                    "message send failed; handing to retry queue"
                );
                let descriptor = MutationDescriptor {
                    resource: collections::MESSAGES.to_string(),
                    kind: MutationKind::Create,
                    target_id: None,
                    payload,
                    local_ref: Some(local_ref),
                };
                if let Err(err) = self.queue.enqueue(descriptor).await {
                    warn!(
                        target: "offline::chat",
                        local_id = %message.id,
                        error = %err,
                        "could not queue failed message send"
                    );
                }
            }
        }
    }

    /// Updates the retention marker. Display ordering is unaffected.
    pub async fn mark_opened(&self, conversation_id: &str) -> Result<()> {
        let record = self
            .engine
            .get(collections::CONVERSATIONS, conversation_id)
            .await?
            .ok_or_else(|| {
                crate::shared::error::CacheError::NotFound(format!(
                    "{}/{conversation_id}",
                    collections::CONVERSATIONS
                ))
            })?;

        let mut summary: ConversationSummary = record.decode()?;
        summary.mark_opened(Utc::now());
        self.engine
            .put(
                collections::CONVERSATIONS,
                RecordDraft::encode(
                    CONVERSATION_TYPE,
                    conversation_id,
                    &summary,
                    record.sync_state,
                )?,
            )
            .await?;
        Ok(())
    }

    /// Zeroes the unread badge and flips cached messages to read.
    pub async fn mark_conversation_read(&self, conversation_id: &str) -> Result<()> {
        if let Some(record) = self
            .engine
            .get(collections::CONVERSATIONS, conversation_id)
            .await?
        {
            let mut summary: ConversationSummary = record.decode()?;
            if summary.unread_count != 0 {
                summary.unread_count = 0;
                self.engine
                    .put(
                        collections::CONVERSATIONS,
                        RecordDraft::encode(
                            CONVERSATION_TYPE,
                            conversation_id,
                            &summary,
                            record.sync_state,
                        )?,
                    )
                    .await?;
            }
        }

        let records = self.engine.get_all(collections::MESSAGES).await?;
        let mut ops = Vec::new();
        for record in &records {
            let Ok(mut message) = record.decode::<CachedMessage>() else {
                continue;
            };
            if message.conversation_id == conversation_id && !message.read {
                message.read = true;
                ops.push(BatchOp::put(
                    collections::MESSAGES,
                    RecordDraft::encode(MESSAGE_TYPE, record.id.clone(), &message, record.sync_state)?,
                ));
            }
        }
        if !ops.is_empty() {
            self.engine.apply_batch(ops).await?;
        }
        Ok(())
    }

    /// Periodic retention pass: drops confirmed records outside their
    /// retention window (`cached_at`, or `opened_at` when that is more
    /// permissive), then trims each collection back to its configured
    /// maximum, least recently active first. On equal activity the record
    /// cached earlier goes first.
    pub async fn cleanup(&self) -> Result<CleanupReport> {
        let now = Utc::now();
        let mut ops: Vec<BatchOp> = Vec::new();
        let mut report = CleanupReport::default();

        let conversation_cutoff = now - Duration::days(self.config.conversation_retention_days);
        let conversation_records = self.engine.get_all(collections::CONVERSATIONS).await?;
        let mut survivors: Vec<(StoredRecord, ConversationSummary)> = Vec::new();

        for record in conversation_records {
            let Ok(summary) = record.decode::<ConversationSummary>() else {
                ops.push(BatchOp::delete(collections::CONVERSATIONS, &record.id));
                report.removed_conversations += 1;
                continue;
            };
            if !record.sync_state.is_confirmed() {
                continue;
            }
            let last_seen = summary
                .opened_at
                .map(|opened| opened.max(record.cached_at))
                .unwrap_or(record.cached_at);
            if last_seen < conversation_cutoff {
                ops.push(BatchOp::delete(collections::CONVERSATIONS, &record.id));
                report.removed_conversations += 1;
            } else {
                survivors.push((record, summary));
            }
        }

        if survivors.len() > self.config.max_conversations {
            survivors.sort_by(|a, b| {
                b.1.last_activity_at
                    .cmp(&a.1.last_activity_at)
                    .then(b.0.cached_at.cmp(&a.0.cached_at))
            });
            for (record, _) in survivors.drain(self.config.max_conversations..) {
                ops.push(BatchOp::delete(collections::CONVERSATIONS, &record.id));
                report.removed_conversations += 1;
            }
        }

        let message_cutoff = now - Duration::days(self.config.message_retention_days);
        let message_records = self.engine.get_all(collections::MESSAGES).await?;
        let mut by_conversation: HashMap<String, Vec<(StoredRecord, CachedMessage)>> =
            HashMap::new();

        for record in message_records {
            let Ok(message) = record.decode::<CachedMessage>() else {
                ops.push(BatchOp::delete(collections::MESSAGES, &record.id));
                report.removed_messages += 1;
                continue;
            };
            if !record.sync_state.is_confirmed() {
                continue;
            }
            if record.cached_at < message_cutoff {
                ops.push(BatchOp::delete(collections::MESSAGES, &record.id));
                report.removed_messages += 1;
                continue;
            }
            by_conversation
                .entry(message.conversation_id.clone())
                .or_default()
                .push((record, message));
        }

        for (_, mut group) in by_conversation {
            if group.len() <= self.config.max_messages_per_conversation {
                continue;
            }
            group.sort_by(|a, b| {
                b.1.sent_at
                    .cmp(&a.1.sent_at)
                    .then(b.0.cached_at.cmp(&a.0.cached_at))
            });
            for (record, _) in group.drain(self.config.max_messages_per_conversation..) {
                ops.push(BatchOp::delete(collections::MESSAGES, &record.id));
                report.removed_messages += 1;
            }
        }

        if !ops.is_empty() {
            self.engine.apply_batch(ops).await?;
        }
        debug!(
            target: "offline::chat",
            removed_conversations = report.removed_conversations,
            removed_messages = report.removed_messages,
            "cleanup pass completed"
        );
        Ok(report)
    }

    pub async fn storage_stats(&self) -> Result<ChatStorageStats> {
        let footprint = self.engine.storage_footprint().await?;
        Ok(ChatStorageStats {
            conversation_count: footprint.record_count(collections::CONVERSATIONS),
            message_count: footprint.record_count(collections::MESSAGES),
            pending_mutation_count: footprint.record_count(collections::PENDING_MUTATIONS),
            footprint,
        })
    }

    /// Refreshes the conversation's latest-message snapshot so the list
    /// reflects an optimistic send without waiting for reconciliation.
    async fn touch_conversation(&self, message: &CachedMessage) -> Result<()> {
        let Some(record) = self
            .engine
            .get(collections::CONVERSATIONS, &message.conversation_id)
            .await?
        else {
            return Ok(());
        };

        let mut summary: ConversationSummary = record.decode()?;
        summary.last_message = Some(MessagePreview {
            id: message.id.clone(),
            sender_id: message.sender_id.clone(),
            body: message.body.clone(),
            sent_at: message.sent_at,
        });
        summary.last_activity_at = message.sent_at;
        self.engine
            .put(
                collections::CONVERSATIONS,
                RecordDraft::encode(
                    CONVERSATION_TYPE,
                    message.conversation_id.clone(),
                    &summary,
                    record.sync_state,
                )?,
            )
            .await?;
        Ok(())
    }
}

#[async_trait]
impl SyncParticipant for ChatCacheService {
    fn name(&self) -> &str {
        "chat"
    }

    /// One reconciliation pass for this manager. The conversation list
    /// embeds last-message previews; per-conversation histories refresh
    /// when they are read.
    async fn reconcile_all(&self) -> Result<u32> {
        self.reconcile_conversations().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::ports::storage_engine::BatchOp;
    use crate::infrastructure::storage::MemoryStorageEngine;
    use crate::shared::config::SyncConfig;
    use crate::shared::error::CacheError;
    use crate::test_support::{eventually, MockRemoteService};
    use chrono::TimeZone;
    use serde_json::Value;

    fn chat_config(max_conversations: usize, max_messages: usize) -> ChatCacheConfig {
        ChatCacheConfig {
            max_conversations,
            max_messages_per_conversation: max_messages,
            ..ChatCacheConfig::default()
        }
    }

    fn setup(
        remote: Arc<MockRemoteService>,
        config: ChatCacheConfig,
    ) -> (Arc<ChatCacheService>, Arc<MemoryStorageEngine>) {
        let engine = Arc::new(MemoryStorageEngine::new(&collections::base_collections()));
        let status = StatusBroadcaster::new();
        let queue = Arc::new(SyncQueueService::new(
            engine.clone(),
            remote.clone(),
            status.clone(),
            SyncConfig::default(),
            vec![
                collections::CONVERSATIONS.to_string(),
                collections::MESSAGES.to_string(),
            ],
        ));
        let chat = Arc::new(ChatCacheService::new(
            engine.clone(),
            remote,
            queue,
            status,
            config,
        ));
        (chat, engine)
    }

    fn conversation_json(id: &str, activity_secs: i64) -> Value {
        json!({
            "id": id,
            "peerId": format!("peer-{id}"),
            "lastActivityAt": Utc.timestamp_opt(activity_secs, 0).unwrap(),
            "unreadCount": 0
        })
    }

    fn message_json(id: &str, conversation_id: &str, sent_secs: i64) -> Value {
        json!({
            "id": id,
            "conversationId": conversation_id,
            "senderId": "u1",
            "receiverId": "u2",
            "body": format!("body-{id}"),
            "sentAt": Utc.timestamp_opt(sent_secs, 0).unwrap()
        })
    }

    fn record_fingerprint(mut records: Vec<StoredRecord>) -> Vec<(String, Value, SyncState)> {
        records.sort_by(|a, b| a.id.cmp(&b.id));
        records
            .into_iter()
            .map(|r| (r.id, r.payload, r.sync_state))
            .collect()
    }

    #[tokio::test]
    async fn reconcile_is_idempotent() {
        let remote = Arc::new(MockRemoteService::new());
        remote.script_fetch(
            collections::CONVERSATIONS,
            json!([conversation_json("c1", 100), conversation_json("c2", 200)]),
        );
        let (chat, engine) = setup(remote, chat_config(10, 10));

        chat.reconcile_conversations().await.unwrap();
        let first = record_fingerprint(engine.get_all(collections::CONVERSATIONS).await.unwrap());

        chat.reconcile_conversations().await.unwrap();
        let second = record_fingerprint(engine.get_all(collections::CONVERSATIONS).await.unwrap());

        assert_eq!(first, second);
        assert_eq!(first.len(), 2);
    }

    #[tokio::test]
    async fn reconcile_keeps_only_most_recently_active() {
        let remote = Arc::new(MockRemoteService::new());
        remote.script_fetch(
            collections::CONVERSATIONS,
            json!([
                conversation_json("a", 1),
                conversation_json("b", 2),
                conversation_json("c", 3)
            ]),
        );
        let (chat, _engine) = setup(remote, chat_config(2, 10));

        chat.reconcile_conversations().await.unwrap();

        let summaries = chat.conversations().await;
        let ids: Vec<&str> = summaries.iter().map(|s| s.id.as_str()).collect();
        assert_eq!(ids, vec!["c", "b"]);
    }

    #[tokio::test]
    async fn failed_swap_leaves_old_slice_intact() {
        struct FailingBatchEngine(Arc<MemoryStorageEngine>);

        #[async_trait]
        impl StorageEngine for FailingBatchEngine {
            async fn put(&self, c: &str, d: RecordDraft) -> Result<String> {
                self.0.put(c, d).await
            }
            async fn get(&self, c: &str, id: &str) -> Result<Option<StoredRecord>> {
                self.0.get(c, id).await
            }
            async fn get_all(&self, c: &str) -> Result<Vec<StoredRecord>> {
                self.0.get_all(c).await
            }
            async fn get_by_sync_state(
                &self,
                c: &str,
                s: SyncState,
            ) -> Result<Vec<StoredRecord>> {
                self.0.get_by_sync_state(c, s).await
            }
            async fn set_sync_state(&self, c: &str, id: &str, s: SyncState) -> Result<()> {
                self.0.set_sync_state(c, id, s).await
            }
            async fn delete(&self, c: &str, id: &str) -> Result<()> {
                self.0.delete(c, id).await
            }
            async fn clear(&self, c: &str) -> Result<()> {
                self.0.clear(c).await
            }
            async fn apply_batch(&self, _ops: Vec<BatchOp>) -> Result<()> {
                Err(CacheError::StorageIo("simulated mid-swap failure".to_string()))
            }
            async fn storage_footprint(&self) -> Result<StorageFootprint> {
                self.0.storage_footprint().await
            }
        }

        let inner = Arc::new(MemoryStorageEngine::new(&collections::base_collections()));
        inner
            .put(
                collections::CONVERSATIONS,
                RecordDraft::new(CONVERSATION_TYPE, conversation_json("old", 50)).with_id("old"),
            )
            .await
            .unwrap();

        let remote = Arc::new(MockRemoteService::new());
        remote.script_fetch(
            collections::CONVERSATIONS,
            json!([conversation_json("new", 100)]),
        );

        let engine: Arc<dyn StorageEngine> = Arc::new(FailingBatchEngine(inner.clone()));
        let status = StatusBroadcaster::new();
        let queue = Arc::new(SyncQueueService::new(
            engine.clone(),
            remote.clone(),
            status.clone(),
            SyncConfig::default(),
            vec![collections::CONVERSATIONS.to_string()],
        ));
        let chat = ChatCacheService::new(engine, remote, queue, status, chat_config(10, 10));

        assert!(chat.reconcile_conversations().await.is_err());

        let records = inner.get_all(collections::CONVERSATIONS).await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].id, "old");
    }

    #[tokio::test]
    async fn message_reconcile_preserves_unconfirmed_records() {
        let remote = Arc::new(MockRemoteService::new());
        remote.script_fetch(
            collections::MESSAGES,
            json!([message_json("m10", "c1", 100)]),
        );
        let (chat, engine) = setup(remote, chat_config(10, 10));

        engine
            .put(
                collections::MESSAGES,
                RecordDraft::new(MESSAGE_TYPE, message_json("m-old", "c1", 10)).with_id("m-old"),
            )
            .await
            .unwrap();
        engine
            .put(
                collections::MESSAGES,
                RecordDraft::new(MESSAGE_TYPE, message_json("local-1", "c1", 20))
                    .with_id("local-1")
                    .with_sync_state(SyncState::Pending),
            )
            .await
            .unwrap();

        chat.reconcile_messages("c1").await.unwrap();

        let records = engine.get_all(collections::MESSAGES).await.unwrap();
        let mut ids: Vec<&str> = records.iter().map(|r| r.id.as_str()).collect();
        ids.sort_unstable();
        assert_eq!(ids, vec!["local-1", "m10"]);
    }

    #[tokio::test]
    async fn send_message_is_visible_immediately_and_promotes_on_success() {
        let remote = Arc::new(MockRemoteService::new());
        remote.script_create(
            collections::MESSAGES,
            message_json("m42", "c1", 500),
        );
        let (chat, engine) = setup(remote, chat_config(10, 10));

        let sent = chat
            .send_message(MessageDraft {
                conversation_id: "c1".to_string(),
                sender_id: "u1".to_string(),
                receiver_id: "u2".to_string(),
                body: "hi".to_string(),
            })
            .await
            .unwrap();

        assert!(sent.pending);
        assert!(sent.id.starts_with("local-"));
        let stored = engine
            .get(collections::MESSAGES, &sent.id)
            .await
            .unwrap()
            .expect("optimistic record");
        assert_eq!(stored.sync_state, SyncState::Pending);

        let engine_for_wait = engine.clone();
        let promoted = eventually(|| {
            let engine = engine_for_wait.clone();
            async move {
                engine
                    .get(collections::MESSAGES, "m42")
                    .await
                    .unwrap()
                    .map(|r| r.sync_state == SyncState::Synced)
                    .unwrap_or(false)
            }
        })
        .await;
        assert!(promoted);

        assert!(engine
            .get(collections::MESSAGES, &sent.id)
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn failed_send_lands_in_retry_queue() {
        let remote = Arc::new(MockRemoteService::new());
        remote.fail_all(true);
        let (chat, engine) = setup(remote, chat_config(10, 10));

        let sent = chat
            .send_message(MessageDraft {
                conversation_id: "c1".to_string(),
                sender_id: "u1".to_string(),
                receiver_id: "u2".to_string(),
                body: "hi".to_string(),
            })
            .await
            .unwrap();

        let engine_for_wait = engine.clone();
        let queued = eventually(|| {
            let engine = engine_for_wait.clone();
            async move {
                engine
                    .get_all(collections::PENDING_MUTATIONS)
                    .await
                    .unwrap()
                    .len()
                    == 1
            }
        })
        .await;
        assert!(queued);

        // Still visible, still pending.
        let record = engine
            .get(collections::MESSAGES, &sent.id)
            .await
            .unwrap()
            .expect("optimistic record");
        assert_eq!(record.sync_state, SyncState::Pending);
    }

    #[tokio::test]
    async fn mark_opened_sets_retention_marker_only() {
        let remote = Arc::new(MockRemoteService::new());
        remote.script_fetch(
            collections::CONVERSATIONS,
            json!([conversation_json("c1", 100)]),
        );
        let (chat, _engine) = setup(remote, chat_config(10, 10));
        chat.reconcile_conversations().await.unwrap();

        chat.mark_opened("c1").await.unwrap();

        let summaries = chat.conversations().await;
        assert!(summaries[0].opened_at.is_some());
        assert_eq!(
            summaries[0].last_activity_at,
            Utc.timestamp_opt(100, 0).unwrap()
        );

        assert!(matches!(
            chat.mark_opened("ghost").await,
            Err(CacheError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn opened_at_survives_reconciliation() {
        let remote = Arc::new(MockRemoteService::new());
        remote.script_fetch(
            collections::CONVERSATIONS,
            json!([conversation_json("c1", 100)]),
        );
        let (chat, _engine) = setup(remote, chat_config(10, 10));

        chat.reconcile_conversations().await.unwrap();
        chat.mark_opened("c1").await.unwrap();
        chat.reconcile_conversations().await.unwrap();

        let summaries = chat.conversations().await;
        assert!(summaries[0].opened_at.is_some());
    }

    #[tokio::test]
    async fn mark_conversation_read_clears_unread_state() {
        let remote = Arc::new(MockRemoteService::new());
        let (chat, engine) = setup(remote, chat_config(10, 10));

        let mut conversation = conversation_json("c1", 100);
        conversation["unreadCount"] = json!(3);
        engine
            .put(
                collections::CONVERSATIONS,
                RecordDraft::new(CONVERSATION_TYPE, conversation).with_id("c1"),
            )
            .await
            .unwrap();
        engine
            .put(
                collections::MESSAGES,
                RecordDraft::new(MESSAGE_TYPE, message_json("m1", "c1", 10)).with_id("m1"),
            )
            .await
            .unwrap();

        chat.mark_conversation_read("c1").await.unwrap();

        assert_eq!(chat.conversations().await[0].unread_count, 0);
        assert!(chat.messages("c1").await[0].read);
    }

    #[tokio::test]
    async fn cleanup_trims_to_configured_maximums() {
        let remote = Arc::new(MockRemoteService::new());
        let (chat, engine) = setup(remote, chat_config(2, 2));

        for (id, activity) in [("a", 1), ("b", 2), ("c", 3), ("d", 4)] {
            engine
                .put(
                    collections::CONVERSATIONS,
                    RecordDraft::new(CONVERSATION_TYPE, conversation_json(id, activity))
                        .with_id(id),
                )
                .await
                .unwrap();
        }
        for (id, sent) in [("m1", 1), ("m2", 2), ("m3", 3)] {
            engine
                .put(
                    collections::MESSAGES,
                    RecordDraft::new(MESSAGE_TYPE, message_json(id, "c1", sent)).with_id(id),
                )
                .await
                .unwrap();
        }

        let report = chat.cleanup().await.unwrap();
        assert_eq!(report.removed_conversations, 2);
        assert_eq!(report.removed_messages, 1);

        let ids: Vec<String> = chat
            .conversations()
            .await
            .into_iter()
            .map(|s| s.id)
            .collect();
        assert_eq!(ids, vec!["d", "c"]);

        let message_ids: Vec<String> =
            chat.messages("c1").await.into_iter().map(|m| m.id).collect();
        assert_eq!(message_ids, vec!["m2".to_string(), "m3".to_string()]);
    }

    #[tokio::test]
    async fn cleanup_retention_window_drops_stale_records() {
        let remote = Arc::new(MockRemoteService::new());
        let mut config = chat_config(10, 10);
        config.conversation_retention_days = 0;
        config.message_retention_days = 0;
        let (chat, engine) = setup(remote, config);

        engine
            .put(
                collections::CONVERSATIONS,
                RecordDraft::new(CONVERSATION_TYPE, conversation_json("c1", 100)).with_id("c1"),
            )
            .await
            .unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;

        let report = chat.cleanup().await.unwrap();
        assert_eq!(report.removed_conversations, 1);
        assert!(chat.conversations().await.is_empty());
    }

    #[tokio::test]
    async fn storage_stats_counts_collections() {
        let remote = Arc::new(MockRemoteService::new());
        let (chat, engine) = setup(remote, chat_config(10, 10));

        engine
            .put(
                collections::MESSAGES,
                RecordDraft::new(MESSAGE_TYPE, message_json("m1", "c1", 1)).with_id("m1"),
            )
            .await
            .unwrap();

        let stats = chat.storage_stats().await.unwrap();
        assert_eq!(stats.message_count, 1);
        assert_eq!(stats.conversation_count, 0);
        assert!(stats.footprint.total_bytes > 0);
    }
}
