use crate::application::ports::storage_engine::BatchOp;
use crate::application::services::status::StatusBroadcaster;
use crate::application::ports::{RemoteService, StorageEngine};
use crate::domain::collections;
use crate::domain::entities::{
    LocalRef, MutationDescriptor, MutationKind, PendingMutation, RecordDraft,
    PENDING_MUTATION_TYPE,
};
use crate::domain::value_objects::SyncState;
use crate::shared::config::SyncConfig;
use crate::shared::error::{CacheError, Result};
use chrono::Utc;
use serde_json::Value;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{error, info, warn};

/// Outcome counts of one pass over the queue.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncPassReport {
    pub attempted: u32,
    pub succeeded: u32,
    pub requeued: u32,
    pub abandoned: u32,
    pub skipped: u32,
}

/// Result of the startup read-repair pass.
#[derive(Debug, Clone, Copy, Default)]
pub struct ReindexReport {
    pub pending_records: usize,
    pub requeued: u32,
    pub queued_total: usize,
}

enum AttemptOutcome {
    Succeeded,
    Requeued,
    Abandoned,
    InFlight,
}

/// Durable at-least-once delivery of mutations made while offline or
/// during a transient remote failure.
///
/// Per-item state machine: queued -> attempting -> removed on success,
/// requeued with a longer backoff on failure, removed and surfaced as
/// `Failed` once `max_retries` failures accumulate.
pub struct SyncQueueService {
    engine: Arc<dyn StorageEngine>,
    remote: Arc<dyn RemoteService>,
    status: StatusBroadcaster,
    config: SyncConfig,
    /// Collections holding optimistic records this queue may confirm.
    domain_collections: Vec<String>,
    in_flight: Mutex<HashSet<String>>,
}

impl SyncQueueService {
    pub fn new(
        engine: Arc<dyn StorageEngine>,
        remote: Arc<dyn RemoteService>,
        status: StatusBroadcaster,
        config: SyncConfig,
        domain_collections: Vec<String>,
    ) -> Self {
        Self {
            engine,
            remote,
            status,
            config,
            domain_collections,
            in_flight: Mutex::new(HashSet::new()),
        }
    }

    /// Persists a mutation that could not be confirmed, with `retry_count`
    /// zero so the next pass attempts it immediately.
    pub async fn enqueue(&self, descriptor: MutationDescriptor) -> Result<String> {
        let item = PendingMutation::new(descriptor, self.config.max_retries);
        let draft = RecordDraft::encode(
            PENDING_MUTATION_TYPE,
            item.id.clone(),
            &item,
            SyncState::Pending,
        )?;
        self.engine
            .put(collections::PENDING_MUTATIONS, draft)
            .await?;

        info!(
            target: "offline::sync",
            id = %item.id,
            resource = %item.descriptor.resource,
            "mutation queued for background sync"
        );
        self.refresh_pending_count().await;
        Ok(item.id)
    }

    pub async fn pending_count(&self) -> u32 {
        match self.engine.get_all(collections::PENDING_MUTATIONS).await {
            Ok(items) => items.len() as u32,
            Err(err) => {
                warn!(target: "offline::sync", error = %err, "could not count queued mutations");
                0
            }
        }
    }

    /// Every queued mutation; undecodable entries are dropped with a log
    /// line rather than wedging the queue.
    pub async fn pending_items(&self) -> Result<Vec<PendingMutation>> {
        let records = self.engine.get_all(collections::PENDING_MUTATIONS).await?;
        let mut items = Vec::with_capacity(records.len());
        for record in records {
            match record.decode::<PendingMutation>() {
                Ok(item) => items.push(item),
                Err(err) => {
                    warn!(
                        target: "offline::sync",
                        id = %record.id,
                        error = %err,
                        "dropping undecodable queue entry"
                    );
                    let _ = self
                        .engine
                        .delete(collections::PENDING_MUTATIONS, &record.id)
                        .await;
                }
            }
        }
        Ok(items)
    }

    /// Attempts every item whose backoff window has elapsed. No ordering
    /// guarantee between independent items.
    pub async fn process_queue(&self) -> Result<SyncPassReport> {
        self.run_pass(false).await
    }

    /// Bypasses backoff and processes the full queue immediately. Fails
    /// with `Offline` when connectivity is down.
    pub async fn force_sync(&self) -> Result<SyncPassReport> {
        if !self.status.current().is_online {
            return Err(CacheError::Offline);
        }
        self.run_pass(true).await
    }

    async fn run_pass(&self, ignore_backoff: bool) -> Result<SyncPassReport> {
        let items = self.pending_items().await?;
        let now = Utc::now();
        let mut report = SyncPassReport::default();

        for item in items {
            if !ignore_backoff
                && !item.is_eligible(now, self.config.base_delay_ms, self.config.max_delay_ms)
            {
                report.skipped += 1;
                continue;
            }
            match self.attempt(item).await {
                AttemptOutcome::Succeeded => {
                    report.attempted += 1;
                    report.succeeded += 1;
                }
                AttemptOutcome::Requeued => {
                    report.attempted += 1;
                    report.requeued += 1;
                }
                AttemptOutcome::Abandoned => {
                    report.attempted += 1;
                    report.abandoned += 1;
                }
                AttemptOutcome::InFlight => report.skipped += 1,
            }
        }

        self.refresh_pending_count().await;
        Ok(report)
    }

    /// One mutation instance in flight per item id, ever.
    async fn attempt(&self, mut item: PendingMutation) -> AttemptOutcome {
        {
            let mut guard = self.in_flight.lock().await;
            if !guard.insert(item.id.clone()) {
                return AttemptOutcome::InFlight;
            }
        }
        let outcome = self.attempt_inner(&mut item).await;
        self.in_flight.lock().await.remove(&item.id);
        outcome
    }

    async fn attempt_inner(&self, item: &mut PendingMutation) -> AttemptOutcome {
        match self.issue(&item.descriptor).await {
            Ok(remote_value) => self.complete_item(item, &remote_value).await,
            Err(err) => self.register_item_failure(item, &err).await,
        }
    }

    async fn issue(&self, descriptor: &MutationDescriptor) -> Result<Value> {
        match descriptor.kind {
            MutationKind::Create => {
                self.remote
                    .create(&descriptor.resource, &descriptor.payload)
                    .await
            }
            MutationKind::Update => {
                let id = descriptor.target_id.as_deref().ok_or_else(|| {
                    CacheError::RemoteCallFailed("update mutation without a target id".to_string())
                })?;
                self.remote
                    .update(&descriptor.resource, id, &descriptor.payload)
                    .await
            }
        }
    }

    /// Success path: the optimistic record's promotion and the queue-item
    /// removal commit in one batch, so the Pending -> Synced transition
    /// happens exactly once.
    async fn complete_item(&self, item: &PendingMutation, remote_value: &Value) -> AttemptOutcome {
        let promotion = match self
            .promotion_ops(item.descriptor.local_ref.as_ref(), remote_value)
            .await
        {
            Ok(promotion) => promotion,
            Err(err) => {
                warn!(
                    target: "offline::sync",
                    id = %item.id,
                    error = %err,
                    "confirmed mutation but could not stage record promotion"
                );
                Promotion::default()
            }
        };

        let mut ops = promotion.ops;
        ops.push(BatchOp::delete(collections::PENDING_MUTATIONS, &item.id));

        match self.engine.apply_batch(ops).await {
            Ok(()) => {
                info!(
                    target: "offline::sync",
                    id = %item.id,
                    resource = %item.descriptor.resource,
                    confirmed_id = promotion.confirmed_id.as_deref().unwrap_or(""),
                    "mutation confirmed"
                );
                AttemptOutcome::Succeeded
            }
            Err(err) => {
                warn!(
                    target: "offline::sync",
                    id = %item.id,
                    error = %err,
                    "confirmation commit failed; item left queued"
                );
                AttemptOutcome::Requeued
            }
        }
    }

    async fn register_item_failure(
        &self,
        item: &mut PendingMutation,
        cause: &CacheError,
    ) -> AttemptOutcome {
        item.register_failure(Utc::now());

        if item.is_exhausted() {
            let failure = CacheError::PermanentMutationFailure {
                id: item.id.clone(),
                attempts: item.retry_count,
            };
            error!(
                target: "offline::sync",
                id = %item.id,
                resource = %item.descriptor.resource,
                cause = %cause,
                error = %failure,
                "mutation abandoned"
            );

            // Mark the record first: if the delete below is lost to a
            // crash, the next pass abandons again and converges, whereas
            // the reverse order could resurrect an abandoned mutation via
            // the startup read-repair.
            if let Some(local_ref) = &item.descriptor.local_ref {
                match self
                    .engine
                    .set_sync_state(&local_ref.collection, &local_ref.id, SyncState::Failed)
                    .await
                {
                    Ok(()) | Err(CacheError::NotFound(_)) => {}
                    Err(err) => {
                        warn!(
                            target: "offline::sync",
                            id = %item.id,
                            error = %err,
                            "could not mark optimistic record as failed"
                        );
                    }
                }
            }
            if let Err(err) = self
                .engine
                .delete(collections::PENDING_MUTATIONS, &item.id)
                .await
            {
                warn!(target: "offline::sync", id = %item.id, error = %err, "could not remove abandoned item");
            }
            return AttemptOutcome::Abandoned;
        }

        warn!(
            target: "offline::sync",
            id = %item.id,
            resource = %item.descriptor.resource,
            retry_count = item.retry_count,
            error = %cause,
            "mutation attempt failed; backing off"
        );
        let draft = RecordDraft::encode(
            PENDING_MUTATION_TYPE,
            item.id.clone(),
            item,
            SyncState::Pending,
        );
        match draft {
            Ok(draft) => {
                if let Err(err) = self.engine.put(collections::PENDING_MUTATIONS, draft).await {
                    warn!(target: "offline::sync", id = %item.id, error = %err, "could not persist retry state");
                }
            }
            Err(err) => {
                warn!(target: "offline::sync", id = %item.id, error = %err, "could not encode retry state");
            }
        }
        AttemptOutcome::Requeued
    }

    /// Applies a confirmed remote value over an optimistic record outside
    /// a queue pass (the direct write path uses this when its first remote
    /// attempt succeeds). Returns the id the record lives under afterwards.
    pub async fn confirm_local(&self, local_ref: &LocalRef, remote_value: &Value) -> Result<String> {
        let promotion = self.promotion_ops(Some(local_ref), remote_value).await?;
        if promotion.ops.is_empty() {
            return Ok(local_ref.id.clone());
        }
        self.engine.apply_batch(promotion.ops).await?;
        Ok(promotion.confirmed_id.unwrap_or_else(|| local_ref.id.clone()))
    }

    /// The swap that replaces a synthesized local record with the value the
    /// remote service returned. When the local record is already gone there
    /// is nothing to confirm; the value will arrive via reconciliation.
    async fn promotion_ops(
        &self,
        local_ref: Option<&LocalRef>,
        remote_value: &Value,
    ) -> Result<Promotion> {
        let Some(local_ref) = local_ref else {
            return Ok(Promotion::default());
        };
        let Some(existing) = self.engine.get(&local_ref.collection, &local_ref.id).await? else {
            return Ok(Promotion::default());
        };

        let confirmed_id = remote_value
            .get("id")
            .and_then(Value::as_str)
            .unwrap_or(&local_ref.id)
            .to_string();

        let mut ops = Vec::with_capacity(2);
        if confirmed_id != local_ref.id {
            ops.push(BatchOp::delete(&local_ref.collection, &local_ref.id));
        }
        ops.push(BatchOp::put(
            &local_ref.collection,
            RecordDraft {
                id: Some(confirmed_id.clone()),
                logical_type: existing.logical_type,
                payload: remote_value.clone(),
                sync_state: SyncState::Synced,
            },
        ));

        Ok(Promotion {
            ops,
            confirmed_id: Some(confirmed_id),
        })
    }

    /// Startup read-repair: an optimistic record whose mutation never made
    /// it into the queue (crash between the two writes) is re-enqueued
    /// once. Records already covered by a queued mutation are skipped.
    pub async fn reindex_on_open(&self) -> Result<ReindexReport> {
        let items = self.pending_items().await?;
        let covered: HashSet<(String, String)> = items
            .iter()
            .filter_map(|item| item.descriptor.local_ref.as_ref())
            .map(|r| (r.collection.clone(), r.id.clone()))
            .collect();

        let mut report = ReindexReport {
            queued_total: items.len(),
            ..ReindexReport::default()
        };

        for collection in &self.domain_collections {
            let pending = self
                .engine
                .get_by_sync_state(collection, SyncState::Pending)
                .await?;
            report.pending_records += pending.len();

            for record in pending {
                if covered.contains(&(collection.clone(), record.id.clone())) {
                    continue;
                }
                let descriptor = MutationDescriptor {
                    resource: collection.clone(),
                    kind: MutationKind::Create,
                    target_id: None,
                    payload: record.payload.clone(),
                    local_ref: Some(LocalRef {
                        collection: collection.clone(),
                        id: record.id.clone(),
                    }),
                };
                self.enqueue(descriptor).await?;
                report.requeued += 1;
                report.queued_total += 1;
            }
        }

        if report.requeued > 0 {
            info!(
                target: "offline::sync",
                requeued = report.requeued,
                "read-repair re-enqueued orphaned optimistic records"
            );
        }
        self.refresh_pending_count().await;
        Ok(report)
    }

    pub async fn refresh_pending_count(&self) {
        let count = self.pending_count().await;
        self.status.set_pending_count(count);
    }
}

#[derive(Default)]
struct Promotion {
    ops: Vec<BatchOp>,
    confirmed_id: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::collections;
    use crate::infrastructure::storage::MemoryStorageEngine;
    use crate::test_support::MockRemoteService;
    use serde_json::json;

    fn sync_config(max_retries: u32, base_delay_ms: u64) -> SyncConfig {
        SyncConfig {
            base_delay_ms,
            max_delay_ms: 60_000,
            max_retries,
        }
    }

    fn service(
        remote: Arc<MockRemoteService>,
        config: SyncConfig,
    ) -> (SyncQueueService, Arc<MemoryStorageEngine>, StatusBroadcaster) {
        let engine = Arc::new(MemoryStorageEngine::new(&collections::base_collections()));
        let status = StatusBroadcaster::new();
        let queue = SyncQueueService::new(
            engine.clone(),
            remote,
            status.clone(),
            config,
            vec![
                collections::CONVERSATIONS.to_string(),
                collections::MESSAGES.to_string(),
            ],
        );
        (queue, engine, status)
    }

    fn message_descriptor(local_id: &str) -> MutationDescriptor {
        MutationDescriptor {
            resource: "messages".to_string(),
            kind: MutationKind::Create,
            target_id: None,
            payload: json!({"body": "hi", "receiverId": "u2"}),
            local_ref: Some(LocalRef {
                collection: collections::MESSAGES.to_string(),
                id: local_id.to_string(),
            }),
        }
    }

    async fn seed_optimistic_record(engine: &MemoryStorageEngine, local_id: &str) {
        engine
            .put(
                collections::MESSAGES,
                RecordDraft::new("message", json!({"body": "hi", "pending": true}))
                    .with_id(local_id)
                    .with_sync_state(SyncState::Pending),
            )
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn enqueue_updates_pending_count() {
        let remote = Arc::new(MockRemoteService::new());
        let (queue, _engine, status) = service(remote, sync_config(3, 0));

        queue.enqueue(message_descriptor("local-1")).await.unwrap();
        assert_eq!(queue.pending_count().await, 1);
        assert_eq!(status.current().pending_count, 1);
    }

    #[tokio::test]
    async fn backoff_gates_retry_attempts() {
        let remote = Arc::new(MockRemoteService::new());
        let (queue, engine, _status) = service(remote.clone(), sync_config(5, 5000));

        // A previously failed item inside its backoff window.
        let mut item = PendingMutation::new(message_descriptor("local-1"), 5);
        item.retry_count = 3;
        item.last_retry_at = Some(Utc::now());
        engine
            .put(
                collections::PENDING_MUTATIONS,
                RecordDraft::encode(
                    PENDING_MUTATION_TYPE,
                    item.id.clone(),
                    &item,
                    SyncState::Pending,
                )
                .unwrap(),
            )
            .await
            .unwrap();

        let report = queue.process_queue().await.unwrap();
        assert_eq!(report.skipped, 1);
        assert_eq!(report.attempted, 0);
        assert_eq!(remote.create_calls(), 0);
    }

    #[tokio::test]
    async fn success_promotes_record_and_removes_item() {
        let remote = Arc::new(MockRemoteService::new());
        remote.script_create(
            "messages",
            json!({"id": "m42", "body": "hi", "receiverId": "u2"}),
        );
        let (queue, engine, status) = service(remote, sync_config(3, 0));

        seed_optimistic_record(&engine, "local-1").await;
        queue.enqueue(message_descriptor("local-1")).await.unwrap();

        let report = queue.process_queue().await.unwrap();
        assert_eq!(report.succeeded, 1);

        assert!(engine
            .get(collections::MESSAGES, "local-1")
            .await
            .unwrap()
            .is_none());
        let confirmed = engine
            .get(collections::MESSAGES, "m42")
            .await
            .unwrap()
            .expect("confirmed record");
        assert_eq!(confirmed.sync_state, SyncState::Synced);

        assert_eq!(queue.pending_count().await, 0);
        assert_eq!(status.current().pending_count, 0);
    }

    #[tokio::test]
    async fn exhausted_item_is_removed_and_record_marked_failed() {
        let remote = Arc::new(MockRemoteService::new());
        remote.fail_all(true);
        let (queue, engine, _status) = service(remote.clone(), sync_config(2, 0));

        seed_optimistic_record(&engine, "local-1").await;
        queue.enqueue(message_descriptor("local-1")).await.unwrap();

        let first = queue.process_queue().await.unwrap();
        assert_eq!(first.requeued, 1);

        let second = queue.process_queue().await.unwrap();
        assert_eq!(second.abandoned, 1);

        assert_eq!(queue.pending_count().await, 0);
        let record = engine
            .get(collections::MESSAGES, "local-1")
            .await
            .unwrap()
            .expect("record survives for the UI");
        assert_eq!(record.sync_state, SyncState::Failed);
        assert_eq!(remote.create_calls(), 2);

        // Never attempted again.
        let third = queue.process_queue().await.unwrap();
        assert_eq!(third.attempted, 0);
        assert_eq!(remote.create_calls(), 2);
    }

    #[tokio::test]
    async fn update_mutations_reissue_against_target_id() {
        let remote = Arc::new(MockRemoteService::new());
        remote.script_update("messages", json!({"id": "m1", "read": true}));
        let (queue, _engine, _status) = service(remote.clone(), sync_config(3, 0));

        queue
            .enqueue(MutationDescriptor {
                resource: "messages".to_string(),
                kind: MutationKind::Update,
                target_id: Some("m1".to_string()),
                payload: json!({"read": true}),
                local_ref: None,
            })
            .await
            .unwrap();

        let report = queue.process_queue().await.unwrap();
        assert_eq!(report.succeeded, 1);
        assert_eq!(remote.update_calls(), 1);
        assert_eq!(queue.pending_count().await, 0);
    }

    #[tokio::test]
    async fn force_sync_requires_connectivity() {
        let remote = Arc::new(MockRemoteService::new());
        let (queue, _engine, status) = service(remote, sync_config(3, 5000));
        status.set_online(false);

        assert!(matches!(queue.force_sync().await, Err(CacheError::Offline)));
    }

    #[tokio::test]
    async fn force_sync_bypasses_backoff() {
        let remote = Arc::new(MockRemoteService::new());
        remote.script_create("messages", json!({"id": "m7"}));
        let (queue, engine, _status) = service(remote.clone(), sync_config(5, 5000));

        seed_optimistic_record(&engine, "local-1").await;
        let mut item = PendingMutation::new(message_descriptor("local-1"), 5);
        item.retry_count = 2;
        item.last_retry_at = Some(Utc::now());
        engine
            .put(
                collections::PENDING_MUTATIONS,
                RecordDraft::encode(
                    PENDING_MUTATION_TYPE,
                    item.id.clone(),
                    &item,
                    SyncState::Pending,
                )
                .unwrap(),
            )
            .await
            .unwrap();

        let report = queue.force_sync().await.unwrap();
        assert_eq!(report.succeeded, 1);
        assert_eq!(remote.create_calls(), 1);
    }

    #[tokio::test]
    async fn reindex_requeues_orphaned_pending_records_once() {
        let remote = Arc::new(MockRemoteService::new());
        let (queue, engine, _status) = service(remote, sync_config(3, 0));

        seed_optimistic_record(&engine, "local-9").await;

        let report = queue.reindex_on_open().await.unwrap();
        assert_eq!(report.requeued, 1);
        assert_eq!(queue.pending_count().await, 1);

        let second = queue.reindex_on_open().await.unwrap();
        assert_eq!(second.requeued, 0);
        assert_eq!(queue.pending_count().await, 1);
    }
}
