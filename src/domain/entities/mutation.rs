use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub const PENDING_MUTATION_TYPE: &str = "pending_mutation";

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum MutationKind {
    Create,
    Update,
}

/// Points at the optimistic record a mutation confirms.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct LocalRef {
    pub collection: String,
    pub id: String,
}

/// Enough information to re-issue a mutation against the remote service.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MutationDescriptor {
    pub resource: String,
    pub kind: MutationKind,
    /// Remote id for updates; absent for creates.
    #[serde(default)]
    pub target_id: Option<String>,
    pub payload: serde_json::Value,
    #[serde(default)]
    pub local_ref: Option<LocalRef>,
}

/// A queued mutation awaiting confirmation by the remote service.
///
/// Lifecycle: created when an optimistic write cannot be confirmed, updated
/// (`retry_count`, `last_retry_at`) on each failed retry, removed on success
/// or once `retry_count` reaches `max_retries`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PendingMutation {
    pub id: String,
    pub descriptor: MutationDescriptor,
    pub created_at: DateTime<Utc>,
    pub retry_count: u32,
    #[serde(default)]
    pub last_retry_at: Option<DateTime<Utc>>,
    pub max_retries: u32,
}

impl PendingMutation {
    pub fn new(descriptor: MutationDescriptor, max_retries: u32) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            descriptor,
            created_at: Utc::now(),
            retry_count: 0,
            last_retry_at: None,
            max_retries,
        }
    }

    /// `min(base_delay * 2^retry_count, max_delay)`, in milliseconds.
    pub fn backoff_delay_ms(&self, base_delay_ms: u64, max_delay_ms: u64) -> u64 {
        let exponent = self.retry_count.min(31);
        base_delay_ms
            .saturating_mul(1u64 << exponent)
            .min(max_delay_ms)
    }

    /// An item that has never been attempted is immediately eligible;
    /// otherwise it waits out its backoff window.
    pub fn is_eligible(&self, now: DateTime<Utc>, base_delay_ms: u64, max_delay_ms: u64) -> bool {
        match self.last_retry_at {
            None => true,
            Some(last) => {
                let delay = self.backoff_delay_ms(base_delay_ms, max_delay_ms);
                now - last >= Duration::milliseconds(delay as i64)
            }
        }
    }

    pub fn register_failure(&mut self, now: DateTime<Utc>) {
        self.retry_count += 1;
        self.last_retry_at = Some(now);
    }

    pub fn is_exhausted(&self) -> bool {
        self.retry_count >= self.max_retries
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample_mutation(max_retries: u32) -> PendingMutation {
        PendingMutation::new(
            MutationDescriptor {
                resource: "messages".to_string(),
                kind: MutationKind::Create,
                target_id: None,
                payload: json!({"body": "hi"}),
                local_ref: None,
            },
            max_retries,
        )
    }

    #[test]
    fn backoff_doubles_per_retry() {
        let mut item = sample_mutation(5);
        assert_eq!(item.backoff_delay_ms(5000, 60_000), 5000);
        item.retry_count = 1;
        assert_eq!(item.backoff_delay_ms(5000, 60_000), 10_000);
        item.retry_count = 3;
        assert_eq!(item.backoff_delay_ms(5000, 60_000), 40_000);
    }

    #[test]
    fn backoff_is_capped_at_max_delay() {
        let mut item = sample_mutation(10);
        item.retry_count = 6;
        assert_eq!(item.backoff_delay_ms(5000, 60_000), 60_000);
        // Huge retry counts must not overflow the shift.
        item.retry_count = 40;
        assert_eq!(item.backoff_delay_ms(5000, 60_000), 60_000);
    }

    #[test]
    fn eligibility_respects_backoff_window() {
        let now = Utc::now();
        let mut item = sample_mutation(5);
        assert!(item.is_eligible(now, 5000, 60_000));

        item.retry_count = 3;
        item.last_retry_at = Some(now - Duration::milliseconds(39_999));
        assert!(!item.is_eligible(now, 5000, 60_000));

        item.last_retry_at = Some(now - Duration::milliseconds(40_000));
        assert!(item.is_eligible(now, 5000, 60_000));
    }

    #[test]
    fn exhaustion_after_max_retries() {
        let mut item = sample_mutation(3);
        let now = Utc::now();
        for _ in 0..3 {
            assert!(!item.is_exhausted());
            item.register_failure(now);
        }
        assert!(item.is_exhausted());
    }
}
