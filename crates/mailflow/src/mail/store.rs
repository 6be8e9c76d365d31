use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::MailResult;
use crate::mail::model::{DispatchResult, MailJob, MailJobStatus, NewMailJob, RecipientError};

/// Durable holding area for scheduled jobs.
///
/// Lifecycle per job: `pending -> processing -> sent`. A job only leaves
/// `pending` through `claim_next`, so two drains racing on the same row
/// cannot both dispatch it.
#[async_trait]
pub trait QueueStore: Send + Sync {
    /// Validates and persists as `pending`.
    async fn enqueue(&self, job: NewMailJob) -> MailResult<Uuid>;

    async fn get(&self, id: Uuid) -> MailResult<Option<MailJob>>;

    /// Every `pending` job with `scheduled_at <= now`. Read-only.
    async fn due_jobs(&self, now: DateTime<Utc>) -> MailResult<Vec<MailJob>>;

    /// Atomically move the oldest job due at `due_by` to `processing`, owned by
    /// `worker_id` until `claimed_at + lease_seconds`. `None` when nothing is due.
    async fn claim_next(
        &self,
        due_by: DateTime<Utc>,
        claimed_at: DateTime<Utc>,
        worker_id: &str,
        lease_seconds: i64,
    ) -> MailResult<Option<MailJob>>;

    /// Terminal `processing -> sent` for the claim owner. Returns false when the job
    /// was not in that state (already sent, or claimed by someone else).
    async fn mark_sent(
        &self,
        id: Uuid,
        worker_id: &str,
        result: DispatchResult,
        errors: &[RecipientError],
    ) -> MailResult<bool>;

    /// Put `processing` jobs whose lease ran out back to `pending`.
    async fn release_expired_claims(&self, now: DateTime<Utc>) -> MailResult<u64>;

    /// Newest first.
    async fn list(
        &self,
        tenant_id: &str,
        status: Option<MailJobStatus>,
        limit: i64,
    ) -> MailResult<Vec<MailJob>>;

    async fn counts(&self) -> MailResult<QueueCounts>;

    /// Delete `sent` jobs whose `sent_at` is older than `cutoff`.
    async fn purge_sent_before(&self, cutoff: DateTime<Utc>) -> MailResult<u64>;
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueCounts {
    pub pending: i64,
    pub due: i64,
    pub processing: i64,
    pub sent: i64,
}
