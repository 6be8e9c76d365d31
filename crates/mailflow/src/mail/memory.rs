//! In-process stores. Full scan + filter under one mutex; fine for tests and
//! single-process dev runs, not for multiple workers.

use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use uuid::Uuid;

use crate::error::{MailError, MailResult};
use crate::mail::broadcast::{BroadcastLog, BroadcastLogStore, Reservation, ReservationSource};
use crate::mail::model::{DispatchResult, MailJob, MailJobStatus, NewMailJob, RecipientError};
use crate::mail::store::{QueueCounts, QueueStore};

fn poisoned() -> MailError {
    MailError::Persistence("memory store lock poisoned".into())
}

#[derive(Default)]
pub struct MemoryQueueStore {
    jobs: Mutex<Vec<MailJob>>,
}

impl MemoryQueueStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.jobs.lock().map(|j| j.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn due_order(a: &MailJob, b: &MailJob) -> std::cmp::Ordering {
    (a.scheduled_at, a.created_at).cmp(&(b.scheduled_at, b.created_at))
}

#[async_trait]
impl QueueStore for MemoryQueueStore {
    async fn enqueue(&self, job: NewMailJob) -> MailResult<Uuid> {
        job.validate()?;
        let id = Uuid::new_v4();
        let mut jobs = self.jobs.lock().map_err(|_| poisoned())?;
        jobs.push(MailJob::from_new(id, job, Utc::now()));
        Ok(id)
    }

    async fn get(&self, id: Uuid) -> MailResult<Option<MailJob>> {
        let jobs = self.jobs.lock().map_err(|_| poisoned())?;
        Ok(jobs.iter().find(|j| j.id == id).cloned())
    }

    async fn due_jobs(&self, now: DateTime<Utc>) -> MailResult<Vec<MailJob>> {
        let jobs = self.jobs.lock().map_err(|_| poisoned())?;
        let mut due: Vec<MailJob> = jobs.iter().filter(|j| j.is_due(now)).cloned().collect();
        due.sort_by(due_order);
        Ok(due)
    }

    async fn claim_next(
        &self,
        due_by: DateTime<Utc>,
        claimed_at: DateTime<Utc>,
        worker_id: &str,
        lease_seconds: i64,
    ) -> MailResult<Option<MailJob>> {
        let mut jobs = self.jobs.lock().map_err(|_| poisoned())?;

        let Some(job) = jobs
            .iter_mut()
            .filter(|j| j.is_due(due_by))
            .min_by(|a, b| due_order(a, b))
        else {
            return Ok(None);
        };

        job.status = MailJobStatus::Processing;
        job.claimed_by = Some(worker_id.to_string());
        job.claim_expires_at = Some(claimed_at + Duration::seconds(lease_seconds));
        Ok(Some(job.clone()))
    }

    async fn mark_sent(
        &self,
        id: Uuid,
        worker_id: &str,
        result: DispatchResult,
        errors: &[RecipientError],
    ) -> MailResult<bool> {
        let mut jobs = self.jobs.lock().map_err(|_| poisoned())?;
        let Some(job) = jobs.iter_mut().find(|j| j.id == id) else {
            return Ok(false);
        };
        if job.status != MailJobStatus::Processing || job.claimed_by.as_deref() != Some(worker_id)
        {
            return Ok(false);
        }

        job.status = MailJobStatus::Sent;
        job.sent_at = Some(Utc::now());
        job.result = Some(result);
        job.errors = errors.to_vec();
        job.claimed_by = None;
        job.claim_expires_at = None;
        Ok(true)
    }

    async fn release_expired_claims(&self, now: DateTime<Utc>) -> MailResult<u64> {
        let mut jobs = self.jobs.lock().map_err(|_| poisoned())?;
        let mut released = 0;
        for job in jobs.iter_mut() {
            let expired = job.status == MailJobStatus::Processing
                && job.claim_expires_at.is_some_and(|at| at < now);
            if expired {
                job.status = MailJobStatus::Pending;
                job.claimed_by = None;
                job.claim_expires_at = None;
                released += 1;
            }
        }
        Ok(released)
    }

    async fn list(
        &self,
        tenant_id: &str,
        status: Option<MailJobStatus>,
        limit: i64,
    ) -> MailResult<Vec<MailJob>> {
        let limit = limit.clamp(1, 500) as usize;
        let jobs = self.jobs.lock().map_err(|_| poisoned())?;
        let mut out: Vec<MailJob> = jobs
            .iter()
            .filter(|j| j.tenant_id == tenant_id)
            .filter(|j| status.map_or(true, |s| j.status == s))
            .cloned()
            .collect();
        out.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        out.truncate(limit);
        Ok(out)
    }

    async fn counts(&self) -> MailResult<QueueCounts> {
        let now = Utc::now();
        let jobs = self.jobs.lock().map_err(|_| poisoned())?;
        let mut counts = QueueCounts::default();
        for job in jobs.iter() {
            match job.status {
                MailJobStatus::Pending => {
                    counts.pending += 1;
                    if job.is_due(now) {
                        counts.due += 1;
                    }
                }
                MailJobStatus::Processing => counts.processing += 1,
                MailJobStatus::Sent => counts.sent += 1,
            }
        }
        Ok(counts)
    }

    async fn purge_sent_before(&self, cutoff: DateTime<Utc>) -> MailResult<u64> {
        let mut jobs = self.jobs.lock().map_err(|_| poisoned())?;
        let before = jobs.len();
        jobs.retain(|j| {
            let expired = j.status == MailJobStatus::Sent && j.sent_at.is_some_and(|at| at < cutoff);
            !expired
        });
        Ok((before - jobs.len()) as u64)
    }
}

#[derive(Default)]
pub struct MemoryReservationSource {
    reservations: Mutex<Vec<Reservation>>,
}

impl MemoryReservationSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, reservation: Reservation) -> MailResult<()> {
        let mut all = self.reservations.lock().map_err(|_| poisoned())?;
        all.retain(|r| r.id != reservation.id);
        all.push(reservation);
        Ok(())
    }
}

#[async_trait]
impl ReservationSource for MemoryReservationSource {
    async fn reservations_for_event(
        &self,
        tenant_id: &str,
        event_id: &str,
    ) -> MailResult<Vec<Reservation>> {
        let all = self.reservations.lock().map_err(|_| poisoned())?;
        Ok(all
            .iter()
            .filter(|r| r.tenant_id == tenant_id && r.event_id == event_id)
            .cloned()
            .collect())
    }
}

#[derive(Default)]
pub struct MemoryBroadcastLogStore {
    logs: Mutex<Vec<BroadcastLog>>,
}

impl MemoryBroadcastLogStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl BroadcastLogStore for MemoryBroadcastLogStore {
    async fn record(&self, log: &BroadcastLog) -> MailResult<()> {
        self.logs.lock().map_err(|_| poisoned())?.push(log.clone());
        Ok(())
    }

    async fn for_event(&self, tenant_id: &str, event_id: &str) -> MailResult<Vec<BroadcastLog>> {
        let logs = self.logs.lock().map_err(|_| poisoned())?;
        let mut out: Vec<BroadcastLog> = logs
            .iter()
            .filter(|l| l.tenant_id == tenant_id && l.event_id == event_id)
            .cloned()
            .collect();
        out.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mail::model::Recipient;

    fn job(scheduled_at: Option<DateTime<Utc>>) -> NewMailJob {
        NewMailJob {
            tenant_id: "t1".into(),
            recipients: vec![Recipient::new("A", "a@x.com")],
            subject: "s".into(),
            body_template: "b".into(),
            sender_name: String::new(),
            tenant_name: String::new(),
            tenant_logo_url: None,
            event_title: None,
            event_date: None,
            venue_name: None,
            reply_to: None,
            scheduled_at,
        }
    }

    #[tokio::test]
    async fn claim_is_exclusive_until_lease_expires() {
        let store = MemoryQueueStore::new();
        let now = Utc::now();
        let id = store.enqueue(job(Some(now - Duration::seconds(1)))).await.unwrap();

        let first = store.claim_next(now, now, "w1", 30).await.unwrap();
        assert_eq!(first.map(|j| j.id), Some(id));
        assert!(store.claim_next(now, now, "w2", 30).await.unwrap().is_none());

        // lease not yet expired
        assert_eq!(store.release_expired_claims(now).await.unwrap(), 0);

        let later = now + Duration::seconds(31);
        assert_eq!(store.release_expired_claims(later).await.unwrap(), 1);
        let again = store.claim_next(later, later, "w2", 30).await.unwrap().unwrap();
        assert_eq!(again.id, id);

        // w1 lost its claim
        assert!(!store
            .mark_sent(id, "w1", DispatchResult::default(), &[])
            .await
            .unwrap());
        assert!(store
            .mark_sent(id, "w2", DispatchResult { success: 1, failed: 0 }, &[])
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn claims_oldest_due_first_and_leases_from_claim_time() {
        let store = MemoryQueueStore::new();
        let now = Utc::now();
        let newer = store.enqueue(job(Some(now - Duration::seconds(5)))).await.unwrap();
        let older = store.enqueue(job(Some(now - Duration::minutes(5)))).await.unwrap();
        store.enqueue(job(Some(now + Duration::minutes(5)))).await.unwrap();

        let claimed_at = now + Duration::seconds(40);
        let first = store.claim_next(now, claimed_at, "w", 30).await.unwrap().unwrap();
        assert_eq!(first.id, older);
        assert_eq!(first.claim_expires_at, Some(claimed_at + Duration::seconds(30)));

        let second = store.claim_next(now, now, "w", 30).await.unwrap().unwrap();
        assert_eq!(second.id, newer);
        assert!(store.claim_next(now, now, "w", 30).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn purge_only_touches_old_sent_jobs() {
        let store = MemoryQueueStore::new();
        let now = Utc::now();
        let sent = store.enqueue(job(None)).await.unwrap();
        store.enqueue(job(Some(now + Duration::hours(1)))).await.unwrap();

        store.claim_next(now, now, "w", 30).await.unwrap();
        store
            .mark_sent(sent, "w", DispatchResult { success: 1, failed: 0 }, &[])
            .await
            .unwrap();

        assert_eq!(store.purge_sent_before(now - Duration::days(1)).await.unwrap(), 0);
        assert_eq!(store.purge_sent_before(now + Duration::days(1)).await.unwrap(), 1);
        assert_eq!(store.len(), 1);
    }
}
