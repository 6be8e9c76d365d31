// crates/mailflow/src/mail/repo.rs

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::types::Json;
use sqlx::PgPool;
use uuid::Uuid;

use crate::error::{MailError, MailResult};
use crate::mail::broadcast::{
    BroadcastLog, BroadcastLogStore, BroadcastTarget, Reservation, ReservationSource,
};
use crate::mail::model::{
    DispatchResult, MailJob, MailJobRow, MailJobStatus, NewMailJob, RecipientError,
};
use crate::mail::store::{QueueCounts, QueueStore};

const JOB_COLUMNS: &str = r#"
    id, tenant_id, recipients, subject, body_template,
    sender_name, tenant_name, tenant_logo_url,
    event_title, event_date, venue_name, reply_to,
    scheduled_at, status, claimed_by, claim_expires_at,
    success_count, failed_count, errors,
    created_at, sent_at
"#;

#[derive(Clone)]
pub struct PgQueueStore {
    pool: PgPool,
}

impl PgQueueStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn into_jobs(rows: Vec<MailJobRow>) -> MailResult<Vec<MailJob>> {
    rows.into_iter().map(MailJob::try_from).collect()
}

#[async_trait]
impl QueueStore for PgQueueStore {
    // ----------------------------
    // Enqueue
    // ----------------------------

    async fn enqueue(&self, job: NewMailJob) -> MailResult<Uuid> {
        job.validate()?;

        let id: Uuid = sqlx::query_scalar(
            r#"
            INSERT INTO mail_queue (
                tenant_id, recipients, subject, body_template,
                sender_name, tenant_name, tenant_logo_url,
                event_title, event_date, venue_name, reply_to,
                scheduled_at, status
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
            RETURNING id
            "#,
        )
        .bind(&job.tenant_id)
        .bind(Json(&job.recipients))
        .bind(&job.subject)
        .bind(&job.body_template)
        .bind(&job.sender_name)
        .bind(&job.tenant_name)
        .bind(&job.tenant_logo_url)
        .bind(&job.event_title)
        .bind(&job.event_date)
        .bind(&job.venue_name)
        .bind(&job.reply_to)
        .bind(job.scheduled_at)
        .bind(MailJobStatus::Pending.as_str())
        .fetch_one(&self.pool)
        .await?;

        Ok(id)
    }

    // ----------------------------
    // Reads
    // ----------------------------

    async fn get(&self, id: Uuid) -> MailResult<Option<MailJob>> {
        let row = sqlx::query_as::<_, MailJobRow>(&format!(
            "SELECT {JOB_COLUMNS} FROM mail_queue WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(MailJob::try_from).transpose()
    }

    async fn due_jobs(&self, now: DateTime<Utc>) -> MailResult<Vec<MailJob>> {
        let rows = sqlx::query_as::<_, MailJobRow>(&format!(
            r#"
            SELECT {JOB_COLUMNS}
            FROM mail_queue
            WHERE status = 'pending'
              AND (scheduled_at IS NULL OR scheduled_at <= $1)
            ORDER BY scheduled_at ASC NULLS FIRST, created_at ASC
            "#
        ))
        .bind(now)
        .fetch_all(&self.pool)
        .await?;

        into_jobs(rows)
    }

    async fn list(
        &self,
        tenant_id: &str,
        status: Option<MailJobStatus>,
        limit: i64,
    ) -> MailResult<Vec<MailJob>> {
        let limit = limit.clamp(1, 500);

        let rows = sqlx::query_as::<_, MailJobRow>(&format!(
            r#"
            SELECT {JOB_COLUMNS}
            FROM mail_queue
            WHERE tenant_id = $1
              AND ($2::text IS NULL OR status = $2)
            ORDER BY created_at DESC, id DESC
            LIMIT $3
            "#
        ))
        .bind(tenant_id)
        .bind(status.map(|s| s.as_str()))
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        into_jobs(rows)
    }

    async fn counts(&self) -> MailResult<QueueCounts> {
        let (pending, due, processing, sent) = sqlx::query_as::<_, (i64, i64, i64, i64)>(
            r#"
            SELECT
                COUNT(*) FILTER (WHERE status = 'pending'),
                COUNT(*) FILTER (
                    WHERE status = 'pending'
                      AND (scheduled_at IS NULL OR scheduled_at <= now())
                ),
                COUNT(*) FILTER (WHERE status = 'processing'),
                COUNT(*) FILTER (WHERE status = 'sent')
            FROM mail_queue
            "#,
        )
        .fetch_one(&self.pool)
        .await?;

        Ok(QueueCounts {
            pending,
            due,
            processing,
            sent,
        })
    }

    // ----------------------------
    // Claiming
    // ----------------------------

    /// One row per call, `FOR UPDATE SKIP LOCKED`: concurrent drains never see the same job.
    async fn claim_next(
        &self,
        due_by: DateTime<Utc>,
        claimed_at: DateTime<Utc>,
        worker_id: &str,
        lease_seconds: i64,
    ) -> MailResult<Option<MailJob>> {
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query_as::<_, MailJobRow>(&format!(
            r#"
            WITH candidate AS (
              SELECT id AS candidate_id
              FROM mail_queue
              WHERE status = 'pending'
                AND (scheduled_at IS NULL OR scheduled_at <= $1)
              ORDER BY scheduled_at ASC NULLS FIRST, created_at ASC
              FOR UPDATE SKIP LOCKED
              LIMIT 1
            )
            UPDATE mail_queue
            SET status = 'processing',
                claimed_by = $3,
                claim_expires_at = $2 + ($4::bigint * interval '1 second')
            FROM candidate
            WHERE mail_queue.id = candidate.candidate_id
            RETURNING {JOB_COLUMNS}
            "#
        ))
        .bind(due_by)
        .bind(claimed_at)
        .bind(worker_id)
        .bind(lease_seconds)
        .fetch_optional(&mut *tx)
        .await?;

        tx.commit().await?;

        row.map(MailJob::try_from).transpose()
    }

    async fn release_expired_claims(&self, now: DateTime<Utc>) -> MailResult<u64> {
        let res = sqlx::query(
            r#"
            UPDATE mail_queue
            SET status = 'pending',
                claimed_by = NULL,
                claim_expires_at = NULL
            WHERE status = 'processing'
              AND claim_expires_at IS NOT NULL
              AND claim_expires_at < $1
            "#,
        )
        .bind(now)
        .execute(&self.pool)
        .await?;

        Ok(res.rows_affected())
    }

    // ----------------------------
    // State transitions
    // ----------------------------

    /// The `claimed_by = worker_id` guard keeps another drain from finishing this job.
    async fn mark_sent(
        &self,
        id: Uuid,
        worker_id: &str,
        result: DispatchResult,
        errors: &[RecipientError],
    ) -> MailResult<bool> {
        let res = sqlx::query(
            r#"
            UPDATE mail_queue
            SET status = 'sent',
                sent_at = now(),
                success_count = $3,
                failed_count = $4,
                errors = $5,
                claimed_by = NULL,
                claim_expires_at = NULL
            WHERE id = $1
              AND status = 'processing'
              AND claimed_by = $2
            "#,
        )
        .bind(id)
        .bind(worker_id)
        .bind(result.success)
        .bind(result.failed)
        .bind(Json(errors))
        .execute(&self.pool)
        .await?;

        Ok(res.rows_affected() == 1)
    }

    // ----------------------------
    // Maintenance
    // ----------------------------

    async fn purge_sent_before(&self, cutoff: DateTime<Utc>) -> MailResult<u64> {
        let res = sqlx::query(
            r#"
            DELETE FROM mail_queue
            WHERE status = 'sent'
              AND sent_at < $1
            "#,
        )
        .bind(cutoff)
        .execute(&self.pool)
        .await
        .map_err(|e| MailError::Persistence(format!("purge sent jobs: {e}")))?;

        Ok(res.rows_affected())
    }
}

// ----------------------------
// Reservations / broadcast logs
// ----------------------------

#[derive(Clone)]
pub struct PgReservationSource {
    pool: PgPool,
}

impl PgReservationSource {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ReservationSource for PgReservationSource {
    async fn reservations_for_event(
        &self,
        tenant_id: &str,
        event_id: &str,
    ) -> MailResult<Vec<Reservation>> {
        let rows = sqlx::query_as::<_, Reservation>(
            r#"
            SELECT id, tenant_id, event_id, name, email, status, checked_in
            FROM reservations
            WHERE tenant_id = $1
              AND event_id = $2
            ORDER BY created_at ASC, id ASC
            "#,
        )
        .bind(tenant_id)
        .bind(event_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }
}

#[derive(Clone)]
pub struct PgBroadcastLogStore {
    pool: PgPool,
}

impl PgBroadcastLogStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(sqlx::FromRow)]
struct BroadcastLogRow {
    id: Uuid,
    tenant_id: String,
    event_id: String,
    subject: String,
    message: String,
    target: String,
    total_count: i32,
    success_count: i32,
    failed_count: i32,
    errors: Json<Vec<RecipientError>>,
    created_at: DateTime<Utc>,
}

impl TryFrom<BroadcastLogRow> for BroadcastLog {
    type Error = MailError;

    fn try_from(row: BroadcastLogRow) -> MailResult<Self> {
        let target = BroadcastTarget::parse(&row.target).ok_or_else(|| {
            MailError::Persistence(format!(
                "broadcast log {} has unknown target {}",
                row.id, row.target
            ))
        })?;

        Ok(Self {
            id: row.id,
            tenant_id: row.tenant_id,
            event_id: row.event_id,
            subject: row.subject,
            message: row.message,
            target,
            total_count: row.total_count,
            success_count: row.success_count,
            failed_count: row.failed_count,
            errors: row.errors.0,
            created_at: row.created_at,
        })
    }
}

#[async_trait]
impl BroadcastLogStore for PgBroadcastLogStore {
    async fn record(&self, log: &BroadcastLog) -> MailResult<()> {
        sqlx::query(
            r#"
            INSERT INTO broadcast_logs (
                id, tenant_id, event_id, subject, message, target,
                total_count, success_count, failed_count, errors, created_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            "#,
        )
        .bind(log.id)
        .bind(&log.tenant_id)
        .bind(&log.event_id)
        .bind(&log.subject)
        .bind(&log.message)
        .bind(log.target.as_str())
        .bind(log.total_count)
        .bind(log.success_count)
        .bind(log.failed_count)
        .bind(Json(&log.errors))
        .bind(log.created_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn for_event(&self, tenant_id: &str, event_id: &str) -> MailResult<Vec<BroadcastLog>> {
        let rows = sqlx::query_as::<_, BroadcastLogRow>(
            r#"
            SELECT id, tenant_id, event_id, subject, message, target,
                   total_count, success_count, failed_count, errors, created_at
            FROM broadcast_logs
            WHERE tenant_id = $1
              AND event_id = $2
            ORDER BY created_at DESC
            "#,
        )
        .bind(tenant_id)
        .bind(event_id)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(BroadcastLog::try_from).collect()
    }
}
