#![allow(dead_code)]

use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use mailflow::api::ApiState;
use mailflow::mail::{
    BodyMarkup, DispatchOptions, DispatchResult, Dispatcher, DrainOptions, Drainer, MailJob,
    MailJobStatus, MailSender, MailService, MemoryBroadcastLogStore, MemoryQueueStore,
    MemoryReservationSource, NewMailJob, OutgoingMail, QrCodeService, QueueCounts, QueueStore,
    Recipient, RecipientError, Reservation, TemplateRenderer,
};
use uuid::Uuid;
use mailflow::{MailError, MailResult};
use sqlx::{postgres::PgPoolOptions, PgPool};

/// Records every send. Addresses in `fail` are rejected, addresses in `slow` hang
/// for `slow_delay` before succeeding, addresses in `panic` blow up the send task.
#[derive(Default)]
pub struct RecordingMailer {
    sent: Mutex<Vec<OutgoingMail>>,
    attempts: Mutex<Vec<String>>,
    fail: HashSet<String>,
    slow: HashSet<String>,
    slow_delay: Duration,
    panic: HashSet<String>,
}

impl RecordingMailer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing(mut self, emails: &[&str]) -> Self {
        self.fail.extend(emails.iter().map(|e| e.to_string()));
        self
    }

    pub fn slow(mut self, emails: &[&str], delay: Duration) -> Self {
        self.slow.extend(emails.iter().map(|e| e.to_string()));
        self.slow_delay = delay;
        self
    }

    pub fn panicking(mut self, emails: &[&str]) -> Self {
        self.panic.extend(emails.iter().map(|e| e.to_string()));
        self
    }

    pub fn sent(&self) -> Vec<OutgoingMail> {
        self.sent.lock().unwrap().clone()
    }

    /// Every address a send was attempted for, including failed ones.
    pub fn attempts(&self) -> Vec<String> {
        self.attempts.lock().unwrap().clone()
    }
}

#[async_trait]
impl MailSender for RecordingMailer {
    async fn send(&self, mail: &OutgoingMail) -> MailResult<()> {
        self.attempts.lock().unwrap().push(mail.to.clone());

        if self.slow.contains(&mail.to) {
            tokio::time::sleep(self.slow_delay).await;
        }
        if self.panic.contains(&mail.to) {
            panic!("transport crashed sending to {}", mail.to);
        }
        if self.fail.contains(&mail.to) {
            return Err(MailError::send(format!("rejected {}", mail.to)));
        }

        self.sent.lock().unwrap().push(mail.clone());
        Ok(())
    }

    fn name(&self) -> &'static str {
        "recording"
    }
}

/// Memory store whose claims always fail, like a database that went away mid-drain.
#[derive(Default)]
pub struct BrokenQueueStore {
    pub inner: MemoryQueueStore,
}

impl BrokenQueueStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl QueueStore for BrokenQueueStore {
    async fn enqueue(&self, job: NewMailJob) -> MailResult<Uuid> {
        self.inner.enqueue(job).await
    }

    async fn get(&self, id: Uuid) -> MailResult<Option<MailJob>> {
        self.inner.get(id).await
    }

    async fn due_jobs(&self, now: DateTime<Utc>) -> MailResult<Vec<MailJob>> {
        self.inner.due_jobs(now).await
    }

    async fn claim_next(
        &self,
        _due_by: DateTime<Utc>,
        _claimed_at: DateTime<Utc>,
        _worker_id: &str,
        _lease_seconds: i64,
    ) -> MailResult<Option<MailJob>> {
        Err(MailError::Persistence("connection reset by peer".into()))
    }

    async fn mark_sent(
        &self,
        id: Uuid,
        worker_id: &str,
        result: DispatchResult,
        errors: &[RecipientError],
    ) -> MailResult<bool> {
        self.inner.mark_sent(id, worker_id, result, errors).await
    }

    async fn release_expired_claims(&self, now: DateTime<Utc>) -> MailResult<u64> {
        self.inner.release_expired_claims(now).await
    }

    async fn list(
        &self,
        tenant_id: &str,
        status: Option<MailJobStatus>,
        limit: i64,
    ) -> MailResult<Vec<MailJob>> {
        self.inner.list(tenant_id, status, limit).await
    }

    async fn counts(&self) -> MailResult<QueueCounts> {
        self.inner.counts().await
    }

    async fn purge_sent_before(&self, cutoff: DateTime<Utc>) -> MailResult<u64> {
        self.inner.purge_sent_before(cutoff).await
    }
}

/// Memory-backed pipeline with handles on every concrete store.
pub struct Harness {
    pub queue: Arc<MemoryQueueStore>,
    pub reservations: Arc<MemoryReservationSource>,
    pub broadcast_logs: Arc<MemoryBroadcastLogStore>,
    pub mailer: Arc<RecordingMailer>,
    pub dispatcher: Dispatcher,
    pub service: MailService,
    pub drainer: Drainer,
}

impl Harness {
    pub fn new(mailer: RecordingMailer) -> Self {
        Self::with_options(mailer, options(), "worker-test")
    }

    pub fn with_options(mailer: RecordingMailer, opts: DispatchOptions, worker_id: &str) -> Self {
        let queue = Arc::new(MemoryQueueStore::new());
        let reservations = Arc::new(MemoryReservationSource::new());
        let broadcast_logs = Arc::new(MemoryBroadcastLogStore::new());
        let mailer = Arc::new(mailer);

        let renderer =
            TemplateRenderer::new(QrCodeService::default(), BodyMarkup::Trusted).unwrap();
        let dispatcher = Dispatcher::new(mailer.clone(), Arc::new(renderer), opts);
        let service = MailService::new(
            queue.clone(),
            dispatcher.clone(),
            reservations.clone(),
            broadcast_logs.clone(),
        );
        let drainer = Drainer::new(
            queue.clone(),
            dispatcher.clone(),
            DrainOptions {
                worker_id: worker_id.to_string(),
                lease_seconds: 60,
            },
        );

        Self {
            queue,
            reservations,
            broadcast_logs,
            mailer,
            dispatcher,
            service,
            drainer,
        }
    }

    /// A second drainer over the same store, as another worker would run it.
    pub fn drainer_for(&self, worker_id: &str) -> Drainer {
        Drainer::new(
            self.queue.clone(),
            self.dispatcher.clone(),
            DrainOptions {
                worker_id: worker_id.to_string(),
                lease_seconds: 60,
            },
        )
    }

    pub fn api_state(&self, cron_secret: Option<&str>) -> ApiState {
        ApiState {
            service: self.service.clone(),
            drainer: self.drainer.clone(),
            cron_secret: cron_secret.map(str::to_string),
        }
    }
}

pub fn options() -> DispatchOptions {
    DispatchOptions {
        concurrency: 4,
        send_timeout: Duration::from_secs(2),
        from_address: "noreply@mailflow.test".into(),
        default_reply_to: None,
    }
}

pub fn recipients(emails: &[&str]) -> Vec<Recipient> {
    emails
        .iter()
        .enumerate()
        .map(|(i, e)| Recipient::new(format!("Guest{i}"), *e))
        .collect()
}

pub fn new_job(recipients: Vec<Recipient>, scheduled_at: Option<DateTime<Utc>>) -> NewMailJob {
    NewMailJob {
        tenant_id: "tenant-a".into(),
        recipients,
        subject: "Reminder".into(),
        body_template: "all participants\nSee you soon ({email}).".into(),
        sender_name: "Acme Events".into(),
        tenant_name: "Acme".into(),
        tenant_logo_url: None,
        event_title: None,
        event_date: None,
        venue_name: None,
        reply_to: None,
        scheduled_at,
    }
}

pub fn reservation(id: &str, event_id: &str, email: &str, status: &str, checked_in: bool) -> Reservation {
    Reservation {
        id: id.into(),
        tenant_id: "tenant-a".into(),
        event_id: event_id.into(),
        name: format!("Guest {id}"),
        email: email.into(),
        status: status.into(),
        checked_in,
    }
}

/// `None` when TEST_DATABASE_URL is unset; callers return early so the suite
/// still passes on machines without Postgres.
pub async fn setup_db() -> Option<PgPool> {
    let _ = dotenvy::dotenv();

    let Ok(url) = std::env::var("TEST_DATABASE_URL") else {
        eprintln!("TEST_DATABASE_URL not set; skipping postgres test");
        return None;
    };

    let pool = PgPoolOptions::new()
        .max_connections(10)
        .connect(&url)
        .await
        .expect("failed to connect to TEST_DATABASE_URL");

    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .expect("migrations failed");

    sqlx::query("TRUNCATE TABLE mail_queue, reservations, broadcast_logs")
        .execute(&pool)
        .await
        .expect("truncate failed");

    Some(pool)
}
