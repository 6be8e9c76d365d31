use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use tracing::info;
use uuid::Uuid;

use crate::error::{MailError, MailResult};
use crate::mail::broadcast::{
    BroadcastLog, BroadcastLogStore, BroadcastRequest, BroadcastTarget, ReservationSource,
};
use crate::mail::dispatcher::{DispatchReport, Dispatcher};
use crate::mail::model::{MailJob, NewMailJob, Recipient, SendMailRequest};
use crate::mail::render::RenderVariant;
use crate::mail::store::QueueStore;
use crate::tenant::TenantContext;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmitOutcome {
    /// Dispatched inline; nothing was persisted.
    Sent(DispatchReport),
    /// Stored for a later drain.
    Deferred { job_id: Uuid },
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BroadcastOutcome {
    pub log_id: Uuid,
    pub target: BroadcastTarget,
    pub total: i32,
    #[serde(flatten)]
    pub report: DispatchReport,
}

/// Entry points used by request handlers.
#[derive(Clone)]
pub struct MailService {
    store: Arc<dyn QueueStore>,
    dispatcher: Dispatcher,
    reservations: Arc<dyn ReservationSource>,
    broadcast_logs: Arc<dyn BroadcastLogStore>,
}

impl MailService {
    pub fn new(
        store: Arc<dyn QueueStore>,
        dispatcher: Dispatcher,
        reservations: Arc<dyn ReservationSource>,
        broadcast_logs: Arc<dyn BroadcastLogStore>,
    ) -> Self {
        Self {
            store,
            dispatcher,
            reservations,
            broadcast_logs,
        }
    }

    pub fn store(&self) -> &Arc<dyn QueueStore> {
        &self.store
    }

    /// Enqueue when a send time is given, otherwise dispatch now.
    pub async fn submit(
        &self,
        tenant: &TenantContext,
        req: SendMailRequest,
    ) -> MailResult<SubmitOutcome> {
        tenant.ensure_can_send()?;
        let job = req.into_new_job(&tenant.tenant_id)?;

        if let Some(at) = job.scheduled_at {
            let job_id = self.store.enqueue(job).await?;
            info!(%job_id, tenant_id = %tenant.tenant_id, scheduled_at = %at, "mail job deferred");
            return Ok(SubmitOutcome::Deferred { job_id });
        }

        let job = MailJob::transient(job);
        let report = self.dispatcher.dispatch(&job, RenderVariant::Standard).await;
        Ok(SubmitOutcome::Sent(report))
    }

    /// Send `req.message` to the event's reservations and record a broadcast log.
    pub async fn broadcast(
        &self,
        tenant: &TenantContext,
        event_id: &str,
        req: BroadcastRequest,
    ) -> MailResult<BroadcastOutcome> {
        tenant.ensure_can_send()?;
        if event_id.trim().is_empty() {
            return Err(MailError::validation("event id is required"));
        }
        let target = req.target()?;
        let subject = required(req.subject.clone(), "subject")?;
        let message = required(req.message.clone(), "message")?;

        let recipients: Vec<Recipient> = self
            .reservations
            .reservations_for_event(&tenant.tenant_id, event_id)
            .await?
            .iter()
            .filter(|r| target.matches(r))
            .map(|r| r.to_recipient())
            .collect();

        let job = MailJob::transient(NewMailJob {
            tenant_id: tenant.tenant_id.clone(),
            recipients,
            subject: subject.clone(),
            body_template: message.clone(),
            sender_name: req.sender_name.unwrap_or_default(),
            tenant_name: req.tenant_name.unwrap_or_default(),
            tenant_logo_url: req.tenant_logo_url,
            event_title: req.event_title,
            event_date: req.event_date,
            venue_name: req.venue_name,
            reply_to: req.reply_to,
            scheduled_at: None,
        });

        let total = job.recipients.len() as i32;
        let report = self.dispatcher.dispatch(&job, RenderVariant::Broadcast).await;

        let log = BroadcastLog {
            id: Uuid::new_v4(),
            tenant_id: tenant.tenant_id.clone(),
            event_id: event_id.to_string(),
            subject,
            message,
            target,
            total_count: total,
            success_count: report.result.success,
            failed_count: report.result.failed,
            errors: report.errors.clone(),
            created_at: Utc::now(),
        };
        self.broadcast_logs.record(&log).await?;

        info!(
            tenant_id = %tenant.tenant_id,
            event_id,
            target = target.as_str(),
            total,
            success = report.result.success,
            failed = report.result.failed,
            "broadcast finished"
        );

        Ok(BroadcastOutcome {
            log_id: log.id,
            target,
            total,
            report,
        })
    }
}

fn required(value: Option<String>, field: &str) -> MailResult<String> {
    value
        .filter(|v| !v.trim().is_empty())
        .ok_or_else(|| MailError::validation(format!("{field} is required")))
}
