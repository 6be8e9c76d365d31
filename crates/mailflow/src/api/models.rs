// crates/mailflow/src/api/models.rs
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::mail::dispatcher::DispatchReport;
use crate::mail::drain::ProcessedJob;
use crate::mail::model::{DispatchResult, MailJob, RecipientError};
use crate::mail::service::BroadcastOutcome;

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub success: bool,
    pub error: String,
    pub code: &'static str,
}

/// `{success, processed}` when something was drained, `{success, count: 0}` otherwise.
#[derive(Debug, Serialize)]
#[serde(untagged)]
pub enum CronResponse {
    Processed {
        success: bool,
        processed: Vec<ProcessedJob>,
    },
    Idle {
        success: bool,
        count: usize,
    },
}

impl CronResponse {
    pub fn from_processed(processed: Vec<ProcessedJob>) -> Self {
        if processed.is_empty() {
            CronResponse::Idle {
                success: true,
                count: 0,
            }
        } else {
            CronResponse::Processed {
                success: true,
                processed,
            }
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
pub enum SendResponse {
    Sent {
        success: bool,
        result: DispatchReport,
    },
    #[serde(rename_all = "camelCase")]
    Deferred {
        success: bool,
        message: &'static str,
        job_id: Uuid,
    },
}

pub const DEFERRED_MESSAGE: &str = "Reservation saved";

#[derive(Debug, Serialize)]
pub struct BroadcastResponse {
    pub success: bool,
    pub result: BroadcastOutcome,
}

#[derive(Debug, Deserialize)]
pub struct ListJobsQuery {
    pub status: Option<String>,
    pub limit: Option<i64>,
}

/// Listing row: the job without its body and recipient list.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobListItem {
    pub id: Uuid,
    pub subject: String,
    pub status: String,
    pub recipient_count: usize,
    pub scheduled_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub sent_at: Option<DateTime<Utc>>,
    pub result: Option<DispatchResult>,
    pub errors: Vec<RecipientError>,
}

impl From<MailJob> for JobListItem {
    fn from(job: MailJob) -> Self {
        Self {
            id: job.id,
            subject: job.subject,
            status: job.status.as_str().to_string(),
            recipient_count: job.recipients.len(),
            scheduled_at: job.scheduled_at,
            created_at: job.created_at,
            sent_at: job.sent_at,
            result: job.result,
            errors: job.errors,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ListJobsResponse {
    pub success: bool,
    pub items: Vec<JobListItem>,
}
