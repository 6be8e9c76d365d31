use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use sqlx::types::Json;
use uuid::Uuid;

use crate::error::{MailError, MailResult};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Recipient {
    pub name: String,
    pub email: String,
    /// Reservation id; drives the `{qr}` check-in code.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
}

impl Recipient {
    pub fn new(name: impl Into<String>, email: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            email: email.into(),
            id: None,
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MailJobStatus {
    Pending,
    Processing,
    Sent,
}

impl MailJobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            MailJobStatus::Pending => "pending",
            MailJobStatus::Processing => "processing",
            MailJobStatus::Sent => "sent",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "pending" => Some(Self::Pending),
            "processing" => Some(Self::Processing),
            "sent" => Some(Self::Sent),
            _ => None,
        }
    }
}

/// Aggregate outcome of one dispatch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispatchResult {
    pub success: i32,
    pub failed: i32,
}

impl DispatchResult {
    pub fn total(&self) -> i32 {
        self.success + self.failed
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecipientError {
    pub email: String,
    pub error: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MailJob {
    pub id: Uuid,
    pub tenant_id: String,
    pub recipients: Vec<Recipient>,
    pub subject: String,
    pub body_template: String,
    pub sender_name: String,
    pub tenant_name: String,
    pub tenant_logo_url: Option<String>,
    pub event_title: Option<String>,
    pub event_date: Option<String>,
    pub venue_name: Option<String>,
    pub reply_to: Option<String>,
    pub scheduled_at: Option<DateTime<Utc>>,
    pub status: MailJobStatus,
    pub claimed_by: Option<String>,
    pub claim_expires_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub sent_at: Option<DateTime<Utc>>,
    pub result: Option<DispatchResult>,
    pub errors: Vec<RecipientError>,
}

impl MailJob {
    /// Build an unsaved job for the immediate-send path.
    pub fn transient(job: NewMailJob) -> Self {
        Self::from_new(Uuid::new_v4(), job, Utc::now())
    }

    pub(crate) fn from_new(id: Uuid, job: NewMailJob, created_at: DateTime<Utc>) -> Self {
        Self {
            id,
            tenant_id: job.tenant_id,
            recipients: job.recipients,
            subject: job.subject,
            body_template: job.body_template,
            sender_name: job.sender_name,
            tenant_name: job.tenant_name,
            tenant_logo_url: job.tenant_logo_url,
            event_title: job.event_title,
            event_date: job.event_date,
            venue_name: job.venue_name,
            reply_to: job.reply_to,
            scheduled_at: job.scheduled_at,
            status: MailJobStatus::Pending,
            claimed_by: None,
            claim_expires_at: None,
            created_at,
            sent_at: None,
            result: None,
            errors: Vec::new(),
        }
    }

    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.status == MailJobStatus::Pending && self.scheduled_at.map_or(true, |at| at <= now)
    }
}

/// A validated job ready to be stored or dispatched.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewMailJob {
    pub tenant_id: String,
    pub recipients: Vec<Recipient>,
    pub subject: String,
    pub body_template: String,
    pub sender_name: String,
    pub tenant_name: String,
    pub tenant_logo_url: Option<String>,
    pub event_title: Option<String>,
    pub event_date: Option<String>,
    pub venue_name: Option<String>,
    pub reply_to: Option<String>,
    pub scheduled_at: Option<DateTime<Utc>>,
}

impl NewMailJob {
    pub fn validate(&self) -> MailResult<()> {
        if self.tenant_id.trim().is_empty() {
            return Err(MailError::validation("tenant_id is required"));
        }
        if self.subject.trim().is_empty() {
            return Err(MailError::validation("subject is required"));
        }
        if self.body_template.trim().is_empty() {
            return Err(MailError::validation("body is required"));
        }
        for (i, r) in self.recipients.iter().enumerate() {
            let email = r.email.trim();
            if email.is_empty() || !email.contains('@') {
                return Err(MailError::validation(format!(
                    "recipients[{i}].email is not a valid address"
                )));
            }
        }
        Ok(())
    }
}

/// Wire shape of a send request: a MailJob without id/status, every field optional
/// so missing ones turn into a `Validation` error instead of a decode failure.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendMailRequest {
    pub recipients: Option<Vec<Recipient>>,
    pub subject: Option<String>,
    #[serde(alias = "bodyTemplate")]
    pub body: Option<String>,
    pub sender_name: Option<String>,
    pub tenant_name: Option<String>,
    pub tenant_logo_url: Option<String>,
    pub event_title: Option<String>,
    pub event_date: Option<String>,
    pub venue_name: Option<String>,
    pub reply_to: Option<String>,
    pub scheduled_at: Option<String>,
}

impl SendMailRequest {
    pub fn into_new_job(self, tenant_id: &str) -> MailResult<NewMailJob> {
        let recipients = self
            .recipients
            .ok_or_else(|| MailError::validation("recipients is required"))?;
        let subject = self
            .subject
            .ok_or_else(|| MailError::validation("subject is required"))?;
        let body_template = self
            .body
            .ok_or_else(|| MailError::validation("body is required"))?;

        let scheduled_at = match self.scheduled_at.as_deref().map(str::trim) {
            None | Some("") => None,
            Some(raw) => Some(parse_timestamp(raw).ok_or_else(|| {
                MailError::validation(format!("scheduledAt is not a valid timestamp: {raw}"))
            })?),
        };

        let job = NewMailJob {
            tenant_id: tenant_id.to_string(),
            recipients,
            subject,
            body_template,
            sender_name: self.sender_name.unwrap_or_default(),
            tenant_name: self.tenant_name.unwrap_or_default(),
            tenant_logo_url: non_empty(self.tenant_logo_url),
            event_title: non_empty(self.event_title),
            event_date: non_empty(self.event_date),
            venue_name: non_empty(self.venue_name),
            reply_to: non_empty(self.reply_to),
            scheduled_at,
        };
        job.validate()?;
        Ok(job)
    }
}

fn non_empty(v: Option<String>) -> Option<String> {
    v.filter(|s| !s.trim().is_empty())
}

/// Accepts RFC 3339 or a naive `YYYY-MM-DDTHH:MM[:SS]` (read as UTC).
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    for fmt in ["%Y-%m-%dT%H:%M:%S", "%Y-%m-%dT%H:%M", "%Y-%m-%d %H:%M:%S", "%Y-%m-%d %H:%M"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(raw, fmt) {
            return Some(Utc.from_utc_datetime(&naive));
        }
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|naive| Utc.from_utc_datetime(&naive))
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub(crate) struct MailJobRow {
    pub id: Uuid,
    pub tenant_id: String,
    pub recipients: Json<Vec<Recipient>>,
    pub subject: String,
    pub body_template: String,
    pub sender_name: String,
    pub tenant_name: String,
    pub tenant_logo_url: Option<String>,
    pub event_title: Option<String>,
    pub event_date: Option<String>,
    pub venue_name: Option<String>,
    pub reply_to: Option<String>,
    pub scheduled_at: Option<DateTime<Utc>>,
    pub status: String,
    pub claimed_by: Option<String>,
    pub claim_expires_at: Option<DateTime<Utc>>,
    pub success_count: Option<i32>,
    pub failed_count: Option<i32>,
    pub errors: Json<Vec<RecipientError>>,
    pub created_at: DateTime<Utc>,
    pub sent_at: Option<DateTime<Utc>>,
}

impl TryFrom<MailJobRow> for MailJob {
    type Error = MailError;

    fn try_from(row: MailJobRow) -> MailResult<Self> {
        let status = MailJobStatus::parse(&row.status).ok_or_else(|| {
            MailError::Persistence(format!("job {} has unknown status {}", row.id, row.status))
        })?;
        let result = match (row.success_count, row.failed_count) {
            (Some(success), Some(failed)) => Some(DispatchResult { success, failed }),
            _ => None,
        };

        Ok(Self {
            id: row.id,
            tenant_id: row.tenant_id,
            recipients: row.recipients.0,
            subject: row.subject,
            body_template: row.body_template,
            sender_name: row.sender_name,
            tenant_name: row.tenant_name,
            tenant_logo_url: row.tenant_logo_url,
            event_title: row.event_title,
            event_date: row.event_date,
            venue_name: row.venue_name,
            reply_to: row.reply_to,
            scheduled_at: row.scheduled_at,
            status,
            claimed_by: row.claimed_by,
            claim_expires_at: row.claim_expires_at,
            created_at: row.created_at,
            sent_at: row.sent_at,
            result,
            errors: row.errors.0,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request() -> SendMailRequest {
        SendMailRequest {
            recipients: Some(vec![Recipient::new("A", "a@x.com")]),
            subject: Some("Hello".into()),
            body: Some("all participants\nsee you".into()),
            ..Default::default()
        }
    }

    #[test]
    fn missing_fields_are_validation_errors() {
        for strip in ["recipients", "subject", "body"] {
            let mut req = request();
            match strip {
                "recipients" => req.recipients = None,
                "subject" => req.subject = None,
                _ => req.body = None,
            }
            let err = req.into_new_job("t1").unwrap_err();
            assert!(matches!(err, MailError::Validation(ref m) if m.contains(strip)), "{err}");
        }
    }

    #[test]
    fn empty_recipient_list_is_tolerated() {
        let mut req = request();
        req.recipients = Some(vec![]);
        let job = req.into_new_job("t1").unwrap();
        assert!(job.recipients.is_empty());
    }

    #[test]
    fn malformed_recipient_email_is_rejected() {
        let mut req = request();
        req.recipients = Some(vec![Recipient::new("A", "not-an-address")]);
        assert!(matches!(
            req.into_new_job("t1"),
            Err(MailError::Validation(_))
        ));
    }

    #[test]
    fn body_template_alias_is_accepted() {
        let req: SendMailRequest = serde_json::from_value(serde_json::json!({
            "recipients": [{"name": "A", "email": "a@x.com", "id": "r-1"}],
            "subject": "s",
            "bodyTemplate": "hi {qr}",
            "scheduledAt": "2030-01-02T03:04:05Z"
        }))
        .unwrap();
        let job = req.into_new_job("t1").unwrap();
        assert_eq!(job.body_template, "hi {qr}");
        assert_eq!(job.recipients[0].id.as_deref(), Some("r-1"));
        assert_eq!(
            job.scheduled_at.unwrap().to_rfc3339(),
            "2030-01-02T03:04:05+00:00"
        );
    }

    #[test]
    fn bad_scheduled_at_is_a_validation_error() {
        let mut req = request();
        req.scheduled_at = Some("next tuesday".into());
        assert!(matches!(
            req.into_new_job("t1"),
            Err(MailError::Validation(_))
        ));
    }

    #[test]
    fn blank_scheduled_at_means_send_now() {
        let mut req = request();
        req.scheduled_at = Some("  ".into());
        assert_eq!(req.into_new_job("t1").unwrap().scheduled_at, None);
    }

    #[test]
    fn status_round_trips_through_text() {
        for s in [
            MailJobStatus::Pending,
            MailJobStatus::Processing,
            MailJobStatus::Sent,
        ] {
            assert_eq!(MailJobStatus::parse(s.as_str()), Some(s));
        }
        assert_eq!(MailJobStatus::parse("failed"), None);
    }
}
