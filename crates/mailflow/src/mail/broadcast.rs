use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{MailError, MailResult};
use crate::mail::model::{Recipient, RecipientError};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Reservation {
    pub id: String,
    pub tenant_id: String,
    pub event_id: String,
    pub name: String,
    pub email: String,
    pub status: String,
    pub checked_in: bool,
}

impl Reservation {
    pub fn is_cancelled(&self) -> bool {
        self.status.eq_ignore_ascii_case("cancelled")
    }

    /// Reservation id doubles as the recipient id so `{qr}` yields a check-in code.
    pub fn to_recipient(&self) -> Recipient {
        Recipient::new(&self.name, &self.email).with_id(&self.id)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BroadcastTarget {
    #[default]
    All,
    CheckedIn,
    NotCheckedIn,
}

impl BroadcastTarget {
    pub fn as_str(&self) -> &'static str {
        match self {
            BroadcastTarget::All => "all",
            BroadcastTarget::CheckedIn => "checked_in",
            BroadcastTarget::NotCheckedIn => "not_checked_in",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().replace('-', "_").as_str() {
            "" | "all" => Some(Self::All),
            "checked_in" | "checkedin" => Some(Self::CheckedIn),
            "not_checked_in" | "notcheckedin" => Some(Self::NotCheckedIn),
            _ => None,
        }
    }

    pub fn matches(&self, r: &Reservation) -> bool {
        if r.is_cancelled() {
            return false;
        }
        match self {
            BroadcastTarget::All => true,
            BroadcastTarget::CheckedIn => r.checked_in,
            BroadcastTarget::NotCheckedIn => !r.checked_in,
        }
    }
}

/// Inbound broadcast body. `target` stays a string so a bad value is a 400, not a decode error.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BroadcastRequest {
    pub subject: Option<String>,
    pub message: Option<String>,
    pub target: Option<String>,
    pub sender_name: Option<String>,
    pub tenant_name: Option<String>,
    pub tenant_logo_url: Option<String>,
    pub event_title: Option<String>,
    pub event_date: Option<String>,
    pub venue_name: Option<String>,
    pub reply_to: Option<String>,
}

impl BroadcastRequest {
    pub fn target(&self) -> MailResult<BroadcastTarget> {
        match self.target.as_deref() {
            None => Ok(BroadcastTarget::All),
            Some(raw) => BroadcastTarget::parse(raw)
                .ok_or_else(|| MailError::validation(format!("unknown broadcast target: {raw}"))),
        }
    }
}

/// One row per broadcast, written after dispatch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BroadcastLog {
    pub id: Uuid,
    pub tenant_id: String,
    pub event_id: String,
    pub subject: String,
    pub message: String,
    pub target: BroadcastTarget,
    pub total_count: i32,
    pub success_count: i32,
    pub failed_count: i32,
    pub errors: Vec<RecipientError>,
    pub created_at: DateTime<Utc>,
}

#[async_trait]
pub trait ReservationSource: Send + Sync {
    /// All reservations of one event, cancelled ones included.
    async fn reservations_for_event(
        &self,
        tenant_id: &str,
        event_id: &str,
    ) -> MailResult<Vec<Reservation>>;
}

#[async_trait]
pub trait BroadcastLogStore: Send + Sync {
    async fn record(&self, log: &BroadcastLog) -> MailResult<()>;

    /// Newest first.
    async fn for_event(&self, tenant_id: &str, event_id: &str) -> MailResult<Vec<BroadcastLog>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reservation(status: &str, checked_in: bool) -> Reservation {
        Reservation {
            id: "r1".into(),
            tenant_id: "t1".into(),
            event_id: "e1".into(),
            name: "A".into(),
            email: "a@x.com".into(),
            status: status.into(),
            checked_in,
        }
    }

    #[test]
    fn target_filters_exclude_cancelled() {
        let cancelled = reservation("cancelled", true);
        for t in [
            BroadcastTarget::All,
            BroadcastTarget::CheckedIn,
            BroadcastTarget::NotCheckedIn,
        ] {
            assert!(!t.matches(&cancelled));
        }

        let inside = reservation("confirmed", true);
        assert!(BroadcastTarget::CheckedIn.matches(&inside));
        assert!(!BroadcastTarget::NotCheckedIn.matches(&inside));
        assert!(BroadcastTarget::All.matches(&inside));
    }

    #[test]
    fn target_parsing() {
        assert_eq!(BroadcastTarget::parse("checked-in"), Some(BroadcastTarget::CheckedIn));
        assert_eq!(BroadcastTarget::parse(" ALL "), Some(BroadcastTarget::All));
        assert_eq!(BroadcastTarget::parse("vip"), None);

        let req = BroadcastRequest {
            target: Some("vip".into()),
            ..Default::default()
        };
        assert!(matches!(req.target(), Err(MailError::Validation(_))));
    }

    #[test]
    fn reservation_id_becomes_recipient_id() {
        let r = reservation("confirmed", false).to_recipient();
        assert_eq!(r.id.as_deref(), Some("r1"));
        assert_eq!(r.email, "a@x.com");
    }
}
