use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tracing::info;

use crate::error::MailResult;
use crate::mail::store::QueueStore;

/// Deletes `sent` jobs once they are older than the retention window.
#[derive(Clone)]
pub struct Retention {
    store: Arc<dyn QueueStore>,
    retain_days: i64,
}

impl Retention {
    pub fn new(store: Arc<dyn QueueStore>, retain_days: i64) -> Self {
        Self {
            store,
            retain_days: retain_days.max(0),
        }
    }

    pub async fn purge_once(&self, now: DateTime<Utc>) -> MailResult<u64> {
        let cutoff = cutoff_days(now, self.retain_days);
        let purged = self.store.purge_sent_before(cutoff).await?;
        if purged > 0 {
            info!(purged, %cutoff, "purged sent mail jobs");
        }
        Ok(purged)
    }
}

/// `now - days`
pub fn cutoff_days(now: DateTime<Utc>, days: i64) -> DateTime<Utc> {
    now - Duration::days(days)
}
