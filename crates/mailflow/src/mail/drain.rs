use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::error::MailResult;
use crate::mail::dispatcher::Dispatcher;
use crate::mail::render::RenderVariant;
use crate::mail::store::QueueStore;

#[derive(Debug, Clone)]
pub struct DrainOptions {
    pub worker_id: String,
    /// Per-job claim lifetime, counted from the moment that job is claimed.
    pub lease_seconds: i64,
}

impl Default for DrainOptions {
    fn default() -> Self {
        Self {
            worker_id: "mailflow".to_string(),
            lease_seconds: 300,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessedJob {
    pub job_id: Uuid,
    pub success: i32,
    pub failed: i32,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DrainSummary {
    pub processed: Vec<ProcessedJob>,
    /// Claims reset by the visibility timeout at the start of this pass.
    #[serde(skip)]
    pub released: u64,
}

impl DrainSummary {
    pub fn is_empty(&self) -> bool {
        self.processed.is_empty()
    }
}

/// One pass over every job due at `now`: release stale claims, then claim, dispatch
/// and mark one job at a time until nothing due is left.
#[derive(Clone)]
pub struct Drainer {
    store: Arc<dyn QueueStore>,
    dispatcher: Dispatcher,
    opts: DrainOptions,
}

impl Drainer {
    pub fn new(store: Arc<dyn QueueStore>, dispatcher: Dispatcher, opts: DrainOptions) -> Self {
        Self {
            store,
            dispatcher,
            opts,
        }
    }

    pub fn worker_id(&self) -> &str {
        &self.opts.worker_id
    }

    pub async fn drain(&self, now: DateTime<Utc>) -> MailResult<DrainSummary> {
        let started = Instant::now();
        let released = self.store.release_expired_claims(now).await?;
        if released > 0 {
            warn!(worker_id = %self.opts.worker_id, released, "released expired claims");
        }

        let mut summary = DrainSummary {
            processed: Vec::new(),
            released,
        };

        // Each lease starts when its own job is claimed, not when the pass starts.
        loop {
            let claimed_at = now + elapsed_since(started);
            let Some(job) = self
                .store
                .claim_next(
                    now,
                    claimed_at,
                    &self.opts.worker_id,
                    self.opts.lease_seconds,
                )
                .await?
            else {
                break;
            };

            let report = self.dispatcher.dispatch(&job, RenderVariant::Standard).await;

            let marked = self
                .store
                .mark_sent(job.id, &self.opts.worker_id, report.result, &report.errors)
                .await
                .map_err(|e| {
                    error!(job_id = %job.id, error = %e, "mark_sent failed");
                    e
                })?;

            if !marked {
                warn!(
                    job_id = %job.id,
                    worker_id = %self.opts.worker_id,
                    "claim lost before mark_sent; job was finished elsewhere"
                );
                continue;
            }

            summary.processed.push(ProcessedJob {
                job_id: job.id,
                success: report.result.success,
                failed: report.result.failed,
            });
        }

        if !summary.is_empty() {
            info!(
                worker_id = %self.opts.worker_id,
                jobs = summary.processed.len(),
                elapsed_ms = started.elapsed().as_millis() as u64,
                "drain finished"
            );
        }
        Ok(summary)
    }
}

fn elapsed_since(started: Instant) -> Duration {
    Duration::from_std(started.elapsed()).unwrap_or_else(|_| Duration::zero())
}
