use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::mail::model::{DispatchResult, MailJob, Recipient, RecipientError};
use crate::mail::render::{RenderContext, RenderVariant, TemplateRenderer};
use crate::mail::sender::{format_mailbox, MailSender, OutgoingMail};

#[derive(Debug, Clone)]
pub struct DispatchOptions {
    /// Max sends in flight for one job.
    pub concurrency: usize,
    pub send_timeout: Duration,
    /// Bare envelope address; the job's sender name becomes the display name.
    pub from_address: String,
    /// Used when the job carries no reply-to.
    pub default_reply_to: Option<String>,
}

impl Default for DispatchOptions {
    fn default() -> Self {
        Self {
            concurrency: 8,
            send_timeout: Duration::from_secs(15),
            from_address: "noreply@localhost".to_string(),
            default_reply_to: None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DispatchReport {
    #[serde(flatten)]
    pub result: DispatchResult,
    pub errors: Vec<RecipientError>,
}

enum SendOutcome {
    Delivered { index: usize },
    Failed { index: usize, error: RecipientError },
}

/// Renders and sends one message per recipient. Failures are tallied, never raised.
#[derive(Clone)]
pub struct Dispatcher {
    sender: Arc<dyn MailSender>,
    renderer: Arc<TemplateRenderer>,
    opts: DispatchOptions,
}

impl Dispatcher {
    pub fn new(
        sender: Arc<dyn MailSender>,
        renderer: Arc<TemplateRenderer>,
        opts: DispatchOptions,
    ) -> Self {
        Self {
            sender,
            renderer,
            opts,
        }
    }

    pub async fn dispatch(&self, job: &MailJob, variant: RenderVariant) -> DispatchReport {
        let started = Instant::now();
        let mut report = DispatchReport::default();
        if job.recipients.is_empty() {
            debug!(job_id = %job.id, "job has no recipients");
            return report;
        }

        let semaphore = Arc::new(Semaphore::new(self.opts.concurrency.max(1)));
        let from = format_mailbox(&job.sender_name, &self.opts.from_address);
        let reply_to = job
            .reply_to
            .clone()
            .or_else(|| self.opts.default_reply_to.clone());

        let mut join_set = JoinSet::new();
        for (index, recipient) in job.recipients.iter().enumerate() {
            let prepared = self.prepare(job, recipient, variant, &from, reply_to.as_deref());
            let sender = self.sender.clone();
            let semaphore = semaphore.clone();
            let send_timeout = self.opts.send_timeout;
            let job_id = job.id;
            let email = recipient.email.clone();

            join_set.spawn(async move {
                let mail = match prepared {
                    Ok(mail) => mail,
                    Err(error) => return failed(job_id, index, email, error),
                };

                // Closed semaphore is impossible here; treat it as a failed send anyway.
                let Ok(_permit) = semaphore.acquire_owned().await else {
                    return failed(job_id, index, email, "dispatcher shut down".into());
                };

                match tokio::time::timeout(send_timeout, sender.send(&mail)).await {
                    Ok(Ok(())) => SendOutcome::Delivered { index },
                    Ok(Err(e)) => failed(job_id, index, email, e.to_string()),
                    Err(_) => failed(
                        job_id,
                        index,
                        email,
                        format!("send timed out after {}ms", send_timeout.as_millis()),
                    ),
                }
            });
        }

        let mut reported = vec![false; job.recipients.len()];
        let mut failures: Vec<(usize, RecipientError)> = Vec::new();
        let mut aborted: Vec<String> = Vec::new();
        while let Some(joined) = join_set.join_next().await {
            match joined {
                Ok(SendOutcome::Delivered { index }) => {
                    reported[index] = true;
                    report.result.success += 1;
                }
                Ok(SendOutcome::Failed { index, error }) => {
                    reported[index] = true;
                    report.result.failed += 1;
                    failures.push((index, error));
                }
                Err(e) => {
                    warn!(job_id = %job.id, error = %e, "send task aborted");
                    aborted.push(format!("send task aborted: {e}"));
                }
            }
        }

        // A task that panicked never reported its index; charge it to the recipients
        // left without an outcome.
        let silent = reported
            .iter()
            .enumerate()
            .filter(|(_, done)| !**done)
            .map(|(index, _)| index);
        for (index, error) in silent.zip(aborted) {
            report.result.failed += 1;
            failures.push((
                index,
                RecipientError {
                    email: job.recipients[index].email.clone(),
                    error,
                },
            ));
        }

        failures.sort_by_key(|(index, _)| *index);
        report.errors = failures.into_iter().map(|(_, e)| e).collect();

        info!(
            job_id = %job.id,
            sender = self.sender.name(),
            success = report.result.success,
            failed = report.result.failed,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "dispatch finished"
        );
        report
    }

    fn prepare(
        &self,
        job: &MailJob,
        recipient: &Recipient,
        variant: RenderVariant,
        from: &str,
        reply_to: Option<&str>,
    ) -> Result<OutgoingMail, String> {
        let ctx = RenderContext::from_job(job);
        let html = self
            .renderer
            .render(&job.body_template, recipient, &ctx, variant)
            .map_err(|e| e.to_string())?;

        Ok(OutgoingMail {
            from: from.to_string(),
            to: recipient.email.clone(),
            subject: job.subject.clone(),
            html,
            reply_to: reply_to.map(str::to_string),
        })
    }
}

fn failed(job_id: Uuid, index: usize, email: String, error: String) -> SendOutcome {
    warn!(%job_id, recipient = %email, %error, "send failed");
    SendOutcome::Failed {
        index,
        error: RecipientError { email, error },
    }
}
