use axum::{
    extract::{
        rejection::{JsonRejection, PathRejection, QueryRejection},
        Path, Query, State,
    },
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use serde_json::json;
use tracing::{error, warn};
use uuid::Uuid;

use crate::api::models::{
    BroadcastResponse, CronResponse, ErrorBody, JobListItem, ListJobsQuery, ListJobsResponse, SendResponse,
    DEFERRED_MESSAGE,
};
use crate::error::MailError;
use crate::mail::broadcast::BroadcastRequest;
use crate::mail::drain::Drainer;
use crate::mail::model::{MailJobStatus, SendMailRequest};
use crate::mail::service::{MailService, SubmitOutcome};
use crate::tenant::TenantContext;

pub mod models;

#[derive(Clone)]
pub struct ApiState {
    pub service: MailService,
    pub drainer: Drainer,
    /// When set, `/cron/mail-queue` requires `Authorization: Bearer <secret>`.
    pub cron_secret: Option<String>,
}

pub fn router(state: ApiState) -> Router {
    Router::new()
        // Scheduler trigger
        .route("/cron/mail-queue", get(cron_mail_queue))
        // Send
        .route("/mail/send", post(send_mail))
        .route("/events/:event_id/broadcast", post(broadcast))
        // Inspect
        .route("/mail/jobs", get(list_jobs))
        .route("/mail/jobs/:id", get(get_job))
        // Metrics
        .route("/metrics/prom", get(metrics_prom))
        // Health
        .route("/health", get(health))
        .with_state(state)
}

impl IntoResponse for MailError {
    fn into_response(self) -> Response {
        let status = match &self {
            MailError::Validation(_) => StatusCode::BAD_REQUEST,
            MailError::Forbidden(_) => StatusCode::FORBIDDEN,
            MailError::Send(_)
            | MailError::Template(_)
            | MailError::Persistence(_)
            | MailError::Config(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status.is_server_error() {
            error!(code = self.code(), error = %self, "request failed");
        }

        (
            status,
            Json(ErrorBody {
                success: false,
                error: self.to_string(),
                code: self.code(),
            }),
        )
            .into_response()
    }
}

impl From<JsonRejection> for MailError {
    fn from(rejection: JsonRejection) -> Self {
        Self::validation(format!("invalid JSON body: {}", rejection.body_text()))
    }
}

impl From<PathRejection> for MailError {
    fn from(rejection: PathRejection) -> Self {
        Self::validation(format!("invalid path: {}", rejection.body_text()))
    }
}

impl From<QueryRejection> for MailError {
    fn from(rejection: QueryRejection) -> Self {
        Self::validation(format!("invalid query: {}", rejection.body_text()))
    }
}

fn not_found(what: &str) -> Response {
    (
        StatusCode::NOT_FOUND,
        Json(ErrorBody {
            success: false,
            error: format!("{what} not found"),
            code: "NOT_FOUND",
        }),
    )
        .into_response()
}

fn cron_authorized(secret: Option<&str>, headers: &HeaderMap) -> bool {
    let Some(secret) = secret else {
        return true;
    };
    headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .is_some_and(|token| token.trim() == secret)
}

pub async fn cron_mail_queue(State(state): State<ApiState>, headers: HeaderMap) -> Response {
    if !cron_authorized(state.cron_secret.as_deref(), &headers) {
        warn!("cron trigger rejected: bad or missing bearer token");
        return (
            StatusCode::UNAUTHORIZED,
            Json(json!({ "success": false, "error": "unauthorized" })),
        )
            .into_response();
    }

    match state.drainer.drain(Utc::now()).await {
        Ok(summary) => Json(CronResponse::from_processed(summary.processed)).into_response(),
        Err(e) => e.into_response(),
    }
}

pub async fn send_mail(
    State(state): State<ApiState>,
    tenant: TenantContext,
    body: Result<Json<SendMailRequest>, JsonRejection>,
) -> Result<Json<SendResponse>, MailError> {
    let Json(body) = body?;
    let outcome = state.service.submit(&tenant, body).await?;

    Ok(Json(match outcome {
        SubmitOutcome::Sent(result) => SendResponse::Sent {
            success: true,
            result,
        },
        SubmitOutcome::Deferred { job_id } => SendResponse::Deferred {
            success: true,
            message: DEFERRED_MESSAGE,
            job_id,
        },
    }))
}

pub async fn broadcast(
    State(state): State<ApiState>,
    event_id: Result<Path<String>, PathRejection>,
    tenant: TenantContext,
    body: Result<Json<BroadcastRequest>, JsonRejection>,
) -> Result<Json<BroadcastResponse>, MailError> {
    let (Path(event_id), Json(body)) = (event_id?, body?);
    let result = state.service.broadcast(&tenant, &event_id, body).await?;

    Ok(Json(BroadcastResponse {
        success: true,
        result,
    }))
}

pub async fn list_jobs(
    State(state): State<ApiState>,
    tenant: TenantContext,
    query: Result<Query<ListJobsQuery>, QueryRejection>,
) -> Result<Json<ListJobsResponse>, MailError> {
    let Query(q) = query?;
    let status = match q.status.as_deref() {
        None | Some("") => None,
        Some(raw) => Some(
            MailJobStatus::parse(raw)
                .ok_or_else(|| MailError::validation(format!("unknown status: {raw}")))?,
        ),
    };

    let jobs = state
        .service
        .store()
        .list(&tenant.tenant_id, status, q.limit.unwrap_or(100))
        .await?;

    Ok(Json(ListJobsResponse {
        success: true,
        items: jobs.into_iter().map(JobListItem::from).collect(),
    }))
}

pub async fn get_job(
    State(state): State<ApiState>,
    id: Result<Path<Uuid>, PathRejection>,
    tenant: TenantContext,
) -> Response {
    let id = match id {
        Ok(Path(id)) => id,
        Err(rejection) => return MailError::from(rejection).into_response(),
    };
    match state.service.store().get(id).await {
        // Other tenants' jobs are indistinguishable from missing ones.
        Ok(Some(job)) if job.tenant_id == tenant.tenant_id => {
            Json(json!({ "success": true, "job": job })).into_response()
        }
        Ok(_) => not_found("job"),
        Err(e) => e.into_response(),
    }
}

pub async fn metrics_prom(State(state): State<ApiState>) -> Response {
    // Minimal Prometheus text format (no extra crate needed).
    match state.service.store().counts().await {
        Ok(c) => {
            let body = format!(
                concat!(
                    "# HELP mailflow_pending_jobs Jobs waiting for their send time\n",
                    "# TYPE mailflow_pending_jobs gauge\n",
                    "mailflow_pending_jobs {}\n",
                    "# HELP mailflow_due_jobs Pending jobs whose send time has passed\n",
                    "# TYPE mailflow_due_jobs gauge\n",
                    "mailflow_due_jobs {}\n",
                    "# HELP mailflow_processing_jobs Jobs claimed by a drain\n",
                    "# TYPE mailflow_processing_jobs gauge\n",
                    "mailflow_processing_jobs {}\n",
                    "# HELP mailflow_sent_jobs Jobs marked sent and not yet purged\n",
                    "# TYPE mailflow_sent_jobs gauge\n",
                    "mailflow_sent_jobs {}\n"
                ),
                c.pending, c.due, c.processing, c.sent
            );

            (StatusCode::OK, body).into_response()
        }
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("metrics error: {e}"),
        )
            .into_response(),
    }
}

pub async fn health() -> impl IntoResponse {
    (StatusCode::OK, "ok")
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn cron_auth() {
        let mut headers = HeaderMap::new();
        assert!(cron_authorized(None, &headers));
        assert!(!cron_authorized(Some("s3cret"), &headers));

        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Bearer nope"));
        assert!(!cron_authorized(Some("s3cret"), &headers));

        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Bearer s3cret"));
        assert!(cron_authorized(Some("s3cret"), &headers));
    }

    #[test]
    fn idle_cron_shape() {
        let v = serde_json::to_value(CronResponse::from_processed(vec![])).unwrap();
        assert_eq!(v, json!({ "success": true, "count": 0 }));
    }
}
