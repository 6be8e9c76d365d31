// tests/broadcast.rs
mod common;

use axum::{
    body::Body,
    http::{header, Request, StatusCode},
};
use common::{reservation, Harness, RecordingMailer};
use http_body_util::BodyExt;
use mailflow::mail::{BroadcastLogStore, BroadcastRequest, BroadcastTarget};
use mailflow::tenant::{TenantContext, TenantRole};
use mailflow::MailError;
use serde_json::{json, Value};
use tower::ServiceExt;

fn seeded(mailer: RecordingMailer) -> Harness {
    let h = Harness::new(mailer);
    for r in [
        reservation("r1", "ev1", "in@x.com", "confirmed", true),
        reservation("r2", "ev1", "out@x.com", "confirmed", false),
        reservation("r3", "ev1", "gone@x.com", "cancelled", false),
        reservation("r4", "ev2", "elsewhere@x.com", "confirmed", false),
    ] {
        h.reservations.insert(r).unwrap();
    }
    h
}

fn request(target: Option<&str>) -> BroadcastRequest {
    BroadcastRequest {
        subject: Some("Doors open".into()),
        message: Some("all participants\nDoors open at 18:00.\n{qr}".into()),
        target: target.map(str::to_string),
        tenant_name: Some("Acme".into()),
        ..Default::default()
    }
}

fn staff() -> TenantContext {
    TenantContext::new("tenant-a", TenantRole::Staff)
}

#[tokio::test]
async fn broadcast_skips_cancelled_and_writes_a_log() {
    let h = seeded(RecordingMailer::new().failing(&["out@x.com"]));

    let outcome = h.service.broadcast(&staff(), "ev1", request(None)).await.unwrap();

    assert_eq!(outcome.target, BroadcastTarget::All);
    assert_eq!(outcome.total, 2);
    assert_eq!(outcome.report.result.success, 1);
    assert_eq!(outcome.report.result.failed, 1);

    let mut attempted = h.mailer.attempts();
    attempted.sort();
    assert_eq!(attempted, vec!["in@x.com", "out@x.com"]);

    let logs = h.broadcast_logs.for_event("tenant-a", "ev1").await.unwrap();
    assert_eq!(logs.len(), 1);
    let log = &logs[0];
    assert_eq!(log.id, outcome.log_id);
    assert_eq!(log.subject, "Doors open");
    assert_eq!((log.total_count, log.success_count, log.failed_count), (2, 1, 1));
    assert_eq!(log.errors[0].email, "out@x.com");
}

#[tokio::test]
async fn target_filters_by_check_in() {
    let h = seeded(RecordingMailer::new());

    let outcome = h
        .service
        .broadcast(&staff(), "ev1", request(Some("not_checked_in")))
        .await
        .unwrap();

    assert_eq!(outcome.total, 1);
    assert_eq!(h.mailer.attempts(), vec!["out@x.com"]);
}

#[tokio::test]
async fn broadcast_body_uses_line_breaks_and_checkin_qr() {
    let h = seeded(RecordingMailer::new());

    h.service
        .broadcast(&staff(), "ev1", request(Some("checked_in")))
        .await
        .unwrap();

    let sent = h.mailer.sent();
    assert_eq!(sent.len(), 1);
    let html = &sent[0].html;
    assert!(html.contains("Guest r1 様<br>Doors open at 18:00.<br>"));
    assert!(html.contains("data=r1"));
    assert!(!html.contains("white-space:pre-wrap"));
}

#[tokio::test]
async fn bad_target_and_missing_message_are_rejected() {
    let h = seeded(RecordingMailer::new());

    let err = h
        .service
        .broadcast(&staff(), "ev1", request(Some("vip")))
        .await
        .unwrap_err();
    assert!(matches!(err, MailError::Validation(_)));

    let mut req = request(None);
    req.message = None;
    let err = h.service.broadcast(&staff(), "ev1", req).await.unwrap_err();
    assert!(matches!(err, MailError::Validation(ref m) if m.contains("message")));

    assert!(h.mailer.attempts().is_empty());
    assert!(h
        .broadcast_logs
        .for_event("tenant-a", "ev1")
        .await
        .unwrap()
        .is_empty());
}

#[tokio::test]
async fn broadcast_over_http() {
    let h = seeded(RecordingMailer::new());
    let app = mailflow::api::router(h.api_state(None));

    let req = Request::builder()
        .method("POST")
        .uri("/events/ev1/broadcast")
        .header(header::CONTENT_TYPE, "application/json")
        .header("x-tenant-id", "tenant-a")
        .body(Body::from(
            json!({ "subject": "Hi", "message": "hello", "target": "all" }).to_string(),
        ))
        .unwrap();

    let res = app.oneshot(req).await.unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let bytes = res.into_body().collect().await.unwrap().to_bytes();
    let body: Value = serde_json::from_slice(&bytes).unwrap();

    assert_eq!(body["success"], json!(true));
    let result = &body["result"];
    assert_eq!(result["target"], json!("all"));
    assert_eq!(result["total"], json!(2));
    assert_eq!(result["success"], json!(2));
    assert_eq!(result["failed"], json!(0));
    assert!(result["logId"].is_string());
}
