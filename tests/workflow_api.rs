//! End-to-end workflow walks through the HTTP router.
//!
//! Every scenario runs against an in-memory database with a handful of
//! seeded approval grants: person 7 is the reporter (no grant, level 1),
//! 20 and 21 hold level 2, 30 holds level 3.

use axum::Router;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use http_body_util::BodyExt;
use tower::ServiceExt;

use millwright::workflow::db::WorkflowDb;
use millwright::workflow::server::{build_router, build_state};

const REPORTER: i64 = 7;
const L2_TECH: i64 = 20;
const L2_OTHER: i64 = 21;
const L3_LEAD: i64 = 30;

fn test_app() -> Router {
    let state = build_state(WorkflowDb::new_in_memory().unwrap());
    {
        let db = state.db.lock_sync().unwrap();
        db.create_grant(L2_TECH, 2, None, None, None, None).unwrap();
        db.create_grant(L2_OTHER, 2, None, None, None, None).unwrap();
        db.create_grant(L3_LEAD, 3, Some("P1"), None, None, None)
            .unwrap();
    }
    build_router(state)
}

async fn send(
    app: &Router,
    method: &str,
    uri: &str,
    body: Option<serde_json::Value>,
) -> (StatusCode, serde_json::Value) {
    let builder = Request::builder().method(method).uri(uri);
    let request = match body {
        Some(json) => builder
            .header("content-type", "application/json")
            .body(Body::from(json.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };
    let resp = app.clone().oneshot(request).await.unwrap();
    let status = resp.status();
    let bytes = resp.into_body().collect().await.unwrap().to_bytes();
    let value = if bytes.is_empty() {
        serde_json::Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or(serde_json::Value::Null)
    };
    (status, value)
}

async fn create_ticket(app: &Router) -> i64 {
    let (status, ticket) = send(
        app,
        "POST",
        "/api/tickets",
        Some(serde_json::json!({
            "title": "Compressor pressure drop",
            "description": "Line 2 header pressure sagging under load",
            "reported_by": REPORTER,
            "severity_level": 4,
            "priority": "high",
            "puno": 310
        })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(ticket["status"], "open");
    ticket["id"].as_i64().unwrap()
}

#[tokio::test]
async fn test_happy_path_open_to_closed() {
    let app = test_app();
    let id = create_ticket(&app).await;

    let (status, ticket) = send(
        &app,
        "POST",
        &format!("/api/tickets/{}/accept", id),
        Some(serde_json::json!({"actor": L2_TECH})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(ticket["status"], "in_progress");
    assert_eq!(ticket["assigned_to"], L2_TECH);

    let (status, ticket) = send(
        &app,
        "POST",
        &format!("/api/tickets/{}/complete", id),
        Some(serde_json::json!({
            "actor": L2_TECH,
            "actual_downtime_hours": 3.5,
            "notes": "Replaced intake filter"
        })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(ticket["status"], "completed");
    assert_eq!(ticket["actual_downtime_hours"], 3.5);
    assert!(!ticket["resolved_at"].is_null());

    let (status, ticket) = send(
        &app,
        "POST",
        &format!("/api/tickets/{}/close", id),
        Some(serde_json::json!({
            "actor": REPORTER,
            "reason": "Verified on shift",
            "satisfaction_rating": 5
        })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(ticket["status"], "closed");
    assert!(!ticket["closed_at"].is_null());
    assert_eq!(ticket["satisfaction_rating"], 5);

    // History: the creation event plus three transitions, in walk order.
    let (status, history) = send(&app, "GET", &format!("/api/tickets/{}/history", id), None).await;
    assert_eq!(status, StatusCode::OK);
    let entries = history.as_array().unwrap();
    assert_eq!(entries.len(), 4);
    assert!(entries[0]["old_status"].is_null());
    assert_eq!(entries[0]["new_status"], "open");
    let transitions: Vec<(String, String)> = entries[1..]
        .iter()
        .map(|e| {
            (
                e["old_status"].as_str().unwrap().to_string(),
                e["new_status"].as_str().unwrap().to_string(),
            )
        })
        .collect();
    assert_eq!(
        transitions,
        vec![
            ("open".to_string(), "in_progress".to_string()),
            ("in_progress".to_string(), "completed".to_string()),
            ("completed".to_string(), "closed".to_string()),
        ]
    );

    // Closed is terminal.
    let (status, _) = send(
        &app,
        "POST",
        &format!("/api/tickets/{}/reopen", id),
        Some(serde_json::json!({"actor": REPORTER})),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
}

#[tokio::test]
async fn test_l2_reject_escalates_then_l3_accepts() {
    let app = test_app();
    let id = create_ticket(&app).await;

    let (status, ticket) = send(
        &app,
        "POST",
        &format!("/api/tickets/{}/reject", id),
        Some(serde_json::json!({
            "actor": L2_TECH,
            "reason": "Operator error, not equipment",
            "escalate_to_l3": true
        })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(ticket["status"], "rejected_pending_l3_review");
    assert_eq!(ticket["rejection_reason"], "Operator error, not equipment");

    // L2 cannot accept out of L3 review.
    let (status, _) = send(
        &app,
        "POST",
        &format!("/api/tickets/{}/accept", id),
        Some(serde_json::json!({"actor": L2_OTHER})),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, ticket) = send(
        &app,
        "POST",
        &format!("/api/tickets/{}/accept", id),
        Some(serde_json::json!({"actor": L3_LEAD})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(ticket["status"], "in_progress");
    assert_eq!(ticket["assigned_to"], L3_LEAD);
}

#[tokio::test]
async fn test_l3_final_reject_is_terminal() {
    let app = test_app();
    let id = create_ticket(&app).await;

    let (status, ticket) = send(
        &app,
        "POST",
        &format!("/api/tickets/{}/reject", id),
        Some(serde_json::json!({
            "actor": L3_LEAD,
            "reason": "Duplicate report"
        })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(ticket["status"], "rejected_final");

    for (method, path, body) in [
        (
            "POST",
            format!("/api/tickets/{}/accept", id),
            serde_json::json!({"actor": L3_LEAD}),
        ),
        (
            "POST",
            format!("/api/tickets/{}/reject", id),
            serde_json::json!({"actor": L3_LEAD, "reason": "again"}),
        ),
        (
            "POST",
            format!("/api/tickets/{}/reassign", id),
            serde_json::json!({"actor": L3_LEAD, "new_assignee": L2_TECH}),
        ),
    ] {
        let (status, _) = send(&app, method, &path, Some(body)).await;
        assert_eq!(status, StatusCode::CONFLICT, "{} must be terminal", path);
    }
}

#[tokio::test]
async fn test_escalate_then_reassign_resets_to_open() {
    let app = test_app();
    let id = create_ticket(&app).await;

    send(
        &app,
        "POST",
        &format!("/api/tickets/{}/accept", id),
        Some(serde_json::json!({"actor": L2_TECH})),
    )
    .await;

    let (status, ticket) = send(
        &app,
        "POST",
        &format!("/api/tickets/{}/escalate", id),
        Some(serde_json::json!({
            "actor": L2_TECH,
            "target": L3_LEAD,
            "reason": "Requires OEM service contract"
        })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(ticket["status"], "escalated");
    assert_eq!(ticket["escalated_to"], L3_LEAD);

    let (status, ticket) = send(
        &app,
        "POST",
        &format!("/api/tickets/{}/reassign", id),
        Some(serde_json::json!({
            "actor": L3_LEAD,
            "new_assignee": L2_OTHER,
            "reason": "Day shift owns line 2"
        })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(ticket["status"], "open");
    assert_eq!(ticket["assigned_to"], L2_OTHER);
    assert!(ticket["escalated_to"].is_null());
}

#[tokio::test]
async fn test_party_and_level_checks_map_to_403() {
    let app = test_app();
    let id = create_ticket(&app).await;

    // Reporter (level 1) cannot accept.
    let (status, _) = send(
        &app,
        "POST",
        &format!("/api/tickets/{}/accept", id),
        Some(serde_json::json!({"actor": REPORTER})),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    send(
        &app,
        "POST",
        &format!("/api/tickets/{}/accept", id),
        Some(serde_json::json!({"actor": L2_TECH})),
    )
    .await;

    // Only the assignee completes or escalates.
    let (status, _) = send(
        &app,
        "POST",
        &format!("/api/tickets/{}/complete", id),
        Some(serde_json::json!({"actor": L2_OTHER, "actual_downtime_hours": 1.0})),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    send(
        &app,
        "POST",
        &format!("/api/tickets/{}/complete", id),
        Some(serde_json::json!({"actor": L2_TECH, "actual_downtime_hours": 1.0})),
    )
    .await;

    // Only the reporter closes or reopens.
    let (status, _) = send(
        &app,
        "POST",
        &format!("/api/tickets/{}/close", id),
        Some(serde_json::json!({"actor": L2_TECH})),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_reopen_walk_back_through_in_progress() {
    let app = test_app();
    let id = create_ticket(&app).await;

    send(
        &app,
        "POST",
        &format!("/api/tickets/{}/accept", id),
        Some(serde_json::json!({"actor": L2_TECH})),
    )
    .await;
    send(
        &app,
        "POST",
        &format!("/api/tickets/{}/complete", id),
        Some(serde_json::json!({"actor": L2_TECH, "actual_downtime_hours": 2.0})),
    )
    .await;

    let (status, ticket) = send(
        &app,
        "POST",
        &format!("/api/tickets/{}/reopen", id),
        Some(serde_json::json!({"actor": REPORTER, "reason": "Alarm tripped again"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(ticket["status"], "reopened_in_progress");

    // A reopened ticket goes back through accept at level 2.
    let (status, ticket) = send(
        &app,
        "POST",
        &format!("/api/tickets/{}/accept", id),
        Some(serde_json::json!({"actor": L2_OTHER})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(ticket["status"], "in_progress");
    assert_eq!(ticket["assigned_to"], L2_OTHER);
}

#[tokio::test]
async fn test_unknown_ticket_is_404_everywhere() {
    let app = test_app();
    for (method, path, body) in [
        ("GET", "/api/tickets/999".to_string(), None),
        ("GET", "/api/tickets/999/history".to_string(), None),
        (
            "POST",
            "/api/tickets/999/accept".to_string(),
            Some(serde_json::json!({"actor": L2_TECH})),
        ),
        (
            "POST",
            "/api/tickets/999/finalize".to_string(),
            Some(serde_json::json!({})),
        ),
    ] {
        let (status, _) = send(&app, method, &path, body).await;
        assert_eq!(status, StatusCode::NOT_FOUND, "{} {}", method, path);
    }
}

#[tokio::test]
async fn test_image_attach_and_finalize_latch() {
    let app = test_app();
    let id = create_ticket(&app).await;

    let (status, attachments) = send(
        &app,
        "POST",
        &format!("/api/tickets/{}/images", id),
        Some(serde_json::json!({
            "uploaded_by": REPORTER,
            "images": [
                {"object_key": "tickets/1/photo-1.jpg", "content_type": "image/jpeg"},
                {"object_key": "tickets/1/photo-2.jpg", "content_type": "image/jpeg"}
            ]
        })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(attachments.as_array().unwrap().len(), 2);

    // Uploads already claimed the creation notice.
    let (status, body) = send(
        &app,
        "POST",
        &format!("/api/tickets/{}/finalize", id),
        Some(serde_json::json!({})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["notified"], false);

    let (status, detail) = send(&app, "GET", &format!("/api/tickets/{}", id), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(detail["attachments"].as_array().unwrap().len(), 2);
    assert!(!detail["ticket"]["creation_notified_at"].is_null());
}

#[tokio::test]
async fn test_finalize_without_images_claims_latch() {
    let app = test_app();
    let id = create_ticket(&app).await;

    let (status, body) = send(
        &app,
        "POST",
        &format!("/api/tickets/{}/finalize", id),
        Some(serde_json::json!({})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["notified"], true);

    let (_, body) = send(
        &app,
        "POST",
        &format!("/api/tickets/{}/finalize", id),
        Some(serde_json::json!({})),
    )
    .await;
    assert_eq!(body["notified"], false);
}

#[tokio::test]
async fn test_list_tickets_with_status_filter() {
    let app = test_app();
    let a = create_ticket(&app).await;
    let _b = create_ticket(&app).await;

    send(
        &app,
        "POST",
        &format!("/api/tickets/{}/accept", a),
        Some(serde_json::json!({"actor": L2_TECH})),
    )
    .await;

    let (status, all) = send(&app, "GET", "/api/tickets", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(all.as_array().unwrap().len(), 2);

    let (status, open) = send(&app, "GET", "/api/tickets?status=open", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(open.as_array().unwrap().len(), 1);

    let (status, _) = send(&app, "GET", "/api/tickets?status=bogus", None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}
