use std::str::FromStr;
use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::Deserialize;

use super::db::{DbHandle, NewTicket};
use super::engine::TransitionEngine;
use super::error::WorkflowError;
use super::events::EventBus;
use super::media::{ImageUpload, MediaService};
use super::models::{Priority, TicketDetail, TicketStatus};

// ── Shared application state ──────────────────────────────────────────

pub struct AppState {
    pub db: DbHandle,
    pub engine: TransitionEngine,
    pub media: MediaService,
    pub bus: EventBus,
}

pub type SharedState = Arc<AppState>;

// ── Request payload types ─────────────────────────────────────────────

/// Authentication is handled upstream; requests carry the acting person id.
#[derive(Deserialize)]
pub struct CreateTicketRequest {
    pub title: String,
    pub description: Option<String>,
    pub reported_by: i64,
    pub assigned_to: Option<i64>,
    pub severity_level: Option<i64>,
    pub priority: Option<Priority>,
    pub puno: Option<i64>,
    pub estimated_downtime_hours: Option<f64>,
    pub schedule_finish: Option<String>,
}

#[derive(Deserialize)]
pub struct AcceptRequest {
    pub actor: i64,
}

#[derive(Deserialize)]
pub struct RejectRequest {
    pub actor: i64,
    pub reason: String,
    #[serde(default)]
    pub escalate_to_l3: bool,
}

#[derive(Deserialize)]
pub struct CompleteRequest {
    pub actor: i64,
    pub actual_downtime_hours: f64,
    pub notes: Option<String>,
}

#[derive(Deserialize)]
pub struct EscalateRequest {
    pub actor: i64,
    pub target: i64,
    pub reason: String,
}

#[derive(Deserialize)]
pub struct CloseRequest {
    pub actor: i64,
    pub reason: Option<String>,
    pub satisfaction_rating: Option<i64>,
}

#[derive(Deserialize)]
pub struct ReopenRequest {
    pub actor: i64,
    pub reason: Option<String>,
}

#[derive(Deserialize)]
pub struct ReassignRequest {
    pub actor: i64,
    pub new_assignee: i64,
    pub reason: Option<String>,
}

#[derive(Deserialize)]
pub struct ImageUploadRequest {
    pub object_key: String,
    pub content_type: Option<String>,
}

/// Single or batch: one call may carry any number of uploaded images.
#[derive(Deserialize)]
pub struct AttachImagesRequest {
    pub uploaded_by: i64,
    pub images: Vec<ImageUploadRequest>,
}

#[derive(Deserialize)]
pub struct ListTicketsQuery {
    pub status: Option<String>,
}

// ── Error handling ────────────────────────────────────────────────────

pub enum ApiError {
    NotFound(String),
    Forbidden(String),
    Conflict(String),
    BadRequest(String),
    Internal(String),
}

impl From<WorkflowError> for ApiError {
    fn from(e: WorkflowError) -> Self {
        match e {
            WorkflowError::TicketNotFound { .. } | WorkflowError::PersonNotFound { .. } => {
                ApiError::NotFound(e.to_string())
            }
            WorkflowError::PermissionDenied { .. } => ApiError::Forbidden(e.to_string()),
            WorkflowError::InvalidState { .. } => ApiError::Conflict(e.to_string()),
            WorkflowError::BadRequest(_) => ApiError::BadRequest(e.to_string()),
            WorkflowError::Database(_) | WorkflowError::LockPoisoned => {
                ApiError::Internal(e.to_string())
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::Forbidden(msg) => (StatusCode::FORBIDDEN, msg),
            ApiError::Conflict(msg) => (StatusCode::CONFLICT, msg),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
        };
        (status, Json(serde_json::json!({"error": message}))).into_response()
    }
}

// ── Router ────────────────────────────────────────────────────────────

pub fn api_router() -> Router<SharedState> {
    Router::new()
        .route("/api/tickets", get(list_tickets).post(create_ticket))
        .route("/api/tickets/{id}", get(get_ticket))
        .route("/api/tickets/{id}/accept", post(accept_ticket))
        .route("/api/tickets/{id}/reject", post(reject_ticket))
        .route("/api/tickets/{id}/complete", post(complete_ticket))
        .route("/api/tickets/{id}/escalate", post(escalate_ticket))
        .route("/api/tickets/{id}/close", post(close_ticket))
        .route("/api/tickets/{id}/reopen", post(reopen_ticket))
        .route("/api/tickets/{id}/reassign", post(reassign_ticket))
        .route("/api/tickets/{id}/images", post(attach_images))
        .route("/api/tickets/{id}/finalize", post(finalize_ticket))
        .route("/api/tickets/{id}/history", get(get_history))
        .route("/health", get(health_check))
}

// ── Handlers ──────────────────────────────────────────────────────────

async fn health_check() -> &'static str {
    "ok"
}

async fn create_ticket(
    State(state): State<SharedState>,
    Json(req): Json<CreateTicketRequest>,
) -> Result<impl IntoResponse, ApiError> {
    if let Some(ref finish) = req.schedule_finish
        && chrono::NaiveDateTime::parse_from_str(finish, "%Y-%m-%d %H:%M:%S").is_err()
    {
        return Err(ApiError::BadRequest(format!(
            "schedule_finish must be 'YYYY-MM-DD HH:MM:SS', got '{}'",
            finish
        )));
    }

    let new = NewTicket {
        title: req.title,
        description: req.description.unwrap_or_default(),
        reported_by: req.reported_by,
        assigned_to: req.assigned_to,
        severity_level: req.severity_level.unwrap_or(3),
        priority: req.priority,
        puno: req.puno,
        estimated_downtime_hours: req.estimated_downtime_hours,
        schedule_finish: req.schedule_finish,
    };
    let ticket = state.engine.create(new).await?;
    Ok((StatusCode::CREATED, Json(ticket)))
}

async fn list_tickets(
    State(state): State<SharedState>,
    Query(query): Query<ListTicketsQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let status = match query.status.as_deref() {
        Some(s) => Some(TicketStatus::from_str(s).map_err(ApiError::BadRequest)?),
        None => None,
    };
    let tickets = state.db.call(move |db| db.list_tickets(status)).await?;
    Ok(Json(tickets))
}

async fn get_ticket(
    State(state): State<SharedState>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, ApiError> {
    let detail = state
        .db
        .call(move |db| {
            let ticket = db
                .get_ticket(id)?
                .ok_or(WorkflowError::TicketNotFound { id })?;
            let history = db.list_history(id)?;
            let attachments = db.list_attachments(id)?;
            Ok(TicketDetail {
                ticket,
                history,
                attachments,
            })
        })
        .await?;
    Ok(Json(detail))
}

async fn get_history(
    State(state): State<SharedState>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, ApiError> {
    let history = state
        .db
        .call(move |db| {
            if db.get_ticket(id)?.is_none() {
                return Err(WorkflowError::TicketNotFound { id });
            }
            db.list_history(id)
        })
        .await?;
    Ok(Json(history))
}

async fn accept_ticket(
    State(state): State<SharedState>,
    Path(id): Path<i64>,
    Json(req): Json<AcceptRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let ticket = state.engine.accept(id, req.actor).await?;
    Ok(Json(ticket))
}

async fn reject_ticket(
    State(state): State<SharedState>,
    Path(id): Path<i64>,
    Json(req): Json<RejectRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let ticket = state
        .engine
        .reject(id, req.actor, req.reason, req.escalate_to_l3)
        .await?;
    Ok(Json(ticket))
}

async fn complete_ticket(
    State(state): State<SharedState>,
    Path(id): Path<i64>,
    Json(req): Json<CompleteRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let ticket = state
        .engine
        .complete(id, req.actor, req.actual_downtime_hours, req.notes)
        .await?;
    Ok(Json(ticket))
}

async fn escalate_ticket(
    State(state): State<SharedState>,
    Path(id): Path<i64>,
    Json(req): Json<EscalateRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let ticket = state
        .engine
        .escalate(id, req.actor, req.target, req.reason)
        .await?;
    Ok(Json(ticket))
}

async fn close_ticket(
    State(state): State<SharedState>,
    Path(id): Path<i64>,
    Json(req): Json<CloseRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let ticket = state
        .engine
        .close(id, req.actor, req.reason, req.satisfaction_rating)
        .await?;
    Ok(Json(ticket))
}

async fn reopen_ticket(
    State(state): State<SharedState>,
    Path(id): Path<i64>,
    Json(req): Json<ReopenRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let ticket = state.engine.reopen(id, req.actor, req.reason).await?;
    Ok(Json(ticket))
}

async fn reassign_ticket(
    State(state): State<SharedState>,
    Path(id): Path<i64>,
    Json(req): Json<ReassignRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let ticket = state
        .engine
        .reassign(id, req.actor, req.new_assignee, req.reason)
        .await?;
    Ok(Json(ticket))
}

async fn attach_images(
    State(state): State<SharedState>,
    Path(id): Path<i64>,
    Json(req): Json<AttachImagesRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let uploads: Vec<ImageUpload> = req
        .images
        .into_iter()
        .map(|img| ImageUpload {
            object_key: img.object_key,
            content_type: img.content_type,
        })
        .collect();
    let attachments = state.media.attach_images(id, uploads, req.uploaded_by).await?;
    Ok((StatusCode::CREATED, Json(attachments)))
}

async fn finalize_ticket(
    State(state): State<SharedState>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, ApiError> {
    let notified = state.media.finalize_creation(id).await?;
    Ok(Json(serde_json::json!({ "notified": notified })))
}
