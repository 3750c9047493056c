//! Notification feed and lifecycle routes.

use axum::extract::{Path, Query, State};
use axum::routing::{get, patch, post};
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use herald_common::error::AppError;
use herald_common::types::{Notification, NotificationStatus, NotificationType};

use crate::middleware::auth::AuthUser;
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api/notifications", get(list_feed))
        .route("/api/notifications/all", get(list_all))
        .route("/api/notifications/archive-all", post(archive_all))
        .route("/api/notifications/{id}/status", patch(update_status))
        .route("/api/notifications/{id}/snooze", post(snooze))
        .route("/api/notifications/{id}/unsnooze", post(unsnooze))
}

/// Client view of a notification. `read` is derived from the status and
/// never stored.
#[derive(Debug, Serialize)]
pub struct NotificationDto {
    pub id: Uuid,
    pub message: String,
    pub context: serde_json::Value,
    #[serde(rename = "type")]
    pub kind: NotificationType,
    pub status: NotificationStatus,
    pub read: bool,
    pub snoozed_until: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl From<Notification> for NotificationDto {
    fn from(n: Notification) -> Self {
        Self {
            read: n.is_read(),
            id: n.id,
            message: n.message,
            context: n.context,
            kind: n.kind,
            status: n.status,
            snoozed_until: n.snoozed_until,
            created_at: n.created_at,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct FeedResponse {
    pub data: Vec<NotificationDto>,
    pub next_cursor: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct FeedQuery {
    pub cursor: Option<String>,
    pub limit: Option<i64>,
    pub status: Option<NotificationStatus>,
}

#[derive(Debug, Deserialize)]
pub struct StatusFilter {
    pub status: Option<NotificationStatus>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateStatusRequest {
    pub status: NotificationStatus,
}

#[derive(Debug, Deserialize)]
pub struct SnoozeRequest {
    pub hours: i64,
}

fn not_found(id: Uuid) -> AppError {
    AppError::NotFound(format!("Notification {} not found", id))
}

/// GET /api/notifications: one page of the feed (unread unless `status` is given).
async fn list_feed(
    State(state): State<AppState>,
    auth: AuthUser,
    Query(query): Query<FeedQuery>,
) -> Result<Json<FeedResponse>, AppError> {
    let status = query.status.unwrap_or(NotificationStatus::Unread);
    let page = state
        .service
        .list_by_cursor(auth.user_id, status, query.cursor.as_deref(), query.limit)
        .await?;

    Ok(Json(FeedResponse {
        data: page.data.into_iter().map(NotificationDto::from).collect(),
        next_cursor: page.next_cursor,
    }))
}

/// GET /api/notifications/all: every notification, newest first.
async fn list_all(
    State(state): State<AppState>,
    auth: AuthUser,
    Query(filter): Query<StatusFilter>,
) -> Result<Json<Vec<NotificationDto>>, AppError> {
    let notifications = state
        .service
        .list_for_user(auth.user_id, filter.status)
        .await?;
    Ok(Json(
        notifications.into_iter().map(NotificationDto::from).collect(),
    ))
}

/// PATCH /api/notifications/{id}/status: mark done, saved, archived or unread.
async fn update_status(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(id): Path<Uuid>,
    Json(req): Json<UpdateStatusRequest>,
) -> Result<Json<NotificationDto>, AppError> {
    state
        .service
        .set_status(id, auth.user_id, req.status)
        .await?
        .map(|n| Json(n.into()))
        .ok_or_else(|| not_found(id))
}

/// POST /api/notifications/{id}/snooze
async fn snooze(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(id): Path<Uuid>,
    Json(req): Json<SnoozeRequest>,
) -> Result<Json<NotificationDto>, AppError> {
    state
        .service
        .snooze(id, auth.user_id, req.hours)
        .await?
        .map(|n| Json(n.into()))
        .ok_or_else(|| not_found(id))
}

/// POST /api/notifications/{id}/unsnooze
async fn unsnooze(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(id): Path<Uuid>,
) -> Result<Json<NotificationDto>, AppError> {
    state
        .service
        .unsnooze_owned(id, auth.user_id)
        .await?
        .map(|n| Json(n.into()))
        .ok_or_else(|| not_found(id))
}

/// POST /api/notifications/archive-all
async fn archive_all(
    State(state): State<AppState>,
    auth: AuthUser,
) -> Result<Json<serde_json::Value>, AppError> {
    let archived = state.service.archive_all(auth.user_id).await?;
    Ok(Json(serde_json::json!({ "archived": archived })))
}
