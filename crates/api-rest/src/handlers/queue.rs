use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::Json,
};
use chrono::NaiveDate;
use lab_core::models::{QueueCounts, QueueEntry, QueueStatus};
use serde::Deserialize;
use utoipa::ToSchema;

use super::{today, DateQuery};
use crate::error::{lab_error, ApiResult};
use crate::AppState;

#[derive(Debug, Deserialize, ToSchema)]
pub struct NewQueueEntryReq {
    pub patient_id: i64,
    /// Defaults to today.
    #[serde(default)]
    pub date: Option<NaiveDate>,
    /// Explicit `DDMMYYYY####` sequence; allocated when absent.
    #[serde(default)]
    pub sequence: Option<String>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct QueueStatusReq {
    pub status: QueueStatus,
}

#[utoipa::path(
    post,
    path = "/queue",
    request_body = NewQueueEntryReq,
    responses(
        (status = 201, description = "Patient queued with the next sequence", body = QueueEntry),
        (status = 400, description = "Invalid or taken sequence"),
        (status = 404, description = "Patient not found"),
        (status = 500, description = "Internal server error")
    )
)]
#[axum::debug_handler]
pub async fn add_entry(
    State(state): State<AppState>,
    Json(req): Json<NewQueueEntryReq>,
) -> ApiResult<(StatusCode, Json<QueueEntry>)> {
    let entry = state
        .queue
        .add_entry(req.patient_id, req.date.unwrap_or_else(today), req.sequence)
        .await
        .map_err(lab_error("add queue entry"))?;
    Ok((StatusCode::CREATED, Json(entry)))
}

#[utoipa::path(
    get,
    path = "/queue",
    params(DateQuery),
    responses((status = 200, description = "Entries of the day in arrival order", body = [QueueEntry]))
)]
#[axum::debug_handler]
pub async fn list_queue(
    State(state): State<AppState>,
    Query(query): Query<DateQuery>,
) -> ApiResult<Json<Vec<QueueEntry>>> {
    let entries = state
        .queue
        .list_for_date(query.or_today())
        .await
        .map_err(lab_error("list queue"))?;
    Ok(Json(entries))
}

#[utoipa::path(
    put,
    path = "/queue/{id}/status",
    params(("id" = i64, Path, description = "Queue entry id")),
    request_body = QueueStatusReq,
    responses(
        (status = 200, description = "Status changed", body = QueueEntry),
        (status = 404, description = "Not found")
    )
)]
#[axum::debug_handler]
pub async fn update_status(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(req): Json<QueueStatusReq>,
) -> ApiResult<Json<QueueEntry>> {
    let entry = state
        .queue
        .update_status(id, req.status)
        .await
        .map_err(lab_error("update queue status"))?;
    Ok(Json(entry))
}

#[utoipa::path(
    get,
    path = "/queue/counts",
    params(DateQuery),
    responses((status = 200, description = "Waiting, served and total counts", body = QueueCounts))
)]
#[axum::debug_handler]
pub async fn day_counts(
    State(state): State<AppState>,
    Query(query): Query<DateQuery>,
) -> ApiResult<Json<QueueCounts>> {
    let counts = state
        .queue
        .day_counts(query.or_today())
        .await
        .map_err(lab_error("queue counts"))?;
    Ok(Json(counts))
}
