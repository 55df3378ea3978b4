use crate::broker::{PushOptions, QueueDriver};
use crate::core::BrokerError;
use crate::metrics::{MetricsReader, QueueSnapshot};
use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::info;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    /// Absent when `broker.enabled` is off; mutating routes answer 503.
    pub broker: Option<QueueDriver>,
    pub reader: MetricsReader,
    pub strategy_name: String,
    pub limiter_name: String,
    pub max_concurrent: Option<usize>,
}

impl AppState {
    fn broker(&self) -> Result<&QueueDriver, BrokerError> {
        self.broker.as_ref().ok_or(BrokerError::Disabled)
    }
}

// Request/Response types for the REST API

#[derive(Debug, Deserialize)]
pub struct PushRequest {
    pub payload: serde_json::Value,
    #[serde(default)]
    pub partition: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct PushResponse {
    pub queue: String,
    pub partition: String,
    pub depth: usize,
}

#[derive(Debug, Serialize)]
pub struct PopResponse {
    pub queue: String,
    pub partition: String,
    pub reservation_id: String,
    pub payload: serde_json::Value,
}

#[derive(Debug, Deserialize)]
pub struct ReleaseRequest {
    pub partition: String,
    pub payload: serde_json::Value,
    #[serde(default)]
    pub delay_secs: u64,
}

#[derive(Debug, Deserialize)]
pub struct PartitionQuery {
    pub partition: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct ClearQuery {
    pub partition: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ClearResponse {
    pub queue: String,
    pub cleared_partitions: usize,
}

#[derive(Debug, Serialize)]
pub struct StatsResponse {
    pub strategy: String,
    pub limiter: String,
    pub max_concurrent: Option<usize>,
    pub queues: Vec<QueueSnapshot>,
}

/// Health check endpoint
pub async fn health() -> Json<serde_json::Value> {
    Json(json!({
        "status": "ok",
        "service": "fairq-server",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

/// POST /queues/{queue}/jobs
pub async fn push_job(
    State(state): State<AppState>,
    Path(queue): Path<String>,
    Json(request): Json<PushRequest>,
) -> Result<Json<PushResponse>, BrokerError> {
    let receipt = state.broker()?.push(
        &request.payload,
        &queue,
        PushOptions {
            partition: request.partition,
        },
    )?;
    Ok(Json(PushResponse {
        queue,
        partition: receipt.partition,
        depth: receipt.depth,
    }))
}

/// POST /queues/{queue}/pop - 204 when nothing is ready
pub async fn pop_job(
    State(state): State<AppState>,
    Path(queue): Path<String>,
) -> Result<Response, BrokerError> {
    match state.broker()?.pop(&queue)? {
        None => Ok(StatusCode::NO_CONTENT.into_response()),
        Some(reservation) => {
            let payload = reservation.payload_json()?;
            let parts = reservation.into_parts();
            Ok(Json(PopResponse {
                queue,
                partition: parts.partition,
                reservation_id: parts.id,
                payload,
            })
            .into_response())
        }
    }
}

/// POST /queues/{queue}/reservations/{id}/release
pub async fn release_job(
    State(state): State<AppState>,
    Path((queue, reservation_id)): Path<(String, String)>,
    Json(request): Json<ReleaseRequest>,
) -> Result<Json<serde_json::Value>, BrokerError> {
    let payload = serde_json::to_string(&request.payload)?;
    state.broker()?.release(
        &queue,
        &request.partition,
        &reservation_id,
        &payload,
        request.delay_secs,
    )?;
    Ok(Json(json!({ "released": true })))
}

/// DELETE /queues/{queue}/reservations/{id}?partition=K
pub async fn delete_job(
    State(state): State<AppState>,
    Path((queue, reservation_id)): Path<(String, String)>,
    Query(query): Query<PartitionQuery>,
) -> Result<Json<serde_json::Value>, BrokerError> {
    state
        .broker()?
        .delete(&queue, &query.partition, &reservation_id)?;
    Ok(Json(json!({ "deleted": true })))
}

/// GET /queues/{queue}/size
pub async fn queue_size(
    State(state): State<AppState>,
    Path(queue): Path<String>,
) -> Result<Json<serde_json::Value>, BrokerError> {
    let size = state.broker()?.size(&queue)?;
    Ok(Json(json!({ "queue": queue, "size": size })))
}

/// DELETE /queues/{queue}?partition=K - whole queue without the query
pub async fn clear_queue(
    State(state): State<AppState>,
    Path(queue): Path<String>,
    Query(query): Query<ClearQuery>,
) -> Result<Json<ClearResponse>, BrokerError> {
    let broker = state.broker()?;
    let cleared_partitions = match query.partition {
        Some(partition) => {
            broker.clear_partition(&queue, &partition)?;
            info!(queue, partition, "partition cleared via admin API");
            1
        }
        None => {
            let cleared = broker.clear_queue(&queue)?;
            info!(queue, cleared, "queue cleared via admin API");
            cleared
        }
    };
    Ok(Json(ClearResponse {
        queue,
        cleared_partitions,
    }))
}

/// GET /stats - snapshot backing the admin table view
pub async fn stats(State(state): State<AppState>) -> Json<StatsResponse> {
    Json(StatsResponse {
        strategy: state.strategy_name.clone(),
        limiter: state.limiter_name.clone(),
        max_concurrent: state.max_concurrent,
        queues: state.reader.snapshot(),
    })
}
