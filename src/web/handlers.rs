//! HTTP request handlers.

use super::AppState;
use crate::engine::{parse_sensor_ids, HistoricalData, IngestRequest, RejectReason, TimeRange};
use crate::store::{SensorId, Snapshot, Stats, ThresholdRequest};

use axum::{
    extract::{rejection::JsonRejection, Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Json},
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Default number of snapshots returned by `/api/sensor-data`.
const DEFAULT_RECENT_LIMIT: usize = 50;

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub success: bool,
    pub error: String,
}

fn error_response(status: StatusCode, error: impl Into<String>) -> axum::response::Response {
    (
        status,
        Json(ErrorResponse {
            success: false,
            error: error.into(),
        }),
    )
        .into_response()
}

// ============================================================================
// Health
// ============================================================================

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub timestamp: DateTime<Utc>,
    /// Seconds since the engine started.
    pub uptime: f64,
}

pub async fn handle_health(State(state): State<AppState>) -> impl IntoResponse {
    Json(HealthResponse {
        status: "ok",
        timestamp: Utc::now(),
        uptime: state.engine.uptime().as_secs_f64(),
    })
}

// ============================================================================
// Ingest
// ============================================================================

#[derive(Debug, Serialize)]
pub struct IngestResponse {
    pub success: bool,
    pub message: &'static str,
    pub timestamp: DateTime<Utc>,
    pub active_pumps: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub warning: Option<String>,
}

pub async fn handle_ingest(
    State(state): State<AppState>,
    payload: Result<Json<IngestRequest>, JsonRejection>,
) -> impl IntoResponse {
    let request = match payload {
        Ok(Json(request)) => request,
        Err(rejection) => {
            state.engine.record_failure();
            tracing::warn!("Rejected watering data: {}", rejection.body_text());
            return error_response(StatusCode::BAD_REQUEST, rejection.body_text());
        }
    };

    match state.engine.submit(request) {
        Ok(ack) => Json(IngestResponse {
            success: true,
            message: "Data received successfully",
            timestamp: ack.received_at,
            active_pumps: ack.active_pumps,
            warning: ack.warning,
        })
        .into_response(),
        Err(reason) => {
            state.engine.record_failure();
            tracing::warn!("Rejected watering data: {}", reason);
            error_response(StatusCode::BAD_REQUEST, reason.to_string())
        }
    }
}

// ============================================================================
// Reads
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct RecentQuery {
    #[serde(default)]
    pub limit: Option<usize>,
}

#[derive(Debug, Serialize)]
pub struct RecentResponse {
    pub success: bool,
    pub data: Vec<Snapshot>,
    pub count: usize,
}

pub async fn handle_recent(
    State(state): State<AppState>,
    Query(query): Query<RecentQuery>,
) -> impl IntoResponse {
    let data = state
        .engine
        .recent(query.limit.unwrap_or(DEFAULT_RECENT_LIMIT));
    let count = data.len();
    Json(RecentResponse {
        success: true,
        data,
        count,
    })
}

#[derive(Debug, Serialize)]
pub struct StatsResponse {
    pub success: bool,
    pub stats: Stats,
}

pub async fn handle_stats(State(state): State<AppState>) -> impl IntoResponse {
    Json(StatsResponse {
        success: true,
        stats: state.engine.stats(),
    })
}

#[derive(Debug, Serialize)]
pub struct CurrentStatusResponse {
    pub success: bool,
    pub current_status: Option<Snapshot>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<&'static str>,
}

pub async fn handle_current_status(State(state): State<AppState>) -> impl IntoResponse {
    let current = state.engine.current_status();
    let response = match current {
        Some(snapshot) => CurrentStatusResponse {
            success: true,
            timestamp: Some(snapshot.received_at),
            current_status: Some(snapshot),
            message: None,
        },
        None => CurrentStatusResponse {
            success: true,
            current_status: None,
            timestamp: None,
            message: Some("No data available"),
        },
    };
    Json(response)
}

#[derive(Debug, Deserialize)]
pub struct HistoricalQuery {
    #[serde(rename = "timeRange", default)]
    pub time_range: Option<String>,
    #[serde(default)]
    pub sensors: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct HistoricalResponse {
    pub success: bool,
    pub data: HistoricalData,
}

pub async fn handle_historical(
    State(state): State<AppState>,
    Query(query): Query<HistoricalQuery>,
) -> impl IntoResponse {
    let range = TimeRange::parse_or_default(query.time_range.as_deref());
    let sensor_ids = parse_sensor_ids(query.sensors.as_deref());

    Json(HistoricalResponse {
        success: true,
        data: state.engine.historical_query(range, &sensor_ids),
    })
}

// ============================================================================
// Thresholds
// ============================================================================

#[derive(Debug, Serialize)]
pub struct ThresholdsResponse {
    pub success: bool,
    pub thresholds: BTreeMap<SensorId, i64>,
}

pub async fn handle_get_thresholds(State(state): State<AppState>) -> impl IntoResponse {
    Json(ThresholdsResponse {
        success: true,
        thresholds: state.engine.current_thresholds(),
    })
}

#[derive(Debug, Deserialize)]
pub struct ThresholdBody {
    #[serde(default)]
    pub threshold: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct ThresholdUpdateResponse {
    pub success: bool,
    pub message: String,
    pub sensor_id: SensorId,
    pub threshold: i64,
    pub requested_at: DateTime<Utc>,
}

pub async fn handle_request_threshold(
    State(state): State<AppState>,
    Path(sensor_id): Path<String>,
    body: Result<Json<ThresholdBody>, JsonRejection>,
) -> impl IntoResponse {
    let threshold = match body {
        Ok(Json(ThresholdBody {
            threshold: Some(threshold),
        })) => threshold,
        _ => {
            return error_response(
                StatusCode::BAD_REQUEST,
                RejectReason::InvalidThreshold.to_string(),
            )
        }
    };

    let sensor_id = match sensor_id.trim().parse::<i64>() {
        Ok(id) => id,
        Err(_) => {
            return error_response(
                StatusCode::BAD_REQUEST,
                RejectReason::InvalidSensorId.to_string(),
            )
        }
    };

    match state.engine.request_threshold(sensor_id, threshold) {
        Ok(request) => Json(ThresholdUpdateResponse {
            success: true,
            message: format!(
                "Threshold for sensor {} set to {}. The device applies it on its next poll.",
                sensor_id, request.threshold
            ),
            sensor_id: sensor_id as SensorId,
            threshold: request.threshold,
            requested_at: request.requested_at,
        })
        .into_response(),
        Err(reason) => error_response(StatusCode::BAD_REQUEST, reason.to_string()),
    }
}

#[derive(Debug, Serialize)]
pub struct ThresholdUpdatesResponse {
    pub success: bool,
    pub updates: BTreeMap<SensorId, ThresholdRequest>,
}

pub async fn handle_poll_threshold_updates(State(state): State<AppState>) -> impl IntoResponse {
    Json(ThresholdUpdatesResponse {
        success: true,
        updates: state.engine.poll_threshold_requests(),
    })
}

#[derive(Debug, Serialize)]
pub struct MessageResponse {
    pub success: bool,
    pub message: &'static str,
}

pub async fn handle_clear_threshold_updates(State(state): State<AppState>) -> impl IntoResponse {
    state.engine.clear_threshold_requests();
    Json(MessageResponse {
        success: true,
        message: "Threshold updates cleared",
    })
}

// ============================================================================
// Fallback
// ============================================================================

pub async fn handle_not_found() -> impl IntoResponse {
    error_response(StatusCode::NOT_FOUND, "Endpoint not found")
}
