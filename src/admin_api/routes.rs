use std::net::IpAddr;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Instant;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use chrono::{DateTime, NaiveDateTime, Utc};
use serde::Deserialize;
use serde_json::{json, Value};

use crate::gate::cache::BlockListCache;
use crate::jobs::detector::AnomalyDetector;
use crate::jobs::retention::RetentionSweeper;
use crate::jobs::runner::{JobRunner, RunOutcome};
use crate::storage::{FindingQuery, GovernanceStore, RequestLogQuery, StoreError, SQL_TIME_FORMAT};

/// Shared state for all admin handlers.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn GovernanceStore>,
    pub block_cache: Arc<BlockListCache>,
    pub detector: Arc<AnomalyDetector>,
    pub sweeper: Arc<RetentionSweeper>,
    pub detection_runner: Arc<JobRunner>,
    pub retention_runner: Arc<JobRunner>,
    pub start_time: Instant,
    pub api_key: String,
}

type ApiError = (StatusCode, Json<Value>);
type ApiResult = Result<Json<Value>, ApiError>;

fn store_error(err: StoreError) -> ApiError {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({ "error": err.to_string() })),
    )
}

fn bad_request(message: impl Into<String>) -> ApiError {
    (
        StatusCode::BAD_REQUEST,
        Json(json!({ "error": message.into() })),
    )
}

/// Accepts timestamps in the store's own column format.
fn parse_time(raw: &str, field: &str) -> Result<DateTime<Utc>, ApiError> {
    NaiveDateTime::parse_from_str(raw, SQL_TIME_FORMAT)
        .map(|naive| DateTime::from_naive_utc_and_offset(naive, Utc))
        .map_err(|_| {
            bad_request(format!(
                "invalid '{}' timestamp '{}', expected {}",
                field, raw, SQL_TIME_FORMAT
            ))
        })
}

fn parse_address(raw: &str) -> Result<IpAddr, ApiError> {
    IpAddr::from_str(raw.trim())
        .map_err(|_| bad_request(format!("'{}' is not a valid IP address", raw)))
}

// ---------------------------------------------------------------------------
// Status
// ---------------------------------------------------------------------------

pub async fn get_status(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "version": env!("CARGO_PKG_VERSION"),
        "uptime_secs": state.start_time.elapsed().as_secs(),
        "jobs": {
            "detection": state.detection_runner.last_run(),
            "retention": state.retention_runner.last_run(),
        },
    }))
}

// ---------------------------------------------------------------------------
// Request log review
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct RequestLogParams {
    pub address: Option<String>,
    pub path: Option<String>,
    pub from: Option<String>,
    pub to: Option<String>,
    pub limit: Option<u32>,
}

pub async fn get_requests(
    State(state): State<AppState>,
    Query(params): Query<RequestLogParams>,
) -> ApiResult {
    let query = RequestLogQuery {
        address: params.address,
        path_contains: params.path,
        from: params.from.as_deref().map(|s| parse_time(s, "from")).transpose()?,
        to: params.to.as_deref().map(|s| parse_time(s, "to")).transpose()?,
        limit: Some(params.limit.unwrap_or(100)),
    };

    let rows = state.store.query_request_log(&query).map_err(store_error)?;
    Ok(Json(json!({ "count": rows.len(), "requests": rows })))
}

// ---------------------------------------------------------------------------
// Blocklist
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct BlockRequest {
    pub address: String,
    pub reason: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct SetActiveRequest {
    pub active: bool,
}

pub async fn get_blocklist(State(state): State<AppState>) -> ApiResult {
    let rows = state.store.list_blocked_addresses().map_err(store_error)?;
    Ok(Json(json!({ "count": rows.len(), "blocked": rows })))
}

pub async fn add_to_blocklist(
    State(state): State<AppState>,
    Json(body): Json<BlockRequest>,
) -> ApiResult {
    let address = parse_address(&body.address)?;

    let created = state
        .store
        .add_blocked_address(&address.to_string(), body.reason.as_deref())
        .map_err(store_error)?;

    if created {
        Ok(Json(json!({ "address": address.to_string(), "status": "blocked" })))
    } else {
        Ok(Json(json!({ "address": address.to_string(), "status": "already blocked" })))
    }
}

pub async fn set_block_active(
    State(state): State<AppState>,
    Path(address): Path<String>,
    Json(body): Json<SetActiveRequest>,
) -> ApiResult {
    let address = parse_address(&address)?;

    let found = state
        .store
        .set_blocked_active(&address.to_string(), body.active)
        .map_err(store_error)?;
    if !found {
        return Err((
            StatusCode::NOT_FOUND,
            Json(json!({ "error": format!("{} is not on the blocklist", address) })),
        ));
    }

    // Deactivation takes effect immediately in this process; the cached
    // positive verdict would otherwise linger for the rest of its TTL.
    if !body.active {
        state.block_cache.evict(&address);
    }

    Ok(Json(json!({
        "address": address.to_string(),
        "active": body.active,
    })))
}

// ---------------------------------------------------------------------------
// Suspicious activity review
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct FindingParams {
    pub address: Option<String>,
    pub resolved: Option<bool>,
    pub from: Option<String>,
    pub to: Option<String>,
    pub limit: Option<u32>,
}

#[derive(Debug, Deserialize)]
pub struct ResolveRequest {
    pub ids: Vec<i64>,
}

pub async fn get_suspicious(
    State(state): State<AppState>,
    Query(params): Query<FindingParams>,
) -> ApiResult {
    let query = FindingQuery {
        address: params.address,
        resolved: params.resolved,
        from: params.from.as_deref().map(|s| parse_time(s, "from")).transpose()?,
        to: params.to.as_deref().map(|s| parse_time(s, "to")).transpose()?,
        limit: Some(params.limit.unwrap_or(100)),
    };

    let rows = state.store.query_findings(&query).map_err(store_error)?;
    Ok(Json(json!({ "count": rows.len(), "findings": rows })))
}

pub async fn resolve_suspicious(
    State(state): State<AppState>,
    Json(body): Json<ResolveRequest>,
) -> ApiResult {
    if body.ids.is_empty() {
        return Err(bad_request("'ids' must not be empty"));
    }

    let resolved = state.store.resolve_findings(&body.ids).map_err(store_error)?;
    Ok(Json(json!({ "resolved": resolved })))
}

// ---------------------------------------------------------------------------
// Job triggers
// ---------------------------------------------------------------------------

fn outcome_response(outcome: RunOutcome) -> (StatusCode, Json<Value>) {
    let status = match &outcome {
        RunOutcome::Completed { .. } => StatusCode::OK,
        RunOutcome::Skipped => StatusCode::SERVICE_UNAVAILABLE,
        RunOutcome::Failed { .. } => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (status, Json(serde_json::to_value(&outcome).unwrap_or(Value::Null)))
}

pub async fn run_detection(State(state): State<AppState>) -> (StatusCode, Json<Value>) {
    let detector = state.detector.clone();
    let outcome = state.detection_runner.try_run(move || {
        detector.run_once().map(|summary| {
            format!(
                "{} new findings (volume {}, sensitive {}, breadth {})",
                summary.total(),
                summary.volume,
                summary.sensitive,
                summary.breadth
            )
        })
    });
    outcome_response(outcome)
}

pub async fn run_retention(State(state): State<AppState>) -> (StatusCode, Json<Value>) {
    let sweeper = state.sweeper.clone();
    let outcome = state.retention_runner.try_run(move || {
        sweeper.run_once().map(|summary| {
            format!(
                "removed {} request logs, {} resolved findings",
                summary.request_logs, summary.resolved_findings
            )
        })
    });
    outcome_response(outcome)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn address_validation_rejects_garbage() {
        assert!(parse_address("1.2.3.4").is_ok());
        assert!(parse_address(" ::1 ").is_ok());
        let err = parse_address("not-an-ip").unwrap_err();
        assert_eq!(err.0, StatusCode::BAD_REQUEST);
    }

    #[test]
    fn time_validation_uses_store_format() {
        assert!(parse_time("2026-08-06 12:00:00", "from").is_ok());
        assert!(parse_time("yesterday", "from").is_err());
    }
}
