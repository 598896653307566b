use crate::collection::CollectionService;
use crate::collectors::MetricRecord;
use crate::error::StoreError;
use crate::health::{ApplicationHealth, HealthEvaluator};
use crate::storage::{MetricRepository, StorageStats};
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};

#[derive(Clone)]
pub struct AppState {
    pub repository: Arc<dyn MetricRepository>,
    pub evaluator: HealthEvaluator,
    pub collection: Arc<CollectionService>,
}

impl AppState {
    pub fn new(repository: Arc<dyn MetricRepository>, collection: Arc<CollectionService>) -> Self {
        Self {
            evaluator: HealthEvaluator::new(Arc::clone(&repository)),
            repository,
            collection,
        }
    }
}

pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(|| async { "ok" }))
        .route("/metrics/all", get(all_metrics))
        .route(
            "/metrics/resource/{resource_id}/metric/{metric_name}",
            get(metrics_by_resource),
        )
        .route(
            "/metrics/type/{resource_type}/metric/{metric_name}",
            get(metrics_by_type),
        )
        .route("/metrics/latest", get(latest_metrics))
        .route("/metrics/application/{app_name}/all", get(application_metrics))
        .route("/metrics/application/{app_name}/latest", get(application_latest))
        .route("/metrics/application/{app_name}/health", get(application_health))
        .route("/metrics/stats", get(stats))
        .route("/metrics/collect", post(trigger_collection))
        .with_state(state)
        .layer(cors)
}

#[derive(Debug)]
pub enum ApiError {
    Store(StoreError),
    BadRequest(String),
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        ApiError::Store(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::Store(err) => {
                tracing::error!(error = %err, "Metric store error");
                (StatusCode::INTERNAL_SERVER_ERROR, err.to_string())
            }
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
        };

        (status, Json(json!({ "error": message }))).into_response()
    }
}

/// `startTime`/`endTime` as RFC 3339; both default to the last hour.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RangeQuery {
    pub start_time: Option<String>,
    pub end_time: Option<String>,
}

impl RangeQuery {
    fn resolve(&self, now: DateTime<Utc>) -> Result<(DateTime<Utc>, DateTime<Utc>), ApiError> {
        let end = match &self.end_time {
            Some(raw) => parse_instant("endTime", raw)?,
            None => now,
        };
        let start = match &self.start_time {
            Some(raw) => parse_instant("startTime", raw)?,
            None => end - Duration::hours(1),
        };
        if start > end {
            return Err(ApiError::BadRequest("startTime is after endTime".to_string()));
        }
        Ok((start, end))
    }
}

fn parse_instant(field: &str, raw: &str) -> Result<DateTime<Utc>, ApiError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| ApiError::BadRequest(format!("invalid {}: {} ({})", field, raw, e)))
}

async fn all_metrics(State(state): State<AppState>) -> Result<Json<Vec<MetricRecord>>, ApiError> {
    Ok(Json(state.repository.find_all()?))
}

async fn metrics_by_resource(
    State(state): State<AppState>,
    Path((resource_id, metric_name)): Path<(String, String)>,
    Query(range): Query<RangeQuery>,
) -> Result<Json<Vec<MetricRecord>>, ApiError> {
    let (start, end) = range.resolve(Utc::now())?;
    let records = state
        .repository
        .find_by_resource_and_range(&resource_id, &metric_name, start, end)?;
    Ok(Json(records))
}

async fn metrics_by_type(
    State(state): State<AppState>,
    Path((resource_type, metric_name)): Path<(String, String)>,
    Query(range): Query<RangeQuery>,
) -> Result<Json<Vec<MetricRecord>>, ApiError> {
    let (start, end) = range.resolve(Utc::now())?;
    let records = state
        .repository
        .find_by_type_and_range(&resource_type, &metric_name, start, end)?;
    Ok(Json(records))
}

async fn latest_metrics(State(state): State<AppState>) -> Result<Json<HashMap<String, MetricRecord>>, ApiError> {
    Ok(Json(state.evaluator.latest_for_all_resources()?))
}

async fn application_metrics(
    State(state): State<AppState>,
    Path(app_name): Path<String>,
) -> Result<Json<Vec<MetricRecord>>, ApiError> {
    Ok(Json(state.evaluator.metrics_for_application(&app_name)?))
}

async fn application_latest(
    State(state): State<AppState>,
    Path(app_name): Path<String>,
) -> Result<Json<HashMap<String, MetricRecord>>, ApiError> {
    Ok(Json(state.evaluator.latest_for_application(&app_name)?))
}

async fn application_health(
    State(state): State<AppState>,
    Path(app_name): Path<String>,
) -> Result<Json<ApplicationHealth>, ApiError> {
    Ok(Json(state.evaluator.application_health(&app_name)?))
}

async fn stats(State(state): State<AppState>) -> Result<Json<StorageStats>, ApiError> {
    Ok(Json(state.repository.stats()?))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CollectResponse {
    pub status: &'static str,
    pub metrics_collected: usize,
    pub failed_collectors: Vec<String>,
    pub round_id: String,
    pub timestamp: DateTime<Utc>,
}

async fn trigger_collection(State(state): State<AppState>) -> Json<CollectResponse> {
    let round = state.collection.run_cycle().await;
    let status = if round.is_complete() { "success" } else { "partial" };
    Json(CollectResponse {
        status,
        metrics_collected: round.metrics_count,
        failed_collectors: round.failed_collectors,
        round_id: round.id,
        timestamp: round.timestamp,
    })
}
