use axum::{
    extract::{Path, Query, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    routing::post,
    Json, Router,
};
use serde::Deserialize;
use serde_json::json;
use uuid::Uuid;

use crate::jobs::{JobStatus, QueueError};
use crate::metrics::MetricsService;
use crate::service::JobService;
use crate::tenants::{Tenant, TenantsRepo};

pub mod models;
pub mod ws;

use models::{DlqEntryResponse, JobCreateRequest, JobListResponse, JobResponse};
pub use ws::EventStream;

#[derive(Clone)]
pub struct ApiState {
    pub service: JobService,
    pub tenants: TenantsRepo,
    pub metrics: MetricsService,
    pub events: EventStream,
}

pub fn router(state: ApiState) -> Router {
    Router::new()
        .route("/api/v1/jobs", post(create_job).get(list_jobs))
        .route("/api/v1/jobs/dlq", get(list_dlq))
        .route("/api/v1/jobs/metrics/summary", get(metrics_summary))
        .route("/api/v1/jobs/:id", get(get_job))
        .route("/ws", get(ws::ws_endpoint))
        .route("/health", get(health))
        .with_state(state)
}

pub enum ApiError {
    Unauthorized,
    BadRequest(String),
    Queue(QueueError),
}

impl From<QueueError> for ApiError {
    fn from(err: QueueError) -> Self {
        ApiError::Queue(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, kind, detail) = match &self {
            ApiError::Unauthorized => (
                StatusCode::UNAUTHORIZED,
                "UNAUTHORIZED",
                "invalid bearer credential".to_string(),
            ),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "BAD_REQUEST", msg.clone()),
            ApiError::Queue(err) => {
                let detail = err.to_string();
                match err {
                    QueueError::NotFound => (StatusCode::NOT_FOUND, "NOT_FOUND", detail),
                    QueueError::QuotaExceeded { .. } => {
                        (StatusCode::TOO_MANY_REQUESTS, "QUOTA_EXCEEDED", detail)
                    }
                    QueueError::RateLimited { .. } => {
                        (StatusCode::TOO_MANY_REQUESTS, "RATE_LIMITED", detail)
                    }
                    QueueError::InvalidState(_) => {
                        (StatusCode::CONFLICT, "INVALID_STATE", detail)
                    }
                    QueueError::DuplicateIdempotency => {
                        (StatusCode::CONFLICT, "DUPLICATE_IDEMPOTENCY", detail)
                    }
                    QueueError::Store(_) if err.is_transient() => (
                        StatusCode::SERVICE_UNAVAILABLE,
                        "TRANSIENT_STORE",
                        detail,
                    ),
                    QueueError::Store(_) => {
                        (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL", detail)
                    }
                }
            }
        };

        (status, Json(json!({"error": kind, "detail": detail}))).into_response()
    }
}

/// The thin authentication collaborator: bearer credential in, tenant
/// out. Handlers only ever see the resolved tenant.
async fn require_tenant(state: &ApiState, headers: &HeaderMap) -> Result<Tenant, ApiError> {
    let credential = headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .filter(|token| !token.is_empty())
        .ok_or(ApiError::Unauthorized)?;

    state
        .tenants
        .get_by_credential(credential)
        .await?
        .ok_or(ApiError::Unauthorized)
}

pub async fn create_job(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Json(body): Json<JobCreateRequest>,
) -> Result<(StatusCode, Json<JobResponse>), ApiError> {
    let tenant = require_tenant(&state, &headers).await?;

    let max_retries = body.max_retries.unwrap_or(3);
    if !(0..=10).contains(&max_retries) {
        return Err(ApiError::BadRequest(
            "max_retries must be between 0 and 10".to_string(),
        ));
    }

    let job = state
        .service
        .submit_job(&tenant, body.payload, body.idempotency_key, max_retries)
        .await?;

    // An idempotent resubmission also lands here with the existing job.
    Ok((StatusCode::CREATED, Json(job.into())))
}

pub async fn get_job(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
) -> Result<Json<JobResponse>, ApiError> {
    let tenant = require_tenant(&state, &headers).await?;

    let job = state.service.get_job(id, Some(&tenant.id)).await?;
    Ok(Json(job.into()))
}

#[derive(Debug, Deserialize)]
pub struct ListJobsQuery {
    pub status: Option<String>,
    pub limit: Option<i64>,
}

pub async fn list_jobs(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Query(query): Query<ListJobsQuery>,
) -> Result<Json<JobListResponse>, ApiError> {
    let tenant = require_tenant(&state, &headers).await?;
    let limit = query.limit.unwrap_or(100).clamp(1, 500);

    let jobs = match query.status.as_deref() {
        Some(raw) => {
            let status = JobStatus::parse(raw)
                .ok_or_else(|| ApiError::BadRequest(format!("unknown status: {raw}")))?;
            state
                .service
                .list_by_status(status, Some(&tenant.id), limit)
                .await?
        }
        None => {
            let mut all = Vec::new();
            for status in JobStatus::ALL {
                all.extend(
                    state
                        .service
                        .list_by_status(status, Some(&tenant.id), limit)
                        .await?,
                );
            }
            all.truncate(limit as usize);
            all
        }
    };

    let jobs: Vec<JobResponse> = jobs.into_iter().map(JobResponse::from).collect();
    let total = jobs.len();

    Ok(Json(JobListResponse { jobs, total }))
}

#[derive(Debug, Deserialize)]
pub struct ListDlqQuery {
    pub limit: Option<i64>,
}

pub async fn list_dlq(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Query(query): Query<ListDlqQuery>,
) -> Result<Json<Vec<DlqEntryResponse>>, ApiError> {
    let tenant = require_tenant(&state, &headers).await?;
    let limit = query.limit.unwrap_or(100).clamp(1, 500);

    let entries = state.service.list_dlq(Some(&tenant.id), limit).await?;
    Ok(Json(entries.into_iter().map(DlqEntryResponse::from).collect()))
}

pub async fn metrics_summary(
    State(state): State<ApiState>,
    headers: HeaderMap,
) -> Result<Json<crate::metrics::MetricsSnapshot>, ApiError> {
    let tenant = require_tenant(&state, &headers).await?;

    let snapshot = state.metrics.snapshot(Some(&tenant.id)).await?;
    Ok(Json(snapshot))
}

pub async fn health() -> impl IntoResponse {
    (StatusCode::OK, "ok")
}
