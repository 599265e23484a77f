//! HTTP handlers. Each one maps onto a single orchestrator or tracker call.

use axum::extract::rejection::JsonRejection;
use axum::extract::{Query, State};
use axum::http::header::RETRY_AFTER;
use axum::http::{HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::{NaiveDate, Utc};
use serde::Deserialize;
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use coai_core::{CoaiError, RequestContext, RequestId};
use coai_engine::{ExportFormat, OrchestratedResponse, ORCHESTRATOR_VERSION};

use crate::server::AppState;

const DEFAULT_STATS_DAYS: u32 = 7;

/// Classified error rendered as the standard error body.
#[derive(Debug)]
pub struct ApiError {
    pub error: CoaiError,
    pub request_id: Option<RequestId>,
}

impl From<CoaiError> for ApiError {
    fn from(error: CoaiError) -> Self {
        Self {
            error,
            request_id: None,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.error.http_status())
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let body = self.error.to_response(self.request_id.as_ref());
        let mut response = (status, Json(body)).into_response();
        if let Some(retry) = self.error.retry_after() {
            response
                .headers_mut()
                .insert(RETRY_AFTER, HeaderValue::from(retry.as_secs()));
        }
        response
    }
}

fn bad_body(rejection: JsonRejection) -> ApiError {
    CoaiError::validation(format!("Invalid request body: {}", rejection.body_text())).into()
}

pub async fn health() -> Json<Value> {
    Json(json!({
        "status": "healthy",
        "service": "COAI Backend",
        "version": ORCHESTRATOR_VERSION,
        "timestamp": Utc::now().to_rfc3339(),
    }))
}

pub async fn status(State(state): State<AppState>) -> Json<Value> {
    let services = &state.services;
    Json(json!({
        "orchestrator": services.orchestrator.status(),
        "cache": services.cache.stats(),
        "rate_limiter": {
            "tracked_clients": services.rate_limiter.tracked_clients(),
            "limit": services.rate_limiter.config().limit,
            "window_secs": services.rate_limiter.config().window.as_secs(),
        },
        "usage": {
            "ledger_date": services.orchestrator.usage().ledger_date(),
            "accounting_failures": services.orchestrator.usage().accounting_failures(),
        },
        "metrics": services.metrics.report(),
    }))
}

#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    pub message: String,
    #[serde(default)]
    pub context: RequestContext,
}

/// Runs on its own task so an abandoned request still gets accounted as
/// cancelled instead of being dropped mid-dispatch.
pub async fn chat(
    State(state): State<AppState>,
    body: Result<Json<ChatRequest>, JsonRejection>,
) -> Result<Json<OrchestratedResponse>, ApiError> {
    let Json(req) = body.map_err(bad_body)?;
    let request_id = RequestId::new();
    let cancel = CancellationToken::new();
    let _abandon = cancel.clone().drop_guard();

    let orchestrator = state.services.orchestrator.clone();
    let task_id = request_id.clone();
    let task = tokio::spawn(async move {
        orchestrator
            .handle_with_id(task_id, &req.message, &req.context, &cancel)
            .await
    });

    match task.await {
        Ok(Ok(resp)) => Ok(Json(resp)),
        Ok(Err(e)) => Err(ApiError {
            error: e.error,
            request_id: Some(e.request_id),
        }),
        Err(join) => {
            error!(request_id = %request_id, error = %join, "chat task failed");
            Err(ApiError {
                error: CoaiError::Cancelled,
                request_id: Some(request_id),
            })
        }
    }
}

pub async fn agents(State(state): State<AppState>) -> Json<Value> {
    let router = state.services.orchestrator.router();
    let agents = router.agents();
    Json(json!({
        "count": agents.len(),
        "default_agent": router.default_agent(),
        "agents": agents,
    }))
}

/// Swaps the rule set and drops cached reads that may embed the old one.
pub async fn reload_rules(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    let version = state
        .services
        .orchestrator
        .rules()
        .reload()
        .map_err(CoaiError::from)?;
    state.services.cache.clear();
    info!(version = %version, "rules reloaded over HTTP, response cache cleared");
    Ok(Json(json!({ "status": "reloaded", "version": version })))
}

#[derive(Debug, Deserialize)]
pub struct SummaryQuery {
    pub date: Option<String>,
}

fn parse_date(field: &str, raw: &str) -> Result<NaiveDate, ApiError> {
    NaiveDate::parse_from_str(raw, "%Y-%m-%d").map_err(|_| {
        CoaiError::invalid_field(field, format!("Invalid date '{raw}', expected YYYY-MM-DD")).into()
    })
}

pub async fn usage_summary(
    State(state): State<AppState>,
    Query(q): Query<SummaryQuery>,
) -> Result<Json<Value>, ApiError> {
    let date = q.date.as_deref().map(|d| parse_date("date", d)).transpose()?;
    let summary = state.services.orchestrator.usage().daily_summary(date)?;
    Ok(Json(json!({ "status": "success", "summary": summary })))
}

#[derive(Debug, Deserialize)]
pub struct StatsQuery {
    pub days: Option<u32>,
}

pub async fn usage_stats(
    State(state): State<AppState>,
    Query(q): Query<StatsQuery>,
) -> Result<Json<Value>, ApiError> {
    let stats = state
        .services
        .orchestrator
        .usage()
        .stats(q.days.unwrap_or(DEFAULT_STATS_DAYS))?;
    Ok(Json(json!({ "status": "success", "stats": stats })))
}

#[derive(Debug, Deserialize)]
pub struct ExportRequest {
    pub start_date: String,
    pub end_date: String,
    #[serde(default)]
    pub format: ExportFormat,
}

pub async fn usage_export(
    State(state): State<AppState>,
    body: Result<Json<ExportRequest>, JsonRejection>,
) -> Result<Json<Value>, ApiError> {
    let Json(req) = body.map_err(bad_body)?;
    let start = parse_date("start_date", &req.start_date)?;
    let end = parse_date("end_date", &req.end_date)?;
    let path = state
        .services
        .orchestrator
        .usage()
        .export(start, end, req.format)?;
    Ok(Json(json!({
        "status": "exported",
        "format": req.format,
        "path": path.display().to_string(),
    })))
}
