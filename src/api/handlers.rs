use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::alerts::{AlertDispatcher, AlertRecord, ChannelConfig, ChannelKind, NotifierError};
use crate::monitor::{Monitor, MonitorError, MonitorResult, Rule};
use crate::scheduler::{MonitorScheduler, SchedulerState};
use crate::source::memory::Row;
use crate::source::{MemoryCatalog, Schema};

pub const DEFAULT_PAGE_LIMIT: usize = 100;

/// Application state shared across handlers
pub struct AppState {
    pub monitor: Arc<Monitor>,
    pub dispatcher: Arc<AlertDispatcher>,
    pub scheduler: Arc<MonitorScheduler>,
    pub catalog: MemoryCatalog,
}

#[derive(Deserialize)]
pub struct PageQuery {
    #[serde(default)]
    pub rule: Option<String>,
    #[serde(default)]
    pub limit: Option<usize>,
}

impl PageQuery {
    fn limit(&self) -> usize {
        self.limit.unwrap_or(DEFAULT_PAGE_LIMIT)
    }
}

// ============================================================================
// Health Check
// ============================================================================

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub scheduler: SchedulerState,
    pub rules: usize,
}

pub async fn health_check(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy",
        version: env!("CARGO_PKG_VERSION"),
        scheduler: state.scheduler.state(),
        rules: state.monitor.list_rules().len(),
    })
}

// ============================================================================
// Rules
// ============================================================================

#[derive(Serialize)]
pub struct AddRuleResponse {
    pub name: String,
    pub replaced: bool,
}

pub async fn list_rules(State(state): State<Arc<AppState>>) -> Json<Vec<Rule>> {
    Json(state.monitor.list_rules())
}

pub async fn add_rule(
    State(state): State<Arc<AppState>>,
    Json(rule): Json<Rule>,
) -> Result<Json<AddRuleResponse>, ApiError> {
    let name = rule.name.clone();
    let previous = state.monitor.add_rule(rule)?;

    Ok(Json(AddRuleResponse {
        name,
        replaced: previous.is_some(),
    }))
}

pub async fn get_rule(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
) -> Result<Json<Rule>, ApiError> {
    state
        .monitor
        .get_rule(&name)
        .map(Json)
        .ok_or_else(|| MonitorError::RuleNotFound(name).into())
}

pub async fn delete_rule(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    if !state.monitor.remove_rule(&name) {
        return Err(MonitorError::RuleNotFound(name).into());
    }
    Ok(Json(serde_json::json!({ "removed": name })))
}

/// Evaluate now, dispatching alerts if triggered
pub async fn run_rule(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
) -> Result<Json<MonitorResult>, ApiError> {
    let result = state.scheduler.trigger_now(&name).await?;
    Ok(Json(result))
}

#[derive(Serialize)]
pub struct NextRunResponse {
    pub rule: String,
    pub next_run: Option<DateTime<Utc>>,
}

pub async fn next_run(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
) -> Result<Json<NextRunResponse>, ApiError> {
    if state.monitor.get_rule(&name).is_none() {
        return Err(MonitorError::RuleNotFound(name).into());
    }

    Ok(Json(NextRunResponse {
        next_run: state.scheduler.get_next_run_time(&name),
        rule: name,
    }))
}

pub async fn list_results(
    State(state): State<Arc<AppState>>,
    Query(query): Query<PageQuery>,
) -> Json<Vec<MonitorResult>> {
    Json(state.monitor.results(query.rule.as_deref(), query.limit()))
}

// ============================================================================
// Scheduler
// ============================================================================

#[derive(Serialize)]
pub struct SchedulerResponse {
    pub state: SchedulerState,
}

pub async fn scheduler_status(State(state): State<Arc<AppState>>) -> Json<SchedulerResponse> {
    Json(SchedulerResponse {
        state: state.scheduler.state(),
    })
}

pub async fn start_scheduler(State(state): State<Arc<AppState>>) -> Json<SchedulerResponse> {
    state.scheduler.start();
    scheduler_status(State(state)).await
}

pub async fn stop_scheduler(State(state): State<Arc<AppState>>) -> Json<SchedulerResponse> {
    state.scheduler.stop().await;
    scheduler_status(State(state)).await
}

// ============================================================================
// Alert Channels
// ============================================================================

pub async fn list_channels(State(state): State<Arc<AppState>>) -> Json<Vec<ChannelConfig>> {
    let channels = state
        .dispatcher
        .channels()
        .into_iter()
        .map(|mut config| {
            for (key, value) in config.settings.iter_mut() {
                if key.contains("password") {
                    *value = serde_json::Value::String("***".to_string());
                }
            }
            config
        })
        .collect();
    Json(channels)
}

#[derive(Serialize)]
pub struct RegisterChannelResponse {
    pub kind: ChannelKind,
    pub replaced: bool,
}

pub async fn register_channel(
    State(state): State<Arc<AppState>>,
    Json(config): Json<ChannelConfig>,
) -> Result<Json<RegisterChannelResponse>, ApiError> {
    let kind = config.kind;
    let previous = state.dispatcher.register(config)?;

    Ok(Json(RegisterChannelResponse {
        kind,
        replaced: previous.is_some(),
    }))
}

pub async fn delete_channel(
    State(state): State<Arc<AppState>>,
    Path(kind): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let kind: ChannelKind = kind.parse()?;
    if !state.dispatcher.unregister(kind) {
        return Err(ApiError::NotFound(format!("Channel '{}' not registered", kind)));
    }
    Ok(Json(serde_json::json!({ "removed": kind })))
}

pub async fn list_alerts(
    State(state): State<Arc<AppState>>,
    Query(query): Query<PageQuery>,
) -> Json<Vec<AlertRecord>> {
    Json(state.dispatcher.history(query.limit()))
}

// ============================================================================
// Sources
// ============================================================================

#[derive(Deserialize)]
pub struct LoadTableRequest {
    #[serde(default)]
    pub schema: Schema,
    #[serde(default)]
    pub rows: Vec<Row>,
}

#[derive(Serialize)]
pub struct TableInfo {
    pub locator: String,
    pub table: String,
    pub row_count: usize,
}

pub async fn list_tables(State(state): State<Arc<AppState>>) -> Json<Vec<TableInfo>> {
    let tables = state
        .catalog
        .list_tables()
        .into_iter()
        .map(|(locator, table, row_count)| TableInfo {
            locator,
            table,
            row_count,
        })
        .collect();
    Json(tables)
}

pub async fn load_table(
    State(state): State<Arc<AppState>>,
    Path((locator, table)): Path<(String, String)>,
    Json(request): Json<LoadTableRequest>,
) -> Json<TableInfo> {
    let row_count = request.rows.len();
    state
        .catalog
        .load(locator.clone(), table.clone(), request.schema, request.rows);
    tracing::info!(locator = %locator, table = %table, rows = row_count, "Loaded table");

    Json(TableInfo {
        locator,
        table,
        row_count,
    })
}

pub async fn drop_table(
    State(state): State<Arc<AppState>>,
    Path((locator, table)): Path<(String, String)>,
) -> Result<Json<serde_json::Value>, ApiError> {
    if !state.catalog.drop_table(&locator, &table) {
        return Err(ApiError::NotFound(format!(
            "Table '{}' not found in '{}'",
            table, locator
        )));
    }
    Ok(Json(serde_json::json!({ "dropped": table })))
}

// ============================================================================
// Error Handling
// ============================================================================

#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    NotFound(String),
}

impl From<MonitorError> for ApiError {
    fn from(err: MonitorError) -> Self {
        match err {
            MonitorError::RuleNotFound(_) => ApiError::NotFound(err.to_string()),
            _ => ApiError::BadRequest(err.to_string()),
        }
    }
}

impl From<NotifierError> for ApiError {
    fn from(err: NotifierError) -> Self {
        ApiError::BadRequest(err.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        let (status, message) = match self {
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
        };

        let body = serde_json::json!({
            "error": message
        });

        (status, Json(body)).into_response()
    }
}
