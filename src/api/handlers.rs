use std::sync::Arc;
use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::Json,
    routing::get,
    Router,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use log::{info, warn};

use crate::config::HISTORY_DAYS;
use crate::data::hub::SessionId;
use crate::data::models::{DataPoint, TrackedStock};
use crate::data::scheduler::{Scheduler, SchedulerState};
use crate::data::service::WatchlistService;
use crate::error::WatchlistError;
use crate::websocket::protocol::sorted_stocks;

/// Header a browser tab can set to have its REST edits echoed back to its
/// WebSocket session as `Local`.
pub const SESSION_HEADER: &str = "x-session-id";

#[derive(Clone)]
pub struct ApiState {
    pub service: WatchlistService,
    pub scheduler: Arc<Scheduler>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl<T> ApiResponse<T> {
    fn ok(data: T) -> Json<Self> {
        Json(Self { success: true, data: Some(data), error: None })
    }

    fn failed(message: String) -> Json<Self> {
        Json(Self { success: false, data: None, error: Some(message) })
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct StockListResponse {
    pub success: bool,
    pub data: Vec<TrackedStock>,
    pub count: usize,
}

#[derive(Debug, Deserialize)]
pub struct AddStockRequest {
    pub symbol: String,
}

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    pub days: Option<usize>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct StatsResponse {
    pub tracked_stocks: usize,
    pub connected_clients: usize,
    pub subscriber_buffer_size: usize,
    pub scheduler: SchedulerState,
}

type ApiResult<T> = Result<(StatusCode, Json<ApiResponse<T>>), (StatusCode, Json<ApiResponse<T>>)>;

fn status_for(error: &WatchlistError) -> StatusCode {
    match error {
        WatchlistError::InvalidSymbol => StatusCode::BAD_REQUEST,
        WatchlistError::NotTracked(_) => StatusCode::NOT_FOUND,
        WatchlistError::AlreadyTracked(_) => StatusCode::CONFLICT,
    }
}

fn reject<T>(error: WatchlistError) -> (StatusCode, Json<ApiResponse<T>>) {
    (status_for(&error), ApiResponse::failed(error.to_string()))
}

// Unparsable ids are ignored; the edit still goes through, tagged as nobody's.
fn session_from_headers(headers: &HeaderMap) -> Option<SessionId> {
    let raw = headers.get(SESSION_HEADER)?.to_str().ok()?;
    match Uuid::parse_str(raw.trim()) {
        Ok(id) => Some(id),
        Err(_) => {
            warn!("Ignoring malformed {} header: {}", SESSION_HEADER, raw);
            None
        }
    }
}

// GET /api/stocks
pub async fn list_stocks(State(state): State<ApiState>) -> Json<StockListResponse> {
    let data = sorted_stocks(state.service.list_stocks());
    Json(StockListResponse {
        success: true,
        count: data.len(),
        data,
    })
}

// GET /api/stocks/:symbol
pub async fn get_stock(
    State(state): State<ApiState>,
    Path(symbol): Path<String>,
) -> ApiResult<TrackedStock> {
    let stock = state.service.get_stock(&symbol).map_err(reject)?;
    Ok((StatusCode::OK, ApiResponse::ok(stock)))
}

// POST /api/stocks
pub async fn add_stock(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Json(request): Json<AddStockRequest>,
) -> ApiResult<TrackedStock> {
    let source = session_from_headers(&headers);
    let stock = state.service.add_stock(source, &request.symbol).map_err(reject)?;
    info!("Stock {} added via REST", stock.symbol);
    Ok((StatusCode::CREATED, ApiResponse::ok(stock)))
}

// DELETE /api/stocks/:symbol
pub async fn remove_stock(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Path(symbol): Path<String>,
) -> ApiResult<String> {
    let source = session_from_headers(&headers);
    state.service.remove_stock(source, &symbol).map_err(reject)?;
    info!("Stock {} removed via REST", symbol);
    Ok((StatusCode::OK, ApiResponse::ok(format!("Stock {} removed", symbol.trim().to_uppercase()))))
}

// GET /api/stocks/:symbol/history?days=N
pub async fn get_history(
    State(state): State<ApiState>,
    Path(symbol): Path<String>,
    Query(query): Query<HistoryQuery>,
) -> ApiResult<Vec<DataPoint>> {
    let days = query.days.unwrap_or(HISTORY_DAYS);
    let data = state.service.get_history(&symbol, days).map_err(reject)?;
    Ok((StatusCode::OK, ApiResponse::ok(data)))
}

// GET /api/stats
pub async fn get_stats(State(state): State<ApiState>) -> Json<StatsResponse> {
    Json(StatsResponse {
        tracked_stocks: state.service.store().len(),
        connected_clients: state.service.client_count(),
        subscriber_buffer_size: state.service.hub().capacity(),
        scheduler: state.scheduler.get_state(),
    })
}

// GET /api/health
pub async fn health_check() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "healthy",
        "service": "stock_sync_api",
        "timestamp": chrono::Utc::now()
    }))
}

pub fn create_api_router(state: ApiState) -> Router {
    let api_routes = Router::new()
        .route("/health", get(health_check))
        .route("/stats", get(get_stats))
        .route("/stocks", get(list_stocks).post(add_stock))
        .route("/stocks/:symbol", get(get_stock).delete(remove_stock))
        .route("/stocks/:symbol/history", get(get_history))
        .with_state(state);

    Router::new()
        .nest("/api", api_routes)
}
