pub mod handlers;
pub mod server;

use crate::error::ApiError;
use crate::monitoring::{AggregateSnapshot, Alert, MinerView, MonitoringSystem, Totals, WorkerSummary};
use crate::supervisor::WorkerSupervisor;
use axum::{
    extract::{Request, State},
    http::{header, HeaderValue, StatusCode, Uri},
    response::{IntoResponse, Response},
    routing::{get, post},
    Router,
};
use serde::Serialize;
use std::any::Any;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tower::{ServiceBuilder, ServiceExt};
use tower_http::{
    catch_panic::CatchPanicLayer, cors::CorsLayer, services::ServeDir,
    set_header::SetResponseHeaderLayer, trace::TraceLayer,
};
use vprox_core::{PoolState, PoolSwitchTarget};

pub use handlers::*;
pub use server::ApiServer;

/// 控制面板静态文件的挂载前缀
pub const UI_PREFIX: &str = "/ui/";

/// 应用状态
#[derive(Clone)]
pub struct AppState {
    pub monitoring: Arc<MonitoringSystem>,
    pub supervisor: Arc<WorkerSupervisor>,
    /// 控制面板静态文件目录
    pub web_root: PathBuf,
}

/// 系统状态响应
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusResponse {
    pub name: &'static str,
    pub version: &'static str,
    pub uptime_sec: u64,
    /// 已上报快照的工作进程数
    pub threads: usize,
    pub pool_state: Option<PoolState>,
    pub totals: Totals,
    pub workers: Vec<WorkerSummary>,
}

impl StatusResponse {
    pub fn new(agg: AggregateSnapshot, uptime_sec: u64) -> Self {
        Self {
            name: crate::NAME,
            version: crate::VERSION,
            uptime_sec,
            threads: agg.workers.len(),
            pool_state: agg.pool_state,
            totals: agg.totals,
            workers: agg.workers,
        }
    }
}

/// 矿工列表响应
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MinersResponse {
    pub name: &'static str,
    pub version: &'static str,
    pub uptime_sec: u64,
    pub total: usize,
    pub page: usize,
    pub pages: usize,
    pub limit: usize,
    pub sort_by: String,
    pub order: String,
    pub miners: Vec<MinerView>,
}

/// 单个矿工响应
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MinerResponse {
    pub name: &'static str,
    pub version: &'static str,
    pub uptime_sec: u64,
    pub miner: MinerView,
}

/// 告警列表响应
#[derive(Debug, Clone, Serialize)]
pub struct AlertsResponse {
    pub active: usize,
    pub total: usize,
    pub alerts: Vec<Alert>,
}

impl AlertsResponse {
    pub fn new(alerts: Vec<Alert>) -> Self {
        Self {
            active: alerts.iter().filter(|alert| alert.active).count(),
            total: alerts.len(),
            alerts,
        }
    }
}

/// 矿池切换响应
#[derive(Debug, Clone, Serialize)]
pub struct PoolSwitchResponse {
    pub ok: bool,
    pub requested: PoolSwitchTarget,
}

/// 序列化为 JSON 响应，pretty 时缩进
pub fn json_reply<T: Serialize>(status: StatusCode, body: &T, pretty: bool) -> Result<Response, ApiError> {
    let text = if pretty {
        serde_json::to_string_pretty(body)
    } else {
        serde_json::to_string(body)
    }
    .map_err(|e| ApiError::InternalError {
        error: format!("failed to serialize response: {}", e),
    })?;

    Ok((
        status,
        [(header::CONTENT_TYPE, HeaderValue::from_static("application/json"))],
        text,
    )
        .into_response())
}

/// 创建路由
pub fn create_routes(state: AppState) -> Router {
    let routes = Router::new()
        .route("/", get(redirect_to_ui))
        .route("/ui", get(redirect_to_ui))
        .route("/health", get(health))
        .route("/status", get(get_status))
        .route("/miners", get(get_miners))
        .route("/miners/:id", get(get_miner))
        .route("/alerts", get(get_alerts))
        .route("/pool/switch", post(switch_pool))
        .route("/metrics", get(get_metrics))
        .fallback(fallback);

    with_middleware(routes).with_state(state)
}

/// 请求追踪、CORS 和 panic 保护，所有路由共用
pub fn with_middleware<S>(router: Router<S>) -> Router<S>
where
    S: Clone + Send + Sync + 'static,
{
    router.layer(
        ServiceBuilder::new()
            .layer(TraceLayer::new_for_http())
            .layer(CorsLayer::permissive())
            .layer(CatchPanicLayer::custom(handle_panic)),
    )
}

async fn redirect_to_ui() -> Response {
    (StatusCode::FOUND, [(header::LOCATION, UI_PREFIX)]).into_response()
}

/// 未匹配的路径：/ui/ 下的静态文件，其余 404
async fn fallback(State(state): State<AppState>, request: Request) -> Response {
    let Some(rest) = request.uri().path().strip_prefix(UI_PREFIX) else {
        return ApiError::NotFound.into_response();
    };

    match serve_ui(&state.web_root, rest.to_string(), request).await {
        Ok(response) => response,
        Err(e) => e.into_response(),
    }
}

async fn serve_ui(web_root: &Path, rest: String, mut request: Request) -> Result<Response, ApiError> {
    let uri: Uri = format!("/{}", rest)
        .parse()
        .map_err(|_| ApiError::NotFound)?;
    *request.uri_mut() = uri;

    let service = ServiceBuilder::new()
        .layer(SetResponseHeaderLayer::overriding(
            header::CACHE_CONTROL,
            HeaderValue::from_static("no-store"),
        ))
        .service(ServeDir::new(web_root));

    let response = service
        .oneshot(request)
        .await
        .map_err(|e| ApiError::InternalError { error: e.to_string() })?;

    if response.status() == StatusCode::NOT_FOUND {
        return Err(ApiError::NotFound);
    }
    Ok(response.into_response())
}

/// 处理函数 panic 时返回 500，不影响其他请求
fn handle_panic(err: Box<dyn Any + Send + 'static>) -> Response {
    let detail = if let Some(s) = err.downcast_ref::<String>() {
        s.clone()
    } else if let Some(s) = err.downcast_ref::<&str>() {
        s.to_string()
    } else {
        "unknown panic".to_string()
    };

    ApiError::InternalError {
        error: format!("handler panicked: {}", detail),
    }
    .into_response()
}
