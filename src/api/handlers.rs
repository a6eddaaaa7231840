use crate::api::{
    json_reply, AlertsResponse, AppState, MinerResponse, MinersResponse, PoolSwitchResponse,
    StatusResponse,
};
use crate::error::ApiError;
use crate::monitoring::metrics::PROMETHEUS_CONTENT_TYPE;
use crate::monitoring::miners::DEFAULT_PAGE_LIMIT;
use crate::monitoring::{
    find_miner, render_prometheus, MinerLookup, MinerMatch, MinerQuery, SortKey, SortOrder,
};
use crate::utils::parse_int_or;
use axum::{
    extract::{rejection::PathRejection, Path, Query, State},
    http::{header, StatusCode, Uri},
    response::{IntoResponse, Response},
};
use std::collections::HashMap;
use tracing::debug;
use vprox_core::{MasterMessage, PoolSwitchTarget};

type Params = HashMap<String, String>;

fn pretty(params: &Params) -> bool {
    params.get("pretty").map(String::as_str) == Some("1")
}

/// 第一个非空的参数
fn param<'a>(params: &'a Params, names: &[&str]) -> Option<&'a str> {
    names
        .iter()
        .filter_map(|name| params.get(*name))
        .map(String::as_str)
        .find(|value| !value.is_empty())
}

/// 请求工作进程推送最新快照，不等待回复
async fn refresh_workers(state: &AppState) {
    let report = state.supervisor.broadcast(&MasterMessage::StatsRequest).await;
    debug!(
        "Requested fresh stats: {} delivered, {} skipped, {} failed",
        report.delivered, report.skipped, report.failed
    );
}

/// 健康检查
pub async fn health() -> Response {
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/plain")],
        "ok",
    )
        .into_response()
}

/// 获取系统状态
pub async fn get_status(
    State(state): State<AppState>,
    Query(params): Query<Params>,
) -> Result<Response, ApiError> {
    refresh_workers(&state).await;

    let agg = state.monitoring.aggregate_and_evaluate().await;
    let response = StatusResponse::new(agg, state.monitoring.uptime_sec());
    json_reply(StatusCode::OK, &response, pretty(&params))
}

/// 获取矿工列表
pub async fn get_miners(
    State(state): State<AppState>,
    Query(params): Query<Params>,
) -> Result<Response, ApiError> {
    refresh_workers(&state).await;

    let sort_by = param(&params, &["sort", "sortBy"])
        .unwrap_or("lastSeenAt")
        .to_string();
    let order = param(&params, &["order", "dir"]).unwrap_or("desc").to_string();

    let query = MinerQuery {
        worker: param(&params, &["worker"]).map(str::to_string),
        search: param(&params, &["q"]).map(str::to_string),
        sort_by: SortKey::parse(&sort_by),
        order: SortOrder::parse(&order),
        page: parse_int_or(param(&params, &["page"]), 1),
        limit: parse_int_or(param(&params, &["limit", "pageSize"]), DEFAULT_PAGE_LIMIT),
    };

    let agg = state.monitoring.aggregate().await;
    let page = query.run(agg.miners);

    let response = MinersResponse {
        name: crate::NAME,
        version: crate::VERSION,
        uptime_sec: state.monitoring.uptime_sec(),
        total: page.total,
        page: page.page,
        pages: page.pages,
        limit: page.limit,
        sort_by,
        order,
        miners: page.items,
    };
    json_reply(StatusCode::OK, &response, pretty(&params))
}

/// 获取单个矿工
pub async fn get_miner(
    id: Result<Path<String>, PathRejection>,
    uri: Uri,
    State(state): State<AppState>,
    Query(params): Query<Params>,
) -> Result<Response, ApiError> {
    // 无法解码的ID不可能匹配任何矿工
    let Path(id) = id.map_err(|e| {
        debug!("Rejected miner id: {}", e.body_text());
        ApiError::MinerNotFound {
            id: uri.path().trim_start_matches("/miners/").to_string(),
        }
    })?;

    refresh_workers(&state).await;

    let agg = state.monitoring.aggregate().await;
    match find_miner(&agg.miners, &id) {
        MinerLookup::Found(miner) => {
            let response = MinerResponse {
                name: crate::NAME,
                version: crate::VERSION,
                uptime_sec: state.monitoring.uptime_sec(),
                miner,
            };
            json_reply(StatusCode::OK, &response, pretty(&params))
        }
        MinerLookup::Ambiguous(matches) => Err(ApiError::AmbiguousMiner {
            id,
            matches: matches.iter().map(MinerMatch::from).collect(),
        }),
        MinerLookup::NotFound => Err(ApiError::MinerNotFound { id }),
    }
}

/// 获取告警列表
pub async fn get_alerts(
    State(state): State<AppState>,
    Query(params): Query<Params>,
) -> Result<Response, ApiError> {
    state.monitoring.aggregate_and_evaluate().await;

    let include_resolved = params.get("all").map(String::as_str) == Some("1");
    let response = AlertsResponse::new(state.monitoring.alerts(include_resolved).await);
    json_reply(StatusCode::OK, &response, pretty(&params))
}

/// 手动切换矿池，广播后立即返回
pub async fn switch_pool(
    State(state): State<AppState>,
    Query(params): Query<Params>,
) -> Result<Response, ApiError> {
    let name = params.get("name").cloned();
    let index = params
        .get("index")
        .and_then(|raw| raw.trim().parse::<usize>().ok());
    let target = PoolSwitchTarget::manual(name, index);

    let report = state
        .supervisor
        .broadcast(&MasterMessage::PoolSwitch {
            target: target.clone(),
        })
        .await;
    crate::pool_info!(
        "Pool switch requested (name: {:?}, index: {:?}), sent to {} workers",
        target.name, target.index, report.delivered
    );

    let response = PoolSwitchResponse {
        ok: true,
        requested: target,
    };
    json_reply(StatusCode::OK, &response, pretty(&params))
}

/// Prometheus 指标
pub async fn get_metrics(State(state): State<AppState>) -> Response {
    refresh_workers(&state).await;

    let agg = state.monitoring.aggregate_and_evaluate().await;
    let body = render_prometheus(&agg, state.monitoring.uptime_sec());
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, PROMETHEUS_CONTENT_TYPE)],
        body,
    )
        .into_response()
}
