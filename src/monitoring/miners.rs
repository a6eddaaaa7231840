//! 矿工查询服务
//!
//! 对扁平化的矿工列表做过滤、搜索、排序、分页和按ID解析。

use crate::monitoring::aggregator::MinerView;
use crate::utils::finite_or_zero;
use serde::Serialize;
use std::cmp::Ordering;
use vprox_core::WorkerId;

/// 每页最大条数
pub const MAX_PAGE_LIMIT: i64 = 1000;
/// 默认每页条数
pub const DEFAULT_PAGE_LIMIT: i64 = 100;

/// 排序字段
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortKey {
    MinerId,
    WorkerId,
    ConnectedAt,
    #[default]
    LastSeenAt,
    UptimeSec,
    Submitted,
    Accepted,
    Rejected,
    AvgSubmitLatencyMs,
}

impl SortKey {
    /// 无法识别的字段回退为 lastSeenAt
    pub fn parse(raw: &str) -> Self {
        match raw.trim() {
            "minerId" => SortKey::MinerId,
            "workerId" => SortKey::WorkerId,
            "connectedAt" => SortKey::ConnectedAt,
            "uptimeSec" => SortKey::UptimeSec,
            "submitted" => SortKey::Submitted,
            "accepted" => SortKey::Accepted,
            "rejected" => SortKey::Rejected,
            "avgSubmitLatencyMs" => SortKey::AvgSubmitLatencyMs,
            _ => SortKey::LastSeenAt,
        }
    }

    fn value(&self, miner: &MinerView) -> f64 {
        let record = &miner.record;
        let value = match self {
            SortKey::MinerId => record.miner_id.trim().parse::<f64>().unwrap_or(0.0),
            SortKey::WorkerId => f64::from(miner.worker_id.0),
            SortKey::ConnectedAt => record.connected_at.unwrap_or(0) as f64,
            SortKey::LastSeenAt => record.last_seen_at.unwrap_or(0) as f64,
            SortKey::UptimeSec => record.uptime_sec.unwrap_or(0.0),
            SortKey::Submitted => record.submitted as f64,
            SortKey::Accepted => record.accepted as f64,
            SortKey::Rejected => record.rejected as f64,
            SortKey::AvgSubmitLatencyMs => record.avg_latency_ms(),
        };
        finite_or_zero(value)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortOrder {
    Asc,
    #[default]
    Desc,
}

impl SortOrder {
    /// 只有 "asc"（不区分大小写）是升序，其余都是降序
    pub fn parse(raw: &str) -> Self {
        if raw.trim().eq_ignore_ascii_case("asc") {
            SortOrder::Asc
        } else {
            SortOrder::Desc
        }
    }
}

/// 分页结果
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Page<T> {
    pub total: usize,
    pub pages: usize,
    pub page: usize,
    pub limit: usize,
    pub items: Vec<T>,
}

/// /miners 查询参数
#[derive(Debug, Clone, Default)]
pub struct MinerQuery {
    pub worker: Option<String>,
    pub search: Option<String>,
    pub sort_by: SortKey,
    pub order: SortOrder,
    pub page: i64,
    pub limit: i64,
}

impl MinerQuery {
    /// 过滤、搜索、排序后分页
    pub fn run(&self, miners: Vec<MinerView>) -> Page<MinerView> {
        let mut list = miners;
        if let Some(worker) = self.worker.as_deref().filter(|w| !w.is_empty()) {
            list = filter_by_worker(list, worker);
        }
        if let Some(query) = self.search.as_deref() {
            list = search(list, query);
        }
        sort_miners(&mut list, self.sort_by, self.order);
        paginate(list, self.page, self.limit)
    }
}

/// 按工作进程ID精确匹配
pub fn filter_by_worker(miners: Vec<MinerView>, worker: &str) -> Vec<MinerView> {
    let worker = worker.trim();
    miners
        .into_iter()
        .filter(|m| m.worker_id.to_string() == worker)
        .collect()
}

/// 不区分大小写的子串搜索
pub fn search(miners: Vec<MinerView>, query: &str) -> Vec<MinerView> {
    let needle = query.trim().to_lowercase();
    if needle.is_empty() {
        return miners;
    }
    miners
        .into_iter()
        .filter(|m| haystack(m).contains(&needle))
        .collect()
}

fn haystack(miner: &MinerView) -> String {
    let record = &miner.record;
    format!(
        "{} {} {} {} {}",
        miner.miner_key,
        record.miner_id,
        record.ip,
        record.worker_name.as_deref().unwrap_or(""),
        record.software.as_deref().unwrap_or("")
    )
    .to_lowercase()
}

/// 排序，相同主键时按 minerKey 字典序，方向与主键一致
pub fn sort_miners(miners: &mut [MinerView], key: SortKey, order: SortOrder) {
    miners.sort_by(|a, b| {
        let ordering = key
            .value(a)
            .partial_cmp(&key.value(b))
            .unwrap_or(Ordering::Equal)
            .then_with(|| a.miner_key.cmp(&b.miner_key));
        match order {
            SortOrder::Asc => ordering,
            SortOrder::Desc => ordering.reverse(),
        }
    });
}

/// 分页，limit 限制在 [1, 1000]，page 限制在 [1, pages]
pub fn paginate<T>(items: Vec<T>, page: i64, limit: i64) -> Page<T> {
    let limit = limit.clamp(1, MAX_PAGE_LIMIT) as usize;
    let total = items.len();
    let pages = total.div_ceil(limit).max(1);
    let page = (page.max(1) as u64).min(pages as u64) as usize;

    let start = (page - 1) * limit;
    let items: Vec<T> = items.into_iter().skip(start).take(limit).collect();

    Page {
        total,
        pages,
        page,
        limit,
        items,
    }
}

/// 歧义响应里列出的候选
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MinerMatch {
    pub miner_key: String,
    pub worker_id: WorkerId,
    pub miner_id: String,
    pub ip: String,
}

impl From<&MinerView> for MinerMatch {
    fn from(view: &MinerView) -> Self {
        Self {
            miner_key: view.miner_key.clone(),
            worker_id: view.worker_id,
            miner_id: view.record.miner_id.clone(),
            ip: view.record.ip.clone(),
        }
    }
}

/// 按ID查找的结果
#[derive(Debug, Clone, PartialEq)]
pub enum MinerLookup {
    Found(MinerView),
    Ambiguous(Vec<MinerView>),
    NotFound,
}

/// 解析矿工ID
///
/// 支持三种格式：
/// - `<workerId>:<minerId>` (推荐)
/// - `<workerId>-<minerId>` (旧格式)
/// - 只有 `<minerId>`，多个工作进程上存在同名矿工时返回歧义
pub fn find_miner(miners: &[MinerView], id: &str) -> MinerLookup {
    let qualified = id.split_once(':').or_else(|| id.split_once('-'));

    if let Some((worker, miner_id)) = qualified {
        return miners
            .iter()
            .find(|m| m.worker_id.to_string() == worker && m.record.miner_id == miner_id)
            .cloned()
            .map_or(MinerLookup::NotFound, MinerLookup::Found);
    }

    let mut matches: Vec<MinerView> = miners
        .iter()
        .filter(|m| m.record.miner_id == id)
        .cloned()
        .collect();

    match matches.len() {
        0 => MinerLookup::NotFound,
        1 => MinerLookup::Found(matches.remove(0)),
        _ => MinerLookup::Ambiguous(matches),
    }
}
