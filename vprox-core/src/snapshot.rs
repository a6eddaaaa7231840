//! 工作进程快照

use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;

/// 工作进程标识（操作系统进程号）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WorkerId(pub u32);

impl fmt::Display for WorkerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u32> for WorkerId {
    fn from(pid: u32) -> Self {
        Self(pid)
    }
}

/// 矿工记录 - 一个已连接的矿机
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MinerRecord {
    /// 工作进程内唯一的矿工ID
    #[serde(deserialize_with = "string_or_number")]
    pub miner_id: String,
    /// mining.authorize 授权的名字，可能带 "钱包地址." 前缀
    #[serde(default)]
    pub worker_name: Option<String>,
    #[serde(default)]
    pub ip: String,
    /// 客户端上报的软件标识
    #[serde(default)]
    pub software: Option<String>,
    #[serde(default)]
    pub submitted: u64,
    #[serde(default)]
    pub accepted: u64,
    #[serde(default)]
    pub rejected: u64,
    #[serde(default)]
    pub submit_latency_ms_sum: f64,
    #[serde(default)]
    pub submit_latency_count: u64,
    /// 毫秒时间戳
    #[serde(default)]
    pub connected_at: Option<i64>,
    /// 毫秒时间戳
    #[serde(default)]
    pub last_seen_at: Option<i64>,
    #[serde(default = "default_connected")]
    pub connected: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uptime_sec: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avg_submit_latency_ms: Option<f64>,
}

fn default_connected() -> bool {
    true
}

fn string_or_number<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Text(String),
        Int(i64),
        Float(f64),
    }

    Ok(match Raw::deserialize(deserializer)? {
        Raw::Text(s) => s,
        Raw::Int(n) => n.to_string(),
        Raw::Float(f) => f.to_string(),
    })
}

impl MinerRecord {
    /// 创建新的矿工记录
    pub fn new(miner_id: impl Into<String>, ip: impl Into<String>) -> Self {
        Self {
            miner_id: miner_id.into(),
            worker_name: None,
            ip: ip.into(),
            software: None,
            submitted: 0,
            accepted: 0,
            rejected: 0,
            submit_latency_ms_sum: 0.0,
            submit_latency_count: 0,
            connected_at: None,
            last_seen_at: None,
            connected: true,
            uptime_sec: None,
            avg_submit_latency_ms: None,
        }
    }

    /// 参与平均延迟计算的样本 (sum, count)
    ///
    /// 计数和总和都必须非零，还没有提交过份额的矿工不影响平均值。
    pub fn latency_sample(&self) -> Option<(f64, u64)> {
        let sum = self.submit_latency_ms_sum;
        if self.submit_latency_count > 0 && sum.is_finite() && sum != 0.0 {
            Some((sum, self.submit_latency_count))
        } else {
            None
        }
    }

    /// 平均提交延迟 (ms)，优先使用工作进程上报的值
    pub fn avg_latency_ms(&self) -> f64 {
        if let Some(avg) = self.avg_submit_latency_ms.filter(|v| v.is_finite()) {
            return avg;
        }
        if self.submit_latency_count > 0 && self.submit_latency_ms_sum.is_finite() {
            self.submit_latency_ms_sum / self.submit_latency_count as f64
        } else {
            0.0
        }
    }

    /// 已判定的份额数 (accepted + rejected)
    pub fn decided(&self) -> u64 {
        self.accepted.saturating_add(self.rejected)
    }
}

/// 上游矿池描述
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolDescriptor {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub host: String,
    #[serde(default)]
    pub port: u16,
}

impl PoolDescriptor {
    pub fn new(name: impl Into<String>, host: impl Into<String>, port: u16) -> Self {
        Self {
            name: name.into(),
            host: host.into(),
            port,
        }
    }
}

/// 工作进程看到的上游矿池状态
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PoolState {
    /// 0 为主矿池，大于 0 为备用矿池
    pub active_pool_index: usize,
    #[serde(default)]
    pub active_pool: Option<PoolDescriptor>,
    #[serde(default)]
    pub pools: Vec<PoolDescriptor>,
}

impl PoolState {
    /// 以给定索引为活跃矿池构建状态，索引越界时返回 None
    pub fn select(pools: Vec<PoolDescriptor>, index: usize) -> Option<Self> {
        let active = pools.get(index)?.clone();
        Some(Self {
            active_pool_index: index,
            active_pool: Some(active),
            pools,
        })
    }

    /// 是否运行在备用矿池上
    pub fn is_failover(&self) -> bool {
        self.active_pool_index != 0
    }

    /// 用于展示的活跃矿池名称
    pub fn active_name(&self) -> String {
        match &self.active_pool {
            Some(pool) if !pool.name.is_empty() => pool.name.clone(),
            _ => format!("#{}", self.active_pool_index),
        }
    }
}

/// 工作进程快照 - 同一工作进程的新快照整体替换旧快照
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkerSnapshot {
    /// 该工作进程当前跟踪的矿工数
    #[serde(default)]
    pub total: u64,
    #[serde(default)]
    pub active: Vec<MinerRecord>,
    #[serde(default)]
    pub pool_state: Option<PoolState>,
    /// 毫秒时间戳
    #[serde(default)]
    pub updated_at: Option<i64>,
}
