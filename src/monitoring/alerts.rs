use crate::config::AlertConfig;
use crate::monitoring::aggregator::AggregateSnapshot;
use crate::utils::now_ms;
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use tracing::{debug, info};

/// 矿池故障转移告警的固定ID
pub const POOL_FAILOVER_ID: &str = "pool_failover";

/// 告警类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertType {
    /// 运行在备用矿池上
    PoolFailover,
    /// 矿工断开或长时间无活动
    MinerOffline,
    /// 矿工拒绝率过高
    HighReject,
}

impl AlertType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertType::PoolFailover => "pool_failover",
            AlertType::MinerOffline => "miner_offline",
            AlertType::HighReject => "high_reject",
        }
    }

    /// 按矿工生成的告警类型
    pub fn is_per_miner(&self) -> bool {
        matches!(self, AlertType::MinerOffline | AlertType::HighReject)
    }
}

/// 告警严重程度，目前所有规则都是 warn
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertLevel {
    Warn,
}

/// 告警
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Alert {
    pub id: String,
    #[serde(rename = "type")]
    pub alert_type: AlertType,
    pub level: AlertLevel,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub miner_key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reject_rate: Option<f64>,
    pub active: bool,
    /// 首次激活时间，重新激活时保留
    pub created_at: i64,
    pub updated_at: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resolved_at: Option<i64>,
}

/// 一次评估中产生的告警内容
#[derive(Debug, Clone)]
pub struct AlertDraft {
    pub alert_type: AlertType,
    pub level: AlertLevel,
    pub message: String,
    pub miner_key: Option<String>,
    pub reject_rate: Option<f64>,
}

impl AlertDraft {
    fn pool_failover(pool_name: &str) -> Self {
        Self {
            alert_type: AlertType::PoolFailover,
            level: AlertLevel::Warn,
            message: format!("Failover active: running on {}", pool_name),
            miner_key: None,
            reject_rate: None,
        }
    }

    fn miner_offline(key: &str) -> Self {
        Self {
            alert_type: AlertType::MinerOffline,
            level: AlertLevel::Warn,
            message: format!("Miner offline: {}", key),
            miner_key: Some(key.to_string()),
            reject_rate: None,
        }
    }

    fn high_reject(key: &str, rate: f64) -> Self {
        Self {
            alert_type: AlertType::HighReject,
            level: AlertLevel::Warn,
            message: format!("High reject rate ({}%): {}", (rate * 100.0).round(), key),
            miner_key: Some(key.to_string()),
            reject_rate: Some(rate),
        }
    }

    /// 告警ID由类型和主体决定
    fn id(&self) -> String {
        match &self.miner_key {
            Some(key) => format!("{}:{}", self.alert_type.as_str(), key),
            None => self.alert_type.as_str().to_string(),
        }
    }
}

/// 告警管理器
///
/// 进程内唯一的告警表，只通过自身方法修改。每次评估基于同一份聚合快照
/// 判断触发和解除条件，已解除的告警保留一段时间后删除。
#[derive(Debug)]
pub struct AlertManager {
    alerts: HashMap<String, Alert>,
    config: AlertConfig,
}

impl AlertManager {
    /// 创建新的告警管理器
    pub fn new(config: AlertConfig) -> Self {
        Self {
            alerts: HashMap::new(),
            config: config.normalized(),
        }
    }

    pub fn config(&self) -> &AlertConfig {
        &self.config
    }

    /// 按当前时间评估
    pub fn evaluate(&mut self, agg: &AggregateSnapshot) {
        self.evaluate_at(agg, now_ms());
    }

    /// 按给定时间 (ms) 评估一个聚合快照
    pub fn evaluate_at(&mut self, agg: &AggregateSnapshot, now: i64) {
        if !self.config.enabled {
            return;
        }

        self.prune(now);

        // 矿池故障转移
        match agg.pool_state.as_ref().filter(|state| state.is_failover()) {
            Some(state) => {
                self.upsert(AlertDraft::pool_failover(&state.active_name()), now);
            }
            None => self.resolve(POOL_FAILOVER_ID, now),
        }

        let offline_ms = self.config.offline_threshold_ms();
        let threshold = self.config.high_reject_rate.threshold;
        let min_shares = self.config.high_reject_rate.min_shares;

        let mut seen_offline: HashSet<&str> = HashSet::new();
        let mut seen_high_reject: HashSet<&str> = HashSet::new();

        for miner in &agg.miners {
            let key = miner.miner_key.as_str();
            let record = &miner.record;

            let stale = record
                .last_seen_at
                .filter(|&seen| seen > 0)
                .is_some_and(|seen| now.saturating_sub(seen) > offline_ms);
            if !record.connected || stale {
                seen_offline.insert(key);
                self.upsert(AlertDraft::miner_offline(key), now);
            }

            let decided = record.decided();
            if record.submitted >= min_shares && decided >= min_shares {
                let rate = record.rejected as f64 / decided as f64;
                if rate >= threshold {
                    seen_high_reject.insert(key);
                    self.upsert(AlertDraft::high_reject(key, rate), now);
                }
            }
        }

        // 本轮没有再次触发的矿工告警全部解除
        let stale_ids: Vec<String> = self
            .alerts
            .values()
            .filter(|alert| alert.active && alert.alert_type.is_per_miner())
            .filter(|alert| {
                let Some(key) = alert.miner_key.as_deref() else {
                    return false;
                };
                match alert.alert_type {
                    AlertType::MinerOffline => !seen_offline.contains(key),
                    AlertType::HighReject => !seen_high_reject.contains(key),
                    AlertType::PoolFailover => false,
                }
            })
            .map(|alert| alert.id.clone())
            .collect();

        for id in stale_ids {
            self.resolve(&id, now);
        }
    }

    /// 创建或刷新告警
    ///
    /// 已存在的告警保留 createdAt，包括已解除后重新激活的情况。
    pub fn upsert(&mut self, draft: AlertDraft, now: i64) -> &Alert {
        let id = draft.id();
        let created_at = match self.alerts.get(&id) {
            Some(prev) => prev.created_at,
            None => {
                info!("New alert triggered: {}", draft.message);
                now
            }
        };

        if let Some(prev) = self.alerts.get(&id).filter(|prev| !prev.active) {
            info!("Alert reactivated: {} (first seen at {})", prev.id, prev.created_at);
        }

        let alert = Alert {
            id: id.clone(),
            alert_type: draft.alert_type,
            level: draft.level,
            message: draft.message,
            miner_key: draft.miner_key,
            reject_rate: draft.reject_rate,
            active: true,
            created_at,
            updated_at: now,
            resolved_at: None,
        };

        self.alerts.insert(id.clone(), alert);
        &self.alerts[&id]
    }

    /// 解除告警，不存在或已解除时不做任何事
    pub fn resolve(&mut self, id: &str, now: i64) {
        if let Some(alert) = self.alerts.get_mut(id).filter(|alert| alert.active) {
            alert.active = false;
            alert.resolved_at = Some(now);
            alert.updated_at = now;
            info!("Alert resolved: {}", alert.message);
        }
    }

    /// 删除超过保留时间的已解除告警
    pub fn prune(&mut self, now: i64) {
        let retention_ms = self.config.retention_ms();
        let before = self.alerts.len();
        self.alerts.retain(|_, alert| {
            alert.active
                || alert
                    .resolved_at
                    .map_or(true, |resolved| now.saturating_sub(resolved) <= retention_ms)
        });

        let pruned = before - self.alerts.len();
        if pruned > 0 {
            debug!("Pruned {} resolved alerts", pruned);
        }
    }

    /// 告警列表，按 updatedAt 降序
    pub fn list(&self, include_resolved: bool) -> Vec<Alert> {
        let mut alerts: Vec<Alert> = self
            .alerts
            .values()
            .filter(|alert| include_resolved || alert.active)
            .cloned()
            .collect();
        alerts.sort_by(|a, b| b.updated_at.cmp(&a.updated_at).then_with(|| a.id.cmp(&b.id)));
        alerts
    }

    pub fn active_count(&self) -> usize {
        self.alerts.values().filter(|alert| alert.active).count()
    }

    pub fn get(&self, id: &str) -> Option<&Alert> {
        self.alerts.get(id)
    }

    pub fn len(&self) -> usize {
        self.alerts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.alerts.is_empty()
    }
}
