//! 主进程与工作进程之间的消息
//!
//! 两个方向各自是一个封闭的标签联合，JSON 中以 `type` 字段区分。

use crate::snapshot::{PoolDescriptor, WorkerSnapshot};
use serde::{Deserialize, Serialize};

/// 主进程 -> 工作进程
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MasterMessage {
    /// 请求立即推送快照
    StatsRequest,
    /// 请求切换上游矿池
    PoolSwitch { target: PoolSwitchTarget },
}

/// 工作进程 -> 主进程
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WorkerMessage {
    /// 工作进程当前快照（不含 workerId，由主进程根据进程身份补上）
    StatsUpdate {
        #[serde(default)]
        snapshot: WorkerSnapshot,
    },
    /// 切换确认，仅用于观测
    PoolSwitchAck { result: PoolSwitchResult },
}

/// 切换目标
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolSwitchTarget {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub index: Option<usize>,
    #[serde(default)]
    pub reason: String,
}

impl PoolSwitchTarget {
    /// 控制面板发起的手动切换
    pub fn manual(name: Option<String>, index: Option<usize>) -> Self {
        Self {
            name,
            index,
            reason: "manual-ui".to_string(),
        }
    }
}

/// 切换结果
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PoolSwitchResult {
    pub ok: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub active_pool_index: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub active_pool: Option<PoolDescriptor>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl PoolSwitchResult {
    pub fn switched(index: usize, pool: PoolDescriptor) -> Self {
        Self {
            ok: true,
            active_pool_index: Some(index),
            active_pool: Some(pool),
            error: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            ok: false,
            active_pool_index: None,
            active_pool: None,
            error: Some(error.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stats_update_wire_shape() {
        let msg: WorkerMessage = serde_json::from_str(
            r#"{"type":"stats_update","snapshot":{"total":1,"active":[{"minerId":"3","ip":"1.2.3.4","submitted":5}]}}"#,
        )
        .unwrap();

        match msg {
            WorkerMessage::StatsUpdate { snapshot } => {
                assert_eq!(snapshot.total, 1);
                assert_eq!(snapshot.active[0].miner_id, "3");
                assert_eq!(snapshot.active[0].submitted, 5);
            }
            other => panic!("unexpected message: {:?}", other),
        }
    }

    #[test]
    fn test_manual_target_omits_missing_fields() {
        let target = PoolSwitchTarget::manual(Some("backup".to_string()), None);
        let json = serde_json::to_value(&target).unwrap();
        assert_eq!(json, serde_json::json!({"name": "backup", "reason": "manual-ui"}));
    }
}
