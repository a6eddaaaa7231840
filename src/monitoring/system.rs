use crate::config::AlertConfig;
use crate::monitoring::aggregator::{aggregate, AggregateSnapshot, SnapshotTable};
use crate::monitoring::alerts::{Alert, AlertManager};
use crate::utils::Uptime;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tracing::debug;

/// 监控系统
///
/// 持有进程内的快照表和告警表。快照表由工作进程管理器写入，
/// 告警表只在评估时修改，两者都在一次加锁内完成修改。
pub struct MonitoringSystem {
    /// 工作进程快照
    snapshots: Arc<RwLock<SnapshotTable>>,
    /// 告警管理器
    alert_manager: Arc<Mutex<AlertManager>>,
    /// 主进程启动时间
    uptime: Uptime,
}

impl MonitoringSystem {
    pub fn new(alert_config: AlertConfig) -> Self {
        Self {
            snapshots: Arc::new(RwLock::new(SnapshotTable::new())),
            alert_manager: Arc::new(Mutex::new(AlertManager::new(alert_config))),
            uptime: Uptime::start(),
        }
    }

    /// 共享给工作进程管理器的快照表
    pub fn snapshots(&self) -> Arc<RwLock<SnapshotTable>> {
        self.snapshots.clone()
    }

    /// 合并当前缓存的快照
    pub async fn aggregate(&self) -> AggregateSnapshot {
        let table = self.snapshots.read().await;
        aggregate(&table)
    }

    /// 合并快照并重新评估告警
    ///
    /// 先拿告警锁再聚合，评估顺序与快照读取顺序一致，旧快照不会覆盖新结果。
    pub async fn aggregate_and_evaluate(&self) -> AggregateSnapshot {
        let mut alerts = self.alert_manager.lock().await;
        let agg = self.aggregate().await;
        alerts.evaluate(&agg);
        debug!(
            "Evaluated alerts over {} miners, {} active",
            agg.miners.len(),
            alerts.active_count()
        );
        agg
    }

    /// 告警列表，按 updatedAt 降序
    pub async fn alerts(&self, include_resolved: bool) -> Vec<Alert> {
        self.alert_manager.lock().await.list(include_resolved)
    }

    pub async fn active_alert_count(&self) -> usize {
        self.alert_manager.lock().await.active_count()
    }

    pub async fn worker_count(&self) -> usize {
        self.snapshots.read().await.len()
    }

    pub fn uptime_sec(&self) -> u64 {
        self.uptime.as_secs()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vprox_core::{MinerRecord, WorkerId, WorkerSnapshot};

    #[tokio::test]
    async fn test_monitoring_system_evaluates_alerts() {
        let monitoring = MonitoringSystem::new(AlertConfig::default());

        let mut offline = MinerRecord::new("1", "10.0.0.9");
        offline.connected = false;
        monitoring.snapshots().write().await.upsert(
            WorkerId(7),
            WorkerSnapshot {
                total: 1,
                active: vec![offline],
                pool_state: None,
                updated_at: None,
            },
        );

        // 只聚合不评估
        let agg = monitoring.aggregate().await;
        assert_eq!(agg.totals.miners, 1);
        assert!(monitoring.alerts(true).await.is_empty());

        monitoring.aggregate_and_evaluate().await;
        let alerts = monitoring.alerts(false).await;
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].id, "miner_offline:7:1");
        assert_eq!(monitoring.active_alert_count().await, 1);
        assert_eq!(monitoring.worker_count().await, 1);
    }

    fn snapshot(connected: bool) -> WorkerSnapshot {
        let mut miner = MinerRecord::new("1", "10.0.0.9");
        miner.connected = connected;
        WorkerSnapshot {
            total: 1,
            active: vec![miner],
            pool_state: None,
            updated_at: None,
        }
    }

    #[tokio::test]
    async fn test_evaluation_reads_snapshot_after_taking_alert_lock() {
        let monitoring = Arc::new(MonitoringSystem::new(AlertConfig::default()));
        monitoring.snapshots().write().await.upsert(WorkerId(7), snapshot(false));

        // 另一个评估正在进行
        let guard = monitoring.alert_manager.lock().await;

        let pending = {
            let monitoring = monitoring.clone();
            tokio::spawn(async move { monitoring.aggregate_and_evaluate().await })
        };
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;

        // 等待期间矿工重新连上
        monitoring.snapshots().write().await.upsert(WorkerId(7), snapshot(true));
        drop(guard);

        let agg = pending.await.unwrap();
        assert!(agg.miners[0].record.connected);
        assert_eq!(monitoring.active_alert_count().await, 0);
    }
}
