//! 统计聚合器
//!
//! 把所有存活工作进程的快照合并成一个全局视图。纯函数：不做 I/O，不修改输入。

use crate::utils::rounded_mean;
use serde::Serialize;
use std::collections::HashSet;
use vprox_core::{MinerRecord, PoolState, WorkerId, WorkerSnapshot};

/// 工作进程快照表
///
/// 按工作进程首次上报的顺序迭代；同一进程的新快照原地替换旧快照。
#[derive(Debug, Clone, Default)]
pub struct SnapshotTable {
    entries: Vec<(WorkerId, WorkerSnapshot)>,
}

impl SnapshotTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// 存入快照，替换同一工作进程之前的快照
    pub fn upsert(&mut self, worker: WorkerId, snapshot: WorkerSnapshot) {
        match self.entries.iter_mut().find(|(id, _)| *id == worker) {
            Some((_, slot)) => *slot = snapshot,
            None => self.entries.push((worker, snapshot)),
        }
    }

    pub fn remove(&mut self, worker: WorkerId) -> Option<WorkerSnapshot> {
        let position = self.entries.iter().position(|(id, _)| *id == worker)?;
        Some(self.entries.remove(position).1)
    }

    pub fn get(&self, worker: WorkerId) -> Option<&WorkerSnapshot> {
        self.entries
            .iter()
            .find(|(id, _)| *id == worker)
            .map(|(_, snapshot)| snapshot)
    }

    pub fn iter(&self) -> impl Iterator<Item = (WorkerId, &WorkerSnapshot)> {
        self.entries.iter().map(|(id, snapshot)| (*id, snapshot))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// 全局汇总
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Totals {
    pub miners: u64,
    pub submitted: u64,
    pub accepted: u64,
    pub rejected: u64,
    pub avg_submit_latency_ms: u64,
    /// 不同 workerName 的数量
    pub mining_workers: u64,
}

/// 每个工作进程一行
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkerSummary {
    pub worker_id: WorkerId,
    pub miners: u64,
    pub submitted: u64,
    pub accepted: u64,
    pub rejected: u64,
    pub avg_submit_latency_ms: u64,
    pub updated_at: Option<i64>,
    pub snapshot: WorkerSnapshot,
}

/// 矿工视图 - 带来源工作进程和全局唯一键的矿工记录
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MinerView {
    pub worker_id: WorkerId,
    /// `<workerId>:<minerId>`
    pub miner_key: String,
    #[serde(flatten)]
    pub record: MinerRecord,
}

impl MinerView {
    pub fn new(worker_id: WorkerId, record: MinerRecord) -> Self {
        Self {
            miner_key: miner_key(worker_id, &record.miner_id),
            worker_id,
            record,
        }
    }
}

pub fn miner_key(worker_id: WorkerId, miner_id: &str) -> String {
    format!("{}:{}", worker_id, miner_id)
}

/// 聚合快照 - 每次查询重新计算
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AggregateSnapshot {
    pub totals: Totals,
    pub workers: Vec<WorkerSummary>,
    pub miners: Vec<MinerView>,
    pub pool_state: Option<PoolState>,
}

#[derive(Debug, Default)]
struct Rollup {
    submitted: u64,
    accepted: u64,
    rejected: u64,
    latency_sum: f64,
    latency_count: u64,
}

impl Rollup {
    fn add(&mut self, miner: &MinerRecord) {
        self.submitted = self.submitted.saturating_add(miner.submitted);
        self.accepted = self.accepted.saturating_add(miner.accepted);
        self.rejected = self.rejected.saturating_add(miner.rejected);
        if let Some((sum, count)) = miner.latency_sample() {
            self.latency_sum += sum;
            self.latency_count = self.latency_count.saturating_add(count);
        }
    }

    fn merge(&mut self, other: &Rollup) {
        self.submitted = self.submitted.saturating_add(other.submitted);
        self.accepted = self.accepted.saturating_add(other.accepted);
        self.rejected = self.rejected.saturating_add(other.rejected);
        self.latency_sum += other.latency_sum;
        self.latency_count = self.latency_count.saturating_add(other.latency_count);
    }

    fn avg_latency_ms(&self) -> u64 {
        rounded_mean(self.latency_sum, self.latency_count)
    }
}

/// 合并所有工作进程快照
pub fn aggregate(table: &SnapshotTable) -> AggregateSnapshot {
    let mut global = Rollup::default();
    let mut miners_total: u64 = 0;
    let mut worker_names: HashSet<&str> = HashSet::new();
    let mut workers = Vec::with_capacity(table.len());
    let mut miners = Vec::new();
    let mut pool_state: Option<PoolState> = None;

    for (worker_id, snapshot) in table.iter() {
        let mut rollup = Rollup::default();
        for miner in &snapshot.active {
            rollup.add(miner);
            if let Some(name) = miner.worker_name.as_deref().filter(|n| !n.is_empty()) {
                worker_names.insert(name);
            }
        }

        workers.push(WorkerSummary {
            worker_id,
            miners: snapshot.total,
            submitted: rollup.submitted,
            accepted: rollup.accepted,
            rejected: rollup.rejected,
            avg_submit_latency_ms: rollup.avg_latency_ms(),
            updated_at: snapshot.updated_at,
            snapshot: snapshot.clone(),
        });

        global.merge(&rollup);
        miners_total = miners_total.saturating_add(snapshot.total);

        // 第一个非空的矿池状态即可，不做跨进程合并
        if pool_state.is_none() {
            pool_state = snapshot.pool_state.clone();
        }

        miners.extend(
            snapshot
                .active
                .iter()
                .map(|record| MinerView::new(worker_id, record.clone())),
        );
    }

    AggregateSnapshot {
        totals: Totals {
            miners: miners_total,
            submitted: global.submitted,
            accepted: global.accepted,
            rejected: global.rejected,
            avg_submit_latency_ms: global.avg_latency_ms(),
            mining_workers: worker_names.len() as u64,
        },
        workers,
        miners,
        pool_state,
    }
}
