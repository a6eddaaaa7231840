//! 监控模块
//!
//! 快照聚合、告警评估、矿工查询和 Prometheus 指标导出。

pub mod aggregator;
pub mod alerts;
pub mod metrics;
pub mod miners;
pub mod system;

pub use aggregator::{aggregate, AggregateSnapshot, MinerView, SnapshotTable, Totals, WorkerSummary};
pub use alerts::{Alert, AlertLevel, AlertManager, AlertType};
pub use metrics::render_prometheus;
pub use miners::{find_miner, paginate, MinerLookup, MinerMatch, MinerQuery, Page, SortKey, SortOrder};
pub use system::MonitoringSystem;
