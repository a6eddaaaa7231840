//! vprox - 多进程 Stratum 挖矿代理的主控面
//!
//! 主进程不处理矿工连接，只负责：
//! - 维持固定数量的工作进程，退出后自动补齐
//! - 合并工作进程推送的快照
//! - 带迟滞和保留期的告警
//! - HTTP 状态接口和 Prometheus 指标
//!
//! ## 进程模型
//!
//! 工作进程由主进程以 `worker` 子命令重新执行当前程序启动，
//! 通过 stdin/stdout 交换按行分隔的 JSON 消息。消息格式定义在 `vprox-core` 中。

pub mod api;
pub mod config;
pub mod error;
pub mod logging;
pub mod monitoring;
pub mod supervisor;
pub mod utils;
pub mod worker;

pub use config::Config;
pub use error::ProxyError;
pub use monitoring::MonitoringSystem;
pub use supervisor::WorkerSupervisor;

/// 程序版本
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// 程序名称
pub const NAME: &str = "vprox";
