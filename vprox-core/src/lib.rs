//! VProx Core - 主进程与工作进程之间的共享契约
//!
//! 这个库定义了工作进程上报的快照结构、主从进程之间的消息类型，
//! 以及工作进程内挖矿监听器必须实现的接口。

pub mod codec;
pub mod error;
pub mod listener;
pub mod message;
pub mod snapshot;

// 重新导出常用类型
pub use codec::{decode_line, encode_line};
pub use error::CodecError;
pub use listener::MiningListener;
pub use message::{MasterMessage, PoolSwitchResult, PoolSwitchTarget, WorkerMessage};
pub use snapshot::{MinerRecord, PoolDescriptor, PoolState, WorkerId, WorkerSnapshot};

/// 库版本
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
