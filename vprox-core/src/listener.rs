use crate::message::{PoolSwitchResult, PoolSwitchTarget};
use crate::snapshot::WorkerSnapshot;

/// 挖矿监听器 - 工作进程内负责矿工连接和上游矿池的组件
///
/// 主进程只通过这两个操作与它交互：读取当前内存状态、请求切换矿池。
pub trait MiningListener: Send + Sync {
    /// 当前快照，不能阻塞
    fn snapshot(&self) -> WorkerSnapshot;

    /// 尽力切换上游矿池，结果原样转发给主进程
    fn switch_pool(&self, target: &PoolSwitchTarget) -> PoolSwitchResult;
}
