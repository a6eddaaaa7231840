use crate::utils::now_ms;
use std::sync::atomic::{AtomicUsize, Ordering};
use vprox_core::{
    MiningListener, PoolDescriptor, PoolState, PoolSwitchResult, PoolSwitchTarget, WorkerSnapshot,
};

/// 矿池监听器
///
/// 持有配置的上游矿池列表和当前活跃索引，负责手动切换。矿工连接由
/// Stratum 引擎通过同一个接口填充，这里快照中的矿工列表为空。
#[derive(Debug)]
pub struct PoolListener {
    pools: Vec<PoolDescriptor>,
    active: AtomicUsize,
}

impl PoolListener {
    pub fn new(pools: Vec<PoolDescriptor>) -> Self {
        Self {
            pools,
            active: AtomicUsize::new(0),
        }
    }

    pub fn active_index(&self) -> usize {
        self.active.load(Ordering::Acquire)
    }

    /// 名称优先（区分大小写），其次索引
    fn resolve(&self, target: &PoolSwitchTarget) -> Result<usize, &'static str> {
        if let Some(name) = target.name.as_deref().filter(|name| !name.is_empty()) {
            return self
                .pools
                .iter()
                .position(|pool| pool.name == name)
                .ok_or("unknown_pool");
        }
        match target.index {
            Some(index) if index < self.pools.len() => Ok(index),
            Some(_) => Err("unknown_pool"),
            None => Err("no_target"),
        }
    }
}

impl MiningListener for PoolListener {
    fn snapshot(&self) -> WorkerSnapshot {
        WorkerSnapshot {
            total: 0,
            active: Vec::new(),
            pool_state: PoolState::select(self.pools.clone(), self.active_index()),
            updated_at: Some(now_ms()),
        }
    }

    fn switch_pool(&self, target: &PoolSwitchTarget) -> PoolSwitchResult {
        match self.resolve(target) {
            Ok(index) => {
                self.active.store(index, Ordering::Release);
                let pool = self.pools[index].clone();
                crate::pool_info!(
                    "Switched upstream pool to {} ({}:{}), reason: {}",
                    pool.name, pool.host, pool.port, target.reason
                );
                PoolSwitchResult::switched(index, pool)
            }
            Err(error) => PoolSwitchResult::failed(error),
        }
    }
}
