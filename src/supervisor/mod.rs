//! 工作进程管理
//!
//! 维持固定数量的工作进程，接收它们推送的快照，进程退出后立即补齐。

pub mod process;

use crate::error::{SendError, SupervisorError};
use crate::monitoring::SnapshotTable;
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use vprox_core::{MasterMessage, WorkerId, WorkerMessage};

pub use process::{ProcessLauncher, ProcessLink};

/// 启动失败后的重试间隔
pub const RESPAWN_DELAY: Duration = Duration::from_secs(1);

/// 工作进程事件
#[derive(Debug, Clone, PartialEq)]
pub enum WorkerEvent {
    /// 收到一条工作进程消息
    Message { worker: WorkerId, message: WorkerMessage },
    /// 工作进程退出
    Exited { worker: WorkerId, code: Option<i32> },
    /// 重新尝试补齐进程数
    Respawn,
}

/// 与单个工作进程的连接
#[cfg_attr(test, mockall::automock)]
pub trait WorkerLink: Send + Sync {
    fn id(&self) -> WorkerId;

    fn is_connected(&self) -> bool;

    /// 非阻塞发送，失败不影响其他工作进程
    fn send(&self, message: &MasterMessage) -> Result<(), SendError>;

    /// 请求终止进程，退出事件随后通过事件通道送达
    fn terminate(&self);
}

/// 工作进程启动器
#[async_trait]
pub trait WorkerLauncher: Send + Sync {
    async fn launch(
        &self,
        events: mpsc::UnboundedSender<WorkerEvent>,
    ) -> Result<Arc<dyn WorkerLink>, SupervisorError>;
}

/// 一次广播的结果
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BroadcastReport {
    pub delivered: usize,
    /// 未连接的工作进程
    pub skipped: usize,
    pub failed: usize,
}

/// 工作进程管理器
pub struct WorkerSupervisor {
    launcher: Arc<dyn WorkerLauncher>,
    /// 目标进程数
    target: usize,
    links: RwLock<BTreeMap<WorkerId, Arc<dyn WorkerLink>>>,
    snapshots: Arc<RwLock<SnapshotTable>>,
    events_tx: mpsc::UnboundedSender<WorkerEvent>,
    events_rx: Mutex<Option<mpsc::UnboundedReceiver<WorkerEvent>>>,
    event_loop_handle: Mutex<Option<JoinHandle<()>>>,
    running: RwLock<bool>,
}

impl WorkerSupervisor {
    pub fn new(
        launcher: Arc<dyn WorkerLauncher>,
        target: usize,
        snapshots: Arc<RwLock<SnapshotTable>>,
    ) -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        Self {
            launcher,
            target: target.max(1),
            links: RwLock::new(BTreeMap::new()),
            snapshots,
            events_tx,
            events_rx: Mutex::new(Some(events_rx)),
            event_loop_handle: Mutex::new(None),
            running: RwLock::new(false),
        }
    }

    /// 启动全部工作进程和事件循环
    pub async fn start(self: &Arc<Self>) -> Result<(), SupervisorError> {
        let mut events_rx = self
            .events_rx
            .lock()
            .await
            .take()
            .ok_or(SupervisorError::AlreadyStarted)?;

        *self.running.write().await = true;
        info!("Starting {} workers", self.target);

        for _ in 0..self.target {
            self.spawn().await;
        }

        let supervisor = Arc::clone(self);
        let handle = tokio::spawn(async move {
            while let Some(event) = events_rx.recv().await {
                supervisor.handle_event(event).await;
            }
        });
        *self.event_loop_handle.lock().await = Some(handle);

        Ok(())
    }

    /// 启动一个工作进程，失败时延迟重试
    pub async fn spawn(&self) -> Option<WorkerId> {
        match self.launcher.launch(self.events_tx.clone()).await {
            Ok(link) => {
                let worker = link.id();
                self.links.write().await.insert(worker, link);
                crate::worker_info!(worker, "Worker {} started", worker);
                Some(worker)
            }
            Err(e) => {
                error!("Failed to start worker: {}", e);
                let events = self.events_tx.clone();
                tokio::spawn(async move {
                    tokio::time::sleep(RESPAWN_DELAY).await;
                    let _ = events.send(WorkerEvent::Respawn);
                });
                None
            }
        }
    }

    /// 处理一个工作进程事件
    pub async fn handle_event(&self, event: WorkerEvent) {
        match event {
            WorkerEvent::Message { worker, message } => self.handle_message(worker, message).await,
            WorkerEvent::Exited { worker, code } => {
                self.snapshots.write().await.remove(worker);
                self.links.write().await.remove(&worker);

                if !*self.running.read().await {
                    debug!("Worker {} exited during shutdown (code {:?})", worker, code);
                    return;
                }

                crate::worker_warn!(worker, "worker {} died, forking again (exit code {:?})", worker, code);
                self.fill_to_target().await;
            }
            WorkerEvent::Respawn => {
                if *self.running.read().await {
                    self.fill_to_target().await;
                }
            }
        }
    }

    async fn handle_message(&self, worker: WorkerId, message: WorkerMessage) {
        // 已退出的进程可能还有在途消息
        if !self.links.read().await.contains_key(&worker) {
            debug!("Dropping message from unknown worker {}", worker);
            return;
        }

        match message {
            WorkerMessage::StatsUpdate { snapshot } => {
                self.snapshots.write().await.upsert(worker, snapshot);
            }
            WorkerMessage::PoolSwitchAck { result } => {
                if result.ok {
                    info!(
                        "Worker {} switched pool to index {:?}",
                        worker, result.active_pool_index
                    );
                } else {
                    warn!(
                        "Worker {} failed to switch pool: {}",
                        worker,
                        result.error.as_deref().unwrap_or("unknown error")
                    );
                }
            }
        }
    }

    async fn fill_to_target(&self) {
        let missing = self.target.saturating_sub(self.links.read().await.len());
        for _ in 0..missing {
            if self.spawn().await.is_none() {
                break;
            }
        }
    }

    /// 尽力广播，跳过未连接的工作进程，单个发送失败只记录日志
    pub async fn broadcast(&self, message: &MasterMessage) -> BroadcastReport {
        let links: Vec<Arc<dyn WorkerLink>> = self.links.read().await.values().cloned().collect();
        let mut report = BroadcastReport::default();

        for link in links {
            if !link.is_connected() {
                report.skipped += 1;
                continue;
            }
            match link.send(message) {
                Ok(()) => report.delivered += 1,
                Err(e) => {
                    debug!("Broadcast to worker {} failed: {}", link.id(), e);
                    report.failed += 1;
                }
            }
        }

        report
    }

    /// 当前存活的工作进程
    pub async fn worker_ids(&self) -> Vec<WorkerId> {
        self.links.read().await.keys().copied().collect()
    }

    pub fn target(&self) -> usize {
        self.target
    }

    pub async fn is_running(&self) -> bool {
        *self.running.read().await
    }

    /// 停止补齐并终止所有工作进程
    pub async fn shutdown(&self) {
        *self.running.write().await = false;

        let links: Vec<Arc<dyn WorkerLink>> = self.links.read().await.values().cloned().collect();
        info!("Stopping {} workers", links.len());
        for link in links {
            link.terminate();
        }

        if let Some(handle) = self.event_loop_handle.lock().await.take() {
            handle.abort();
        }
    }
}
