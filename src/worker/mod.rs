//! 工作进程运行时
//!
//! 从 stdin 读取主进程命令，向 stdout 写快照和确认消息。stdout 专用于消息通道，
//! 日志只写 stderr。

pub mod listener;

use crate::error::ProxyError;
use crate::utils::now_ms;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tokio::time::{interval_at, Instant, Interval, MissedTickBehavior};
use tracing::{debug, info, warn};
use vprox_core::{decode_line, encode_line, MasterMessage, MiningListener, WorkerMessage};

pub use listener::PoolListener;

/// 工作进程运行时
pub struct WorkerRuntime {
    listener: Arc<dyn MiningListener>,
    /// 定时推送间隔，None 表示只在请求时推送
    push_interval: Option<Duration>,
}

impl WorkerRuntime {
    pub fn new(listener: Arc<dyn MiningListener>, push_interval_ms: u64) -> Self {
        Self {
            listener,
            push_interval: (push_interval_ms > 0).then(|| Duration::from_millis(push_interval_ms)),
        }
    }

    /// 运行直到主进程关闭输入
    pub async fn run<R, W>(&self, input: R, mut output: W) -> Result<(), ProxyError>
    where
        R: AsyncBufRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let mut lines = input.lines();
        let mut ticker = self.push_interval.map(|period| {
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            ticker
        });

        loop {
            tokio::select! {
                line = lines.next_line() => {
                    match line {
                        Ok(Some(line)) => self.handle_line(&line, &mut output).await?,
                        Ok(None) => {
                            info!("Master closed the channel, worker exiting");
                            return Ok(());
                        }
                        Err(e) => {
                            return Err(ProxyError::System(format!("failed to read from master: {}", e)));
                        }
                    }
                }
                _ = next_tick(&mut ticker) => self.push_snapshot(&mut output).await?,
            }
        }
    }

    async fn handle_line<W>(&self, line: &str, output: &mut W) -> Result<(), ProxyError>
    where
        W: AsyncWrite + Unpin,
    {
        if line.trim().is_empty() {
            return Ok(());
        }

        let message = match decode_line::<MasterMessage>(line) {
            Ok(message) => message,
            Err(e) => {
                debug!("Ignoring message from master: {}", e);
                return Ok(());
            }
        };

        match message {
            MasterMessage::StatsRequest => self.push_snapshot(output).await,
            MasterMessage::PoolSwitch { target } => {
                info!(
                    "Pool switch requested (name: {:?}, index: {:?}, reason: {})",
                    target.name, target.index, target.reason
                );
                let result = self.listener.switch_pool(&target);
                if !result.ok {
                    warn!(
                        "Pool switch failed: {}",
                        result.error.as_deref().unwrap_or("unknown error")
                    );
                }
                self.push_snapshot(output).await?;
                write_message(output, &WorkerMessage::PoolSwitchAck { result }).await
            }
        }
    }

    async fn push_snapshot<W>(&self, output: &mut W) -> Result<(), ProxyError>
    where
        W: AsyncWrite + Unpin,
    {
        let mut snapshot = self.listener.snapshot();
        snapshot.updated_at.get_or_insert_with(now_ms);
        write_message(output, &WorkerMessage::StatsUpdate { snapshot }).await
    }
}

async fn next_tick(ticker: &mut Option<Interval>) {
    match ticker {
        Some(ticker) => {
            ticker.tick().await;
        }
        None => std::future::pending::<()>().await,
    }
}

async fn write_message<W>(output: &mut W, message: &WorkerMessage) -> Result<(), ProxyError>
where
    W: AsyncWrite + Unpin,
{
    let line = encode_line(message)?;
    output
        .write_all(line.as_bytes())
        .await
        .map_err(|e| ProxyError::System(format!("failed to write to master: {}", e)))?;
    output
        .flush()
        .await
        .map_err(|e| ProxyError::System(format!("failed to write to master: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{duplex, AsyncReadExt, BufReader};
    use vprox_core::{PoolDescriptor, PoolSwitchTarget};

    fn listener() -> Arc<dyn MiningListener> {
        Arc::new(PoolListener::new(vec![
            PoolDescriptor::new("primary", "na.example.com", 3956),
            PoolDescriptor::new("backup", "eu.example.com", 3956),
        ]))
    }

    async fn run_with_input(input: String) -> Vec<WorkerMessage> {
        let runtime = WorkerRuntime::new(listener(), 0);
        let (out_tx, mut out_rx) = duplex(64 * 1024);

        runtime
            .run(BufReader::new(input.as_bytes()), out_tx)
            .await
            .unwrap();

        let mut written = String::new();
        out_rx.read_to_string(&mut written).await.unwrap();
        written
            .lines()
            .map(|line| decode_line::<WorkerMessage>(line).unwrap())
            .collect()
    }

    #[tokio::test]
    async fn test_stats_request_pushes_snapshot() {
        let input = encode_line(&MasterMessage::StatsRequest).unwrap();
        let messages = run_with_input(input).await;

        assert_eq!(messages.len(), 1);
        match &messages[0] {
            WorkerMessage::StatsUpdate { snapshot } => {
                assert_eq!(snapshot.pool_state.as_ref().unwrap().active_pool_index, 0);
                assert!(snapshot.updated_at.is_some());
            }
            other => panic!("unexpected message {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_pool_switch_pushes_snapshot_then_ack() {
        let target = PoolSwitchTarget::manual(Some("backup".to_string()), None);
        let mut input = encode_line(&MasterMessage::PoolSwitch { target }).unwrap();
        input.push_str("not json\n\n");

        let messages = run_with_input(input).await;
        assert_eq!(messages.len(), 2);

        match &messages[0] {
            WorkerMessage::StatsUpdate { snapshot } => {
                assert_eq!(snapshot.pool_state.as_ref().unwrap().active_pool_index, 1);
            }
            other => panic!("unexpected message {:?}", other),
        }
        match &messages[1] {
            WorkerMessage::PoolSwitchAck { result } => {
                assert!(result.ok);
                assert_eq!(result.active_pool_index, Some(1));
            }
            other => panic!("unexpected message {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_periodic_push() {
        let runtime = WorkerRuntime::new(listener(), 10);
        let (_in_tx, in_rx) = duplex(1024);
        let (out_tx, out_rx) = duplex(64 * 1024);

        let handle = tokio::spawn(async move {
            let _ = runtime.run(BufReader::new(in_rx), out_tx).await;
        });

        let mut lines = BufReader::new(out_rx).lines();
        let first = lines.next_line().await.unwrap().unwrap();
        assert!(matches!(
            decode_line::<WorkerMessage>(&first).unwrap(),
            WorkerMessage::StatsUpdate { .. }
        ));

        handle.abort();
    }
}
