//! 基于子进程的工作进程启动器
//!
//! 重新执行当前程序的 `worker` 子命令，通过 stdin/stdout 交换按行分隔的 JSON 消息。

use crate::config::Args;
use crate::error::{SendError, SupervisorError};
use crate::supervisor::{WorkerEvent, WorkerLauncher, WorkerLink};
use async_trait::async_trait;
use std::ffi::OsString;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};
use vprox_core::{decode_line, encode_line, MasterMessage, WorkerId, WorkerMessage};

/// 每个工作进程最多排队的待发消息数，超出时直接丢弃
pub const SEND_QUEUE_CAPACITY: usize = 64;

/// 子进程启动器
#[derive(Debug, Clone)]
pub struct ProcessLauncher {
    program: PathBuf,
    args: Vec<OsString>,
}

impl ProcessLauncher {
    pub fn new(program: impl Into<PathBuf>, args: Vec<OsString>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }

    /// 以 `worker` 子命令重新执行当前程序，带上主进程的配置和日志参数
    pub fn current_exe(args: &Args) -> Result<Self, SupervisorError> {
        let program = std::env::current_exe().map_err(|e| SupervisorError::SpawnFailed {
            error: format!("cannot locate current executable: {}", e),
        })?;
        Ok(Self::new(program, worker_args(args)))
    }
}

/// 工作进程的命令行参数
pub fn worker_args(args: &Args) -> Vec<OsString> {
    let mut argv: Vec<OsString> = vec!["--config".into(), args.config.clone().into()];
    if let Some(level) = &args.log_level {
        argv.push("--log-level".into());
        argv.push(level.into());
    }
    if let Some(file) = &args.log_file {
        argv.push("--log-file".into());
        argv.push(file.clone().into_os_string());
    }
    argv.push("worker".into());
    argv
}

#[async_trait]
impl WorkerLauncher for ProcessLauncher {
    async fn launch(
        &self,
        events: mpsc::UnboundedSender<WorkerEvent>,
    ) -> Result<Arc<dyn WorkerLink>, SupervisorError> {
        let mut child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| SupervisorError::SpawnFailed { error: e.to_string() })?;

        let worker = WorkerId(child.id().ok_or(SupervisorError::MissingPid)?);
        let stdin = child
            .stdin
            .take()
            .ok_or(SupervisorError::PipeUnavailable { pipe: "stdin" })?;
        let stdout = child
            .stdout
            .take()
            .ok_or(SupervisorError::PipeUnavailable { pipe: "stdout" })?;

        let connected = Arc::new(AtomicBool::new(true));
        let (lines_tx, lines_rx) = mpsc::channel(SEND_QUEUE_CAPACITY);
        let (kill_tx, kill_rx) = oneshot::channel();

        tokio::spawn(write_lines(worker, stdin, lines_rx, connected.clone()));
        tokio::spawn(read_messages(worker, stdout, events.clone()));
        tokio::spawn(wait_for_exit(worker, child, kill_rx, connected.clone(), events));

        Ok(Arc::new(ProcessLink {
            id: worker,
            connected,
            lines: lines_tx,
            kill: Mutex::new(Some(kill_tx)),
        }))
    }
}

/// 子进程连接
#[derive(Debug)]
pub struct ProcessLink {
    id: WorkerId,
    connected: Arc<AtomicBool>,
    lines: mpsc::Sender<String>,
    kill: Mutex<Option<oneshot::Sender<()>>>,
}

impl WorkerLink for ProcessLink {
    fn id(&self) -> WorkerId {
        self.id
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    fn send(&self, message: &MasterMessage) -> Result<(), SendError> {
        if !self.is_connected() {
            return Err(SendError::Disconnected { worker: self.id });
        }
        let line = encode_line(message).map_err(|e| SendError::Encode {
            worker: self.id,
            error: e.to_string(),
        })?;
        self.lines.try_send(line).map_err(|e| match e {
            TrySendError::Full(_) => SendError::Full { worker: self.id },
            TrySendError::Closed(_) => SendError::Disconnected { worker: self.id },
        })
    }

    fn terminate(&self) {
        if let Ok(mut kill) = self.kill.lock() {
            if let Some(tx) = kill.take() {
                let _ = tx.send(());
            }
        }
    }
}

async fn write_lines(
    worker: WorkerId,
    mut stdin: ChildStdin,
    mut lines: mpsc::Receiver<String>,
    connected: Arc<AtomicBool>,
) {
    while let Some(line) = lines.recv().await {
        let written = async {
            stdin.write_all(line.as_bytes()).await?;
            stdin.flush().await
        }
        .await;

        if let Err(e) = written {
            debug!("Worker {} stdin closed: {}", worker, e);
            connected.store(false, Ordering::Release);
            break;
        }
    }
}

async fn read_messages(
    worker: WorkerId,
    stdout: ChildStdout,
    events: mpsc::UnboundedSender<WorkerEvent>,
) {
    let mut lines = BufReader::new(stdout).lines();
    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(e) => {
                debug!("Worker {} stdout read failed: {}", worker, e);
                break;
            }
        };

        if line.trim().is_empty() {
            continue;
        }

        match decode_line::<WorkerMessage>(&line) {
            Ok(message) => {
                if events.send(WorkerEvent::Message { worker, message }).is_err() {
                    break;
                }
            }
            Err(e) => debug!("Dropping message from worker {}: {}", worker, e),
        }
    }
}

async fn wait_for_exit(
    worker: WorkerId,
    mut child: Child,
    kill: oneshot::Receiver<()>,
    connected: Arc<AtomicBool>,
    events: mpsc::UnboundedSender<WorkerEvent>,
) {
    let status = tokio::select! {
        status = child.wait() => status,
        _ = kill => {
            if let Err(e) = child.start_kill() {
                warn!("Failed to kill worker {}: {}", worker, e);
            }
            child.wait().await
        }
    };

    connected.store(false, Ordering::Release);
    let code = status.ok().and_then(|status| status.code());
    let _ = events.send(WorkerEvent::Exited { worker, code });
}
