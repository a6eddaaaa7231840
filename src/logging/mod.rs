//! 日志系统
//!
//! 控制台输出加可选的 JSON 文件输出。工作进程的 stdout 是消息通道，
//! 所以工作进程的控制台日志写到 stderr。

use crate::config::{LogRotation, LoggingConfig};
use crate::error::ProxyError;
use std::path::{Path, PathBuf};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::{non_blocking, rolling};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

/// 日志配置
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// 日志级别，RUST_LOG 优先
    pub level: String,
    /// 日志文件路径
    pub file: Option<PathBuf>,
    /// 日志轮转配置
    pub rotation: LogRotation,
    /// 控制台日志写到 stderr
    pub to_stderr: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            file: None,
            rotation: LogRotation::Daily,
            to_stderr: false,
        }
    }
}

impl From<&LoggingConfig> for LogConfig {
    fn from(config: &LoggingConfig) -> Self {
        Self {
            level: config.level.clone(),
            file: config.file.clone(),
            rotation: config.rotation,
            to_stderr: false,
        }
    }
}

/// 初始化日志系统
///
/// 返回的 guard 必须持有到进程退出，否则文件日志会丢失。
pub fn init_logging(config: LogConfig) -> Result<Option<WorkerGuard>, ProxyError> {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(config.level.to_lowercase()))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let registry = tracing_subscriber::registry().with(env_filter);

    // 控制台输出层
    let console_layer = if config.to_stderr {
        fmt::layer()
            .with_writer(std::io::stderr)
            .with_ansi(false)
            .with_target(false)
            .boxed()
    } else {
        fmt::layer().with_target(false).boxed()
    };

    // 文件输出层
    let Some(file_path) = config.file else {
        registry
            .with(console_layer)
            .try_init()
            .map_err(|e| ProxyError::System(format!("Failed to initialize logging: {}", e)))?;
        return Ok(None);
    };

    let directory = file_path
        .parent()
        .filter(|dir| !dir.as_os_str().is_empty())
        .unwrap_or(Path::new("."));
    let file_name = file_path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("vprox.log");

    let (writer, guard) = match config.rotation {
        LogRotation::Never => {
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(&file_path)
                .map_err(|e| ProxyError::System(format!("Failed to open log file: {}", e)))?;
            non_blocking(file)
        }
        LogRotation::Hourly => non_blocking(rolling::hourly(directory, file_name)),
        LogRotation::Daily => non_blocking(rolling::daily(directory, file_name)),
    };

    let file_layer = fmt::layer()
        .with_writer(writer)
        .with_ansi(false)
        .with_target(true)
        .with_thread_ids(true)
        .json();

    registry
        .with(console_layer)
        .with(file_layer)
        .try_init()
        .map_err(|e| ProxyError::System(format!("Failed to initialize logging: {}", e)))?;

    Ok(Some(guard))
}

/// 工作进程生命周期日志
#[macro_export]
macro_rules! worker_info {
    ($worker:expr, $($arg:tt)*) => {
        tracing::info!(target: "supervisor", worker_id = %$worker, $($arg)*)
    };
}

#[macro_export]
macro_rules! worker_warn {
    ($worker:expr, $($arg:tt)*) => {
        tracing::warn!(target: "supervisor", worker_id = %$worker, $($arg)*)
    };
}

/// 矿池切换日志
#[macro_export]
macro_rules! pool_info {
    ($($arg:tt)*) => {
        tracing::info!(target: "pool", $($arg)*)
    };
}
