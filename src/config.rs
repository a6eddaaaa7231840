use crate::error::ConfigError;
use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use vprox_core::PoolDescriptor;


#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Configuration file path
    #[arg(short, long, default_value = "vprox.toml")]
    pub config: String,

    /// Log level (overrides the config file)
    #[arg(long)]
    pub log_level: Option<String>,

    /// Log file path (overrides the config file)
    #[arg(long)]
    pub log_file: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// Supervise workers and serve the status API (default)
    Master,
    /// Run as a worker process (spawned by the master)
    Worker,
}

impl Args {
    pub fn command(&self) -> Command {
        self.command.unwrap_or(Command::Master)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub threads: ThreadsSetting,
    pub status_bind: String,
    pub status_port: u16,
    /// 工作进程定时推送快照的间隔，0 表示只在请求时推送
    pub status_update_interval_ms: u64,
    /// 控制面板静态文件目录，挂载在 /ui/
    pub web_root: PathBuf,
    pub alerts: AlertConfig,
    /// 上游矿池，索引 0 为主矿池
    pub pools: Vec<PoolDescriptor>,
    pub logging: LoggingConfig,
}

/// 工作进程数量设置
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThreadsSetting {
    /// 使用全部可用并行度
    Auto,
    Count(i64),
}

impl Default for ThreadsSetting {
    fn default() -> Self {
        ThreadsSetting::Count(1)
    }
}

impl ThreadsSetting {
    /// 解析为实际的工作进程数，限制在 [1, available]
    pub fn resolve(&self, available: usize) -> usize {
        let available = available.max(1);
        match *self {
            ThreadsSetting::Auto => available,
            ThreadsSetting::Count(n) => n.clamp(1, available as i64) as usize,
        }
    }
}

impl<'de> Deserialize<'de> for ThreadsSetting {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Number(i64),
            Text(String),
        }

        Ok(match Raw::deserialize(deserializer)? {
            Raw::Number(n) => ThreadsSetting::Count(n),
            Raw::Text(s) if s.trim().eq_ignore_ascii_case("auto") => ThreadsSetting::Auto,
            Raw::Text(s) => s
                .trim()
                .parse::<i64>()
                .map(ThreadsSetting::Count)
                .unwrap_or_default(),
        })
    }
}

impl Serialize for ThreadsSetting {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match self {
            ThreadsSetting::Auto => serializer.serialize_str("auto"),
            ThreadsSetting::Count(n) => serializer.serialize_i64(*n),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AlertConfig {
    pub enabled: bool,
    pub miner_offline_seconds: u64,
    pub retain_resolved_seconds: u64,
    pub high_reject_rate: HighRejectRateConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HighRejectRateConfig {
    /// 拒绝率阈值 (0.25 = 25%)
    pub threshold: f64,
    /// 触发前需要的最少份额数
    pub min_shares: u64,
}

pub const DEFAULT_MINER_OFFLINE_SECONDS: u64 = 120;
pub const DEFAULT_RETAIN_RESOLVED_SECONDS: u64 = 300;
pub const DEFAULT_REJECT_THRESHOLD: f64 = 0.25;
pub const DEFAULT_REJECT_MIN_SHARES: u64 = 20;

impl Default for AlertConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            miner_offline_seconds: DEFAULT_MINER_OFFLINE_SECONDS,
            retain_resolved_seconds: DEFAULT_RETAIN_RESOLVED_SECONDS,
            high_reject_rate: HighRejectRateConfig::default(),
        }
    }
}

impl Default for HighRejectRateConfig {
    fn default() -> Self {
        Self {
            threshold: DEFAULT_REJECT_THRESHOLD,
            min_shares: DEFAULT_REJECT_MIN_SHARES,
        }
    }
}

impl AlertConfig {
    /// 零值回退为默认值
    pub fn normalized(mut self) -> Self {
        if self.miner_offline_seconds == 0 {
            self.miner_offline_seconds = DEFAULT_MINER_OFFLINE_SECONDS;
        }
        if self.retain_resolved_seconds == 0 {
            self.retain_resolved_seconds = DEFAULT_RETAIN_RESOLVED_SECONDS;
        }
        if self.high_reject_rate.threshold == 0.0 {
            self.high_reject_rate.threshold = DEFAULT_REJECT_THRESHOLD;
        }
        if self.high_reject_rate.min_shares == 0 {
            self.high_reject_rate.min_shares = DEFAULT_REJECT_MIN_SHARES;
        }
        self
    }

    pub fn offline_threshold_ms(&self) -> i64 {
        (self.miner_offline_seconds as i64).saturating_mul(1000)
    }

    pub fn retention_ms(&self) -> i64 {
        (self.retain_resolved_seconds as i64).saturating_mul(1000)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub file: Option<PathBuf>,
    pub rotation: LogRotation,
}

/// 日志轮转配置
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogRotation {
    Never,
    Hourly,
    Daily,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            file: None,
            rotation: LogRotation::Daily,
        }
    }
}

/// 配置来源
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigSource {
    File,
    /// 配置文件不存在
    Defaults,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            threads: ThreadsSetting::default(),
            status_bind: "0.0.0.0".to_string(),
            status_port: 8080,
            status_update_interval_ms: 2000,
            web_root: PathBuf::from("web"),
            alerts: AlertConfig::default(),
            pools: Vec::new(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Config {
    /// 加载配置文件，文件不存在时使用默认配置
    ///
    /// 日志系统依赖配置，所以这里不记录日志，由调用方根据来源补记。
    pub fn load(path: &str) -> Result<(Self, ConfigSource)> {
        if !Path::new(path).exists() {
            return Ok((Self::default(), ConfigSource::Defaults));
        }

        let config_content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path))?;

        let config = Self::from_toml(&config_content)
            .with_context(|| format!("Failed to parse config file: {}", path))?;

        Ok((config, ConfigSource::File))
    }

    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let mut config: Config = toml::from_str(content).map_err(|e| ConfigError::ParseError {
            error: e.to_string(),
        })?;
        config.alerts = config.alerts.normalized();
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.status_port == 0 {
            return Err(ConfigError::ValidationError {
                field: "status_port".to_string(),
                reason: "must be between 1 and 65535".to_string(),
            });
        }

        let threshold = self.alerts.high_reject_rate.threshold;
        if !(threshold > 0.0 && threshold <= 1.0) {
            return Err(ConfigError::ValidationError {
                field: "alerts.high_reject_rate.threshold".to_string(),
                reason: format!("{} is outside (0, 1]", threshold),
            });
        }

        // 验证矿池配置
        let mut seen = HashSet::new();
        for (index, pool) in self.pools.iter().enumerate() {
            if pool.name.trim().is_empty() {
                return Err(ConfigError::ValidationError {
                    field: format!("pools[{}].name", index),
                    reason: "must not be empty".to_string(),
                });
            }
            if pool.port == 0 {
                return Err(ConfigError::ValidationError {
                    field: format!("pools[{}].port", index),
                    reason: "must be between 1 and 65535".to_string(),
                });
            }
            if !seen.insert(pool.name.as_str()) {
                return Err(ConfigError::ValidationError {
                    field: format!("pools[{}].name", index),
                    reason: format!("duplicate pool name '{}'", pool.name),
                });
            }
        }

        Ok(())
    }

    /// 检查配置是否有效
    pub fn is_valid(&self) -> bool {
        self.validate().is_ok()
    }

    /// 实际启动的工作进程数
    pub fn worker_count(&self) -> usize {
        self.threads.resolve(num_cpus::get())
    }
}
