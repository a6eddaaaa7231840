use std::time::Instant;

/// 当前 Unix 毫秒时间戳
pub fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// 进程运行时间
#[derive(Debug, Clone, Copy)]
pub struct Uptime {
    started_at: Instant,
}

impl Uptime {
    pub fn start() -> Self {
        Self {
            started_at: Instant::now(),
        }
    }

    /// 整秒数（向下取整）
    pub fn as_secs(&self) -> u64 {
        self.started_at.elapsed().as_secs()
    }
}

impl Default for Uptime {
    fn default() -> Self {
        Self::start()
    }
}
