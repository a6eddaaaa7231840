//! 实用工具模块
//!
//! 数值强制转换和时间戳等通用函数

pub mod number;
pub mod time;

// 重新导出常用函数
pub use number::{finite_or_zero, parse_int_or, rounded_mean};
pub use time::{now_ms, Uptime};
