//! 数值强制转换
//!
//! 部分数据可能不完整，所有对外输出的数值都先经过这里，保证始终是有限数。

/// 非有限值 (NaN / ±Inf) 映射为 0
pub fn finite_or_zero(value: f64) -> f64 {
    if value.is_finite() {
        value
    } else {
        0.0
    }
}

/// 四舍五入的平均值，count 为 0 时返回 0
pub fn rounded_mean(sum: f64, count: u64) -> u64 {
    if count == 0 {
        return 0;
    }
    let mean = finite_or_zero(sum / count as f64);
    if mean <= 0.0 {
        0
    } else {
        mean.round() as u64
    }
}

/// 解析十进制整数参数，失败时返回默认值
pub fn parse_int_or(raw: Option<&str>, default: i64) -> i64 {
    raw.and_then(|s| s.trim().parse::<i64>().ok())
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_finite_or_zero() {
        assert_eq!(finite_or_zero(12.5), 12.5);
        assert_eq!(finite_or_zero(f64::NAN), 0.0);
        assert_eq!(finite_or_zero(f64::INFINITY), 0.0);
        assert_eq!(finite_or_zero(f64::NEG_INFINITY), 0.0);
    }

    #[test]
    fn test_rounded_mean() {
        assert_eq!(rounded_mean(0.0, 0), 0);
        assert_eq!(rounded_mean(100.0, 3), 33);
        assert_eq!(rounded_mean(101.0, 2), 51);
    }

    #[test]
    fn test_parse_int_or() {
        assert_eq!(parse_int_or(Some("25"), 1), 25);
        assert_eq!(parse_int_or(Some(" 3 "), 1), 3);
        assert_eq!(parse_int_or(Some("abc"), 1), 1);
        assert_eq!(parse_int_or(None, 100), 100);
        assert_eq!(parse_int_or(Some("-4"), 1), -4);
    }
}
