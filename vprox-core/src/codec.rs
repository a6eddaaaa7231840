//! 换行分隔的 JSON 消息编解码
//!
//! 每条消息占一行，主进程通过子进程的 stdin/stdout 收发。

use crate::error::CodecError;
use serde::{de::DeserializeOwned, Serialize};

/// 编码为一行（带结尾换行符）
pub fn encode_line<T: Serialize>(message: &T) -> Result<String, CodecError> {
    let mut line = serde_json::to_string(message).map_err(CodecError::Encode)?;
    line.push('\n');
    Ok(line)
}

/// 解码一行
pub fn decode_line<T: DeserializeOwned>(line: &str) -> Result<T, CodecError> {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return Err(CodecError::Empty);
    }

    serde_json::from_str(trimmed).map_err(|e| CodecError::Decode {
        line: trimmed.chars().take(200).collect(),
        error: e.to_string(),
    })
}
