use thiserror::Error;

/// 消息编解码错误
#[derive(Error, Debug)]
pub enum CodecError {
    #[error("Encode error: {0}")]
    Encode(#[source] serde_json::Error),

    #[error("Decode error: {error}, line: {line}")]
    Decode { line: String, error: String },

    #[error("Empty line")]
    Empty,
}
