use crate::monitoring::miners::MinerMatch;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use thiserror::Error;
use vprox_core::WorkerId;

#[derive(Error, Debug)]
pub enum ProxyError {
    #[error("Codec error: {0}")]
    Codec(#[from] vprox_core::CodecError),

    #[error("System error: {0}")]
    System(String),
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Parse error: {error}")]
    ParseError { error: String },

    #[error("Validation error: {field}, reason: {reason}")]
    ValidationError { field: String, reason: String },
}

#[derive(Error, Debug)]
pub enum SupervisorError {
    #[error("Worker spawn failed: {error}")]
    SpawnFailed { error: String },

    #[error("Worker exited before reporting a process id")]
    MissingPid,

    #[error("Worker pipe unavailable: {pipe}")]
    PipeUnavailable { pipe: &'static str },

    #[error("Supervisor already started")]
    AlreadyStarted,
}

/// 向单个工作进程发送消息失败 - 非致命，调用方自行决定是否记录
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SendError {
    #[error("Worker {worker} is not connected")]
    Disconnected { worker: WorkerId },

    /// 发送队列已满，工作进程没有在读 stdin
    #[error("Send queue for worker {worker} is full")]
    Full { worker: WorkerId },

    #[error("Failed to encode message for worker {worker}: {error}")]
    Encode { worker: WorkerId, error: String },
}

#[derive(Error, Debug)]
pub enum ApiError {
    #[error("Server start failed: {error}")]
    ServerStartFailed { error: String },

    #[error("Resource not found")]
    NotFound,

    #[error("Miner not found: {id}")]
    MinerNotFound { id: String },

    #[error("Ambiguous miner id: {id}")]
    AmbiguousMiner { id: String, matches: Vec<MinerMatch> },

    #[error("Internal server error: {error}")]
    InternalError { error: String },
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            ApiError::NotFound => (
                StatusCode::NOT_FOUND,
                Json(serde_json::json!({ "error": "not_found" })),
            )
                .into_response(),
            ApiError::MinerNotFound { .. } => (
                StatusCode::NOT_FOUND,
                Json(serde_json::json!({ "error": "miner_not_found" })),
            )
                .into_response(),
            ApiError::AmbiguousMiner { matches, .. } => (
                StatusCode::CONFLICT,
                Json(serde_json::json!({
                    "error": "ambiguous_miner_id",
                    "message": "Miner ID matches multiple workers. Use minerKey format '<workerId>:<minerId>'.",
                    "matches": matches,
                })),
            )
                .into_response(),
            ApiError::ServerStartFailed { error } | ApiError::InternalError { error } => {
                tracing::error!("Request failed: {}", error);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Json(serde_json::json!({ "error": "internal_error" })),
                )
                    .into_response()
            }
        }
    }
}
