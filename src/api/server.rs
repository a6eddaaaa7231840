use crate::api::{create_routes, AppState};
use crate::error::ApiError;
use std::net::SocketAddr;
use tokio::net::TcpListener;
use tokio::sync::RwLock;
use tracing::{error, info, warn};

/// 对外公布的接口列表
pub const ENDPOINTS: &[&str] = &[
    "GET /health",
    "GET /status",
    "GET /miners",
    "GET /miners/:id",
    "GET /alerts",
    "POST /pool/switch",
    "GET /metrics",
    "GET /ui/",
];

/// API 服务器
pub struct ApiServer {
    bind_address: String,
    port: u16,
    state: AppState,
    /// 实际监听地址（端口为 0 时由系统分配）
    local_addr: RwLock<Option<SocketAddr>>,
    /// 服务器句柄
    server_handle: RwLock<Option<tokio::task::JoinHandle<()>>>,
    /// 运行状态
    running: std::sync::Arc<RwLock<bool>>,
}

impl ApiServer {
    /// 创建新的 API 服务器
    pub fn new(bind_address: impl Into<String>, port: u16, state: AppState) -> Self {
        Self {
            bind_address: bind_address.into(),
            port,
            state,
            local_addr: RwLock::new(None),
            server_handle: RwLock::new(None),
            running: std::sync::Arc::new(RwLock::new(false)),
        }
    }

    /// 启动 API 服务器
    pub async fn start(&self) -> Result<SocketAddr, ApiError> {
        if *self.running.read().await {
            warn!("API server is already running");
            if let Some(addr) = *self.local_addr.read().await {
                return Ok(addr);
            }
        }

        let app = create_routes(self.state.clone());

        let listener = TcpListener::bind((self.bind_address.as_str(), self.port))
            .await
            .map_err(|e| ApiError::ServerStartFailed {
                error: format!("Failed to bind to {}: {}", self.get_address(), e),
            })?;
        let addr = listener.local_addr().map_err(|e| ApiError::ServerStartFailed {
            error: format!("Failed to read local address: {}", e),
        })?;

        let running = self.running.clone();
        *running.write().await = true;

        // 在后台运行服务器
        let handle = tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, app).await {
                error!("API server error: {}", e);
            }
            *running.write().await = false;
        });

        *self.server_handle.write().await = Some(handle);
        *self.local_addr.write().await = Some(addr);

        info!("HTTP status listening on http://{}", addr);
        for endpoint in ENDPOINTS {
            info!("  {}", endpoint);
        }
        Ok(addr)
    }

    /// 停止 API 服务器
    pub async fn stop(&self) {
        if let Some(handle) = self.server_handle.write().await.take() {
            handle.abort();
        }
        *self.running.write().await = false;
        info!("API server stopped");
    }

    /// 检查服务器是否在运行
    pub async fn is_running(&self) -> bool {
        *self.running.read().await
    }

    /// 配置的监听地址
    pub fn get_address(&self) -> String {
        format!("{}:{}", self.bind_address, self.port)
    }
}
