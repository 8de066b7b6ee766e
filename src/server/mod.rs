use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::State,
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use serde::Serialize;
use tokio::sync::{oneshot, Mutex};
use tokio::task::JoinHandle;

use crate::error::{HangarError, Result};
use crate::version::VersionStore;

/// 服务状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "lowercase")]
pub enum ServerStatus {
    Running { addr: SocketAddr },
    Stopped,
}

struct RunningServer {
    addr: SocketAddr,
    shutdown: oneshot::Sender<()>,
    handle: JoinHandle<()>,
}

/// 本地配置分发服务
///
/// `GET /config` 每次请求都读取当前版本，`GET /health` 用于探活。
pub struct ProxyServer {
    versions: Arc<VersionStore>,
    running: Mutex<Option<RunningServer>>,
}

impl ProxyServer {
    pub fn new(versions: Arc<VersionStore>) -> Self {
        Self {
            versions,
            running: Mutex::new(None),
        }
    }

    /// 构建路由
    pub fn router(versions: Arc<VersionStore>) -> Router {
        Router::new()
            .route("/config", get(get_config))
            .route("/health", get(health_check))
            .with_state(versions)
    }

    /// 启动服务，返回实际监听地址（端口为 0 时由系统分配）
    pub async fn start(&self, host: &str, port: u16) -> Result<SocketAddr> {
        let mut running = self.running.lock().await;
        if let Some(server) = running.as_ref() {
            if !server.handle.is_finished() {
                return Err(HangarError::AlreadyRunning(server.addr));
            }
            log::warn!("Previous server task on {} has exited", server.addr);
        }

        let bind_addr = format!("{}:{}", host, port);
        let listener = tokio::net::TcpListener::bind(&bind_addr)
            .await
            .map_err(|e| HangarError::Bind {
                addr: bind_addr.clone(),
                message: e.to_string(),
            })?;
        let addr = listener.local_addr()?;

        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        let app = Self::router(self.versions.clone());
        let handle = tokio::spawn(async move {
            let result = axum::serve(listener, app)
                .with_graceful_shutdown(async move {
                    let _ = shutdown_rx.await;
                    log::info!("Shutdown signal received, stopping config server");
                })
                .await;
            match result {
                Ok(()) => log::info!("Config server on {} stopped", addr),
                Err(e) => log::error!("Config server on {} failed: {}", addr, e),
            }
        });

        *running = Some(RunningServer {
            addr,
            shutdown: shutdown_tx,
            handle,
        });
        log::info!("Config server listening on http://{}/config", addr);
        Ok(addr)
    }

    /// 停止服务
    pub async fn stop(&self) -> Result<()> {
        let server = self.running.lock().await.take().ok_or(HangarError::NotRunning)?;
        if server.handle.is_finished() {
            return Err(HangarError::NotRunning);
        }

        let _ = server.shutdown.send(());
        if tokio::time::timeout(Duration::from_secs(5), server.handle).await.is_err() {
            log::warn!("Config server on {} did not stop within 5s", server.addr);
        }
        Ok(())
    }

    /// 当前状态；任务意外退出时视为已停止
    pub async fn status(&self) -> ServerStatus {
        match self.running.lock().await.as_ref() {
            Some(server) if !server.handle.is_finished() => {
                ServerStatus::Running { addr: server.addr }
            }
            _ => ServerStatus::Stopped,
        }
    }
}

/// 返回当前版本的配置
async fn get_config(State(versions): State<Arc<VersionStore>>) -> Response {
    match versions.current() {
        Some(active) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/yaml; charset=utf-8")],
            active.yaml.clone(),
        )
            .into_response(),
        None => (
            StatusCode::SERVICE_UNAVAILABLE,
            "no active configuration, refresh subscriptions and build first",
        )
            .into_response(),
    }
}

/// 健康检查
async fn health_check() -> &'static str {
    "OK"
}
