use crate::commands::AppState;
use crate::server::ServerStatus;

// ==================== 配置分发服务 ====================

/// 启动服务，返回配置订阅地址
pub async fn start_proxy_server(state: &AppState) -> Result<String, String> {
    let settings = state.settings();
    let addr = state
        .server
        .start(&settings.server.host, settings.server.port)
        .await
        .map_err(|e| e.to_string())?;
    Ok(format!("http://{}/config", addr))
}

/// 停止服务
pub async fn stop_proxy_server(state: &AppState) -> Result<(), String> {
    state.server.stop().await.map_err(|e| e.to_string())
}

/// 获取服务状态
pub async fn get_server_status(state: &AppState) -> Result<ServerStatus, String> {
    Ok(state.server.status().await)
}
