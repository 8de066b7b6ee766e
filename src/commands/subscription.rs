use std::path::Path;

use crate::commands::{AppState, BatchOutcome};
use crate::models::Subscription;

// ==================== 订阅管理 ====================

/// 获取所有订阅
pub async fn get_subscriptions(state: &AppState) -> Result<Vec<Subscription>, String> {
    Ok(state.subscriptions.list())
}

/// 添加订阅
pub async fn add_subscription(
    state: &AppState,
    name: String,
    url: String,
) -> Result<Subscription, String> {
    state.subscriptions.add(&name, &url).map_err(|e| e.to_string())
}

/// 更新订阅
pub async fn update_subscription(
    state: &AppState,
    id: String,
    name: String,
    url: String,
    enabled: bool,
) -> Result<Subscription, String> {
    state
        .subscriptions
        .update(&id, &name, &url, enabled)
        .map_err(|e| e.to_string())
}

/// 删除订阅
pub async fn delete_subscription(state: &AppState, id: String) -> Result<(), String> {
    state.subscriptions.delete(&id).map_err(|e| e.to_string())
}

/// 刷新单个订阅，失败时记录错误通知
pub async fn refresh_subscription(state: &AppState, id: String) -> Result<Subscription, String> {
    let fetcher = state.fetcher().map_err(|e| e.to_string())?;
    match fetcher.refresh(&state.subscriptions, &id).await {
        Ok(sub) => Ok(sub),
        Err(e) => {
            let name = state
                .subscriptions
                .get(&id)
                .map(|s| s.name)
                .unwrap_or_else(|_| id.clone());
            state.notify_error("Subscription refresh failed", &format!("{}: {}", name, e));
            Err(e.to_string())
        }
    }
}

/// 并发刷新所有启用的订阅
pub async fn refresh_all_subscriptions(state: &AppState) -> Result<Vec<BatchOutcome>, String> {
    let fetcher = state.fetcher().map_err(|e| e.to_string())?;
    let ids: Vec<String> = state
        .subscriptions
        .list()
        .into_iter()
        .filter(|s| s.enabled)
        .map(|s| s.id)
        .collect();

    let outcomes = fetcher.refresh_many(&state.subscriptions, &ids).await;
    let mut report = Vec::with_capacity(outcomes.len());
    for (id, result) in outcomes {
        if let Err(e) = &result {
            let name = state
                .subscriptions
                .get(&id)
                .map(|s| s.name)
                .unwrap_or_else(|_| id.clone());
            state.notify_error("Subscription refresh failed", &format!("{}: {}", name, e));
        }
        report.push(BatchOutcome::from_result(id, &result));
    }
    Ok(report)
}

/// 批量启用/停用订阅
pub async fn batch_toggle_subscriptions(
    state: &AppState,
    ids: Vec<String>,
    enabled: bool,
) -> Result<Vec<BatchOutcome>, String> {
    let outcomes = state
        .subscriptions
        .set_enabled(&ids, enabled)
        .map_err(|e| e.to_string())?;
    Ok(outcomes
        .into_iter()
        .map(|(id, result)| BatchOutcome::from_result(id, &result))
        .collect())
}

/// 批量删除订阅
pub async fn batch_delete_subscriptions(
    state: &AppState,
    ids: Vec<String>,
) -> Result<Vec<BatchOutcome>, String> {
    let outcomes = state.subscriptions.delete_many(&ids).map_err(|e| e.to_string())?;
    Ok(outcomes
        .into_iter()
        .map(|(id, result)| BatchOutcome::from_result(id, &result))
        .collect())
}

/// 导出订阅列表
pub async fn export_subscriptions(state: &AppState, path: String) -> Result<usize, String> {
    state
        .subscriptions
        .export(Path::new(&path))
        .map_err(|e| e.to_string())
}

/// 导入订阅列表，返回导入后的完整列表
pub async fn import_subscriptions(
    state: &AppState,
    path: String,
) -> Result<Vec<Subscription>, String> {
    state
        .subscriptions
        .import(Path::new(&path))
        .map_err(|e| e.to_string())?;
    Ok(state.subscriptions.list())
}
