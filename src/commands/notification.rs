use crate::commands::AppState;
use crate::models::Notification;

// ==================== 通知 ====================

/// 获取通知（最新在前）
pub async fn get_notifications(state: &AppState) -> Result<Vec<Notification>, String> {
    Ok(state.notifications.list())
}

/// 标记通知为已读
pub async fn mark_notification_read(state: &AppState, id: String) -> Result<(), String> {
    state.notifications.mark_read(&id).map_err(|e| e.to_string())
}

/// 清空通知
pub async fn clear_notifications(state: &AppState) -> Result<(), String> {
    state.notifications.clear_all();
    Ok(())
}
