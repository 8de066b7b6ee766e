use std::sync::PoisonError;

use crate::commands::AppState;
use crate::models::HangarConfig;

// ==================== 应用设置 ====================

/// 获取应用设置
pub async fn get_hangar_config(state: &AppState) -> Result<HangarConfig, String> {
    Ok(state.settings())
}

/// 校验并保存应用设置
pub async fn save_hangar_config(state: &AppState, config: HangarConfig) -> Result<(), String> {
    state.config_manager.save(&config).map_err(|e| e.to_string())?;
    *state.settings.write().unwrap_or_else(PoisonError::into_inner) = config;
    log::info!("Settings updated");
    Ok(())
}
