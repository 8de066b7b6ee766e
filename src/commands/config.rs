use crate::commands::AppState;
use crate::config::{ConfigBuilder, PatchEngine};
use crate::error::HangarError;
use crate::models::{ConfigVersion, DiffLine, Patch, VersionOrigin};
use crate::rules::builtin_rules;

// ==================== 配置生成与补丁 ====================

/// 重新合并订阅与规则源，内容变化时保存为新版本
pub async fn rebuild_config(state: &AppState) -> Result<ConfigVersion, String> {
    let settings = state.settings();
    let mut builder = ConfigBuilder::new(settings.profile.clone());
    if let Some(path) = &settings.profile.base_template {
        let template = ConfigBuilder::load_template(std::path::Path::new(path))
            .map_err(|e| e.to_string())?;
        builder = builder.with_template(template);
    }
    if settings.builtin_rules {
        builder = builder.with_builtin_rules(builtin_rules());
    }

    let rule_sets = state
        .rule_cache()
        .map_err(|e| e.to_string())?
        .load_all(&settings.enabled_rule_urls());
    let document = builder
        .build(&state.subscriptions.list(), &rule_sets)
        .map_err(|e| e.to_string())?;

    let (version, _) = state
        .versions
        .snapshot_if_changed(&document, "rebuilt from subscriptions", VersionOrigin::Build)
        .map_err(|e| e.to_string())?;
    Ok(version)
}

/// 应用补丁并保存为新版本
///
/// `base_version` 为调用方看到的版本，期间配置被修改则拒绝。
pub async fn apply_patch(
    state: &AppState,
    patch: Patch,
    base_version: Option<String>,
) -> Result<ConfigVersion, String> {
    commit_patch(state, &patch, base_version.as_deref()).map_err(|e| e.to_string())
}

pub(crate) fn commit_patch(
    state: &AppState,
    patch: &Patch,
    base_version: Option<&str>,
) -> Result<ConfigVersion, HangarError> {
    let description = if patch.description.trim().is_empty() {
        format!("applied {} operations", patch.operations.len())
    } else {
        patch.description.clone()
    };

    let version = state
        .versions
        .commit(base_version, &description, VersionOrigin::Patch, |document| {
            PatchEngine::apply(document, patch).map_err(HangarError::from)
        })?;
    state.notify_info("Patch applied", &format!("{} ({})", description, version.id));
    Ok(version)
}

// ==================== 版本管理 ====================

/// 获取所有版本（最新在前）
pub async fn list_versions(state: &AppState) -> Result<Vec<ConfigVersion>, String> {
    Ok(state.versions.list())
}

/// 获取版本内容
pub async fn get_version_content(state: &AppState, id: String) -> Result<String, String> {
    state.versions.content(&id).map_err(|e| e.to_string())
}

/// 比较两个版本；未指定第二个版本时与当前版本比较
pub async fn get_versions_diff(
    state: &AppState,
    id1: String,
    id2: Option<String>,
) -> Result<Vec<DiffLine>, String> {
    let id2 = match id2 {
        Some(id) => id,
        None => state
            .versions
            .active_id()
            .ok_or_else(|| HangarError::NoActiveDocument.to_string())?,
    };
    state.versions.diff(&id1, &id2).map_err(|e| e.to_string())
}

/// 回滚到指定版本
pub async fn rollback_version(state: &AppState, id: String) -> Result<ConfigVersion, String> {
    let version = state.versions.rollback(&id).map_err(|e| e.to_string())?;
    state.notify_info(
        "Configuration rolled back",
        &format!("restored from {} as {}", id, version.id),
    );
    Ok(version)
}

/// 删除版本
pub async fn delete_version(state: &AppState, id: String) -> Result<(), String> {
    state.versions.delete(&id).map_err(|e| e.to_string())
}

/// 手动保存当前配置为新版本
pub async fn create_manual_snapshot(
    state: &AppState,
    description: String,
) -> Result<ConfigVersion, String> {
    let current = state
        .versions
        .current()
        .ok_or_else(|| HangarError::NoActiveDocument.to_string())?;
    let description = if description.trim().is_empty() {
        "manual snapshot".to_string()
    } else {
        description
    };
    state
        .versions
        .snapshot(&current.document, &description, VersionOrigin::Manual)
        .map_err(|e| e.to_string())
}
