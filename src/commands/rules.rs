use crate::commands::{AppState, BatchOutcome};
use crate::error::HangarError;
use crate::models::RuleSource;
use crate::rules::{builtin_rules, BuiltinRule};
use crate::subscription::validate_url;

// ==================== 规则源 ====================

/// 获取内置规则集
pub async fn get_builtin_rules() -> Result<Vec<BuiltinRule>, String> {
    Ok(builtin_rules())
}

/// 获取自定义规则源
pub async fn get_rule_sources(state: &AppState) -> Result<Vec<RuleSource>, String> {
    Ok(state.settings().rule_sources)
}

/// 添加规则源
pub async fn add_rule_source(
    state: &AppState,
    name: String,
    url: String,
) -> Result<RuleSource, String> {
    let name = name.trim().to_string();
    if name.is_empty() {
        let err = HangarError::InvalidInput("rule source name must not be empty".to_string());
        return Err(err.to_string());
    }
    let url = validate_url(&url).map_err(|e| e.to_string())?;

    let source = state
        .update_settings(|config| {
            if config.rule_sources.iter().any(|s| s.url == url) {
                return Err(HangarError::InvalidInput(format!(
                    "rule source already exists: {}",
                    url
                )));
            }
            let source = RuleSource::new(&name, &url);
            config.rule_sources.push(source.clone());
            Ok(source)
        })
        .map_err(|e| e.to_string())?;
    log::info!("Rule source added: {} ({})", source.name, source.url);
    Ok(source)
}

/// 删除规则源及其缓存
pub async fn remove_rule_source(state: &AppState, id: String) -> Result<(), String> {
    let removed = state
        .update_settings(|config| {
            let at = config
                .rule_sources
                .iter()
                .position(|s| s.id == id)
                .ok_or_else(|| HangarError::not_found("rule source", id.as_str()))?;
            Ok(config.rule_sources.remove(at))
        })
        .map_err(|e| e.to_string())?;

    let cache = state.rule_cache().map_err(|e| e.to_string())?;
    if let Err(e) = cache.remove(&removed.url) {
        log::warn!("Failed to remove cache for rule source {}: {}", removed.name, e);
    }
    log::info!("Rule source removed: {}", removed.name);
    Ok(())
}

/// 启用/停用规则源
pub async fn toggle_rule_source(
    state: &AppState,
    id: String,
    enabled: bool,
) -> Result<RuleSource, String> {
    state
        .update_settings(|config| {
            let source = config
                .rule_sources
                .iter_mut()
                .find(|s| s.id == id)
                .ok_or_else(|| HangarError::not_found("rule source", id.as_str()))?;
            source.enabled = enabled;
            Ok(source.clone())
        })
        .map_err(|e| e.to_string())
}

/// 并发刷新所有启用的规则源，成功的记录更新时间
pub async fn refresh_rule_sources(state: &AppState) -> Result<Vec<BatchOutcome>, String> {
    let cache = state.rule_cache().map_err(|e| e.to_string())?;
    let sources: Vec<RuleSource> = state
        .settings()
        .rule_sources
        .into_iter()
        .filter(|s| s.enabled)
        .collect();
    let urls: Vec<String> = sources.iter().map(|s| s.url.clone()).collect();

    let outcomes = cache.refresh_all(&urls).await;
    let mut refreshed = Vec::new();
    let mut report = Vec::with_capacity(outcomes.len());
    for (source, (_, result)) in sources.iter().zip(outcomes) {
        match &result {
            Ok(rule_set) => refreshed.push((source.id.clone(), rule_set.last_updated.clone())),
            Err(e) => {
                state.notify_error("Rule source refresh failed", &format!("{}: {}", source.name, e))
            }
        }
        report.push(BatchOutcome::from_result(source.id.clone(), &result));
    }

    if !refreshed.is_empty() {
        let saved = state.update_settings(|config| {
            for source in &mut config.rule_sources {
                if let Some((_, time)) = refreshed.iter().find(|(id, _)| id == &source.id) {
                    source.last_updated = Some(time.clone());
                }
            }
            Ok(())
        });
        if let Err(e) = saved {
            log::warn!("Failed to record rule source refresh time: {}", e);
        }
    }
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_rule_source_lifecycle() {
        let dir = tempfile::tempdir().unwrap();
        let state = AppState::init(dir.path()).unwrap();

        let url = "https://r.example.com/s.yaml".to_string();
        let source = add_rule_source(&state, " Streaming ".into(), url.clone()).await.unwrap();
        assert_eq!(source.name, "Streaming");
        assert!(source.enabled);

        let err = add_rule_source(&state, "Again".into(), url).await.unwrap_err();
        assert!(err.contains("already exists"), "{}", err);
        assert!(add_rule_source(&state, "Bad".into(), "ftp://r.example.com".into())
            .await
            .is_err());

        let toggled = toggle_rule_source(&state, source.id.clone(), false).await.unwrap();
        assert!(!toggled.enabled);
        assert!(state.settings().enabled_rule_urls().is_empty());

        // 设置已写入磁盘
        let reopened = AppState::init(dir.path()).unwrap();
        assert_eq!(get_rule_sources(&reopened).await.unwrap(), vec![toggled]);

        remove_rule_source(&state, source.id.clone()).await.unwrap();
        assert!(get_rule_sources(&state).await.unwrap().is_empty());
        let err = remove_rule_source(&state, source.id).await.unwrap_err();
        assert!(err.contains("not found"), "{}", err);
    }

    #[tokio::test]
    async fn test_builtin_rules_listed() {
        let rules = get_builtin_rules().await.unwrap();
        assert!(rules.iter().any(|r| r.name == "reject"));
    }
}
