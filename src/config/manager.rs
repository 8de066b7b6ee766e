use std::collections::HashSet;
use std::path::PathBuf;

use crate::error::{HangarError, Result};
use crate::models::HangarConfig;
use crate::subscription::validate_url;
use crate::utils::write_atomic;

/// 应用设置管理器
pub struct ConfigManager {
    config_path: PathBuf,
}

impl ConfigManager {
    /// 创建新的配置管理器
    pub fn new(config_path: impl Into<PathBuf>) -> Self {
        Self {
            config_path: config_path.into(),
        }
    }

    /// 获取设置文件路径
    pub fn config_path(&self) -> &PathBuf {
        &self.config_path
    }

    /// 加载应用设置，文件不存在时写入默认值
    pub fn load(&self) -> Result<HangarConfig> {
        if !self.config_path.exists() {
            log::info!("Settings not found, creating default config");
            let config = HangarConfig::default();
            self.save(&config)?;
            return Ok(config);
        }

        let content = std::fs::read_to_string(&self.config_path)?;
        let config: HangarConfig = serde_json::from_str(&content)
            .map_err(|e| HangarError::Parse(format!("{}: {}", self.config_path.display(), e)))?;
        Ok(config)
    }

    /// 校验并保存应用设置
    pub fn save(&self, config: &HangarConfig) -> Result<()> {
        Self::validate(config)?;
        let json = serde_json::to_string_pretty(config)?;
        write_atomic(&self.config_path, json.as_bytes())?;
        log::info!("Settings saved to: {:?}", self.config_path);
        Ok(())
    }

    /// 验证应用设置
    pub fn validate(config: &HangarConfig) -> Result<()> {
        if config.server.port == 0 {
            return Err(HangarError::InvalidInput("invalid server port".to_string()));
        }
        if config.server.host.trim().is_empty() {
            return Err(HangarError::InvalidInput("server host must not be empty".to_string()));
        }

        let valid_modes = ["rule", "global", "direct"];
        if !valid_modes.contains(&config.profile.mode.as_str()) {
            return Err(HangarError::InvalidInput(format!(
                "invalid mode: {}. Must be one of: rule, global, direct",
                config.profile.mode
            )));
        }

        let valid_levels = ["debug", "info", "warning", "error", "silent"];
        if !valid_levels.contains(&config.profile.log_level.as_str()) {
            return Err(HangarError::InvalidInput(format!(
                "invalid log level: {}",
                config.profile.log_level
            )));
        }

        if config.profile.mixed_port == 0 {
            return Err(HangarError::InvalidInput("invalid mixed port".to_string()));
        }
        if config.fetch.timeout_secs == 0 || config.llm.timeout_secs == 0 {
            return Err(HangarError::InvalidInput("timeouts must be at least 1 second".to_string()));
        }

        validate_url(&config.llm.base_url)?;

        let mut ids = HashSet::new();
        let mut urls = HashSet::new();
        for source in &config.rule_sources {
            if source.name.trim().is_empty() {
                return Err(HangarError::InvalidInput(
                    "rule source name must not be empty".to_string(),
                ));
            }
            validate_url(&source.url)?;
            if !ids.insert(source.id.as_str()) {
                return Err(HangarError::InvalidInput(format!(
                    "duplicate rule source id: {}",
                    source.id
                )));
            }
            if !urls.insert(source.url.as_str()) {
                return Err(HangarError::InvalidInput(format!(
                    "duplicate rule source URL: {}",
                    source.url
                )));
            }
        }
        Ok(())
    }
}
