use serde::{Deserialize, Serialize};

/// 应用设置（config.json）
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HangarConfig {
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub server: ServerConfig,
    /// 自定义规则源，按顺序合并
    #[serde(default)]
    pub rule_sources: Vec<RuleSource>,
    /// 是否写入内置规则集（rule-providers 与默认规则）
    #[serde(default = "default_true")]
    pub builtin_rules: bool,
    #[serde(default)]
    pub profile: ProfileConfig,
    #[serde(default)]
    pub fetch: FetchConfig,
}

impl Default for HangarConfig {
    fn default() -> Self {
        Self {
            llm: LlmConfig::default(),
            server: ServerConfig::default(),
            rule_sources: Vec::new(),
            builtin_rules: true,
            profile: ProfileConfig::default(),
            fetch: FetchConfig::default(),
        }
    }
}

impl HangarConfig {
    /// 启用的规则源地址
    pub fn enabled_rule_urls(&self) -> Vec<String> {
        self.rule_sources
            .iter()
            .filter(|s| s.enabled)
            .map(|s| s.url.clone())
            .collect()
    }
}

fn default_true() -> bool {
    true
}

/// 自定义规则源
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RuleSource {
    pub id: String,
    pub name: String,
    pub url: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// 最后成功下载时间 (RFC 3339)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_updated: Option<String>,
}

impl RuleSource {
    pub fn new(name: &str, url: &str) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            name: name.to_string(),
            url: url.to_string(),
            enabled: true,
            last_updated: None,
        }
    }
}

/// OpenAI 兼容接口设置
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LlmConfig {
    #[serde(default = "default_llm_base_url")]
    pub base_url: String,
    #[serde(default)]
    pub api_key: String,
    #[serde(default = "default_llm_model")]
    pub model: String,
    #[serde(default = "default_llm_timeout")]
    pub timeout_secs: u64,
}

fn default_llm_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}
fn default_llm_model() -> String {
    "gpt-4o".to_string()
}
fn default_llm_timeout() -> u64 {
    120
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            base_url: default_llm_base_url(),
            api_key: String::new(),
            model: default_llm_model(),
            timeout_secs: default_llm_timeout(),
        }
    }
}

/// 本地配置分发服务设置
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ServerConfig {
    #[serde(default = "default_server_host")]
    pub host: String,
    #[serde(default = "default_server_port")]
    pub port: u16,
}

fn default_server_host() -> String {
    "127.0.0.1".to_string()
}
fn default_server_port() -> u16 {
    8080
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_server_host(),
            port: default_server_port(),
        }
    }
}

/// 生成配置的头部字段
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProfileConfig {
    #[serde(default = "default_mixed_port")]
    pub mixed_port: u16,
    #[serde(default)]
    pub allow_lan: bool,
    #[serde(default = "default_mode")]
    pub mode: String,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default)]
    pub ipv6: bool,
    /// 基础模板（YAML），其中的 dns、sniffer 等字段会原样并入生成结果
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_template: Option<String>,
}

fn default_mixed_port() -> u16 {
    7890
}
fn default_mode() -> String {
    "rule".to_string()
}
fn default_log_level() -> String {
    "info".to_string()
}

impl Default for ProfileConfig {
    fn default() -> Self {
        Self {
            mixed_port: default_mixed_port(),
            allow_lan: false,
            mode: default_mode(),
            log_level: default_log_level(),
            ipv6: false,
            base_template: None,
        }
    }
}

/// 订阅与规则源下载设置
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FetchConfig {
    #[serde(default = "default_fetch_timeout")]
    pub timeout_secs: u64,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

fn default_fetch_timeout() -> u64 {
    30
}
fn default_user_agent() -> String {
    "clash-verge/v2.4.5".to_string()
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_fetch_timeout(),
            user_agent: default_user_agent(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_config_uses_defaults() {
        let config: HangarConfig = serde_json::from_str(
            r#"{"llm": {"api_key": "sk-test"},
                "rule_sources": [{"id": "r1", "name": "Streaming", "url": "https://r/a.yaml"}]}"#,
        )
        .unwrap();
        assert_eq!(config.llm.api_key, "sk-test");
        assert_eq!(config.llm.model, "gpt-4o");
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.profile.mixed_port, 7890);
        assert_eq!(config.fetch.timeout_secs, 30);
        assert!(config.builtin_rules);
        assert_eq!(config.rule_sources.len(), 1);
        assert!(config.rule_sources[0].enabled);
        assert!(config.rule_sources[0].last_updated.is_none());
    }

    #[test]
    fn test_enabled_rule_urls() {
        let mut config = HangarConfig::default();
        config.rule_sources.push(RuleSource::new("A", "https://r/a.yaml"));
        let mut disabled = RuleSource::new("B", "https://r/b.yaml");
        disabled.enabled = false;
        config.rule_sources.push(disabled);
        assert_eq!(config.enabled_rule_urls(), vec!["https://r/a.yaml".to_string()]);
    }
}
