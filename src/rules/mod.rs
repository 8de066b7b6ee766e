mod builtin;

pub use builtin::*;

use std::path::{Path, PathBuf};

use chrono::Utc;
use futures_util::future::join_all;
use serde::{Deserialize, Serialize};

use crate::error::{HangarError, Result};
use crate::subscription::Downloader;
use crate::utils::{content_digest, write_atomic};

/// 规则源的缓存内容
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RuleSet {
    pub url: String,
    /// 规则行；可能缺少策略，由合并时补全
    pub rules: Vec<String>,
    pub last_updated: String,
}

impl RuleSet {
    /// 解析规则源内容
    ///
    /// 支持 YAML `payload:` 列表、YAML `rules:` 列表与纯文本（每行一条，`#` 为注释）。
    /// 纯域名与 IP 段会转换为 DOMAIN / DOMAIN-SUFFIX / IP-CIDR 规则。
    pub fn parse(url: &str, content: &str) -> Result<Self> {
        let lines: Vec<String> = match serde_yaml::from_str::<serde_yaml::Value>(content) {
            Ok(value) if value.get("payload").or_else(|| value.get("rules")).is_some() => value
                .get("payload")
                .or_else(|| value.get("rules"))
                .and_then(|v| v.as_sequence())
                .map(|items| {
                    items
                        .iter()
                        .filter_map(|item| item.as_str().map(str::to_string))
                        .collect()
                })
                .unwrap_or_default(),
            _ => content.lines().map(str::to_string).collect(),
        };

        let rules: Vec<String> = lines.iter().filter_map(|line| normalize_line(line)).collect();
        if rules.is_empty() {
            return Err(HangarError::Parse(format!("rule source {} contains no rules", url)));
        }

        Ok(Self {
            url: url.to_string(),
            rules,
            last_updated: Utc::now().to_rfc3339(),
        })
    }
}

fn normalize_line(line: &str) -> Option<String> {
    let line = line.trim().trim_matches(|c| c == '\'' || c == '"').trim();
    if line.is_empty() || line.starts_with('#') || line.starts_with("//") {
        return None;
    }
    if line.contains(',') {
        return Some(line.to_string());
    }

    // 行为为 domain / ipcidr 的规则集只有匹配内容
    let cidr_char = |c: char| c.is_ascii_hexdigit() || matches!(c, '.' | ':' | '/');
    if line.contains('/') && line.chars().all(cidr_char) {
        let kind = if line.contains(':') { "IP-CIDR6" } else { "IP-CIDR" };
        return Some(format!("{},{}", kind, line));
    }
    if let Some(suffix) = line.strip_prefix("+.").or_else(|| line.strip_prefix('.')) {
        return Some(format!("DOMAIN-SUFFIX,{}", suffix));
    }
    if line.contains('.') && !line.contains(char::is_whitespace) {
        return Some(format!("DOMAIN,{}", line));
    }

    log::debug!("Ignoring unrecognized rule line: {}", line);
    None
}

/// 规则源缓存，文件名为地址的 sha256
pub struct RuleSetCache {
    cache_dir: PathBuf,
    downloader: Downloader,
}

impl RuleSetCache {
    pub fn new(cache_dir: impl Into<PathBuf>, downloader: Downloader) -> Self {
        Self {
            cache_dir: cache_dir.into(),
            downloader,
        }
    }

    fn cache_path(&self, url: &str) -> PathBuf {
        self.cache_dir.join(format!("{}.yaml", content_digest(url)))
    }

    /// 下载并缓存规则源；失败时保留旧缓存
    pub async fn refresh(&self, url: &str) -> Result<RuleSet> {
        log::info!("Refreshing rule source {}", url);
        let content = self.downloader.fetch_text(url).await?;
        let rule_set = RuleSet::parse(url, &content)?;

        let yaml = serde_yaml::to_string(&rule_set)?;
        write_atomic(&self.cache_path(url), yaml.as_bytes())?;
        log::info!("Rule source {} cached with {} rules", url, rule_set.rules.len());
        Ok(rule_set)
    }

    /// 并发刷新所有规则源，结果相互独立
    pub async fn refresh_all(&self, urls: &[String]) -> Vec<(String, Result<RuleSet>)> {
        let tasks = urls.iter().map(|url| async move {
            let result = self.refresh(url).await;
            if let Err(e) = &result {
                log::warn!("Failed to refresh rule source {}: {}", url, e);
            }
            (url.clone(), result)
        });
        join_all(tasks).await
    }

    /// 读取缓存；未缓存时返回 None
    pub fn load(&self, url: &str) -> Result<Option<RuleSet>> {
        load_cached(&self.cache_path(url))
    }

    /// 删除缓存
    pub fn remove(&self, url: &str) -> Result<()> {
        let path = self.cache_path(url);
        if path.exists() {
            std::fs::remove_file(&path)?;
            log::info!("Removed cached rule source {}", url);
        }
        Ok(())
    }

    /// 按顺序读取所有已缓存的规则源
    pub fn load_all(&self, urls: &[String]) -> Vec<RuleSet> {
        urls.iter()
            .filter_map(|url| match self.load(url) {
                Ok(Some(rule_set)) => Some(rule_set),
                Ok(None) => {
                    log::warn!("Rule source {} has not been downloaded yet", url);
                    None
                }
                Err(e) => {
                    log::warn!("Failed to load cached rule source {}: {}", url, e);
                    None
                }
            })
            .collect()
    }
}

fn load_cached(path: &Path) -> Result<Option<RuleSet>> {
    if !path.exists() {
        return Ok(None);
    }
    let content = std::fs::read_to_string(path)?;
    let rule_set = serde_yaml::from_str(&content)
        .map_err(|e| HangarError::Parse(format!("{}: {}", path.display(), e)))?;
    Ok(Some(rule_set))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::FetchConfig;
    use axum::{http::StatusCode, routing::get, Router};

    #[test]
    fn test_parse_payload_yaml() {
        let content = "payload:\n  - DOMAIN-SUFFIX,google.com\n  - '+.youtube.com'\n  \
                       - IP-CIDR,8.8.8.8/32,no-resolve\n";
        let rule_set = RuleSet::parse("https://r/a.yaml", content).unwrap();
        assert_eq!(
            rule_set.rules,
            vec![
                "DOMAIN-SUFFIX,google.com",
                "DOMAIN-SUFFIX,youtube.com",
                "IP-CIDR,8.8.8.8/32,no-resolve"
            ]
        );
    }

    #[test]
    fn test_parse_rules_yaml_and_text() {
        let rule_set = RuleSet::parse("u", "rules:\n  - DOMAIN,a.com,DIRECT\n").unwrap();
        assert_eq!(rule_set.rules, vec!["DOMAIN,a.com,DIRECT"]);

        let text = "# comment\nDOMAIN-KEYWORD,netflix\n\n10.0.0.0/8\nexample.org\n";
        let rule_set = RuleSet::parse("u", text).unwrap();
        assert_eq!(
            rule_set.rules,
            vec!["DOMAIN-KEYWORD,netflix", "IP-CIDR,10.0.0.0/8", "DOMAIN,example.org"]
        );
    }

    #[test]
    fn test_parse_empty_is_error() {
        assert!(RuleSet::parse("u", "# nothing here\n").is_err());
    }

    #[tokio::test]
    async fn test_refresh_and_load_cache() {
        let app = Router::new()
            .route("/rules.yaml", get(|| async { "payload:\n  - DOMAIN,a.com\n" }))
            .route("/gone.yaml", get(|| async { (StatusCode::NOT_FOUND, "") }));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        let dir = tempfile::tempdir().unwrap();
        let downloader = Downloader::new(&FetchConfig::default()).unwrap();
        let cache = RuleSetCache::new(dir.path(), downloader);
        let good = format!("http://{}/rules.yaml", addr);
        let bad = format!("http://{}/gone.yaml", addr);

        let outcomes = cache.refresh_all(&[good.clone(), bad.clone()]).await;
        assert!(outcomes[0].1.is_ok());
        assert!(outcomes[1].1.is_err());

        let loaded = cache.load(&good).unwrap().unwrap();
        assert_eq!(loaded.rules, vec!["DOMAIN,a.com"]);
        assert!(cache.load(&bad).unwrap().is_none());
        assert_eq!(cache.load_all(&[good.clone(), bad.clone()]).len(), 1);

        cache.remove(&good).unwrap();
        cache.remove(&bad).unwrap();
        assert!(cache.load(&good).unwrap().is_none());
    }
}
