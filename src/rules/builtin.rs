use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::BTreeMap;

/// Loyalsoldier/clash-rules 的发布地址
const RULES_BASE_URL: &str = "https://cdn.jsdelivr.net/gh/Loyalsoldier/clash-rules@release";

/// 规则集的更新间隔（秒）
pub const PROVIDER_INTERVAL: u64 = 86400;

/// (名称, 说明, behavior)
const CATALOGUE: [(&str, &str, &str); 10] = [
    ("reject", "广告域名", "domain"),
    ("proxy", "代理域名", "domain"),
    ("direct", "直连域名", "domain"),
    ("gfw", "GFW 封锁域名", "domain"),
    ("greatfire", "GreatFire 域名", "domain"),
    ("tld-not-cn", "非中国顶级域", "domain"),
    ("telegramcidr", "Telegram IP 段", "ipcidr"),
    ("cncidr", "中国 IP 段", "ipcidr"),
    ("lancidr", "局域网 IP 段", "ipcidr"),
    ("applications", "需代理的程序", "classical"),
];

/// 内置规则集，作为 rule-providers 写入生成的配置
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BuiltinRule {
    pub name: String,
    pub description: String,
    pub url: String,
    /// domain / ipcidr / classical
    pub behavior: String,
}

/// 内置规则集列表
pub fn builtin_rules() -> Vec<BuiltinRule> {
    CATALOGUE
        .iter()
        .map(|(name, description, behavior)| BuiltinRule {
            name: name.to_string(),
            description: description.to_string(),
            url: format!("{}/{}.txt", RULES_BASE_URL, name),
            behavior: behavior.to_string(),
        })
        .collect()
}

/// 生成 rule-providers 段
pub fn rule_providers(rules: &[BuiltinRule]) -> BTreeMap<String, serde_json::Value> {
    rules
        .iter()
        .map(|rule| {
            let provider = json!({
                "type": "http",
                "behavior": rule.behavior,
                "url": rule.url,
                "path": format!("./ruleset/{}.yaml", rule.name),
                "interval": PROVIDER_INTERVAL,
            });
            (rule.name.clone(), provider)
        })
        .collect()
}

/// 引用内置规则集的默认规则（不含兜底规则）
///
/// 只引用 `rules` 中存在的规则集。
pub fn default_rules(rules: &[BuiltinRule], proxy_group: &str) -> Vec<String> {
    let available = |name: &str| rules.iter().any(|r| r.name == name);
    let mut lines = Vec::new();
    for (provider, target) in [
        ("reject", "REJECT"),
        ("proxy", proxy_group),
        ("direct", "DIRECT"),
        ("telegramcidr", proxy_group),
    ] {
        if available(provider) {
            lines.push(format!("RULE-SET,{},{}", provider, target));
        }
    }
    if !rules.is_empty() {
        lines.push("GEOIP,CN,DIRECT".to_string());
    }
    lines
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_catalogue() {
        let rules = builtin_rules();
        assert_eq!(rules.len(), 10);
        let telegram = rules.iter().find(|r| r.name == "telegramcidr").unwrap();
        assert_eq!(telegram.behavior, "ipcidr");
        assert!(telegram.url.ends_with("/telegramcidr.txt"));
    }

    #[test]
    fn test_rule_providers() {
        let providers = rule_providers(&builtin_rules());
        assert_eq!(providers.len(), 10);
        let reject = &providers["reject"];
        assert_eq!(reject["type"], "http");
        assert_eq!(reject["path"], "./ruleset/reject.yaml");
        assert_eq!(reject["interval"], 86400);
    }

    #[test]
    fn test_default_rules() {
        assert_eq!(
            default_rules(&builtin_rules(), "Proxy"),
            vec![
                "RULE-SET,reject,REJECT",
                "RULE-SET,proxy,Proxy",
                "RULE-SET,direct,DIRECT",
                "RULE-SET,telegramcidr,Proxy",
                "GEOIP,CN,DIRECT",
            ]
        );
        assert!(default_rules(&[], "Proxy").is_empty());
    }
}
