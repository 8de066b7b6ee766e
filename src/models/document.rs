use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::Node;

/// 内置策略，规则与代理组可以直接引用
pub const BUILTIN_POLICIES: [&str; 5] = ["DIRECT", "REJECT", "REJECT-DROP", "PASS", "COMPATIBLE"];

/// 兜底规则类型
pub const CATCH_ALL: &str = "MATCH";

/// 统一配置文档（Clash / Mihomo 兼容格式）
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "kebab-case")]
pub struct ConfigDocument {
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

    /// 基础模板中的其它顶层字段（dns、sniffer 等），原样输出
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,

    #[serde(default)]
    pub proxies: Vec<Node>,

    #[serde(default)]
    pub proxy_groups: Vec<ProxyGroup>,

    #[serde(default)]
    pub rules: Vec<String>,
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

impl Default for ConfigDocument {
    fn default() -> Self {
        Self {
            mixed_port: default_mixed_port(),
            allow_lan: false,
            mode: default_mode(),
            log_level: default_log_level(),
            ipv6: false,
            extra: BTreeMap::new(),
            proxies: Vec::new(),
            proxy_groups: Vec::new(),
            rules: Vec::new(),
        }
    }
}

impl ConfigDocument {
    /// 从 YAML 解析
    pub fn from_yaml(content: &str) -> Result<Self, serde_yaml::Error> {
        serde_yaml::from_str(content)
    }

    /// 渲染为 YAML（输入相同则输出逐字节相同）
    pub fn to_yaml(&self) -> Result<String, serde_yaml::Error> {
        serde_yaml::to_string(self)
    }

    pub fn proxy_count(&self) -> usize {
        self.proxies.len()
    }

    /// 检查代理名称是否存在
    pub fn has_proxy(&self, name: &str) -> bool {
        self.proxies.iter().any(|p| p.name == name)
    }

    /// 检查代理组名称是否存在
    pub fn has_group(&self, name: &str) -> bool {
        self.proxy_groups.iter().any(|g| g.name == name)
    }

    /// 名称是否已被节点、代理组或内置策略占用
    pub fn is_name_taken(&self, name: &str) -> bool {
        BUILTIN_POLICIES.contains(&name) || self.has_proxy(name) || self.has_group(name)
    }

    /// 按规则标识（类型 + 匹配内容）查找规则位置
    pub fn find_rule(&self, key: &str) -> Option<usize> {
        self.rules
            .iter()
            .position(|line| RuleLine::parse(line).map(|r| r.key() == key).unwrap_or(false))
    }

    /// 兜底规则的位置（必须是最后一条）
    pub fn catch_all_index(&self) -> Option<usize> {
        self.rules
            .iter()
            .rposition(|line| RuleLine::parse(line).map(|r| r.is_catch_all()).unwrap_or(false))
    }
}

/// 代理组
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProxyGroup {
    pub name: String,
    #[serde(rename = "type")]
    pub group_type: String,
    #[serde(default)]
    pub proxies: Vec<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interval: Option<u32>,

    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

impl ProxyGroup {
    /// 手动选择组
    pub fn select(name: &str, proxies: Vec<String>) -> Self {
        Self {
            name: name.to_string(),
            group_type: "select".to_string(),
            proxies,
            url: None,
            interval: None,
            extra: BTreeMap::new(),
        }
    }

    /// 自动测速组
    pub fn url_test(name: &str, proxies: Vec<String>) -> Self {
        Self {
            name: name.to_string(),
            group_type: "url-test".to_string(),
            proxies,
            url: Some("http://www.gstatic.com/generate_204".to_string()),
            interval: Some(300),
            extra: BTreeMap::new(),
        }
    }
}

/// 单条规则的结构化表示
///
/// 形如 `TYPE,PAYLOAD,TARGET[,OPTION...]` 或 `MATCH,TARGET`。
/// 逻辑规则（AND/OR/NOT）的 payload 带括号，内部的逗号不参与切分。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuleLine {
    pub kind: String,
    pub payload: Option<String>,
    pub target: String,
    pub options: Vec<String>,
}

impl RuleLine {
    /// 解析带策略的完整规则
    pub fn parse(line: &str) -> Result<Self, String> {
        let (kind, rest) = split_kind(line)?;

        if is_catch_all_kind(&kind) {
            let target = rest.trim();
            if target.is_empty() || target.contains(',') {
                return Err(format!("invalid catch-all rule: {}", line));
            }
            return Ok(Self {
                kind: CATCH_ALL.to_string(),
                payload: None,
                target: target.to_string(),
                options: Vec::new(),
            });
        }

        let (payload, tail) = split_payload(rest)?;
        let mut fields = tail.iter();
        let target = fields
            .next()
            .filter(|t| !t.is_empty())
            .ok_or_else(|| format!("rule has no target: {}", line))?
            .clone();

        Ok(Self {
            kind,
            payload: Some(payload),
            target,
            options: fields.cloned().collect(),
        })
    }

    /// 解析规则集中的行，缺少策略时使用 `default_target`
    ///
    /// 规则集里的兜底规则没有意义，返回 None。
    pub fn parse_lenient(line: &str, default_target: &str) -> Option<Self> {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            return None;
        }

        let (kind, rest) = split_kind(line).ok()?;
        if is_catch_all_kind(&kind) {
            return None;
        }

        let (payload, tail) = split_payload(rest).ok()?;
        let (target, options) = match tail.split_first() {
            None => (default_target.to_string(), Vec::new()),
            Some((first, rest)) if first.eq_ignore_ascii_case("no-resolve") || first.is_empty() => {
                let mut options: Vec<String> = Vec::new();
                if !first.is_empty() {
                    options.push(first.clone());
                }
                options.extend(rest.iter().cloned());
                (default_target.to_string(), options)
            }
            Some((first, rest)) => (first.clone(), rest.to_vec()),
        };

        Some(Self {
            kind,
            payload: Some(payload),
            target,
            options,
        })
    }

    /// 由匹配条件与策略构造规则
    pub fn from_match(rule: &str, target: &str) -> Result<Self, String> {
        let target = target.trim();
        if target.is_empty() || target.contains(',') {
            return Err(format!("invalid rule target: '{}'", target));
        }
        Self::parse(&format!("{},{}", rule.trim(), target))
    }

    /// 规则标识：`TYPE,PAYLOAD`，兜底规则为 `MATCH`
    pub fn key(&self) -> String {
        match &self.payload {
            Some(payload) => format!("{},{}", self.kind, payload),
            None => self.kind.clone(),
        }
    }

    pub fn is_catch_all(&self) -> bool {
        self.kind == CATCH_ALL
    }

    /// 输出为单行文本
    pub fn render(&self) -> String {
        let mut parts: Vec<&str> = vec![self.kind.as_str()];
        if let Some(payload) = &self.payload {
            parts.push(payload);
        }
        parts.push(&self.target);
        parts.extend(self.options.iter().map(|s| s.as_str()));
        parts.join(",")
    }
}

/// 规范化规则标识（允许用户输入小写类型或多余空格）
pub fn normalize_rule_key(rule: &str) -> Result<String, String> {
    let trimmed = rule.trim();
    if !trimmed.contains(',') && is_catch_all_kind(&trimmed.to_ascii_uppercase()) {
        return Ok(CATCH_ALL.to_string());
    }
    let (kind, rest) = split_kind(trimmed)?;
    if is_catch_all_kind(&kind) {
        return Ok(CATCH_ALL.to_string());
    }
    // 用户可能传入了完整规则，只保留匹配部分
    let (payload, _) = split_payload(rest)?;
    Ok(format!("{},{}", kind, payload))
}

fn is_catch_all_kind(kind: &str) -> bool {
    kind == CATCH_ALL || kind == "FINAL"
}

fn split_kind(line: &str) -> Result<(String, &str), String> {
    let line = line.trim();
    let (kind, rest) = line
        .split_once(',')
        .ok_or_else(|| format!("malformed rule: '{}'", line))?;
    let kind = kind.trim().to_ascii_uppercase();
    if kind.is_empty() || !kind.chars().all(|c| c.is_ascii_alphanumeric() || c == '-') {
        return Err(format!("malformed rule type in '{}'", line));
    }
    Ok((kind, rest))
}

/// 拆出 payload 与其后的字段
fn split_payload(rest: &str) -> Result<(String, Vec<String>), String> {
    let rest = rest.trim_start();

    if rest.starts_with('(') {
        let mut depth = 0usize;
        for (i, c) in rest.char_indices() {
            match c {
                '(' => depth += 1,
                ')' => {
                    depth = depth.saturating_sub(1);
                    if depth == 0 {
                        let payload = rest[..=i].to_string();
                        let tail = rest[i + 1..].trim_start();
                        let tail = match tail.strip_prefix(',') {
                            Some(t) => split_fields(t),
                            None if tail.is_empty() => Vec::new(),
                            None => return Err(format!("malformed logical rule: '{}'", rest)),
                        };
                        return Ok((payload, tail));
                    }
                }
                _ => {}
            }
        }
        return Err(format!("unbalanced parentheses in '{}'", rest));
    }

    let mut fields = split_fields(rest);
    if fields.is_empty() || fields[0].is_empty() {
        return Err(format!("rule has empty payload: '{}'", rest));
    }
    let payload = fields.remove(0);
    Ok((payload, fields))
}

fn split_fields(s: &str) -> Vec<String> {
    s.split(',').map(|f| f.trim().to_string()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_basic_rule() {
        let rule = RuleLine::parse("domain-suffix, google.com ,Proxy").unwrap();
        assert_eq!(rule.kind, "DOMAIN-SUFFIX");
        assert_eq!(rule.key(), "DOMAIN-SUFFIX,google.com");
        assert_eq!(rule.render(), "DOMAIN-SUFFIX,google.com,Proxy");
    }

    #[test]
    fn test_parse_rule_with_options() {
        let rule = RuleLine::parse("IP-CIDR,10.0.0.0/8,DIRECT,no-resolve").unwrap();
        assert_eq!(rule.target, "DIRECT");
        assert_eq!(rule.options, vec!["no-resolve".to_string()]);
        assert_eq!(rule.render(), "IP-CIDR,10.0.0.0/8,DIRECT,no-resolve");
    }

    #[test]
    fn test_parse_catch_all() {
        let rule = RuleLine::parse("MATCH,Proxy").unwrap();
        assert!(rule.is_catch_all());
        assert_eq!(rule.key(), "MATCH");
        assert!(RuleLine::parse("FINAL,DIRECT").unwrap().is_catch_all());
    }

    #[test]
    fn test_parse_logical_rule() {
        let rule = RuleLine::parse("AND,((DOMAIN,baidu.com),(NETWORK,UDP)),REJECT").unwrap();
        assert_eq!(rule.payload.as_deref(), Some("((DOMAIN,baidu.com),(NETWORK,UDP))"));
        assert_eq!(rule.target, "REJECT");
    }

    #[test]
    fn test_parse_rejects_missing_target() {
        assert!(RuleLine::parse("DOMAIN,example.com").is_err());
        assert!(RuleLine::parse("not a rule").is_err());
        assert!(RuleLine::parse("MATCH,").is_err());
    }

    #[test]
    fn test_lenient_fills_default_target() {
        let rule = RuleLine::parse_lenient("DOMAIN-SUFFIX,openai.com", "Proxy").unwrap();
        assert_eq!(rule.render(), "DOMAIN-SUFFIX,openai.com,Proxy");

        let rule = RuleLine::parse_lenient("IP-CIDR,1.2.3.0/24,no-resolve", "Proxy").unwrap();
        assert_eq!(rule.render(), "IP-CIDR,1.2.3.0/24,Proxy,no-resolve");

        assert!(RuleLine::parse_lenient("# comment", "Proxy").is_none());
        assert!(RuleLine::parse_lenient("MATCH,DIRECT", "Proxy").is_none());
    }

    #[test]
    fn test_normalize_rule_key() {
        assert_eq!(normalize_rule_key("domain, netflix.com").unwrap(), "DOMAIN,netflix.com");
        assert_eq!(normalize_rule_key("DOMAIN,netflix.com,A").unwrap(), "DOMAIN,netflix.com");
        assert_eq!(normalize_rule_key("match,Proxy").unwrap(), "MATCH");
        assert_eq!(normalize_rule_key(" MATCH ").unwrap(), "MATCH");
        assert_eq!(normalize_rule_key("final").unwrap(), "MATCH");
        assert!(normalize_rule_key("DOMAIN").is_err());
    }

    #[test]
    fn test_document_yaml_field_names() {
        let doc = ConfigDocument {
            proxy_groups: vec![ProxyGroup::select("Proxy", vec!["DIRECT".into()])],
            rules: vec!["MATCH,Proxy".into()],
            ..Default::default()
        };
        let yaml = doc.to_yaml().unwrap();
        assert!(yaml.contains("mixed-port: 7890"));
        assert!(yaml.contains("proxy-groups:"));
        assert_eq!(ConfigDocument::from_yaml(&yaml).unwrap(), doc);
    }
}
