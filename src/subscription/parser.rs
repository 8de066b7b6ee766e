use base64::{engine::general_purpose, Engine as _};

use crate::error::{HangarError, Result};
use crate::models::{dedup_nodes_last_wins, Node};

/// 订阅内容解析器
///
/// 支持三种格式：带 `proxies` 的 Clash YAML、纯节点列表 YAML，以及上述两者的 base64 编码。
pub struct SubscriptionParser;

impl SubscriptionParser {
    /// 解析订阅内容为节点列表
    ///
    /// 单个节点解析失败只记录警告；一个节点都没有时返回 `Parse` 错误。
    pub fn parse(content: &str) -> Result<Vec<Node>> {
        let raw = match Self::parse_yaml_value(content) {
            Some(value) => value,
            None => {
                let decoded = Self::decode_base64(content).ok_or_else(|| {
                    HangarError::Parse("content is neither Clash YAML nor base64".to_string())
                })?;
                Self::parse_yaml_value(&decoded).ok_or_else(|| {
                    HangarError::Parse("decoded base64 content is not Clash YAML".to_string())
                })?
            }
        };

        let nodes = dedup_nodes_last_wins(Self::parse_proxies(&raw));
        if nodes.is_empty() {
            return Err(HangarError::Parse(
                "subscription contains no valid proxy node".to_string(),
            ));
        }
        Ok(nodes)
    }

    /// 只接受带 `proxies` 的映射或节点序列
    fn parse_yaml_value(content: &str) -> Option<serde_yaml::Value> {
        let value: serde_yaml::Value = serde_yaml::from_str(content).ok()?;
        if value.is_sequence() || value.get("proxies").map_or(false, |p| p.is_sequence()) {
            Some(value)
        } else {
            None
        }
    }

    fn decode_base64(content: &str) -> Option<String> {
        let compact: String = content.chars().filter(|c| !c.is_whitespace()).collect();
        if compact.is_empty() {
            return None;
        }

        let engines = [
            &general_purpose::STANDARD,
            &general_purpose::STANDARD_NO_PAD,
            &general_purpose::URL_SAFE,
            &general_purpose::URL_SAFE_NO_PAD,
        ];
        engines
            .iter()
            .find_map(|engine| engine.decode(compact.as_bytes()).ok())
            .and_then(|bytes| String::from_utf8(bytes).ok())
    }

    fn parse_proxies(raw: &serde_yaml::Value) -> Vec<Node> {
        let items = match raw.get("proxies").unwrap_or(raw).as_sequence() {
            Some(items) => items,
            None => return Vec::new(),
        };

        let mut nodes = Vec::with_capacity(items.len());
        for item in items {
            match serde_yaml::from_value::<Node>(item.clone()) {
                Ok(node) if !node.name.trim().is_empty() => nodes.push(node),
                Ok(_) => log::warn!("Skipping proxy with empty name"),
                Err(e) => {
                    let name = item.get("name").and_then(|n| n.as_str()).unwrap_or("unknown");
                    log::warn!("Failed to parse proxy '{}': {}", name, e);
                }
            }
        }
        nodes
    }
}
