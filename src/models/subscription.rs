use serde::de::{self, Deserializer};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// 订阅（远程节点来源）
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Subscription {
    /// 唯一标识符，创建后不再改变
    pub id: String,
    /// 显示名称
    pub name: String,
    /// 订阅地址
    pub url: String,
    /// 是否参与合并与刷新
    pub enabled: bool,
    /// 最后成功刷新时间 (RFC 3339)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_updated: Option<String>,
    /// 最近一次成功刷新得到的节点数量
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_count: Option<usize>,
    /// 最近一次下载内容的 sha256，用于跳过未变化的内容
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_digest: Option<String>,
    /// 缓存的节点列表（单独存放在 cache/proxies 下）
    #[serde(skip)]
    pub cached_nodes: Vec<Node>,
}

impl Subscription {
    /// 创建新的订阅
    pub fn new(id: String, name: String, url: String) -> Self {
        Self {
            id,
            name,
            url,
            enabled: true,
            last_updated: None,
            node_count: None,
            content_digest: None,
            cached_nodes: Vec::new(),
        }
    }

    /// 清空缓存相关的状态
    pub fn clear_cache(&mut self) {
        self.last_updated = None;
        self.node_count = None;
        self.content_digest = None;
        self.cached_nodes.clear();
    }
}

/// subscriptions.json 的文件结构（同时用于导入导出）
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct SubscriptionList {
    #[serde(default)]
    pub subscriptions: Vec<Subscription>,
}

/// 代理节点
///
/// 除名称、类型、地址与端口外，其余协议字段原样保留在 `extra` 中。
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Node {
    pub name: String,
    #[serde(rename = "type")]
    pub proxy_type: String,
    pub server: String,
    #[serde(deserialize_with = "deserialize_port")]
    pub port: u16,
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

impl Node {
    pub fn new(name: &str, proxy_type: &str, server: &str, port: u16) -> Self {
        Self {
            name: name.to_string(),
            proxy_type: proxy_type.to_string(),
            server: server.to_string(),
            port,
            extra: BTreeMap::new(),
        }
    }
}

/// 端口既可能是数字也可能是字符串（部分机场输出 "443"）
fn deserialize_port<'de, D>(deserializer: D) -> Result<u16, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum PortRepr {
        Number(u64),
        Text(String),
    }

    match PortRepr::deserialize(deserializer)? {
        PortRepr::Number(n) => u16::try_from(n)
            .map_err(|_| de::Error::custom(format!("port out of range: {}", n))),
        PortRepr::Text(s) => s
            .trim()
            .parse::<u16>()
            .map_err(|_| de::Error::custom(format!("invalid port: {}", s))),
    }
}

/// 节点名去重（后出现者覆盖先出现者，但保留首次出现的位置）
pub fn dedup_nodes_last_wins(nodes: Vec<Node>) -> Vec<Node> {
    let mut positions: std::collections::HashMap<String, usize> = std::collections::HashMap::new();
    let mut result: Vec<Node> = Vec::with_capacity(nodes.len());

    for node in nodes {
        if let Some(&index) = positions.get(&node.name) {
            result[index] = node;
        } else {
            positions.insert(node.name.clone(), result.len());
            result.push(node);
        }
    }

    result
}
