use serde::{Deserialize, Serialize};

use super::{Node, ProxyGroup};

/// 对配置文档的单个结构化修改
///
/// JSON 表示使用 `op` 字段作为标签，例如
/// `{"op": "add_rule", "rule": "DOMAIN,netflix.com", "target": "Proxy"}`。
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum PatchOperation {
    /// 插入规则；`position` 缺省时插在兜底规则之前
    AddRule {
        rule: String,
        target: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        position: Option<usize>,
    },
    RemoveRule {
        rule: String,
    },
    ModifyRule {
        rule: String,
        target: String,
    },
    AddProxy {
        proxy: Node,
    },
    RemoveProxy {
        name: String,
    },
    ModifyProxy {
        name: String,
        proxy: Node,
    },
    AddProxyGroup {
        group: ProxyGroup,
    },
    RemoveProxyGroup {
        name: String,
    },
    ModifyProxyGroup {
        name: String,
        #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
        group_type: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        proxies: Option<Vec<String>>,
    },
}

impl PatchOperation {
    /// 操作标签名，用于日志与错误信息
    pub fn tag(&self) -> &'static str {
        match self {
            Self::AddRule { .. } => "add_rule",
            Self::RemoveRule { .. } => "remove_rule",
            Self::ModifyRule { .. } => "modify_rule",
            Self::AddProxy { .. } => "add_proxy",
            Self::RemoveProxy { .. } => "remove_proxy",
            Self::ModifyProxy { .. } => "modify_proxy",
            Self::AddProxyGroup { .. } => "add_proxy_group",
            Self::RemoveProxyGroup { .. } => "remove_proxy_group",
            Self::ModifyProxyGroup { .. } => "modify_proxy_group",
        }
    }
}

/// 一组按顺序、整体生效的修改
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Patch {
    pub description: String,
    pub operations: Vec<PatchOperation>,
}

/// AI 给出的补丁建议，操作尚未经过校验
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProposedPatch {
    pub description: String,
    #[serde(default)]
    pub operations: Vec<serde_json::Value>,
}
