use std::collections::HashSet;

use thiserror::Error;

use crate::models::{
    normalize_rule_key, ConfigDocument, Node, Patch, PatchOperation, ProxyGroup, RuleLine,
    BUILTIN_POLICIES, CATCH_ALL,
};

/// 支持的补丁操作标签
pub const OPERATION_TAGS: [&str; 9] = [
    "add_rule",
    "remove_rule",
    "modify_rule",
    "add_proxy",
    "remove_proxy",
    "modify_proxy",
    "add_proxy_group",
    "remove_proxy_group",
    "modify_proxy_group",
];

/// 补丁校验失败
///
/// `index` 为出错操作在补丁中的序号；整体完整性检查失败时为 None。
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PatchError {
    #[error("{}{kind} '{name}' not found", op_prefix(.index))]
    TargetNotFound {
        index: Option<usize>,
        kind: &'static str,
        name: String,
    },

    #[error("{}{kind} '{name}' already exists", op_prefix(.index))]
    DuplicateIdentifier {
        index: Option<usize>,
        kind: &'static str,
        name: String,
    },

    #[error("{}{from} references unknown policy '{name}'", op_prefix(.index))]
    DanglingReference {
        index: Option<usize>,
        from: String,
        name: String,
    },

    #[error("{}malformed operation: {reason}", op_prefix(.index))]
    MalformedOperation { index: Option<usize>, reason: String },
}

fn op_prefix(index: &Option<usize>) -> String {
    match index {
        Some(i) => format!("operation #{}: ", i + 1),
        None => String::new(),
    }
}

fn malformed(index: usize, reason: impl Into<String>) -> PatchError {
    PatchError::MalformedOperation {
        index: Some(index),
        reason: reason.into(),
    }
}

fn not_found(index: usize, kind: &'static str, name: &str) -> PatchError {
    PatchError::TargetNotFound {
        index: Some(index),
        kind,
        name: name.to_string(),
    }
}

fn duplicate(index: Option<usize>, kind: &'static str, name: &str) -> PatchError {
    PatchError::DuplicateIdentifier {
        index,
        kind,
        name: name.to_string(),
    }
}

/// 补丁引擎
///
/// 在副本上按顺序执行操作，任何一步失败都返回错误，输入文档保持不变。
pub struct PatchEngine;

impl PatchEngine {
    /// 应用补丁，全部成功才返回新文档
    pub fn apply(document: &ConfigDocument, patch: &Patch) -> Result<ConfigDocument, PatchError> {
        if patch.operations.is_empty() {
            return Err(PatchError::MalformedOperation {
                index: None,
                reason: "patch contains no operations".to_string(),
            });
        }

        let mut working = document.clone();
        for (index, op) in patch.operations.iter().enumerate() {
            Self::apply_operation(&mut working, index, op)?;
            log::debug!("Applied operation #{} ({})", index + 1, op.tag());
        }

        Self::check_integrity(&working)?;
        Ok(working)
    }

    /// 将不可信的 JSON 转换为操作列表，遇到任何问题都拒绝
    pub fn parse_operations(
        values: &[serde_json::Value],
    ) -> Result<Vec<PatchOperation>, PatchError> {
        values
            .iter()
            .enumerate()
            .map(|(index, value)| {
                let tag = value
                    .get("op")
                    .and_then(|t| t.as_str())
                    .ok_or_else(|| malformed(index, "missing 'op' tag"))?;
                if !OPERATION_TAGS.contains(&tag) {
                    return Err(malformed(index, format!("unknown operation '{}'", tag)));
                }
                serde_json::from_value::<PatchOperation>(value.clone())
                    .map_err(|e| malformed(index, format!("invalid '{}' operation: {}", tag, e)))
            })
            .collect()
    }

    /// 检查引用完整性与兜底规则
    pub fn check_integrity(document: &ConfigDocument) -> Result<(), PatchError> {
        let mut names: HashSet<&str> = BUILTIN_POLICIES.iter().copied().collect();
        for proxy in &document.proxies {
            if !names.insert(proxy.name.as_str()) {
                return Err(duplicate(None, "proxy", &proxy.name));
            }
        }
        for group in &document.proxy_groups {
            if !names.insert(group.name.as_str()) {
                return Err(duplicate(None, "proxy group", &group.name));
            }
        }

        for group in &document.proxy_groups {
            for member in &group.proxies {
                if member == &group.name || !names.contains(member.as_str()) {
                    return Err(PatchError::DanglingReference {
                        index: None,
                        from: format!("proxy group '{}'", group.name),
                        name: member.clone(),
                    });
                }
            }
        }

        let last = document.rules.len().saturating_sub(1);
        for (i, line) in document.rules.iter().enumerate() {
            let rule = RuleLine::parse(line)
                .map_err(|reason| PatchError::MalformedOperation { index: None, reason })?;
            if !names.contains(rule.target.as_str()) {
                return Err(PatchError::DanglingReference {
                    index: None,
                    from: format!("rule '{}'", line),
                    name: rule.target,
                });
            }
            if rule.is_catch_all() != (i == last) {
                return Err(PatchError::MalformedOperation {
                    index: None,
                    reason: "the catch-all MATCH rule must be the last rule".to_string(),
                });
            }
        }
        if document.rules.is_empty() {
            return Err(PatchError::MalformedOperation {
                index: None,
                reason: "configuration must end with a catch-all MATCH rule".to_string(),
            });
        }

        Ok(())
    }

    fn apply_operation(
        doc: &mut ConfigDocument,
        index: usize,
        op: &PatchOperation,
    ) -> Result<(), PatchError> {
        match op {
            PatchOperation::AddRule { rule, target, position } => {
                let line = RuleLine::from_match(rule, target).map_err(|e| malformed(index, e))?;
                if line.is_catch_all() {
                    return Err(malformed(index, "cannot insert another catch-all MATCH rule"));
                }
                let key = line.key();
                if doc.find_rule(&key).is_some() {
                    return Err(duplicate(Some(index), "rule", &key));
                }

                let limit = doc.catch_all_index().unwrap_or(doc.rules.len());
                let at = position.unwrap_or(limit);
                if at > limit {
                    return Err(malformed(
                        index,
                        format!("position {} is after the catch-all rule (max {})", at, limit),
                    ));
                }
                doc.rules.insert(at, line.render());
            }

            PatchOperation::RemoveRule { rule } => {
                let key = normalize_rule_key(rule).map_err(|e| malformed(index, e))?;
                if key == CATCH_ALL {
                    return Err(malformed(index, "cannot remove the catch-all MATCH rule"));
                }
                let at = doc.find_rule(&key).ok_or_else(|| not_found(index, "rule", &key))?;
                doc.rules.remove(at);
            }

            PatchOperation::ModifyRule { rule, target } => {
                let key = normalize_rule_key(rule).map_err(|e| malformed(index, e))?;
                let at = doc.find_rule(&key).ok_or_else(|| not_found(index, "rule", &key))?;
                let target = target.trim();
                if target.is_empty() || target.contains(',') {
                    return Err(malformed(index, format!("invalid rule target '{}'", target)));
                }
                let mut line = RuleLine::parse(&doc.rules[at]).map_err(|e| malformed(index, e))?;
                line.target = target.to_string();
                doc.rules[at] = line.render();
            }

            PatchOperation::AddProxy { proxy } => {
                validate_node(index, proxy)?;
                if doc.is_name_taken(&proxy.name) {
                    return Err(duplicate(Some(index), "proxy", &proxy.name));
                }
                doc.proxies.push(proxy.clone());
            }

            PatchOperation::RemoveProxy { name } => {
                let at = doc
                    .proxies
                    .iter()
                    .position(|p| &p.name == name)
                    .ok_or_else(|| not_found(index, "proxy", name))?;
                doc.proxies.remove(at);
            }

            PatchOperation::ModifyProxy { name, proxy } => {
                validate_node(index, proxy)?;
                let at = doc
                    .proxies
                    .iter()
                    .position(|p| &p.name == name)
                    .ok_or_else(|| not_found(index, "proxy", name))?;
                if &proxy.name != name && doc.is_name_taken(&proxy.name) {
                    return Err(duplicate(Some(index), "proxy", &proxy.name));
                }
                doc.proxies[at] = proxy.clone();
            }

            PatchOperation::AddProxyGroup { group } => {
                validate_group(index, group)?;
                if doc.is_name_taken(&group.name) {
                    return Err(duplicate(Some(index), "proxy group", &group.name));
                }
                doc.proxy_groups.push(group.clone());
            }

            PatchOperation::RemoveProxyGroup { name } => {
                let at = doc
                    .proxy_groups
                    .iter()
                    .position(|g| &g.name == name)
                    .ok_or_else(|| not_found(index, "proxy group", name))?;
                doc.proxy_groups.remove(at);
            }

            PatchOperation::ModifyProxyGroup {
                name,
                group_type,
                proxies,
            } => {
                if group_type.is_none() && proxies.is_none() {
                    return Err(malformed(index, "modify_proxy_group needs 'type' or 'proxies'"));
                }
                let group = doc
                    .proxy_groups
                    .iter_mut()
                    .find(|g| &g.name == name)
                    .ok_or_else(|| not_found(index, "proxy group", name))?;
                if let Some(group_type) = group_type {
                    if group_type.trim().is_empty() {
                        return Err(malformed(index, "proxy group type must not be empty"));
                    }
                    group.group_type = group_type.trim().to_string();
                }
                if let Some(proxies) = proxies {
                    group.proxies = proxies.clone();
                }
            }
        }
        Ok(())
    }
}

fn validate_node(index: usize, node: &Node) -> Result<(), PatchError> {
    if node.name.trim().is_empty() {
        return Err(malformed(index, "proxy name must not be empty"));
    }
    if node.proxy_type.trim().is_empty() || node.server.trim().is_empty() || node.port == 0 {
        return Err(malformed(
            index,
            format!("proxy '{}' needs type, server and a non-zero port", node.name),
        ));
    }
    Ok(())
}

fn validate_group(index: usize, group: &ProxyGroup) -> Result<(), PatchError> {
    if group.name.trim().is_empty() || group.group_type.trim().is_empty() {
        return Err(malformed(index, "proxy group needs a name and a type"));
    }
    Ok(())
}
