use std::collections::{BTreeMap, HashSet};
use std::path::Path;

use crate::error::{HangarError, Result};
use crate::models::{
    ConfigDocument, Node, ProfileConfig, ProxyGroup, RuleLine, Subscription, BUILTIN_POLICIES,
    CATCH_ALL,
};
use crate::rules::{default_rules, rule_providers, BuiltinRule, RuleSet};
use crate::utils::{extract_region, region_group_name};

/// 主选择组
pub const PROXY_GROUP: &str = "Proxy";
/// 自动测速组
pub const AUTO_GROUP: &str = "Auto";

/// 由合并结果决定、模板中的值会被忽略的字段
const GENERATED_KEYS: [&str; 6] = [
    "proxies",
    "mixed-port",
    "allow-lan",
    "mode",
    "log-level",
    "ipv6",
];

const RULE_PROVIDERS_KEY: &str = "rule-providers";

/// 基础模板
///
/// 模板中的规则排在规则源之前，模板中的代理组会追加所有地区分组，
/// 其它顶层字段（dns、sniffer、rule-providers 等）原样输出。
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BaseTemplate {
    pub extra: BTreeMap<String, serde_json::Value>,
    pub proxy_groups: Vec<ProxyGroup>,
    pub rules: Vec<String>,
}

impl BaseTemplate {
    /// 从 YAML 文本解析
    pub fn parse(content: &str) -> Result<Self> {
        let mut extra: BTreeMap<String, serde_json::Value> = serde_yaml::from_str(content)
            .map_err(|e| HangarError::Parse(format!("invalid base template: {}", e)))?;

        let proxy_groups = match extra.remove("proxy-groups") {
            Some(value) => serde_json::from_value(value).map_err(|e| {
                HangarError::Parse(format!("invalid proxy-groups in base template: {}", e))
            })?,
            None => Vec::new(),
        };
        let rules = match extra.remove("rules") {
            Some(value) => serde_json::from_value(value)
                .map_err(|e| HangarError::Parse(format!("invalid rules in base template: {}", e)))?,
            None => Vec::new(),
        };
        extra.retain(|key, _| !GENERATED_KEYS.contains(&key.as_str()));

        Ok(Self {
            extra,
            proxy_groups,
            rules,
        })
    }
}

/// 配置合并器
///
/// 输入相同则输出相同，不做任何 I/O。
pub struct ConfigBuilder {
    profile: ProfileConfig,
    template: BaseTemplate,
    builtin: Vec<BuiltinRule>,
}

impl ConfigBuilder {
    pub fn new(profile: ProfileConfig) -> Self {
        Self {
            profile,
            template: BaseTemplate::default(),
            builtin: Vec::new(),
        }
    }

    /// 使用基础模板
    pub fn with_template(mut self, template: BaseTemplate) -> Self {
        self.template = template;
        self
    }

    /// 写入内置规则集及引用它们的默认规则
    pub fn with_builtin_rules(mut self, rules: Vec<BuiltinRule>) -> Self {
        self.builtin = rules;
        self
    }

    /// 读取基础模板文件
    pub fn load_template(path: &Path) -> Result<BaseTemplate> {
        let content = std::fs::read_to_string(path)?;
        BaseTemplate::parse(&content).map_err(|e| match e {
            HangarError::Parse(message) => {
                HangarError::Parse(format!("{}: {}", path.display(), message))
            }
            other => other,
        })
    }

    /// 合并启用的订阅与规则源
    pub fn build(
        &self,
        subscriptions: &[Subscription],
        rule_sets: &[RuleSet],
    ) -> Result<ConfigDocument> {
        let mut taken: HashSet<String> = BUILTIN_POLICIES.iter().map(|s| s.to_string()).collect();
        taken.insert(PROXY_GROUP.to_string());
        taken.insert(AUTO_GROUP.to_string());

        // 1. 节点：按订阅顺序，同名保留先出现者
        let mut proxies: Vec<Node> = Vec::new();
        let mut contributed: Vec<(&Subscription, Vec<String>)> = Vec::new();
        for sub in subscriptions.iter().filter(|s| s.enabled) {
            let mut names = Vec::new();
            for node in &sub.cached_nodes {
                if taken.contains(&node.name) {
                    log::debug!(
                        "Skipping duplicate proxy name '{}' from '{}'",
                        node.name,
                        sub.name
                    );
                    continue;
                }
                taken.insert(node.name.clone());
                names.push(node.name.clone());
                proxies.push(node.clone());
            }
            contributed.push((sub, names));
        }

        if proxies.is_empty() {
            return Err(HangarError::EmptyConfiguration);
        }
        let node_names: Vec<String> = proxies.iter().map(|p| p.name.clone()).collect();

        // 2. 订阅分组
        let mut subscription_groups = Vec::new();
        for (sub, names) in contributed {
            if names.is_empty() {
                continue;
            }
            if taken.contains(&sub.name) {
                log::warn!(
                    "Subscription group name '{}' collides with an existing name, skipped",
                    sub.name
                );
                continue;
            }
            taken.insert(sub.name.clone());
            subscription_groups.push(ProxyGroup::select(&sub.name, names));
        }

        // 3. 模板分组
        let mut template_groups = Vec::new();
        for group in &self.template.proxy_groups {
            if taken.contains(&group.name) {
                log::warn!(
                    "Template group name '{}' collides with an existing name, skipped",
                    group.name
                );
                continue;
            }
            taken.insert(group.name.clone());
            template_groups.push(group.clone());
        }

        // 4. 地区分组，按地区代码排序
        let mut regions: BTreeMap<&'static str, Vec<String>> = BTreeMap::new();
        for name in &node_names {
            if let Some(code) = extract_region(name) {
                regions.entry(code).or_default().push(name.clone());
            }
        }
        let mut region_groups = Vec::new();
        for (code, names) in regions {
            let group_name = region_group_name(code);
            if taken.contains(&group_name) {
                log::warn!(
                    "Region group name '{}' collides with an existing name, skipped",
                    group_name
                );
                continue;
            }
            taken.insert(group_name.clone());
            region_groups.push(ProxyGroup::select(&group_name, names));
        }
        let region_names: Vec<String> = region_groups.iter().map(|g| g.name.clone()).collect();

        for group in &mut template_groups {
            Self::complete_template_group(group, &region_names, &taken);
        }

        let mut selector = vec![AUTO_GROUP.to_string()];
        selector.extend(subscription_groups.iter().map(|g| g.name.clone()));
        selector.extend(region_names);
        selector.push("DIRECT".to_string());

        let mut proxy_groups = vec![
            ProxyGroup::select(PROXY_GROUP, selector),
            ProxyGroup::url_test(AUTO_GROUP, node_names),
        ];
        proxy_groups.extend(subscription_groups);
        proxy_groups.extend(template_groups);
        proxy_groups.extend(region_groups);

        // 5. 规则与规则集
        let rules = self.merge_rules(rule_sets, &taken);
        let mut extra = self.template.extra.clone();
        if !self.builtin.is_empty() {
            let providers = extra
                .entry(RULE_PROVIDERS_KEY.to_string())
                .or_insert_with(|| serde_json::Value::Object(serde_json::Map::new()));
            match providers.as_object_mut() {
                Some(map) => {
                    for (name, provider) in rule_providers(&self.builtin) {
                        map.entry(name).or_insert(provider);
                    }
                }
                None => {
                    log::warn!("Template rule-providers is not a mapping, builtin rules skipped")
                }
            }
        }

        log::info!(
            "Built configuration: {} proxies, {} groups, {} rules",
            proxies.len(),
            proxy_groups.len(),
            rules.len()
        );

        Ok(ConfigDocument {
            mixed_port: self.profile.mixed_port,
            allow_lan: self.profile.allow_lan,
            mode: self.profile.mode.clone(),
            log_level: self.profile.log_level.clone(),
            ipv6: self.profile.ipv6,
            extra,
            proxies,
            proxy_groups,
            rules,
        })
    }

    /// 模板分组追加地区分组，并去掉不存在的成员
    fn complete_template_group(
        group: &mut ProxyGroup,
        regions: &[String],
        known: &HashSet<String>,
    ) {
        for region in regions {
            if !group.proxies.contains(region) {
                group.proxies.push(region.clone());
            }
        }

        let own_name = group.name.clone();
        group.proxies.retain(|member| {
            let keep = member != &own_name && known.contains(member);
            if !keep {
                log::warn!("Dropping unknown member '{}' from group '{}'", member, own_name);
            }
            keep
        });
        if group.proxies.is_empty() && !group.extra.contains_key("use") {
            group.proxies.push("DIRECT".to_string());
        }
    }

    /// 合并规则：模板规则在前，随后是规则源与内置默认规则
    ///
    /// 补全/修正策略，去掉重复规则，最后追加兜底规则。兜底策略优先取模板中的 MATCH。
    fn merge_rules(&self, rule_sets: &[RuleSet], policies: &HashSet<String>) -> Vec<String> {
        let mut seen: HashSet<String> = HashSet::new();
        let mut rules = Vec::new();
        let mut catch_all_target = PROXY_GROUP.to_string();

        let mut push = |line: &str, rules: &mut Vec<String>| {
            let Some(mut rule) = RuleLine::parse_lenient(line, PROXY_GROUP) else {
                return;
            };
            if !policies.contains(&rule.target) {
                log::debug!("Rule target '{}' not found, using {}", rule.target, PROXY_GROUP);
                rule.target = PROXY_GROUP.to_string();
            }
            if seen.insert(rule.key()) {
                rules.push(rule.render());
            }
        };

        for line in &self.template.rules {
            if let Ok(rule) = RuleLine::parse(line) {
                if rule.is_catch_all() {
                    if policies.contains(&rule.target) {
                        catch_all_target = rule.target;
                    }
                    continue;
                }
            }
            push(line, &mut rules);
        }
        for rule_set in rule_sets {
            for line in &rule_set.rules {
                push(line, &mut rules);
            }
        }
        for line in default_rules(&self.builtin, PROXY_GROUP) {
            push(&line, &mut rules);
        }

        rules.push(format!("{},{}", CATCH_ALL, catch_all_target));
        rules
    }
}
