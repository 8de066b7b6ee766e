use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::time::Duration;

use serde_json::json;

use crate::config::OPERATION_TAGS;
use crate::error::{HangarError, Result};
use crate::models::{ConfigDocument, LlmConfig, ProposedPatch};
use crate::utils::extract_region;

/// 提示词中展示的规则条数
const RULES_HEAD: usize = 30;
/// 单个上下文文件的最大字符数
const MAX_CONTEXT_CHARS: usize = 8_000;

/// 生成补丁时提供给模型的配置概况
#[derive(Debug, Clone, Default)]
pub struct PromptContext {
    pub groups: Vec<String>,
    pub nodes_by_region: BTreeMap<String, usize>,
    pub rules_head: Vec<String>,
    pub total_rules: usize,
    /// 用户附加的文件（名称, 内容）
    pub files: Vec<(String, String)>,
}

impl PromptContext {
    pub fn from_document(document: &ConfigDocument, files: Vec<(String, String)>) -> Self {
        let mut nodes_by_region: BTreeMap<String, usize> = BTreeMap::new();
        for proxy in &document.proxies {
            let region = extract_region(&proxy.name).unwrap_or("OTHER");
            *nodes_by_region.entry(region.to_string()).or_default() += 1;
        }

        Self {
            groups: document.proxy_groups.iter().map(|g| g.name.clone()).collect(),
            nodes_by_region,
            rules_head: document.rules.iter().take(RULES_HEAD).cloned().collect(),
            total_rules: document.rules.len(),
            files,
        }
    }

    /// 系统提示词
    pub fn system_prompt(&self) -> String {
        let mut prompt = String::from(
            "你是一个 Clash / Mihomo 配置专家。\
             用户会描述他们对代理规则的需求，你需要输出结构化的配置修改。\n\n",
        );

        let _ = writeln!(prompt, "可用的代理组: {}", self.groups.join(", "));
        prompt.push_str("内置策略: DIRECT, REJECT\n\n节点数量（按地区）:\n");
        for (region, count) in &self.nodes_by_region {
            let _ = writeln!(prompt, "  {}: {}", region, count);
        }

        let _ = writeln!(
            prompt,
            "\n当前规则（共 {} 条，前 {} 条）:",
            self.total_rules,
            self.rules_head.len()
        );
        for rule in &self.rules_head {
            let _ = writeln!(prompt, "  {}", rule);
        }

        for (name, content) in &self.files {
            let content: String = content.chars().take(MAX_CONTEXT_CHARS).collect();
            let _ = write!(prompt, "\n用户提供的文件 {}:\n```\n{}\n```\n", name, content);
        }

        let _ = write!(
            prompt,
            r#"
可用的操作（op 字段）: {}
示例:
  {{"op": "add_rule", "rule": "DOMAIN-SUFFIX,netflix.com", "target": "US 地区", "position": 0}}
  {{"op": "remove_rule", "rule": "DOMAIN,example.com"}}
  {{"op": "modify_rule", "rule": "DOMAIN-SUFFIX,google.com", "target": "Proxy"}}
  {{"op": "add_proxy_group", "group": {{"name": "Media", "type": "select", "proxies": ["Proxy"]}}}}
  {{"op": "modify_proxy_group", "name": "Auto", "type": "fallback"}}
  {{"op": "remove_proxy_group", "name": "Media"}}

输出格式（必须是有效的 JSON，不要输出其他文字）:
{{
  "description": "简短描述这次修改做了什么",
  "operations": [ ... ]
}}

注意：
1. 规则目标必须是已有的代理组、节点或内置策略
2. 不要添加或删除最后的 MATCH 规则
3. position 省略时规则会插在 MATCH 之前，0 表示优先级最高
"#,
            OPERATION_TAGS.join(", ")
        );
        prompt
    }
}

/// OpenAI 兼容的对话接口客户端
pub struct LlmClient {
    client: reqwest::Client,
    config: LlmConfig,
}

impl LlmClient {
    pub fn new(config: LlmConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs.max(1)))
            .build()
            .map_err(|e| HangarError::Llm(format!("failed to build HTTP client: {}", e)))?;
        Ok(Self { client, config })
    }

    /// 根据用户描述生成补丁建议
    pub async fn generate_patch(
        &self,
        prompt: &str,
        context: &PromptContext,
    ) -> Result<ProposedPatch> {
        if prompt.trim().is_empty() {
            return Err(HangarError::InvalidInput("prompt must not be empty".to_string()));
        }

        let body = json!({
            "model": self.config.model,
            "messages": [
                {"role": "system", "content": context.system_prompt()},
                {"role": "user", "content": prompt}
            ],
            "temperature": 0.2,
            "max_tokens": 2000
        });

        log::info!("Requesting patch from model {}", self.config.model);
        let content = self.chat(&body).await?;
        let proposal = parse_proposal(&content)?;
        log::info!(
            "Model proposed {} operations: {}",
            proposal.operations.len(),
            proposal.description
        );
        Ok(proposal)
    }

    /// 测试接口连通性
    pub async fn test_connection(&self) -> Result<String> {
        let body = json!({
            "model": self.config.model,
            "messages": [
                {"role": "user", "content": "Say 'OK' if you can read this."}
            ],
            "max_tokens": 10
        });
        let reply = self.chat(&body).await?;
        Ok(reply.trim().to_string())
    }

    async fn chat(&self, body: &serde_json::Value) -> Result<String> {
        if self.config.api_key.trim().is_empty() {
            return Err(HangarError::InvalidInput(
                "LLM API key is not configured".to_string(),
            ));
        }

        let url = format!("{}/chat/completions", self.config.base_url.trim_end_matches('/'));
        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.config.api_key)
            .json(body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    HangarError::Llm("request timed out".to_string())
                } else {
                    HangarError::Llm(format!("failed to call {}: {}", url, e))
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(HangarError::Llm(format!("HTTP {}: {}", status, text)));
        }

        let value: serde_json::Value = response
            .json()
            .await
            .map_err(|e| HangarError::Llm(format!("invalid response body: {}", e)))?;
        value["choices"][0]["message"]["content"]
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| HangarError::Llm("response has no message content".to_string()))
    }
}

/// 解析模型回复，允许外层包裹 Markdown 代码块
pub fn parse_proposal(content: &str) -> Result<ProposedPatch> {
    let json_text = strip_code_fence(content);
    serde_json::from_str::<ProposedPatch>(json_text)
        .map_err(|e| HangarError::Llm(format!("model reply is not a valid patch: {}", e)))
}

fn strip_code_fence(content: &str) -> &str {
    let trimmed = content.trim();
    if let Some(start) = trimmed.find("```") {
        let after = &trimmed[start + 3..];
        // 跳过语言标记（```json）
        let body = after.find('\n').map_or(after, |i| &after[i + 1..]);
        if let Some(end) = body.rfind("```") {
            return body[..end].trim();
        }
    }
    match (trimmed.find('{'), trimmed.rfind('}')) {
        (Some(start), Some(end)) if start < end => &trimmed[start..=end],
        _ => trimmed,
    }
}
