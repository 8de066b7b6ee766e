use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::ai::{LlmClient, PromptContext};
use crate::commands::config::commit_patch;
use crate::commands::AppState;
use crate::config::PatchEngine;
use crate::error::HangarError;
use crate::models::{ConfigVersion, LlmConfig, Patch};

/// AI 补丁建议，附带生成时所基于的版本
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AiProposal {
    pub description: String,
    pub operations: Vec<serde_json::Value>,
    pub base_version: Option<String>,
}

// ==================== AI 补丁 ====================

/// 根据自然语言描述生成补丁建议（不会修改配置）
pub async fn generate_ai_patch(
    state: &AppState,
    prompt: String,
    context_files: Vec<String>,
) -> Result<AiProposal, String> {
    let current = state
        .versions
        .current()
        .ok_or_else(|| HangarError::NoActiveDocument.to_string())?;

    let mut files = Vec::with_capacity(context_files.len());
    for path in &context_files {
        let content = std::fs::read_to_string(path)
            .map_err(|e| format!("Failed to read context file {}: {}", path, e))?;
        let name = Path::new(path)
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| path.clone());
        files.push((name, content));
    }

    let context = PromptContext::from_document(&current.document, files);
    let client = LlmClient::new(state.settings().llm).map_err(|e| e.to_string())?;
    let proposal = client
        .generate_patch(&prompt, &context)
        .await
        .map_err(|e| e.to_string())?;

    Ok(AiProposal {
        description: proposal.description,
        operations: proposal.operations,
        base_version: Some(current.version.id.clone()),
    })
}

/// 校验并应用 AI 给出的操作
///
/// 任何一个操作无法识别都会整体拒绝，不会生成新版本。
pub async fn apply_ai_patch(
    state: &AppState,
    description: String,
    operations: Vec<serde_json::Value>,
    base_version: Option<String>,
) -> Result<ConfigVersion, String> {
    let operations = PatchEngine::parse_operations(&operations)
        .map_err(|e| HangarError::Validation(e).to_string())?;
    let patch = Patch {
        description: format!("AI: {}", description.trim()),
        operations,
    };
    commit_patch(state, &patch, base_version.as_deref()).map_err(|e| e.to_string())
}

/// 测试 LLM 连接；未传入配置时使用已保存的设置
pub async fn test_llm_connection(
    state: &AppState,
    config: Option<LlmConfig>,
) -> Result<String, String> {
    let config = config.unwrap_or_else(|| state.settings().llm);
    let client = LlmClient::new(config).map_err(|e| e.to_string())?;
    client.test_connection().await.map_err(|e| e.to_string())
}
