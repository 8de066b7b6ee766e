use serde::{Deserialize, Serialize};

/// 版本来源
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum VersionOrigin {
    /// 由订阅合并生成
    Build,
    /// 应用补丁（手动或 AI）
    Patch,
    /// 用户手动保存
    Manual,
    /// 回滚生成
    Rollback,
}

impl std::fmt::Display for VersionOrigin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Build => "build",
            Self::Patch => "patch",
            Self::Manual => "manual",
            Self::Rollback => "rollback",
        };
        f.write_str(name)
    }
}

/// 配置版本（不可变快照的元数据）
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ConfigVersion {
    /// `v_<unix 秒>_<序号>`
    pub id: String,
    /// 单调递增序号，删除后也不会复用
    pub seq: u64,
    pub timestamp: i64,
    pub description: String,
    pub origin: VersionOrigin,
    pub file_path: String,
    /// 快照内容的 sha256
    pub digest: String,
}

/// 差异行
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", content = "line", rename_all = "lowercase")]
pub enum DiffLine {
    Same(String),
    Added(String),
    Removed(String),
}

impl DiffLine {
    /// 统一 diff 风格的单行输出
    pub fn render(&self) -> String {
        match self {
            Self::Same(line) => format!("  {}", line),
            Self::Added(line) => format!("+ {}", line),
            Self::Removed(line) => format!("- {}", line),
        }
    }
}
