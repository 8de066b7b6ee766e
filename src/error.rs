use std::net::SocketAddr;

use thiserror::Error;

use crate::config::PatchError;

/// 引擎统一错误类型
///
/// 所有跨越命令边界的错误最终都会被转换为可直接展示给用户的字符串。
#[derive(Debug, Error)]
pub enum HangarError {
    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },

    #[error("network error: {0}")]
    Network(String),

    #[error("parse error: {0}")]
    Parse(String),

    #[error("patch rejected: {0}")]
    Validation(#[from] PatchError),

    #[error("failed to bind {addr}: {message}")]
    Bind { addr: String, message: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("no enabled subscription yielded any proxy node")]
    EmptyConfiguration,

    #[error("subscription '{0}' is disabled and cannot be refreshed")]
    SubscriptionDisabled(String),

    #[error("proxy server is already running on {0}")]
    AlreadyRunning(SocketAddr),

    #[error("proxy server is not running")]
    NotRunning,

    #[error("configuration changed since version {expected} (current: {current}), retry")]
    StaleVersion { expected: String, current: String },

    #[error("cannot delete the only remaining version")]
    LastVersion,

    #[error("no active configuration, refresh subscriptions and build first")]
    NoActiveDocument,

    #[error("version store is corrupted: {0}")]
    Corrupted(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("AI provider error: {0}")]
    Llm(String),

    #[error("serialization error: {0}")]
    Serialization(String),
}

impl HangarError {
    pub fn not_found(kind: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound {
            kind,
            id: id.into(),
        }
    }
}

impl From<serde_json::Error> for HangarError {
    fn from(e: serde_json::Error) -> Self {
        Self::Serialization(e.to_string())
    }
}

impl From<serde_yaml::Error> for HangarError {
    fn from(e: serde_yaml::Error) -> Self {
        Self::Serialization(e.to_string())
    }
}

pub type Result<T, E = HangarError> = std::result::Result<T, E>;
