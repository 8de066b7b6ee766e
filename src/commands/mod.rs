pub mod ai;
pub mod config;
pub mod notification;
pub mod rules;
pub mod server;
pub mod settings;
pub mod subscription;

use anyhow::{Context, Result};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::{Arc, PoisonError, RwLock};

use crate::config::ConfigManager;
use crate::error::HangarError;
use crate::models::{HangarConfig, Severity};
use crate::notifications::NotificationLog;
use crate::rules::RuleSetCache;
use crate::server::ProxyServer;
use crate::subscription::{Downloader, SubscriptionFetcher, SubscriptionStore};
use crate::utils::DataLayout;
use crate::version::VersionStore;

/// 应用状态
pub struct AppState {
    pub layout: DataLayout,
    pub config_manager: ConfigManager,
    pub settings: RwLock<HangarConfig>,
    pub subscriptions: Arc<SubscriptionStore>,
    pub versions: Arc<VersionStore>,
    pub notifications: Arc<NotificationLog>,
    pub server: ProxyServer,
}

impl AppState {
    /// 初始化应用状态
    ///
    /// 版本库损坏时直接失败，不以空历史继续运行。
    pub fn init(data_dir: impl Into<PathBuf>) -> Result<Self> {
        let layout = DataLayout::new(data_dir);
        layout
            .ensure_dirs()
            .with_context(|| format!("Failed to create data directory {:?}", layout.root()))?;

        let config_manager = ConfigManager::new(layout.config_path());
        let settings = config_manager.load().context("Failed to load settings")?;
        let subscriptions =
            Arc::new(SubscriptionStore::open(&layout).context("Failed to load subscriptions")?);
        let versions = Arc::new(
            VersionStore::open(layout.versions_dir()).context("Failed to open version store")?,
        );
        let server = ProxyServer::new(versions.clone());

        log::info!("App state initialized at {:?}", layout.root());
        Ok(Self {
            layout,
            config_manager,
            settings: RwLock::new(settings),
            subscriptions,
            versions,
            notifications: Arc::new(NotificationLog::new()),
            server,
        })
    }

    /// 当前设置的快照
    pub fn settings(&self) -> HangarConfig {
        self.settings.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// 修改并保存设置；校验或写入失败时保持原设置不变
    pub(crate) fn update_settings<T, F>(&self, f: F) -> Result<T, HangarError>
    where
        F: FnOnce(&mut HangarConfig) -> Result<T, HangarError>,
    {
        let mut guard = self.settings.write().unwrap_or_else(PoisonError::into_inner);
        let mut next = guard.clone();
        let value = f(&mut next)?;
        self.config_manager.save(&next)?;
        *guard = next;
        Ok(value)
    }

    fn downloader(&self) -> Result<Downloader, HangarError> {
        Downloader::new(&self.settings().fetch)
    }

    pub(crate) fn fetcher(&self) -> Result<SubscriptionFetcher, HangarError> {
        Ok(SubscriptionFetcher::new(self.downloader()?))
    }

    pub(crate) fn rule_cache(&self) -> Result<RuleSetCache, HangarError> {
        Ok(RuleSetCache::new(self.layout.rules_cache_dir(), self.downloader()?))
    }

    pub(crate) fn notify_error(&self, title: &str, message: &str) {
        self.notifications.record(title, message, Severity::Error);
    }

    pub(crate) fn notify_info(&self, title: &str, message: &str) {
        self.notifications.record(title, message, Severity::Info);
    }
}

/// 批量操作中单项的结果
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct BatchOutcome {
    pub id: String,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl BatchOutcome {
    pub(crate) fn from_result<T>(id: String, result: &Result<T, HangarError>) -> Self {
        match result {
            Ok(_) => Self {
                id,
                success: true,
                error: None,
            },
            Err(e) => Self {
                id,
                success: false,
                error: Some(e.to_string()),
            },
        }
    }
}
