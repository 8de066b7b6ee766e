use anyhow::Result;
use std::path::{Path, PathBuf};

/// 数据目录环境变量
pub const HANGAR_HOME_ENV: &str = "HANGAR_HOME";

/// 获取应用数据目录（`HANGAR_HOME` 优先，否则为 `~/.hangar`）
pub fn get_app_data_dir() -> Result<PathBuf> {
    if let Some(dir) = std::env::var_os(HANGAR_HOME_ENV).filter(|v| !v.is_empty()) {
        return Ok(PathBuf::from(dir));
    }

    let path = dirs::home_dir()
        .ok_or_else(|| anyhow::anyhow!("Cannot find home directory"))?
        .join(".hangar");
    Ok(path)
}

/// 数据目录下的文件布局
#[derive(Debug, Clone)]
pub struct DataLayout {
    root: PathBuf,
}

impl DataLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// 创建所有子目录
    pub fn ensure_dirs(&self) -> std::io::Result<()> {
        std::fs::create_dir_all(self.proxies_cache_dir())?;
        std::fs::create_dir_all(self.rules_cache_dir())?;
        std::fs::create_dir_all(self.versions_dir())?;
        Ok(())
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// 应用设置文件
    pub fn config_path(&self) -> PathBuf {
        self.root.join("config.json")
    }

    /// 订阅列表文件
    pub fn subscriptions_path(&self) -> PathBuf {
        self.root.join("subscriptions.json")
    }

    /// 订阅节点缓存目录
    pub fn proxies_cache_dir(&self) -> PathBuf {
        self.root.join("cache").join("proxies")
    }

    /// 规则集缓存目录
    pub fn rules_cache_dir(&self) -> PathBuf {
        self.root.join("cache").join("rules")
    }

    /// 版本快照目录
    pub fn versions_dir(&self) -> PathBuf {
        self.root.join("versions")
    }
}

/// 原子写入：先写临时文件再重命名，失败时原文件保持不变
pub fn write_atomic(path: &Path, content: &[u8]) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();
    let tmp_name = format!(".{}.{}.tmp", file_name, uuid::Uuid::new_v4().simple());
    let tmp_path = path.with_file_name(tmp_name);

    if let Err(e) = std::fs::write(&tmp_path, content) {
        let _ = std::fs::remove_file(&tmp_path);
        return Err(e);
    }
    if let Err(e) = std::fs::rename(&tmp_path, path) {
        let _ = std::fs::remove_file(&tmp_path);
        return Err(e);
    }
    Ok(())
}
