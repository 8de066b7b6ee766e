use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use chrono::Utc;
use serde::{Deserialize, Serialize};

use super::diff_lines;
use crate::error::{HangarError, Result};
use crate::models::{ConfigDocument, ConfigVersion, DiffLine, VersionOrigin};
use crate::utils::{content_digest, write_atomic};

const INDEX_FILE: &str = "index.json";

/// versions/index.json
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct VersionIndex {
    /// 下一个版本序号，只增不减
    #[serde(default = "first_seq")]
    next_seq: u64,
    /// 当前生效的版本
    #[serde(default)]
    active: Option<String>,
    /// 按序号升序排列
    #[serde(default)]
    versions: Vec<ConfigVersion>,
}

fn first_seq() -> u64 {
    1
}

/// 当前生效的配置
#[derive(Debug)]
pub struct ActiveConfig {
    pub version: ConfigVersion,
    pub document: ConfigDocument,
    /// 渲染后的 YAML，与快照文件内容一致
    pub yaml: String,
}

/// 版本存储
///
/// 快照文件一旦写入不再修改。所有写操作经由 `commit_lock` 串行化；
/// 当前配置以 `Arc` 形式发布，读者只在指针替换时短暂持锁。
pub struct VersionStore {
    dir: PathBuf,
    index: RwLock<VersionIndex>,
    current: RwLock<Option<Arc<ActiveConfig>>>,
    commit_lock: Mutex<()>,
}

impl VersionStore {
    /// 打开版本目录并校验每个快照
    ///
    /// 索引损坏、快照缺失或摘要不匹配都返回 `Corrupted`。
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;

        let index_path = dir.join(INDEX_FILE);
        let mut index = if index_path.exists() {
            let content = std::fs::read_to_string(&index_path)?;
            serde_json::from_str::<VersionIndex>(&content)
                .map_err(|e| HangarError::Corrupted(format!("{}: {}", index_path.display(), e)))?
        } else {
            VersionIndex {
                next_seq: first_seq(),
                ..Default::default()
            }
        };
        index.versions.sort_by_key(|v| v.seq);

        for version in &index.versions {
            let path = snapshot_path(&dir, &version.id);
            let content = std::fs::read_to_string(&path).map_err(|e| {
                HangarError::Corrupted(format!("snapshot {} unreadable: {}", version.id, e))
            })?;
            if content_digest(&content) != version.digest {
                return Err(HangarError::Corrupted(format!(
                    "snapshot {} does not match its recorded digest",
                    version.id
                )));
            }
            if version.seq >= index.next_seq {
                return Err(HangarError::Corrupted(format!(
                    "snapshot {} has sequence {} beyond the recorded counter {}",
                    version.id, version.seq, index.next_seq
                )));
            }
        }

        let current = match (&index.active, index.versions.is_empty()) {
            (None, true) => None,
            (Some(id), false) => {
                let version = index
                    .versions
                    .iter()
                    .find(|v| &v.id == id)
                    .cloned()
                    .ok_or_else(|| {
                        HangarError::Corrupted(format!("active version {} is not in the index", id))
                    })?;
                Some(Arc::new(load_active(&dir, version)?))
            }
            _ => {
                return Err(HangarError::Corrupted(
                    "active version does not match the recorded versions".to_string(),
                ))
            }
        };

        log::info!(
            "Loaded {} config versions, active: {}",
            index.versions.len(),
            index.active.as_deref().unwrap_or("none")
        );

        Ok(Self {
            dir,
            index: RwLock::new(index),
            current: RwLock::new(current),
            commit_lock: Mutex::new(()),
        })
    }

    /// 当前生效配置
    pub fn current(&self) -> Option<Arc<ActiveConfig>> {
        self.current.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// 当前生效版本 id
    pub fn active_id(&self) -> Option<String> {
        self.read_index().active.clone()
    }

    /// 所有版本，最新的在前
    pub fn list(&self) -> Vec<ConfigVersion> {
        let mut versions = self.read_index().versions.clone();
        versions.reverse();
        versions
    }

    /// 获取版本元数据
    pub fn get(&self, id: &str) -> Result<ConfigVersion> {
        self.read_index()
            .versions
            .iter()
            .find(|v| v.id == id)
            .cloned()
            .ok_or_else(|| HangarError::not_found("version", id))
    }

    /// 读取快照内容
    pub fn content(&self, id: &str) -> Result<String> {
        let version = self.get(id)?;
        Ok(std::fs::read_to_string(snapshot_path(&self.dir, &version.id))?)
    }

    /// 读取并解析快照
    pub fn load_document(&self, id: &str) -> Result<ConfigDocument> {
        let content = self.content(id)?;
        ConfigDocument::from_yaml(&content)
            .map_err(|e| {
                HangarError::Corrupted(format!("snapshot {} is not a valid document: {}", id, e))
            })
    }

    /// 保存新快照并设为当前版本
    pub fn snapshot(
        &self,
        document: &ConfigDocument,
        description: &str,
        origin: VersionOrigin,
    ) -> Result<ConfigVersion> {
        let _guard = self.commit_lock.lock().unwrap_or_else(PoisonError::into_inner);
        self.snapshot_locked(document, description, origin)
    }

    /// 与当前版本内容不同时才保存快照，返回 (版本, 是否新建)
    pub fn snapshot_if_changed(
        &self,
        document: &ConfigDocument,
        description: &str,
        origin: VersionOrigin,
    ) -> Result<(ConfigVersion, bool)> {
        let _guard = self.commit_lock.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(current) = self.current() {
            if current.yaml == document.to_yaml()? {
                log::info!("Configuration unchanged, keeping version {}", current.version.id);
                return Ok((current.version.clone(), false));
            }
        }
        let version = self.snapshot_locked(document, description, origin)?;
        Ok((version, true))
    }

    /// 读取当前配置、变换、写入新版本，整体串行执行
    ///
    /// `base_version` 与当前版本不一致时返回 `StaleVersion`，不做任何修改。
    pub fn commit<F>(
        &self,
        base_version: Option<&str>,
        description: &str,
        origin: VersionOrigin,
        transform: F,
    ) -> Result<ConfigVersion>
    where
        F: FnOnce(&ConfigDocument) -> Result<ConfigDocument>,
    {
        let _guard = self.commit_lock.lock().unwrap_or_else(PoisonError::into_inner);
        let current = self.current().ok_or(HangarError::NoActiveDocument)?;

        if let Some(expected) = base_version {
            if expected != current.version.id {
                return Err(HangarError::StaleVersion {
                    expected: expected.to_string(),
                    current: current.version.id.clone(),
                });
            }
        }

        let document = transform(&current.document)?;
        self.snapshot_locked(&document, description, origin)
    }

    /// 回滚到指定版本（生成新版本，不改写历史）
    pub fn rollback(&self, id: &str) -> Result<ConfigVersion> {
        let _guard = self.commit_lock.lock().unwrap_or_else(PoisonError::into_inner);
        let document = self.load_document(id)?;
        let description = format!("restored from {}", id);
        let version = self.snapshot_locked(&document, &description, VersionOrigin::Rollback)?;
        log::info!("Rolled back to {} as {}", id, version.id);
        Ok(version)
    }

    /// 删除版本
    ///
    /// 不允许删除最后一个版本；删除当前版本时由最近的剩余版本接替。
    pub fn delete(&self, id: &str) -> Result<()> {
        let _guard = self.commit_lock.lock().unwrap_or_else(PoisonError::into_inner);
        let mut next = self.read_index().clone();

        let position = next
            .versions
            .iter()
            .position(|v| v.id == id)
            .ok_or_else(|| HangarError::not_found("version", id))?;
        if next.versions.len() == 1 {
            return Err(HangarError::LastVersion);
        }
        next.versions.remove(position);

        let promoted = if next.active.as_deref() == Some(id) {
            let latest = next
                .versions
                .last()
                .cloned()
                .ok_or(HangarError::LastVersion)?;
            next.active = Some(latest.id.clone());
            Some(load_active(&self.dir, latest)?)
        } else {
            None
        };

        self.persist_index(&next)?;
        *self.index.write().unwrap_or_else(PoisonError::into_inner) = next;
        if let Some(active) = promoted {
            log::info!("Active version deleted, promoted {}", active.version.id);
            *self.current.write().unwrap_or_else(PoisonError::into_inner) = Some(Arc::new(active));
        }

        let path = snapshot_path(&self.dir, id);
        if let Err(e) = std::fs::remove_file(&path) {
            log::warn!("Failed to remove snapshot file {:?}: {}", path, e);
        }
        log::info!("Deleted version {}", id);
        Ok(())
    }

    /// 比较两个版本
    pub fn diff(&self, old_id: &str, new_id: &str) -> Result<Vec<DiffLine>> {
        let old = self.content(old_id)?;
        let new = self.content(new_id)?;
        Ok(diff_lines(&old, &new))
    }

    fn snapshot_locked(
        &self,
        document: &ConfigDocument,
        description: &str,
        origin: VersionOrigin,
    ) -> Result<ConfigVersion> {
        let yaml = document.to_yaml()?;
        let mut next = self.read_index().clone();

        let seq = next.next_seq;
        let timestamp = Utc::now().timestamp();
        let id = format!("v_{}_{}", timestamp, seq);
        let path = snapshot_path(&self.dir, &id);

        let version = ConfigVersion {
            id: id.clone(),
            seq,
            timestamp,
            description: description.to_string(),
            origin,
            file_path: path.to_string_lossy().to_string(),
            digest: content_digest(&yaml),
        };

        write_atomic(&path, yaml.as_bytes())?;
        next.next_seq = seq + 1;
        next.active = Some(id.clone());
        next.versions.push(version.clone());

        if let Err(e) = self.persist_index(&next) {
            let _ = std::fs::remove_file(&path);
            return Err(e);
        }

        let active = ActiveConfig {
            version: version.clone(),
            document: document.clone(),
            yaml,
        };
        *self.index.write().unwrap_or_else(PoisonError::into_inner) = next;
        *self.current.write().unwrap_or_else(PoisonError::into_inner) = Some(Arc::new(active));

        log::info!("Saved config version {} ({}): {}", id, origin, description);
        Ok(version)
    }

    fn persist_index(&self, index: &VersionIndex) -> Result<()> {
        let json = serde_json::to_string_pretty(index)?;
        write_atomic(&self.dir.join(INDEX_FILE), json.as_bytes())?;
        Ok(())
    }

    fn read_index(&self) -> std::sync::RwLockReadGuard<'_, VersionIndex> {
        self.index.read().unwrap_or_else(PoisonError::into_inner)
    }
}

fn snapshot_path(dir: &Path, id: &str) -> PathBuf {
    dir.join(format!("{}.yaml", id))
}

fn load_active(dir: &Path, version: ConfigVersion) -> Result<ActiveConfig> {
    let yaml = std::fs::read_to_string(snapshot_path(dir, &version.id))
        .map_err(|e| HangarError::Corrupted(format!("snapshot {} unreadable: {}", version.id, e)))?;
    let document = ConfigDocument::from_yaml(&yaml)
        .map_err(|e| {
            HangarError::Corrupted(format!(
                "snapshot {} is not a valid document: {}",
                version.id, e
            ))
        })?;
    Ok(ActiveConfig {
        version,
        document,
        yaml,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Node;

    fn document(rule: &str) -> ConfigDocument {
        ConfigDocument {
            proxies: vec![Node::new("HK-01", "ss", "hk.example.com", 443)],
            rules: vec![rule.to_string(), "MATCH,DIRECT".to_string()],
            ..Default::default()
        }
    }

    #[test]
    fn test_snapshot_and_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let store = VersionStore::open(dir.path()).unwrap();
        assert!(store.current().is_none());

        let v1 = store
            .snapshot(&document("DOMAIN,a.com,DIRECT"), "first", VersionOrigin::Build)
            .unwrap();
        let v2 = store
            .snapshot(&document("DOMAIN,b.com,DIRECT"), "second", VersionOrigin::Manual)
            .unwrap();
        assert_eq!(v1.seq, 1);
        assert_eq!(v2.seq, 2);
        assert!(v2.id.ends_with("_2"));

        let reopened = VersionStore::open(dir.path()).unwrap();
        let ids: Vec<String> = reopened.list().into_iter().map(|v| v.id).collect();
        assert_eq!(ids, vec![v2.id.clone(), v1.id.clone()]);
        assert_eq!(reopened.current().unwrap().version.id, v2.id);
        assert_eq!(reopened.load_document(&v1.id).unwrap(), document("DOMAIN,a.com,DIRECT"));
    }

    #[test]
    fn test_rollback_creates_new_version() {
        let dir = tempfile::tempdir().unwrap();
        let store = VersionStore::open(dir.path()).unwrap();
        let v1 = store
            .snapshot(&document("DOMAIN,a.com,DIRECT"), "first", VersionOrigin::Build)
            .unwrap();
        store.snapshot(&document("DOMAIN,b.com,DIRECT"), "second", VersionOrigin::Patch).unwrap();

        let v3 = store.rollback(&v1.id).unwrap();
        assert_eq!(v3.origin, VersionOrigin::Rollback);
        assert_eq!(v3.description, format!("restored from {}", v1.id));
        assert_eq!(store.content(&v3.id).unwrap(), store.content(&v1.id).unwrap());
        assert_eq!(store.list().len(), 3);
        assert_eq!(store.current().unwrap().document, document("DOMAIN,a.com,DIRECT"));
    }

    #[test]
    fn test_commit_rejects_stale_base() {
        let dir = tempfile::tempdir().unwrap();
        let store = VersionStore::open(dir.path()).unwrap();

        let err = store
            .commit(None, "x", VersionOrigin::Patch, |doc| Ok(doc.clone()))
            .unwrap_err();
        assert!(matches!(err, HangarError::NoActiveDocument));

        let v1 = store
            .snapshot(&document("DOMAIN,a.com,DIRECT"), "first", VersionOrigin::Build)
            .unwrap();
        let v2 = store
            .commit(Some(&v1.id), "patched", VersionOrigin::Patch, |doc| {
                let mut next = doc.clone();
                next.rules.insert(0, "DOMAIN,c.com,DIRECT".into());
                Ok(next)
            })
            .unwrap();

        let err = store
            .commit(Some(&v1.id), "stale", VersionOrigin::Patch, |doc| Ok(doc.clone()))
            .unwrap_err();
        assert!(matches!(err, HangarError::StaleVersion { .. }));
        assert_eq!(store.active_id().as_deref(), Some(v2.id.as_str()));
    }

    #[test]
    fn test_failed_transform_creates_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let store = VersionStore::open(dir.path()).unwrap();
        store.snapshot(&document("DOMAIN,a.com,DIRECT"), "first", VersionOrigin::Build).unwrap();

        let err = store
            .commit(None, "broken", VersionOrigin::Patch, |_| {
                Err(HangarError::InvalidInput("nope".into()))
            })
            .unwrap_err();
        assert!(matches!(err, HangarError::InvalidInput(_)));
        assert_eq!(store.list().len(), 1);
    }

    #[test]
    fn test_delete_policy() {
        let dir = tempfile::tempdir().unwrap();
        let store = VersionStore::open(dir.path()).unwrap();
        let v1 = store
            .snapshot(&document("DOMAIN,a.com,DIRECT"), "first", VersionOrigin::Build)
            .unwrap();
        let v2 = store
            .snapshot(&document("DOMAIN,b.com,DIRECT"), "second", VersionOrigin::Build)
            .unwrap();

        assert!(matches!(store.delete("v_0_99"), Err(HangarError::NotFound { .. })));

        store.delete(&v2.id).unwrap();
        assert_eq!(store.active_id().as_deref(), Some(v1.id.as_str()));
        assert_eq!(store.current().unwrap().document, document("DOMAIN,a.com,DIRECT"));
        assert!(matches!(store.delete(&v1.id), Err(HangarError::LastVersion)));

        // 序号不复用
        let v3 = store
            .snapshot(&document("DOMAIN,c.com,DIRECT"), "third", VersionOrigin::Build)
            .unwrap();
        assert_eq!(v3.seq, 3);
    }

    #[test]
    fn test_snapshot_if_changed() {
        let dir = tempfile::tempdir().unwrap();
        let store = VersionStore::open(dir.path()).unwrap();
        let (v1, created) = store
            .snapshot_if_changed(&document("DOMAIN,a.com,DIRECT"), "build", VersionOrigin::Build)
            .unwrap();
        assert!(created);

        let (same, created) = store
            .snapshot_if_changed(&document("DOMAIN,a.com,DIRECT"), "build", VersionOrigin::Build)
            .unwrap();
        assert!(!created);
        assert_eq!(same.id, v1.id);
        assert_eq!(store.list().len(), 1);
    }

    #[test]
    fn test_tampered_snapshot_is_corrupted() {
        let dir = tempfile::tempdir().unwrap();
        let store = VersionStore::open(dir.path()).unwrap();
        let v1 = store
            .snapshot(&document("DOMAIN,a.com,DIRECT"), "first", VersionOrigin::Build)
            .unwrap();
        drop(store);

        std::fs::write(dir.path().join(format!("{}.yaml", v1.id)), "tampered: true\n").unwrap();
        assert!(matches!(VersionStore::open(dir.path()), Err(HangarError::Corrupted(_))));

        std::fs::remove_file(dir.path().join(format!("{}.yaml", v1.id))).unwrap();
        assert!(matches!(VersionStore::open(dir.path()), Err(HangarError::Corrupted(_))));

        std::fs::write(dir.path().join(INDEX_FILE), "{ not json").unwrap();
        assert!(matches!(VersionStore::open(dir.path()), Err(HangarError::Corrupted(_))));
    }

    #[test]
    fn test_diff_between_versions() {
        let dir = tempfile::tempdir().unwrap();
        let store = VersionStore::open(dir.path()).unwrap();
        let v1 = store
            .snapshot(&document("DOMAIN,a.com,DIRECT"), "first", VersionOrigin::Build)
            .unwrap();
        let v2 = store
            .snapshot(&document("DOMAIN,b.com,DIRECT"), "second", VersionOrigin::Build)
            .unwrap();

        let diff = store.diff(&v1.id, &v2.id).unwrap();
        let removed: Vec<&DiffLine> = diff
            .iter()
            .filter(|d| matches!(d, DiffLine::Removed(_)))
            .collect();
        let added: Vec<&DiffLine> = diff
            .iter()
            .filter(|d| matches!(d, DiffLine::Added(_)))
            .collect();
        assert_eq!(removed.len(), 1);
        assert_eq!(added.len(), 1);
        assert!(removed[0].render().contains("DOMAIN,a.com,DIRECT"));
        assert!(added[0].render().contains("DOMAIN,b.com,DIRECT"));
    }
}
