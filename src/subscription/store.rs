use std::path::{Path, PathBuf};
use std::sync::{PoisonError, RwLock};

use chrono::Utc;

use crate::error::{HangarError, Result};
use crate::models::{Node, Subscription, SubscriptionList};
use crate::utils::{write_atomic, DataLayout};

/// 订阅存储
///
/// 订阅元数据保存在 subscriptions.json，节点缓存按订阅 id 存放在 cache/proxies 下。
/// 所有写操作在写锁内完成：先落盘，成功后才替换内存中的列表。
pub struct SubscriptionStore {
    list_path: PathBuf,
    cache_dir: PathBuf,
    subscriptions: RwLock<Vec<Subscription>>,
}

impl SubscriptionStore {
    /// 从数据目录加载订阅列表与节点缓存
    pub fn open(layout: &DataLayout) -> Result<Self> {
        let list_path = layout.subscriptions_path();
        let cache_dir = layout.proxies_cache_dir();
        std::fs::create_dir_all(&cache_dir)?;

        let mut subscriptions = if list_path.exists() {
            let content = std::fs::read_to_string(&list_path)?;
            serde_json::from_str::<SubscriptionList>(&content)
                .map_err(|e| HangarError::Corrupted(format!("{}: {}", list_path.display(), e)))?
                .subscriptions
        } else {
            Vec::new()
        };

        for sub in &mut subscriptions {
            let cache_path = cache_file(&cache_dir, &sub.id);
            if !cache_path.exists() {
                continue;
            }
            match std::fs::read_to_string(&cache_path)
                .map_err(|e| e.to_string())
                .and_then(|c| serde_yaml::from_str::<Vec<Node>>(&c).map_err(|e| e.to_string()))
            {
                Ok(nodes) => sub.cached_nodes = nodes,
                Err(e) => {
                    log::warn!("Failed to load node cache for '{}': {}", sub.name, e);
                    sub.clear_cache();
                }
            }
        }

        log::info!("Loaded {} subscriptions", subscriptions.len());
        Ok(Self {
            list_path,
            cache_dir,
            subscriptions: RwLock::new(subscriptions),
        })
    }

    /// 获取所有订阅（快照）
    pub fn list(&self) -> Vec<Subscription> {
        self.read().clone()
    }

    /// 获取单个订阅
    pub fn get(&self, id: &str) -> Result<Subscription> {
        self.read()
            .iter()
            .find(|s| s.id == id)
            .cloned()
            .ok_or_else(|| HangarError::not_found("subscription", id))
    }

    /// 添加订阅
    pub fn add(&self, name: &str, url: &str) -> Result<Subscription> {
        let name = validate_name(name)?;
        let url = validate_url(url)?;

        let mut guard = self.write();
        let mut next = guard.clone();
        let sub = Subscription::new(uuid::Uuid::new_v4().to_string(), name, url);
        next.push(sub.clone());
        self.persist(&next)?;
        *guard = next;

        log::info!("Added subscription '{}' ({})", sub.name, sub.id);
        Ok(sub)
    }

    /// 更新订阅；地址变化时丢弃旧缓存
    pub fn update(&self, id: &str, name: &str, url: &str, enabled: bool) -> Result<Subscription> {
        let name = validate_name(name)?;
        let url = validate_url(url)?;

        let mut guard = self.write();
        let mut next = guard.clone();
        let sub = next
            .iter_mut()
            .find(|s| s.id == id)
            .ok_or_else(|| HangarError::not_found("subscription", id))?;

        let url_changed = sub.url != url;
        sub.name = name;
        sub.url = url;
        sub.enabled = enabled;
        if url_changed {
            sub.clear_cache();
        }
        let updated = sub.clone();

        self.persist(&next)?;
        *guard = next;

        if url_changed {
            self.remove_cache_file(id);
        }
        log::info!("Updated subscription '{}' ({})", updated.name, id);
        Ok(updated)
    }

    /// 删除订阅
    pub fn delete(&self, id: &str) -> Result<()> {
        let mut guard = self.write();
        if !guard.iter().any(|s| s.id == id) {
            return Err(HangarError::not_found("subscription", id));
        }
        let next: Vec<Subscription> = guard.iter().filter(|s| s.id != id).cloned().collect();
        self.persist(&next)?;
        *guard = next;

        self.remove_cache_file(id);
        log::info!("Deleted subscription {}", id);
        Ok(())
    }

    /// 批量启用/停用，返回每个 id 的结果
    pub fn set_enabled(&self, ids: &[String], enabled: bool) -> Result<Vec<(String, Result<()>)>> {
        let mut guard = self.write();
        let mut next = guard.clone();
        let mut outcomes = Vec::with_capacity(ids.len());

        for id in ids {
            match next.iter_mut().find(|s| &s.id == id) {
                Some(sub) => {
                    sub.enabled = enabled;
                    outcomes.push((id.clone(), Ok(())));
                }
                None => {
                    outcomes.push((id.clone(), Err(HangarError::not_found("subscription", id))))
                }
            }
        }

        self.persist(&next)?;
        *guard = next;
        Ok(outcomes)
    }

    /// 批量删除，返回每个 id 的结果
    pub fn delete_many(&self, ids: &[String]) -> Result<Vec<(String, Result<()>)>> {
        let mut guard = self.write();
        let mut outcomes = Vec::with_capacity(ids.len());
        let mut removed = Vec::new();

        for id in ids {
            if guard.iter().any(|s| &s.id == id) && !removed.contains(id) {
                removed.push(id.clone());
                outcomes.push((id.clone(), Ok(())));
            } else {
                outcomes.push((id.clone(), Err(HangarError::not_found("subscription", id))));
            }
        }

        let next: Vec<Subscription> = guard
            .iter()
            .filter(|s| !removed.contains(&s.id))
            .cloned()
            .collect();
        self.persist(&next)?;
        *guard = next;

        for id in &removed {
            self.remove_cache_file(id);
        }
        log::info!("Deleted {} subscriptions", removed.len());
        Ok(outcomes)
    }

    /// 记录一次成功刷新
    ///
    /// `fetched_url` 为下载时使用的地址；期间地址被修改则丢弃本次结果。
    pub fn record_refresh(
        &self,
        id: &str,
        fetched_url: &str,
        nodes: Vec<Node>,
        digest: String,
    ) -> Result<Subscription> {
        let mut guard = self.write();
        let mut next = guard.clone();
        let sub = next
            .iter_mut()
            .find(|s| s.id == id)
            .ok_or_else(|| HangarError::not_found("subscription", id))?;
        ensure_same_url(sub, fetched_url)?;

        let previous_nodes = sub.cached_nodes.clone();
        let cache_path = cache_file(&self.cache_dir, id);
        write_atomic(&cache_path, serde_yaml::to_string(&nodes)?.as_bytes())?;

        sub.node_count = Some(nodes.len());
        sub.cached_nodes = nodes;
        sub.content_digest = Some(digest);
        sub.last_updated = Some(Utc::now().to_rfc3339());
        let updated = sub.clone();

        if let Err(e) = self.persist(&next) {
            // 元数据写入失败时恢复旧缓存
            let restored = serde_yaml::to_string(&previous_nodes)
                .map_err(std::io::Error::other)
                .and_then(|yaml| write_atomic(&cache_path, yaml.as_bytes()));
            if let Err(restore_err) = restored {
                log::error!("Failed to restore node cache for {}: {}", id, restore_err);
            }
            return Err(e);
        }
        *guard = next;

        log::info!(
            "Subscription '{}' refreshed with {} nodes",
            updated.name,
            updated.node_count.unwrap_or(0)
        );
        Ok(updated)
    }

    /// 内容未变化时只更新刷新时间
    pub fn touch(&self, id: &str, fetched_url: &str) -> Result<Subscription> {
        let mut guard = self.write();
        let mut next = guard.clone();
        let sub = next
            .iter_mut()
            .find(|s| s.id == id)
            .ok_or_else(|| HangarError::not_found("subscription", id))?;
        ensure_same_url(sub, fetched_url)?;
        sub.last_updated = Some(Utc::now().to_rfc3339());
        let updated = sub.clone();

        self.persist(&next)?;
        *guard = next;
        Ok(updated)
    }

    /// 导出订阅列表（不含节点缓存）
    pub fn export(&self, path: &Path) -> Result<usize> {
        let list = SubscriptionList {
            subscriptions: self.list(),
        };
        let json = serde_json::to_string_pretty(&list)?;
        write_atomic(path, json.as_bytes())?;
        log::info!("Exported {} subscriptions to {:?}", list.subscriptions.len(), path);
        Ok(list.subscriptions.len())
    }

    /// 导入订阅列表，返回导入的数量
    ///
    /// 与现有订阅冲突的 id 会重新生成，导入文件中的缓存信息一律丢弃。
    pub fn import(&self, path: &Path) -> Result<usize> {
        let content = std::fs::read_to_string(path)?;
        let imported: SubscriptionList = serde_json::from_str(&content)
            .map_err(|e| HangarError::Parse(format!("invalid subscription export: {}", e)))?;

        let mut guard = self.write();
        let mut next = guard.clone();
        let mut count = 0;

        for mut sub in imported.subscriptions {
            let url = match validate_url(&sub.url) {
                Ok(url) => url,
                Err(e) => {
                    log::warn!("Skipping imported subscription '{}': {}", sub.name, e);
                    continue;
                }
            };
            sub.url = url;
            if sub.name.trim().is_empty() {
                sub.name = sub.url.clone();
            }
            if sub.id.trim().is_empty() || next.iter().any(|s| s.id == sub.id) {
                sub.id = uuid::Uuid::new_v4().to_string();
            }
            sub.clear_cache();
            next.push(sub);
            count += 1;
        }

        self.persist(&next)?;
        *guard = next;
        log::info!("Imported {} subscriptions from {:?}", count, path);
        Ok(count)
    }

    fn persist(&self, subscriptions: &[Subscription]) -> Result<()> {
        let list = SubscriptionList {
            subscriptions: subscriptions.to_vec(),
        };
        let json = serde_json::to_string_pretty(&list)?;
        write_atomic(&self.list_path, json.as_bytes())?;
        Ok(())
    }

    fn remove_cache_file(&self, id: &str) {
        let path = cache_file(&self.cache_dir, id);
        if path.exists() {
            if let Err(e) = std::fs::remove_file(&path) {
                log::warn!("Failed to remove node cache {:?}: {}", path, e);
            }
        }
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, Vec<Subscription>> {
        self.subscriptions.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, Vec<Subscription>> {
        self.subscriptions.write().unwrap_or_else(PoisonError::into_inner)
    }
}

fn cache_file(cache_dir: &Path, id: &str) -> PathBuf {
    cache_dir.join(format!("{}.yaml", id))
}

fn ensure_same_url(sub: &Subscription, fetched_url: &str) -> Result<()> {
    if sub.url != fetched_url {
        return Err(HangarError::InvalidInput(format!(
            "subscription '{}' changed its URL during refresh",
            sub.name
        )));
    }
    Ok(())
}

fn validate_name(name: &str) -> Result<String> {
    let name = name.trim();
    if name.is_empty() {
        return Err(HangarError::InvalidInput(
            "subscription name must not be empty".to_string(),
        ));
    }
    Ok(name.to_string())
}

/// 订阅地址必须是 http(s)
pub fn validate_url(url: &str) -> Result<String> {
    let url = url.trim();
    let parsed = reqwest::Url::parse(url)
        .map_err(|e| HangarError::InvalidInput(format!("invalid URL '{}': {}", url, e)))?;
    match parsed.scheme() {
        "http" | "https" => Ok(url.to_string()),
        scheme => Err(HangarError::InvalidInput(format!(
            "unsupported URL scheme '{}', expected http or https",
            scheme
        ))),
    }
}
