use std::time::Duration;

use futures_util::future::join_all;

use super::{SubscriptionParser, SubscriptionStore};
use crate::error::{HangarError, Result};
use crate::models::{FetchConfig, Subscription};
use crate::utils::content_digest;

/// 远程内容下载器（订阅与规则源共用）
#[derive(Clone)]
pub struct Downloader {
    client: reqwest::Client,
    user_agent: String,
}

impl Downloader {
    pub fn new(config: &FetchConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs.max(1)))
            .build()
            .map_err(|e| HangarError::Network(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            user_agent: config.user_agent.clone(),
        })
    }

    /// GET 并返回响应正文；非 2xx 视为网络错误
    pub async fn fetch_text(&self, url: &str) -> Result<String> {
        let response = self
            .client
            .get(url)
            .header(reqwest::header::USER_AGENT, &self.user_agent)
            .send()
            .await
            .map_err(|e| {
                HangarError::Network(format!("failed to fetch {}: {}", url, describe(&e)))
            })?;

        if !response.status().is_success() {
            return Err(HangarError::Network(format!(
                "failed to fetch {}: HTTP {}",
                url,
                response.status()
            )));
        }

        response
            .text()
            .await
            .map_err(|e| {
                HangarError::Network(format!(
                    "failed to read response from {}: {}",
                    url,
                    describe(&e)
                ))
            })
    }
}

fn describe(e: &reqwest::Error) -> String {
    if e.is_timeout() {
        "request timed out".to_string()
    } else {
        e.to_string()
    }
}

/// 订阅刷新器
#[derive(Clone)]
pub struct SubscriptionFetcher {
    downloader: Downloader,
}

impl SubscriptionFetcher {
    pub fn new(downloader: Downloader) -> Self {
        Self { downloader }
    }

    /// 刷新单个订阅
    ///
    /// 失败时保留之前的缓存与元数据；内容摘要未变化时跳过解析。
    pub async fn refresh(&self, store: &SubscriptionStore, id: &str) -> Result<Subscription> {
        let sub = store.get(id)?;
        if !sub.enabled {
            return Err(HangarError::SubscriptionDisabled(sub.name));
        }

        log::info!("Refreshing subscription '{}'", sub.name);
        let content = self.downloader.fetch_text(&sub.url).await?;
        let digest = content_digest(&content);

        if sub.content_digest.as_deref() == Some(digest.as_str()) && !sub.cached_nodes.is_empty() {
            log::info!("Subscription '{}' content unchanged, skipping parse", sub.name);
            return store.touch(id, &sub.url);
        }

        let nodes = SubscriptionParser::parse(&content)?;
        store.record_refresh(id, &sub.url, nodes, digest)
    }

    /// 并发刷新多个订阅，每个订阅的结果相互独立
    pub async fn refresh_many(
        &self,
        store: &SubscriptionStore,
        ids: &[String],
    ) -> Vec<(String, Result<Subscription>)> {
        let tasks = ids.iter().map(|id| async move {
            let result = self.refresh(store, id).await;
            if let Err(e) = &result {
                log::warn!("Failed to refresh subscription {}: {}", id, e);
            }
            (id.clone(), result)
        });
        join_all(tasks).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::DataLayout;
    use axum::{http::StatusCode, routing::get, Router};

    const BODY: &str = "proxies:
  - {name: HK-01, type: ss, server: hk.example.com, port: 443}
  - {name: JP-01, type: ss, server: jp.example.com, port: 443}
";

    async fn spawn_server() -> String {
        let app = Router::new()
            .route("/sub", get(|| async { BODY }))
            .route("/missing", get(|| async { (StatusCode::NOT_FOUND, "gone") }))
            .route(
                "/slow",
                get(|| async {
                    tokio::time::sleep(Duration::from_secs(5)).await;
                    BODY
                }),
            );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{}", addr)
    }

    fn fetcher(timeout_secs: u64) -> SubscriptionFetcher {
        let config = FetchConfig {
            timeout_secs,
            ..Default::default()
        };
        SubscriptionFetcher::new(Downloader::new(&config).unwrap())
    }

    #[tokio::test]
    async fn test_refresh_success_and_idempotent() {
        let base = spawn_server().await;
        let dir = tempfile::tempdir().unwrap();
        let store = SubscriptionStore::open(&DataLayout::new(dir.path())).unwrap();
        let sub = store.add("A", &format!("{}/sub", base)).unwrap();

        let first = fetcher(5).refresh(&store, &sub.id).await.unwrap();
        assert_eq!(first.node_count, Some(2));
        assert_eq!(first.cached_nodes[0].name, "HK-01");

        let second = fetcher(5).refresh(&store, &sub.id).await.unwrap();
        assert_eq!(second.cached_nodes, first.cached_nodes);
        assert_eq!(second.content_digest, first.content_digest);
    }

    #[tokio::test]
    async fn test_failures_keep_previous_cache() {
        use std::sync::atomic::{AtomicU8, Ordering};
        use std::sync::Arc;

        // 0 = 正常, 1 = HTTP 500, 2 = 无法解析
        let mode = Arc::new(AtomicU8::new(0));
        let state = mode.clone();
        let app = Router::new().route(
            "/flaky",
            get(move || {
                let state = state.clone();
                async move {
                    match state.load(Ordering::SeqCst) {
                        0 => (StatusCode::OK, BODY),
                        1 => (StatusCode::INTERNAL_SERVER_ERROR, "boom"),
                        _ => (StatusCode::OK, "<html>oops</html>"),
                    }
                }
            }),
        );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        let dir = tempfile::tempdir().unwrap();
        let store = SubscriptionStore::open(&DataLayout::new(dir.path())).unwrap();
        let sub = store.add("A", &format!("http://{}/flaky", addr)).unwrap();
        let good = fetcher(5).refresh(&store, &sub.id).await.unwrap();

        mode.store(1, Ordering::SeqCst);
        let err = fetcher(5).refresh(&store, &sub.id).await.unwrap_err();
        assert!(matches!(err, HangarError::Network(_)));
        assert_eq!(store.get(&sub.id).unwrap(), good);

        mode.store(2, Ordering::SeqCst);
        let err = fetcher(5).refresh(&store, &sub.id).await.unwrap_err();
        assert!(matches!(err, HangarError::Parse(_)));
        assert_eq!(store.get(&sub.id).unwrap(), good);
    }

    #[tokio::test]
    async fn test_timeout_is_network_error() {
        let base = spawn_server().await;
        let dir = tempfile::tempdir().unwrap();
        let store = SubscriptionStore::open(&DataLayout::new(dir.path())).unwrap();
        let sub = store.add("Slow", &format!("{}/slow", base)).unwrap();

        let err = fetcher(1).refresh(&store, &sub.id).await.unwrap_err();
        assert!(matches!(err, HangarError::Network(_)));
        let after = store.get(&sub.id).unwrap();
        assert!(after.last_updated.is_none());
        assert!(after.node_count.is_none());
    }

    #[tokio::test]
    async fn test_disabled_subscription_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let store = SubscriptionStore::open(&DataLayout::new(dir.path())).unwrap();
        let sub = store.add("A", "http://127.0.0.1:9/sub").unwrap();
        store.update(&sub.id, "A", &sub.url, false).unwrap();

        let err = fetcher(1).refresh(&store, &sub.id).await.unwrap_err();
        assert!(matches!(err, HangarError::SubscriptionDisabled(_)));
    }

    #[tokio::test]
    async fn test_refresh_many_isolates_failures() {
        let base = spawn_server().await;
        let dir = tempfile::tempdir().unwrap();
        let store = SubscriptionStore::open(&DataLayout::new(dir.path())).unwrap();
        let good = store.add("Good", &format!("{}/sub", base)).unwrap();
        let bad = store.add("Bad", &format!("{}/missing", base)).unwrap();

        let outcomes = fetcher(5)
            .refresh_many(&store, &[good.id.clone(), bad.id.clone()])
            .await;
        assert_eq!(outcomes.len(), 2);
        assert!(outcomes[0].1.is_ok());
        assert!(outcomes[1].1.is_err());
        assert_eq!(store.get(&good.id).unwrap().node_count, Some(2));
    }
}
