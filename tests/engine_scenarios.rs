use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::{extract::State, routing::get, Router};
use serde_json::json;

use hangar_lib::commands::{self, AppState};
use hangar_lib::models::{Patch, PatchOperation, Severity, VersionOrigin};

const SUB_A: &str = "proxies:
  - {name: HK-01, type: ss, server: hk-a.example.com, port: 443, cipher: aes-128-gcm, password: a}
  - {name: JP-01, type: ss, server: jp-a.example.com, port: 443, cipher: aes-128-gcm, password: a}
";

const SUB_B: &str = "proxies:
  - {name: HK-01, type: ss, server: hk-b.example.com, port: 443, cipher: aes-128-gcm, password: b}
  - {name: US-01, type: trojan, server: us-b.example.com, port: 443, password: b}
";

async fn spawn_subscription_server(slow: Arc<AtomicBool>) -> String {
    let app = Router::new()
        .route("/a", get(|| async { SUB_A }))
        .route("/b", get(|| async { SUB_B }))
        .route("/rules", get(|| async { "payload:\n  - DOMAIN-SUFFIX,netflix.com\n" }))
        .route(
            "/flaky",
            get(|State(slow): State<Arc<AtomicBool>>| async move {
                if slow.load(Ordering::SeqCst) {
                    tokio::time::sleep(Duration::from_secs(3)).await;
                }
                SUB_A
            }),
        )
        .with_state(slow);
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{}", addr)
}

async fn setup() -> (tempfile::TempDir, AppState, String, Arc<AtomicBool>) {
    let dir = tempfile::tempdir().unwrap();
    let state = AppState::init(dir.path()).unwrap();
    let slow = Arc::new(AtomicBool::new(false));
    let base = spawn_subscription_server(slow.clone()).await;
    (dir, state, base, slow)
}

async fn add_and_refresh(state: &AppState, name: &str, url: String) -> String {
    let sub = commands::subscription::add_subscription(state, name.into(), url)
        .await
        .unwrap();
    commands::subscription::refresh_subscription(state, sub.id.clone())
        .await
        .unwrap();
    sub.id
}

#[tokio::test]
async fn test_build_patch_rollback_flow() {
    let (_dir, state, base, _) = setup().await;
    add_and_refresh(&state, "A", format!("{}/a", base)).await;

    let built = commands::config::rebuild_config(&state).await.unwrap();
    assert_eq!(built.origin, VersionOrigin::Build);
    let original = commands::config::get_version_content(&state, built.id.clone())
        .await
        .unwrap();

    let patch = Patch {
        description: "route netflix".into(),
        operations: vec![PatchOperation::AddRule {
            rule: "DOMAIN-SUFFIX,netflix.com".into(),
            target: "JP 地区".into(),
            position: None,
        }],
    };
    let patched = commands::config::apply_patch(&state, patch, Some(built.id.clone()))
        .await
        .unwrap();
    let current = state.versions.current().unwrap();
    assert_eq!(current.version.id, patched.id);
    let rules = &current.document.rules;
    assert_eq!(rules[rules.len() - 2], "DOMAIN-SUFFIX,netflix.com,JP 地区");
    assert_eq!(rules.last().map(String::as_str), Some("MATCH,Proxy"));

    let restored = commands::config::rollback_version(&state, built.id.clone())
        .await
        .unwrap();
    assert_eq!(restored.origin, VersionOrigin::Rollback);
    assert_eq!(state.versions.active_id(), Some(restored.id.clone()));
    let content = commands::config::get_version_content(&state, restored.id)
        .await
        .unwrap();
    assert_eq!(content, original);
    assert_eq!(commands::config::list_versions(&state).await.unwrap().len(), 3);
}

#[tokio::test]
async fn test_rebuild_is_deterministic() {
    let (_dir, state, base, _) = setup().await;
    add_and_refresh(&state, "A", format!("{}/a", base)).await;
    add_and_refresh(&state, "B", format!("{}/b", base)).await;

    let first = commands::config::rebuild_config(&state).await.unwrap();
    let second = commands::config::rebuild_config(&state).await.unwrap();
    assert_eq!(first.id, second.id);
    assert_eq!(first.digest, second.digest);
    assert_eq!(state.versions.list().len(), 1);
}

#[tokio::test]
async fn test_duplicate_node_name_keeps_first_subscription() {
    let (_dir, state, base, _) = setup().await;
    add_and_refresh(&state, "A", format!("{}/a", base)).await;
    add_and_refresh(&state, "B", format!("{}/b", base)).await;

    commands::config::rebuild_config(&state).await.unwrap();
    let document = state.versions.current().unwrap().document.clone();

    let hk: Vec<_> = document.proxies.iter().filter(|p| p.name == "HK-01").collect();
    assert_eq!(hk.len(), 1);
    assert_eq!(hk[0].server, "hk-a.example.com");
    assert_eq!(document.proxy_count(), 3);

    let group_b = document.proxy_groups.iter().find(|g| g.name == "B").unwrap();
    assert_eq!(group_b.proxies, vec!["US-01".to_string()]);
    assert!(document.has_group("HK 地区"));
    assert!(document.has_group("US 地区"));
}

#[tokio::test]
async fn test_removing_all_subscriptions_blocks_rebuild() {
    let (_dir, state, base, _) = setup().await;
    let id = add_and_refresh(&state, "A", format!("{}/a", base)).await;
    let built = commands::config::rebuild_config(&state).await.unwrap();

    commands::subscription::delete_subscription(&state, id).await.unwrap();
    let err = commands::config::rebuild_config(&state).await.unwrap_err();
    assert!(err.contains("no enabled subscription"), "{}", err);

    // 旧版本保持生效
    assert_eq!(state.versions.active_id(), Some(built.id));
}

#[tokio::test]
async fn test_unknown_ai_operation_rejected_without_new_version() {
    let (_dir, state, base, _) = setup().await;
    add_and_refresh(&state, "A", format!("{}/a", base)).await;
    let built = commands::config::rebuild_config(&state).await.unwrap();

    let operations = vec![
        json!({"op": "add_rule", "rule": "DOMAIN,example.com", "target": "DIRECT"}),
        json!({"op": "execute_shell", "command": "rm -rf /"}),
    ];
    let err = commands::ai::apply_ai_patch(&state, "bad".into(), operations, Some(built.id.clone()))
        .await
        .unwrap_err();
    assert!(err.contains("operation #2"), "{}", err);

    assert_eq!(state.versions.list().len(), 1);
    assert_eq!(state.versions.active_id(), Some(built.id));
}

#[tokio::test]
async fn test_stale_base_version_rejected() {
    let (_dir, state, base, _) = setup().await;
    add_and_refresh(&state, "A", format!("{}/a", base)).await;
    let built = commands::config::rebuild_config(&state).await.unwrap();

    let operations = vec![json!({
        "op": "add_rule",
        "rule": "DOMAIN,a.example.com",
        "target": "DIRECT"
    })];
    commands::ai::apply_ai_patch(&state, "first".into(), operations, Some(built.id.clone()))
        .await
        .unwrap();

    let operations = vec![json!({
        "op": "add_rule",
        "rule": "DOMAIN,b.example.com",
        "target": "DIRECT"
    })];
    let err = commands::ai::apply_ai_patch(&state, "second".into(), operations, Some(built.id))
        .await
        .unwrap_err();
    assert!(err.contains("configuration changed"), "{}", err);
    assert_eq!(state.versions.list().len(), 2);
}

#[tokio::test]
async fn test_refresh_timeout_keeps_previous_state() {
    let (_dir, state, base, slow) = setup().await;
    let mut settings = commands::settings::get_hangar_config(&state).await.unwrap();
    settings.fetch.timeout_secs = 1;
    commands::settings::save_hangar_config(&state, settings).await.unwrap();

    let id = add_and_refresh(&state, "A", format!("{}/flaky", base)).await;
    let before = state.subscriptions.get(&id).unwrap();
    assert_eq!(before.node_count, Some(2));

    slow.store(true, Ordering::SeqCst);
    let err = commands::subscription::refresh_subscription(&state, id.clone())
        .await
        .unwrap_err();
    assert!(err.contains("network error"), "{}", err);

    let after = state.subscriptions.get(&id).unwrap();
    assert_eq!(after.last_updated, before.last_updated);
    assert_eq!(after.cached_nodes, before.cached_nodes);

    let notifications = commands::notification::get_notifications(&state).await.unwrap();
    assert_eq!(notifications.len(), 1);
    assert_eq!(notifications[0].severity, Severity::Error);
    assert!(notifications[0].message.starts_with("A:"));
}

#[tokio::test]
async fn test_server_serves_active_version() {
    let (_dir, state, base, _) = setup().await;
    let addr = state.server.start("127.0.0.1", 0).await.unwrap();
    let url = format!("http://{}/config", addr);

    let response = reqwest::get(&url).await.unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::SERVICE_UNAVAILABLE);

    add_and_refresh(&state, "A", format!("{}/a", base)).await;
    commands::config::rebuild_config(&state).await.unwrap();

    let body = reqwest::get(&url).await.unwrap().text().await.unwrap();
    assert_eq!(body, state.versions.current().unwrap().yaml);

    commands::server::stop_proxy_server(&state).await.unwrap();
    assert!(reqwest::get(&url).await.is_err());
}

#[tokio::test]
async fn test_state_survives_restart() {
    let (dir, state, base, _) = setup().await;
    add_and_refresh(&state, "A", format!("{}/a", base)).await;
    let built = commands::config::rebuild_config(&state).await.unwrap();
    drop(state);

    let reopened = AppState::init(dir.path()).unwrap();
    assert_eq!(reopened.versions.active_id(), Some(built.id));
    let subs = commands::subscription::get_subscriptions(&reopened).await.unwrap();
    assert_eq!(subs.len(), 1);
    assert_eq!(subs[0].cached_nodes.len(), 2);
}

#[tokio::test]
async fn test_rule_sources_and_builtin_rules_in_build() {
    let (_dir, state, base, _) = setup().await;
    add_and_refresh(&state, "A", format!("{}/a", base)).await;

    let url = format!("{}/rules", base);
    let source = commands::rules::add_rule_source(&state, "Streaming".into(), url).await.unwrap();
    let outcomes = commands::rules::refresh_rule_sources(&state).await.unwrap();
    assert_eq!(outcomes.len(), 1);
    assert!(outcomes[0].success);
    assert_eq!(outcomes[0].id, source.id);
    let sources = commands::rules::get_rule_sources(&state).await.unwrap();
    assert!(sources[0].last_updated.is_some());

    commands::config::rebuild_config(&state).await.unwrap();
    let document = state.versions.current().unwrap().document.clone();
    assert_eq!(document.rules[0], "DOMAIN-SUFFIX,netflix.com,Proxy");
    assert!(document.rules.contains(&"RULE-SET,reject,REJECT".to_string()));
    assert_eq!(document.rules.last().map(String::as_str), Some("MATCH,Proxy"));
    assert!(document.extra.contains_key("rule-providers"));

    // 停用后重新生成不再包含该规则源
    commands::rules::toggle_rule_source(&state, source.id, false).await.unwrap();
    let mut settings = commands::settings::get_hangar_config(&state).await.unwrap();
    settings.builtin_rules = false;
    commands::settings::save_hangar_config(&state, settings).await.unwrap();
    commands::config::rebuild_config(&state).await.unwrap();
    let document = state.versions.current().unwrap().document.clone();
    assert_eq!(document.rules, vec!["MATCH,Proxy"]);
    assert!(!document.extra.contains_key("rule-providers"));
}
