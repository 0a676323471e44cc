// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Integration tests against a real Redis.
//!
//! Tests use testcontainers for portability - no external docker-compose required.
//!
//! # Running Tests
//! ```bash
//! # Run all integration tests (requires Docker)
//! cargo test --test integration -- --ignored
//!
//! # Run only the store command tests
//! cargo test --test integration store -- --ignored
//! ```
//!
//! # Test Organization
//! - `store_*` - `RedisStore` commands match the in-memory semantics
//! - `happy_*` - Components and the maintenance loops end to end
//! - `failure_*` - Redis dying under running loops

use std::sync::Arc;
use std::time::Duration;

use ranked_cache::store::keys;
use ranked_cache::{
    Aggregate, ArticleOrder, Config, HttpRequest, Maintenance, MaintenanceState, RangeOrder,
    RankedStore, RedisStore, RowSource, SourceError, StoreError, SystemClock, VoteOutcome,
};

use testcontainers::{clients::Cli, core::WaitFor, Container, GenericImage};

// =============================================================================
// Container Helpers
// =============================================================================

/// Create a Redis container with health check
fn redis_container(docker: &Cli) -> Container<'_, GenericImage> {
    let image = GenericImage::new("redis", "7-alpine")
        .with_exposed_port(6379)
        .with_wait_for(WaitFor::message_on_stdout("Ready to accept connections"));
    docker.run(image)
}

fn redis_url(container: &Container<'_, GenericImage>) -> String {
    format!("redis://127.0.0.1:{}", container.get_host_port_ipv4(6379))
}

async fn connect(url: &str, prefix: &str) -> RedisStore {
    RedisStore::with_prefix(url, Some(prefix), Duration::from_secs(2))
        .await
        .expect("Failed to connect to Redis")
}

struct StaticSource;

#[async_trait::async_trait]
impl RowSource for StaticSource {
    async fn fetch(&self, row_id: &str) -> Result<Option<serde_json::Value>, SourceError> {
        Ok(Some(serde_json::json!({ "id": row_id, "qty": 7 })))
    }
}

// =============================================================================
// Store Commands
// =============================================================================

#[tokio::test]
#[ignore] // Requires Docker
async fn store_sorted_set_commands() {
    let docker = Cli::default();
    let redis = redis_container(&docker);
    let store = connect(&redis_url(&redis), "t1:").await;

    for (member, score) in [("a", 3.0), ("b", 1.0), ("c", 2.0), ("d", 4.0)] {
        store.zadd("z", member, score).await.unwrap();
    }
    assert_eq!(store.zincr("z", "a", -2.5).await.unwrap(), 0.5);
    assert_eq!(
        store.zrange("z", 0, -1, RangeOrder::Ascending).await.unwrap(),
        vec!["a", "b", "c", "d"]
    );
    assert_eq!(
        store.zrange_withscores("z", 0, 0, RangeOrder::Descending).await.unwrap(),
        vec![("d".to_string(), 4.0)]
    );
    assert_eq!(store.zrank("z", "c").await.unwrap(), Some(2));
    assert_eq!(store.zrank("z", "nope").await.unwrap(), None);

    // keep the two lowest, halve them
    assert_eq!(store.ztrim_and_scale("z", 2, 0.5).await.unwrap(), 2);
    assert_eq!(
        store.zrange_withscores("z", 0, -1, RangeOrder::Ascending).await.unwrap(),
        vec![("a".to_string(), 0.25), ("b".to_string(), 0.5)]
    );

    assert_eq!(store.zremrangebyrank("z", 0, -2).await.unwrap(), 1);
    assert_eq!(store.zcard("z").await.unwrap(), 1);
}

#[tokio::test]
#[ignore] // Requires Docker
async fn store_intersection_and_expiry() {
    let docker = Cli::default();
    let redis = redis_container(&docker);
    let store = connect(&redis_url(&redis), "t2:").await;

    store.sadd("group", "x").await.unwrap();
    store.sadd("group", "y").await.unwrap();
    store.zadd("scores", "x", 10.0).await.unwrap();
    store.zadd("scores", "z", 30.0).await.unwrap();

    let keys = ["group".to_string(), "scores".to_string()];
    assert_eq!(store.zinterstore("dest", &keys, Aggregate::Max).await.unwrap(), 1);
    assert_eq!(store.zscore("dest", "x").await.unwrap(), Some(10.0));

    assert!(store.expire("dest", 1).await.unwrap());
    store.set("page", "html", Some(1)).await.unwrap();
    tokio::time::sleep(Duration::from_millis(1_500)).await;
    assert!(!store.exists("dest").await.unwrap());
    assert_eq!(store.get("page").await.unwrap(), None);
}

#[tokio::test]
#[ignore] // Requires Docker
async fn store_prefix_isolates_namespaces() {
    let docker = Cli::default();
    let redis = redis_container(&docker);
    let url = redis_url(&redis);
    let shop = connect(&url, "shop:").await;
    let blog = connect(&url, "blog:").await;

    shop.hset("login:", "tok", "alice").await.unwrap();
    assert_eq!(blog.hget("login:", "tok").await.unwrap(), None);
    assert_eq!(shop.hget("login:", "tok").await.unwrap().as_deref(), Some("alice"));

    shop.set("counter", "x", None).await.unwrap();
    let err = shop.incr("counter", 1).await.unwrap_err();
    assert!(matches!(err, StoreError::Backend(_) | StoreError::WrongType(_)));
}

// =============================================================================
// Happy Path
// =============================================================================

#[tokio::test]
#[ignore] // Requires Docker
async fn happy_components_share_one_store() {
    let docker = Cli::default();
    let redis = redis_container(&docker);
    let config = Config {
        redis_url: Some(redis_url(&redis)),
        redis_prefix: Some("app:".into()),
        ..Default::default()
    };
    let maintenance = Maintenance::connect(config, Arc::new(StaticSource)).await.unwrap();

    let sessions = maintenance.sessions();
    sessions.update_token("tok", "alice", Some("item-1")).await.unwrap();
    assert_eq!(sessions.check_token("tok").await.unwrap().as_deref(), Some("alice"));

    let gate = maintenance.cache_gate();
    let request = HttpRequest::parse("GET", "/view?item=item-1");
    assert!(gate.can_cache(&request).await);
    let first = gate
        .serve(&request, |_| async { Ok::<_, std::convert::Infallible>("rendered".to_string()) })
        .await
        .unwrap();
    let second = gate
        .serve(&request, |_| async { Ok::<_, std::convert::Infallible>("other".to_string()) })
        .await
        .unwrap();
    assert_eq!(first, second);

    let board = maintenance.articles();
    let id = board.post("alice", "Hello", "http://example.com").await.unwrap();
    assert_eq!(board.vote("bob", &id).await.unwrap(), VoteOutcome::Applied);
    assert_eq!(board.vote("bob", &id).await.unwrap(), VoteOutcome::AlreadyVoted);
    board.add_remove_groups(&id, &["rust"], &[]).await.unwrap();
    let listed = board.group_articles("rust", 1, ArticleOrder::Score).await.unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].votes, 2);
}

#[tokio::test]
#[ignore] // Requires Docker
async fn happy_maintenance_loops_trim_and_refresh() {
    let docker = Cli::default();
    let redis = redis_container(&docker);
    let config = Config {
        redis_url: Some(redis_url(&redis)),
        session_limit: 5,
        trim_batch_size: 3,
        trim_idle_ms: 20,
        refresh_poll_ms: 10,
        ..Default::default()
    };
    let mut maintenance = Maintenance::connect(config, Arc::new(StaticSource)).await.unwrap();
    let store = maintenance.store();

    let sessions = maintenance.sessions();
    for i in 0..20 {
        sessions.update_token(&format!("t{i:02}"), "user", None).await.unwrap();
    }
    maintenance.refresher().schedule("row-1", 60.0).await.unwrap();

    maintenance.start();
    assert_eq!(maintenance.state(), MaintenanceState::Running);

    let mut converged = false;
    for _ in 0..200 {
        let sessions_left = store.zcard(keys::RECENT).await.unwrap();
        let row = maintenance.refresher().cached_row("row-1").await.unwrap();
        if sessions_left <= 5 && row.is_some() {
            converged = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    maintenance.shutdown().await;

    assert!(converged, "loops did not converge");
    assert_eq!(maintenance.state(), MaintenanceState::Stopped);
    assert_eq!(
        maintenance.refresher().cached_row("row-1").await.unwrap(),
        Some(serde_json::json!({ "id": "row-1", "qty": 7 }))
    );
}

// =============================================================================
// Failure Scenarios
// =============================================================================

#[tokio::test]
#[ignore] // Requires Docker
async fn failure_loops_stop_cleanly_after_redis_death() {
    let docker = Cli::default();
    let redis = redis_container(&docker);
    let url = redis_url(&redis);
    let store: Arc<dyn RankedStore> = Arc::new(
        RedisStore::with_prefix(&url, None, Duration::from_millis(500))
            .await
            .expect("Failed to connect to Redis"),
    );

    let config = Config {
        trim_idle_ms: 20,
        refresh_poll_ms: 10,
        popularity_interval_secs: 1,
        ..Default::default()
    };
    let mut maintenance =
        Maintenance::new(config, store.clone(), Arc::new(SystemClock), Arc::new(StaticSource)).unwrap();
    maintenance.start();
    tokio::time::sleep(Duration::from_millis(100)).await;

    // Kill Redis under the running loops
    drop(redis);
    tokio::time::sleep(Duration::from_millis(500)).await;

    assert!(store.zcard(keys::RECENT).await.is_err());
    assert_eq!(maintenance.state(), MaintenanceState::Running);

    tokio::time::timeout(Duration::from_secs(15), maintenance.shutdown())
        .await
        .expect("loops should stop after an outage");
    assert_eq!(maintenance.state(), MaintenanceState::Stopped);
}
