// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Walk through sessions, page caching, row refresh and voting with the
//! maintenance loops running in the background.
//!
//! Uses the in-memory store unless `REDIS_URL` is set:
//!
//! ```bash
//! cargo run --example basic_usage
//! REDIS_URL=redis://localhost:6379 cargo run --example basic_usage
//! ```

use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use metrics_util::debugging::{DebugValue, DebuggingRecorder};
use ranked_cache::{
    ArticleOrder, Config, HttpRequest, Maintenance, MemoryStore, RankedStore, RowSource,
    SourceError, SystemClock,
};
use tracing_subscriber::EnvFilter;

struct Inventory;

#[async_trait::async_trait]
impl RowSource for Inventory {
    async fn fetch(&self, row_id: &str) -> Result<Option<serde_json::Value>, SourceError> {
        Ok(Some(serde_json::json!({ "id": row_id, "qty": row_id.len() })))
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let recorder = DebuggingRecorder::new();
    let snapshotter = recorder.snapshotter();
    recorder.install().expect("failed to install metrics recorder");

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(false)
        .compact()
        .init();

    let config = Config {
        redis_url: std::env::var("REDIS_URL").ok(),
        redis_prefix: Some("demo:".into()),
        session_limit: 3,
        trim_idle_ms: 50,
        refresh_poll_ms: 20,
        ..Default::default()
    };

    let mut maintenance = if config.redis_url.is_some() {
        Maintenance::connect(config, Arc::new(Inventory)).await?
    } else {
        let store = Arc::new(MemoryStore::new());
        Maintenance::new(config, store, Arc::new(SystemClock), Arc::new(Inventory))?
    };
    maintenance.start();

    // Sessions: more than the limit, the trimmer evicts the oldest
    let sessions = maintenance.sessions();
    for (i, item) in ["lamp", "desk", "lamp", "chair", "lamp"].iter().enumerate() {
        sessions.update_token(&format!("tok-{i}"), "alice", Some(item)).await?;
    }
    sessions.add_to_cart("tok-4", "lamp", 2).await?;

    // Page cache: lamp is popular enough to cache
    let gate = maintenance.cache_gate();
    let request = HttpRequest::parse("GET", "/view?item=lamp");
    for _ in 0..2 {
        let page = gate
            .serve(&request, |_| async { Ok::<_, Infallible>("<h1>lamp</h1>".to_string()) })
            .await?;
        println!("served: {page}");
    }

    // Row refresh every 5s
    let refresher = maintenance.refresher();
    refresher.schedule("lamp", 5.0).await?;

    // Articles
    let board = maintenance.articles();
    let id = board.post("alice", "Lamps are back", "http://example.com/lamps").await?;
    println!("vote by bob: {:?}", board.vote("bob", &id).await?);
    println!("vote by bob: {:?}", board.vote("bob", &id).await?);
    for article in board.list_articles(1, ArticleOrder::Score).await? {
        println!("{}", serde_json::to_string(&article)?);
    }

    tokio::time::sleep(Duration::from_millis(300)).await;
    println!("cached row: {:?}", refresher.cached_row("lamp").await?);
    println!("live sessions: {}", maintenance.store().zcard("recent:").await?);

    maintenance.shutdown().await;

    for (key, _, _, value) in snapshotter.snapshot().into_vec() {
        if let DebugValue::Counter(count) = value {
            println!("{} = {count}", key.key().name());
        }
    }
    Ok(())
}
