// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! # Ranked Cache
//!
//! Background scheduling and eviction for state derived from a shared
//! ordered store, plus the popularity-gated decisions foreground requests
//! make against it.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     Foreground callers                      │
//! │  • Sessions: check/update token, carts                     │
//! │  • CacheGate: serve page from cache or render              │
//! │  • ArticleBoard: post, vote, list                          │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                     (popularity rank lookups)
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │              Background loops (Maintenance)                 │
//! │  • SessionTrimmer: bound recent:, oldest first             │
//! │  • PopularityTracker: trim viewed: and halve scores        │
//! │  • RowRefresher: refresh inv:{row} on a per-row delay      │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                  RankedStore (Redis / memory)               │
//! │  • Sorted sets, hashes, sets, strings with expiry          │
//! │  • Per-call timeout and retry                              │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! Loops coordinate only through the store. Each one observes a
//! [`ShutdownSignal`] once per iteration and survives store outages by
//! retrying on its next tick.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use ranked_cache::{Config, HttpRequest, Maintenance, RowSource, SourceError};
//! use std::convert::Infallible;
//! use std::sync::Arc;
//!
//! struct Inventory;
//!
//! #[async_trait::async_trait]
//! impl RowSource for Inventory {
//!     async fn fetch(&self, row_id: &str) -> Result<Option<serde_json::Value>, SourceError> {
//!         Ok(Some(serde_json::json!({ "id": row_id, "qty": 3 })))
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() {
//!     let config = Config {
//!         redis_url: Some("redis://localhost:6379".into()),
//!         ..Default::default()
//!     };
//!     let mut maintenance = Maintenance::connect(config, Arc::new(Inventory))
//!         .await
//!         .expect("Failed to connect");
//!     maintenance.start();
//!
//!     let sessions = maintenance.sessions();
//!     sessions.update_token("tok-1", "alice", Some("item-42")).await.unwrap();
//!
//!     let gate = maintenance.cache_gate();
//!     let request = HttpRequest::parse("GET", "/view?item=item-42");
//!     let page = gate
//!         .serve(&request, |_| async { Ok::<_, Infallible>("<html/>".to_string()) })
//!         .await
//!         .unwrap();
//!     println!("{page}");
//!
//!     maintenance.refresher().schedule("item-42", 5.0).await.unwrap();
//!
//!     maintenance.shutdown().await;
//! }
//! ```
//!
//! ## Modules
//!
//! - [`coordinator`]: [`Maintenance`] spawning and stopping the loops
//! - [`store`]: the [`RankedStore`] capability, Redis and in-memory backends
//! - [`sessions`]: login tokens, view history, carts and the trimmer
//! - [`popularity`]: decaying view rank
//! - [`page_cache`]: popularity-gated page cache
//! - [`refresher`]: delayed refresh of denormalized rows
//! - [`articles`]: posting, voting, ranked listings
//! - [`resilience`]: retry and timeout helpers

pub mod articles;
pub mod clock;
pub mod config;
pub mod coordinator;
pub mod metrics;
pub mod page_cache;
pub mod popularity;
pub mod refresher;
pub mod resilience;
pub mod sessions;
pub mod shutdown;
pub mod store;

pub use articles::{ArticleBoard, ArticleError, ArticleOrder, ArticleSummary, VoteOutcome};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{Config, ConfigError};
pub use coordinator::{Maintenance, MaintenanceError, MaintenanceState, PassReport};
pub use page_cache::{CacheGate, HttpRequest, PageRequest};
pub use popularity::PopularityTracker;
pub use refresher::{RefreshStep, ReconcileReport, RowRefresher, RowSource, SourceError};
pub use resilience::retry::RetryConfig;
pub use sessions::{SessionTrimmer, Sessions, TrimMode, TrimOutcome, TrimmerState};
pub use shutdown::{shutdown_channel, ShutdownSignal, ShutdownTrigger};
pub use store::memory::MemoryStore;
pub use store::redis::RedisStore;
pub use store::{Aggregate, RangeOrder, RankedStore, StoreError};
