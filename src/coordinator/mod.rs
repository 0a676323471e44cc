// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Maintenance coordinator.
//!
//! [`Maintenance`] owns one store handle and hands out every component
//! built on it: the three background loops it runs itself, and the
//! foreground gates callers use directly.
//!
//! # Lifecycle
//!
//! ```text
//! Created ──start()──▶ Running ──shutdown()──▶ ShuttingDown ──▶ Stopped
//! ```
//!
//! # Example
//!
//! ```rust,no_run
//! use ranked_cache::{Config, Maintenance, MaintenanceState, RowSource, SourceError};
//! use std::sync::Arc;
//!
//! struct Inventory;
//!
//! #[async_trait::async_trait]
//! impl RowSource for Inventory {
//!     async fn fetch(&self, row_id: &str) -> Result<Option<serde_json::Value>, SourceError> {
//!         Ok(Some(serde_json::json!({ "id": row_id })))
//!     }
//! }
//!
//! # #[tokio::main]
//! # async fn main() {
//! let config = Config {
//!     redis_url: Some("redis://localhost:6379".into()),
//!     ..Default::default()
//! };
//! let mut maintenance = Maintenance::connect(config, Arc::new(Inventory)).await.unwrap();
//! maintenance.start();
//! assert_eq!(maintenance.state(), MaintenanceState::Running);
//!
//! let gate = maintenance.cache_gate();
//! // ... serve requests ...
//!
//! maintenance.shutdown().await;
//! # }
//! ```

mod lifecycle;
mod types;

pub use types::{MaintenanceError, MaintenanceState, PassReport};

use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::articles::ArticleBoard;
use crate::clock::{Clock, SystemClock};
use crate::config::Config;
use crate::page_cache::CacheGate;
use crate::popularity::PopularityTracker;
use crate::refresher::{RowRefresher, RowSource};
use crate::sessions::{SessionTrimmer, Sessions};
use crate::shutdown::ShutdownTrigger;
use crate::store::redis::RedisStore;
use crate::store::RankedStore;

pub struct Maintenance {
    config: Config,
    store: Arc<dyn RankedStore>,
    clock: Arc<dyn Clock>,
    popularity: PopularityTracker,
    trimmer: Arc<SessionTrimmer>,
    refresher: Arc<RowRefresher>,

    state: watch::Sender<MaintenanceState>,
    state_rx: watch::Receiver<MaintenanceState>,
    trigger: Option<ShutdownTrigger>,
    loops: Vec<(&'static str, JoinHandle<()>)>,
}

impl Maintenance {
    /// Build on an existing store. Fails fast on invalid configuration.
    pub fn new(
        config: Config,
        store: Arc<dyn RankedStore>,
        clock: Arc<dyn Clock>,
        source: Arc<dyn RowSource>,
    ) -> Result<Self, MaintenanceError> {
        config.validate()?;

        let popularity = PopularityTracker::new(store.clone(), &config);
        let trimmer = Arc::new(SessionTrimmer::new(store.clone(), &config));
        let refresher = Arc::new(RowRefresher::new(store.clone(), source, clock.clone(), &config));
        let (state, state_rx) = watch::channel(MaintenanceState::Created);

        Ok(Self {
            config,
            store,
            clock,
            popularity,
            trimmer,
            refresher,
            state,
            state_rx,
            trigger: None,
            loops: Vec::new(),
        })
    }

    /// Connect to the configured Redis and build on it.
    pub async fn connect(config: Config, source: Arc<dyn RowSource>) -> Result<Self, MaintenanceError> {
        config.validate()?;
        let url = config.redis_url.as_deref().ok_or(MaintenanceError::MissingRedisUrl)?;
        let store =
            RedisStore::with_prefix(url, config.redis_prefix.as_deref(), config.store_timeout()).await?;
        Self::new(config, Arc::new(store), Arc::new(SystemClock), source)
    }

    #[must_use]
    pub fn state(&self) -> MaintenanceState {
        *self.state_rx.borrow()
    }

    #[must_use]
    pub fn state_receiver(&self) -> watch::Receiver<MaintenanceState> {
        self.state_rx.clone()
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn store(&self) -> Arc<dyn RankedStore> {
        self.store.clone()
    }

    pub fn popularity(&self) -> PopularityTracker {
        self.popularity.clone()
    }

    pub fn sessions(&self) -> Sessions {
        Sessions::new(self.store.clone(), self.clock.clone(), self.popularity.clone(), &self.config)
    }

    pub fn cache_gate(&self) -> CacheGate {
        CacheGate::new(self.store.clone(), self.popularity.clone(), &self.config)
    }

    pub fn articles(&self) -> ArticleBoard {
        ArticleBoard::new(self.store.clone(), self.clock.clone(), &self.config)
    }

    /// Shared with the refresh loop; use it to schedule or read rows.
    pub fn refresher(&self) -> Arc<RowRefresher> {
        self.refresher.clone()
    }
}
