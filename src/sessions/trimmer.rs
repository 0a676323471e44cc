// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Bounds the number of live sessions.
//!
//! # States
//!
//! ```text
//!            size <= limit (sleep trim_idle)
//!              ┌────────┐
//!              ▼        │
//!  start ──▶ IdleWait ──┘ ──size > limit──▶ OverLimitTrim
//!              ▲                                 │
//!              └────────── batch evicted ────────┘
//!
//!  any state ──shutdown──▶ Stopping
//! ```
//!
//! # Eviction order
//!
//! A batch is evicted dependents-first: history (and cart) keys, then the
//! `login:` fields, and the `recent:` entries last. If any step fails the
//! tokens are still in `recent:` and the whole batch is picked up again on
//! the next pass; the earlier deletes are idempotent.

use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::shutdown::ShutdownSignal;
use crate::store::{keys, RangeOrder, RankedStore, StoreError};

/// What gets deleted alongside a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrimMode {
    /// View history only
    HistoryOnly,
    /// View history and cart
    Full,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrimmerState {
    IdleWait,
    OverLimitTrim,
    Stopping,
}

impl std::fmt::Display for TrimmerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::IdleWait => write!(f, "IdleWait"),
            Self::OverLimitTrim => write!(f, "OverLimitTrim"),
            Self::Stopping => write!(f, "Stopping"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TrimOutcome {
    /// Nothing to do
    UnderLimit { size: u64 },
    /// One batch evicted, oldest first
    Trimmed { tokens: Vec<String>, size_before: u64 },
}

pub struct SessionTrimmer {
    store: Arc<dyn RankedStore>,
    limit: u64,
    batch_size: u64,
    idle: Duration,
    mode: TrimMode,
}

impl SessionTrimmer {
    pub fn new(store: Arc<dyn RankedStore>, config: &Config) -> Self {
        let mode = if config.trim_carts {
            TrimMode::Full
        } else {
            TrimMode::HistoryOnly
        };
        Self {
            store,
            limit: config.session_limit,
            batch_size: config.trim_batch_size.max(1),
            idle: config.trim_idle(),
            mode,
        }
    }

    #[must_use]
    pub fn mode(&self) -> TrimMode {
        self.mode
    }

    /// Evict at most one batch of the oldest sessions if over the limit.
    pub async fn trim_once(&self) -> Result<TrimOutcome, StoreError> {
        let size = self.store.zcard(keys::RECENT).await?;
        crate::metrics::set_recent_sessions(size);
        if size <= self.limit {
            return Ok(TrimOutcome::UnderLimit { size });
        }

        let excess = (size - self.limit).min(self.batch_size) as isize;
        let tokens = self
            .store
            .zrange(keys::RECENT, 0, excess - 1, RangeOrder::Ascending)
            .await?;

        if !tokens.is_empty() {
            self.evict(&tokens).await?;
            crate::metrics::record_sessions_trimmed(tokens.len());
            debug!(evicted = tokens.len(), size_before = size, "Trimmed oldest sessions");
        }

        Ok(TrimOutcome::Trimmed {
            tokens,
            size_before: size,
        })
    }

    async fn evict(&self, tokens: &[String]) -> Result<(), StoreError> {
        let mut dependents: Vec<String> = tokens.iter().map(|t| keys::viewed_history(t)).collect();
        if self.mode == TrimMode::Full {
            dependents.extend(tokens.iter().map(|t| keys::cart(t)));
        }

        self.store.del(&dependents).await?;
        self.store.hdel(keys::LOGIN, tokens).await?;
        self.store.zrem(keys::RECENT, tokens).await?;
        Ok(())
    }

    /// Trim until shutdown. Store failures drop back to `IdleWait`.
    #[tracing::instrument(skip(self, shutdown))]
    pub async fn run(&self, mut shutdown: ShutdownSignal) {
        info!(limit = self.limit, batch = self.batch_size, mode = ?self.mode, "Session trimmer started");
        let mut state = TrimmerState::IdleWait;

        loop {
            if shutdown.is_triggered() {
                state = TrimmerState::Stopping;
            }

            state = match state {
                TrimmerState::Stopping => break,
                TrimmerState::IdleWait => match self.store.zcard(keys::RECENT).await {
                    Ok(size) if size > self.limit => TrimmerState::OverLimitTrim,
                    Ok(_) => self.idle_wait(&mut shutdown).await,
                    Err(e) => {
                        warn!(error = %e, "Session size check failed, retrying next tick");
                        crate::metrics::record_loop_error("trimmer");
                        self.idle_wait(&mut shutdown).await
                    }
                },
                TrimmerState::OverLimitTrim => {
                    let started = Instant::now();
                    let next = match self.trim_once().await {
                        Ok(_) => TrimmerState::IdleWait,
                        Err(e) => {
                            warn!(error = %e, "Session trim failed, batch will be retried");
                            crate::metrics::record_loop_error("trimmer");
                            self.idle_wait(&mut shutdown).await
                        }
                    };
                    crate::metrics::record_loop_iteration("trimmer", started.elapsed());
                    next
                }
            };
        }

        info!("Session trimmer stopped");
    }

    async fn idle_wait(&self, shutdown: &mut ShutdownSignal) -> TrimmerState {
        if shutdown.sleep(self.idle).await {
            TrimmerState::Stopping
        } else {
            TrimmerState::IdleWait
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memory::MemoryStore;

    async fn seed(store: &MemoryStore, count: usize) {
        for i in 0..count {
            let token = format!("tok-{i:03}");
            store.hset(keys::LOGIN, &token, "user").await.unwrap();
            store.zadd(keys::RECENT, &token, i as f64).await.unwrap();
            store.zadd(&keys::viewed_history(&token), "item", i as f64).await.unwrap();
            store.hset(&keys::cart(&token), "item", "1").await.unwrap();
        }
    }

    fn trimmer(store: Arc<MemoryStore>, limit: u64, batch: u64, carts: bool) -> SessionTrimmer {
        let config = Config {
            session_limit: limit,
            trim_batch_size: batch,
            trim_idle_ms: 5,
            trim_carts: carts,
            ..Default::default()
        };
        SessionTrimmer::new(store, &config)
    }

    #[tokio::test]
    async fn test_under_limit_does_nothing() {
        let store = Arc::new(MemoryStore::new());
        seed(&store, 3).await;
        let trimmer = trimmer(store.clone(), 5, 100, true);

        assert_eq!(trimmer.trim_once().await.unwrap(), TrimOutcome::UnderLimit { size: 3 });
        assert_eq!(store.zcard(keys::RECENT).await.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_trims_oldest_first_in_bounded_batches() {
        let store = Arc::new(MemoryStore::new());
        seed(&store, 10).await;
        let trimmer = trimmer(store.clone(), 4, 2, true);

        let outcome = trimmer.trim_once().await.unwrap();
        assert_eq!(
            outcome,
            TrimOutcome::Trimmed {
                tokens: vec!["tok-000".to_string(), "tok-001".to_string()],
                size_before: 10,
            }
        );

        while let TrimOutcome::Trimmed { .. } = trimmer.trim_once().await.unwrap() {}

        let left = store.zrange(keys::RECENT, 0, -1, RangeOrder::Ascending).await.unwrap();
        assert_eq!(left, vec!["tok-006", "tok-007", "tok-008", "tok-009"]);
        assert_eq!(store.hget(keys::LOGIN, "tok-005").await.unwrap(), None);
        assert!(!store.exists(&keys::viewed_history("tok-005")).await.unwrap());
        assert!(!store.exists(&keys::cart("tok-005")).await.unwrap());
        assert!(store.exists(&keys::viewed_history("tok-006")).await.unwrap());
    }

    #[tokio::test]
    async fn test_history_only_mode_keeps_carts() {
        let store = Arc::new(MemoryStore::new());
        seed(&store, 3).await;
        let trimmer = trimmer(store.clone(), 2, 100, false);
        assert_eq!(trimmer.mode(), TrimMode::HistoryOnly);

        trimmer.trim_once().await.unwrap();

        assert!(!store.exists(&keys::viewed_history("tok-000")).await.unwrap());
        assert!(store.exists(&keys::cart("tok-000")).await.unwrap());
    }

    #[tokio::test]
    async fn test_failed_batch_stays_in_index() {
        let store = Arc::new(MemoryStore::new());
        seed(&store, 3).await;
        let trimmer = trimmer(store.clone(), 2, 100, true);

        store.set_unavailable(true);
        assert!(trimmer.trim_once().await.is_err());
        store.set_unavailable(false);

        assert_eq!(store.zcard(keys::RECENT).await.unwrap(), 3);
        trimmer.trim_once().await.unwrap();
        assert_eq!(store.zcard(keys::RECENT).await.unwrap(), 2);
        assert_eq!(store.hget(keys::LOGIN, "tok-000").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_run_converges_and_stops() {
        let store = Arc::new(MemoryStore::new());
        seed(&store, 50).await;
        let trimmer = Arc::new(trimmer(store.clone(), 20, 7, true));

        let (trigger, signal) = crate::shutdown::shutdown_channel();
        let looping = trimmer.clone();
        let handle = tokio::spawn(async move { looping.run(signal).await });

        for _ in 0..100 {
            if store.zcard(keys::RECENT).await.unwrap() <= 20 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        trigger.trigger();
        tokio::time::timeout(Duration::from_secs(1), handle).await.unwrap().unwrap();

        assert_eq!(store.zcard(keys::RECENT).await.unwrap(), 20);
        assert_eq!(store.hgetall(keys::LOGIN).await.unwrap().len(), 20);
        assert_eq!(store.zrank(keys::RECENT, "tok-030").await.unwrap(), Some(0));
    }

    #[test]
    fn test_state_display() {
        assert_eq!(TrimmerState::OverLimitTrim.to_string(), "OverLimitTrim");
    }
}
