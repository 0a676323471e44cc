// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Loop lifecycle: start, manual pass, shutdown.

use std::time::Instant;
use tracing::{error, info, warn};

use crate::sessions::TrimOutcome;
use crate::shutdown::shutdown_channel;
use crate::store::StoreError;

use super::{Maintenance, MaintenanceState, PassReport};

impl Maintenance {
    /// Spawn the session trimmer, popularity decay and row refresher loops.
    ///
    /// Must be called inside a tokio runtime. Calling it again while the
    /// loops are running does nothing.
    #[tracing::instrument(skip(self))]
    pub fn start(&mut self) {
        if self.trigger.is_some() {
            warn!(state = %self.state(), "Maintenance loops already started");
            return;
        }

        let (trigger, signal) = shutdown_channel();

        let trimmer = self.trimmer.clone();
        let trim_signal = signal.clone();
        self.loops.push((
            "trimmer",
            tokio::spawn(async move { trimmer.run(trim_signal).await }),
        ));

        let popularity = self.popularity.clone();
        let interval = self.config.popularity_interval();
        let decay_signal = signal.clone();
        self.loops.push((
            "popularity",
            tokio::spawn(async move { popularity.run(interval, decay_signal).await }),
        ));

        let refresher = self.refresher.clone();
        self.loops.push((
            "refresher",
            tokio::spawn(async move { refresher.run(signal).await }),
        ));

        self.trigger = Some(trigger);
        let _ = self.state.send(MaintenanceState::Running);
        info!(loops = self.loops.len(), "Maintenance loops running");
    }

    /// One pass of every loop body, without spawning anything.
    ///
    /// For callers that drive maintenance from their own scheduler, and for
    /// tests. Stops at the first store error.
    pub async fn run_once(&self) -> Result<PassReport, StoreError> {
        let sessions_trimmed = match self.trimmer.trim_once().await? {
            TrimOutcome::Trimmed { tokens, .. } => tokens.len(),
            TrimOutcome::UnderLimit { .. } => 0,
        };
        let popularity_dropped = self.popularity.decay_and_trim().await?;
        let refresh = self.refresher.tick().await?;

        Ok(PassReport {
            sessions_trimmed,
            popularity_dropped,
            refresh,
        })
    }

    /// Signal every loop to stop and wait for them.
    ///
    /// Each loop finishes the store calls of its current iteration first;
    /// the refresher also waits for its outstanding fetches.
    #[tracing::instrument(skip(self))]
    pub async fn shutdown(&mut self) {
        let Some(trigger) = self.trigger.take() else {
            let _ = self.state.send(MaintenanceState::Stopped);
            return;
        };

        let shutdown_start = Instant::now();
        info!("Shutting down maintenance loops...");
        let _ = self.state.send(MaintenanceState::ShuttingDown);
        trigger.trigger();

        for (name, handle) in self.loops.drain(..) {
            if let Err(e) = handle.await {
                error!(loop_name = name, error = %e, "Maintenance loop panicked");
            }
        }

        let _ = self.state.send(MaintenanceState::Stopped);
        info!(elapsed = ?shutdown_start.elapsed(), "Maintenance loops stopped");
    }
}

#[cfg(test)]
mod tests {
    use crate::clock::ManualClock;
    use crate::config::Config;
    use crate::coordinator::{Maintenance, MaintenanceError, MaintenanceState};
    use crate::refresher::{RefreshStep, RowSource, SourceError};
    use crate::store::memory::MemoryStore;
    use crate::store::{keys, RankedStore};
    use async_trait::async_trait;
    use std::sync::Arc;
    use std::time::Duration;

    struct EchoSource;

    #[async_trait]
    impl RowSource for EchoSource {
        async fn fetch(&self, row_id: &str) -> Result<Option<serde_json::Value>, SourceError> {
            Ok(Some(serde_json::json!({ "id": row_id })))
        }
    }

    fn maintenance(config: Config) -> (Arc<MemoryStore>, Arc<ManualClock>, Maintenance) {
        let clock = Arc::new(ManualClock::new(5_000.0));
        let store = Arc::new(MemoryStore::with_clock(clock.clone()));
        let maintenance =
            Maintenance::new(config, store.clone(), clock.clone(), Arc::new(EchoSource)).unwrap();
        (store, clock, maintenance)
    }

    fn small_config() -> Config {
        Config {
            session_limit: 2,
            trim_idle_ms: 5,
            popularity_keep: 3,
            popularity_interval_secs: 1,
            refresh_poll_ms: 5,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_invalid_config_rejected() {
        let store = Arc::new(MemoryStore::new());
        let config = Config {
            refresh_poll_ms: 0,
            ..Default::default()
        };
        let result = Maintenance::new(
            config,
            store,
            Arc::new(ManualClock::new(0.0)),
            Arc::new(EchoSource),
        );
        assert!(matches!(result, Err(MaintenanceError::Config(_))));
    }

    #[tokio::test]
    async fn test_connect_requires_url() {
        let result = Maintenance::connect(Config::default(), Arc::new(EchoSource)).await;
        assert!(matches!(result, Err(MaintenanceError::MissingRedisUrl)));
    }

    #[tokio::test]
    async fn test_run_once_drives_every_component() {
        let (store, _, maintenance) = maintenance(small_config());
        let sessions = maintenance.sessions();
        for token in ["a", "b", "c", "d"] {
            sessions.update_token(token, "user", Some(token)).await.unwrap();
        }
        maintenance.refresher().schedule("row", 30.0).await.unwrap();

        let report = maintenance.run_once().await.unwrap();

        assert_eq!(report.sessions_trimmed, 2);
        assert_eq!(report.popularity_dropped, 1);
        assert!(matches!(report.refresh, RefreshStep::Dispatched { .. }));
        maintenance.refresher().wait_idle().await;
        assert_eq!(
            maintenance.refresher().cached_row("row").await.unwrap(),
            Some(serde_json::json!({ "id": "row" }))
        );
        assert_eq!(store.zcard(keys::RECENT).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_start_and_shutdown() {
        let (store, _, mut maintenance) = maintenance(small_config());
        assert_eq!(maintenance.state(), MaintenanceState::Created);

        let sessions = maintenance.sessions();
        for i in 0..6 {
            sessions.update_token(&format!("t{i}"), "user", None).await.unwrap();
        }

        let states = maintenance.state_receiver();
        maintenance.start();
        maintenance.start();
        assert_eq!(maintenance.state(), MaintenanceState::Running);
        assert!(states.has_changed().unwrap());

        for _ in 0..100 {
            if store.zcard(keys::RECENT).await.unwrap() <= 2 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        tokio::time::timeout(Duration::from_secs(2), maintenance.shutdown())
            .await
            .unwrap();
        assert_eq!(maintenance.state(), MaintenanceState::Stopped);
        assert_eq!(store.zcard(keys::RECENT).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_shutdown_before_start() {
        let (_, _, mut maintenance) = maintenance(small_config());
        maintenance.shutdown().await;
        assert_eq!(maintenance.state(), MaintenanceState::Stopped);
    }
}
