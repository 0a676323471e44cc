// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Delayed refresh of denormalized rows.
//!
//! Two sorted sets drive the refresher:
//!
//! - `delay:`    row → refresh period in seconds (≤ 0 means invalidate)
//! - `schedule:` row → next time the row is due
//!
//! ```text
//!  schedule(row, d) ──▶ delay:[row] = d ──▶ schedule:[row] = now
//!
//!  tick ──▶ lowest schedule: entry due?
//!            ├─ no  ──▶ Idle (caller sleeps refresh_poll)
//!            ├─ delay missing or ≤ 0 ──▶ DEL inv:{row}, ZREM delay:, ZREM schedule:
//!            └─ delay > 0 ──▶ schedule:[row] = now + delay
//!                             └─ spawn fetch → SET inv:{row}  (one per row)
//! ```
//!
//! The reschedule is written before the fetch is dispatched, so a slow
//! source never makes the same row due twice. A row that is still being
//! fetched when it comes due again is rescheduled but not re-fetched.
//!
//! # Reconciliation
//!
//! A crash between the two writes of [`RowRefresher::schedule`] can leave a
//! delay with no schedule entry; [`RowRefresher::reconcile`] re-schedules
//! those and drops schedule entries that lost their delay. It runs once when
//! the loop starts.

use async_trait::async_trait;
use dashmap::DashSet;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::clock::Clock;
use crate::config::Config;
use crate::shutdown::ShutdownSignal;
use crate::store::{keys, RangeOrder, RankedStore, StoreError};

/// Failure reported by a [`RowSource`].
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("Row source unavailable: {0}")]
    Unavailable(String),

    #[error("Row source returned invalid data for {row}: {reason}")]
    Invalid { row: String, reason: String },
}

/// Source of truth for denormalized rows.
#[async_trait]
pub trait RowSource: Send + Sync {
    /// Current record for `row_id`, or `None` if it no longer exists.
    async fn fetch(&self, row_id: &str) -> Result<Option<serde_json::Value>, SourceError>;
}

/// Result of one [`RowRefresher::tick`].
#[derive(Debug, Clone, PartialEq)]
pub enum RefreshStep {
    /// Nothing due. `next_due` is the earliest scheduled time, if any.
    Idle { next_due: Option<f64> },
    /// Row was invalidated and removed from both indices.
    Purged { row_id: String },
    /// Row was rescheduled and a fetch was spawned.
    Dispatched { row_id: String, next_due: f64 },
    /// Row was rescheduled; its previous fetch is still running.
    SkippedInFlight { row_id: String, next_due: f64 },
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    /// Schedule entries dropped because they had no delay
    pub unscheduled: usize,
    /// Delay entries given back a schedule entry
    pub rescheduled: usize,
}

/// Removes a row from the in-flight set when the fetch task ends, even if
/// it panicked.
struct InFlightGuard {
    rows: Arc<DashSet<String>>,
    row_id: String,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.rows.remove(&self.row_id);
        crate::metrics::set_rows_in_flight(self.rows.len());
    }
}

pub struct RowRefresher {
    store: Arc<dyn RankedStore>,
    source: Arc<dyn RowSource>,
    clock: Arc<dyn Clock>,
    poll: Duration,
    in_flight: Arc<DashSet<String>>,
    tasks: Mutex<JoinSet<()>>,
}

impl RowRefresher {
    pub fn new(
        store: Arc<dyn RankedStore>,
        source: Arc<dyn RowSource>,
        clock: Arc<dyn Clock>,
        config: &Config,
    ) -> Self {
        Self {
            store,
            source,
            clock,
            poll: config.refresh_poll(),
            in_flight: Arc::new(DashSet::new()),
            tasks: Mutex::new(JoinSet::new()),
        }
    }

    /// Refresh `row_id` every `delay_secs` seconds starting now. A delay of
    /// zero or less invalidates the row on its next due check.
    pub async fn schedule(&self, row_id: &str, delay_secs: f64) -> Result<(), StoreError> {
        self.store.zadd(keys::DELAY, row_id, delay_secs).await?;
        self.store.zadd(keys::SCHEDULE, row_id, self.clock.now()).await?;
        Ok(())
    }

    /// Stop refreshing `row_id` and drop its cached copy.
    pub async fn invalidate(&self, row_id: &str) -> Result<(), StoreError> {
        self.schedule(row_id, 0.0).await
    }

    /// Last stored copy of a row.
    pub async fn cached_row(&self, row_id: &str) -> Result<Option<serde_json::Value>, StoreError> {
        let Some(raw) = self.store.get(&keys::inventory_row(row_id)).await? else {
            return Ok(None);
        };
        serde_json::from_str(&raw)
            .map(Some)
            .map_err(|e| StoreError::Backend(format!("Corrupt cached row {row_id}: {e}")))
    }

    #[must_use]
    pub fn is_in_flight(&self, row_id: &str) -> bool {
        self.in_flight.contains(row_id)
    }

    #[must_use]
    pub fn in_flight_count(&self) -> usize {
        self.in_flight.len()
    }

    /// Handle at most one due row.
    pub async fn tick(&self) -> Result<RefreshStep, StoreError> {
        self.reap_finished();

        let head = self
            .store
            .zrange_withscores(keys::SCHEDULE, 0, 0, RangeOrder::Ascending)
            .await?;
        let now = self.clock.now();
        let Some((row_id, due)) = head.into_iter().next() else {
            return Ok(RefreshStep::Idle { next_due: None });
        };
        if due > now {
            return Ok(RefreshStep::Idle { next_due: Some(due) });
        }

        let delay = self.store.zscore(keys::DELAY, &row_id).await?;
        match delay {
            Some(delay) if delay > 0.0 => {
                let next_due = now + delay;
                self.store.zadd(keys::SCHEDULE, &row_id, next_due).await?;
                if self.dispatch(&row_id) {
                    Ok(RefreshStep::Dispatched { row_id, next_due })
                } else {
                    crate::metrics::record_row_refresh("skipped_in_flight");
                    debug!(row_id = %row_id, "Previous refresh still running, skipped");
                    Ok(RefreshStep::SkippedInFlight { row_id, next_due })
                }
            }
            _ => {
                self.purge(&row_id).await?;
                crate::metrics::record_row_refresh("purged");
                debug!(row_id = %row_id, "Row invalidated");
                Ok(RefreshStep::Purged { row_id })
            }
        }
    }

    /// Cached copy first, schedule entry last, so an interrupted purge is
    /// finished by the next tick.
    async fn purge(&self, row_id: &str) -> Result<(), StoreError> {
        let ids = [row_id.to_string()];
        self.store.del(&[keys::inventory_row(row_id)]).await?;
        self.store.zrem(keys::DELAY, &ids).await?;
        self.store.zrem(keys::SCHEDULE, &ids).await?;
        Ok(())
    }

    fn dispatch(&self, row_id: &str) -> bool {
        if !self.in_flight.insert(row_id.to_string()) {
            return false;
        }
        crate::metrics::set_rows_in_flight(self.in_flight.len());

        let guard = InFlightGuard {
            rows: self.in_flight.clone(),
            row_id: row_id.to_string(),
        };
        let store = self.store.clone();
        let source = self.source.clone();
        self.tasks.lock().spawn(async move {
            refresh_row(store.as_ref(), source.as_ref(), &guard.row_id).await;
            drop(guard);
        });
        true
    }

    fn reap_finished(&self) {
        let mut tasks = self.tasks.lock();
        while let Some(result) = tasks.try_join_next() {
            if let Err(e) = result {
                error!(error = %e, "Row refresh task failed");
            }
        }
    }

    /// Wait for every spawned fetch to finish.
    pub async fn wait_idle(&self) {
        let mut tasks = std::mem::take(&mut *self.tasks.lock());
        while let Some(result) = tasks.join_next().await {
            if let Err(e) = result {
                error!(error = %e, "Row refresh task failed");
            }
        }
    }

    /// Repair schedule/delay pairs broken by an interrupted write.
    pub async fn reconcile(&self) -> Result<ReconcileReport, StoreError> {
        let scheduled = self
            .store
            .zrange_withscores(keys::SCHEDULE, 0, -1, RangeOrder::Ascending)
            .await?;
        let delays: HashMap<String, f64> = self
            .store
            .zrange_withscores(keys::DELAY, 0, -1, RangeOrder::Ascending)
            .await?
            .into_iter()
            .collect();

        let mut report = ReconcileReport::default();

        let orphaned: Vec<String> = scheduled
            .iter()
            .filter(|(row, _)| !delays.contains_key(row))
            .map(|(row, _)| row.clone())
            .collect();
        if !orphaned.is_empty() {
            let cached: Vec<String> = orphaned.iter().map(|row| keys::inventory_row(row)).collect();
            self.store.del(&cached).await?;
            self.store.zrem(keys::SCHEDULE, &orphaned).await?;
            report.unscheduled = orphaned.len();
        }

        let scheduled: HashSet<&str> = scheduled.iter().map(|(row, _)| row.as_str()).collect();
        let now = self.clock.now();
        for (row, _) in delays.iter().filter(|(row, _)| !scheduled.contains(row.as_str())) {
            // due immediately; tick decides between refresh and purge
            self.store.zadd(keys::SCHEDULE, row, now).await?;
            report.rescheduled += 1;
        }

        if report != ReconcileReport::default() {
            info!(
                unscheduled = report.unscheduled,
                rescheduled = report.rescheduled,
                "Reconciled refresh schedule"
            );
        }
        Ok(report)
    }

    /// Poll for due rows until shutdown, then wait for in-flight fetches.
    #[tracing::instrument(skip(self, shutdown))]
    pub async fn run(&self, mut shutdown: ShutdownSignal) {
        info!(poll = ?self.poll, "Row refresher started");

        if let Err(e) = self.reconcile().await {
            warn!(error = %e, "Schedule reconciliation failed, continuing");
        }

        while !shutdown.is_triggered() {
            let started = Instant::now();
            let step = self.tick().await;
            crate::metrics::record_loop_iteration("refresher", started.elapsed());

            let idle = match step {
                Ok(RefreshStep::Idle { .. }) => true,
                Ok(_) => false,
                Err(e) => {
                    warn!(error = %e, "Refresh tick failed, retrying next poll");
                    crate::metrics::record_loop_error("refresher");
                    true
                }
            };
            if idle && shutdown.sleep(self.poll).await {
                break;
            }
        }

        self.wait_idle().await;
        info!("Row refresher stopped");
    }
}

async fn refresh_row(store: &dyn RankedStore, source: &dyn RowSource, row_id: &str) {
    let key = keys::inventory_row(row_id);
    match source.fetch(row_id).await {
        Ok(Some(row)) => {
            let json = row.to_string();
            match store.set(&key, &json, None).await {
                Ok(()) => {
                    crate::metrics::record_row_refresh("refreshed");
                    debug!(row_id, "Row refreshed");
                }
                Err(e) => {
                    crate::metrics::record_row_refresh("store_failed");
                    warn!(row_id, error = %e, "Failed to store refreshed row");
                }
            }
        }
        Ok(None) => {
            crate::metrics::record_row_refresh("missing_row");
            debug!(row_id, "Row gone from source, dropping cached copy");
            if let Err(e) = store.del(&[key]).await {
                warn!(row_id, error = %e, "Failed to drop cached row");
            }
        }
        Err(e) => {
            crate::metrics::record_row_refresh("fetch_failed");
            warn!(row_id, error = %e, "Row fetch failed, keeping cached copy");
        }
    }
}
