// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Decaying popularity rank of viewed items.
//!
//! Every view subtracts one from the item's score in `viewed:`, so ascending
//! rank 0 is the most viewed item. A periodic pass keeps only the top
//! `popularity_keep` items and halves every remaining score, which lets new
//! items overtake ones that were only popular a long time ago.
//!
//! ```text
//!  recordView ──ZINCRBY -1──▶ viewed:  ◀── MULTI { ZREMRANGEBYRANK keep -1
//!  rank       ──ZRANK──────▶ viewed:                ZUNIONSTORE WEIGHTS 0.5 }
//! ```

use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::shutdown::ShutdownSignal;
use crate::store::{keys, RankedStore, StoreError};

/// Score change applied per view. Negative so hotter items sort first.
pub const VIEW_INCREMENT: f64 = -1.0;

#[derive(Clone)]
pub struct PopularityTracker {
    store: Arc<dyn RankedStore>,
    keep: usize,
    decay_factor: f64,
}

impl PopularityTracker {
    pub fn new(store: Arc<dyn RankedStore>, config: &Config) -> Self {
        Self {
            store,
            keep: config.popularity_keep,
            decay_factor: config.popularity_decay_factor,
        }
    }

    pub async fn record_view(&self, item: &str) -> Result<(), StoreError> {
        self.store.zincr(keys::VIEWED, item, VIEW_INCREMENT).await?;
        Ok(())
    }

    /// 0-based popularity rank; `None` if the item is not tracked.
    pub async fn rank(&self, item: &str) -> Result<Option<u64>, StoreError> {
        self.store.zrank(keys::VIEWED, item).await
    }

    pub async fn tracked(&self) -> Result<u64, StoreError> {
        self.store.zcard(keys::VIEWED).await
    }

    /// Drop everything outside the top `keep` and rescale the rest, in one
    /// store transaction. Returns the number of items dropped.
    pub async fn decay_and_trim(&self) -> Result<u64, StoreError> {
        let removed = self
            .store
            .ztrim_and_scale(keys::VIEWED, self.keep, self.decay_factor)
            .await?;
        crate::metrics::record_popularity_decay(removed);
        debug!(removed, keep = self.keep, factor = self.decay_factor, "Popularity rescaled");
        Ok(removed)
    }

    /// Decay on a fixed interval until shutdown. A failed pass is logged and
    /// retried on the next tick.
    #[tracing::instrument(skip(self, shutdown, interval))]
    pub async fn run(&self, interval: std::time::Duration, mut shutdown: ShutdownSignal) {
        info!(?interval, keep = self.keep, "Popularity decay loop started");

        while !shutdown.is_triggered() {
            let started = Instant::now();
            if let Err(e) = self.decay_and_trim().await {
                warn!(error = %e, "Popularity decay failed, retrying next tick");
                crate::metrics::record_loop_error("popularity");
            }
            crate::metrics::record_loop_iteration("popularity", started.elapsed());

            if shutdown.sleep(interval).await {
                break;
            }
        }

        info!("Popularity decay loop stopped");
    }
}
