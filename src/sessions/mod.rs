// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Login sessions, per-session view history and carts.
//!
//! Foreground code only ever adds to `recent:`; removal belongs to
//! [`trimmer::SessionTrimmer`].

pub mod trimmer;

use std::sync::Arc;

use crate::clock::Clock;
use crate::config::Config;
use crate::popularity::PopularityTracker;
use crate::store::{keys, RankedStore, StoreError};

pub use trimmer::{SessionTrimmer, TrimMode, TrimOutcome, TrimmerState};

#[derive(Clone)]
pub struct Sessions {
    store: Arc<dyn RankedStore>,
    clock: Arc<dyn Clock>,
    popularity: PopularityTracker,
    history_len: usize,
}

impl Sessions {
    pub fn new(
        store: Arc<dyn RankedStore>,
        clock: Arc<dyn Clock>,
        popularity: PopularityTracker,
        config: &Config,
    ) -> Self {
        Self {
            store,
            clock,
            popularity,
            history_len: config.viewed_history_len,
        }
    }

    /// User owning `token`, if the session is live.
    pub async fn check_token(&self, token: &str) -> Result<Option<String>, StoreError> {
        self.store.hget(keys::LOGIN, token).await
    }

    /// Refresh a session's activity and, when an item was viewed, append it
    /// to the session history and count it towards the item's popularity.
    pub async fn update_token(
        &self,
        token: &str,
        user: &str,
        item: Option<&str>,
    ) -> Result<(), StoreError> {
        let now = self.clock.now();
        self.store.hset(keys::LOGIN, token, user).await?;
        self.store.zadd(keys::RECENT, token, now).await?;

        if let Some(item) = item {
            let history = keys::viewed_history(token);
            self.store.zadd(&history, item, now).await?;
            // keep only the newest `history_len` entries
            let stop = -(self.history_len as isize) - 1;
            self.store.zremrangebyrank(&history, 0, stop).await?;
            self.popularity.record_view(item).await?;
        }
        Ok(())
    }

    /// Set the quantity of `item` in the session's cart; `count <= 0` removes it.
    pub async fn add_to_cart(&self, session: &str, item: &str, count: i64) -> Result<(), StoreError> {
        let cart = keys::cart(session);
        if count <= 0 {
            self.store.hdel(&cart, &[item.to_string()]).await?;
        } else {
            self.store.hset(&cart, item, &count.to_string()).await?;
        }
        Ok(())
    }

    /// Item → quantity for the session's cart.
    pub async fn cart(&self, session: &str) -> Result<Vec<(String, i64)>, StoreError> {
        let raw = self.store.hgetall(&keys::cart(session)).await?;
        let mut items: Vec<(String, i64)> = raw
            .into_iter()
            .filter_map(|(item, qty)| qty.parse().ok().map(|q| (item, q)))
            .collect();
        items.sort();
        Ok(items)
    }

    /// Items the session viewed, newest first.
    pub async fn recently_viewed(&self, token: &str) -> Result<Vec<String>, StoreError> {
        self.store
            .zrange(&keys::viewed_history(token), 0, -1, crate::store::RangeOrder::Descending)
            .await
    }
}
