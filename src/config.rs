// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Configuration for the maintenance loops and foreground gates.
//!
//! # Example
//!
//! ```
//! use ranked_cache::Config;
//!
//! // Defaults
//! let config = Config::default();
//! assert_eq!(config.session_limit, 1_000_000);
//! assert_eq!(config.cache_rank_threshold, 10_000);
//!
//! // Small limits for a staging box
//! let config = Config {
//!     redis_url: Some("redis://localhost:6379".into()),
//!     session_limit: 10_000,
//!     popularity_keep: 2_000,
//!     ..Default::default()
//! };
//! assert!(config.validate().is_ok());
//! ```

use serde::Deserialize;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug, PartialEq)]
pub enum ConfigError {
    #[error("'{field}' must be greater than zero")]
    Zero { field: &'static str },
    #[error("'{field}' must be within (0, 1], got {value}")]
    OutOfRange { field: &'static str, value: f64 },
}

/// Every threshold the loops and gates use.
///
/// All fields have defaults matching the reference deployment. Loading this
/// from a file or the environment is the embedding process's job.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Redis connection string (e.g., "redis://localhost:6379")
    #[serde(default)]
    pub redis_url: Option<String>,

    /// Key namespace prepended to every store key
    #[serde(default)]
    pub redis_prefix: Option<String>,

    /// Upper bound on a single store call
    #[serde(default = "default_store_timeout_ms")]
    pub store_timeout_ms: u64,

    /// Session trimming
    #[serde(default = "default_session_limit")]
    pub session_limit: u64,
    #[serde(default = "default_trim_batch_size")]
    pub trim_batch_size: u64,
    #[serde(default = "default_trim_idle_ms")]
    pub trim_idle_ms: u64,
    /// Also drop carts when trimming sessions
    #[serde(default = "default_trim_carts")]
    pub trim_carts: bool,
    #[serde(default = "default_viewed_history_len")]
    pub viewed_history_len: usize,

    /// Popularity decay
    #[serde(default = "default_popularity_keep")]
    pub popularity_keep: usize,
    #[serde(default = "default_popularity_decay_factor")]
    pub popularity_decay_factor: f64,
    #[serde(default = "default_popularity_interval_secs")]
    pub popularity_interval_secs: u64,

    /// Page cache gate
    #[serde(default = "default_cache_rank_threshold")]
    pub cache_rank_threshold: u64,
    #[serde(default = "default_page_cache_ttl_secs")]
    pub page_cache_ttl_secs: u64,

    /// Row refresher
    #[serde(default = "default_refresh_poll_ms")]
    pub refresh_poll_ms: u64,

    /// Voting
    #[serde(default = "default_vote_window_secs")]
    pub vote_window_secs: u64,
    #[serde(default = "default_vote_weight")]
    pub vote_weight: f64,
    #[serde(default = "default_articles_per_page")]
    pub articles_per_page: usize,
    #[serde(default = "default_group_cache_ttl_secs")]
    pub group_cache_ttl_secs: u64,
}

fn default_store_timeout_ms() -> u64 { 2_000 }
fn default_session_limit() -> u64 { 1_000_000 }
fn default_trim_batch_size() -> u64 { 100 }
fn default_trim_idle_ms() -> u64 { 1_000 }
fn default_trim_carts() -> bool { true }
fn default_viewed_history_len() -> usize { 25 }
fn default_popularity_keep() -> usize { 20_000 }
fn default_popularity_decay_factor() -> f64 { 0.5 }
fn default_popularity_interval_secs() -> u64 { 300 }
fn default_cache_rank_threshold() -> u64 { 10_000 }
fn default_page_cache_ttl_secs() -> u64 { 300 }
fn default_refresh_poll_ms() -> u64 { 50 }
fn default_vote_window_secs() -> u64 { 7 * 86_400 }
fn default_vote_weight() -> f64 { 432.0 }
fn default_articles_per_page() -> usize { 25 }
fn default_group_cache_ttl_secs() -> u64 { 60 }

impl Default for Config {
    fn default() -> Self {
        Self {
            redis_url: None,
            redis_prefix: None,
            store_timeout_ms: default_store_timeout_ms(),
            session_limit: default_session_limit(),
            trim_batch_size: default_trim_batch_size(),
            trim_idle_ms: default_trim_idle_ms(),
            trim_carts: default_trim_carts(),
            viewed_history_len: default_viewed_history_len(),
            popularity_keep: default_popularity_keep(),
            popularity_decay_factor: default_popularity_decay_factor(),
            popularity_interval_secs: default_popularity_interval_secs(),
            cache_rank_threshold: default_cache_rank_threshold(),
            page_cache_ttl_secs: default_page_cache_ttl_secs(),
            refresh_poll_ms: default_refresh_poll_ms(),
            vote_window_secs: default_vote_window_secs(),
            vote_weight: default_vote_weight(),
            articles_per_page: default_articles_per_page(),
            group_cache_ttl_secs: default_group_cache_ttl_secs(),
        }
    }
}

impl Config {
    /// Reject settings that would make a loop spin or do nothing.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let non_zero: [(&'static str, u64); 10] = [
            ("store_timeout_ms", self.store_timeout_ms),
            ("trim_batch_size", self.trim_batch_size),
            ("trim_idle_ms", self.trim_idle_ms),
            ("viewed_history_len", self.viewed_history_len as u64),
            ("popularity_keep", self.popularity_keep as u64),
            ("popularity_interval_secs", self.popularity_interval_secs),
            ("page_cache_ttl_secs", self.page_cache_ttl_secs),
            ("refresh_poll_ms", self.refresh_poll_ms),
            ("articles_per_page", self.articles_per_page as u64),
            ("group_cache_ttl_secs", self.group_cache_ttl_secs),
        ];
        if let Some((field, _)) = non_zero.iter().find(|(_, v)| *v == 0) {
            return Err(ConfigError::Zero { field });
        }

        let factor = self.popularity_decay_factor;
        if !(factor > 0.0 && factor <= 1.0) {
            return Err(ConfigError::OutOfRange {
                field: "popularity_decay_factor",
                value: factor,
            });
        }
        Ok(())
    }

    pub fn store_timeout(&self) -> Duration {
        Duration::from_millis(self.store_timeout_ms)
    }

    pub fn trim_idle(&self) -> Duration {
        Duration::from_millis(self.trim_idle_ms)
    }

    pub fn popularity_interval(&self) -> Duration {
        Duration::from_secs(self.popularity_interval_secs)
    }

    pub fn refresh_poll(&self) -> Duration {
        Duration::from_millis(self.refresh_poll_ms)
    }
}
