// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

use async_trait::async_trait;
use std::collections::HashMap;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Store backend error: {0}")]
    Backend(String),
    #[error("Store call '{operation}' timed out after {timeout:?}")]
    Timeout {
        operation: String,
        timeout: Duration,
    },
    #[error("Key '{0}' holds the wrong kind of value")]
    WrongType(String),
}

impl StoreError {
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }
}

/// How scores are combined when intersecting ranked sets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Aggregate {
    Sum,
    Min,
    Max,
}

impl Aggregate {
    pub(crate) fn as_arg(self) -> &'static str {
        match self {
            Self::Sum => "SUM",
            Self::Min => "MIN",
            Self::Max => "MAX",
        }
    }

    pub(crate) fn combine(self, a: f64, b: f64) -> f64 {
        match self {
            Self::Sum => a + b,
            Self::Min => a.min(b),
            Self::Max => a.max(b),
        }
    }
}

/// Direction of a by-rank range read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RangeOrder {
    /// Lowest score first (ZRANGE)
    Ascending,
    /// Highest score first (ZREVRANGE)
    Descending,
}

/// The store capability every component is written against.
///
/// Ranges use Redis rank semantics: inclusive `start..=stop`, negative
/// indices count from the end (`-1` is the last member). Ties in score are
/// broken by member name.
///
/// Implementations carry their own per-call timeout; a timed-out call
/// surfaces as [`StoreError::Timeout`].
#[async_trait]
pub trait RankedStore: Send + Sync {
    // Strings
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError>;
    async fn set(&self, key: &str, value: &str, ttl_secs: Option<u64>) -> Result<(), StoreError>;
    async fn incr(&self, key: &str, delta: i64) -> Result<i64, StoreError>;

    // Hashes
    async fn hget(&self, key: &str, field: &str) -> Result<Option<String>, StoreError>;
    async fn hset(&self, key: &str, field: &str, value: &str) -> Result<(), StoreError>;
    async fn hset_many(&self, key: &str, fields: &[(String, String)]) -> Result<(), StoreError>;
    async fn hincr(&self, key: &str, field: &str, delta: i64) -> Result<i64, StoreError>;
    async fn hdel(&self, key: &str, fields: &[String]) -> Result<u64, StoreError>;
    async fn hgetall(&self, key: &str) -> Result<HashMap<String, String>, StoreError>;

    // Sets
    /// Returns `true` if the member was newly added.
    async fn sadd(&self, key: &str, member: &str) -> Result<bool, StoreError>;
    async fn srem(&self, key: &str, member: &str) -> Result<bool, StoreError>;
    async fn sismember(&self, key: &str, member: &str) -> Result<bool, StoreError>;
    async fn scard(&self, key: &str) -> Result<u64, StoreError>;

    // Ranked sets
    async fn zadd(&self, key: &str, member: &str, score: f64) -> Result<(), StoreError>;
    /// Returns the member's new score.
    async fn zincr(&self, key: &str, member: &str, delta: f64) -> Result<f64, StoreError>;
    async fn zrem(&self, key: &str, members: &[String]) -> Result<u64, StoreError>;
    async fn zremrangebyrank(&self, key: &str, start: isize, stop: isize) -> Result<u64, StoreError>;
    async fn zrange(
        &self,
        key: &str,
        start: isize,
        stop: isize,
        order: RangeOrder,
    ) -> Result<Vec<String>, StoreError>;
    async fn zrange_withscores(
        &self,
        key: &str,
        start: isize,
        stop: isize,
        order: RangeOrder,
    ) -> Result<Vec<(String, f64)>, StoreError>;
    /// 0-based ascending rank.
    async fn zrank(&self, key: &str, member: &str) -> Result<Option<u64>, StoreError>;
    async fn zscore(&self, key: &str, member: &str) -> Result<Option<f64>, StoreError>;
    async fn zcard(&self, key: &str) -> Result<u64, StoreError>;
    /// Intersect `keys` into `dest`, replacing it. Plain sets count as score 1.
    /// Returns the cardinality of `dest`.
    async fn zinterstore(
        &self,
        dest: &str,
        keys: &[String],
        aggregate: Aggregate,
    ) -> Result<u64, StoreError>;
    /// Keep only the `keep` lowest-ranked members of `key` and multiply every
    /// remaining score by `factor`, as a single transaction.
    /// Returns the number of members removed.
    async fn ztrim_and_scale(&self, key: &str, keep: usize, factor: f64) -> Result<u64, StoreError>;

    // Keys
    async fn expire(&self, key: &str, ttl_secs: u64) -> Result<bool, StoreError>;
    async fn exists(&self, key: &str) -> Result<bool, StoreError>;
    /// Multi-key delete. Returns the number of keys removed.
    async fn del(&self, keys: &[String]) -> Result<u64, StoreError>;
}
