// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Redis backend for [`RankedStore`].
//!
//! Every call goes through the same path: prefix the key(s), clone the
//! shared [`ConnectionManager`] and bound the call with a timeout. A timed
//! out command may still have been applied by the server, so only commands
//! that converge to the same state when repeated ([`Replay::Safe`]) are
//! retried with the [`RetryConfig::query`] policy. Increments and the decay
//! transaction get exactly one attempt. The decay rewrite runs as a
//! MULTI/EXEC pipeline so concurrent `ZINCRBY`s land before or after it.

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{cmd, pipe, AsyncCommands, Client, RedisResult};
use std::collections::HashMap;
use std::future::Future;
use std::time::Duration;

use super::traits::{Aggregate, RangeOrder, RankedStore, StoreError};
use crate::resilience::retry::{retry, with_timeout, RetryConfig};

pub struct RedisStore {
    connection: ConnectionManager,
    /// Optional key prefix for namespacing (e.g., "shop:" → "shop:recent:")
    prefix: String,
    timeout: Duration,
}

/// Whether a command may be sent again after an attempt with unknown outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Replay {
    /// Reads and writes that land on the same state when repeated.
    Safe,
    /// Increments, rank-relative removals and read-modify-write transactions.
    Unsafe,
}

impl Replay {
    pub(crate) fn policy(self) -> RetryConfig {
        match self {
            Replay::Safe => RetryConfig::query(),
            Replay::Unsafe => RetryConfig::once(),
        }
    }
}

/// Timeout + retry around one command under the policy of `replay`.
pub(crate) async fn bounded_call<T, F, Fut>(
    operation: &'static str,
    replay: Replay,
    timeout: Duration,
    mut call: F,
) -> Result<T, StoreError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, StoreError>>,
{
    retry(operation, &replay.policy(), || {
        with_timeout(operation, timeout, call())
    })
    .await
}

impl RedisStore {
    /// Connect without a key prefix.
    pub async fn new(connection_string: &str, timeout: Duration) -> Result<Self, StoreError> {
        Self::with_prefix(connection_string, None, timeout).await
    }

    /// Connect with an optional key prefix.
    ///
    /// ```rust,no_run
    /// # use ranked_cache::store::redis::RedisStore;
    /// # use std::time::Duration;
    /// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
    /// // Keys will be prefixed: "shop:recent:", "shop:viewed:"
    /// let store = RedisStore::with_prefix("redis://localhost", Some("shop:"), Duration::from_secs(2)).await?;
    /// # Ok(())
    /// # }
    /// ```
    pub async fn with_prefix(
        connection_string: &str,
        prefix: Option<&str>,
        timeout: Duration,
    ) -> Result<Self, StoreError> {
        let client = Client::open(connection_string)
            .map_err(|e| StoreError::Backend(e.to_string()))?;

        let connection = retry("redis_connect", &RetryConfig::startup(), || async {
            ConnectionManager::new(client.clone()).await
        })
        .await
        .map_err(|e: redis::RedisError| StoreError::Backend(e.to_string()))?;

        Ok(Self {
            connection,
            prefix: prefix.unwrap_or("").to_string(),
            timeout,
        })
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    #[inline]
    fn key(&self, key: &str) -> String {
        if self.prefix.is_empty() {
            key.to_string()
        } else {
            format!("{}{}", self.prefix, key)
        }
    }

    fn keys(&self, keys: &[String]) -> Vec<String> {
        keys.iter().map(|k| self.key(k)).collect()
    }

    /// `call` is re-invoked per attempt with a fresh connection handle.
    async fn run<T, F, Fut>(
        &self,
        operation: &'static str,
        replay: Replay,
        call: F,
    ) -> Result<T, StoreError>
    where
        F: Fn(ConnectionManager) -> Fut,
        Fut: Future<Output = RedisResult<T>>,
    {
        let started = std::time::Instant::now();
        let result = bounded_call(operation, replay, self.timeout, || {
            let attempt = call(self.connection.clone());
            async move { attempt.await.map_err(|e| StoreError::Backend(e.to_string())) }
        })
        .await;

        crate::metrics::record_store_call(operation, result.is_ok(), started.elapsed());
        result
    }
}

fn rank_command(order: RangeOrder) -> &'static str {
    match order {
        RangeOrder::Ascending => "ZRANGE",
        RangeOrder::Descending => "ZREVRANGE",
    }
}

#[async_trait]
impl RankedStore for RedisStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let key = self.key(key);
        self.run("get", Replay::Safe, |mut conn| {
            let key = key.clone();
            async move { conn.get(&key).await }
        })
        .await
    }

    async fn set(&self, key: &str, value: &str, ttl_secs: Option<u64>) -> Result<(), StoreError> {
        let key = self.key(key);
        self.run("set", Replay::Safe, |mut conn| {
            let key = key.clone();
            let value = value.to_string();
            async move {
                let mut command = cmd("SET");
                command.arg(&key).arg(&value);
                if let Some(ttl) = ttl_secs {
                    command.arg("EX").arg(ttl);
                }
                command.query_async::<()>(&mut conn).await
            }
        })
        .await
    }

    async fn incr(&self, key: &str, delta: i64) -> Result<i64, StoreError> {
        let key = self.key(key);
        self.run("incr", Replay::Unsafe, |mut conn| {
            let key = key.clone();
            async move { conn.incr(&key, delta).await }
        })
        .await
    }

    async fn hget(&self, key: &str, field: &str) -> Result<Option<String>, StoreError> {
        let key = self.key(key);
        self.run("hget", Replay::Safe, |mut conn| {
            let key = key.clone();
            let field = field.to_string();
            async move { conn.hget(&key, &field).await }
        })
        .await
    }

    async fn hset(&self, key: &str, field: &str, value: &str) -> Result<(), StoreError> {
        let key = self.key(key);
        self.run("hset", Replay::Safe, |mut conn| {
            let key = key.clone();
            let field = field.to_string();
            let value = value.to_string();
            async move {
                let _: u64 = conn.hset(&key, &field, &value).await?;
                Ok(())
            }
        })
        .await
    }

    async fn hset_many(&self, key: &str, fields: &[(String, String)]) -> Result<(), StoreError> {
        if fields.is_empty() {
            return Ok(());
        }
        let key = self.key(key);
        self.run("hset_many", Replay::Safe, |mut conn| {
            let key = key.clone();
            let fields = fields.to_vec();
            async move { conn.hset_multiple::<_, _, _, ()>(&key, fields.as_slice()).await }
        })
        .await
    }

    async fn hincr(&self, key: &str, field: &str, delta: i64) -> Result<i64, StoreError> {
        let key = self.key(key);
        self.run("hincr", Replay::Unsafe, |mut conn| {
            let key = key.clone();
            let field = field.to_string();
            async move { conn.hincr(&key, &field, delta).await }
        })
        .await
    }

    async fn hdel(&self, key: &str, fields: &[String]) -> Result<u64, StoreError> {
        if fields.is_empty() {
            return Ok(0);
        }
        let key = self.key(key);
        self.run("hdel", Replay::Safe, |mut conn| {
            let key = key.clone();
            let fields = fields.to_vec();
            async move { conn.hdel(&key, &fields).await }
        })
        .await
    }

    async fn hgetall(&self, key: &str) -> Result<HashMap<String, String>, StoreError> {
        let key = self.key(key);
        self.run("hgetall", Replay::Safe, |mut conn| {
            let key = key.clone();
            async move { conn.hgetall(&key).await }
        })
        .await
    }

    async fn sadd(&self, key: &str, member: &str) -> Result<bool, StoreError> {
        let key = self.key(key);
        self.run("sadd", Replay::Safe, |mut conn| {
            let key = key.clone();
            let member = member.to_string();
            async move {
                let added: u64 = conn.sadd(&key, &member).await?;
                Ok(added > 0)
            }
        })
        .await
    }

    async fn srem(&self, key: &str, member: &str) -> Result<bool, StoreError> {
        let key = self.key(key);
        self.run("srem", Replay::Safe, |mut conn| {
            let key = key.clone();
            let member = member.to_string();
            async move {
                let removed: u64 = conn.srem(&key, &member).await?;
                Ok(removed > 0)
            }
        })
        .await
    }

    async fn sismember(&self, key: &str, member: &str) -> Result<bool, StoreError> {
        let key = self.key(key);
        self.run("sismember", Replay::Safe, |mut conn| {
            let key = key.clone();
            let member = member.to_string();
            async move { conn.sismember(&key, &member).await }
        })
        .await
    }

    async fn scard(&self, key: &str) -> Result<u64, StoreError> {
        let key = self.key(key);
        self.run("scard", Replay::Safe, |mut conn| {
            let key = key.clone();
            async move { conn.scard(&key).await }
        })
        .await
    }

    async fn zadd(&self, key: &str, member: &str, score: f64) -> Result<(), StoreError> {
        let key = self.key(key);
        self.run("zadd", Replay::Safe, |mut conn| {
            let key = key.clone();
            let member = member.to_string();
            async move {
                let _: u64 = conn.zadd(&key, &member, score).await?;
                Ok(())
            }
        })
        .await
    }

    async fn zincr(&self, key: &str, member: &str, delta: f64) -> Result<f64, StoreError> {
        let key = self.key(key);
        self.run("zincr", Replay::Unsafe, |mut conn| {
            let key = key.clone();
            let member = member.to_string();
            async move { conn.zincr(&key, &member, delta).await }
        })
        .await
    }

    async fn zrem(&self, key: &str, members: &[String]) -> Result<u64, StoreError> {
        if members.is_empty() {
            return Ok(0);
        }
        let key = self.key(key);
        self.run("zrem", Replay::Safe, |mut conn| {
            let key = key.clone();
            let members = members.to_vec();
            async move { conn.zrem(&key, &members).await }
        })
        .await
    }

    async fn zremrangebyrank(&self, key: &str, start: isize, stop: isize) -> Result<u64, StoreError> {
        let key = self.key(key);
        self.run("zremrangebyrank", Replay::Unsafe, |mut conn| {
            let key = key.clone();
            async move { conn.zremrangebyrank(&key, start, stop).await }
        })
        .await
    }

    async fn zrange(
        &self,
        key: &str,
        start: isize,
        stop: isize,
        order: RangeOrder,
    ) -> Result<Vec<String>, StoreError> {
        let key = self.key(key);
        self.run("zrange", Replay::Safe, |mut conn| {
            let key = key.clone();
            async move {
                cmd(rank_command(order))
                    .arg(&key)
                    .arg(start)
                    .arg(stop)
                    .query_async(&mut conn)
                    .await
            }
        })
        .await
    }

    async fn zrange_withscores(
        &self,
        key: &str,
        start: isize,
        stop: isize,
        order: RangeOrder,
    ) -> Result<Vec<(String, f64)>, StoreError> {
        let key = self.key(key);
        self.run("zrange_withscores", Replay::Safe, |mut conn| {
            let key = key.clone();
            async move {
                cmd(rank_command(order))
                    .arg(&key)
                    .arg(start)
                    .arg(stop)
                    .arg("WITHSCORES")
                    .query_async(&mut conn)
                    .await
            }
        })
        .await
    }

    async fn zrank(&self, key: &str, member: &str) -> Result<Option<u64>, StoreError> {
        let key = self.key(key);
        self.run("zrank", Replay::Safe, |mut conn| {
            let key = key.clone();
            let member = member.to_string();
            async move { conn.zrank(&key, &member).await }
        })
        .await
    }

    async fn zscore(&self, key: &str, member: &str) -> Result<Option<f64>, StoreError> {
        let key = self.key(key);
        self.run("zscore", Replay::Safe, |mut conn| {
            let key = key.clone();
            let member = member.to_string();
            async move { conn.zscore(&key, &member).await }
        })
        .await
    }

    async fn zcard(&self, key: &str) -> Result<u64, StoreError> {
        let key = self.key(key);
        self.run("zcard", Replay::Safe, |mut conn| {
            let key = key.clone();
            async move { conn.zcard(&key).await }
        })
        .await
    }

    async fn zinterstore(
        &self,
        dest: &str,
        keys: &[String],
        aggregate: Aggregate,
    ) -> Result<u64, StoreError> {
        let dest = self.key(dest);
        let sources = self.keys(keys);
        self.run("zinterstore", Replay::Safe, |mut conn| {
            let dest = dest.clone();
            let sources = sources.clone();
            async move {
                cmd("ZINTERSTORE")
                    .arg(&dest)
                    .arg(sources.len())
                    .arg(&sources)
                    .arg("AGGREGATE")
                    .arg(aggregate.as_arg())
                    .query_async(&mut conn)
                    .await
            }
        })
        .await
    }

    async fn ztrim_and_scale(&self, key: &str, keep: usize, factor: f64) -> Result<u64, StoreError> {
        let key = self.key(key);
        self.run("ztrim_and_scale", Replay::Unsafe, |mut conn| {
            let key = key.clone();
            async move {
                // ZUNIONSTORE of a key onto itself rewrites every score in place.
                let (removed, _remaining): (u64, u64) = pipe()
                    .atomic()
                    .cmd("ZREMRANGEBYRANK")
                    .arg(&key)
                    .arg(keep)
                    .arg(-1)
                    .cmd("ZUNIONSTORE")
                    .arg(&key)
                    .arg(1)
                    .arg(&key)
                    .arg("WEIGHTS")
                    .arg(factor)
                    .query_async(&mut conn)
                    .await?;
                Ok(removed)
            }
        })
        .await
    }

    async fn expire(&self, key: &str, ttl_secs: u64) -> Result<bool, StoreError> {
        let key = self.key(key);
        let ttl = i64::try_from(ttl_secs).unwrap_or(i64::MAX);
        self.run("expire", Replay::Safe, |mut conn| {
            let key = key.clone();
            async move { conn.expire(&key, ttl).await }
        })
        .await
    }

    async fn exists(&self, key: &str) -> Result<bool, StoreError> {
        let key = self.key(key);
        self.run("exists", Replay::Safe, |mut conn| {
            let key = key.clone();
            async move { conn.exists(&key).await }
        })
        .await
    }

    async fn del(&self, keys: &[String]) -> Result<u64, StoreError> {
        if keys.is_empty() {
            return Ok(0);
        }
        let keys = self.keys(keys);
        self.run("del", Replay::Safe, |mut conn| {
            let keys = keys.clone();
            async move { conn.del(&keys).await }
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::sync::Arc;

    type Reply = std::pin::Pin<Box<dyn Future<Output = Result<(), StoreError>> + Send>>;

    /// A call that applies its effect, then replies after `reply_after`.
    fn late_reply(applied: &Arc<AtomicU64>, delta: u64, reply_after: Duration) -> impl FnMut() -> Reply {
        let applied = applied.clone();
        move || -> Reply {
            let applied = applied.clone();
            Box::pin(async move {
                applied.fetch_add(delta, Ordering::SeqCst);
                tokio::time::sleep(reply_after).await;
                Ok(())
            })
        }
    }

    #[test]
    fn test_unsafe_commands_get_one_attempt() {
        assert_eq!(Replay::Unsafe.policy().max_retries, Some(1));
        assert_eq!(Replay::Safe.policy().max_retries, Some(3));
    }

    #[tokio::test]
    async fn test_timed_out_increment_is_applied_once() {
        let applied = Arc::new(AtomicU64::new(0));

        let result = bounded_call(
            "zincr",
            Replay::Unsafe,
            Duration::from_millis(10),
            late_reply(&applied, 432, Duration::from_millis(50)),
        )
        .await;

        assert!(result.unwrap_err().is_timeout());
        assert_eq!(applied.load(Ordering::SeqCst), 432);
    }

    #[tokio::test]
    async fn test_timed_out_safe_command_is_retried() {
        let applied = Arc::new(AtomicU64::new(0));

        let result = bounded_call(
            "zadd",
            Replay::Safe,
            Duration::from_millis(10),
            late_reply(&applied, 1, Duration::from_millis(50)),
        )
        .await;

        assert!(result.unwrap_err().is_timeout());
        assert_eq!(applied.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_prompt_reply_passes_through() {
        let applied = Arc::new(AtomicU64::new(0));

        bounded_call(
            "incr",
            Replay::Unsafe,
            Duration::from_secs(1),
            late_reply(&applied, 1, Duration::ZERO),
        )
        .await
        .unwrap();

        assert_eq!(applied.load(Ordering::SeqCst), 1);
    }
}
