// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! In-process [`RankedStore`].
//!
//! Follows Redis semantics closely enough for the loops to behave the same:
//! lazy key expiry against the injected [`Clock`], inclusive rank ranges with
//! negative indices, score ties broken by member, empty collections removed.
//! A single lock covers the keyspace, so every call (including multi-key
//! deletes and `ztrim_and_scale`) is atomic.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::cmp::Ordering as CmpOrdering;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use super::traits::{Aggregate, RangeOrder, RankedStore, StoreError};
use crate::clock::{Clock, SystemClock};

#[derive(Debug, Clone)]
enum Value {
    Str(String),
    Hash(HashMap<String, String>),
    Set(HashSet<String>),
    ZSet(HashMap<String, f64>),
}

impl Value {
    fn is_empty(&self) -> bool {
        match self {
            Self::Str(_) => false,
            Self::Hash(h) => h.is_empty(),
            Self::Set(s) => s.is_empty(),
            Self::ZSet(z) => z.is_empty(),
        }
    }
}

#[derive(Debug, Clone)]
struct Entry {
    value: Value,
    expires_at: Option<f64>,
}

pub struct MemoryStore {
    data: Mutex<HashMap<String, Entry>>,
    clock: Arc<dyn Clock>,
    unavailable: AtomicBool,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    /// Expiry is evaluated against `clock`, so a manual clock can expire keys.
    #[must_use]
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            data: Mutex::new(HashMap::new()),
            clock,
            unavailable: AtomicBool::new(false),
        }
    }

    /// Number of live keys.
    #[must_use]
    pub fn len(&self) -> usize {
        let now = self.clock.now();
        self.data
            .lock()
            .values()
            .filter(|e| e.expires_at.map_or(true, |at| at > now))
            .count()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.data.lock().clear();
    }

    /// While set, every call fails with a backend error, as if the
    /// connection dropped.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Run `f` over the keyspace with expired keys already purged.
    fn with_data<T>(
        &self,
        f: impl FnOnce(&mut HashMap<String, Entry>) -> Result<T, StoreError>,
    ) -> Result<T, StoreError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StoreError::Backend("store unavailable".to_string()));
        }
        let now = self.clock.now();
        let mut data = self.data.lock();
        data.retain(|_, e| e.expires_at.map_or(true, |at| at > now));
        let result = f(&mut data);
        data.retain(|_, e| !e.value.is_empty());
        result
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

fn new_entry(value: Value) -> Entry {
    Entry { value, expires_at: None }
}

fn hash_mut<'a>(
    data: &'a mut HashMap<String, Entry>,
    key: &str,
) -> Result<&'a mut HashMap<String, String>, StoreError> {
    let entry = data
        .entry(key.to_string())
        .or_insert_with(|| new_entry(Value::Hash(HashMap::new())));
    match &mut entry.value {
        Value::Hash(h) => Ok(h),
        _ => Err(StoreError::WrongType(key.to_string())),
    }
}

fn set_mut<'a>(
    data: &'a mut HashMap<String, Entry>,
    key: &str,
) -> Result<&'a mut HashSet<String>, StoreError> {
    let entry = data
        .entry(key.to_string())
        .or_insert_with(|| new_entry(Value::Set(HashSet::new())));
    match &mut entry.value {
        Value::Set(s) => Ok(s),
        _ => Err(StoreError::WrongType(key.to_string())),
    }
}

fn zset_mut<'a>(
    data: &'a mut HashMap<String, Entry>,
    key: &str,
) -> Result<&'a mut HashMap<String, f64>, StoreError> {
    let entry = data
        .entry(key.to_string())
        .or_insert_with(|| new_entry(Value::ZSet(HashMap::new())));
    match &mut entry.value {
        Value::ZSet(z) => Ok(z),
        _ => Err(StoreError::WrongType(key.to_string())),
    }
}

fn zset_ref<'a>(
    data: &'a HashMap<String, Entry>,
    key: &str,
) -> Result<Option<&'a HashMap<String, f64>>, StoreError> {
    match data.get(key).map(|e| &e.value) {
        None => Ok(None),
        Some(Value::ZSet(z)) => Ok(Some(z)),
        Some(_) => Err(StoreError::WrongType(key.to_string())),
    }
}

/// Members in ascending (score, member) order.
fn sorted(zset: &HashMap<String, f64>) -> Vec<(String, f64)> {
    let mut members: Vec<(String, f64)> = zset.iter().map(|(m, s)| (m.clone(), *s)).collect();
    members.sort_by(|a, b| match a.1.total_cmp(&b.1) {
        CmpOrdering::Equal => a.0.cmp(&b.0),
        other => other,
    });
    members
}

/// Resolve an inclusive Redis-style rank range against `len`.
fn rank_bounds(len: usize, start: isize, stop: isize) -> Option<(usize, usize)> {
    let len = len as isize;
    let start = if start < 0 { (len + start).max(0) } else { start };
    let stop = if stop < 0 { len + stop } else { stop.min(len - 1) };
    if len == 0 || start > stop || start >= len || stop < 0 {
        return None;
    }
    Some((start as usize, stop as usize))
}

fn ranged(
    zset: Option<&HashMap<String, f64>>,
    start: isize,
    stop: isize,
    order: RangeOrder,
) -> Vec<(String, f64)> {
    let Some(zset) = zset else {
        return Vec::new();
    };
    let mut members = sorted(zset);
    if order == RangeOrder::Descending {
        members.reverse();
    }
    match rank_bounds(members.len(), start, stop) {
        Some((from, to)) => members[from..=to].to_vec(),
        None => Vec::new(),
    }
}

#[async_trait]
impl RankedStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        self.with_data(|data| match data.get(key).map(|e| &e.value) {
            None => Ok(None),
            Some(Value::Str(s)) => Ok(Some(s.clone())),
            Some(_) => Err(StoreError::WrongType(key.to_string())),
        })
    }

    async fn set(&self, key: &str, value: &str, ttl_secs: Option<u64>) -> Result<(), StoreError> {
        let now = self.clock.now();
        self.with_data(|data| {
            data.insert(
                key.to_string(),
                Entry {
                    value: Value::Str(value.to_string()),
                    expires_at: ttl_secs.map(|ttl| now + ttl as f64),
                },
            );
            Ok(())
        })
    }

    async fn incr(&self, key: &str, delta: i64) -> Result<i64, StoreError> {
        self.with_data(|data| {
            let entry = data
                .entry(key.to_string())
                .or_insert_with(|| new_entry(Value::Str("0".to_string())));
            let Value::Str(current) = &mut entry.value else {
                return Err(StoreError::WrongType(key.to_string()));
            };
            let next = current
                .parse::<i64>()
                .map_err(|_| StoreError::WrongType(key.to_string()))?
                + delta;
            *current = next.to_string();
            Ok(next)
        })
    }

    async fn hget(&self, key: &str, field: &str) -> Result<Option<String>, StoreError> {
        self.with_data(|data| match data.get(key).map(|e| &e.value) {
            None => Ok(None),
            Some(Value::Hash(h)) => Ok(h.get(field).cloned()),
            Some(_) => Err(StoreError::WrongType(key.to_string())),
        })
    }

    async fn hset(&self, key: &str, field: &str, value: &str) -> Result<(), StoreError> {
        self.with_data(|data| {
            hash_mut(data, key)?.insert(field.to_string(), value.to_string());
            Ok(())
        })
    }

    async fn hset_many(&self, key: &str, fields: &[(String, String)]) -> Result<(), StoreError> {
        self.with_data(|data| {
            let hash = hash_mut(data, key)?;
            for (field, value) in fields {
                hash.insert(field.clone(), value.clone());
            }
            Ok(())
        })
    }

    async fn hincr(&self, key: &str, field: &str, delta: i64) -> Result<i64, StoreError> {
        self.with_data(|data| {
            let hash = hash_mut(data, key)?;
            let current = match hash.get(field) {
                Some(v) => v
                    .parse::<i64>()
                    .map_err(|_| StoreError::WrongType(format!("{key}.{field}")))?,
                None => 0,
            };
            let next = current + delta;
            hash.insert(field.to_string(), next.to_string());
            Ok(next)
        })
    }

    async fn hdel(&self, key: &str, fields: &[String]) -> Result<u64, StoreError> {
        self.with_data(|data| match data.get_mut(key).map(|e| &mut e.value) {
            None => Ok(0),
            Some(Value::Hash(h)) => Ok(fields.iter().filter(|f| h.remove(*f).is_some()).count() as u64),
            Some(_) => Err(StoreError::WrongType(key.to_string())),
        })
    }

    async fn hgetall(&self, key: &str) -> Result<HashMap<String, String>, StoreError> {
        self.with_data(|data| match data.get(key).map(|e| &e.value) {
            None => Ok(HashMap::new()),
            Some(Value::Hash(h)) => Ok(h.clone()),
            Some(_) => Err(StoreError::WrongType(key.to_string())),
        })
    }

    async fn sadd(&self, key: &str, member: &str) -> Result<bool, StoreError> {
        self.with_data(|data| Ok(set_mut(data, key)?.insert(member.to_string())))
    }

    async fn srem(&self, key: &str, member: &str) -> Result<bool, StoreError> {
        self.with_data(|data| match data.get_mut(key).map(|e| &mut e.value) {
            None => Ok(false),
            Some(Value::Set(s)) => Ok(s.remove(member)),
            Some(_) => Err(StoreError::WrongType(key.to_string())),
        })
    }

    async fn sismember(&self, key: &str, member: &str) -> Result<bool, StoreError> {
        self.with_data(|data| match data.get(key).map(|e| &e.value) {
            None => Ok(false),
            Some(Value::Set(s)) => Ok(s.contains(member)),
            Some(_) => Err(StoreError::WrongType(key.to_string())),
        })
    }

    async fn scard(&self, key: &str) -> Result<u64, StoreError> {
        self.with_data(|data| match data.get(key).map(|e| &e.value) {
            None => Ok(0),
            Some(Value::Set(s)) => Ok(s.len() as u64),
            Some(_) => Err(StoreError::WrongType(key.to_string())),
        })
    }

    async fn zadd(&self, key: &str, member: &str, score: f64) -> Result<(), StoreError> {
        self.with_data(|data| {
            zset_mut(data, key)?.insert(member.to_string(), score);
            Ok(())
        })
    }

    async fn zincr(&self, key: &str, member: &str, delta: f64) -> Result<f64, StoreError> {
        self.with_data(|data| {
            let score = zset_mut(data, key)?.entry(member.to_string()).or_insert(0.0);
            *score += delta;
            Ok(*score)
        })
    }

    async fn zrem(&self, key: &str, members: &[String]) -> Result<u64, StoreError> {
        self.with_data(|data| match data.get_mut(key).map(|e| &mut e.value) {
            None => Ok(0),
            Some(Value::ZSet(z)) => Ok(members.iter().filter(|m| z.remove(*m).is_some()).count() as u64),
            Some(_) => Err(StoreError::WrongType(key.to_string())),
        })
    }

    async fn zremrangebyrank(&self, key: &str, start: isize, stop: isize) -> Result<u64, StoreError> {
        self.with_data(|data| {
            let Some(zset) = data.get_mut(key).map(|e| &mut e.value) else {
                return Ok(0);
            };
            let Value::ZSet(zset) = zset else {
                return Err(StoreError::WrongType(key.to_string()));
            };
            let victims = ranged(Some(&*zset), start, stop, RangeOrder::Ascending);
            for (member, _) in &victims {
                zset.remove(member);
            }
            Ok(victims.len() as u64)
        })
    }

    async fn zrange(
        &self,
        key: &str,
        start: isize,
        stop: isize,
        order: RangeOrder,
    ) -> Result<Vec<String>, StoreError> {
        self.with_data(|data| {
            Ok(ranged(zset_ref(data, key)?, start, stop, order)
                .into_iter()
                .map(|(member, _)| member)
                .collect())
        })
    }

    async fn zrange_withscores(
        &self,
        key: &str,
        start: isize,
        stop: isize,
        order: RangeOrder,
    ) -> Result<Vec<(String, f64)>, StoreError> {
        self.with_data(|data| Ok(ranged(zset_ref(data, key)?, start, stop, order)))
    }

    async fn zrank(&self, key: &str, member: &str) -> Result<Option<u64>, StoreError> {
        self.with_data(|data| {
            let Some(zset) = zset_ref(data, key)? else {
                return Ok(None);
            };
            if !zset.contains_key(member) {
                return Ok(None);
            }
            Ok(sorted(zset)
                .iter()
                .position(|(m, _)| m == member)
                .map(|rank| rank as u64))
        })
    }

    async fn zscore(&self, key: &str, member: &str) -> Result<Option<f64>, StoreError> {
        self.with_data(|data| Ok(zset_ref(data, key)?.and_then(|z| z.get(member).copied())))
    }

    async fn zcard(&self, key: &str) -> Result<u64, StoreError> {
        self.with_data(|data| Ok(zset_ref(data, key)?.map_or(0, |z| z.len() as u64)))
    }

    async fn zinterstore(
        &self,
        dest: &str,
        keys: &[String],
        aggregate: Aggregate,
    ) -> Result<u64, StoreError> {
        self.with_data(|data| {
            let mut sources: Vec<HashMap<String, f64>> = Vec::with_capacity(keys.len());
            for key in keys {
                let scored = match data.get(key).map(|e| &e.value) {
                    None => HashMap::new(),
                    Some(Value::ZSet(z)) => z.clone(),
                    Some(Value::Set(s)) => s.iter().map(|m| (m.clone(), 1.0)).collect(),
                    Some(_) => return Err(StoreError::WrongType(key.clone())),
                };
                sources.push(scored);
            }

            let mut result: HashMap<String, f64> = HashMap::new();
            if let Some((first, rest)) = sources.split_first() {
                'members: for (member, score) in first {
                    let mut combined = *score;
                    for other in rest {
                        match other.get(member) {
                            Some(s) => combined = aggregate.combine(combined, *s),
                            None => continue 'members,
                        }
                    }
                    result.insert(member.clone(), combined);
                }
            }

            let count = result.len() as u64;
            data.insert(dest.to_string(), new_entry(Value::ZSet(result)));
            Ok(count)
        })
    }

    async fn ztrim_and_scale(&self, key: &str, keep: usize, factor: f64) -> Result<u64, StoreError> {
        self.with_data(|data| {
            let Some(value) = data.get_mut(key).map(|e| &mut e.value) else {
                return Ok(0);
            };
            let Value::ZSet(zset) = value else {
                return Err(StoreError::WrongType(key.to_string()));
            };
            let ordered = sorted(zset);
            let mut removed = 0u64;
            for (member, _) in ordered.iter().skip(keep) {
                zset.remove(member);
                removed += 1;
            }
            for score in zset.values_mut() {
                *score *= factor;
            }
            Ok(removed)
        })
    }

    async fn expire(&self, key: &str, ttl_secs: u64) -> Result<bool, StoreError> {
        let now = self.clock.now();
        self.with_data(|data| match data.get_mut(key) {
            Some(entry) => {
                entry.expires_at = Some(now + ttl_secs as f64);
                Ok(true)
            }
            None => Ok(false),
        })
    }

    async fn exists(&self, key: &str) -> Result<bool, StoreError> {
        self.with_data(|data| Ok(data.contains_key(key)))
    }

    async fn del(&self, keys: &[String]) -> Result<u64, StoreError> {
        self.with_data(|data| Ok(keys.iter().filter(|k| data.remove(k.as_str()).is_some()).count() as u64))
    }
}
