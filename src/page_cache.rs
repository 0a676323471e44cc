// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Popularity-gated page cache.
//!
//! Only pages about an item whose popularity rank is below
//! `cache_rank_threshold` are cached. Everything else, and everything the
//! store cannot answer for, is rendered fresh.
//!
//! ```text
//!  serve(req) ──can_cache?──no──────────────────────────▶ render
//!                  │yes
//!                  ▼
//!            GET cache:{sha256(fingerprint)} ──hit──▶ cached content
//!                  │miss
//!                  ▼
//!               render ──SET EX ttl──▶ content
//! ```
//!
//! Two concurrent misses may both render; the last write wins.

use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::config::Config;
use crate::popularity::PopularityTracker;
use crate::store::{keys, RankedStore};

/// What the cache gate needs to know about an incoming request.
pub trait PageRequest {
    /// Item the page is about, if any.
    fn item_id(&self) -> Option<&str>;

    /// Dynamic pages are never cached.
    fn is_dynamic(&self) -> bool;

    /// Canonical form; equal requests must produce equal fingerprints.
    fn fingerprint(&self) -> String;
}

/// Plain HTTP request description.
///
/// The item comes from the `item` query parameter. A request is dynamic
/// when its method is not `GET`/`HEAD` or it carries the `_` cache-busting
/// parameter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpRequest {
    pub method: String,
    pub path: String,
    pub query: BTreeMap<String, String>,
}

impl HttpRequest {
    pub fn get(path: impl Into<String>) -> Self {
        Self {
            method: "GET".to_string(),
            path: path.into(),
            query: BTreeMap::new(),
        }
    }

    #[must_use]
    pub fn with_method(mut self, method: impl Into<String>) -> Self {
        self.method = method.into();
        self
    }

    #[must_use]
    pub fn with_param(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.insert(name.into(), value.into());
        self
    }

    /// Parse `path?a=1&b=2`. Parameters without `=` get an empty value.
    pub fn parse(method: &str, target: &str) -> Self {
        let (path, query) = target.split_once('?').unwrap_or((target, ""));
        let query = query
            .split('&')
            .filter(|pair| !pair.is_empty())
            .map(|pair| {
                let (k, v) = pair.split_once('=').unwrap_or((pair, ""));
                (k.to_string(), v.to_string())
            })
            .collect();
        Self {
            method: method.to_ascii_uppercase(),
            path: path.to_string(),
            query,
        }
    }
}

impl PageRequest for HttpRequest {
    fn item_id(&self) -> Option<&str> {
        self.query.get("item").map(String::as_str).filter(|id| !id.is_empty())
    }

    fn is_dynamic(&self) -> bool {
        !matches!(self.method.as_str(), "GET" | "HEAD") || self.query.contains_key("_")
    }

    fn fingerprint(&self) -> String {
        // BTreeMap iteration makes parameter order irrelevant
        let query: Vec<String> = self.query.iter().map(|(k, v)| format!("{k}={v}")).collect();
        format!("{} {}?{}", self.method, self.path, query.join("&"))
    }
}

/// Deterministic `cache:{hex}` key for a request.
pub fn cache_key<R: PageRequest + ?Sized>(request: &R) -> String {
    let digest = Sha256::digest(request.fingerprint().as_bytes());
    keys::page_cache(&hex::encode(digest))
}

#[derive(Clone)]
pub struct CacheGate {
    store: Arc<dyn RankedStore>,
    popularity: PopularityTracker,
    rank_threshold: u64,
    ttl_secs: u64,
}

impl CacheGate {
    pub fn new(store: Arc<dyn RankedStore>, popularity: PopularityTracker, config: &Config) -> Self {
        Self {
            store,
            popularity,
            rank_threshold: config.cache_rank_threshold,
            ttl_secs: config.page_cache_ttl_secs,
        }
    }

    /// True iff the request names an item, is not dynamic, and that item's
    /// popularity rank is below the threshold. A store failure answers false.
    pub async fn can_cache<R: PageRequest + ?Sized>(&self, request: &R) -> bool {
        let Some(item) = request.item_id() else {
            return false;
        };
        if request.is_dynamic() {
            return false;
        }
        match self.popularity.rank(item).await {
            Ok(Some(rank)) => rank < self.rank_threshold,
            Ok(None) => false,
            Err(e) => {
                warn!(item, error = %e, "Popularity lookup failed, not caching");
                false
            }
        }
    }

    /// Return cached content for the request, or render it.
    ///
    /// `render` receives the request and is only awaited on a bypass or a
    /// miss. Render errors are
    /// returned as-is and nothing is stored. Store errors never surface:
    /// the page is rendered fresh instead.
    pub async fn serve<R, F, Fut, E>(&self, request: &R, render: F) -> Result<String, E>
    where
        R: PageRequest + ?Sized,
        F: FnOnce(&R) -> Fut,
        Fut: Future<Output = Result<String, E>>,
    {
        if !self.can_cache(request).await {
            crate::metrics::record_page_cache("bypass");
            return render(request).await;
        }

        let key = cache_key(request);
        match self.store.get(&key).await {
            Ok(Some(content)) => {
                crate::metrics::record_page_cache("hit");
                return Ok(content);
            }
            Ok(None) => crate::metrics::record_page_cache("miss"),
            Err(e) => {
                warn!(key = %key, error = %e, "Page cache read failed, rendering fresh");
                crate::metrics::record_page_cache("degraded");
                return render(request).await;
            }
        }

        let content = render(request).await?;
        if let Err(e) = self.store.set(&key, &content, Some(self.ttl_secs)).await {
            warn!(key = %key, error = %e, "Page cache write failed");
        } else {
            debug!(key = %key, ttl = self.ttl_secs, "Cached rendered page");
        }
        Ok(content)
    }
}
