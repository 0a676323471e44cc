// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Metrics instrumentation.
//!
//! Uses the `metrics` crate facade; the embedding process picks the exporter.
//!
//! # Metric Naming Convention
//! - `ranked_cache_` prefix for all metrics
//! - `_total` suffix for counters
//! - `_seconds` suffix for duration histograms
//!
//! # Labels
//! - `loop`: trimmer, popularity, refresher
//! - `operation`: store command name (zadd, zrange, ...)
//! - `status`: success, error

use metrics::{counter, gauge, histogram};
use std::time::Duration;

/// Record one store round trip (after retries)
pub fn record_store_call(operation: &str, ok: bool, duration: Duration) {
    let status = if ok { "success" } else { "error" };
    counter!(
        "ranked_cache_store_calls_total",
        "operation" => operation.to_string(),
        "status" => status
    )
    .increment(1);
    histogram!(
        "ranked_cache_store_call_seconds",
        "operation" => operation.to_string()
    )
    .record(duration.as_secs_f64());
}

/// Record a store call that hit its timeout
pub fn record_timeout(operation: &str) {
    counter!(
        "ranked_cache_store_timeouts_total",
        "operation" => operation.to_string()
    )
    .increment(1);
}

/// Record one loop iteration that failed and will retry on the next tick
pub fn record_loop_error(loop_name: &'static str) {
    counter!("ranked_cache_loop_errors_total", "loop" => loop_name).increment(1);
}

/// Record loop iteration latency
pub fn record_loop_iteration(loop_name: &'static str, duration: Duration) {
    histogram!("ranked_cache_loop_iteration_seconds", "loop" => loop_name)
        .record(duration.as_secs_f64());
}

// ═══════════════════════════════════════════════════════════════════════════
// SESSIONS
// ═══════════════════════════════════════════════════════════════════════════

pub fn record_sessions_trimmed(count: usize) {
    counter!("ranked_cache_sessions_trimmed_total").increment(count as u64);
}

pub fn set_recent_sessions(count: u64) {
    gauge!("ranked_cache_recent_sessions").set(count as f64);
}

// ═══════════════════════════════════════════════════════════════════════════
// POPULARITY
// ═══════════════════════════════════════════════════════════════════════════

pub fn record_popularity_decay(removed: u64) {
    counter!("ranked_cache_popularity_decays_total").increment(1);
    counter!("ranked_cache_popularity_dropped_total").increment(removed);
}

// ═══════════════════════════════════════════════════════════════════════════
// PAGE CACHE
// ═══════════════════════════════════════════════════════════════════════════

/// `outcome`: hit, miss, bypass, degraded
pub fn record_page_cache(outcome: &'static str) {
    counter!("ranked_cache_page_cache_total", "outcome" => outcome).increment(1);
}

// ═══════════════════════════════════════════════════════════════════════════
// ROW REFRESH
// ═══════════════════════════════════════════════════════════════════════════

/// `outcome`: refreshed, purged, skipped_in_flight, fetch_failed, store_failed, missing_row
pub fn record_row_refresh(outcome: &'static str) {
    counter!("ranked_cache_row_refresh_total", "outcome" => outcome).increment(1);
}

pub fn set_rows_in_flight(count: usize) {
    gauge!("ranked_cache_rows_in_flight").set(count as f64);
}

// ═══════════════════════════════════════════════════════════════════════════
// VOTING
// ═══════════════════════════════════════════════════════════════════════════

/// `outcome`: applied, too_old, already_voted, unknown_article
pub fn record_vote(outcome: &'static str) {
    counter!("ranked_cache_votes_total", "outcome" => outcome).increment(1);
}

pub fn record_article_posted() {
    counter!("ranked_cache_articles_posted_total").increment(1);
}
