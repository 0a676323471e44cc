// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Key layout for every structure kept in the store.
//!
//! Store-level namespacing (`RedisStore::with_prefix`) is applied on top of
//! these names, so they never carry a deployment prefix themselves.

/// token → user
pub const LOGIN: &str = "login:";
/// token → last activity
pub const RECENT: &str = "recent:";
/// item → popularity (negative increments, lower is hotter)
pub const VIEWED: &str = "viewed:";
/// row → next refresh time
pub const SCHEDULE: &str = "schedule:";
/// row → refresh delay in seconds
pub const DELAY: &str = "delay:";
/// `article:{id}` → score
pub const ARTICLE_SCORE: &str = "score:";
/// `article:{id}` → post time
pub const ARTICLE_TIME: &str = "time:";
/// Monotonic article id counter
pub const ARTICLE_COUNTER: &str = "article:";

pub fn viewed_history(token: &str) -> String {
    format!("{VIEWED}{token}")
}

pub fn cart(session: &str) -> String {
    format!("cart:{session}")
}

pub fn page_cache(hash: &str) -> String {
    format!("cache:{hash}")
}

pub fn inventory_row(row_id: &str) -> String {
    format!("inv:{row_id}")
}

pub fn article(article_id: &str) -> String {
    format!("{ARTICLE_COUNTER}{article_id}")
}

/// Strip the `article:` prefix from an index member.
pub fn article_id(article_key: &str) -> &str {
    article_key.strip_prefix(ARTICLE_COUNTER).unwrap_or(article_key)
}

pub fn voted(article_id: &str) -> String {
    format!("voted:{article_id}")
}

pub fn group(name: &str) -> String {
    format!("group:{name}")
}

/// Short-lived ordering of a group's articles, e.g. `score:rust`.
pub fn group_ordering(order_key: &str, name: &str) -> String {
    format!("{order_key}{name}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_article_keys_round_trip() {
        let key = article("42");
        assert_eq!(key, "article:42");
        assert_eq!(article_id(&key), "42");
        assert_eq!(article_id("42"), "42");
    }

    #[test]
    fn test_per_token_keys() {
        assert_eq!(viewed_history("t1"), "viewed:t1");
        assert_eq!(cart("t1"), "cart:t1");
        assert_eq!(group_ordering(ARTICLE_SCORE, "rust"), "score:rust");
    }
}
