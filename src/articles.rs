// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Article posting, voting and ranked listings.
//!
//! An article's score starts at its post time plus one vote's weight, so a
//! fresh article competes with older ones that collected a few votes. Each
//! user may vote once while the article is inside the vote window.
//!
//! # Keys
//!
//! | Key | Contents |
//! |---|---|
//! | `article:` | id counter |
//! | `article:{id}` | hash: title, link, poster, time, votes |
//! | `score:` / `time:` | `article:{id}` → score / post time |
//! | `voted:{id}` | users who voted, expires after the window |
//! | `group:{name}` | `article:{id}` members |
//! | `score:{name}` / `time:{name}` | short-lived group ordering |
//!
//! # Consistency
//!
//! `voted:{id}` membership is the only record of who voted. A vote adds the
//! user there first and only then bumps the score and counter, so a crash in
//! between can leave an article short of a vote but never counts one twice.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;

use crate::clock::Clock;
use crate::config::Config;
use crate::store::{keys, Aggregate, RangeOrder, RankedStore, StoreError};

#[derive(Debug, Error)]
pub enum ArticleError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("Page numbers start at 1, got {0}")]
    InvalidPage(usize),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VoteOutcome {
    Applied,
    /// Posted before the vote window
    TooOld,
    AlreadyVoted,
    /// No such article in the time index
    UnknownArticle,
}

impl VoteOutcome {
    fn as_label(self) -> &'static str {
        match self {
            Self::Applied => "applied",
            Self::TooOld => "too_old",
            Self::AlreadyVoted => "already_voted",
            Self::UnknownArticle => "unknown_article",
        }
    }
}

/// Index a listing is ordered by, highest first.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArticleOrder {
    #[default]
    Score,
    Time,
}

impl ArticleOrder {
    #[must_use]
    pub fn index_key(self) -> &'static str {
        match self {
            Self::Score => keys::ARTICLE_SCORE,
            Self::Time => keys::ARTICLE_TIME,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArticleSummary {
    pub id: String,
    pub title: String,
    pub link: String,
    pub poster: String,
    pub time: f64,
    pub votes: i64,
}

impl ArticleSummary {
    /// `None` if any field is missing or malformed.
    fn from_fields(id: &str, mut fields: HashMap<String, String>) -> Option<Self> {
        Some(Self {
            id: id.to_string(),
            title: fields.remove("title")?,
            link: fields.remove("link")?,
            poster: fields.remove("poster")?,
            time: fields.get("time")?.parse().ok()?,
            votes: fields.get("votes")?.parse().ok()?,
        })
    }
}

#[derive(Clone)]
pub struct ArticleBoard {
    store: Arc<dyn RankedStore>,
    clock: Arc<dyn Clock>,
    window_secs: u64,
    vote_weight: f64,
    per_page: usize,
    group_ttl_secs: u64,
}

impl ArticleBoard {
    pub fn new(store: Arc<dyn RankedStore>, clock: Arc<dyn Clock>, config: &Config) -> Self {
        Self {
            store,
            clock,
            window_secs: config.vote_window_secs,
            vote_weight: config.vote_weight,
            per_page: config.articles_per_page,
            group_ttl_secs: config.group_cache_ttl_secs,
        }
    }

    /// Post an article. The poster counts as its first vote.
    #[tracing::instrument(skip(self, link))]
    pub async fn post(&self, user: &str, title: &str, link: &str) -> Result<String, StoreError> {
        let id = self.store.incr(keys::ARTICLE_COUNTER, 1).await?.to_string();

        // membership must outlive the window, or a vote right at its edge
        // would land in a fresh set
        let voted = keys::voted(&id);
        self.store.sadd(&voted, user).await?;
        self.store.expire(&voted, self.window_secs + 1).await?;

        let now = self.clock.now();
        let article = keys::article(&id);
        let fields = [
            ("title", title.to_string()),
            ("link", link.to_string()),
            ("poster", user.to_string()),
            ("time", now.to_string()),
            ("votes", "1".to_string()),
        ]
        .map(|(k, v)| (k.to_string(), v));
        self.store.hset_many(&article, &fields).await?;
        self.store.zadd(keys::ARTICLE_SCORE, &article, now + self.vote_weight).await?;
        self.store.zadd(keys::ARTICLE_TIME, &article, now).await?;

        crate::metrics::record_article_posted();
        debug!(article_id = %id, "Article posted");
        Ok(id)
    }

    /// Record `user`'s vote. Accepts a bare id or an `article:{id}` key.
    pub async fn vote(&self, user: &str, article: &str) -> Result<VoteOutcome, StoreError> {
        let id = keys::article_id(article);
        let article = keys::article(id);

        let outcome = match self.store.zscore(keys::ARTICLE_TIME, &article).await? {
            None => VoteOutcome::UnknownArticle,
            Some(posted) if posted < self.clock.now() - self.window_secs as f64 => VoteOutcome::TooOld,
            Some(_) => {
                if self.store.sadd(&keys::voted(id), user).await? {
                    self.store.zincr(keys::ARTICLE_SCORE, &article, self.vote_weight).await?;
                    self.store.hincr(&article, "votes", 1).await?;
                    VoteOutcome::Applied
                } else {
                    VoteOutcome::AlreadyVoted
                }
            }
        };

        crate::metrics::record_vote(outcome.as_label());
        Ok(outcome)
    }

    /// One page (1-based) of articles, highest first. Articles deleted
    /// between the index read and the field read are left out.
    pub async fn list_articles(
        &self,
        page: usize,
        order: ArticleOrder,
    ) -> Result<Vec<ArticleSummary>, ArticleError> {
        self.page_of(order.index_key(), page).await
    }

    /// Like [`list_articles`](Self::list_articles) restricted to one group.
    /// The group's ordering is cached for `group_cache_ttl_secs`.
    pub async fn group_articles(
        &self,
        group: &str,
        page: usize,
        order: ArticleOrder,
    ) -> Result<Vec<ArticleSummary>, ArticleError> {
        self.page_bounds(page)?;
        let ordering = keys::group_ordering(order.index_key(), group);
        if !self.store.exists(&ordering).await? {
            let sources = [keys::group(group), order.index_key().to_string()];
            self.store.zinterstore(&ordering, &sources, Aggregate::Max).await?;
            self.store.expire(&ordering, self.group_ttl_secs).await?;
        }
        self.page_of(&ordering, page).await
    }

    pub async fn add_remove_groups(
        &self,
        article: &str,
        to_add: &[&str],
        to_remove: &[&str],
    ) -> Result<(), StoreError> {
        let article = keys::article(keys::article_id(article));
        for group in to_add {
            self.store.sadd(&keys::group(group), &article).await?;
        }
        for group in to_remove {
            self.store.srem(&keys::group(group), &article).await?;
        }
        Ok(())
    }

    /// Rank range of `page`, or `None` when it lies past any addressable rank.
    fn page_bounds(&self, page: usize) -> Result<Option<(isize, isize)>, ArticleError> {
        if page == 0 {
            return Err(ArticleError::InvalidPage(page));
        }
        let bounds = (page - 1)
            .checked_mul(self.per_page)
            .and_then(|start| Some((start, start.checked_add(self.per_page - 1)?)))
            .and_then(|(start, end)| Some((isize::try_from(start).ok()?, isize::try_from(end).ok()?)));
        Ok(bounds)
    }

    async fn page_of(&self, index: &str, page: usize) -> Result<Vec<ArticleSummary>, ArticleError> {
        let Some((start, end)) = self.page_bounds(page)? else {
            return Ok(Vec::new());
        };
        let members = self
            .store
            .zrange(index, start, end, RangeOrder::Descending)
            .await?;

        let mut articles = Vec::with_capacity(members.len());
        for member in members {
            let fields = self.store.hgetall(&member).await?;
            match ArticleSummary::from_fields(keys::article_id(&member), fields) {
                Some(summary) => articles.push(summary),
                None => debug!(article = %member, "Indexed article has no fields, skipping"),
            }
        }
        Ok(articles)
    }
}
