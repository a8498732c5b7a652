//! Engagement tracking: views, favorites, and per-user histories.
//!
//! These are the only operations that touch a user document and a post
//! document together. The two documents are stored independently, so each
//! operation serializes on a per-post lock lane before its
//! read-modify-write, and a relation found present on one side only is
//! repaired with the post side as the authority (it gates the counters).

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use thiserror::Error;

use crate::models::Post;
use crate::recency;
use crate::store::{Store, StoreError};

/// Oldest searches are evicted past this length.
pub const SEARCH_HISTORY_MAX: usize = 50;

#[derive(Error, Debug)]
pub enum EngagementError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("Validation error: {0}")]
    Validation(String),
}

pub type EngagementResult<T> = Result<T, EngagementError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HistoryKind {
    View,
    Search,
}

pub struct EngagementTracker {
    store: Arc<Store>,
    lanes: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl EngagementTracker {
    pub fn new(store: Arc<Store>) -> Self {
        Self {
            store,
            lanes: Mutex::new(HashMap::new()),
        }
    }

    /// Concurrent engagement calls against the same post contend on one
    /// lock, so counter updates never interleave.
    fn lane(&self, post_id: &str) -> Arc<Mutex<()>> {
        let mut lanes = self.lanes.lock().unwrap();
        lanes.entry(post_id.to_string()).or_default().clone()
    }

    /// Record a view of `post_id` by `account_id`. The first view by an
    /// account increments the view count by exactly 1; repeats never
    /// count again. Every view moves the post to the front of the
    /// viewer's history.
    pub fn record_view(&self, account_id: &str, post_id: &str) -> EngagementResult<Post> {
        let lane = self.lane(post_id);
        let _guard = lane.lock().unwrap();

        let mut post = self.store.get_post(post_id)?;
        let mut user = self.store.get_user(account_id)?;

        if !post.viewed_by.iter().any(|u| u == account_id) {
            post.viewed_by.push(account_id.to_string());
            post.view_count += 1;
            self.store.update_post(&mut post)?;
        }

        recency::push_most_recent(&mut user.view_history, post_id.to_string());
        self.store.update_user_lists(&mut user)?;

        Ok(post)
    }

    /// Flip the favorite relation between `account_id` and `post_id` on
    /// both documents. The count is recomputed from the membership set
    /// after the flip, which keeps it exact and floors it at zero.
    pub fn toggle_favorite(&self, account_id: &str, post_id: &str) -> EngagementResult<Post> {
        let lane = self.lane(post_id);
        let _guard = lane.lock().unwrap();

        let mut post = self.store.get_post(post_id)?;
        let mut user = self.store.get_user(account_id)?;

        let on_post = post.favorited_by.iter().any(|u| u == account_id);
        let on_user = user.favorites.iter().any(|p| p == post_id);
        if on_post != on_user {
            log::warn!(
                "favorite relation between account {} and post {} present on one side only; post side wins",
                account_id,
                post_id
            );
        }

        if on_post {
            post.favorited_by.retain(|u| u != account_id);
            user.favorites.retain(|p| p != post_id);
        } else {
            post.favorited_by.push(account_id.to_string());
            user.favorites.retain(|p| p != post_id);
            user.favorites.push(post_id.to_string());
        }
        post.favorite_count = post.favorited_by.len() as i64;

        // the post document carries the counters, so it lands first
        self.store.update_post(&mut post)?;
        self.store.update_user_lists(&mut user)?;

        Ok(post)
    }

    /// Push a search query onto the account's history. Blank queries are
    /// rejected; an existing exact match moves to the front instead of
    /// duplicating.
    pub fn record_search(&self, account_id: &str, query: &str) -> EngagementResult<Vec<String>> {
        let query = query.trim();
        if query.is_empty() {
            return Err(EngagementError::Validation(
                "Search term is required".to_string(),
            ));
        }

        let mut user = self.store.get_user(account_id)?;
        recency::push_most_recent_capped(
            &mut user.search_history,
            query.to_string(),
            SEARCH_HISTORY_MAX,
        );
        self.store.update_user_lists(&mut user)?;

        Ok(user.search_history)
    }

    /// Empty the named history. Clearing an already-empty history is fine.
    pub fn clear_history(&self, account_id: &str, which: HistoryKind) -> EngagementResult<()> {
        let mut user = self.store.get_user(account_id)?;
        match which {
            HistoryKind::View => user.view_history.clear(),
            HistoryKind::Search => user.search_history.clear(),
        }
        self.store.update_user_lists(&mut user)?;
        Ok(())
    }

    /// Resolve the account's favorites to full posts. Only posts that
    /// still list the account in `favorited_by` are kept; if anything was
    /// stale the stored list is rewritten to match.
    pub fn favorites_for(&self, account_id: &str) -> EngagementResult<Vec<Post>> {
        let mut user = self.store.get_user(account_id)?;
        let resolved = self.store.find_posts_by_ids(&user.favorites)?;

        let kept: Vec<Post> = resolved
            .into_iter()
            .filter(|p| p.favorited_by.iter().any(|u| u == account_id))
            .collect();

        if kept.len() != user.favorites.len() {
            log::warn!(
                "favorites of account {} held {} stale reference(s); repairing",
                account_id,
                user.favorites.len() - kept.len()
            );
            user.favorites = kept.iter().map(|p| p.id.clone()).collect();
            self.store.update_user_lists(&mut user)?;
        }

        Ok(kept)
    }

    /// Resolve the account's view history to full posts, most recent
    /// first, dropping entries whose post no longer exists.
    pub fn view_history_for(&self, account_id: &str) -> EngagementResult<Vec<Post>> {
        let mut user = self.store.get_user(account_id)?;
        let resolved = self.store.find_posts_by_ids(&user.view_history)?;

        if resolved.len() != user.view_history.len() {
            user.view_history = resolved.iter().map(|p| p.id.clone()).collect();
            self.store.update_user_lists(&mut user)?;
        }

        Ok(resolved)
    }
}
