//! Cascading deletion across posts, comments, artifacts, and accounts.
//!
//! There is no cross-store transaction, so a cascade is an ordered
//! sequence of individually idempotent steps. A crash mid-cascade leaves
//! a partially-deleted state that the next run of the same cascade
//! finishes; every step reports Deleted or AlreadyAbsent instead of
//! failing when its work is already done.

use std::sync::Arc;
use thiserror::Error;

use crate::artifacts::{ArtifactStore, DeleteOutcome};
use crate::models::Post;
use crate::store::{Store, StoreError};

#[derive(Error, Debug)]
pub enum CascadeError {
    #[error(transparent)]
    Store(#[from] StoreError),
}

pub type CascadeResult<T> = Result<T, CascadeError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepOutcome {
    Deleted,
    AlreadyAbsent,
    /// The step failed but the cascade went on; only artifact deletion
    /// can end up here (an orphaned blob is recoverable, a stalled
    /// cascade is not).
    Failed,
}

#[derive(Debug)]
pub struct ContentCascade {
    pub post_id: String,
    pub comments_deleted: usize,
    pub artifact: StepOutcome,
    pub record: StepOutcome,
    pub users_scrubbed: usize,
}

#[derive(Debug)]
pub struct AccountCascade {
    pub account_id: String,
    pub posts: Vec<ContentCascade>,
    pub comments_deleted: usize,
    pub posts_scrubbed: usize,
    pub record: StepOutcome,
}

pub struct CascadeDeleter {
    store: Arc<Store>,
    artifacts: Arc<ArtifactStore>,
}

impl CascadeDeleter {
    pub fn new(store: Arc<Store>, artifacts: Arc<ArtifactStore>) -> Self {
        Self { store, artifacts }
    }

    /// Delete a post and everything hanging off it: its comments, its
    /// artifact, the record itself, and every reference to it left in
    /// user favorites/view histories. Running it again for an
    /// already-deleted post is a no-op.
    pub fn delete_content(&self, post_id: &str) -> CascadeResult<ContentCascade> {
        // read the artifact ref up front; on a retry the record may be
        // gone while the blob still needs deleting by its own cascade run
        let artifact_ref = match self.store.get_post(post_id) {
            Ok(post) => post.artifact,
            Err(StoreError::NotFound(_)) => None,
            Err(e) => return Err(e.into()),
        };

        let comments_deleted = self.store.delete_comments_by_post(post_id)?;

        let artifact = match artifact_ref {
            Some(ref name) => self.delete_artifact_logged(name),
            None => StepOutcome::AlreadyAbsent,
        };

        let record = if self.store.delete_post(post_id)? {
            StepOutcome::Deleted
        } else {
            StepOutcome::AlreadyAbsent
        };

        let users_scrubbed = self
            .store
            .remove_post_refs_from_users(&[post_id.to_string()])?;

        if record == StepOutcome::Deleted {
            log::info!(
                "deleted post {} ({} comment(s), artifact {:?})",
                post_id,
                comments_deleted,
                artifact
            );
        }

        Ok(ContentCascade {
            post_id: post_id.to_string(),
            comments_deleted,
            artifact,
            record,
            users_scrubbed,
        })
    }

    /// Delete an account and all its dependents: the full content
    /// cascade for every owned post, every comment the account authored
    /// anywhere, its membership in other posts' viewed_by/favorited_by
    /// sets, and finally the account record. Safe to retry wholesale.
    pub fn delete_account(&self, account_id: &str) -> CascadeResult<AccountCascade> {
        let owned = self.store.find_posts_by_owner(account_id)?;
        let mut posts = Vec::with_capacity(owned.len());
        for post in &owned {
            posts.push(self.delete_content(&post.id)?);
        }

        let comments_deleted = self.store.delete_comments_by_author(account_id)?;
        let posts_scrubbed = self.store.remove_user_refs_from_posts(account_id)?;

        let record = if self.store.delete_user(account_id)? {
            StepOutcome::Deleted
        } else {
            StepOutcome::AlreadyAbsent
        };

        if record == StepOutcome::Deleted {
            log::info!(
                "deleted account {} ({} post(s), {} authored comment(s))",
                account_id,
                posts.len(),
                comments_deleted
            );
        }

        Ok(AccountCascade {
            account_id: account_id.to_string(),
            posts,
            comments_deleted,
            posts_scrubbed,
            record,
        })
    }

    /// Apply a new artifact reference to a post, deleting the old blob
    /// when the reference actually changes. The caller must have stored
    /// the new blob already; the record never points at bytes that do
    /// not exist yet.
    pub fn replace_artifact(&self, post: &mut Post, new_ref: Option<String>) {
        let new_name = match new_ref {
            Some(name) => name,
            None => return,
        };

        if let Some(ref old) = post.artifact {
            if *old != new_name {
                self.delete_artifact_logged(old);
            }
        }
        post.artifact = Some(new_name);
    }

    fn delete_artifact_logged(&self, name: &str) -> StepOutcome {
        match self.artifacts.delete(name) {
            Ok(DeleteOutcome::Deleted) => StepOutcome::Deleted,
            Ok(DeleteOutcome::AlreadyAbsent) => StepOutcome::AlreadyAbsent,
            Err(e) => {
                log::error!("failed to delete artifact {}: {}", name, e);
                StepOutcome::Failed
            }
        }
    }
}
