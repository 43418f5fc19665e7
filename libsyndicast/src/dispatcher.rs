//! Idempotent post dispatcher
//!
//! One dispatch is at most two publish attempts: the initial one, and one
//! retry allowed only after a successful token refresh for an unauthorized
//! failure. Every conclusion goes through a conditional update, so when two
//! dispatches race on the same post exactly one records its result and the
//! other observes it concluded.

use std::sync::Arc;

use crate::db::Database;
use crate::error::{PublishError, Result, SyndicastError};
use crate::platforms::{AdapterRegistry, ChannelAdapter};
use crate::refresh::{RefreshManager, RefreshOutcome};
use crate::types::{ChannelCredential, ScheduledPost, StatusDetail};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// Published; the remote id is recorded on the post.
    Sent {
        remote_post_id: String,
        detail: StatusDetail,
    },
    /// The platform already had this content; the post is concluded
    /// without an error.
    SkippedDuplicate { detail: StatusDetail },
    /// The post was already concluded, here or by a concurrent dispatch.
    /// Nothing was overwritten.
    AlreadyConcluded,
    /// The attempt failed; the post is concluded with the recorded detail.
    Failed {
        detail: StatusDetail,
        message: String,
    },
}

#[derive(Clone)]
pub struct Dispatcher {
    db: Database,
    adapters: AdapterRegistry,
    refresher: RefreshManager,
}

impl Dispatcher {
    pub fn new(db: Database, adapters: AdapterRegistry, refresher: RefreshManager) -> Self {
        Self {
            db,
            adapters,
            refresher,
        }
    }

    /// Dispatch one scheduled post.
    ///
    /// `Err` means the dispatch could not run (storage fault, unknown post);
    /// every way a publish attempt can end is a `DispatchOutcome`.
    pub async fn dispatch(&self, post_id: &str) -> Result<DispatchOutcome> {
        let post = self.db.get_post(post_id).await?.ok_or_else(|| {
            SyndicastError::InvalidInput(format!("unknown post: {}", post_id))
        })?;

        // Idempotency guard: concluded posts are never re-attempted.
        if post.sent_post || !post.schedule_status {
            tracing::debug!(post_id, "Post already concluded, skipping dispatch");
            return Ok(DispatchOutcome::AlreadyConcluded);
        }

        let Some(credential) = self
            .db
            .active_credential(&post.user_id, post.platform)
            .await?
        else {
            return self
                .fail(
                    &post,
                    StatusDetail::InitialFailure,
                    format!("no activated {} credential", post.platform),
                )
                .await;
        };

        let Some(adapter) = self.adapters.get(post.platform) else {
            return self
                .fail(
                    &post,
                    StatusDetail::InitialFailure,
                    format!("platform not configured: {}", post.platform),
                )
                .await;
        };

        let limit = adapter.character_limit();
        let length = post.content.chars().count();
        if length > limit {
            return self
                .fail(
                    &post,
                    StatusDetail::InitialFailure,
                    format!(
                        "content exceeds {} character limit for {} ({} characters)",
                        limit, post.platform, length
                    ),
                )
                .await;
        }

        tracing::info!(
            post_id,
            platform = %post.platform,
            handle = %post.handle,
            "Dispatching post"
        );

        match adapter.publish(&credential.access_token, &post.content).await {
            Ok(remote_post_id) => {
                self.succeed(&post, remote_post_id, StatusDetail::InitialSuccess)
                    .await
            }
            Err(PublishError::Duplicate(message)) => self.skip_duplicate(&post, message).await,
            Err(PublishError::Unauthorized(_)) => {
                self.refresh_and_retry(&post, &credential, adapter).await
            }
            Err(e) => {
                self.fail(&post, StatusDetail::InitialFailure, e.detail().to_string())
                    .await
            }
        }
    }

    /// The single allowed retry hop after an unauthorized initial attempt.
    async fn refresh_and_retry(
        &self,
        post: &ScheduledPost,
        credential: &ChannelCredential,
        adapter: Arc<dyn ChannelAdapter>,
    ) -> Result<DispatchOutcome> {
        let tokens = match self.refresher.refresh(&credential.id).await? {
            RefreshOutcome::Refreshed(tokens) => tokens,
            RefreshOutcome::Failed(message) => {
                return self.fail(post, StatusDetail::RefreshFailed, message).await;
            }
        };

        tracing::info!(post_id = %post.id, "Retrying publish with refreshed token");

        match adapter.publish(&tokens.access_token, &post.content).await {
            Ok(remote_post_id) => {
                self.succeed(post, remote_post_id, StatusDetail::RetrySuccess)
                    .await
            }
            Err(PublishError::Duplicate(message)) => self.skip_duplicate(post, message).await,
            // No second refresh: any retry failure is terminal.
            Err(e) => {
                self.fail(post, StatusDetail::RetryFailed, e.detail().to_string())
                    .await
            }
        }
    }

    async fn succeed(
        &self,
        post: &ScheduledPost,
        remote_post_id: String,
        detail: StatusDetail,
    ) -> Result<DispatchOutcome> {
        let recorded = self
            .db
            .mark_post_sent(&post.id, &remote_post_id, detail)
            .await?;
        if !recorded {
            tracing::warn!(
                post_id = %post.id,
                %remote_post_id,
                "Publish succeeded but the post was concluded concurrently"
            );
            return Ok(DispatchOutcome::AlreadyConcluded);
        }

        tracing::info!(post_id = %post.id, %remote_post_id, detail = %detail, "Post sent");
        Ok(DispatchOutcome::Sent {
            remote_post_id,
            detail,
        })
    }

    async fn skip_duplicate(
        &self,
        post: &ScheduledPost,
        message: String,
    ) -> Result<DispatchOutcome> {
        let detail = StatusDetail::skipped_duplicate_for(post.platform);
        let recorded = self
            .db
            .finish_post_unsent(&post.id, detail, Some(&message))
            .await?;
        if !recorded {
            return Ok(DispatchOutcome::AlreadyConcluded);
        }

        tracing::info!(post_id = %post.id, detail = %detail, "Duplicate absorbed");
        Ok(DispatchOutcome::SkippedDuplicate { detail })
    }

    async fn fail(
        &self,
        post: &ScheduledPost,
        detail: StatusDetail,
        message: String,
    ) -> Result<DispatchOutcome> {
        let recorded = self
            .db
            .finish_post_unsent(&post.id, detail, Some(&message))
            .await?;
        if !recorded {
            return Ok(DispatchOutcome::AlreadyConcluded);
        }

        tracing::warn!(post_id = %post.id, detail = %detail, %message, "Dispatch failed");
        Ok(DispatchOutcome::Failed { detail, message })
    }
}
