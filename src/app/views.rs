use anyhow::Result;
use std::sync::Arc;
use time::OffsetDateTime;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::app::error::ViewError;
use crate::domain::story::{Story, StoryView};
use crate::infra::repo::StoryRepository;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ViewOutcome {
    /// First view of this story by this viewer.
    Recorded,
    /// The viewer had already seen the story; nothing was written.
    AlreadyRecorded,
    /// Owners never count towards their own stories.
    OwnerView,
    /// No authenticated viewer, so nothing is tracked.
    Anonymous,
}

/// Deduplicated record of who has seen which story.
#[derive(Clone)]
pub struct ViewLedger {
    repo: Arc<dyn StoryRepository>,
}

impl ViewLedger {
    pub fn new(repo: Arc<dyn StoryRepository>) -> Self {
        Self { repo }
    }

    /// Record a view by story id. The owner is looked up without an expiry
    /// filter so a story that expires mid-session still counts.
    pub async fn record_view(
        &self,
        story_id: Uuid,
        viewer_id: Option<Uuid>,
    ) -> Result<ViewOutcome, ViewError> {
        let Some(viewer_id) = viewer_id else {
            return Ok(ViewOutcome::Anonymous);
        };
        let story = self
            .repo
            .get_story(story_id)
            .await?
            .ok_or(ViewError::StoryNotFound(story_id))?;

        self.insert(&story, viewer_id).await
    }

    pub async fn record_story_view(
        &self,
        story: &Story,
        viewer_id: Option<Uuid>,
    ) -> Result<ViewOutcome, ViewError> {
        match viewer_id {
            Some(viewer_id) => self.insert(story, viewer_id).await,
            None => Ok(ViewOutcome::Anonymous),
        }
    }

    async fn insert(&self, story: &Story, viewer_id: Uuid) -> Result<ViewOutcome, ViewError> {
        if viewer_id == story.owner_id {
            return Ok(ViewOutcome::OwnerView);
        }

        if self.repo.insert_view(story.id, viewer_id).await? {
            tracing::debug!(story_id = %story.id, viewer_id = %viewer_id, "recorded story view");
            Ok(ViewOutcome::Recorded)
        } else {
            Ok(ViewOutcome::AlreadyRecorded)
        }
    }

    /// Record a view on a detached task. The caller never waits for it and
    /// failures only reach the logs. `None` when called outside a Tokio
    /// runtime, in which case the view is dropped with a warning.
    pub fn spawn_record(&self, story: &Story, viewer_id: Option<Uuid>) -> Option<JoinHandle<()>> {
        let Ok(runtime) = Handle::try_current() else {
            tracing::warn!(
                story_id = %story.id,
                viewer_id = ?viewer_id,
                "no async runtime, story view not recorded"
            );
            return None;
        };

        let ledger = self.clone();
        let story = story.clone();
        Some(runtime.spawn(async move {
            if let Err(err) = ledger.record_story_view(&story, viewer_id).await {
                tracing::warn!(
                    error = ?err,
                    story_id = %story.id,
                    viewer_id = ?viewer_id,
                    "failed to record story view"
                );
            }
        }))
    }

    pub async fn list_viewers(
        &self,
        story_id: Uuid,
        cursor: Option<(OffsetDateTime, Uuid)>,
        limit: i64,
    ) -> Result<Vec<StoryView>> {
        self.repo.list_views(story_id, cursor, limit).await
    }

    pub async fn view_count(&self, story_id: Uuid) -> Result<i64> {
        self.repo.count_views(story_id).await
    }
}
