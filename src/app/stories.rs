use anyhow::{anyhow, Result};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use uuid::Uuid;

use crate::app::error::{SessionError, StoreError};
use crate::app::intake::StagedMedia;
use crate::app::session::{StorySession, ViewSink};
use crate::domain::story::{active_since, Story, StoryGroup};
use crate::infra::cache::RedisCache;
use crate::infra::clock::Clock;
use crate::infra::repo::{NewStory, StoryRepository};
use crate::infra::storage::{ObjectStore, StoredObject};

const MAX_KEY_ATTEMPTS: i128 = 16;

#[derive(Clone)]
pub struct StoryService {
    repo: Arc<dyn StoryRepository>,
    storage: Arc<dyn ObjectStore>,
    clock: Arc<dyn Clock>,
    feed_cache: Option<FeedCache>,
}

#[derive(Clone)]
struct FeedCache {
    cache: RedisCache,
    ttl_seconds: u64,
}

impl StoryService {
    pub fn new(
        repo: Arc<dyn StoryRepository>,
        storage: Arc<dyn ObjectStore>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            repo,
            storage,
            clock,
            feed_cache: None,
        }
    }

    /// Cache each viewer's stories feed in Redis. A zero TTL leaves caching off.
    pub fn with_feed_cache(mut self, cache: RedisCache, ttl_seconds: u64) -> Self {
        self.feed_cache = (ttl_seconds > 0).then_some(FeedCache { cache, ttl_seconds });
        self
    }

    pub fn storage(&self) -> &Arc<dyn ObjectStore> {
        &self.storage
    }

    pub fn repo(&self) -> &Arc<dyn StoryRepository> {
        &self.repo
    }

    /// Upload the staged payload and persist the story.
    ///
    /// If the insert fails after the upload succeeded, the uploaded object is
    /// left in place. It is unreferenced but harmless, and the failure is
    /// logged with its path.
    pub async fn create_story(
        &self,
        actor_id: Option<Uuid>,
        media: StagedMedia,
    ) -> Result<Story, StoreError> {
        let owner_id = actor_id.ok_or(StoreError::AuthRequired)?;

        let stored = self
            .upload_unique(owner_id, &media)
            .await
            .map_err(StoreError::UploadFailed)?;
        let media_ref = self
            .storage
            .public_url(&stored.path)
            .map_err(StoreError::UploadFailed)?;

        let story = self
            .repo
            .insert_story(NewStory {
                owner_id,
                media_ref,
                media_kind: media.kind(),
            })
            .await
            .map_err(|err| {
                tracing::warn!(
                    owner_id = %owner_id,
                    object_path = %stored.path,
                    "story insert failed after upload, leaving object orphaned"
                );
                StoreError::PersistFailed(err)
            })?;

        tracing::info!(
            story_id = %story.id,
            owner_id = %owner_id,
            media_kind = %story.media_kind,
            bytes = media.size(),
            "created story"
        );
        Ok(story)
    }

    /// Upload under `{owner}/{epochMillis}.{ext}`. A taken key moves on to
    /// the next millisecond, so concurrent uploads never overwrite each other.
    async fn upload_unique(&self, owner_id: Uuid, media: &StagedMedia) -> Result<StoredObject> {
        let millis = self.clock.now().unix_timestamp_nanos() / 1_000_000;

        for offset in 0..MAX_KEY_ATTEMPTS {
            let key = format!("{}/{}.{}", owner_id, millis + offset, media.extension());
            let uploaded = self
                .storage
                .upload(&key, media.payload().clone(), media.mime_type())
                .await?;
            match uploaded {
                Some(stored) => return Ok(stored),
                None => tracing::debug!(object_key = %key, "object key taken, trying the next one"),
            }
        }

        Err(anyhow!(
            "no free object key for {}/{} after {} attempts",
            owner_id,
            millis,
            MAX_KEY_ATTEMPTS
        ))
    }

    /// Unexpired stories of the given owners, oldest first.
    pub async fn list_active(&self, owner_ids: &[Uuid]) -> Result<Vec<Story>> {
        let now = self.clock.now();
        let stories = self.repo.list_stories(owner_ids, active_since(now)).await?;
        Ok(stories.into_iter().filter(|story| story.is_active(now)).collect())
    }

    pub async fn get_story(&self, story_id: Uuid) -> Result<Option<Story>> {
        let now = self.clock.now();
        Ok(self
            .repo
            .get_story(story_id)
            .await?
            .filter(|story| story.is_active(now)))
    }

    /// Owner of a story regardless of expiry. Owners keep access to their
    /// own story metadata after it expires.
    pub async fn get_story_owner(&self, story_id: Uuid) -> Result<Option<Uuid>> {
        Ok(self.repo.get_story(story_id).await?.map(|story| story.owner_id))
    }

    pub async fn delete_story(&self, story_id: Uuid, owner_id: Uuid) -> Result<bool> {
        let deleted = self.repo.delete_story(story_id, owner_id).await?;
        if deleted {
            tracing::info!(story_id = %story_id, owner_id = %owner_id, "deleted story");
        }
        Ok(deleted)
    }

    /// Start a viewing session over an owner's active stories. `None` when
    /// the owner has nothing active.
    pub async fn open_session<S: ViewSink>(
        &self,
        owner_id: Uuid,
        viewer_id: Option<Uuid>,
        sink: S,
    ) -> Result<Option<StorySession<S>>> {
        let stories = self.list_active(&[owner_id]).await?;
        match StorySession::start(stories, viewer_id, sink) {
            Ok(session) => Ok(Some(session)),
            Err(SessionError::Empty) => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    /// Active stories of everyone the viewer follows, one group per owner,
    /// most recently updated group first.
    pub async fn stories_feed(&self, viewer_id: Uuid) -> Result<Vec<StoryGroup>> {
        let cache_key = format!("feed:stories:{}", viewer_id);

        if let Some(feed_cache) = &self.feed_cache {
            match feed_cache.cache.get_json::<Vec<StoryGroup>>(&cache_key).await {
                Ok(Some(groups)) => return Ok(self.prune_expired(groups)),
                Ok(None) => {}
                Err(err) => tracing::warn!(error = ?err, "failed to read stories feed cache"),
            }
        }

        let followees = self.repo.list_followees(viewer_id).await?;
        let stories = self.list_active(&followees).await?;
        let story_ids: Vec<Uuid> = stories.iter().map(|story| story.id).collect();
        let seen: HashSet<Uuid> = self
            .repo
            .seen_story_ids(viewer_id, &story_ids)
            .await?
            .into_iter()
            .collect();

        let groups = group_by_owner(stories, &seen);

        if let Some(feed_cache) = &self.feed_cache {
            if let Err(err) = feed_cache
                .cache
                .set_json(&cache_key, &groups, feed_cache.ttl_seconds)
                .await
            {
                tracing::warn!(error = ?err, "failed to write stories feed cache");
            }
        }

        Ok(groups)
    }

    fn prune_expired(&self, groups: Vec<StoryGroup>) -> Vec<StoryGroup> {
        let now = self.clock.now();
        groups
            .into_iter()
            .filter_map(|mut group| {
                group.stories.retain(|story| story.is_active(now));
                (!group.stories.is_empty()).then_some(group)
            })
            .collect()
    }
}

fn group_by_owner(stories: Vec<Story>, seen: &HashSet<Uuid>) -> Vec<StoryGroup> {
    let mut positions: HashMap<Uuid, usize> = HashMap::new();
    let mut groups: Vec<StoryGroup> = Vec::new();

    // Input is oldest first, so each group stays in playback order.
    for story in stories {
        let index = *positions.entry(story.owner_id).or_insert_with(|| {
            groups.push(StoryGroup {
                owner_id: story.owner_id,
                stories: Vec::new(),
                has_unseen: false,
            });
            groups.len() - 1
        });
        let group = &mut groups[index];
        group.has_unseen |= !seen.contains(&story.id);
        group.stories.push(story);
    }

    groups.sort_by(|a, b| {
        let latest = |group: &StoryGroup| group.stories.last().map(|s| (s.created_at, s.id));
        latest(b).cmp(&latest(a))
    });
    groups
}
