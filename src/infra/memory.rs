//! In-process backends for `APP_MODE=standalone` and the test suite.
//!
//! They mirror the Postgres and S3 contracts, including the
//! `(story_id, viewer_id)` uniqueness of views, and expose switches to make
//! individual operations fail.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use bytes::Bytes;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use time::{Duration, OffsetDateTime};
use url::Url;
use uuid::Uuid;

use crate::domain::story::{Story, StoryView};
use crate::infra::clock::{Clock, SystemClock};
use crate::infra::repo::{NewStory, StoryRepository};
use crate::infra::storage::{join_object_path, public_base_url, ObjectStore, StoredObject};

/// A clock that only moves when told to.
#[derive(Clone)]
pub struct ManualClock {
    now: Arc<Mutex<OffsetDateTime>>,
}

impl ManualClock {
    pub fn new(start: OffsetDateTime) -> Self {
        Self {
            now: Arc::new(Mutex::new(start)),
        }
    }

    pub fn advance(&self, by: Duration) {
        *lock(&self.now) += by;
    }

    pub fn set(&self, to: OffsetDateTime) {
        *lock(&self.now) = to;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> OffsetDateTime {
        *lock(&self.now)
    }
}

#[derive(Default)]
struct RepoState {
    stories: Vec<Story>,
    views: Vec<StoryView>,
    follows: HashSet<(Uuid, Uuid)>,
}

#[derive(Clone)]
pub struct MemoryStoryRepository {
    state: Arc<Mutex<RepoState>>,
    clock: Arc<dyn Clock>,
    fail_story_inserts: Arc<AtomicBool>,
    fail_view_inserts: Arc<AtomicBool>,
}

impl Default for MemoryStoryRepository {
    fn default() -> Self {
        Self::new(Arc::new(SystemClock))
    }
}

impl MemoryStoryRepository {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            state: Arc::new(Mutex::new(RepoState::default())),
            clock,
            fail_story_inserts: Arc::new(AtomicBool::new(false)),
            fail_view_inserts: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn follow(&self, follower_id: Uuid, followee_id: Uuid) {
        lock(&self.state).follows.insert((follower_id, followee_id));
    }

    pub fn fail_story_inserts(&self, fail: bool) {
        self.fail_story_inserts.store(fail, Ordering::SeqCst);
    }

    pub fn fail_view_inserts(&self, fail: bool) {
        self.fail_view_inserts.store(fail, Ordering::SeqCst);
    }

    /// Every stored story, expired or not.
    pub fn stories(&self) -> Vec<Story> {
        lock(&self.state).stories.clone()
    }

    /// Every recorded view in insertion order.
    pub fn views(&self) -> Vec<StoryView> {
        lock(&self.state).views.clone()
    }
}

#[async_trait]
impl StoryRepository for MemoryStoryRepository {
    async fn insert_story(&self, story: NewStory) -> Result<Story> {
        if self.fail_story_inserts.load(Ordering::SeqCst) {
            return Err(anyhow!("stories table unavailable"));
        }

        let story = Story::new(
            Uuid::new_v4(),
            story.owner_id,
            story.media_ref,
            story.media_kind,
            self.clock.now(),
        );
        lock(&self.state).stories.push(story.clone());
        Ok(story)
    }

    async fn get_story(&self, story_id: Uuid) -> Result<Option<Story>> {
        Ok(lock(&self.state)
            .stories
            .iter()
            .find(|story| story.id == story_id)
            .cloned())
    }

    async fn list_stories(
        &self,
        owner_ids: &[Uuid],
        created_after: OffsetDateTime,
    ) -> Result<Vec<Story>> {
        let mut stories: Vec<Story> = lock(&self.state)
            .stories
            .iter()
            .filter(|story| owner_ids.contains(&story.owner_id))
            .filter(|story| story.created_at > created_after)
            .cloned()
            .collect();
        stories.sort_by(|a, b| (a.created_at, a.id).cmp(&(b.created_at, b.id)));
        Ok(stories)
    }

    async fn delete_story(&self, story_id: Uuid, owner_id: Uuid) -> Result<bool> {
        let mut state = lock(&self.state);
        let before = state.stories.len();
        state
            .stories
            .retain(|story| !(story.id == story_id && story.owner_id == owner_id));
        let deleted = state.stories.len() < before;
        if deleted {
            state.views.retain(|view| view.story_id != story_id);
        }
        Ok(deleted)
    }

    async fn insert_view(&self, story_id: Uuid, viewer_id: Uuid) -> Result<bool> {
        if self.fail_view_inserts.load(Ordering::SeqCst) {
            return Err(anyhow!("story_views table unavailable"));
        }

        let mut state = lock(&self.state);
        if !state.stories.iter().any(|story| story.id == story_id) {
            return Err(anyhow!("story_views.story_id references a missing story"));
        }
        if state
            .views
            .iter()
            .any(|view| view.story_id == story_id && view.viewer_id == viewer_id)
        {
            return Ok(false);
        }

        state.views.push(StoryView {
            id: Uuid::new_v4(),
            story_id,
            viewer_id,
            viewed_at: self.clock.now(),
        });
        Ok(true)
    }

    async fn list_views(
        &self,
        story_id: Uuid,
        cursor: Option<(OffsetDateTime, Uuid)>,
        limit: i64,
    ) -> Result<Vec<StoryView>> {
        let mut views: Vec<StoryView> = lock(&self.state)
            .views
            .iter()
            .filter(|view| view.story_id == story_id)
            .filter(|view| match cursor {
                Some(cursor) => (view.viewed_at, view.viewer_id) < cursor,
                None => true,
            })
            .cloned()
            .collect();
        views.sort_by(|a, b| (b.viewed_at, b.viewer_id).cmp(&(a.viewed_at, a.viewer_id)));
        views.truncate(limit.max(0) as usize);
        Ok(views)
    }

    async fn count_views(&self, story_id: Uuid) -> Result<i64> {
        Ok(lock(&self.state)
            .views
            .iter()
            .filter(|view| view.story_id == story_id)
            .count() as i64)
    }

    async fn seen_story_ids(&self, viewer_id: Uuid, story_ids: &[Uuid]) -> Result<Vec<Uuid>> {
        Ok(lock(&self.state)
            .views
            .iter()
            .filter(|view| view.viewer_id == viewer_id && story_ids.contains(&view.story_id))
            .map(|view| view.story_id)
            .collect())
    }

    async fn list_followees(&self, user_id: Uuid) -> Result<Vec<Uuid>> {
        Ok(lock(&self.state)
            .follows
            .iter()
            .filter(|(follower, _)| *follower == user_id)
            .map(|(_, followee)| *followee)
            .collect())
    }

    async fn ping(&self) -> Result<()> {
        Ok(())
    }
}

#[derive(Clone)]
pub struct MemoryObjectStore {
    objects: Arc<Mutex<HashMap<String, Bytes>>>,
    public_base: Url,
    fail_uploads: Arc<AtomicBool>,
}

impl MemoryObjectStore {
    pub fn new(public_endpoint: &str, bucket: &str) -> Result<Self> {
        Ok(Self {
            objects: Arc::new(Mutex::new(HashMap::new())),
            public_base: public_base_url(public_endpoint, bucket)?,
            fail_uploads: Arc::new(AtomicBool::new(false)),
        })
    }

    pub fn fail_uploads(&self, fail: bool) {
        self.fail_uploads.store(fail, Ordering::SeqCst);
    }

    pub fn get(&self, path: &str) -> Option<Bytes> {
        lock(&self.objects).get(path).cloned()
    }

    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = lock(&self.objects).keys().cloned().collect();
        keys.sort();
        keys
    }
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    async fn upload(
        &self,
        key: &str,
        payload: Bytes,
        _content_type: &str,
    ) -> Result<Option<StoredObject>> {
        if self.fail_uploads.load(Ordering::SeqCst) {
            return Err(anyhow!("object storage unavailable"));
        }
        let mut objects = lock(&self.objects);
        if objects.contains_key(key) {
            return Ok(None);
        }
        objects.insert(key.to_string(), payload);
        Ok(Some(StoredObject {
            path: key.to_string(),
        }))
    }

    fn public_url(&self, path: &str) -> Result<String> {
        join_object_path(&self.public_base, path)
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
