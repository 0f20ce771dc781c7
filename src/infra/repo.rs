use anyhow::{anyhow, Result};
use async_trait::async_trait;
use sqlx::postgres::PgRow;
use sqlx::Row;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::domain::story::{MediaKind, Story, StoryView};
use crate::infra::db::Db;

/// Fields the caller supplies when persisting a story. `id` and
/// `created_at` are assigned by the store.
#[derive(Debug, Clone)]
pub struct NewStory {
    pub owner_id: Uuid,
    pub media_ref: String,
    pub media_kind: MediaKind,
}

/// Persistence for the `stories`, `story_views` and `follows` tables.
#[async_trait]
pub trait StoryRepository: Send + Sync {
    async fn insert_story(&self, story: NewStory) -> Result<Story>;

    async fn get_story(&self, story_id: Uuid) -> Result<Option<Story>>;

    /// Stories of the given owners created strictly after `created_after`,
    /// oldest first.
    async fn list_stories(&self, owner_ids: &[Uuid], created_after: OffsetDateTime)
        -> Result<Vec<Story>>;

    async fn delete_story(&self, story_id: Uuid, owner_id: Uuid) -> Result<bool>;

    /// Returns false when the viewer already has a view for this story.
    async fn insert_view(&self, story_id: Uuid, viewer_id: Uuid) -> Result<bool>;

    /// Newest first, keyset-paginated on `(viewed_at, viewer_id)`.
    async fn list_views(
        &self,
        story_id: Uuid,
        cursor: Option<(OffsetDateTime, Uuid)>,
        limit: i64,
    ) -> Result<Vec<StoryView>>;

    async fn count_views(&self, story_id: Uuid) -> Result<i64>;

    /// Subset of `story_ids` the viewer has already seen.
    async fn seen_story_ids(&self, viewer_id: Uuid, story_ids: &[Uuid]) -> Result<Vec<Uuid>>;

    async fn list_followees(&self, user_id: Uuid) -> Result<Vec<Uuid>>;

    async fn ping(&self) -> Result<()>;
}

const UNIQUE_VIOLATION: &str = "23505";

/// True for PostgreSQL unique violations, which the view ledger treats as
/// an already-recorded view.
pub fn is_unique_violation(err: &sqlx::Error) -> bool {
    err.as_database_error()
        .and_then(|db_err| db_err.code())
        .map(|code| code == UNIQUE_VIOLATION)
        .unwrap_or(false)
}

#[derive(Clone)]
pub struct PgStoryRepository {
    db: Db,
}

impl PgStoryRepository {
    pub fn new(db: Db) -> Self {
        Self { db }
    }
}

#[async_trait]
impl StoryRepository for PgStoryRepository {
    async fn insert_story(&self, story: NewStory) -> Result<Story> {
        let row = sqlx::query(
            "INSERT INTO stories (user_id, media_url, media_type) \
             VALUES ($1, $2, $3) \
             RETURNING id, user_id, media_url, media_type, created_at",
        )
        .bind(story.owner_id)
        .bind(&story.media_ref)
        .bind(story.media_kind.as_db())
        .fetch_one(self.db.pool())
        .await?;

        row_to_story(&row)
    }

    async fn get_story(&self, story_id: Uuid) -> Result<Option<Story>> {
        let row = sqlx::query(
            "SELECT id, user_id, media_url, media_type, created_at \
             FROM stories WHERE id = $1",
        )
        .bind(story_id)
        .fetch_optional(self.db.pool())
        .await?;

        row.as_ref().map(row_to_story).transpose()
    }

    async fn list_stories(
        &self,
        owner_ids: &[Uuid],
        created_after: OffsetDateTime,
    ) -> Result<Vec<Story>> {
        if owner_ids.is_empty() {
            return Ok(Vec::new());
        }

        let rows = sqlx::query(
            "SELECT id, user_id, media_url, media_type, created_at \
             FROM stories \
             WHERE user_id = ANY($1) \
               AND created_at > $2 \
             ORDER BY created_at ASC, id ASC",
        )
        .bind(owner_ids.to_vec())
        .bind(created_after)
        .fetch_all(self.db.pool())
        .await?;

        rows.iter().map(row_to_story).collect()
    }

    async fn delete_story(&self, story_id: Uuid, owner_id: Uuid) -> Result<bool> {
        let result = sqlx::query("DELETE FROM stories WHERE id = $1 AND user_id = $2")
            .bind(story_id)
            .bind(owner_id)
            .execute(self.db.pool())
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn insert_view(&self, story_id: Uuid, viewer_id: Uuid) -> Result<bool> {
        let result = sqlx::query(
            "INSERT INTO story_views (story_id, viewer_id) \
             VALUES ($1, $2) \
             ON CONFLICT (story_id, viewer_id) DO NOTHING",
        )
        .bind(story_id)
        .bind(viewer_id)
        .execute(self.db.pool())
        .await;

        match result {
            Ok(result) => Ok(result.rows_affected() > 0),
            Err(err) if is_unique_violation(&err) => Ok(false),
            Err(err) => Err(err.into()),
        }
    }

    async fn list_views(
        &self,
        story_id: Uuid,
        cursor: Option<(OffsetDateTime, Uuid)>,
        limit: i64,
    ) -> Result<Vec<StoryView>> {
        let rows = match cursor {
            Some((viewed_at, viewer_id)) => {
                sqlx::query(
                    "SELECT id, story_id, viewer_id, viewed_at \
                     FROM story_views \
                     WHERE story_id = $1 \
                       AND (viewed_at < $2 OR (viewed_at = $2 AND viewer_id < $3)) \
                     ORDER BY viewed_at DESC, viewer_id DESC \
                     LIMIT $4",
                )
                .bind(story_id)
                .bind(viewed_at)
                .bind(viewer_id)
                .bind(limit)
                .fetch_all(self.db.pool())
                .await?
            }
            None => {
                sqlx::query(
                    "SELECT id, story_id, viewer_id, viewed_at \
                     FROM story_views \
                     WHERE story_id = $1 \
                     ORDER BY viewed_at DESC, viewer_id DESC \
                     LIMIT $2",
                )
                .bind(story_id)
                .bind(limit)
                .fetch_all(self.db.pool())
                .await?
            }
        };

        let mut views = Vec::with_capacity(rows.len());
        for row in &rows {
            views.push(StoryView {
                id: row.get("id"),
                story_id: row.get("story_id"),
                viewer_id: row.get("viewer_id"),
                viewed_at: row.get("viewed_at"),
            });
        }
        Ok(views)
    }

    async fn count_views(&self, story_id: Uuid) -> Result<i64> {
        Ok(
            sqlx::query_scalar("SELECT COUNT(*) FROM story_views WHERE story_id = $1")
                .bind(story_id)
                .fetch_one(self.db.pool())
                .await?,
        )
    }

    async fn seen_story_ids(&self, viewer_id: Uuid, story_ids: &[Uuid]) -> Result<Vec<Uuid>> {
        if story_ids.is_empty() {
            return Ok(Vec::new());
        }

        Ok(sqlx::query_scalar(
            "SELECT story_id FROM story_views \
             WHERE viewer_id = $1 AND story_id = ANY($2)",
        )
        .bind(viewer_id)
        .bind(story_ids.to_vec())
        .fetch_all(self.db.pool())
        .await?)
    }

    async fn list_followees(&self, user_id: Uuid) -> Result<Vec<Uuid>> {
        Ok(
            sqlx::query_scalar("SELECT followee_id FROM follows WHERE follower_id = $1")
                .bind(user_id)
                .fetch_all(self.db.pool())
                .await?,
        )
    }

    async fn ping(&self) -> Result<()> {
        self.db.ping().await
    }
}

fn row_to_story(row: &PgRow) -> Result<Story> {
    let media_type: String = row.get("media_type");
    let media_kind = MediaKind::from_db(&media_type)
        .ok_or_else(|| anyhow!("unknown story media type: {}", media_type))?;

    Ok(Story::new(
        row.get("id"),
        row.get("user_id"),
        row.get("media_url"),
        media_kind,
        row.get("created_at"),
    ))
}
