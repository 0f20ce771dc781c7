use serde::{Deserialize, Serialize};
use time::{Duration, OffsetDateTime};
use uuid::Uuid;

/// How long a story stays visible after it is created.
pub const STORY_TTL: Duration = Duration::hours(24);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Image,
    Video,
}

impl MediaKind {
    /// Classify a mime type by its top-level type. Anything that is not
    /// `image/*` or `video/*` has no kind.
    pub fn from_mime(mime_type: &str) -> Option<Self> {
        let (top, _) = mime_type.split_once('/')?;
        match top.trim().to_ascii_lowercase().as_str() {
            "image" => Some(Self::Image),
            "video" => Some(Self::Video),
            _ => None,
        }
    }

    pub fn from_db(value: &str) -> Option<Self> {
        match value {
            "image" => Some(Self::Image),
            "video" => Some(Self::Video),
            _ => None,
        }
    }

    pub fn as_db(&self) -> &'static str {
        match self {
            Self::Image => "image",
            Self::Video => "video",
        }
    }
}

impl std::fmt::Display for MediaKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_db())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Story {
    pub id: Uuid,
    pub owner_id: Uuid,
    pub media_ref: String,
    pub media_kind: MediaKind,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub expires_at: OffsetDateTime,
}

impl Story {
    pub fn new(
        id: Uuid,
        owner_id: Uuid,
        media_ref: String,
        media_kind: MediaKind,
        created_at: OffsetDateTime,
    ) -> Self {
        Self {
            id,
            owner_id,
            media_ref,
            media_kind,
            created_at,
            expires_at: created_at + STORY_TTL,
        }
    }

    pub fn is_active(&self, now: OffsetDateTime) -> bool {
        now < self.expires_at
    }
}

/// Oldest `created_at` a story may have and still be active at `now`.
pub fn active_since(now: OffsetDateTime) -> OffsetDateTime {
    now - STORY_TTL
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoryView {
    pub id: Uuid,
    pub story_id: Uuid,
    pub viewer_id: Uuid,
    #[serde(with = "time::serde::rfc3339")]
    pub viewed_at: OffsetDateTime,
}

/// One owner's active stories as they appear in a viewer's feed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoryGroup {
    pub owner_id: Uuid,
    pub stories: Vec<Story>,
    pub has_unseen: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expiry_is_one_day_after_creation() {
        let created_at = OffsetDateTime::from_unix_timestamp(1_700_000_000).unwrap();
        let story = Story::new(
            Uuid::new_v4(),
            Uuid::new_v4(),
            "https://cdn.test/a.jpg".into(),
            MediaKind::Image,
            created_at,
        );

        assert_eq!(story.expires_at - story.created_at, Duration::hours(24));
        assert!(story.is_active(created_at));
        assert!(story.is_active(story.expires_at - Duration::seconds(1)));
        assert!(!story.is_active(story.expires_at));
    }

    #[test]
    fn media_kind_follows_top_level_type() {
        assert_eq!(MediaKind::from_mime("image/png"), Some(MediaKind::Image));
        assert_eq!(MediaKind::from_mime("Video/MP4"), Some(MediaKind::Video));
        assert_eq!(MediaKind::from_mime("audio/mpeg"), None);
        assert_eq!(MediaKind::from_mime("image"), None);
        assert_eq!(MediaKind::from_mime(""), None);
    }
}
