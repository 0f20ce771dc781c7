use thiserror::Error;
use uuid::Uuid;

use crate::domain::story::MediaKind;

/// A staged file was rejected. The user can retry with a different file.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("unsupported media type: {mime_type}")]
    UnsupportedType { mime_type: String },

    #[error("{kind} exceeds the {} limit ({actual} bytes)", format_limit(.limit))]
    TooLarge {
        kind: MediaKind,
        limit: u64,
        actual: u64,
    },

    #[error("file is empty")]
    Empty,
}

const MIB: u64 = 1024 * 1024;

fn format_limit(limit: &u64) -> String {
    if *limit > 0 && limit % MIB == 0 {
        format!("{} MiB", limit / MIB)
    } else {
        format!("{} byte", limit)
    }
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("authentication required")]
    AuthRequired,

    #[error("media upload failed")]
    UploadFailed(#[source] anyhow::Error),

    #[error("failed to persist story")]
    PersistFailed(#[source] anyhow::Error),
}

/// Failure to record a story view. Never shown to the viewer.
#[derive(Debug, Error)]
pub enum ViewError {
    #[error("story {0} not found")]
    StoryNotFound(Uuid),

    #[error("failed to record story view")]
    Persist(#[from] anyhow::Error),
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SessionError {
    #[error("a story session needs at least one story")]
    Empty,

    #[error("start index {index} is out of range for {len} stories")]
    IndexOutOfRange { index: usize, len: usize },

    #[error("a story session must contain a single owner's stories")]
    MixedOwners,
}
