use bytes::Bytes;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use uuid::Uuid;

use crate::app::error::ValidationError;
use crate::domain::media::IncomingFile;
use crate::domain::story::MediaKind;

pub const DEFAULT_IMAGE_MAX_BYTES: u64 = 10 * 1024 * 1024;
pub const DEFAULT_VIDEO_MAX_BYTES: u64 = 50 * 1024 * 1024;

const PREVIEW_SCHEME: &str = "blob:ephemera/";

/// Validates user-supplied files and stages them for story creation.
#[derive(Clone)]
pub struct MediaIntake {
    image_max_bytes: u64,
    video_max_bytes: u64,
    previews: PreviewRegistry,
}

impl MediaIntake {
    pub fn new(image_max_bytes: u64, video_max_bytes: u64) -> Self {
        Self {
            image_max_bytes,
            video_max_bytes,
            previews: PreviewRegistry::default(),
        }
    }

    pub fn previews(&self) -> &PreviewRegistry {
        &self.previews
    }

    pub fn limit_for(&self, kind: MediaKind) -> u64 {
        match kind {
            MediaKind::Image => self.image_max_bytes,
            MediaKind::Video => self.video_max_bytes,
        }
    }

    /// Checks that can run before the payload is read: the mime type, and
    /// the size the client declared if it sent one.
    pub fn preflight(
        &self,
        mime_type: &str,
        declared_size: Option<u64>,
    ) -> Result<PayloadLimit, ValidationError> {
        let kind = classify(mime_type)?;
        let limit = PayloadLimit {
            kind,
            max_bytes: self.limit_for(kind),
        };
        if let Some(actual) = declared_size {
            limit.check(actual)?;
        }
        Ok(limit)
    }

    pub fn stage(&self, file: IncomingFile) -> Result<StagedMedia, ValidationError> {
        let kind = classify(&file.mime_type)?;

        let actual = file.size();
        if actual == 0 {
            return Err(ValidationError::Empty);
        }
        PayloadLimit {
            kind,
            max_bytes: self.limit_for(kind),
        }
        .check(actual)?;

        let preview = self.previews.acquire(file.payload.clone());
        tracing::debug!(
            kind = %kind,
            bytes = actual,
            file_name = ?file.file_name,
            preview = %preview.url(),
            "staged media"
        );

        Ok(StagedMedia {
            kind,
            mime_type: file.mime_type.trim().to_ascii_lowercase(),
            preview,
            payload: file.payload,
        })
    }
}

fn classify(mime_type: &str) -> Result<MediaKind, ValidationError> {
    MediaKind::from_mime(mime_type).ok_or_else(|| ValidationError::UnsupportedType {
        mime_type: mime_type.to_string(),
    })
}

/// Size ceiling for one payload of a given kind. Inclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PayloadLimit {
    pub kind: MediaKind,
    pub max_bytes: u64,
}

impl PayloadLimit {
    pub fn check(&self, actual: u64) -> Result<(), ValidationError> {
        if actual > self.max_bytes {
            Err(self.exceeded(actual))
        } else {
            Ok(())
        }
    }

    pub fn exceeded(&self, actual: u64) -> ValidationError {
        ValidationError::TooLarge {
            kind: self.kind,
            limit: self.max_bytes,
            actual,
        }
    }
}

/// A validated file held locally until it is uploaded or discarded.
/// Dropping it revokes its preview handle.
#[derive(Debug)]
pub struct StagedMedia {
    kind: MediaKind,
    mime_type: String,
    preview: PreviewHandle,
    payload: Bytes,
}

impl StagedMedia {
    pub fn kind(&self) -> MediaKind {
        self.kind
    }

    pub fn mime_type(&self) -> &str {
        &self.mime_type
    }

    pub fn preview(&self) -> &PreviewHandle {
        &self.preview
    }

    pub fn payload(&self) -> &Bytes {
        &self.payload
    }

    pub fn size(&self) -> u64 {
        self.payload.len() as u64
    }

    /// File extension used for the stored object.
    pub fn extension(&self) -> String {
        extension_from_mime(&self.mime_type)
    }
}

fn extension_from_mime(mime_type: &str) -> String {
    let subtype = mime_type
        .split_once('/')
        .map(|(_, sub)| sub)
        .unwrap_or_default();
    // Drop parameters and structured suffixes: "svg+xml; charset=utf-8" -> "svg"
    let subtype = subtype
        .split(|c: char| c == ';' || c == '+')
        .next()
        .unwrap_or_default()
        .trim();

    match subtype {
        "jpeg" | "pjpeg" => "jpg".to_string(),
        "quicktime" => "mov".to_string(),
        "x-matroska" => "mkv".to_string(),
        "x-msvideo" => "avi".to_string(),
        other => {
            let cleaned: String = other
                .chars()
                .filter(|c| c.is_ascii_alphanumeric())
                .collect();
            if cleaned.is_empty() {
                "bin".to_string()
            } else {
                cleaned
            }
        }
    }
}

/// Tracks live preview handles. Cloning shares the same registry.
#[derive(Clone, Default)]
pub struct PreviewRegistry {
    inner: Arc<Mutex<HashMap<Uuid, Bytes>>>,
}

impl PreviewRegistry {
    fn acquire(&self, payload: Bytes) -> PreviewHandle {
        let id = Uuid::new_v4();
        self.lock().insert(id, payload);
        PreviewHandle {
            id,
            registry: self.clone(),
        }
    }

    /// Bytes behind a preview URL, if the handle is still alive.
    pub fn resolve(&self, url: &str) -> Option<Bytes> {
        let id = url.strip_prefix(PREVIEW_SCHEME)?;
        let id = Uuid::parse_str(id).ok()?;
        self.lock().get(&id).cloned()
    }

    pub fn live_count(&self) -> usize {
        self.lock().len()
    }

    fn release(&self, id: Uuid) {
        self.lock().remove(&id);
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<Uuid, Bytes>> {
        // A panic while holding the lock leaves the map itself consistent.
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// A local, revocable reference to staged bytes. Released on drop.
pub struct PreviewHandle {
    id: Uuid,
    registry: PreviewRegistry,
}

impl PreviewHandle {
    pub fn url(&self) -> String {
        format!("{}{}", PREVIEW_SCHEME, self.id)
    }
}

impl std::fmt::Debug for PreviewHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PreviewHandle").field("id", &self.id).finish()
    }
}

impl Drop for PreviewHandle {
    fn drop(&mut self) {
        self.registry.release(self.id);
    }
}

/// Holds the file currently staged in a create-story form.
#[derive(Debug, Default)]
pub struct StagingSlot {
    current: Option<StagedMedia>,
}

impl StagingSlot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stage a new file, releasing whatever was staged before it.
    /// A rejected file leaves the slot empty.
    pub fn replace(
        &mut self,
        intake: &MediaIntake,
        file: IncomingFile,
    ) -> Result<&StagedMedia, ValidationError> {
        self.current = None;
        let staged = intake.stage(file)?;
        Ok(&*self.current.insert(staged))
    }

    pub fn current(&self) -> Option<&StagedMedia> {
        self.current.as_ref()
    }

    /// Hand the staged file forward, leaving the slot empty.
    pub fn take(&mut self) -> Option<StagedMedia> {
        self.current.take()
    }

    pub fn clear(&mut self) {
        self.current = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn intake() -> MediaIntake {
        MediaIntake::new(DEFAULT_IMAGE_MAX_BYTES, DEFAULT_VIDEO_MAX_BYTES)
    }

    #[test]
    fn extensions_from_mime_subtype() {
        assert_eq!(extension_from_mime("image/jpeg"), "jpg");
        assert_eq!(extension_from_mime("image/png"), "png");
        assert_eq!(extension_from_mime("video/quicktime"), "mov");
        assert_eq!(extension_from_mime("image/svg+xml"), "svg");
        assert_eq!(extension_from_mime("video/mp4; codecs=avc1"), "mp4");
        assert_eq!(extension_from_mime("image/"), "bin");
    }

    #[test]
    fn image_limit_is_inclusive() {
        let intake = intake();
        let exact = vec![0u8; DEFAULT_IMAGE_MAX_BYTES as usize];
        assert!(intake.stage(IncomingFile::new("image/png", exact)).is_ok());

        let over = vec![0u8; DEFAULT_IMAGE_MAX_BYTES as usize + 1];
        let err = intake.stage(IncomingFile::new("image/png", over)).unwrap_err();
        assert_eq!(
            err,
            ValidationError::TooLarge {
                kind: MediaKind::Image,
                limit: DEFAULT_IMAGE_MAX_BYTES,
                actual: DEFAULT_IMAGE_MAX_BYTES + 1,
            }
        );
        assert_eq!(err.to_string(), "image exceeds the 10 MiB limit (10485761 bytes)");
    }

    #[test]
    fn limits_off_a_mebibyte_are_reported_in_bytes() {
        let intake = MediaIntake::new(1_000_000, DEFAULT_VIDEO_MAX_BYTES);
        let err = intake
            .stage(IncomingFile::new("image/jpeg", vec![0u8; 1_000_001]))
            .unwrap_err();

        assert_eq!(
            err.to_string(),
            "image exceeds the 1000000 byte limit (1000001 bytes)"
        );
    }

    #[test]
    fn preflight_rejects_declared_size_before_reading() {
        let intake = intake();

        let limit = intake.preflight("video/mp4", Some(1024)).unwrap();
        assert_eq!(limit.kind, MediaKind::Video);
        assert_eq!(limit.max_bytes, DEFAULT_VIDEO_MAX_BYTES);

        let err = intake
            .preflight("video/mp4", Some(DEFAULT_VIDEO_MAX_BYTES + 1))
            .unwrap_err();
        assert!(matches!(err, ValidationError::TooLarge { kind: MediaKind::Video, .. }));

        let err = intake.preflight("text/plain", None).unwrap_err();
        assert_eq!(
            err,
            ValidationError::UnsupportedType {
                mime_type: "text/plain".into()
            }
        );
    }

    #[test]
    fn preview_is_revoked_when_staged_media_drops() {
        let intake = intake();
        let staged = intake
            .stage(IncomingFile::new("image/gif", vec![1u8, 2, 3]))
            .unwrap();
        let url = staged.preview().url();

        assert_eq!(intake.previews().resolve(&url).as_deref(), Some(&[1u8, 2, 3][..]));
        drop(staged);
        assert!(intake.previews().resolve(&url).is_none());
        assert_eq!(intake.previews().live_count(), 0);
    }
}
