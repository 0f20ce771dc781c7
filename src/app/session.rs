use uuid::Uuid;

use crate::app::error::SessionError;
use crate::app::views::ViewLedger;
use crate::domain::story::{MediaKind, Story};

/// Receives a notification each time a story is put on screen.
pub trait ViewSink: Send + Sync {
    fn story_displayed(&self, story: &Story, viewer_id: Option<Uuid>);
}

impl ViewSink for ViewLedger {
    fn story_displayed(&self, story: &Story, viewer_id: Option<Uuid>) {
        // Detached: playback does not wait on the write. Outside a runtime
        // the view is dropped and logged.
        let _ = self.spawn_record(story, viewer_id);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Viewing(usize),
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SegmentProgress {
    Complete,
    Empty,
}

/// One viewer's traversal through one owner's active stories. The story
/// list is fixed when the session starts.
pub struct StorySession<S: ViewSink> {
    stories: Vec<Story>,
    viewer_id: Option<Uuid>,
    state: SessionState,
    sink: S,
}

impl<S: ViewSink> StorySession<S> {
    pub fn start(stories: Vec<Story>, viewer_id: Option<Uuid>, sink: S) -> Result<Self, SessionError> {
        Self::start_at(stories, 0, viewer_id, sink)
    }

    pub fn start_at(
        stories: Vec<Story>,
        index: usize,
        viewer_id: Option<Uuid>,
        sink: S,
    ) -> Result<Self, SessionError> {
        let Some(first) = stories.first() else {
            return Err(SessionError::Empty);
        };
        if stories.iter().any(|story| story.owner_id != first.owner_id) {
            return Err(SessionError::MixedOwners);
        }
        if index >= stories.len() {
            return Err(SessionError::IndexOutOfRange {
                index,
                len: stories.len(),
            });
        }

        let mut session = Self {
            stories,
            viewer_id,
            state: SessionState::Closed,
            sink,
        };
        session.enter(index);
        Ok(session)
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn len(&self) -> usize {
        self.stories.len()
    }

    pub fn owner_id(&self) -> Uuid {
        self.stories[0].owner_id
    }

    pub fn stories(&self) -> &[Story] {
        &self.stories
    }

    pub fn current(&self) -> Option<&Story> {
        match self.state {
            SessionState::Viewing(index) => self.stories.get(index),
            SessionState::Closed => None,
        }
    }

    pub fn is_closed(&self) -> bool {
        self.state == SessionState::Closed
    }

    /// Advance to the next story, closing the session after the last one.
    pub fn next(&mut self) -> SessionState {
        if let SessionState::Viewing(index) = self.state {
            if index + 1 < self.stories.len() {
                self.enter(index + 1);
            } else {
                self.state = SessionState::Closed;
            }
        }
        self.state
    }

    /// Step back one story. A no-op on the first story.
    pub fn previous(&mut self) -> SessionState {
        if let SessionState::Viewing(index) = self.state {
            if index > 0 {
                self.enter(index - 1);
            }
        }
        self.state
    }

    /// The current media finished playing. Videos advance; images wait for
    /// the presentation layer to call `next`.
    pub fn playback_ended(&mut self) -> SessionState {
        match self.current().map(|story| story.media_kind) {
            Some(MediaKind::Video) => self.next(),
            _ => self.state,
        }
    }

    pub fn close(&mut self) {
        self.state = SessionState::Closed;
    }

    /// One entry per story. Segments up to and including the current one
    /// are complete; the current segment is never shown partially filled.
    pub fn progress(&self) -> Vec<SegmentProgress> {
        let filled = match self.state {
            SessionState::Viewing(index) => index + 1,
            SessionState::Closed => self.stories.len(),
        };
        (0..self.stories.len())
            .map(|k| {
                if k < filled {
                    SegmentProgress::Complete
                } else {
                    SegmentProgress::Empty
                }
            })
            .collect()
    }

    fn enter(&mut self, index: usize) {
        self.state = SessionState::Viewing(index);
        self.sink.story_displayed(&self.stories[index], self.viewer_id);
    }
}
