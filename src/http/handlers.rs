use axum::{
    body::{Body, HttpBody},
    extract::{Path, Query, State},
    http::{header, HeaderMap, StatusCode},
    Json,
};
use http_body_util::LengthLimitError;
use serde::{Deserialize, Serialize};
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::app::error::ViewError;
use crate::domain::media::IncomingFile;
use crate::domain::story::{Story, StoryGroup, StoryView};
use crate::http::{AppError, AuthUser, MaybeAuthUser};
use crate::AppState;

const FILE_NAME_HEADER: &str = "x-file-name";

#[derive(Serialize)]
pub(crate) struct HealthResponse {
    status: &'static str,
}

#[derive(Deserialize)]
pub struct PaginationQuery {
    pub limit: Option<i64>,
    pub cursor: Option<String>,
}

#[derive(Serialize)]
pub struct ListResponse<T> {
    pub items: Vec<T>,
    pub next_cursor: Option<String>,
}

#[derive(Serialize)]
pub struct StoryViewersResponse {
    pub items: Vec<StoryView>,
    pub next_cursor: Option<String>,
    pub view_count: i64,
}

fn parse_cursor(cursor: Option<String>) -> Result<Option<(OffsetDateTime, Uuid)>, AppError> {
    let Some(cursor) = cursor else {
        return Ok(None);
    };

    let mut parts = cursor.splitn(2, '/');
    let timestamp = parts
        .next()
        .ok_or_else(|| AppError::bad_request("invalid cursor"))?;
    let id = parts
        .next()
        .ok_or_else(|| AppError::bad_request("invalid cursor"))?;

    let timestamp = OffsetDateTime::parse(timestamp, &Rfc3339)
        .map_err(|_| AppError::bad_request("invalid cursor"))?;
    let id = Uuid::parse_str(id).map_err(|_| AppError::bad_request("invalid cursor"))?;

    Ok(Some((timestamp, id)))
}

fn encode_cursor(cursor: Option<(OffsetDateTime, Uuid)>) -> Option<String> {
    let (timestamp, id) = cursor?;
    let timestamp = timestamp.format(&Rfc3339).ok()?;
    Some(format!("{}/{}", timestamp, id))
}

pub(crate) async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    let repo = state.stories.repo().ping().await.is_ok();
    let storage = state.stories.storage().ping().await.is_ok();
    let cache = match &state.cache {
        Some(cache) => cache.ping().await.is_ok(),
        None => true,
    };
    let status = if repo && storage && cache { "ok" } else { "degraded" };

    Json(HealthResponse { status })
}

// ============================================================================
// Story Handlers
// ============================================================================

/// The request body is the raw media payload; `Content-Type` carries its
/// mime type. The body is read against the limit for that kind, so an
/// oversized upload is refused with the intake error before it is buffered.
pub async fn create_story(
    MaybeAuthUser(actor_id): MaybeAuthUser,
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Body,
) -> Result<(StatusCode, Json<Story>), AppError> {
    let mime_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default();
    let declared_size = headers
        .get(header::CONTENT_LENGTH)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.parse::<u64>().ok())
        .or_else(|| body.size_hint().exact());

    let limit = state.intake.preflight(mime_type, declared_size)?;
    let read_limit = usize::try_from(limit.max_bytes).unwrap_or(usize::MAX);
    let payload = axum::body::to_bytes(body, read_limit)
        .await
        .map_err(|err| {
            let err = err.into_inner();
            if err.downcast_ref::<LengthLimitError>().is_some() {
                let actual = declared_size.unwrap_or(limit.max_bytes + 1);
                AppError::from(limit.exceeded(actual.max(limit.max_bytes + 1)))
            } else {
                tracing::warn!(error = %err, "failed to read story upload");
                AppError::bad_request("failed to read request body")
            }
        })?;

    let mut file = IncomingFile::new(mime_type, payload);
    if let Some(name) = headers
        .get(FILE_NAME_HEADER)
        .and_then(|value| value.to_str().ok())
    {
        file = file.with_file_name(name);
    }

    let staged = state.intake.stage(file)?;
    let story = state
        .stories
        .create_story(actor_id, staged)
        .await
        .map_err(|err| {
            tracing::error!(error = ?err, owner_id = ?actor_id, "failed to create story");
            AppError::from(err)
        })?;

    Ok((StatusCode::CREATED, Json(story)))
}

pub async fn get_story(
    Path(id): Path<Uuid>,
    State(state): State<AppState>,
) -> Result<Json<Story>, AppError> {
    let story = state.stories.get_story(id).await.map_err(|err| {
        tracing::error!(error = ?err, story_id = %id, "failed to get story");
        AppError::internal("failed to get story")
    })?;

    match story {
        Some(story) => Ok(Json(story)),
        None => Err(AppError::not_found("story not found")),
    }
}

pub async fn delete_story(
    Path(id): Path<Uuid>,
    auth: AuthUser,
    State(state): State<AppState>,
) -> Result<StatusCode, AppError> {
    let deleted = state
        .stories
        .delete_story(id, auth.user_id)
        .await
        .map_err(|err| {
            tracing::error!(error = ?err, story_id = %id, "failed to delete story");
            AppError::internal("failed to delete story")
        })?;

    if deleted {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(AppError::not_found("story not found"))
    }
}

/// Recording failures are logged and still answered with 204 so the
/// viewer's playback is never interrupted.
pub async fn mark_story_seen(
    Path(id): Path<Uuid>,
    MaybeAuthUser(viewer_id): MaybeAuthUser,
    State(state): State<AppState>,
) -> Result<StatusCode, AppError> {
    match state.views.record_view(id, viewer_id).await {
        Ok(_) => {}
        Err(ViewError::StoryNotFound(_)) => return Err(AppError::not_found("story not found")),
        Err(err) => {
            tracing::warn!(error = ?err, story_id = %id, viewer_id = ?viewer_id, "failed to record story view");
        }
    }

    Ok(StatusCode::NO_CONTENT)
}

pub async fn get_story_viewers(
    Path(id): Path<Uuid>,
    auth: AuthUser,
    State(state): State<AppState>,
    Query(query): Query<PaginationQuery>,
) -> Result<Json<StoryViewersResponse>, AppError> {
    let limit = query.limit.unwrap_or(30);
    if !(1..=200).contains(&limit) {
        return Err(AppError::bad_request("limit must be between 1 and 200"));
    }
    let cursor = parse_cursor(query.cursor)?;

    let owner = state.stories.get_story_owner(id).await.map_err(|err| {
        tracing::error!(error = ?err, story_id = %id, "failed to check story ownership");
        AppError::internal("failed to get story viewers")
    })?;

    match owner {
        Some(owner_id) if owner_id == auth.user_id => {}
        Some(_) => return Err(AppError::forbidden("only the story owner can view viewers")),
        None => return Err(AppError::not_found("story not found")),
    }

    let mut viewers = state
        .views
        .list_viewers(id, cursor, limit + 1)
        .await
        .map_err(|err| {
            tracing::error!(error = ?err, story_id = %id, "failed to list story viewers");
            AppError::internal("failed to list story viewers")
        })?;
    let view_count = state.views.view_count(id).await.map_err(|err| {
        tracing::error!(error = ?err, story_id = %id, "failed to count story views");
        AppError::internal("failed to list story viewers")
    })?;

    let next_cursor = if viewers.len() > limit as usize {
        viewers.truncate(limit as usize);
        viewers.last().map(|last| (last.viewed_at, last.viewer_id))
    } else {
        None
    };

    Ok(Json(StoryViewersResponse {
        items: viewers,
        next_cursor: encode_cursor(next_cursor),
        view_count,
    }))
}

pub async fn get_user_stories(
    Path(id): Path<Uuid>,
    State(state): State<AppState>,
) -> Result<Json<ListResponse<Story>>, AppError> {
    let stories = state.stories.list_active(&[id]).await.map_err(|err| {
        tracing::error!(error = ?err, user_id = %id, "failed to get user stories");
        AppError::internal("failed to get user stories")
    })?;

    Ok(Json(ListResponse {
        items: stories,
        next_cursor: None,
    }))
}

pub async fn get_stories_feed(
    auth: AuthUser,
    State(state): State<AppState>,
) -> Result<Json<ListResponse<StoryGroup>>, AppError> {
    let groups = state
        .stories
        .stories_feed(auth.user_id)
        .await
        .map_err(|err| {
            tracing::error!(error = ?err, user_id = %auth.user_id, "failed to get stories feed");
            AppError::internal("failed to get stories feed")
        })?;

    Ok(Json(ListResponse {
        items: groups,
        next_cursor: None,
    }))
}
