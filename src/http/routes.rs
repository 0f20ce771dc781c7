use axum::{routing::delete, routing::get, routing::post, Router};

use crate::http::handlers;
use crate::AppState;

pub fn health() -> Router<AppState> {
    Router::new().route("/health", get(handlers::health))
}

pub fn stories() -> Router<AppState> {
    Router::new()
        .route("/stories", post(handlers::create_story))
        .route("/stories/:id", get(handlers::get_story))
        .route("/stories/:id", delete(handlers::delete_story))
        .route("/stories/:id/seen", post(handlers::mark_story_seen))
        .route("/stories/:id/viewers", get(handlers::get_story_viewers))
        .route("/users/:id/stories", get(handlers::get_user_stories))
}

pub fn feed() -> Router<AppState> {
    Router::new().route("/feed/stories", get(handlers::get_stories_feed))
}
