mod common;

use axum::http::StatusCode;
use common::{app, story_id};
use time::Duration;
use uuid::Uuid;

use ephemera::app::error::ViewError;
use ephemera::app::views::ViewOutcome;

#[tokio::test]
async fn repeated_views_are_recorded_once() {
    let app = app();
    let owner = app.create_user();
    let viewer = app.create_user();
    let story = story_id(&app.create_story(&owner).await);

    let first = app.state.views.record_view(story, Some(viewer.id)).await.unwrap();
    let second = app.state.views.record_view(story, Some(viewer.id)).await.unwrap();

    assert_eq!(first, ViewOutcome::Recorded);
    assert_eq!(second, ViewOutcome::AlreadyRecorded);
    assert_eq!(app.repo.views().len(), 1);
    assert_eq!(app.state.views.view_count(story).await.unwrap(), 1);
}

#[tokio::test]
async fn owner_never_counts_towards_own_story() {
    let app = app();
    let owner = app.create_user();
    let story = story_id(&app.create_story(&owner).await);

    let outcome = app.state.views.record_view(story, Some(owner.id)).await.unwrap();

    assert_eq!(outcome, ViewOutcome::OwnerView);
    assert!(app.repo.views().is_empty());
}

#[tokio::test]
async fn anonymous_views_are_not_tracked() {
    let app = app();
    let owner = app.create_user();
    let story = story_id(&app.create_story(&owner).await);

    let outcome = app.state.views.record_view(story, None).await.unwrap();
    assert_eq!(outcome, ViewOutcome::Anonymous);

    let resp = app.post(&format!("/v1/stories/{}/seen", story), None).await;
    assert_eq!(resp.status, StatusCode::NO_CONTENT);
    assert!(app.repo.views().is_empty());
}

#[tokio::test]
async fn unknown_story_is_not_found() {
    let app = app();
    let viewer = app.create_user();
    let missing = Uuid::new_v4();

    let err = app
        .state
        .views
        .record_view(missing, Some(viewer.id))
        .await
        .unwrap_err();
    assert!(matches!(err, ViewError::StoryNotFound(id) if id == missing));

    let resp = app
        .post(&format!("/v1/stories/{}/seen", missing), Some(&viewer.access_token))
        .await;
    assert_eq!(resp.status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn view_is_recorded_after_story_expires() {
    let app = app();
    let owner = app.create_user();
    let viewer = app.create_user();
    let story = story_id(&app.create_story(&owner).await);

    app.clock.advance(Duration::hours(25));

    let outcome = app.state.views.record_view(story, Some(viewer.id)).await.unwrap();
    assert_eq!(outcome, ViewOutcome::Recorded);
}

#[tokio::test]
async fn seen_endpoint_records_view() {
    let app = app();
    let owner = app.create_user();
    let viewer = app.create_user();
    let story = story_id(&app.create_story(&owner).await);

    for _ in 0..3 {
        let resp = app
            .post(&format!("/v1/stories/{}/seen", story), Some(&viewer.access_token))
            .await;
        assert_eq!(resp.status, StatusCode::NO_CONTENT);
    }

    let views = app.repo.views();
    assert_eq!(views.len(), 1);
    assert_eq!(views[0].story_id, story);
    assert_eq!(views[0].viewer_id, viewer.id);
}

#[tokio::test]
async fn persistence_failure_does_not_reach_viewer() {
    let app = app();
    let owner = app.create_user();
    let viewer = app.create_user();
    let story = story_id(&app.create_story(&owner).await);
    app.repo.fail_view_inserts(true);

    let err = app
        .state
        .views
        .record_view(story, Some(viewer.id))
        .await
        .unwrap_err();
    assert!(matches!(err, ViewError::Persist(_)));

    let resp = app
        .post(&format!("/v1/stories/{}/seen", story), Some(&viewer.access_token))
        .await;
    assert_eq!(resp.status, StatusCode::NO_CONTENT);
    assert!(app.repo.views().is_empty());
}

#[tokio::test]
async fn spawned_recording_completes_in_background() {
    let app = app();
    let owner = app.create_user();
    let viewer = app.create_user();
    let id = story_id(&app.create_story(&owner).await);
    let story = app.state.stories.get_story(id).await.unwrap().unwrap();

    app.state
        .views
        .spawn_record(&story, Some(viewer.id))
        .expect("inside a runtime")
        .await
        .unwrap();

    assert_eq!(app.repo.views().len(), 1);
}

// ===========================================================================
// Viewer list
// ===========================================================================

#[tokio::test]
async fn owner_lists_viewers_newest_first() {
    let app = app();
    let owner = app.create_user();
    let first = app.create_user();
    let second = app.create_user();
    let story = story_id(&app.create_story(&owner).await);

    app.post(&format!("/v1/stories/{}/seen", story), Some(&first.access_token))
        .await;
    app.clock.advance(Duration::minutes(3));
    app.post(&format!("/v1/stories/{}/seen", story), Some(&second.access_token))
        .await;

    let resp = app
        .get(&format!("/v1/stories/{}/viewers", story), Some(&owner.access_token))
        .await;
    assert_eq!(resp.status, StatusCode::OK);

    let body = resp.json();
    assert_eq!(body["view_count"], 2);
    let items = body["items"].as_array().unwrap();
    assert_eq!(items.len(), 2);
    assert_eq!(items[0]["viewer_id"], second.id.to_string());
    assert_eq!(items[1]["viewer_id"], first.id.to_string());
    assert!(body["next_cursor"].is_null());
}

#[tokio::test]
async fn viewers_paginate_with_cursor() {
    let app = app();
    let owner = app.create_user();
    let story = story_id(&app.create_story(&owner).await);

    for _ in 0..3 {
        let viewer = app.create_user();
        app.post(&format!("/v1/stories/{}/seen", story), Some(&viewer.access_token))
            .await;
        app.clock.advance(Duration::seconds(10));
    }

    let resp = app
        .get(
            &format!("/v1/stories/{}/viewers?limit=2", story),
            Some(&owner.access_token),
        )
        .await;
    let body = resp.json();
    assert_eq!(body["items"].as_array().unwrap().len(), 2);
    assert_eq!(body["view_count"], 3);
    let cursor = body["next_cursor"].as_str().unwrap().to_string();

    let resp = app
        .get(
            &format!(
                "/v1/stories/{}/viewers?limit=2&cursor={}",
                story,
                cursor.replace(':', "%3A").replace('+', "%2B")
            ),
            Some(&owner.access_token),
        )
        .await;
    assert_eq!(resp.status, StatusCode::OK);
    let body = resp.json();
    assert_eq!(body["items"].as_array().unwrap().len(), 1);
    assert!(body["next_cursor"].is_null());
}

#[tokio::test]
async fn only_owner_lists_viewers() {
    let app = app();
    let owner = app.create_user();
    let other = app.create_user();
    let story = story_id(&app.create_story(&owner).await);

    let resp = app
        .get(&format!("/v1/stories/{}/viewers", story), Some(&other.access_token))
        .await;
    assert_eq!(resp.status, StatusCode::FORBIDDEN);

    let resp = app.get(&format!("/v1/stories/{}/viewers", story), None).await;
    assert_eq!(resp.status, StatusCode::UNAUTHORIZED);

    let resp = app
        .get(
            &format!("/v1/stories/{}/viewers", Uuid::new_v4()),
            Some(&owner.access_token),
        )
        .await;
    assert_eq!(resp.status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn viewers_limit_is_validated() {
    let app = app();
    let owner = app.create_user();
    let story = story_id(&app.create_story(&owner).await);

    let resp = app
        .get(
            &format!("/v1/stories/{}/viewers?limit=0", story),
            Some(&owner.access_token),
        )
        .await;

    assert_eq!(resp.status, StatusCode::BAD_REQUEST);
    assert_eq!(resp.error_message(), "limit must be between 1 and 200");
}
