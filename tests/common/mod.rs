#![allow(dead_code)]

use axum::body::Body;
use axum::http::{Method, Request, StatusCode};
use axum::Router;
use bytes::Bytes;
use http_body_util::BodyExt;
use serde_json::Value;
use std::sync::Arc;
use time::OffsetDateTime;
use tower::ServiceExt;
use uuid::Uuid;

use ephemera::app::auth::AuthService;
use ephemera::app::intake::{MediaIntake, DEFAULT_IMAGE_MAX_BYTES, DEFAULT_VIDEO_MAX_BYTES};
use ephemera::app::stories::StoryService;
use ephemera::app::views::ViewLedger;
use ephemera::infra::memory::{ManualClock, MemoryObjectStore, MemoryStoryRepository};
use ephemera::AppState;

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

const TEST_ACCESS_KEY: [u8; 32] = *b"0123456789abcdef0123456789abcdef";
pub const PUBLIC_ENDPOINT: &str = "https://media.test";
pub const BUCKET: &str = "stories";
pub const MIB: usize = 1024 * 1024;

/// 2024-03-01T12:00:00Z
pub fn start_time() -> OffsetDateTime {
    OffsetDateTime::from_unix_timestamp(1_709_294_400).expect("valid timestamp")
}

// ---------------------------------------------------------------------------
// TestApp: in-memory backends and a manual clock, one per test
// ---------------------------------------------------------------------------

pub struct TestApp {
    router: Router,
    pub state: AppState,
    pub clock: ManualClock,
    pub repo: MemoryStoryRepository,
    pub storage: MemoryObjectStore,
}

pub struct TestResponse {
    pub status: StatusCode,
    body_bytes: Bytes,
}

impl TestResponse {
    pub fn json(&self) -> Value {
        serde_json::from_slice(&self.body_bytes).unwrap_or(Value::Null)
    }

    pub fn error_message(&self) -> String {
        self.json()["error"].as_str().unwrap_or("").to_string()
    }
}

pub struct TestUser {
    pub id: Uuid,
    pub access_token: String,
}

pub fn app() -> TestApp {
    TestApp::new()
}

impl TestApp {
    pub fn new() -> Self {
        let clock = ManualClock::new(start_time());
        let repo = MemoryStoryRepository::new(Arc::new(clock.clone()));
        let storage =
            MemoryObjectStore::new(PUBLIC_ENDPOINT, BUCKET).expect("valid public endpoint");

        let stories = StoryService::new(
            Arc::new(repo.clone()),
            Arc::new(storage.clone()),
            Arc::new(clock.clone()),
        );
        let state = AppState {
            stories,
            views: ViewLedger::new(Arc::new(repo.clone())),
            intake: MediaIntake::new(DEFAULT_IMAGE_MAX_BYTES, DEFAULT_VIDEO_MAX_BYTES),
            auth: AuthService::new(TEST_ACCESS_KEY, 15),
            cache: None,
        };
        let router = ephemera::http::router(state.clone());

        TestApp {
            router,
            state,
            clock,
            repo,
            storage,
        }
    }

    // ------------------------------------------------------------------
    // Low-level request helper
    // ------------------------------------------------------------------
    pub async fn request(
        &self,
        method: Method,
        path: &str,
        body: Body,
        headers: &[(&str, &str)],
    ) -> TestResponse {
        let mut builder = Request::builder()
            .method(method)
            .uri(path)
            .header("host", "localhost");

        for &(key, value) in headers {
            builder = builder.header(key, value);
        }

        let request = builder.body(body).expect("valid request");

        let response = self
            .router
            .clone()
            .oneshot(request)
            .await
            .expect("oneshot failed");

        let status = response.status();
        let body_bytes = response
            .into_body()
            .collect()
            .await
            .expect("failed to collect body")
            .to_bytes();

        TestResponse { status, body_bytes }
    }

    // ------------------------------------------------------------------
    // Convenience HTTP helpers
    // ------------------------------------------------------------------
    pub async fn get(&self, path: &str, token: Option<&str>) -> TestResponse {
        let auth = token.map(|t| format!("Bearer {}", t));
        let headers: Vec<(&str, &str)> = auth
            .iter()
            .map(|value| ("Authorization", value.as_str()))
            .collect();
        self.request(Method::GET, path, Body::empty(), &headers).await
    }

    pub async fn post(&self, path: &str, token: Option<&str>) -> TestResponse {
        let auth = token.map(|t| format!("Bearer {}", t));
        let headers: Vec<(&str, &str)> = auth
            .iter()
            .map(|value| ("Authorization", value.as_str()))
            .collect();
        self.request(Method::POST, path, Body::empty(), &headers).await
    }

    pub async fn delete(&self, path: &str, token: Option<&str>) -> TestResponse {
        let auth = token.map(|t| format!("Bearer {}", t));
        let headers: Vec<(&str, &str)> = auth
            .iter()
            .map(|value| ("Authorization", value.as_str()))
            .collect();
        self.request(Method::DELETE, path, Body::empty(), &headers).await
    }

    /// POST a raw media payload with the given content type.
    pub async fn post_media(
        &self,
        path: &str,
        content_type: &str,
        payload: Vec<u8>,
        token: Option<&str>,
    ) -> TestResponse {
        let auth = token.map(|t| format!("Bearer {}", t));
        let mut headers = vec![("content-type", content_type)];
        if let Some(value) = &auth {
            headers.push(("Authorization", value.as_str()));
        }
        self.request(Method::POST, path, Body::from(payload), &headers)
            .await
    }

    // ------------------------------------------------------------------
    // Test data helpers
    // ------------------------------------------------------------------

    pub fn create_user(&self) -> TestUser {
        let id = Uuid::new_v4();
        let access_token = self
            .state
            .auth
            .issue_access_token(id)
            .expect("issue_access_token failed");
        TestUser { id, access_token }
    }

    /// Create a small image story through the API and return its JSON.
    pub async fn create_story(&self, user: &TestUser) -> Value {
        let resp = self
            .post_media(
                "/v1/stories",
                "image/jpeg",
                vec![0xFF, 0xD8, 0xFF, 0xE0],
                Some(&user.access_token),
            )
            .await;
        assert_eq!(resp.status, StatusCode::CREATED, "{}", resp.error_message());
        resp.json()
    }

    pub fn follow(&self, follower: &TestUser, followee: &TestUser) {
        self.repo.follow(follower.id, followee.id);
    }
}

pub fn story_id(story: &Value) -> Uuid {
    Uuid::parse_str(story["id"].as_str().expect("story id")).expect("uuid")
}
