pub mod app;
pub mod config;
pub mod domain;
pub mod http;
pub mod infra;

use crate::app::auth::AuthService;
use crate::app::intake::MediaIntake;
use crate::app::stories::StoryService;
use crate::app::views::ViewLedger;
use crate::infra::cache::RedisCache;

#[derive(Clone)]
pub struct AppState {
    pub stories: StoryService,
    pub views: ViewLedger,
    pub intake: MediaIntake,
    pub auth: AuthService,
    pub cache: Option<RedisCache>,
}
