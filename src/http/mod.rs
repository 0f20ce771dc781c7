use axum::Router;

use crate::AppState;

mod auth;
mod error;
mod handlers;
mod routes;

pub use auth::{AuthUser, MaybeAuthUser};
pub use error::AppError;

pub fn router(state: AppState) -> Router {
    Router::new()
        .merge(routes::health())
        .nest("/v1", routes::stories().merge(routes::feed()))
        .with_state(state)
}
