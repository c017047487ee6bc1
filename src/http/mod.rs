use axum::Router;

use crate::AppState;

mod auth;
mod error;
mod handlers;
mod routes;

pub use auth::{AdminUser, AuthUser};
pub use error::AppError;

pub fn router(state: AppState) -> Router {
    Router::new()
        .merge(routes::health())
        .merge(routes::auth())
        .merge(routes::tiers())
        .merge(routes::feed())
        .merge(routes::posts())
        .merge(routes::creators())
        .merge(routes::uploads())
        .merge(routes::stories())
        .merge(routes::admin())
        .with_state(state)
}
