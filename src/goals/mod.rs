mod dto;
pub mod handlers;
pub mod services;

use crate::state::AppState;
use axum::Router;

pub use services::GoalService;

pub fn router() -> Router<AppState> {
    Router::new()
        .merge(handlers::goal_routes())
        .merge(handlers::todo_routes())
}
