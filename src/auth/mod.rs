use crate::state::AppState;
use axum::Router;
use uuid::Uuid;

mod dto;
pub(crate) mod extractors;
pub mod handlers;
pub mod jwt;
pub mod services;

pub use extractors::AuthUser;
pub use services::{Authenticator, SessionAuthenticator};

/// Identity of the authenticated caller, passed explicitly into every
/// resource operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RequestContext {
    pub user_id: Uuid,
    pub session_id: Uuid,
}

pub fn router() -> Router<AppState> {
    Router::new()
        .merge(handlers::auth_routes())
        .merge(handlers::me_routes())
}
