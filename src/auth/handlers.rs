use axum::{
    extract::State,
    http::{header, StatusCode},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use time::OffsetDateTime;
use tracing::{info, instrument, warn};

use crate::{
    auth::{
        dto::{AuthResponse, PublicUser, SigninRequest, SignupRequest},
        extractors::{cleared_session_cookie, session_cookie, AuthUser},
        services::{register, IssuedSession},
    },
    db::User,
    error::{AppError, AppResult},
    extract::ApiJson,
    state::AppState,
};

pub fn auth_routes() -> Router<AppState> {
    Router::new()
        .route("/signup", post(signup))
        .route("/signin", post(signin))
        .route("/signout", get(signout))
}

pub fn me_routes() -> Router<AppState> {
    Router::new().route("/api/me", get(get_me))
}

fn session_response(status: StatusCode, user: User, session: IssuedSession) -> impl IntoResponse {
    let max_age = (session.expires_at - OffsetDateTime::now_utc()).whole_seconds().max(0);
    let cookie = session_cookie(&session.token, max_age);
    (
        status,
        [(header::SET_COOKIE, cookie)],
        Json(AuthResponse {
            token: session.token,
            expires_at: session.expires_at,
            user: PublicUser::from(user),
        }),
    )
}

#[instrument(skip(state, payload), fields(username = %payload.username))]
pub async fn signup(
    State(state): State<AppState>,
    ApiJson(payload): ApiJson<SignupRequest>,
) -> AppResult<impl IntoResponse> {
    let (user, session) = register(state.store.as_ref(), state.auth.as_ref(), payload).await?;
    Ok(session_response(StatusCode::CREATED, user, session))
}

#[instrument(skip(state, payload), fields(username = %payload.username))]
pub async fn signin(
    State(state): State<AppState>,
    ApiJson(payload): ApiJson<SigninRequest>,
) -> AppResult<impl IntoResponse> {
    let user = state
        .auth
        .verify_credentials(&payload.username, &payload.password)
        .await?;
    let session = state.auth.create_session(user.id).await?;
    info!(user_id = %user.id, session_id = %session.session_id, "user signed in");
    Ok(session_response(StatusCode::OK, user, session))
}

#[instrument(skip(state, ctx), fields(user_id = %ctx.user_id))]
pub async fn signout(
    State(state): State<AppState>,
    AuthUser(ctx): AuthUser,
) -> AppResult<impl IntoResponse> {
    state.auth.end_session(&ctx).await?;
    Ok((
        StatusCode::NO_CONTENT,
        [(header::SET_COOKIE, cleared_session_cookie())],
    ))
}

#[instrument(skip(state, ctx), fields(user_id = %ctx.user_id))]
pub async fn get_me(
    State(state): State<AppState>,
    AuthUser(ctx): AuthUser,
) -> AppResult<Json<PublicUser>> {
    let Some(user) = state.store.find_user(ctx.user_id).await? else {
        warn!("session refers to a missing user");
        return Err(AppError::unauthorized("User not found"));
    };
    Ok(Json(PublicUser::from(user)))
}

#[cfg(test)]
mod me_tests {
    use super::*;

    #[test]
    fn public_user_hides_password_hash() {
        let user = User {
            id: uuid::Uuid::new_v4(),
            username: "ada".into(),
            password_hash: "$argon2id$secret".into(),
            firstname: Some("Ada".into()),
            lastname: None,
            email: None,
            created_at: OffsetDateTime::now_utc(),
        };

        let json = serde_json::to_string(&PublicUser::from(user.clone())).unwrap();
        assert!(json.contains("\"username\":\"ada\""));
        assert!(!json.contains("argon2"));

        let raw = serde_json::to_string(&user).unwrap();
        assert!(!raw.contains("password_hash"));
    }
}
