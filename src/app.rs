use std::time::Duration;

use axum::{
    extract::MatchedPath,
    http::{Request, Response},
    routing::get,
    Router,
};
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::state::AppState;
use crate::{auth, goals};

pub fn build_app(state: AppState) -> Router {
    Router::new()
        .merge(auth::router())
        .merge(goals::router())
        .route("/health", get(|| async { "ok" }))
        .with_state(state)
        .layer(CorsLayer::permissive())
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(|req: &Request<_>| {
                    // route template, not the concrete uri
                    let route = req
                        .extensions()
                        .get::<MatchedPath>()
                        .map(MatchedPath::as_str)
                        .unwrap_or("unmatched");
                    tracing::info_span!(
                        "http_request",
                        method = %req.method(),
                        route,
                        status = tracing::field::Empty,
                        latency_ms = tracing::field::Empty,
                    )
                })
                .on_response(|res: &Response<_>, latency: Duration, span: &tracing::Span| {
                    let status = res.status();
                    span.record("status", tracing::field::display(status));
                    span.record("latency_ms", latency.as_millis() as u64);
                    if status.is_server_error() {
                        tracing::error!(%status, "response");
                    } else if status.is_client_error() {
                        tracing::debug!(%status, "response");
                    } else {
                        tracing::info!(%status, "response");
                    }
                }),
        )
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{
        body::Body,
        http::{header, Method, Request, StatusCode},
        response::Response,
    };
    use serde_json::{json, Value};
    use tower::ServiceExt;

    async fn send(app: &Router, method: Method, uri: &str, token: Option<&str>, body: Option<Value>) -> Response {
        let mut req = Request::builder().method(method).uri(uri);
        if let Some(token) = token {
            req = req.header(header::AUTHORIZATION, format!("Bearer {token}"));
        }
        let req = match body {
            Some(v) => req
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(v.to_string()))
                .unwrap(),
            None => req.body(Body::empty()).unwrap(),
        };
        app.clone().oneshot(req).await.unwrap()
    }

    async fn json_body(res: Response) -> Value {
        let bytes = axum::body::to_bytes(res.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    async fn signup(app: &Router, username: &str) -> String {
        let res = send(
            app,
            Method::POST,
            "/signup",
            None,
            Some(json!({ "username": username, "password": "secret1", "first-name": "Test" })),
        )
        .await;
        assert_eq!(res.status(), StatusCode::CREATED);
        let cookie = res.headers()[header::SET_COOKIE].to_str().unwrap().to_string();
        assert!(cookie.starts_with("session="));
        let body = json_body(res).await;
        assert_eq!(body["user"]["firstname"], "Test");
        body["token"].as_str().unwrap().to_string()
    }

    #[tokio::test]
    async fn health_is_public() {
        let app = build_app(AppState::fake());
        let res = send(&app, Method::GET, "/health", None, None).await;
        assert_eq!(res.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn goals_require_a_session() {
        let app = build_app(AppState::fake());
        let res = send(&app, Method::GET, "/api/goals", None, None).await;
        assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
        let res = send(&app, Method::GET, "/api/goals", Some("bogus"), None).await;
        assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(json_body(res).await["code"], "UNAUTHORIZED");
    }

    #[tokio::test]
    async fn goal_and_todo_lifecycle() {
        let app = build_app(AppState::fake());
        let token = signup(&app, "alice").await;

        let res = send(&app, Method::POST, "/api/goals", Some(&token), Some(json!({ "title": "Groceries" }))).await;
        assert_eq!(res.status(), StatusCode::CREATED);
        let goal_id = json_body(res).await["goal"]["id"].as_str().unwrap().to_string();

        let uri = format!("/api/goals/{goal_id}/todo");
        let res = send(&app, Method::POST, &uri, Some(&token), Some(json!({ "item": "buy milk" }))).await;
        assert_eq!(res.status(), StatusCode::CREATED);
        let body = json_body(res).await;
        let todo_id = body["todo"]["id"].as_str().unwrap().to_string();
        assert_eq!(body["goal"]["todos"][0]["item"], "buy milk");

        let uri = format!("/api/goals/todos/{todo_id}");
        let res = send(&app, Method::PUT, &uri, Some(&token), Some(json!({ "item": "buy oat milk" }))).await;
        assert_eq!(res.status(), StatusCode::OK);

        let res = send(&app, Method::GET, "/api/goals", Some(&token), None).await;
        let body = json_body(res).await;
        assert_eq!(body["goals"].as_array().unwrap().len(), 1);
        assert_eq!(body["goals"][0]["title"], "Groceries");
        assert_eq!(body["goals"][0]["todos"][0]["item"], "buy oat milk");

        let uri = format!("/api/goals/{goal_id}");
        let res = send(&app, Method::DELETE, &uri, Some(&token), None).await;
        assert_eq!(res.status(), StatusCode::NO_CONTENT);

        let uri = format!("/api/goals/todos/{todo_id}");
        let res = send(&app, Method::DELETE, &uri, Some(&token), None).await;
        assert_eq!(res.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn other_users_goals_are_forbidden() {
        let app = build_app(AppState::fake());
        let alice = signup(&app, "alice").await;
        let bob = signup(&app, "bob").await;

        let res = send(&app, Method::POST, "/api/goals", Some(&alice), Some(json!({ "title": "Private" }))).await;
        let goal_id = json_body(res).await["goal"]["id"].as_str().unwrap().to_string();

        let uri = format!("/api/goals/{goal_id}");
        let res = send(&app, Method::PUT, &uri, Some(&bob), Some(json!({ "title": "Mine" }))).await;
        assert_eq!(res.status(), StatusCode::FORBIDDEN);
        let res = send(&app, Method::DELETE, &uri, Some(&bob), None).await;
        assert_eq!(res.status(), StatusCode::FORBIDDEN);

        let res = send(&app, Method::GET, "/api/goals", Some(&bob), None).await;
        assert!(json_body(res).await["goals"].as_array().unwrap().is_empty());
    }

    #[tokio::test]
    async fn missing_title_is_a_validation_error() {
        let app = build_app(AppState::fake());
        let token = signup(&app, "alice").await;
        let res = send(&app, Method::POST, "/api/goals", Some(&token), Some(json!({}))).await;
        assert_eq!(res.status(), StatusCode::BAD_REQUEST);
        assert_eq!(json_body(res).await["code"], "VALIDATION_ERROR");
    }

    #[tokio::test]
    async fn duplicate_signup_conflicts() {
        let app = build_app(AppState::fake());
        signup(&app, "alice").await;
        let res = send(
            &app,
            Method::POST,
            "/signup",
            None,
            Some(json!({ "username": "alice", "password": "another" })),
        )
        .await;
        assert_eq!(res.status(), StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn signin_me_and_signout() {
        let app = build_app(AppState::fake());
        signup(&app, "alice").await;

        let res = send(
            &app,
            Method::POST,
            "/signin",
            None,
            Some(json!({ "username": "alice", "password": "wrong!" })),
        )
        .await;
        assert_eq!(res.status(), StatusCode::UNAUTHORIZED);

        let res = send(
            &app,
            Method::POST,
            "/signin",
            None,
            Some(json!({ "username": "alice", "password": "secret1" })),
        )
        .await;
        assert_eq!(res.status(), StatusCode::OK);
        let token = json_body(res).await["token"].as_str().unwrap().to_string();

        let res = send(&app, Method::GET, "/api/me", Some(&token), None).await;
        assert_eq!(res.status(), StatusCode::OK);
        assert_eq!(json_body(res).await["username"], "alice");

        let res = send(&app, Method::GET, "/signout", Some(&token), None).await;
        assert_eq!(res.status(), StatusCode::NO_CONTENT);
        let cookie = res.headers()[header::SET_COOKIE].to_str().unwrap();
        assert!(cookie.contains("Max-Age=0"));

        let res = send(&app, Method::GET, "/api/goals", Some(&token), None).await;
        assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn session_cookie_authenticates() {
        let app = build_app(AppState::fake());
        let token = signup(&app, "alice").await;
        let req = Request::builder()
            .uri("/api/goals")
            .header(header::COOKIE, format!("session={token}"))
            .body(Body::empty())
            .unwrap();
        let res = app.oneshot(req).await.unwrap();
        assert_eq!(res.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn malformed_input_gets_a_json_validation_error() {
        let app = build_app(AppState::fake());
        let token = signup(&app, "alice").await;

        let res = send(&app, Method::POST, "/api/goals", Some(&token), Some(json!({ "title": 5 }))).await;
        assert_eq!(res.status(), StatusCode::BAD_REQUEST);
        assert_eq!(json_body(res).await["code"], "VALIDATION_ERROR");

        let res = send(&app, Method::PUT, "/api/goals/abc", Some(&token), Some(json!({ "title": "x" }))).await;
        assert_eq!(res.status(), StatusCode::BAD_REQUEST);
        assert_eq!(json_body(res).await["code"], "VALIDATION_ERROR");

        let res = send(&app, Method::DELETE, "/api/goals/todos/not-a-uuid", Some(&token), None).await;
        assert_eq!(res.status(), StatusCode::BAD_REQUEST);
        assert_eq!(json_body(res).await["code"], "VALIDATION_ERROR");

        let res = send(&app, Method::POST, "/signup", None, Some(json!({ "username": "bob" }))).await;
        assert_eq!(res.status(), StatusCode::BAD_REQUEST);
        let body = json_body(res).await;
        assert_eq!(body["code"], "VALIDATION_ERROR");
        assert!(body["error"].as_str().unwrap().contains("password"));
    }

    #[tokio::test]
    async fn unknown_goal_is_not_found_whatever_the_body() {
        let app = build_app(AppState::fake());
        let token = signup(&app, "alice").await;
        let missing = uuid::Uuid::new_v4();

        let uri = format!("/api/goals/{missing}/todo");
        let res = send(&app, Method::POST, &uri, Some(&token), Some(json!({}))).await;
        assert_eq!(res.status(), StatusCode::NOT_FOUND);

        let uri = format!("/api/goals/{missing}");
        let res = send(&app, Method::PUT, &uri, Some(&token), Some(json!({}))).await;
        assert_eq!(res.status(), StatusCode::NOT_FOUND);
        assert_eq!(json_body(res).await["code"], "NOT_FOUND");
    }
}
