use axum::{
    extract::State,
    http::StatusCode,
    routing::{get, post, put},
    Json, Router,
};
use tracing::instrument;
use uuid::Uuid;

use super::dto::{
    AddTodoRequest, AddedTodoResponse, CreateGoalRequest, GoalListResponse, GoalResponse,
    TodoResponse, UpdateGoalRequest, UpdateTodoRequest,
};
use crate::{
    auth::AuthUser,
    error::AppResult,
    extract::{ApiJson, ApiPath},
    state::AppState,
};

pub fn goal_routes() -> Router<AppState> {
    Router::new()
        .route("/api/goals", get(list_goals).post(create_goal))
        .route("/api/goals/:id", put(update_goal).delete(delete_goal))
        .route("/api/goals/:id/todo", post(add_todo))
}

pub fn todo_routes() -> Router<AppState> {
    Router::new().route("/api/goals/todos/:id", put(update_todo).delete(delete_todo))
}

#[instrument(skip(state, ctx), fields(user_id = %ctx.user_id))]
pub async fn list_goals(
    State(state): State<AppState>,
    AuthUser(ctx): AuthUser,
) -> AppResult<Json<GoalListResponse>> {
    let goals = state.goals.list_goals(&ctx).await?;
    Ok(Json(GoalListResponse { goals }))
}

#[instrument(skip(state, ctx, body), fields(user_id = %ctx.user_id))]
pub async fn create_goal(
    State(state): State<AppState>,
    AuthUser(ctx): AuthUser,
    ApiJson(body): ApiJson<CreateGoalRequest>,
) -> AppResult<(StatusCode, Json<GoalResponse>)> {
    let goal = state.goals.create_goal(&ctx, body.title.as_deref()).await?;
    Ok((StatusCode::CREATED, Json(GoalResponse { goal })))
}

#[instrument(skip(state, ctx, body), fields(user_id = %ctx.user_id))]
pub async fn update_goal(
    State(state): State<AppState>,
    AuthUser(ctx): AuthUser,
    ApiPath(id): ApiPath<Uuid>,
    ApiJson(body): ApiJson<UpdateGoalRequest>,
) -> AppResult<Json<GoalResponse>> {
    let goal = state.goals.update_goal(&ctx, id, body).await?;
    Ok(Json(GoalResponse { goal }))
}

#[instrument(skip(state, ctx), fields(user_id = %ctx.user_id))]
pub async fn delete_goal(
    State(state): State<AppState>,
    AuthUser(ctx): AuthUser,
    ApiPath(id): ApiPath<Uuid>,
) -> AppResult<StatusCode> {
    state.goals.delete_goal(&ctx, id).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[instrument(skip(state, ctx, body), fields(user_id = %ctx.user_id))]
pub async fn add_todo(
    State(state): State<AppState>,
    AuthUser(ctx): AuthUser,
    ApiPath(id): ApiPath<Uuid>,
    ApiJson(body): ApiJson<AddTodoRequest>,
) -> AppResult<(StatusCode, Json<AddedTodoResponse>)> {
    let (goal, todo) = state.goals.add_todo(&ctx, id, body.item.as_deref()).await?;
    Ok((StatusCode::CREATED, Json(AddedTodoResponse { goal, todo })))
}

#[instrument(skip(state, ctx, body), fields(user_id = %ctx.user_id))]
pub async fn update_todo(
    State(state): State<AppState>,
    AuthUser(ctx): AuthUser,
    ApiPath(id): ApiPath<Uuid>,
    ApiJson(body): ApiJson<UpdateTodoRequest>,
) -> AppResult<Json<TodoResponse>> {
    let todo = state.goals.update_todo(&ctx, id, body).await?;
    Ok(Json(TodoResponse { todo }))
}

#[instrument(skip(state, ctx), fields(user_id = %ctx.user_id))]
pub async fn delete_todo(
    State(state): State<AppState>,
    AuthUser(ctx): AuthUser,
    ApiPath(id): ApiPath<Uuid>,
) -> AppResult<StatusCode> {
    state.goals.delete_todo(&ctx, id).await?;
    Ok(StatusCode::NO_CONTENT)
}
