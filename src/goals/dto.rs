use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::db::{Goal, Todo};

#[derive(Debug, Deserialize)]
pub struct CreateGoalRequest {
    #[serde(default)]
    pub title: Option<String>,
}

/// Partial update of a goal. `todos` reorders the goal's existing todos.
#[derive(Debug, Default, Deserialize)]
pub struct UpdateGoalRequest {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub todos: Option<Vec<Uuid>>,
}

#[derive(Debug, Deserialize)]
pub struct AddTodoRequest {
    #[serde(default)]
    pub item: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct UpdateTodoRequest {
    #[serde(default)]
    pub item: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct GoalListResponse {
    pub goals: Vec<Goal>,
}

#[derive(Debug, Serialize)]
pub struct GoalResponse {
    pub goal: Goal,
}

#[derive(Debug, Serialize)]
pub struct AddedTodoResponse {
    pub goal: Goal,
    pub todo: Todo,
}

#[derive(Debug, Serialize)]
pub struct TodoResponse {
    pub todo: Todo,
}
