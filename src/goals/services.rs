use std::{collections::HashSet, sync::Arc};

use tracing::{info, warn};
use uuid::Uuid;

use super::dto::{UpdateGoalRequest, UpdateTodoRequest};
use crate::{
    auth::RequestContext,
    db::{Goal, GoalChanges, Store, Todo, TodoChanges},
    error::{AppError, AppResult},
};

/// Goal and todo operations scoped to the calling user.
///
/// Every mutation loads the target first, answers `NotFound` when it is
/// absent and `Forbidden` when it belongs to someone else. Nothing is written
/// in either case. Request fields are validated only after those checks.
#[derive(Clone)]
pub struct GoalService {
    store: Arc<dyn Store>,
}

fn required_text(value: Option<&str>, field: &str) -> AppResult<String> {
    match value.map(str::trim) {
        Some(v) if !v.is_empty() => Ok(v.to_string()),
        _ => Err(AppError::validation(format!("{field} is required"))),
    }
}

fn ensure_owner(ctx: &RequestContext, owner_id: Uuid, what: &str, id: Uuid) -> AppResult<()> {
    if owner_id != ctx.user_id {
        warn!(user_id = %ctx.user_id, %id, "{what} belongs to another user");
        return Err(AppError::Forbidden(format!("{what} belongs to another user")));
    }
    Ok(())
}

/// Checks that `order` lists exactly the goal's current todos.
fn validate_order(goal: &Goal, order: &[Uuid]) -> AppResult<()> {
    let current: HashSet<Uuid> = goal.todo_ids().into_iter().collect();
    let wanted: HashSet<Uuid> = order.iter().copied().collect();
    if wanted.len() != order.len() || current != wanted {
        return Err(AppError::validation(
            "todos must list each of the goal's todos exactly once",
        ));
    }
    Ok(())
}

impl GoalService {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    async fn owned_goal(&self, ctx: &RequestContext, goal_id: Uuid) -> AppResult<Goal> {
        let goal = self
            .store
            .find_goal(goal_id)
            .await?
            .ok_or_else(|| AppError::NotFound("Goal not found".into()))?;
        ensure_owner(ctx, goal.owner_id, "Goal", goal_id)?;
        Ok(goal)
    }

    async fn owned_todo(&self, ctx: &RequestContext, todo_id: Uuid) -> AppResult<Todo> {
        let todo = self
            .store
            .find_todo(todo_id)
            .await?
            .ok_or_else(|| AppError::NotFound("Todo not found".into()))?;
        ensure_owner(ctx, todo.owner_id, "Todo", todo_id)?;
        Ok(todo)
    }

    pub async fn list_goals(&self, ctx: &RequestContext) -> AppResult<Vec<Goal>> {
        Ok(self.store.list_goals(ctx.user_id).await?)
    }

    pub async fn create_goal(&self, ctx: &RequestContext, title: Option<&str>) -> AppResult<Goal> {
        let title = required_text(title, "title")?;
        let goal = self.store.insert_goal(ctx.user_id, &title).await?;
        info!(user_id = %ctx.user_id, goal_id = %goal.id, "goal created");
        Ok(goal)
    }

    pub async fn update_goal(
        &self,
        ctx: &RequestContext,
        goal_id: Uuid,
        patch: UpdateGoalRequest,
    ) -> AppResult<Goal> {
        let goal = self.owned_goal(ctx, goal_id).await?;
        if patch.title.is_none() && patch.todos.is_none() {
            return Err(AppError::validation("nothing to update"));
        }

        let title = match patch.title.as_deref() {
            Some(t) => Some(required_text(Some(t), "title")?),
            None => None,
        };
        if let Some(order) = &patch.todos {
            validate_order(&goal, order)?;
        }

        let changes = GoalChanges {
            title,
            order: patch.todos,
        };
        let goal = self.store.update_goal(goal_id, &changes).await?;
        info!(user_id = %ctx.user_id, %goal_id, "goal updated");
        Ok(goal)
    }

    /// Deletes the goal and every todo attached to it.
    pub async fn delete_goal(&self, ctx: &RequestContext, goal_id: Uuid) -> AppResult<()> {
        let goal = self.owned_goal(ctx, goal_id).await?;
        self.store.delete_goal(goal_id).await?;
        info!(user_id = %ctx.user_id, %goal_id, todos = goal.todos.len(), "goal deleted");
        Ok(())
    }

    /// Creates a todo owned by the caller and appends it to the goal. The
    /// insert and the goal update are one store operation.
    pub async fn add_todo(
        &self,
        ctx: &RequestContext,
        goal_id: Uuid,
        item: Option<&str>,
    ) -> AppResult<(Goal, Todo)> {
        self.owned_goal(ctx, goal_id).await?;
        let item = required_text(item, "item")?;
        let (goal, todo) = self.store.append_todo(goal_id, ctx.user_id, &item).await?;
        info!(user_id = %ctx.user_id, %goal_id, todo_id = %todo.id, "todo added");
        Ok((goal, todo))
    }

    pub async fn update_todo(
        &self,
        ctx: &RequestContext,
        todo_id: Uuid,
        patch: UpdateTodoRequest,
    ) -> AppResult<Todo> {
        self.owned_todo(ctx, todo_id).await?;
        let Some(item) = patch.item.as_deref() else {
            return Err(AppError::validation("nothing to update"));
        };
        let item = required_text(Some(item), "item")?;
        let todo = self
            .store
            .update_todo(todo_id, &TodoChanges { item: Some(item) })
            .await?;
        info!(user_id = %ctx.user_id, %todo_id, "todo updated");
        Ok(todo)
    }

    pub async fn delete_todo(&self, ctx: &RequestContext, todo_id: Uuid) -> AppResult<()> {
        self.owned_todo(ctx, todo_id).await?;
        self.store.delete_todo(todo_id).await?;
        info!(user_id = %ctx.user_id, %todo_id, "todo deleted");
        Ok(())
    }
}
