use std::collections::HashMap;

use async_trait::async_trait;
use time::OffsetDateTime;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::{
    Goal, GoalChanges, NewUser, Session, Store, StoreError, StoreResult, Todo, TodoChanges, User,
};

struct GoalRecord {
    id: Uuid,
    owner_id: Uuid,
    title: String,
    todos: Vec<Uuid>,
    created_at: OffsetDateTime,
    updated_at: OffsetDateTime,
}

#[derive(Default)]
struct Tables {
    users: HashMap<Uuid, User>,
    sessions: HashMap<Uuid, Session>,
    // creation order
    goals: Vec<GoalRecord>,
    todos: HashMap<Uuid, Todo>,
}

impl Tables {
    fn goal_index(&self, id: Uuid) -> Option<usize> {
        self.goals.iter().position(|g| g.id == id)
    }

    fn resolve(&self, record: &GoalRecord) -> Goal {
        let todos = record
            .todos
            .iter()
            .filter_map(|id| self.todos.get(id).cloned())
            .collect();
        Goal {
            id: record.id,
            owner_id: record.owner_id,
            title: record.title.clone(),
            todos,
            created_at: record.created_at,
            updated_at: record.updated_at,
        }
    }

    fn renumber(&mut self, goal: usize) {
        for (position, id) in self.goals[goal].todos.iter().enumerate() {
            if let Some(todo) = self.todos.get_mut(id) {
                todo.position = position as i32;
            }
        }
    }
}

/// Process-local store. A single lock guards every table, so each trait
/// method observes and leaves a consistent state.
#[derive(Default)]
pub struct MemoryStore {
    tables: RwLock<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    #[cfg(test)]
    pub async fn todo_count(&self) -> usize {
        self.tables.read().await.todos.len()
    }

    #[cfg(test)]
    pub async fn user_count(&self) -> usize {
        self.tables.read().await.users.len()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn insert_user(&self, user: NewUser) -> StoreResult<User> {
        let mut t = self.tables.write().await;
        if t.users.values().any(|u| u.username == user.username) {
            return Err(StoreError::Conflict("username"));
        }
        let user = User {
            id: Uuid::new_v4(),
            username: user.username,
            password_hash: user.password_hash,
            firstname: user.firstname,
            lastname: user.lastname,
            email: user.email,
            created_at: OffsetDateTime::now_utc(),
        };
        t.users.insert(user.id, user.clone());
        Ok(user)
    }

    async fn find_user(&self, id: Uuid) -> StoreResult<Option<User>> {
        Ok(self.tables.read().await.users.get(&id).cloned())
    }

    async fn find_user_by_username(&self, username: &str) -> StoreResult<Option<User>> {
        let t = self.tables.read().await;
        Ok(t.users.values().find(|u| u.username == username).cloned())
    }

    async fn insert_session(&self, session: &Session) -> StoreResult<()> {
        let mut t = self.tables.write().await;
        t.sessions.insert(session.id, session.clone());
        Ok(())
    }

    async fn find_session(&self, id: Uuid) -> StoreResult<Option<Session>> {
        Ok(self.tables.read().await.sessions.get(&id).cloned())
    }

    async fn delete_session(&self, id: Uuid) -> StoreResult<()> {
        self.tables.write().await.sessions.remove(&id);
        Ok(())
    }

    async fn list_goals(&self, owner_id: Uuid) -> StoreResult<Vec<Goal>> {
        let t = self.tables.read().await;
        Ok(t.goals
            .iter()
            .filter(|g| g.owner_id == owner_id)
            .map(|g| t.resolve(g))
            .collect())
    }

    async fn find_goal(&self, id: Uuid) -> StoreResult<Option<Goal>> {
        let t = self.tables.read().await;
        Ok(t.goal_index(id).map(|i| t.resolve(&t.goals[i])))
    }

    async fn insert_goal(&self, owner_id: Uuid, title: &str) -> StoreResult<Goal> {
        let mut t = self.tables.write().await;
        let now = OffsetDateTime::now_utc();
        let record = GoalRecord {
            id: Uuid::new_v4(),
            owner_id,
            title: title.to_string(),
            todos: Vec::new(),
            created_at: now,
            updated_at: now,
        };
        let goal = t.resolve(&record);
        t.goals.push(record);
        Ok(goal)
    }

    async fn update_goal(&self, id: Uuid, changes: &GoalChanges) -> StoreResult<Goal> {
        let mut t = self.tables.write().await;
        let i = t.goal_index(id).ok_or(StoreError::Missing("goal"))?;

        if let Some(order) = &changes.order {
            let mut current = t.goals[i].todos.clone();
            let mut wanted = order.clone();
            current.sort();
            wanted.sort();
            if current != wanted {
                return Err(StoreError::Missing("todo"));
            }
        }

        let goal = &mut t.goals[i];
        if let Some(title) = &changes.title {
            goal.title = title.clone();
        }
        if let Some(order) = &changes.order {
            goal.todos = order.clone();
        }
        goal.updated_at = OffsetDateTime::now_utc();
        t.renumber(i);
        Ok(t.resolve(&t.goals[i]))
    }

    async fn delete_goal(&self, id: Uuid) -> StoreResult<()> {
        let mut t = self.tables.write().await;
        let i = t.goal_index(id).ok_or(StoreError::Missing("goal"))?;
        let record = t.goals.remove(i);
        for todo_id in &record.todos {
            t.todos.remove(todo_id);
        }
        Ok(())
    }

    async fn find_todo(&self, id: Uuid) -> StoreResult<Option<Todo>> {
        Ok(self.tables.read().await.todos.get(&id).cloned())
    }

    async fn append_todo(&self, goal_id: Uuid, owner_id: Uuid, item: &str) -> StoreResult<(Goal, Todo)> {
        let mut t = self.tables.write().await;
        let i = t.goal_index(goal_id).ok_or(StoreError::Missing("goal"))?;
        let now = OffsetDateTime::now_utc();
        let todo = Todo {
            id: Uuid::new_v4(),
            owner_id,
            goal_id,
            item: item.to_string(),
            position: t.goals[i].todos.len() as i32,
            created_at: now,
        };
        t.todos.insert(todo.id, todo.clone());
        let goal = &mut t.goals[i];
        goal.todos.push(todo.id);
        goal.updated_at = now;
        Ok((t.resolve(&t.goals[i]), todo))
    }

    async fn update_todo(&self, id: Uuid, changes: &TodoChanges) -> StoreResult<Todo> {
        let mut t = self.tables.write().await;
        let todo = t.todos.get_mut(&id).ok_or(StoreError::Missing("todo"))?;
        if let Some(item) = &changes.item {
            todo.item = item.clone();
        }
        Ok(todo.clone())
    }

    async fn delete_todo(&self, id: Uuid) -> StoreResult<()> {
        let mut t = self.tables.write().await;
        let todo = t.todos.remove(&id).ok_or(StoreError::Missing("todo"))?;
        if let Some(i) = t.goal_index(todo.goal_id) {
            t.goals[i].todos.retain(|other| *other != id);
            t.goals[i].updated_at = OffsetDateTime::now_utc();
            t.renumber(i);
        }
        Ok(())
    }
}
