use async_trait::async_trait;
use serde::Serialize;
use sqlx::FromRow;
use thiserror::Error;
use time::OffsetDateTime;
use uuid::Uuid;

pub mod memory;
pub mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgStore;

/// User record. The password hash never leaves the server.
#[derive(Debug, Clone, Serialize, FromRow)]
pub struct User {
    pub id: Uuid,
    pub username: String,
    #[serde(skip_serializing)]
    pub password_hash: String,
    pub firstname: Option<String>,
    pub lastname: Option<String>,
    pub email: Option<String>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

#[derive(Debug, Clone)]
pub struct NewUser {
    pub username: String,
    pub password_hash: String,
    pub firstname: Option<String>,
    pub lastname: Option<String>,
    pub email: Option<String>,
}

#[derive(Debug, Clone, FromRow)]
pub struct Session {
    pub id: Uuid,
    pub user_id: Uuid,
    pub created_at: OffsetDateTime,
    pub expires_at: OffsetDateTime,
}

#[derive(Debug, Clone, PartialEq, Serialize, FromRow)]
pub struct Todo {
    pub id: Uuid,
    #[serde(rename = "owner")]
    pub owner_id: Uuid,
    pub goal_id: Uuid,
    pub item: String,
    pub position: i32,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

/// Goal with its todos resolved, ordered by position.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Goal {
    pub id: Uuid,
    #[serde(rename = "owner")]
    pub owner_id: Uuid,
    pub title: String,
    pub todos: Vec<Todo>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

impl Goal {
    pub fn todo_ids(&self) -> Vec<Uuid> {
        self.todos.iter().map(|t| t.id).collect()
    }
}

/// Already validated changes to a goal. `order` is a full permutation of the
/// goal's current todo ids.
#[derive(Debug, Clone, Default)]
pub struct GoalChanges {
    pub title: Option<String>,
    pub order: Option<Vec<Uuid>>,
}

#[derive(Debug, Clone, Default)]
pub struct TodoChanges {
    pub item: Option<String>,
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("{0} already exists")]
    Conflict(&'static str),
    #[error("{0} not found")]
    Missing(&'static str),
    #[error(transparent)]
    Database(#[from] sqlx::Error),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Durable storage for users, sessions, goals and todos.
///
/// Each method is one atomic operation: implementations that touch several
/// records (appending a todo, deleting a goal, reordering) either apply all
/// writes or none.
#[async_trait]
pub trait Store: Send + Sync {
    async fn insert_user(&self, user: NewUser) -> StoreResult<User>;
    async fn find_user(&self, id: Uuid) -> StoreResult<Option<User>>;
    async fn find_user_by_username(&self, username: &str) -> StoreResult<Option<User>>;

    async fn insert_session(&self, session: &Session) -> StoreResult<()>;
    async fn find_session(&self, id: Uuid) -> StoreResult<Option<Session>>;
    async fn delete_session(&self, id: Uuid) -> StoreResult<()>;

    async fn list_goals(&self, owner_id: Uuid) -> StoreResult<Vec<Goal>>;
    async fn find_goal(&self, id: Uuid) -> StoreResult<Option<Goal>>;
    async fn insert_goal(&self, owner_id: Uuid, title: &str) -> StoreResult<Goal>;
    async fn update_goal(&self, id: Uuid, changes: &GoalChanges) -> StoreResult<Goal>;
    /// Removes the goal together with all of its todos.
    async fn delete_goal(&self, id: Uuid) -> StoreResult<()>;

    async fn find_todo(&self, id: Uuid) -> StoreResult<Option<Todo>>;
    /// Creates a todo and appends it to the goal's sequence.
    async fn append_todo(&self, goal_id: Uuid, owner_id: Uuid, item: &str) -> StoreResult<(Goal, Todo)>;
    async fn update_todo(&self, id: Uuid, changes: &TodoChanges) -> StoreResult<Todo>;
    /// Removes the todo and detaches it from its goal.
    async fn delete_todo(&self, id: Uuid) -> StoreResult<()>;
}
