use std::collections::HashMap;

use async_trait::async_trait;
use sqlx::{FromRow, PgConnection, PgPool};
use time::OffsetDateTime;
use uuid::Uuid;

use super::{
    Goal, GoalChanges, NewUser, Session, Store, StoreError, StoreResult, Todo, TodoChanges, User,
};

#[derive(Debug, FromRow)]
struct GoalRow {
    id: Uuid,
    owner_id: Uuid,
    title: String,
    created_at: OffsetDateTime,
    updated_at: OffsetDateTime,
}

impl GoalRow {
    fn with_todos(self, todos: Vec<Todo>) -> Goal {
        Goal {
            id: self.id,
            owner_id: self.owner_id,
            title: self.title,
            todos,
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }
}

/// PostgreSQL-backed store. Multi-record writes run in one transaction.
#[derive(Clone)]
pub struct PgStore {
    db: PgPool,
}

impl PgStore {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }
}

fn unique_violation(e: sqlx::Error, what: &'static str) -> StoreError {
    match &e {
        sqlx::Error::Database(db_err) if db_err.is_unique_violation() => StoreError::Conflict(what),
        _ => StoreError::Database(e),
    }
}

async fn todos_of(conn: &mut PgConnection, goal_ids: &[Uuid]) -> Result<Vec<Todo>, sqlx::Error> {
    sqlx::query_as::<_, Todo>(
        r#"
        SELECT id, owner_id, goal_id, item, position, created_at
          FROM todos
         WHERE goal_id = ANY($1)
         ORDER BY goal_id, position ASC
        "#,
    )
    .bind(goal_ids)
    .fetch_all(conn)
    .await
}

async fn load_goal(conn: &mut PgConnection, id: Uuid, lock: bool) -> Result<Option<GoalRow>, sqlx::Error> {
    let sql = if lock {
        "SELECT id, owner_id, title, created_at, updated_at FROM goals WHERE id = $1 FOR UPDATE"
    } else {
        "SELECT id, owner_id, title, created_at, updated_at FROM goals WHERE id = $1"
    };
    sqlx::query_as::<_, GoalRow>(sql)
        .bind(id)
        .fetch_optional(conn)
        .await
}

async fn touch_goal(conn: &mut PgConnection, id: Uuid) -> Result<Option<GoalRow>, sqlx::Error> {
    sqlx::query_as::<_, GoalRow>(
        r#"
        UPDATE goals
           SET updated_at = now()
         WHERE id = $1
        RETURNING id, owner_id, title, created_at, updated_at
        "#,
    )
    .bind(id)
    .fetch_optional(conn)
    .await
}

#[async_trait]
impl Store for PgStore {
    async fn insert_user(&self, user: NewUser) -> StoreResult<User> {
        sqlx::query_as::<_, User>(
            r#"
            INSERT INTO users (id, username, password_hash, firstname, lastname, email)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING id, username, password_hash, firstname, lastname, email, created_at
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(&user.username)
        .bind(&user.password_hash)
        .bind(&user.firstname)
        .bind(&user.lastname)
        .bind(&user.email)
        .fetch_one(&self.db)
        .await
        .map_err(|e| unique_violation(e, "username"))
    }

    async fn find_user(&self, id: Uuid) -> StoreResult<Option<User>> {
        let user = sqlx::query_as::<_, User>(
            r#"
            SELECT id, username, password_hash, firstname, lastname, email, created_at
            FROM users
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.db)
        .await?;
        Ok(user)
    }

    async fn find_user_by_username(&self, username: &str) -> StoreResult<Option<User>> {
        let user = sqlx::query_as::<_, User>(
            r#"
            SELECT id, username, password_hash, firstname, lastname, email, created_at
            FROM users
            WHERE username = $1
            "#,
        )
        .bind(username)
        .fetch_optional(&self.db)
        .await?;
        Ok(user)
    }

    async fn insert_session(&self, session: &Session) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO sessions (id, user_id, created_at, expires_at)
            VALUES ($1, $2, $3, $4)
            "#,
        )
        .bind(session.id)
        .bind(session.user_id)
        .bind(session.created_at)
        .bind(session.expires_at)
        .execute(&self.db)
        .await?;
        Ok(())
    }

    async fn find_session(&self, id: Uuid) -> StoreResult<Option<Session>> {
        let session = sqlx::query_as::<_, Session>(
            r#"SELECT id, user_id, created_at, expires_at FROM sessions WHERE id = $1"#,
        )
        .bind(id)
        .fetch_optional(&self.db)
        .await?;
        Ok(session)
    }

    async fn delete_session(&self, id: Uuid) -> StoreResult<()> {
        sqlx::query("DELETE FROM sessions WHERE id = $1")
            .bind(id)
            .execute(&self.db)
            .await?;
        Ok(())
    }

    async fn list_goals(&self, owner_id: Uuid) -> StoreResult<Vec<Goal>> {
        let mut conn = self.db.acquire().await?;
        let rows = sqlx::query_as::<_, GoalRow>(
            r#"
            SELECT id, owner_id, title, created_at, updated_at
              FROM goals
             WHERE owner_id = $1
             ORDER BY created_at ASC, id ASC
            "#,
        )
        .bind(owner_id)
        .fetch_all(&mut *conn)
        .await?;

        let ids: Vec<Uuid> = rows.iter().map(|g| g.id).collect();
        let mut by_goal: HashMap<Uuid, Vec<Todo>> = HashMap::new();
        for todo in todos_of(&mut conn, &ids).await? {
            by_goal.entry(todo.goal_id).or_default().push(todo);
        }

        Ok(rows
            .into_iter()
            .map(|g| {
                let todos = by_goal.remove(&g.id).unwrap_or_default();
                g.with_todos(todos)
            })
            .collect())
    }

    async fn find_goal(&self, id: Uuid) -> StoreResult<Option<Goal>> {
        let mut conn = self.db.acquire().await?;
        let Some(row) = load_goal(&mut conn, id, false).await? else {
            return Ok(None);
        };
        let todos = todos_of(&mut conn, &[id]).await?;
        Ok(Some(row.with_todos(todos)))
    }

    async fn insert_goal(&self, owner_id: Uuid, title: &str) -> StoreResult<Goal> {
        let row = sqlx::query_as::<_, GoalRow>(
            r#"
            INSERT INTO goals (id, owner_id, title)
            VALUES ($1, $2, $3)
            RETURNING id, owner_id, title, created_at, updated_at
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(owner_id)
        .bind(title)
        .fetch_one(&self.db)
        .await?;
        Ok(row.with_todos(Vec::new()))
    }

    async fn update_goal(&self, id: Uuid, changes: &GoalChanges) -> StoreResult<Goal> {
        let mut tx = self.db.begin().await?;
        load_goal(&mut tx, id, true)
            .await?
            .ok_or(StoreError::Missing("goal"))?;

        if let Some(title) = &changes.title {
            sqlx::query("UPDATE goals SET title = $2 WHERE id = $1")
                .bind(id)
                .bind(title)
                .execute(&mut *tx)
                .await?;
        }

        if let Some(order) = &changes.order {
            for (position, todo_id) in order.iter().enumerate() {
                let done = sqlx::query("UPDATE todos SET position = $3 WHERE id = $1 AND goal_id = $2")
                    .bind(todo_id)
                    .bind(id)
                    .bind(position as i32)
                    .execute(&mut *tx)
                    .await?;
                if done.rows_affected() != 1 {
                    // dropping tx rolls back the positions written so far
                    return Err(StoreError::Missing("todo"));
                }
            }
        }

        let row = touch_goal(&mut tx, id)
            .await?
            .ok_or(StoreError::Missing("goal"))?;
        let todos = todos_of(&mut tx, &[id]).await?;
        tx.commit().await?;
        Ok(row.with_todos(todos))
    }

    async fn delete_goal(&self, id: Uuid) -> StoreResult<()> {
        let mut tx = self.db.begin().await?;
        sqlx::query("DELETE FROM todos WHERE goal_id = $1")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        let done = sqlx::query("DELETE FROM goals WHERE id = $1")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        if done.rows_affected() == 0 {
            return Err(StoreError::Missing("goal"));
        }
        tx.commit().await?;
        Ok(())
    }

    async fn find_todo(&self, id: Uuid) -> StoreResult<Option<Todo>> {
        let todo = sqlx::query_as::<_, Todo>(
            r#"
            SELECT id, owner_id, goal_id, item, position, created_at
            FROM todos
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.db)
        .await?;
        Ok(todo)
    }

    async fn append_todo(&self, goal_id: Uuid, owner_id: Uuid, item: &str) -> StoreResult<(Goal, Todo)> {
        let mut tx = self.db.begin().await?;
        // row lock serialises concurrent appends to the same goal
        load_goal(&mut tx, goal_id, true)
            .await?
            .ok_or(StoreError::Missing("goal"))?;

        let todo = sqlx::query_as::<_, Todo>(
            r#"
            INSERT INTO todos (id, goal_id, owner_id, item, position)
            VALUES ($1, $2, $3, $4,
                    COALESCE((SELECT MAX(position) + 1 FROM todos WHERE goal_id = $2), 0))
            RETURNING id, owner_id, goal_id, item, position, created_at
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(goal_id)
        .bind(owner_id)
        .bind(item)
        .fetch_one(&mut *tx)
        .await?;

        let row = touch_goal(&mut tx, goal_id)
            .await?
            .ok_or(StoreError::Missing("goal"))?;
        let todos = todos_of(&mut tx, &[goal_id]).await?;
        tx.commit().await?;
        Ok((row.with_todos(todos), todo))
    }

    async fn update_todo(&self, id: Uuid, changes: &TodoChanges) -> StoreResult<Todo> {
        let todo = sqlx::query_as::<_, Todo>(
            r#"
            UPDATE todos
               SET item = COALESCE($2, item)
             WHERE id = $1
            RETURNING id, owner_id, goal_id, item, position, created_at
            "#,
        )
        .bind(id)
        .bind(&changes.item)
        .fetch_optional(&self.db)
        .await?
        .ok_or(StoreError::Missing("todo"))?;
        Ok(todo)
    }

    async fn delete_todo(&self, id: Uuid) -> StoreResult<()> {
        let mut tx = self.db.begin().await?;
        let removed: Option<(Uuid, i32)> =
            sqlx::query_as("DELETE FROM todos WHERE id = $1 RETURNING goal_id, position")
                .bind(id)
                .fetch_optional(&mut *tx)
                .await?;
        let (goal_id, position) = removed.ok_or(StoreError::Missing("todo"))?;
        // close the gap so positions stay 0..n
        sqlx::query("UPDATE todos SET position = position - 1 WHERE goal_id = $1 AND position > $2")
            .bind(goal_id)
            .bind(position)
            .execute(&mut *tx)
            .await?;
        touch_goal(&mut tx, goal_id).await?;
        tx.commit().await?;
        Ok(())
    }
}

// Needs a reachable PostgreSQL: `DATABASE_URL=... cargo test -- --ignored`.
#[cfg(test)]
mod tests {
    use super::*;

    async fn owner(store: &PgStore, name: &str) -> Uuid {
        store
            .insert_user(NewUser {
                username: name.into(),
                password_hash: "unused".into(),
                firstname: None,
                lastname: None,
                email: None,
            })
            .await
            .unwrap()
            .id
    }

    #[sqlx::test(migrations = "./migrations")]
    #[ignore]
    async fn append_and_delete_keep_positions_dense(pool: PgPool) {
        let store = PgStore::new(pool);
        let alice = owner(&store, "alice").await;
        let goal = store.insert_goal(alice, "Run").await.unwrap();

        let (_, a) = store.append_todo(goal.id, alice, "shoes").await.unwrap();
        let (_, b) = store.append_todo(goal.id, alice, "route").await.unwrap();
        let (after, c) = store.append_todo(goal.id, alice, "water").await.unwrap();
        assert_eq!(after.todo_ids(), vec![a.id, b.id, c.id]);
        assert_eq!(c.position, 2);

        store.delete_todo(b.id).await.unwrap();
        let goal = store.find_goal(goal.id).await.unwrap().unwrap();
        assert_eq!(goal.todo_ids(), vec![a.id, c.id]);
        let positions: Vec<i32> = goal.todos.iter().map(|t| t.position).collect();
        assert_eq!(positions, vec![0, 1]);
    }

    #[sqlx::test(migrations = "./migrations")]
    #[ignore]
    async fn append_to_missing_goal_writes_nothing(pool: PgPool) {
        let store = PgStore::new(pool.clone());
        let alice = owner(&store, "alice").await;

        let err = store.append_todo(Uuid::new_v4(), alice, "orphan").await.unwrap_err();
        assert!(matches!(err, StoreError::Missing("goal")));
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM todos")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(count, 0);
    }

    #[sqlx::test(migrations = "./migrations")]
    #[ignore]
    async fn delete_goal_takes_its_todos(pool: PgPool) {
        let store = PgStore::new(pool);
        let alice = owner(&store, "alice").await;
        let goal = store.insert_goal(alice, "Run").await.unwrap();
        let (_, todo) = store.append_todo(goal.id, alice, "shoes").await.unwrap();

        store.delete_goal(goal.id).await.unwrap();
        assert!(store.find_goal(goal.id).await.unwrap().is_none());
        assert!(store.find_todo(todo.id).await.unwrap().is_none());
        assert!(matches!(
            store.delete_goal(goal.id).await,
            Err(StoreError::Missing("goal"))
        ));
    }

    #[sqlx::test(migrations = "./migrations")]
    #[ignore]
    async fn duplicate_username_is_a_conflict(pool: PgPool) {
        let store = PgStore::new(pool);
        owner(&store, "alice").await;
        let err = store
            .insert_user(NewUser {
                username: "alice".into(),
                password_hash: "unused".into(),
                firstname: None,
                lastname: None,
                email: None,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Conflict("username")));
    }
}
