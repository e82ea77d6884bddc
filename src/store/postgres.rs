//! Postgres storage backend.
//!
//! Queries are built at runtime (no compile-time checked macros), so the crate
//! builds without a live database.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use log::info;
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::Executor;
use uuid::Uuid;

use super::{Deactivation, ProjectFilter, Store, StoreError, StoreResult, TaskFilter};
use crate::config::Config;
use crate::models::{Comment, Page, Project, SortOrder, Task, User};
use crate::policy::ProjectMembers;

const SCHEMA: &str = include_str!("../../migrations/0001_init.sql");

const USER_COLUMNS: &str =
    "id, username, email, password_hash, full_name, created_at, deactivated_at, version";
const PROJECT_COLUMNS: &str = "id, name, description, owner_id, created_at, updated_at, version";
const TASK_COLUMNS: &str =
    "id, title, description, status, project_id, assignee_id, created_at, updated_at, version";
const COMMENT_COLUMNS: &str = "id, body, task_id, author_id, created_at, updated_at, version";

/// Storage backed by a Postgres connection pool.
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Opens a pool against `config.database_url`.
    ///
    /// Acquiring a connection is bounded by `config.storage_timeout`.
    pub async fn connect(config: &Config) -> StoreResult<Self> {
        let url = config
            .database_url
            .as_deref()
            .ok_or_else(|| StoreError::Unavailable("DATABASE_URL is not configured".into()))?;

        let pool = PgPoolOptions::new()
            .max_connections(config.database_max_connections)
            .acquire_timeout(config.storage_timeout)
            .connect(url)
            .await?;

        info!("Connected to Postgres");
        Ok(Self::new(pool))
    }

    /// Creates the tables and types if they do not exist yet.
    pub async fn init_schema(&self) -> StoreResult<()> {
        self.pool.execute(SCHEMA).await?;
        Ok(())
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Tells apart "row gone" from "row changed" after a compare-and-swap miss.
    async fn missing_or_conflict(&self, table: &str, entity: &'static str, id: Uuid) -> StoreError {
        let sql = format!("SELECT EXISTS(SELECT 1 FROM {} WHERE id = $1)", table);
        match sqlx::query_scalar::<_, bool>(&sql)
            .bind(id)
            .fetch_one(&self.pool)
            .await
        {
            Ok(true) => StoreError::Conflict(format!("{} was modified concurrently", entity)),
            Ok(false) => StoreError::NotFound(entity),
            Err(e) => e.into(),
        }
    }
}

fn page_bounds(page: Page) -> (i64, i64) {
    (i64::from(page.limit), i64::from(page.offset))
}

/// Names the unique column a user write collided on.
fn user_conflict(error: sqlx::Error) -> StoreError {
    let on_email = match &error {
        sqlx::Error::Database(db) => db.constraint().map_or(false, |c| c.contains("email")),
        _ => false,
    };
    match StoreError::from(error) {
        StoreError::Conflict(_) if on_email => {
            StoreError::Conflict("Email already registered".into())
        }
        StoreError::Conflict(_) => StoreError::Conflict("Username already registered".into()),
        other => other,
    }
}

#[async_trait]
impl Store for PgStore {
    async fn insert_user(&self, user: &User) -> StoreResult<User> {
        let sql = format!(
            "INSERT INTO users (id, username, email, password_hash, full_name, created_at, version)
             VALUES ($1, $2, $3, $4, $5, $6, $7)
             RETURNING {}",
            USER_COLUMNS
        );
        sqlx::query_as::<_, User>(&sql)
            .bind(user.id)
            .bind(&user.username)
            .bind(&user.email)
            .bind(&user.password_hash)
            .bind(&user.full_name)
            .bind(user.created_at)
            .bind(user.version)
            .fetch_one(&self.pool)
            .await
            .map_err(user_conflict)
    }

    async fn find_user(&self, id: Uuid) -> StoreResult<User> {
        let sql = format!("SELECT {} FROM users WHERE id = $1", USER_COLUMNS);
        sqlx::query_as::<_, User>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or(StoreError::NotFound("User"))
    }

    async fn find_user_by_username(&self, username: &str) -> StoreResult<User> {
        let sql = format!("SELECT {} FROM users WHERE username = $1", USER_COLUMNS);
        sqlx::query_as::<_, User>(&sql)
            .bind(username)
            .fetch_optional(&self.pool)
            .await?
            .ok_or(StoreError::NotFound("User"))
    }

    async fn list_users(&self, page: Page) -> StoreResult<Vec<User>> {
        let (limit, offset) = page_bounds(page);
        let sql = format!(
            "SELECT {} FROM users WHERE deactivated_at IS NULL
             ORDER BY created_at ASC, id LIMIT $1 OFFSET $2",
            USER_COLUMNS
        );
        Ok(sqlx::query_as::<_, User>(&sql)
            .bind(limit)
            .bind(offset)
            .fetch_all(&self.pool)
            .await?)
    }

    async fn update_user(&self, user: &User) -> StoreResult<User> {
        let sql = format!(
            "UPDATE users
             SET username = $1, email = $2, full_name = $3, password_hash = $4,
                 version = version + 1
             WHERE id = $5 AND version = $6
             RETURNING {}",
            USER_COLUMNS
        );
        let updated = sqlx::query_as::<_, User>(&sql)
            .bind(&user.username)
            .bind(&user.email)
            .bind(&user.full_name)
            .bind(&user.password_hash)
            .bind(user.id)
            .bind(user.version)
            .fetch_optional(&self.pool)
            .await
            .map_err(user_conflict)?;

        match updated {
            Some(user) => Ok(user),
            None => Err(self.missing_or_conflict("users", "User", user.id).await),
        }
    }

    async fn deactivate_user(&self, id: Uuid, at: DateTime<Utc>) -> StoreResult<Deactivation> {
        let mut tx = self.pool.begin().await?;

        // Lock the row so a concurrent project insert can't race the ownership check.
        sqlx::query_scalar::<_, Uuid>("SELECT id FROM users WHERE id = $1 FOR UPDATE")
            .bind(id)
            .fetch_optional(&mut *tx)
            .await?
            .ok_or(StoreError::NotFound("User"))?;

        let owns_projects: bool =
            sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM projects WHERE owner_id = $1)")
                .bind(id)
                .fetch_one(&mut *tx)
                .await?;
        if owns_projects {
            return Err(StoreError::Conflict(
                "User still owns projects; delete them first".into(),
            ));
        }

        let sql = format!(
            "UPDATE tasks SET assignee_id = NULL, updated_at = $2, version = version + 1
             WHERE assignee_id = $1
             RETURNING {}",
            TASK_COLUMNS
        );
        let unassigned = sqlx::query_as::<_, Task>(&sql)
            .bind(id)
            .bind(at)
            .fetch_all(&mut *tx)
            .await?;

        let sql = format!(
            "UPDATE users
             SET version = version + CASE WHEN deactivated_at IS NULL THEN 1 ELSE 0 END,
                 deactivated_at = COALESCE(deactivated_at, $2)
             WHERE id = $1
             RETURNING {}",
            USER_COLUMNS
        );
        let user = sqlx::query_as::<_, User>(&sql)
            .bind(id)
            .bind(at)
            .fetch_one(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(Deactivation { user, unassigned })
    }

    async fn insert_project(&self, project: &Project) -> StoreResult<Project> {
        let sql = format!(
            "INSERT INTO projects (id, name, description, owner_id, created_at, updated_at, version)
             VALUES ($1, $2, $3, $4, $5, $6, $7)
             RETURNING {}",
            PROJECT_COLUMNS
        );
        Ok(sqlx::query_as::<_, Project>(&sql)
            .bind(project.id)
            .bind(&project.name)
            .bind(&project.description)
            .bind(project.owner_id)
            .bind(project.created_at)
            .bind(project.updated_at)
            .bind(project.version)
            .fetch_one(&self.pool)
            .await?)
    }

    async fn find_project(&self, id: Uuid) -> StoreResult<Project> {
        let sql = format!("SELECT {} FROM projects WHERE id = $1", PROJECT_COLUMNS);
        sqlx::query_as::<_, Project>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or(StoreError::NotFound("Project"))
    }

    async fn list_projects(&self, filter: ProjectFilter, page: Page) -> StoreResult<Vec<Project>> {
        let (limit, offset) = page_bounds(page);
        let sql = format!(
            "SELECT {} FROM projects p
             WHERE ($1::uuid IS NULL OR p.owner_id = $1)
               AND ($2::uuid IS NULL OR p.owner_id = $2 OR EXISTS (
                    SELECT 1 FROM tasks t WHERE t.project_id = p.id AND t.assignee_id = $2))
             ORDER BY p.created_at ASC, p.id
             LIMIT $3 OFFSET $4",
            PROJECT_COLUMNS
        );
        Ok(sqlx::query_as::<_, Project>(&sql)
            .bind(filter.owner_id)
            .bind(filter.member_id)
            .bind(limit)
            .bind(offset)
            .fetch_all(&self.pool)
            .await?)
    }

    async fn update_project(&self, project: &Project) -> StoreResult<Project> {
        let sql = format!(
            "UPDATE projects
             SET name = $1, description = $2, updated_at = $3, version = version + 1
             WHERE id = $4 AND version = $5
             RETURNING {}",
            PROJECT_COLUMNS
        );
        let updated = sqlx::query_as::<_, Project>(&sql)
            .bind(&project.name)
            .bind(&project.description)
            .bind(project.updated_at)
            .bind(project.id)
            .bind(project.version)
            .fetch_optional(&self.pool)
            .await?;

        match updated {
            Some(project) => Ok(project),
            None => Err(self.missing_or_conflict("projects", "Project", project.id).await),
        }
    }

    async fn delete_project(&self, id: Uuid) -> StoreResult<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            "DELETE FROM comments WHERE task_id IN (SELECT id FROM tasks WHERE project_id = $1)",
        )
        .bind(id)
        .execute(&mut *tx)
        .await?;
        sqlx::query("DELETE FROM tasks WHERE project_id = $1")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        let result = sqlx::query("DELETE FROM projects WHERE id = $1")
            .bind(id)
            .execute(&mut *tx)
            .await?;

        if result.rows_affected() == 0 {
            // Dropping the transaction rolls it back.
            return Err(StoreError::NotFound("Project"));
        }
        tx.commit().await?;
        Ok(())
    }

    async fn project_members(&self, id: Uuid) -> StoreResult<ProjectMembers> {
        let owner_id: Uuid = sqlx::query_scalar("SELECT owner_id FROM projects WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or(StoreError::NotFound("Project"))?;

        let assignees: Vec<Uuid> = sqlx::query_scalar(
            "SELECT DISTINCT assignee_id FROM tasks
             WHERE project_id = $1 AND assignee_id IS NOT NULL",
        )
        .bind(id)
        .fetch_all(&self.pool)
        .await?;

        Ok(ProjectMembers {
            project_id: id,
            owner_id,
            assignees: assignees.into_iter().collect(),
        })
    }

    async fn insert_task(&self, task: &Task) -> StoreResult<Task> {
        self.find_project(task.project_id).await?;
        if let Some(assignee) = task.assignee_id {
            self.find_user(assignee).await?;
        }

        let sql = format!(
            "INSERT INTO tasks (id, title, description, status, project_id, assignee_id, created_at, updated_at, version)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
             RETURNING {}",
            TASK_COLUMNS
        );
        Ok(sqlx::query_as::<_, Task>(&sql)
            .bind(task.id)
            .bind(&task.title)
            .bind(&task.description)
            .bind(task.status)
            .bind(task.project_id)
            .bind(task.assignee_id)
            .bind(task.created_at)
            .bind(task.updated_at)
            .bind(task.version)
            .fetch_one(&self.pool)
            .await?)
    }

    async fn find_task(&self, id: Uuid) -> StoreResult<Task> {
        let sql = format!("SELECT {} FROM tasks WHERE id = $1", TASK_COLUMNS);
        sqlx::query_as::<_, Task>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or(StoreError::NotFound("Task"))
    }

    async fn list_tasks(&self, filter: TaskFilter, page: Page) -> StoreResult<Vec<Task>> {
        // Conditions are appended only when present.
        let mut sql = format!("SELECT {} FROM tasks WHERE TRUE", TASK_COLUMNS);
        let mut param_count = 1;

        if filter.project_id.is_some() {
            sql.push_str(&format!(" AND project_id = ${}", param_count));
            param_count += 1;
        }
        if filter.member_id.is_some() {
            sql.push_str(&format!(
                " AND project_id IN (SELECT id FROM projects WHERE owner_id = ${n}
                   UNION SELECT project_id FROM tasks WHERE assignee_id = ${n})",
                n = param_count
            ));
            param_count += 1;
        }
        if filter.status.is_some() {
            sql.push_str(&format!(" AND status = ${}", param_count));
            param_count += 1;
        }
        if filter.assignee_id.is_some() {
            sql.push_str(&format!(" AND assignee_id = ${}", param_count));
            param_count += 1;
        }

        let direction = match filter.order {
            SortOrder::Asc => "ASC",
            SortOrder::Desc => "DESC",
        };
        sql.push_str(&format!(
            " ORDER BY created_at {dir}, id {dir} LIMIT ${} OFFSET ${}",
            param_count,
            param_count + 1,
            dir = direction
        ));

        let mut query = sqlx::query_as::<_, Task>(&sql);
        if let Some(project_id) = filter.project_id {
            query = query.bind(project_id);
        }
        if let Some(member_id) = filter.member_id {
            query = query.bind(member_id);
        }
        if let Some(status) = filter.status {
            query = query.bind(status);
        }
        if let Some(assignee_id) = filter.assignee_id {
            query = query.bind(assignee_id);
        }
        let (limit, offset) = page_bounds(page);

        Ok(query.bind(limit).bind(offset).fetch_all(&self.pool).await?)
    }

    async fn update_task(&self, task: &Task) -> StoreResult<Task> {
        if let Some(assignee) = task.assignee_id {
            self.find_user(assignee).await?;
        }

        let sql = format!(
            "UPDATE tasks
             SET title = $1, description = $2, status = $3, assignee_id = $4,
                 updated_at = $5, version = version + 1
             WHERE id = $6 AND version = $7
             RETURNING {}",
            TASK_COLUMNS
        );
        let updated = sqlx::query_as::<_, Task>(&sql)
            .bind(&task.title)
            .bind(&task.description)
            .bind(task.status)
            .bind(task.assignee_id)
            .bind(task.updated_at)
            .bind(task.id)
            .bind(task.version)
            .fetch_optional(&self.pool)
            .await?;

        match updated {
            Some(task) => Ok(task),
            None => Err(self.missing_or_conflict("tasks", "Task", task.id).await),
        }
    }

    async fn delete_task(&self, id: Uuid) -> StoreResult<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM comments WHERE task_id = $1")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        let result = sqlx::query("DELETE FROM tasks WHERE id = $1")
            .bind(id)
            .execute(&mut *tx)
            .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound("Task"));
        }
        tx.commit().await?;
        Ok(())
    }

    async fn insert_comment(&self, comment: &Comment) -> StoreResult<Comment> {
        self.find_task(comment.task_id).await?;

        let sql = format!(
            "INSERT INTO comments (id, body, task_id, author_id, created_at, updated_at, version)
             VALUES ($1, $2, $3, $4, $5, $6, $7)
             RETURNING {}",
            COMMENT_COLUMNS
        );
        Ok(sqlx::query_as::<_, Comment>(&sql)
            .bind(comment.id)
            .bind(&comment.body)
            .bind(comment.task_id)
            .bind(comment.author_id)
            .bind(comment.created_at)
            .bind(comment.updated_at)
            .bind(comment.version)
            .fetch_one(&self.pool)
            .await?)
    }

    async fn find_comment(&self, id: Uuid) -> StoreResult<Comment> {
        let sql = format!("SELECT {} FROM comments WHERE id = $1", COMMENT_COLUMNS);
        sqlx::query_as::<_, Comment>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or(StoreError::NotFound("Comment"))
    }

    async fn list_comments(&self, task_id: Uuid, page: Page) -> StoreResult<Vec<Comment>> {
        let (limit, offset) = page_bounds(page);
        let sql = format!(
            "SELECT {} FROM comments WHERE task_id = $1
             ORDER BY created_at ASC, id LIMIT $2 OFFSET $3",
            COMMENT_COLUMNS
        );
        Ok(sqlx::query_as::<_, Comment>(&sql)
            .bind(task_id)
            .bind(limit)
            .bind(offset)
            .fetch_all(&self.pool)
            .await?)
    }

    async fn update_comment(&self, comment: &Comment) -> StoreResult<Comment> {
        let sql = format!(
            "UPDATE comments SET body = $1, updated_at = $2, version = version + 1
             WHERE id = $3 AND version = $4
             RETURNING {}",
            COMMENT_COLUMNS
        );
        let updated = sqlx::query_as::<_, Comment>(&sql)
            .bind(&comment.body)
            .bind(comment.updated_at)
            .bind(comment.id)
            .bind(comment.version)
            .fetch_optional(&self.pool)
            .await?;

        match updated {
            Some(comment) => Ok(comment),
            None => Err(self.missing_or_conflict("comments", "Comment", comment.id).await),
        }
    }

    async fn delete_comment(&self, id: Uuid) -> StoreResult<()> {
        let result = sqlx::query("DELETE FROM comments WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound("Comment"));
        }
        Ok(())
    }
}
