//! Persistence gateway.
//!
//! [`Store`] is the only component that reads or writes durable state. Entities
//! reference each other by id; the gateway resolves those ids and enforces the
//! relational invariants (unique usernames, cascading deletes, version checks).
//!
//! Two backends are provided: [`PgStore`] over Postgres and [`MemoryStore`] for
//! tests and embedding.

mod memory;
mod postgres;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;
use uuid::Uuid;

use crate::models::{Comment, Page, Project, SortOrder, Task, TaskStatus, User};
use crate::policy::ProjectMembers;

pub use memory::MemoryStore;
pub use postgres::PgStore;

/// Failures reported by a `Store`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    /// No record with the requested id. Carries the entity name.
    #[error("{0} not found")]
    NotFound(&'static str),
    /// Unique constraint violated, or the record changed since it was read.
    #[error("conflict: {0}")]
    Conflict(String),
    /// The backend could not be reached. Safe to retry.
    #[error("storage unavailable: {0}")]
    Unavailable(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

const UNIQUE_VIOLATION: &str = "23505";
const FOREIGN_KEY_VIOLATION: &str = "23503";

/// Maps driver errors onto the gateway taxonomy.
impl From<sqlx::Error> for StoreError {
    fn from(error: sqlx::Error) -> StoreError {
        match &error {
            sqlx::Error::RowNotFound => StoreError::NotFound("Record"),
            sqlx::Error::Database(db) => match db.code().as_deref() {
                Some(UNIQUE_VIOLATION) => StoreError::Conflict("Duplicate value".into()),
                // A referenced row vanished between lookup and write
                Some(FOREIGN_KEY_VIOLATION) => StoreError::NotFound("Record"),
                _ => StoreError::Unavailable(error.to_string()),
            },
            _ => StoreError::Unavailable(error.to_string()),
        }
    }
}

/// Which projects to list.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProjectFilter {
    pub owner_id: Option<Uuid>,
    /// Projects this user owns or holds a task assignment in.
    pub member_id: Option<Uuid>,
}

/// Which tasks to list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TaskFilter {
    pub project_id: Option<Uuid>,
    /// Only tasks in projects this user owns or holds a task assignment in.
    pub member_id: Option<Uuid>,
    pub status: Option<TaskStatus>,
    pub assignee_id: Option<Uuid>,
    pub order: SortOrder,
}

impl TaskFilter {
    pub fn project(project_id: Uuid) -> Self {
        Self {
            project_id: Some(project_id),
            ..Self::all()
        }
    }

    /// Tasks across every project `user_id` can read.
    pub fn visible_to(user_id: Uuid) -> Self {
        Self {
            member_id: Some(user_id),
            ..Self::all()
        }
    }

    fn all() -> Self {
        Self {
            project_id: None,
            member_id: None,
            status: None,
            assignee_id: None,
            order: SortOrder::Asc,
        }
    }

    /// Checks the per-task conditions. Membership is resolved by the backend.
    pub(crate) fn matches(&self, task: &Task) -> bool {
        self.project_id.map_or(true, |project| task.project_id == project)
            && self.status.map_or(true, |status| task.status == status)
            && self
                .assignee_id
                .map_or(true, |assignee| task.assignee_id == Some(assignee))
    }
}

/// Result of deactivating a user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Deactivation {
    pub user: User,
    /// Tasks whose assignment was cleared, as stored afterwards.
    pub unassigned: Vec<Task>,
}

/// Durable storage for users, projects, tasks and comments.
///
/// Every method is atomic. Methods that touch several records (cascading deletes,
/// deactivation) run inside a single transaction so partial results are never
/// observable.
///
/// `update_*` methods are compare-and-swap: the write succeeds only if the stored
/// `version` still equals the version of the record passed in, and the stored
/// version is then incremented. A mismatch is `StoreError::Conflict`.
#[async_trait]
pub trait Store: Send + Sync {
    /// Insert a new user. Fails with `Conflict` if the username or email is taken.
    async fn insert_user(&self, user: &User) -> StoreResult<User>;
    async fn find_user(&self, id: Uuid) -> StoreResult<User>;
    async fn find_user_by_username(&self, username: &str) -> StoreResult<User>;
    /// Active users in registration order.
    async fn list_users(&self, page: Page) -> StoreResult<Vec<User>>;
    /// Overwrite a user's profile fields and password hash. Fails with `Conflict` if the
    /// new username or email is taken.
    async fn update_user(&self, user: &User) -> StoreResult<User>;
    /// Mark a user deactivated and clear their task assignments.
    ///
    /// Fails with `Conflict` while the user owns any project.
    async fn deactivate_user(&self, id: Uuid, at: DateTime<Utc>) -> StoreResult<Deactivation>;

    async fn insert_project(&self, project: &Project) -> StoreResult<Project>;
    async fn find_project(&self, id: Uuid) -> StoreResult<Project>;
    /// Projects in creation order.
    async fn list_projects(&self, filter: ProjectFilter, page: Page) -> StoreResult<Vec<Project>>;
    async fn update_project(&self, project: &Project) -> StoreResult<Project>;
    /// Delete a project together with its tasks and their comments.
    async fn delete_project(&self, id: Uuid) -> StoreResult<()>;
    /// Owner and current assignees of a project.
    async fn project_members(&self, id: Uuid) -> StoreResult<ProjectMembers>;

    /// Insert a task. Fails with `NotFound` if its project does not exist.
    async fn insert_task(&self, task: &Task) -> StoreResult<Task>;
    async fn find_task(&self, id: Uuid) -> StoreResult<Task>;
    async fn list_tasks(&self, filter: TaskFilter, page: Page) -> StoreResult<Vec<Task>>;
    async fn update_task(&self, task: &Task) -> StoreResult<Task>;
    /// Delete a task together with its comments.
    async fn delete_task(&self, id: Uuid) -> StoreResult<()>;

    /// Insert a comment. Fails with `NotFound` if its task does not exist.
    async fn insert_comment(&self, comment: &Comment) -> StoreResult<Comment>;
    async fn find_comment(&self, id: Uuid) -> StoreResult<Comment>;
    /// Comments on a task in creation order.
    async fn list_comments(&self, task_id: Uuid, page: Page) -> StoreResult<Vec<Comment>>;
    async fn update_comment(&self, comment: &Comment) -> StoreResult<Comment>;
    async fn delete_comment(&self, id: Uuid) -> StoreResult<()>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::NewTask;

    #[test]
    fn test_sqlx_error_mapping() {
        assert_eq!(
            StoreError::from(sqlx::Error::RowNotFound),
            StoreError::NotFound("Record")
        );
        assert!(matches!(
            StoreError::from(sqlx::Error::PoolTimedOut),
            StoreError::Unavailable(_)
        ));
        assert!(matches!(
            StoreError::from(sqlx::Error::PoolClosed),
            StoreError::Unavailable(_)
        ));
    }

    #[test]
    fn test_task_filter_matches() {
        let project_id = Uuid::new_v4();
        let assignee = Uuid::new_v4();
        let task = Task::new(
            NewTask {
                assignee_id: Some(assignee),
                status: Some(TaskStatus::Done),
                ..NewTask::titled("Filtered")
            },
            project_id,
            Utc::now(),
        );

        assert!(TaskFilter::project(project_id).matches(&task));
        assert!(!TaskFilter::project(Uuid::new_v4()).matches(&task));
        // Membership is left to the backend
        assert!(TaskFilter::visible_to(Uuid::new_v4()).matches(&task));

        let by_status = TaskFilter {
            status: Some(TaskStatus::Todo),
            ..TaskFilter::project(project_id)
        };
        assert!(!by_status.matches(&task));

        let by_assignee = TaskFilter {
            assignee_id: Some(assignee),
            ..TaskFilter::project(project_id)
        };
        assert!(by_assignee.matches(&task));
    }
}
