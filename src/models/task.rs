use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;
use validator::Validate;

use super::{Page, SortOrder};

/// Represents the status of a task.
/// Corresponds to the `task_status` SQL enum.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, Default, PartialEq, Eq, Hash, sqlx::Type)]
#[sqlx(type_name = "task_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Task is yet to be started.
    #[default]
    Todo,
    /// Task is currently being worked on.
    InProgress,
    /// Task is completed.
    Done,
}

/// Input structure for creating a task.
/// Contains validation rules for its fields.
#[derive(Debug, Clone, Default, Deserialize, Validate)]
pub struct NewTask {
    /// The title of the task.
    /// Must be between 1 and 200 characters.
    #[validate(length(min = 1, max = 200))]
    pub title: String,

    /// An optional description for the task.
    /// Maximum length of 1000 characters if provided.
    #[validate(length(max = 1000))]
    pub description: Option<String>,

    /// Initial status. Defaults to `todo` when absent.
    pub status: Option<TaskStatus>,

    /// User to assign the task to on creation.
    pub assignee_id: Option<Uuid>,
}

impl NewTask {
    pub fn titled(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            ..Default::default()
        }
    }
}

/// Partial update of a task. Absent fields are left untouched.
#[derive(Debug, Clone, Default, Deserialize, Validate)]
pub struct TaskPatch {
    #[validate(length(min = 1, max = 200))]
    pub title: Option<String>,
    /// `Some(None)` clears the description.
    #[serde(default, deserialize_with = "super::double_option")]
    #[validate(length(max = 1000))]
    pub description: Option<Option<String>>,
    pub status: Option<TaskStatus>,
    /// `Some(None)` unassigns the task.
    #[serde(default, deserialize_with = "super::double_option")]
    pub assignee_id: Option<Option<Uuid>>,
    /// When set, the update fails with `Conflict` unless the stored version matches.
    pub expected_version: Option<i32>,
}

/// Represents a task entity as stored and returned by the core.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct Task {
    /// Unique identifier for the task (UUID v4).
    pub id: Uuid,
    /// The title of the task.
    pub title: String,
    /// An optional description for the task.
    pub description: Option<String>,
    /// The current status of the task.
    pub status: TaskStatus,
    /// The project the task belongs to. Never changes after creation.
    pub project_id: Uuid,
    /// Identifier of the user to whom the task is assigned (optional).
    pub assignee_id: Option<Uuid>,
    /// Timestamp of when the task was created.
    pub created_at: DateTime<Utc>,
    /// Timestamp of the last update to the task.
    pub updated_at: DateTime<Utc>,
    /// Incremented on every successful update.
    pub version: i32,
}

/// Represents query parameters for filtering tasks when listing them.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TaskQuery {
    /// Filter tasks by status.
    pub status: Option<TaskStatus>,
    /// Filter tasks by assignee's user ID.
    pub assignee_id: Option<Uuid>,
    /// Creation-time ordering; ascending unless asked otherwise.
    #[serde(default)]
    pub order: SortOrder,
    #[serde(default, flatten)]
    pub page: Page,
}

impl Task {
    /// Creates a new `Task` in `project_id`.
    /// Sets `created_at` and `updated_at` to `now` and `id` to a new UUID.
    pub fn new(input: NewTask, project_id: Uuid, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            title: input.title,
            description: input.description,
            status: input.status.unwrap_or_default(),
            project_id,
            assignee_id: input.assignee_id,
            created_at: now,
            updated_at: now,
            version: 1,
        }
    }

    /// Applies the fields present in `patch`.
    pub fn apply(&mut self, patch: TaskPatch) {
        if let Some(title) = patch.title {
            self.title = title;
        }
        if let Some(description) = patch.description {
            self.description = description;
        }
        if let Some(status) = patch.status {
            self.status = status;
        }
        if let Some(assignee_id) = patch.assignee_id {
            self.assignee_id = assignee_id;
        }
    }
}
