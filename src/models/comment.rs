use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;
use validator::Validate;

/// A note left on a task. Only its author may edit or delete it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct Comment {
    pub id: Uuid,
    pub body: String,
    pub task_id: Uuid,
    pub author_id: Uuid,
    pub created_at: DateTime<Utc>,
    /// Bumped by explicit edits only.
    pub updated_at: DateTime<Utc>,
    pub version: i32,
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct NewComment {
    #[validate(length(min = 1, max = 2000))]
    pub body: String,
}

impl NewComment {
    pub fn new(body: impl Into<String>) -> Self {
        Self { body: body.into() }
    }
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct CommentPatch {
    #[validate(length(min = 1, max = 2000))]
    pub body: String,
    pub expected_version: Option<i32>,
}

impl Comment {
    pub fn new(input: NewComment, task_id: Uuid, author_id: Uuid, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            body: input.body,
            task_id,
            author_id,
            created_at: now,
            updated_at: now,
            version: 1,
        }
    }
}
