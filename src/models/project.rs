use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;
use validator::Validate;

/// A container of tasks, owned by exactly one user for its whole lifetime.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct Project {
    pub id: Uuid,
    pub name: String,
    pub description: Option<String>,
    /// The creator. Never changes after creation.
    pub owner_id: Uuid,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Incremented on every successful update; used for optimistic concurrency.
    pub version: i32,
}

/// Input for creating a project.
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct NewProject {
    /// Must be between 1 and 100 characters.
    #[validate(length(min = 1, max = 100))]
    pub name: String,
    /// Maximum length of 500 characters if provided.
    #[validate(length(max = 500))]
    pub description: Option<String>,
}

impl NewProject {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: None,
        }
    }
}

/// Partial update of a project. Absent fields are left untouched.
#[derive(Debug, Clone, Default, Deserialize, Validate)]
pub struct ProjectPatch {
    #[validate(length(min = 1, max = 100))]
    pub name: Option<String>,
    /// `Some(None)` clears the description.
    #[serde(default, deserialize_with = "super::double_option")]
    #[validate(length(max = 500))]
    pub description: Option<Option<String>>,
    /// When set, the update fails with `Conflict` unless the stored version matches.
    pub expected_version: Option<i32>,
}

impl Project {
    pub fn new(input: NewProject, owner_id: Uuid, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: input.name,
            description: input.description,
            owner_id,
            created_at: now,
            updated_at: now,
            version: 1,
        }
    }

    /// Applies the fields present in `patch`.
    pub fn apply(&mut self, patch: ProjectPatch) {
        if let Some(name) = patch.name {
            self.name = name;
        }
        if let Some(description) = patch.description {
            self.description = description;
        }
    }
}
