pub mod comment;
pub mod project;
pub mod task;
pub mod user;

use serde::{Deserialize, Deserializer, Serialize};

pub use comment::{Comment, CommentPatch, NewComment};
pub use project::{NewProject, Project, ProjectPatch};
pub use task::{NewTask, Task, TaskPatch, TaskQuery, TaskStatus};
pub use user::{User, UserPatch};

/// Largest page any listing returns.
pub const MAX_PAGE_SIZE: u32 = 100;

/// Offset pagination for listings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Page {
    pub offset: u32,
    pub limit: u32,
}

impl Default for Page {
    fn default() -> Self {
        Self {
            offset: 0,
            limit: MAX_PAGE_SIZE,
        }
    }
}

impl Page {
    pub fn new(offset: u32, limit: u32) -> Self {
        Self { offset, limit }
    }

    /// Limit forced into `1..=MAX_PAGE_SIZE`.
    pub fn clamped(self) -> Self {
        Self {
            offset: self.offset,
            limit: self.limit.clamp(1, MAX_PAGE_SIZE),
        }
    }

    /// The page immediately after this one.
    pub fn next(self) -> Self {
        Self {
            offset: self.offset.saturating_add(self.limit),
            limit: self.limit,
        }
    }

    pub(crate) fn slice<T: Clone>(self, items: &[T]) -> Vec<T> {
        items
            .iter()
            .skip(self.offset as usize)
            .take(self.limit as usize)
            .cloned()
            .collect()
    }
}

/// Ordering of listings by creation time.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    #[default]
    Asc,
    Desc,
}

/// Distinguishes "field absent" (`None`) from "field explicitly null" (`Some(None)`)
/// when deserializing partial updates.
pub(crate) fn double_option<'de, T, D>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    T: Deserialize<'de>,
    D: Deserializer<'de>,
{
    Deserialize::deserialize(deserializer).map(Some)
}
