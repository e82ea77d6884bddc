//! Authorization rules for the shared core.
//!
//! # Permission Model
//!
//! Projects have a single owner. Read access to a project (and everything in it)
//! extends to any user currently assigned one of its tasks. Beyond that:
//!
//! 1. **Projects**: only the owner may update or delete a project, or create and
//!    delete tasks in it, or change who a task is assigned to
//! 2. **Tasks**: the owner or the task's current assignee may update it
//! 3. **Comments**: anyone who can read the project may comment; only the author
//!    may edit or delete a comment
//! 4. **Users**: anyone may view a user; only that user may change or deactivate it
//!
//! Unauthenticated callers are denied everything.
//!
//! [`Policy::can`] is pure: every fact it needs is carried by the [`Resource`].

use std::collections::HashSet;

use uuid::Uuid;

use crate::auth::Identity;
use crate::models::{Comment, Task};

/// Operations subject to authorization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Action {
    Create,
    Read,
    Update,
    Delete,
    /// Change a task's assignee.
    Assign,
}

/// Snapshot of who is involved in a project.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProjectMembers {
    pub project_id: Uuid,
    pub owner_id: Uuid,
    /// Users assigned at least one task in the project.
    pub assignees: HashSet<Uuid>,
}

impl ProjectMembers {
    pub fn is_owner(&self, user_id: Uuid) -> bool {
        self.owner_id == user_id
    }

    /// Owner or assignee of any task in the project.
    pub fn can_view(&self, user_id: Uuid) -> bool {
        self.is_owner(user_id) || self.assignees.contains(&user_id)
    }

    /// Every user with read access.
    pub fn audience(&self) -> HashSet<Uuid> {
        let mut audience = self.assignees.clone();
        audience.insert(self.owner_id);
        audience
    }
}

/// The target of an authorization check.
#[derive(Debug, Clone, Copy)]
pub enum Resource<'a> {
    /// The collection of all projects; target of project creation.
    Projects,
    Project(&'a ProjectMembers),
    Task(&'a ProjectMembers, &'a Task),
    Comment(&'a ProjectMembers, &'a Comment),
    User(Uuid),
}

/// Stateless authorization policy.
#[derive(Debug, Default, Clone, Copy)]
pub struct Policy;

impl Policy {
    pub fn can(&self, identity: Option<&Identity>, action: Action, resource: Resource<'_>) -> bool {
        let Some(identity) = identity else {
            return false;
        };
        let user = identity.user_id;

        match (resource, action) {
            (Resource::Projects, Action::Create) => true,
            (Resource::Projects, _) => false,

            (Resource::Project(members), Action::Read) => members.can_view(user),
            // Creating a task in the project
            (Resource::Project(members), Action::Create) => members.is_owner(user),
            (Resource::Project(members), Action::Update | Action::Delete) => {
                members.is_owner(user)
            }
            (Resource::Project(_), Action::Assign) => false,

            (Resource::Task(members, _), Action::Read) => members.can_view(user),
            (Resource::Task(members, task), Action::Update) => {
                members.is_owner(user) || task.assignee_id == Some(user)
            }
            (Resource::Task(members, _), Action::Delete | Action::Assign) => {
                members.is_owner(user)
            }
            // Commenting on the task
            (Resource::Task(members, _), Action::Create) => members.can_view(user),

            (Resource::Comment(members, comment), Action::Read) => {
                comment.author_id == user || members.can_view(user)
            }
            (Resource::Comment(_, comment), Action::Update | Action::Delete) => {
                comment.author_id == user
            }
            (Resource::Comment(..), Action::Create | Action::Assign) => false,

            (Resource::User(_), Action::Read) => true,
            (Resource::User(id), Action::Update | Action::Delete) => id == user,
            (Resource::User(_), Action::Create | Action::Assign) => false,
        }
    }
}
