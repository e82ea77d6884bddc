//! In-memory storage backend

use std::collections::HashSet;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use uuid::Uuid;

use super::{Deactivation, ProjectFilter, Store, StoreError, StoreResult, TaskFilter};
use crate::models::{Comment, Page, Project, SortOrder, Task, User};
use crate::policy::ProjectMembers;

#[derive(Default)]
struct Tables {
    // Each table is kept in insertion order, which is also creation order.
    users: Vec<User>,
    projects: Vec<Project>,
    tasks: Vec<Task>,
    comments: Vec<Comment>,
}

impl Tables {
    fn project_index(&self, id: Uuid) -> StoreResult<usize> {
        self.projects
            .iter()
            .position(|p| p.id == id)
            .ok_or(StoreError::NotFound("Project"))
    }

    fn task_index(&self, id: Uuid) -> StoreResult<usize> {
        self.tasks
            .iter()
            .position(|t| t.id == id)
            .ok_or(StoreError::NotFound("Task"))
    }

    fn comment_index(&self, id: Uuid) -> StoreResult<usize> {
        self.comments
            .iter()
            .position(|c| c.id == id)
            .ok_or(StoreError::NotFound("Comment"))
    }

    fn user_index(&self, id: Uuid) -> StoreResult<usize> {
        self.users
            .iter()
            .position(|u| u.id == id)
            .ok_or(StoreError::NotFound("User"))
    }

    fn username_taken(&self, username: &str, except: Option<Uuid>) -> bool {
        self.users
            .iter()
            .any(|u| u.username == username && Some(u.id) != except)
    }

    fn email_taken(&self, email: &str, except: Option<Uuid>) -> bool {
        self.users
            .iter()
            .any(|u| u.email.eq_ignore_ascii_case(email) && Some(u.id) != except)
    }

    fn is_member(&self, project: &Project, user_id: Uuid) -> bool {
        project.owner_id == user_id
            || self
                .tasks
                .iter()
                .any(|t| t.project_id == project.id && t.assignee_id == Some(user_id))
    }
}

fn check_version(stored: i32, expected: i32, entity: &str) -> StoreResult<()> {
    if stored != expected {
        return Err(StoreError::Conflict(format!(
            "{} was modified concurrently (expected version {}, found {})",
            entity, expected, stored
        )));
    }
    Ok(())
}

/// Storage backed by process memory.
///
/// Thread-safe via a single `RwLock`; every operation holds the lock for its whole
/// duration, which makes it atomic. Data is lost on drop.
#[derive(Default)]
pub struct MemoryStore {
    tables: RwLock<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn insert_user(&self, user: &User) -> StoreResult<User> {
        let mut tables = self.tables.write().await;
        if tables.username_taken(&user.username, None) {
            return Err(StoreError::Conflict("Username already registered".into()));
        }
        if tables.email_taken(&user.email, None) {
            return Err(StoreError::Conflict("Email already registered".into()));
        }
        tables.users.push(user.clone());
        Ok(user.clone())
    }

    async fn find_user(&self, id: Uuid) -> StoreResult<User> {
        let tables = self.tables.read().await;
        let index = tables.user_index(id)?;
        Ok(tables.users[index].clone())
    }

    async fn find_user_by_username(&self, username: &str) -> StoreResult<User> {
        let tables = self.tables.read().await;
        tables
            .users
            .iter()
            .find(|u| u.username == username)
            .cloned()
            .ok_or(StoreError::NotFound("User"))
    }

    async fn list_users(&self, page: Page) -> StoreResult<Vec<User>> {
        let tables = self.tables.read().await;
        let active: Vec<User> = tables.users.iter().filter(|u| u.is_active()).cloned().collect();
        Ok(page.slice(&active))
    }

    async fn update_user(&self, user: &User) -> StoreResult<User> {
        let mut tables = self.tables.write().await;
        let index = tables.user_index(user.id)?;
        check_version(tables.users[index].version, user.version, "User")?;
        if tables.username_taken(&user.username, Some(user.id)) {
            return Err(StoreError::Conflict("Username already taken".into()));
        }
        if tables.email_taken(&user.email, Some(user.id)) {
            return Err(StoreError::Conflict("Email already taken".into()));
        }
        let stored = &mut tables.users[index];
        stored.username = user.username.clone();
        stored.email = user.email.clone();
        stored.full_name = user.full_name.clone();
        stored.password_hash = user.password_hash.clone();
        stored.version += 1;
        Ok(stored.clone())
    }

    async fn deactivate_user(&self, id: Uuid, at: DateTime<Utc>) -> StoreResult<Deactivation> {
        let mut tables = self.tables.write().await;
        let index = tables.user_index(id)?;
        if tables.projects.iter().any(|p| p.owner_id == id) {
            return Err(StoreError::Conflict(
                "User still owns projects; delete them first".into(),
            ));
        }

        let mut unassigned = Vec::new();
        for task in tables.tasks.iter_mut().filter(|t| t.assignee_id == Some(id)) {
            task.assignee_id = None;
            task.updated_at = at;
            task.version += 1;
            unassigned.push(task.clone());
        }
        let user = &mut tables.users[index];
        if user.deactivated_at.is_none() {
            user.deactivated_at = Some(at);
            user.version += 1;
        }
        Ok(Deactivation {
            user: user.clone(),
            unassigned,
        })
    }

    async fn insert_project(&self, project: &Project) -> StoreResult<Project> {
        let mut tables = self.tables.write().await;
        tables.user_index(project.owner_id)?;
        tables.projects.push(project.clone());
        Ok(project.clone())
    }

    async fn find_project(&self, id: Uuid) -> StoreResult<Project> {
        let tables = self.tables.read().await;
        let index = tables.project_index(id)?;
        Ok(tables.projects[index].clone())
    }

    async fn list_projects(&self, filter: ProjectFilter, page: Page) -> StoreResult<Vec<Project>> {
        let tables = self.tables.read().await;
        let matching: Vec<Project> = tables
            .projects
            .iter()
            .filter(|p| filter.owner_id.map_or(true, |owner| p.owner_id == owner))
            .filter(|p| filter.member_id.map_or(true, |member| tables.is_member(p, member)))
            .cloned()
            .collect();
        Ok(page.slice(&matching))
    }

    async fn update_project(&self, project: &Project) -> StoreResult<Project> {
        let mut tables = self.tables.write().await;
        let index = tables.project_index(project.id)?;
        let stored = &mut tables.projects[index];
        check_version(stored.version, project.version, "Project")?;

        stored.name = project.name.clone();
        stored.description = project.description.clone();
        stored.updated_at = project.updated_at;
        stored.version += 1;
        Ok(stored.clone())
    }

    async fn delete_project(&self, id: Uuid) -> StoreResult<()> {
        let mut tables = self.tables.write().await;
        let index = tables.project_index(id)?;

        let task_ids: HashSet<Uuid> = tables
            .tasks
            .iter()
            .filter(|t| t.project_id == id)
            .map(|t| t.id)
            .collect();
        tables.comments.retain(|c| !task_ids.contains(&c.task_id));
        tables.tasks.retain(|t| t.project_id != id);
        tables.projects.remove(index);
        Ok(())
    }

    async fn project_members(&self, id: Uuid) -> StoreResult<ProjectMembers> {
        let tables = self.tables.read().await;
        let index = tables.project_index(id)?;
        let project = &tables.projects[index];
        Ok(ProjectMembers {
            project_id: project.id,
            owner_id: project.owner_id,
            assignees: tables
                .tasks
                .iter()
                .filter(|t| t.project_id == id)
                .filter_map(|t| t.assignee_id)
                .collect(),
        })
    }

    async fn insert_task(&self, task: &Task) -> StoreResult<Task> {
        let mut tables = self.tables.write().await;
        tables.project_index(task.project_id)?;
        if let Some(assignee) = task.assignee_id {
            tables.user_index(assignee)?;
        }
        tables.tasks.push(task.clone());
        Ok(task.clone())
    }

    async fn find_task(&self, id: Uuid) -> StoreResult<Task> {
        let tables = self.tables.read().await;
        let index = tables.task_index(id)?;
        Ok(tables.tasks[index].clone())
    }

    async fn list_tasks(&self, filter: TaskFilter, page: Page) -> StoreResult<Vec<Task>> {
        let tables = self.tables.read().await;
        let visible: Option<HashSet<Uuid>> = filter.member_id.map(|member| {
            tables
                .projects
                .iter()
                .filter(|p| tables.is_member(p, member))
                .map(|p| p.id)
                .collect()
        });
        let mut matching: Vec<Task> = tables
            .tasks
            .iter()
            .filter(|t| filter.matches(t))
            .filter(|t| visible.as_ref().map_or(true, |ids| ids.contains(&t.project_id)))
            .cloned()
            .collect();
        // Stable sort keeps insertion order among equal timestamps.
        matching.sort_by_key(|t| t.created_at);
        if filter.order == SortOrder::Desc {
            matching.reverse();
        }
        Ok(page.slice(&matching))
    }

    async fn update_task(&self, task: &Task) -> StoreResult<Task> {
        let mut tables = self.tables.write().await;
        let index = tables.task_index(task.id)?;
        if let Some(assignee) = task.assignee_id {
            tables.user_index(assignee)?;
        }
        let stored = &mut tables.tasks[index];
        check_version(stored.version, task.version, "Task")?;

        stored.title = task.title.clone();
        stored.description = task.description.clone();
        stored.status = task.status;
        stored.assignee_id = task.assignee_id;
        stored.updated_at = task.updated_at;
        stored.version += 1;
        Ok(stored.clone())
    }

    async fn delete_task(&self, id: Uuid) -> StoreResult<()> {
        let mut tables = self.tables.write().await;
        let index = tables.task_index(id)?;
        tables.comments.retain(|c| c.task_id != id);
        tables.tasks.remove(index);
        Ok(())
    }

    async fn insert_comment(&self, comment: &Comment) -> StoreResult<Comment> {
        let mut tables = self.tables.write().await;
        tables.task_index(comment.task_id)?;
        tables.user_index(comment.author_id)?;
        tables.comments.push(comment.clone());
        Ok(comment.clone())
    }

    async fn find_comment(&self, id: Uuid) -> StoreResult<Comment> {
        let tables = self.tables.read().await;
        let index = tables.comment_index(id)?;
        Ok(tables.comments[index].clone())
    }

    async fn list_comments(&self, task_id: Uuid, page: Page) -> StoreResult<Vec<Comment>> {
        let tables = self.tables.read().await;
        let matching: Vec<Comment> = tables
            .comments
            .iter()
            .filter(|c| c.task_id == task_id)
            .cloned()
            .collect();
        Ok(page.slice(&matching))
    }

    async fn update_comment(&self, comment: &Comment) -> StoreResult<Comment> {
        let mut tables = self.tables.write().await;
        let index = tables.comment_index(comment.id)?;
        let stored = &mut tables.comments[index];
        check_version(stored.version, comment.version, "Comment")?;

        stored.body = comment.body.clone();
        stored.updated_at = comment.updated_at;
        stored.version += 1;
        Ok(stored.clone())
    }

    async fn delete_comment(&self, id: Uuid) -> StoreResult<()> {
        let mut tables = self.tables.write().await;
        let index = tables.comment_index(id)?;
        tables.comments.remove(index);
        Ok(())
    }
}
