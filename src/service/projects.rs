use std::collections::HashSet;

use log::{debug, info};
use uuid::Uuid;
use validator::Validate;

use super::{check_expected_version, TaskService};
use crate::auth::Identity;
use crate::error::AppError;
use crate::events::{ChangeKind, EntityKind};
use crate::models::{NewProject, Page, Project, ProjectPatch};
use crate::policy::{Action, Resource};
use crate::store::ProjectFilter;

impl TaskService {
    /// Creates a project owned by the caller.
    pub async fn create_project(
        &self,
        identity: &Identity,
        input: NewProject,
    ) -> Result<Project, AppError> {
        input.validate()?;
        self.authorize(identity, Action::Create, Resource::Projects)?;

        let project = Project::new(input, identity.user_id, self.clock.now());
        let project = self
            .storage("insert_project", self.store.insert_project(&project))
            .await?;
        info!("User {} created project {}", identity.user_id, project.id);
        self.events.emit(
            EntityKind::Project,
            ChangeKind::Created,
            project.id,
            HashSet::from([project.owner_id]),
        );
        Ok(project)
    }

    pub async fn get_project(
        &self,
        identity: &Identity,
        project_id: Uuid,
    ) -> Result<Project, AppError> {
        let members = self.members(project_id).await?;
        self.authorize(identity, Action::Read, Resource::Project(&members))?;
        self.storage("find_project", self.store.find_project(project_id))
            .await
    }

    /// Projects the caller owns or holds a task assignment in, oldest first.
    pub async fn list_projects(
        &self,
        identity: &Identity,
        page: Page,
    ) -> Result<Vec<Project>, AppError> {
        let filter = ProjectFilter {
            member_id: Some(identity.user_id),
            ..Default::default()
        };
        self.storage(
            "list_projects",
            self.store.list_projects(filter, page.clamped()),
        )
        .await
    }

    pub async fn update_project(
        &self,
        identity: &Identity,
        project_id: Uuid,
        patch: ProjectPatch,
    ) -> Result<Project, AppError> {
        patch.validate()?;
        let members = self.members(project_id).await?;
        self.authorize(identity, Action::Update, Resource::Project(&members))?;

        let mut project = self
            .storage("find_project", self.store.find_project(project_id))
            .await?;
        check_expected_version(patch.expected_version, project.version, "Project")?;
        project.apply(patch);
        project.updated_at = self.clock.now();

        let project = self
            .storage("update_project", self.store.update_project(&project))
            .await?;
        debug!("Updated project {} to version {}", project.id, project.version);
        self.events.emit(
            EntityKind::Project,
            ChangeKind::Updated,
            project.id,
            members.audience(),
        );
        Ok(project)
    }

    /// Deletes a project with all of its tasks and their comments.
    pub async fn delete_project(&self, identity: &Identity, project_id: Uuid) -> Result<(), AppError> {
        let members = self.members(project_id).await?;
        self.authorize(identity, Action::Delete, Resource::Project(&members))?;

        self.storage("delete_project", self.store.delete_project(project_id))
            .await?;
        info!("User {} deleted project {}", identity.user_id, project_id);
        self.events.emit(
            EntityKind::Project,
            ChangeKind::Deleted,
            project_id,
            members.audience(),
        );
        Ok(())
    }
}
