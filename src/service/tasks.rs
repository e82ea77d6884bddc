use futures::stream::{self, Stream, TryStreamExt};
use log::{debug, info};
use uuid::Uuid;
use validator::Validate;

use super::{check_expected_version, TaskService};
use crate::auth::Identity;
use crate::error::AppError;
use crate::events::{ChangeKind, EntityKind};
use crate::models::{NewTask, Page, Task, TaskPatch, TaskQuery};
use crate::policy::{Action, Resource};
use crate::store::TaskFilter;

impl TaskService {
    /// Creates a task in a project. Only the project owner may do this.
    ///
    /// Status defaults to `todo`. An `assignee_id` must name an active user.
    pub async fn create_task(
        &self,
        identity: &Identity,
        project_id: Uuid,
        input: NewTask,
    ) -> Result<Task, AppError> {
        input.validate()?;
        let members = self.members(project_id).await?;
        self.authorize(identity, Action::Create, Resource::Project(&members))?;
        if let Some(assignee) = input.assignee_id {
            self.require_active_user(assignee).await?;
        }

        let task = Task::new(input, project_id, self.clock.now());
        let task = self.storage("insert_task", self.store.insert_task(&task)).await?;
        info!("Created task {} in project {}", task.id, project_id);

        let mut audience = members.audience();
        audience.extend(task.assignee_id);
        self.events
            .emit(EntityKind::Task, ChangeKind::Created, task.id, audience);
        Ok(task)
    }

    pub async fn get_task(&self, identity: &Identity, task_id: Uuid) -> Result<Task, AppError> {
        let (task, members) = self.task_context(task_id).await?;
        self.authorize(identity, Action::Read, Resource::Task(&members, &task))?;
        Ok(task)
    }

    /// Lists one page of a project's tasks.
    ///
    /// Filters by `status` and `assignee_id`; ordered by creation time. Calling
    /// again runs the query again.
    pub async fn list_tasks(
        &self,
        identity: &Identity,
        project_id: Uuid,
        query: &TaskQuery,
    ) -> Result<Vec<Task>, AppError> {
        let members = self.members(project_id).await?;
        self.authorize(identity, Action::Read, Resource::Project(&members))?;

        let filter = TaskFilter {
            status: query.status,
            assignee_id: query.assignee_id,
            order: query.order,
            ..TaskFilter::project(project_id)
        };
        self.storage(
            "list_tasks",
            self.store.list_tasks(filter, query.page.clamped()),
        )
        .await
    }

    /// Lists one page of tasks across every project the caller can read.
    ///
    /// Takes the same filters as [`list_tasks`](Self::list_tasks).
    pub async fn list_my_tasks(
        &self,
        identity: &Identity,
        query: &TaskQuery,
    ) -> Result<Vec<Task>, AppError> {
        let filter = TaskFilter {
            status: query.status,
            assignee_id: query.assignee_id,
            order: query.order,
            ..TaskFilter::visible_to(identity.user_id)
        };
        self.storage(
            "list_tasks",
            self.store.list_tasks(filter, query.page.clamped()),
        )
        .await
    }

    /// Streams every task matching `query`, starting at `query.page.offset`.
    ///
    /// `query.page.limit` is the batch size: pages are fetched lazily as the
    /// stream is polled, and each fetch re-checks read access.
    pub fn stream_tasks<'a>(
        &'a self,
        identity: &'a Identity,
        project_id: Uuid,
        query: TaskQuery,
    ) -> impl Stream<Item = Result<Task, AppError>> + 'a {
        let first = Some(query.page.clamped());
        stream::try_unfold(first, move |page| {
            self.next_task_page(identity, project_id, query.clone(), page)
        })
        .map_ok(|tasks| stream::iter(tasks.into_iter().map(Ok::<Task, AppError>)))
        .try_flatten()
    }

    async fn next_task_page(
        &self,
        identity: &Identity,
        project_id: Uuid,
        query: TaskQuery,
        page: Option<Page>,
    ) -> Result<Option<(Vec<Task>, Option<Page>)>, AppError> {
        let Some(page) = page else {
            return Ok(None);
        };
        let tasks = self
            .list_tasks(identity, project_id, &TaskQuery { page, ..query })
            .await?;
        if tasks.is_empty() {
            return Ok(None);
        }
        // A short page is the last one.
        let next = (tasks.len() as u32 >= page.limit).then_some(page.next());
        Ok(Some((tasks, next)))
    }

    /// Applies the fields present in `patch`.
    ///
    /// The owner and the current assignee may update a task; changing who it is
    /// assigned to is reserved for the owner.
    pub async fn update_task(
        &self,
        identity: &Identity,
        task_id: Uuid,
        patch: TaskPatch,
    ) -> Result<Task, AppError> {
        patch.validate()?;
        let (mut task, members) = self.task_context(task_id).await?;
        self.authorize(identity, Action::Update, Resource::Task(&members, &task))?;
        check_expected_version(patch.expected_version, task.version, "Task")?;

        if let Some(assignee) = patch.assignee_id {
            if assignee != task.assignee_id {
                self.authorize(identity, Action::Assign, Resource::Task(&members, &task))?;
                if let Some(user_id) = assignee {
                    self.require_active_user(user_id).await?;
                }
            }
        }

        task.apply(patch);
        task.updated_at = self.clock.now();
        let task = self.storage("update_task", self.store.update_task(&task)).await?;
        debug!("Updated task {} to version {}", task.id, task.version);

        // The previous assignee is still in `members` and learns of the change too.
        let mut audience = members.audience();
        audience.extend(task.assignee_id);
        self.events
            .emit(EntityKind::Task, ChangeKind::Updated, task.id, audience);
        Ok(task)
    }

    /// Deletes a task and its comments. Only the project owner may do this.
    pub async fn delete_task(&self, identity: &Identity, task_id: Uuid) -> Result<(), AppError> {
        let (task, members) = self.task_context(task_id).await?;
        self.authorize(identity, Action::Delete, Resource::Task(&members, &task))?;

        self.storage("delete_task", self.store.delete_task(task_id))
            .await?;
        info!("Deleted task {} from project {}", task_id, task.project_id);
        self.events.emit(
            EntityKind::Task,
            ChangeKind::Deleted,
            task_id,
            members.audience(),
        );
        Ok(())
    }
}
