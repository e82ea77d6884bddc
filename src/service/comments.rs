use log::{debug, info};
use uuid::Uuid;
use validator::Validate;

use super::{check_expected_version, TaskService};
use crate::auth::Identity;
use crate::error::AppError;
use crate::events::{ChangeKind, EntityKind};
use crate::models::{Comment, CommentPatch, NewComment, Page};
use crate::policy::{Action, ProjectMembers, Resource};

impl TaskService {
    /// Adds a comment to a task. Anyone who can read the task's project may comment.
    pub async fn create_comment(
        &self,
        identity: &Identity,
        task_id: Uuid,
        input: NewComment,
    ) -> Result<Comment, AppError> {
        input.validate()?;
        let (task, members) = self.task_context(task_id).await?;
        self.authorize(identity, Action::Create, Resource::Task(&members, &task))?;

        let comment = Comment::new(input, task_id, identity.user_id, self.clock.now());
        let comment = self
            .storage("insert_comment", self.store.insert_comment(&comment))
            .await?;
        info!("User {} commented on task {}", identity.user_id, task_id);
        self.publish_comment(ChangeKind::Created, &comment, &members);
        Ok(comment)
    }

    pub async fn get_comment(
        &self,
        identity: &Identity,
        comment_id: Uuid,
    ) -> Result<Comment, AppError> {
        let (comment, members) = self.comment_context(comment_id).await?;
        self.authorize(identity, Action::Read, Resource::Comment(&members, &comment))?;
        Ok(comment)
    }

    /// Comments on a task, oldest first.
    pub async fn list_comments(
        &self,
        identity: &Identity,
        task_id: Uuid,
        page: Page,
    ) -> Result<Vec<Comment>, AppError> {
        let (task, members) = self.task_context(task_id).await?;
        self.authorize(identity, Action::Read, Resource::Task(&members, &task))?;
        self.storage(
            "list_comments",
            self.store.list_comments(task_id, page.clamped()),
        )
        .await
    }

    /// Replaces a comment's body. Only its author may do this.
    pub async fn update_comment(
        &self,
        identity: &Identity,
        comment_id: Uuid,
        patch: CommentPatch,
    ) -> Result<Comment, AppError> {
        patch.validate()?;
        let (mut comment, members) = self.comment_context(comment_id).await?;
        self.authorize(identity, Action::Update, Resource::Comment(&members, &comment))?;
        check_expected_version(patch.expected_version, comment.version, "Comment")?;

        comment.body = patch.body;
        comment.updated_at = self.clock.now();
        let comment = self
            .storage("update_comment", self.store.update_comment(&comment))
            .await?;
        debug!("Updated comment {} to version {}", comment.id, comment.version);
        self.publish_comment(ChangeKind::Updated, &comment, &members);
        Ok(comment)
    }

    pub async fn delete_comment(&self, identity: &Identity, comment_id: Uuid) -> Result<(), AppError> {
        let (comment, members) = self.comment_context(comment_id).await?;
        self.authorize(identity, Action::Delete, Resource::Comment(&members, &comment))?;

        self.storage("delete_comment", self.store.delete_comment(comment_id))
            .await?;
        info!("User {} deleted comment {}", identity.user_id, comment_id);
        self.publish_comment(ChangeKind::Deleted, &comment, &members);
        Ok(())
    }

    async fn comment_context(
        &self,
        comment_id: Uuid,
    ) -> Result<(Comment, ProjectMembers), AppError> {
        let comment = self
            .storage("find_comment", self.store.find_comment(comment_id))
            .await?;
        let (_, members) = self.task_context(comment.task_id).await?;
        Ok((comment, members))
    }

    fn publish_comment(&self, change: ChangeKind, comment: &Comment, members: &ProjectMembers) {
        // Authors keep seeing their own comments after losing their assignment.
        let mut audience = members.audience();
        audience.insert(comment.author_id);
        self.events
            .emit(EntityKind::Comment, change, comment.id, audience);
    }
}
