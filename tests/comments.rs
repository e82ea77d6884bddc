mod common;

use pretty_assertions::assert_eq;
use taskforge_core::models::{CommentPatch, NewComment, NewProject, NewTask, Page, Task};
use taskforge_core::{AppError, Identity};

use common::TestApp;

/// Owner's project with one task assigned to `assignee`.
async fn assigned_task(app: &TestApp, owner: &Identity, assignee: &Identity) -> Task {
    let project = app
        .service
        .create_project(owner, NewProject::named("Reviews"))
        .await
        .unwrap();
    app.service
        .create_task(
            owner,
            project.id,
            NewTask {
                assignee_id: Some(assignee.user_id),
                ..NewTask::titled("Review PR")
            },
        )
        .await
        .unwrap()
}

#[tokio::test]
async fn test_members_comment_and_list_in_order() {
    let app = TestApp::new();
    let owner = app.sign_up("owner").await;
    let helper = app.sign_up("helper").await;
    let task = assigned_task(&app, &owner, &helper).await;

    app.service
        .create_comment(&owner, task.id, NewComment::new("Please look"))
        .await
        .unwrap();
    app.tick();
    app.service
        .create_comment(&helper, task.id, NewComment::new("On it"))
        .await
        .unwrap();

    let comments = app
        .service
        .list_comments(&owner, task.id, Page::default())
        .await
        .unwrap();
    let bodies: Vec<&str> = comments.iter().map(|c| c.body.as_str()).collect();
    assert_eq!(bodies, vec!["Please look", "On it"]);
    assert_eq!(comments[1].author_id, helper.user_id);
}

#[tokio::test]
async fn test_only_author_edits_and_deletes() {
    let app = TestApp::new();
    let owner = app.sign_up("owner").await;
    let helper = app.sign_up("helper").await;
    let task = assigned_task(&app, &owner, &helper).await;
    let comment = app
        .service
        .create_comment(&helper, task.id, NewComment::new("Draft"))
        .await
        .unwrap();

    let edit = CommentPatch {
        body: "Final".into(),
        expected_version: None,
    };
    // Even the project owner cannot edit someone else's comment
    assert!(matches!(
        app.service.update_comment(&owner, comment.id, edit.clone()).await,
        Err(AppError::Forbidden(_))
    ));
    assert!(matches!(
        app.service.delete_comment(&owner, comment.id).await,
        Err(AppError::Forbidden(_))
    ));

    app.tick();
    let edited = app.service.update_comment(&helper, comment.id, edit).await.unwrap();
    assert_eq!(edited.body, "Final");
    assert_eq!(edited.version, 2);
    assert!(edited.updated_at > edited.created_at);

    app.service.delete_comment(&helper, comment.id).await.unwrap();
    assert!(matches!(
        app.service.get_comment(&owner, comment.id).await,
        Err(AppError::NotFound(_))
    ));
}

#[tokio::test]
async fn test_comment_validation_and_stale_edit() {
    let app = TestApp::new();
    let owner = app.sign_up("owner").await;
    let helper = app.sign_up("helper").await;
    let task = assigned_task(&app, &owner, &helper).await;

    assert!(matches!(
        app.service
            .create_comment(&owner, task.id, NewComment::new(""))
            .await,
        Err(AppError::InvalidInput(_))
    ));

    let comment = app
        .service
        .create_comment(&owner, task.id, NewComment::new("v1"))
        .await
        .unwrap();
    app.service
        .update_comment(
            &owner,
            comment.id,
            CommentPatch {
                body: "v2".into(),
                expected_version: Some(1),
            },
        )
        .await
        .unwrap();

    let stale = app
        .service
        .update_comment(
            &owner,
            comment.id,
            CommentPatch {
                body: "v2 again".into(),
                expected_version: Some(1),
            },
        )
        .await;
    assert!(matches!(stale, Err(AppError::Conflict(_))));
}

#[tokio::test]
async fn test_deleting_task_removes_comments() {
    let app = TestApp::new();
    let owner = app.sign_up("owner").await;
    let helper = app.sign_up("helper").await;
    let task = assigned_task(&app, &owner, &helper).await;
    let comment = app
        .service
        .create_comment(&helper, task.id, NewComment::new("Gone soon"))
        .await
        .unwrap();

    app.service.delete_task(&owner, task.id).await.unwrap();

    assert!(matches!(
        app.service.get_comment(&helper, comment.id).await,
        Err(AppError::NotFound(_))
    ));
    assert!(matches!(
        app.service
            .list_comments(&owner, task.id, Page::default())
            .await,
        Err(AppError::NotFound(_))
    ));
}

#[tokio::test]
async fn test_comments_survive_author_deactivation() {
    let app = TestApp::new();
    let owner = app.sign_up("owner").await;
    let helper = app.sign_up("helper").await;
    let task = assigned_task(&app, &owner, &helper).await;
    let comment = app
        .service
        .create_comment(&helper, task.id, NewComment::new("Handing over"))
        .await
        .unwrap();

    app.service
        .deactivate_user(&helper, helper.user_id)
        .await
        .unwrap();

    let kept = app.service.get_comment(&owner, comment.id).await.unwrap();
    assert_eq!(kept.author_id, helper.user_id);
}
