mod common;

use chrono::Duration;
use pretty_assertions::assert_eq;
use taskforge_core::clock::Clock;
use taskforge_core::models::UserPatch;
use taskforge_core::{AppError, RegisterRequest, TokenError};

use common::{TestApp, PASSWORD};

#[test_log::test(tokio::test)]
async fn test_register_authenticate_and_verify() {
    let app = TestApp::new();

    let user = app
        .service
        .register(RegisterRequest::new("testuser", "testuser@example.com", PASSWORD))
        .await
        .unwrap();
    assert_eq!(user.username, "testuser");
    assert_eq!(user.email, "testuser@example.com");
    assert_eq!(user.version, 1);
    assert_ne!(user.password_hash, PASSWORD);

    let auth = app.service.authenticate("testuser", PASSWORD).await.unwrap();
    assert_eq!(auth.user_id, user.id);
    assert_eq!(auth.expires_at, app.clock.now() + Duration::hours(24));

    let identity = app.service.verify_session(&auth.token).await.unwrap();
    assert_eq!(identity.user_id, user.id);
    assert_eq!(identity.username, "testuser");
}

#[tokio::test]
async fn test_duplicate_username_conflicts() {
    let app = TestApp::new();
    app.service
        .register(RegisterRequest::new("dupe", "dupe@example.com", PASSWORD))
        .await
        .unwrap();

    let result = app
        .service
        .register(RegisterRequest::new("dupe", "other@example.com", "another-password"))
        .await;
    assert!(matches!(result, Err(AppError::Conflict(_))));

    // The original credentials still work, so nothing was overwritten
    assert!(app.service.authenticate("dupe", PASSWORD).await.is_ok());
    assert!(app.service.authenticate("dupe", "another-password").await.is_err());
}

#[tokio::test]
async fn test_duplicate_email_conflicts() {
    let app = TestApp::new();
    app.sign_up("alice").await;
    let bob = app.sign_up("bob").await;

    let result = app
        .service
        .register(RegisterRequest::new("alice2", "Alice@Example.com", PASSWORD))
        .await;
    assert_eq!(
        result.unwrap_err(),
        AppError::Conflict("Email already registered".into())
    );

    let taken = UserPatch {
        email: Some("alice@example.com".into()),
        ..Default::default()
    };
    assert!(matches!(
        app.service.update_user(&bob, bob.user_id, taken).await,
        Err(AppError::Conflict(_))
    ));

    let fresh = UserPatch {
        email: Some("robert@example.com".into()),
        ..Default::default()
    };
    let updated = app.service.update_user(&bob, bob.user_id, fresh).await.unwrap();
    assert_eq!(updated.email, "robert@example.com");
}

#[tokio::test]
async fn test_invalid_registration_is_rejected() {
    let app = TestApp::new();

    for request in [
        RegisterRequest::new("ab", "ab@example.com", PASSWORD),
        RegisterRequest::new("has spaces", "spaces@example.com", PASSWORD),
        RegisterRequest::new("validname", "valid@example.com", "short"),
        RegisterRequest::new("validname", "not-an-email", PASSWORD),
    ] {
        let result = app.service.register(request).await;
        assert!(matches!(result, Err(AppError::InvalidInput(_))));
    }
}

#[tokio::test]
async fn test_bad_credentials_look_the_same() {
    let app = TestApp::new();
    app.sign_up("alice").await;

    let wrong_password = app.service.authenticate("alice", "not-the-password").await;
    let unknown_user = app.service.authenticate("nobody", PASSWORD).await;

    let expected = AppError::Unauthorized("Invalid credentials".into());
    assert_eq!(wrong_password.unwrap_err(), expected);
    assert_eq!(unknown_user.unwrap_err(), expected);
}

#[tokio::test]
async fn test_session_expires_after_ttl() {
    let app = TestApp::new();
    app.sign_up("alice").await;
    let auth = app.service.authenticate("alice", PASSWORD).await.unwrap();

    app.clock.advance(Duration::hours(24) - Duration::seconds(1));
    assert!(app.service.verify_session(&auth.token).await.is_ok());

    app.clock.advance(Duration::seconds(1));
    assert_eq!(
        app.service.verify_session(&auth.token).await.unwrap_err(),
        AppError::Token(TokenError::Expired)
    );
}

#[tokio::test]
async fn test_tampered_and_garbage_tokens() {
    let app = TestApp::new();
    app.sign_up("alice").await;
    let auth = app.service.authenticate("alice", PASSWORD).await.unwrap();

    let (signed_part, signature) = auth.token.rsplit_once('.').unwrap();
    let flipped = if signature.starts_with('A') { 'B' } else { 'A' };
    let tampered = format!("{}.{}{}", signed_part, flipped, &signature[1..]);
    assert_eq!(
        app.service.verify_session(&tampered).await.unwrap_err(),
        AppError::Token(TokenError::SignatureInvalid)
    );

    assert_eq!(
        app.service.verify_session("garbage").await.unwrap_err(),
        AppError::Token(TokenError::Malformed)
    );
}

#[tokio::test]
async fn test_deactivated_user_loses_access() {
    let app = TestApp::new();
    let alice = app.sign_up("alice").await;
    let auth = app.service.authenticate("alice", PASSWORD).await.unwrap();

    let deactivated = app.service.deactivate_user(&alice, alice.user_id).await.unwrap();
    assert!(!deactivated.is_active());

    assert!(matches!(
        app.service.verify_session(&auth.token).await,
        Err(AppError::Unauthorized(_))
    ));
    assert_eq!(
        app.service.authenticate("alice", PASSWORD).await.unwrap_err(),
        AppError::Unauthorized("Invalid credentials".into())
    );
}

#[tokio::test]
async fn test_users_manage_only_themselves() {
    let app = TestApp::new();
    let alice = app.sign_up("alice").await;
    let bob = app.sign_up("bob").await;

    // Anyone may look a user up
    let found = app.service.get_user(&bob, alice.user_id).await.unwrap();
    assert_eq!(found.username, "alice");

    let rename = UserPatch {
        username: Some("mallory".into()),
        ..Default::default()
    };
    assert!(matches!(
        app.service.update_user(&bob, alice.user_id, rename).await,
        Err(AppError::Forbidden(_))
    ));
    assert!(matches!(
        app.service.deactivate_user(&bob, alice.user_id).await,
        Err(AppError::Forbidden(_))
    ));

    let taken = UserPatch {
        username: Some("bob".into()),
        ..Default::default()
    };
    assert!(matches!(
        app.service.update_user(&alice, alice.user_id, taken).await,
        Err(AppError::Conflict(_))
    ));
}

#[tokio::test]
async fn test_password_change_rehashes() {
    let app = TestApp::new();
    let alice = app.sign_up("alice").await;

    let patch = UserPatch {
        password: Some("brand-new-password".into()),
        full_name: Some(Some("Alice Liddell".into())),
        ..Default::default()
    };
    let updated = app.service.update_user(&alice, alice.user_id, patch).await.unwrap();
    assert_eq!(updated.full_name.as_deref(), Some("Alice Liddell"));

    assert!(app.service.authenticate("alice", PASSWORD).await.is_err());
    assert!(app.service.authenticate("alice", "brand-new-password").await.is_ok());
}

#[tokio::test]
async fn test_renamed_session_reports_current_username() {
    let app = TestApp::new();
    let alice = app.sign_up("alice").await;
    let auth = app.service.authenticate("alice", PASSWORD).await.unwrap();

    let patch = UserPatch {
        username: Some("alice_l".into()),
        ..Default::default()
    };
    app.service.update_user(&alice, alice.user_id, patch).await.unwrap();

    let identity = app.service.verify_session(&auth.token).await.unwrap();
    assert_eq!(identity.username, "alice_l");
}

#[tokio::test]
async fn test_full_name_can_be_cleared() {
    let app = TestApp::new();
    let alice = app.sign_up("alice").await;

    let set = UserPatch {
        full_name: Some(Some("Alice Liddell".into())),
        ..Default::default()
    };
    app.service.update_user(&alice, alice.user_id, set).await.unwrap();

    let clear = UserPatch {
        full_name: Some(None),
        ..Default::default()
    };
    let updated = app.service.update_user(&alice, alice.user_id, clear).await.unwrap();
    assert!(updated.full_name.is_none());
    assert_eq!(updated.version, 3);
}

#[tokio::test]
async fn test_stale_user_update_conflicts() {
    let app = TestApp::new();
    let alice = app.sign_up("alice").await;

    let first = UserPatch {
        full_name: Some(Some("Alice".into())),
        expected_version: Some(1),
        ..Default::default()
    };
    app.service.update_user(&alice, alice.user_id, first).await.unwrap();

    let stale = UserPatch {
        full_name: Some(Some("Someone else".into())),
        expected_version: Some(1),
        ..Default::default()
    };
    assert!(matches!(
        app.service.update_user(&alice, alice.user_id, stale).await,
        Err(AppError::Conflict(_))
    ));
    let stored = app.service.get_user(&alice, alice.user_id).await.unwrap();
    assert_eq!(stored.full_name.as_deref(), Some("Alice"));
}

#[tokio::test]
async fn test_concurrent_user_updates_lose_nothing() {
    let app = TestApp::new();
    let alice = app.sign_up("alice").await;

    let password_change = UserPatch {
        password: Some("brand-new-password".into()),
        ..Default::default()
    };
    let rename = UserPatch {
        full_name: Some(Some("Alice Liddell".into())),
        ..Default::default()
    };
    let (password_result, rename_result) = tokio::join!(
        app.service.update_user(&alice, alice.user_id, password_change),
        app.service.update_user(&alice, alice.user_id, rename),
    );

    // Each write either landed or was refused; an accepted write is never undone.
    for result in [&password_result, &rename_result] {
        if let Err(error) = result {
            assert!(matches!(error, AppError::Conflict(_)), "{:?}", error);
        }
    }
    assert!(password_result.is_ok() || rename_result.is_ok());

    let stored = app.service.get_user(&alice, alice.user_id).await.unwrap();
    let new_password_works = app
        .service
        .authenticate("alice", "brand-new-password")
        .await
        .is_ok();
    assert_eq!(new_password_works, password_result.is_ok());
    assert_eq!(
        stored.full_name.as_deref() == Some("Alice Liddell"),
        rename_result.is_ok()
    );
}
