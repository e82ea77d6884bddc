use std::collections::HashSet;

use log::{debug, info, warn};
use uuid::Uuid;
use validator::Validate;

use super::{check_expected_version, TaskService};
use crate::auth::{hash_password, verify_password, AuthResponse, Identity, RegisterRequest};
use crate::error::AppError;
use crate::events::{ChangeKind, EntityKind};
use crate::models::{Page, User, UserPatch};
use crate::policy::{Action, Resource};
use crate::store::Deactivation;

/// Plaintext behind the hash checked for unknown usernames.
const DUMMY_PASSWORD: &str = "no-such-user-password";

fn invalid_credentials() -> AppError {
    AppError::Unauthorized("Invalid credentials".into())
}

impl TaskService {
    /// Register a new user
    ///
    /// Validates the request, hashes the password and stores the account. Fails
    /// with `Conflict` when the username or email is already registered.
    pub async fn register(&self, input: RegisterRequest) -> Result<User, AppError> {
        input.validate()?;

        let password_hash = self.hash(input.password).await?;
        let user = User {
            id: Uuid::new_v4(),
            username: input.username,
            email: input.email,
            password_hash,
            full_name: input.full_name,
            created_at: self.clock.now(),
            deactivated_at: None,
            version: 1,
        };

        let user = self.storage("insert_user", self.store.insert_user(&user)).await?;
        info!("Registered user {} ({})", user.username, user.id);
        self.events.emit(
            EntityKind::User,
            ChangeKind::Created,
            user.id,
            HashSet::from([user.id]),
        );
        Ok(user)
    }

    /// Login user
    ///
    /// Checks the credentials and issues a session token. Unknown usernames,
    /// deactivated accounts and wrong passwords are indistinguishable to the caller.
    pub async fn authenticate(
        &self,
        username: &str,
        password: &str,
    ) -> Result<AuthResponse, AppError> {
        let user = match self
            .storage(
                "find_user_by_username",
                self.store.find_user_by_username(username),
            )
            .await
        {
            Ok(user) => user,
            Err(AppError::NotFound(_)) => {
                // Every rejected sign-in pays for one bcrypt check.
                let dummy = self
                    .dummy_hash
                    .get_or_try_init(|| self.hash(DUMMY_PASSWORD.to_owned()))
                    .await?;
                self.verify(password, dummy.clone()).await?;
                return Err(invalid_credentials());
            }
            Err(e) => return Err(e),
        };

        let matches = self.verify(password, user.password_hash.clone()).await?;
        if !user.is_active() {
            debug!("Sign-in attempt for deactivated user {}", user.id);
            return Err(invalid_credentials());
        }
        if !matches {
            debug!("Wrong password for user {}", user.id);
            return Err(invalid_credentials());
        }

        let identity = Identity {
            user_id: user.id,
            username: user.username,
        };
        let now = self.clock.now();
        let token = self.tokens.issue(&identity, now)?;
        info!("User {} signed in", identity.user_id);

        Ok(AuthResponse {
            token,
            user_id: identity.user_id,
            expires_at: now + self.tokens.ttl(),
        })
    }

    /// Resolves a session token to the identity every other operation takes.
    ///
    /// Token failures surface as `AppError::Token`. A valid token whose user has
    /// since disappeared or been deactivated is `Unauthorized`.
    pub async fn verify_session(&self, token: &str) -> Result<Identity, AppError> {
        let claimed = self.tokens.verify(token, self.clock.now())?;

        let user = match self
            .storage("find_user", self.store.find_user(claimed.user_id))
            .await
        {
            Ok(user) => user,
            Err(AppError::NotFound(_)) => {
                return Err(AppError::Unauthorized("Session user no longer exists".into()))
            }
            Err(e) => return Err(e),
        };
        if !user.is_active() {
            return Err(AppError::Unauthorized("Account is deactivated".into()));
        }

        // The username may have changed since the token was issued.
        Ok(Identity {
            user_id: user.id,
            username: user.username,
        })
    }

    pub async fn get_user(&self, identity: &Identity, user_id: Uuid) -> Result<User, AppError> {
        self.authorize(identity, Action::Read, Resource::User(user_id))?;
        self.storage("find_user", self.store.find_user(user_id)).await
    }

    /// Active users in registration order.
    pub async fn list_users(&self, identity: &Identity, page: Page) -> Result<Vec<User>, AppError> {
        self.authorize(identity, Action::Read, Resource::User(identity.user_id))?;
        self.storage("list_users", self.store.list_users(page.clamped()))
            .await
    }

    /// Changes a user's own profile. A new password is re-hashed before storage.
    ///
    /// The write only lands if nobody else changed the user since it was read;
    /// otherwise the call fails with `Conflict` and nothing is stored.
    pub async fn update_user(
        &self,
        identity: &Identity,
        user_id: Uuid,
        patch: UserPatch,
    ) -> Result<User, AppError> {
        patch.validate()?;
        self.authorize(identity, Action::Update, Resource::User(user_id))?;

        let mut user = self.storage("find_user", self.store.find_user(user_id)).await?;
        check_expected_version(patch.expected_version, user.version, "User")?;
        user.apply(&patch);
        if let Some(password) = patch.password {
            user.password_hash = self.hash(password).await?;
        }

        let user = self.storage("update_user", self.store.update_user(&user)).await?;
        debug!("Updated user {} to version {}", user.id, user.version);
        self.events.emit(
            EntityKind::User,
            ChangeKind::Updated,
            user.id,
            HashSet::from([user.id]),
        );
        Ok(user)
    }

    /// Deactivates a user's own account.
    ///
    /// Fails with `Conflict` while the user owns any project. Task assignments are
    /// cleared and each cleared task publishes an update; comments stay.
    pub async fn deactivate_user(
        &self,
        identity: &Identity,
        user_id: Uuid,
    ) -> Result<User, AppError> {
        self.authorize(identity, Action::Delete, Resource::User(user_id))?;

        let Deactivation { user, unassigned } = self
            .storage(
                "deactivate_user",
                self.store.deactivate_user(user_id, self.clock.now()),
            )
            .await?;
        info!(
            "Deactivated user {} and cleared {} assignments",
            user.id,
            unassigned.len()
        );

        for task in &unassigned {
            let mut audience = match self.members(task.project_id).await {
                Ok(members) => members.audience(),
                Err(e) => {
                    warn!("Could not load members of project {}: {}", task.project_id, e);
                    HashSet::new()
                }
            };
            audience.insert(user.id);
            self.events
                .emit(EntityKind::Task, ChangeKind::Updated, task.id, audience);
        }
        self.events.emit(
            EntityKind::User,
            ChangeKind::Deleted,
            user.id,
            HashSet::from([user.id]),
        );
        Ok(user)
    }

    /// Checks a password on the blocking pool.
    async fn verify(&self, password: &str, stored_hash: String) -> Result<bool, AppError> {
        let plaintext = password.to_owned();
        tokio::task::spawn_blocking(move || verify_password(&plaintext, &stored_hash))
            .await
            .map_err(|e| AppError::Internal(format!("Password check failed: {}", e)))
    }

    /// Hashes on the blocking pool.
    async fn hash(&self, password: String) -> Result<String, AppError> {
        let cost = self.bcrypt_cost;
        tokio::task::spawn_blocking(move || hash_password(&password, cost))
            .await
            .map_err(|e| AppError::Internal(format!("Password hashing failed: {}", e)))?
    }
}
