//! # The Task Service
//!
//! [`TaskService`] is the single entry point every protocol adapter calls. It
//! composes the persistence gateway, the token issuer, the authorization policy,
//! a clock and the change-event hub, and exposes one method per capability:
//!
//! - **Users** (`users.rs`): registration, sign-in, session verification and
//!   self-service profile changes
//! - **Projects** (`projects.rs`), **Tasks** (`tasks.rs`) and **Comments**
//!   (`comments.rs`): create, get, list, update and delete keyed by identity
//!
//! Every operation follows the same order: validate input, load what the policy
//! needs, authorize, write through the gateway, then publish a [`ChangeEvent`]
//! once the write has committed. The service keeps no per-call state, so one
//! instance can be shared (or cloned) across any number of tokio tasks.
//!
//! [`ChangeEvent`]: crate::events::ChangeEvent

mod comments;
mod projects;
mod tasks;
mod users;

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use log::{debug, info, warn};
use tokio::sync::{broadcast, OnceCell};
use uuid::Uuid;

use crate::auth::{Identity, TokenIssuer};
use crate::clock::{Clock, SystemClock};
use crate::config::Config;
use crate::error::AppError;
use crate::events::{ChangeEvent, EventHub};
use crate::models::Task;
use crate::policy::{Action, Policy, ProjectMembers, Resource};
use crate::store::{MemoryStore, PgStore, Store, StoreError, StoreResult};

/// Shared business layer over users, projects, tasks and comments.
#[derive(Clone)]
pub struct TaskService {
    store: Arc<dyn Store>,
    tokens: TokenIssuer,
    policy: Policy,
    clock: Arc<dyn Clock>,
    events: EventHub,
    bcrypt_cost: u32,
    storage_timeout: Duration,
    /// Hash checked against when a sign-in names no user. Built on first use.
    dummy_hash: Arc<OnceCell<String>>,
}

impl TaskService {
    pub fn new(config: &Config, store: Arc<dyn Store>) -> Self {
        Self {
            store,
            tokens: TokenIssuer::new(&config.jwt_secret, config.token_ttl),
            policy: Policy,
            clock: Arc::new(SystemClock),
            events: EventHub::new(),
            bcrypt_cost: config.bcrypt_cost,
            storage_timeout: config.storage_timeout,
            dummy_hash: Arc::new(OnceCell::new()),
        }
    }

    /// Builds a service over Postgres when `DATABASE_URL` is configured, or over
    /// an in-memory store otherwise.
    pub async fn open(config: &Config) -> Result<Self, AppError> {
        let store: Arc<dyn Store> = if config.database_url.is_some() {
            let store = PgStore::connect(config).await?;
            store.init_schema().await?;
            Arc::new(store)
        } else {
            info!("DATABASE_URL not set; using in-memory storage");
            Arc::new(MemoryStore::new())
        };
        Ok(Self::new(config, store))
    }

    /// Replaces the time source used for timestamps and token expiry.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Receives a [`ChangeEvent`] for every committed mutation from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<ChangeEvent> {
        self.events.subscribe()
    }

    /// Runs one gateway call under the storage timeout.
    async fn storage<T, F>(&self, operation: &'static str, call: F) -> Result<T, AppError>
    where
        F: Future<Output = StoreResult<T>>,
    {
        match tokio::time::timeout(self.storage_timeout, call).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(StoreError::Unavailable(detail))) => {
                warn!("Storage failure during {}: {}", operation, detail);
                Err(StoreError::Unavailable(detail).into())
            }
            Ok(Err(error)) => Err(error.into()),
            Err(_) => {
                warn!(
                    "Storage call {} timed out after {:?}",
                    operation, self.storage_timeout
                );
                Err(AppError::StorageUnavailable(
                    "storage call timed out".into(),
                ))
            }
        }
    }

    fn authorize(
        &self,
        identity: &Identity,
        action: Action,
        resource: Resource<'_>,
    ) -> Result<(), AppError> {
        if self.policy.can(Some(identity), action, resource) {
            return Ok(());
        }
        debug!(
            "Denied {:?} on {} for user {}",
            action,
            resource_name(&resource),
            identity.user_id
        );
        Err(AppError::Forbidden(format!(
            "You are not allowed to {} this {}",
            action_verb(action),
            resource_name(&resource)
        )))
    }

    async fn members(&self, project_id: Uuid) -> Result<ProjectMembers, AppError> {
        self.storage("project_members", self.store.project_members(project_id))
            .await
    }

    /// Loads a task with the membership of its project.
    async fn task_context(&self, task_id: Uuid) -> Result<(Task, ProjectMembers), AppError> {
        let task = self.storage("find_task", self.store.find_task(task_id)).await?;
        let members = self.members(task.project_id).await?;
        Ok((task, members))
    }

    /// Fails with `NotFound` unless `user_id` is an active user.
    async fn require_active_user(&self, user_id: Uuid) -> Result<(), AppError> {
        let user = self.storage("find_user", self.store.find_user(user_id)).await?;
        if !user.is_active() {
            return Err(AppError::NotFound("User not found".into()));
        }
        Ok(())
    }
}

fn check_expected_version(
    expected: Option<i32>,
    current: i32,
    entity: &str,
) -> Result<(), AppError> {
    match expected {
        Some(expected) if expected != current => Err(AppError::Conflict(format!(
            "{} has changed (expected version {}, found {})",
            entity, expected, current
        ))),
        _ => Ok(()),
    }
}

fn action_verb(action: Action) -> &'static str {
    match action {
        Action::Create => "create in",
        Action::Read => "view",
        Action::Update => "update",
        Action::Delete => "delete",
        Action::Assign => "reassign",
    }
}

fn resource_name(resource: &Resource<'_>) -> &'static str {
    match resource {
        Resource::Projects => "collection",
        Resource::Project(_) => "project",
        Resource::Task(..) => "task",
        Resource::Comment(..) => "comment",
        Resource::User(_) => "user",
    }
}
