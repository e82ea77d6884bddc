#![doc = "The `taskforge-core` library crate."]
#![doc = ""]
#![doc = "This crate contains the shared business layer of the TaskForge backend: domain"]
#![doc = "models, password hashing, session tokens, the authorization policy, the persistence"]
#![doc = "gateway and the `TaskService` that REST, GraphQL and WebSocket adapters all call."]
#![doc = "Adapters verify a session once, then pass the resulting `Identity` to every call."]

pub mod auth;
pub mod clock;
pub mod config;
pub mod error;
pub mod events;
pub mod models;
pub mod policy;
pub mod service;
pub mod store;

pub use crate::auth::{AuthResponse, Identity, RegisterRequest};
pub use crate::config::Config;
pub use crate::error::{AppError, TokenError};
pub use crate::events::{ChangeEvent, ChangeKind, EntityKind};
pub use crate::service::TaskService;
