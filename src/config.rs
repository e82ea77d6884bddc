use std::env;
use std::ops::RangeInclusive;
use std::time::Duration;

use crate::error::AppError;

const DEFAULT_TOKEN_TTL_HOURS: i64 = 24;
const DEFAULT_BCRYPT_COST: u32 = bcrypt::DEFAULT_COST;
const DEFAULT_STORAGE_TIMEOUT_MS: u64 = 5_000;
const DEFAULT_MAX_CONNECTIONS: u32 = 5;

/// Range bcrypt accepts.
const BCRYPT_COST_RANGE: RangeInclusive<u32> = 4..=31;
/// One hour up to ten years; keeps `issued_at + ttl` far from overflow.
const TOKEN_TTL_HOURS_RANGE: RangeInclusive<i64> = 1..=87_600;

/// Settings for the shared core.
///
/// Loaded from the environment (and an optional `.env` file) by [`Config::from_env`],
/// or built in code with [`Config::new`] when embedding the core.
#[derive(Debug, Clone)]
pub struct Config {
    /// Postgres connection string. `None` when running against the in-memory store.
    pub database_url: Option<String>,
    pub database_max_connections: u32,
    /// HMAC secret used to sign session tokens. Changing it invalidates every issued token.
    pub jwt_secret: String,
    pub token_ttl: chrono::Duration,
    pub bcrypt_cost: u32,
    /// Upper bound on any single persistence call.
    pub storage_timeout: Duration,
}

impl Config {
    pub fn new(jwt_secret: impl Into<String>) -> Self {
        Self {
            database_url: None,
            database_max_connections: DEFAULT_MAX_CONNECTIONS,
            jwt_secret: jwt_secret.into(),
            token_ttl: chrono::Duration::hours(DEFAULT_TOKEN_TTL_HOURS),
            bcrypt_cost: DEFAULT_BCRYPT_COST,
            storage_timeout: Duration::from_millis(DEFAULT_STORAGE_TIMEOUT_MS),
        }
    }

    pub fn from_env() -> Result<Self, AppError> {
        dotenv::dotenv().ok();

        let jwt_secret = env::var("JWT_SECRET")
            .map_err(|_| AppError::InvalidInput("JWT_SECRET must be set".into()))?;
        if jwt_secret.is_empty() {
            return Err(AppError::InvalidInput("JWT_SECRET must not be empty".into()));
        }

        let ttl_hours: i64 = parse_var("TOKEN_TTL_HOURS", DEFAULT_TOKEN_TTL_HOURS)?;
        if !TOKEN_TTL_HOURS_RANGE.contains(&ttl_hours) {
            return Err(AppError::InvalidInput(format!(
                "TOKEN_TTL_HOURS must be between {} and {}",
                TOKEN_TTL_HOURS_RANGE.start(),
                TOKEN_TTL_HOURS_RANGE.end()
            )));
        }
        let token_ttl = chrono::Duration::hours(ttl_hours);

        let bcrypt_cost = parse_var("BCRYPT_COST", DEFAULT_BCRYPT_COST)?;
        if !BCRYPT_COST_RANGE.contains(&bcrypt_cost) {
            return Err(AppError::InvalidInput(format!(
                "BCRYPT_COST must be between {} and {}",
                BCRYPT_COST_RANGE.start(),
                BCRYPT_COST_RANGE.end()
            )));
        }

        let timeout_ms: u64 = parse_var("STORAGE_TIMEOUT_MS", DEFAULT_STORAGE_TIMEOUT_MS)?;
        if timeout_ms == 0 {
            return Err(AppError::InvalidInput("STORAGE_TIMEOUT_MS must be positive".into()));
        }

        let database_max_connections =
            parse_var("DATABASE_MAX_CONNECTIONS", DEFAULT_MAX_CONNECTIONS)?;
        if database_max_connections == 0 {
            return Err(AppError::InvalidInput(
                "DATABASE_MAX_CONNECTIONS must be positive".into(),
            ));
        }

        Ok(Self {
            database_url: env::var("DATABASE_URL").ok(),
            database_max_connections,
            jwt_secret,
            token_ttl,
            bcrypt_cost,
            storage_timeout: Duration::from_millis(timeout_ms),
        })
    }
}

fn parse_var<T: std::str::FromStr>(name: &str, default: T) -> Result<T, AppError> {
    match env::var(name) {
        Ok(raw) => raw
            .parse()
            .map_err(|_| AppError::InvalidInput(format!("{} must be a number", name))),
        Err(_) => Ok(default),
    }
}
