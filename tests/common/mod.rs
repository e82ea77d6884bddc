#![allow(dead_code)]

use std::sync::Arc;

use chrono::{Duration, TimeZone, Utc};
use taskforge_core::clock::ManualClock;
use taskforge_core::store::MemoryStore;
use taskforge_core::{Config, Identity, RegisterRequest, TaskService};

pub const PASSWORD: &str = "password123";
/// Cheapest cost bcrypt accepts.
pub const TEST_COST: u32 = 4;

pub struct TestApp {
    pub service: TaskService,
    pub clock: Arc<ManualClock>,
}

impl TestApp {
    /// A service over a fresh in-memory store with a frozen clock.
    pub fn new() -> Self {
        let config = Config {
            bcrypt_cost: TEST_COST,
            ..Config::new("integration-test-secret")
        };
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2024, 3, 1, 9, 0, 0).unwrap(),
        ));
        let service = TaskService::new(&config, Arc::new(MemoryStore::new()))
            .with_clock(clock.clone());
        Self { service, clock }
    }

    pub fn tick(&self) {
        self.clock.advance(Duration::seconds(1));
    }

    /// Registers `username` and returns the identity its session resolves to.
    pub async fn sign_up(&self, username: &str) -> Identity {
        self.service
            .register(RegisterRequest::new(
                username,
                format!("{}@example.com", username),
                PASSWORD,
            ))
            .await
            .expect("registration should succeed");
        let auth = self
            .service
            .authenticate(username, PASSWORD)
            .await
            .expect("sign-in should succeed");
        self.service
            .verify_session(&auth.token)
            .await
            .expect("fresh session should verify")
    }
}
