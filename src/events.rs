//! State-change notifications for real-time adapters.
//!
//! The service publishes one [`ChangeEvent`] per committed mutation. Adapters
//! that push updates (e.g. a WebSocket layer) subscribe and filter each event by
//! its `audience` instead of polling storage.

use std::collections::{BTreeSet, HashSet};

use log::debug;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

const CHANNEL_CAPACITY: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    User,
    Project,
    Task,
    Comment,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    Created,
    Updated,
    Deleted,
}

/// A committed change to one entity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeEvent {
    pub entity: EntityKind,
    pub change: ChangeKind,
    pub id: Uuid,
    /// Users allowed to see the entity at the time of the change.
    pub audience: BTreeSet<Uuid>,
}

impl ChangeEvent {
    pub fn new(
        entity: EntityKind,
        change: ChangeKind,
        id: Uuid,
        audience: impl IntoIterator<Item = Uuid>,
    ) -> Self {
        Self {
            entity,
            change,
            id,
            audience: audience.into_iter().collect(),
        }
    }

    pub fn is_visible_to(&self, user_id: Uuid) -> bool {
        self.audience.contains(&user_id)
    }
}

/// Fan-out point for change events.
///
/// Slow subscribers that fall more than the channel capacity behind observe
/// `RecvError::Lagged` and skip ahead.
#[derive(Debug, Clone)]
pub struct EventHub {
    sender: broadcast::Sender<ChangeEvent>,
}

impl Default for EventHub {
    fn default() -> Self {
        Self::new()
    }
}

impl EventHub {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ChangeEvent> {
        self.sender.subscribe()
    }

    pub fn publish(&self, event: ChangeEvent) {
        // No subscribers is not an error.
        if self.sender.send(event).is_err() {
            debug!("Change event dropped: no subscribers");
        }
    }

    pub(crate) fn emit(
        &self,
        entity: EntityKind,
        change: ChangeKind,
        id: Uuid,
        audience: HashSet<Uuid>,
    ) {
        self.publish(ChangeEvent::new(entity, change, id, audience));
    }
}
