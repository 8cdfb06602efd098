use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::order::OrderStatus;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ActorRole {
    User,
    Driver,
    System,
}

/// Append-only audit row, one per committed transition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusHistoryEntry {
    pub id: Uuid,
    pub order_id: Uuid,
    pub status: OrderStatus,
    pub actor: ActorRole,
    pub actor_id: Option<Uuid>,
    pub metadata: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

impl StatusHistoryEntry {
    pub fn new(
        order_id: Uuid,
        status: OrderStatus,
        actor: ActorRole,
        actor_id: Option<Uuid>,
        metadata: serde_json::Value,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            order_id,
            status,
            actor,
            actor_id,
            metadata,
            created_at,
        }
    }
}
