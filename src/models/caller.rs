use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::history::ActorRole;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Role {
    User,
    Driver,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::User => f.write_str("USER"),
            Role::Driver => f.write_str("DRIVER"),
        }
    }
}

/// Identity of an already-authenticated caller, built once at the boundary.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct CallerContext {
    pub id: Uuid,
    pub role: Role,
}

impl CallerContext {
    pub fn user(id: Uuid) -> Self {
        Self { id, role: Role::User }
    }

    pub fn driver(id: Uuid) -> Self {
        Self {
            id,
            role: Role::Driver,
        }
    }

    pub fn actor_role(&self) -> ActorRole {
        match self.role {
            Role::User => ActorRole::User,
            Role::Driver => ActorRole::Driver,
        }
    }
}
