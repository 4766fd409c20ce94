use serde::{Deserialize, Serialize};

use crate::ids::UserId;

/// Role carried by a verified identity.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Admin,
    Member,
    Guest,
}

/// A verified user identity, bound to a connection at handshake time and
/// immutable for the connection's lifetime.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub user_id: UserId,
    pub email: String,
    pub roles: Vec<Role>,
}

impl Identity {
    pub fn new(user_id: UserId, email: impl Into<String>, roles: Vec<Role>) -> Self {
        Self {
            user_id,
            email: email.into(),
            roles,
        }
    }

    pub fn is_admin(&self) -> bool {
        self.roles.contains(&Role::Admin)
    }

    pub fn has_role(&self, role: Role) -> bool {
        self.roles.contains(&role)
    }
}
