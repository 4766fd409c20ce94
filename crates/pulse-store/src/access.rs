//! Store-backed permission oracle.
//!
//! The rules, per channel kind:
//! - `user:<id>` — only the identity's own id.
//! - `team:<id>` — team members.
//! - `project:<id>` — members of the project's team.
//! - `task:<id>` — task assignee, creator, or members of the owning
//!   project's team (same rule gates modification).
//! - Unknown prefixes are denied.
//! Admins pass every check. A store failure denies the triggering action.

use async_trait::async_trait;
use tracing::warn;

use pulse_core::channel::{self, ChannelKind};
use pulse_core::ids::{ProjectId, TaskId, TeamId};
use pulse_core::{AccessError, Identity, PermissionOracle};

use crate::database::Database;
use crate::error::StoreError;
use crate::tasks::TaskRepo;
use crate::teams::TeamRepo;

pub struct StoreOracle {
    tasks: TaskRepo,
    teams: TeamRepo,
}

impl StoreOracle {
    pub fn new(db: Database) -> Self {
        Self {
            tasks: TaskRepo::new(db.clone()),
            teams: TeamRepo::new(db),
        }
    }
}

fn store_failure(op: &str, e: &StoreError) -> AccessError {
    warn!(op, error = %e, "permission query failed");
    AccessError::Unavailable(e.to_string())
}

#[async_trait]
impl PermissionOracle for StoreOracle {
    async fn can_subscribe(&self, who: &Identity, channel: &str) -> Result<bool, AccessError> {
        if who.is_admin() {
            return Ok(true);
        }
        let Some((kind, raw)) = channel::parse(channel) else {
            return Ok(false);
        };
        match kind {
            ChannelKind::User => Ok(raw == who.user_id.as_str()),
            ChannelKind::Team => self
                .teams
                .is_member(&TeamId::from_raw(raw), &who.user_id)
                .map_err(|e| store_failure("team membership", &e)),
            ChannelKind::Project => self
                .teams
                .is_project_member(&ProjectId::from_raw(raw), &who.user_id)
                .map_err(|e| store_failure("project membership", &e)),
            ChannelKind::Task => self
                .tasks
                .visible_to(&TaskId::from_raw(raw), &who.user_id)
                .map_err(|e| store_failure("task visibility", &e)),
        }
    }

    async fn can_modify(&self, who: &Identity, task: &TaskId) -> Result<bool, AccessError> {
        if who.is_admin() {
            return Ok(true);
        }
        self.tasks
            .visible_to(task, &who.user_id)
            .map_err(|e| store_failure("task visibility", &e))
    }
}
