use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::instrument;

use pulse_core::ids::{ProjectId, TeamId, UserId};

use crate::database::Database;
use crate::error::StoreError;

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TeamRow {
    pub id: TeamId,
    pub name: String,
    pub created_at: String,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ProjectRow {
    pub id: ProjectId,
    pub team_id: TeamId,
    pub name: String,
    pub created_at: String,
}

pub struct TeamRepo {
    db: Database,
}

impl TeamRepo {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    #[instrument(skip(self))]
    pub fn create(&self, name: &str) -> Result<TeamRow, StoreError> {
        self.db.with_conn(|conn| {
            let id = TeamId::new();
            let now = Utc::now().to_rfc3339();
            conn.execute(
                "INSERT INTO teams (id, name, created_at) VALUES (?1, ?2, ?3)",
                rusqlite::params![id.as_str(), name, now],
            )?;
            Ok(TeamRow {
                id,
                name: name.to_string(),
                created_at: now,
            })
        })
    }

    /// Add a user to a team. Re-adding an existing member is a no-op.
    #[instrument(skip(self), fields(team_id = %team, user_id = %user))]
    pub fn add_member(&self, team: &TeamId, user: &UserId) -> Result<(), StoreError> {
        self.db.with_conn(|conn| {
            let _ = conn.execute(
                "INSERT OR IGNORE INTO team_members (team_id, user_id) VALUES (?1, ?2)",
                rusqlite::params![team.as_str(), user.as_str()],
            )?;
            Ok(())
        })
    }

    #[instrument(skip(self), fields(team_id = %team, user_id = %user))]
    pub fn is_member(&self, team: &TeamId, user: &UserId) -> Result<bool, StoreError> {
        self.db.with_conn(|conn| {
            let found: Option<i64> = conn
                .query_row(
                    "SELECT 1 FROM team_members WHERE team_id = ?1 AND user_id = ?2",
                    rusqlite::params![team.as_str(), user.as_str()],
                    |row| row.get(0),
                )
                .ok();
            Ok(found.is_some())
        })
    }

    #[instrument(skip(self), fields(team_id = %team))]
    pub fn create_project(&self, team: &TeamId, name: &str) -> Result<ProjectRow, StoreError> {
        self.db.with_conn(|conn| {
            let id = ProjectId::new();
            let now = Utc::now().to_rfc3339();
            conn.execute(
                "INSERT INTO projects (id, team_id, name, created_at) VALUES (?1, ?2, ?3, ?4)",
                rusqlite::params![id.as_str(), team.as_str(), name, now],
            )?;
            Ok(ProjectRow {
                id,
                team_id: team.clone(),
                name: name.to_string(),
                created_at: now,
            })
        })
    }

    /// Whether the user belongs to the team owning the given project.
    #[instrument(skip(self), fields(project_id = %project, user_id = %user))]
    pub fn is_project_member(&self, project: &ProjectId, user: &UserId) -> Result<bool, StoreError> {
        self.db.with_conn(|conn| {
            let found: Option<i64> = conn
                .query_row(
                    "SELECT 1 FROM projects p
                     JOIN team_members m ON m.team_id = p.team_id
                     WHERE p.id = ?1 AND m.user_id = ?2",
                    rusqlite::params![project.as_str(), user.as_str()],
                    |row| row.get(0),
                )
                .ok();
            Ok(found.is_some())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::users::UserRepo;

    fn setup() -> (Database, UserId) {
        let db = Database::in_memory().unwrap();
        let user = UserRepo::new(db.clone()).create("a@example.com", "A").unwrap();
        (db, user.id)
    }

    #[test]
    fn membership_roundtrip() {
        let (db, user) = setup();
        let repo = TeamRepo::new(db);
        let team = repo.create("core").unwrap();

        assert!(!repo.is_member(&team.id, &user).unwrap());
        repo.add_member(&team.id, &user).unwrap();
        assert!(repo.is_member(&team.id, &user).unwrap());
    }

    #[test]
    fn add_member_is_idempotent() {
        let (db, user) = setup();
        let repo = TeamRepo::new(db);
        let team = repo.create("core").unwrap();
        repo.add_member(&team.id, &user).unwrap();
        repo.add_member(&team.id, &user).unwrap();
        assert!(repo.is_member(&team.id, &user).unwrap());
    }

    #[test]
    fn project_membership_follows_team() {
        let (db, user) = setup();
        let repo = TeamRepo::new(db);
        let team = repo.create("core").unwrap();
        let project = repo.create_project(&team.id, "launch").unwrap();

        assert!(!repo.is_project_member(&project.id, &user).unwrap());
        repo.add_member(&team.id, &user).unwrap();
        assert!(repo.is_project_member(&project.id, &user).unwrap());
    }

    #[test]
    fn membership_of_unknown_team_is_false() {
        let (db, user) = setup();
        let repo = TeamRepo::new(db);
        assert!(!repo.is_member(&TeamId::from_raw("team_nope"), &user).unwrap());
    }
}
