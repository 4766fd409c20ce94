use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::instrument;

use pulse_core::events::{TaskStatus, TaskUpdate};
use pulse_core::ids::{ProjectId, TaskId, UserId};

use crate::database::Database;
use crate::error::StoreError;

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TaskRow {
    pub id: TaskId,
    pub title: String,
    pub description: Option<String>,
    pub status: TaskStatus,
    pub priority: i64,
    pub due_date: Option<String>,
    pub assignee_id: Option<UserId>,
    pub project_id: Option<ProjectId>,
    pub created_by: UserId,
    pub created_at: String,
    pub updated_at: String,
}

/// Fields for task creation; everything else defaults.
#[derive(Clone, Debug, Default)]
pub struct NewTask {
    pub title: String,
    pub description: Option<String>,
    pub due_date: Option<String>,
    pub assignee_id: Option<UserId>,
    pub project_id: Option<ProjectId>,
}

pub struct TaskRepo {
    db: Database,
}

impl TaskRepo {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    #[instrument(skip(self, task), fields(title = %task.title))]
    pub fn create(&self, task: NewTask, created_by: &UserId) -> Result<TaskRow, StoreError> {
        self.db.with_conn(|conn| {
            let id = TaskId::new();
            let now = Utc::now().to_rfc3339();
            conn.execute(
                "INSERT INTO tasks (id, title, description, status, due_date, assignee_id, project_id, created_by, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?9)",
                rusqlite::params![
                    id.as_str(),
                    task.title,
                    task.description,
                    TaskStatus::New.as_str(),
                    task.due_date,
                    task.assignee_id.as_ref().map(|a| a.as_str()),
                    task.project_id.as_ref().map(|p| p.as_str()),
                    created_by.as_str(),
                    now,
                ],
            )?;

            Ok(TaskRow {
                id,
                title: task.title,
                description: task.description,
                status: TaskStatus::New,
                priority: 0,
                due_date: task.due_date,
                assignee_id: task.assignee_id,
                project_id: task.project_id,
                created_by: created_by.clone(),
                created_at: now.clone(),
                updated_at: now,
            })
        })
    }

    #[instrument(skip(self), fields(task_id = %id))]
    pub fn get(&self, id: &TaskId) -> Result<TaskRow, StoreError> {
        self.db.with_conn(|conn| {
            conn.query_row(
                "SELECT id, title, description, status, priority, due_date, assignee_id, project_id, created_by, created_at, updated_at
                 FROM tasks WHERE id = ?1",
                [id.as_str()],
                map_task_row,
            )
            .map_err(|_| StoreError::NotFound(format!("task {id}")))
        })
    }

    /// Apply an inbound update to the stored task. The event's project/team
    /// ids are routing hints, not mutations; only status, title and assignee
    /// are written. The task must exist.
    #[instrument(skip(self, update), fields(task_id = %update.task_id))]
    pub fn apply_update(&self, update: &TaskUpdate) -> Result<TaskRow, StoreError> {
        let existing = self.get(&update.task_id)?;
        self.db.with_conn(|conn| {
            let status = update.status.unwrap_or(existing.status);
            let title = update.title.clone().unwrap_or_else(|| existing.title.clone());
            let assignee = update
                .assignee_id
                .clone()
                .or_else(|| existing.assignee_id.clone());
            let now = Utc::now().to_rfc3339();

            conn.execute(
                "UPDATE tasks SET status = ?2, title = ?3, assignee_id = ?4, updated_at = ?5 WHERE id = ?1",
                rusqlite::params![
                    update.task_id.as_str(),
                    status.as_str(),
                    title,
                    assignee.as_ref().map(|a| a.as_str()),
                    now,
                ],
            )?;

            Ok(TaskRow {
                status,
                title,
                assignee_id: assignee,
                updated_at: now,
                ..existing
            })
        })
    }

    /// Whether the user may see (and therefore modify) the task: assignee,
    /// creator, or member of the owning project's team.
    #[instrument(skip(self), fields(task_id = %task, user_id = %user))]
    pub fn visible_to(&self, task: &TaskId, user: &UserId) -> Result<bool, StoreError> {
        self.db.with_conn(|conn| {
            let found: Option<i64> = conn
                .query_row(
                    "SELECT 1 FROM tasks t
                     LEFT JOIN projects p ON p.id = t.project_id
                     WHERE t.id = ?1 AND (
                         t.assignee_id = ?2
                         OR t.created_by = ?2
                         OR EXISTS (
                             SELECT 1 FROM team_members m
                             WHERE m.team_id = p.team_id AND m.user_id = ?2
                         )
                     )",
                    rusqlite::params![task.as_str(), user.as_str()],
                    |row| row.get(0),
                )
                .ok();
            Ok(found.is_some())
        })
    }
}

fn map_task_row(row: &rusqlite::Row<'_>) -> Result<TaskRow, rusqlite::Error> {
    let status: String = row.get(3)?;
    Ok(TaskRow {
        id: TaskId::from_raw(row.get::<_, String>(0)?),
        title: row.get(1)?,
        description: row.get(2)?,
        status: status.parse().unwrap_or(TaskStatus::New),
        priority: row.get(4)?,
        due_date: row.get(5)?,
        assignee_id: row.get::<_, Option<String>>(6)?.map(UserId::from_raw),
        project_id: row.get::<_, Option<String>>(7)?.map(ProjectId::from_raw),
        created_by: UserId::from_raw(row.get::<_, String>(8)?),
        created_at: row.get(9)?,
        updated_at: row.get(10)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::teams::TeamRepo;
    use crate::users::UserRepo;

    fn setup() -> (Database, UserId, UserId) {
        let db = Database::in_memory().unwrap();
        let users = UserRepo::new(db.clone());
        let creator = users.create("creator@example.com", "Creator").unwrap();
        let other = users.create("other@example.com", "Other").unwrap();
        (db, creator.id, other.id)
    }

    #[test]
    fn create_and_get() {
        let (db, creator, _) = setup();
        let repo = TaskRepo::new(db);
        let task = repo
            .create(
                NewTask {
                    title: "ship it".into(),
                    ..Default::default()
                },
                &creator,
            )
            .unwrap();

        let fetched = repo.get(&task.id).unwrap();
        assert_eq!(fetched.title, "ship it");
        assert_eq!(fetched.status, TaskStatus::New);
        assert_eq!(fetched.created_by, creator);
    }

    #[test]
    fn get_missing_is_not_found() {
        let (db, _, _) = setup();
        let repo = TaskRepo::new(db);
        let err = repo.get(&TaskId::from_raw("task_nope")).unwrap_err();
        assert!(matches!(err, StoreError::NotFound(_)));
    }

    #[test]
    fn apply_update_changes_status_and_timestamp() {
        let (db, creator, _) = setup();
        let repo = TaskRepo::new(db);
        let task = repo
            .create(
                NewTask {
                    title: "review".into(),
                    ..Default::default()
                },
                &creator,
            )
            .unwrap();

        let updated = repo
            .apply_update(&TaskUpdate {
                task_id: task.id.clone(),
                project_id: None,
                team_id: None,
                assignee_id: None,
                status: Some(TaskStatus::Done),
                title: None,
            })
            .unwrap();

        assert_eq!(updated.status, TaskStatus::Done);
        assert_eq!(updated.title, "review");
        let fetched = repo.get(&task.id).unwrap();
        assert_eq!(fetched.status, TaskStatus::Done);
    }

    #[test]
    fn apply_update_missing_task_is_not_found() {
        let (db, _, _) = setup();
        let repo = TaskRepo::new(db);
        let err = repo
            .apply_update(&TaskUpdate {
                task_id: TaskId::from_raw("task_gone"),
                project_id: None,
                team_id: None,
                assignee_id: None,
                status: Some(TaskStatus::Done),
                title: None,
            })
            .unwrap_err();
        assert!(matches!(err, StoreError::NotFound(_)));
    }

    #[test]
    fn visibility_for_creator_and_assignee() {
        let (db, creator, other) = setup();
        let repo = TaskRepo::new(db);
        let task = repo
            .create(
                NewTask {
                    title: "triage".into(),
                    assignee_id: Some(other.clone()),
                    ..Default::default()
                },
                &creator,
            )
            .unwrap();

        assert!(repo.visible_to(&task.id, &creator).unwrap());
        assert!(repo.visible_to(&task.id, &other).unwrap());
    }

    #[test]
    fn visibility_through_team_membership() {
        let (db, creator, other) = setup();
        let teams = TeamRepo::new(db.clone());
        let team = teams.create("core").unwrap();
        let project = teams.create_project(&team.id, "launch").unwrap();

        let repo = TaskRepo::new(db);
        let task = repo
            .create(
                NewTask {
                    title: "wire it up".into(),
                    project_id: Some(project.id.clone()),
                    ..Default::default()
                },
                &creator,
            )
            .unwrap();

        assert!(!repo.visible_to(&task.id, &other).unwrap());
        teams.add_member(&team.id, &other).unwrap();
        assert!(repo.visible_to(&task.id, &other).unwrap());
    }

    #[test]
    fn visibility_of_missing_task_is_false() {
        let (db, creator, _) = setup();
        let repo = TaskRepo::new(db);
        assert!(!repo.visible_to(&TaskId::from_raw("task_nope"), &creator).unwrap());
    }
}
