use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::instrument;

use pulse_core::ids::UserId;

use crate::database::Database;
use crate::error::StoreError;

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct UserRow {
    pub id: UserId,
    pub email: String,
    pub name: String,
    pub created_at: String,
}

pub struct UserRepo {
    db: Database,
}

impl UserRepo {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    #[instrument(skip(self))]
    pub fn create(&self, email: &str, name: &str) -> Result<UserRow, StoreError> {
        self.db.with_conn(|conn| {
            let id = UserId::new();
            let now = Utc::now().to_rfc3339();
            conn.execute(
                "INSERT INTO users (id, email, name, created_at) VALUES (?1, ?2, ?3, ?4)",
                rusqlite::params![id.as_str(), email, name, now],
            )
            .map_err(|e| match e {
                rusqlite::Error::SqliteFailure(f, _)
                    if f.code == rusqlite::ErrorCode::ConstraintViolation =>
                {
                    StoreError::Conflict(format!("user email {email}"))
                }
                other => other.into(),
            })?;

            Ok(UserRow {
                id,
                email: email.to_string(),
                name: name.to_string(),
                created_at: now,
            })
        })
    }

    #[instrument(skip(self), fields(user_id = %id))]
    pub fn get(&self, id: &UserId) -> Result<UserRow, StoreError> {
        self.db.with_conn(|conn| {
            conn.query_row(
                "SELECT id, email, name, created_at FROM users WHERE id = ?1",
                [id.as_str()],
                |row| {
                    Ok(UserRow {
                        id: UserId::from_raw(row.get::<_, String>(0)?),
                        email: row.get(1)?,
                        name: row.get(2)?,
                        created_at: row.get(3)?,
                    })
                },
            )
            .map_err(|_| StoreError::NotFound(format!("user {id}")))
        })
    }
}
