use serde::{Deserialize, Serialize};

use crate::channel;
use crate::ids::{ProjectId, TaskId, TeamId, UserId};

/// Task lifecycle states.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    New,
    InProgress,
    Blocked,
    Done,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::New => "new",
            Self::InProgress => "in_progress",
            Self::Blocked => "blocked",
            Self::Done => "done",
        }
    }
}

impl std::str::FromStr for TaskStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "new" => Ok(Self::New),
            "in_progress" => Ok(Self::InProgress),
            "blocked" => Ok(Self::Blocked),
            "done" => Ok(Self::Done),
            other => Err(format!("unknown task status: {other}")),
        }
    }
}

/// A change to a task, as carried over the wire and fanned out to
/// subscribers. The id triple (task/project/team) is what target channels
/// are derived from.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TaskUpdate {
    pub task_id: TaskId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub project_id: Option<ProjectId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub team_id: Option<TeamId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub assignee_id: Option<UserId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<TaskStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
}

/// Activity within a team (member joined, task reassigned, ...).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TeamActivity {
    pub team_id: TeamId,
    pub actor_id: UserId,
    pub action: String,
}

/// A transient state-change notification, produced by whatever validated
/// the mutation and consumed exactly once by the broadcast engine. Never
/// persisted here.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum UpdateEvent {
    Task(TaskUpdate),
    Team(TeamActivity),
}

impl UpdateEvent {
    /// Wire kind; the outbound frame type is `<kind>_updated`.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Task(_) => "task",
            Self::Team(_) => "team",
        }
    }

    /// Channels this event targets. Every connection subscribed to at least
    /// one of them receives the event.
    pub fn channels(&self) -> Vec<String> {
        match self {
            Self::Task(update) => {
                let mut channels = vec![channel::task(&update.task_id)];
                if let Some(project_id) = &update.project_id {
                    channels.push(channel::project(project_id));
                }
                if let Some(team_id) = &update.team_id {
                    channels.push(channel::team(team_id));
                }
                channels
            }
            Self::Team(activity) => vec![channel::team(&activity.team_id)],
        }
    }
}
