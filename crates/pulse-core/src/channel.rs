//! Channel naming.
//!
//! A channel is nothing but a string key; matching is pure equality and
//! there is no channel registry. These helpers pin down the conventional
//! `<kind>:<id>` forms so producers and the permission oracle agree on them.

use crate::ids::{ProjectId, TaskId, TeamId, UserId};

/// Known channel kinds.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChannelKind {
    User,
    Task,
    Project,
    Team,
}

pub fn user(id: &UserId) -> String {
    format!("user:{id}")
}

pub fn task(id: &TaskId) -> String {
    format!("task:{id}")
}

pub fn project(id: &ProjectId) -> String {
    format!("project:{id}")
}

pub fn team(id: &TeamId) -> String {
    format!("team:{id}")
}

/// Split a channel into its kind and raw id part.
///
/// Returns `None` for unknown prefixes or missing ids; such channels can
/// still be stored and matched, but no permission rule recognizes them.
pub fn parse(channel: &str) -> Option<(ChannelKind, &str)> {
    let (kind, id) = channel.split_once(':')?;
    if id.is_empty() {
        return None;
    }
    let kind = match kind {
        "user" => ChannelKind::User,
        "task" => ChannelKind::Task,
        "project" => ChannelKind::Project,
        "team" => ChannelKind::Team,
        _ => return None,
    };
    Some((kind, id))
}
