//! Application wire frames.
//!
//! Every frame, both directions, is `{type, channel?, data?, error?}`.
//! Inbound types: `subscribe`, `unsubscribe`, `task_update`, `ping`.
//! Outbound types: `connection_established`, `subscribed`, `unsubscribed`,
//! `pong`, `<kind>_updated`, `error`.

use serde::{Deserialize, Serialize};

use pulse_core::ids::UserId;
use pulse_core::UpdateEvent;

pub const TYPE_SUBSCRIBE: &str = "subscribe";
pub const TYPE_UNSUBSCRIBE: &str = "unsubscribe";
pub const TYPE_TASK_UPDATE: &str = "task_update";
pub const TYPE_PING: &str = "ping";

// Error texts sent back to clients.
pub const ERR_AUTHENTICATION_FAILED: &str = "authentication failed";
pub const ERR_SUBSCRIPTION_DENIED: &str = "subscription denied";
pub const ERR_PERMISSION_DENIED: &str = "permission denied";
pub const ERR_INVALID_FORMAT: &str = "invalid message format";

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Frame {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Frame {
    fn bare(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            channel: None,
            data: None,
            error: None,
        }
    }

    pub fn connection_established(user_id: &UserId) -> Self {
        Self {
            data: Some(serde_json::json!({ "user_id": user_id })),
            ..Self::bare("connection_established")
        }
    }

    pub fn subscribed(channel: impl Into<String>) -> Self {
        Self {
            channel: Some(channel.into()),
            ..Self::bare("subscribed")
        }
    }

    pub fn unsubscribed(channel: impl Into<String>) -> Self {
        Self {
            channel: Some(channel.into()),
            ..Self::bare("unsubscribed")
        }
    }

    pub fn pong() -> Self {
        Self::bare("pong")
    }

    /// `{type: "<kind>_updated", data: <event payload>}`.
    pub fn updated(event: &UpdateEvent) -> Self {
        Self {
            data: serde_json::to_value(event).ok(),
            ..Self::bare(format!("{}_updated", event.kind()))
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            error: Some(message.into()),
            ..Self::bare("error")
        }
    }

    pub fn parse(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }

    pub fn encode(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|e| {
            tracing::error!(error = %e, "failed to serialize frame");
            String::new()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pulse_core::events::{TaskStatus, TaskUpdate};
    use pulse_core::ids::TaskId;

    #[test]
    fn parse_subscribe_frame() {
        let frame = Frame::parse(r#"{"type":"subscribe","channel":"task:task_1"}"#).unwrap();
        assert_eq!(frame.kind, TYPE_SUBSCRIBE);
        assert_eq!(frame.channel.as_deref(), Some("task:task_1"));
        assert!(frame.data.is_none());
    }

    #[test]
    fn parse_rejects_non_object() {
        assert!(Frame::parse("[1,2,3]").is_err());
        assert!(Frame::parse("not json").is_err());
    }

    #[test]
    fn parse_rejects_missing_type() {
        assert!(Frame::parse(r#"{"channel":"task:1"}"#).is_err());
    }

    #[test]
    fn unknown_type_still_parses() {
        // Unknown types are a router outcome, not a parse failure.
        let frame = Frame::parse(r#"{"type":"bogus"}"#).unwrap();
        assert_eq!(frame.kind, "bogus");
    }

    #[test]
    fn error_frame_shape() {
        let json = serde_json::to_value(Frame::error(ERR_SUBSCRIPTION_DENIED)).unwrap();
        assert_eq!(json["type"], "error");
        assert_eq!(json["error"], "subscription denied");
        assert!(json.get("channel").is_none());
        assert!(json.get("data").is_none());
    }

    #[test]
    fn ack_frames_carry_channel() {
        let json = serde_json::to_value(Frame::subscribed("team:team_1")).unwrap();
        assert_eq!(json["type"], "subscribed");
        assert_eq!(json["channel"], "team:team_1");

        let json = serde_json::to_value(Frame::unsubscribed("team:team_1")).unwrap();
        assert_eq!(json["type"], "unsubscribed");
    }

    #[test]
    fn connection_established_carries_user() {
        let json =
            serde_json::to_value(Frame::connection_established(&UserId::from_raw("user_1"))).unwrap();
        assert_eq!(json["type"], "connection_established");
        assert_eq!(json["data"]["user_id"], "user_1");
    }

    #[test]
    fn updated_frame_type_follows_event_kind() {
        let event = UpdateEvent::Task(TaskUpdate {
            task_id: TaskId::from_raw("task_1"),
            project_id: None,
            team_id: None,
            assignee_id: None,
            status: Some(TaskStatus::Done),
            title: None,
        });
        let json = serde_json::to_value(Frame::updated(&event)).unwrap();
        assert_eq!(json["type"], "task_updated");
        assert_eq!(json["data"]["task_id"], "task_1");
        assert_eq!(json["data"]["status"], "done");
    }

    #[test]
    fn encode_decode_roundtrip() {
        let frame = Frame::pong();
        let decoded = Frame::parse(&frame.encode()).unwrap();
        assert_eq!(decoded, frame);
    }
}
