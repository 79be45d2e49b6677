//! Messages, participants and thread descriptors as they appear on the wire.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::content::MessageContent;
use super::custom_field::CustomFieldValue;
use super::lowercase_uuid::LowercaseUuid;

/// Who sent a message relative to the customer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageDirection {
    /// Customer → agent.
    Inbound,
    /// Agent (or bot) → customer.
    Outbound,
}

/// Delivery statistics for a message.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserStatistics {
    /// When the recipient saw the message.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seen_at: Option<DateTime<Utc>>,
    /// When the recipient read the message.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub read_at: Option<DateTime<Utc>>,
}

/// A human or bot agent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Agent {
    /// Numeric agent id.
    pub id: i64,
    /// First name.
    #[serde(default)]
    pub first_name: String,
    /// Last name.
    #[serde(default)]
    pub last_name: String,
    /// Public nickname, preferred for display when present.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nickname: Option<String>,
    /// Avatar URL.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
    /// The agent is an automated bot.
    #[serde(default)]
    pub is_bot_user: bool,
    /// The agent runs a survey.
    #[serde(default)]
    pub is_survey_user: bool,
}

impl Agent {
    /// Name to show in the UI.
    #[must_use]
    pub fn display_name(&self) -> String {
        match &self.nickname {
            Some(nick) if !nick.is_empty() => nick.clone(),
            _ => format!("{} {}", self.first_name, self.last_name)
                .trim()
                .to_string(),
        }
    }
}

/// The customer as known by the backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CustomerIdentity {
    /// External customer id.
    pub id_on_external_platform: String,
    /// First name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub first_name: Option<String>,
    /// Last name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_name: Option<String>,
}

/// A file attached to a message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Attachment {
    /// Download URL.
    pub url: String,
    /// Name shown to the user.
    pub friendly_name: String,
    /// Mime type.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
    /// Original file name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_name: Option<String>,
}

/// A chat message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    /// Message id.
    #[serde(rename = "idOnExternalPlatform")]
    pub id: LowercaseUuid,
    /// Owning thread.
    #[serde(rename = "threadIdOnExternalPlatform")]
    pub thread_id: LowercaseUuid,
    /// Typed content.
    #[serde(rename = "messageContent")]
    pub content: MessageContent,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Inbound or outbound.
    pub direction: MessageDirection,
    /// Seen/read statistics.
    #[serde(default)]
    pub user_statistics: UserStatistics,
    /// Agent author of outbound messages.
    #[serde(rename = "authorUser", default, skip_serializing_if = "Option::is_none")]
    pub author_agent: Option<Agent>,
    /// Customer author of inbound messages.
    #[serde(
        rename = "authorEndUserIdentity",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub author_customer: Option<CustomerIdentity>,
    /// Attached files.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub attachments: Vec<Attachment>,
}

/// Minimal thread descriptor sent with events.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ThreadInfo {
    /// Thread id.
    #[serde(rename = "idOnExternalPlatform")]
    pub id: LowercaseUuid,
    /// Display name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thread_name: Option<String>,
    /// Whether the thread still accepts messages.
    #[serde(default = "default_true")]
    pub can_add_more_messages: bool,
}

fn default_true() -> bool {
    true
}

/// Thread reference used by events that only carry the id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThreadRef {
    /// Thread id.
    #[serde(rename = "idOnExternalPlatform")]
    pub id: LowercaseUuid,
}

/// Lifecycle status of a contact (case).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContactStatus {
    /// Just created.
    New,
    /// Being handled.
    Open,
    /// Waiting on the customer.
    Pending,
    /// Escalated to another team.
    Escalated,
    /// Resolved by the agent.
    Resolved,
    /// Closed; the thread no longer accepts messages.
    Closed,
    /// Status this version does not know.
    #[serde(other)]
    Unknown,
}

/// The contact (case) attached to a thread.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Contact {
    /// Contact id.
    pub id: String,
    /// Thread the contact belongs to, when the backend says so.
    #[serde(
        rename = "threadIdOnExternalPlatform",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub thread_id: Option<LowercaseUuid>,
    /// Current status.
    pub status: ContactStatus,
    /// Contact custom field values.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub custom_fields: Vec<CustomFieldValue>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn message_json() -> serde_json::Value {
        json!({
            "idOnExternalPlatform": "0D4F0E6C-7C1B-4C8C-9A59-0F0B3C7E8F01",
            "threadIdOnExternalPlatform": "8a3c1d2e-0000-4000-8000-000000000001",
            "messageContent": {"type": "TEXT", "payload": {"text": "Hi there"}},
            "createdAt": "2024-05-01T10:00:00Z",
            "direction": "outbound",
            "userStatistics": {"seenAt": "2024-05-01T10:00:05Z"},
            "authorUser": {"id": 7, "firstName": "Ada", "lastName": "Lovelace", "isBotUser": false}
        })
    }

    #[test]
    fn test_message_decodes_and_reencodes() {
        let message: Message = serde_json::from_value(message_json()).unwrap();
        assert_eq!(message.direction, MessageDirection::Outbound);
        assert_eq!(
            message.id.to_string(),
            "0d4f0e6c-7c1b-4c8c-9a59-0f0b3c7e8f01"
        );
        assert_eq!(message.author_agent.as_ref().map(Agent::display_name).as_deref(), Some("Ada Lovelace"));

        let again: Message =
            serde_json::from_value(serde_json::to_value(&message).unwrap()).unwrap();
        assert_eq!(again, message);
    }

    #[test]
    fn test_unknown_contact_status_is_tolerated() {
        let contact: Contact =
            serde_json::from_value(json!({"id": "c-1", "status": "snoozed"})).unwrap();
        assert_eq!(contact.status, ContactStatus::Unknown);
    }

    #[test]
    fn test_thread_info_defaults_to_accepting_messages() {
        let info: ThreadInfo = serde_json::from_value(json!({
            "idOnExternalPlatform": "8a3c1d2e-0000-4000-8000-000000000001"
        }))
        .unwrap();
        assert!(info.can_add_more_messages);
        assert!(info.thread_name.is_none());
    }

    #[test]
    fn test_nickname_preferred_for_display() {
        let agent = Agent {
            id: 1,
            first_name: "Grace".to_string(),
            last_name: "Hopper".to_string(),
            nickname: Some("Amazing Grace".to_string()),
            image_url: None,
            is_bot_user: false,
            is_survey_user: false,
        };
        assert_eq!(agent.display_name(), "Amazing Grace");
    }
}
