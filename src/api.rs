//! REST calls to the chat backend.
//!
//! Only the channel configuration is fetched over HTTP; everything else goes
//! through the socket.

use serde::Deserialize;
use serde_json::Value;

use crate::error::{ChatError, DecodeError};
use crate::http::{self, HttpClient};
use crate::logging::Logger;
use crate::protocol::CustomFieldDefinition;
use crate::retry::Retry;

/// One allowed attachment type.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AllowedFileType {
    /// MIME type or pattern, e.g. `image/*`.
    pub mime_type: String,
    /// Human readable description.
    #[serde(default)]
    pub description: String,
}

/// Attachment limits for the channel.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct FileRestrictions {
    /// Maximum size in MB.
    pub allowed_file_size: u64,
    /// Accepted types.
    pub allowed_file_types: Vec<AllowedFileType>,
    /// Whether attachments are enabled at all.
    pub is_attachments_enabled: bool,
}

/// Channel settings as fetched from the backend.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChannelConfiguration {
    /// Whether a customer may hold several threads.
    pub has_multiple_threads_per_customer: bool,
    /// Whether proactive actions are delivered.
    pub is_proactive_chat_enabled: bool,
    /// Whether the channel is a live chat (single recoverable conversation).
    pub is_live_chat: bool,
    /// Whether an OAuth authorization code is required to authorize.
    pub is_authorization_enabled: bool,
    /// Attachment limits.
    pub file_restrictions: FileRestrictions,
    /// Customer custom field definitions.
    pub customer_fields: Vec<CustomFieldDefinition>,
    /// Contact custom field definitions.
    pub contact_fields: Vec<CustomFieldDefinition>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ConfigurationWire {
    #[serde(default)]
    settings: SettingsWire,
    #[serde(default)]
    is_authorization_enabled: bool,
    #[serde(default)]
    is_live_chat: bool,
    #[serde(default)]
    end_user_custom_fields: Vec<Value>,
    #[serde(default)]
    contact_custom_fields: Vec<Value>,
}

#[derive(Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
struct SettingsWire {
    has_multiple_threads_per_end_user: bool,
    is_proactive_chat_enabled: bool,
    file_restrictions: FileRestrictions,
}

impl ChannelConfiguration {
    /// Decode the configuration body. Invalid custom field definitions are
    /// skipped.
    pub fn decode(value: Value, logger: &Logger) -> Result<Self, DecodeError> {
        let wire: ConfigurationWire =
            serde_json::from_value(value).map_err(|e| DecodeError::at("", &e))?;
        Ok(Self {
            has_multiple_threads_per_customer: wire.settings.has_multiple_threads_per_end_user,
            is_proactive_chat_enabled: wire.settings.is_proactive_chat_enabled,
            is_live_chat: wire.is_live_chat,
            is_authorization_enabled: wire.is_authorization_enabled,
            file_restrictions: wire.settings.file_restrictions,
            customer_fields: CustomFieldDefinition::decode_list(
                &wire.end_user_custom_fields,
                "endUserCustomFields",
                logger,
            ),
            contact_fields: CustomFieldDefinition::decode_list(
                &wire.contact_custom_fields,
                "contactCustomFields",
                logger,
            ),
        })
    }
}

/// URL of the channel configuration resource.
#[must_use]
pub fn channel_configuration_url(chat_url: &str, brand_id: i64, channel_id: &str) -> String {
    format!(
        "{}/1.0/brand/{brand_id}/channel/{channel_id}",
        chat_url.trim_end_matches('/')
    )
}

/// Fetch the channel configuration, retrying failed requests with backoff.
pub async fn fetch_channel_configuration(
    client: &dyn HttpClient,
    retry: &Retry,
    chat_url: &str,
    brand_id: i64,
    channel_id: &str,
) -> Result<ChannelConfiguration, ChatError> {
    let url = channel_configuration_url(chat_url, brand_id, channel_id);
    let body: Value = retry
        .run(|_| http::get_json::<Value>(client, &url))
        .await?;
    Ok(ChannelConfiguration::decode(body, retry.logger())?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::CustomFieldKind;
    use serde_json::json;

    #[test]
    fn test_channel_configuration_url_trims_slash() {
        assert_eq!(
            channel_configuration_url("https://chat.example.com/", 1086, "chat_1"),
            "https://chat.example.com/1.0/brand/1086/channel/chat_1"
        );
    }

    #[test]
    fn test_decode_skips_invalid_field_definitions() {
        let config = ChannelConfiguration::decode(json!({
            "settings": {
                "hasMultipleThreadsPerEndUser": true,
                "isProactiveChatEnabled": false,
                "fileRestrictions": {
                    "allowedFileSize": 40,
                    "allowedFileTypes": [{"mimeType": "image/*", "description": "images"}],
                    "isAttachmentsEnabled": true
                }
            },
            "isAuthorizationEnabled": true,
            "endUserCustomFields": [
                {"ident": "email", "label": "E-mail", "type": "email"},
                {"ident": "broken", "label": "Broken", "type": "slider"}
            ],
            "contactCustomFields": [
                {"ident": "topic", "label": "Topic", "type": "list",
                 "values": [{"value": "billing", "name": "Billing"}]}
            ]
        }), &Logger::default())
        .unwrap();

        assert!(config.has_multiple_threads_per_customer);
        assert!(config.is_authorization_enabled);
        assert_eq!(config.file_restrictions.allowed_file_size, 40);
        assert_eq!(config.customer_fields.len(), 1);
        assert_eq!(config.customer_fields[0].kind, CustomFieldKind::Text { is_email: true });
        assert!(matches!(
            config.contact_fields[0].kind,
            CustomFieldKind::Selector { ref options } if options.len() == 1
        ));
    }

    #[test]
    fn test_decode_tolerates_missing_sections() {
        let config = ChannelConfiguration::decode(json!({}), &Logger::default()).unwrap();
        assert_eq!(config, ChannelConfiguration::default());
    }
}
