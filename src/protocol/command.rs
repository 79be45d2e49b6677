//! Outbound commands and their wire frames.
//!
//! Commands are encode-only: they are turned into an [`OutboundFrame`] and
//! sent, never decoded. The envelope is
//! `{"action", "eventId", "payload": {"eventType", "brand", "channel",
//! "consumerIdentity"?, "visitor"?, "destination"?, "data"?}}`.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;
use serde_json::{json, Map, Value};

use super::content::MessageContent;
use super::custom_field::CustomFieldValue;
use super::lowercase_uuid::LowercaseUuid;
use super::message::{Attachment, CustomerIdentity};

/// Action used by every chat command.
pub const CHAT_WINDOW_EVENT: &str = "chatWindowEvent";

/// Identity and routing data stamped on every outbound frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandContext {
    /// Brand id.
    pub brand_id: i64,
    /// Channel id.
    pub channel_id: String,
    /// The customer, once known.
    pub customer: Option<CustomerIdentity>,
    /// Anonymous visitor id.
    pub visitor_id: Option<LowercaseUuid>,
}

/// A visitor event reported back to the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum VisitorEventKind {
    /// A proactive action was shown.
    ProactiveActionDisplayed,
    /// The customer clicked a proactive action.
    ProactiveActionClicked,
    /// The proactive action reached its goal.
    ProactiveActionSuccess,
    /// The proactive action was dismissed.
    ProactiveActionFailed,
    /// The chat window was opened.
    ChatWindowOpened,
    /// The customer viewed a page.
    PageView,
}

/// One entry of `StoreVisitorEvents`.
#[derive(Debug, Clone, PartialEq)]
pub struct VisitorEvent {
    /// Event id.
    pub id: LowercaseUuid,
    /// What happened.
    pub kind: VisitorEventKind,
    /// When it happened.
    pub created_at: DateTime<Utc>,
    /// Event-specific data (for example the proactive action details).
    pub data: Option<Value>,
}

impl VisitorEvent {
    /// A new event happening now.
    #[must_use]
    pub fn now(kind: VisitorEventKind, data: Option<Value>) -> Self {
        Self {
            id: LowercaseUuid::new_v4(),
            kind,
            created_at: Utc::now(),
            data,
        }
    }

    fn to_value(&self) -> Value {
        let mut event = json!({
            "id": self.id,
            "type": self.kind,
            "createdAtWithMilliseconds": self.created_at.to_rfc3339_opts(SecondsFormat::Millis, true),
        });
        if let (Some(data), Value::Object(map)) = (&self.data, &mut event) {
            map.insert("data".to_string(), data.clone());
        }
        event
    }
}

/// An outbound command.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    /// Authorize the customer (anonymously or with an OAuth code).
    AuthorizeCustomer {
        /// OAuth authorization code.
        authorization_code: Option<String>,
        /// PKCE code verifier.
        code_verifier: Option<String>,
    },
    /// Reconnect an already authorized customer.
    ReconnectCustomer {
        /// Stored access token.
        token: String,
    },
    /// Exchange the access token for a fresh one.
    RefreshToken {
        /// Current access token.
        token: String,
    },
    /// Send a message to a thread.
    SendMessage {
        /// Target thread.
        thread_id: LowercaseUuid,
        /// Thread name, for the first message of a new thread.
        thread_name: Option<String>,
        /// Client-generated message id.
        message_id: LowercaseUuid,
        /// Content to send.
        content: MessageContent,
        /// Already uploaded attachments.
        attachments: Vec<Attachment>,
        /// Customer custom fields sent along.
        customer_fields: Vec<CustomFieldValue>,
        /// Contact custom fields sent along.
        contact_fields: Vec<CustomFieldValue>,
        /// Access token, for channels with authorization.
        token: Option<String>,
    },
    /// Load messages older than the oldest one held.
    LoadMoreMessages {
        /// Thread to page.
        thread_id: LowercaseUuid,
        /// Scroll token from the last page.
        scroll_token: String,
        /// Creation time of the oldest held message.
        oldest_message_created_at: DateTime<Utc>,
    },
    /// Recover a thread (or the only thread, when `None`).
    RecoverThread {
        /// Thread to recover.
        thread_id: Option<LowercaseUuid>,
    },
    /// Recover the live chat thread.
    RecoverLivechat {
        /// Thread to recover.
        thread_id: Option<LowercaseUuid>,
    },
    /// List the customer's threads.
    FetchThreadList,
    /// Load last message and owner of a thread.
    LoadThreadMetadata {
        /// Thread to inspect.
        thread_id: LowercaseUuid,
    },
    /// Archive a thread.
    ArchiveThread {
        /// Thread to archive.
        thread_id: LowercaseUuid,
    },
    /// Rename a thread.
    UpdateThread {
        /// Thread to rename.
        thread_id: LowercaseUuid,
        /// New name.
        name: String,
    },
    /// Mark a thread as seen by the customer.
    MessageSeenByCustomer {
        /// Seen thread.
        thread_id: LowercaseUuid,
    },
    /// The customer started typing.
    SenderTypingStarted {
        /// Thread being typed in.
        thread_id: LowercaseUuid,
    },
    /// The customer stopped typing.
    SenderTypingEnded {
        /// Thread being typed in.
        thread_id: LowercaseUuid,
    },
    /// Set customer custom fields.
    SetCustomerCustomFields {
        /// Values to set.
        fields: Vec<CustomFieldValue>,
    },
    /// Set contact custom fields.
    SetConsumerContactCustomFields {
        /// Thread of the contact.
        thread_id: LowercaseUuid,
        /// Contact id.
        contact_id: String,
        /// Values to set.
        fields: Vec<CustomFieldValue>,
    },
    /// End the contact of a live chat thread.
    EndContact {
        /// Thread of the contact.
        thread_id: LowercaseUuid,
        /// Contact id.
        contact_id: String,
    },
    /// Run a backend trigger.
    ExecuteTrigger {
        /// Trigger id.
        trigger_id: LowercaseUuid,
    },
    /// Report visitor events.
    StoreVisitorEvents {
        /// Events to report.
        events: Vec<VisitorEvent>,
    },
}

fn thread_ref(id: LowercaseUuid) -> Value {
    json!({ "idOnExternalPlatform": id })
}

fn field_values(fields: &[CustomFieldValue]) -> Value {
    fields
        .iter()
        .map(|f| json!({"ident": f.ident, "value": f.value}))
        .collect()
}

impl Command {
    /// Wire `eventType`.
    #[must_use]
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::AuthorizeCustomer { .. } => "AuthorizeCustomer",
            Self::ReconnectCustomer { .. } => "ReconnectCustomer",
            Self::RefreshToken { .. } => "RefreshToken",
            Self::SendMessage { .. } => "SendMessage",
            Self::LoadMoreMessages { .. } => "LoadMoreMessages",
            Self::RecoverThread { .. } => "RecoverThread",
            Self::RecoverLivechat { .. } => "RecoverLivechat",
            Self::FetchThreadList => "FetchThreadList",
            Self::LoadThreadMetadata { .. } => "LoadThreadMetadata",
            Self::ArchiveThread { .. } => "ArchiveThread",
            Self::UpdateThread { .. } => "UpdateThread",
            Self::MessageSeenByCustomer { .. } => "MessageSeenByCustomer",
            Self::SenderTypingStarted { .. } => "SenderTypingStarted",
            Self::SenderTypingEnded { .. } => "SenderTypingEnded",
            Self::SetCustomerCustomFields { .. } => "SetCustomerCustomFields",
            Self::SetConsumerContactCustomFields { .. } => "SetConsumerContactCustomFields",
            Self::EndContact { .. } => "EndContact",
            Self::ExecuteTrigger { .. } => "ExecuteTrigger",
            Self::StoreVisitorEvents { .. } => "StoreVisitorEvents",
        }
    }

    fn destination(&self) -> Option<LowercaseUuid> {
        match self {
            Self::SendMessage { thread_id, .. } => Some(*thread_id),
            _ => None,
        }
    }

    fn data(&self) -> Option<Value> {
        let data = match self {
            Self::AuthorizeCustomer {
                authorization_code,
                code_verifier,
            } => {
                let mut authorization = Map::new();
                if let Some(code) = authorization_code {
                    authorization.insert("authorizationCode".to_string(), json!(code));
                }
                if let Some(verifier) = code_verifier {
                    authorization.insert("codeVerifier".to_string(), json!(verifier));
                }
                json!({ "authorization": authorization })
            }
            Self::ReconnectCustomer { token } | Self::RefreshToken { token } => {
                json!({ "accessToken": { "token": token } })
            }
            Self::SendMessage {
                thread_id,
                thread_name,
                message_id,
                content,
                attachments,
                customer_fields,
                contact_fields,
                token,
            } => {
                let mut thread = Map::new();
                thread.insert("idOnExternalPlatform".to_string(), json!(thread_id));
                if let Some(name) = thread_name {
                    thread.insert("threadName".to_string(), json!(name));
                }
                let mut data = Map::new();
                data.insert("thread".to_string(), Value::Object(thread));
                data.insert("idOnExternalPlatform".to_string(), json!(message_id));
                data.insert("messageContent".to_string(), content.to_value());
                data.insert("attachments".to_string(), json!(attachments));
                if !customer_fields.is_empty() {
                    data.insert(
                        "customer".to_string(),
                        json!({ "customFields": field_values(customer_fields) }),
                    );
                }
                if !contact_fields.is_empty() {
                    data.insert(
                        "consumerContact".to_string(),
                        json!({ "customFields": field_values(contact_fields) }),
                    );
                }
                if let Some(token) = token {
                    data.insert("accessToken".to_string(), json!({ "token": token }));
                }
                Value::Object(data)
            }
            Self::LoadMoreMessages {
                thread_id,
                scroll_token,
                oldest_message_created_at,
            } => json!({
                "scrollToken": scroll_token,
                "thread": thread_ref(*thread_id),
                "oldestMessageDatetime":
                    oldest_message_created_at.to_rfc3339_opts(SecondsFormat::Millis, true),
            }),
            Self::RecoverThread { thread_id } | Self::RecoverLivechat { thread_id } => {
                match thread_id {
                    Some(id) => json!({ "thread": thread_ref(*id) }),
                    None => return None,
                }
            }
            Self::FetchThreadList => return None,
            Self::LoadThreadMetadata { thread_id }
            | Self::ArchiveThread { thread_id }
            | Self::MessageSeenByCustomer { thread_id }
            | Self::SenderTypingStarted { thread_id }
            | Self::SenderTypingEnded { thread_id } => json!({ "thread": thread_ref(*thread_id) }),
            Self::UpdateThread { thread_id, name } => json!({
                "thread": { "idOnExternalPlatform": thread_id, "threadName": name }
            }),
            Self::SetCustomerCustomFields { fields } => {
                json!({ "customFields": field_values(fields) })
            }
            Self::SetConsumerContactCustomFields {
                thread_id,
                contact_id,
                fields,
            } => json!({
                "thread": thread_ref(*thread_id),
                "consumerContact": { "id": contact_id },
                "customFields": field_values(fields),
            }),
            Self::EndContact {
                thread_id,
                contact_id,
            } => json!({
                "thread": thread_ref(*thread_id),
                "contact": { "id": contact_id },
            }),
            Self::ExecuteTrigger { trigger_id } => json!({ "trigger": { "id": trigger_id } }),
            Self::StoreVisitorEvents { events } => json!({
                "visitorEvents": events.iter().map(VisitorEvent::to_value).collect::<Vec<_>>(),
            }),
        };
        Some(data)
    }

    /// Build the frame for this command with a fresh event id.
    #[must_use]
    pub fn frame(&self, ctx: &CommandContext) -> OutboundFrame {
        self.frame_with_id(ctx, LowercaseUuid::new_v4())
    }

    /// Build the frame for this command with a given event id.
    #[must_use]
    pub fn frame_with_id(&self, ctx: &CommandContext, event_id: LowercaseUuid) -> OutboundFrame {
        let mut payload = Map::new();
        payload.insert("eventType".to_string(), json!(self.event_type()));
        payload.insert("brand".to_string(), json!({ "id": ctx.brand_id }));
        payload.insert("channel".to_string(), json!({ "id": ctx.channel_id }));
        if let Some(customer) = &ctx.customer {
            payload.insert(
                "consumerIdentity".to_string(),
                json!({
                    "idOnExternalPlatform": customer.id_on_external_platform,
                    "firstName": customer.first_name,
                    "lastName": customer.last_name,
                }),
            );
        }
        if let Some(visitor) = ctx.visitor_id {
            payload.insert("visitor".to_string(), json!({ "id": visitor }));
        }
        if let Some(destination) = self.destination() {
            payload.insert("destination".to_string(), json!({ "id": destination }));
        }
        if let Some(data) = self.data() {
            payload.insert("data".to_string(), data);
        }

        OutboundFrame {
            event_id,
            value: json!({
                "action": CHAT_WINDOW_EVENT,
                "eventId": event_id,
                "payload": payload,
            }),
        }
    }
}

/// An encoded command ready to send.
#[derive(Debug, Clone, PartialEq)]
pub struct OutboundFrame {
    /// Event id responses will carry.
    pub event_id: LowercaseUuid,
    /// Full frame.
    pub value: Value,
}

impl OutboundFrame {
    /// Text of the WebSocket frame.
    #[must_use]
    pub fn to_text(&self) -> String {
        self.value.to_string()
    }
}
