//! Inbound event envelope and typed event payloads.
//!
//! Every inbound frame carries an `eventId`. The payload kind comes from the
//! nested `postback.eventType` when a postback is present (responses to our
//! own commands), otherwise from the top-level `eventType` (pushes from the
//! backend). A frame with a non-null `error` object is a [`ServerError`] and
//! needs neither.
//!
//! `MessageCreated` frames have no discriminator telling an inactivity popup
//! apart from a regular message, so they are trial-decoded: the popup shape
//! first, then the generic message. Kinds this version does not know decode
//! to [`EventPayload::Generic`] carrying the raw frame.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use super::custom_field::CustomFieldValue;
use super::lowercase_uuid::LowercaseUuid;
use super::message::{Agent, Contact, CustomerIdentity, Message, MessageDirection, ThreadInfo, ThreadRef};
use super::variable::Variable;
use crate::error::{join_path, DecodeError, ErrorCode, ServerError};
use crate::transport::SessionState;

/// Discriminator of an event.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum EventKind {
    // === Pushed by the backend ===
    /// An agent started typing.
    SenderTypingStarted,
    /// An agent stopped typing.
    SenderTypingEnded,
    /// A message was added to a thread.
    MessageCreated,
    /// Seen/read statistics of a message changed.
    MessageReadChanged,
    /// The agent assigned to a contact changed.
    ContactInboxAssigneeChanged,
    /// A contact changed status.
    CaseStatusChanged,
    /// Thread metadata (name) changed.
    ThreadUpdated,
    /// Live chat queue position update.
    SetPositionInQueue,
    /// A proactive action (popup, offer) should be shown.
    FireProactiveAction,
    /// Contact custom fields were set.
    ContactCustomFieldsSet,

    // === Postbacks answering our commands ===
    /// Customer authorized; may carry an access token.
    CustomerAuthorized,
    /// Customer reconnected with a stored token.
    CustomerReconnected,
    /// A new access token was issued.
    TokenRefreshed,
    /// A thread and its latest messages were recovered.
    ThreadRecovered,
    /// The live chat thread was recovered.
    LivechatRecovered,
    /// A page of older messages.
    MoreMessagesLoaded,
    /// The customer's threads.
    ThreadListFetched,
    /// Metadata (last message, owner) of a thread.
    ThreadMetadataLoaded,
    /// A thread was archived.
    ThreadArchived,

    /// The backend answered with an error payload.
    Error,

    // === Synthesized locally ===
    /// The session changed state.
    ConnectionStateChanged,
    /// The connection was lost and could not be re-established.
    UnexpectedDisconnect,
    /// Refreshing the access token failed.
    TokenRefreshFailed,

    /// Any kind this version does not know.
    Unknown(String),
}

impl EventKind {
    /// Map a wire `eventType` to a kind.
    #[must_use]
    pub fn parse(raw: &str) -> Self {
        match raw {
            "SenderTypingStarted" => Self::SenderTypingStarted,
            "SenderTypingEnded" => Self::SenderTypingEnded,
            "MessageCreated" => Self::MessageCreated,
            "MessageReadChanged" => Self::MessageReadChanged,
            "ContactInboxAssigneeChanged" => Self::ContactInboxAssigneeChanged,
            "CaseStatusChanged" => Self::CaseStatusChanged,
            "ThreadUpdated" => Self::ThreadUpdated,
            "SetPositionInQueue" => Self::SetPositionInQueue,
            "FireProactiveAction" => Self::FireProactiveAction,
            "ContactCustomFieldsSet" => Self::ContactCustomFieldsSet,
            "CustomerAuthorized" => Self::CustomerAuthorized,
            "CustomerReconnected" => Self::CustomerReconnected,
            "TokenRefreshed" => Self::TokenRefreshed,
            "ThreadRecovered" => Self::ThreadRecovered,
            "LivechatRecovered" => Self::LivechatRecovered,
            "MoreMessagesLoaded" => Self::MoreMessagesLoaded,
            "ThreadListFetched" => Self::ThreadListFetched,
            "ThreadMetadataLoaded" => Self::ThreadMetadataLoaded,
            "ThreadArchived" => Self::ThreadArchived,
            other => Self::Unknown(other.to_string()),
        }
    }

    /// Wire (or local) spelling of the kind.
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::SenderTypingStarted => "SenderTypingStarted",
            Self::SenderTypingEnded => "SenderTypingEnded",
            Self::MessageCreated => "MessageCreated",
            Self::MessageReadChanged => "MessageReadChanged",
            Self::ContactInboxAssigneeChanged => "ContactInboxAssigneeChanged",
            Self::CaseStatusChanged => "CaseStatusChanged",
            Self::ThreadUpdated => "ThreadUpdated",
            Self::SetPositionInQueue => "SetPositionInQueue",
            Self::FireProactiveAction => "FireProactiveAction",
            Self::ContactCustomFieldsSet => "ContactCustomFieldsSet",
            Self::CustomerAuthorized => "CustomerAuthorized",
            Self::CustomerReconnected => "CustomerReconnected",
            Self::TokenRefreshed => "TokenRefreshed",
            Self::ThreadRecovered => "ThreadRecovered",
            Self::LivechatRecovered => "LivechatRecovered",
            Self::MoreMessagesLoaded => "MoreMessagesLoaded",
            Self::ThreadListFetched => "ThreadListFetched",
            Self::ThreadMetadataLoaded => "ThreadMetadataLoaded",
            Self::ThreadArchived => "ThreadArchived",
            Self::Error => "Error",
            Self::ConnectionStateChanged => "ConnectionStateChanged",
            Self::UnexpectedDisconnect => "UnexpectedDisconnect",
            Self::TokenRefreshFailed => "TokenRefreshFailed",
            Self::Unknown(raw) => raw,
        }
    }

    /// Kinds that arrive nested in a `postback` object.
    #[must_use]
    pub fn is_postback(&self) -> bool {
        matches!(
            self,
            Self::CustomerAuthorized
                | Self::CustomerReconnected
                | Self::TokenRefreshed
                | Self::ThreadRecovered
                | Self::LivechatRecovered
                | Self::MoreMessagesLoaded
                | Self::ThreadListFetched
                | Self::ThreadMetadataLoaded
                | Self::ThreadArchived
        )
    }

    /// Kinds that never travel over the wire.
    #[must_use]
    pub fn is_local(&self) -> bool {
        matches!(
            self,
            Self::ConnectionStateChanged | Self::UnexpectedDisconnect | Self::TokenRefreshFailed
        )
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Payloads
// ============================================================================

/// `SenderTypingStarted` / `SenderTypingEnded`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentTypingEvent {
    /// Thread the agent is typing in.
    pub thread: ThreadRef,
    /// The typing agent.
    #[serde(rename = "user", default, skip_serializing_if = "Option::is_none")]
    pub agent: Option<Agent>,
    /// `true` for started, `false` for ended.
    #[serde(skip)]
    pub is_typing: bool,
}

/// A regular `MessageCreated`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageCreatedEvent {
    /// Thread the message belongs to.
    pub thread: ThreadInfo,
    /// The new message.
    pub message: Message,
    /// The contact the message was routed to.
    #[serde(rename = "case", default, skip_serializing_if = "Option::is_none")]
    pub contact: Option<Contact>,
}

/// A button of the inactivity popup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PopupButton {
    /// Label.
    pub text: String,
    /// Postback sent when tapped.
    pub postback: String,
}

/// Variables of an `INACTIVITY_POPUP` plugin element.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InactivityPopup {
    /// Element id.
    #[serde(skip)]
    pub id: String,
    /// Popup title.
    pub title: String,
    /// Popup body.
    pub body: String,
    /// Prompt above the buttons.
    pub call_to_action: String,
    /// When the countdown started.
    pub started_at: DateTime<Utc>,
    /// Countdown length.
    pub number_of_seconds: u64,
    /// Keeps the chat open.
    pub refresh_button: PopupButton,
    /// Ends the chat.
    pub expire_button: PopupButton,
}

/// A `MessageCreated` whose message is an inactivity popup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InactivityPopupEvent {
    /// Thread the popup belongs to.
    pub thread: ThreadInfo,
    /// Id of the carrying message.
    pub message_id: LowercaseUuid,
    /// Creation time of the carrying message.
    pub created_at: DateTime<Utc>,
    /// Direction of the carrying message.
    pub direction: MessageDirection,
    /// The popup itself.
    pub popup: InactivityPopup,
}

const INACTIVITY_POPUP: &str = "INACTIVITY_POPUP";

#[derive(Deserialize)]
struct PopupFrameWire {
    thread: ThreadInfo,
    message: PopupMessageWire,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct PopupMessageWire {
    #[serde(rename = "idOnExternalPlatform")]
    id: LowercaseUuid,
    created_at: DateTime<Utc>,
    direction: MessageDirection,
    message_content: PopupContentWire,
}

#[derive(Deserialize)]
struct PopupContentWire {
    #[serde(rename = "type")]
    kind: String,
    payload: PopupPayloadWire,
}

#[derive(Deserialize)]
struct PopupPayloadWire {
    elements: Vec<PopupElementWire>,
}

#[derive(Deserialize)]
struct PopupElementWire {
    #[serde(rename = "type")]
    kind: String,
    id: String,
    variables: InactivityPopup,
}

impl InactivityPopupEvent {
    fn decode(data: &Value, path: &str) -> Result<Self, DecodeError> {
        let wire: PopupFrameWire =
            serde_json::from_value(data.clone()).map_err(|e| DecodeError::at(path, &e))?;
        let content = wire.message.message_content;
        let shape_error = || DecodeError::NoMatchingShape {
            type_name: "InactivityPopupEvent",
            path: join_path(path, "message.messageContent"),
        };
        if !content.kind.eq_ignore_ascii_case("PLUGIN") {
            return Err(shape_error());
        }
        let element = content
            .payload
            .elements
            .into_iter()
            .next()
            .filter(|e| e.kind == INACTIVITY_POPUP)
            .ok_or_else(shape_error)?;

        let mut popup = element.variables;
        popup.id = element.id;
        Ok(Self {
            thread: wire.thread,
            message_id: wire.message.id,
            created_at: wire.message.created_at,
            direction: wire.message.direction,
            popup,
        })
    }

    fn to_data(&self) -> Value {
        json!({
            "thread": self.thread,
            "message": {
                "idOnExternalPlatform": self.message_id,
                "threadIdOnExternalPlatform": self.thread.id,
                "createdAt": self.created_at,
                "direction": self.direction,
                "messageContent": {
                    "type": "PLUGIN",
                    "payload": {
                        "elements": [{
                            "type": INACTIVITY_POPUP,
                            "id": self.popup.id,
                            "variables": self.popup,
                        }]
                    }
                }
            }
        })
    }
}

/// `MessageReadChanged`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageReadChangedEvent {
    /// The message with updated statistics.
    pub message: Message,
}

/// `ContactInboxAssigneeChanged`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssigneeChangedEvent {
    /// The contact whose assignee changed.
    #[serde(rename = "case")]
    pub contact: Contact,
    /// The new assignee.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inbox_assignee: Option<Agent>,
    /// The previous assignee.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub previous_inbox_assignee: Option<Agent>,
}

/// `CaseStatusChanged`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaseStatusChangedEvent {
    /// The contact with its new status.
    #[serde(rename = "case")]
    pub contact: Contact,
}

/// `ThreadUpdated`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThreadUpdatedEvent {
    /// The updated thread descriptor.
    pub thread: ThreadInfo,
}

/// `SetPositionInQueue`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueuePositionEvent {
    /// 1-based position in the live chat queue.
    pub position_in_queue: u32,
    /// Whether any agent is online.
    #[serde(default)]
    pub has_online_agent: bool,
}

/// A proactive action the backend wants shown.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProactiveAction {
    /// Action id.
    #[serde(rename = "actionId")]
    pub id: LowercaseUuid,
    /// Action name.
    #[serde(rename = "actionName")]
    pub name: String,
    /// Action type (for example `WelcomeMessage`, `CustomPopupBox`).
    #[serde(rename = "actionType")]
    pub kind: String,
    /// Free-form data bag.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub data: BTreeMap<String, Variable>,
}

/// `FireProactiveAction`.
#[derive(Debug, Clone, PartialEq)]
pub struct ProactiveActionEvent {
    /// The action to show.
    pub action: ProactiveAction,
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ProactiveFrameWire {
    proactive_action: ProactiveActionWire,
}

#[derive(Serialize, Deserialize)]
struct ProactiveActionWire {
    action: ProactiveAction,
}

/// `ContactCustomFieldsSet`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContactCustomFieldsSetEvent {
    /// Contact the fields belong to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contact_id: Option<String>,
    /// Thread the contact belongs to.
    #[serde(
        rename = "threadIdOnExternalPlatform",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub thread_id: Option<LowercaseUuid>,
    /// The values that were set.
    pub custom_fields: Vec<CustomFieldValue>,
}

/// Access token as issued on the wire (no creation time).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IssuedToken {
    /// Opaque token.
    pub token: String,
    /// Lifetime in seconds.
    pub expires_in: u64,
}

/// `CustomerAuthorized`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CustomerAuthorizedEvent {
    /// The authorized customer.
    #[serde(rename = "consumerIdentity")]
    pub identity: CustomerIdentity,
    /// Token for later reconnects (channels with authorization enabled).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access_token: Option<IssuedToken>,
}

/// `CustomerReconnected`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CustomerReconnectedEvent {}

/// `TokenRefreshed`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenRefreshedEvent {
    /// The new token.
    pub access_token: IssuedToken,
}

/// `ThreadRecovered` / `LivechatRecovered`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ThreadRecoveredEvent {
    /// The recovered thread.
    pub thread: ThreadInfo,
    /// Latest messages, oldest first.
    #[serde(default)]
    pub messages: Vec<Message>,
    /// Assigned agent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inbox_assignee: Option<Agent>,
    /// The contact attached to the thread.
    #[serde(rename = "consumerContact", default, skip_serializing_if = "Option::is_none")]
    pub contact: Option<Contact>,
    /// Token for loading older messages; empty when everything is loaded.
    #[serde(rename = "messagesScrollToken", default)]
    pub scroll_token: String,
    /// `true` when recovered through `RecoverLivechat`.
    #[serde(skip)]
    pub is_livechat: bool,
}

/// `MoreMessagesLoaded`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MoreMessagesLoadedEvent {
    /// Older messages, oldest first.
    #[serde(default)]
    pub messages: Vec<Message>,
    /// Token for the next page; empty when everything is loaded.
    #[serde(default)]
    pub scroll_token: String,
}

impl MoreMessagesLoadedEvent {
    /// Thread the page belongs to, taken from its messages.
    #[must_use]
    pub fn thread_id(&self) -> Option<LowercaseUuid> {
        self.messages.first().map(|m| m.thread_id)
    }
}

/// `ThreadListFetched`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThreadListFetchedEvent {
    /// The customer's threads.
    #[serde(default)]
    pub threads: Vec<ThreadInfo>,
}

/// `ThreadMetadataLoaded`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ThreadMetadataLoadedEvent {
    /// Agent owning the thread.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner_assignee: Option<Agent>,
    /// Most recent message.
    pub last_message: Message,
}

/// `ThreadArchived`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThreadArchivedEvent {
    /// The archived thread.
    pub thread: ThreadRef,
}

/// `ConnectionStateChanged` (local).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectionStateChangedEvent {
    /// State before the transition.
    pub from: SessionState,
    /// State after the transition.
    pub to: SessionState,
}

/// `UnexpectedDisconnect` (local).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnexpectedDisconnectEvent {
    /// Why the last reconnect attempt failed.
    pub reason: String,
}

/// `TokenRefreshFailed` (local).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenRefreshFailedEvent {
    /// Why the refresh failed.
    pub reason: String,
}

/// Decoded payload of an [`Event`].
#[derive(Debug, Clone, PartialEq)]
pub enum EventPayload {
    /// Agent typing started or ended.
    AgentTyping(AgentTypingEvent),
    /// A new message in a thread.
    MessageCreated(MessageCreatedEvent),
    /// Inactivity popup delivered as a message.
    InactivityPopup(InactivityPopupEvent),
    /// Seen/read statistics of a message changed.
    MessageReadChanged(MessageReadChangedEvent),
    /// The contact was (re)assigned.
    AssigneeChanged(AssigneeChangedEvent),
    /// The contact changed status.
    CaseStatusChanged(CaseStatusChangedEvent),
    /// Thread renamed or otherwise updated.
    ThreadUpdated(ThreadUpdatedEvent),
    /// Position in the agent queue.
    QueuePosition(QueuePositionEvent),
    /// Proactive action to show.
    ProactiveAction(ProactiveActionEvent),
    /// Contact custom fields were set.
    ContactCustomFieldsSet(ContactCustomFieldsSetEvent),
    /// Answer to `AuthorizeCustomer`.
    CustomerAuthorized(CustomerAuthorizedEvent),
    /// Answer to `ReconnectCustomer`.
    CustomerReconnected(CustomerReconnectedEvent),
    /// Answer to `RefreshToken`.
    TokenRefreshed(TokenRefreshedEvent),
    /// Answer to `RecoverThread` / `RecoverLivechat`.
    ThreadRecovered(ThreadRecoveredEvent),
    /// Answer to `LoadMoreMessages`.
    MoreMessagesLoaded(MoreMessagesLoadedEvent),
    /// Answer to `FetchThreadList`.
    ThreadListFetched(ThreadListFetchedEvent),
    /// Answer to `LoadThreadMetadata`.
    ThreadMetadataLoaded(ThreadMetadataLoadedEvent),
    /// Answer to `ArchiveThread`.
    ThreadArchived(ThreadArchivedEvent),
    /// Error sent in place of an event.
    ServerError(ServerError),
    /// Local: session state changed.
    ConnectionStateChanged(ConnectionStateChangedEvent),
    /// Local: reconnect attempts ran out.
    UnexpectedDisconnect(UnexpectedDisconnectEvent),
    /// Local: token refresh failed.
    TokenRefreshFailed(TokenRefreshFailedEvent),
    /// Unknown kind; the complete raw frame.
    Generic(Value),
}

/// A decoded inbound (or locally synthesized) event.
#[derive(Debug, Clone, PartialEq)]
pub struct Event {
    /// Event id; responses reuse the id of the command they answer.
    pub id: LowercaseUuid,
    /// Discriminator.
    pub kind: EventKind,
    /// Server timestamp, when sent.
    pub created_at: Option<DateTime<Utc>>,
    /// Typed payload.
    pub payload: EventPayload,
}

// ============================================================================
// Decoding
// ============================================================================

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct EnvelopeWire {
    event_id: LowercaseUuid,
    #[serde(default)]
    event_type: Option<String>,
    #[serde(default)]
    created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    data: Option<Value>,
    #[serde(default)]
    postback: Option<PostbackWire>,
    #[serde(default)]
    error: Option<ErrorWire>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct PostbackWire {
    event_type: String,
    #[serde(default)]
    data: Option<Value>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ErrorWire {
    error_code: String,
    #[serde(default)]
    transaction_id: String,
    #[serde(default)]
    error_message: String,
}

fn parse<T: DeserializeOwned>(data: &Value, path: &str) -> Result<T, DecodeError> {
    serde_json::from_value(data.clone()).map_err(|e| DecodeError::at(path, &e))
}

impl Event {
    /// Build a locally synthesized event.
    #[must_use]
    pub fn local(kind: EventKind, payload: EventPayload) -> Self {
        Self {
            id: LowercaseUuid::new_v4(),
            kind,
            created_at: Some(Utc::now()),
            payload,
        }
    }

    /// Decode one inbound frame already parsed as JSON.
    pub fn decode(frame: &Value) -> Result<Self, DecodeError> {
        let envelope: EnvelopeWire = parse(frame, "")?;

        if let Some(error) = envelope.error {
            return Ok(Self {
                id: envelope.event_id,
                kind: EventKind::Error,
                created_at: envelope.created_at,
                payload: EventPayload::ServerError(ServerError {
                    code: ErrorCode::parse(&error.error_code),
                    transaction_id: error.transaction_id,
                    message: error.error_message,
                }),
            });
        }

        let (raw_kind, data, path) = match (envelope.postback, envelope.event_type) {
            (Some(postback), _) => (postback.event_type, postback.data, "postback.data"),
            (None, Some(event_type)) => (event_type, envelope.data, "data"),
            (None, None) => {
                return Err(DecodeError::MissingField {
                    path: "eventType".to_string(),
                })
            }
        };

        let kind = EventKind::parse(&raw_kind);
        let data = data.unwrap_or_else(|| Value::Object(Map::new()));
        let payload = decode_payload(&kind, &data, path, frame)?;

        Ok(Self {
            id: envelope.event_id,
            kind,
            created_at: envelope.created_at,
            payload,
        })
    }

    /// Re-encode a wire event as its frame. Local events have no wire form.
    #[must_use]
    pub fn to_value(&self) -> Option<Value> {
        if self.kind.is_local() {
            return None;
        }
        if let EventPayload::Generic(raw) = &self.payload {
            return Some(raw.clone());
        }

        let mut frame = Map::new();
        frame.insert("eventId".to_string(), json!(self.id));
        if let Some(created_at) = self.created_at {
            frame.insert("createdAt".to_string(), json!(created_at));
        }

        if let EventPayload::ServerError(error) = &self.payload {
            frame.insert(
                "error".to_string(),
                json!({
                    "errorCode": error.code.as_str(),
                    "transactionId": error.transaction_id,
                    "errorMessage": error.message,
                }),
            );
            return Some(Value::Object(frame));
        }

        let data = payload_data(&self.payload)?;
        if self.kind.is_postback() {
            frame.insert(
                "postback".to_string(),
                json!({"eventType": self.kind.as_str(), "data": data}),
            );
        } else {
            frame.insert("eventType".to_string(), json!(self.kind.as_str()));
            frame.insert("data".to_string(), data);
        }
        Some(Value::Object(frame))
    }
}

fn decode_payload(
    kind: &EventKind,
    data: &Value,
    path: &str,
    frame: &Value,
) -> Result<EventPayload, DecodeError> {
    Ok(match kind {
        EventKind::SenderTypingStarted | EventKind::SenderTypingEnded => {
            let mut typing: AgentTypingEvent = parse(data, path)?;
            typing.is_typing = *kind == EventKind::SenderTypingStarted;
            EventPayload::AgentTyping(typing)
        }
        // No discriminator: popup shape first, generic message second.
        EventKind::MessageCreated => match InactivityPopupEvent::decode(data, path) {
            Ok(popup) => EventPayload::InactivityPopup(popup),
            Err(_) => EventPayload::MessageCreated(parse(data, path)?),
        },
        EventKind::MessageReadChanged => EventPayload::MessageReadChanged(parse(data, path)?),
        EventKind::ContactInboxAssigneeChanged => {
            EventPayload::AssigneeChanged(parse(data, path)?)
        }
        EventKind::CaseStatusChanged => EventPayload::CaseStatusChanged(parse(data, path)?),
        EventKind::ThreadUpdated => EventPayload::ThreadUpdated(parse(data, path)?),
        EventKind::SetPositionInQueue => EventPayload::QueuePosition(parse(data, path)?),
        EventKind::FireProactiveAction => {
            let wire: ProactiveFrameWire = parse(data, path)?;
            EventPayload::ProactiveAction(ProactiveActionEvent {
                action: wire.proactive_action.action,
            })
        }
        EventKind::ContactCustomFieldsSet => {
            EventPayload::ContactCustomFieldsSet(parse(data, path)?)
        }
        EventKind::CustomerAuthorized => EventPayload::CustomerAuthorized(parse(data, path)?),
        EventKind::CustomerReconnected => EventPayload::CustomerReconnected(parse(data, path)?),
        EventKind::TokenRefreshed => EventPayload::TokenRefreshed(parse(data, path)?),
        EventKind::ThreadRecovered | EventKind::LivechatRecovered => {
            let mut recovered: ThreadRecoveredEvent = parse(data, path)?;
            recovered.is_livechat = *kind == EventKind::LivechatRecovered;
            EventPayload::ThreadRecovered(recovered)
        }
        EventKind::MoreMessagesLoaded => EventPayload::MoreMessagesLoaded(parse(data, path)?),
        EventKind::ThreadListFetched => EventPayload::ThreadListFetched(parse(data, path)?),
        EventKind::ThreadMetadataLoaded => EventPayload::ThreadMetadataLoaded(parse(data, path)?),
        EventKind::ThreadArchived => EventPayload::ThreadArchived(parse(data, path)?),
        EventKind::Error
        | EventKind::ConnectionStateChanged
        | EventKind::UnexpectedDisconnect
        | EventKind::TokenRefreshFailed
        | EventKind::Unknown(_) => EventPayload::Generic(frame.clone()),
    })
}

fn payload_data(payload: &EventPayload) -> Option<Value> {
    let value = match payload {
        EventPayload::AgentTyping(p) => serde_json::to_value(p),
        EventPayload::MessageCreated(p) => serde_json::to_value(p),
        EventPayload::InactivityPopup(p) => Ok(p.to_data()),
        EventPayload::MessageReadChanged(p) => serde_json::to_value(p),
        EventPayload::AssigneeChanged(p) => serde_json::to_value(p),
        EventPayload::CaseStatusChanged(p) => serde_json::to_value(p),
        EventPayload::ThreadUpdated(p) => serde_json::to_value(p),
        EventPayload::QueuePosition(p) => serde_json::to_value(p),
        EventPayload::ProactiveAction(p) => serde_json::to_value(ProactiveFrameWire {
            proactive_action: ProactiveActionWire {
                action: p.action.clone(),
            },
        }),
        EventPayload::ContactCustomFieldsSet(p) => serde_json::to_value(p),
        EventPayload::CustomerAuthorized(p) => serde_json::to_value(p),
        EventPayload::CustomerReconnected(p) => serde_json::to_value(p),
        EventPayload::TokenRefreshed(p) => serde_json::to_value(p),
        EventPayload::ThreadRecovered(p) => serde_json::to_value(p),
        EventPayload::MoreMessagesLoaded(p) => serde_json::to_value(p),
        EventPayload::ThreadListFetched(p) => serde_json::to_value(p),
        EventPayload::ThreadMetadataLoaded(p) => serde_json::to_value(p),
        EventPayload::ThreadArchived(p) => serde_json::to_value(p),
        EventPayload::ServerError(_)
        | EventPayload::ConnectionStateChanged(_)
        | EventPayload::UnexpectedDisconnect(_)
        | EventPayload::TokenRefreshFailed(_)
        | EventPayload::Generic(_) => return None,
    };
    value.ok()
}

/// Parse raw frame bytes and decode the event.
pub fn decode_event(bytes: &[u8]) -> Result<Event, DecodeError> {
    let frame: Value =
        serde_json::from_slice(bytes).map_err(|e| DecodeError::Json(e.to_string()))?;
    Event::decode(&frame)
}

// ============================================================================
// Typed views
// ============================================================================

/// A concrete event type the hub can deliver to typed subscribers.
///
/// `from_event` returns `None` when the event has another shape, even when it
/// shares the kind (a popup is not a [`MessageCreatedEvent`]).
pub trait TypedEvent: Sized + Send + 'static {
    /// Re-interpret `event` as `Self`.
    fn from_event(event: &Event) -> Option<Self>;
}

macro_rules! typed_event {
    ($($ty:ty => $variant:ident),* $(,)?) => {
        $(
            impl TypedEvent for $ty {
                fn from_event(event: &Event) -> Option<Self> {
                    match &event.payload {
                        EventPayload::$variant(payload) => Some(payload.clone()),
                        _ => None,
                    }
                }
            }
        )*
    };
}

typed_event! {
    AgentTypingEvent => AgentTyping,
    MessageCreatedEvent => MessageCreated,
    InactivityPopupEvent => InactivityPopup,
    MessageReadChangedEvent => MessageReadChanged,
    AssigneeChangedEvent => AssigneeChanged,
    CaseStatusChangedEvent => CaseStatusChanged,
    ThreadUpdatedEvent => ThreadUpdated,
    QueuePositionEvent => QueuePosition,
    ProactiveActionEvent => ProactiveAction,
    ContactCustomFieldsSetEvent => ContactCustomFieldsSet,
    CustomerAuthorizedEvent => CustomerAuthorized,
    CustomerReconnectedEvent => CustomerReconnected,
    TokenRefreshedEvent => TokenRefreshed,
    ThreadRecoveredEvent => ThreadRecovered,
    MoreMessagesLoadedEvent => MoreMessagesLoaded,
    ThreadListFetchedEvent => ThreadListFetched,
    ThreadMetadataLoadedEvent => ThreadMetadataLoaded,
    ThreadArchivedEvent => ThreadArchived,
    ServerError => ServerError,
    ConnectionStateChangedEvent => ConnectionStateChanged,
    UnexpectedDisconnectEvent => UnexpectedDisconnect,
    TokenRefreshFailedEvent => TokenRefreshFailed,
}

#[cfg(test)]
mod tests {
    use super::*;

    const THREAD: &str = "8a3c1d2e-0000-4000-8000-000000000001";

    fn message(content: Value) -> Value {
        json!({
            "idOnExternalPlatform": "0d4f0e6c-7c1b-4c8c-9a59-0f0b3c7e8f01",
            "threadIdOnExternalPlatform": THREAD,
            "messageContent": content,
            "createdAt": "2024-05-01T10:00:00Z",
            "direction": "outbound"
        })
    }

    fn popup_frame() -> Value {
        json!({
            "eventId": "11111111-2222-4333-8444-555555555555",
            "eventType": "MessageCreated",
            "createdAt": "2024-05-01T10:00:00Z",
            "data": {
                "thread": {"idOnExternalPlatform": THREAD},
                "message": message(json!({
                    "type": "PLUGIN",
                    "payload": {"elements": [{
                        "type": "INACTIVITY_POPUP",
                        "id": "popup-1",
                        "variables": {
                            "title": "Still there?",
                            "body": "The chat will close soon.",
                            "callToAction": "Keep chatting?",
                            "startedAt": "2024-05-01T10:00:00Z",
                            "numberOfSeconds": 60,
                            "refreshButton": {"text": "Yes", "postback": "refresh"},
                            "expireButton": {"text": "No", "postback": "expire"}
                        }
                    }]}
                }))
            }
        })
    }

    #[test]
    fn test_message_created_decodes_generic_message() {
        let frame = json!({
            "eventId": "11111111-2222-4333-8444-555555555555",
            "eventType": "MessageCreated",
            "data": {
                "thread": {"idOnExternalPlatform": THREAD, "threadName": "Support"},
                "message": message(json!({"type": "TEXT", "payload": {"text": "Hello"}}))
            }
        });
        let event = Event::decode(&frame).unwrap();
        assert_eq!(event.kind, EventKind::MessageCreated);
        let created = MessageCreatedEvent::from_event(&event).unwrap();
        assert_eq!(created.thread.thread_name.as_deref(), Some("Support"));
        assert!(InactivityPopupEvent::from_event(&event).is_none());
    }

    #[test]
    fn test_message_created_prefers_popup_shape() {
        let event = Event::decode(&popup_frame()).unwrap();
        assert_eq!(event.kind, EventKind::MessageCreated);
        let popup = InactivityPopupEvent::from_event(&event).unwrap();
        assert_eq!(popup.popup.id, "popup-1");
        assert_eq!(popup.popup.number_of_seconds, 60);
        assert_eq!(popup.popup.refresh_button.postback, "refresh");
        assert!(MessageCreatedEvent::from_event(&event).is_none());
    }

    #[test]
    fn test_popup_event_round_trips() {
        let event = Event::decode(&popup_frame()).unwrap();
        let again = Event::decode(&event.to_value().unwrap()).unwrap();
        assert_eq!(again, event);
    }

    #[test]
    fn test_postback_drives_payload() {
        let frame = json!({
            "eventId": "AAAAAAAA-2222-4333-8444-555555555555",
            "postback": {
                "eventType": "ThreadRecovered",
                "data": {
                    "thread": {"idOnExternalPlatform": THREAD},
                    "messages": [message(json!({"type": "TEXT", "payload": {"text": "Hi"}}))],
                    "messagesScrollToken": "scroll-1"
                }
            }
        });
        let event = Event::decode(&frame).unwrap();
        assert_eq!(event.kind, EventKind::ThreadRecovered);
        assert_eq!(event.id.to_string(), "aaaaaaaa-2222-4333-8444-555555555555");
        let recovered = ThreadRecoveredEvent::from_event(&event).unwrap();
        assert_eq!(recovered.messages.len(), 1);
        assert_eq!(recovered.scroll_token, "scroll-1");
        assert!(!recovered.is_livechat);

        let again = Event::decode(&event.to_value().unwrap()).unwrap();
        assert_eq!(again, event);
    }

    #[test]
    fn test_error_frame_needs_no_kind() {
        let frame = json!({
            "eventId": "11111111-2222-4333-8444-555555555555",
            "error": {
                "errorCode": "RecoveringThreadFailed",
                "transactionId": "tx-9",
                "errorMessage": "Thread not found"
            }
        });
        let event = Event::decode(&frame).unwrap();
        assert_eq!(event.kind, EventKind::Error);
        let error = ServerError::from_event(&event).unwrap();
        assert_eq!(error.code, ErrorCode::RecoveringThreadFailed);
        assert_eq!(error.transaction_id, "tx-9");
    }

    #[test]
    fn test_missing_kind_is_a_decode_error() {
        let frame = json!({"eventId": "11111111-2222-4333-8444-555555555555", "data": {}});
        assert_eq!(
            Event::decode(&frame).unwrap_err(),
            DecodeError::MissingField {
                path: "eventType".to_string()
            }
        );
    }

    #[test]
    fn test_missing_event_id_names_the_field() {
        let frame = json!({"eventType": "ThreadUpdated", "data": {}});
        assert_eq!(
            Event::decode(&frame).unwrap_err().path(),
            Some("eventId")
        );
    }

    #[test]
    fn test_unknown_kind_keeps_raw_frame() {
        let frame = json!({
            "eventId": "11111111-2222-4333-8444-555555555555",
            "eventType": "SomethingNew",
            "data": {"x": 1}
        });
        let event = Event::decode(&frame).unwrap();
        assert_eq!(event.kind, EventKind::Unknown("SomethingNew".to_string()));
        assert_eq!(event.payload, EventPayload::Generic(frame.clone()));
        assert_eq!(event.to_value(), Some(frame));
    }

    #[test]
    fn test_typing_flag_follows_kind() {
        let frame = json!({
            "eventId": "11111111-2222-4333-8444-555555555555",
            "eventType": "SenderTypingEnded",
            "data": {"thread": {"idOnExternalPlatform": THREAD}}
        });
        let typing = AgentTypingEvent::from_event(&Event::decode(&frame).unwrap()).unwrap();
        assert!(!typing.is_typing);
    }

    #[test]
    fn test_customer_reconnected_without_data() {
        let frame = json!({
            "eventId": "11111111-2222-4333-8444-555555555555",
            "postback": {"eventType": "CustomerReconnected"}
        });
        let event = Event::decode(&frame).unwrap();
        assert!(CustomerReconnectedEvent::from_event(&event).is_some());
    }

    #[test]
    fn test_invalid_bytes_are_a_json_error() {
        assert!(matches!(decode_event(b"{not json"), Err(DecodeError::Json(_))));
    }

    #[test]
    fn test_proactive_action_nested_shape() {
        let frame = json!({
            "eventId": "11111111-2222-4333-8444-555555555555",
            "eventType": "FireProactiveAction",
            "data": {"proactiveAction": {"action": {
                "actionId": "22222222-2222-4333-8444-555555555555",
                "actionName": "Welcome",
                "actionType": "WelcomeMessage",
                "data": {"content": {"bodyText": "Hi!"}}
            }}}
        });
        let event = Event::decode(&frame).unwrap();
        let action = ProactiveActionEvent::from_event(&event).unwrap().action;
        assert_eq!(action.kind, "WelcomeMessage");
        assert_eq!(
            action.data.get("content").and_then(|c| c.get("bodyText")).and_then(Variable::as_str),
            Some("Hi!")
        );
    }
}
