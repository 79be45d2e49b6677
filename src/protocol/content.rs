//! Message content: the `messageContent` object of a message.
//!
//! The discriminator is the `type` string, matched case-insensitively against
//! the known set. Anything else becomes [`MessageContent::Unknown`], which
//! keeps the original tag and payload so it re-encodes unchanged.
//!
//! Each known variant has its own nested payload shape on the wire (titles
//! wrapped in `{"content": ...}`, media under `media`, and so on). Those
//! shapes live in private `*Wire` structs and are mapped field by field into
//! the flat public types.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{json, Map, Value};

use super::plugin::PluginElement;
use crate::error::{join_path, DecodeError};

/// Wire discriminators for message content.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentType {
    /// `TEXT`
    Text,
    /// `PLUGIN`
    Plugin,
    /// `RICH_LINK`
    RichLink,
    /// `QUICK_REPLIES`
    QuickReplies,
    /// `LIST_PICKER`
    ListPicker,
}

impl ContentType {
    /// Map a wire `type` string, ignoring case.
    #[must_use]
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.to_ascii_uppercase().as_str() {
            "TEXT" => Some(Self::Text),
            "PLUGIN" => Some(Self::Plugin),
            "RICH_LINK" => Some(Self::RichLink),
            "QUICK_REPLIES" => Some(Self::QuickReplies),
            "LIST_PICKER" => Some(Self::ListPicker),
            _ => None,
        }
    }

    /// Canonical wire spelling.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Text => "TEXT",
            Self::Plugin => "PLUGIN",
            Self::RichLink => "RICH_LINK",
            Self::QuickReplies => "QUICK_REPLIES",
            Self::ListPicker => "LIST_PICKER",
        }
    }
}

/// Content of a chat message.
#[derive(Debug, Clone, PartialEq)]
pub enum MessageContent {
    /// Plain text.
    Text(TextContent),
    /// Rich plugin payload.
    Plugin(PluginContent),
    /// Link preview with an image.
    RichLink(RichLinkContent),
    /// Question with one-tap reply buttons.
    QuickReplies(QuickRepliesContent),
    /// Title, text and a list of selectable actions.
    ListPicker(ListPickerContent),
    /// Content type this version does not know.
    Unknown {
        /// Original `type` value.
        kind: String,
        /// Original payload.
        payload: Value,
        /// Text the backend suggests showing instead.
        fallback_text: Option<String>,
    },
}

/// `TEXT` payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TextContent {
    /// Message text.
    pub text: String,
    /// Postback attached to the text (quick reply answers).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub postback: Option<String>,
}

/// `PLUGIN` payload.
#[derive(Debug, Clone, PartialEq)]
pub struct PluginContent {
    /// Postback for the whole plugin.
    pub postback: Option<String>,
    /// The plugin element tree.
    pub element: PluginElement,
}

/// A file or image reference.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaRef {
    /// Display file name.
    pub file_name: String,
    /// File URL.
    pub url: String,
    /// Mime type.
    pub mime_type: String,
}

/// `RICH_LINK` payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RichLinkContent {
    /// Link title.
    pub title: String,
    /// Target URL.
    pub url: String,
    /// Preview image.
    pub media: MediaRef,
}

/// A reply button used by quick replies and list pickers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplyButton {
    /// Button label.
    pub text: String,
    /// Postback sent when selected.
    pub postback: Option<String>,
    /// Secondary line (list pickers).
    pub description: Option<String>,
    /// Optional icon.
    pub icon: Option<MediaRef>,
}

/// `QUICK_REPLIES` payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuickRepliesContent {
    /// Question text.
    pub title: String,
    /// Reply options.
    pub buttons: Vec<ReplyButton>,
}

/// `LIST_PICKER` payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListPickerContent {
    /// Picker title.
    pub title: String,
    /// Body text.
    pub text: String,
    /// Options.
    pub buttons: Vec<ReplyButton>,
}

// ----------------------------------------------------------------------------
// Wire shapes
// ----------------------------------------------------------------------------

#[derive(Serialize, Deserialize)]
struct Wrapped {
    content: String,
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ReplyButtonWire {
    #[serde(rename = "type", default = "reply_button_type")]
    kind: String,
    text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    postback: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    icon: Option<MediaRef>,
}

fn reply_button_type() -> String {
    "REPLY_BUTTON".to_string()
}

impl From<ReplyButtonWire> for ReplyButton {
    fn from(wire: ReplyButtonWire) -> Self {
        Self {
            text: wire.text,
            postback: wire.postback,
            description: wire.description,
            icon: wire.icon,
        }
    }
}

impl From<&ReplyButton> for ReplyButtonWire {
    fn from(button: &ReplyButton) -> Self {
        Self {
            kind: reply_button_type(),
            text: button.text.clone(),
            postback: button.postback.clone(),
            description: button.description.clone(),
            icon: button.icon.clone(),
        }
    }
}

#[derive(Serialize, Deserialize)]
struct RichLinkWire {
    title: Wrapped,
    url: String,
    media: MediaRef,
}

#[derive(Serialize, Deserialize)]
struct QuickRepliesWire {
    text: Wrapped,
    actions: Vec<ReplyButtonWire>,
}

#[derive(Serialize, Deserialize)]
struct ListPickerWire {
    title: Wrapped,
    text: Wrapped,
    actions: Vec<ReplyButtonWire>,
}

#[derive(Deserialize)]
struct PluginWire {
    #[serde(default)]
    postback: Option<String>,
    elements: Vec<Value>,
}

fn payload_of<T: serde::de::DeserializeOwned>(payload: &Value, path: &str) -> Result<T, DecodeError> {
    serde_json::from_value(payload.clone()).map_err(|e| DecodeError::at(path, &e))
}

impl MessageContent {
    /// Convenience constructor for outbound text.
    #[must_use]
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text(TextContent {
            text: text.into(),
            postback: None,
        })
    }

    /// Wire discriminator, `None` for unknown content.
    #[must_use]
    pub fn content_type(&self) -> Option<ContentType> {
        match self {
            Self::Text(_) => Some(ContentType::Text),
            Self::Plugin(_) => Some(ContentType::Plugin),
            Self::RichLink(_) => Some(ContentType::RichLink),
            Self::QuickReplies(_) => Some(ContentType::QuickReplies),
            Self::ListPicker(_) => Some(ContentType::ListPicker),
            Self::Unknown { .. } => None,
        }
    }

    /// Decode a `messageContent` object found at `path`.
    pub fn decode(value: &Value, path: &str) -> Result<Self, DecodeError> {
        let obj = value.as_object().ok_or_else(|| DecodeError::InvalidField {
            path: path.to_string(),
            message: "expected object".to_string(),
        })?;

        let kind = obj
            .get("type")
            .and_then(Value::as_str)
            .ok_or_else(|| DecodeError::MissingField {
                path: join_path(path, "type"),
            })?;
        let payload = obj.get("payload").cloned().unwrap_or(Value::Null);
        let payload_path = join_path(path, "payload");

        let Some(content_type) = ContentType::parse(kind) else {
            return Ok(Self::Unknown {
                kind: kind.to_string(),
                payload,
                fallback_text: obj
                    .get("fallbackText")
                    .and_then(Value::as_str)
                    .map(str::to_string),
            });
        };

        Ok(match content_type {
            ContentType::Text => Self::Text(payload_of(&payload, &payload_path)?),
            ContentType::Plugin => {
                let wire: PluginWire = payload_of(&payload, &payload_path)?;
                let element = PluginElement::decode_elements(
                    &wire.elements,
                    &join_path(&payload_path, "elements"),
                )?;
                Self::Plugin(PluginContent {
                    postback: wire.postback,
                    element,
                })
            }
            ContentType::RichLink => {
                let wire: RichLinkWire = payload_of(&payload, &payload_path)?;
                Self::RichLink(RichLinkContent {
                    title: wire.title.content,
                    url: wire.url,
                    media: wire.media,
                })
            }
            ContentType::QuickReplies => {
                let wire: QuickRepliesWire = payload_of(&payload, &payload_path)?;
                Self::QuickReplies(QuickRepliesContent {
                    title: wire.text.content,
                    buttons: wire.actions.into_iter().map(ReplyButton::from).collect(),
                })
            }
            ContentType::ListPicker => {
                let wire: ListPickerWire = payload_of(&payload, &payload_path)?;
                Self::ListPicker(ListPickerContent {
                    title: wire.title.content,
                    text: wire.text.content,
                    buttons: wire.actions.into_iter().map(ReplyButton::from).collect(),
                })
            }
        })
    }

    /// Encode into a `messageContent` object.
    #[must_use]
    pub fn to_value(&self) -> Value {
        let (kind, payload) = match self {
            Self::Text(text) => (ContentType::Text, to_value(text)),
            Self::Plugin(plugin) => {
                let mut map = Map::new();
                if let Some(postback) = &plugin.postback {
                    map.insert("postback".to_string(), Value::String(postback.clone()));
                }
                map.insert("elements".to_string(), Value::Array(plugin.element.to_elements()));
                (ContentType::Plugin, Value::Object(map))
            }
            Self::RichLink(link) => (
                ContentType::RichLink,
                to_value(&RichLinkWire {
                    title: Wrapped {
                        content: link.title.clone(),
                    },
                    url: link.url.clone(),
                    media: link.media.clone(),
                }),
            ),
            Self::QuickReplies(replies) => (
                ContentType::QuickReplies,
                to_value(&QuickRepliesWire {
                    text: Wrapped {
                        content: replies.title.clone(),
                    },
                    actions: replies.buttons.iter().map(ReplyButtonWire::from).collect(),
                }),
            ),
            Self::ListPicker(picker) => (
                ContentType::ListPicker,
                to_value(&ListPickerWire {
                    title: Wrapped {
                        content: picker.title.clone(),
                    },
                    text: Wrapped {
                        content: picker.text.clone(),
                    },
                    actions: picker.buttons.iter().map(ReplyButtonWire::from).collect(),
                }),
            ),
            Self::Unknown {
                kind,
                payload,
                fallback_text,
            } => {
                let mut obj = json!({ "type": kind, "payload": payload });
                if let Some(fallback) = fallback_text {
                    obj["fallbackText"] = Value::String(fallback.clone());
                }
                return obj;
            }
        };
        json!({ "type": kind.as_str(), "payload": payload })
    }
}

fn to_value<T: Serialize>(value: &T) -> Value {
    serde_json::to_value(value).unwrap_or(Value::Null)
}

impl Serialize for MessageContent {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_value().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for MessageContent {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = Value::deserialize(deserializer)?;
        Self::decode(&value, "messageContent").map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::plugin::{ButtonElement, CustomElement, ElementGroup, SubElement};
    use crate::protocol::variable::Variable;

    fn round_trip(content: &MessageContent) -> MessageContent {
        let bytes = serde_json::to_vec(content).unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    fn media() -> MediaRef {
        MediaRef {
            file_name: "preview.png".to_string(),
            url: "https://cdn.example.com/preview.png".to_string(),
            mime_type: "image/png".to_string(),
        }
    }

    fn sample_contents() -> Vec<MessageContent> {
        let mut variables = std::collections::BTreeMap::new();
        variables.insert("size".to_string(), Variable::Int(3));
        variables.insert("label".to_string(), Variable::String("big".to_string()));

        vec![
            MessageContent::text("hello"),
            MessageContent::Text(TextContent {
                text: "Yes".to_string(),
                postback: Some("/yes".to_string()),
            }),
            MessageContent::Plugin(PluginContent {
                postback: Some("plugin-pb".to_string()),
                element: PluginElement::Menu(ElementGroup {
                    id: "menu".to_string(),
                    elements: vec![
                        SubElement::Title {
                            id: "t".to_string(),
                            text: "Menu".to_string(),
                        },
                        SubElement::Button(ButtonElement {
                            id: "b".to_string(),
                            text: "Go".to_string(),
                            postback: Some("go".to_string()),
                            url: None,
                            display_in_app: false,
                        }),
                    ],
                }),
            }),
            MessageContent::Plugin(PluginContent {
                postback: None,
                element: PluginElement::gallery(vec![
                    PluginElement::Custom(CustomElement {
                        id: "c1".to_string(),
                        text: Some("fallback".to_string()),
                        variables,
                    }),
                    PluginElement::SatisfactionSurvey(ElementGroup {
                        id: "s1".to_string(),
                        elements: vec![],
                    }),
                ]),
            }),
            MessageContent::Plugin(PluginContent {
                postback: Some("single".to_string()),
                element: PluginElement::gallery(vec![PluginElement::Menu(ElementGroup {
                    id: "m".to_string(),
                    elements: vec![],
                })]),
            }),
            MessageContent::Plugin(PluginContent {
                postback: None,
                element: PluginElement::gallery(vec![]),
            }),
            MessageContent::RichLink(RichLinkContent {
                title: "Docs".to_string(),
                url: "https://example.com/docs".to_string(),
                media: media(),
            }),
            MessageContent::QuickReplies(QuickRepliesContent {
                title: "Pick a color".to_string(),
                buttons: vec![ReplyButton {
                    text: "Red".to_string(),
                    postback: Some("red".to_string()),
                    description: None,
                    icon: Some(media()),
                }],
            }),
            MessageContent::ListPicker(ListPickerContent {
                title: "Plans".to_string(),
                text: "Choose a plan".to_string(),
                buttons: vec![ReplyButton {
                    text: "Pro".to_string(),
                    postback: None,
                    description: Some("For teams".to_string()),
                    icon: None,
                }],
            }),
            MessageContent::Unknown {
                kind: "FORM".to_string(),
                payload: json!({"fields": [1, 2]}),
                fallback_text: Some("Please update your app".to_string()),
            },
        ]
    }

    #[test]
    fn test_every_variant_round_trips() {
        for content in sample_contents() {
            assert_eq!(round_trip(&content), content);
        }
    }

    #[test]
    fn test_type_is_matched_case_insensitively() {
        let content = MessageContent::decode(
            &json!({"type": "text", "payload": {"text": "hi"}}),
            "messageContent",
        )
        .unwrap();
        assert_eq!(content, MessageContent::text("hi"));
        assert_eq!(content.to_value()["type"], "TEXT");
    }

    #[test]
    fn test_unknown_type_degrades_instead_of_failing() {
        let content = MessageContent::decode(
            &json!({"type": "CAROUSEL_3D", "payload": {"anything": true}}),
            "messageContent",
        )
        .unwrap();
        assert!(matches!(content, MessageContent::Unknown { ref kind, .. } if kind == "CAROUSEL_3D"));
    }

    #[test]
    fn test_missing_text_names_the_path() {
        let err = MessageContent::decode(&json!({"type": "TEXT", "payload": {}}), "message.messageContent")
            .unwrap_err();
        assert_eq!(err.path(), Some("message.messageContent.payload.text"));
    }

    #[test]
    fn test_missing_type_is_an_error() {
        let err = MessageContent::decode(&json!({"payload": {}}), "messageContent").unwrap_err();
        assert_eq!(
            err,
            DecodeError::MissingField {
                path: "messageContent.type".to_string()
            }
        );
    }

    #[test]
    fn test_quick_replies_wire_shape() {
        let value = MessageContent::QuickReplies(QuickRepliesContent {
            title: "Q".to_string(),
            buttons: vec![ReplyButton {
                text: "A".to_string(),
                postback: None,
                description: None,
                icon: None,
            }],
        })
        .to_value();
        assert_eq!(value["payload"]["text"]["content"], "Q");
        assert_eq!(value["payload"]["actions"][0]["type"], "REPLY_BUTTON");
    }
}
