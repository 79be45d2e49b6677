//! Plugin elements carried inside `PLUGIN` message content.
//!
//! Plugin payloads have two layers:
//!
//! - **Sub-elements** (`TEXT`, `BUTTON`, `IFRAME_BUTTON`, `FILE`, `TITLE`) are
//!   always explicitly tagged by their `type` field.
//! - **Elements** are either an explicitly tagged object (`MENU`,
//!   `TEXT_AND_BUTTONS`, `QUICK_REPLIES`, `SATISFACTION_SURVEY`, `CUSTOM`) or an
//!   untagged array whose meaning is inferred by trial decoding.
//!
//! # Trial order for an `elements` array
//!
//! 1. exactly one explicitly tagged element → that element
//! 2. every item is itself an element → [`PluginElement::Gallery`]
//! 3. every item is a sub-element → [`PluginElement::SubElements`]
//!
//! The order is part of the wire contract: backend payloads are allowed to
//! overlap, so the first candidate that parses wins. An empty array decodes
//! as an empty sub-element list, and a one-item gallery collapses to its item.

use std::collections::BTreeMap;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;

use super::variable::Variable;
use crate::error::DecodeError;

/// A typed plugin element.
#[derive(Debug, Clone, PartialEq)]
pub enum PluginElement {
    /// Ordered list of elements rendered side by side (recursive). Build it
    /// with [`PluginElement::gallery`] so one-item and empty lists take their
    /// wire-canonical form.
    Gallery(Vec<PluginElement>),
    /// Menu of texts, files, titles and buttons.
    Menu(ElementGroup),
    /// A text block followed by buttons.
    TextAndButtons(ElementGroup),
    /// Quick reply buttons inside a plugin.
    QuickReplies(ElementGroup),
    /// Satisfaction survey prompt.
    SatisfactionSurvey(ElementGroup),
    /// Opaque element defined by the integrator.
    Custom(CustomElement),
    /// Bare list of sub-elements.
    SubElements(Vec<SubElement>),
}

/// An element that owns an id and a list of sub-elements.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ElementGroup {
    /// Element id.
    pub id: String,
    /// Ordered sub-elements.
    #[serde(default)]
    pub elements: Vec<SubElement>,
}

/// Integrator-defined element with a free-form variable bag.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CustomElement {
    /// Element id.
    pub id: String,
    /// Optional fallback text.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    /// Free-form variables.
    #[serde(default)]
    pub variables: BTreeMap<String, Variable>,
}

/// A button sub-element.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ButtonElement {
    /// Sub-element id.
    pub id: String,
    /// Button label.
    pub text: String,
    /// Postback sent back when tapped.
    pub postback: Option<String>,
    /// Link opened when tapped.
    pub url: Option<String>,
    /// Whether the link should open inside the host app (`IFRAME_BUTTON`).
    pub display_in_app: bool,
}

/// Leaf content of a plugin element.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubElement {
    /// Plain or markdown text.
    Text {
        /// Sub-element id.
        id: String,
        /// Text body.
        text: String,
        /// Optional mime type (for example `text/markdown`).
        mime_type: Option<String>,
    },
    /// Button, either a postback or a link.
    Button(ButtonElement),
    /// Downloadable file.
    File {
        /// Sub-element id.
        id: String,
        /// File URL.
        url: String,
        /// Display name of the file.
        file_name: String,
        /// File mime type.
        mime_type: String,
    },
    /// Title line.
    Title {
        /// Sub-element id.
        id: String,
        /// Title text.
        text: String,
    },
}

#[derive(Serialize, Deserialize)]
struct ButtonWire {
    id: String,
    text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    postback: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    url: Option<String>,
}

#[derive(Serialize, Deserialize)]
#[serde(tag = "type")]
enum SubElementWire {
    #[serde(rename = "TEXT")]
    Text {
        id: String,
        text: String,
        #[serde(rename = "mimeType", default, skip_serializing_if = "Option::is_none")]
        mime_type: Option<String>,
    },
    #[serde(rename = "BUTTON")]
    Button(ButtonWire),
    #[serde(rename = "IFRAME_BUTTON")]
    IframeButton(ButtonWire),
    #[serde(rename = "FILE")]
    File {
        id: String,
        url: String,
        #[serde(rename = "fileName")]
        file_name: String,
        #[serde(rename = "mimeType")]
        mime_type: String,
    },
    #[serde(rename = "TITLE")]
    Title { id: String, text: String },
}

impl From<SubElementWire> for SubElement {
    fn from(wire: SubElementWire) -> Self {
        let button = |b: ButtonWire, display_in_app: bool| {
            Self::Button(ButtonElement {
                id: b.id,
                text: b.text,
                postback: b.postback,
                url: b.url,
                display_in_app,
            })
        };
        match wire {
            SubElementWire::Text { id, text, mime_type } => Self::Text { id, text, mime_type },
            SubElementWire::Button(b) => button(b, false),
            SubElementWire::IframeButton(b) => button(b, true),
            SubElementWire::File {
                id,
                url,
                file_name,
                mime_type,
            } => Self::File {
                id,
                url,
                file_name,
                mime_type,
            },
            SubElementWire::Title { id, text } => Self::Title { id, text },
        }
    }
}

impl From<&SubElement> for SubElementWire {
    fn from(element: &SubElement) -> Self {
        match element.clone() {
            SubElement::Text { id, text, mime_type } => Self::Text { id, text, mime_type },
            SubElement::Button(b) => {
                let wire = ButtonWire {
                    id: b.id,
                    text: b.text,
                    postback: b.postback,
                    url: b.url,
                };
                if b.display_in_app {
                    Self::IframeButton(wire)
                } else {
                    Self::Button(wire)
                }
            }
            SubElement::File {
                id,
                url,
                file_name,
                mime_type,
            } => Self::File {
                id,
                url,
                file_name,
                mime_type,
            },
            SubElement::Title { id, text } => Self::Title { id, text },
        }
    }
}

impl Serialize for SubElement {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        SubElementWire::from(self).serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for SubElement {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        SubElementWire::deserialize(deserializer).map(Self::from)
    }
}

/// Explicitly tagged element objects.
#[derive(Serialize, Deserialize)]
#[serde(tag = "type")]
enum ExplicitElementWire {
    #[serde(rename = "MENU")]
    Menu(ElementGroup),
    #[serde(rename = "TEXT_AND_BUTTONS")]
    TextAndButtons(ElementGroup),
    #[serde(rename = "QUICK_REPLIES")]
    QuickReplies(ElementGroup),
    #[serde(rename = "SATISFACTION_SURVEY")]
    SatisfactionSurvey(ElementGroup),
    #[serde(rename = "CUSTOM")]
    Custom(CustomElement),
}

impl PluginElement {
    /// Gallery in canonical form: a single item stands for itself and an
    /// empty list is an empty sub-element list.
    #[must_use]
    pub fn gallery(items: Vec<PluginElement>) -> Self {
        match <[PluginElement; 1]>::try_from(items) {
            Ok([single]) => single,
            Err(items) if items.is_empty() => Self::SubElements(Vec::new()),
            Err(items) => Self::Gallery(items),
        }
    }

    /// Decode a single element value: an object is an explicitly tagged
    /// element, an array goes through ordered trial decoding.
    pub fn decode(value: &Value, path: &str) -> Result<Self, DecodeError> {
        match value {
            Value::Object(_) => Self::decode_explicit(value, path),
            Value::Array(items) => Self::decode_elements(items, path),
            other => Err(DecodeError::InvalidField {
                path: path.to_string(),
                message: format!("expected plugin element, found {other}"),
            }),
        }
    }

    /// Decode an untagged `elements` array by trying each candidate shape in
    /// priority order.
    pub fn decode_elements(items: &[Value], path: &str) -> Result<Self, DecodeError> {
        if let [single] = items {
            if let Ok(element) = Self::decode_explicit(single, path) {
                return Ok(element);
            }
        }

        if !items.is_empty() {
            let gallery: Result<Vec<_>, _> = items.iter().map(|item| Self::decode(item, path)).collect();
            if let Ok(gallery) = gallery {
                return Ok(Self::gallery(gallery));
            }
        }

        let subs: Result<Vec<SubElement>, _> = items
            .iter()
            .map(|item| serde_json::from_value(item.clone()))
            .collect();
        if let Ok(subs) = subs {
            return Ok(Self::SubElements(subs));
        }

        Err(DecodeError::NoMatchingShape {
            type_name: "PluginElement",
            path: path.to_string(),
        })
    }

    fn decode_explicit(value: &Value, path: &str) -> Result<Self, DecodeError> {
        let wire: ExplicitElementWire =
            serde_json::from_value(value.clone()).map_err(|e| DecodeError::at(path, &e))?;
        Ok(match wire {
            ExplicitElementWire::Menu(g) => Self::Menu(g),
            ExplicitElementWire::TextAndButtons(g) => Self::TextAndButtons(g),
            ExplicitElementWire::QuickReplies(g) => Self::QuickReplies(g),
            ExplicitElementWire::SatisfactionSurvey(g) => Self::SatisfactionSurvey(g),
            ExplicitElementWire::Custom(c) => Self::Custom(c),
        })
    }

    /// Encode as the `elements` array that [`Self::decode_elements`] reads.
    #[must_use]
    pub fn to_elements(&self) -> Vec<Value> {
        match self {
            Self::Gallery(items) => items.iter().map(Self::to_value).collect(),
            Self::SubElements(subs) => subs.iter().map(sub_element_value).collect(),
            explicit => vec![explicit.to_value()],
        }
    }

    /// Encode a single element: tagged object or nested array.
    #[must_use]
    pub fn to_value(&self) -> Value {
        let explicit = match self {
            Self::Gallery(_) | Self::SubElements(_) => return Value::Array(self.to_elements()),
            Self::Menu(g) => ExplicitElementWire::Menu(g.clone()),
            Self::TextAndButtons(g) => ExplicitElementWire::TextAndButtons(g.clone()),
            Self::QuickReplies(g) => ExplicitElementWire::QuickReplies(g.clone()),
            Self::SatisfactionSurvey(g) => ExplicitElementWire::SatisfactionSurvey(g.clone()),
            Self::Custom(c) => ExplicitElementWire::Custom(c.clone()),
        };
        serde_json::to_value(explicit).unwrap_or(Value::Null)
    }
}

fn sub_element_value(sub: &SubElement) -> Value {
    serde_json::to_value(sub).unwrap_or(Value::Null)
}

impl Serialize for PluginElement {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_value().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for PluginElement {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = Value::deserialize(deserializer)?;
        Self::decode(&value, "").map_err(serde::de::Error::custom)
    }
}
