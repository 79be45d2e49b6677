//! Wire codec: JSON frames to typed events and commands to JSON frames.
//!
//! Decoding is pure and stateless. Explicit discriminators (`type`,
//! `eventType`) are read where the wire has them; where it doesn't, candidate
//! shapes are tried in a fixed order (plugin `elements` arrays and
//! `MessageCreated` payloads).

pub mod command;
pub mod content;
pub mod custom_field;
pub mod event;
pub mod lowercase_uuid;
pub mod message;
pub mod plugin;
pub mod variable;

pub use command::{Command, CommandContext, OutboundFrame, VisitorEvent, VisitorEventKind};
pub use content::{ContentType, MessageContent};
pub use custom_field::{
    CustomFieldDefinition, CustomFieldKind, CustomFieldRecord, CustomFieldValue, TreeNode,
};
pub use event::{Event, EventKind, EventPayload, TypedEvent};
pub use lowercase_uuid::LowercaseUuid;
pub use message::{Agent, Contact, ContactStatus, CustomerIdentity, Message, ThreadInfo};
pub use plugin::{PluginElement, SubElement};
pub use variable::Variable;

use crate::error::DecodeError;

/// Decode one inbound frame.
pub fn decode(bytes: &[u8]) -> Result<Event, DecodeError> {
    event::decode_event(bytes)
}

/// Encode a command into frame bytes.
#[must_use]
pub fn encode(command: &Command, ctx: &CommandContext) -> Vec<u8> {
    command.frame(ctx).to_text().into_bytes()
}
