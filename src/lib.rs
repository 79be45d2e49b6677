//! chatline - protocol core of a live chat client.
//!
//! Keeps an authenticated WebSocket session open to the chat backend, turns
//! inbound frames into typed events and reconciles thread and custom field
//! state from them.
//!
//! # Architecture
//!
//! - **Session** - owns the socket, heartbeats, reconnects and
//!   re-authenticates
//! - **EventHub** - decodes frames and fans typed events out to subscribers
//! - **Reconciler** - owns threads, messages and custom field values
//! - **TokenState** - access token and customer identity, persisted through a
//!   credential store
//!
//! # Modules
//!
//! - [`protocol`] - wire codec (events, commands, message content)
//! - [`transport`] - session state machine and WebSocket plumbing
//! - [`events`] - dispatch hub
//! - [`reconciler`] - thread and custom field state
//! - [`client`] - facade tying everything together
//! - [`config`] - configuration loading/saving

// Library modules
pub mod api;
pub mod client;
pub mod events;
pub mod protocol;
pub mod reconciler;
pub mod transport;

pub mod config;
pub mod constants;
pub mod credentials;
pub mod error;
pub mod http;
pub mod logging;
pub mod retry;
pub mod token;

// Re-export commonly used types
pub use client::{ChatClient, ChatClientBuilder};
pub use config::ClientConfig;
pub use error::{ChatError, Result};
pub use events::{EventHub, Subscription};
pub use protocol::{Command, Event, EventKind, EventPayload, TypedEvent};
pub use reconciler::{ChatThread, Reconciler};
pub use transport::{Session, SessionConfig, SessionState};
