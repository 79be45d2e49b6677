//! Live connection to the chat backend.
//!
//! - [`ws`]: WebSocket halves over `tokio-tungstenite`.
//! - [`state`]: the session state machine.
//! - [`session`]: the connection task (heartbeats, reconnects, request
//!   correlation).
//! - [`auth`]: authentication run on every (re)connect.

pub mod auth;
pub mod session;
pub mod state;
pub mod ws;

use async_trait::async_trait;

use crate::error::ChatError;
use crate::protocol::{Command, Event, LowercaseUuid};

pub use auth::{AuthChannel, Authenticator, AuthorizationCode, TokenAuthenticator};
pub use session::{Session, SessionConfig};
pub use state::{SessionInput, SessionState};

/// Something that can deliver commands to the backend.
#[async_trait]
pub trait CommandSink: Send + Sync {
    /// Send `command` without waiting for an answer. Returns its event id.
    async fn send(&self, command: Command) -> Result<LowercaseUuid, ChatError>;

    /// Send `command` and wait for the event answering it.
    ///
    /// An error payload from the backend is returned as
    /// [`ChatError::Server`].
    async fn request(&self, command: Command) -> Result<Event, ChatError>;
}
