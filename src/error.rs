//! Error taxonomy for the chat protocol core.
//!
//! Errors are split by where they are recovered:
//!
//! - [`DecodeError`] - malformed wire shapes. Never fatal to the session; the
//!   offending frame is logged and dropped.
//! - [`TransportError`] - handshake failures, abnormal closes, heartbeat
//!   timeouts and HTTP failures. These drive the session state machine.
//! - [`AuthError`] - missing, expired or rejected credentials. Surfaced to the
//!   caller, never retried silently.
//! - [`DomainError`] - synchronous failures of a single operation
//!   ("no more messages", "invalid thread").
//! - [`ServerError`] - an error payload the backend sent in place of an event.
//!
//! [`ChatError`] wraps all of them for operations that can fail in more than
//! one way.

use std::fmt;

use uuid::Uuid;

/// Convenience alias used across the crate.
pub type Result<T, E = ChatError> = std::result::Result<T, E>;

/// A payload did not match the expected wire shape.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    /// The frame was not valid JSON.
    #[error("invalid JSON: {0}")]
    Json(String),
    /// A required field was absent.
    #[error("missing required field `{path}`")]
    MissingField {
        /// Dotted path of the missing field.
        path: String,
    },
    /// A field was present but had the wrong shape.
    #[error("invalid field `{path}`: {message}")]
    InvalidField {
        /// Dotted path of the offending field.
        path: String,
        /// Underlying parser message.
        message: String,
    },
    /// A discriminator held a value outside the known set and the variant
    /// family has no fallback case.
    #[error("unknown `{path}` value {value:?}")]
    UnknownVariant {
        /// Dotted path of the discriminator field.
        path: String,
        /// The unrecognized discriminator value.
        value: String,
    },
    /// Ordered trial decoding exhausted every candidate shape.
    #[error("no candidate shape matched while decoding {type_name} at `{path}`")]
    NoMatchingShape {
        /// Name of the type that was being decoded.
        type_name: &'static str,
        /// Dotted path of the value.
        path: String,
    },
}

impl DecodeError {
    /// Wrap a `serde_json` error raised while decoding the value at `path`.
    pub(crate) fn at(path: impl Into<String>, err: &serde_json::Error) -> Self {
        let path = path.into();
        let message = err.to_string();
        if let Some(field) = message
            .strip_prefix("missing field `")
            .and_then(|rest| rest.split('`').next())
        {
            return Self::MissingField {
                path: join_path(&path, field),
            };
        }
        Self::InvalidField { path, message }
    }

    /// The dotted path this error refers to, if any.
    #[must_use]
    pub fn path(&self) -> Option<&str> {
        match self {
            Self::Json(_) => None,
            Self::MissingField { path }
            | Self::InvalidField { path, .. }
            | Self::UnknownVariant { path, .. }
            | Self::NoMatchingShape { path, .. } => Some(path),
        }
    }
}

/// Join a parent path and a child field with a dot.
pub(crate) fn join_path(parent: &str, child: &str) -> String {
    if parent.is_empty() {
        child.to_string()
    } else {
        format!("{parent}.{child}")
    }
}

/// Failures of the live connection or the HTTP collaborator.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    /// The WebSocket handshake did not complete.
    #[error("handshake failed: {0}")]
    Handshake(String),
    /// The peer closed the connection with a non-normal code.
    #[error("connection closed abnormally (code {code}): {reason}")]
    AbnormalClose {
        /// WebSocket close code.
        code: u16,
        /// Close reason sent by the peer.
        reason: String,
    },
    /// No heartbeat acknowledgement arrived in time.
    #[error("heartbeat acknowledgement timed out")]
    HeartbeatTimeout,
    /// A send was attempted while the session was not ready.
    #[error("not connected")]
    NotConnected,
    /// Writing a frame failed.
    #[error("send failed: {0}")]
    Send(String),
    /// No response arrived for a request in time.
    #[error("request timed out")]
    Timeout,
    /// The connection went away while a request was pending.
    #[error("connection closed while awaiting a response")]
    Closed,
    /// An HTTP request returned a non-2xx status.
    #[error("HTTP {status}: {body}")]
    Http {
        /// Response status code.
        status: u16,
        /// Response body (possibly truncated).
        body: String,
    },
    /// An HTTP request could not be performed at all.
    #[error("HTTP request failed: {0}")]
    Request(String),
}

/// Failures of customer authorization.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AuthError {
    /// An operation requires a token but none is stored.
    #[error("no access token available")]
    MissingToken,
    /// The stored token is past its refresh window.
    #[error("access token expired")]
    Expired,
    /// The channel requires OAuth but no authorization code was supplied.
    #[error("authorization code required by channel configuration")]
    MissingAuthorizationCode,
    /// The backend rejected the authorization attempt.
    #[error("authorization rejected: {0}")]
    Rejected(ServerError),
    /// The backend answered with an unexpected event.
    #[error("unexpected authorization response: {0}")]
    UnexpectedResponse(String),
}

/// Synchronous failures of a single domain operation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DomainError {
    /// The thread has no scroll token; everything is already loaded.
    #[error("no more messages to load")]
    NoMoreMessages,
    /// The thread is not known to the reconciler.
    #[error("invalid thread {0}")]
    InvalidThread(Uuid),
    /// The thread has no contact assigned yet.
    #[error("thread {0} has no contact id")]
    MissingContactId(Uuid),
    /// The thread no longer accepts messages.
    #[error("thread {0} does not accept more messages")]
    ThreadClosed(Uuid),
    /// The channel allows a single thread and one already exists.
    #[error("channel does not support multiple threads")]
    UnsupportedMultipleThreads,
    /// A custom field identifier is not in the channel configuration.
    #[error("custom field `{0}` is not defined for this channel")]
    UnknownCustomField(String),
    /// The channel configuration has not been fetched yet.
    #[error("channel configuration not loaded")]
    MissingConfiguration,
}

/// Well-known error codes sent by the backend.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    /// Refreshing the access token failed.
    TokenRefreshingFailed,
    /// Reconnecting with a stored token failed.
    CustomerReconnectFailed,
    /// Authorizing the customer failed.
    CustomerAuthorizationFailed,
    /// Recovering a thread failed (usually: the thread does not exist).
    RecoveringThreadFailed,
    /// Recovering a live chat failed.
    RecoveringLivechatFailed,
    /// Sending a message failed.
    SendingMessageFailed,
    /// Any other code.
    Other(String),
}

impl ErrorCode {
    /// Parse a wire error code.
    #[must_use]
    pub fn parse(code: &str) -> Self {
        match code {
            "TokenRefreshingFailed" => Self::TokenRefreshingFailed,
            "CustomerReconnectFailed" => Self::CustomerReconnectFailed,
            "CustomerAuthorizationFailed" => Self::CustomerAuthorizationFailed,
            "RecoveringThreadFailed" => Self::RecoveringThreadFailed,
            "RecoveringLivechatFailed" => Self::RecoveringLivechatFailed,
            "SendingMessageFailed" => Self::SendingMessageFailed,
            other => Self::Other(other.to_string()),
        }
    }

    /// The wire spelling of this code.
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::TokenRefreshingFailed => "TokenRefreshingFailed",
            Self::CustomerReconnectFailed => "CustomerReconnectFailed",
            Self::CustomerAuthorizationFailed => "CustomerAuthorizationFailed",
            Self::RecoveringThreadFailed => "RecoveringThreadFailed",
            Self::RecoveringLivechatFailed => "RecoveringLivechatFailed",
            Self::SendingMessageFailed => "SendingMessageFailed",
            Self::Other(code) => code,
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An error payload sent by the backend in place of a normal event.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{code} (transaction {transaction_id}): {message}")]
pub struct ServerError {
    /// Machine-readable error code.
    pub code: ErrorCode,
    /// Backend transaction id for support lookups.
    pub transaction_id: String,
    /// Human-readable message.
    pub message: String,
}

/// Umbrella error for operations that can fail in several layers.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ChatError {
    /// Wire decoding failed.
    #[error(transparent)]
    Decode(#[from] DecodeError),
    /// The connection or HTTP collaborator failed.
    #[error(transparent)]
    Transport(#[from] TransportError),
    /// Authorization failed.
    #[error(transparent)]
    Auth(#[from] AuthError),
    /// A domain rule rejected the operation.
    #[error(transparent)]
    Domain(#[from] DomainError),
    /// The backend answered with an error payload.
    #[error("server error: {0}")]
    Server(#[from] ServerError),
    /// The operation was cancelled (for example by sign-out).
    #[error("operation cancelled")]
    Cancelled,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_field_is_extracted_from_serde_message() {
        #[derive(Debug, serde::Deserialize)]
        #[allow(dead_code)]
        struct Needs {
            text: String,
        }

        let err = serde_json::from_value::<Needs>(serde_json::json!({})).unwrap_err();
        let decode = DecodeError::at("messageContent.payload", &err);
        assert_eq!(
            decode,
            DecodeError::MissingField {
                path: "messageContent.payload.text".to_string()
            }
        );
    }

    #[test]
    fn test_error_code_round_trip() {
        for code in ["TokenRefreshingFailed", "RecoveringThreadFailed", "SomethingNew"] {
            assert_eq!(ErrorCode::parse(code).as_str(), code);
        }
        assert_eq!(
            ErrorCode::parse("SomethingNew"),
            ErrorCode::Other("SomethingNew".to_string())
        );
    }

    #[test]
    fn test_join_path() {
        assert_eq!(join_path("", "eventId"), "eventId");
        assert_eq!(join_path("postback", "data"), "postback.data");
    }
}
