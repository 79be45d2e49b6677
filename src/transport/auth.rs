//! Authentication on (re)connect.
//!
//! Right after the socket opens the session hands an [`AuthChannel`] to its
//! [`Authenticator`]. The default [`TokenAuthenticator`] picks one of:
//!
//! - reconnect with the stored token,
//! - refresh the token first when it is inside its expiry margin, then
//!   reconnect,
//! - authorize anonymously, or with an OAuth authorization code when the
//!   channel requires one.
//!
//! A failed refresh publishes `TokenRefreshFailed`, drops the token and falls
//! back to authorization. A failed reconnect falls back to authorization too.
//!
//! Commands sent on a `Ready` session get their token through
//! [`TokenAuthenticator::usable_token`], which runs the same refresh.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use super::ws::{WsMessage, WsReader, WsWriter};
use super::CommandSink;
use crate::error::{AuthError, ChatError, TransportError};
use crate::events::EventHub;
use crate::logging::Logger;
use crate::protocol::event::{
    CustomerAuthorizedEvent, TokenRefreshFailedEvent, TokenRefreshedEvent,
};
use crate::protocol::{Command, CommandContext, Event, EventKind, EventPayload, TypedEvent};
use crate::token::{AccessToken, TokenState};

/// Request/response access to a socket that is not `Ready` yet.
///
/// Frames that do not answer the pending request are dispatched to the hub
/// as usual, so nothing pushed during authentication is lost.
pub struct AuthChannel<'a> {
    pub(crate) writer: &'a mut WsWriter,
    pub(crate) reader: &'a mut WsReader,
    pub(crate) hub: &'a EventHub,
    pub(crate) context: CommandContext,
    pub(crate) timeout: Duration,
    pub(crate) logger: &'a Logger,
}

impl std::fmt::Debug for AuthChannel<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthChannel")
            .field("context", &self.context)
            .finish_non_exhaustive()
    }
}

impl AuthChannel<'_> {
    /// Replace the routing context (for example once the customer is known).
    pub fn set_context(&mut self, context: CommandContext) {
        self.context = context;
    }

    /// Publish a local event through the hub.
    pub fn publish(&self, event: Event) {
        self.hub.publish(event);
    }

    /// Send `command` and read until the answering event arrives.
    pub async fn request(&mut self, command: &Command) -> Result<Event, ChatError> {
        let frame = command.frame(&self.context);
        let event_id = frame.event_id;
        self.logger.debug(format_args!(
            "[Auth] Sending {} ({event_id})",
            command.event_type()
        ));
        self.writer.send_text(frame.to_text()).await?;

        let answer = tokio::time::timeout(self.timeout, async {
            loop {
                let message = match self.reader.recv().await {
                    Some(message) => message?,
                    None => return Err(ChatError::from(TransportError::Closed)),
                };
                let bytes = match message {
                    WsMessage::Text(text) => text.into_bytes(),
                    WsMessage::Binary(data) => data,
                    WsMessage::Ping(data) => {
                        self.writer.send_pong(data).await?;
                        continue;
                    }
                    WsMessage::Pong(_) => continue,
                    WsMessage::Close { code, reason } => {
                        return Err(TransportError::AbnormalClose { code, reason }.into())
                    }
                };
                let Ok(event) = self.hub.dispatch_frame(&bytes) else {
                    continue;
                };
                if event.id == event_id {
                    return Ok(event);
                }
            }
        })
        .await
        .map_err(|_elapsed| ChatError::from(TransportError::Timeout))??;

        match answer.payload {
            EventPayload::ServerError(error) => Err(ChatError::Server(error)),
            _ => Ok(answer),
        }
    }
}

/// Authenticates a freshly opened socket.
#[async_trait]
pub trait Authenticator: Send + Sync {
    /// Run the authentication exchange. `Ok` moves the session to `Ready`.
    async fn authenticate(&self, channel: &mut AuthChannel<'_>) -> Result<(), ChatError>;
}

/// OAuth authorization code (with optional PKCE verifier).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthorizationCode {
    /// Authorization code.
    pub code: String,
    /// PKCE code verifier.
    pub verifier: Option<String>,
}

/// Default authenticator backed by [`TokenState`].
#[derive(Debug)]
pub struct TokenAuthenticator {
    tokens: Arc<TokenState>,
    authorization_code: Mutex<Option<AuthorizationCode>>,
    logger: Logger,
}

impl TokenAuthenticator {
    /// An authenticator reading and updating `tokens`.
    #[must_use]
    pub fn new(tokens: Arc<TokenState>, logger: Logger) -> Self {
        Self {
            tokens,
            authorization_code: Mutex::new(None),
            logger,
        }
    }

    /// Set the OAuth code used by the next authorization.
    pub fn set_authorization_code(&self, code: Option<AuthorizationCode>) {
        if let Ok(mut slot) = self.authorization_code.lock() {
            *slot = code;
        }
    }

    fn authorization_code(&self) -> Option<AuthorizationCode> {
        self.authorization_code.lock().ok()?.clone()
    }

    /// Store the token carried by a refresh answer. Anything else drops the
    /// stored token and yields the `TokenRefreshFailed` event to publish.
    fn accept_refresh(&self, answer: Result<Event, ChatError>) -> Result<AccessToken, Event> {
        let failure = match answer {
            Ok(event) => match TokenRefreshedEvent::from_event(&event) {
                Some(refreshed) => {
                    let fresh = AccessToken::issued_now(refreshed.access_token);
                    self.tokens.set_token(Some(fresh.clone()));
                    self.logger.info(format_args!("[Auth] Access token refreshed"));
                    return Ok(fresh);
                }
                None => format!("unexpected {} answer", event.kind),
            },
            Err(e) => e.to_string(),
        };

        self.logger
            .warn(format_args!("[Auth] Token refresh failed: {failure}"));
        self.tokens.set_token(None);
        Err(Event::local(
            EventKind::TokenRefreshFailed,
            EventPayload::TokenRefreshFailed(TokenRefreshFailedEvent { reason: failure }),
        ))
    }

    async fn refresh(&self, channel: &mut AuthChannel<'_>, token: &AccessToken) -> Option<AccessToken> {
        let command = Command::RefreshToken {
            token: token.token.clone(),
        };
        let answer = channel.request(&command).await;
        match self.accept_refresh(answer) {
            Ok(fresh) => Some(fresh),
            Err(failed) => {
                channel.publish(failed);
                None
            }
        }
    }

    /// The stored token, refreshed over `sink` first when it is inside its
    /// expiry margin. A failed refresh drops the token, publishes
    /// `TokenRefreshFailed` to `hub` and yields `None`.
    pub async fn usable_token(&self, sink: &dyn CommandSink, hub: &EventHub) -> Option<AccessToken> {
        let token = self.tokens.current_token()?;
        if !token.is_expired() {
            return Some(token);
        }
        let answer = sink.request(Command::RefreshToken { token: token.token }).await;
        match self.accept_refresh(answer) {
            Ok(fresh) => Some(fresh),
            Err(failed) => {
                hub.publish(failed);
                None
            }
        }
    }

    async fn reconnect(&self, channel: &mut AuthChannel<'_>, token: &AccessToken) -> bool {
        let command = Command::ReconnectCustomer {
            token: token.token.clone(),
        };
        match channel.request(&command).await {
            Ok(event) if event.kind == EventKind::CustomerReconnected => {
                self.logger.info(format_args!("[Auth] Customer reconnected"));
                true
            }
            Ok(event) => {
                self.logger
                    .warn(format_args!("[Auth] Unexpected reconnect answer {}", event.kind));
                false
            }
            Err(e) => {
                self.logger.warn(format_args!("[Auth] Reconnect failed: {e}"));
                false
            }
        }
    }

    async fn authorize(&self, channel: &mut AuthChannel<'_>) -> Result<(), ChatError> {
        let code = self.authorization_code();
        if code.is_none() && self.tokens.authorization_required() {
            return Err(AuthError::MissingAuthorizationCode.into());
        }

        let command = Command::AuthorizeCustomer {
            authorization_code: code.as_ref().map(|c| c.code.clone()),
            code_verifier: code.and_then(|c| c.verifier),
        };
        let event = match channel.request(&command).await {
            Ok(event) => event,
            Err(ChatError::Server(error)) => return Err(AuthError::Rejected(error).into()),
            Err(e) => return Err(e),
        };
        let Some(authorized) = CustomerAuthorizedEvent::from_event(&event) else {
            return Err(AuthError::UnexpectedResponse(event.kind.to_string()).into());
        };

        self.tokens.set_customer(Some(authorized.identity.clone()));
        if let Some(issued) = authorized.access_token {
            self.tokens.set_token(Some(AccessToken::issued_now(issued)));
        }
        channel.context.customer = Some(authorized.identity);
        self.set_authorization_code(None);
        self.logger.info(format_args!("[Auth] Customer authorized"));
        Ok(())
    }
}

#[async_trait]
impl Authenticator for TokenAuthenticator {
    async fn authenticate(&self, channel: &mut AuthChannel<'_>) -> Result<(), ChatError> {
        if let Some(mut token) = self.tokens.current_token() {
            if token.is_expired() {
                match self.refresh(channel, &token).await {
                    Some(fresh) => token = fresh,
                    None => return self.authorize(channel).await,
                }
            }
            if self.reconnect(channel, &token).await {
                return Ok(());
            }
        }
        self.authorize(channel).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credentials::MemoryStore;
    use crate::protocol::event::IssuedToken;
    use crate::protocol::LowercaseUuid;
    use chrono::{Duration as ChronoDuration, Utc};
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Answers every request with a fixed result and records the commands.
    struct RefreshSink {
        answer: Option<Event>,
        requests: Mutex<Vec<Command>>,
    }

    #[async_trait]
    impl CommandSink for RefreshSink {
        async fn send(&self, _command: Command) -> Result<LowercaseUuid, ChatError> {
            Ok(LowercaseUuid::new_v4())
        }

        async fn request(&self, command: Command) -> Result<Event, ChatError> {
            self.requests.lock().unwrap().push(command);
            self.answer
                .clone()
                .ok_or(ChatError::Transport(TransportError::Timeout))
        }
    }

    fn authenticator_with(token: AccessToken) -> TokenAuthenticator {
        let tokens = Arc::new(TokenState::new(Arc::new(MemoryStore::new()), Logger::default()));
        tokens.set_token(Some(token));
        TokenAuthenticator::new(tokens, Logger::default())
    }

    fn access_token(value: &str, age: ChronoDuration) -> AccessToken {
        AccessToken {
            token: value.to_string(),
            expires_in: 3600,
            created_at: Utc::now() - age,
        }
    }

    fn refreshed(value: &str) -> Event {
        Event::local(
            EventKind::TokenRefreshed,
            EventPayload::TokenRefreshed(TokenRefreshedEvent {
                access_token: IssuedToken {
                    token: value.to_string(),
                    expires_in: 3600,
                },
            }),
        )
    }

    #[tokio::test]
    async fn test_fresh_token_is_used_without_a_request() {
        let auth = authenticator_with(access_token("old", ChronoDuration::zero()));
        let sink = RefreshSink {
            answer: None,
            requests: Mutex::new(Vec::new()),
        };

        let token = auth.usable_token(&sink, &EventHub::new(Logger::default())).await;
        assert_eq!(token.map(|t| t.token).as_deref(), Some("old"));
        assert!(sink.requests.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_expired_token_is_refreshed_before_use() {
        let auth = authenticator_with(access_token("old", ChronoDuration::hours(2)));
        let sink = RefreshSink {
            answer: Some(refreshed("new")),
            requests: Mutex::new(Vec::new()),
        };

        let token = auth.usable_token(&sink, &EventHub::new(Logger::default())).await;
        assert_eq!(token.map(|t| t.token).as_deref(), Some("new"));
        assert_eq!(
            *sink.requests.lock().unwrap(),
            vec![Command::RefreshToken {
                token: "old".to_string()
            }]
        );
        assert_eq!(auth.tokens.current_token().map(|t| t.token).as_deref(), Some("new"));
    }

    #[tokio::test]
    async fn test_failed_refresh_drops_token_and_publishes() {
        let auth = authenticator_with(access_token("old", ChronoDuration::hours(2)));
        let sink = RefreshSink {
            answer: None,
            requests: Mutex::new(Vec::new()),
        };
        let hub = EventHub::new(Logger::default());
        let failures = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&failures);
        let _sub = hub.subscribe::<TokenRefreshFailedEvent, _>(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        assert!(auth.usable_token(&sink, &hub).await.is_none());
        assert!(auth.tokens.current_token().is_none());
        assert_eq!(failures.load(Ordering::SeqCst), 1);
    }
}
