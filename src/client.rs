//! High-level chat client.
//!
//! [`ChatClient`] wires the pieces together: credential store, token state,
//! session, event hub and reconciler. Typical use:
//!
//! ```no_run
//! # async fn run() -> anyhow::Result<()> {
//! let config = chatline::config::ClientConfig::load()?;
//! let client = chatline::ChatClient::builder(config).build()?;
//! client.connect().await?;
//! let thread = client.create_thread(Some("Support".into()))?;
//! client.send_text(thread, "Hello").await?;
//! # Ok(())
//! # }
//! ```

use std::sync::{Arc, Mutex, MutexGuard};

use anyhow::Context;
use serde_json::Value;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use crate::api::{self, ChannelConfiguration};
use crate::config::{ClientConfig, CredentialBackend};
use crate::constants::{DEFAULT_HTTP_ATTEMPTS, KEYRING_SERVICE};
use crate::credentials::{CredentialStore, FileStore, KeyringStore, MemoryStore};
use crate::error::{ChatError, DomainError};
use crate::events::{EventHub, Subscription};
use crate::http::{HttpClient, ReqwestClient};
use crate::logging::{FacadeSink, Logger, RemoteLogSink};
use crate::protocol::event::{ProactiveAction, ThreadRecoveredEvent};
use crate::protocol::{
    Command, Event, LowercaseUuid, MessageContent, TypedEvent, VisitorEvent, VisitorEventKind,
};
use crate::reconciler::{ChatThread, Reconciler};
use crate::retry::Retry;
use crate::token::TokenState;
use crate::transport::{
    AuthorizationCode, CommandSink, Session, SessionState, TokenAuthenticator,
};

/// Builder for [`ChatClient`].
pub struct ChatClientBuilder {
    config: ClientConfig,
    store: Option<Arc<dyn CredentialStore>>,
    http: Option<Arc<dyn HttpClient>>,
    logger: Option<Logger>,
}

impl std::fmt::Debug for ChatClientBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChatClientBuilder")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl ChatClientBuilder {
    /// Use `store` instead of the backend named in the configuration.
    #[must_use]
    pub fn credential_store(mut self, store: Arc<dyn CredentialStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Use `http` instead of the default `reqwest` client.
    #[must_use]
    pub fn http_client(mut self, http: Arc<dyn HttpClient>) -> Self {
        self.http = Some(http);
        self
    }

    /// Use `logger` for every component.
    #[must_use]
    pub fn logger(mut self, logger: Logger) -> Self {
        self.logger = Some(logger);
        self
    }

    fn default_store(config: &ClientConfig) -> anyhow::Result<Arc<dyn CredentialStore>> {
        Ok(match config.credential_backend {
            CredentialBackend::Keyring => Arc::new(KeyringStore::new(KEYRING_SERVICE)),
            CredentialBackend::File => Arc::new(FileStore::new(
                ClientConfig::config_dir()?.join("credentials.json"),
            )),
            CredentialBackend::Memory => Arc::new(MemoryStore::new()),
        })
    }

    /// Assemble the client. Nothing touches the network yet.
    pub fn build(self) -> anyhow::Result<ChatClient> {
        let http: Arc<dyn HttpClient> = match self.http {
            Some(http) => http,
            None => Arc::new(ReqwestClient::new().context("Failed to build HTTP client")?),
        };
        let logger = match (self.logger, &self.config.remote_log_url) {
            (Some(logger), _) => logger,
            (None, Some(url)) => Logger::new(Arc::new(RemoteLogSink::new(
                Arc::clone(&http),
                url.clone(),
                Arc::new(FacadeSink),
            ))),
            (None, None) => Logger::default(),
        };
        let store = match self.store {
            Some(store) => store,
            None => Self::default_store(&self.config)?,
        };

        let tokens = Arc::new(TokenState::new(store, logger.clone()));
        let authenticator = Arc::new(TokenAuthenticator::new(Arc::clone(&tokens), logger.clone()));
        let hub = EventHub::new(logger.clone());
        let session = Session::new(
            self.config.session_config(),
            hub.clone(),
            Arc::clone(&tokens),
            Arc::clone(&authenticator) as Arc<dyn crate::transport::Authenticator>,
            logger.clone(),
        );
        let reconciler = Arc::new(Reconciler::new(logger.clone()));
        let reconciler_subscription = Reconciler::attach(&reconciler, &hub);

        Ok(ChatClient {
            config: self.config,
            logger,
            http,
            tokens,
            authenticator,
            hub,
            session,
            reconciler,
            reconciler_subscription,
            channel: Mutex::new(None),
            cancel: Mutex::new(CancellationToken::new()),
        })
    }
}

/// A chat client for one brand/channel.
pub struct ChatClient {
    config: ClientConfig,
    logger: Logger,
    http: Arc<dyn HttpClient>,
    tokens: Arc<TokenState>,
    authenticator: Arc<TokenAuthenticator>,
    hub: EventHub,
    session: Session,
    reconciler: Arc<Reconciler>,
    reconciler_subscription: Subscription,
    channel: Mutex<Option<ChannelConfiguration>>,
    /// Cancels in-flight HTTP retries; replaced on sign-out.
    cancel: Mutex<CancellationToken>,
}

impl std::fmt::Debug for ChatClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChatClient")
            .field("brand_id", &self.config.brand_id)
            .field("channel_id", &self.config.channel_id)
            .field("state", &self.session.state())
            .finish_non_exhaustive()
    }
}

impl ChatClient {
    /// Start building a client for `config`.
    #[must_use]
    pub fn builder(config: ClientConfig) -> ChatClientBuilder {
        ChatClientBuilder {
            config,
            store: None,
            http: None,
            logger: None,
        }
    }

    fn channel_slot(&self) -> MutexGuard<'_, Option<ChannelConfiguration>> {
        self.channel
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    fn cancel_token(&self) -> CancellationToken {
        self.cancel
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone()
    }

    /// Event hub for subscriptions.
    #[must_use]
    pub fn hub(&self) -> &EventHub {
        &self.hub
    }

    /// Current connection state.
    #[must_use]
    pub fn state(&self) -> SessionState {
        self.session.state()
    }

    /// Observe connection state changes.
    #[must_use]
    pub fn watch_state(&self) -> watch::Receiver<SessionState> {
        self.session.watch_state()
    }

    /// The fetched channel configuration, if any.
    #[must_use]
    pub fn channel_configuration(&self) -> Option<ChannelConfiguration> {
        self.channel_slot().clone()
    }

    /// Snapshot of all threads.
    #[must_use]
    pub fn threads(&self) -> Vec<ChatThread> {
        self.reconciler.threads()
    }

    /// Snapshot of one thread.
    #[must_use]
    pub fn thread(&self, id: LowercaseUuid) -> Option<ChatThread> {
        self.reconciler.thread(id)
    }

    /// Provide the OAuth code used by the next authorization.
    pub fn set_authorization_code(&self, code: impl Into<String>, verifier: Option<String>) {
        self.authenticator
            .set_authorization_code(Some(AuthorizationCode {
                code: code.into(),
                verifier,
            }));
    }

    /// Fetch the channel configuration and apply it.
    pub async fn prepare(&self) -> Result<ChannelConfiguration, ChatError> {
        let retry = Retry::new(DEFAULT_HTTP_ATTEMPTS, self.cancel_token(), self.logger.clone());
        let channel = api::fetch_channel_configuration(
            &*self.http,
            &retry,
            &self.config.chat_url,
            self.config.brand_id,
            &self.config.channel_id,
        )
        .await?;

        self.tokens
            .set_authorization_required(channel.is_authorization_enabled);
        self.reconciler
            .merge_definitions(channel.customer_fields.clone(), channel.contact_fields.clone());
        *self.channel_slot() = Some(channel.clone());
        self.logger.info(format_args!(
            "[Client] Channel {} configured (multithread: {}, live chat: {})",
            self.config.channel_id, channel.has_multiple_threads_per_customer, channel.is_live_chat
        ));
        Ok(channel)
    }

    /// Fetch the configuration if needed, then connect and authenticate.
    pub async fn connect(&self) -> Result<(), ChatError> {
        if self.channel_slot().is_none() {
            self.prepare().await?;
        }
        self.session.connect().await
    }

    /// Close the connection, keeping credentials.
    pub async fn disconnect(&self) {
        self.session.close().await;
    }

    /// Close the connection and forget the customer.
    pub async fn sign_out(&self) {
        let previous = std::mem::replace(
            &mut *self
                .cancel
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner),
            CancellationToken::new(),
        );
        previous.cancel();
        self.session.close().await;
        self.tokens.clear();
        self.logger.info(format_args!("[Client] Signed out"));
    }

    /// Register a new, empty thread.
    pub fn create_thread(&self, name: Option<String>) -> Result<LowercaseUuid, ChatError> {
        let multiple = self
            .channel_slot()
            .as_ref()
            .ok_or(DomainError::MissingConfiguration)?
            .has_multiple_threads_per_customer;
        if !multiple && !self.reconciler.threads().is_empty() {
            return Err(DomainError::UnsupportedMultipleThreads.into());
        }
        let id = LowercaseUuid::new_v4();
        let mut thread = ChatThread::new(id);
        thread.name = name;
        self.reconciler.insert_thread(thread);
        Ok(id)
    }

    /// Send a text message. Returns the message id.
    pub async fn send_text(
        &self,
        thread_id: LowercaseUuid,
        text: impl Into<String>,
    ) -> Result<LowercaseUuid, ChatError> {
        self.send_content(thread_id, MessageContent::text(text)).await
    }

    /// Send any content. Returns the message id.
    pub async fn send_content(
        &self,
        thread_id: LowercaseUuid,
        content: MessageContent,
    ) -> Result<LowercaseUuid, ChatError> {
        self.reconciler.ensure_accepts_messages(thread_id)?;
        let thread = self
            .reconciler
            .thread(thread_id)
            .ok_or(DomainError::InvalidThread(thread_id.uuid()))?;
        let message_id = LowercaseUuid::new_v4();
        let command = Command::SendMessage {
            thread_id,
            thread_name: thread.name.clone(),
            message_id,
            content,
            attachments: Vec::new(),
            customer_fields: self.reconciler.customer_fields(),
            contact_fields: thread.contact_fields,
            token: self
                .authenticator
                .usable_token(&self.session, &self.hub)
                .await
                .map(|t| t.token),
        };
        self.session.send(&command).await?;
        Ok(message_id)
    }

    /// List the customer's threads.
    pub async fn fetch_threads(&self) -> Result<Vec<ChatThread>, ChatError> {
        self.session.request(&Command::FetchThreadList).await?;
        Ok(self.reconciler.threads())
    }

    /// Recover a thread with its latest messages. Live chat channels recover
    /// the live chat thread.
    pub async fn recover_thread(
        &self,
        thread_id: Option<LowercaseUuid>,
    ) -> Result<Option<ChatThread>, ChatError> {
        let live_chat = self
            .channel_slot()
            .as_ref()
            .is_some_and(|c| c.is_live_chat);
        let command = if live_chat {
            Command::RecoverLivechat { thread_id }
        } else {
            Command::RecoverThread { thread_id }
        };
        let event = self.session.request(&command).await?;
        let recovered =
            thread_id.or_else(|| ThreadRecoveredEvent::from_event(&event).map(|e| e.thread.id));
        Ok(recovered.and_then(|id| self.reconciler.thread(id)))
    }

    /// Load the next page of older messages. Returns how many were added.
    pub async fn load_more_messages(&self, thread_id: LowercaseUuid) -> Result<usize, ChatError> {
        self.reconciler
            .load_more_messages(thread_id, &self.session)
            .await
    }

    /// Rename a thread.
    pub async fn rename_thread(
        &self,
        thread_id: LowercaseUuid,
        name: impl Into<String>,
    ) -> Result<(), ChatError> {
        if self.reconciler.thread(thread_id).is_none() {
            return Err(DomainError::InvalidThread(thread_id.uuid()).into());
        }
        self.session
            .request(&Command::UpdateThread {
                thread_id,
                name: name.into(),
            })
            .await?;
        Ok(())
    }

    /// Archive a thread.
    pub async fn archive_thread(&self, thread_id: LowercaseUuid) -> Result<(), ChatError> {
        self.session
            .request(&Command::ArchiveThread { thread_id })
            .await?;
        Ok(())
    }

    /// End the contact of a live chat thread.
    pub async fn end_contact(&self, thread_id: LowercaseUuid) -> Result<(), ChatError> {
        let contact_id = self
            .reconciler
            .thread(thread_id)
            .ok_or(DomainError::InvalidThread(thread_id.uuid()))?
            .contact_id
            .ok_or(DomainError::MissingContactId(thread_id.uuid()))?;
        self.session
            .send(&Command::EndContact {
                thread_id,
                contact_id,
            })
            .await?;
        Ok(())
    }

    /// Tell the agent the customer has seen the thread.
    pub async fn mark_read(&self, thread_id: LowercaseUuid) -> Result<(), ChatError> {
        self.session
            .send(&Command::MessageSeenByCustomer { thread_id })
            .await?;
        Ok(())
    }

    /// Report typing start/stop.
    pub async fn report_typing(
        &self,
        thread_id: LowercaseUuid,
        is_typing: bool,
    ) -> Result<(), ChatError> {
        let command = if is_typing {
            Command::SenderTypingStarted { thread_id }
        } else {
            Command::SenderTypingEnded { thread_id }
        };
        self.session.send(&command).await?;
        Ok(())
    }

    /// Set customer custom fields.
    pub async fn set_customer_fields(
        &self,
        fields: Vec<(String, String)>,
    ) -> Result<(), ChatError> {
        self.reconciler
            .set_customer_fields(fields, &self.session)
            .await
    }

    /// Set contact custom fields on a thread.
    pub async fn set_contact_fields(
        &self,
        thread_id: LowercaseUuid,
        fields: Vec<(String, String)>,
    ) -> Result<(), ChatError> {
        self.reconciler
            .set_contact_fields(thread_id, fields, &self.session)
            .await
    }

    /// Run a backend trigger.
    pub async fn execute_trigger(&self, trigger_id: LowercaseUuid) -> Result<(), ChatError> {
        self.session
            .send(&Command::ExecuteTrigger { trigger_id })
            .await?;
        Ok(())
    }

    /// Report what happened to a proactive action.
    pub async fn report_proactive_action(
        &self,
        action: &ProactiveAction,
        kind: VisitorEventKind,
    ) -> Result<(), ChatError> {
        let data: Value = serde_json::json!({
            "proactiveAction": {
                "actionId": action.id,
                "actionName": action.name,
                "actionType": action.kind,
            }
        });
        self.report_visitor_events(vec![VisitorEvent::now(kind, Some(data))])
            .await
    }

    /// Report arbitrary visitor events.
    pub async fn report_visitor_events(&self, events: Vec<VisitorEvent>) -> Result<(), ChatError> {
        self.session
            .send(&Command::StoreVisitorEvents { events })
            .await?;
        Ok(())
    }

    /// Send a command and wait for its answer.
    pub async fn request(&self, command: Command) -> Result<Event, ChatError> {
        CommandSink::request(&self.session, command).await
    }
}

impl Drop for ChatClient {
    fn drop(&mut self) {
        self.reconciler_subscription.cancel();
        self.cancel_token().cancel();
        self.session.shutdown();
    }
}
