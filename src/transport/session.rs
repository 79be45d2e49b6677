//! The transport session.
//!
//! [`Session::connect`] performs the handshake and authentication inline, so
//! the caller learns about a failed first connect directly. Once `Ready`, a
//! single connection task owns the socket:
//!
//! ```text
//! loop {
//!     select! {
//!         cancelled            => close 1000, Disconnected
//!         inbound frame        => decode, dispatch, resolve pending request
//!         outbound queue       => write frame
//!         heartbeat tick       => ping, arm ack deadline
//!         ack deadline passed  => connection lost
//!     }
//!     connection lost => Reconnecting, handshake + authenticate with backoff
//! }
//! ```
//!
//! Any inbound frame counts as heartbeat acknowledgement. Close code 1000
//! ends the session without retry; anything else is a loss. When every
//! reconnect attempt fails an `UnexpectedDisconnect` event is published once.
//!
//! Frames are decoded and dispatched one at a time on the connection task,
//! which keeps per-subscriber arrival order.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use super::auth::{AuthChannel, Authenticator};
use super::state::{SessionInput, SessionState, StateCell};
use super::ws::{self, WsMessage, WsReader, WsWriter};
use super::CommandSink;
use crate::constants::{
    DEFAULT_RECONNECT_ATTEMPTS, HEARTBEAT_INTERVAL, HEARTBEAT_TIMEOUT, NORMAL_CLOSE_CODE,
    OUTBOUND_QUEUE_CAPACITY, REQUEST_TIMEOUT,
};
use crate::error::{ChatError, TransportError};
use crate::events::EventHub;
use crate::logging::Logger;
use crate::protocol::event::{ConnectionStateChangedEvent, UnexpectedDisconnectEvent};
use crate::protocol::{
    self, Command, CommandContext, Event, EventKind, EventPayload, LowercaseUuid,
};
use crate::retry::Retry;
use crate::token::TokenState;

/// Session tuning.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionConfig {
    /// Full WebSocket URL.
    pub url: String,
    /// Brand id stamped on every command.
    pub brand_id: i64,
    /// Channel id stamped on every command.
    pub channel_id: String,
    /// Interval between pings.
    pub heartbeat_interval: Duration,
    /// How long to wait for any frame after a ping.
    pub heartbeat_timeout: Duration,
    /// How long a request waits for its answer.
    pub request_timeout: Duration,
    /// Guarded reconnect attempts before giving up.
    pub reconnect_attempts: u32,
}

impl SessionConfig {
    /// Defaults for everything but the routing fields.
    #[must_use]
    pub fn new(url: impl Into<String>, brand_id: i64, channel_id: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            brand_id,
            channel_id: channel_id.into(),
            heartbeat_interval: HEARTBEAT_INTERVAL,
            heartbeat_timeout: HEARTBEAT_TIMEOUT,
            request_timeout: REQUEST_TIMEOUT,
            reconnect_attempts: DEFAULT_RECONNECT_ATTEMPTS,
        }
    }
}

/// Why the message loop returned.
#[derive(Debug)]
enum LoopExit {
    /// Cancellation requested; close normally.
    Shutdown,
    /// Peer closed with 1000.
    NormalClose,
    /// Anything else; try to reconnect.
    Lost(String),
}

type Pending = HashMap<LowercaseUuid, oneshot::Sender<Event>>;

struct Inner {
    config: SessionConfig,
    state: StateCell,
    hub: EventHub,
    tokens: Arc<TokenState>,
    authenticator: Arc<dyn Authenticator>,
    logger: Logger,
    outbound: Mutex<Option<mpsc::Sender<String>>>,
    pending: Mutex<Pending>,
    cancel: Mutex<CancellationToken>,
    task: Mutex<Option<JoinHandle<()>>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
}

impl Inner {
    /// Apply `input`; `false` when it was not valid in the current state.
    fn transition(&self, input: SessionInput) -> bool {
        let Some((from, to)) = self.state.apply(input) else {
            return false;
        };
        self.logger
            .info(format_args!("[Session] {from} -> {to} ({input:?})"));
        self.hub.publish(Event::local(
            EventKind::ConnectionStateChanged,
            EventPayload::ConnectionStateChanged(ConnectionStateChangedEvent { from, to }),
        ));
        true
    }

    fn context(&self) -> CommandContext {
        CommandContext {
            brand_id: self.config.brand_id,
            channel_id: self.config.channel_id.clone(),
            customer: self.tokens.customer(),
            visitor_id: Some(self.tokens.visitor_id()),
        }
    }

    async fn handshake(&self) -> Result<(WsWriter, WsReader), TransportError> {
        self.logger
            .debug(format_args!("[Session] Connecting to {}", self.config.url));
        ws::connect(&self.config.url, &[]).await
    }

    async fn authenticate(
        &self,
        writer: &mut WsWriter,
        reader: &mut WsReader,
    ) -> Result<(), ChatError> {
        let mut channel = AuthChannel {
            writer,
            reader,
            hub: &self.hub,
            context: self.context(),
            timeout: self.config.request_timeout,
            logger: &self.logger,
        };
        self.authenticator.authenticate(&mut channel).await
    }

    fn handle_frame(&self, bytes: &[u8]) {
        let event = match protocol::decode(bytes) {
            Ok(event) => event,
            Err(e) => {
                self.logger
                    .warn(format_args!("[Session] Dropping undecodable frame: {e}"));
                return;
            }
        };
        self.hub.dispatch(&event);
        if let Some(waiter) = lock(&self.pending).remove(&event.id) {
            let _ = waiter.send(event);
        }
    }

    fn fail_pending(&self) {
        let dropped = std::mem::take(&mut *lock(&self.pending));
        if !dropped.is_empty() {
            self.logger.debug(format_args!(
                "[Session] Failing {} pending request(s)",
                dropped.len()
            ));
        }
    }

    async fn send_text(&self, text: String) -> Result<(), ChatError> {
        if !self.state.get().is_ready() {
            return Err(TransportError::NotConnected.into());
        }
        let sender = lock(&self.outbound)
            .clone()
            .ok_or(TransportError::NotConnected)?;
        sender
            .send(text)
            .await
            .map_err(|_closed| TransportError::NotConnected.into())
    }
}

async fn run_message_loop(
    inner: &Inner,
    writer: &mut WsWriter,
    reader: &mut WsReader,
    outbound: &mut mpsc::Receiver<String>,
    cancel: &CancellationToken,
) -> LoopExit {
    let interval = inner.config.heartbeat_interval;
    let mut heartbeat = tokio::time::interval_at(Instant::now() + interval, interval);
    heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut ack_deadline: Option<Instant> = None;

    loop {
        let armed = ack_deadline;
        let deadline = async move {
            match armed {
                Some(at) => tokio::time::sleep_until(at).await,
                None => std::future::pending().await,
            }
        };

        tokio::select! {
            biased;

            () = cancel.cancelled() => return LoopExit::Shutdown,

            message = reader.recv() => {
                ack_deadline = None;
                match message {
                    None => return LoopExit::Lost("stream ended".to_string()),
                    Some(Err(e)) => return LoopExit::Lost(e.to_string()),
                    Some(Ok(WsMessage::Text(text))) => inner.handle_frame(text.as_bytes()),
                    Some(Ok(WsMessage::Binary(data))) => inner.handle_frame(&data),
                    Some(Ok(WsMessage::Ping(data))) => {
                        if let Err(e) = writer.send_pong(data).await {
                            return LoopExit::Lost(e.to_string());
                        }
                    }
                    Some(Ok(WsMessage::Pong(_))) => {}
                    Some(Ok(WsMessage::Close { code, reason })) => {
                        if code == NORMAL_CLOSE_CODE {
                            inner.logger.info(format_args!("[Session] Closed by server"));
                            return LoopExit::NormalClose;
                        }
                        return LoopExit::Lost(
                            TransportError::AbnormalClose { code, reason }.to_string(),
                        );
                    }
                }
            }

            Some(text) = outbound.recv() => {
                if let Err(e) = writer.send_text(text).await {
                    return LoopExit::Lost(e.to_string());
                }
            }

            _ = heartbeat.tick() => {
                if let Err(e) = writer.send_ping(Vec::new()).await {
                    return LoopExit::Lost(e.to_string());
                }
                if ack_deadline.is_none() {
                    ack_deadline = Some(Instant::now() + inner.config.heartbeat_timeout);
                }
            }

            () = deadline => {
                return LoopExit::Lost(TransportError::HeartbeatTimeout.to_string());
            }
        }
    }
}

async fn reconnect(
    inner: &Arc<Inner>,
    cancel: &CancellationToken,
) -> Result<(WsWriter, WsReader), ChatError> {
    let retry = Retry::new(
        inner.config.reconnect_attempts,
        cancel.clone(),
        inner.logger.clone(),
    );
    retry
        .run(|attempt| {
            let inner = Arc::clone(inner);
            async move {
                inner.logger.info(format_args!(
                    "[Session] Reconnect attempt {}",
                    attempt + 1
                ));
                let (mut writer, mut reader) = match inner.handshake().await {
                    Ok(halves) => halves,
                    Err(e) => {
                        inner.transition(SessionInput::HandshakeFailed);
                        return Err(ChatError::from(e));
                    }
                };
                inner.transition(SessionInput::HandshakeSucceeded);
                match inner.authenticate(&mut writer, &mut reader).await {
                    Ok(()) => Ok((writer, reader)),
                    Err(e) => {
                        let _ = writer.close(NORMAL_CLOSE_CODE, "").await;
                        inner.transition(SessionInput::ConnectionLost);
                        Err(e)
                    }
                }
            }
        })
        .await
}

async fn connection_task(
    inner: Arc<Inner>,
    mut writer: WsWriter,
    mut reader: WsReader,
    mut outbound: mpsc::Receiver<String>,
    cancel: CancellationToken,
) {
    loop {
        let exit =
            run_message_loop(&inner, &mut writer, &mut reader, &mut outbound, &cancel).await;
        inner.fail_pending();

        match exit {
            LoopExit::Shutdown => {
                let _ = writer.close(NORMAL_CLOSE_CODE, "").await;
                inner.transition(SessionInput::Closed);
                break;
            }
            LoopExit::NormalClose => {
                inner.transition(SessionInput::Closed);
                break;
            }
            LoopExit::Lost(reason) => {
                inner
                    .logger
                    .warn(format_args!("[Session] Connection lost: {reason}"));
                inner.transition(SessionInput::ConnectionLost);

                match reconnect(&inner, &cancel).await {
                    Ok((w, r)) => {
                        writer = w;
                        reader = r;
                        inner.transition(SessionInput::AuthenticationSucceeded);
                    }
                    Err(ChatError::Cancelled) => {
                        inner.transition(SessionInput::Closed);
                        break;
                    }
                    Err(e) => {
                        inner.logger.error(format_args!(
                            "[Session] Giving up after {} reconnect attempts: {e}",
                            inner.config.reconnect_attempts + 1
                        ));
                        inner.transition(SessionInput::ReconnectsExhausted);
                        inner.hub.publish(Event::local(
                            EventKind::UnexpectedDisconnect,
                            EventPayload::UnexpectedDisconnect(UnexpectedDisconnectEvent {
                                reason: e.to_string(),
                            }),
                        ));
                        break;
                    }
                }
            }
        }
    }

    *lock(&inner.outbound) = None;
}

/// A live, authenticated connection to the chat backend.
#[derive(Clone)]
pub struct Session {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("url", &self.inner.config.url)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl Session {
    /// A disconnected session.
    #[must_use]
    pub fn new(
        config: SessionConfig,
        hub: EventHub,
        tokens: Arc<TokenState>,
        authenticator: Arc<dyn Authenticator>,
        logger: Logger,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                config,
                state: StateCell::new(),
                hub,
                tokens,
                authenticator,
                logger,
                outbound: Mutex::new(None),
                pending: Mutex::new(HashMap::new()),
                cancel: Mutex::new(CancellationToken::new()),
                task: Mutex::new(None),
            }),
        }
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> SessionState {
        self.inner.state.get()
    }

    /// Observe state changes.
    #[must_use]
    pub fn watch_state(&self) -> watch::Receiver<SessionState> {
        self.inner.state.subscribe()
    }

    /// The hub this session dispatches to.
    #[must_use]
    pub fn hub(&self) -> &EventHub {
        &self.inner.hub
    }

    /// Connect and authenticate. No-op unless `Disconnected`.
    pub async fn connect(&self) -> Result<(), ChatError> {
        let inner = &self.inner;
        if !inner.transition(SessionInput::Connect) {
            inner.logger.debug(format_args!(
                "[Session] connect() ignored in state {}",
                inner.state.get()
            ));
            return Ok(());
        }

        let (mut writer, mut reader) = match inner.handshake().await {
            Ok(halves) => halves,
            Err(e) => {
                inner.logger.warn(format_args!("[Session] Handshake failed: {e}"));
                inner.transition(SessionInput::HandshakeFailed);
                return Err(e.into());
            }
        };
        inner.transition(SessionInput::HandshakeSucceeded);

        inner.transition(SessionInput::AuthenticationStarted);
        if let Err(e) = inner.authenticate(&mut writer, &mut reader).await {
            inner
                .logger
                .warn(format_args!("[Session] Authentication failed: {e}"));
            let _ = writer.close(NORMAL_CLOSE_CODE, "").await;
            inner.transition(SessionInput::AuthenticationFailed);
            return Err(e);
        }

        let cancel = CancellationToken::new();
        *lock(&inner.cancel) = cancel.clone();
        let (tx, rx) = mpsc::channel(OUTBOUND_QUEUE_CAPACITY);
        *lock(&inner.outbound) = Some(tx);
        inner.transition(SessionInput::AuthenticationSucceeded);

        let handle = tokio::spawn(connection_task(
            Arc::clone(inner),
            writer,
            reader,
            rx,
            cancel,
        ));
        *lock(&inner.task) = Some(handle);
        Ok(())
    }

    /// Ask the connection task to close without waiting for it.
    pub fn shutdown(&self) {
        lock(&self.inner.cancel).cancel();
    }

    /// Close the connection (code 1000) and wait for the task to finish.
    /// Cancels a reconnect in progress.
    pub async fn close(&self) {
        self.shutdown();
        let task = lock(&self.inner.task).take();
        if let Some(task) = task {
            if let Err(e) = task.await {
                self.inner
                    .logger
                    .error(format_args!("[Session] Connection task failed: {e}"));
            }
        }
        self.inner.transition(SessionInput::Closed);
    }

    /// Send an already built command.
    pub async fn send(&self, command: &Command) -> Result<LowercaseUuid, ChatError> {
        let frame = command.frame(&self.inner.context());
        self.inner.send_text(frame.to_text()).await?;
        Ok(frame.event_id)
    }

    /// Send a command and wait for the event carrying the same event id.
    pub async fn request(&self, command: &Command) -> Result<Event, ChatError> {
        let frame = command.frame(&self.inner.context());
        let event_id = frame.event_id;
        let (tx, rx) = oneshot::channel();
        lock(&self.inner.pending).insert(event_id, tx);

        if let Err(e) = self.inner.send_text(frame.to_text()).await {
            lock(&self.inner.pending).remove(&event_id);
            return Err(e);
        }

        let event = match tokio::time::timeout(self.inner.config.request_timeout, rx).await {
            Ok(Ok(event)) => event,
            Ok(Err(_closed)) => return Err(TransportError::Closed.into()),
            Err(_elapsed) => {
                lock(&self.inner.pending).remove(&event_id);
                return Err(TransportError::Timeout.into());
            }
        };

        match event.payload {
            EventPayload::ServerError(error) => Err(ChatError::Server(error)),
            _ => Ok(event),
        }
    }
}

#[async_trait]
impl CommandSink for Session {
    async fn send(&self, command: Command) -> Result<LowercaseUuid, ChatError> {
        Session::send(self, &command).await
    }

    async fn request(&self, command: Command) -> Result<Event, ChatError> {
        Session::request(self, &command).await
    }
}
