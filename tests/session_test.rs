//! Integration tests for the session state machine against an in-process
//! WebSocket backend.
//!
//! The fake backend answers `AuthorizeCustomer`, `ReconnectCustomer` and
//! `FetchThreadList`, and each accepted connection follows a small script
//! (close with a given code right after authentication, or stay open).

use std::sync::{Arc, Mutex};
use std::time::Duration;

use chatline::credentials::MemoryStore;
use chatline::logging::Logger;
use chatline::protocol::event::{ConnectionStateChangedEvent, UnexpectedDisconnectEvent};
use chatline::protocol::{Command, EventKind};
use chatline::token::TokenState;
use chatline::transport::{Session, SessionConfig, SessionState, TokenAuthenticator};
use chatline::EventHub;
use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;

/// What a connection does once the customer is authenticated on it.
#[derive(Clone, Copy, Debug)]
enum Script {
    CloseAfterAuth(u16),
    /// Answer authentication, then stop reading so pings go unanswered.
    SilentAfterAuth,
    Stay,
}

fn postback(event_id: &str, kind: &str, data: Value) -> Message {
    Message::Text(
        json!({
            "eventId": event_id,
            "postback": {"eventType": kind, "data": data}
        })
        .to_string(),
    )
}

async fn handle_connection(stream: tokio::net::TcpStream, script: Script) {
    let Ok(mut ws) = tokio_tungstenite::accept_async(stream).await else {
        return;
    };

    while let Some(Ok(message)) = ws.next().await {
        let Message::Text(text) = message else {
            continue;
        };
        let frame: Value = serde_json::from_str(&text).unwrap();
        let event_id = frame["eventId"].as_str().unwrap().to_string();
        let answer = match frame["payload"]["eventType"].as_str().unwrap() {
            "AuthorizeCustomer" => postback(
                &event_id,
                "CustomerAuthorized",
                json!({
                    "consumerIdentity": {"idOnExternalPlatform": "customer-1"},
                    "accessToken": {"token": "token-1", "expiresIn": 3600}
                }),
            ),
            "ReconnectCustomer" => postback(&event_id, "CustomerReconnected", json!({})),
            "FetchThreadList" => postback(&event_id, "ThreadListFetched", json!({"threads": []})),
            _ => continue,
        };
        if ws.send(answer).await.is_err() {
            return;
        }

        match script {
            Script::CloseAfterAuth(code) => {
                let _ = ws
                    .close(Some(CloseFrame {
                        code: CloseCode::from(code),
                        reason: "".into(),
                    }))
                    .await;
            }
            Script::SilentAfterAuth => {
                tokio::time::sleep(Duration::from_secs(30)).await;
                return;
            }
            Script::Stay => {}
        }
    }
}

/// Serve one connection per script entry, then stop listening.
async fn start_backend(scripts: Vec<Script>) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("ws://{}/", listener.local_addr().unwrap());

    tokio::spawn(async move {
        for script in scripts {
            let Ok((stream, _)) = listener.accept().await else {
                return;
            };
            tokio::spawn(handle_connection(stream, script));
        }
    });

    url
}

struct Harness {
    session: Session,
    states: mpsc::UnboundedReceiver<SessionState>,
    disconnects: Arc<Mutex<u32>>,
}

fn harness(url: &str, reconnect_attempts: u32) -> Harness {
    harness_with(url, reconnect_attempts, |_| {})
}

fn harness_with(
    url: &str,
    reconnect_attempts: u32,
    tune: impl FnOnce(&mut SessionConfig),
) -> Harness {
    let logger = Logger::default();
    let tokens = Arc::new(TokenState::new(Arc::new(MemoryStore::new()), logger.clone()));
    let hub = EventHub::new(logger.clone());

    let (tx, states) = mpsc::unbounded_channel();
    let _states_sub = hub.subscribe::<ConnectionStateChangedEvent, _>(move |e| {
        let _ = tx.send(e.to);
    });
    let disconnects = Arc::new(Mutex::new(0));
    let counter = Arc::clone(&disconnects);
    let _disconnect_sub =
        hub.subscribe::<UnexpectedDisconnectEvent, _>(move |_| *counter.lock().unwrap() += 1);

    let mut config = SessionConfig::new(url, 1086, "chat_test");
    config.reconnect_attempts = reconnect_attempts;
    config.heartbeat_interval = Duration::from_secs(600);
    config.request_timeout = Duration::from_secs(5);
    tune(&mut config);

    let authenticator = Arc::new(TokenAuthenticator::new(Arc::clone(&tokens), logger.clone()));
    let session = Session::new(config, hub, tokens, authenticator, logger);

    Harness {
        session,
        states,
        disconnects,
    }
}

/// Collect states until `last` is seen (or the deadline passes).
async fn states_until(
    rx: &mut mpsc::UnboundedReceiver<SessionState>,
    last: SessionState,
    occurrences: usize,
) -> Vec<SessionState> {
    let mut seen = Vec::new();
    let collect = async {
        while let Some(state) = rx.recv().await {
            seen.push(state);
            if seen.iter().filter(|s| **s == last).count() == occurrences {
                break;
            }
        }
    };
    tokio::time::timeout(Duration::from_secs(10), collect)
        .await
        .expect("timed out waiting for state");
    seen
}

#[tokio::test]
async fn test_connect_authorizes_and_reaches_ready() {
    let url = start_backend(vec![Script::Stay]).await;
    let mut h = harness(&url, 0);

    h.session.connect().await.unwrap();

    let states = states_until(&mut h.states, SessionState::Ready, 1).await;
    assert_eq!(
        states,
        vec![
            SessionState::Connecting,
            SessionState::Open,
            SessionState::Authenticating,
            SessionState::Ready,
        ]
    );
    h.session.close().await;
    assert_eq!(h.session.state(), SessionState::Disconnected);
}

#[tokio::test]
async fn test_abnormal_close_reconnects_through_authenticating() {
    let url = start_backend(vec![Script::CloseAfterAuth(1011), Script::Stay]).await;
    let mut h = harness(&url, 3);

    h.session.connect().await.unwrap();

    let states = states_until(&mut h.states, SessionState::Ready, 2).await;
    assert_eq!(
        &states[3..],
        &[
            SessionState::Ready,
            SessionState::Reconnecting,
            SessionState::Authenticating,
            SessionState::Ready,
        ]
    );
    assert!(!states[3..].contains(&SessionState::Disconnected));
    assert_eq!(*h.disconnects.lock().unwrap(), 0);

    h.session.close().await;
}

#[tokio::test]
async fn test_going_away_close_also_reconnects() {
    let url = start_backend(vec![Script::CloseAfterAuth(1001), Script::Stay]).await;
    let mut h = harness(&url, 3);

    h.session.connect().await.unwrap();

    let states = states_until(&mut h.states, SessionState::Ready, 2).await;
    assert!(states.contains(&SessionState::Reconnecting));
    assert_eq!(h.session.state(), SessionState::Ready);

    h.session.close().await;
}

#[tokio::test]
async fn test_missing_heartbeat_ack_reconnects() {
    let url = start_backend(vec![Script::SilentAfterAuth, Script::Stay]).await;
    let mut h = harness_with(&url, 3, |config| {
        config.heartbeat_interval = Duration::from_millis(200);
        config.heartbeat_timeout = Duration::from_millis(300);
    });

    h.session.connect().await.unwrap();

    let states = states_until(&mut h.states, SessionState::Ready, 2).await;
    assert_eq!(
        &states[3..],
        &[
            SessionState::Ready,
            SessionState::Reconnecting,
            SessionState::Authenticating,
            SessionState::Ready,
        ]
    );
    assert_eq!(*h.disconnects.lock().unwrap(), 0);

    h.session.close().await;
}

#[tokio::test]
async fn test_normal_close_disconnects_without_retry() {
    let url = start_backend(vec![Script::CloseAfterAuth(1000), Script::Stay]).await;
    let mut h = harness(&url, 3);

    h.session.connect().await.unwrap();

    let states = states_until(&mut h.states, SessionState::Disconnected, 1).await;
    assert_eq!(
        &states[3..],
        &[SessionState::Ready, SessionState::Disconnected]
    );
    assert_eq!(*h.disconnects.lock().unwrap(), 0);
}

#[tokio::test]
async fn test_exhausted_reconnects_report_unexpected_disconnect_once() {
    // Only one connection is ever accepted; every reconnect is refused.
    let url = start_backend(vec![Script::CloseAfterAuth(1011)]).await;
    let mut h = harness(&url, 0);

    h.session.connect().await.unwrap();

    let states = states_until(&mut h.states, SessionState::Disconnected, 1).await;
    assert_eq!(
        &states[3..],
        &[SessionState::Ready, SessionState::Reconnecting, SessionState::Disconnected]
    );
    assert_eq!(*h.disconnects.lock().unwrap(), 1);
}

#[tokio::test]
async fn test_request_is_answered_by_matching_event_id() {
    let url = start_backend(vec![Script::Stay]).await;
    let h = harness(&url, 0);

    h.session.connect().await.unwrap();
    let event = h.session.request(&Command::FetchThreadList).await.unwrap();
    assert_eq!(event.kind, EventKind::ThreadListFetched);

    h.session.close().await;
}
