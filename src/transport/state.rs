//! Session state machine.
//!
//! ```text
//! Disconnected -> Connecting -> Open -> Authenticating -> Ready
//!                                            ^              |
//!                                            |       connection lost
//!                                            |              v
//!                                            +------- Reconnecting
//! ```
//!
//! Any state goes to `Disconnected` on an explicit close, on a failed first
//! handshake or authentication, and when reconnect attempts run out.
//! [`SessionState::next`] is pure; [`StateCell`] applies transitions through a
//! single `watch::Sender` so observers see every state in order.

use std::fmt;

use tokio::sync::watch;

/// Connection state of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum SessionState {
    /// No connection.
    #[default]
    Disconnected,
    /// WebSocket handshake in progress.
    Connecting,
    /// Socket open, not yet authenticated.
    Open,
    /// Authorization or reconnect command in flight.
    Authenticating,
    /// Authenticated; commands may be sent.
    Ready,
    /// Connection lost; re-establishing with backoff.
    Reconnecting,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Open => "open",
            Self::Authenticating => "authenticating",
            Self::Ready => "ready",
            Self::Reconnecting => "reconnecting",
        };
        f.write_str(name)
    }
}

/// Inputs driving the state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionInput {
    /// The caller asked to connect.
    Connect,
    /// The WebSocket handshake completed.
    HandshakeSucceeded,
    /// The WebSocket handshake failed.
    HandshakeFailed,
    /// The authentication command was sent.
    AuthenticationStarted,
    /// The backend accepted the authentication.
    AuthenticationSucceeded,
    /// The backend rejected the authentication.
    AuthenticationFailed,
    /// Abnormal close, read error or heartbeat timeout.
    ConnectionLost,
    /// Every reconnect attempt failed.
    ReconnectsExhausted,
    /// Explicit close or normal close from the peer.
    Closed,
}

impl SessionState {
    /// The state after `input`, or `None` when `input` is not valid here.
    #[must_use]
    pub fn next(self, input: SessionInput) -> Option<Self> {
        use SessionInput as I;
        use SessionState as S;

        Some(match (self, input) {
            (_, I::Closed) => S::Disconnected,
            (S::Disconnected, I::Connect) => S::Connecting,
            (S::Connecting, I::HandshakeSucceeded) => S::Open,
            (S::Connecting, I::HandshakeFailed) => S::Disconnected,
            (S::Open, I::AuthenticationStarted) => S::Authenticating,
            (S::Authenticating, I::AuthenticationSucceeded) => S::Ready,
            (S::Authenticating, I::AuthenticationFailed) => S::Disconnected,
            (S::Open | S::Authenticating | S::Ready, I::ConnectionLost) => S::Reconnecting,
            (S::Reconnecting, I::HandshakeSucceeded) => S::Authenticating,
            (S::Reconnecting, I::HandshakeFailed) => S::Reconnecting,
            (S::Reconnecting, I::ReconnectsExhausted) => S::Disconnected,
            _ => return None,
        })
    }

    /// Whether commands may be sent.
    #[must_use]
    pub fn is_ready(self) -> bool {
        self == Self::Ready
    }
}

/// Single-writer holder of the session state.
#[derive(Debug)]
pub struct StateCell {
    tx: watch::Sender<SessionState>,
}

impl Default for StateCell {
    fn default() -> Self {
        Self::new()
    }
}

impl StateCell {
    /// A cell starting in `Disconnected`.
    #[must_use]
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(SessionState::Disconnected);
        Self { tx }
    }

    /// Current state.
    #[must_use]
    pub fn get(&self) -> SessionState {
        *self.tx.borrow()
    }

    /// A receiver observing every change.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.tx.subscribe()
    }

    /// Apply `input` atomically. Returns `(from, to)` when the state changed.
    pub fn apply(&self, input: SessionInput) -> Option<(SessionState, SessionState)> {
        let mut change = None;
        self.tx.send_if_modified(|state| match state.next(input) {
            Some(next) if next != *state => {
                change = Some((*state, next));
                *state = next;
                true
            }
            _ => false,
        });
        change
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use SessionInput as I;
    use SessionState as S;

    fn run(inputs: &[SessionInput]) -> Vec<SessionState> {
        let mut state = S::Disconnected;
        let mut seen = vec![state];
        for &input in inputs {
            state = state.next(input).unwrap();
            seen.push(state);
        }
        seen
    }

    #[test]
    fn test_happy_path() {
        assert_eq!(
            run(&[I::Connect, I::HandshakeSucceeded, I::AuthenticationStarted, I::AuthenticationSucceeded]),
            vec![S::Disconnected, S::Connecting, S::Open, S::Authenticating, S::Ready]
        );
    }

    #[test]
    fn test_loss_goes_through_reconnecting_to_authenticating() {
        let states = run(&[
            I::Connect,
            I::HandshakeSucceeded,
            I::AuthenticationStarted,
            I::AuthenticationSucceeded,
            I::ConnectionLost,
            I::HandshakeFailed,
            I::HandshakeSucceeded,
            I::AuthenticationSucceeded,
        ]);
        assert_eq!(
            &states[4..],
            &[S::Ready, S::Reconnecting, S::Reconnecting, S::Authenticating, S::Ready]
        );
    }

    #[test]
    fn test_close_from_anywhere() {
        for state in [S::Connecting, S::Open, S::Authenticating, S::Ready, S::Reconnecting] {
            assert_eq!(state.next(I::Closed), Some(S::Disconnected));
        }
    }

    #[test]
    fn test_invalid_inputs_are_rejected() {
        assert_eq!(S::Disconnected.next(I::AuthenticationSucceeded), None);
        assert_eq!(S::Ready.next(I::Connect), None);
        assert_eq!(S::Ready.next(I::ReconnectsExhausted), None);
    }

    #[test]
    fn test_cell_reports_changes_only() {
        let cell = StateCell::new();
        let mut rx = cell.subscribe();
        assert_eq!(cell.apply(I::Connect), Some((S::Disconnected, S::Connecting)));
        assert!(rx.has_changed().unwrap());
        rx.mark_unchanged();
        assert_eq!(cell.apply(I::AuthenticationSucceeded), None);
        assert!(!rx.has_changed().unwrap());
        assert_eq!(cell.get(), S::Connecting);
    }
}
