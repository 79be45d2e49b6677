//! Access token and customer identity state.
//!
//! [`TokenState`] solely owns the access token, the customer identity and the
//! visitor id of a session. Every mutation takes the single write lock, so
//! readers never observe a half-updated state, and is then mirrored to the
//! [`CredentialStore`] under fixed keys. Store writes run after the write
//! lock is released and are serialized by a separate mutex, so a slow
//! keychain never blocks readers. Construction restores whatever the store
//! holds.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::constants::TOKEN_EXPIRY_MARGIN;
use crate::credentials::CredentialStore;
use crate::logging::Logger;
use crate::protocol::event::IssuedToken;
use crate::protocol::{CustomerIdentity, LowercaseUuid};

/// Store key of the access token.
pub const ACCESS_TOKEN_KEY: &str = "accessToken";
/// Store key of the customer identity.
pub const CUSTOMER_KEY: &str = "customerIdentity";
/// Store key of the visitor id.
pub const VISITOR_KEY: &str = "visitorId";
/// Every key the token state writes.
pub const STORAGE_KEYS: [&str; 3] = [ACCESS_TOKEN_KEY, CUSTOMER_KEY, VISITOR_KEY];

/// An access token with its lifetime.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccessToken {
    /// Opaque token.
    pub token: String,
    /// Lifetime in seconds.
    pub expires_in: u64,
    /// When the token was received.
    pub created_at: DateTime<Utc>,
}

impl AccessToken {
    /// A token received just now.
    #[must_use]
    pub fn issued_now(issued: IssuedToken) -> Self {
        Self {
            token: issued.token,
            expires_in: issued.expires_in,
            created_at: Utc::now(),
        }
    }

    /// Whether the token is within the safety margin of its expiry at `now`.
    #[must_use]
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        let elapsed = u64::try_from((now - self.created_at).num_seconds()).unwrap_or(0);
        elapsed >= self.expires_in.saturating_sub(TOKEN_EXPIRY_MARGIN.as_secs())
    }

    /// [`is_expired_at`](Self::is_expired_at) for the current time.
    #[must_use]
    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Utc::now())
    }
}

#[derive(Debug, Default)]
struct Inner {
    token: Option<AccessToken>,
    customer: Option<CustomerIdentity>,
    visitor_id: Option<LowercaseUuid>,
}

/// Session credentials shared by the transport and command issuers.
pub struct TokenState {
    inner: RwLock<Inner>,
    /// Held across a memory update and its store write.
    persisting: Mutex<()>,
    authorization_required: AtomicBool,
    store: Arc<dyn CredentialStore>,
    logger: Logger,
}

impl std::fmt::Debug for TokenState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenState")
            .field("has_token", &self.current_token().is_some())
            .field(
                "authorization_required",
                &self.authorization_required.load(Ordering::Relaxed),
            )
            .finish_non_exhaustive()
    }
}

fn restore<T: for<'de> Deserialize<'de>>(
    store: &dyn CredentialStore,
    key: &str,
    logger: &Logger,
) -> Option<T> {
    let bytes = store.get(key).filter(|b| !b.is_empty())?;
    match serde_json::from_slice(&bytes) {
        Ok(value) => Some(value),
        Err(e) => {
            logger.warn(format_args!("[Token] Discarding stored '{key}': {e}"));
            None
        }
    }
}

impl TokenState {
    /// Build the state, restoring whatever `store` holds.
    pub fn new(store: Arc<dyn CredentialStore>, logger: Logger) -> Self {
        let inner = Inner {
            token: restore(store.as_ref(), ACCESS_TOKEN_KEY, &logger),
            customer: restore(store.as_ref(), CUSTOMER_KEY, &logger),
            visitor_id: restore(store.as_ref(), VISITOR_KEY, &logger),
        };
        if inner.token.is_some() {
            logger.debug(format_args!("[Token] Restored access token from store"));
        }
        Self {
            inner: RwLock::new(inner),
            persisting: Mutex::new(()),
            authorization_required: AtomicBool::new(false),
            store,
            logger,
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, Inner> {
        self.inner.read().unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Inner> {
        self.inner.write().unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    fn persisting(&self) -> MutexGuard<'_, ()> {
        self.persisting
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    fn persist<T: Serialize>(&self, key: &str, value: Option<&T>) {
        let bytes = match value {
            Some(value) => match serde_json::to_vec(value) {
                Ok(bytes) => bytes,
                Err(e) => {
                    self.logger
                        .error(format_args!("[Token] Failed to encode '{key}': {e}"));
                    return;
                }
            },
            None => Vec::new(),
        };
        if !self.store.set(key, &bytes) {
            self.logger
                .warn(format_args!("[Token] Failed to persist '{key}'"));
        }
    }

    /// Whether the channel requires an authorized customer with a token.
    pub fn set_authorization_required(&self, required: bool) {
        self.authorization_required.store(required, Ordering::Relaxed);
    }

    /// Whether the channel requires an authorized customer with a token.
    #[must_use]
    pub fn authorization_required(&self) -> bool {
        self.authorization_required.load(Ordering::Relaxed)
    }

    /// The current token, if any.
    #[must_use]
    pub fn current_token(&self) -> Option<AccessToken> {
        self.read().token.clone()
    }

    /// Replace (or remove) the token.
    pub fn set_token(&self, token: Option<AccessToken>) {
        let _persisting = self.persisting();
        self.write().token.clone_from(&token);
        self.persist(ACCESS_TOKEN_KEY, token.as_ref());
    }

    /// Whether a refresh must happen before the token is used.
    #[must_use]
    pub fn needs_refresh(&self) -> bool {
        match &self.read().token {
            Some(token) => token.is_expired(),
            None => self.authorization_required(),
        }
    }

    /// The stored customer identity.
    #[must_use]
    pub fn customer(&self) -> Option<CustomerIdentity> {
        self.read().customer.clone()
    }

    /// Replace the customer identity.
    pub fn set_customer(&self, customer: Option<CustomerIdentity>) {
        let _persisting = self.persisting();
        self.write().customer.clone_from(&customer);
        self.persist(CUSTOMER_KEY, customer.as_ref());
    }

    /// The visitor id, generated and persisted on first use.
    pub fn visitor_id(&self) -> LowercaseUuid {
        if let Some(id) = self.read().visitor_id {
            return id;
        }
        let _persisting = self.persisting();
        let (id, generated) = {
            let mut inner = self.write();
            match inner.visitor_id {
                Some(id) => (id, false),
                None => {
                    let id = LowercaseUuid::new_v4();
                    inner.visitor_id = Some(id);
                    (id, true)
                }
            }
        };
        if generated {
            self.persist(VISITOR_KEY, Some(&id));
        }
        id
    }

    /// Drop token, customer identity and visitor id in one step.
    pub fn clear(&self) {
        let _persisting = self.persisting();
        *self.write() = Inner::default();
        self.store.clear();
        self.logger.info(format_args!("[Token] Cleared session credentials"));
    }
}
