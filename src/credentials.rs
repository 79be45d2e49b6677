//! Credential storage backends.
//!
//! The token state persists the access token, customer identity and visitor
//! id through a [`CredentialStore`]: an opaque get/set/clear byte store.
//!
//! # Backends
//!
//! - [`MemoryStore`]: process-local, used by tests and ephemeral sessions.
//! - [`KeyringStore`]: one OS keyring entry per key under a service name,
//!   values base64-encoded.
//! - [`FileStore`]: a JSON file with 0600 permissions for test mode and
//!   headless hosts without a keyring.
//!
//! # Graceful Degradation
//!
//! Keyring access can fail transiently (locked keychain, changed binary
//! signature). Reads are retried and a missing entry is a normal `None`;
//! other failures are logged and reported as `None` / `false`.

use std::collections::{BTreeMap, HashMap};
use std::fs;
#[cfg(unix)]
use std::os::unix::fs::PermissionsExt;
use std::path::PathBuf;
use std::sync::Mutex;
use std::thread;
use std::time::Duration;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use keyring::Entry;

use crate::constants::{KEYRING_RETRY_ATTEMPTS, KEYRING_RETRY_DELAY};
use crate::token::STORAGE_KEYS;

/// Opaque byte store for credentials.
pub trait CredentialStore: Send + Sync {
    /// Read the value stored under `key`.
    fn get(&self, key: &str) -> Option<Vec<u8>>;
    /// Store `value` under `key`. Returns `false` when the write failed.
    fn set(&self, key: &str, value: &[u8]) -> bool;
    /// Remove every value this store holds.
    fn clear(&self);
}

/// In-memory store.
#[derive(Debug, Default)]
pub struct MemoryStore {
    values: Mutex<HashMap<String, Vec<u8>>>,
}

impl MemoryStore {
    /// An empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl CredentialStore for MemoryStore {
    fn get(&self, key: &str) -> Option<Vec<u8>> {
        self.values.lock().ok()?.get(key).cloned()
    }

    fn set(&self, key: &str, value: &[u8]) -> bool {
        match self.values.lock() {
            Ok(mut values) => {
                values.insert(key.to_string(), value.to_vec());
                true
            }
            Err(_) => false,
        }
    }

    fn clear(&self) {
        if let Ok(mut values) = self.values.lock() {
            values.clear();
        }
    }
}

/// Categorized keyring access errors.
#[derive(Debug, thiserror::Error)]
pub enum KeyringAccessError {
    /// Keyring is locked and requires user interaction to unlock.
    #[error("keyring locked: {0}")]
    Locked(String),
    /// Entry does not exist (normal for first run).
    #[error("keyring entry not found")]
    NotFound,
    /// Access denied, likely due to a binary signature change.
    #[error("keyring access denied: {0}")]
    AccessDenied(String),
    /// Stored data is not valid base64.
    #[error("keyring data corrupted: {0}")]
    Corrupted(String),
    /// Anything else.
    #[error("keyring error: {0}")]
    Other(String),
}

fn categorize_keyring_error(err: &keyring::Error) -> KeyringAccessError {
    if matches!(err, keyring::Error::NoEntry) {
        return KeyringAccessError::NotFound;
    }

    let msg = format!("{err:?}");
    let msg_lower = msg.to_lowercase();

    if msg_lower.contains("user interaction") || msg_lower.contains("user canceled") {
        return KeyringAccessError::Locked(msg);
    }
    if msg_lower.contains("denied") || msg_lower.contains("not allowed") {
        return KeyringAccessError::AccessDenied(msg);
    }
    KeyringAccessError::Other(msg)
}

/// OS keyring store: one entry per key under `service`.
#[derive(Debug, Clone)]
pub struct KeyringStore {
    service: String,
}

impl KeyringStore {
    /// A store writing entries under `service`.
    #[must_use]
    pub fn new(service: impl Into<String>) -> Self {
        Self {
            service: service.into(),
        }
    }

    fn entry(&self, key: &str) -> Result<Entry, KeyringAccessError> {
        Entry::new(&self.service, key)
            .map_err(|e| KeyringAccessError::Other(format!("failed to create entry: {e:?}")))
    }

    fn try_get(&self, key: &str) -> Result<Vec<u8>, KeyringAccessError> {
        let encoded = self
            .entry(key)?
            .get_password()
            .map_err(|e| categorize_keyring_error(&e))?;
        BASE64
            .decode(encoded)
            .map_err(|e| KeyringAccessError::Corrupted(e.to_string()))
    }
}

impl CredentialStore for KeyringStore {
    fn get(&self, key: &str) -> Option<Vec<u8>> {
        for attempt in 0..KEYRING_RETRY_ATTEMPTS {
            if attempt > 0 {
                log::debug!(
                    "[Credentials] Retrying keyring access (attempt {}/{})",
                    attempt + 1,
                    KEYRING_RETRY_ATTEMPTS
                );
                thread::sleep(KEYRING_RETRY_DELAY);
            }

            match self.try_get(key) {
                Ok(value) => return Some(value),
                Err(KeyringAccessError::NotFound) => return None,
                Err(err @ KeyringAccessError::Corrupted(_)) => {
                    log::warn!("[Credentials] Ignoring '{key}': {err}");
                    return None;
                }
                Err(err) => {
                    log::debug!(
                        "[Credentials] Keyring access attempt {} failed: {err}",
                        attempt + 1
                    );
                }
            }
        }

        log::warn!(
            "[Credentials] Keyring access for '{key}' failed after {KEYRING_RETRY_ATTEMPTS} attempts"
        );
        None
    }

    fn set(&self, key: &str, value: &[u8]) -> bool {
        let result = self
            .entry(key)
            .and_then(|entry| {
                entry
                    .set_password(&BASE64.encode(value))
                    .map_err(|e| categorize_keyring_error(&e))
            });
        match result {
            Ok(()) => true,
            Err(err) => {
                log::warn!("[Credentials] Failed to store '{key}' in keyring: {err}");
                false
            }
        }
    }

    fn clear(&self) {
        for key in STORAGE_KEYS {
            if let Ok(entry) = self.entry(key) {
                let _ = entry.delete_credential();
            }
        }
        log::info!("[Credentials] Cleared keyring entries for '{}'", self.service);
    }
}

/// JSON file store (`{key: base64}`), written with 0600 permissions.
#[derive(Debug)]
pub struct FileStore {
    path: PathBuf,
    lock: Mutex<()>,
}

impl FileStore {
    /// A store backed by the file at `path`. The file is created on first write.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    /// Location of the backing file.
    #[must_use]
    pub fn path(&self) -> &PathBuf {
        &self.path
    }

    fn read_all(&self) -> BTreeMap<String, String> {
        let Ok(content) = fs::read_to_string(&self.path) else {
            return BTreeMap::new();
        };
        serde_json::from_str(&content).unwrap_or_else(|e| {
            log::warn!(
                "[Credentials] Ignoring unreadable credentials file {}: {e}",
                self.path.display()
            );
            BTreeMap::new()
        })
    }

    fn write_all(&self, values: &BTreeMap<String, String>) -> std::io::Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(values)?;
        fs::write(&self.path, json)?;

        #[cfg(unix)]
        fs::set_permissions(&self.path, fs::Permissions::from_mode(0o600))?;

        Ok(())
    }
}

impl CredentialStore for FileStore {
    fn get(&self, key: &str) -> Option<Vec<u8>> {
        let _guard = self.lock.lock().ok()?;
        let encoded = self.read_all().remove(key)?;
        BASE64.decode(encoded).ok()
    }

    fn set(&self, key: &str, value: &[u8]) -> bool {
        let Ok(_guard) = self.lock.lock() else {
            return false;
        };
        let mut values = self.read_all();
        values.insert(key.to_string(), BASE64.encode(value));
        match self.write_all(&values) {
            Ok(()) => true,
            Err(e) => {
                log::warn!("[Credentials] Failed to write {}: {e}", self.path.display());
                false
            }
        }
    }

    fn clear(&self) {
        let Ok(_guard) = self.lock.lock() else {
            return;
        };
        if self.path.exists() {
            if let Err(e) = fs::remove_file(&self.path) {
                log::warn!("[Credentials] Failed to remove {}: {e}", self.path.display());
            }
        }
    }
}
