//! Injected logger.
//!
//! Components log through a [`Logger`] handed to them at construction rather
//! than calling the `log` macros directly, so hosts can route records
//! elsewhere. The default sink forwards to the `log` facade; binaries and
//! tests set up `env_logger` with [`init`].
//!
//! [`RemoteLogSink`] uploads error records through the HTTP collaborator and
//! turns itself off for good after the first failed upload.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock, RwLock};

use log::Level;
use serde_json::json;

use crate::http::{HttpClient, HttpRequest};

/// Destination of log records.
pub trait LogSink: Send + Sync {
    /// Record one message.
    fn log(&self, level: Level, message: &str);
}

/// Forwards records to the `log` facade.
#[derive(Debug, Default, Clone, Copy)]
pub struct FacadeSink;

impl LogSink for FacadeSink {
    fn log(&self, level: Level, message: &str) {
        log::log!(target: "chatline", level, "{message}");
    }
}

/// Cheaply cloneable handle to a [`LogSink`].
#[derive(Clone)]
pub struct Logger {
    sink: Arc<dyn LogSink>,
}

impl fmt::Debug for Logger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Logger").finish_non_exhaustive()
    }
}

impl Default for Logger {
    fn default() -> Self {
        Self::new(Arc::new(FacadeSink))
    }
}

impl Logger {
    /// A logger writing to `sink`.
    #[must_use]
    pub fn new(sink: Arc<dyn LogSink>) -> Self {
        Self { sink }
    }

    fn emit(&self, level: Level, args: fmt::Arguments<'_>) {
        self.sink.log(level, &args.to_string());
    }

    /// Log at error level.
    pub fn error(&self, args: fmt::Arguments<'_>) {
        self.emit(Level::Error, args);
    }

    /// Log at warn level.
    pub fn warn(&self, args: fmt::Arguments<'_>) {
        self.emit(Level::Warn, args);
    }

    /// Log at info level.
    pub fn info(&self, args: fmt::Arguments<'_>) {
        self.emit(Level::Info, args);
    }

    /// Log at debug level.
    pub fn debug(&self, args: fmt::Arguments<'_>) {
        self.emit(Level::Debug, args);
    }

    /// Log at trace level.
    pub fn trace(&self, args: fmt::Arguments<'_>) {
        self.emit(Level::Trace, args);
    }
}

fn default_slot() -> &'static RwLock<Logger> {
    static DEFAULT: OnceLock<RwLock<Logger>> = OnceLock::new();
    DEFAULT.get_or_init(|| RwLock::new(Logger::default()))
}

/// The process-wide default logger.
#[must_use]
pub fn default_logger() -> Logger {
    default_slot()
        .read()
        .unwrap_or_else(std::sync::PoisonError::into_inner)
        .clone()
}

/// Replace the process-wide default logger.
pub fn set_default(logger: Logger) {
    *default_slot()
        .write()
        .unwrap_or_else(std::sync::PoisonError::into_inner) = logger;
}

/// Initialize `env_logger` (default filter `info`). Safe to call twice.
pub fn init() {
    let _ = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .try_init();
}

/// Uploads error records over HTTP; disables itself after a failed upload.
pub struct RemoteLogSink {
    client: Arc<dyn HttpClient>,
    url: String,
    enabled: Arc<AtomicBool>,
    inner: Arc<dyn LogSink>,
}

impl fmt::Debug for RemoteLogSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RemoteLogSink")
            .field("url", &self.url)
            .field("enabled", &self.is_enabled())
            .finish_non_exhaustive()
    }
}

impl RemoteLogSink {
    /// Upload to `url`, forwarding every record to `inner` as well.
    #[must_use]
    pub fn new(client: Arc<dyn HttpClient>, url: impl Into<String>, inner: Arc<dyn LogSink>) -> Self {
        Self {
            client,
            url: url.into(),
            enabled: Arc::new(AtomicBool::new(true)),
            inner,
        }
    }

    /// Whether uploads are still attempted.
    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Acquire)
    }

    /// Upload one record. Returns whether the upload succeeded.
    pub async fn upload(&self, level: Level, message: &str) -> bool {
        upload(&*self.client, &self.url, &self.enabled, level, message).await
    }
}

async fn upload(
    client: &dyn HttpClient,
    url: &str,
    enabled: &AtomicBool,
    level: Level,
    message: &str,
) -> bool {
    if !enabled.load(Ordering::Acquire) {
        return false;
    }
    let body = json!({
        "level": level.as_str(),
        "message": message,
        "timestamp": chrono::Utc::now(),
    });
    let ok = matches!(
        client.execute(HttpRequest::post_json(url, &body)).await,
        Ok(response) if response.is_success()
    );
    if !ok && enabled.swap(false, Ordering::AcqRel) {
        log::warn!(target: "chatline", "[Logging] Remote log upload failed, disabling remote sink");
    }
    ok
}

impl LogSink for RemoteLogSink {
    fn log(&self, level: Level, message: &str) {
        self.inner.log(level, message);
        if level != Level::Error || !self.is_enabled() {
            return;
        }
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            return;
        };
        let client = Arc::clone(&self.client);
        let url = self.url.clone();
        let enabled = Arc::clone(&self.enabled);
        let message = message.to_string();
        handle.spawn(async move {
            upload(&*client, &url, &enabled, level, &message).await;
        });
    }
}
