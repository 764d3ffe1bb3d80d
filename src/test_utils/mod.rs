//! Test utilities for feedgen
//!
//! Available to the crate's own unit tests and, through the `test-utils` feature, to
//! the integration tests:
//!
//! - [`init_test_logging`] - one-time tracing setup honouring `RUST_LOG`
//! - [`StaticPages`] - an in-memory [`DocumentFetcher`] whose pages can change between
//!   generations
//! - [`FakeBrowser`] - a [`BrowserDriver`] answering scripts from a table

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, Once, PoisonError};
use std::time::Instant;

use serde_json::Value;
use tracing::Level;
use tracing_subscriber::EnvFilter;
use url::Url;

use crate::core::{FeedgenError, Result};
use crate::fetch::DocumentFetcher;
use crate::generator::{BrowserDriver, BrowserSession, SessionSettings};

/// Global flag to ensure logging is only initialized once in tests
static INIT_LOGGING: Once = Once::new();

/// Initialize logging for tests.
///
/// Uses `level` when given, otherwise `RUST_LOG`; with neither, tests run without a
/// subscriber.
///
/// ```bash
/// RUST_LOG=feedgen=debug cargo test
/// ```
pub fn init_test_logging(level: Option<Level>) {
    INIT_LOGGING.call_once(|| {
        let filter = if let Some(level) = level {
            EnvFilter::new(level.to_string())
        } else if std::env::var("RUST_LOG").is_ok() {
            EnvFilter::from_default_env()
        } else {
            return;
        };

        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_test_writer()
            .with_target(true)
            .with_thread_ids(false)
            .try_init();
    });
}

/// In-memory pages served as a [`DocumentFetcher`].
///
/// Unknown URLs fail with [`FeedgenError::FetchError`]. Clones share the pages and the
/// fetch counter.
#[derive(Debug, Clone, Default)]
pub struct StaticPages {
    pages: Arc<Mutex<HashMap<String, String>>>,
    fetches: Arc<AtomicUsize>,
}

impl StaticPages {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace the page at `url`.
    pub fn set(&self, url: &str, html: impl Into<String>) -> &Self {
        self.pages.lock().unwrap_or_else(PoisonError::into_inner).insert(url.to_string(), html.into());
        self
    }

    /// Number of fetches so far, failed ones included.
    pub fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }
}

impl DocumentFetcher for StaticPages {
    fn fetch(&self, url: &Url) -> Result<String> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        self.pages.lock().unwrap_or_else(PoisonError::into_inner).get(url.as_str()).cloned().ok_or_else(
            || FeedgenError::FetchError {
                url: url.to_string(),
                reason: "HTTP 404 Not Found".to_string(),
            },
        )
    }
}

/// A [`BrowserDriver`] whose sessions answer scripts from a table.
///
/// Scripts without an entry evaluate to `null`. Every session call is appended to the
/// shared log as a short line (`open`, `navigate <url>`, `wait <css>`, `eval <script>`,
/// `close`).
#[derive(Debug, Clone, Default)]
pub struct FakeBrowser {
    scripts: Arc<Mutex<HashMap<String, Value>>>,
    log: Arc<Mutex<Vec<String>>>,
}

impl FakeBrowser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer `script` with `value`.
    pub fn script(&self, script: &str, value: Value) -> &Self {
        self.scripts.lock().unwrap_or_else(PoisonError::into_inner).insert(script.to_string(), value);
        self
    }

    pub fn log(&self) -> Vec<String> {
        self.log.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }
}

impl BrowserDriver for FakeBrowser {
    fn open(&self, _settings: &SessionSettings) -> Result<Box<dyn BrowserSession>> {
        self.log.lock().unwrap_or_else(PoisonError::into_inner).push("open".to_string());
        Ok(Box::new(self.clone()))
    }
}

impl BrowserSession for FakeBrowser {
    fn navigate(&mut self, url: &Url, _deadline: Instant) -> Result<()> {
        self.log.lock().unwrap_or_else(PoisonError::into_inner).push(format!("navigate {url}"));
        Ok(())
    }

    fn wait_visible(&mut self, css: &str, _deadline: Instant) -> Result<()> {
        self.log.lock().unwrap_or_else(PoisonError::into_inner).push(format!("wait {css}"));
        Ok(())
    }

    fn evaluate(&mut self, script: &str, _deadline: Instant) -> Result<Value> {
        self.log.lock().unwrap_or_else(PoisonError::into_inner).push(format!("eval {script}"));
        Ok(self
            .scripts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(script)
            .cloned()
            .unwrap_or(Value::Null))
    }

    fn close(&mut self) -> Result<()> {
        self.log.lock().unwrap_or_else(PoisonError::into_inner).push("close".to_string());
        Ok(())
    }
}
