//! Document fetching.
//!
//! Generation pipelines obtain raw HTML through the [`DocumentFetcher`] trait. The
//! production implementation, [`HttpFetcher`], performs HTTP GET requests with
//! `reqwest`; tests plug in closures instead:
//!
//! ```rust,no_run
//! use feedgen::fetch::DocumentFetcher;
//! use feedgen::core::Result;
//! use url::Url;
//!
//! let fetcher = |url: &Url| -> Result<String> { Ok(format!("<title>{url}</title>")) };
//! let html = fetcher.fetch(&Url::parse("https://site.example/").unwrap()).unwrap();
//! ```
//!
//! Fetching is blocking from the caller's point of view: generation runs on tokio's
//! blocking pool and `HttpFetcher` drives its async client through a runtime handle.

use std::time::Duration;

use tokio::runtime::Handle;
use url::Url;

use crate::core::{FeedgenError, Result};

/// Request timeout of [`HttpFetcher`].
pub const FETCH_TIMEOUT: Duration = Duration::from_secs(30);

/// Browser-like user agent; some sites reject unknown clients.
pub const USER_AGENT: &str = "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

/// Turns a location into raw document text.
pub trait DocumentFetcher: Send + Sync {
    /// Fetch the document at `url`.
    ///
    /// # Errors
    ///
    /// [`FeedgenError::FetchError`] when the document cannot be retrieved.
    fn fetch(&self, url: &Url) -> Result<String>;
}

impl<F> DocumentFetcher for F
where
    F: Fn(&Url) -> Result<String> + Send + Sync,
{
    fn fetch(&self, url: &Url) -> Result<String> {
        self(url)
    }
}

/// Parse a location produced by configuration.
///
/// # Errors
///
/// [`FeedgenError::InvalidUrl`] when `location` is not an absolute URL.
pub fn parse_url(location: &str) -> Result<Url> {
    Url::parse(location.trim()).map_err(|e| FeedgenError::InvalidUrl {
        url: location.to_string(),
        reason: e.to_string(),
    })
}

/// HTTP(S) and `file://` fetcher.
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: reqwest::Client,
    runtime: Handle,
}

impl HttpFetcher {
    /// Create a fetcher driving requests on `runtime`.
    ///
    /// `fetch` must be called from outside the runtime's async workers (for example
    /// from `spawn_blocking`), since it blocks on the request.
    pub fn new(runtime: Handle) -> Result<Self> {
        let mut headers = reqwest::header::HeaderMap::new();
        headers.insert(
            reqwest::header::ACCEPT,
            reqwest::header::HeaderValue::from_static(
                "text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8",
            ),
        );
        headers.insert(
            reqwest::header::ACCEPT_LANGUAGE,
            reqwest::header::HeaderValue::from_static("en-US,en;q=0.5"),
        );

        let client = reqwest::Client::builder()
            .timeout(FETCH_TIMEOUT)
            .user_agent(USER_AGENT)
            .default_headers(headers)
            .redirect(reqwest::redirect::Policy::limited(5))
            .build()
            .map_err(|e| FeedgenError::ConfigError {
                message: format!("failed to create HTTP client: {e}"),
            })?;

        Ok(Self {
            client,
            runtime,
        })
    }

    /// Create a fetcher on the runtime the caller is running in.
    pub fn from_current_runtime() -> Result<Self> {
        let runtime = Handle::try_current().map_err(|e| FeedgenError::ConfigError {
            message: format!("HTTP fetcher needs a tokio runtime: {e}"),
        })?;
        Self::new(runtime)
    }

    async fn get(&self, url: &Url) -> Result<String> {
        let fetch_error = |reason: String| FeedgenError::FetchError {
            url: url.to_string(),
            reason,
        };

        let response =
            self.client.get(url.clone()).send().await.map_err(|e| fetch_error(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(fetch_error(format!("HTTP {status}")));
        }

        response.text().await.map_err(|e| fetch_error(format!("failed to read body: {e}")))
    }
}

impl DocumentFetcher for HttpFetcher {
    fn fetch(&self, url: &Url) -> Result<String> {
        tracing::debug!("Fetching {}", url);
        if url.scheme() == "file" {
            return read_file_url(url);
        }
        self.runtime.block_on(self.get(url))
    }
}

fn read_file_url(url: &Url) -> Result<String> {
    let path = url.to_file_path().map_err(|()| FeedgenError::InvalidUrl {
        url: url.to_string(),
        reason: "not a local file path".to_string(),
    })?;
    std::fs::read_to_string(&path).map_err(|e| FeedgenError::FetchError {
        url: url.to_string(),
        reason: e.to_string(),
    })
}
