//! W3C WebDriver client (chromedriver, geckodriver, Selenium).

use std::time::{Duration, Instant};

use reqwest::Method;
use serde_json::{Value, json};
use tokio::runtime::Handle;
use url::Url;

use super::{BrowserDriver, BrowserSession, SessionSettings};
use crate::core::{FeedgenError, Result};

/// Where chromedriver listens by default.
pub const DEFAULT_WEBDRIVER_URL: &str = "http://localhost:9515";

/// Web element identifier key defined by the W3C protocol.
const ELEMENT_KEY: &str = "element-6066-11e4-a52e-4f735466cecf";

const POLL_INTERVAL: Duration = Duration::from_millis(100);
const REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

fn browser_error(operation: &str, reason: impl Into<String>) -> FeedgenError {
    FeedgenError::BrowserError {
        operation: operation.to_string(),
        reason: reason.into(),
    }
}

fn timed_out(operation: &str, timeout: Duration) -> FeedgenError {
    FeedgenError::Timeout {
        operation: operation.to_string(),
        seconds: timeout.as_secs(),
    }
}

fn request_error(operation: &str, timeout: Option<Duration>, error: &reqwest::Error) -> FeedgenError {
    match timeout {
        Some(timeout) if error.is_timeout() => timed_out(operation, timeout),
        _ => browser_error(operation, error.to_string()),
    }
}

/// Time left until `deadline`, or a timeout error once it has passed.
fn remaining(operation: &str, deadline: Instant) -> Result<Duration> {
    let left = deadline.saturating_duration_since(Instant::now());
    if left.is_zero() {
        return Err(timed_out(operation, left));
    }
    Ok(left)
}

/// A WebDriver server.
///
/// Like [`HttpFetcher`](crate::fetch::HttpFetcher), requests are driven through a
/// runtime handle, so sessions must be used from blocking threads.
#[derive(Debug, Clone)]
pub struct WebDriverBrowser {
    endpoint: Url,
    client: reqwest::Client,
    runtime: Handle,
}

impl WebDriverBrowser {
    pub fn new(endpoint: &str, runtime: Handle) -> Result<Self> {
        let mut endpoint = Url::parse(endpoint).map_err(|e| FeedgenError::InvalidUrl {
            url: endpoint.to_string(),
            reason: e.to_string(),
        })?;
        if !endpoint.path().ends_with('/') {
            let path = format!("{}/", endpoint.path());
            endpoint.set_path(&path);
        }

        let client = reqwest::Client::builder().timeout(REQUEST_TIMEOUT).build().map_err(|e| {
            FeedgenError::ConfigError {
                message: format!("failed to create WebDriver client: {e}"),
            }
        })?;

        Ok(Self {
            endpoint,
            client,
            runtime,
        })
    }

    pub fn from_current_runtime(endpoint: &str) -> Result<Self> {
        let runtime = Handle::try_current().map_err(|e| FeedgenError::ConfigError {
            message: format!("WebDriver client needs a tokio runtime: {e}"),
        })?;
        Self::new(endpoint, runtime)
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    async fn send(
        &self,
        operation: &str,
        method: Method,
        path: &str,
        body: Option<Value>,
        timeout: Option<Duration>,
    ) -> Result<Value> {
        let url = self.endpoint.join(path).map_err(|e| browser_error(operation, e.to_string()))?;
        let mut request = self.client.request(method, url);
        if let Some(body) = body {
            request = request.json(&body);
        }
        if let Some(timeout) = timeout {
            request = request.timeout(timeout);
        }

        let response = request.send().await.map_err(|e| request_error(operation, timeout, &e))?;
        let status = response.status();
        let payload: Value = response.json().await.map_err(|e| match timeout {
            Some(timeout) if e.is_timeout() => timed_out(operation, timeout),
            _ => browser_error(operation, format!("invalid response: {e}")),
        })?;
        let value = payload.get("value").cloned().unwrap_or(Value::Null);

        if !status.is_success() {
            let kind = value.get("error").and_then(Value::as_str).unwrap_or("unknown error");
            if matches!(kind, "timeout" | "script timeout") {
                return Err(timed_out(operation, timeout.unwrap_or(REQUEST_TIMEOUT)));
            }
            let message = value.get("message").and_then(Value::as_str).unwrap_or_default();
            return Err(browser_error(operation, format!("{kind}: {message} (HTTP {status})")));
        }
        Ok(value)
    }

    fn call(
        &self,
        operation: &str,
        method: Method,
        path: &str,
        body: Option<Value>,
        timeout: Option<Duration>,
    ) -> Result<Value> {
        self.runtime.block_on(self.send(operation, method, path, body, timeout))
    }
}

fn capabilities(settings: &SessionSettings) -> Value {
    let (width, height) = settings.window_size;
    let mut args = vec![format!("--window-size={width},{height}"), "--disable-gpu".to_string()];
    if settings.headless {
        args.push("--headless=new".to_string());
    }
    if settings.no_sandbox {
        args.push("--no-sandbox".to_string());
        args.push("--disable-setuid-sandbox".to_string());
    }
    json!({
        "capabilities": {
            "alwaysMatch": {
                "browserName": "chrome",
                "goog:chromeOptions": { "args": args }
            }
        }
    })
}

impl BrowserDriver for WebDriverBrowser {
    fn open(&self, settings: &SessionSettings) -> Result<Box<dyn BrowserSession>> {
        let value = self.call("open", Method::POST, "session", Some(capabilities(settings)), None)?;
        let id = value
            .get("sessionId")
            .and_then(Value::as_str)
            .ok_or_else(|| browser_error("open", "response carries no session id"))?
            .to_string();
        tracing::debug!("Opened WebDriver session {}", id);
        Ok(Box::new(WebDriverSession {
            browser: self.clone(),
            id,
            open: true,
        }))
    }
}

struct WebDriverSession {
    browser: WebDriverBrowser,
    id: String,
    open: bool,
}

impl WebDriverSession {
    fn request(
        &self,
        operation: &str,
        method: Method,
        path: &str,
        body: Option<Value>,
        timeout: Option<Duration>,
    ) -> Result<Value> {
        if !self.open {
            return Err(browser_error(operation, "session is closed"));
        }
        let path = if path.is_empty() {
            format!("session/{}", self.id)
        } else {
            format!("session/{}/{}", self.id, path)
        };
        self.browser.call(operation, method, &path, body, timeout)
    }

    fn call(&self, operation: &str, method: Method, path: &str, body: Option<Value>) -> Result<Value> {
        self.request(operation, method, path, body, None)
    }

    /// Like [`call`](Self::call), but the HTTP request is cut off at `deadline`.
    fn call_until(
        &self,
        operation: &str,
        method: Method,
        path: &str,
        body: Option<Value>,
        deadline: Instant,
    ) -> Result<Value> {
        let timeout = remaining(operation, deadline)?;
        self.request(operation, method, path, body, Some(timeout))
    }

    /// Set the driver's `pageLoad` or `script` timeout to the time left until `deadline`.
    fn limit(&self, timer: &str, deadline: Instant) -> Result<()> {
        let left = remaining(timer, deadline)?;
        let mut body = serde_json::Map::new();
        body.insert(
            timer.to_string(),
            Value::from(u64::try_from(left.as_millis()).unwrap_or(u64::MAX)),
        );
        self.call_until("timeouts", Method::POST, "timeouts", Some(Value::Object(body)), deadline)?;
        Ok(())
    }

    /// `Ok(true)` once an element matching `css` exists and is displayed.
    fn visible(&self, css: &str, deadline: Instant) -> Result<bool> {
        let found = self.call_until(
            "wait_visible",
            Method::POST,
            "element",
            Some(json!({"using": "css selector", "value": css})),
            deadline,
        );
        let element = match found {
            Ok(element) => element,
            Err(FeedgenError::BrowserError {
                reason,
                ..
            }) if reason.starts_with("no such element") => return Ok(false),
            Err(e) => return Err(e),
        };
        let Some(element_id) = element.get(ELEMENT_KEY).and_then(Value::as_str) else {
            return Err(browser_error("wait_visible", "response carries no element id"));
        };
        let displayed = self.call_until(
            "wait_visible",
            Method::GET,
            &format!("element/{element_id}/displayed"),
            None,
            deadline,
        )?;
        Ok(displayed.as_bool().unwrap_or(false))
    }
}

impl BrowserSession for WebDriverSession {
    fn navigate(&mut self, url: &Url, deadline: Instant) -> Result<()> {
        tracing::debug!("Navigating to {}", url);
        self.limit("pageLoad", deadline)?;
        self.call_until("navigate", Method::POST, "url", Some(json!({"url": url.as_str()})), deadline)?;
        Ok(())
    }

    fn wait_visible(&mut self, css: &str, deadline: Instant) -> Result<()> {
        loop {
            let visible = match self.visible(css, deadline) {
                Err(FeedgenError::Timeout {
                    ..
                }) => false,
                other => other?,
            };
            if visible {
                return Ok(());
            }
            let now = Instant::now();
            if now >= deadline {
                return Err(FeedgenError::Timeout {
                    operation: format!("wait_visible '{css}'"),
                    seconds: super::DEFAULT_WAIT_TIMEOUT.as_secs(),
                });
            }
            std::thread::sleep(POLL_INTERVAL.min(deadline - now));
        }
    }

    fn evaluate(&mut self, script: &str, deadline: Instant) -> Result<Value> {
        self.limit("script", deadline)?;
        self.call_until(
            "evaluate",
            Method::POST,
            "execute/sync",
            Some(json!({"script": "return eval(arguments[0]);", "args": [script]})),
            deadline,
        )
    }

    fn close(&mut self) -> Result<()> {
        if !self.open {
            return Ok(());
        }
        let result = self.call("close", Method::DELETE, "", None).map(|_| ());
        self.open = false;
        tracing::debug!("Closed WebDriver session {}", self.id);
        result
    }
}

impl Drop for WebDriverSession {
    fn drop(&mut self) {
        if self.open {
            if let Err(e) = self.close() {
                tracing::warn!("Failed to close WebDriver session {}: {}", self.id, e);
            }
        }
    }
}
