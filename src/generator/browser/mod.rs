//! Browser strategy: a real browser renders the page and scripts extract the records.
//!
//! ```yaml
//! type: browser
//! url: "https://app.example/list"
//! actions:
//!   - wait_visible: ".result"
//!   - sleep_ms: 500
//!   - feed: "({title: document.title})"
//!   - items: |
//!       Array.from(document.querySelectorAll('.result')).map(e => ({
//!         id: e.dataset.id,
//!         title: e.querySelector('h3').innerText,
//!         link: e.querySelector('a').getAttribute('href'),
//!       }))
//! browser:
//!   visible: false
//!   timeout_secs: 60
//! limit: 20
//! ```
//!
//! Actions run in order after navigating to `url`. Scripts are expressions first (so
//! they can use request parameters) and then evaluated in the page. `feed` must yield
//! an object with feed fields, `items` an array of objects with item fields; `link` and
//! `author` may be plain strings or `{href, ...}` / `{name, email}` objects.
//!
//! The optional timeout is a deadline for the whole generation; passing it fails the
//! call with [`FeedgenError::Timeout`]. Sessions receive the deadline with every
//! navigation, wait and script, so a page load or script still running when it passes is
//! cut off. The browser itself sits behind the
//! [`BrowserDriver`] trait; [`WebDriverBrowser`] talks to a W3C WebDriver server such
//! as chromedriver.

mod webdriver;

pub use webdriver::{DEFAULT_WEBDRIVER_URL, WebDriverBrowser};

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use serde::Deserialize;
use serde_json::Value;
use url::Url;

use super::pipeline::{Generation, ItemIdentity, absolute_link, author, feed_key, limited, link};
use super::{FeedGenerator, GeneratorContext};
use crate::config::GeneratorOptions;
use crate::core::{FeedgenError, Result};
use crate::fetch::parse_url;
use crate::models::{Author, Feed, Item, Link};
use crate::templating::evaluate;

/// How long `wait_visible` waits when no timeout is configured.
pub const DEFAULT_WAIT_TIMEOUT: Duration = Duration::from_secs(30);

/// How long a page load or script may run when no timeout is configured.
pub const DEFAULT_PAGE_TIMEOUT: Duration = Duration::from_secs(120);

/// Browser window size requested from the driver.
pub const WINDOW_SIZE: (u32, u32) = (1920, 1080);

/// How a browser session is started.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSettings {
    pub headless: bool,
    pub no_sandbox: bool,
    pub window_size: (u32, u32),
}

/// Starts browser sessions.
pub trait BrowserDriver: Send + Sync {
    /// Open a new session.
    ///
    /// # Errors
    ///
    /// [`FeedgenError::BrowserError`] when the browser cannot be started.
    fn open(&self, settings: &SessionSettings) -> Result<Box<dyn BrowserSession>>;
}

/// One browser session (a tab).
pub trait BrowserSession: Send {
    /// Load `url`.
    ///
    /// # Errors
    ///
    /// [`FeedgenError::Timeout`] when the page is still loading at `deadline`.
    fn navigate(&mut self, url: &Url, deadline: Instant) -> Result<()>;

    /// Wait until an element matching `css` is displayed.
    ///
    /// # Errors
    ///
    /// [`FeedgenError::Timeout`] when `deadline` passes first.
    fn wait_visible(&mut self, css: &str, deadline: Instant) -> Result<()>;

    /// Evaluate a JavaScript expression in the page and return its JSON value.
    ///
    /// # Errors
    ///
    /// [`FeedgenError::Timeout`] when the script is still running at `deadline`.
    fn evaluate(&mut self, script: &str, deadline: Instant) -> Result<Value>;

    /// End the session.
    fn close(&mut self) -> Result<()>;
}

/// One step after navigation.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    /// Wait for an element to become visible
    WaitVisible(String),
    /// Pause for the given number of milliseconds
    SleepMs(u64),
    /// Script yielding the feed object
    Feed(String),
    /// Script yielding the item array
    Items(String),
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BrowserSettings {
    /// Show the browser window
    pub visible: bool,
    /// Deadline for the whole generation
    pub timeout_secs: Option<u64>,
}

/// Options of the `browser` strategy.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BrowserOptions {
    /// Page URL expression
    pub url: String,
    #[serde(default)]
    pub actions: Vec<Action>,
    #[serde(default)]
    pub browser: BrowserSettings,
    /// Maximum number of items, 0 for all
    #[serde(default)]
    pub limit: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
enum LinkValue {
    Href(String),
    Link(Link),
}

impl LinkValue {
    fn into_link(self) -> Link {
        match self {
            Self::Href(href) => Link {
                href,
                ..Link::default()
            },
            Self::Link(link) => link,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
enum AuthorValue {
    Name(String),
    Author(Author),
}

impl AuthorValue {
    fn into_author(self) -> Option<Author> {
        match self {
            Self::Name(name) => author(name, String::new()),
            Self::Author(value) => author(value.name, value.email),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
struct ScriptFeed {
    id: String,
    title: String,
    subtitle: String,
    description: String,
    copyright: String,
    link: Option<LinkValue>,
    author: Option<AuthorValue>,
    items: Vec<ScriptItem>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
struct ScriptItem {
    id: String,
    title: String,
    description: String,
    content: String,
    link: Option<LinkValue>,
    author: Option<AuthorValue>,
}

#[derive(Debug, Default)]
struct ScriptResults {
    feed: Option<ScriptFeed>,
    items: Option<Vec<ScriptItem>>,
}

/// Deadline of one generation call.
struct Deadline {
    at: Option<Instant>,
    seconds: u64,
}

impl Deadline {
    fn new(timeout_secs: Option<u64>) -> Self {
        Self {
            at: timeout_secs.map(|seconds| Instant::now() + Duration::from_secs(seconds)),
            seconds: timeout_secs.unwrap_or_default(),
        }
    }

    fn timeout(&self, operation: &str) -> FeedgenError {
        FeedgenError::Timeout {
            operation: operation.to_string(),
            seconds: self.seconds,
        }
    }

    fn check(&self, operation: &str) -> Result<()> {
        match self.at {
            Some(at) if Instant::now() >= at => Err(self.timeout(operation)),
            _ => Ok(()),
        }
    }

    /// Latest instant the next session call may last until.
    fn limit(&self, fallback: Duration) -> Instant {
        self.at.unwrap_or_else(|| Instant::now() + fallback)
    }

    /// Report a session timeout against the configured deadline.
    fn bounded<T>(&self, operation: &str, result: Result<T>) -> Result<T> {
        result.map_err(|e| match e {
            FeedgenError::Timeout {
                ..
            } if self.at.is_some() => self.timeout(operation),
            other => other,
        })
    }

    fn sleep(&self, duration: Duration) -> Result<()> {
        match self.at {
            Some(at) if Instant::now() + duration > at => {
                std::thread::sleep(at.saturating_duration_since(Instant::now()));
                Err(self.timeout("sleep"))
            }
            _ => {
                std::thread::sleep(duration);
                Ok(())
            }
        }
    }
}

fn decode<T: serde::de::DeserializeOwned>(action: &str, value: Value) -> Result<T> {
    serde_json::from_value(value).map_err(|e| FeedgenError::BrowserError {
        operation: action.to_string(),
        reason: format!("unexpected script result: {e}"),
    })
}

/// The `browser` strategy.
pub struct BrowserGenerator {
    driver: Arc<dyn BrowserDriver>,
    no_sandbox: bool,
    options: Option<BrowserOptions>,
}

impl std::fmt::Debug for BrowserGenerator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BrowserGenerator")
            .field("no_sandbox", &self.no_sandbox)
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

impl BrowserGenerator {
    pub fn new(driver: Arc<dyn BrowserDriver>, no_sandbox: bool) -> Self {
        Self {
            driver,
            no_sandbox,
            options: None,
        }
    }

    fn options(&self) -> Result<&BrowserOptions> {
        self.options.as_ref().ok_or_else(|| FeedgenError::ConfigError {
            message: "browser generator used before its options were loaded".to_string(),
        })
    }

    fn run_actions(
        session: &mut dyn BrowserSession,
        generation: &mut Generation,
        url: &Url,
        actions: &[Action],
        deadline: &Deadline,
    ) -> Result<ScriptResults> {
        let navigated = session.navigate(url, deadline.limit(DEFAULT_PAGE_TIMEOUT));
        deadline.bounded("navigate", navigated)?;
        deadline.check("navigate")?;
        generation.source_resolved(url);

        let mut results = ScriptResults::default();
        for action in actions {
            match action {
                Action::WaitVisible(css) => {
                    let css = evaluate(css, generation.scope())?;
                    let waited = session.wait_visible(&css, deadline.limit(DEFAULT_WAIT_TIMEOUT));
                    deadline.bounded("wait_visible", waited)?;
                }
                Action::SleepMs(millis) => deadline.sleep(Duration::from_millis(*millis))?,
                Action::Feed(script) => {
                    let script = evaluate(script, generation.scope())?;
                    let value = session.evaluate(&script, deadline.limit(DEFAULT_PAGE_TIMEOUT));
                    results.feed = Some(decode("feed", deadline.bounded("feed", value)?)?);
                }
                Action::Items(script) => {
                    let script = evaluate(script, generation.scope())?;
                    let value = session.evaluate(&script, deadline.limit(DEFAULT_PAGE_TIMEOUT));
                    results.items = Some(decode("items", deadline.bounded("items", value)?)?);
                }
            }
            deadline.check("browser actions")?;
        }
        Ok(results)
    }
}

impl FeedGenerator for BrowserGenerator {
    fn load_options(&mut self, options: &GeneratorOptions) -> Result<()> {
        self.options = Some(options.decode("browser")?);
        Ok(())
    }

    fn generate(&self, context: &GeneratorContext) -> Result<Feed> {
        let options = self.options()?;
        let mut generation = Generation::start(context)?;
        let url = parse_url(&evaluate(&options.url, generation.scope())?)?;
        let deadline = Deadline::new(options.browser.timeout_secs);

        let settings = SessionSettings {
            headless: !options.browser.visible,
            no_sandbox: self.no_sandbox,
            window_size: WINDOW_SIZE,
        };
        let mut session = self.driver.open(&settings)?;
        let outcome =
            Self::run_actions(session.as_mut(), &mut generation, &url, &options.actions, &deadline);
        if let Err(e) = session.close() {
            tracing::warn!("Failed to close browser session: {}", e);
        }
        let results = outcome?;

        let mut script_feed = results.feed.unwrap_or_default();
        let script_items = results.items.unwrap_or_else(|| std::mem::take(&mut script_feed.items));

        let key = feed_key(&script_feed.id, &url);
        let mut feed = generation.resolve_feed(&key, || {
            let id = if script_feed.id.is_empty() { url.to_string() } else { script_feed.id.clone() };
            let mut feed = Feed::new(id, Utc::now());
            feed.title = script_feed.title.trim().to_string();
            feed.subtitle = script_feed.subtitle.trim().to_string();
            feed.description = script_feed.description.trim().to_string();
            feed.copyright = script_feed.copyright.trim().to_string();
            feed.link = match script_feed.link.clone() {
                Some(value) => Some(value.into_link()),
                None => link(url.to_string(), String::new(), String::new(), String::new()),
            };
            feed.author = script_feed.author.clone().and_then(AuthorValue::into_author);
            Ok(feed)
        })?;

        let normalize = absolute_link(url.clone());
        for script_item in limited(script_items, options.limit) {
            deadline.check("item resolution")?;
            let mut item_link = script_item.link.map(LinkValue::into_link);
            if let Some(item_link) = item_link.as_mut() {
                item_link.href = normalize(item_link.href.trim())?;
            }
            let item_author = script_item.author.and_then(AuthorValue::into_author);

            let identity = ItemIdentity {
                id: script_item.id.trim().to_string(),
                link: item_link.as_ref().map(|l| l.href.clone()).unwrap_or_default(),
                title: script_item.title.trim().to_string(),
                description: script_item.description.trim().to_string(),
                author: item_author.as_ref().map(|a| a.name.clone()).unwrap_or_default(),
            };
            let item = generation.resolve_item(&identity, |id| {
                let mut item = Item::new(id, Utc::now());
                item.title = identity.title.clone();
                item.description = identity.description.clone();
                item.content = script_item.content.trim().to_string();
                item.link = item_link.filter(|l| !l.href.is_empty());
                item.author = item_author;
                Ok(item)
            })?;
            feed.items.push(item);
        }

        Ok(generation.finish(feed))
    }
}
