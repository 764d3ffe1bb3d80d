//! The generation pipeline shared by every strategy.
//!
//! One generation call walks through
//!
//! ```text
//! Init -> SourceResolved -> FeedResolved -> ItemResolved* -> Done
//! ```
//!
//! and fails from any stage without retrying. [`Generation`] owns the per-call scope
//! and selection table, and implements the cache decisions:
//!
//! - the feed is looked up by its key; a cached feed is reused as is (its metadata is
//!   write-once), otherwise it is built and stored without items
//! - each item is looked up by its key; a cached item only gets its title and
//!   description refreshed (and is rewritten when they changed), otherwise it is built
//!   and stored
//!
//! Keys follow one rule for all strategies. The feed key is the explicit feed id, else
//! derived from the source URL. The item key is the explicit id, else derived from the
//! resolved link, else derived from `(title, description, author)`.

use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;

use chrono::Utc;
use url::Url;

use super::{GeneratorContext, empty_object, to_variable};
use crate::core::{FeedgenError, Result};
use crate::document::filters::{SelectionTable, register_selection_filters};
use crate::document::{Document, Selection};
use crate::fetch::parse_url;
use crate::models::{Author, Feed, Item, Link};
use crate::repository::Key;
use crate::templating::{FieldSet, Normalizer, Scope};

/// Progress of one generation call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Init,
    SourceResolved,
    FeedResolved,
    /// Number of items resolved so far
    ItemResolved(usize),
    Done,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Init => f.write_str("init"),
            Self::SourceResolved => f.write_str("source resolved"),
            Self::FeedResolved => f.write_str("feed resolved"),
            Self::ItemResolved(count) => write!(f, "item {count} resolved"),
            Self::Done => f.write_str("done"),
        }
    }
}

/// Normalizer resolving relative links against `base`.
///
/// Absolute links and empty values pass through unchanged.
///
/// ```rust
/// use feedgen::generator::absolute_link;
/// use url::Url;
///
/// let normalize = absolute_link(Url::parse("https://site.example/a/").unwrap());
/// assert_eq!(normalize("/x").unwrap(), "https://site.example/x");
/// assert_eq!(normalize("b").unwrap(), "https://site.example/a/b");
/// assert_eq!(normalize("https://other.example").unwrap(), "https://other.example");
/// ```
#[must_use]
pub fn absolute_link(base: Url) -> Normalizer {
    Arc::new(move |link: &str| -> Result<String> {
        if link.is_empty() || Url::parse(link).is_ok() {
            return Ok(link.to_string());
        }
        base.join(link).map(String::from).map_err(|e| FeedgenError::InvalidUrl {
            url: link.to_string(),
            reason: e.to_string(),
        })
    })
}

/// Run a strategy, turning a panic into [`FeedgenError::StrategyPanicked`].
pub(crate) fn guarded<T>(f: impl FnOnce() -> Result<T>) -> Result<T> {
    match catch_unwind(AssertUnwindSafe(f)) {
        Ok(result) => result,
        Err(payload) => {
            let message = payload
                .downcast_ref::<&str>()
                .map(|s| (*s).to_string())
                .or_else(|| payload.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".to_string());
            tracing::error!("Strategy panicked: {}", message);
            Err(FeedgenError::StrategyPanicked {
                message,
            })
        }
    }
}

/// Key of the feed built from `source`.
pub(crate) fn feed_key(id: &str, source: &Url) -> Key {
    if id.is_empty() {
        Key::derived([source.as_str()])
    } else {
        Key::explicit(id)
    }
}

/// First `limit` candidates in document order; `0` keeps everything.
pub(crate) fn limited<T>(mut candidates: Vec<T>, limit: usize) -> Vec<T> {
    if limit > 0 {
        candidates.truncate(limit);
    }
    candidates
}

/// A link record, `None` when `href` is empty.
pub(crate) fn link(href: String, rel: String, media_type: String, length: String) -> Option<Link> {
    if href.is_empty() {
        return None;
    }
    Some(Link {
        href,
        rel,
        media_type,
        length,
    })
}

/// An author record, `None` when both parts are empty.
pub(crate) fn author(name: String, email: String) -> Option<Author> {
    let author = Author {
        name,
        email,
    };
    (!author.is_empty()).then_some(author)
}

/// The values an item's identity is computed from.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct ItemIdentity {
    pub id: String,
    pub link: String,
    pub title: String,
    pub description: String,
    pub author: String,
}

impl ItemIdentity {
    pub fn key(&self) -> Key {
        if !self.id.is_empty() {
            Key::explicit(&self.id)
        } else if !self.link.is_empty() {
            Key::derived([self.link.as_str()])
        } else {
            Key::derived([self.title.as_str(), self.description.as_str(), self.author.as_str()])
        }
    }

    /// The id stored on a new item.
    pub fn item_id(&self, key: &Key) -> String {
        if !self.id.is_empty() {
            self.id.clone()
        } else if !self.link.is_empty() {
            self.link.clone()
        } else {
            key.render()
        }
    }
}

/// State of one generation call.
pub(crate) struct Generation {
    context: GeneratorContext,
    scope: Scope,
    table: Arc<SelectionTable>,
    stage: Stage,
}

impl Generation {
    /// Open the generation scope (a child of the request scope) with the selection
    /// filters registered.
    pub fn start(context: &GeneratorContext) -> Result<Self> {
        let scope = context.scope.child();
        let table = SelectionTable::new();
        register_selection_filters(&scope, &table)?;
        scope.set("feed", empty_object());
        Ok(Self {
            context: context.clone(),
            scope,
            table,
            stage: Stage::Init,
        })
    }

    pub fn scope(&self) -> &Scope {
        &self.scope
    }

    #[cfg(test)]
    pub fn stage(&self) -> Stage {
        self.stage
    }

    fn advance(&mut self, next: Stage) {
        tracing::trace!("Generation stage {} -> {}", self.stage, next);
        self.stage = next;
    }

    /// Fetch the document at `location` and bind `url` and `content`.
    pub fn fetch_source(&mut self, location: &str) -> Result<(Url, Selection)> {
        let url = parse_url(location)?;
        let html = self.context.fetcher.fetch(&url)?;
        let document = Selection::from_html(html);
        self.scope.set("content", self.table.handle(document.clone()));
        self.source_resolved(&url);
        Ok((url, document))
    }

    /// Record a source resolved by other means (e.g. browser navigation).
    pub fn source_resolved(&mut self, url: &Url) {
        self.scope.set("url", serde_json::Value::String(url.to_string()));
        self.advance(Stage::SourceResolved);
    }

    /// Reuse the cached feed under `key`, or build and store a new one.
    ///
    /// Binds the resolved feed as the `feed` variable.
    pub fn resolve_feed(&mut self, key: &Key, build: impl FnOnce() -> Result<Feed>) -> Result<Feed> {
        let feed = match self.context.repository.get_feed(key)? {
            Some(mut cached) => {
                tracing::debug!("Reusing cached feed {}", key);
                cached.items.clear();
                cached
            }
            None => {
                let mut feed = build()?;
                feed.items.clear();
                self.context.repository.put_feed(key, &feed)?;
                tracing::debug!("Created feed {}", key);
                feed
            }
        };
        self.scope.set("feed", to_variable("feed", &feed)?);
        self.advance(Stage::FeedResolved);
        Ok(feed)
    }

    /// A fresh item scope bound to `candidate`.
    ///
    /// `fields` is pointed at the candidate with its memos cleared and registered as
    /// `field(name=)`. `link_content` fetches the page named by the `link_field` field
    /// the first time an expression touches it.
    pub fn item_scope(
        &self,
        fields: &Arc<FieldSet>,
        candidate: &Selection,
        link_field: &str,
    ) -> Result<Scope> {
        let scope = self.scope.child();
        fields.prepare(Some(candidate.clone()));
        fields.register(&scope)?;
        scope.set("item_content", self.table.handle(candidate.clone()));

        let loader_fields = Arc::clone(fields);
        let weak = scope.downgrade();
        let fetcher = Arc::clone(&self.context.fetcher);
        let link_field = link_field.to_string();
        let linked = Document::deferred(move || {
            if !loader_fields.is_defined(&link_field) {
                return Err(FeedgenError::evaluation(
                    "link_content",
                    format!("'{link_field}' is not configured"),
                ));
            }
            let scope = weak.upgrade().ok_or_else(|| {
                FeedgenError::evaluation("link_content", "item scope was released")
            })?;
            let href = loader_fields.evaluate(&link_field, &scope)?;
            if href.is_empty() {
                return Err(FeedgenError::evaluation("link_content", "the item link is empty"));
            }
            fetcher.fetch(&parse_url(&href)?)
        });
        scope.set("link_content", self.table.handle(Selection::root(linked)));
        Ok(scope)
    }

    /// Reuse and refresh the cached item, or build and store a new one.
    ///
    /// `build` receives the id for the new item.
    pub fn resolve_item(
        &mut self,
        identity: &ItemIdentity,
        build: impl FnOnce(String) -> Result<Item>,
    ) -> Result<Item> {
        let key = identity.key();
        let repository = &self.context.repository;
        let item = match repository.get_item(&key)? {
            Some(mut cached) => {
                if cached.refresh(&identity.title, &identity.description, Utc::now()) {
                    repository.put_item(&key, &cached)?;
                    tracing::debug!("Updated item {}", key);
                } else {
                    tracing::debug!("Item {} unchanged", key);
                }
                cached
            }
            None => {
                let item = build(identity.item_id(&key))?;
                repository.put_item(&key, &item)?;
                tracing::debug!("Created item {}", key);
                item
            }
        };

        let resolved = match self.stage {
            Stage::ItemResolved(count) => count + 1,
            _ => 1,
        };
        self.advance(Stage::ItemResolved(resolved));
        Ok(item)
    }

    /// Close the call and hand out the feed.
    pub fn finish(mut self, feed: Feed) -> Feed {
        self.advance(Stage::Done);
        feed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::Repository;
    use crate::templating::{Field, FieldSource};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn context(pages: &'static [(&'static str, &'static str)]) -> (GeneratorContext, Arc<AtomicUsize>) {
        let fetches = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&fetches);
        let fetcher = move |url: &Url| -> Result<String> {
            counter.fetch_add(1, Ordering::SeqCst);
            pages
                .iter()
                .find(|(location, _)| *location == url.as_str())
                .map(|(_, html)| (*html).to_string())
                .ok_or_else(|| FeedgenError::FetchError {
                    url: url.to_string(),
                    reason: "HTTP 404 Not Found".to_string(),
                })
        };
        let context = GeneratorContext {
            repository: Repository::memory(),
            scope: Scope::root(),
            fetcher: Arc::new(fetcher),
        };
        (context, fetches)
    }

    #[test]
    fn test_absolute_link() {
        let normalize = absolute_link(Url::parse("https://site.example/a/").unwrap());
        assert_eq!(normalize("/x").unwrap(), "https://site.example/x");
        assert_eq!(normalize("https://other.example/y?z=1").unwrap(), "https://other.example/y?z=1");
        assert_eq!(normalize("//cdn.example/i.png").unwrap(), "https://cdn.example/i.png");
        assert_eq!(normalize("").unwrap(), "");
    }

    #[test]
    fn test_item_key_fallbacks() {
        let mut identity = ItemIdentity {
            id: "post-1".to_string(),
            link: "https://site.example/p/1".to_string(),
            title: "T".to_string(),
            description: "D".to_string(),
            author: "A".to_string(),
        };
        assert_eq!(identity.key(), Key::explicit("post-1"));
        assert_eq!(identity.item_id(&identity.key()), "post-1");

        identity.id.clear();
        assert_eq!(identity.key(), Key::derived(["https://site.example/p/1"]));
        assert_eq!(identity.item_id(&identity.key()), "https://site.example/p/1");

        identity.link.clear();
        let key = identity.key();
        assert_eq!(key, Key::derived(["T", "D", "A"]));
        assert_eq!(identity.item_id(&key), key.render());
    }

    #[test]
    fn test_limit() {
        assert_eq!(limited(vec![1, 2, 3, 4, 5], 2), vec![1, 2]);
        assert_eq!(limited(vec![1, 2, 3], 0), vec![1, 2, 3]);
        assert_eq!(limited(vec![1], 5), vec![1]);
    }

    #[test]
    fn test_guarded_panic() {
        let result: Result<()> = guarded(|| panic!("bad template"));
        match result {
            Err(FeedgenError::StrategyPanicked {
                message,
            }) => assert_eq!(message, "bad template"),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn test_stages() {
        let (context, _) = context(&[("https://site.example/", "<p>hi</p>")]);
        let mut generation = Generation::start(&context).unwrap();
        assert_eq!(generation.stage(), Stage::Init);

        let (url, _) = generation.fetch_source("https://site.example/").unwrap();
        assert_eq!(generation.stage(), Stage::SourceResolved);

        let feed = generation
            .resolve_feed(&feed_key("", &url), || Ok(Feed::new(url.as_str(), Utc::now())))
            .unwrap();
        assert_eq!(generation.stage(), Stage::FeedResolved);

        let identity = ItemIdentity {
            id: "a".to_string(),
            ..ItemIdentity::default()
        };
        generation.resolve_item(&identity, |id| Ok(Item::new(id, Utc::now()))).unwrap();
        generation.resolve_item(&identity, |id| Ok(Item::new(id, Utc::now()))).unwrap();
        assert_eq!(generation.stage(), Stage::ItemResolved(2));

        let feed = generation.finish(feed);
        assert_eq!(feed.id, "https://site.example/");
    }

    #[test]
    fn test_cached_feed_is_reused() {
        let (context, _) = context(&[]);
        let key = Key::explicit("feed");
        let mut first = Generation::start(&context).unwrap();
        first
            .resolve_feed(&key, || {
                let mut feed = Feed::new("feed", Utc::now());
                feed.title = "First".to_string();
                Ok(feed)
            })
            .unwrap();

        let mut second = Generation::start(&context).unwrap();
        let feed = second
            .resolve_feed(&key, || panic!("cached feed must not be rebuilt"))
            .unwrap();
        assert_eq!(feed.title, "First");
    }

    #[test]
    fn test_cached_item_is_refreshed() {
        let (context, _) = context(&[]);
        let mut identity = ItemIdentity {
            id: "a".to_string(),
            title: "T1".to_string(),
            ..ItemIdentity::default()
        };

        let mut generation = Generation::start(&context).unwrap();
        let first = generation
            .resolve_item(&identity, |id| {
                let mut item = Item::new(id, Utc::now());
                item.title = "T1".to_string();
                item.content = "body".to_string();
                Ok(item)
            })
            .unwrap();

        identity.title = "T2".to_string();
        let second = generation
            .resolve_item(&identity, |_| panic!("cached item must not be rebuilt"))
            .unwrap();
        assert_eq!(second.title, "T2");
        assert_eq!(second.content, "body");
        assert_eq!(second.created, first.created);
        assert!(second.updated >= first.updated);

        let stored = context.repository.get_item(&Key::explicit("a")).unwrap().unwrap();
        assert_eq!(stored.title, "T2");
    }

    #[test]
    fn test_link_content_is_fetched_lazily_once() {
        let (context, fetches) = context(&[("https://site.example/p/1", "<article>Body</article>")]);
        let generation = Generation::start(&context).unwrap();

        let mut fields = FieldSet::new();
        fields.insert(Field::new(
            "link.href",
            Some(FieldSource::Constant("https://site.example/p/1".to_string())),
        ));
        fields.insert(Field::new(
            "content",
            Some(FieldSource::Template(
                "{{ link_content | find(css='article') | text }}".to_string(),
            )),
        ));
        let fields = Arc::new(fields);

        let scope = generation
            .item_scope(&fields, &Selection::from_html("<li></li>"), "link.href")
            .unwrap();
        assert_eq!(fetches.load(Ordering::SeqCst), 0);

        assert_eq!(fields.evaluate("content", &scope).unwrap(), "Body");
        fields.get("content").unwrap().reset();
        assert_eq!(fields.evaluate("content", &scope).unwrap(), "Body");
        assert_eq!(fetches.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_link_content_without_link_field() {
        let (context, _) = context(&[]);
        let generation = Generation::start(&context).unwrap();
        let mut fields = FieldSet::new();
        fields.insert(Field::new(
            "content",
            Some(FieldSource::Template("{{ link_content | text }}".to_string())),
        ));
        let fields = Arc::new(fields);
        let scope =
            generation.item_scope(&fields, &Selection::from_html("<li></li>"), "link.href").unwrap();
        assert!(fields.evaluate("content", &scope).is_err());
    }
}
