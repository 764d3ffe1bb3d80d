//! Scraped documents and hierarchical selections over them.
//!
//! A [`Document`] owns the raw HTML of one page, obtained either up front or through a
//! deferred loader that runs on first access. A [`Selection`] is a set of elements of a
//! document that can be queried further with CSS selectors.
//!
//! # Thread safety
//!
//! `scraper`'s parsed trees are not `Send`, so a selection identifies its elements by
//! their position in document order and the tree is re-materialized on the thread that
//! queries it. Each thread keeps the few most recently parsed documents, so the usual
//! pattern of many queries against one page parses it once.
//!
//! # Failure caching
//!
//! A deferred document runs its loader at most once. A failed load is remembered and
//! returned to every later access; there is no retry.

mod selection;

pub mod filters;

pub use selection::Selection;

use std::cell::RefCell;
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};

use scraper::Html;

use crate::core::{FeedgenError, Result};

/// Number of parsed trees kept per thread.
const PARSED_CACHE_SIZE: usize = 4;

type Loader = Box<dyn FnOnce() -> Result<String> + Send>;

enum State {
    Pending(Loader),
    Loading,
    Ready(Arc<str>),
    Failed(FeedgenError),
}

/// Raw HTML of one page, possibly not fetched yet.
pub struct Document {
    state: Mutex<State>,
}

impl Document {
    /// A document whose HTML is already known.
    #[must_use]
    pub fn parse(html: impl Into<String>) -> Arc<Self> {
        let html: String = html.into();
        Arc::new(Self {
            state: Mutex::new(State::Ready(Arc::from(html))),
        })
    }

    /// A document whose HTML is produced by `loader` on first access.
    #[must_use]
    pub fn deferred<F>(loader: F) -> Arc<Self>
    where
        F: FnOnce() -> Result<String> + Send + 'static,
    {
        Arc::new(Self {
            state: Mutex::new(State::Pending(Box::new(loader))),
        })
    }

    /// `true` once the HTML is available (or the load failed).
    #[must_use]
    pub fn is_resolved(&self) -> bool {
        matches!(
            *self.state.lock().unwrap_or_else(PoisonError::into_inner),
            State::Ready(_) | State::Failed(_)
        )
    }

    /// The raw HTML, running the loader if needed.
    ///
    /// # Errors
    ///
    /// The loader's error, on this and every later call. Accessing the document from
    /// its own loader is an [`FeedgenError::EvaluationError`].
    pub fn source(&self) -> Result<Arc<str>> {
        let loader = {
            let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
            match std::mem::replace(&mut *state, State::Loading) {
                State::Ready(html) => {
                    *state = State::Ready(Arc::clone(&html));
                    return Ok(html);
                }
                State::Failed(error) => {
                    *state = State::Failed(error.clone());
                    return Err(error);
                }
                State::Loading => {
                    return Err(FeedgenError::evaluation(
                        "",
                        "document was accessed while it was still loading",
                    ));
                }
                State::Pending(loader) => loader,
            }
        };

        let outcome = loader().map(Arc::<str>::from);
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        match outcome {
            Ok(html) => {
                *state = State::Ready(Arc::clone(&html));
                Ok(html)
            }
            Err(error) => {
                tracing::debug!("Deferred document failed to load: {}", error);
                *state = State::Failed(error.clone());
                Err(error)
            }
        }
    }
}

impl fmt::Debug for Document {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = match *self.state.lock().unwrap_or_else(PoisonError::into_inner) {
            State::Pending(_) => "pending",
            State::Loading => "loading",
            State::Ready(_) => "ready",
            State::Failed(_) => "failed",
        };
        f.debug_struct("Document").field("state", &state).finish()
    }
}

thread_local! {
    static PARSED: RefCell<Vec<(Arc<str>, Html)>> = const { RefCell::new(Vec::new()) };
}

/// Run `f` with the parsed tree of `source`, parsing it on this thread if needed.
fn with_html<R>(source: &Arc<str>, f: impl FnOnce(&Html) -> R) -> R {
    PARSED.with(|cell| {
        {
            let mut parsed = cell.borrow_mut();
            match parsed.iter().position(|(cached, _)| Arc::ptr_eq(cached, source)) {
                Some(0) => {}
                Some(position) => {
                    let entry = parsed.remove(position);
                    parsed.insert(0, entry);
                }
                None => {
                    parsed.insert(0, (Arc::clone(source), Html::parse_document(source)));
                    parsed.truncate(PARSED_CACHE_SIZE);
                }
            }
        }
        let parsed = cell.borrow();
        f(&parsed[0].1)
    })
}
