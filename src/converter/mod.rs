//! Feed converters
//!
//! A [`Converter`] turns a finished [`Feed`] into a wire format. Each format is a Tera
//! template bundled into the binary and rendered with autoescaping on, so titles and
//! descriptions scraped from pages never break the markup.
//!
//! ```rust,no_run
//! use feedgen::converter::Converter;
//! use feedgen::models::Feed;
//!
//! let converter: Converter = "atom".parse().unwrap();
//! let rendered = converter.convert(&Feed::new("id", chrono::Utc::now())).unwrap();
//! assert_eq!(rendered.content_type, "application/atom+xml");
//! ```

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tera::{Context as TeraContext, Tera};

use crate::core::{FeedgenError, Result};
use crate::models::{Author, Feed, Item};
use crate::templating::renderer::format_tera_error;

const RSS_TEMPLATE: &str = include_str!("templates/rss.xml");
const ATOM_TEMPLATE: &str = include_str!("templates/atom.xml");
const HTML_TEMPLATE: &str = include_str!("templates/feed.html");

/// Format used when a request does not name one.
pub const DEFAULT_FORMAT: Format = Format::Rss;

/// Supported output formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Format {
    Rss,
    Atom,
    Html,
}

impl Format {
    pub const ALL: [Format; 3] = [Format::Rss, Format::Atom, Format::Html];

    pub fn name(self) -> &'static str {
        match self {
            Self::Rss => "rss",
            Self::Atom => "atom",
            Self::Html => "html",
        }
    }

    pub fn content_type(self) -> &'static str {
        match self {
            Self::Rss => "application/rss+xml",
            Self::Atom => "application/atom+xml",
            Self::Html => "text/html; charset=utf-8",
        }
    }

    fn template(self) -> &'static str {
        match self {
            Self::Rss => RSS_TEMPLATE,
            Self::Atom => ATOM_TEMPLATE,
            Self::Html => HTML_TEMPLATE,
        }
    }

    fn timestamp(self, at: DateTime<Utc>) -> String {
        match self {
            Self::Rss => at.to_rfc2822(),
            Self::Atom => at.to_rfc3339_opts(chrono::SecondsFormat::Secs, true),
            Self::Html => at.format("%Y-%m-%d %H:%M UTC").to_string(),
        }
    }
}

impl fmt::Display for Format {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Format {
    type Err = FeedgenError;

    fn from_str(s: &str) -> Result<Self> {
        let wanted = s.trim().to_ascii_lowercase();
        Self::ALL.into_iter().find(|format| format.name() == wanted).ok_or_else(|| {
            FeedgenError::UnsupportedFormat {
                format: s.to_string(),
            }
        })
    }
}

/// A converted feed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rendered {
    pub content_type: &'static str,
    pub body: String,
}

/// RSS style author line: `email (name)`, or whichever part is set.
fn rss_author(author: Option<&Author>) -> Option<String> {
    let author = author?;
    match (author.email.is_empty(), author.name.is_empty()) {
        (false, false) => Some(format!("{} ({})", author.email, author.name)),
        (false, true) => Some(author.email.clone()),
        (true, false) => Some(author.name.clone()),
        (true, true) => None,
    }
}

#[derive(Serialize)]
struct ItemView<'a> {
    item: &'a Item,
    created: String,
    updated: String,
    author: Option<String>,
}

#[derive(Serialize)]
struct FeedView<'a> {
    feed: &'a Feed,
    created: String,
    updated: String,
    author: Option<String>,
    items: Vec<ItemView<'a>>,
}

/// Renders feeds in one [`Format`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Converter {
    format: Format,
}

impl Converter {
    pub fn new(format: Format) -> Self {
        Self {
            format,
        }
    }

    pub fn format(&self) -> Format {
        self.format
    }

    /// Render `feed`.
    ///
    /// The channel's last-build date is the newest `updated` among the feed and its items.
    ///
    /// # Errors
    ///
    /// [`FeedgenError::ConversionError`] when the template fails to render.
    pub fn convert(&self, feed: &Feed) -> Result<Rendered> {
        let format = self.format;
        let view = FeedView {
            feed,
            created: format.timestamp(feed.created),
            updated: format.timestamp(feed.last_modified()),
            author: rss_author(feed.author.as_ref()),
            items: feed
                .items
                .iter()
                .map(|item| ItemView {
                    item,
                    created: format.timestamp(item.created),
                    updated: format.timestamp(item.updated),
                    author: rss_author(item.author.as_ref()),
                })
                .collect(),
        };

        let conversion_error = |reason: String| FeedgenError::ConversionError {
            format: format.to_string(),
            reason,
        };
        let context =
            TeraContext::from_serialize(&view).map_err(|e| conversion_error(format_tera_error(&e)))?;
        let body = Tera::one_off(format.template(), &context, true)
            .map_err(|e| conversion_error(format_tera_error(&e)))?;

        tracing::debug!("Converted feed {} to {} ({} items)", feed.id, format, feed.items.len());
        Ok(Rendered {
            content_type: format.content_type(),
            body,
        })
    }
}

impl FromStr for Converter {
    type Err = FeedgenError;

    fn from_str(s: &str) -> Result<Self> {
        s.parse().map(Self::new)
    }
}
