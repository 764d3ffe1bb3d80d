//! Feed and item records
//!
//! These are the entities produced by generation, persisted by the
//! [`repository`](crate::repository) and consumed by the [`converter`](crate::converter)s.
//! Every field serializes with `serde`, so a stored record round-trips losslessly.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Author of a feed or item.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Author {
    pub name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub email: String,
}

impl Author {
    /// `true` when neither name nor email is set.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.name.is_empty() && self.email.is_empty()
    }
}

/// A hyperlink with optional relation, media type and length.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Link {
    pub href: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub rel: String,
    #[serde(default, rename = "type", skip_serializing_if = "String::is_empty")]
    pub media_type: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub length: String,
}

/// Feed logo.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Image {
    pub url: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub link: String,
    #[serde(default)]
    pub width: u32,
    #[serde(default)]
    pub height: u32,
}

/// Media attached to an item.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Enclosure {
    pub url: String,
    #[serde(rename = "type")]
    pub media_type: String,
    pub length: String,
}

/// One syndication entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Item {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub author: Option<Author>,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub link: Option<Link>,
    #[serde(default)]
    pub source: Option<Link>,
    #[serde(default)]
    pub enclosure: Option<Enclosure>,
    pub created: DateTime<Utc>,
    pub updated: DateTime<Utc>,
}

impl Item {
    /// A new item stamped with `now` as both created and updated time.
    #[must_use]
    pub fn new(id: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            id: id.into(),
            title: String::new(),
            description: String::new(),
            author: None,
            content: String::new(),
            link: None,
            source: None,
            enclosure: None,
            created: now,
            updated: now,
        }
    }

    /// Apply the refreshable fields of a freshly scraped item to this cached copy.
    ///
    /// Only `title` and `description` are refreshable; every other field keeps the
    /// value written first. An empty scraped value never overwrites a cached one.
    /// Returns `true` when something changed, in which case `updated` is set to `now`.
    pub fn refresh(&mut self, title: &str, description: &str, now: DateTime<Utc>) -> bool {
        let mut changed = false;
        if !title.is_empty() && self.title != title {
            self.title = title.to_string();
            changed = true;
        }
        if !description.is_empty() && self.description != description {
            self.description = description.to_string();
            changed = true;
        }
        if changed {
            self.updated = now;
        }
        changed
    }
}

/// Top-level syndication record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Feed {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub subtitle: String,
    #[serde(default)]
    pub link: Option<Link>,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub author: Option<Author>,
    #[serde(default)]
    pub copyright: String,
    #[serde(default)]
    pub image: Option<Image>,
    pub created: DateTime<Utc>,
    pub updated: DateTime<Utc>,
    #[serde(default)]
    pub items: Vec<Item>,
}

impl Feed {
    /// A new feed stamped with `now` as both created and updated time.
    #[must_use]
    pub fn new(id: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            id: id.into(),
            title: String::new(),
            subtitle: String::new(),
            link: None,
            description: String::new(),
            author: None,
            copyright: String::new(),
            image: None,
            created: now,
            updated: now,
            items: Vec::new(),
        }
    }

    /// The latest `updated` timestamp among the feed and its items.
    #[must_use]
    pub fn last_modified(&self) -> DateTime<Utc> {
        self.items.iter().map(|item| item.updated).fold(self.updated, |a, b| a.max(b))
    }
}
