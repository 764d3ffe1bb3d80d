//! Template strategy: every field is an expression.
//!
//! ```yaml
//! type: template
//! source:
//!   url: "https://news.example/{{ param(name='section') }}"
//! feed:
//!   title: "{{ content | find(css='title') | text }}"
//! list: "article.post"
//! item:
//!   id: "{{ item_content | attr(name='data-id') }}"
//!   title: "{{ item_content | find(css='h2') | text }}"
//!   link:
//!     href: "{{ item_content | find(css='a') | attr(name='href') }}"
//!   content: "{{ link_content | find(css='.body') | inner_html }}"
//! limit: 10
//! ```
//!
//! `source` is either `{url: ...}` or the bare expression. `list` is an expression that
//! yields the CSS selector enumerating items. Item links are made absolute against the
//! source URL.

use std::sync::Arc;

use chrono::Utc;
use serde::Deserialize;
use url::Url;

use super::pipeline::{
    Generation, ItemIdentity, absolute_link, author, feed_key, limited, link,
};
use super::{FeedGenerator, GeneratorContext};
use crate::config::GeneratorOptions;
use crate::core::{FeedgenError, Result};
use crate::models::{Enclosure, Feed, Image, Item};
use crate::templating::{Field, FieldSet, FieldSource, evaluate};

/// Enclosure type used when none is configured.
pub const DEFAULT_ENCLOSURE_TYPE: &str = "application/octet-stream";

/// Where the source document comes from.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum SourceOption {
    /// `{url: expression}`
    Location {
        url: String,
    },
    /// `{http: ...}`, nesting either form
    Http {
        http: Box<SourceOption>,
    },
    /// A bare expression
    Expression(String),
}

impl SourceOption {
    fn expression(&self) -> &str {
        match self {
            Self::Location {
                url,
            } => url,
            Self::Http {
                http,
            } => http.expression(),
            Self::Expression(expression) => expression,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LinkTemplate {
    pub href: Option<String>,
    pub rel: Option<String>,
    #[serde(rename = "type")]
    pub media_type: Option<String>,
    pub length: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AuthorTemplate {
    pub name: Option<String>,
    pub email: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ImageTemplate {
    pub url: Option<String>,
    pub title: Option<String>,
    pub link: Option<String>,
    #[serde(default)]
    pub width: u32,
    #[serde(default)]
    pub height: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EnclosureTemplate {
    pub url: Option<String>,
    pub length: Option<String>,
    #[serde(rename = "type")]
    pub media_type: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FeedTemplate {
    pub id: Option<String>,
    pub title: Option<String>,
    pub subtitle: Option<String>,
    pub link: LinkTemplate,
    pub description: Option<String>,
    pub author: AuthorTemplate,
    pub copyright: Option<String>,
    pub image: ImageTemplate,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ItemTemplate {
    pub id: Option<String>,
    pub title: Option<String>,
    pub description: Option<String>,
    pub author: AuthorTemplate,
    pub content: Option<String>,
    pub link: LinkTemplate,
    pub source: LinkTemplate,
    pub enclosure: EnclosureTemplate,
}

/// Options of the `template` strategy.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TemplateOptions {
    pub source: SourceOption,
    #[serde(default)]
    pub feed: FeedTemplate,
    /// Expression producing the item CSS selector
    pub list: String,
    #[serde(default)]
    pub item: ItemTemplate,
    /// Maximum number of items, 0 for all
    #[serde(default)]
    pub limit: usize,
}

fn template(name: &str, expression: Option<&String>) -> Field {
    Field::new(name, expression.cloned().map(FieldSource::Template))
}

fn link_fields(fields: &mut FieldSet, prefix: &str, link: &LinkTemplate, base: Option<&Url>) {
    let href = template(&format!("{prefix}.href"), link.href.as_ref());
    fields.insert(match base {
        Some(base) => href.with_normalizer(absolute_link(base.clone())),
        None => href,
    });
    fields.insert(template(&format!("{prefix}.rel"), link.rel.as_ref()));
    fields.insert(template(&format!("{prefix}.type"), link.media_type.as_ref()));
    fields.insert(template(&format!("{prefix}.length"), link.length.as_ref()));
}

fn author_fields(fields: &mut FieldSet, author: &AuthorTemplate) {
    fields.insert(template("author.name", author.name.as_ref()));
    fields.insert(template("author.email", author.email.as_ref()));
}

impl FeedTemplate {
    fn fields(&self, base: &Url) -> FieldSet {
        let mut fields = FieldSet::new();
        fields.insert(template("id", self.id.as_ref()));
        fields.insert(template("title", self.title.as_ref()));
        fields.insert(template("subtitle", self.subtitle.as_ref()));
        link_fields(&mut fields, "link", &self.link, Some(base));
        fields.insert(template("description", self.description.as_ref()));
        author_fields(&mut fields, &self.author);
        fields.insert(template("copyright", self.copyright.as_ref()));
        fields.insert(
            template("image.url", self.image.url.as_ref())
                .with_normalizer(absolute_link(base.clone())),
        );
        fields.insert(template("image.title", self.image.title.as_ref()));
        fields.insert(template("image.link", self.image.link.as_ref()));
        fields
    }
}

impl ItemTemplate {
    fn fields(&self, base: &Url) -> FieldSet {
        let mut fields = FieldSet::new();
        fields.insert(template("id", self.id.as_ref()));
        fields.insert(template("title", self.title.as_ref()));
        fields.insert(template("description", self.description.as_ref()));
        author_fields(&mut fields, &self.author);
        fields.insert(template("content", self.content.as_ref()));
        link_fields(&mut fields, "link", &self.link, Some(base));
        link_fields(&mut fields, "source", &self.source, None);
        fields.insert(
            template("enclosure.url", self.enclosure.url.as_ref())
                .with_normalizer(absolute_link(base.clone())),
        );
        fields.insert(template("enclosure.length", self.enclosure.length.as_ref()));
        fields.insert(template("enclosure.type", self.enclosure.media_type.as_ref()));
        fields
    }
}

/// The `template` strategy.
#[derive(Debug, Default)]
pub struct TemplateGenerator {
    options: Option<TemplateOptions>,
}

impl TemplateGenerator {
    #[must_use]
    pub fn with_options(options: TemplateOptions) -> Self {
        Self {
            options: Some(options),
        }
    }

    fn options(&self) -> Result<&TemplateOptions> {
        self.options.as_ref().ok_or_else(|| FeedgenError::ConfigError {
            message: "template generator used before its options were loaded".to_string(),
        })
    }
}

impl FeedGenerator for TemplateGenerator {
    fn load_options(&mut self, options: &GeneratorOptions) -> Result<()> {
        self.options = Some(options.decode("template")?);
        Ok(())
    }

    fn generate(&self, context: &GeneratorContext) -> Result<Feed> {
        let options = self.options()?;
        let mut generation = Generation::start(context)?;

        let location = evaluate(options.source.expression(), generation.scope())?;
        let (url, document) = generation.fetch_source(&location)?;

        let feed_scope = generation.scope().child();
        let feed_fields = Arc::new(options.feed.fields(&url));
        feed_fields.prepare(Some(document.clone()));
        feed_fields.register(&feed_scope)?;
        let feed_value = |name: &str| feed_fields.evaluate(name, &feed_scope);

        let id = feed_value("id")?;
        let key = feed_key(&id, &url);
        let mut feed = generation.resolve_feed(&key, || {
            let mut feed = Feed::new(if id.is_empty() { url.to_string() } else { id.clone() }, Utc::now());
            feed.title = feed_value("title")?;
            feed.subtitle = feed_value("subtitle")?;
            feed.link = link(
                feed_value("link.href")?,
                feed_value("link.rel")?,
                feed_value("link.type")?,
                feed_value("link.length")?,
            );
            feed.description = feed_value("description")?;
            feed.author = author(feed_value("author.name")?, feed_value("author.email")?);
            feed.copyright = feed_value("copyright")?;
            let image_url = feed_value("image.url")?;
            if !image_url.is_empty() {
                feed.image = Some(Image {
                    url: image_url,
                    title: feed_value("image.title")?,
                    link: feed_value("image.link")?,
                    width: options.feed.image.width,
                    height: options.feed.image.height,
                });
            }
            Ok(feed)
        })?;

        let list = evaluate(&options.list, generation.scope())?;
        let candidates = limited(document.list(&list)?, options.limit);
        tracing::debug!("{} candidate item(s) for '{}'", candidates.len(), list);

        let item_fields = Arc::new(options.item.fields(&url));
        for candidate in &candidates {
            let scope = generation.item_scope(&item_fields, candidate, "link.href")?;
            let value = |name: &str| item_fields.evaluate(name, &scope);
            let identity = ItemIdentity {
                id: value("id")?,
                link: value("link.href")?,
                title: value("title")?,
                description: value("description")?,
                author: value("author.name")?,
            };
            let item = generation.resolve_item(&identity, |id| build_item(id, &value))?;
            feed.items.push(item);
        }

        Ok(generation.finish(feed))
    }
}

fn build_item(id: String, value: &dyn Fn(&str) -> Result<String>) -> Result<Item> {
    let mut item = Item::new(id, Utc::now());
    item.title = value("title")?;
    item.description = value("description")?;
    item.author = author(value("author.name")?, value("author.email")?);
    item.content = value("content")?;
    item.link = link(
        value("link.href")?,
        value("link.rel")?,
        value("link.type")?,
        value("link.length")?,
    );
    item.source = link(
        value("source.href")?,
        value("source.rel")?,
        value("source.type")?,
        value("source.length")?,
    );

    let enclosure_url = value("enclosure.url")?;
    if !enclosure_url.is_empty() {
        let media_type = value("enclosure.type")?;
        let length = value("enclosure.length")?;
        item.enclosure = Some(Enclosure {
            url: enclosure_url,
            media_type: if media_type.is_empty() {
                DEFAULT_ENCLOSURE_TYPE.to_string()
            } else {
                media_type
            },
            length: if length.is_empty() { "0".to_string() } else { length },
        });
    }
    Ok(item)
}
