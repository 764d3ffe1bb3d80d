//! Selector strategy: fields are CSS extraction rules.
//!
//! ```yaml
//! type: selector
//! url: "https://blog.example/"
//! list: "article"
//! item:
//!   title: "h2"                              # text of the first match
//!   link: { selector: "a", attr: "href" }    # attribute of the first match
//!   author: { constant: "Editorial team" }
//!   description: { template: "{{ field(name='title') }} on {{ url }}" }
//! limit: 20
//! ```
//!
//! A rule is a bare selector, `{selector, attr}`, `{template}` or `{constant}`.
//! Selectors run against the current item (or the whole document for feed fields). A
//! selector that matches nothing, or an `attr` missing on the matched element, fails
//! the generation. Without a `title` rule the feed title is the document's `<title>`.

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
use crate::document::Selection;
use crate::models::{Feed, Item};
use crate::templating::{Field, FieldSet, FieldSource, evaluate};

/// One field extraction rule as configured.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum FieldRule {
    /// Bare CSS selector, reads the text of the first match
    Selector(String),
    /// Explicit rule
    Rule(RuleSpec),
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RuleSpec {
    pub selector: Option<String>,
    pub attr: Option<String>,
    pub template: Option<String>,
    pub constant: Option<String>,
}

impl FieldRule {
    /// Validate the rule and turn it into a field source.
    ///
    /// # Errors
    ///
    /// [`FeedgenError::InvalidFieldRule`] for conflicting or empty rules.
    pub fn to_source(&self, field: &str) -> Result<FieldSource> {
        let invalid = |reason: &str| FeedgenError::InvalidFieldRule {
            field: field.to_string(),
            reason: reason.to_string(),
        };

        let spec = match self {
            Self::Selector(selector) => {
                return Ok(FieldSource::Selector {
                    selector: selector.clone(),
                    attr: None,
                });
            }
            Self::Rule(spec) => spec,
        };

        match (&spec.selector, &spec.attr, &spec.template, &spec.constant) {
            (Some(_), _, Some(_), _) => Err(invalid("cannot use both 'selector' and 'template'")),
            (None, Some(_), Some(_), _) => Err(invalid("cannot use both 'template' and 'attr'")),
            (Some(_), _, _, Some(_)) | (_, Some(_), _, Some(_)) | (_, _, Some(_), Some(_)) => {
                Err(invalid("'constant' cannot be combined with other keys"))
            }
            (None, None, Some(template), None) => Ok(FieldSource::Template(template.clone())),
            (None, None, None, Some(constant)) => Ok(FieldSource::Constant(constant.clone())),
            (Some(selector), attr, None, None) => Ok(FieldSource::Selector {
                selector: selector.clone(),
                attr: attr.clone(),
            }),
            (None, Some(_), None, None) => Err(invalid("'attr' needs a 'selector'")),
            (None, None, None, None) => Err(invalid(
                "expected one of 'selector', 'template' or 'constant'",
            )),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FeedRules {
    pub id: Option<FieldRule>,
    pub title: Option<FieldRule>,
    pub subtitle: Option<FieldRule>,
    pub description: Option<FieldRule>,
    pub link: Option<FieldRule>,
    pub author: Option<FieldRule>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ItemRules {
    pub id: Option<FieldRule>,
    pub title: Option<FieldRule>,
    pub description: Option<FieldRule>,
    pub author: Option<FieldRule>,
    pub content: Option<FieldRule>,
    pub link: Option<FieldRule>,
}

/// Options of the `selector` strategy.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SelectorOptions {
    /// Source URL expression
    pub url: String,
    /// CSS selector enumerating items
    pub list: String,
    #[serde(default)]
    pub feed: FeedRules,
    #[serde(default)]
    pub item: ItemRules,
    /// Maximum number of items, 0 for all
    #[serde(default)]
    pub limit: usize,
}

fn rule_field(name: &str, rule: Option<&FieldRule>) -> Result<Field> {
    let source = rule.map(|rule| rule.to_source(name)).transpose()?;
    Ok(Field::new(name, source))
}

fn rule_fields(rules: &[(&str, Option<&FieldRule>)], base: Option<&Url>) -> Result<FieldSet> {
    let mut fields = FieldSet::new();
    for (name, rule) in rules {
        let field = rule_field(name, *rule)?;
        fields.insert(match base {
            Some(base) if *name == "link" => field.with_normalizer(absolute_link(base.clone())),
            _ => field,
        });
    }
    Ok(fields)
}

impl FeedRules {
    fn fields(&self, base: Option<&Url>) -> Result<FieldSet> {
        rule_fields(
            &[
                ("id", self.id.as_ref()),
                ("title", self.title.as_ref()),
                ("subtitle", self.subtitle.as_ref()),
                ("description", self.description.as_ref()),
                ("link", self.link.as_ref()),
                ("author", self.author.as_ref()),
            ],
            base,
        )
    }
}

impl ItemRules {
    fn fields(&self, base: Option<&Url>) -> Result<FieldSet> {
        rule_fields(
            &[
                ("id", self.id.as_ref()),
                ("title", self.title.as_ref()),
                ("description", self.description.as_ref()),
                ("author", self.author.as_ref()),
                ("content", self.content.as_ref()),
                ("link", self.link.as_ref()),
            ],
            base,
        )
    }
}

/// Text of the document's `<title>`, empty when there is none.
fn document_title(document: &Selection) -> Result<String> {
    let title = document.find("title")?;
    if !title.exists()? {
        return Ok(String::new());
    }
    Ok(title.first().text()?.trim().to_string())
}

/// The `selector` strategy.
#[derive(Debug, Default)]
pub struct SelectorGenerator {
    options: Option<SelectorOptions>,
}

impl SelectorGenerator {
    #[must_use]
    pub fn with_options(options: SelectorOptions) -> Self {
        Self {
            options: Some(options),
        }
    }

    fn options(&self) -> Result<&SelectorOptions> {
        self.options.as_ref().ok_or_else(|| FeedgenError::ConfigError {
            message: "selector generator used before its options were loaded".to_string(),
        })
    }
}

impl FeedGenerator for SelectorGenerator {
    fn load_options(&mut self, options: &GeneratorOptions) -> Result<()> {
        let options: SelectorOptions = options.decode("selector")?;
        // surface rule conflicts at load time
        options.feed.fields(None)?;
        options.item.fields(None)?;
        self.options = Some(options);
        Ok(())
    }

    fn generate(&self, context: &GeneratorContext) -> Result<Feed> {
        let options = self.options()?;
        let mut generation = Generation::start(context)?;

        let location = evaluate(&options.url, generation.scope())?;
        let (url, document) = generation.fetch_source(&location)?;

        let feed_scope = generation.scope().child();
        let feed_fields = Arc::new(options.feed.fields(Some(&url))?);
        feed_fields.prepare(Some(document.clone()));
        feed_fields.register(&feed_scope)?;
        let feed_value = |name: &str| feed_fields.evaluate(name, &feed_scope);

        let id = feed_value("id")?;
        let key = feed_key(&id, &url);
        let mut feed = generation.resolve_feed(&key, || {
            let mut feed = Feed::new(if id.is_empty() { url.to_string() } else { id.clone() }, Utc::now());
            feed.title = if feed_fields.is_defined("title") {
                feed_value("title")?
            } else {
                document_title(&document)?
            };
            feed.subtitle = feed_value("subtitle")?;
            feed.description = feed_value("description")?;
            let href = feed_value("link")?;
            feed.link = link(
                if href.is_empty() { url.to_string() } else { href },
                String::new(),
                String::new(),
                String::new(),
            );
            feed.author = author(feed_value("author")?, String::new());
            Ok(feed)
        })?;

        let candidates = limited(document.list(&options.list)?, options.limit);
        tracing::debug!("{} candidate item(s) for '{}'", candidates.len(), options.list);

        let item_fields = Arc::new(options.item.fields(Some(&url))?);
        for candidate in &candidates {
            let scope = generation.item_scope(&item_fields, candidate, "link")?;
            let value = |name: &str| item_fields.evaluate(name, &scope);
            let identity = ItemIdentity {
                id: value("id")?,
                link: value("link")?,
                title: value("title")?,
                description: value("description")?,
                author: value("author")?,
            };
            let item = generation.resolve_item(&identity, |id| {
                let mut item = Item::new(id, Utc::now());
                item.title = identity.title.clone();
                item.description = identity.description.clone();
                item.author = author(identity.author.clone(), String::new());
                item.content = value("content")?;
                item.link = link(identity.link.clone(), String::new(), String::new(), String::new());
                Ok(item)
            })?;
            feed.items.push(item);
        }

        Ok(generation.finish(feed))
    }
}
