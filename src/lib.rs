//! feedgen - RSS/Atom feeds from arbitrary web pages
//!
//! feedgen turns pages that publish no feed into RSS, Atom or HTML feeds. Each
//! configured *generator* names a strategy and its extraction rules; a request runs the
//! generator, reconciles the result with previously stored records so item identities
//! and creation times stay stable, and converts the feed to a wire format.
//!
//! # Architecture Overview
//!
//! ```text
//! request (name, path params, query params)
//!   -> generator::FeedGenerators      request scope, strategy lookup
//!   -> FeedGenerator strategy         template | selector | browser
//!        fetch::DocumentFetcher       raw HTML
//!        document::Selection          CSS queries
//!        templating::{Scope, Field}   expressions with memoized fields
//!        repository::Repository       create-or-reuse feed and items
//!   -> converter::Converter           rss | atom | html
//! ```
//!
//! # Core Modules
//!
//! - [`core`] - error type, categories and user-facing error reports
//! - [`models`] - feed, item and their parts
//! - [`templating`] - scope chain, Tera-backed expressions, lazy fields
//! - [`document`] - HTML documents and selections
//! - [`fetch`] - document fetching
//! - [`repository`] - feed and item storage (disk with expiry, or memory)
//! - [`generator`] - strategies and the generator registry
//! - [`config`] - generator configuration file
//! - [`converter`] - RSS, Atom and HTML output
//! - [`cli`] - `generate` and `serve` commands
//!
//! # Configuration Example
//!
//! ```yaml
//! generators:
//!   releases:
//!     type: selector
//!     endpoint: "/releases/:project"
//!     url: "https://example.com/{{ param(name='project') }}/releases"
//!     list: "div.release"
//!     item:
//!       title: "h2"
//!       link: { selector: "a.permalink", attr: "href" }
//!       description: { template: "{{ item_content | find(css='.notes') | text }}" }
//!     limit: 20
//! ```
//!
//! # Library Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use feedgen::config::Config;
//! use feedgen::converter::{Converter, Format};
//! use feedgen::generator::{FeedGenerators, Parameters, QueryParameters, TemplateGenerator};
//! use feedgen::repository::Repository;
//!
//! # fn main() -> feedgen::core::Result<()> {
//! let fetcher = |_: &url::Url| -> feedgen::core::Result<String> {
//!     Ok("<ul><li>one</li><li>two</li></ul>".to_string())
//! };
//! let mut generators = FeedGenerators::new(Repository::memory(), Arc::new(fetcher))?;
//! generators.register("template", || Box::new(TemplateGenerator::default()));
//! generators.load_config(&Config::from_yaml(
//!     "generators:\n  list:\n    type: template\n    source: https://site.example/\n    list: li\n    item:\n      title: \"{{ item_content | text }}\"\n",
//! )?)?;
//!
//! let feed = generators.generate("list", &Parameters::new(), &QueryParameters::new())?;
//! println!("{}", Converter::new(Format::Rss).convert(&feed)?.body);
//! # Ok(())
//! # }
//! ```

pub mod cli;
pub mod config;
pub mod converter;
pub mod core;
pub mod document;
pub mod fetch;
pub mod generator;
pub mod models;
pub mod repository;
pub mod templating;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;
