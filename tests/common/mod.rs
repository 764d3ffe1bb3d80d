//! Shared helpers for the feedgen integration tests

#![allow(dead_code)]

use std::path::Path;
use std::sync::Arc;

use feedgen::config::Config;
use feedgen::generator::{FeedGenerators, Parameters, QueryParameters};
use feedgen::models::Feed;
use feedgen::repository::Repository;
use feedgen::test_utils::{FakeBrowser, StaticPages, init_test_logging};

/// A blog index with `count` posts, newest first.
pub fn blog_index(count: usize) -> String {
    let posts: String = (1..=count)
        .map(|n| {
            format!(
                r#"<article data-id="{n}"><h2>Post {n}</h2><a href="/posts/{n}">read</a><p class="summary">Summary {n}</p></article>"#
            )
        })
        .collect();
    format!("<html><head><title>Blog</title></head><body><h1>Blog</h1>{posts}</body></html>")
}

/// Registry with every strategy, backed by `pages` and `browser`.
pub fn registry(repository: Repository, pages: &StaticPages, browser: &FakeBrowser) -> FeedGenerators {
    init_test_logging(None);
    FeedGenerators::with_default_strategies(
        repository,
        Arc::new(pages.clone()),
        Arc::new(browser.clone()),
        false,
    )
    .unwrap()
}

/// Registry over `pages` with `yaml` loaded.
pub fn loaded(repository: Repository, pages: &StaticPages, yaml: &str) -> FeedGenerators {
    let generators = registry(repository, pages, &FakeBrowser::new());
    generators.load_config(&Config::from_yaml(yaml).unwrap()).unwrap();
    generators
}

/// Run `name` without request parameters.
pub fn generate(generators: &FeedGenerators, name: &str) -> feedgen::core::Result<Feed> {
    generators.generate(name, &Parameters::new(), &QueryParameters::new())
}

/// Disk repository in `dir` with the default retention.
pub fn disk(dir: &Path) -> Repository {
    Repository::open_disk(dir, 30).unwrap()
}
