//! Selector and browser strategies through the registry.

use feedgen::config::Config;
use feedgen::core::{ErrorCategory, FeedgenError};
use feedgen::repository::Repository;
use feedgen::test_utils::{FakeBrowser, StaticPages};
use serde_json::json;

use crate::common::{blog_index, generate, loaded, registry};

const SELECTOR: &str = r#"
generators:
  posts:
    type: selector
    url: "https://blog.example/"
    list: "article"
    item:
      title: "h2"
      description: ".summary"
      link: { selector: "a", attr: "href" }
      author: { constant: "Staff" }
      content: { template: "{{ field(name='title') }}: {{ field(name='description') }}" }
"#;

#[test]
fn test_selector_generation() {
    let pages = StaticPages::new();
    pages.set("https://blog.example/", blog_index(3));
    let generators = loaded(Repository::memory(), &pages, SELECTOR);

    let feed = generate(&generators, "posts").unwrap();
    assert_eq!(feed.title, "Blog");
    assert_eq!(feed.id, "https://blog.example/");
    assert_eq!(feed.items.len(), 3);

    let item = &feed.items[2];
    assert_eq!(item.title, "Post 3");
    assert_eq!(item.description, "Summary 3");
    assert_eq!(item.link.as_ref().unwrap().href, "https://blog.example/posts/3");
    assert_eq!(item.author.as_ref().unwrap().name, "Staff");
    assert_eq!(item.content, "Post 3: Summary 3");
}

#[test]
fn test_selector_without_match_fails() {
    let pages = StaticPages::new();
    pages.set("https://blog.example/", "<article data-id=\"1\"><a href=\"/x\">x</a></article>");
    let generators = loaded(Repository::memory(), &pages, SELECTOR);

    let error = generate(&generators, "posts").unwrap_err();
    assert_eq!(error.category(), ErrorCategory::Extraction);
}

#[test]
fn test_conflicting_rule_rejects_config() {
    let pages = StaticPages::new();
    let generators = registry(Repository::memory(), &pages, &FakeBrowser::new());
    let yaml = r#"
generators:
  bad:
    type: selector
    url: "https://blog.example/"
    list: "article"
    item:
      title: { selector: "h2", template: "{{ url }}" }
"#;
    let error = generators.load_config(&Config::from_yaml(yaml).unwrap()).unwrap_err();
    assert_eq!(error.category(), ErrorCategory::Configuration);
    assert!(generators.names().is_empty());
}

#[test]
fn test_browser_generation() {
    let browser = FakeBrowser::new();
    browser
        .script("document.title", json!({"title": "App", "link": "https://app.example/"}))
        .script(
            "items('https://app.example/list')",
            json!([
                {"id": "a", "title": "Alpha", "link": "/alpha"},
                {"id": "b", "title": "Beta"},
                {"id": "c", "title": "Gamma"}
            ]),
        );
    let generators = registry(Repository::memory(), &StaticPages::new(), &browser);
    let yaml = r#"
generators:
  app:
    type: browser
    url: "https://app.example/list"
    actions:
      - wait_visible: ".row"
      - feed: "document.title"
      - items: "items('{{ url }}')"
    limit: 2
"#;
    generators.load_config(&Config::from_yaml(yaml).unwrap()).unwrap();

    let feed = generate(&generators, "app").unwrap();
    assert_eq!(feed.title, "App");
    assert_eq!(feed.items.len(), 2);
    assert_eq!(feed.items[0].link.as_ref().unwrap().href, "https://app.example/alpha");
    assert_eq!(feed.items[1].id, "b");
    assert_eq!(
        browser.log(),
        vec![
            "open",
            "navigate https://app.example/list",
            "wait .row",
            "eval document.title",
            "eval items('https://app.example/list')",
            "close"
        ]
    );
}

#[test]
fn test_browser_null_result_is_browser_error() {
    let browser = FakeBrowser::new();
    let generators = registry(Repository::memory(), &StaticPages::new(), &browser);
    let yaml = r#"
generators:
  app:
    type: browser
    url: "https://app.example/"
    actions:
      - items: "missing()"
"#;
    generators.load_config(&Config::from_yaml(yaml).unwrap()).unwrap();

    let error = generate(&generators, "app").unwrap_err();
    let FeedgenError::GenerationFailed { source, .. } = &error else {
        panic!("unexpected error: {error}");
    };
    assert!(matches!(**source, FeedgenError::BrowserError { .. }));
    assert_eq!(browser.log().last().map(String::as_str), Some("close"));
}
