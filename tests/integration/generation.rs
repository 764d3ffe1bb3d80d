//! Identity, caching and change detection across generations.

use std::time::Duration;

use feedgen::core::{ErrorCategory, FeedgenError};
use feedgen::generator::{Parameters, QueryParameters};
use feedgen::repository::Repository;
use feedgen::test_utils::StaticPages;
use tempfile::TempDir;

use crate::common::{blog_index, disk, generate, loaded};

const INDEX: &str = "https://blog.example/";

const BLOG: &str = r#"
generators:
  blog:
    type: template
    source: "https://blog.example/"
    feed:
      title: "{{ content | find(css='h1') | text }}"
    list: "article"
    item:
      id: "{{ item_content | attr(name='data-id') }}"
      title: "{{ item_content | find(css='h2') | text }}"
      description: "{{ item_content | find(css='.summary') | text }}"
      content: "{{ item_content | find(css='.summary') | inner_html }}"
      link:
        href: "{{ item_content | find(css='a') | attr(name='href') }}"
"#;

fn pages(index: &str) -> StaticPages {
    let pages = StaticPages::new();
    pages.set(INDEX, index);
    pages
}

#[test]
fn test_identity_and_created_survive_restart() {
    let dir = TempDir::new().unwrap();
    let pages = pages(&blog_index(3));

    let generators = loaded(disk(dir.path()), &pages, BLOG);
    let first = generate(&generators, "blog").unwrap();
    generators.repository().close().unwrap();

    std::thread::sleep(Duration::from_millis(20));

    let generators = loaded(disk(dir.path()), &pages, BLOG);
    let second = generate(&generators, "blog").unwrap();
    generators.repository().close().unwrap();

    assert_eq!(first.title, "Blog");
    assert_eq!(first.created, second.created);
    let ids = |feed: &feedgen::models::Feed| feed.items.iter().map(|i| i.id.clone()).collect::<Vec<_>>();
    assert_eq!(ids(&first), vec!["1", "2", "3"]);
    assert_eq!(ids(&first), ids(&second));
    for (a, b) in first.items.iter().zip(&second.items) {
        assert_eq!(a.created, b.created);
        assert_eq!(a.updated, b.updated, "unchanged item {} was touched", a.id);
    }
    assert_eq!(first.items[0].link.as_ref().unwrap().href, "https://blog.example/posts/1");
}

#[test]
fn test_changed_title_refreshes_cached_item() {
    let pages = pages(
        r#"<h1>Blog</h1><article data-id="1"><h2>T1</h2><a href="/a">x</a><p class="summary">S</p></article>"#,
    );
    let generators = loaded(Repository::memory(), &pages, BLOG);
    let before = generate(&generators, "blog").unwrap().items.remove(0);

    std::thread::sleep(Duration::from_millis(20));
    pages.set(
        INDEX,
        r#"<h1>Blog</h1><article data-id="1"><h2>T2</h2><a href="/moved">x</a><p class="summary">S</p></article>"#,
    );
    let after = generate(&generators, "blog").unwrap().items.remove(0);

    assert_eq!(after.title, "T2");
    assert_eq!(after.created, before.created);
    assert!(after.updated > before.updated);
    // Only title and description are refreshed
    assert_eq!(after.link, before.link);
    assert_eq!(after.link.as_ref().unwrap().href, "https://blog.example/a");
}

#[test]
fn test_empty_scraped_title_keeps_cached_title() {
    let pages = pages(r#"<article data-id="7"><h2>Kept</h2><a href="/k">x</a></article>"#);
    let generators = loaded(Repository::memory(), &pages, BLOG);
    generate(&generators, "blog").unwrap();

    pages.set(INDEX, r#"<article data-id="7"><h2></h2><a href="/k">x</a></article>"#);
    let item = generate(&generators, "blog").unwrap().items.remove(0);
    assert_eq!(item.title, "Kept");
    assert_eq!(item.created, item.updated);
}

#[test]
fn test_unchanged_markup_description_is_stable() {
    let pages = pages(
        r#"<article><h2>Markup</h2><div class="d"><a href="/a" title="t" rel="next" class="c" id="x">A</a></div></article>"#,
    );
    let yaml = r#"
generators:
  markup:
    type: template
    source: "https://blog.example/"
    list: "article"
    item:
      title: "{{ item_content | find(css='h2') | text }}"
      description: "{{ item_content | find(css='.d') | inner_html }}"
"#;
    let generators = loaded(Repository::memory(), &pages, yaml);
    let first = generate(&generators, "markup").unwrap().items.remove(0);
    assert_eq!(
        first.description,
        r#"<a href="/a" title="t" rel="next" class="c" id="x">A</a>"#
    );

    for _ in 0..5 {
        std::thread::sleep(Duration::from_millis(5));
        let again = generate(&generators, "markup").unwrap().items.remove(0);
        assert_eq!(again.id, first.id);
        assert_eq!(again.created, first.created);
        assert_eq!(again.updated, first.updated);
        assert_eq!(again.description, first.description);
    }
}

#[test]
fn test_limit_keeps_first_items_in_document_order() {
    let pages = pages(&blog_index(5));
    let yaml = format!("{BLOG}    limit: 2\n");
    let generators = loaded(Repository::memory(), &pages, &yaml);
    let feed = generate(&generators, "blog").unwrap();
    let titles: Vec<&str> = feed.items.iter().map(|i| i.title.as_str()).collect();
    assert_eq!(titles, vec!["Post 1", "Post 2"]);
}

#[test]
fn test_identity_fallbacks() {
    let pages = pages(
        r#"<ul><li><a href="/one">One</a></li><li><span>Two</span></li></ul>"#,
    );
    let yaml = r#"
generators:
  list:
    type: template
    source: "https://blog.example/"
    list: "li"
    item:
      title: "{{ item_content | text }}"
      link:
        href: "{% if item_content | find(css='a') | exists %}{{ item_content | find(css='a') | attr(name='href') }}{% endif %}"
"#;
    let generators = loaded(Repository::memory(), &pages, yaml);
    let first = generate(&generators, "list").unwrap();
    let second = generate(&generators, "list").unwrap();

    assert_eq!(first.items[0].id, "https://blog.example/one");
    let derived = &first.items[1].id;
    assert_eq!(derived.len(), 64);
    assert!(derived.chars().all(|c| c.is_ascii_hexdigit()));
    assert_eq!(&second.items[1].id, derived);
    assert_eq!(second.items[1].created, first.items[1].created);
}

#[test]
fn test_link_content_is_fetched_only_when_used() {
    let pages = pages(&blog_index(3));
    for n in 1..=3 {
        pages.set(&format!("https://blog.example/posts/{n}"), format!("<main><p>Body {n}</p></main>"));
    }

    let generators = loaded(Repository::memory(), &pages, BLOG);
    generate(&generators, "blog").unwrap();
    assert_eq!(pages.fetch_count(), 1);

    let yaml = BLOG.replace(
        "content: \"{{ item_content | find(css='.summary') | inner_html }}\"",
        "content: \"{{ link_content | find(css='p') | text }} / {{ link_content | find(css='p') | text }}\"",
    );
    let pages = {
        let fresh = StaticPages::new();
        fresh.set(INDEX, blog_index(3));
        for n in 1..=3 {
            fresh.set(&format!("https://blog.example/posts/{n}"), format!("<main><p>Body {n}</p></main>"));
        }
        fresh
    };
    let generators = loaded(Repository::memory(), &pages, &yaml);
    let feed = generate(&generators, "blog").unwrap();
    assert_eq!(feed.items[2].content, "Body 3 / Body 3");
    // One index fetch plus one fetch per linked page
    assert_eq!(pages.fetch_count(), 4);
}

#[test]
fn test_failed_item_fails_whole_generation() {
    let pages = pages(&blog_index(2));
    let yaml = BLOG.replace(
        "content: \"{{ item_content | find(css='.summary') | inner_html }}\"",
        "content: \"{{ link_content | text }}\"",
    );
    let generators = loaded(Repository::memory(), &pages, &yaml);
    let error = generate(&generators, "blog").unwrap_err();
    assert!(matches!(error, FeedgenError::GenerationFailed { .. }));
    assert_eq!(error.category(), ErrorCategory::Source);
    assert!(error.to_string().starts_with("Generator 'blog' failed"));
}

#[test]
fn test_unknown_generator() {
    let generators = loaded(Repository::memory(), &pages(""), BLOG);
    let error = generate(&generators, "blgo").unwrap_err();
    assert_eq!(error.category(), ErrorCategory::Lookup);
    assert_eq!(error.to_string(), "Generator 'blgo' not found");
}

#[test]
fn test_request_parameters_and_scope_shadowing() {
    let pages = StaticPages::new();
    pages.set("https://blog.example/tags/rust?page=2", "<ul><li>a</li></ul>");
    let yaml = r#"
generators:
  tags:
    type: template
    endpoint: "/tags/:tag"
    source: "https://blog.example/tags/{{ param(name='tag') }}?{{ query_params() }}"
    feed:
      title: "{{ site }} {{ param(name='tag') }} {{ query_param(name='page') }}"
      description: "{{ url }}"
    list: "li"
    item:
      title: "{{ item_content | text }}{{ param(name='missing') }}"
"#;
    let generators = loaded(Repository::memory(), &pages, yaml);
    generators.root_scope().set("site", serde_json::json!("Root"));
    generators.root_scope().set("url", serde_json::json!("root-url"));

    let mut parameters = Parameters::new();
    parameters.insert("tag".to_string(), "rust".to_string());
    let mut query = QueryParameters::new();
    query.insert("page".to_string(), vec!["2".to_string()]);

    let feed = generators.generate("tags", &parameters, &query).unwrap();
    assert_eq!(feed.title, "Root rust 2");
    assert_eq!(feed.description, "https://blog.example/tags/rust?page=2");
    assert_eq!(feed.items[0].title, "a");
    assert_eq!(generators.endpoints(), vec![("tags".to_string(), "/tags/:tag".to_string())]);
}
