//! Generated feeds in every output format.

use feedgen::converter::{Converter, Format};
use feedgen::repository::Repository;
use feedgen::test_utils::StaticPages;

use crate::common::{generate, loaded};

const NEWS: &str = r#"
generators:
  news:
    type: template
    source: "https://news.example/"
    feed:
      title: "{{ content | find(css='title') | text }}"
      description: "Latest news"
    list: "li"
    item:
      title: "{{ item_content | find(css='a') | text }}"
      link:
        href: "{{ item_content | find(css='a') | attr(name='href') }}"
      enclosure:
        url: "{{ item_content | find(css='audio') | attr(name='src') }}"
"#;

fn feed() -> feedgen::models::Feed {
    let pages = StaticPages::new();
    pages.set(
        "https://news.example/",
        r#"<title>Q&amp;A</title><ul>
            <li><a href="/1">Rates &lt;up&gt;</a><audio src="/1.mp3"></audio></li>
            <li><a href="/2">Calm</a></li>
        </ul>"#,
    );
    let generators = loaded(Repository::memory(), &pages, NEWS);
    generate(&generators, "news").unwrap()
}

#[test]
fn test_every_format_renders_every_item() {
    let feed = feed();
    assert_eq!(feed.title, "Q&A");

    let rss = Converter::new(Format::Rss).convert(&feed).unwrap().body;
    assert_eq!(rss.matches("<item>").count(), 2);
    assert!(rss.contains("<title>Q&amp;A</title>"));
    assert!(rss.contains("<title>Rates &lt;up&gt;</title>"));
    assert_eq!(rss.matches("<enclosure ").count(), 1);
    assert!(rss.contains("type=\"application&#x2F;octet-stream\""));

    let atom = Converter::new(Format::Atom).convert(&feed).unwrap().body;
    assert_eq!(atom.matches("<entry>").count(), 2);
    assert!(atom.contains("rel=\"enclosure\""));

    let html = Converter::new(Format::Html).convert(&feed).unwrap().body;
    assert!(html.contains("<h1>Q&amp;A</h1>"));
    assert_eq!(html.matches("<article ").count(), 2);
}

#[test]
fn test_format_parsing() {
    assert!("rss".parse::<Converter>().is_ok());
    assert!("xml".parse::<Converter>().is_err());
}
