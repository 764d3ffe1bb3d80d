use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::sync::Arc;

use scraper::{ElementRef, Html, Selector};

use super::{Document, with_html};
use crate::core::{FeedgenError, Result};

/// A set of elements of a [`Document`], in document order.
///
/// The whole-document selection (from [`Selection::root`]) stands for the document
/// itself: queries search the entire tree and `text`/`inner_html` read the root element.
#[derive(Clone)]
pub struct Selection {
    document: Arc<Document>,
    /// Element ordinals in document order; `None` selects the document itself.
    nodes: Option<Arc<[usize]>>,
}

impl Selection {
    /// Selection standing for the whole document.
    #[must_use]
    pub fn root(document: Arc<Document>) -> Self {
        Self {
            document,
            nodes: None,
        }
    }

    /// Parse `html` and select the whole document.
    #[must_use]
    pub fn from_html(html: impl Into<String>) -> Self {
        Self::root(Document::parse(html))
    }

    #[must_use]
    pub fn document(&self) -> &Arc<Document> {
        &self.document
    }

    fn with_nodes(&self, nodes: Vec<usize>) -> Self {
        Self {
            document: Arc::clone(&self.document),
            nodes: Some(Arc::from(nodes)),
        }
    }

    /// Run `f` with the parsed tree, all elements in document order and the elements
    /// making up this selection.
    fn query<R>(&self, f: impl FnOnce(&Html, &[ElementRef<'_>], Option<Vec<ElementRef<'_>>>) -> R) -> Result<R> {
        let source = self.document.source()?;
        Ok(with_html(&source, |html| {
            let elements: Vec<ElementRef<'_>> =
                html.tree.root().descendants().filter_map(ElementRef::wrap).collect();
            let selected = self.nodes.as_ref().map(|nodes| {
                nodes.iter().filter_map(|&ordinal| elements.get(ordinal).copied()).collect()
            });
            f(html, &elements, selected)
        }))
    }

    /// Descendants of the selected elements matching `css`, without duplicates.
    ///
    /// # Errors
    ///
    /// [`FeedgenError::InvalidSelector`] for malformed CSS, or the document's load error.
    pub fn find(&self, css: &str) -> Result<Selection> {
        let selector = parse_selector(css)?;
        let ordinals = self.query(|html, elements, selected| {
            let index: HashMap<_, usize> =
                elements.iter().enumerate().map(|(ordinal, element)| (element.id(), ordinal)).collect();
            let mut found = BTreeSet::new();
            match selected {
                None => {
                    for element in html.select(&selector) {
                        if let Some(&ordinal) = index.get(&element.id()) {
                            found.insert(ordinal);
                        }
                    }
                }
                Some(roots) => {
                    for root in roots {
                        for element in root.select(&selector) {
                            if let Some(&ordinal) = index.get(&element.id()) {
                                found.insert(ordinal);
                            }
                        }
                    }
                }
            }
            found.into_iter().collect::<Vec<_>>()
        })?;
        Ok(self.with_nodes(ordinals))
    }

    /// One single-element selection per match of `css`, in document order.
    ///
    /// Each call queries the document again.
    ///
    /// # Errors
    ///
    /// Same as [`Selection::find`].
    pub fn list(&self, css: &str) -> Result<Vec<Selection>> {
        let found = self.find(css)?;
        Ok(found
            .nodes
            .as_deref()
            .unwrap_or_default()
            .iter()
            .map(|&ordinal| found.with_nodes(vec![ordinal]))
            .collect())
    }

    /// The first selected element; the whole-document selection returns itself.
    pub fn first(&self) -> Selection {
        match &self.nodes {
            None => self.clone(),
            Some(nodes) => self.with_nodes(nodes.iter().take(1).copied().collect()),
        }
    }

    /// Number of selected elements (1 for the whole document once it loads).
    pub fn len(&self) -> Result<usize> {
        match &self.nodes {
            None => self.document.source().map(|_| 1),
            Some(nodes) => Ok(nodes.len()),
        }
    }

    /// `true` if at least one element is selected.
    pub fn exists(&self) -> Result<bool> {
        self.len().map(|len| len > 0)
    }

    /// Attribute of the first selected element.
    ///
    /// `Ok(None)` when nothing is selected or the attribute is missing.
    pub fn attribute(&self, name: &str) -> Result<Option<String>> {
        self.query(|html, _, selected| {
            let first = match selected {
                None => Some(html.root_element()),
                Some(elements) => elements.into_iter().next(),
            };
            first.and_then(|element| element.value().attr(name).map(str::to_string))
        })
    }

    /// Text content of all selected elements, concatenated.
    pub fn text(&self) -> Result<String> {
        self.query(|html, _, selected| match selected {
            None => html.root_element().text().collect::<String>(),
            Some(elements) => {
                elements.iter().flat_map(|element| element.text()).collect::<String>()
            }
        })
    }

    /// Inner HTML of the first selected element, empty when nothing is selected.
    pub fn inner_html(&self) -> Result<String> {
        self.query(|html, _, selected| match selected {
            None => html.root_element().html(),
            Some(elements) => {
                elements.first().map(ElementRef::inner_html).unwrap_or_default()
            }
        })
    }
}

impl fmt::Debug for Selection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Selection")
            .field("document", &self.document)
            .field("nodes", &self.nodes)
            .finish()
    }
}

/// Parse a CSS selector, mapping failures to [`FeedgenError::InvalidSelector`].
pub(crate) fn parse_selector(css: &str) -> Result<Selector> {
    Selector::parse(css).map_err(|e| FeedgenError::InvalidSelector {
        selector: css.to_string(),
        reason: format!("{e:?}"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const PAGE: &str = r#"
        <html><head><title> Example News </title></head>
        <body>
          <ul id="list">
            <li class="item"><a href="/one">One</a><span class="by">ann</span></li>
            <li class="item"><a href="/two">Two</a></li>
            <li class="item"><a href="https://other.example/three">Three</a></li>
          </ul>
          <div class="outer"><div class="inner"><p>nested</p></div></div>
        </body></html>
    "#;

    #[test]
    fn test_list_is_in_document_order() {
        let doc = Selection::from_html(PAGE);
        let items = doc.list("li.item").unwrap();
        let titles: Vec<String> = items.iter().map(|item| item.find("a").unwrap().text().unwrap()).collect();
        assert_eq!(titles, vec!["One", "Two", "Three"]);
    }

    #[test]
    fn test_find_is_scoped_to_selection() {
        let doc = Selection::from_html(PAGE);
        let items = doc.list("li.item").unwrap();
        assert!(items[0].find("span.by").unwrap().exists().unwrap());
        assert!(!items[1].find("span.by").unwrap().exists().unwrap());
    }

    #[test]
    fn test_find_deduplicates_nested_matches() {
        let doc = Selection::from_html(PAGE);
        let divs = doc.find("div").unwrap();
        assert_eq!(divs.len().unwrap(), 2);
        // both divs contain the same <p>
        assert_eq!(divs.find("p").unwrap().len().unwrap(), 1);
    }

    #[test]
    fn test_attribute_reads_first_node() {
        let doc = Selection::from_html(PAGE);
        let links = doc.find("a").unwrap();
        assert_eq!(links.attribute("href").unwrap().as_deref(), Some("/one"));
        assert_eq!(links.attribute("title").unwrap(), None);
        assert_eq!(doc.find("title").unwrap().text().unwrap().trim(), "Example News");
    }

    #[test]
    fn test_text_concatenates_all_nodes() {
        let doc = Selection::from_html(PAGE);
        assert_eq!(doc.find("a").unwrap().text().unwrap(), "OneTwoThree");
    }

    #[test]
    fn test_inner_html_and_first() {
        let doc = Selection::from_html(PAGE);
        let inner = doc.find("div.inner").unwrap();
        assert_eq!(inner.inner_html().unwrap(), "<p>nested</p>");
        let first = doc.find("li").unwrap().first();
        assert_eq!(first.len().unwrap(), 1);
        assert_eq!(first.find("a").unwrap().text().unwrap(), "One");
    }

    #[test]
    fn test_inner_html_keeps_attribute_order() {
        let html = r#"<div><a href="/a" title="t" rel="next" class="c" id="x">A</a></div>"#;
        for _ in 0..16 {
            let div = Selection::from_html(html).find("div").unwrap();
            assert_eq!(
                div.inner_html().unwrap(),
                r#"<a href="/a" title="t" rel="next" class="c" id="x">A</a>"#
            );
        }
    }

    #[test]
    fn test_empty_selection() {
        let doc = Selection::from_html(PAGE);
        let none = doc.find("table").unwrap();
        assert!(!none.exists().unwrap());
        assert_eq!(none.text().unwrap(), "");
        assert_eq!(none.attribute("id").unwrap(), None);
        assert!(doc.list("table").unwrap().is_empty());
    }

    #[test]
    fn test_invalid_selector() {
        let doc = Selection::from_html(PAGE);
        assert!(matches!(doc.find("li[").unwrap_err(), FeedgenError::InvalidSelector { .. }));
    }

    #[test]
    fn test_selection_is_send() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<Selection>();
    }

    #[test]
    fn test_deferred_document_failure_propagates() {
        let doc = Selection::root(Document::deferred(|| {
            Err(FeedgenError::FetchError {
                url: "https://site.example/".to_string(),
                reason: "404".to_string(),
            })
        }));
        assert!(doc.find("a").is_err());
        assert!(doc.exists().is_err());
    }
}
