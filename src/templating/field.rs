//! Lazy, memoized fields.
//!
//! A [`Field`] is a configuration-declared value: a constant, a CSS extraction rule
//! over the current selection, or an expression evaluated against a [`Scope`]. The
//! first evaluation computes, trims and (optionally) normalizes the value; later
//! evaluations return the memoized string until [`Field::reset`] is called.
//!
//! A [`FieldSet`] groups the fields of one record (feed or item) together with the
//! selection they extract from. [`FieldSet::prepare`] moves the set to the next item
//! and clears every memo. Expressions can read sibling fields with `field(name="...")`.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use serde_json::Value;

use super::renderer::evaluate;
use super::scope::{Scope, required_string_arg};
use crate::core::{FeedgenError, Result};
use crate::document::Selection;
use crate::document::filters::to_tera_error;

/// Post-evaluation hook, e.g. turning a relative link into an absolute one.
pub type Normalizer = Arc<dyn Fn(&str) -> Result<String> + Send + Sync>;

/// Where a field's raw value comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldSource {
    /// A literal value
    Constant(String),
    /// Text of the first element matching `selector`, or its `attr` attribute
    Selector {
        selector: String,
        attr: Option<String>,
    },
    /// An expression evaluated against the scope
    Template(String),
}

/// One lazily evaluated value.
pub struct Field {
    name: String,
    source: Option<FieldSource>,
    normalizer: Option<Normalizer>,
    memo: Mutex<Option<String>>,
    evaluating: AtomicBool,
}

/// Clears the in-progress flag however evaluation ends.
struct EvaluationGuard<'a>(&'a AtomicBool);

impl Drop for EvaluationGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

impl Field {
    /// A field with the given source; `None` makes it undefined.
    pub fn new(name: impl Into<String>, source: Option<FieldSource>) -> Self {
        Self {
            name: name.into(),
            source,
            normalizer: None,
            memo: Mutex::new(None),
            evaluating: AtomicBool::new(false),
        }
    }

    /// Attach a normalization hook applied after trimming.
    #[must_use]
    pub fn with_normalizer(mut self, normalizer: Normalizer) -> Self {
        self.normalizer = Some(normalizer);
        self
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// `true` if configuration gave this field a source.
    #[must_use]
    pub fn is_defined(&self) -> bool {
        self.source.is_some()
    }

    /// Forget the memoized value.
    pub fn reset(&self) {
        *self.memo.lock().unwrap_or_else(PoisonError::into_inner) = None;
    }

    /// Evaluate the field.
    ///
    /// Undefined fields evaluate to an empty string. Selector sources query
    /// `selection`; template sources render against `scope`.
    ///
    /// # Errors
    ///
    /// - [`FeedgenError::ElementNotFound`] when the selector matches nothing
    /// - [`FeedgenError::AttributeNotFound`] when the matched element lacks `attr`
    /// - [`FeedgenError::CircularField`] when the field depends on itself
    /// - expression and normalizer failures
    ///
    /// All but the circular case are wrapped in [`FeedgenError::FieldError`].
    pub fn evaluate(&self, scope: &Scope, selection: Option<&Selection>) -> Result<String> {
        if let Some(memo) = self.memo.lock().unwrap_or_else(PoisonError::into_inner).as_ref() {
            return Ok(memo.clone());
        }
        let Some(source) = &self.source else {
            return Ok(String::new());
        };

        if self.evaluating.swap(true, Ordering::SeqCst) {
            return Err(FeedgenError::CircularField {
                field: self.name.clone(),
            });
        }
        let guard = EvaluationGuard(&self.evaluating);
        let raw = Self::raw_value(source, scope, selection).map_err(|e| e.in_field(&self.name));
        drop(guard);

        let raw = raw?;
        let mut value = raw.trim().to_string();
        if let Some(normalizer) = &self.normalizer {
            value = normalizer(&value).map_err(|e| e.in_field(&self.name))?;
        }

        *self.memo.lock().unwrap_or_else(PoisonError::into_inner) = Some(value.clone());
        Ok(value)
    }

    fn raw_value(source: &FieldSource, scope: &Scope, selection: Option<&Selection>) -> Result<String> {
        match source {
            FieldSource::Constant(value) => Ok(value.clone()),
            FieldSource::Template(expression) => evaluate(expression, scope),
            FieldSource::Selector {
                selector,
                attr,
            } => {
                let selection = selection.ok_or_else(|| FeedgenError::ElementNotFound {
                    selector: selector.clone(),
                })?;
                let found = selection.find(selector)?;
                if !found.exists()? {
                    return Err(FeedgenError::ElementNotFound {
                        selector: selector.clone(),
                    });
                }
                match attr {
                    None => found.first().text(),
                    Some(attribute) => found.attribute(attribute)?.ok_or_else(|| {
                        FeedgenError::AttributeNotFound {
                            selector: selector.clone(),
                            attribute: attribute.clone(),
                        }
                    }),
                }
            }
        }
    }
}

impl fmt::Debug for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Field")
            .field("name", &self.name)
            .field("source", &self.source)
            .field("normalized", &self.normalizer.is_some())
            .finish()
    }
}

/// The fields of one record and the selection they currently extract from.
#[derive(Debug, Default)]
pub struct FieldSet {
    fields: BTreeMap<String, Field>,
    selection: Mutex<Option<Selection>>,
}

impl FieldSet {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a field, replacing one with the same name.
    pub fn insert(&mut self, field: Field) {
        self.fields.insert(field.name().to_string(), field);
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Field> {
        self.fields.get(name)
    }

    /// `true` if `name` is configured with a source.
    #[must_use]
    pub fn is_defined(&self, name: &str) -> bool {
        self.get(name).is_some_and(Field::is_defined)
    }

    /// Point the set at a new selection and clear every memo.
    pub fn prepare(&self, selection: Option<Selection>) {
        *self.selection.lock().unwrap_or_else(PoisonError::into_inner) = selection;
        for field in self.fields.values() {
            field.reset();
        }
    }

    /// Evaluate the field called `name`; unknown names evaluate to an empty string
    /// like undefined fields.
    pub fn evaluate(&self, name: &str, scope: &Scope) -> Result<String> {
        let Some(field) = self.fields.get(name) else {
            return Ok(String::new());
        };
        let selection = self.selection.lock().unwrap_or_else(PoisonError::into_inner).clone();
        field.evaluate(scope, selection.as_ref())
    }

    /// Register `field(name=...)` on `scope`, evaluating fields of this set in `scope`.
    ///
    /// # Errors
    ///
    /// [`FeedgenError::DuplicateFunction`] when `field` is already bound in the chain.
    pub fn register(self: &Arc<Self>, scope: &Scope) -> Result<()> {
        let fields = Arc::clone(self);
        let weak = scope.downgrade();
        scope.add_function("field", move |args: &HashMap<String, Value>| {
            let name = required_string_arg("field", args, "name")?;
            let scope = weak.upgrade().ok_or_else(|| {
                tera::Error::msg("`field` was called after its scope was released")
            })?;
            if !fields.fields.contains_key(name) {
                return Err(tera::Error::msg(format!("unknown field '{name}'")));
            }
            fields.evaluate(name, &scope).map(Value::String).map_err(to_tera_error)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::AtomicUsize;

    const ITEM: &str = r#"<div class="post"><h2> Title </h2><a href="/p/1">more</a><img src=""></div>"#;

    fn selector(name: &str, selector: &str, attr: Option<&str>) -> Field {
        Field::new(
            name,
            Some(FieldSource::Selector {
                selector: selector.to_string(),
                attr: attr.map(str::to_string),
            }),
        )
    }

    #[test]
    fn test_undefined_field_is_empty() {
        let field = Field::new("author", None);
        assert!(!field.is_defined());
        assert_eq!(field.evaluate(&Scope::root(), None).unwrap(), "");
    }

    #[test]
    fn test_constant_is_trimmed() {
        let field = Field::new("author", Some(FieldSource::Constant("  ann \n".to_string())));
        assert_eq!(field.evaluate(&Scope::root(), None).unwrap(), "ann");
    }

    #[test]
    fn test_memo_until_reset() {
        let scope = Scope::root();
        scope.set("title", json!("first"));
        let field = Field::new("title", Some(FieldSource::Template("{{ title }}".to_string())));
        assert_eq!(field.evaluate(&scope, None).unwrap(), "first");

        scope.set("title", json!("second"));
        assert_eq!(field.evaluate(&scope, None).unwrap(), "first");

        field.reset();
        assert_eq!(field.evaluate(&scope, None).unwrap(), "second");
    }

    #[test]
    fn test_selector_text_and_attribute() {
        let item = Selection::from_html(ITEM);
        let scope = Scope::root();
        assert_eq!(selector("title", "h2", None).evaluate(&scope, Some(&item)).unwrap(), "Title");
        assert_eq!(
            selector("link", "a", Some("href")).evaluate(&scope, Some(&item)).unwrap(),
            "/p/1"
        );
        // present but empty attribute is a value, not an error
        assert_eq!(selector("image", "img", Some("src")).evaluate(&scope, Some(&item)).unwrap(), "");
    }

    #[test]
    fn test_selector_failures_are_errors() {
        let item = Selection::from_html(ITEM);
        let scope = Scope::root();

        let err = selector("title", "h3", None).evaluate(&scope, Some(&item)).unwrap_err();
        match err {
            FeedgenError::FieldError {
                field,
                source,
            } => {
                assert_eq!(field, "title");
                assert!(matches!(*source, FeedgenError::ElementNotFound { .. }));
            }
            other => panic!("Expected FieldError, got {other:?}"),
        }

        let err = selector("link", "a", Some("rel")).evaluate(&scope, Some(&item)).unwrap_err();
        assert!(matches!(
            err,
            FeedgenError::FieldError { ref source, .. }
                if matches!(**source, FeedgenError::AttributeNotFound { .. })
        ));
    }

    #[test]
    fn test_normalizer_runs_after_trim_and_failure_is_reported() {
        let seen = Arc::new(Mutex::new(String::new()));
        let captured = Arc::clone(&seen);
        let field = Field::new("link", Some(FieldSource::Constant(" /x ".to_string())))
            .with_normalizer(Arc::new(move |value: &str| -> Result<String> {
                *captured.lock().unwrap() = value.to_string();
                Ok(format!("https://site.example{value}"))
            }));
        assert_eq!(field.evaluate(&Scope::root(), None).unwrap(), "https://site.example/x");
        assert_eq!(*seen.lock().unwrap(), "/x");

        let failing = Field::new("link", Some(FieldSource::Constant("x".to_string())))
            .with_normalizer(Arc::new(|value: &str| -> Result<String> {
                Err(FeedgenError::InvalidUrl {
                    url: value.to_string(),
                    reason: "bad".to_string(),
                })
            }));
        assert!(failing.evaluate(&Scope::root(), None).is_err());
    }

    #[test]
    fn test_field_function_reads_siblings_through_memo() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let scope = Scope::root();
        scope
            .add_function("tick", move |_: &HashMap<String, Value>| {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(json!("T"))
            })
            .unwrap();

        let mut set = FieldSet::new();
        set.insert(Field::new("title", Some(FieldSource::Template("{{ tick() }}".to_string()))));
        set.insert(Field::new(
            "description",
            Some(FieldSource::Template(r#"{{ field(name="title") }}!"#.to_string())),
        ));
        let set = Arc::new(set);
        let item_scope = scope.child();
        set.register(&item_scope).unwrap();
        set.prepare(None);

        assert_eq!(set.evaluate("title", &item_scope).unwrap(), "T");
        assert_eq!(set.evaluate("description", &item_scope).unwrap(), "T!");
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        set.prepare(None);
        assert_eq!(set.evaluate("description", &item_scope).unwrap(), "T!");
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_circular_fields_are_detected() {
        let mut set = FieldSet::new();
        set.insert(Field::new(
            "title",
            Some(FieldSource::Template(r#"{{ field(name="description") }}"#.to_string())),
        ));
        set.insert(Field::new(
            "description",
            Some(FieldSource::Template(r#"{{ field(name="title") }}"#.to_string())),
        ));
        let set = Arc::new(set);
        let scope = Scope::root();
        set.register(&scope).unwrap();

        let err = set.evaluate("title", &scope).unwrap_err();
        assert!(format!("{err}").contains("Circular"), "{err}");
    }

    #[test]
    fn test_unknown_field_name_in_expression_fails() {
        let mut set = FieldSet::new();
        set.insert(Field::new(
            "title",
            Some(FieldSource::Template(r#"{{ field(name="nope") }}"#.to_string())),
        ));
        let set = Arc::new(set);
        let scope = Scope::root();
        set.register(&scope).unwrap();
        assert!(set.evaluate("title", &scope).is_err());
        assert_eq!(set.evaluate("nope", &scope).unwrap(), "");
    }
}
