//! Selection filters available to expressions.
//!
//! Selections cannot live inside a Tera context directly, so each generation keeps a
//! [`SelectionTable`] and exposes selections to expressions as small handle objects
//! (`{"$selection": 3}`). The filters below accept handles and return handles or text:
//!
//! ```text
//! {{ item_content | find(css="a.title") | text }}
//! {{ item_content | find(css="a") | attr(name="href") }}
//! {% for p in content | find_all(css="p") %}{{ p | text }}{% endfor %}
//! {{ link_content | find(css="article") | inner_html }}
//! {% if item_content | find(css=".sticky") | exists %}pinned{% endif %}
//! ```

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use serde_json::{Value, json};

use super::Selection;
use crate::core::{FeedgenError, Result};
use crate::templating::Scope;
use crate::templating::filters::value_as_text;
use crate::templating::scope::required_string_arg;

/// Key marking a selection handle object.
pub const HANDLE_KEY: &str = "$selection";

/// Per-generation registry of selections referenced from expressions.
#[derive(Debug, Default)]
pub struct SelectionTable {
    entries: Mutex<Vec<Selection>>,
}

impl SelectionTable {
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Store `selection` and return the handle expressions use to refer to it.
    pub fn handle(&self, selection: Selection) -> Value {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        entries.push(selection);
        json!({ HANDLE_KEY: entries.len() - 1 })
    }

    /// The selection a handle refers to.
    #[must_use]
    pub fn resolve(&self, value: &Value) -> Option<Selection> {
        let index = value.get(HANDLE_KEY)?.as_u64()?;
        let index = usize::try_from(index).ok()?;
        self.entries.lock().unwrap_or_else(PoisonError::into_inner).get(index).cloned()
    }

    /// Number of selections handed out so far.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn expect(&self, filter: &str, value: &Value) -> tera::Result<Selection> {
        self.resolve(value).ok_or_else(|| {
            tera::Error::msg(format!("`{filter}` expects a selection, got {value}"))
        })
    }
}

/// Convert a library error raised inside a callable so the renderer can recover it.
pub(crate) fn to_tera_error(error: FeedgenError) -> tera::Error {
    tera::Error::chain(error.to_string(), error)
}

fn selection_result<T>(result: Result<T>) -> tera::Result<T> {
    result.map_err(to_tera_error)
}

/// Register `find`, `find_all`, `first_node`, `attr`, `text`, `inner_html` and `exists`
/// on `scope`, resolving handles through `table`.
///
/// # Errors
///
/// [`FeedgenError::DuplicateFunction`] when any of the names is already bound.
pub fn register_selection_filters(scope: &Scope, table: &Arc<SelectionTable>) -> Result<()> {
    let t = Arc::clone(table);
    scope.add_filter("find", move |value: &Value, args: &HashMap<String, Value>| {
        let css = required_string_arg("find", args, "css")?;
        let selection = t.expect("find", value)?;
        let found = selection_result(selection.find(css))?;
        Ok(t.handle(found))
    })?;

    let t = Arc::clone(table);
    scope.add_filter("find_all", move |value: &Value, args: &HashMap<String, Value>| {
        let css = required_string_arg("find_all", args, "css")?;
        let selection = t.expect("find_all", value)?;
        let list = selection_result(selection.list(css))?;
        Ok(Value::Array(list.into_iter().map(|s| t.handle(s)).collect()))
    })?;

    let t = Arc::clone(table);
    scope.add_filter("first_node", move |value: &Value, _: &HashMap<String, Value>| {
        let selection = t.expect("first_node", value)?;
        Ok(t.handle(selection.first()))
    })?;

    let t = Arc::clone(table);
    scope.add_filter("attr", move |value: &Value, args: &HashMap<String, Value>| {
        let name = required_string_arg("attr", args, "name")?;
        let selection = t.expect("attr", value)?;
        let attribute = selection_result(selection.attribute(name))?;
        Ok(Value::String(attribute.unwrap_or_default()))
    })?;

    let t = Arc::clone(table);
    scope.add_filter("text", move |value: &Value, _: &HashMap<String, Value>| {
        let text = match value {
            Value::Array(values) => {
                let mut text = String::new();
                for value in values {
                    match t.resolve(value) {
                        Some(selection) => text.push_str(&selection_result(selection.text())?),
                        None => text.push_str(&value_as_text(value)),
                    }
                }
                text
            }
            other => match t.resolve(other) {
                Some(selection) => selection_result(selection.text())?,
                None => value_as_text(other),
            },
        };
        Ok(Value::String(text))
    })?;

    let t = Arc::clone(table);
    scope.add_filter("inner_html", move |value: &Value, _: &HashMap<String, Value>| {
        let selection = t.expect("inner_html", value)?;
        Ok(Value::String(selection_result(selection.inner_html())?))
    })?;

    let t = Arc::clone(table);
    scope.add_filter("exists", move |value: &Value, _: &HashMap<String, Value>| {
        let selection = t.expect("exists", value)?;
        Ok(Value::Bool(selection_result(selection.exists())?))
    })?;

    Ok(())
}
