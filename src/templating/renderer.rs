//! Expression evaluation with Tera.
//!
//! Every evaluation creates a fresh `Tera` instance, registers the callables visible
//! from the scope and renders the expression as a one-off template with the flattened
//! variables as context. The rendered string is trimmed.

use std::collections::HashMap;
use std::error::Error;

use serde_json::Value;
use tera::{Context as TeraContext, Tera};

use super::scope::{Callable, Scope};
use crate::core::{FeedgenError, Result};

/// Evaluate `expression` against the flattened view of `scope`.
///
/// Evaluation only reads the scope. Plain text without Tera delimiters is returned
/// trimmed without building a renderer.
///
/// # Errors
///
/// [`FeedgenError::EvaluationError`] when the expression fails to parse or render.
/// Library errors raised by callables (a failed fetch behind `link_content`, a missing
/// element in `field(...)`) are returned as they were raised.
pub fn evaluate(expression: &str, scope: &Scope) -> Result<String> {
    if !is_template(expression) {
        return Ok(expression.trim().to_string());
    }

    let resolved = scope.resolve();
    let context = TeraContext::from_value(Value::Object(resolved.variables))
        .map_err(|e| FeedgenError::evaluation(expression, format_tera_error(&e)))?;

    // Fresh instance per evaluation; callables come from the scope chain
    let mut tera = Tera::default();
    for (name, callable) in resolved.callables {
        match callable {
            Callable::Function(function) => {
                tera.register_function(&name, move |args: &HashMap<String, Value>| {
                    function.call(args)
                });
            }
            Callable::Filter(filter) => {
                tera.register_filter(
                    &name,
                    move |value: &Value, args: &HashMap<String, Value>| filter.filter(value, args),
                );
            }
        }
    }

    let rendered = tera.render_str(expression, &context).map_err(|e| {
        tracing::debug!("Expression failed: {}", expression);
        match raised_by_callable(&e) {
            Some(error) => error.clone(),
            None => FeedgenError::evaluation(expression, format_tera_error(&e)),
        }
    })?;

    Ok(rendered.trim().to_string())
}

/// A library error raised inside a callable, recovered from Tera's cause chain.
fn raised_by_callable(error: &tera::Error) -> Option<&FeedgenError> {
    let mut current: Option<&(dyn Error + 'static)> = error.source();
    while let Some(err) = current {
        if let Some(feedgen_error) = err.downcast_ref::<FeedgenError>() {
            return Some(feedgen_error);
        }
        current = err.source();
    }
    None
}

fn is_template(expression: &str) -> bool {
    expression.contains("{{") || expression.contains("{%") || expression.contains("{#")
}

/// Collapse a Tera error and its cause chain into one readable message.
///
/// Tera reports failures as a chain ("Failed to render '__tera_one_off'" caused by the
/// actual problem); the internal template name is dropped and the useful messages are
/// joined with " -> ".
#[must_use]
pub fn format_tera_error(error: &tera::Error) -> String {
    let mut all_messages = vec![error.to_string()];
    let mut current: Option<&dyn Error> = error.source();
    while let Some(err) = current {
        all_messages.push(err.to_string());
        current = err.source();
    }

    let messages: Vec<String> = all_messages
        .into_iter()
        .map(|msg| {
            msg.replace("while rendering '__tera_one_off'", "")
                .replace("Failed to render '__tera_one_off'", "")
                .replace("Failed to parse '__tera_one_off'", "syntax error")
                .replace("'__tera_one_off'", "expression")
                .trim()
                .to_string()
        })
        .filter(|msg| !msg.is_empty())
        .collect();

    if messages.is_empty() {
        "expression could not be rendered".to_string()
    } else {
        messages.join(" -> ")
    }
}
