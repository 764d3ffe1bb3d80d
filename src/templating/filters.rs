//! Builtin callables registered on the root scope.
//!
//! These extend Tera's own builtins (`default`, `trim`, `replace`, `truncate`,
//! `capitalize`, ...) with the helpers feed configurations commonly need:
//!
//! | Name | Kind | Example |
//! |---|---|---|
//! | `env` | function | `{{ env(name="API_TOKEN") }}` |
//! | `match_regex` | filter | `{{ title \| match_regex(pattern="#(\d+)") }}` |
//! | `format_epoch_millis` | filter | `{{ 1700000000000 \| format_epoch_millis }}` |

use std::collections::HashMap;
use std::fmt::Write;

use chrono::DateTime;
use regex::Regex;
use serde_json::Value;

use super::scope::{Scope, required_string_arg, string_arg};
use crate::core::Result;

/// Default output format of `format_epoch_millis`.
pub const DEFAULT_EPOCH_FORMAT: &str = "%Y/%m/%d %H:%M";

/// Register the builtin callables on `scope`.
///
/// # Errors
///
/// Fails with [`DuplicateFunction`](crate::core::FeedgenError::DuplicateFunction) when
/// called twice on the same chain.
pub fn register_builtins(scope: &Scope) -> Result<()> {
    scope.add_function("env", env_function)?;
    scope.add_filter("match_regex", match_regex_filter)?;
    scope.add_filter("format_epoch_millis", format_epoch_millis_filter)?;
    Ok(())
}

/// `env(name=...)`: the environment variable, or an empty string when unset.
fn env_function(args: &HashMap<String, Value>) -> tera::Result<Value> {
    let name = required_string_arg("env", args, "name")?;
    Ok(Value::String(std::env::var(name).unwrap_or_default()))
}

/// `value | match_regex(pattern=...)`
///
/// With exactly one capture group the captured text is returned. Without a match (or
/// without a capture group) the result is `<no match>`; with several groups all
/// captures are listed as `<multiple matches:[whole g1 g2]>`.
fn match_regex_filter(value: &Value, args: &HashMap<String, Value>) -> tera::Result<Value> {
    let pattern = required_string_arg("match_regex", args, "pattern")?;
    let regex = Regex::new(pattern)
        .map_err(|e| tera::Error::msg(format!("invalid pattern '{pattern}': {e}")))?;
    let input = value_as_text(value);

    let result = match regex.captures(&input) {
        None => "<no match>".to_string(),
        Some(captures) => match captures.len() {
            0 | 1 => "<no match>".to_string(),
            2 => captures.get(1).map(|m| m.as_str().to_string()).unwrap_or_default(),
            _ => {
                let all: Vec<&str> =
                    captures.iter().map(|m| m.map_or("", |m| m.as_str())).collect();
                format!("<multiple matches:[{}]>", all.join(" "))
            }
        },
    };
    Ok(Value::String(result))
}

/// `value | format_epoch_millis(format=...)`: milliseconds since the epoch as UTC time.
fn format_epoch_millis_filter(value: &Value, args: &HashMap<String, Value>) -> tera::Result<Value> {
    let millis = match value {
        Value::Number(number) => number
            .as_i64()
            .or_else(|| number.as_f64().map(|f| f as i64))
            .ok_or_else(|| tera::Error::msg("format_epoch_millis: number out of range"))?,
        Value::String(text) => text.trim().parse::<f64>().map(|f| f as i64).map_err(|_| {
            tera::Error::msg(format!("format_epoch_millis: '{text}' is not a number"))
        })?,
        other => {
            return Err(tera::Error::msg(format!(
                "format_epoch_millis expects a number, got {other}"
            )));
        }
    };
    let format = string_arg(args, "format").unwrap_or(DEFAULT_EPOCH_FORMAT);
    let timestamp = DateTime::from_timestamp_millis(millis)
        .ok_or_else(|| tera::Error::msg(format!("format_epoch_millis: {millis} out of range")))?;

    let mut formatted = String::new();
    write!(formatted, "{}", timestamp.format(format))
        .map_err(|_| tera::Error::msg(format!("format_epoch_millis: invalid format '{format}'")))?;
    Ok(Value::String(formatted))
}

/// Text of a value as the user would see it rendered.
pub(crate) fn value_as_text(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}
