//! Feed generator configuration.
//!
//! A configuration file lists named generators. Each entry selects a strategy with
//! `type`, optionally overrides its HTTP `endpoint`, and carries the strategy's own
//! options inline:
//!
//! ```yaml
//! generators:
//!   news:
//!     type: template
//!     endpoint: "/news/:section"
//!     source:
//!       url: "https://news.example/{{ param(name='section') }}"
//!     list: "article"
//!     item:
//!       title: "{{ item_content | find(css='h2') | text }}"
//!       link:
//!         href: "{{ item_content | find(css='a') | attr(name='href') }}"
//!     limit: 20
//! ```
//!
//! Everything except `type` and `endpoint` is kept as an opaque [`GeneratorOptions`]
//! map. The strategy decodes it into its typed options when the configuration is
//! loaded, so a malformed entry rejects the whole load before any generation runs.
//!
//! # Endpoint
//!
//! `endpoint` is an expression evaluated once at load time; it defaults to
//! `/<generator name>` and must start with `/`. Path parameters use the `:name`
//! syntax of the HTTP router.

use std::collections::BTreeMap;
use std::path::Path;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::core::{FeedgenError, Result};

/// Default configuration file name, relative to the working directory.
pub const DEFAULT_CONFIG_FILE: &str = "config.yml";

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Generators by name
    #[serde(default)]
    pub generators: BTreeMap<String, GeneratorConfig>,
}

/// One configured generator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneratorConfig {
    /// Strategy type (`template`, `selector`, `browser`, ...)
    #[serde(rename = "type")]
    pub generator_type: String,

    /// Endpoint path expression; `/<name>` when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,

    /// Strategy options
    #[serde(flatten)]
    pub options: GeneratorOptions,
}

/// Strategy options as written in the configuration, decoded by the strategy.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GeneratorOptions(Map<String, Value>);

impl GeneratorOptions {
    #[must_use]
    pub fn new(options: Map<String, Value>) -> Self {
        Self(options)
    }

    /// Build options from a JSON value, which must be an object.
    ///
    /// # Errors
    ///
    /// [`FeedgenError::ConfigError`] when `value` is not an object.
    pub fn from_value(value: Value) -> Result<Self> {
        match value {
            Value::Object(options) => Ok(Self(options)),
            other => Err(FeedgenError::ConfigError {
                message: format!("generator options must be a mapping, got {other}"),
            }),
        }
    }

    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    /// Decode into a strategy's typed options.
    ///
    /// # Errors
    ///
    /// [`FeedgenError::ConfigError`] naming `strategy` when the options do not match.
    pub fn decode<T: DeserializeOwned>(&self, strategy: &str) -> Result<T> {
        serde_json::from_value(Value::Object(self.0.clone())).map_err(|e| {
            FeedgenError::ConfigError {
                message: format!("invalid {strategy} options: {e}"),
            }
        })
    }
}

impl Config {
    /// Parse a YAML document.
    ///
    /// # Errors
    ///
    /// [`FeedgenError::ConfigError`] on malformed YAML or unexpected structure.
    pub fn from_yaml(content: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(content)?)
    }

    /// Read and parse a configuration file.
    ///
    /// # Errors
    ///
    /// [`FeedgenError::ConfigError`] when the file cannot be read or parsed.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| FeedgenError::ConfigError {
            message: format!("cannot read {}: {e}", path.display()),
        })?;
        Self::from_yaml(&content).map_err(|e| match e {
            FeedgenError::ConfigError {
                message,
            } => FeedgenError::ConfigError {
                message: format!("{}: {message}", path.display()),
            },
            other => other,
        })
    }
}
