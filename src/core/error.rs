//! Error handling for feedgen
//!
//! This module provides the error type shared by every feedgen component and the
//! user-facing error reporting used by the CLI. The error system follows two rules:
//! 1. **Strongly-typed errors** so the generation pipeline can branch on failure kinds
//! 2. **User-friendly messages** with actionable suggestions for people running the CLI
//!
//! # Architecture
//!
//! - [`FeedgenError`] - enumerated failure cases for configuration, extraction,
//!   evaluation, sources, the cache repository and output conversion
//! - [`ErrorCategory`] - the coarse taxonomy every variant maps onto
//! - [`ErrorContext`] - wrapper adding details and suggestions for display
//!
//! # Error Categories
//!
//! | Category | Raised when | Effect |
//! |---|---|---|
//! | [`ErrorCategory::Configuration`] | unknown generator type, malformed field rule, duplicate function | rejects the whole configuration load |
//! | [`ErrorCategory::Extraction`] | selector matched nothing, attribute missing, invalid selector | aborts one generation call |
//! | [`ErrorCategory::Evaluation`] | expression failed to parse or render, strategy panicked | aborts one generation call |
//! | [`ErrorCategory::Source`] | fetch failed, browser action failed, deadline exceeded | aborts one generation call |
//! | [`ErrorCategory::Repository`] | storage I/O or (de)serialization failure | aborts one generation call |
//! | [`ErrorCategory::Lookup`] | unknown generator name | reported to the caller |
//! | [`ErrorCategory::Output`] | unsupported output format or conversion failure | reported to the caller |
//!
//! A missing repository entry is never an error: lookups return `Ok(None)`.
//!
//! # Examples
//!
//! ```rust,no_run
//! use feedgen::core::{FeedgenError, user_friendly_error};
//!
//! let error = FeedgenError::GeneratorNotFound {
//!     name: "nwes".to_string(),
//!     available: vec!["news".to_string(), "blog".to_string()],
//! };
//! let context = user_friendly_error(anyhow::Error::from(error));
//! context.display(); // suggests `news`
//! ```

use colored::Colorize;
use std::fmt;
use thiserror::Error;

/// Result alias used throughout the library.
pub type Result<T> = std::result::Result<T, FeedgenError>;

/// Coarse classification of a [`FeedgenError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// Invalid configuration, reported before any generation attempt
    Configuration,
    /// A document query did not produce what the configuration asked for
    Extraction,
    /// An expression could not be parsed or rendered
    Evaluation,
    /// The source document or browser session could not be obtained
    Source,
    /// The cache repository failed to read, write or encode a record
    Repository,
    /// A requested generator does not exist
    Lookup,
    /// The finished feed could not be converted to the requested format
    Output,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Configuration => "configuration",
            Self::Extraction => "extraction",
            Self::Evaluation => "evaluation",
            Self::Source => "source",
            Self::Repository => "repository",
            Self::Lookup => "lookup",
            Self::Output => "output",
        };
        f.write_str(name)
    }
}

/// The main error type for feedgen operations
///
/// Every variant carries enough context (generator, field, selector, URL) to tell the
/// user which part of the configuration failed. Use [`FeedgenError::category`] to
/// branch on the kind of failure rather than matching individual variants.
///
/// # Variants by category
///
/// ## Configuration
/// - [`ConfigError`] - configuration file or options could not be decoded
/// - [`UnknownGeneratorType`] - `type` does not name a registered strategy
/// - [`InvalidFieldRule`] - a field rule combines incompatible keys
/// - [`DuplicateFunction`] - a callable name is already bound in the scope chain
/// - [`InvalidEndpoint`] - an endpoint path is malformed or already used
///
/// ## Extraction
/// - [`ElementNotFound`], [`AttributeNotFound`], [`InvalidSelector`]
///
/// ## Evaluation
/// - [`EvaluationError`], [`CircularField`], [`StrategyPanicked`]
///
/// ## Source
/// - [`FetchError`], [`InvalidUrl`], [`BrowserError`], [`Timeout`]
///
/// ## Repository
/// - [`StorageError`], [`SerializationError`], [`RepositoryClosed`], [`IoError`]
///
/// [`ConfigError`]: FeedgenError::ConfigError
/// [`UnknownGeneratorType`]: FeedgenError::UnknownGeneratorType
/// [`InvalidFieldRule`]: FeedgenError::InvalidFieldRule
/// [`DuplicateFunction`]: FeedgenError::DuplicateFunction
/// [`InvalidEndpoint`]: FeedgenError::InvalidEndpoint
/// [`ElementNotFound`]: FeedgenError::ElementNotFound
/// [`AttributeNotFound`]: FeedgenError::AttributeNotFound
/// [`InvalidSelector`]: FeedgenError::InvalidSelector
/// [`EvaluationError`]: FeedgenError::EvaluationError
/// [`CircularField`]: FeedgenError::CircularField
/// [`StrategyPanicked`]: FeedgenError::StrategyPanicked
/// [`FetchError`]: FeedgenError::FetchError
/// [`InvalidUrl`]: FeedgenError::InvalidUrl
/// [`BrowserError`]: FeedgenError::BrowserError
/// [`Timeout`]: FeedgenError::Timeout
/// [`StorageError`]: FeedgenError::StorageError
/// [`SerializationError`]: FeedgenError::SerializationError
/// [`RepositoryClosed`]: FeedgenError::RepositoryClosed
/// [`IoError`]: FeedgenError::IoError
#[derive(Error, Debug)]
pub enum FeedgenError {
    /// Configuration could not be read or decoded
    #[error("Configuration error: {message}")]
    ConfigError {
        /// Description of the problem
        message: String,
    },

    /// A generator references a strategy type nobody registered
    #[error("Unknown generator type '{type_name}' for generator '{generator}'")]
    UnknownGeneratorType {
        /// Generator whose `type` is unknown
        generator: String,
        /// The configured type name
        type_name: String,
        /// Registered strategy types
        known: Vec<String>,
    },

    /// A field rule is malformed
    #[error("Invalid rule for field '{field}': {reason}")]
    InvalidFieldRule {
        /// Field name as configured
        field: String,
        /// What is wrong with the rule
        reason: String,
    },

    /// A function or filter name is already bound somewhere in the scope chain
    #[error("Function '{name}' is already registered in this scope chain")]
    DuplicateFunction {
        /// The duplicated name
        name: String,
    },

    /// An endpoint path is malformed or used by two generators
    #[error("Invalid endpoint '{endpoint}' for generator '{generator}': {reason}")]
    InvalidEndpoint {
        /// Generator owning the endpoint
        generator: String,
        /// Rendered endpoint path
        endpoint: String,
        /// What is wrong with it
        reason: String,
    },

    /// A selector matched no element
    #[error("No element matches selector '{selector}'")]
    ElementNotFound {
        /// The CSS selector
        selector: String,
    },

    /// A matched element lacks the requested attribute
    #[error("Attribute '{attribute}' not found on element matching '{selector}'")]
    AttributeNotFound {
        /// The CSS selector
        selector: String,
        /// The missing attribute
        attribute: String,
    },

    /// A CSS selector could not be parsed
    #[error("Invalid selector '{selector}': {reason}")]
    InvalidSelector {
        /// The CSS selector
        selector: String,
        /// Parser message
        reason: String,
    },

    /// An expression failed to parse or render
    #[error("Failed to evaluate expression: {reason}")]
    EvaluationError {
        /// The expression source
        expression: String,
        /// Renderer message including its cause chain
        reason: String,
    },

    /// A field was evaluated while its own evaluation was in progress
    #[error("Circular reference while evaluating field '{field}'")]
    CircularField {
        /// Field name
        field: String,
    },

    /// A field failed; wraps the underlying cause
    #[error("Field '{field}': {source}")]
    FieldError {
        /// Field name
        field: String,
        /// Underlying failure
        source: Box<FeedgenError>,
    },

    /// A strategy panicked during generation
    #[error("Generator panicked: {message}")]
    StrategyPanicked {
        /// Panic payload, when it was a string
        message: String,
    },

    /// A document could not be fetched
    #[error("Failed to fetch '{url}': {reason}")]
    FetchError {
        /// Requested location
        url: String,
        /// Transport or status failure
        reason: String,
    },

    /// A location string is not a valid URL
    #[error("Invalid URL '{url}': {reason}")]
    InvalidUrl {
        /// The rejected location
        url: String,
        /// Parser message
        reason: String,
    },

    /// A browser session operation failed
    #[error("Browser {operation} failed: {reason}")]
    BrowserError {
        /// Operation that failed (open, navigate, evaluate...)
        operation: String,
        /// Driver message
        reason: String,
    },

    /// A deadline expired
    #[error("Timed out after {seconds}s during {operation}")]
    Timeout {
        /// Operation in flight when the deadline expired
        operation: String,
        /// Configured timeout
        seconds: u64,
    },

    /// Storage backend failure
    #[error("Repository {operation} failed: {reason}")]
    StorageError {
        /// Operation (get, put, open, close)
        operation: String,
        /// Backend message
        reason: String,
    },

    /// A record could not be encoded or decoded
    #[error("Failed to (de)serialize record '{key}': {reason}")]
    SerializationError {
        /// Storage key
        key: String,
        /// Codec message
        reason: String,
    },

    /// The repository has been closed
    #[error("Repository is closed")]
    RepositoryClosed,

    /// Standard I/O error
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    /// No generator registered under this name
    #[error("Generator '{name}' not found")]
    GeneratorNotFound {
        /// Requested name
        name: String,
        /// Names that are registered
        available: Vec<String>,
    },

    /// Output format has no converter
    #[error("Unsupported output format '{format}'")]
    UnsupportedFormat {
        /// Requested format
        format: String,
    },

    /// A converter failed to render the feed
    #[error("Failed to convert feed to {format}: {reason}")]
    ConversionError {
        /// Target format
        format: String,
        /// Renderer message
        reason: String,
    },

    /// Generation through the registry failed; carries the generator name
    #[error("Generator '{generator}' failed: {source}")]
    GenerationFailed {
        /// Generator name
        generator: String,
        /// Underlying failure
        source: Box<FeedgenError>,
    },

    /// Anything else
    #[error("{message}")]
    Other {
        /// Message
        message: String,
    },
}

impl FeedgenError {
    /// The taxonomy bucket this error belongs to.
    ///
    /// Wrapping variants ([`FeedgenError::FieldError`], [`FeedgenError::GenerationFailed`])
    /// report the category of the error they wrap.
    #[must_use]
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::ConfigError {
                ..
            }
            | Self::UnknownGeneratorType {
                ..
            }
            | Self::InvalidFieldRule {
                ..
            }
            | Self::DuplicateFunction {
                ..
            }
            | Self::InvalidEndpoint {
                ..
            } => ErrorCategory::Configuration,
            Self::ElementNotFound {
                ..
            }
            | Self::AttributeNotFound {
                ..
            }
            | Self::InvalidSelector {
                ..
            } => ErrorCategory::Extraction,
            Self::EvaluationError {
                ..
            }
            | Self::CircularField {
                ..
            }
            | Self::StrategyPanicked {
                ..
            }
            | Self::Other {
                ..
            } => ErrorCategory::Evaluation,
            Self::FetchError {
                ..
            }
            | Self::InvalidUrl {
                ..
            }
            | Self::BrowserError {
                ..
            }
            | Self::Timeout {
                ..
            } => ErrorCategory::Source,
            Self::StorageError {
                ..
            }
            | Self::SerializationError {
                ..
            }
            | Self::RepositoryClosed
            | Self::IoError(_) => ErrorCategory::Repository,
            Self::GeneratorNotFound {
                ..
            } => ErrorCategory::Lookup,
            Self::UnsupportedFormat {
                ..
            }
            | Self::ConversionError {
                ..
            } => ErrorCategory::Output,
            Self::FieldError {
                source,
                ..
            }
            | Self::GenerationFailed {
                source,
                ..
            } => source.category(),
        }
    }

    /// Shorthand for an [`FeedgenError::EvaluationError`].
    pub fn evaluation(expression: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::EvaluationError {
            expression: expression.into(),
            reason: reason.into(),
        }
    }

    /// Attach a field name to this error, unless it already names one.
    #[must_use]
    pub fn in_field(self, field: &str) -> Self {
        match self {
            Self::FieldError {
                ..
            }
            | Self::CircularField {
                ..
            } => self,
            other => Self::FieldError {
                field: field.to_string(),
                source: Box::new(other),
            },
        }
    }
}

impl Clone for FeedgenError {
    fn clone(&self) -> Self {
        match self {
            Self::ConfigError {
                message,
            } => Self::ConfigError {
                message: message.clone(),
            },
            Self::UnknownGeneratorType {
                generator,
                type_name,
                known,
            } => Self::UnknownGeneratorType {
                generator: generator.clone(),
                type_name: type_name.clone(),
                known: known.clone(),
            },
            Self::InvalidFieldRule {
                field,
                reason,
            } => Self::InvalidFieldRule {
                field: field.clone(),
                reason: reason.clone(),
            },
            Self::DuplicateFunction {
                name,
            } => Self::DuplicateFunction {
                name: name.clone(),
            },
            Self::InvalidEndpoint {
                generator,
                endpoint,
                reason,
            } => Self::InvalidEndpoint {
                generator: generator.clone(),
                endpoint: endpoint.clone(),
                reason: reason.clone(),
            },
            Self::ElementNotFound {
                selector,
            } => Self::ElementNotFound {
                selector: selector.clone(),
            },
            Self::AttributeNotFound {
                selector,
                attribute,
            } => Self::AttributeNotFound {
                selector: selector.clone(),
                attribute: attribute.clone(),
            },
            Self::InvalidSelector {
                selector,
                reason,
            } => Self::InvalidSelector {
                selector: selector.clone(),
                reason: reason.clone(),
            },
            Self::EvaluationError {
                expression,
                reason,
            } => Self::EvaluationError {
                expression: expression.clone(),
                reason: reason.clone(),
            },
            Self::CircularField {
                field,
            } => Self::CircularField {
                field: field.clone(),
            },
            Self::FieldError {
                field,
                source,
            } => Self::FieldError {
                field: field.clone(),
                source: source.clone(),
            },
            Self::StrategyPanicked {
                message,
            } => Self::StrategyPanicked {
                message: message.clone(),
            },
            Self::FetchError {
                url,
                reason,
            } => Self::FetchError {
                url: url.clone(),
                reason: reason.clone(),
            },
            Self::InvalidUrl {
                url,
                reason,
            } => Self::InvalidUrl {
                url: url.clone(),
                reason: reason.clone(),
            },
            Self::BrowserError {
                operation,
                reason,
            } => Self::BrowserError {
                operation: operation.clone(),
                reason: reason.clone(),
            },
            Self::Timeout {
                operation,
                seconds,
            } => Self::Timeout {
                operation: operation.clone(),
                seconds: *seconds,
            },
            Self::StorageError {
                operation,
                reason,
            } => Self::StorageError {
                operation: operation.clone(),
                reason: reason.clone(),
            },
            Self::SerializationError {
                key,
                reason,
            } => Self::SerializationError {
                key: key.clone(),
                reason: reason.clone(),
            },
            Self::RepositoryClosed => Self::RepositoryClosed,
            // io::Error is not Clone; keep the kind and message
            Self::IoError(e) => Self::IoError(std::io::Error::new(e.kind(), e.to_string())),
            Self::GeneratorNotFound {
                name,
                available,
            } => Self::GeneratorNotFound {
                name: name.clone(),
                available: available.clone(),
            },
            Self::UnsupportedFormat {
                format,
            } => Self::UnsupportedFormat {
                format: format.clone(),
            },
            Self::ConversionError {
                format,
                reason,
            } => Self::ConversionError {
                format: format.clone(),
                reason: reason.clone(),
            },
            Self::GenerationFailed {
                generator,
                source,
            } => Self::GenerationFailed {
                generator: generator.clone(),
                source: source.clone(),
            },
            Self::Other {
                message,
            } => Self::Other {
                message: message.clone(),
            },
        }
    }
}

impl From<serde_yaml::Error> for FeedgenError {
    fn from(error: serde_yaml::Error) -> Self {
        Self::ConfigError {
            message: error.to_string(),
        }
    }
}

/// Error context wrapper that provides user-friendly error information
///
/// Produced by [`user_friendly_error`] and printed by the CLI with [`ErrorContext::display`].
#[derive(Debug)]
pub struct ErrorContext {
    /// The underlying error
    pub error: FeedgenError,
    /// Optional suggestion for resolving the error
    pub suggestion: Option<String>,
    /// Optional additional details about the error
    pub details: Option<String>,
}

impl ErrorContext {
    /// Create a new error context without suggestion or details.
    #[must_use]
    pub const fn new(error: FeedgenError) -> Self {
        Self {
            error,
            suggestion: None,
            details: None,
        }
    }

    /// Add a suggestion for resolving the error.
    #[must_use]
    pub fn with_suggestion(mut self, suggestion: impl Into<String>) -> Self {
        self.suggestion = Some(suggestion.into());
        self
    }

    /// Add details explaining the error.
    #[must_use]
    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }

    /// Print the error to stderr: the error in red, details in yellow and the
    /// suggestion in green.
    pub fn display(&self) {
        eprintln!("{}: {}", "error".red().bold(), self.error);

        if let Some(details) = &self.details {
            eprintln!("{}: {}", "details".yellow(), details);
        }

        if let Some(suggestion) = &self.suggestion {
            eprintln!("{}: {}", "suggestion".green(), suggestion);
        }
    }
}

impl fmt::Display for ErrorContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.error)?;

        if let Some(details) = &self.details {
            write!(f, "\nDetails: {details}")?;
        }

        if let Some(suggestion) = &self.suggestion {
            write!(f, "\nSuggestion: {suggestion}")?;
        }

        Ok(())
    }
}

impl std::error::Error for ErrorContext {}

/// Return the candidate closest to `name`, if any is close enough to be a likely typo.
#[must_use]
pub fn closest_match<'a>(name: &str, candidates: &'a [String]) -> Option<&'a str> {
    candidates
        .iter()
        .map(|candidate| (candidate, strsim::jaro_winkler(name, candidate)))
        .filter(|(_, score)| *score >= 0.8)
        .max_by(|a, b| a.1.total_cmp(&b.1))
        .map(|(candidate, _)| candidate.as_str())
}

/// Convert any error to a user-friendly [`ErrorContext`] with actionable suggestions
///
/// [`FeedgenError`] values anywhere in the chain get tailored suggestions; other errors
/// are reported with their full cause chain.
#[must_use]
pub fn user_friendly_error(error: anyhow::Error) -> ErrorContext {
    if let Some(feedgen_error) = error.downcast_ref::<FeedgenError>() {
        return create_error_context(feedgen_error.clone());
    }

    if let Some(io_error) = error.downcast_ref::<std::io::Error>() {
        if io_error.kind() == std::io::ErrorKind::NotFound {
            return ErrorContext::new(FeedgenError::Other {
                message: error.to_string(),
            })
            .with_suggestion("Check that the file or directory exists and the path is correct");
        }
    }

    let mut message = error.to_string();
    let chain: Vec<String> = error.chain().skip(1).map(std::string::ToString::to_string).collect();

    if !chain.is_empty() {
        message.push_str("\n\nCaused by:");
        for (i, cause) in chain.iter().enumerate() {
            message.push_str(&format!("\n  {}: {}", i + 1, cause));
        }
    }

    ErrorContext::new(FeedgenError::Other {
        message,
    })
}

fn create_error_context(error: FeedgenError) -> ErrorContext {
    let root = innermost(&error).clone();
    let context = ErrorContext::new(error);

    match root {
        FeedgenError::GeneratorNotFound {
            name,
            available,
        } => {
            let context = context.with_details(if available.is_empty() {
                "No generators are configured".to_string()
            } else {
                format!("Configured generators: {}", available.join(", "))
            });
            match closest_match(&name, &available) {
                Some(candidate) => context.with_suggestion(format!("Did you mean '{candidate}'?")),
                None => context,
            }
        }
        FeedgenError::UnknownGeneratorType {
            type_name,
            known,
            ..
        } => {
            let context = context.with_details(format!("Known types: {}", known.join(", ")));
            match closest_match(&type_name, &known) {
                Some(candidate) => context.with_suggestion(format!("Did you mean '{candidate}'?")),
                None => context,
            }
        }
        FeedgenError::InvalidFieldRule {
            ..
        } => context.with_suggestion(
            "A field rule is a selector string, {selector, attr}, {template} or {constant}",
        ),
        FeedgenError::ElementNotFound {
            ..
        }
        | FeedgenError::AttributeNotFound {
            ..
        } => context.with_suggestion(
            "Open the source page and check that the configured selector still matches",
        ),
        FeedgenError::EvaluationError {
            expression,
            ..
        } => context
            .with_details(format!("Expression: {expression}"))
            .with_suggestion("Variables use {{ var }}, filters use {{ value | filter }}"),
        FeedgenError::Timeout {
            ..
        } => context.with_suggestion("Increase browser.timeout_secs for this generator"),
        FeedgenError::UnsupportedFormat {
            ..
        } => context.with_suggestion("Supported formats are rss, atom and html"),
        FeedgenError::BrowserError {
            ..
        } => context.with_suggestion(
            "Check that chromedriver is running and reachable at --webdriver-url",
        ),
        _ => context,
    }
}

fn innermost(error: &FeedgenError) -> &FeedgenError {
    match error {
        FeedgenError::FieldError {
            source,
            ..
        }
        | FeedgenError::GenerationFailed {
            source,
            ..
        } => innermost(source),
        other => other,
    }
}
