//! Expression evaluation for feed configurations.
//!
//! Feed configurations describe values as Tera expressions (`"{{ item_content | find(css='a') | text }}"`)
//! that are evaluated against a chain of lexical scopes. This module provides:
//!
//! - [`Scope`] - the scoped evaluation context: variables and callables per scope,
//!   child bindings shadowing parent bindings, duplicate callable names rejected at
//!   registration time
//! - [`evaluate`] - renders one expression against the flattened scope chain
//! - [`filters`] - builtin callables (`env`, `match_regex`, `format_epoch_millis`)
//! - [`Field`] / [`FieldSet`] - lazily evaluated, memoized configuration values
//!
//! # Scope lifecycle
//!
//! ```text
//! root scope          builtins, created once per process
//! └── request scope   parameters, query_parameters, param(), query_param(), query_params()
//!     ├── feed scope  field() over the feed fields
//!     └── item scope  item_content, link_content, field() over the item fields (one per item)
//! ```
//!
//! Scopes are discarded when the record they were built for is finished; nothing is
//! shared between requests except the root.

pub mod field;
pub mod filters;
pub mod renderer;
pub mod scope;

pub use field::{Field, FieldSet, FieldSource, Normalizer};
pub use filters::register_builtins;
pub use renderer::evaluate;
pub use scope::{Callable, Resolved, Scope, WeakScope};
