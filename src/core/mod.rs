//! Core types shared by every feedgen component
//!
//! feedgen surfaces failures through one strongly-typed error, [`FeedgenError`], whose
//! [`category`](FeedgenError::category) tells callers how far a failure reaches:
//! configuration errors reject a load, extraction/evaluation/source/repository errors
//! abort a single generation call, lookup and output errors are reported to the caller.
//!
//! The CLI converts any error into an [`ErrorContext`] with [`user_friendly_error`],
//! which adds details and "did you mean" suggestions before printing.

pub mod error;

pub use error::{
    ErrorCategory, ErrorContext, FeedgenError, Result, closest_match, user_friendly_error,
};
