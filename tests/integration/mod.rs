//! Integration test suite for feedgen
//!
//! These tests drive the public API end to end with in-memory pages
//! ([`StaticPages`](feedgen::test_utils::StaticPages)) and a scripted browser
//! ([`FakeBrowser`](feedgen::test_utils::FakeBrowser)); the CLI tests run the binary on
//! `file://` sources, so nothing touches the network.
//!
//! ```bash
//! cargo test --test integration
//! ```
//!
//! # Test Organization
//!
//! - **generation**: identity, caching and change detection across generations
//! - **strategies**: selector and browser strategies through the registry
//! - **repository**: disk store persistence and expiry
//! - **conversion**: generated feeds in every output format
//! - **cli**: the `feedgen` binary

#[path = "../common/mod.rs"]
mod common;

mod cli;
mod conversion;
mod generation;
mod repository;
mod strategies;
