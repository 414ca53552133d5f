//! Shared test utilities for poets integration tests.
//!
//! This module provides:
//! - `TestHarness` for an isolated database and media root per test
//! - Builders for requests, content bodies and configuration files

pub mod builders;
pub mod harness;

pub use builders::*;
pub use harness::TestHarness;
