//! Shared test utilities for etl-overseer integration tests.
//!
//! This module provides:
//! - `TestHarness` for isolated runs against temp directories and sqlite files
//! - Builders for configuration documents, actions and table definitions

pub mod builders;
pub mod harness;

pub use builders::*;
pub use harness::TestHarness;
