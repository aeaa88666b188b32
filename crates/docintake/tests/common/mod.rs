//! Shared test utilities for docintake integration tests.
//!
//! This module provides:
//! - `TestHarness` running the whole pipeline against a temp directory
//! - Builders for PDFs, configs and canned service responses

pub mod builders;
pub mod harness;

pub use builders::*;
pub use harness::TestHarness;
