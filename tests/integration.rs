//! Integration tests entry point
//!
//! This file serves as the entry point for all integration tests.
//! It includes the integration_tests module which contains:
//! - Fetch cascade tests
//! - URL discovery and cache tests
//! - Run context, dedup persistence and ingest tests
//! - Error scenario tests

mod common;
mod integration_tests;
