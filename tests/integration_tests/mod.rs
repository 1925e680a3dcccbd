//! Integration tests module
//!
//! End-to-end tests for the harvesting engine against local mock servers:
//! - Fetch cascade ordering and budget
//! - URL discovery, caching and the empty-result path
//! - Run context state, dedup across runs and ingestion
//! - Error handling and recovery scenarios

pub mod discovery_test;
pub mod error_scenarios;
pub mod fetch_cascade;
pub mod fixtures;
pub mod pipeline_test;
