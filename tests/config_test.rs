//! Tests for config loading

use jobharvest::config::Config;
use serial_test::serial;
use std::path::Path;
use tempfile::TempDir;

#[test]
#[serial]
fn test_config_file_exists() {
    let config_path = Path::new("config.toml");
    assert!(config_path.exists(), "config.toml should exist in project root");
}

#[test]
#[serial]
fn test_shipped_config_is_valid() {
    let config = Config::from_file(Path::new("config.toml")).expect("config.toml should parse");
    config.validate().expect("config.toml should validate");

    assert_eq!(config.crawler.attempt_budget, 8);
    assert_eq!(config.rate_limit.generic.min_interval_ms, 3000);
    assert!(config.discovery.persist_cache);
    assert_eq!(config.run.state_dir, Path::new(".cache"));
}

#[test]
#[serial]
fn test_environment_overrides_file() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("harvest.toml");
    std::fs::write(&path, "[crawler]\nworkers = 2\n\n[run]\nstate_dir = \"/tmp/from-file\"\n").unwrap();

    std::env::set_var("HARVEST_WORKERS", "7");
    std::env::set_var("INGEST_SECRET", "from-env");
    std::env::set_var("TEST_MODE", "true");

    let config = Config::from_file(&path);

    std::env::remove_var("HARVEST_WORKERS");
    std::env::remove_var("INGEST_SECRET");
    std::env::remove_var("TEST_MODE");

    let config = config.unwrap();
    assert_eq!(config.crawler.workers, 7);
    assert_eq!(config.ingest.secret.as_deref(), Some("from-env"));
    assert_eq!(config.run.state_dir, Path::new("/tmp/from-file"));
    assert!(config.run.test_mode);
    assert_eq!(config.effective_max_candidates(), 5);
    assert_eq!(config.require_ingest_secret().unwrap(), "from-env");
}

#[test]
#[serial]
fn test_fractional_slot_override_is_floored() {
    std::env::set_var("RUN_SLOT_OVERRIDE", "2.7");
    let config = Config::from_env();
    std::env::remove_var("RUN_SLOT_OVERRIDE");

    assert_eq!(config.unwrap().run.run_slot_override, Some(2));
}

#[test]
#[serial]
fn test_invalid_toml_is_an_error() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("broken.toml");
    std::fs::write(&path, "[crawler\nworkers = ").unwrap();

    let err = Config::from_file(&path).unwrap_err();
    assert!(format!("{err:#}").contains("Failed to parse TOML"));
}
