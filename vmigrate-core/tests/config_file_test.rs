use serial_test::serial;
use std::io::Write;
use std::time::Duration;
use tempfile::NamedTempFile;

use vmigrate_core::config::{LogFormat, VmigrateConfig};
use vmigrate_core::VmigrateError;

const ENV_KEYS: &[&str] = &[
    "VMIGRATE_MAX_CONCURRENCY",
    "VMIGRATE_RELOCATE_TIMEOUT_SECS",
    "VMIGRATE_PROGRESS_INTERVAL_SECS",
    "VMIGRATE_LOG_LEVEL",
    "VMIGRATE_LOG_FORMAT",
    "VMIGRATE_PROVIDER",
    "VMIGRATE_INVENTORY",
];

fn clear_env() {
    for key in ENV_KEYS {
        std::env::remove_var(key);
    }
}

fn write_toml(contents: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    file.write_all(contents.as_bytes()).unwrap();
    file
}

#[test]
#[serial]
fn test_load_from_toml() {
    clear_env();
    let file = write_toml(
        r#"
[scheduler]
max_concurrency = 6
relocate_timeout = "20m"
progress_interval = "5s"

[placement]
datastore_space_buffer = 1.5

[network]
fallback_markers = ["mgmt"]

[logging]
level = "debug"
format = "json"

[provider]
kind = "memory"
inventory = "/tmp/inventory.yaml"
"#,
    );

    let config = VmigrateConfig::from_file(file.path()).unwrap();
    assert_eq!(config.scheduler.max_concurrency, 6);
    assert_eq!(config.scheduler.relocate_timeout, Duration::from_secs(1_200));
    assert_eq!(config.scheduler.progress_interval, Duration::from_secs(5));
    assert_eq!(config.placement.datastore_space_buffer, 1.5);
    assert_eq!(config.network.fallback_markers, vec!["mgmt"]);
    assert_eq!(config.logging.format, LogFormat::Json);
    assert_eq!(
        config.provider.inventory.as_deref(),
        Some(std::path::Path::new("/tmp/inventory.yaml"))
    );
}

#[test]
#[serial]
fn test_partial_toml_keeps_defaults() {
    clear_env();
    let file = write_toml("[scheduler]\nmax_concurrency = 1\n");

    let config = VmigrateConfig::from_file(file.path()).unwrap();
    assert_eq!(config.scheduler.max_concurrency, 1);
    assert_eq!(config.scheduler.relocate_timeout, Duration::from_secs(600));
    assert_eq!(config.scheduler.progress_interval, Duration::from_secs(15));
    assert_eq!(config.placement.datastore_space_buffer, 1.2);
}

#[test]
#[serial]
fn test_env_overrides_file() {
    clear_env();
    let file = write_toml("[scheduler]\nmax_concurrency = 4\n");
    std::env::set_var("VMIGRATE_MAX_CONCURRENCY", "8");
    std::env::set_var("VMIGRATE_RELOCATE_TIMEOUT_SECS", "90");
    std::env::set_var("VMIGRATE_LOG_LEVEL", "warn");

    let config = VmigrateConfig::from_file(file.path()).unwrap();
    clear_env();

    assert_eq!(config.scheduler.max_concurrency, 8);
    assert_eq!(config.scheduler.relocate_timeout, Duration::from_secs(90));
    assert_eq!(config.logging.level, "warn");
}

#[test]
#[serial]
fn test_out_of_range_concurrency_is_rejected() {
    clear_env();
    let file = write_toml("[scheduler]\nmax_concurrency = 9\n");
    let err = VmigrateConfig::from_file(file.path()).unwrap_err();
    assert!(matches!(err, VmigrateError::ConfigError(_)));
    assert!(err.is_fatal());

    std::env::set_var("VMIGRATE_MAX_CONCURRENCY", "lots");
    let err = VmigrateConfig::from_env().unwrap_err();
    clear_env();
    assert!(err.to_string().contains("VMIGRATE_MAX_CONCURRENCY"));
}

#[test]
#[serial]
fn test_malformed_toml_is_reported() {
    clear_env();
    let file = write_toml("[scheduler\nmax_concurrency = ");
    assert!(VmigrateConfig::from_file(file.path()).is_err());
    assert!(VmigrateConfig::from_file("/nonexistent/vmigrate.toml").is_err());
}

#[test]
#[serial]
fn test_invalid_duration_env_is_rejected() {
    clear_env();
    for key in ["VMIGRATE_RELOCATE_TIMEOUT_SECS", "VMIGRATE_PROGRESS_INTERVAL_SECS"] {
        std::env::set_var(key, "ten");
        let err = VmigrateConfig::from_env().unwrap_err();
        clear_env();
        assert!(matches!(err, VmigrateError::ConfigError(_)));
        assert!(err.to_string().contains(key), "{}", err);
    }
}
