// Config loading and validation tests

use subnet_api::config::AppConfig;

const VALID_CONFIG: &str = r#"
[server]
port = 8081
host = "0.0.0.0"

[database]
path = "data/stats.db"
max_pool_size = 10

[rollup]
interval_secs = 60
retention_days = 30
vacuum_interval_secs = 86400
"#;

#[test]
fn test_config_loads_from_str() {
    let config = AppConfig::load_from_str(VALID_CONFIG).expect("load_from_str");
    assert_eq!(config.server.port, 8081);
    assert_eq!(config.server.host, "0.0.0.0");
    assert_eq!(config.database.path, "data/stats.db");
    assert_eq!(config.database.max_pool_size, 10);
    assert_eq!(config.rollup.interval_secs, 60);
    assert_eq!(config.rollup.retention_days, 30);
    assert!(config.rollup.vacuum_schedule.is_none());
}

#[test]
fn test_config_validation_rejects_invalid_port() {
    let bad = VALID_CONFIG.replace("port = 8081", "port = 0");
    let err = AppConfig::load_from_str(&bad).unwrap_err();
    assert!(err.to_string().contains("server.port"));
}

#[test]
fn test_config_validation_rejects_empty_db_path() {
    let bad = VALID_CONFIG.replace("path = \"data/stats.db\"", "path = \"\"");
    let err = AppConfig::load_from_str(&bad).unwrap_err();
    assert!(err.to_string().contains("database.path"));
}

#[test]
fn test_config_validation_rejects_max_pool_size_zero() {
    let bad = VALID_CONFIG.replace("max_pool_size = 10", "max_pool_size = 0");
    let err = AppConfig::load_from_str(&bad).unwrap_err();
    assert!(err.to_string().contains("max_pool_size"));
}

#[test]
fn test_config_validation_rejects_interval_zero() {
    let bad = VALID_CONFIG.replace("interval_secs = 60", "interval_secs = 0");
    let err = AppConfig::load_from_str(&bad).unwrap_err();
    assert!(err.to_string().contains("rollup.interval_secs"));
}

#[test]
fn test_config_validation_rejects_retention_days_zero() {
    let bad = VALID_CONFIG.replace("retention_days = 30", "retention_days = 0");
    let err = AppConfig::load_from_str(&bad).unwrap_err();
    assert!(err.to_string().contains("retention_days"));
}

#[test]
fn test_config_validation_rejects_vacuum_interval_zero() {
    let bad = VALID_CONFIG.replace("vacuum_interval_secs = 86400", "vacuum_interval_secs = 0");
    let err = AppConfig::load_from_str(&bad).unwrap_err();
    assert!(err.to_string().contains("vacuum_interval_secs"));
}

#[test]
fn test_config_validation_rejects_invalid_toml() {
    let err = AppConfig::load_from_str("not valid toml [[[").unwrap_err();
    assert!(!err.to_string().is_empty());
}

#[test]
fn test_config_defaults_when_omitted() {
    let minimal = r#"
[server]
port = 8081
host = "0.0.0.0"

[database]
path = "data/stats.db"
max_pool_size = 10

[rollup]
interval_secs = 60
"#;
    let config = AppConfig::load_from_str(minimal).expect("valid");
    assert_eq!(config.rollup.retention_days, 30);
    assert_eq!(config.rollup.vacuum_interval_secs, 86_400);
    assert!(config.rollup.vacuum_schedule.is_none());
}

#[test]
fn test_config_loads_vacuum_schedule() {
    let with_schedule = VALID_CONFIG.replace(
        "vacuum_interval_secs = 86400",
        "vacuum_schedule = \"0 0 3 * * *\"\nvacuum_interval_secs = 86400",
    );
    let config = AppConfig::load_from_str(&with_schedule).expect("valid");
    assert_eq!(config.rollup.vacuum_schedule.as_deref(), Some("0 0 3 * * *"));
}

#[test]
fn test_config_load_from_file_via_env() {
    let dir = tempfile::TempDir::new().unwrap();
    let path = dir.path().join("config.toml");
    std::fs::write(&path, VALID_CONFIG).unwrap();
    unsafe { std::env::set_var("CONFIG_FILE", path.to_str().unwrap()) };
    let result = AppConfig::load();
    unsafe { std::env::remove_var("CONFIG_FILE") };
    let config = result.expect("load from CONFIG_FILE");
    assert_eq!(config.server.port, 8081);
    assert_eq!(config.database.path, "data/stats.db");
}
