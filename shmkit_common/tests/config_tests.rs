//! Configuration loader tests against files on disk.

use serde::Deserialize;
use shmkit_common::config::{ConfigError, ConfigLoader, LogLevel, SharedConfig};
use std::io::Write;
use std::path::Path;
use tempfile::NamedTempFile;

#[derive(Debug, Deserialize)]
struct ToolConfig {
    shared: SharedConfig,
    segment_count: usize,
}

#[test]
fn load_missing_file() {
    let result = ToolConfig::load(Path::new("/nonexistent/shmkit/config.toml"));
    assert!(matches!(result, Err(ConfigError::FileNotFound)));
}

#[test]
fn load_invalid_toml() {
    let mut file = NamedTempFile::new().unwrap();
    writeln!(file, "segment_count = [[[").unwrap();

    let result = ToolConfig::load(file.path());
    assert!(matches!(result, Err(ConfigError::ParseError(_))));
}

#[test]
fn load_full_file() {
    let mut file = NamedTempFile::new().unwrap();
    write!(
        file,
        r#"segment_count = 4

[shared]
log_level = "trace"
service_name = "sensor-bridge"
"#
    )
    .unwrap();
    file.flush().unwrap();

    let config = ToolConfig::load(file.path()).unwrap();
    assert_eq!(config.segment_count, 4);
    assert_eq!(config.shared.log_level, LogLevel::Trace);
    assert_eq!(config.shared.service_name, "sensor-bridge");
    assert!(config.shared.validate().is_ok());
}

#[test]
fn log_level_defaults_to_info() {
    let mut file = NamedTempFile::new().unwrap();
    write!(
        file,
        r#"segment_count = 1

[shared]
service_name = "defaults"
"#
    )
    .unwrap();
    file.flush().unwrap();

    let config = ToolConfig::load(file.path()).unwrap();
    assert_eq!(config.shared.log_level, LogLevel::Info);
}
