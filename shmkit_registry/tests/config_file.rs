//! Building a manager from a configuration file

use shmkit_registry::{ElementType, ShmError, ShmManager, ShmResult};
use std::io::Write;
use tempfile::NamedTempFile;

fn write_config(content: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    file.write_all(content.as_bytes()).unwrap();
    file
}

#[test]
fn test_manager_uses_file_limits() -> ShmResult<()> {
    let file = write_config(
        r#"
        [shared]
        service_name = "config-test"

        [registry]
        default_permissions = "600"
        max_element_count = 16
        cleanup_on_exit = false
        "#,
    );
    let manager = ShmManager::from_config_file(file.path())?;
    assert_eq!(manager.config().permissions(), 0o600);

    let err = manager
        .create_posix("/shmkit-config-limit", 17, ElementType::Uint8, None)
        .unwrap_err();
    assert!(err.is_range_error());
    Ok(())
}

#[test]
fn test_invalid_file_is_rejected() {
    let file = write_config("[registry]\nkey_attempts = 0\n");
    assert!(matches!(
        ShmManager::from_config_file(file.path()),
        Err(ShmError::Config { .. })
    ));

    let missing = std::path::Path::new("/nonexistent/shmkit.toml");
    assert!(ShmManager::from_config_file(missing).is_err());
}
