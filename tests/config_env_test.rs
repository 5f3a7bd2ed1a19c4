use file_events::Settings;
use std::env;
use tempfile::TempDir;

// Environment variables are process-wide, so every override case lives in
// this one test.
#[test]
fn test_env_override_with_nested_keys() {
    let temp_dir = TempDir::new().unwrap();
    let config_path = temp_dir.path().join("settings.toml");
    std::fs::write(
        &config_path,
        r#"
[watcher]
start_timeout_ms = 2000
event_queue_capacity = 64
"#,
    )
    .unwrap();

    unsafe {
        // Double underscore separates nested levels
        env::set_var("FILE_EVENTS_WATCHER__START_TIMEOUT_MS", "1234");
        env::set_var("FILE_EVENTS_WATCHER__RECURSIVE", "true");
        env::set_var("FILE_EVENTS_LOGGING__DEFAULT", "debug");
    }

    let settings = Settings::load_from(&config_path).unwrap();

    unsafe {
        env::remove_var("FILE_EVENTS_WATCHER__START_TIMEOUT_MS");
        env::remove_var("FILE_EVENTS_WATCHER__RECURSIVE");
        env::remove_var("FILE_EVENTS_LOGGING__DEFAULT");
    }

    // Env beats the file
    assert_eq!(settings.watcher.start_timeout_ms, 1234);
    assert!(settings.watcher.recursive);
    assert_eq!(settings.logging.default, "debug");

    // File beats the defaults
    assert_eq!(settings.watcher.event_queue_capacity, 64);
    assert_eq!(
        settings.watcher.termination_timeout_ms,
        Settings::default().watcher.termination_timeout_ms
    );
}
