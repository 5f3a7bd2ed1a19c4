use std::process::Command;
use tempfile::TempDir;

fn file_events() -> Command {
    Command::new(env!("CARGO_BIN_EXE_file-events"))
}

#[test]
fn test_init_command() {
    let temp_dir = TempDir::new().unwrap();
    let temp_path = temp_dir.path();

    let output = file_events()
        .current_dir(temp_path)
        .arg("init")
        .output()
        .expect("Failed to run init command");

    assert!(output.status.success());

    let config_path = temp_path.join(".file-events/settings.toml");
    assert!(config_path.exists());

    let content = std::fs::read_to_string(&config_path).unwrap();
    assert!(content.contains("version = 1"));
    assert!(content.contains("[watcher]"));
    assert!(content.contains("start_timeout_ms = 5000"));

    // Second run refuses to overwrite
    let output = file_events()
        .current_dir(temp_path)
        .arg("init")
        .output()
        .unwrap();
    assert!(!output.status.success());
}

#[test]
fn test_config_command() {
    let temp_dir = TempDir::new().unwrap();
    let temp_path = temp_dir.path();

    let config_dir = temp_path.join(".file-events");
    std::fs::create_dir_all(&config_dir).unwrap();
    std::fs::write(
        config_dir.join("settings.toml"),
        r#"
version = 2
[watcher]
event_queue_capacity = 99
"#,
    )
    .unwrap();

    let output = file_events()
        .current_dir(temp_path)
        .arg("config")
        .output()
        .expect("Failed to run config command");

    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("version = 2"));
    assert!(stdout.contains("event_queue_capacity = 99"));
}

#[test]
fn test_platform_command() {
    let output = file_events().arg("platform").output().unwrap();

    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains(&format!(
        "Protocol version: {}",
        env!("CARGO_PKG_VERSION")
    )));
}

#[cfg(target_os = "linux")]
#[test]
fn test_watch_command_ends_with_terminated() {
    let temp_dir = TempDir::new().unwrap();

    let output = file_events()
        .current_dir(temp_dir.path())
        .args(["watch", ".", "--timeout", "1", "--json"])
        .output()
        .unwrap();

    assert!(
        output.status.success(),
        "{}",
        String::from_utf8_lossy(&output.stderr)
    );
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert_eq!(stdout.lines().last(), Some(r#"{"event":"terminated"}"#));
}
