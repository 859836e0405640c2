//! Configuration parsing, defaults and validation.

use queue_autopilot::config::{parse_hh_mm, SleepMethod};
use queue_autopilot::{AppError, GlobalConfig};

fn sample_toml(workspace: &str) -> String {
    format!(
        r#"
[queue]
max_size = 200
max_message_size = 5000
max_output_size = 8000
max_error_size = 1000
cleanup_threshold = 150
retention_hours = 12

[session]
auto_start = false
skip_permissions = false
scheduled_start_time = "07:30"
workspace_root = '{workspace}'

[cli]
binary = "claude"
interpreter = "python3"
wrapper_script = "tools/claude_pty_wrapper.py"

[sleep_prevention]
enabled = true
method = "systemd-inhibit"

[history]
max_runs = 5
auto_save = false
persist_pending_queue = true

[remote]
webhook_url = "https://hooks.example.com/queue"
timeout_seconds = 3
"#
    )
}

#[test]
fn parses_valid_config() {
    let temp = tempfile::tempdir().expect("tempdir");
    let toml = sample_toml(temp.path().to_str().expect("utf8 path"));

    let config = GlobalConfig::from_toml_str(&toml).expect("config parses");

    assert_eq!(config.queue.max_size, 200);
    assert_eq!(config.queue.retention_hours, 12);
    assert!(!config.session.skip_permissions);
    assert_eq!(config.scheduled_start(), Some((7, 30)));
    assert_eq!(config.sleep_prevention.method, SleepMethod::SystemdInhibit);
    assert_eq!(config.history.max_runs, 5);
    assert!(!config.history.auto_save);
    assert_eq!(
        config.remote.webhook_url.as_deref(),
        Some("https://hooks.example.com/queue")
    );

    let expected_root = temp.path().canonicalize().expect("canonicalize temp path");
    assert_eq!(config.workspace_root().expect("root"), expected_root);
}

#[test]
fn empty_config_uses_defaults() {
    let config = GlobalConfig::from_toml_str("").expect("empty config parses");

    assert_eq!(config.queue.max_size, 1000);
    assert_eq!(config.queue.max_message_size, 50_000);
    assert_eq!(config.queue.max_output_size, 100_000);
    assert_eq!(config.queue.max_error_size, 10_000);
    assert_eq!(config.queue.cleanup_threshold, 500);
    assert_eq!(config.queue.retention_hours, 24);
    assert!(!config.session.auto_start);
    assert!(config.session.skip_permissions);
    assert!(config.scheduled_start().is_none());
    assert_eq!(config.cli.binary, "claude");
    assert_eq!(config.cli.interpreter, "python3");
    assert!(config.sleep_prevention.enabled);
    assert_eq!(config.sleep_prevention.method, SleepMethod::Auto);
    assert_eq!(config.history.max_runs, 20);
    assert!(config.remote.webhook_url.is_none());
    assert_eq!(config.remote.timeout_seconds, 5);
}

#[test]
fn rejects_queue_size_out_of_range() {
    let result = GlobalConfig::from_toml_str("[queue]\nmax_size = 5\n");
    assert!(matches!(result, Err(AppError::Config(msg)) if msg.contains("max_size")));

    let result = GlobalConfig::from_toml_str("[queue]\nmax_size = 20000\n");
    assert!(matches!(result, Err(AppError::Config(_))));
}

#[test]
fn rejects_tiny_field_caps() {
    let result = GlobalConfig::from_toml_str("[queue]\nmax_error_size = 50\n");
    assert!(matches!(result, Err(AppError::Config(msg)) if msg.contains("max_error_size")));
}

#[test]
fn rejects_cleanup_threshold_above_max_size() {
    let result =
        GlobalConfig::from_toml_str("[queue]\nmax_size = 100\ncleanup_threshold = 500\n");
    assert!(matches!(result, Err(AppError::Config(msg)) if msg.contains("cleanup_threshold")));
}

#[test]
fn rejects_bad_retention_and_history_limits() {
    assert!(GlobalConfig::from_toml_str("[queue]\nretention_hours = 0\n").is_err());
    assert!(GlobalConfig::from_toml_str("[queue]\nretention_hours = 200\n").is_err());
    assert!(GlobalConfig::from_toml_str("[history]\nmax_runs = 0\n").is_err());
    assert!(GlobalConfig::from_toml_str("[history]\nmax_runs = 101\n").is_err());
}

#[test]
fn rejects_malformed_scheduled_start() {
    let result = GlobalConfig::from_toml_str("[session]\nscheduled_start_time = \"7am\"\n");
    assert!(
        matches!(result, Err(AppError::Config(msg)) if msg.contains("scheduled_start_time"))
    );
}

#[test]
fn auto_start_with_schedule_is_accepted() {
    let config = GlobalConfig::from_toml_str(
        "[session]\nauto_start = true\nscheduled_start_time = \"09:00\"\n",
    )
    .expect("conflict only warns");
    assert!(config.session.auto_start);
}

#[test]
fn rejects_missing_workspace_root() {
    let result = GlobalConfig::from_toml_str(
        "[session]\nworkspace_root = '/definitely/not/a/real/workspace'\n",
    );
    assert!(matches!(result, Err(AppError::Config(msg)) if msg.contains("workspace_root")));
}

#[test]
fn rejects_non_http_webhook() {
    let result = GlobalConfig::from_toml_str("[remote]\nwebhook_url = \"ftp://example.com\"\n");
    assert!(matches!(result, Err(AppError::Config(msg)) if msg.contains("webhook_url")));
}

#[test]
fn rejects_invalid_field_type() {
    let result = GlobalConfig::from_toml_str("[queue]\nmax_size = \"lots\"\n");
    assert!(matches!(result, Err(AppError::Config(msg)) if msg.contains("invalid config")));
}

#[test]
fn loads_from_path() {
    let temp = tempfile::tempdir().expect("tempdir");
    let path = temp.path().join("config.toml");
    std::fs::write(&path, "[history]\nmax_runs = 3\n").expect("write config");

    let config = GlobalConfig::load_from_path(&path).expect("config loads");
    assert_eq!(config.history.max_runs, 3);

    let missing = GlobalConfig::load_from_path(temp.path().join("absent.toml"));
    assert!(matches!(missing, Err(AppError::Config(msg)) if msg.contains("failed to read")));
}

#[test]
fn parses_hh_mm() {
    assert_eq!(parse_hh_mm("07:05"), Some((7, 5)));
    assert_eq!(parse_hh_mm("7:05"), Some((7, 5)));
    assert_eq!(parse_hh_mm(" 23:59 "), Some((23, 59)));
    assert_eq!(parse_hh_mm("24:00"), None);
    assert_eq!(parse_hh_mm("12:60"), None);
    assert_eq!(parse_hh_mm("12:5"), None);
    assert_eq!(parse_hh_mm("noon"), None);
    assert_eq!(parse_hh_mm(""), None);
}
