//! Wrapper launch commands and the dependency check.

use std::path::Path;

use queue_autopilot::config::CliConfig;
use queue_autopilot::orchestrator::dependency::{interpreter_version, check};
use queue_autopilot::orchestrator::spawner::{
    to_wsl_path, HostPlatform, LaunchSpec, SKIP_PERMISSIONS_FLAG,
};

#[test]
fn posix_launch_runs_interpreter_directly() {
    let spec = LaunchSpec::for_wrapper(
        "python3",
        Path::new("/opt/tools/claude_pty_wrapper.py"),
        true,
        "/work".into(),
        HostPlatform::Posix,
    );

    assert_eq!(spec.program, "python3");
    assert_eq!(
        spec.args,
        ["/opt/tools/claude_pty_wrapper.py", SKIP_PERMISSIONS_FLAG]
    );
    assert_eq!(spec.cwd, Path::new("/work"));
    assert!(spec
        .env
        .iter()
        .any(|(k, v)| k == "TERM" && v == "xterm-256color"));
    assert!(spec.env.iter().any(|(k, v)| k == "COLUMNS" && v == "120"));
    assert!(spec.env.iter().any(|(k, v)| k == "LINES" && v == "30"));
}

#[test]
fn skip_permissions_flag_is_optional() {
    let spec = LaunchSpec::for_wrapper(
        "python3",
        Path::new("wrapper.py"),
        false,
        "/work".into(),
        HostPlatform::Posix,
    );
    assert_eq!(spec.args, ["wrapper.py"]);
}

#[test]
fn windows_launch_goes_through_wsl() {
    let spec = LaunchSpec::for_wrapper(
        "python",
        Path::new(r"C:\Users\dev\wrapper.py"),
        true,
        r"C:\Users\dev".into(),
        HostPlatform::Windows,
    );

    assert_eq!(spec.program, "wsl");
    assert_eq!(
        spec.args,
        ["python3", "/mnt/c/Users/dev/wrapper.py", SKIP_PERMISSIONS_FLAG]
    );
}

#[test]
fn wsl_paths_translate_drive_letters() {
    assert_eq!(to_wsl_path(r"D:\work\repo"), "/mnt/d/work/repo");
    assert_eq!(to_wsl_path("c:/tmp"), "/mnt/c/tmp");
    assert_eq!(to_wsl_path("/already/posix"), "/already/posix");
    assert_eq!(to_wsl_path(r"relative\dir"), "relative/dir");
}

#[test]
fn parses_interpreter_versions() {
    assert_eq!(interpreter_version("Python 3.11.4"), Some((3, 11, 4)));
    assert_eq!(interpreter_version("Python 3.9.0\n"), Some((3, 9, 0)));
    assert_eq!(interpreter_version("python 2.7.18"), None);
    assert_eq!(interpreter_version("bash: python3: not found"), None);
}

#[tokio::test]
async fn check_reports_missing_cli_and_wrapper() {
    let temp = tempfile::tempdir().expect("tempdir");
    let cli = CliConfig {
        binary: "queue-autopilot-no-such-cli".into(),
        interpreter: "queue-autopilot-no-such-python".into(),
        wrapper_script: "absent.py".into(),
    };

    let report = check(&cli, &temp.path().join("absent.py"), HostPlatform::Posix).await;

    assert!(!report.all_available());
    assert!(!report.cli.available);
    assert!(report.cli.remedy.is_some());
    assert!(!report.wrapper.available);
    assert!(report
        .wrapper
        .error
        .as_deref()
        .is_some_and(|e| e.contains("not found")));
}

#[tokio::test]
async fn check_accepts_readable_wrapper() {
    let temp = tempfile::tempdir().expect("tempdir");
    let wrapper = temp.path().join("claude_pty_wrapper.py");
    std::fs::write(&wrapper, "print('hi')\n").expect("write wrapper");
    let cli = CliConfig {
        binary: "queue-autopilot-no-such-cli".into(),
        ..CliConfig::default()
    };

    let report = check(&cli, &wrapper, HostPlatform::Posix).await;

    assert!(report.wrapper.available);
    assert_eq!(
        report.wrapper.path.as_deref(),
        Some(wrapper.display().to_string().as_str())
    );
}
