//! Pre-flight check of the programs a session needs.
//!
//! Each check runs a short-lived subprocess with a five second timeout.
//! Failures never abort the check; they are collected into a
//! [`DependencyReport`] that the orchestrator publishes before refusing to
//! start.

use std::path::Path;
use std::process::Stdio;
use std::sync::LazyLock;
use std::time::Duration;

use regex::Regex;
use tokio::process::Command;
use tracing::{debug, info_span, Instrument};

use crate::config::CliConfig;
use crate::models::{DependencyReport, DependencyStatus};

use super::spawner::HostPlatform;

/// Upper bound on each check subprocess.
pub const CHECK_TIMEOUT: Duration = Duration::from_secs(5);

/// Oldest interpreter release the wrapper supports.
pub const MIN_INTERPRETER: (u32, u32) = (3, 9);

static PYTHON_VERSION: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"Python (\d+)\.(\d+)\.(\d+)").ok());

/// Check the CLI, the interpreter and the wrapper script.
///
/// `wrapper` must already be resolved against the workspace root.
pub async fn check(cli: &CliConfig, wrapper: &Path, platform: HostPlatform) -> DependencyReport {
    async move {
        let (cli_status, interpreter) = tokio::join!(
            check_cli(&cli.binary, platform),
            check_interpreter(&cli.interpreter, platform)
        );
        let report = DependencyReport {
            cli: cli_status,
            interpreter,
            wrapper: check_wrapper(wrapper),
        };
        debug!(available = report.all_available(), "dependency check finished");
        report
    }
    .instrument(info_span!("dependency_check"))
    .await
}

async fn check_cli(binary: &str, platform: HostPlatform) -> DependencyStatus {
    let remedy = match platform {
        HostPlatform::Posix => format!("install the {binary} CLI and make sure it is on PATH"),
        HostPlatform::Windows => {
            format!("install WSL (`wsl --install`) and then the {binary} CLI inside it")
        }
    };

    if platform == HostPlatform::Windows {
        if let Err(err) = run_version("wsl", &["--status"]).await {
            return DependencyStatus::missing(format!("WSL is not available: {err}"), remedy);
        }
    }

    let (program, args) = wrap_for_host(binary, &["--version"], platform);
    match run_version(&program, &args).await {
        Ok(version) if !version.is_empty() => {
            DependencyStatus::found(Some(version), Some(display_path(binary, platform)))
        }
        Ok(_) => DependencyStatus::missing(format!("{binary} --version printed nothing"), remedy),
        Err(err) => DependencyStatus::missing(err, remedy),
    }
}

async fn check_interpreter(configured: &str, platform: HostPlatform) -> DependencyStatus {
    let mut candidates: Vec<&str> = vec![configured];
    for fallback in ["python3", "python"] {
        if !candidates.contains(&fallback) {
            candidates.push(fallback);
        }
    }

    let mut last_error = String::from("no interpreter found");
    for candidate in candidates {
        let (program, args) = wrap_for_host(candidate, &["--version"], platform);
        match run_version(&program, &args).await {
            Ok(output) => match interpreter_version(&output) {
                Some((major, minor, patch)) if (major, minor) >= MIN_INTERPRETER => {
                    return DependencyStatus::found(
                        Some(format!("{major}.{minor}.{patch}")),
                        Some(display_path(candidate, platform)),
                    );
                }
                Some((major, minor, patch)) => {
                    last_error = format!(
                        "{candidate} is version {major}.{minor}.{patch}, need {}.{} or newer",
                        MIN_INTERPRETER.0, MIN_INTERPRETER.1
                    );
                }
                None => last_error = format!("{candidate} reported an unknown version: {output}"),
            },
            Err(err) => last_error = err,
        }
    }

    DependencyStatus::missing(
        last_error,
        format!(
            "install Python {}.{} or newer",
            MIN_INTERPRETER.0, MIN_INTERPRETER.1
        ),
    )
}

fn check_wrapper(wrapper: &Path) -> DependencyStatus {
    let remedy = "point cli.wrapper_script at the PTY wrapper shipped with this tool";
    if !wrapper.is_file() {
        return DependencyStatus::missing(
            format!("PTY wrapper not found at {}", wrapper.display()),
            remedy,
        );
    }
    match std::fs::File::open(wrapper) {
        Ok(_) => DependencyStatus::found(
            Some("ready".to_owned()),
            Some(wrapper.display().to_string()),
        ),
        Err(err) => DependencyStatus::missing(
            format!("PTY wrapper exists but is not readable: {err}"),
            "check the file permissions of the PTY wrapper",
        ),
    }
}

/// Parse `Python X.Y.Z` out of an interpreter's version banner.
#[must_use]
pub fn interpreter_version(output: &str) -> Option<(u32, u32, u32)> {
    let caps = PYTHON_VERSION.as_ref()?.captures(output)?;
    let part = |i: usize| caps.get(i).and_then(|m| m.as_str().parse().ok());
    Some((part(1)?, part(2)?, part(3)?))
}

fn wrap_for_host(program: &str, args: &[&str], platform: HostPlatform) -> (String, Vec<String>) {
    let args = args.iter().map(|a| (*a).to_owned());
    match platform {
        HostPlatform::Posix => (program.to_owned(), args.collect()),
        HostPlatform::Windows => (
            "wsl".to_owned(),
            std::iter::once(program.to_owned()).chain(args).collect(),
        ),
    }
}

fn display_path(program: &str, platform: HostPlatform) -> String {
    match platform {
        HostPlatform::Posix => program.to_owned(),
        HostPlatform::Windows => format!("{program} (via WSL)"),
    }
}

/// Run `program args` and return its trimmed output.
///
/// Stdout is preferred; some interpreters print their version on stderr.
async fn run_version<S: AsRef<str>>(program: &str, args: &[S]) -> Result<String, String> {
    let mut cmd = Command::new(program);
    cmd.args(args.iter().map(AsRef::as_ref))
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let output = match tokio::time::timeout(CHECK_TIMEOUT, cmd.output()).await {
        Ok(Ok(output)) => output,
        Ok(Err(err)) => return Err(format!("failed to run {program}: {err}")),
        Err(_elapsed) => {
            return Err(format!(
                "{program} did not answer within {}s",
                CHECK_TIMEOUT.as_secs()
            ))
        }
    };

    let stdout = String::from_utf8_lossy(&output.stdout).trim().to_owned();
    let stderr = String::from_utf8_lossy(&output.stderr).trim().to_owned();
    if !output.status.success() {
        return Err(if stderr.is_empty() {
            format!("{program} exited with {}", output.status)
        } else {
            stderr
        });
    }
    Ok(if stdout.is_empty() { stderr } else { stdout })
}
