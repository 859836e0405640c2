//! Launch command for the PTY wrapper.
//!
//! The wrapper allocates a pseudo-terminal and runs the CLI inside it, so
//! it needs POSIX terminal APIs. On Windows the interpreter and wrapper are
//! rerouted through `wsl` with the wrapper path translated to its `/mnt`
//! form.

use std::path::{Path, PathBuf};

/// Flag asking the wrapper to skip the CLI's permission prompts.
pub const SKIP_PERMISSIONS_FLAG: &str = "--skip-permissions";

/// Terminal environment given to the wrapper.
pub const TERMINAL_ENV: &[(&str, &str)] = &[
    ("TERM", "xterm-256color"),
    ("COLUMNS", "120"),
    ("LINES", "30"),
];

/// Host family, which decides how the wrapper is launched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostPlatform {
    /// Linux, macOS and other POSIX hosts.
    Posix,
    /// Windows; the wrapper runs inside WSL.
    Windows,
}

impl HostPlatform {
    /// Platform of the running process.
    #[must_use]
    pub fn current() -> Self {
        if cfg!(windows) {
            Self::Windows
        } else {
            Self::Posix
        }
    }
}

/// Fully resolved command line for the wrapper process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchSpec {
    /// Program to execute.
    pub program: String,
    /// Arguments in order.
    pub args: Vec<String>,
    /// Working directory.
    pub cwd: PathBuf,
    /// Extra environment on top of the inherited one.
    pub env: Vec<(String, String)>,
}

impl LaunchSpec {
    /// Build the launch command for `interpreter wrapper [--skip-permissions]`.
    #[must_use]
    pub fn for_wrapper(
        interpreter: &str,
        wrapper: &Path,
        skip_permissions: bool,
        cwd: PathBuf,
        platform: HostPlatform,
    ) -> Self {
        let wrapper = wrapper.to_string_lossy();
        let (program, mut args) = match platform {
            HostPlatform::Posix => (interpreter.to_owned(), vec![wrapper.into_owned()]),
            HostPlatform::Windows => (
                "wsl".to_owned(),
                vec!["python3".to_owned(), to_wsl_path(&wrapper)],
            ),
        };
        if skip_permissions {
            args.push(SKIP_PERMISSIONS_FLAG.to_owned());
        }
        Self {
            program,
            args,
            cwd,
            env: TERMINAL_ENV
                .iter()
                .map(|(k, v)| ((*k).to_owned(), (*v).to_owned()))
                .collect(),
        }
    }
}

/// Translate a Windows path into its WSL mount form.
///
/// `C:\work\wrapper.py` becomes `/mnt/c/work/wrapper.py`.
#[must_use]
pub fn to_wsl_path(path: &str) -> String {
    let mut chars = path.chars();
    let converted = match (chars.next(), chars.next()) {
        (Some(drive), Some(':')) if drive.is_ascii_alphabetic() => {
            format!("/mnt/{}{}", drive.to_ascii_lowercase(), chars.as_str())
        }
        _ => path.to_owned(),
    };
    converted.replace('\\', "/")
}
