//! Global configuration parsing and validation.

use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use tracing::warn;

use crate::{AppError, Result};

/// Smallest truncation cap accepted; the marker plus kept prefix must fit.
pub const MIN_FIELD_CAP: usize = 200;

/// Queue size caps and retention.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct QueueConfig {
    /// Maximum number of items kept in the queue.
    #[serde(default = "default_max_size")]
    pub max_size: usize,
    /// Maximum characters stored for a message text.
    #[serde(default = "default_max_message_size")]
    pub max_message_size: usize,
    /// Maximum characters stored for captured output.
    #[serde(default = "default_max_output_size")]
    pub max_output_size: usize,
    /// Maximum characters stored for an error description.
    #[serde(default = "default_max_error_size")]
    pub max_error_size: usize,
    /// Queue length above which maintenance logs a warning.
    #[serde(default = "default_cleanup_threshold")]
    pub cleanup_threshold: usize,
    /// Hours a completed item is retained before maintenance drops it.
    #[serde(default = "default_retention_hours")]
    pub retention_hours: u32,
}

fn default_max_size() -> usize {
    1000
}

fn default_max_message_size() -> usize {
    50_000
}

fn default_max_output_size() -> usize {
    100_000
}

fn default_max_error_size() -> usize {
    10_000
}

fn default_cleanup_threshold() -> usize {
    500
}

fn default_retention_hours() -> u32 {
    24
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_size: default_max_size(),
            max_message_size: default_max_message_size(),
            max_output_size: default_max_output_size(),
            max_error_size: default_max_error_size(),
            cleanup_threshold: default_cleanup_threshold(),
            retention_hours: default_retention_hours(),
        }
    }
}

/// Session launch behavior.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct SessionConfig {
    /// Start the CLI session as soon as the binary boots.
    #[serde(default)]
    pub auto_start: bool,
    /// Pass `--skip-permissions` to the wrapper.
    #[serde(default = "default_true")]
    pub skip_permissions: bool,
    /// Daily `HH:MM` start time; empty disables the schedule.
    #[serde(default)]
    pub scheduled_start_time: String,
    /// Working directory of the CLI. Falls back to the process cwd.
    #[serde(default)]
    pub workspace_root: Option<PathBuf>,
}

fn default_true() -> bool {
    true
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            auto_start: false,
            skip_permissions: true,
            scheduled_start_time: String::new(),
            workspace_root: None,
        }
    }
}

/// Locations of the external programs the session depends on.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct CliConfig {
    /// AI coding CLI binary checked with `--version`.
    #[serde(default = "default_cli_binary")]
    pub binary: String,
    /// Interpreter that runs the PTY wrapper script.
    #[serde(default = "default_interpreter")]
    pub interpreter: String,
    /// PTY wrapper script path.
    #[serde(default = "default_wrapper_script")]
    pub wrapper_script: PathBuf,
}

fn default_cli_binary() -> String {
    "claude".into()
}

fn default_interpreter() -> String {
    "python3".into()
}

fn default_wrapper_script() -> PathBuf {
    PathBuf::from("claude_pty_wrapper.py")
}

impl Default for CliConfig {
    fn default() -> Self {
        Self {
            binary: default_cli_binary(),
            interpreter: default_interpreter(),
            wrapper_script: default_wrapper_script(),
        }
    }
}

/// Helper program used to keep the host awake.
#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "kebab-case")]
pub enum SleepMethod {
    /// Pick the helper for the current platform.
    #[default]
    Auto,
    /// macOS `caffeinate`.
    Caffeinate,
    /// Windows keep-alive loop.
    Powershell,
    /// Linux `systemd-inhibit`.
    SystemdInhibit,
}

/// Sleep prevention while the session is ready.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct SleepPreventionConfig {
    /// Whether the sleep guard runs at all.
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Helper selection.
    #[serde(default)]
    pub method: SleepMethod,
}

impl Default for SleepPreventionConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            method: SleepMethod::Auto,
        }
    }
}

/// Run history retention.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct HistoryConfig {
    /// Maximum runs kept per workspace.
    #[serde(default = "default_max_runs")]
    pub max_runs: usize,
    /// Persist history runs as they change.
    #[serde(default = "default_true")]
    pub auto_save: bool,
    /// Persist and recover the pending-queue snapshot.
    #[serde(default = "default_true")]
    pub persist_pending_queue: bool,
}

fn default_max_runs() -> usize {
    20
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            max_runs: default_max_runs(),
            auto_save: true,
            persist_pending_queue: true,
        }
    }
}

/// Optional webhook that receives queue and status snapshots.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub struct RemoteConfig {
    /// Target URL; notifications are disabled when unset.
    #[serde(default)]
    pub webhook_url: Option<String>,
    /// Request timeout in seconds.
    #[serde(default = "default_remote_timeout")]
    pub timeout_seconds: u64,
}

fn default_remote_timeout() -> u64 {
    5
}

/// Global configuration parsed from `config.toml`.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub struct GlobalConfig {
    /// Queue limits.
    #[serde(default)]
    pub queue: QueueConfig,
    /// Session launch behavior.
    #[serde(default)]
    pub session: SessionConfig,
    /// External program locations.
    #[serde(default)]
    pub cli: CliConfig,
    /// Sleep prevention settings.
    #[serde(default)]
    pub sleep_prevention: SleepPreventionConfig,
    /// Run history settings.
    #[serde(default)]
    pub history: HistoryConfig,
    /// Remote notification settings.
    #[serde(default)]
    pub remote: RemoteConfig,
}

impl GlobalConfig {
    /// Load and validate configuration from a TOML file path.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if the file cannot be read or contains
    /// invalid TOML, or if validation fails.
    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .map_err(|err| AppError::Config(format!("failed to read config: {err}")))?;
        Self::from_toml_str(&raw)
    }

    /// Parse configuration from a TOML string and validate it.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if parsing or validation fails.
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let mut config: Self = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Directory the CLI runs in: the configured root or the process cwd.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Io` if neither is available.
    pub fn workspace_root(&self) -> Result<PathBuf> {
        match &self.session.workspace_root {
            Some(root) => Ok(root.clone()),
            None => Ok(std::env::current_dir()?),
        }
    }

    /// Key under which history and the pending queue are persisted.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Io` if the workspace root cannot be resolved.
    pub fn workspace_key(&self) -> Result<String> {
        Ok(self.workspace_root()?.to_string_lossy().into_owned())
    }

    /// Parsed `(hour, minute)` of the scheduled start, if one is configured.
    #[must_use]
    pub fn scheduled_start(&self) -> Option<(u32, u32)> {
        parse_hh_mm(&self.session.scheduled_start_time)
    }

    /// Apply all validation rules, canonicalizing the workspace root.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` describing the first violated rule.
    pub fn validate(&mut self) -> Result<()> {
        let q = &self.queue;
        if !(10..=10_000).contains(&q.max_size) {
            return Err(AppError::Config(
                "queue.max_size must be between 10 and 10000".into(),
            ));
        }
        for (name, cap) in [
            ("queue.max_message_size", q.max_message_size),
            ("queue.max_output_size", q.max_output_size),
            ("queue.max_error_size", q.max_error_size),
        ] {
            if cap < MIN_FIELD_CAP {
                return Err(AppError::Config(format!(
                    "{name} must be at least {MIN_FIELD_CAP}"
                )));
            }
        }
        if q.cleanup_threshold == 0 || q.cleanup_threshold > q.max_size {
            return Err(AppError::Config(
                "queue.cleanup_threshold must be between 1 and queue.max_size".into(),
            ));
        }
        if !(1..=168).contains(&q.retention_hours) {
            return Err(AppError::Config(
                "queue.retention_hours must be between 1 and 168".into(),
            ));
        }

        if !(1..=100).contains(&self.history.max_runs) {
            return Err(AppError::Config(
                "history.max_runs must be between 1 and 100".into(),
            ));
        }

        let start = self.session.scheduled_start_time.trim();
        if !start.is_empty() && parse_hh_mm(start).is_none() {
            return Err(AppError::Config(format!(
                "session.scheduled_start_time must be HH:MM, got {start:?}"
            )));
        }
        if self.session.auto_start && !start.is_empty() {
            warn!("auto_start is enabled; scheduled_start_time will be ignored");
        }

        if let Some(root) = &self.session.workspace_root {
            let canonical = root
                .canonicalize()
                .map_err(|err| AppError::Config(format!("workspace_root invalid: {err}")))?;
            self.session.workspace_root = Some(canonical);
        }

        if let Some(url) = &self.remote.webhook_url {
            if !(url.starts_with("http://") || url.starts_with("https://")) {
                return Err(AppError::Config(
                    "remote.webhook_url must be an http(s) URL".into(),
                ));
            }
        }

        Ok(())
    }
}

/// Parse a 24-hour `HH:MM` string (`H:MM` allowed).
#[must_use]
pub fn parse_hh_mm(raw: &str) -> Option<(u32, u32)> {
    let (h, m) = raw.trim().split_once(':')?;
    if h.is_empty() || h.len() > 2 || m.len() != 2 {
        return None;
    }
    if !h.bytes().chain(m.bytes()).all(|b| b.is_ascii_digit()) {
        return None;
    }
    let hour: u32 = h.parse().ok()?;
    let minute: u32 = m.parse().ok()?;
    (hour <= 23 && minute <= 59).then_some((hour, minute))
}
