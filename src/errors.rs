//! Error types shared across the application.

use std::fmt::{Display, Formatter};

/// Shared application result type.
pub type Result<T> = std::result::Result<T, AppError>;

/// Application error enumeration covering all domain failure modes.
///
/// A usage limit reported by the CLI is not an error: it is a normal
/// scheduling outcome handled by [`crate::usage`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AppError {
    /// Configuration parsing or validation failure.
    Config(String),
    /// Persistence failure when interacting with `SQLite`.
    Db(String),
    /// File-system or I/O operation failure.
    Io(String),
    /// Requested entity does not exist.
    NotFound(String),
    /// Caller supplied an argument the operation cannot accept.
    InvalidInput(String),
    /// One of the CLI binary, interpreter or wrapper script is missing.
    DependencyUnavailable(String),
    /// The OS refused to launch the wrapper process.
    Spawn(String),
    /// Writing a message to the subprocess failed.
    Transmission(String),
    /// No subprocess is attached to the session.
    ProcessUnavailable(String),
    /// The CLI did not become ready within the allotted window.
    ReadinessTimeout(String),
    /// The subprocess closed or crashed.
    ProcessExited(String),
    /// The CLI reported an authentication failure.
    Authentication(String),
    /// The operation was cancelled by a stop, reset or shutdown.
    Cancelled(String),
    /// Remote notification delivery failure.
    Remote(String),
}

impl Display for AppError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Config(msg) => write!(f, "config: {msg}"),
            Self::Db(msg) => write!(f, "db: {msg}"),
            Self::Io(msg) => write!(f, "io: {msg}"),
            Self::NotFound(msg) => write!(f, "not found: {msg}"),
            Self::InvalidInput(msg) => write!(f, "invalid input: {msg}"),
            Self::DependencyUnavailable(msg) => write!(f, "dependency unavailable: {msg}"),
            Self::Spawn(msg) => write!(f, "spawn: {msg}"),
            Self::Transmission(msg) => write!(f, "transmission: {msg}"),
            Self::ProcessUnavailable(msg) => write!(f, "process unavailable: {msg}"),
            Self::ReadinessTimeout(msg) => write!(f, "readiness timeout: {msg}"),
            Self::ProcessExited(msg) => write!(f, "process exited: {msg}"),
            Self::Authentication(msg) => write!(f, "authentication: {msg}"),
            Self::Cancelled(msg) => write!(f, "cancelled: {msg}"),
            Self::Remote(msg) => write!(f, "remote: {msg}"),
        }
    }
}

impl std::error::Error for AppError {}

impl From<toml::de::Error> for AppError {
    fn from(err: toml::de::Error) -> Self {
        Self::Config(format!("invalid config: {err}"))
    }
}

impl From<sqlx::Error> for AppError {
    fn from(err: sqlx::Error) -> Self {
        Self::Db(err.to_string())
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

impl From<reqwest::Error> for AppError {
    fn from(err: reqwest::Error) -> Self {
        Self::Remote(err.to_string())
    }
}
