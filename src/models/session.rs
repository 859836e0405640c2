//! Session status snapshots and dependency reports published to the UI.

use serde::{Deserialize, Serialize};

/// Point-in-time view of the CLI session.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SessionSnapshot {
    /// A subprocess is attached.
    pub running: bool,
    /// The CLI is showing its input prompt.
    pub ready: bool,
    /// The scheduler is allowed to deliver messages.
    pub processing: bool,
    /// Item currently in flight.
    pub current_message_id: Option<String>,
}

/// Availability of one external program.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct DependencyStatus {
    /// The program was found and responded.
    pub available: bool,
    /// Reported version, when the program prints one.
    pub version: Option<String>,
    /// Resolved location.
    pub path: Option<String>,
    /// Why the check failed.
    pub error: Option<String>,
    /// What the operator can do about it.
    pub remedy: Option<String>,
}

impl DependencyStatus {
    /// A successful check.
    #[must_use]
    pub fn found(version: Option<String>, path: Option<String>) -> Self {
        Self {
            available: true,
            version,
            path,
            error: None,
            remedy: None,
        }
    }

    /// A failed check.
    #[must_use]
    pub fn missing(error: impl Into<String>, remedy: impl Into<String>) -> Self {
        Self {
            available: false,
            version: None,
            path: None,
            error: Some(error.into()),
            remedy: Some(remedy.into()),
        }
    }
}

/// Result of probing everything the session needs before it can start.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct DependencyReport {
    /// The AI coding CLI binary.
    pub cli: DependencyStatus,
    /// The interpreter that runs the wrapper.
    pub interpreter: DependencyStatus,
    /// The PTY wrapper script.
    pub wrapper: DependencyStatus,
}

impl DependencyReport {
    /// Whether every dependency is available.
    #[must_use]
    pub fn all_available(&self) -> bool {
        self.cli.available && self.interpreter.available && self.wrapper.available
    }

    /// Human-readable multi-line status report.
    #[must_use]
    pub fn render(&self) -> String {
        let mut out = String::from("Dependency status:\n");
        for (name, status) in [
            ("CLI", &self.cli),
            ("Interpreter", &self.interpreter),
            ("PTY wrapper", &self.wrapper),
        ] {
            if status.available {
                let detail = status
                    .version
                    .as_deref()
                    .or(status.path.as_deref())
                    .unwrap_or("available");
                out.push_str(&format!("  [ok] {name}: {detail}\n"));
            } else {
                out.push_str(&format!(
                    "  [missing] {name}: {}\n",
                    status.error.as_deref().unwrap_or("not found")
                ));
                if let Some(remedy) = &status.remedy {
                    out.push_str(&format!("      fix: {remedy}\n"));
                }
            }
        }
        out
    }
}
