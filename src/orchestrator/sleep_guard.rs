//! Keeps the host awake while a session is ready.
//!
//! The guard is a helper subprocess chosen per platform. It is started when
//! the session becomes ready and killed when the session stops.

use std::process::Stdio;

use tokio::process::{Child, Command};
use tracing::{debug, info, warn};

use crate::config::{SleepMethod, SleepPreventionConfig};

const KEEP_AWAKE_SCRIPT: &str = "$sig = '[DllImport(\"kernel32.dll\")] public static extern uint SetThreadExecutionState(uint f);'; \
$k = Add-Type -MemberDefinition $sig -Name Power -Namespace KeepAwake -PassThru; \
while ($true) { $k::SetThreadExecutionState(0x80000001) | Out-Null; Start-Sleep -Seconds 30 }";

/// Operating system family relevant to helper selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostOs {
    /// macOS.
    MacOs,
    /// Linux.
    Linux,
    /// Windows.
    Windows,
    /// Anything else; no helper.
    Other,
}

impl HostOs {
    /// OS of the running process.
    #[must_use]
    pub fn current() -> Self {
        match std::env::consts::OS {
            "macos" => Self::MacOs,
            "linux" => Self::Linux,
            "windows" => Self::Windows,
            _ => Self::Other,
        }
    }
}

/// Helper command line for `method` on `os`, if there is one.
#[must_use]
pub fn helper_command(method: SleepMethod, os: HostOs) -> Option<(&'static str, Vec<&'static str>)> {
    let method = match method {
        SleepMethod::Auto => match os {
            HostOs::MacOs => SleepMethod::Caffeinate,
            HostOs::Linux => SleepMethod::SystemdInhibit,
            HostOs::Windows => SleepMethod::Powershell,
            HostOs::Other => return None,
        },
        explicit => explicit,
    };
    Some(match method {
        SleepMethod::Caffeinate => ("caffeinate", vec!["-i", "-s", "-t", "86400"]),
        SleepMethod::SystemdInhibit => (
            "systemd-inhibit",
            vec![
                "--what=sleep:idle",
                "--who=queue-autopilot",
                "--why=Processing queued messages",
                "sleep",
                "7200",
            ],
        ),
        SleepMethod::Powershell => (
            "powershell",
            vec!["-NoProfile", "-NonInteractive", "-Command", KEEP_AWAKE_SCRIPT],
        ),
        SleepMethod::Auto => return None,
    })
}

/// Owner of the keep-awake helper process.
#[derive(Debug)]
pub struct SleepGuard {
    config: SleepPreventionConfig,
    os: HostOs,
    child: Option<Child>,
}

impl SleepGuard {
    /// Create an idle guard.
    #[must_use]
    pub fn new(config: SleepPreventionConfig) -> Self {
        Self {
            config,
            os: HostOs::current(),
            child: None,
        }
    }

    /// Whether a helper process is currently running.
    pub fn is_active(&mut self) -> bool {
        match self.child.as_mut().map(Child::try_wait) {
            Some(Ok(None)) => true,
            Some(_) => {
                self.child = None;
                false
            }
            None => false,
        }
    }

    /// Start the helper unless disabled or already running.
    pub fn start(&mut self) {
        if !self.config.enabled || self.is_active() {
            return;
        }
        let Some((program, args)) = helper_command(self.config.method, self.os) else {
            debug!(os = ?self.os, "no sleep prevention helper for this platform");
            return;
        };
        match Command::new(program)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
        {
            Ok(child) => {
                info!(program, "sleep prevention started");
                self.child = Some(child);
            }
            Err(err) => warn!(program, %err, "failed to start sleep prevention"),
        }
    }

    /// Kill the helper if it is running.
    pub fn stop(&mut self) {
        if let Some(mut child) = self.child.take() {
            if let Err(err) = child.start_kill() {
                debug!(%err, "sleep prevention helper already gone");
            }
            info!("sleep prevention stopped");
        }
    }
}

impl Drop for SleepGuard {
    fn drop(&mut self) {
        self.stop();
    }
}
