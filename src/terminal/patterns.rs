//! Text markers printed by the AI coding CLI.
//!
//! Styled prompt lines are matched against the JSON-escaped form of the
//! output, where the escape byte reads as the literal text `\u001b`.

use std::sync::LazyLock;

use regex::Regex;
use tracing::warn;

/// Literal hint shown under the input prompt when the CLI is idle.
pub const READY_HINT: &str = "? for shortcuts";

/// Phrases that open an interactive permission question.
pub const PERMISSION_PROMPTS: &[&str] = &[
    "Do you want to make this edit to",
    "Do you want to create",
    "Do you want to delete",
    "Do you want to read",
    "Would you like to",
    "Proceed with",
    "Continue?",
];

/// Messages the CLI prints when it is not logged in.
pub const AUTH_FAILURE_MARKERS: &[&str] = &[
    "Claude CLI authentication failed",
    "Please authenticate with Claude",
];

/// ANSI sequences that wipe the visible screen.
pub const CLEAR_SCREEN_SEQUENCES: &[&str] = &[
    "\x1b[2J",
    "\x1b[H\x1b[2J",
    "\x1b[2J\x1b[H",
    "\x1b[1;1H\x1b[2J",
    "\x1b[2J\x1b[1;1H",
];

/// Empty input line drawn once the CLI has finished booting.
const STARTUP_PROMPT: &str = r"\\u001b\[39m\\u001b\[22m\s>\s\\u001b\[7mT\\u001b\[27m";

/// Prompt shapes that mean the CLI is waiting for input.
const READY_PATTERNS: &[&str] = &[
    r"\? for shortcuts",
    r"\\u001b\[2m\\u001b\[38;5;244m│\\u001b\[39m\\u001b\[22m\s>",
    r">\s*$",
];

static STARTUP_PROMPT_RE: LazyLock<Option<Regex>> = LazyLock::new(|| compile(STARTUP_PROMPT));

static READY_RES: LazyLock<Vec<Regex>> =
    LazyLock::new(|| READY_PATTERNS.iter().filter_map(|p| compile(p)).collect());

fn compile(pattern: &str) -> Option<Regex> {
    match Regex::new(pattern) {
        Ok(re) => Some(re),
        Err(err) => {
            warn!(pattern, %err, "invalid terminal pattern, skipping");
            None
        }
    }
}

/// JSON string-literal form of `text`, control bytes rendered as `\uXXXX`.
#[must_use]
pub fn json_escaped(text: &str) -> String {
    serde_json::to_string(text).unwrap_or_default()
}

/// Whether a startup chunk shows the idle input prompt.
#[must_use]
pub fn is_startup_ready(chunk: &str) -> bool {
    chunk.contains(READY_HINT)
        || STARTUP_PROMPT_RE
            .as_ref()
            .is_some_and(|re| re.is_match(&json_escaped(chunk)))
}

/// Whether the screen shows a prompt waiting for input.
#[must_use]
pub fn screen_looks_ready(screen: &str) -> bool {
    let escaped = json_escaped(screen);
    READY_RES
        .iter()
        .any(|re| re.is_match(&escaped) || re.is_match(screen))
}

/// Whether `text` contains a permission question.
#[must_use]
pub fn has_permission_prompt(text: &str) -> bool {
    PERMISSION_PROMPTS.iter().any(|p| text.contains(p))
}

/// Byte offset just past the last permission question in `text`.
#[must_use]
pub fn permission_prompt_end(text: &str) -> Option<usize> {
    PERMISSION_PROMPTS
        .iter()
        .filter_map(|p| text.rfind(p).map(|at| at + p.len()))
        .max()
}

/// The authentication failure marker contained in `text`, if any.
#[must_use]
pub fn auth_failure(text: &str) -> Option<&'static str> {
    AUTH_FAILURE_MARKERS.iter().copied().find(|m| text.contains(m))
}
