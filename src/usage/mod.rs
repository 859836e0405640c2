//! Usage-limit detection and reset-time resolution.
//!
//! The CLI announces an exhausted quota in one of two shapes:
//!
//! ```text
//! Claude usage limit reached. Your limit will reset at 4pm (America/New_York).
//! 5-hour limit reached ∙ resets 4:30am
//! ```
//!
//! Output may contain several stale banners still on screen; the last one
//! printed is taken as authoritative. A limit only matters when its reset
//! is between now and six hours from now. A reset time that cannot be
//! parsed is treated as current with a one-hour wait, so the queue errs on
//! the side of pausing.

pub mod countdown;

use std::sync::LazyLock;

use chrono::{DateTime, Duration, Local, NaiveDateTime, NaiveTime, TimeZone, Utc};
use regex::Regex;
use tracing::{debug, warn};

/// Longest time-to-reset that still counts as the current limit.
pub const RELEVANCE_WINDOW: Duration = Duration::hours(6);

/// Wait applied when the reset time cannot be understood.
pub const FALLBACK_WAIT: Duration = Duration::minutes(60);

const LEGACY_PATTERN: &str = r"(?i)(Claude\s+)?usage\s+limit\s+reached.*?reset\s+at\s+(\d{1,2}[:\d]*(?:\s*[APM]{2})?(?:\s*\([^)]+\))?)";

const HOUR_LIMIT_PATTERN: &str = r"(?i)(\d+)-hour\s+limit\s+reached\s*[∙•·]\s*resets\s+(\d{1,2}[:\d]*(?:\s*[APM]{2})?(?:\s*\([^)]+\))?)";

const MENTION_PATTERN: &str = r"(?i)usage\s+limit\s+reached|\d+-hour\s+limit\s+reached";

static LIMIT_RES: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [LEGACY_PATTERN, HOUR_LIMIT_PATTERN]
        .iter()
        .filter_map(|p| Regex::new(p).ok())
        .collect()
});

static MENTION_RE: LazyLock<Option<Regex>> = LazyLock::new(|| Regex::new(MENTION_PATTERN).ok());

static TZ_SUFFIX_RE: LazyLock<Option<Regex>> = LazyLock::new(|| Regex::new(r"\s*\([^)]+\)").ok());

/// A usage limit that should pause the queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UsageLimitHit {
    /// Reset time as printed by the CLI.
    pub reset_label: String,
    /// When processing may resume.
    pub wait_until: DateTime<Utc>,
}

/// Whether `output` mentions a usage limit at all.
#[must_use]
pub fn mentions_usage_limit(output: &str) -> bool {
    MENTION_RE.as_ref().is_some_and(|re| re.is_match(output))
}

/// Reset-time token of the last usage-limit banner in `output`.
#[must_use]
pub fn last_reset_token(output: &str) -> Option<String> {
    LIMIT_RES
        .iter()
        .flat_map(|re| re.captures_iter(output))
        .filter_map(|caps| {
            let whole = caps.get(0)?;
            let token = caps.get(2)?;
            Some((whole.start(), token.as_str().trim().to_owned()))
        })
        .max_by_key(|(start, _)| *start)
        .map(|(_, token)| token)
}

/// Resolve a token such as `4pm`, `4:30 am` or `16:00 (EST)` to the next
/// matching wall-clock instant strictly after `reference`.
///
/// The parenthesized zone is dropped and the time is read in the same
/// clock as `reference`.
#[must_use]
pub fn parse_reset_time(token: &str, reference: NaiveDateTime) -> Option<NaiveDateTime> {
    let cleaned = match TZ_SUFFIX_RE.as_ref() {
        Some(re) => re.replace(token, "").trim().to_owned(),
        None => token.trim().to_owned(),
    };
    let lower = cleaned.to_ascii_lowercase();
    let (clock, meridiem) = if let Some(rest) = lower.strip_suffix("am") {
        (rest.trim(), Some(false))
    } else if let Some(rest) = lower.strip_suffix("pm") {
        (rest.trim(), Some(true))
    } else {
        (lower.as_str(), None)
    };

    let digits = |s: &str| -> Option<u32> {
        let only: String = s.chars().filter(char::is_ascii_digit).collect();
        only.parse().ok()
    };
    let (hours, minutes) = match clock.split_once(':') {
        Some((h, rest)) => {
            let m = rest.split(':').next().unwrap_or_default();
            (digits(h)?, digits(m)?)
        }
        None => (digits(clock)?, 0),
    };
    if hours > 23 || minutes > 59 {
        debug!(token, hours, minutes, "reset time out of range");
        return None;
    }

    let hours = match meridiem {
        Some(true) if hours != 12 => hours + 12,
        Some(false) if hours == 12 => 0,
        _ => hours,
    };
    if hours > 23 {
        return None;
    }

    let time = NaiveTime::from_hms_opt(hours, minutes, 0)?;
    let mut reset = reference.date().and_time(time);
    if reset <= reference {
        reset += Duration::days(1);
    }
    Some(reset)
}

/// Decide whether `output` reports a usage limit that applies right now.
///
/// Returns the resume instant when it does.
#[must_use]
pub fn detect(output: &str, now: DateTime<Local>) -> Option<UsageLimitHit> {
    let Some(token) = last_reset_token(output) else {
        debug!("usage limit mentioned without a reset time");
        return None;
    };

    let Some(reset) = parse_reset_time(&token, now.naive_local()) else {
        warn!(token, "could not parse usage limit reset time, treating as current");
        return Some(UsageLimitHit {
            reset_label: token,
            wait_until: now.with_timezone(&Utc) + FALLBACK_WAIT,
        });
    };

    let until = reset - now.naive_local();
    if until <= Duration::zero() || until > RELEVANCE_WINDOW {
        debug!(token, minutes = until.num_minutes(), "usage limit outside the relevance window");
        return None;
    }

    let wait_until = Local
        .from_local_datetime(&reset)
        .earliest()
        .map_or_else(
            || now.with_timezone(&Utc) + until,
            |local| local.with_timezone(&Utc),
        );
    Some(UsageLimitHit {
        reset_label: token,
        wait_until,
    })
}
