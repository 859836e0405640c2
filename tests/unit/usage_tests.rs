//! Usage-limit detection, reset-time parsing and the resume countdown.

use std::time::Duration as StdDuration;

use chrono::{DateTime, Duration, Local, NaiveDate, NaiveDateTime, TimeZone, Utc};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use queue_autopilot::usage::countdown::{seconds_until, spawn_countdown, CountdownEvent};
use queue_autopilot::usage::{
    detect, last_reset_token, mentions_usage_limit, parse_reset_time, FALLBACK_WAIT,
};

fn at(hour: u32, minute: u32) -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2026, 7, 15)
        .expect("date")
        .and_hms_opt(hour, minute, 0)
        .expect("time")
}

fn local(naive: NaiveDateTime) -> DateTime<Local> {
    Local
        .from_local_datetime(&naive)
        .earliest()
        .expect("local time exists")
}

// ── Mentions and tokens ──────────────────────────────────────

#[test]
fn recognizes_both_banner_shapes() {
    assert!(mentions_usage_limit(
        "Claude usage limit reached. Your limit will reset at 4pm."
    ));
    assert!(mentions_usage_limit("5-hour limit reached ∙ resets 4:30am"));
    assert!(mentions_usage_limit("USAGE LIMIT REACHED"));
    assert!(!mentions_usage_limit("limit the output to ten lines"));
}

#[test]
fn extracts_reset_token_with_zone() {
    let output = "Claude usage limit reached. Your limit will reset at 4pm (America/New_York).";
    assert_eq!(
        last_reset_token(output).as_deref(),
        Some("4pm (America/New_York)")
    );
}

#[test]
fn last_banner_wins() {
    let output = "Claude usage limit reached. Your limit will reset at 2pm.\n\
                  ...\n\
                  5-hour limit reached ∙ resets 6:15pm";
    assert_eq!(last_reset_token(output).as_deref(), Some("6:15pm"));

    let reversed = "5-hour limit reached ∙ resets 6:15pm\n\
                    Claude usage limit reached. Your limit will reset at 2pm.";
    assert_eq!(last_reset_token(reversed).as_deref(), Some("2pm"));
}

#[test]
fn no_token_without_reset_time() {
    assert_eq!(last_reset_token("Claude usage limit reached."), None);
}

// ── Reset-time parsing ───────────────────────────────────────

#[test]
fn parses_meridiem_hours() {
    assert_eq!(parse_reset_time("4pm", at(11, 0)), Some(at(16, 0)));
    assert_eq!(parse_reset_time("4 PM", at(11, 0)), Some(at(16, 0)));
    assert_eq!(parse_reset_time("12pm", at(11, 0)), Some(at(12, 0)));
}

#[test]
fn parses_minutes_and_24_hour_clock() {
    assert_eq!(parse_reset_time("4:30pm", at(11, 0)), Some(at(16, 30)));
    assert_eq!(parse_reset_time("16:00 (EST)", at(11, 0)), Some(at(16, 0)));
}

#[test]
fn past_time_rolls_to_tomorrow() {
    let tomorrow = |h, m| at(h, m) + Duration::days(1);
    assert_eq!(parse_reset_time("4:30am", at(11, 0)), Some(tomorrow(4, 30)));
    assert_eq!(parse_reset_time("12am", at(23, 0)), Some(tomorrow(0, 0)));
    assert_eq!(parse_reset_time("11am", at(11, 0)), Some(tomorrow(11, 0)));
}

#[test]
fn rejects_unparseable_times() {
    assert_eq!(parse_reset_time("soon", at(11, 0)), None);
    assert_eq!(parse_reset_time("25:00", at(11, 0)), None);
    assert_eq!(parse_reset_time("13pm", at(11, 0)), None);
    assert_eq!(parse_reset_time("4:75pm", at(11, 0)), None);
}

// ── Detection ────────────────────────────────────────────────

#[test]
fn detects_limit_within_window() {
    let now = local(at(11, 0));
    let hit = detect(
        "Claude usage limit reached. Your limit will reset at 4pm (America/New_York).",
        now,
    )
    .expect("limit applies");

    assert_eq!(hit.reset_label, "4pm (America/New_York)");
    assert_eq!(hit.wait_until, local(at(16, 0)).with_timezone(&Utc));
}

#[test]
fn detects_limit_across_midnight() {
    let now = local(at(23, 0));
    let hit = detect("5-hour limit reached ∙ resets 2am", now).expect("limit applies");
    assert_eq!(
        hit.wait_until,
        local(at(2, 0) + Duration::days(1)).with_timezone(&Utc)
    );
}

#[test]
fn ignores_stale_or_distant_limits() {
    let now = local(at(9, 0));
    assert!(detect("5-hour limit reached ∙ resets 4pm", now).is_none());
    assert!(detect("Claude usage limit reached.", now).is_none());
}

#[test]
fn unparseable_reset_waits_an_hour() {
    let now = local(at(11, 0));
    let hit = detect(
        "Claude usage limit reached. Your limit will reset at 99:99.",
        now,
    )
    .expect("treated as current");

    assert_eq!(hit.reset_label, "99:99");
    assert_eq!(hit.wait_until, now.with_timezone(&Utc) + FALLBACK_WAIT);
}

// ── Countdown ────────────────────────────────────────────────

#[test]
fn seconds_until_floors_at_zero() {
    let now = Utc::now();
    assert_eq!(seconds_until(now + Duration::seconds(90), now), 90);
    assert_eq!(seconds_until(now - Duration::seconds(5), now), 0);
}

#[tokio::test(start_paused = true)]
async fn countdown_ticks_then_elapses_once() {
    let (tx, mut rx) = mpsc::channel::<CountdownEvent>(64);
    let deadline = Utc::now() + Duration::seconds(3);
    let handle = spawn_countdown("ticket".into(), deadline, tx, CancellationToken::new());

    let mut ticks = 0;
    let mut elapsed = 0;
    while let Some(event) = tokio::time::timeout(StdDuration::from_secs(10), rx.recv())
        .await
        .expect("countdown stalled")
    {
        match event {
            CountdownEvent::Tick {
                message_id,
                remaining_secs,
            } => {
                assert_eq!(message_id, "ticket");
                assert!(remaining_secs <= 3);
                ticks += 1;
            }
            CountdownEvent::Elapsed { message_id } => {
                assert_eq!(message_id, "ticket");
                elapsed += 1;
            }
        }
    }

    handle.await.expect("countdown task");
    assert!(ticks >= 1, "expected progress ticks");
    assert_eq!(elapsed, 1);
}

#[tokio::test(start_paused = true)]
async fn countdown_waits_out_the_fractional_second() {
    let (tx, mut rx) = mpsc::channel::<CountdownEvent>(8);
    let started = tokio::time::Instant::now();
    let deadline = Utc::now() + Duration::milliseconds(1500);
    let _handle = spawn_countdown("ticket".into(), deadline, tx, CancellationToken::new());

    loop {
        let event = tokio::time::timeout(StdDuration::from_secs(5), rx.recv())
            .await
            .expect("countdown stalled")
            .expect("event");
        if matches!(event, CountdownEvent::Elapsed { .. }) {
            break;
        }
    }
    let waited = started.elapsed();
    assert!(
        waited >= StdDuration::from_millis(1400),
        "elapsed early after {waited:?}"
    );
}

#[tokio::test(start_paused = true)]
async fn countdown_past_deadline_elapses_immediately() {
    let (tx, mut rx) = mpsc::channel::<CountdownEvent>(8);
    let deadline = Utc::now() - Duration::seconds(30);
    let _handle = spawn_countdown("late".into(), deadline, tx, CancellationToken::new());

    let event = tokio::time::timeout(StdDuration::from_secs(1), rx.recv())
        .await
        .expect("timely event")
        .expect("event");
    assert_eq!(
        event,
        CountdownEvent::Elapsed {
            message_id: "late".into()
        }
    );
}

#[tokio::test(start_paused = true)]
async fn cancelled_countdown_stays_silent() {
    let (tx, mut rx) = mpsc::channel::<CountdownEvent>(8);
    let cancel = CancellationToken::new();
    let handle = spawn_countdown(
        "ticket".into(),
        Utc::now() + Duration::hours(2),
        tx,
        cancel.clone(),
    );

    cancel.cancel();
    handle.await.expect("countdown task");

    assert!(rx.recv().await.is_none(), "no events after cancel");
}
