//! Scheduled start, health ticks, readiness polling and sleep prevention.

use std::time::Duration;

use chrono::{Local, NaiveDate, TimeZone, Timelike};
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;

use queue_autopilot::config::{SleepMethod, SleepPreventionConfig};
use queue_autopilot::orchestrator::health::{spawn_health_check, HealthTick};
use queue_autopilot::orchestrator::poll_ready;
use queue_autopilot::orchestrator::schedule::next_occurrence;
use queue_autopilot::orchestrator::sleep_guard::{helper_command, HostOs, SleepGuard};

fn local(hour: u32, minute: u32) -> chrono::DateTime<Local> {
    let naive = NaiveDate::from_ymd_opt(2026, 7, 15)
        .expect("date")
        .and_hms_opt(hour, minute, 0)
        .expect("time");
    Local
        .from_local_datetime(&naive)
        .earliest()
        .expect("local time exists")
}

// ── Scheduled start ──────────────────────────────────────────

#[test]
fn next_occurrence_later_today() {
    let next = next_occurrence(local(6, 0), 7, 30).expect("next");
    assert_eq!(next, local(7, 30));
}

#[test]
fn next_occurrence_rolls_to_tomorrow() {
    let now = local(8, 0);
    let next = next_occurrence(now, 7, 30).expect("next");
    assert_eq!(next.date_naive(), now.date_naive().succ_opt().expect("tomorrow"));
    assert_eq!((next.hour(), next.minute()), (7, 30));
}

#[test]
fn next_occurrence_is_strictly_after_now() {
    let now = local(7, 30);
    let next = next_occurrence(now, 7, 30).expect("next");
    assert!(next > now);
    assert_eq!(next.date_naive(), now.date_naive().succ_opt().expect("tomorrow"));
}

#[test]
fn next_occurrence_rejects_invalid_time() {
    assert!(next_occurrence(local(6, 0), 24, 0).is_none());
    assert!(next_occurrence(local(6, 0), 7, 60).is_none());
}

// ── Health ticks ─────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn health_ticks_carry_generation_until_cancelled() {
    let (tx, mut rx) = mpsc::channel::<HealthTick>(8);
    let cancel = CancellationToken::new();
    let handle = spawn_health_check(7, Duration::from_secs(30), tx, cancel.clone());

    for _ in 0..2 {
        let tick = tokio::time::timeout(Duration::from_secs(31), rx.recv())
            .await
            .expect("tick on time")
            .expect("tick");
        assert_eq!(tick, HealthTick { generation: 7 });
    }

    cancel.cancel();
    handle.await.expect("health task");
    assert!(rx.recv().await.is_none());
}

// ── Readiness polling ────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn poll_ready_sees_flag_flip() {
    let (tx, rx) = watch::channel(false);
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(3)).await;
        let _ = tx.send(true);
        tokio::time::sleep(Duration::from_secs(60)).await;
    });

    let ready = poll_ready(
        &rx,
        Duration::from_secs(1),
        Duration::from_secs(30),
        &CancellationToken::new(),
    )
    .await;
    assert!(ready);
}

#[tokio::test(start_paused = true)]
async fn poll_ready_gives_up_after_timeout() {
    let (_tx, rx) = watch::channel(false);
    let started = tokio::time::Instant::now();

    let ready = poll_ready(
        &rx,
        Duration::from_secs(1),
        Duration::from_secs(5),
        &CancellationToken::new(),
    )
    .await;

    assert!(!ready);
    assert!(started.elapsed() >= Duration::from_secs(5));
}

#[tokio::test(start_paused = true)]
async fn poll_ready_stops_on_cancel() {
    let (_tx, rx) = watch::channel(false);
    let cancel = CancellationToken::new();
    cancel.cancel();

    assert!(!poll_ready(&rx, Duration::from_secs(1), Duration::from_secs(30), &cancel).await);
}

// ── Sleep prevention ─────────────────────────────────────────

#[test]
fn auto_picks_platform_helper() {
    let (program, args) = helper_command(SleepMethod::Auto, HostOs::MacOs).expect("mac");
    assert_eq!(program, "caffeinate");
    assert_eq!(args, ["-i", "-s", "-t", "86400"]);

    let (program, args) = helper_command(SleepMethod::Auto, HostOs::Linux).expect("linux");
    assert_eq!(program, "systemd-inhibit");
    assert!(args.contains(&"--what=sleep:idle"));

    let (program, args) = helper_command(SleepMethod::Auto, HostOs::Windows).expect("windows");
    assert_eq!(program, "powershell");
    assert!(args.iter().any(|a| a.contains("SetThreadExecutionState")));

    assert!(helper_command(SleepMethod::Auto, HostOs::Other).is_none());
}

#[test]
fn explicit_method_overrides_platform() {
    let (program, _) =
        helper_command(SleepMethod::Caffeinate, HostOs::Linux).expect("explicit helper");
    assert_eq!(program, "caffeinate");
}

#[tokio::test]
async fn disabled_guard_never_spawns() {
    let mut guard = SleepGuard::new(SleepPreventionConfig {
        enabled: false,
        method: SleepMethod::Auto,
    });

    guard.start();
    assert!(!guard.is_active());
    guard.stop();
    assert!(!guard.is_active());
}
