//! Message and history model transitions and serialization.

use chrono::{Duration, Utc};

use queue_autopilot::models::message::{CONTINUE_TEXT, USAGE_LIMIT_OUTPUT};
use queue_autopilot::models::{
    DependencyReport, DependencyStatus, HistoryRun, MessageItem, MessageStatus,
};

#[test]
fn status_round_trips_through_its_name() {
    for status in [
        MessageStatus::Pending,
        MessageStatus::Processing,
        MessageStatus::Completed,
        MessageStatus::Error,
        MessageStatus::Waiting,
    ] {
        assert_eq!(MessageStatus::parse(status.as_str()).expect("parse"), status);
    }
    assert!(MessageStatus::parse("paused").is_err());
}

#[test]
fn new_item_is_pending_with_unique_id() {
    let a = MessageItem::new("hello");
    let b = MessageItem::new("hello");
    assert_eq!(a.status, MessageStatus::Pending);
    assert_ne!(a.id, b.id);
    assert!(a.output.is_none() && a.error.is_none());
}

#[test]
fn transitions_record_timestamps() {
    let now = Utc::now();
    let mut item = MessageItem::new("work");

    item.mark_processing(now);
    assert_eq!(item.status, MessageStatus::Processing);
    assert_eq!(item.processing_started_at, Some(now));

    item.mark_completed(Some(USAGE_LIMIT_OUTPUT.to_owned()), now);
    assert_eq!(item.status, MessageStatus::Completed);
    assert_eq!(item.output.as_deref(), Some(USAGE_LIMIT_OUTPUT));
    assert_eq!(item.completed_at, Some(now));

    let mut failed = MessageItem::new("broken");
    failed.mark_error("Processing failed: timeout", now);
    assert_eq!(failed.status, MessageStatus::Error);
    assert_eq!(failed.error.as_deref(), Some("Processing failed: timeout"));
}

#[test]
fn continue_ticket_waits_until_reset() {
    let now = Utc::now();
    let until = now + Duration::minutes(90);

    let ticket = MessageItem::continue_ticket(until, "4:30pm", now);

    assert!(ticket.is_continue_ticket());
    assert_eq!(ticket.text, CONTINUE_TEXT);
    assert_eq!(ticket.status, MessageStatus::Waiting);
    assert_eq!(ticket.wait_until, Some(until.timestamp_millis()));
    assert_eq!(ticket.wait_seconds, Some(5400));
    assert!(ticket
        .error
        .as_deref()
        .is_some_and(|e| e.contains("will resume at 4:30pm")));
    assert_eq!(
        ticket.wait_deadline().map(|d| d.timestamp_millis()),
        Some(until.timestamp_millis())
    );
}

#[test]
fn resume_from_wait_clears_wait_fields() {
    let now = Utc::now();
    let mut ticket = MessageItem::continue_ticket(now + Duration::hours(1), "5pm", now);

    ticket.resume_from_wait();

    assert_eq!(ticket.status, MessageStatus::Pending);
    assert!(ticket.wait_until.is_none());
    assert!(ticket.wait_seconds.is_none());
    assert!(ticket.error.is_none());
    assert!(!ticket.is_continue_ticket());
}

#[test]
fn item_serializes_in_camel_case() {
    let item = MessageItem::new("hi");
    let json = serde_json::to_value(&item).expect("serialize");
    assert_eq!(json["status"], "pending");
    assert!(json.get("enqueuedAt").is_some());
    assert!(json.get("waitUntil").is_none(), "unset options are omitted");

    let back: MessageItem = serde_json::from_value(json).expect("deserialize");
    assert_eq!(back, item);
}

#[test]
fn history_refresh_counts_statuses() {
    let now = Utc::now();
    let mut done = MessageItem::new("done");
    done.mark_completed(None, now);
    let mut failed = MessageItem::new("failed");
    failed.mark_error("boom", now);
    let waiting = MessageItem::continue_ticket(now + Duration::hours(1), "5pm", now);
    let pending = MessageItem::new("pending");

    let mut run = HistoryRun::new("/work");
    assert!(run.id.starts_with("run:"));
    run.refresh(vec![done.clone(), failed, waiting, pending]);

    assert_eq!(run.total, 4);
    assert_eq!(run.completed, 1);
    assert_eq!(run.errors, 1);
    assert_eq!(run.waiting, 1);
    assert_eq!(run.status_map.get(&done.id), Some(&MessageStatus::Completed));
    assert!(!run.is_closed());
}

#[test]
fn dependency_report_renders_missing_items_with_fix() {
    let report = DependencyReport {
        cli: DependencyStatus::found(Some("1.0.3".into()), Some("claude".into())),
        interpreter: DependencyStatus::missing("python3 not found", "install Python 3.9 or newer"),
        wrapper: DependencyStatus::found(Some("ready".into()), None),
    };

    assert!(!report.all_available());
    let text = report.render();
    assert!(text.contains("[ok] CLI: 1.0.3"));
    assert!(text.contains("[missing] Interpreter: python3 not found"));
    assert!(text.contains("fix: install Python 3.9 or newer"));
}
