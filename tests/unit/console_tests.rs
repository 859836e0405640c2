//! Operator console parsing and rendering.

use chrono::{Duration, Utc};

use queue_autopilot::console::{parse_line, render_event, render_items, ConsoleCommand};
use queue_autopilot::models::{MessageItem, SessionSnapshot};
use queue_autopilot::notify::{NoticeLevel, OutputStream, UiEvent};
use queue_autopilot::AppError;

#[test]
fn parses_add_with_free_text() {
    let command = parse_line("add fix the flaky   login test").expect("parse");
    assert_eq!(
        command,
        ConsoleCommand::Add {
            text: ["fix", "the", "flaky", "login", "test"]
                .map(String::from)
                .to_vec()
        }
    );
}

#[test]
fn parses_indexed_commands() {
    assert_eq!(
        parse_line("move 3 1").expect("move"),
        ConsoleCommand::Move { from: 3, to: 1 }
    );
    assert_eq!(
        parse_line("remove 2").expect("remove"),
        ConsoleCommand::Remove { index: 2 }
    );
    assert_eq!(
        parse_line("edit 1 try again").expect("edit"),
        ConsoleCommand::Edit {
            index: 1,
            text: vec!["try".into(), "again".into()]
        }
    );
    assert_eq!(
        parse_line("key escape").expect("key"),
        ConsoleCommand::Key {
            key: "escape".into()
        }
    );
}

#[test]
fn parses_bare_commands() {
    for (line, expected) in [
        ("start", ConsoleCommand::Start),
        ("stop", ConsoleCommand::Stop),
        ("session", ConsoleCommand::Session),
        ("reset", ConsoleCommand::Reset),
        ("list", ConsoleCommand::List),
        ("clear", ConsoleCommand::Clear),
        ("status", ConsoleCommand::Status),
        ("stats", ConsoleCommand::Stats),
        ("history", ConsoleCommand::History),
        ("quit", ConsoleCommand::Quit),
    ] {
        assert_eq!(parse_line(line).expect(line), expected);
    }
}

#[test]
fn rejects_unknown_or_incomplete_commands() {
    assert!(matches!(parse_line("launch"), Err(AppError::InvalidInput(_))));
    assert!(matches!(parse_line("add"), Err(AppError::InvalidInput(_))));
    assert!(matches!(parse_line("remove two"), Err(AppError::InvalidInput(_))));
}

#[test]
fn help_lists_subcommands() {
    let Err(AppError::InvalidInput(text)) = parse_line("help") else {
        panic!("help is reported through the error path");
    };
    assert!(text.contains("add"));
    assert!(text.contains("key"));
}

#[test]
fn renders_empty_queue() {
    assert_eq!(render_items(&[]), "queue is empty");
}

#[test]
fn renders_numbered_items_with_details() {
    let now = Utc::now();
    let pending = MessageItem::new("write the changelog");
    let mut failed = MessageItem::new("deploy");
    failed.mark_error("Processing failed: timeout", now);
    let mut ticket = MessageItem::continue_ticket(now + Duration::hours(2), "4pm", now);
    ticket.wait_seconds = Some(3725);
    let long = MessageItem::new(format!("{}\nsecond line", "x".repeat(80)));

    let rendered = render_items(&[pending, failed, ticket, long]);
    let lines: Vec<&str> = rendered.lines().collect();

    assert_eq!(lines[0], "  1. [pending] write the changelog");
    assert_eq!(lines[1], "  2. [error] deploy (Processing failed: timeout)");
    assert_eq!(lines[2], "  3. [waiting] continue (resumes in 1h 02m 05s)");
    assert!(lines[3].starts_with("  4. [pending] xxxx"));
    assert!(lines[3].ends_with("..."));
    assert_eq!(lines.len(), 4);
}

#[test]
fn renders_notices_and_stderr() {
    let notice = UiEvent::Notice {
        level: NoticeLevel::Warning,
        text: "Queue is full".into(),
    };
    assert_eq!(
        render_event(&notice, false).as_deref(),
        Some("[warning] Queue is full")
    );

    let stderr = UiEvent::Output {
        stream: OutputStream::Stderr,
        text: "traceback\n".into(),
    };
    assert_eq!(
        render_event(&stderr, false).as_deref(),
        Some("[cli stderr] traceback")
    );
}

#[test]
fn stdout_is_echoed_only_on_request() {
    let stdout = UiEvent::Output {
        stream: OutputStream::Stdout,
        text: "? for shortcuts".into(),
    };
    assert_eq!(render_event(&stdout, false), None);
    assert_eq!(
        render_event(&stdout, true).as_deref(),
        Some("? for shortcuts")
    );
    assert_eq!(
        render_event(&UiEvent::QueueUpdated { items: Vec::new() }, true),
        None
    );
}

#[test]
fn renders_session_snapshot() {
    let snapshot = SessionSnapshot {
        running: true,
        ready: true,
        processing: false,
        current_message_id: None,
    };
    let text = render_event(&UiEvent::SessionStateChanged(snapshot), false).expect("rendered");
    assert_eq!(
        text,
        "session: running | ready: true | processing: false | current: -"
    );
}
