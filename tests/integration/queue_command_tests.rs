//! Queue commands against a running orchestrator with no CLI session.

use queue_autopilot::console::{self, ConsoleCommand, Outcome};
use queue_autopilot::models::MessageStatus;
use queue_autopilot::notify::{NoticeLevel, UiEvent};
use queue_autopilot::AppError;

use super::test_helpers::{missing_cli_config, Harness};

fn texts(items: &[queue_autopilot::models::MessageItem]) -> Vec<&str> {
    items.iter().map(|m| m.text.as_str()).collect()
}

#[tokio::test]
async fn enqueue_edit_duplicate_reorder_remove() {
    let temp = tempfile::tempdir().expect("tempdir");
    let mut harness = Harness::start(missing_cli_config(temp.path()), None);
    let handle = harness.handle.clone();

    let first = handle.enqueue("write tests").await.expect("enqueue first");
    let second = handle.enqueue("fix lint").await.expect("enqueue second");
    harness
        .expect_notice(NoticeLevel::Info, "Message added to queue")
        .await;

    handle.edit(&first, "write more tests").await.expect("edit");
    let copy = handle.duplicate(&first).await.expect("duplicate");
    let items = handle.items().await.expect("items");
    assert_eq!(
        texts(&items),
        ["write more tests", "write more tests", "fix lint"]
    );
    assert_eq!(items[1].id, copy);
    assert!(items.iter().all(|m| m.status == MessageStatus::Pending));

    handle.reorder(2, 0).await.expect("reorder");
    handle.remove(&copy).await.expect("remove");
    let items = handle.items().await.expect("items");
    assert_eq!(items.len(), 2);
    assert_eq!(items[0].id, second);
    assert_eq!(items[1].id, first);

    let stats = handle.stats().await.expect("stats");
    assert_eq!(stats.total, 2);
    assert_eq!(stats.pending, 2);
    assert_eq!(stats.completed, 0);

    harness.shutdown().await;
}

#[tokio::test]
async fn invalid_queue_operations_are_rejected() {
    let temp = tempfile::tempdir().expect("tempdir");
    let harness = Harness::start(missing_cli_config(temp.path()), None);
    let handle = harness.handle.clone();

    assert!(matches!(
        handle.enqueue("   \n").await,
        Err(AppError::InvalidInput(_))
    ));
    assert!(matches!(
        handle.edit("missing", "text").await,
        Err(AppError::NotFound(_))
    ));
    assert!(matches!(
        handle.remove("missing").await,
        Err(AppError::NotFound(_))
    ));
    assert!(matches!(
        handle.duplicate("missing").await,
        Err(AppError::NotFound(_))
    ));

    let only = handle.enqueue("only one").await.expect("enqueue");
    handle.reorder(0, 3).await.expect("out-of-range move is a no-op");
    handle.reorder(4, 0).await.expect("out-of-range move is a no-op");
    let items = handle.items().await.expect("items");
    assert_eq!(items.len(), 1);
    assert_eq!(items[0].id, only);

    harness.shutdown().await;
}

#[tokio::test]
async fn clear_empties_queue_and_notifies() {
    let temp = tempfile::tempdir().expect("tempdir");
    let mut harness = Harness::start(missing_cli_config(temp.path()), None);
    let handle = harness.handle.clone();

    handle.enqueue("a").await.expect("enqueue");
    handle.enqueue("b").await.expect("enqueue");
    handle.clear().await.expect("clear");

    harness.expect_notice(NoticeLevel::Info, "Queue cleared").await;
    assert!(handle.items().await.expect("items").is_empty());

    harness.shutdown().await;
}

#[tokio::test]
async fn keypress_needs_known_key_and_session() {
    let temp = tempfile::tempdir().expect("tempdir");
    let mut harness = Harness::start(missing_cli_config(temp.path()), None);
    let handle = harness.handle.clone();

    assert!(matches!(
        handle.keypress("tab").await,
        Err(AppError::InvalidInput(_))
    ));
    harness
        .expect_notice(NoticeLevel::Warning, "Unknown key command: tab")
        .await;

    assert!(matches!(
        handle.keypress("escape").await,
        Err(AppError::ProcessUnavailable(_))
    ));
    harness
        .expect_notice(NoticeLevel::Warning, "No CLI session is running")
        .await;

    harness.shutdown().await;
}

#[tokio::test]
async fn missing_dependencies_refuse_session_start() {
    let temp = tempfile::tempdir().expect("tempdir");
    let mut harness = Harness::start(missing_cli_config(temp.path()), None);
    let handle = harness.handle.clone();

    let err = handle.start_session().await.expect_err("start refused");
    assert!(matches!(err, AppError::DependencyUnavailable(_)));

    let report = loop {
        match harness.events.recv().await.expect("ui event") {
            UiEvent::DependencyReport(report) => break report,
            _ => continue,
        }
    };
    assert!(!report.all_available());
    assert!(!report.cli.available);
    assert!(!report.wrapper.available);

    harness
        .expect_notice(NoticeLevel::Error, "Cannot start the CLI session")
        .await;
    let snapshot = handle.snapshot().await.expect("snapshot");
    assert!(!snapshot.running);
    assert!(!snapshot.ready);

    harness.shutdown().await;
}

#[tokio::test]
async fn console_commands_use_one_based_positions() {
    let temp = tempfile::tempdir().expect("tempdir");
    let harness = Harness::start(missing_cli_config(temp.path()), None);
    let handle = harness.handle.clone();

    for line in ["add first task", "add second task", "add third task"] {
        let command = console::parse_line(line).expect("parse");
        assert_eq!(
            console::execute(&handle, command).await.expect("execute"),
            Outcome::Continue(None)
        );
    }

    let moved = console::execute(&handle, ConsoleCommand::Move { from: 3, to: 1 })
        .await
        .expect("move");
    assert_eq!(moved, Outcome::Continue(Some("message 3 moved to 1".into())));

    let removed = console::execute(&handle, ConsoleCommand::Remove { index: 2 })
        .await
        .expect("remove");
    assert_eq!(removed, Outcome::Continue(Some("message 2 removed".into())));

    let Outcome::Continue(Some(listing)) = console::execute(&handle, ConsoleCommand::List)
        .await
        .expect("list")
    else {
        panic!("list prints the queue");
    };
    assert_eq!(
        listing,
        "  1. [pending] third task\n  2. [pending] second task"
    );

    assert!(matches!(
        console::execute(&handle, ConsoleCommand::Remove { index: 0 }).await,
        Err(AppError::NotFound(_))
    ));
    assert!(matches!(
        console::execute(&handle, ConsoleCommand::Edit { index: 9, text: vec!["x".into()] })
            .await,
        Err(AppError::NotFound(_))
    ));
    assert!(matches!(
        console::execute(&handle, ConsoleCommand::Move { from: 0, to: 1 }).await,
        Err(AppError::InvalidInput(_))
    ));
    assert!(matches!(
        console::execute(&handle, ConsoleCommand::Move { from: 1, to: 7 }).await,
        Err(AppError::NotFound(_))
    ));

    let Outcome::Continue(Some(history)) = console::execute(&handle, ConsoleCommand::History)
        .await
        .expect("history")
    else {
        panic!("history prints a reply");
    };
    assert_eq!(history, "no saved runs");

    assert_eq!(
        console::execute(&handle, ConsoleCommand::Quit)
            .await
            .expect("quit"),
        Outcome::Quit
    );

    harness.shutdown().await;
}

#[tokio::test]
async fn full_queue_refuses_enqueue_and_duplicate() {
    let temp = tempfile::tempdir().expect("tempdir");
    let mut config = missing_cli_config(temp.path());
    config.queue.max_size = 10;
    config.queue.cleanup_threshold = 10;
    let mut harness = Harness::start(config, None);
    let handle = harness.handle.clone();

    let mut ids = Vec::new();
    for i in 0..10 {
        ids.push(handle.enqueue(format!("task {i}")).await.expect("enqueue"));
    }

    assert!(matches!(
        handle.enqueue("overflow").await,
        Err(AppError::InvalidInput(_))
    ));
    harness
        .expect_notice(NoticeLevel::Warning, "Queue is full (10 messages)")
        .await;
    assert!(matches!(
        handle.duplicate(&ids[0]).await,
        Err(AppError::InvalidInput(_))
    ));

    let items = handle.items().await.expect("items");
    assert_eq!(items.len(), 10);
    assert!(items.iter().all(|m| m.text != "overflow"));

    harness.shutdown().await;
}
