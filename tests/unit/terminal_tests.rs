//! Screen buffer, prompt patterns, navigation keys and the output codec.

use bytes::BytesMut;
use tokio_util::codec::Decoder;

use queue_autopilot::terminal::codec::Utf8ChunkCodec;
use queue_autopilot::terminal::patterns::{
    auth_failure, has_permission_prompt, is_startup_ready, permission_prompt_end,
    screen_looks_ready,
};
use queue_autopilot::terminal::screen::{SCREEN_BUFFER_CAP, SCREEN_BUFFER_TAIL};
use queue_autopilot::terminal::{Key, ScreenBuffer};
use queue_autopilot::AppError;

// ── Screen buffer ────────────────────────────────────────────

#[test]
fn screen_appends_chunks() {
    let mut screen = ScreenBuffer::new();
    assert!(!screen.push("hello "));
    assert!(!screen.push("world"));
    assert_eq!(screen.as_str(), "hello world");
}

#[test]
fn clear_screen_chunk_replaces_buffer() {
    let mut screen = ScreenBuffer::new();
    screen.push("old output");

    assert!(screen.push("\x1b[2J\x1b[Hfresh"));
    assert_eq!(screen.as_str(), "\x1b[2J\x1b[Hfresh");
}

#[test]
fn oversized_screen_keeps_the_tail() {
    let mut screen = ScreenBuffer::new();
    screen.push(&"a".repeat(SCREEN_BUFFER_CAP));
    screen.push("bbbb");

    assert_eq!(screen.as_str().chars().count(), SCREEN_BUFFER_TAIL);
    assert!(screen.as_str().ends_with("bbbb"));
}

#[test]
fn mark_follows_trim_and_resets_on_clear() {
    let mut screen = ScreenBuffer::new();
    screen.push(&"a".repeat(SCREEN_BUFFER_CAP - 10));
    screen.push("question");
    screen.set_mark(SCREEN_BUFFER_CAP - 4);
    assert_eq!(screen.since_mark(), "on");

    screen.push(&"b".repeat(20));
    assert_eq!(screen.since_mark(), format!("on{}", "b".repeat(20)));

    screen.push("\x1b[2Jnew");
    assert_eq!(screen.mark(), 0);
    assert_eq!(screen.since_mark(), "\x1b[2Jnew");

    screen.set_mark(usize::MAX);
    assert_eq!(screen.since_mark(), "");
}

// ── Patterns ─────────────────────────────────────────────────

#[test]
fn startup_ready_on_shortcut_hint() {
    assert!(is_startup_ready("  ? for shortcuts  "));
    assert!(!is_startup_ready("Loading workspace..."));
}

#[test]
fn startup_ready_on_styled_empty_prompt() {
    let chunk = "\x1b[39m\x1b[22m > \x1b[7mT\x1b[27mry \"fix lint errors\"";
    assert!(is_startup_ready(chunk));
}

#[test]
fn screen_ready_on_prompt_shapes() {
    assert!(screen_looks_ready("done\n? for shortcuts"));
    assert!(screen_looks_ready("answer\n> "));
    assert!(screen_looks_ready(
        "\x1b[2m\x1b[38;5;244m│\x1b[39m\x1b[22m > "
    ));
    assert!(!screen_looks_ready("Thinking..."));
}

#[test]
fn detects_permission_questions() {
    assert!(has_permission_prompt("Do you want to make this edit to src/main.rs?"));
    assert!(has_permission_prompt("Proceed with installation"));
    assert!(!has_permission_prompt("Edited src/main.rs"));

    let text = "Proceed with install?\nDo you want to create a.txt?\n? for shortcuts";
    let end = text.find(" a.txt").expect("question");
    assert_eq!(permission_prompt_end(text), Some(end));
    assert_eq!(permission_prompt_end("Edited src/main.rs"), None);
}

#[test]
fn detects_auth_failures() {
    assert_eq!(
        auth_failure("error: Please authenticate with Claude first"),
        Some("Please authenticate with Claude")
    );
    assert_eq!(auth_failure("all good"), None);
}

// ── Keys ─────────────────────────────────────────────────────

#[test]
fn keys_parse_case_insensitively() {
    assert_eq!("UP".parse::<Key>().expect("up"), Key::Up);
    assert_eq!(" enter ".parse::<Key>().expect("enter"), Key::Enter);
    assert_eq!("esc".parse::<Key>().expect("esc"), Key::Escape);
    assert!(matches!("tab".parse::<Key>(), Err(AppError::InvalidInput(_))));
}

#[test]
fn keys_map_to_terminal_sequences() {
    assert_eq!(Key::Up.sequence(), b"\x1b[A");
    assert_eq!(Key::Down.sequence(), b"\x1b[B");
    assert_eq!(Key::Right.sequence(), b"\x1b[C");
    assert_eq!(Key::Left.sequence(), b"\x1b[D");
    assert_eq!(Key::Enter.sequence(), b"\r");
    assert_eq!(Key::Escape.sequence(), b"\x1b");
    assert_eq!(Key::Escape.to_string(), "escape");
}

// ── Codec ────────────────────────────────────────────────────

#[test]
fn codec_holds_back_split_multibyte_sequence() {
    let mut codec = Utf8ChunkCodec::new();
    let check = "✓".as_bytes();
    let mut buf = BytesMut::from(&b"ok "[..]);
    buf.extend_from_slice(&check[..1]);

    let first = codec.decode(&mut buf).expect("decode");
    assert_eq!(first.as_deref(), Some("ok "));
    assert_eq!(buf.len(), 1);

    buf.extend_from_slice(&check[1..]);
    let second = codec.decode(&mut buf).expect("decode");
    assert_eq!(second.as_deref(), Some("✓"));
    assert!(buf.is_empty());
}

#[test]
fn codec_replaces_invalid_bytes() {
    let mut codec = Utf8ChunkCodec::new();
    let mut buf = BytesMut::from(&b"a\xffb"[..]);

    let mut out = String::new();
    while let Some(chunk) = codec.decode(&mut buf).expect("decode") {
        out.push_str(&chunk);
    }
    assert_eq!(out, "a\u{fffd}b");
}

#[test]
fn codec_flushes_partial_sequence_at_eof() {
    let mut codec = Utf8ChunkCodec::new();
    let mut buf = BytesMut::from(&"✓".as_bytes()[..2]);

    assert_eq!(codec.decode(&mut buf).expect("decode"), None);
    let rest = codec.decode_eof(&mut buf).expect("decode eof");
    assert!(rest.is_some_and(|s| s.contains('\u{fffd}')));
    assert!(buf.is_empty());
}
