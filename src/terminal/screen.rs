//! Accumulated terminal screen contents.

use super::patterns::CLEAR_SCREEN_SEQUENCES;

/// Buffer length that triggers trimming.
pub const SCREEN_BUFFER_CAP: usize = 50_000;

/// Characters kept after trimming.
pub const SCREEN_BUFFER_TAIL: usize = 40_000;

/// Text printed since the last clear-screen sequence.
///
/// A mark splits the buffer into text already accounted for and text
/// still to be scanned. It follows the text through trims and falls back
/// to the start when the screen is cleared.
#[derive(Debug, Clone, Default)]
pub struct ScreenBuffer {
    text: String,
    mark: usize,
}

impl ScreenBuffer {
    /// Create an empty buffer.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Current contents.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.text
    }

    /// Feed one output chunk.
    ///
    /// A chunk containing a clear-screen sequence replaces the buffer;
    /// anything else is appended. Returns `true` when the buffer was reset.
    pub fn push(&mut self, chunk: &str) -> bool {
        let cleared = contains_clear_screen(chunk);
        if cleared {
            self.clear();
        }
        self.text.push_str(chunk);
        self.trim();
        cleared
    }

    /// Drop everything.
    pub fn clear(&mut self) {
        self.text.clear();
        self.mark = 0;
    }

    /// Byte offset of the mark.
    #[must_use]
    pub fn mark(&self) -> usize {
        self.mark
    }

    /// Move the mark to byte offset `at`, clamped to the buffer end.
    ///
    /// Offsets inside a multibyte character are ignored.
    pub fn set_mark(&mut self, at: usize) {
        let at = at.min(self.text.len());
        if self.text.is_char_boundary(at) {
            self.mark = at;
        }
    }

    /// Text after the mark.
    #[must_use]
    pub fn since_mark(&self) -> &str {
        self.text.get(self.mark..).unwrap_or_default()
    }

    fn trim(&mut self) {
        // Byte length bounds the char count from above.
        if self.text.len() <= SCREEN_BUFFER_CAP {
            return;
        }
        let chars = self.text.chars().count();
        if chars <= SCREEN_BUFFER_CAP {
            return;
        }
        let skip = chars - SCREEN_BUFFER_TAIL;
        if let Some((cut, _)) = self.text.char_indices().nth(skip) {
            self.text.drain(..cut);
            self.mark = self.mark.saturating_sub(cut);
        }
    }
}

/// Whether `chunk` contains any recognized clear-screen sequence.
#[must_use]
pub fn contains_clear_screen(chunk: &str) -> bool {
    CLEAR_SCREEN_SEQUENCES.iter().any(|seq| chunk.contains(seq))
}
