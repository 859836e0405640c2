//! Terminal stream decoding and screen analysis.

pub mod codec;
pub mod keys;
pub mod patterns;
pub mod readiness;
pub mod screen;

pub use keys::Key;
pub use readiness::{ScreenAnalyzer, ScreenState};
pub use screen::ScreenBuffer;
