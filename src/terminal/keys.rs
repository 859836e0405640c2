//! Navigation keys forwarded to the CLI.

use std::fmt::{Display, Formatter};
use std::str::FromStr;

use crate::AppError;

/// A key the operator can press inside the CLI.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Key {
    /// Arrow up.
    Up,
    /// Arrow down.
    Down,
    /// Arrow left.
    Left,
    /// Arrow right.
    Right,
    /// Submit.
    Enter,
    /// Cancel or interrupt.
    Escape,
}

impl Key {
    /// Terminal byte sequence for the key.
    #[must_use]
    pub fn sequence(self) -> &'static [u8] {
        match self {
            Self::Up => b"\x1b[A",
            Self::Down => b"\x1b[B",
            Self::Left => b"\x1b[D",
            Self::Right => b"\x1b[C",
            Self::Enter => b"\r",
            Self::Escape => b"\x1b",
        }
    }
}

impl FromStr for Key {
    type Err = AppError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "up" => Ok(Self::Up),
            "down" => Ok(Self::Down),
            "left" => Ok(Self::Left),
            "right" => Ok(Self::Right),
            "enter" => Ok(Self::Enter),
            "escape" | "esc" => Ok(Self::Escape),
            other => Err(AppError::InvalidInput(format!("unknown key: {other}"))),
        }
    }
}

impl Display for Key {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Up => "up",
            Self::Down => "down",
            Self::Left => "left",
            Self::Right => "right",
            Self::Enter => "enter",
            Self::Escape => "escape",
        };
        f.write_str(name)
    }
}
