//! Domain model module declarations.

pub mod history;
pub mod message;
pub mod session;

pub use history::HistoryRun;
pub use message::{MessageItem, MessageStatus};
pub use session::{DependencyReport, DependencyStatus, SessionSnapshot};
