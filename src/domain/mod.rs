mod history;
mod message;

pub use history::{History, HistoryError};
pub use message::{Message, Role, ToolCall};
