//! Utility functions for formatting tasks for display.

pub mod format;

// Re-export commonly used functions at module level
pub use format::{format_date, task_line, task_status_label, truncate_string};
