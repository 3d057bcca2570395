use chrono::NaiveDate;

use crate::models::{Task, TaskStatus};

/// Truncate a string to a maximum length, adding ellipsis if needed
pub fn truncate_string(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else if max_len <= 3 {
        s.chars().take(max_len).collect()
    } else {
        let truncated: String = s.chars().take(max_len - 3).collect();
        format!("{}...", truncated)
    }
}

/// Format a date string to a more readable format
pub fn format_date(date: &str) -> String {
    // Try to parse ISO format and convert to readable
    if let Ok(dt) = chrono::DateTime::parse_from_rfc3339(date) {
        dt.format("%b %d, %Y").to_string()
    } else if let Some(day) = date
        .get(..10)
        .and_then(|d| NaiveDate::parse_from_str(d, "%Y-%m-%d").ok())
    {
        day.format("%b %d, %Y").to_string()
    } else {
        date.to_string()
    }
}

/// Short label for the task's state as of `today`
pub fn task_status_label(task: &Task, today: NaiveDate) -> &'static str {
    match task.status(today) {
        TaskStatus::Completed => "[x]",
        TaskStatus::Overdue => "[!]",
        TaskStatus::Open => "[ ]",
    }
}

/// One-line summary used by list views
pub fn task_line(task: &Task, today: NaiveDate, title_width: usize) -> String {
    let due = task
        .due_date
        .as_deref()
        .map(format_date)
        .unwrap_or_else(|| "no due date".to_string());
    format!(
        "{} {:>4}  {:<width$}  {}",
        task_status_label(task, today),
        task.id,
        truncate_string(&task.title, title_width),
        due,
        width = title_width
    )
}
