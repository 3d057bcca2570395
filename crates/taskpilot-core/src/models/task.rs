use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::id::deserialize_id;

/// Maximum title length accepted by the task form
pub const MAX_TITLE_LEN: usize = 100;

/// Maximum description length accepted by the task form
pub const MAX_DESCRIPTION_LEN: usize = 500;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskStatus {
    Open,
    Overdue,
    Completed,
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TaskStatus::Open => write!(f, "Open"),
            TaskStatus::Overdue => write!(f, "Overdue"),
            TaskStatus::Completed => write!(f, "Done"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    #[serde(deserialize_with = "deserialize_id")]
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub due_date: Option<String>,
    #[serde(default)]
    pub completed: bool,
    #[serde(default, deserialize_with = "super::id::deserialize_optional_id")]
    pub user_id: Option<String>,
    pub created_at: Option<String>,
    pub updated_at: Option<String>,
}

impl Task {
    /// Due date as a calendar date. Accepts plain dates and full
    /// timestamps, using the date part of the latter.
    pub fn due(&self) -> Option<NaiveDate> {
        self.due_date.as_deref().and_then(parse_day)
    }

    /// Open tasks whose due date lies strictly before `today`.
    pub fn is_overdue(&self, today: NaiveDate) -> bool {
        if self.completed {
            return false;
        }
        self.due().map(|due| due < today).unwrap_or(false)
    }

    pub fn status(&self, today: NaiveDate) -> TaskStatus {
        if self.completed {
            TaskStatus::Completed
        } else if self.is_overdue(today) {
            TaskStatus::Overdue
        } else {
            TaskStatus::Open
        }
    }
}

/// Body of `POST /api/tasks`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NewTask {
    pub title: String,
    pub description: String,
    pub due_date: String,
}

/// Body of `PUT /api/tasks/{id}`. Unset fields are left out of the JSON.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TaskUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub due_date: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed: Option<bool>,
}

impl TaskUpdate {
    pub fn is_empty(&self) -> bool {
        self.title.is_none()
            && self.description.is_none()
            && self.due_date.is_none()
            && self.completed.is_none()
    }

    /// Check the fields that are being changed against the form rules.
    pub fn validate(&self) -> Result<(), ValidationErrors> {
        let mut errors = ValidationErrors::default();
        if let Some(title) = &self.title {
            errors.check(Field::Title, check_title(title));
        }
        if let Some(description) = &self.description {
            errors.check(Field::Description, check_description(description));
        }
        if let Some(due_date) = &self.due_date {
            errors.check(Field::DueDate, check_due_date(due_date));
        }
        errors.into_result()
    }
}

/// Unvalidated task form input.
#[derive(Debug, Clone, Default)]
pub struct TaskDraft {
    pub title: String,
    pub description: String,
    pub due_date: String,
}

impl TaskDraft {
    /// Validate every field, reporting all problems at once.
    pub fn validate(self) -> Result<NewTask, ValidationErrors> {
        let mut errors = ValidationErrors::default();
        errors.check(Field::Title, check_title(&self.title));
        errors.check(Field::Description, check_description(&self.description));
        errors.check(Field::DueDate, check_due_date(&self.due_date));
        errors.into_result()?;

        Ok(NewTask {
            title: self.title.trim().to_string(),
            description: self.description.trim().to_string(),
            due_date: self.due_date.trim().to_string(),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Field {
    Title,
    Description,
    DueDate,
}

impl std::fmt::Display for Field {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Field::Title => write!(f, "title"),
            Field::Description => write!(f, "description"),
            Field::DueDate => write!(f, "due date"),
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("{0} is required")]
    Required(Field),

    #[error("{field} must be less than {max} characters")]
    TooLong { field: Field, max: usize },

    #[error("due date must be a valid date (YYYY-MM-DD)")]
    InvalidDate,
}

/// Every field error found in one form submission.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ValidationErrors {
    pub errors: Vec<(Field, ValidationError)>,
}

impl std::fmt::Display for ValidationErrors {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for (i, (_, error)) in self.errors.iter().enumerate() {
            if i > 0 {
                write!(f, "; ")?;
            }
            write!(f, "{}", error)?;
        }
        Ok(())
    }
}

impl std::error::Error for ValidationErrors {}

impl ValidationErrors {
    pub fn for_field(&self, field: Field) -> Option<&ValidationError> {
        self.errors.iter().find(|(f, _)| *f == field).map(|(_, e)| e)
    }

    fn check(&mut self, field: Field, result: Result<(), ValidationError>) {
        if let Err(e) = result {
            self.errors.push((field, e));
        }
    }

    fn into_result(self) -> Result<(), ValidationErrors> {
        if self.errors.is_empty() {
            Ok(())
        } else {
            Err(self)
        }
    }
}

fn check_length(field: Field, value: &str, max: usize) -> Result<(), ValidationError> {
    let len = value.trim().chars().count();
    if len == 0 {
        Err(ValidationError::Required(field))
    } else if len > max {
        Err(ValidationError::TooLong { field, max })
    } else {
        Ok(())
    }
}

fn check_title(title: &str) -> Result<(), ValidationError> {
    check_length(Field::Title, title, MAX_TITLE_LEN)
}

fn check_description(description: &str) -> Result<(), ValidationError> {
    check_length(Field::Description, description, MAX_DESCRIPTION_LEN)
}

fn check_due_date(due_date: &str) -> Result<(), ValidationError> {
    let due_date = due_date.trim();
    if due_date.is_empty() {
        return Err(ValidationError::Required(Field::DueDate));
    }
    NaiveDate::parse_from_str(due_date, "%Y-%m-%d")
        .map(|_| ())
        .map_err(|_| ValidationError::InvalidDate)
}

fn parse_day(value: &str) -> Option<NaiveDate> {
    let day = value.get(..10).unwrap_or(value);
    NaiveDate::parse_from_str(day, "%Y-%m-%d").ok()
}
