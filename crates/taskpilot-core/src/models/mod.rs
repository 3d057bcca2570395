//! Data models for the task API.
//!
//! - `Task`, `NewTask`, `TaskUpdate`: task resources and write bodies
//! - `TaskDraft`: unvalidated form input with the form's validation rules
//! - Auth payloads: `Credentials`, `AuthResponse`, `RefreshResponse`

pub mod auth;
pub(crate) mod id;
pub mod task;

pub use auth::{AuthResponse, Credentials, RefreshRequest, RefreshResponse, UserResponse};
pub use task::{
    Field, NewTask, Task, TaskDraft, TaskStatus, TaskUpdate, ValidationError, ValidationErrors,
};
