//! REST API access for the task service.
//!
//! This module provides the `AuthPipeline`, which every authenticated call
//! goes through (bearer injection, one silent refresh-and-retry on 401,
//! forced logout when recovery is impossible), and the `ApiClient` facade
//! with the task and auth operations built on top of it.
//!
//! The API uses JWT bearer tokens obtained from `/api/auth/login` and
//! renewed through `/api/auth/refresh`.

pub mod client;
pub mod error;
pub mod pipeline;
pub mod request;
pub mod transport;

pub use client::ApiClient;
pub use error::ApiError;
pub use pipeline::{AuthPipeline, PipelineOptions, SessionEndReason, SessionEvent};
pub use request::{ApiRequest, ApiResponse, Attempt, PendingRequest};
pub use transport::{HttpTransport, Transport};
