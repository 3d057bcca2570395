//! Core library for taskpilot.
//!
//! This crate owns everything below the user interface:
//!
//! - `auth`: the persisted token store, access-token claims decoding,
//!   and keychain-backed remembered credentials
//! - `api`: the authenticated request pipeline (bearer injection,
//!   refresh-and-retry-once on 401, forced logout) and the task/auth client
//! - `models`: task and authentication payloads
//! - `config`: on-disk and environment configuration
//!
//! Front ends talk to [`api::ApiClient`] and listen for
//! [`api::SessionEvent`]s to decide when to send the user back to login.

pub mod api;
pub mod auth;
pub mod clock;
pub mod config;
pub mod models;
pub mod utils;

#[cfg(test)]
pub(crate) mod test_support;

pub use api::{ApiClient, ApiError, AuthPipeline, PipelineOptions, SessionEndReason, SessionEvent};
pub use auth::{FileTokenStore, MemoryTokenStore, SessionData, TokenStore};
pub use clock::{Clock, SystemClock};
pub use config::Config;
