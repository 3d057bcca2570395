//! Authentication state for the client.
//!
//! This module provides:
//! - `TokenStore`: the injectable session store, with file-backed and
//!   in-memory implementations
//! - `AccessTokenClaims`: expiry inspection of access tokens
//! - `CredentialStore`: remembered passwords in the OS keychain

pub mod claims;
pub mod credentials;
pub mod session;

pub use claims::{is_token_live, AccessTokenClaims, ClaimsError};
pub use credentials::CredentialStore;
pub use session::{FileTokenStore, MemoryTokenStore, SessionData, TokenStore};
